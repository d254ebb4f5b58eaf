use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open serial device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no heartbeat received within {0:?} of opening the link")]
    NoHeartbeat(std::time::Duration),

    #[error("mavlink transport error: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("link is closed")]
    Closed,
}
