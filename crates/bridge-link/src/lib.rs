//! The autopilot transport: opens the serial link, keeps one background
//! reader fanning decoded messages out to any number of waiters, and lets
//! callers send frames independently of that reader.

mod error;
#[cfg(feature = "test-util")]
pub mod mock;

pub use error::LinkError;
pub use mavlink::common::MavMessage;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use mavlink::{MavConnection, MavHeader};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);
const BROADCAST_CAPACITY: usize = 256;

/// A predicate over decoded messages, used by `Link::recv` to pick out the
/// one variant a caller is waiting on without stealing messages meant for
/// other waiters.
pub type MessageFilter = Arc<dyn Fn(&MavMessage) -> bool + Send + Sync>;

pub fn any() -> MessageFilter {
    Arc::new(|_| true)
}

/// Matches a single message variant by its `mavlink::common` discriminant
/// name, e.g. `is_variant("HEARTBEAT")`.
pub fn is_variant(name: &'static str) -> MessageFilter {
    Arc::new(move |msg| format!("{msg:?}").starts_with(name))
}

/// Open/send/recv/close over the autopilot's binary message protocol.
///
/// `send` and the background reader never contend with each other: the
/// underlying `MavConnection` is `Send + Sync` and its `recv`/`send` take
/// `&self`, so the reader task and any sender hold the same `Arc` without a
/// shared mutex serializing the two directions.
pub struct Link {
    conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
    header: Mutex<MavHeader>,
    tx: broadcast::Sender<(MavHeader, MavMessage)>,
    connected: Arc<AtomicBool>,
    target_system: u8,
    target_component: u8,
    reader: Option<tokio::task::JoinHandle<()>>,
}

impl Link {
    /// Opens the transport and blocks (within `timeout`) for a first
    /// heartbeat, which also fixes `target_system`/`target_component` for
    /// every frame this `Link` sends afterward.
    pub async fn open(device: &str, baud: u32, sys_id: u8, comp_id: u8) -> Result<Self, LinkError> {
        let url = format!("serial:{device}:{baud}");
        let conn: Box<dyn MavConnection<MavMessage> + Send + Sync> = mavlink::connect(&url)
            .with_context(|| format!("mavlink connect {url}"))
            .map_err(|e| LinkError::Open { device: device.to_string(), source: e })?;
        let conn: Arc<dyn MavConnection<MavMessage> + Send + Sync> = Arc::from(conn);

        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(conn.clone(), tx.clone(), connected.clone());

        let mut rx = tx.subscribe();
        let (target_system, target_component) = tokio::time::timeout(HEARTBEAT_TIMEOUT, async {
            loop {
                match rx.recv().await {
                    Ok((hdr, MavMessage::HEARTBEAT(_))) => break Ok((hdr.system_id, hdr.component_id)),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break Err(LinkError::Closed),
                }
            }
        })
        .await
        .map_err(|_| LinkError::NoHeartbeat(HEARTBEAT_TIMEOUT))??;

        connected.store(true, Ordering::SeqCst);
        info!(device, baud, "autopilot link open");

        Ok(Self {
            conn,
            header: Mutex::new(MavHeader { system_id: sys_id, component_id: comp_id, sequence: 0 }),
            tx,
            connected,
            target_system,
            target_component,
            reader: Some(reader),
        })
    }

    /// For tests: wraps an already-constructed `MavConnection`, skipping the
    /// handshake wait (the caller's mock is assumed already "connected").
    #[cfg(feature = "test-util")]
    pub fn from_connection(
        conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
        sys_id: u8,
        comp_id: u8,
        target_system: u8,
        target_component: u8,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let reader = spawn_reader(conn.clone(), tx.clone(), connected.clone());
        Self {
            conn,
            header: Mutex::new(MavHeader { system_id: sys_id, component_id: comp_id, sequence: 0 }),
            tx,
            connected,
            target_system,
            target_component,
            reader: Some(reader),
        }
    }

    pub fn target_system(&self) -> u8 {
        self.target_system
    }

    pub fn target_component(&self) -> u8 {
        self.target_component
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn send(&self, msg: MavMessage) -> Result<(), LinkError> {
        let mut hdr = self.header.lock().await;
        hdr.sequence = hdr.sequence.wrapping_add(1);
        let hdr_snapshot = *hdr;
        drop(hdr);
        self.conn
            .send(&hdr_snapshot, &msg)
            .context("mavlink send")
            .map_err(LinkError::Transport)?;
        Ok(())
    }

    /// Waits for the next message matching `filter`. `Ok(None)` means the
    /// deadline elapsed with no match; it is not an error. `Err` means the
    /// reader observed a genuine transport failure.
    pub async fn recv(&self, filter: MessageFilter, timeout: Duration) -> Result<Option<MavMessage>, LinkError> {
        let mut rx = self.tx.subscribe();
        let result = tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok((_hdr, msg)) if filter(&msg) => return Ok(Some(msg)),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Err(LinkError::Closed),
                }
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => {
                if self.connected.load(Ordering::SeqCst) {
                    Ok(None)
                } else {
                    Err(LinkError::Closed)
                }
            }
        }
    }

    pub async fn close(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

fn spawn_reader(
    conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
    tx: broadcast::Sender<(MavHeader, MavMessage)>,
    connected: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || loop {
        match conn.recv() {
            Ok((hdr, msg)) => {
                connected.store(true, Ordering::SeqCst);
                let _ = tx.send((hdr, msg));
            }
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                warn!(error = %e, "autopilot link read error");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    })
}
