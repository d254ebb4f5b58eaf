//! An in-memory stand-in for the autopilot, used by `bridge-core`'s tests.
//!
//! Implements `MavConnection` over a pair of channels so the Mission
//! Protocol Engine and Telemetry Ingestor can be tested without a real
//! serial device: the test drives `inject()` to push inbound frames and
//! reads `sent()` to assert on outbound ones.

use std::sync::Mutex;

use mavlink::error::{MessageReadError, MessageWriteError};
use mavlink::{MavConnection, MavHeader, MavlinkVersion};
use mavlink::common::MavMessage;
use tokio::sync::mpsc;

pub struct MockConnection {
    inbound: Mutex<mpsc::UnboundedReceiver<(MavHeader, MavMessage)>>,
    outbound: mpsc::UnboundedSender<(MavHeader, MavMessage)>,
}

/// The test-facing handle: push inbound frames, drain outbound ones.
pub struct MockHandle {
    pub inbound_tx: mpsc::UnboundedSender<(MavHeader, MavMessage)>,
    pub outbound_rx: Mutex<mpsc::UnboundedReceiver<(MavHeader, MavMessage)>>,
}

pub fn mock_pair() -> (MockConnection, MockHandle) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    (
        MockConnection { inbound: Mutex::new(inbound_rx), outbound: outbound_tx },
        MockHandle { inbound_tx, outbound_rx: Mutex::new(outbound_rx) },
    )
}

impl MockHandle {
    /// Pushes a frame the mocked autopilot "sends" to the link under test.
    pub fn inject(&self, hdr: MavHeader, msg: MavMessage) {
        let _ = self.inbound_tx.send((hdr, msg));
    }

    /// Blocks (synchronously, for use from a `spawn_blocking` test body or a
    /// plain `#[test]`) until the link under test sends a frame.
    pub fn recv_sent_blocking(&self) -> Option<(MavHeader, MavMessage)> {
        self.outbound_rx.lock().unwrap().blocking_recv()
    }
}

impl MavConnection<MavMessage> for MockConnection {
    fn recv(&self) -> Result<(MavHeader, MavMessage), MessageReadError> {
        self.inbound
            .lock()
            .unwrap()
            .blocking_recv()
            .ok_or_else(|| MessageReadError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "mock closed")))
    }

    fn send(&self, header: &MavHeader, data: &MavMessage) -> Result<usize, MessageWriteError> {
        let _ = self.outbound.send((*header, data.clone()));
        Ok(0)
    }

    fn set_protocol_version(&mut self, _version: MavlinkVersion) {}

    fn get_protocol_version(&self) -> MavlinkVersion {
        MavlinkVersion::V2
    }
}
