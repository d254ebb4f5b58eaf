use std::sync::Arc;
use std::time::Duration;

use bridge_link::{Link, LinkError, MavMessage};
use bridge_proto::{ErrorKind, LogLevel, MissionError, MissionSettings, Waypoint};
use mavlink::common::{MavDataStream, REQUEST_DATA_STREAM_DATA};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::info;

use crate::commands;
use crate::eventlog::EventLog;
use crate::ingestor;
use crate::mission;
use crate::state::VehicleState;
use crate::supervisor::MissionSupervisor;

const JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const STREAM_RATE_HZ: u16 = 4;

struct IngestorHandle {
    stop: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

/// The serial device and MAVLink identity this session connects as. Comes
/// from the loaded configuration (see `bridge-cli`'s `Config`); `connect()`
/// itself takes no arguments so every external caller reconnects the same
/// way the CLI was configured to.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub device: String,
    pub baud: u32,
    pub sys_id: u8,
    pub comp_id: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { device: "/dev/serial0".to_string(), baud: 921_600, sys_id: 255, comp_id: 1 }
    }
}

/// The single entry point external collaborators (the HTTP surface, the
/// CLI) use to drive the autopilot session. Serializes every wire dialogue
/// behind one lock so mission upload, mode changes, and arm/disarm never
/// interleave their frames, while leaving telemetry reads and log reads
/// lock-free.
pub struct Session {
    config: LinkConfig,
    link: RwLock<Option<Arc<Link>>>,
    ingestor: Mutex<Option<IngestorHandle>>,
    dialogue: Arc<Mutex<()>>,
    state: Arc<VehicleState>,
    log: Arc<EventLog>,
    supervisor: Arc<MissionSupervisor>,
}

impl Session {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            link: RwLock::new(None),
            ingestor: Mutex::new(None),
            dialogue: Arc::new(Mutex::new(())),
            state: Arc::new(VehicleState::new()),
            log: Arc::new(EventLog::new()),
            supervisor: Arc::new(MissionSupervisor::new()),
        }
    }

    pub fn state(&self) -> &VehicleState {
        &self.state
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub async fn is_connected(&self) -> bool {
        self.link.read().await.is_some()
    }

    pub async fn connect(&self) -> Result<(), MissionError> {
        let _guard = self.dialogue.lock().await;
        if self.link.read().await.is_some() {
            return Ok(());
        }

        let link = Link::open(&self.config.device, self.config.baud, self.config.sys_id, self.config.comp_id)
            .await
            .map_err(|e| map_link_error(&e))?;
        self.state.record_heartbeat().await;
        self.log.add(LogLevel::Info, "Successfully connected to Pixhawk");
        info!(system = link.target_system(), "connected to system");

        let link = Arc::new(link);
        request_data_streams(&link, &self.log).await;

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(ingestor::run(
            link.clone(),
            self.state.clone(),
            self.log.clone(),
            self.supervisor.clone(),
            self.dialogue.clone(),
            stop_rx,
        ));

        *self.link.write().await = Some(link);
        *self.ingestor.lock().await = Some(IngestorHandle { stop: stop_tx, task });
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), MissionError> {
        let _guard = self.dialogue.lock().await;
        if let Some(handle) = self.ingestor.lock().await.take() {
            let _ = handle.stop.send(true);
            let _ = tokio::time::timeout(JOIN_TIMEOUT, handle.task).await;
        }
        if let Some(link_arc) = self.link.write().await.take() {
            if let Ok(mut link) = Arc::try_unwrap(link_arc) {
                link.close().await;
            }
        }
        self.state.mark_disconnected().await;
        self.state.reset_mission_counters().await;
        self.log.add(LogLevel::Info, "Disconnected from Pixhawk");
        Ok(())
    }

    pub async fn set_mode(&self, mode: &str) -> Result<(), MissionError> {
        let _guard = self.dialogue.lock().await;
        let link = self.require_link().await?;
        commands::set_mode(&link, &self.state, mode).await
    }

    pub async fn arm(&self, desired: bool) -> Result<(), MissionError> {
        let _guard = self.dialogue.lock().await;
        let link = self.require_link().await?;
        commands::arm(&link, &self.state, desired).await
    }

    pub async fn mission_start(&self, waypoints: Vec<Waypoint>, settings: MissionSettings) -> Result<(), MissionError> {
        mission::validate_parameters(&waypoints, &settings)?;

        let _guard = self.dialogue.lock().await;
        let link = self.require_link().await?;
        mission::check_prerequisites(&self.state).await?;
        mission::upload(&link, &self.state, &self.log, &waypoints, &settings).await?;
        mission::start(&link, &self.state, &self.log).await?;
        self.supervisor.start();
        Ok(())
    }

    pub async fn mission_stop(&self) -> Result<(), MissionError> {
        let _guard = self.dialogue.lock().await;
        let link = self.require_link().await?;
        commands::set_mode(&link, &self.state, "LOITER").await.map_err(|mut e| {
            e.kind = ErrorKind::StopError;
            e
        })?;

        self.supervisor.abort();
        self.state.reset_mission_counters().await;
        mission::clear_mission(&link, &self.log).await.map_err(|mut e| {
            e.kind = ErrorKind::StopError;
            e
        })
    }

    async fn require_link(&self) -> Result<Arc<Link>, MissionError> {
        self.link
            .read()
            .await
            .clone()
            .ok_or_else(|| MissionError::new(ErrorKind::ConnectionError, "No connection to drone", "Connect to the drone first."))
    }
}

fn map_link_error(e: &LinkError) -> MissionError {
    MissionError::new(ErrorKind::ConnectionError, e.to_string(), "Ensure drone is powered and connected. Try reconnecting.")
}

async fn request_data_streams(link: &Link, log: &EventLog) {
    let msg = MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
        target_system: link.target_system(),
        target_component: link.target_component(),
        req_stream_id: MavDataStream::MAV_DATA_STREAM_ALL as u8,
        req_message_rate: STREAM_RATE_HZ,
        start_stop: 1,
    });
    match link.send(msg).await {
        Ok(()) => log.add(LogLevel::Info, "Data streams requested"),
        Err(e) => log.add(LogLevel::Error, format!("Failed to request data streams: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bridge_link::mock::{mock_pair, MockHandle};
    use bridge_proto::{MissionSettings, Waypoint};
    use mavlink::common::{MISSION_ACK_DATA, MISSION_CURRENT_DATA, MISSION_REQUEST_DATA, MavMissionResult};
    use mavlink::MavHeader;

    use crate::state::FixType;

    fn autopilot_header() -> MavHeader {
        MavHeader { system_id: 1, component_id: 1, sequence: 0 }
    }

    fn ack() -> MavMessage {
        MavMessage::MISSION_ACK(MISSION_ACK_DATA {
            target_system: 255,
            target_component: 1,
            mavtype: MavMissionResult::MAV_MISSION_ACCEPTED,
            mission_type: Default::default(),
        })
    }

    fn test_session() -> (Session, MockHandle) {
        let (conn, handle) = mock_pair();
        let conn: Arc<dyn mavlink::MavConnection<MavMessage> + Send + Sync> = Arc::new(conn);
        let link = Link::from_connection(conn, 255, 1, 1, 1);
        let session = Session {
            config: LinkConfig::default(),
            link: RwLock::new(Some(Arc::new(link))),
            ingestor: Mutex::new(None),
            dialogue: Arc::new(Mutex::new(())),
            state: Arc::new(VehicleState::new()),
            log: Arc::new(EventLog::new()),
            supervisor: Arc::new(MissionSupervisor::new()),
        };
        (session, handle)
    }

    /// `mission_start` and `mission_stop` both wait on the dialogue lock, so
    /// the frames they put on the wire must come out as two unbroken runs,
    /// never interleaved, regardless of which one acquires the lock first.
    /// Guards the `mission_stop` lock-ordering fix: before it, `mission_stop`
    /// sent `SET_MODE(LOITER)` ahead of taking the lock.
    #[tokio::test]
    async fn dialogue_lock_serializes_concurrent_calls() {
        let (session, handle) = test_session();
        session.state.record_heartbeat().await;
        session
            .state
            .mutate(|s| {
                s.fix_type = FixType::Fix3d;
                s.armed = true;
                s.mode = "GUIDED".to_string();
                s.battery_pct = Some(80);
            })
            .await;

        let waypoints = vec![Waypoint { lat: 37.0, lon: -122.0, alt: 50.0 }];
        let settings = MissionSettings { altitude: 50.0, speed: 5.0, return_to_home: false };

        let start_fut = session.mission_start(waypoints, settings);
        let stop_fut = session.mission_stop();

        let driver_state = session.state.clone();
        let rt = tokio::runtime::Handle::current();
        let driver = tokio::task::spawn_blocking(move || {
            let mut frames = Vec::new();
            while frames.len() < 7 {
                let Some((_, msg)) = handle.recv_sent_blocking() else { break };
                match &msg {
                    MavMessage::MISSION_CLEAR_ALL(_) => {
                        frames.push("clear");
                        handle.inject(autopilot_header(), ack());
                    }
                    MavMessage::MISSION_COUNT(_) => {
                        frames.push("count");
                        handle.inject(
                            autopilot_header(),
                            MavMessage::MISSION_REQUEST(MISSION_REQUEST_DATA {
                                target_system: 255,
                                target_component: 1,
                                seq: 0,
                            }),
                        );
                    }
                    MavMessage::MISSION_ITEM(_) => {
                        frames.push("item");
                        handle.inject(autopilot_header(), ack());
                    }
                    MavMessage::MISSION_SET_CURRENT(_) => {
                        frames.push("set_current");
                        handle.inject(
                            autopilot_header(),
                            MavMessage::MISSION_CURRENT(MISSION_CURRENT_DATA {
                                seq: 0,
                                total: 1,
                                mission_state: Default::default(),
                                mission_mode: 0,
                            }),
                        );
                    }
                    MavMessage::SET_MODE(data) => {
                        let mode = if data.custom_mode == 3 { "AUTO" } else { "LOITER" };
                        frames.push(if mode == "AUTO" { "set_mode_auto" } else { "set_mode_loiter" });
                        rt.block_on(driver_state.mutate(|s| s.mode = mode.to_string()));
                    }
                    _ => {}
                }
            }
            frames
        });

        let (start_result, _stop_result, frames) = tokio::join!(start_fut, stop_fut, driver);
        let frames = frames.unwrap();

        assert!(start_result.is_ok());

        let start_frames: &[&str] = &["clear", "count", "item", "set_current", "set_mode_auto"];
        let stop_frames: &[&str] = &["set_mode_loiter", "clear"];

        let start_then_stop = frames == [start_frames, stop_frames].concat();
        let stop_then_start = frames == [stop_frames, start_frames].concat();
        assert!(start_then_stop || stop_then_start, "dialogue frames interleaved: {frames:?}");
    }
}
