//! The autopilot session core: telemetry ingestion, vehicle state, command
//! execution, the mission protocol engine, the mission supervisor, the
//! event log, and the session facade tying them together.

mod commands;
mod eventlog;
mod ingestor;
mod mission;
mod session;
mod state;
mod supervisor;

pub use eventlog::{EventLog, LogPublisher};
pub use session::{LinkConfig, Session};
pub use state::{FixType, VehicleSnapshot, VehicleState, HEARTBEAT_TIMEOUT};
pub use supervisor::{MissionSupervisor, Transition};

pub use mission::{check_prerequisites, validate_parameters};
