use serde::Serialize;
use thiserror::Error;

/// Stable, SCREAMING_SNAKE_CASE error discriminant. Crosses the HTTP boundary
/// unchanged, so renaming a variant is a breaking change for clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConnectionError,
    GpsError,
    ArmError,
    ModeError,
    BatteryError,
    MissionStateError,
    WaypointError,
    CoordinateError,
    SettingsError,
    AltitudeError,
    SpeedError,
    MissionClearError,
    UploadError,
    SequenceError,
    MissionStartError,
    StopError,
    ParameterError,
    UnknownError,
}

/// The structured error returned by every mission/command operation.
///
/// Serializes as `{message, kind, resolution}`, matching the shape the
/// remote client expects regardless of which operation raised it.
#[derive(Debug, Error, Clone, Serialize)]
#[error("{message}")]
pub struct MissionError {
    pub message: String,
    pub kind: ErrorKind,
    pub resolution: String,
}

impl MissionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, resolution: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            resolution: resolution.into(),
        }
    }
}
