use std::time::Duration;

use bridge_link::{Link, MavMessage};
use bridge_proto::{ErrorKind, MissionError};
use mavlink::common::{MavModeFlag, COMMAND_LONG_DATA, MavCmd, SET_MODE_DATA};
use tracing::info;

use crate::state::VehicleState;

const CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// ArduCopter's custom flight mode numbers, in the order operators name them.
const MODE_TABLE: &[(&str, u32)] = &[
    ("STABILIZE", 0),
    ("ACRO", 1),
    ("ALT_HOLD", 2),
    ("AUTO", 3),
    ("GUIDED", 4),
    ("LOITER", 5),
    ("RTL", 6),
    ("CIRCLE", 7),
    ("LAND", 9),
    ("DRIFT", 11),
    ("SPORT", 13),
    ("FLIP", 14),
    ("AUTOTUNE", 15),
    ("POSHOLD", 16),
    ("BRAKE", 17),
    ("THROW", 18),
    ("AVOID_ADSB", 19),
    ("GUIDED_NOGPS", 20),
    ("SMART_RTL", 21),
    ("FLOWHOLD", 22),
    ("FOLLOW", 23),
    ("ZIGZAG", 24),
    ("SYSTEMID", 25),
    ("AUTOROTATE", 26),
    ("AUTO_RTL", 27),
];

fn mode_id(name: &str) -> Option<u32> {
    MODE_TABLE.iter().find(|(n, _)| *n == name).map(|(_, id)| *id)
}

/// Reverse lookup of `MODE_TABLE`, used by the ingestor to decode a
/// heartbeat's `custom_mode` back into the name operators set it with.
pub(crate) fn mode_name(custom_mode: u32) -> String {
    MODE_TABLE
        .iter()
        .find(|(_, id)| *id == custom_mode)
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

fn not_connected() -> MissionError {
    MissionError::new(
        ErrorKind::ConnectionError,
        "No connection to drone",
        "Ensure drone is powered and connected. Try reconnecting.",
    )
}

/// Requests a mode change and waits (polling at 100ms) for the Telemetry
/// Ingestor to observe it reflected back in a heartbeat, up to 5 seconds.
pub async fn set_mode(link: &Link, state: &VehicleState, mode: &str) -> Result<(), MissionError> {
    if !state.is_healthy().await {
        return Err(not_connected());
    }
    let custom_mode = mode_id(mode).ok_or_else(|| {
        MissionError::new(
            ErrorKind::ParameterError,
            format!("unknown flight mode: {mode}"),
            "use a valid ArduCopter mode name",
        )
    })?;

    let msg = MavMessage::SET_MODE(SET_MODE_DATA {
        custom_mode,
        target_system: link.target_system(),
        base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
    });
    link.send(msg).await.map_err(|e| MissionError::new(ErrorKind::ModeError, e.to_string(), "retry the mode change"))?;
    info!(mode, "flight mode change requested");

    wait_until(CONFIRM_TIMEOUT, || async {
        state.snapshot().await.mode == mode
    })
    .await
    .ok_or_else(|| {
        MissionError::new(
            ErrorKind::ModeError,
            format!("mode change to {mode} timed out"),
            "check if mode change is allowed in current state",
        )
    })
}

/// Requests arm/disarm and waits for the armed flag to reflect the request,
/// up to 5 seconds.
pub async fn arm(link: &Link, state: &VehicleState, desired: bool) -> Result<(), MissionError> {
    if !state.is_healthy().await {
        return Err(not_connected());
    }

    let cmd = COMMAND_LONG_DATA {
        target_system: link.target_system(),
        target_component: link.target_component(),
        command: MavCmd::MAV_CMD_COMPONENT_ARM_DISARM.into(),
        confirmation: 0,
        param1: if desired { 1.0 } else { 0.0 },
        param2: 0.0,
        param3: 0.0,
        param4: 0.0,
        param5: 0.0,
        param6: 0.0,
        param7: 0.0,
    };
    link.send(MavMessage::COMMAND_LONG(cmd))
        .await
        .map_err(|e| MissionError::new(ErrorKind::ArmError, e.to_string(), "retry the command"))?;
    info!(desired, "arm/disarm command sent");

    wait_until(CONFIRM_TIMEOUT, || async { state.snapshot().await.armed == desired })
        .await
        .ok_or_else(|| {
            MissionError::new(
                ErrorKind::ArmError,
                format!("{} command timed out", if desired { "arm" } else { "disarm" }),
                "check if arming is allowed in current state",
            )
        })
}

async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> Option<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return Some(());
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_table_covers_named_modes() {
        assert_eq!(mode_id("GUIDED"), Some(4));
        assert_eq!(mode_id("AUTO"), Some(3));
        assert_eq!(mode_id("NOT_A_MODE"), None);
    }
}
