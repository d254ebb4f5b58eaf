use std::time::Duration;

use bridge_link::{is_variant, Link, MavMessage};
use bridge_proto::{
    build_mission_plan, validate_waypoints, ErrorKind, LogLevel, MissionError, MissionPlanItem, MissionSettings,
    Waypoint,
};
use mavlink::common::{
    MavCmd, MavFrame, MISSION_CLEAR_ALL_DATA, MISSION_COUNT_DATA, MISSION_ITEM_DATA, MISSION_SET_CURRENT_DATA,
};

use crate::commands;
use crate::eventlog::EventLog;
use crate::state::{FixType, VehicleState};

const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameter validation plus vehicle-state prerequisites, run before every
/// upload/start. No frames are sent while validating.
pub fn validate_parameters(waypoints: &[Waypoint], settings: &MissionSettings) -> Result<(), MissionError> {
    validate_waypoints(waypoints)?;
    settings.validate()
}

pub async fn check_prerequisites(state: &VehicleState) -> Result<(), MissionError> {
    let snap = state.snapshot().await;

    if !snap.connected {
        return Err(MissionError::new(
            ErrorKind::ConnectionError,
            "No connection to drone",
            "Ensure drone is powered and connected. Try reconnecting.",
        ));
    }
    if snap.fix_type.quality() < FixType::Fix3d.quality() {
        return Err(MissionError::new(
            ErrorKind::GpsError,
            "Insufficient GPS signal",
            "Move to an open area with clear sky view and wait for GPS lock.",
        ));
    }
    if !snap.armed {
        return Err(MissionError::new(
            ErrorKind::ArmError,
            "Vehicle is not armed",
            "Arm the vehicle before starting the mission.",
        ));
    }
    if snap.mode != "GUIDED" && snap.mode != "AUTO" {
        return Err(MissionError::new(
            ErrorKind::ModeError,
            format!("Invalid flight mode: {}", snap.mode),
            "Switch to GUIDED mode before starting the mission.",
        ));
    }
    if snap.battery_pct.unwrap_or(0) < 30 {
        return Err(MissionError::new(
            ErrorKind::BatteryError,
            format!("Low battery: {}%", snap.battery_pct.unwrap_or(0)),
            "Charge or replace battery before starting mission.",
        ));
    }
    if snap.mission_in_progress {
        return Err(MissionError::new(
            ErrorKind::MissionStateError,
            "Mission already in progress",
            "Stop current mission before starting a new one.",
        ));
    }
    Ok(())
}

/// Sends mission-clear-all and waits for the ack. Used both standalone (the
/// Mission Supervisor's best-effort cleanup) and as step one of upload.
pub async fn clear_mission(link: &Link, log: &EventLog) -> Result<(), MissionError> {
    let msg = MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
        target_system: link.target_system(),
        target_component: link.target_component(),
    });
    link.send(msg).await.map_err(|e| MissionError::new(ErrorKind::MissionClearError, e.to_string(), "retry"))?;

    let ack = link
        .recv(is_variant("MISSION_ACK"), ACK_TIMEOUT)
        .await
        .map_err(|e| MissionError::new(ErrorKind::MissionClearError, e.to_string(), "try restarting the vehicle"))?;

    if ack.is_some() {
        log.add(LogLevel::Info, "Mission cleared from vehicle");
        Ok(())
    } else {
        log.add(LogLevel::Warning, "Failed to clear mission");
        Err(MissionError::new(
            ErrorKind::MissionClearError,
            "Failed to clear existing mission",
            "Try restarting the vehicle.",
        ))
    }
}

/// The handshake-driven upload: clear, count, then one `MISSION_ITEM` per
/// `MISSION_REQUEST` from the autopilot, in strict sequence order.
pub async fn upload(
    link: &Link,
    state: &VehicleState,
    log: &EventLog,
    waypoints: &[Waypoint],
    settings: &MissionSettings,
) -> Result<(), MissionError> {
    let plan = build_mission_plan(waypoints, settings);
    let total = plan.len() as u16;

    state
        .mutate(|s| {
            s.total_waypoints = total;
            s.current_waypoint = 0;
        })
        .await;

    let result = upload_inner(link, log, &plan, total).await;
    if result.is_err() {
        state
            .mutate(|s| {
                s.total_waypoints = 0;
                s.current_waypoint = 0;
            })
            .await;
    }
    result
}

async fn upload_inner(link: &Link, log: &EventLog, plan: &[MissionPlanItem], total: u16) -> Result<(), MissionError> {
    log.add(LogLevel::Info, "Clearing existing mission");
    clear_mission(link, log).await.map_err(|mut e| {
        e.message = "Failed to clear existing mission".to_string();
        e
    })?;

    log.add(LogLevel::Info, format!("Initiating upload of {total} waypoints"));
    link.send(MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
        target_system: link.target_system(),
        target_component: link.target_component(),
        count: total,
        mission_type: Default::default(),
    }))
    .await
    .map_err(|e| MissionError::new(ErrorKind::UploadError, e.to_string(), "check connection and try again"))?;

    for item in plan {
        let req = link
            .recv(is_variant("MISSION_REQUEST"), ACK_TIMEOUT)
            .await
            .map_err(|e| MissionError::new(ErrorKind::UploadError, e.to_string(), "check connection and try again"))?;

        let seq = match req {
            Some(MavMessage::MISSION_REQUEST(r)) => r.seq,
            Some(_) | None => {
                return Err(MissionError::new(
                    ErrorKind::UploadError,
                    format!("No mission request received for waypoint {}", item.seq),
                    "Check connection and try again.",
                ))
            }
        };

        if seq != item.seq {
            return Err(MissionError::new(
                ErrorKind::SequenceError,
                format!("Mission sequence mismatch. Expected {}, got {seq}", item.seq),
                "Try uploading the mission again.",
            ));
        }

        link.send(encode_item(link, item)).await.map_err(|e| {
            MissionError::new(ErrorKind::UploadError, e.to_string(), "check connection and try again")
        })?;

        if item.is_rtl {
            log.add(LogLevel::Info, "Added Return to Launch waypoint");
        } else {
            log.add(LogLevel::Info, format!("Uploaded waypoint {}/{}", item.seq + 1, total));
        }
    }

    let final_ack = link
        .recv(is_variant("MISSION_ACK"), ACK_TIMEOUT)
        .await
        .map_err(|e| MissionError::new(ErrorKind::UploadError, e.to_string(), "try uploading the mission again"))?;

    if final_ack.is_none() {
        return Err(MissionError::new(
            ErrorKind::UploadError,
            "No final mission acknowledgment received",
            "Try uploading the mission again.",
        ));
    }

    Ok(())
}

fn encode_item(link: &Link, item: &MissionPlanItem) -> MavMessage {
    let (command, param1, param2, param3, param4) = if item.is_rtl {
        (MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH, 0.0, 0.0, 0.0, 0.0)
    } else {
        (MavCmd::MAV_CMD_NAV_WAYPOINT, item.hold_time, item.accept_radius, item.pass_radius, f32::NAN)
    };

    MavMessage::MISSION_ITEM(MISSION_ITEM_DATA {
        target_system: link.target_system(),
        target_component: link.target_component(),
        seq: item.seq,
        frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT,
        command,
        current: 0,
        autocontinue: 1,
        param1,
        param2,
        param3,
        param4,
        x: item.lat as f32,
        y: item.lon as f32,
        z: item.altitude,
    })
}

/// Re-checks prerequisites, sets the first waypoint current, and switches
/// into AUTO, marking the mission in progress only once AUTO is confirmed.
pub async fn start(link: &Link, state: &VehicleState, log: &EventLog) -> Result<(), MissionError> {
    check_prerequisites(state).await?;

    link.send(MavMessage::MISSION_SET_CURRENT(MISSION_SET_CURRENT_DATA {
        target_system: link.target_system(),
        target_component: link.target_component(),
        seq: 0,
    }))
    .await
    .map_err(|e| MissionError::new(ErrorKind::MissionStartError, e.to_string(), "try uploading the mission again"))?;

    let ack = link
        .recv(is_variant("MISSION_CURRENT"), ACK_TIMEOUT)
        .await
        .map_err(|e| MissionError::new(ErrorKind::MissionStartError, e.to_string(), "try uploading the mission again"))?;
    if ack.is_none() {
        return Err(MissionError::new(
            ErrorKind::MissionStartError,
            "Failed to set initial waypoint",
            "Try uploading the mission again.",
        ));
    }

    commands::set_mode(link, state, "AUTO").await.map_err(|mut e| {
        e.kind = ErrorKind::ModeError;
        e.message = "Failed to enter AUTO mode".to_string();
        e.resolution = "Ensure vehicle is armed and in a valid starting position.".to_string();
        e
    })?;

    state
        .mutate(|s| {
            s.mission_in_progress = true;
            s.current_waypoint = 0;
        })
        .await;
    log.add(LogLevel::Info, "Mission started successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bridge_link::mock::{mock_pair, MockHandle};
    use mavlink::common::{MISSION_ACK_DATA, MISSION_CURRENT_DATA, MISSION_REQUEST_DATA, MavMissionResult};
    use mavlink::MavHeader;

    fn autopilot_header() -> MavHeader {
        MavHeader { system_id: 1, component_id: 1, sequence: 0 }
    }

    fn open_mock_link() -> (Link, MockHandle) {
        let (conn, handle) = mock_pair();
        let conn: Arc<dyn mavlink::MavConnection<MavMessage> + Send + Sync> = Arc::new(conn);
        (Link::from_connection(conn, 255, 1, 1, 1), handle)
    }

    fn ack() -> MavMessage {
        MavMessage::MISSION_ACK(MISSION_ACK_DATA {
            target_system: 255,
            target_component: 1,
            mavtype: MavMissionResult::MAV_MISSION_ACCEPTED,
            mission_type: Default::default(),
        })
    }

    /// Exactly one clear, one count, then a request/item exchange per
    /// waypoint in strictly increasing sequence order.
    #[tokio::test]
    async fn upload_drives_the_handshake_in_order() {
        let (link, handle) = open_mock_link();
        let state = VehicleState::new();
        let log = EventLog::new();

        let waypoints = vec![
            Waypoint { lat: 37.0, lon: -122.0, alt: 50.0 },
            Waypoint { lat: 37.001, lon: -122.001, alt: 50.0 },
        ];
        let settings = MissionSettings { altitude: 50.0, speed: 5.0, return_to_home: true };

        let upload_fut = upload(&link, &state, &log, &waypoints, &settings);

        let autopilot = tokio::task::spawn_blocking(move || {
            let _clear = handle.recv_sent_blocking();
            handle.inject(autopilot_header(), ack());
            let _count = handle.recv_sent_blocking();

            for seq in 0..3u16 {
                handle.inject(
                    autopilot_header(),
                    MavMessage::MISSION_REQUEST(MISSION_REQUEST_DATA { target_system: 255, target_component: 1, seq }),
                );
                let _item = handle.recv_sent_blocking();
            }
            handle.inject(autopilot_header(), ack());
        });

        let (result, _) = tokio::join!(upload_fut, autopilot);
        assert!(result.is_ok());
        assert_eq!(state.snapshot().await.total_waypoints, 3);
    }

    /// A mismatched MISSION_REQUEST.seq aborts the upload with
    /// SequenceError instead of attempting to resync.
    #[tokio::test]
    async fn upload_rejects_out_of_order_request() {
        let (link, handle) = open_mock_link();
        let state = VehicleState::new();
        let log = EventLog::new();

        let waypoints = vec![
            Waypoint { lat: 37.0, lon: -122.0, alt: 50.0 },
            Waypoint { lat: 37.001, lon: -122.001, alt: 50.0 },
        ];
        let settings = MissionSettings { altitude: 50.0, speed: 5.0, return_to_home: false };

        let upload_fut = upload(&link, &state, &log, &waypoints, &settings);

        let autopilot = tokio::task::spawn_blocking(move || {
            let _clear = handle.recv_sent_blocking();
            handle.inject(autopilot_header(), ack());
            let _count = handle.recv_sent_blocking();

            handle.inject(
                autopilot_header(),
                MavMessage::MISSION_REQUEST(MISSION_REQUEST_DATA { target_system: 255, target_component: 1, seq: 1 }),
            );
        });

        let (result, _) = tokio::join!(upload_fut, autopilot);
        assert!(matches!(result.unwrap_err().kind, ErrorKind::SequenceError));
        assert_eq!(state.snapshot().await.total_waypoints, 0);
    }

    /// Sets the first waypoint current, switches to AUTO, and only then
    /// marks the mission in progress.
    #[tokio::test]
    async fn start_enters_auto_and_marks_mission_in_progress() {
        let (link, handle) = open_mock_link();
        let state = Arc::new(VehicleState::new());
        state.record_heartbeat().await;
        state
            .mutate(|s| {
                s.fix_type = FixType::Fix3d;
                s.armed = true;
                s.mode = "GUIDED".to_string();
                s.battery_pct = Some(80);
            })
            .await;
        let log = EventLog::new();

        let start_fut = start(&link, &state, &log);

        let driver_state = state.clone();
        let rt = tokio::runtime::Handle::current();
        let autopilot = tokio::task::spawn_blocking(move || {
            let _set_current = handle.recv_sent_blocking();
            handle.inject(
                autopilot_header(),
                MavMessage::MISSION_CURRENT(MISSION_CURRENT_DATA {
                    seq: 0,
                    total: 1,
                    mission_state: Default::default(),
                    mission_mode: 0,
                }),
            );

            let _set_mode = handle.recv_sent_blocking();
            rt.block_on(driver_state.mutate(|s| s.mode = "AUTO".to_string()));
        });

        let (result, _) = tokio::join!(start_fut, autopilot);
        assert!(result.is_ok());
        let snap = state.snapshot().await;
        assert!(snap.mission_in_progress);
        assert_eq!(snap.current_waypoint, 0);
    }
}
