use std::sync::Arc;
use std::time::Duration;

use bridge_link::{any, Link, MavMessage};
use bridge_proto::LogLevel;
use mavlink::common::MavModeFlag;
use tokio::sync::watch;
use tracing::error;

use crate::commands::mode_name;
use crate::eventlog::EventLog;
use crate::mission;
use crate::state::{FixType, VehicleState};
use crate::supervisor::{MissionSupervisor, Transition};

const RECV_TIMEOUT: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Decodes every message the autopilot sends into `VehicleState`, appends
/// derived log entries, and drives the Mission Supervisor off the
/// waypoint-progress and mode-change events it observes. Runs until
/// `stop` fires; never terminates on its own short of a closed Link.
pub async fn run(
    link: Arc<Link>,
    state: Arc<VehicleState>,
    log: Arc<EventLog>,
    supervisor: Arc<MissionSupervisor>,
    dialogue_lock: Arc<tokio::sync::Mutex<()>>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            return;
        }

        let recv = tokio::select! {
            r = link.recv(any(), RECV_TIMEOUT) => r,
            _ = stop.changed() => return,
        };

        match recv {
            Ok(Some(msg)) => handle_message(&link, &state, &log, &supervisor, &dialogue_lock, msg).await,
            Ok(None) => continue,
            Err(e) => {
                state.mark_disconnected().await;
                error!(error = %e, "telemetry update error");
                log.add(LogLevel::Error, format!("Telemetry update error: {e}"));
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

async fn handle_message(
    link: &Arc<Link>,
    state: &Arc<VehicleState>,
    log: &Arc<EventLog>,
    supervisor: &Arc<MissionSupervisor>,
    dialogue_lock: &Arc<tokio::sync::Mutex<()>>,
    msg: MavMessage,
) {
    match msg {
        MavMessage::HEARTBEAT(hb) => {
            state.record_heartbeat().await;
            let new_mode = mode_name(hb.custom_mode);
            let new_armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);

            let prior = state.snapshot().await;
            if prior.mode != new_mode {
                log.add(LogLevel::Info, format!("Flight mode changed to {new_mode}"));
                state.mutate(|s| s.mode = new_mode.clone()).await;
                if let Some(Transition::Aborted) = supervisor.on_mode_change(&new_mode) {
                    log.add(LogLevel::Warning, "Mission aborted");
                    spawn_cleanup(link.clone(), log.clone(), state.clone(), dialogue_lock.clone());
                }
            }
            if prior.armed != new_armed {
                state.mutate(|s| s.armed = new_armed).await;
                log.add(LogLevel::Info, if new_armed { "Vehicle armed" } else { "Vehicle disarmed" });
            }
        }

        MavMessage::GLOBAL_POSITION_INT(p) => {
            state
                .mutate(|s| {
                    s.lat = p.lat as f64 / 1e7;
                    s.lon = p.lon as f64 / 1e7;
                    s.alt_msl_m = p.alt as f32 / 1000.0;
                    s.alt_rel_m = p.relative_alt as f32 / 1000.0;
                    s.heading_deg = p.hdg as f32 / 100.0;
                })
                .await;
        }

        MavMessage::VFR_HUD(v) => {
            state.mutate(|s| s.groundspeed_mps = v.groundspeed).await;
        }

        MavMessage::GPS_RAW_INT(g) => {
            state
                .mutate(|s| {
                    s.fix_type = FixType::from_wire(g.fix_type as u8);
                    s.satellites = g.satellites_visible;
                })
                .await;
        }

        MavMessage::SYS_STATUS(st) => {
            let voltage = (st.voltage_battery != u16::MAX).then(|| st.voltage_battery as f32 / 1000.0);
            let current = (st.current_battery != -1).then(|| st.current_battery as f32 / 100.0);
            let remaining = (0..=100).contains(&st.battery_remaining).then_some(st.battery_remaining as u8);

            state
                .mutate(|s| {
                    s.battery_voltage_v = voltage;
                    s.battery_current_a = current;
                    s.battery_pct = remaining;
                    // Mirrors the upstream reading verbatim: consumed tracks
                    // the remaining-percent field, not a separate counter.
                    s.battery_consumed = remaining;
                })
                .await;

            if let Some(pct) = remaining {
                if pct <= 10 {
                    log.add(LogLevel::Error, format!("Critical battery level: {pct}%"));
                } else if pct <= 20 {
                    log.add(LogLevel::Warning, format!("Low battery warning: {pct}%"));
                }
            }
        }

        MavMessage::MISSION_CURRENT(m) => {
            let snap = state.snapshot().await;
            if snap.mission_in_progress {
                state.mutate(|s| s.current_waypoint = m.seq).await;
                log.add(LogLevel::Info, format!("Current waypoint: {}", m.seq));
                on_progress(link, state, log, supervisor, dialogue_lock, m.seq, snap.total_waypoints).await;
            }
        }

        MavMessage::MISSION_ITEM_REACHED(m) => {
            let snap = state.snapshot().await;
            if snap.mission_in_progress {
                log.add(LogLevel::Info, format!("Reached waypoint: {}", m.seq));
                on_progress(link, state, log, supervisor, dialogue_lock, m.seq, snap.total_waypoints).await;
            }
        }

        _ => {}
    }
}

async fn on_progress(
    link: &Arc<Link>,
    state: &Arc<VehicleState>,
    log: &Arc<EventLog>,
    supervisor: &Arc<MissionSupervisor>,
    dialogue_lock: &Arc<tokio::sync::Mutex<()>>,
    seq: u16,
    total: u16,
) {
    if let Some(Transition::Completed) = supervisor.on_waypoint_progress(seq, total) {
        log.add(LogLevel::Info, "Mission completed successfully");
        state.reset_mission_counters().await;
        spawn_cleanup(link.clone(), log.clone(), state.clone(), dialogue_lock.clone());
    }
}

/// Mission completion/abort clears the vehicle's mission off-thread so the
/// ingestor loop is never blocked on the clear-all ack; it still respects
/// wire serialization by taking the same dialogue lock as every other
/// protocol exchange.
fn spawn_cleanup(link: Arc<Link>, log: Arc<EventLog>, state: Arc<VehicleState>, dialogue_lock: Arc<tokio::sync::Mutex<()>>) {
    tokio::spawn(async move {
        let _guard = dialogue_lock.lock().await;
        state.reset_mission_counters().await;
        if let Err(e) = mission::clear_mission(&link, &log).await {
            tracing::warn!(error = %e.message, "post-mission clear-all failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_global_position_int() {
        // Exact scaling for a representative GLOBAL_POSITION_INT sample.
        let lat = 374_220_000_i32 as f64 / 1e7;
        let lon = -1_220_840_000_i32 as f64 / 1e7;
        let alt = 10_500_i32 as f32 / 1000.0;
        let rel = 2_500_i32 as f32 / 1000.0;
        let hdg = 18_000_u16 as f32 / 100.0;
        assert_eq!(lat, 37.422);
        assert_eq!(lon, -122.084);
        assert_eq!(alt, 10.5);
        assert_eq!(rel, 2.5);
        assert_eq!(hdg, 180.0);
    }

    #[test]
    fn unknown_mode_id_falls_back() {
        assert_eq!(mode_name(3), "AUTO");
        assert_eq!(mode_name(999), "UNKNOWN");
    }
}
