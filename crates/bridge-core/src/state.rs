use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

/// How long since the last heartbeat before the vehicle is considered
/// unreachable.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FixType {
    NoGps,
    NoFix,
    Fix2d,
    Fix3d,
    Dgps,
    RtkFloat,
    RtkFixed,
}

impl FixType {
    pub fn from_wire(v: u8) -> Self {
        match v {
            0 => FixType::NoGps,
            1 => FixType::NoFix,
            2 => FixType::Fix2d,
            3 => FixType::Fix3d,
            4 => FixType::Dgps,
            5 => FixType::RtkFloat,
            6 => FixType::RtkFixed,
            _ => FixType::NoFix,
        }
    }

    pub fn quality(self) -> u8 {
        self as u8
    }
}

/// The authoritative, concurrently-readable snapshot of the vehicle. All
/// correlated fields (position, mission counters) live in one struct behind
/// one lock so a single read acquisition always sees a consistent view.
#[derive(Debug, Clone)]
pub struct VehicleSnapshot {
    pub connected: bool,
    pub last_heartbeat_age: Option<Duration>,

    pub lat: f64,
    pub lon: f64,
    pub alt_msl_m: f32,
    pub alt_rel_m: f32,
    pub heading_deg: f32,
    pub groundspeed_mps: f32,

    pub battery_pct: Option<u8>,
    pub battery_voltage_v: Option<f32>,
    pub battery_current_a: Option<f32>,
    pub battery_consumed: Option<u8>,

    pub fix_type: FixType,
    pub satellites: u8,

    pub mode: String,
    pub armed: bool,

    pub mission_in_progress: bool,
    pub total_waypoints: u16,
    pub current_waypoint: u16,
}

impl Default for VehicleSnapshot {
    fn default() -> Self {
        Self {
            connected: false,
            last_heartbeat_age: None,
            lat: 0.0,
            lon: 0.0,
            alt_msl_m: 0.0,
            alt_rel_m: 0.0,
            heading_deg: 0.0,
            groundspeed_mps: 0.0,
            battery_pct: None,
            battery_voltage_v: None,
            battery_current_a: None,
            battery_consumed: None,
            fix_type: FixType::NoGps,
            satellites: 0,
            mode: "UNKNOWN".to_string(),
            armed: false,
            mission_in_progress: false,
            total_waypoints: 0,
            current_waypoint: 0,
        }
    }
}

struct Inner {
    snapshot: VehicleSnapshot,
    last_heartbeat_at: Option<Instant>,
}

/// Shared handle around the vehicle snapshot. Writers come from the
/// Telemetry Ingestor and, for the mission-start window, the Session Facade.
pub struct VehicleState {
    inner: RwLock<Inner>,
}

impl VehicleState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner { snapshot: VehicleSnapshot::default(), last_heartbeat_at: None }),
        }
    }

    /// A consistent, point-in-time copy of every correlated field.
    pub async fn snapshot(&self) -> VehicleSnapshot {
        let guard = self.inner.read().await;
        let mut snap = guard.snapshot.clone();
        snap.last_heartbeat_age = guard.last_heartbeat_at.map(|t| t.elapsed());
        snap.connected = guard.last_heartbeat_at.is_some_and(|t| t.elapsed() < HEARTBEAT_TIMEOUT);
        snap
    }

    pub async fn is_healthy(&self) -> bool {
        self.snapshot().await.connected
    }

    pub async fn mutate(&self, f: impl FnOnce(&mut VehicleSnapshot)) {
        let mut guard = self.inner.write().await;
        f(&mut guard.snapshot);
    }

    pub async fn record_heartbeat(&self) {
        let mut guard = self.inner.write().await;
        guard.last_heartbeat_at = Some(Instant::now());
    }

    pub async fn mark_disconnected(&self) {
        let mut guard = self.inner.write().await;
        guard.last_heartbeat_at = None;
    }

    pub async fn reset_mission_counters(&self) {
        let mut guard = self.inner.write().await;
        guard.snapshot.mission_in_progress = false;
        guard.snapshot.total_waypoints = 0;
        guard.snapshot.current_waypoint = 0;
    }
}

impl Default for VehicleState {
    fn default() -> Self {
        Self::new()
    }
}
