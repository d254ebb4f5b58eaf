use bridge_core::VehicleSnapshot;
use bridge_proto::{MissionError, MissionSettings, Waypoint};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_type: String,
}

impl From<&MissionError> for ErrorResponse {
    fn from(e: &MissionError) -> Self {
        Self { success: false, error: e.message.clone(), error_type: format!("{:?}", e.kind) }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetModeRequest {
    pub mode: Option<String>,
}

#[derive(Deserialize)]
pub struct ArmRequest {
    pub arm: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionStartRequest {
    pub waypoints: Vec<Waypoint>,
    pub settings: MissionSettings,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryDto {
    pub connected: bool,
    pub lat: f64,
    pub lon: f64,
    pub alt: f32,
    pub relative_alt: f32,
    pub heading: f32,
    pub groundspeed: f32,
    pub battery_percentage: Option<u8>,
    pub battery_voltage: Option<f32>,
    pub battery_current: Option<f32>,
    pub battery_consumed: Option<u8>,
    pub gps_fix_type: u8,
    pub satellites_visible: u8,
    pub mode: String,
    pub armed: bool,
    pub mission_in_progress: bool,
    pub total_waypoints: u16,
    pub current_waypoint: u16,
}

impl From<&VehicleSnapshot> for TelemetryDto {
    fn from(s: &VehicleSnapshot) -> Self {
        Self {
            connected: s.connected,
            lat: s.lat,
            lon: s.lon,
            alt: s.alt_msl_m,
            relative_alt: s.alt_rel_m,
            heading: s.heading_deg,
            groundspeed: s.groundspeed_mps,
            battery_percentage: s.battery_pct,
            battery_voltage: s.battery_voltage_v,
            battery_current: s.battery_current_a,
            battery_consumed: s.battery_consumed,
            gps_fix_type: s.fix_type.quality(),
            satellites_visible: s.satellites,
            mode: s.mode.clone(),
            armed: s.armed,
            mission_in_progress: s.mission_in_progress,
            total_waypoints: s.total_waypoints,
            current_waypoint: s.current_waypoint,
        }
    }
}

#[derive(Serialize)]
pub struct GpsDto {
    pub fix_type: u8,
    pub satellites: u8,
}

impl From<&VehicleSnapshot> for GpsDto {
    fn from(s: &VehicleSnapshot) -> Self {
        Self { fix_type: s.fix_type.quality(), satellites: s.satellites }
    }
}

#[derive(Serialize)]
pub struct MissionStatusSummary {
    pub in_progress: bool,
    pub current_waypoint: u16,
    pub total_waypoints: u16,
}

impl From<&VehicleSnapshot> for MissionStatusSummary {
    fn from(s: &VehicleSnapshot) -> Self {
        Self { in_progress: s.mission_in_progress, current_waypoint: s.current_waypoint, total_waypoints: s.total_waypoints }
    }
}

#[derive(Serialize)]
pub struct HealthDto {
    pub status: &'static str,
    pub connected: bool,
    pub gps: GpsDto,
    pub battery: Option<u8>,
    pub mode: String,
    pub armed: bool,
    pub mission_status: MissionStatusSummary,
}

impl From<&VehicleSnapshot> for HealthDto {
    fn from(s: &VehicleSnapshot) -> Self {
        Self {
            status: if s.connected { "ok" } else { "disconnected" },
            connected: s.connected,
            gps: GpsDto::from(s),
            battery: s.battery_pct,
            mode: s.mode.clone(),
            armed: s.armed,
            mission_status: MissionStatusSummary::from(s),
        }
    }
}

#[derive(Serialize)]
pub struct MissionStatusDto {
    pub in_progress: bool,
    pub current_waypoint: u16,
    pub total_waypoints: u16,
    pub mode: String,
    pub armed: bool,
    pub gps: GpsDto,
}

impl From<&VehicleSnapshot> for MissionStatusDto {
    fn from(s: &VehicleSnapshot) -> Self {
        Self {
            in_progress: s.mission_in_progress,
            current_waypoint: s.current_waypoint,
            total_waypoints: s.total_waypoints,
            mode: s.mode.clone(),
            armed: s.armed,
            gps: GpsDto::from(s),
        }
    }
}
