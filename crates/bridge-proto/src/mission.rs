use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, MissionError};

/// A hold time applied to every uploaded nav item, matching what the
/// autopilot's own firmware defaults assume for a multirotor.
const HOLD_TIME_S: f32 = 2.0;
const ACCEPT_RADIUS_M: f32 = 3.0;
const PASS_RADIUS_M: f32 = 5.0;

const MAX_WAYPOINTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl Waypoint {
    pub fn validate(&self) -> Result<(), MissionError> {
        if !(-90.0..=90.0).contains(&self.lat) || !(-180.0..=180.0).contains(&self.lon) {
            return Err(MissionError::new(
                ErrorKind::CoordinateError,
                format!("waypoint coordinate out of range: ({}, {})", self.lat, self.lon),
                "use latitude in [-90, 90] and longitude in [-180, 180]",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionSettings {
    pub altitude: f32,
    pub speed: f32,
    pub return_to_home: bool,
}

impl MissionSettings {
    pub fn validate(&self) -> Result<(), MissionError> {
        if !(0.0..=120.0).contains(&self.altitude) {
            return Err(MissionError::new(
                ErrorKind::AltitudeError,
                format!("altitude {} out of range", self.altitude),
                "use an altitude between 0 and 120 meters",
            ));
        }
        if !(self.speed > 0.0 && self.speed <= 15.0) {
            return Err(MissionError::new(
                ErrorKind::SpeedError,
                format!("speed {} out of range", self.speed),
                "use a speed between 0 (exclusive) and 15 m/s",
            ));
        }
        Ok(())
    }
}

/// Validates the waypoint list's shape: non-empty, bounded length, and each
/// point individually in range. Does not consult vehicle state.
pub fn validate_waypoints(waypoints: &[Waypoint]) -> Result<(), MissionError> {
    if waypoints.is_empty() {
        return Err(MissionError::new(
            ErrorKind::WaypointError,
            "mission must contain at least one waypoint",
            "add at least one waypoint",
        ));
    }
    if waypoints.len() > MAX_WAYPOINTS {
        return Err(MissionError::new(
            ErrorKind::WaypointError,
            format!("mission has {} waypoints, max is {}", waypoints.len(), MAX_WAYPOINTS),
            "split the mission into smaller segments",
        ));
    }
    for wp in waypoints {
        wp.validate()?;
    }
    Ok(())
}

/// A single flattened mission item ready for wire encoding, in upload order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissionPlanItem {
    pub seq: u16,
    pub lat: f64,
    pub lon: f64,
    pub altitude: f32,
    pub hold_time: f32,
    pub accept_radius: f32,
    pub pass_radius: f32,
    pub is_rtl: bool,
}

/// Expands waypoints + settings into the exact sequence of items the upload
/// handshake will send, appending a return-to-launch item when requested.
///
/// Altitude for every nav item comes from `settings.altitude`, not from the
/// waypoint's own `alt` field — the waypoint's altitude is accepted from
/// callers but intentionally unused here, matching how the mission was
/// always uploaded upstream.
pub fn build_mission_plan(waypoints: &[Waypoint], settings: &MissionSettings) -> Vec<MissionPlanItem> {
    let mut items: Vec<MissionPlanItem> = waypoints
        .iter()
        .enumerate()
        .map(|(i, wp)| MissionPlanItem {
            seq: i as u16,
            lat: wp.lat,
            lon: wp.lon,
            altitude: settings.altitude,
            hold_time: HOLD_TIME_S,
            accept_radius: ACCEPT_RADIUS_M,
            pass_radius: PASS_RADIUS_M,
            is_rtl: false,
        })
        .collect();

    if settings.return_to_home {
        items.push(MissionPlanItem {
            seq: waypoints.len() as u16,
            lat: 0.0,
            lon: 0.0,
            altitude: 0.0,
            hold_time: 0.0,
            accept_radius: 0.0,
            pass_radius: 0.0,
            is_rtl: true,
        });
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn altitude_boundary() {
        let ok = MissionSettings { altitude: 120.0, speed: 5.0, return_to_home: false };
        assert!(ok.validate().is_ok());
        let bad = MissionSettings { altitude: 120.0001, speed: 5.0, return_to_home: false };
        assert!(matches!(bad.validate().unwrap_err().kind, ErrorKind::AltitudeError));
    }

    #[test]
    fn speed_boundary() {
        let zero = MissionSettings { altitude: 10.0, speed: 0.0, return_to_home: false };
        assert!(matches!(zero.validate().unwrap_err().kind, ErrorKind::SpeedError));
        let max = MissionSettings { altitude: 10.0, speed: 15.0, return_to_home: false };
        assert!(max.validate().is_ok());
    }

    #[test]
    fn waypoint_count_boundary() {
        let wps: Vec<Waypoint> = (0..100).map(|_| Waypoint { lat: 0.0, lon: 0.0, alt: 10.0 }).collect();
        assert!(validate_waypoints(&wps).is_ok());
        let too_many: Vec<Waypoint> = (0..101).map(|_| Waypoint { lat: 0.0, lon: 0.0, alt: 10.0 }).collect();
        assert!(matches!(validate_waypoints(&too_many).unwrap_err().kind, ErrorKind::WaypointError));
    }

    #[test]
    fn plan_appends_rtl_at_correct_sequence() {
        let wps = vec![
            Waypoint { lat: 37.0, lon: -122.0, alt: 50.0 },
            Waypoint { lat: 37.001, lon: -122.001, alt: 50.0 },
        ];
        let settings = MissionSettings { altitude: 50.0, speed: 5.0, return_to_home: true };
        let plan = build_mission_plan(&wps, &settings);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].seq, 2);
        assert!(plan[2].is_rtl);
        assert_eq!(plan[0].altitude, 50.0);
    }
}
