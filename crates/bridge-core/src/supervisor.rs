use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The mission reached its last waypoint; clear-all should follow.
    Completed,
    /// The mission was interrupted by a stop request or an unexpected mode
    /// change; clear-all should follow.
    Aborted,
}

/// In-flight mission state machine. Reconciles the Telemetry Ingestor's
/// observations (waypoint progress, mode changes) with explicit stop
/// requests. Holds no I/O of its own: callers act on the returned
/// `Transition` to issue the clear-all dialogue and update shared state.
pub struct MissionSupervisor {
    state: Mutex<State>,
}

impl MissionSupervisor {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::Idle) }
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == State::Running
    }

    pub fn start(&self) {
        *self.state.lock().unwrap() = State::Running;
    }

    /// Called by the Ingestor when it observes `current_waypoint` advance.
    /// `current` and `total` come from the just-updated vehicle snapshot.
    pub fn on_waypoint_progress(&self, current: u16, total: u16) -> Option<Transition> {
        let mut state = self.state.lock().unwrap();
        if *state != State::Running {
            return None;
        }
        if total > 0 && current >= total - 1 {
            *state = State::Idle;
            Some(Transition::Completed)
        } else {
            None
        }
    }

    /// Called by the Ingestor on every heartbeat-borne mode change.
    pub fn on_mode_change(&self, mode: &str) -> Option<Transition> {
        let mut state = self.state.lock().unwrap();
        if *state != State::Running || mode == "AUTO" {
            return None;
        }
        *state = State::Idle;
        Some(Transition::Aborted)
    }

    /// Called for an explicit `mission/stop` request.
    pub fn abort(&self) -> Option<Transition> {
        let mut state = self.state.lock().unwrap();
        if *state != State::Running {
            return None;
        }
        *state = State::Idle;
        Some(Transition::Aborted)
    }
}

impl Default for MissionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_on_last_waypoint() {
        let sup = MissionSupervisor::new();
        sup.start();
        assert_eq!(sup.on_waypoint_progress(1, 3), None);
        assert_eq!(sup.on_waypoint_progress(2, 3), Some(Transition::Completed));
        assert!(!sup.is_running());
    }

    #[test]
    fn aborts_on_non_auto_mode() {
        let sup = MissionSupervisor::new();
        sup.start();
        assert_eq!(sup.on_mode_change("AUTO"), None);
        assert_eq!(sup.on_mode_change("LOITER"), Some(Transition::Aborted));
        assert!(!sup.is_running());
    }

    #[test]
    fn idle_supervisor_ignores_events() {
        let sup = MissionSupervisor::new();
        assert_eq!(sup.on_waypoint_progress(5, 5), None);
        assert_eq!(sup.on_mode_change("LOITER"), None);
    }
}
