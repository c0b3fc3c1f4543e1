use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "trigger")]
pub enum DegradedTrigger {
    SystemicAuthFailure { consecutive_failures: u32 },
    Explicit { reason: String },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DegradedStatus {
    pub active: bool,
    pub trigger: Option<DegradedTrigger>,
    pub since: Option<DateTime<Utc>>,
    /// Emergency session requests in a row where no method succeeded.
    pub consecutive_auth_failures: u32,
}

/// Process-wide degraded mode, shared by every engine that does network work.
///
/// Turning it on is automatic or explicit. Turning it off is always explicit.
#[derive(Clone, Debug, Default)]
pub struct DegradedMode {
    state: Arc<Mutex<DegradedStatus>>,
}

impl DegradedMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn status(&self) -> DegradedStatus {
        self.state.lock().clone()
    }

    /// Returns true if this call switched the mode on.
    pub fn activate(&self, trigger: DegradedTrigger, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        if state.active {
            return false;
        }
        state.active = true;
        state.trigger = Some(trigger);
        state.since = Some(now);
        true
    }

    /// Returns true if the mode was on.
    pub fn deactivate(&self) -> bool {
        let mut state = self.state.lock();
        let was_active = state.active;
        state.active = false;
        state.trigger = None;
        state.since = None;
        state.consecutive_auth_failures = 0;
        was_active
    }

    /// Count a request where every method failed. Returns true if this flipped the mode on.
    pub fn record_auth_failure(&self, threshold: u32, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        state.consecutive_auth_failures = state.consecutive_auth_failures.saturating_add(1);
        if state.active || state.consecutive_auth_failures < threshold {
            return false;
        }
        state.active = true;
        state.trigger = Some(DegradedTrigger::SystemicAuthFailure {
            consecutive_failures: state.consecutive_auth_failures,
        });
        state.since = Some(now);
        true
    }

    pub fn record_auth_success(&self) {
        self.state.lock().consecutive_auth_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_threshold_and_stays_on_until_cleared() {
        let mode = DegradedMode::new();
        let now = Utc::now();
        assert!(!mode.record_auth_failure(3, now));
        assert!(!mode.record_auth_failure(3, now));
        assert!(mode.record_auth_failure(3, now));
        assert!(mode.is_active());

        // successes reset the counter but never clear the mode
        mode.record_auth_success();
        assert!(mode.is_active());

        assert!(mode.deactivate());
        assert!(!mode.is_active());
        assert!(!mode.deactivate());
    }

    #[test]
    fn success_breaks_the_failure_streak() {
        let mode = DegradedMode::new();
        let now = Utc::now();
        mode.record_auth_failure(2, now);
        mode.record_auth_success();
        assert!(!mode.record_auth_failure(2, now));
        assert!(!mode.is_active());
    }

    #[test]
    fn explicit_activation_is_idempotent() {
        let mode = DegradedMode::new();
        let trigger = DegradedTrigger::Explicit {
            reason: "upstream outage".into(),
        };
        assert!(mode.activate(trigger.clone(), Utc::now()));
        assert!(!mode.activate(trigger.clone(), Utc::now()));
        assert_eq!(mode.status().trigger, Some(trigger));
    }
}
