//! Static access policy for emergency sessions.

use crate::session::types::{AccessLevel, AuditLevel, Operation, Severity};

const FULL: &[Operation] = &Operation::ALL;

const CRISIS_ONLY: &[Operation] = &[
    Operation::CrisisHotline,
    Operation::CrisisChat,
    Operation::SafetyPlan,
    Operation::EmergencyContacts,
    Operation::CopingTools,
    Operation::LocationShare,
    Operation::MoodTracking,
    Operation::JournalWrite,
];

const DEGRADED: &[Operation] = &[
    Operation::CrisisHotline,
    Operation::CrisisChat,
    Operation::SafetyPlan,
    Operation::EmergencyContacts,
    Operation::CopingTools,
];

const LOCAL_ONLY: &[Operation] = &[Operation::CrisisHotline, Operation::SafetyPlan, Operation::CopingTools];

/// `full` iff authenticated and critical; `crisis_only` if authenticated or
/// always-allow; `degraded` if unauthenticated and not critical; otherwise
/// `local_only`.
pub fn access_level(authenticated: bool, severity: Severity, always_allow: bool) -> AccessLevel {
    let critical = severity == Severity::Critical;
    if authenticated && critical {
        AccessLevel::Full
    } else if authenticated || always_allow {
        AccessLevel::CrisisOnly
    } else if !critical {
        AccessLevel::Degraded
    } else {
        AccessLevel::LocalOnly
    }
}

pub fn allowed_operations(level: AccessLevel) -> &'static [Operation] {
    match level {
        AccessLevel::Full => FULL,
        AccessLevel::CrisisOnly => CRISIS_ONLY,
        AccessLevel::Degraded => DEGRADED,
        AccessLevel::LocalOnly => LOCAL_ONLY,
    }
}

pub fn restricted_operations(level: AccessLevel) -> Vec<Operation> {
    let allowed = allowed_operations(level);
    Operation::ALL
        .iter()
        .copied()
        .filter(|op| !allowed.contains(op))
        .collect()
}

pub fn audit_level(level: AccessLevel, controls_bypassed: bool) -> AuditLevel {
    match (level, controls_bypassed) {
        (_, true) => AuditLevel::Maximum,
        (AccessLevel::Full, false) => AuditLevel::Standard,
        _ => AuditLevel::Enhanced,
    }
}
