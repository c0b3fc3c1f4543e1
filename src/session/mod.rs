//! Emergency sessions: authentication that degrades instead of failing,
//! tiered access, time limits, and a process-wide degraded mode.

pub mod authenticator;
pub mod degraded;
pub mod manager;
pub mod policy;
pub mod types;

pub use authenticator::{AuthAttempt, Authenticator};
pub use degraded::{DegradedMode, DegradedStatus, DegradedTrigger};
pub use types::{
    AccessLevel, AuditLevel, AuthMethod, CrisisType, EmergencyCredentials, EmergencySession,
    EmergencySessionRequest, EmergencySessionResult, Operation, SessionValidation, Severity,
};
