//! Crisis-safe security orchestration core.
//!
//! Three engines share this crate:
//! - [`routing`]: per-request choice between fast, deep, and hybrid validation,
//!   with a crisis override, single-shot fallback, and threshold tuning.
//! - [`session`]: time-limited emergency sessions with tiered access that stay
//!   available when normal authentication fails, plus a process-wide degraded mode.
//! - [`sync`]: zero-knowledge record sync. The remote store only ever sees
//!   ciphertext, and integrity is verified before anything is decrypted.
//!
//! [`service::SecurityOrchestrator`] wires them together around injected
//! collaborators (validators, encryption provider, authenticators, audit sink).

pub mod audit;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod routing;
pub mod schedule;
pub mod service;
pub mod session;
pub mod sync;
pub mod telemetry;
pub mod types;

pub use crate::config::{GuardConfig, RoutingConfig, SessionConfig, SyncConfig};
pub use crate::error::{GuardError, GuardResult};
pub use crate::routing::engine::AdaptiveRoutingEngine;
pub use crate::service::SecurityOrchestrator;
pub use crate::session::manager::EmergencySessionManager;
pub use crate::sync::engine::ZeroKnowledgeSyncEngine;
