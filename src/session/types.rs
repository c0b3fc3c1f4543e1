use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::types::{CrisisEventId, DeviceId, RiskLevel, SessionId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrisisType {
    SuicidalIdeation,
    SelfHarm,
    PanicAttack,
    Psychosis,
    SubstanceCrisis,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn risk_level(self) -> RiskLevel {
        match self {
            Severity::Low => RiskLevel::Low,
            Severity::Moderate => RiskLevel::Medium,
            Severity::High => RiskLevel::High,
            Severity::Critical => RiskLevel::Critical,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Full,
    CrisisOnly,
    Degraded,
    LocalOnly,
}

impl AccessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Full => "full",
            AccessLevel::CrisisOnly => "crisis_only",
            AccessLevel::Degraded => "degraded",
            AccessLevel::LocalOnly => "local_only",
        }
    }
}

/// Emergency authentication methods, in the order they are tried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    BiometricBypass,
    EmergencyPin,
    EmergencyCode,
    DeviceFallback,
}

impl AuthMethod {
    pub const ORDER: [AuthMethod; 4] = [
        AuthMethod::BiometricBypass,
        AuthMethod::EmergencyPin,
        AuthMethod::EmergencyCode,
        AuthMethod::DeviceFallback,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::BiometricBypass => "biometric_bypass",
            AuthMethod::EmergencyPin => "emergency_pin",
            AuthMethod::EmergencyCode => "emergency_code",
            AuthMethod::DeviceFallback => "device_fallback",
        }
    }

    /// The control skipped when this method is bypassed during a forced grant.
    pub fn control(self) -> &'static str {
        match self {
            AuthMethod::BiometricBypass => "biometric_verification",
            AuthMethod::EmergencyPin => "emergency_pin_check",
            AuthMethod::EmergencyCode => "emergency_code_check",
            AuthMethod::DeviceFallback => "device_attestation",
        }
    }

    /// Possession of the device alone does not authenticate the user.
    pub fn is_weak(self) -> bool {
        matches!(self, AuthMethod::DeviceFallback)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CrisisHotline,
    CrisisChat,
    SafetyPlan,
    EmergencyContacts,
    CopingTools,
    LocationShare,
    MoodTracking,
    JournalRead,
    JournalWrite,
    TherapistMessaging,
    DataSync,
    DataExport,
    ProfileEdit,
    AccountSettings,
    PaymentSettings,
}

impl Operation {
    pub const ALL: [Operation; 15] = [
        Operation::CrisisHotline,
        Operation::CrisisChat,
        Operation::SafetyPlan,
        Operation::EmergencyContacts,
        Operation::CopingTools,
        Operation::LocationShare,
        Operation::MoodTracking,
        Operation::JournalRead,
        Operation::JournalWrite,
        Operation::TherapistMessaging,
        Operation::DataSync,
        Operation::DataExport,
        Operation::ProfileEdit,
        Operation::AccountSettings,
        Operation::PaymentSettings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::CrisisHotline => "crisis_hotline",
            Operation::CrisisChat => "crisis_chat",
            Operation::SafetyPlan => "safety_plan",
            Operation::EmergencyContacts => "emergency_contacts",
            Operation::CopingTools => "coping_tools",
            Operation::LocationShare => "location_share",
            Operation::MoodTracking => "mood_tracking",
            Operation::JournalRead => "journal_read",
            Operation::JournalWrite => "journal_write",
            Operation::TherapistMessaging => "therapist_messaging",
            Operation::DataSync => "data_sync",
            Operation::DataExport => "data_export",
            Operation::ProfileEdit => "profile_edit",
            Operation::AccountSettings => "account_settings",
            Operation::PaymentSettings => "payment_settings",
        }
    }

    pub fn requires_network(self) -> bool {
        matches!(
            self,
            Operation::CrisisHotline
                | Operation::CrisisChat
                | Operation::LocationShare
                | Operation::TherapistMessaging
                | Operation::DataSync
                | Operation::DataExport
                | Operation::AccountSettings
                | Operation::PaymentSettings
        )
    }

    /// Network operations that stay reachable in degraded mode.
    pub fn is_essential(self) -> bool {
        matches!(
            self,
            Operation::CrisisHotline | Operation::CrisisChat | Operation::LocationShare
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Standard,
    Enhanced,
    Maximum,
}

/// Secrets a client may present when asking for an emergency session.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyCredentials {
    pub biometric_token: Option<String>,
    pub pin: Option<String>,
    pub emergency_code: Option<String>,
    pub device_attestation: Option<String>,
}

impl fmt::Debug for EmergencyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present = |v: &Option<String>| if v.is_some() { "<redacted>" } else { "<none>" };
        f.debug_struct("EmergencyCredentials")
            .field("biometric_token", &present(&self.biometric_token))
            .field("pin", &present(&self.pin))
            .field("emergency_code", &present(&self.emergency_code))
            .field("device_attestation", &present(&self.device_attestation))
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmergencySessionRequest {
    pub crisis_event_id: CrisisEventId,
    pub device_id: DeviceId,
    pub user_id: Option<UserId>,
    pub crisis_type: CrisisType,
    pub severity: Severity,
    #[serde(default)]
    pub credentials: EmergencyCredentials,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmergencySession {
    pub id: SessionId,
    pub crisis_event_id: CrisisEventId,
    pub device_id: DeviceId,
    pub user_id: Option<UserId>,
    pub crisis_type: CrisisType,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub access_level: AccessLevel,
    pub allowed_operations: Vec<Operation>,
    pub restricted_operations: Vec<Operation>,
    pub audit_level: AuditLevel,
    pub auth_method: AuthMethod,
    pub authenticated: bool,
    pub bypassed_controls: Vec<String>,
}

impl EmergencySession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn allows(&self, operation: Operation) -> bool {
        self.allowed_operations.contains(&operation)
    }

    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmergencySessionResult {
    pub success: bool,
    pub session: Option<EmergencySession>,
    pub method: Option<AuthMethod>,
    /// No method succeeded; access was granted by policy.
    pub forced: bool,
    /// An existing session for the same crisis event was returned.
    pub reused: bool,
    pub bypassed_controls: Vec<String>,
    pub fallback_options: Vec<String>,
    /// Audit events from this call that did not reach the sink.
    pub audit_gaps: usize,
    pub latency_ms: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionValidation {
    pub valid: bool,
    pub allowed: bool,
    pub time_remaining: Duration,
    pub access_level: Option<AccessLevel>,
    pub reason: Option<String>,
}

impl SessionValidation {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            allowed: false,
            time_remaining: Duration::ZERO,
            access_level: None,
            reason: Some(reason.into()),
        }
    }
}
