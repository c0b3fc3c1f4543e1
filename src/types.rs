use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CrisisEventId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Threat assessment reported by a validator. Ordered from benign to critical.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn is_medium_or_higher(self) -> bool {
        self >= ThreatLevel::Medium
    }
}

/// Validation route a request takes through the strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPath {
    Fast,
    Deep,
    Hybrid,
}

impl ValidationPath {
    pub const ALL: [ValidationPath; 3] = [ValidationPath::Fast, ValidationPath::Deep, ValidationPath::Hybrid];

    pub fn as_str(self) -> &'static str {
        match self {
            ValidationPath::Fast => "fast",
            ValidationPath::Deep => "deep",
            ValidationPath::Hybrid => "hybrid",
        }
    }

    /// Where a single fallback attempt goes when this path misses its expectations.
    pub fn fallback(self) -> ValidationPath {
        match self {
            ValidationPath::Deep => ValidationPath::Fast,
            ValidationPath::Fast => ValidationPath::Deep,
            ValidationPath::Hybrid => ValidationPath::Fast,
        }
    }
}

/// Caller-supplied urgency of a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Crisis,
}

/// Engine-wide routing posture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityMode {
    Speed,
    Security,
    #[default]
    Balanced,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Optional routing hints supplied alongside a request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub priority: Priority,
    /// Free-form emergency category set by crisis UI entry points.
    pub emergency_type: Option<String>,
}

/// A unit of work handed to the routing engine and, from there, to validators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecurityRequest {
    pub payload: String,
    pub headers: BTreeMap<String, String>,
    pub source_address: String,
    pub user_id: Option<UserId>,
    pub context: RequestContext,
}

impl SecurityRequest {
    pub fn new(payload: impl Into<String>, source_address: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            headers: BTreeMap::new(),
            source_address: source_address.into(),
            user_id: None,
            context: RequestContext::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.context.priority = priority;
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threat_levels_order_from_benign_to_critical() {
        assert!(ThreatLevel::None < ThreatLevel::Low);
        assert!(ThreatLevel::Medium.is_medium_or_higher());
        assert!(ThreatLevel::Critical.is_medium_or_higher());
        assert!(!ThreatLevel::Low.is_medium_or_higher());
    }

    #[test]
    fn fallback_direction_table() {
        assert_eq!(ValidationPath::Deep.fallback(), ValidationPath::Fast);
        assert_eq!(ValidationPath::Fast.fallback(), ValidationPath::Deep);
        assert_eq!(ValidationPath::Hybrid.fallback(), ValidationPath::Fast);
    }
}
