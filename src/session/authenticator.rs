use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;

use crate::crypto::digests_match;
use crate::session::types::{AuthMethod, EmergencySessionRequest};
use crate::types::DeviceId;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthAttempt {
    pub success: bool,
    /// Controls this method skipped even though it succeeded.
    pub bypassed_controls: Vec<String>,
}

impl AuthAttempt {
    pub fn failed() -> Self {
        Self::default()
    }

    pub fn succeeded() -> Self {
        Self {
            success: true,
            bypassed_controls: Vec::new(),
        }
    }
}

/// One emergency authentication method. Platform biometrics live behind this seam.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn method(&self) -> AuthMethod;

    async fn attempt(&self, request: &EmergencySessionRequest) -> anyhow::Result<AuthAttempt>;
}

fn pin_digest(device: &DeviceId, pin: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(device.0.as_bytes());
    hasher.update(&[0]);
    hasher.update(pin.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Checks a per-device emergency PIN against stored BLAKE3 digests.
#[derive(Default)]
pub struct EmergencyPinAuthenticator {
    digests: Mutex<Vec<(DeviceId, [u8; 32])>>,
}

impl EmergencyPinAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enroll(&self, device: DeviceId, pin: &str) {
        let digest = pin_digest(&device, pin);
        let mut digests = self.digests.lock();
        digests.retain(|(d, _)| d != &device);
        digests.push((device, digest));
    }
}

#[async_trait]
impl Authenticator for EmergencyPinAuthenticator {
    fn method(&self) -> AuthMethod {
        AuthMethod::EmergencyPin
    }

    async fn attempt(&self, request: &EmergencySessionRequest) -> anyhow::Result<AuthAttempt> {
        let Some(pin) = request.credentials.pin.as_deref() else {
            return Ok(AuthAttempt::failed());
        };
        let presented = pin_digest(&request.device_id, pin);
        let digests = self.digests.lock();
        let matched = digests
            .iter()
            .any(|(device, stored)| device == &request.device_id && digests_match(stored, &presented));
        Ok(if matched { AuthAttempt::succeeded() } else { AuthAttempt::failed() })
    }
}

/// One-time emergency codes. A code is consumed by its first successful use.
#[derive(Default)]
pub struct EmergencyCodeAuthenticator {
    unused: Mutex<HashSet<[u8; 32]>>,
}

impl EmergencyCodeAuthenticator {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            unused: Mutex::new(
                codes
                    .into_iter()
                    .map(|c| *blake3::hash(c.as_ref().trim().as_bytes()).as_bytes())
                    .collect(),
            ),
        }
    }

    pub fn remaining(&self) -> usize {
        self.unused.lock().len()
    }
}

#[async_trait]
impl Authenticator for EmergencyCodeAuthenticator {
    fn method(&self) -> AuthMethod {
        AuthMethod::EmergencyCode
    }

    async fn attempt(&self, request: &EmergencySessionRequest) -> anyhow::Result<AuthAttempt> {
        let Some(code) = request.credentials.emergency_code.as_deref() else {
            return Ok(AuthAttempt::failed());
        };
        let digest = *blake3::hash(code.trim().as_bytes()).as_bytes();
        Ok(if self.unused.lock().remove(&digest) {
            AuthAttempt::succeeded()
        } else {
            AuthAttempt::failed()
        })
    }
}

/// Last resort: the request comes from a device enrolled on this account.
///
/// Succeeds without verifying the person, so the manager never counts it as
/// authentication.
#[derive(Default)]
pub struct DeviceFallbackAuthenticator {
    trusted: HashSet<DeviceId>,
}

impl DeviceFallbackAuthenticator {
    pub fn new(trusted: impl IntoIterator<Item = DeviceId>) -> Self {
        Self {
            trusted: trusted.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Authenticator for DeviceFallbackAuthenticator {
    fn method(&self) -> AuthMethod {
        AuthMethod::DeviceFallback
    }

    async fn attempt(&self, request: &EmergencySessionRequest) -> anyhow::Result<AuthAttempt> {
        if self.trusted.contains(&request.device_id) {
            Ok(AuthAttempt {
                success: true,
                bypassed_controls: vec!["user_verification".to_string()],
            })
        } else {
            Ok(AuthAttempt::failed())
        }
    }
}
