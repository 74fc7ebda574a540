//! Credential validator — the sole authorization gate for the public chat API.
//!
//! Presented keys are compared against every configured key in fixed time.
//! Rejections are written to the `security` log target; accepted keys are not
//! logged.

use std::fmt;

use subtle::ConstantTimeEq;
use tracing::warn;

/// Configured API keys and whether callers must present one.
#[derive(Clone, Default)]
pub struct ApiKeyConfiguration {
    keys: Vec<String>,
    require_auth: bool,
}

// Never print key material.
impl fmt::Debug for ApiKeyConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyConfiguration")
            .field("keys", &format_args!("<{} redacted>", self.keys.len()))
            .field("require_auth", &self.require_auth)
            .finish()
    }
}

/// Why a presented key was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingKey,
    NoKeysConfigured,
    KeyMismatch,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::MissingKey => "missing_key",
            Rejection::NoKeysConfigured => "no_keys_configured",
            Rejection::KeyMismatch => "key_mismatch",
        }
    }
}

impl ApiKeyConfiguration {
    /// Builds a configuration; blank keys are discarded.
    pub fn new<I, S>(keys: I, require_auth: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = keys
            .into_iter()
            .map(|k| {
                let k: String = k.into();
                k.trim().to_string()
            })
            .filter(|k| !k.is_empty())
            .collect();
        Self { keys, require_auth }
    }

    /// Open-access configuration: every request is accepted.
    pub fn open() -> Self {
        Self::new(Vec::<String>::new(), false)
    }

    pub fn require_auth(&self) -> bool {
        self.require_auth
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the request may proceed.
    ///
    /// With authentication disabled every caller is accepted. With it
    /// enabled, a missing key or an empty allow-list fails closed.
    pub fn validate(&self, presented: Option<&str>) -> bool {
        self.check(presented).is_ok()
    }

    /// Same as [`validate`](Self::validate), also logging the rejection
    /// against `request_id` on the `security` target.
    pub fn authorize(&self, presented: Option<&str>, request_id: &str) -> bool {
        match self.check(presented) {
            Ok(()) => true,
            Err(reason) => {
                warn!(
                    target: "security",
                    request_id,
                    reason = reason.as_str(),
                    configured_keys = self.keys.len(),
                    "API key rejected"
                );
                false
            }
        }
    }

    fn check(&self, presented: Option<&str>) -> Result<(), Rejection> {
        if !self.require_auth {
            return Ok(());
        }
        let presented = presented.ok_or(Rejection::MissingKey)?;
        if self.keys.is_empty() {
            return Err(Rejection::NoKeysConfigured);
        }

        // Visit every key so the match position is not observable.
        let matched = self
            .keys
            .iter()
            .fold(0u8, |acc, key| acc | fixed_time_eq(presented, key));
        if matched == 1 {
            Ok(())
        } else {
            Err(Rejection::KeyMismatch)
        }
    }
}

/// 1 if equal, 0 otherwise. Unequal lengths are rejected up front.
fn fixed_time_eq(presented: &str, expected: &str) -> u8 {
    if presented.len() != expected.len() {
        return 0;
    }
    presented.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8()
}
