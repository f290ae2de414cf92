//! TTL policy and the settings provider that supplies it.

use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const MINUTE_IN_SECONDS: u64 = 60;
pub const HOUR_IN_SECONDS: u64 = 60 * MINUTE_IN_SECONDS;
pub const DAY_IN_SECONDS: u64 = 24 * HOUR_IN_SECONDS;
pub const WEEK_IN_SECONDS: u64 = 7 * DAY_IN_SECONDS;
pub const MONTH_IN_SECONDS: u64 = 30 * DAY_IN_SECONDS;
pub const YEAR_IN_SECONDS: u64 = 365 * DAY_IN_SECONDS;

/// Errors from validating a [`TtlPolicy`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("TTL length must be a positive integer")]
    ZeroLength,

    #[error("TTL period must be a positive number of seconds")]
    ZeroPeriod,
}

/// How long a stored response stays valid: `length` units of `period` seconds.
///
/// ```
/// use restash::cache::policy::{TtlPolicy, HOUR_IN_SECONDS};
///
/// let policy = TtlPolicy::new(6, HOUR_IN_SECONDS).unwrap();
/// assert_eq!(policy.seconds(), 21_600);
///
/// // One week by default.
/// assert_eq!(TtlPolicy::default().seconds(), 604_800);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    pub length: u64,
    pub period: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            length: 1,
            period: WEEK_IN_SECONDS,
        }
    }
}

impl TtlPolicy {
    /// Builds a validated policy.
    pub fn new(length: u64, period: u64) -> Result<Self, PolicyError> {
        let policy = Self { length, period };
        policy.validate()?;
        Ok(policy)
    }

    /// Rejects a zero length or period.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.length == 0 {
            return Err(PolicyError::ZeroLength);
        }
        if self.period == 0 {
            return Err(PolicyError::ZeroPeriod);
        }
        Ok(())
    }

    /// `length × period`, saturating at `u64::MAX`.
    pub fn seconds(&self) -> u64 {
        self.length.saturating_mul(self.period)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.seconds())
    }
}

/// Supplies the TTL policy in force for the next request.
pub trait SettingsProvider: Send + Sync {
    fn timeout_policy(&self) -> TtlPolicy;
}

/// A fixed policy is its own provider.
impl SettingsProvider for TtlPolicy {
    fn timeout_policy(&self) -> TtlPolicy {
        *self
    }
}

/// A settings provider whose policy can be replaced at runtime, e.g. from
/// the admin endpoints. Updates apply to every request that starts after
/// them.
#[derive(Debug, Default)]
pub struct SharedSettings {
    timeout: RwLock<TtlPolicy>,
}

impl SharedSettings {
    pub fn new(timeout: TtlPolicy) -> Self {
        Self {
            timeout: RwLock::new(timeout),
        }
    }

    /// Validates and installs `timeout`, returning the policy it replaced.
    pub fn update(&self, timeout: TtlPolicy) -> Result<TtlPolicy, PolicyError> {
        timeout.validate()?;
        let mut current = match self.timeout.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(op = "update", "recovered from poisoned settings lock");
                poisoned.into_inner()
            }
        };
        Ok(std::mem::replace(&mut *current, timeout))
    }
}

impl SettingsProvider for SharedSettings {
    fn timeout_policy(&self) -> TtlPolicy {
        match self.timeout.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!(op = "timeout_policy", "recovered from poisoned settings lock");
                *poisoned.into_inner()
            }
        }
    }
}
