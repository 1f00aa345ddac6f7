//! Revalidation settings.

use std::time::Duration;

use newsgate_interval::TimerConfig;
use newsgate_protocol::claim_types;
use serde::{Deserialize, Serialize};

/// Settings shared by every revalidator a [`SessionManager`] starts.
///
/// Deserializes from camelCase JSON. `revalidationInterval` is a number
/// of seconds and may be fractional:
///
/// ```rust
/// use std::time::Duration;
/// use newsgate_session::RevalidationConfig;
///
/// let config: RevalidationConfig =
///     serde_json::from_str(r#"{ "revalidationInterval": 2.5 }"#).unwrap();
/// assert_eq!(config.revalidation_interval, Duration::from_millis(2500));
/// ```
///
/// [`SessionManager`]: crate::SessionManager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RevalidationConfig {
    /// Time between checks of one session. Zero means "use the default".
    #[serde(with = "duration_secs")]
    pub revalidation_interval: Duration,

    /// Claim type under which the principal carries its stamp.
    pub security_stamp_claim_type: String,

    /// Random delay (upper bound) added to each revalidator's first tick.
    #[serde(with = "duration_secs")]
    pub initial_jitter: Duration,

    /// A sign-in with no request and no live connection for this long is
    /// evicted. Sliding: every request resets it.
    #[serde(with = "duration_secs")]
    pub sign_in_idle_timeout: Duration,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self {
            revalidation_interval: Self::DEFAULT_INTERVAL,
            security_stamp_claim_type: claim_types::SECURITY_STAMP.to_string(),
            initial_jitter: Duration::ZERO,
            sign_in_idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl RevalidationConfig {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(20);

    /// Fourteen days, the usual sliding lifetime of an auth cookie.
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(14 * 24 * 60 * 60);

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            revalidation_interval: interval,
            ..Default::default()
        }
    }

    /// Replaces a zero interval or idle timeout with its default and an
    /// empty claim type with the standard one.
    pub fn validated(mut self) -> Self {
        if self.revalidation_interval.is_zero() {
            tracing::warn!(
                default_secs = Self::DEFAULT_INTERVAL.as_secs(),
                "revalidationInterval is zero, using default"
            );
            self.revalidation_interval = Self::DEFAULT_INTERVAL;
        }
        if self.sign_in_idle_timeout.is_zero() {
            self.sign_in_idle_timeout = Self::DEFAULT_IDLE_TIMEOUT;
        }
        if self.security_stamp_claim_type.trim().is_empty() {
            self.security_stamp_claim_type = claim_types::SECURITY_STAMP.to_string();
        }
        self
    }

    /// The timer settings for one revalidator.
    pub fn timer_config(&self) -> TimerConfig {
        TimerConfig {
            initial_jitter: self.initial_jitter,
            ..TimerConfig::with_interval(self.revalidation_interval)
        }
    }
}

/// Serde adapter: `Duration` as (possibly fractional) seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Float(secs),
                &"a non-negative number of seconds",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_interval_is_20s() {
        let config = RevalidationConfig::default();
        assert_eq!(config.revalidation_interval, Duration::from_secs(20));
        assert_eq!(config.security_stamp_claim_type, "security_stamp");
    }

    #[test]
    fn test_deserialize_integer_seconds() {
        let config: RevalidationConfig =
            serde_json::from_str(r#"{"revalidationInterval": 45}"#).unwrap();
        assert_eq!(config.revalidation_interval, Duration::from_secs(45));
    }

    #[test]
    fn test_deserialize_missing_fields_use_defaults() {
        let config: RevalidationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RevalidationConfig::default());
    }

    #[test]
    fn test_deserialize_negative_interval_rejected() {
        let result: Result<RevalidationConfig, _> =
            serde_json::from_str(r#"{"revalidationInterval": -1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validated_zero_interval_uses_default() {
        let config: RevalidationConfig =
            serde_json::from_str(r#"{"revalidationInterval": 0}"#).unwrap();
        assert_eq!(
            config.validated().revalidation_interval,
            RevalidationConfig::DEFAULT_INTERVAL
        );
    }

    #[test]
    fn test_deserialize_idle_timeout_seconds() {
        let config: RevalidationConfig =
            serde_json::from_str(r#"{"signInIdleTimeout": 3600}"#).unwrap();
        assert_eq!(config.sign_in_idle_timeout, Duration::from_secs(3600));
        assert_eq!(
            RevalidationConfig::default().sign_in_idle_timeout,
            RevalidationConfig::DEFAULT_IDLE_TIMEOUT
        );
    }

    #[test]
    fn test_validated_zero_idle_timeout_uses_default() {
        let config = RevalidationConfig {
            sign_in_idle_timeout: Duration::ZERO,
            ..Default::default()
        }
        .validated();
        assert_eq!(config.sign_in_idle_timeout, RevalidationConfig::DEFAULT_IDLE_TIMEOUT);
    }

    #[test]
    fn test_validated_blank_claim_type_restored() {
        let config = RevalidationConfig {
            security_stamp_claim_type: "  ".into(),
            ..Default::default()
        }
        .validated();
        assert_eq!(config.security_stamp_claim_type, claim_types::SECURITY_STAMP);
    }

    #[test]
    fn test_timer_config_carries_interval_and_jitter() {
        let config = RevalidationConfig {
            initial_jitter: Duration::from_secs(3),
            ..RevalidationConfig::with_interval(Duration::from_secs(30))
        };
        let timer = config.timer_config();
        assert_eq!(timer.interval, Duration::from_secs(30));
        assert_eq!(timer.initial_jitter, Duration::from_secs(3));
    }
}
