//! Reconnect delay strategies.
//!
//! The transport asks the strategy for the delay before reconnect attempt
//! `n` (1-based). The default is a constant interval; exponential growth
//! is available for deployments that prefer it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Delay policy applied between automatic reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Wait the same amount of time before every attempt.
    Fixed {
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// Double the delay on every attempt, capped at `max`.
    Exponential {
        #[serde(with = "millis")]
        base: Duration,
        #[serde(with = "millis")]
        max: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed {
            delay: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

impl Backoff {
    /// Delay before reconnect attempt `attempt` (1 = first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

/// Durations are written as integer milliseconds in config files.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_is_constant() {
        let b = Backoff::default();
        assert_eq!(b.delay(1), Duration::from_secs(3));
        assert_eq!(b.delay(5), Duration::from_secs(3));
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let b = Backoff::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(4),
        };
        assert_eq!(b.delay(1), Duration::from_millis(500));
        assert_eq!(b.delay(2), Duration::from_millis(1000));
        assert_eq!(b.delay(3), Duration::from_millis(2000));
        assert_eq!(b.delay(4), Duration::from_millis(4000));
        assert_eq!(b.delay(10), Duration::from_millis(4000));
        assert_eq!(b.delay(u32::MAX), Duration::from_millis(4000));
    }

    #[test]
    fn serde_uses_millis() {
        let json = serde_json::to_string(&Backoff::default()).unwrap();
        assert_eq!(json, r#"{"kind":"fixed","delay":3000}"#);

        let parsed: Backoff =
            serde_json::from_str(r#"{"kind":"exponential","base":250,"max":8000}"#).unwrap();
        assert_eq!(
            parsed,
            Backoff::Exponential {
                base: Duration::from_millis(250),
                max: Duration::from_secs(8),
            }
        );
    }
}
