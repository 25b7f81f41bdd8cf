//! The retry/dead-letter table: a pure mapping from a message's retry count
//! to its next delay tier, plus retry-count extraction from the redelivery
//! history. No side effects live here.

use crate::model::DeathEntry;
use std::time::Duration;

/// One delay tier. The suffix names the tier's delay queue; the broker's
/// TTL expiry on that queue re-injects the message into the main queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTier {
    pub suffix: &'static str,
    pub delay: Duration,
}

/// Ordered delay tiers; index = current retry count. Past the last tier a
/// message is dead-lettered.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    tiers: Vec<RetryTier>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                RetryTier {
                    suffix: "retry_5s",
                    delay: Duration::from_secs(5),
                },
                RetryTier {
                    suffix: "retry_30s",
                    delay: Duration::from_secs(30),
                },
                RetryTier {
                    suffix: "retry_120s",
                    delay: Duration::from_secs(120),
                },
            ],
        }
    }
}

impl RetryPolicy {
    /// Custom tier delays (tests shrink them to milliseconds); names and
    /// order stay canonical.
    pub fn with_tiers(tiers: Vec<RetryTier>) -> Self {
        Self { tiers }
    }

    /// The tier the message should pass through next, or `None` once the
    /// retry budget is exhausted (dead letter).
    pub fn next_tier(&self, retry_count: u32) -> Option<&RetryTier> {
        self.tiers.get(retry_count as usize)
    }

    pub fn max_retries(&self) -> u32 {
        self.tiers.len() as u32
    }
}

/// Sum of `count` across the redelivery history; 0 when absent or empty.
pub fn retry_count(deaths: &[DeathEntry]) -> u32 {
    deaths.iter().map(|d| d.count).sum()
}

/// Routing key of a tier's delay queue, e.g. `site_build_retry_5s`.
pub fn tier_queue(topic: &str, tier: &RetryTier) -> String {
    format!("{topic}_{}", tier.suffix)
}

/// Routing key of the terminal dead-letter queue.
pub fn dead_letter_queue(topic: &str) -> String {
    format!("{topic}_dead_letter")
}
