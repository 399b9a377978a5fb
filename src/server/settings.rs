use serde::Deserialize;

use std::time::Duration;

use crate::engine::EngineConfig;
use crate::ledger::LedgerConfig;

// For explanation, see issue: https://github.com/serde-rs/serde/issues/368
fn default_target_message_size() -> usize {
    16 * 1024
}
fn default_broadcast_width() -> usize {
    4
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_multiplier() -> u32 {
    2
}
fn default_max_backoff_ms() -> u64 {
    8_000
}
fn default_dont_have_limit() -> u32 {
    16
}
fn default_debt_ceiling() -> f64 {
    10.0
}
fn default_max_violations() -> u64 {
    3
}
fn default_ledger_capacity() -> usize {
    1024
}

/// Tunable parameters of the block exchange protocol.
#[derive(Debug, Deserialize, Clone)]
pub struct SwapConfig {
    /// Bytes of response work batched into one outgoing message.
    #[serde(default = "default_target_message_size")]
    pub target_message_size: usize,
    /// How many peers receive the initial `WantHave` probe for a new want.
    #[serde(default = "default_broadcast_width")]
    pub broadcast_width: usize,
    /// Retry delay against peers with no latency history yet.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Factor applied to the retry delay on every expiry.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Consecutive dont-have answers before a session stops asking a peer.
    #[serde(default = "default_dont_have_limit")]
    pub dont_have_limit: u32,
    /// Debt ratio above which a peer stops `accepting`.
    #[serde(default = "default_debt_ceiling")]
    pub debt_ceiling: f64,
    #[serde(default = "default_max_violations")]
    pub max_violations: u64,
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,
}

impl SwapConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            debt_ceiling: self.debt_ceiling,
            max_violations: self.max_violations,
            capacity: self.ledger_capacity,
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig { target_message_size: self.target_message_size, ledger: self.ledger() }
    }
}

impl Default for SwapConfig {
    fn default() -> SwapConfig {
        SwapConfig {
            target_message_size: default_target_message_size(),
            broadcast_width: default_broadcast_width(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            dont_have_limit: default_dont_have_limit(),
            debt_ceiling: default_debt_ceiling(),
            max_violations: default_max_violations(),
            ledger_capacity: default_ledger_capacity(),
        }
    }
}

/// Node-level settings: where to listen and who to greet on startup.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub listener_ip: String,
    pub bootstrap_peers: Vec<String>,
    /// Path for the sled block store; in-memory when unset.
    pub db_path: Option<String>,
    #[serde(default)]
    pub swap: SwapConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_defaults_are_sane() {
        let config = SwapConfig::default();
        assert!(config.broadcast_width > 0);
        assert!(config.backoff_multiplier >= 2);
        assert!(config.max_backoff() >= config.backoff_base());
        assert_eq!(config.engine().target_message_size, config.target_message_size);
    }
}
