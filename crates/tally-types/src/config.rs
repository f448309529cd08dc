//! Ledger configuration.
//!
//! Every component receives its configuration explicitly at construction;
//! nothing reads ambient process-global state. The aggregate
//! [`LedgerConfig`] is TOML-loadable for daemon-style embedding.

use serde::{Deserialize, Serialize};

/// Complete ledger configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Retry ladder for settlement and issuance steps.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Promotion refresh scheduling.
    #[serde(default)]
    pub refresh: RefreshConfig,
    /// Credential vault settings.
    #[serde(default)]
    pub vault: VaultConfig,
}

/// Bounded retry ladder with geometrically increasing, jittered delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First-retry delay in seconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    /// Upper bound on any single delay, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    /// Number of retries per step before terminal failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            max_retries: default_max_retries(),
        }
    }
}

/// Periodic promotion refresh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Interval between successful refreshes, in seconds.
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval(),
        }
    }
}

/// Credential vault settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Face value of a single credential, in micro-tokens.
    #[serde(default = "default_token_value")]
    pub token_value: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            token_value: default_token_value(),
        }
    }
}

fn default_base_delay() -> u64 {
    60
}

fn default_max_delay() -> u64 {
    6 * 3600
}

fn default_max_retries() -> u32 {
    5
}

fn default_refresh_interval() -> u64 {
    3600
}

fn default_token_value() -> u64 {
    250_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.retry.base_delay_secs, 60);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.refresh.interval_secs, 3600);
    }

    #[test]
    fn test_partial_toml() {
        let config: LedgerConfig = toml::from_str(
            r#"
            [retry]
            max_retries = 2
            "#,
        )
        .expect("parse partial config");
        assert_eq!(config.retry.max_retries, 2);
        // Unspecified fields take their defaults
        assert_eq!(config.retry.base_delay_secs, 60);
        assert_eq!(config.vault.token_value, 250_000);
    }
}
