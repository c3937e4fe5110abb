//! Staking Core Configuration
//!
//! Loaded from TOML. Every tunable the admin can later change has a default
//! here; identities default to label-derived addresses so a bare config file
//! still describes a runnable pool for local simulation.
//!
//! `StakingConfig::validate()` returns every violation at once rather than
//! stopping at the first one.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::types::{Identity, ORACLE_SEATS, RATE_DENOMINATOR};

/// Ethereum beacon-chain epoch: 32 slots of 12 seconds.
pub const DEFAULT_EPOCH_DURATION: u64 = 384;

/// One day; 225 epochs.
pub const DEFAULT_EPOCH_UPDATE_PERIOD: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Start of epoch zero (unix seconds). Fixed for the pool's lifetime.
    #[serde(default)]
    pub zero_epoch_timestamp: u64,

    /// Length of one epoch in seconds. Fixed for the pool's lifetime.
    #[serde(default = "default_epoch_duration")]
    pub epoch_duration: u64,

    /// Strict-mode publishing cadence in seconds; a multiple of `epoch_duration`.
    #[serde(default = "default_epoch_update_period")]
    pub epoch_update_period: u64,

    #[serde(default)]
    pub strict_mode: bool,

    /// Parts per 100000.
    #[serde(default = "default_max_rate_deviation")]
    pub max_rate_deviation: u32,

    #[serde(default = "default_true")]
    pub rate_deviation_check: bool,

    /// Queue nodes visited per advance call.
    #[serde(default = "default_loop_limit")]
    pub loop_limit: u32,

    /// Treasury share of accrued yield, parts per 100000.
    #[serde(default = "default_commission_rate")]
    pub commission_rate: u32,

    #[serde(default = "default_admin")]
    pub admin: Identity,

    #[serde(default = "default_treasury")]
    pub treasury: Identity,

    #[serde(default = "default_oracles")]
    pub oracles: [Identity; ORACLE_SEATS],
}

fn default_epoch_duration() -> u64 {
    DEFAULT_EPOCH_DURATION
}

fn default_epoch_update_period() -> u64 {
    DEFAULT_EPOCH_UPDATE_PERIOD
}

fn default_max_rate_deviation() -> u32 {
    500
}

fn default_true() -> bool {
    true
}

fn default_loop_limit() -> u32 {
    50
}

fn default_commission_rate() -> u32 {
    10_000
}

fn default_admin() -> Identity {
    Identity::from_label("admin")
}

fn default_treasury() -> Identity {
    Identity::from_label("treasury")
}

fn default_oracles() -> [Identity; ORACLE_SEATS] {
    [
        Identity::from_label("oracle-a"),
        Identity::from_label("oracle-b"),
        Identity::from_label("oracle-c"),
    ]
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            zero_epoch_timestamp: 0,
            epoch_duration: DEFAULT_EPOCH_DURATION,
            epoch_update_period: DEFAULT_EPOCH_UPDATE_PERIOD,
            strict_mode: false,
            max_rate_deviation: default_max_rate_deviation(),
            rate_deviation_check: true,
            loop_limit: default_loop_limit(),
            commission_rate: default_commission_rate(),
            admin: default_admin(),
            treasury: default_treasury(),
            oracles: default_oracles(),
        }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// A single misconfigured field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigViolation {
    pub field: String,
    pub description: String,
}

impl std::fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.field, self.description)
    }
}

fn violation(field: &str, description: impl Into<String>) -> ConfigViolation {
    ConfigViolation {
        field: field.to_string(),
        description: description.into(),
    }
}

impl StakingConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `STAKING_CONFIG_PATH` or `staking.toml`, else defaults.
    pub fn from_env() -> Self {
        let path =
            std::env::var("STAKING_CONFIG_PATH").unwrap_or_else(|_| "staking.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default staking config ({}): {}", path, e);
            Self::default()
        })
    }

    pub fn validate(&self) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();

        if self.epoch_duration == 0 {
            violations.push(violation("epoch_duration", "must be positive"));
        } else if self.epoch_update_period == 0
            || self.epoch_update_period % self.epoch_duration != 0
        {
            violations.push(violation(
                "epoch_update_period",
                format!(
                    "{} is not a positive multiple of epoch_duration {}",
                    self.epoch_update_period, self.epoch_duration
                ),
            ));
        }

        if self.loop_limit == 0 {
            violations.push(violation("loop_limit", "must be at least 1"));
        }

        if self.max_rate_deviation > RATE_DENOMINATOR {
            violations.push(violation(
                "max_rate_deviation",
                format!("{} exceeds {}", self.max_rate_deviation, RATE_DENOMINATOR),
            ));
        }

        if self.commission_rate > RATE_DENOMINATOR {
            violations.push(violation(
                "commission_rate",
                format!("{} exceeds {}", self.commission_rate, RATE_DENOMINATOR),
            ));
        }

        for i in 0..ORACLE_SEATS {
            for j in (i + 1)..ORACLE_SEATS {
                if self.oracles[i] == self.oracles[j] {
                    violations.push(violation(
                        "oracles",
                        format!("seats {} and {} share identity {}", i, j, self.oracles[i]),
                    ));
                }
            }
        }

        violations
    }

    pub fn format_report(&self) -> String {
        let violations = self.validate();
        if violations.is_empty() {
            return "Staking configuration VALID".to_string();
        }
        let mut out = String::from("Staking configuration INVALID:\n");
        for v in &violations {
            out.push_str(&format!("  - {}\n", v));
        }
        out
    }
}
