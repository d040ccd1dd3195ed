use hourglass_rs::TimeSource;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{BillingError, Result};

pub const ENV_PRINCIPAL: &str = "BILLING_PRINCIPAL";
pub const ENV_INTEREST_RATE: &str = "BILLING_INTEREST_RATE";
pub const ENV_TERM_WEEKS: &str = "BILLING_TERM_WEEKS";
pub const ENV_AMOUNT_SCALE: &str = "BILLING_AMOUNT_SCALE";
pub const ENV_NODE_ID: &str = "BILLING_NODE_ID";
pub const ENV_DATABASE: &str = "BILLING_DATABASE";

/// largest node id the snowflake layout can carry (10 bits)
pub const MAX_NODE_ID: u16 = 1023;

/// longest term a policy may set, one hundred years of weekly installments
pub const MAX_TERM_WEEKS: u32 = 5_200;

/// terms applied to every loan the origination gate creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanPolicy {
    pub principal: Money,
    pub interest_rate: Rate,
    pub term_weeks: u32,
    /// decimal places kept on each installment amount
    #[serde(default = "default_amount_scale")]
    pub amount_scale: u32,
}

fn default_amount_scale() -> u32 {
    2
}

impl LoanPolicy {
    /// create a validated policy
    pub fn new(principal: Money, interest_rate: Rate, term_weeks: u32) -> Result<Self> {
        let policy = Self {
            principal,
            interest_rate,
            term_weeks,
            amount_scale: default_amount_scale(),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// 5,000,000 over 50 weeks at a flat 10%
    pub fn standard() -> Self {
        Self {
            principal: Money::from_major(5_000_000),
            interest_rate: Rate::from_decimal(dec!(0.1)),
            term_weeks: 50,
            amount_scale: default_amount_scale(),
        }
    }

    pub fn with_amount_scale(mut self, scale: u32) -> Result<Self> {
        self.amount_scale = scale;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.principal.is_positive() {
            return Err(BillingError::InvalidPolicy {
                message: format!("principal must be positive, got {}", self.principal),
            });
        }
        if self.interest_rate.is_negative() {
            return Err(BillingError::InvalidPolicy {
                message: format!("interest rate must not be negative, got {}", self.interest_rate),
            });
        }
        if self.term_weeks == 0 {
            return Err(BillingError::InvalidPolicy {
                message: "term must be at least one week".to_string(),
            });
        }
        if self.term_weeks > MAX_TERM_WEEKS {
            return Err(BillingError::InvalidPolicy {
                message: format!(
                    "term of {} weeks exceeds {MAX_TERM_WEEKS} weeks",
                    self.term_weeks
                ),
            });
        }
        let repayable = self
            .interest_rate
            .uplift()
            .and_then(|uplift| self.principal.checked_mul(uplift));
        if repayable.is_none() {
            return Err(BillingError::InvalidPolicy {
                message: format!(
                    "principal {} at rate {} exceeds the representable amount",
                    self.principal, self.interest_rate
                ),
            });
        }
        if self.amount_scale > 8 {
            return Err(BillingError::InvalidPolicy {
                message: format!("amount scale {} exceeds 8 decimal places", self.amount_scale),
            });
        }
        Ok(())
    }

    /// load from a json document such as
    /// `{"principal":"5000000","interest_rate":"0.1","term_weeks":50}`
    pub fn from_json(json: &str) -> Result<Self> {
        let policy: LoanPolicy =
            serde_json::from_str(json).map_err(|e| BillingError::InvalidPolicy {
                message: e.to_string(),
            })?;
        policy.validate()?;
        Ok(policy)
    }

    /// standard policy with overrides from `BILLING_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// standard policy with overrides resolved through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut policy = Self::standard();

        if let Some(raw) = lookup(ENV_PRINCIPAL) {
            policy.principal = Money::from_str_exact(&raw).map_err(|e| invalid(ENV_PRINCIPAL, &raw, e))?;
        }
        if let Some(raw) = lookup(ENV_INTEREST_RATE) {
            policy.interest_rate =
                Rate::from_str_exact(&raw).map_err(|e| invalid(ENV_INTEREST_RATE, &raw, e))?;
        }
        if let Some(raw) = lookup(ENV_TERM_WEEKS) {
            policy.term_weeks = raw.trim().parse().map_err(|e| invalid(ENV_TERM_WEEKS, &raw, e))?;
        }
        if let Some(raw) = lookup(ENV_AMOUNT_SCALE) {
            policy.amount_scale = raw.trim().parse().map_err(|e| invalid(ENV_AMOUNT_SCALE, &raw, e))?;
        }

        policy.validate()?;
        Ok(policy)
    }
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

fn invalid(key: &str, raw: &str, err: impl std::fmt::Display) -> BillingError {
    BillingError::InvalidPolicy {
        message: format!("{key}={raw:?}: {err}"),
    }
}

/// everything needed to wire an engine together
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub policy: LoanPolicy,
    pub node_id: u16,
    /// sqlite file; None keeps state in memory
    pub database_path: Option<String>,
    pub time_source: TimeSource,
}

impl EngineConfig {
    pub fn new(policy: LoanPolicy) -> Self {
        Self {
            policy,
            node_id: 0,
            database_path: None,
            time_source: TimeSource::System,
        }
    }

    pub fn from_env() -> Result<Self> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.time_source = TimeSource::from_env();
        Ok(config)
    }

    /// resolve policy, node id and database path through `lookup`; the time
    /// source stays on the system clock
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let policy = LoanPolicy::from_lookup(&lookup)?;
        let mut config = Self::new(policy);

        if let Some(raw) = lookup(ENV_NODE_ID) {
            let node_id: u16 = raw.trim().parse().map_err(|e| invalid(ENV_NODE_ID, &raw, e))?;
            if node_id > MAX_NODE_ID {
                return Err(invalid(ENV_NODE_ID, &raw, format!("must be at most {MAX_NODE_ID}")));
            }
            config.node_id = node_id;
        }
        config.database_path = lookup(ENV_DATABASE).filter(|p| !p.trim().is_empty());

        Ok(config)
    }

    pub fn with_time_source(mut self, source: TimeSource) -> Self {
        self.time_source = source;
        self
    }

    pub fn with_node_id(mut self, node_id: u16) -> Self {
        self.node_id = node_id.min(MAX_NODE_ID);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(LoanPolicy::standard())
    }
}
