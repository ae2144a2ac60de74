use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::env_or;
use crate::models::{units, Amount, IdentityKey};

/// Economic and governance constants enforced by the ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRules {
    pub min_airline_funding: Amount,
    pub oracle_registration_fee: Amount,
    pub insurance_cap: Amount,
    /// Below this many participating airlines, one sponsor is enough.
    pub bootstrap_federation_size: usize,
    pub oracle_quorum: usize,
    /// Oracle indexes are drawn from `[0, oracle_index_range)`.
    pub oracle_index_range: u8,
    pub payout_numerator: Amount,
    pub payout_denominator: Amount,
}

impl Default for LedgerRules {
    fn default() -> Self {
        Self {
            min_airline_funding: units(10),
            oracle_registration_fee: units(1),
            insurance_cap: units(1),
            bootstrap_federation_size: 4,
            oracle_quorum: 3,
            oracle_index_range: 10,
            payout_numerator: 3,
            payout_denominator: 2,
        }
    }
}

impl LedgerRules {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let rules = Self {
            min_airline_funding: env_or("MIN_AIRLINE_FUNDING", defaults.min_airline_funding)?,
            oracle_registration_fee: env_or("ORACLE_REGISTRATION_FEE", defaults.oracle_registration_fee)?,
            insurance_cap: env_or("INSURANCE_CAP", defaults.insurance_cap)?,
            bootstrap_federation_size: env_or("BOOTSTRAP_FEDERATION_SIZE", defaults.bootstrap_federation_size)?,
            oracle_quorum: env_or("ORACLE_QUORUM", defaults.oracle_quorum)?,
            oracle_index_range: env_or("ORACLE_INDEX_RANGE", defaults.oracle_index_range)?,
            ..defaults
        };
        rules.validate()?;
        Ok(rules)
    }

    /// What a policy with `premium` paid pays out on an airline-caused delay,
    /// rounded down. `None` on overflow.
    pub fn payout(&self, premium: Amount) -> Option<Amount> {
        premium
            .checked_mul(self.payout_numerator)
            .map(|scaled| scaled / self.payout_denominator)
    }

    pub fn validate(&self) -> Result<()> {
        if self.oracle_index_range == 0 {
            bail!("oracle index range must be at least 1");
        }
        if self.oracle_quorum == 0 {
            bail!("oracle quorum must be at least 1");
        }
        if self.payout_denominator == 0 {
            bail!("payout denominator must not be zero");
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub admin: IdentityKey,
    /// Registered at genesis; still has to fund before participating.
    pub first_airline: IdentityKey,
    pub rules: LedgerRules,
    /// JSON snapshot location. `None` keeps the ledger in memory only.
    pub state_file: Option<PathBuf>,
    pub command_buffer: usize,
    pub event_buffer: usize,
    /// How many recent events the service keeps for `replay`.
    pub journal_capacity: usize,
}

impl LedgerConfig {
    pub fn new(admin: impl Into<IdentityKey>, first_airline: impl Into<IdentityKey>) -> Self {
        Self {
            admin: admin.into(),
            first_airline: first_airline.into(),
            rules: LedgerRules::default(),
            state_file: None,
            command_buffer: 256,
            event_buffer: 1024,
            journal_capacity: 4096,
        }
    }

    pub fn with_rules(mut self, rules: LedgerRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let admin: String = env_or("LEDGER_ADMIN", "owner".to_string())?;
        let first_airline: String = env_or("LEDGER_FIRST_AIRLINE", "airline-1".to_string())?;
        if admin == first_airline {
            bail!("LEDGER_ADMIN and LEDGER_FIRST_AIRLINE must differ");
        }

        let state_file = env::var("LEDGER_STATE_FILE")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let config = Self {
            admin: admin.into(),
            first_airline: first_airline.into(),
            rules: LedgerRules::from_env()?,
            state_file,
            command_buffer: env_or("LEDGER_COMMAND_BUFFER", 256usize)?.max(1),
            event_buffer: env_or("LEDGER_EVENT_BUFFER", 1024usize)?.max(1),
            journal_capacity: env_or("LEDGER_JOURNAL_CAPACITY", 4096usize)?.max(1),
        };

        Ok(config)
    }
}
