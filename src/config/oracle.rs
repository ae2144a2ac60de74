use std::env;

use anyhow::{anyhow, Result};

use super::env_or;
use crate::models::FlightStatus;
use crate::services::oracle_service::StatusPolicy;

#[derive(Clone, Debug)]
pub struct OracleFleetConfig {
    pub count: usize,
    pub seed: u64,
    pub policy: StatusPolicy,
}

impl Default for OracleFleetConfig {
    fn default() -> Self {
        Self {
            count: 20,
            seed: 0,
            policy: StatusPolicy::Random,
        }
    }
}

impl OracleFleetConfig {
    /// `ORACLE_STATUS` is either `random` or a reportable status code such as `20`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let policy = match env::var("ORACLE_STATUS") {
            Ok(raw) if raw.trim().eq_ignore_ascii_case("random") || raw.trim().is_empty() => {
                StatusPolicy::Random
            }
            Ok(raw) => {
                let code: u8 = raw
                    .trim()
                    .parse()
                    .map_err(|e| anyhow!("ORACLE_STATUS has an invalid value {:?}: {}", raw, e))?;
                let status = FlightStatus::try_from(code).map_err(|e| anyhow!(e))?;
                if !status.is_final() {
                    return Err(anyhow!("ORACLE_STATUS cannot be Unknown"));
                }
                StatusPolicy::Fixed(status)
            }
            Err(_) => defaults.policy,
        };

        Ok(Self {
            count: env_or("ORACLE_COUNT", defaults.count)?,
            seed: env_or("ORACLE_SEED", defaults.seed)?,
            policy,
        })
    }
}
