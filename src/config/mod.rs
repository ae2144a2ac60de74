//! Environment-driven configuration

pub mod ledger;
pub mod oracle;

pub use ledger::{LedgerConfig, LedgerRules};
pub use oracle::OracleFleetConfig;

use std::env;
use std::fmt::Display;
use std::str::FromStr;

use anyhow::{anyhow, Result};

/// Read `name` from the environment, falling back to `default` when unset or blank.
pub(crate) fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{} has an invalid value {:?}: {}", name, raw, e)),
        _ => Ok(default),
    }
}
