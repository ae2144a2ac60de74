//! Shared fixtures for the ledger integration tests

#![allow(dead_code)]

use std::time::Duration;

use flightsurety_ledger::config::{LedgerConfig, LedgerRules};
use flightsurety_ledger::models::{units, FlightKey, FlightRegistration, IdentityKey, IndexTriple};
use flightsurety_ledger::{LedgerHandle, LedgerService};

pub const CODE: &str = "BE287";
pub const DESTINATION: &str = "PAR";
pub const TIMESTAMP: u64 = 1_700_000_000;

pub fn id(name: &str) -> IdentityKey {
    IdentityKey::from(name)
}

pub fn config() -> LedgerConfig {
    LedgerConfig::new("owner", "A1")
}

/// Same as `config` but every oracle index is 0, so any three oracles can
/// reach quorum on any request.
pub fn single_index_config() -> LedgerConfig {
    config().with_rules(LedgerRules {
        oracle_index_range: 1,
        ..LedgerRules::default()
    })
}

pub async fn spawn(config: &LedgerConfig) -> LedgerHandle {
    let (ledger, _task) = LedgerService::spawn_in_memory(config).await.unwrap();
    ledger
}

/// Funds A1 and registers the BE287 flight.
pub async fn with_flight(config: &LedgerConfig) -> (LedgerHandle, FlightKey) {
    let ledger = spawn(config).await;
    ledger.provide_funding(&id("A1"), units(10)).await.unwrap();
    let key = ledger
        .register_flight(
            &id("A1"),
            FlightRegistration::new(CODE, "BRU", DESTINATION, TIMESTAMP, units(1)),
        )
        .await
        .unwrap();
    (ledger, key)
}

/// Registers `count` oracles named `prefix-0..` and returns them with their indexes.
pub async fn register_oracles(
    ledger: &LedgerHandle,
    prefix: &str,
    count: usize,
) -> Vec<(IdentityKey, IndexTriple)> {
    let mut oracles = Vec::with_capacity(count);
    for n in 0..count {
        let oracle = id(&format!("{}-{}", prefix, n));
        let indexes = ledger.register_oracle(&oracle, units(1)).await.unwrap();
        oracles.push((oracle, indexes));
    }
    oracles
}

/// Polls `check` until it holds, failing the test after five seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
