//! Snapshot persistence across service restarts

mod common;

use std::sync::Arc;

use common::*;
use flightsurety_ledger::config::OracleFleetConfig;
use flightsurety_ledger::indexer::FlightIndexer;
use flightsurety_ledger::models::{units, FlightRegistration, FlightStatus, UNIT};
use flightsurety_ledger::services::{OracleFleet, StatusPolicy};
use flightsurety_ledger::storage::{JsonFileStore, LedgerStore};
use flightsurety_ledger::{LedgerError, LedgerService};

#[tokio::test]
async fn test_json_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let config = config();
    let passenger = id("passenger");

    let (ledger, task) = LedgerService::spawn(&config, Arc::new(JsonFileStore::new(&path)))
        .await
        .unwrap();
    ledger.provide_funding(&id("A1"), units(10)).await.unwrap();
    let key = ledger
        .register_flight(
            &id("A1"),
            FlightRegistration::new(CODE, "BRU", DESTINATION, TIMESTAMP, units(1)),
        )
        .await
        .unwrap();
    ledger.buy_insurance(&passenger, &key, units(1)).await.unwrap();
    let indexes = ledger.register_oracle(&id("oracle-0"), units(1)).await.unwrap();
    drop(ledger);
    task.await.unwrap();

    let (ledger, _task) = LedgerService::spawn(&config, Arc::new(JsonFileStore::new(&path)))
        .await
        .unwrap();
    assert!(ledger.is_airline_funded(&id("A1")));
    assert!(ledger.is_flight_registered(&key));
    assert_eq!(ledger.flight(&key).unwrap().status, FlightStatus::Unknown);
    assert_eq!(ledger.passenger_paid_amount(&key, &passenger), units(1));
    assert_eq!(ledger.oracle_indexes(&id("oracle-0")), Some(indexes));

    // The restored state still enforces its rules.
    let err = ledger
        .register_flight(
            &id("A1"),
            FlightRegistration::new(CODE, "BRU", DESTINATION, TIMESTAMP, units(1)),
        )
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::DuplicateFlight(key));
}

#[tokio::test]
async fn test_rejected_command_leaves_snapshot_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let store = Arc::new(JsonFileStore::new(&path));

    let (ledger, _task) = LedgerService::spawn(&config(), store.clone()).await.unwrap();
    let before = tokio::fs::read_to_string(&path).await.unwrap();

    ledger
        .provide_funding(&id("A1"), units(1))
        .await
        .unwrap_err();
    assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), before);

    ledger.provide_funding(&id("A1"), units(10)).await.unwrap();
    let saved = store.load().await.unwrap().unwrap();
    assert!(saved.is_airline_funded(&id("A1")));
}

#[tokio::test]
async fn test_corrupt_snapshot_refuses_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    tokio::fs::write(&path, "not a ledger").await.unwrap();

    let result = LedgerService::spawn(&config(), Arc::new(JsonFileStore::new(&path))).await;
    assert!(matches!(result, Err(LedgerError::Storage(_))));
}

#[tokio::test]
async fn test_indexer_sees_flights_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let config = config();

    let (ledger, task) = LedgerService::spawn(&config, Arc::new(JsonFileStore::new(&path)))
        .await
        .unwrap();
    ledger.provide_funding(&id("A1"), units(10)).await.unwrap();
    let key = ledger
        .register_flight(
            &id("A1"),
            FlightRegistration::new(CODE, "BRU", DESTINATION, TIMESTAMP, units(1)),
        )
        .await
        .unwrap();
    let other = ledger
        .register_flight(
            &id("A1"),
            FlightRegistration::new("LH100", "FRA", "JFK", TIMESTAMP + 3600, units(2)),
        )
        .await
        .unwrap();
    ledger.buy_insurance(&id("p1"), &key, UNIT / 2).await.unwrap();
    let before_restart = ledger.snapshot().last_sequence();
    assert_eq!(before_restart, 4);
    drop(ledger);
    task.await.unwrap();

    let (ledger, _task) = LedgerService::spawn(&config, Arc::new(JsonFileStore::new(&path)))
        .await
        .unwrap();
    let mut events = ledger.subscribe();
    let indexer = FlightIndexer::new(ledger.clone());
    indexer.catch_up().await.unwrap();

    assert_eq!(indexer.cursor().await, before_restart);
    let flights = indexer.flights().await;
    assert_eq!(flights.len(), 2);
    assert_eq!(flights[0].key, key);
    assert_eq!(flights[0].insured, UNIT / 2);
    assert_eq!(flights[1].key, other);
    assert_eq!(flights[1].code, "LH100");

    // New events continue the numbering and land on top of the rebuilt index.
    ledger.buy_insurance(&id("p2"), &key, UNIT / 4).await.unwrap();
    assert_eq!(events.recv().await.unwrap().sequence, before_restart + 1);
    indexer.catch_up().await.unwrap();
    assert_eq!(indexer.cursor().await, before_restart + 1);
    assert_eq!(indexer.flight(&key).await.unwrap().insured, UNIT / 2 + UNIT / 4);
}

#[tokio::test]
async fn test_fleet_answers_request_opened_before_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let config = single_index_config();

    let (ledger, task) = LedgerService::spawn(&config, Arc::new(JsonFileStore::new(&path)))
        .await
        .unwrap();
    ledger.provide_funding(&id("A1"), units(10)).await.unwrap();
    let key = ledger
        .register_flight(
            &id("A1"),
            FlightRegistration::new(CODE, "BRU", DESTINATION, TIMESTAMP, units(1)),
        )
        .await
        .unwrap();
    register_oracles(&ledger, "oracle", 3).await;
    let index = ledger
        .request_flight_status(&id("p"), CODE, DESTINATION, TIMESTAMP)
        .await
        .unwrap();
    // One vote lands before the restart.
    ledger
        .submit_oracle_response(&id("oracle-0"), index, CODE, DESTINATION, TIMESTAMP, 10)
        .await
        .unwrap();
    drop(ledger);
    task.await.unwrap();

    let (ledger, _task) = LedgerService::spawn(&config, Arc::new(JsonFileStore::new(&path)))
        .await
        .unwrap();
    let fleet_config = OracleFleetConfig {
        count: 3,
        seed: 0,
        policy: StatusPolicy::Fixed(FlightStatus::OnTime),
    };
    let fleet = OracleFleet::register(ledger.clone(), &fleet_config).await.unwrap();
    let task = tokio::spawn(fleet.run());

    let reader = ledger.clone();
    eventually(move || reader.flight(&key).map_or(false, |flight| flight.status.is_final())).await;
    assert_eq!(ledger.flight(&key).unwrap().status, FlightStatus::OnTime);

    task.abort();
}
