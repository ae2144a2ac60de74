//! Flight indexer
//!
//! Replays ledger events into a flat, queryable list of flights. This is
//! the read side: it never mutates the ledger. When the journal cannot reach
//! back to the cursor (after a restart, or once old events are trimmed) the
//! index is rebuilt from a ledger snapshot instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::LedgerResult;
use crate::ledger::LedgerState;
use crate::ledger_service::{LedgerHandle, Resume};
use crate::models::{Amount, EventRecord, FlightKey, FlightStatus, IdentityKey, LedgerEvent};

/// A flight as seen by the read model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFlight {
    pub key: FlightKey,
    pub code: String,
    pub departure: String,
    pub destination: String,
    pub timestamp: u64,
    pub airline: IdentityKey,
    pub price: Amount,
    pub status: FlightStatus,
    /// Sum of all premiums bought on this flight
    pub insured: Amount,
    /// Sum of all payouts credited for this flight
    pub credited: Amount,
}

#[derive(Default)]
struct FlightIndex {
    flights: BTreeMap<FlightKey, IndexedFlight>,
    order: Vec<FlightKey>,
    cursor: u64,
}

impl FlightIndex {
    /// The index as of `state.last_sequence()`.
    fn from_state(state: &LedgerState) -> Self {
        let mut index = Self {
            cursor: state.last_sequence(),
            ..Self::default()
        };

        for key in state.registered_flight_keys() {
            let Some(flight) = state.flight(key) else {
                continue;
            };
            let policies = state.policies_for(key);
            let insured = policies
                .iter()
                .fold(0, |total: Amount, policy| total.saturating_add(policy.amount_paid));
            let credited = policies
                .iter()
                .filter(|policy| policy.credited)
                .filter_map(|policy| state.rules().payout(policy.amount_paid))
                .fold(0, |total: Amount, payout| total.saturating_add(payout));

            index.order.push(*key);
            index.flights.insert(
                *key,
                IndexedFlight {
                    key: *key,
                    code: flight.code.clone(),
                    departure: flight.departure.clone(),
                    destination: flight.destination.clone(),
                    timestamp: flight.timestamp,
                    airline: flight.airline.clone(),
                    price: flight.price,
                    status: flight.status,
                    insured,
                    credited,
                },
            );
        }

        index
    }

    /// Returns false when the record was already applied.
    fn apply(&mut self, record: &EventRecord) -> bool {
        if record.sequence <= self.cursor {
            return false;
        }
        self.cursor = record.sequence;

        match &record.event {
            LedgerEvent::FlightRegistered {
                flight_key,
                airline,
                code,
                departure,
                destination,
                timestamp,
                price,
            } => {
                if !self.flights.contains_key(flight_key) {
                    self.order.push(*flight_key);
                    self.flights.insert(
                        *flight_key,
                        IndexedFlight {
                            key: *flight_key,
                            code: code.clone(),
                            departure: departure.clone(),
                            destination: destination.clone(),
                            timestamp: *timestamp,
                            airline: airline.clone(),
                            price: *price,
                            status: FlightStatus::Unknown,
                            insured: 0,
                            credited: 0,
                        },
                    );
                }
            }
            LedgerEvent::FlightStatusUpdated { flight_key, status } => {
                if let Some(flight) = self.flights.get_mut(flight_key) {
                    flight.status = *status;
                }
            }
            LedgerEvent::InsurancePurchased {
                flight_key, amount, ..
            } => {
                if let Some(flight) = self.flights.get_mut(flight_key) {
                    flight.insured = flight.insured.saturating_add(*amount);
                }
            }
            LedgerEvent::PassengerCredited {
                flight_key, amount, ..
            } => {
                if let Some(flight) = self.flights.get_mut(flight_key) {
                    flight.credited = flight.credited.saturating_add(*amount);
                }
            }
            _ => {}
        }

        true
    }
}

/// Event-sourced flight list. Clones share the same index.
#[derive(Clone)]
pub struct FlightIndexer {
    ledger: LedgerHandle,
    index: Arc<RwLock<FlightIndex>>,
}

impl FlightIndexer {
    pub fn new(ledger: LedgerHandle) -> Self {
        Self {
            ledger,
            index: Arc::new(RwLock::new(FlightIndex::default())),
        }
    }

    /// Every indexed flight in registration order.
    pub async fn flights(&self) -> Vec<IndexedFlight> {
        let index = self.index.read().await;
        let flights = index
            .order
            .iter()
            .filter_map(|key| index.flights.get(key).cloned())
            .collect();
        flights
    }

    /// Flights still waiting for an oracle verdict.
    pub async fn pending_flights(&self) -> Vec<IndexedFlight> {
        self.flights()
            .await
            .into_iter()
            .filter(|flight| flight.status == FlightStatus::Unknown)
            .collect()
    }

    pub async fn flight(&self, key: &FlightKey) -> Option<IndexedFlight> {
        self.index.read().await.flights.get(key).cloned()
    }

    /// Sequence number of the last applied event.
    pub async fn cursor(&self) -> u64 {
        self.index.read().await.cursor
    }

    pub async fn apply(&self, record: &EventRecord) {
        if self.index.write().await.apply(record) {
            debug!(sequence = record.sequence, event = record.event.name(), "indexed event");
        }
    }

    /// Pull everything after the cursor from the ledger journal, or rebuild
    /// from a snapshot when the journal no longer has it. Returns how far the
    /// cursor moved.
    pub async fn catch_up(&self) -> LedgerResult<u64> {
        let before = self.cursor().await;

        match self.ledger.resume_from(before).await? {
            Resume::Events(records) => {
                let mut index = self.index.write().await;
                for record in &records {
                    index.apply(record);
                }
            }
            Resume::Snapshot(state) => {
                info!(
                    cursor = before,
                    last_sequence = state.last_sequence(),
                    "rebuilding flight index from ledger snapshot"
                );
                let rebuilt = FlightIndex::from_state(&state);
                let mut index = self.index.write().await;
                // A live event may have moved the cursor past the snapshot already.
                if rebuilt.cursor > index.cursor {
                    *index = rebuilt;
                }
            }
        }

        Ok(self.cursor().await.saturating_sub(before))
    }

    /// Follow the live event stream until it closes, catching up again
    /// whenever the subscriber falls behind.
    pub async fn run(self) -> LedgerResult<()> {
        let mut events = self.ledger.subscribe();
        let advanced = self.catch_up().await?;
        let cursor = self.cursor().await;
        info!(advanced, cursor, "flight indexer started");

        loop {
            match events.recv().await {
                Ok(record) => self.apply(&record).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "flight indexer lagged; catching up");
                    let advanced = self.catch_up().await?;
                    info!(advanced, "flight indexer caught up");
                }
                Err(RecvError::Closed) => {
                    info!("event stream closed; flight indexer stopping");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;

    fn record(sequence: u64, event: LedgerEvent) -> EventRecord {
        EventRecord {
            sequence,
            recorded_at: Utc::now(),
            event,
        }
    }

    fn registered(key: FlightKey) -> LedgerEvent {
        LedgerEvent::FlightRegistered {
            flight_key: key,
            airline: IdentityKey::from("a1"),
            code: "BE287".into(),
            departure: "BRU".into(),
            destination: "PAR".into(),
            timestamp: 1_700_000_000,
            price: 100,
        }
    }

    #[test]
    fn test_apply_builds_flight_view() {
        let key = FlightKey::derive("BE287", "PAR", 1_700_000_000);
        let passenger = IdentityKey::from("p1");
        let mut index = FlightIndex::default();

        assert!(index.apply(&record(1, registered(key))));
        assert!(index.apply(&record(
            2,
            LedgerEvent::InsurancePurchased {
                flight_key: key,
                passenger: passenger.clone(),
                amount: 10,
            }
        )));
        assert!(index.apply(&record(
            3,
            LedgerEvent::FlightStatusUpdated {
                flight_key: key,
                status: FlightStatus::LateAirline,
            }
        )));
        assert!(index.apply(&record(
            4,
            LedgerEvent::PassengerCredited {
                flight_key: key,
                passenger,
                amount: 15,
            }
        )));

        let flight = &index.flights[&key];
        assert_eq!(flight.status, FlightStatus::LateAirline);
        assert_eq!(flight.insured, 10);
        assert_eq!(flight.credited, 15);
        assert_eq!(index.cursor, 4);
    }

    #[test]
    fn test_apply_ignores_replayed_records() {
        let key = FlightKey::derive("BE287", "PAR", 1_700_000_000);
        let mut index = FlightIndex::default();
        let purchase = record(
            2,
            LedgerEvent::InsurancePurchased {
                flight_key: key,
                passenger: IdentityKey::from("p1"),
                amount: 10,
            },
        );

        index.apply(&record(1, registered(key)));
        assert!(index.apply(&purchase));
        assert!(!index.apply(&purchase));
        assert!(!index.apply(&record(1, registered(key))));

        assert_eq!(index.flights[&key].insured, 10);
        assert_eq!(index.order.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuilds_from_snapshot_when_journal_is_trimmed() {
        use crate::config::{LedgerConfig, LedgerRules};
        use crate::ledger_service::LedgerService;
        use crate::models::{units, FlightRegistration};

        let mut config = LedgerConfig::new("owner", "a1").with_rules(LedgerRules {
            oracle_index_range: 1,
            ..LedgerRules::default()
        });
        config.journal_capacity = 1;
        let (ledger, _task) = LedgerService::spawn_in_memory(&config).await.unwrap();
        let a1 = IdentityKey::from("a1");
        let passenger = IdentityKey::from("p1");

        ledger.provide_funding(&a1, units(10)).await.unwrap();
        let key = ledger
            .register_flight(&a1, FlightRegistration::new("BE287", "BRU", "PAR", 1_700_000_000, units(1)))
            .await
            .unwrap();
        ledger.buy_insurance(&passenger, &key, units(1)).await.unwrap();
        for n in 0..3 {
            ledger
                .register_oracle(&IdentityKey::new(format!("oracle-{}", n)), units(1))
                .await
                .unwrap();
        }
        let index = ledger
            .request_flight_status(&passenger, "BE287", "PAR", 1_700_000_000)
            .await
            .unwrap();
        for n in 0..3 {
            ledger
                .submit_oracle_response(
                    &IdentityKey::new(format!("oracle-{}", n)),
                    index,
                    "BE287",
                    "PAR",
                    1_700_000_000,
                    FlightStatus::LateAirline.code(),
                )
                .await
                .unwrap();
        }

        let indexer = FlightIndexer::new(ledger.clone());
        let moved = indexer.catch_up().await.unwrap();
        let last = ledger.snapshot().last_sequence();
        assert_eq!(moved, last);
        assert_eq!(indexer.cursor().await, last);

        let flight = indexer.flight(&key).await.unwrap();
        assert_eq!(flight.code, "BE287");
        assert_eq!(flight.status, FlightStatus::LateAirline);
        assert_eq!(flight.insured, units(1));
        assert_eq!(flight.credited, units(1) + units(1) / 2);
        assert!(indexer.pending_flights().await.is_empty());
    }
}
