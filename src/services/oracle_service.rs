//! Oracle fleet
//!
//! Simulates a population of independently operated oracles. Each one is
//! registered with the ledger once, then the fleet listens for
//! `OracleRequest` events and answers with every oracle assigned to the
//! requested index.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::config::OracleFleetConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{LedgerState, ResponseOutcome};
use crate::ledger_service::{LedgerHandle, Resume};
use crate::models::{EventRecord, FlightKey, FlightStatus, IdentityKey, Index, IndexTriple, LedgerEvent};

/// How fleet oracles decide what to report
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Every oracle reports the same status
    Fixed(FlightStatus),
    /// Each oracle picks one of the reportable statuses
    Random,
}

/// One status request observed on the event stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusRequest {
    pub index: Index,
    pub flight_key: FlightKey,
    pub code: String,
    pub destination: String,
    pub timestamp: u64,
}

impl StatusRequest {
    fn from_event(event: &LedgerEvent) -> Option<Self> {
        match event {
            LedgerEvent::OracleRequest {
                index,
                flight_key,
                code,
                destination,
                timestamp,
            } => Some(Self {
                index: *index,
                flight_key: *flight_key,
                code: code.clone(),
                destination: destination.clone(),
                timestamp: *timestamp,
            }),
            _ => None,
        }
    }

    /// Requests still waiting for quorum on flights without a final status.
    fn open_in(state: &LedgerState) -> Vec<Self> {
        let mut requests = Vec::new();
        for key in state.registered_flight_keys() {
            let Some(flight) = state.flight(key) else {
                continue;
            };
            if flight.status.is_final() {
                continue;
            }
            for bucket in state.response_buckets(key) {
                if bucket.is_open() {
                    requests.push(Self {
                        index: bucket.index,
                        flight_key: *key,
                        code: flight.code.clone(),
                        destination: flight.destination.clone(),
                        timestamp: flight.timestamp,
                    });
                }
            }
        }
        requests
    }
}

pub struct OracleFleet {
    ledger: LedgerHandle,
    oracles: Vec<(IdentityKey, IndexTriple)>,
    policy: StatusPolicy,
    rng: StdRng,
    cursor: u64,
}

impl OracleFleet {
    /// Register `config.count` oracles named `oracle-0`, `oracle-1`, ...
    /// Oracles already known to the ledger keep their indexes.
    pub async fn register(ledger: LedgerHandle, config: &OracleFleetConfig) -> LedgerResult<Self> {
        let fee = ledger.snapshot().rules().oracle_registration_fee;
        let mut oracles = Vec::with_capacity(config.count);

        for n in 0..config.count {
            let id = IdentityKey::new(format!("oracle-{}", n));
            let indexes = match ledger.oracle_indexes(&id) {
                Some(indexes) => indexes,
                None => ledger.register_oracle(&id, fee).await?,
            };
            debug!(oracle = %id, ?indexes, "oracle ready");
            oracles.push((id, indexes));
        }

        info!(count = oracles.len(), policy = ?config.policy, "oracle fleet registered");

        Ok(Self {
            ledger,
            oracles,
            policy: config.policy.clone(),
            rng: StdRng::seed_from_u64(config.seed),
            cursor: 0,
        })
    }

    pub fn oracles(&self) -> &[(IdentityKey, IndexTriple)] {
        &self.oracles
    }

    /// Oracles whose assigned indexes include `index`.
    pub fn assigned_to(&self, index: Index) -> Vec<IdentityKey> {
        self.oracles
            .iter()
            .filter(|(_, indexes)| indexes.contains(index))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn pick_status(&mut self) -> FlightStatus {
        match &self.policy {
            StatusPolicy::Fixed(status) => *status,
            StatusPolicy::Random => {
                let choice = self.rng.gen_range(0..FlightStatus::REPORTABLE.len());
                FlightStatus::REPORTABLE[choice]
            }
        }
    }

    /// Submit a response from every assigned oracle. Returns the finalized
    /// status when one of the responses reached quorum.
    pub async fn respond(&mut self, request: &StatusRequest) -> LedgerResult<Option<FlightStatus>> {
        let mut finalized = None;

        for oracle in self.assigned_to(request.index) {
            let status = self.pick_status();
            let result = self
                .ledger
                .submit_oracle_response(
                    &oracle,
                    request.index,
                    &request.code,
                    &request.destination,
                    request.timestamp,
                    status.code(),
                )
                .await;

            match result {
                Ok(ResponseOutcome::Finalized { status, credited }) => {
                    info!(
                        flight = %request.flight_key,
                        %status,
                        credited = %credited,
                        "oracle quorum reached"
                    );
                    finalized = Some(status);
                }
                Ok(ResponseOutcome::Recorded { status, supporters }) => {
                    debug!(%oracle, %status, supporters, "oracle response recorded");
                }
                Err(LedgerError::AlreadyFinalized(_)) => {
                    debug!(%oracle, flight = %request.flight_key, "request already finalized");
                }
                Err(LedgerError::DuplicateVote { .. }) => {
                    debug!(%oracle, flight = %request.flight_key, "oracle already answered this request");
                }
                Err(LedgerError::ServiceUnavailable) => return Err(LedgerError::ServiceUnavailable),
                Err(err) => {
                    warn!(%oracle, error = %err, "oracle response rejected");
                }
            }
        }

        Ok(finalized)
    }

    async fn handle(&mut self, record: EventRecord) -> LedgerResult<()> {
        if record.sequence <= self.cursor {
            return Ok(());
        }
        self.cursor = record.sequence;

        let Some(request) = StatusRequest::from_event(&record.event) else {
            return Ok(());
        };
        let open = self
            .ledger
            .flight(&request.flight_key)
            .map_or(false, |flight| !flight.status.is_final());
        if open {
            self.respond(&request).await?;
        }

        Ok(())
    }

    /// Handle everything after the cursor. When the journal cannot supply
    /// it, answer whatever requests the ledger snapshot still has open.
    async fn catch_up(&mut self) -> LedgerResult<()> {
        match self.ledger.resume_from(self.cursor).await? {
            Resume::Events(records) => {
                for record in records {
                    self.handle(record).await?;
                }
            }
            Resume::Snapshot(state) => {
                self.cursor = self.cursor.max(state.last_sequence());
                let open = StatusRequest::open_in(&state);
                info!(cursor = self.cursor, open = open.len(), "oracle fleet resuming from ledger snapshot");
                for request in open {
                    self.respond(&request).await?;
                }
            }
        }
        Ok(())
    }

    /// Answer status requests until the ledger goes away. Requests that
    /// were issued before the fleet started are answered first.
    pub async fn run(mut self) -> LedgerResult<()> {
        let mut events = self.ledger.subscribe();
        self.catch_up().await?;
        info!(cursor = self.cursor, "oracle fleet listening");

        loop {
            match events.recv().await {
                Ok(record) => self.handle(record).await?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "oracle fleet lagged behind the event stream; replaying");
                    self.catch_up().await?;
                }
                Err(RecvError::Closed) => {
                    info!("event stream closed; oracle fleet stopping");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{LedgerConfig, LedgerRules};
    use crate::ledger_service::LedgerService;
    use crate::models::{units, FlightRegistration};

    async fn ledger(range: u8) -> LedgerHandle {
        let rules = LedgerRules {
            oracle_index_range: range,
            ..LedgerRules::default()
        };
        let config = LedgerConfig::new("owner", "a1").with_rules(rules);
        let (handle, _task) = LedgerService::spawn_in_memory(&config).await.unwrap();
        handle
    }

    #[tokio::test]
    async fn test_fleet_registration_is_stable() {
        let ledger = ledger(10).await;
        let config = OracleFleetConfig {
            count: 5,
            seed: 7,
            policy: StatusPolicy::Fixed(FlightStatus::OnTime),
        };

        let first = OracleFleet::register(ledger.clone(), &config).await.unwrap();
        let again = OracleFleet::register(ledger.clone(), &config).await.unwrap();

        assert_eq!(first.oracles().len(), 5);
        assert_eq!(first.oracles(), again.oracles());
        assert_eq!(ledger.snapshot().oracle_count(), 5);
        assert_eq!(first.oracles()[0].0, IdentityKey::from("oracle-0"));
    }

    #[tokio::test]
    async fn test_respond_finalizes_with_fixed_policy() {
        let ledger = ledger(1).await;
        let a1 = IdentityKey::from("a1");
        ledger.provide_funding(&a1, units(10)).await.unwrap();
        let key = ledger
            .register_flight(&a1, FlightRegistration::new("BE287", "BRU", "PAR", 1_700_000_000, units(1)))
            .await
            .unwrap();

        let config = OracleFleetConfig {
            count: 4,
            seed: 1,
            policy: StatusPolicy::Fixed(FlightStatus::LateWeather),
        };
        let mut fleet = OracleFleet::register(ledger.clone(), &config).await.unwrap();
        let index = ledger
            .request_flight_status(&IdentityKey::from("p1"), "BE287", "PAR", 1_700_000_000)
            .await
            .unwrap();

        let request = StatusRequest {
            index,
            flight_key: key,
            code: "BE287".into(),
            destination: "PAR".into(),
            timestamp: 1_700_000_000,
        };
        let finalized = fleet.respond(&request).await.unwrap();

        assert_eq!(finalized, Some(FlightStatus::LateWeather));
        assert_eq!(ledger.flight(&key).unwrap().status, FlightStatus::LateWeather);
    }

    #[tokio::test]
    async fn test_random_policy_is_seeded() {
        let ledger = ledger(10).await;
        let config = OracleFleetConfig {
            count: 0,
            seed: 42,
            policy: StatusPolicy::Random,
        };
        let mut a = OracleFleet::register(ledger.clone(), &config).await.unwrap();
        let mut b = OracleFleet::register(ledger, &config).await.unwrap();

        let left: Vec<_> = (0..16).map(|_| a.pick_status()).collect();
        let right: Vec<_> = (0..16).map(|_| b.pick_status()).collect();
        assert_eq!(left, right);
        assert!(left.iter().all(|status| status.is_final()));
    }
}
