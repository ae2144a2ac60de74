//! Ledger service - the single writer for ledger state
//!
//! One task owns `LedgerState`. Callers talk to it through a cloneable
//! `LedgerHandle`: mutations travel as `Command` messages and are applied one
//! at a time, reads come straight from the latest published snapshot.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{LedgerState, ResponseOutcome, SponsorOutcome};
use crate::models::{
    Airline, Amount, EventRecord, Flight, FlightKey, FlightRegistration, FlightStatus, IdentityKey, Index,
    IndexTriple, LedgerEvent,
};
use crate::storage::{LedgerStore, MemoryStore};

type Reply<T> = oneshot::Sender<LedgerResult<T>>;

enum Command {
    SetOperational {
        caller: IdentityKey,
        operational: bool,
        reply: Reply<()>,
    },
    SponsorAirline {
        sponsor: IdentityKey,
        candidate: IdentityKey,
        reply: Reply<SponsorOutcome>,
    },
    ProvideFunding {
        airline: IdentityKey,
        amount: Amount,
        reply: Reply<()>,
    },
    RegisterFlight {
        airline: IdentityKey,
        registration: FlightRegistration,
        reply: Reply<FlightKey>,
    },
    BuyInsurance {
        passenger: IdentityKey,
        flight_key: FlightKey,
        amount: Amount,
        reply: Reply<()>,
    },
    Withdraw {
        account: IdentityKey,
        reply: Reply<Amount>,
    },
    RegisterOracle {
        oracle: IdentityKey,
        fee: Amount,
        reply: Reply<IndexTriple>,
    },
    RequestFlightStatus {
        requester: IdentityKey,
        code: String,
        destination: String,
        timestamp: u64,
        reply: Reply<Index>,
    },
    SubmitOracleResponse {
        oracle: IdentityKey,
        index: Index,
        code: String,
        destination: String,
        timestamp: u64,
        status_code: u8,
        reply: Reply<ResponseOutcome>,
    },
    Replay {
        from: u64,
        reply: oneshot::Sender<Vec<EventRecord>>,
    },
    Resume {
        after: u64,
        reply: oneshot::Sender<Resume>,
    },
}

/// How a reader that has applied everything up to some sequence continues
#[derive(Debug, Clone)]
pub enum Resume {
    /// The journal still holds every later event
    Events(Vec<EventRecord>),
    /// The journal no longer reaches back that far (it was trimmed, or the
    /// service restarted). Rebuild from this state; it includes every event
    /// up to `last_sequence()`.
    Snapshot(Arc<LedgerState>),
}

/// The task that owns the ledger
pub struct LedgerService {
    state: Arc<LedgerState>,
    store: Arc<dyn LedgerStore>,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<Arc<LedgerState>>,
    events: broadcast::Sender<EventRecord>,
    journal: VecDeque<EventRecord>,
    journal_capacity: usize,
}

impl LedgerService {
    /// Restore the last snapshot from `store` (or build genesis state) and
    /// start the service task. The task ends once every handle is dropped.
    pub async fn spawn(
        config: &LedgerConfig,
        store: Arc<dyn LedgerStore>,
    ) -> LedgerResult<(LedgerHandle, JoinHandle<()>)> {
        let state = match store.load().await.map_err(LedgerError::Storage)? {
            Some(state) => {
                for drift in config_drift(config, &state) {
                    warn!(
                        setting = drift,
                        "configuration differs from the restored snapshot; keeping the snapshot's value"
                    );
                }
                info!(
                    flights = state.registered_flight_count(),
                    federation = state.federation_size(),
                    last_sequence = state.last_sequence(),
                    "ledger restored from snapshot"
                );
                state
            }
            None => {
                let state = LedgerState::genesis(
                    config.admin.clone(),
                    config.first_airline.clone(),
                    config.rules.clone(),
                );
                store.save(&state).await.map_err(LedgerError::Storage)?;
                info!(admin = %config.admin, first_airline = %config.first_airline, "ledger created");
                state
            }
        };

        let state = Arc::new(state);
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(state.clone());
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));

        let service = Self {
            state,
            store,
            commands: command_rx,
            snapshots: snapshot_tx,
            events: event_tx.clone(),
            journal: VecDeque::new(),
            journal_capacity: config.journal_capacity.max(1),
        };
        let task = tokio::spawn(service.run());

        let handle = LedgerHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            events: event_tx,
        };

        Ok((handle, task))
    }

    /// Spawn a ledger that is never written to disk.
    pub async fn spawn_in_memory(config: &LedgerConfig) -> LedgerResult<(LedgerHandle, JoinHandle<()>)> {
        Self::spawn(config, Arc::new(MemoryStore::new())).await
    }

    async fn run(mut self) {
        info!("ledger service started");
        while let Some(command) = self.commands.recv().await {
            self.handle(command).await;
        }
        info!(last_sequence = self.state.last_sequence(), "ledger service stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::SetOperational {
                caller,
                operational,
                reply,
            } => {
                let result = self
                    .transact("set_operational", |state, events| {
                        state.set_operational(&caller, operational, events)
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::SponsorAirline {
                sponsor,
                candidate,
                reply,
            } => {
                let result = self
                    .transact("sponsor_airline", |state, events| {
                        state.sponsor_airline(&sponsor, &candidate, events)
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::ProvideFunding {
                airline,
                amount,
                reply,
            } => {
                let result = self
                    .transact("provide_funding", |state, events| {
                        state.provide_funding(&airline, amount, events)
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::RegisterFlight {
                airline,
                registration,
                reply,
            } => {
                let result = self
                    .transact("register_flight", |state, events| {
                        state.register_flight(&airline, registration, events)
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::BuyInsurance {
                passenger,
                flight_key,
                amount,
                reply,
            } => {
                let result = self
                    .transact("buy_insurance", |state, events| {
                        state.buy_insurance(&passenger, &flight_key, amount, events)
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::Withdraw { account, reply } => {
                let result = self
                    .transact("withdraw", |state, events| state.withdraw(&account, events))
                    .await;
                let _ = reply.send(result);
            }
            Command::RegisterOracle { oracle, fee, reply } => {
                let result = self
                    .transact("register_oracle", |state, events| {
                        state.register_oracle(&oracle, fee, events)
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::RequestFlightStatus {
                requester,
                code,
                destination,
                timestamp,
                reply,
            } => {
                let result = self
                    .transact("request_flight_status", |state, events| {
                        state.request_flight_status(&requester, &code, &destination, timestamp, events)
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::SubmitOracleResponse {
                oracle,
                index,
                code,
                destination,
                timestamp,
                status_code,
                reply,
            } => {
                let result = self
                    .transact("submit_oracle_response", |state, events| {
                        state.submit_oracle_response(
                            &oracle,
                            index,
                            &code,
                            &destination,
                            timestamp,
                            status_code,
                            events,
                        )
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::Replay { from, reply } => {
                let _ = reply.send(self.replay(from));
            }
            Command::Resume { after, reply } => {
                let _ = reply.send(self.resume(after));
            }
        }
    }

    /// Apply one mutation to a working copy. Only when it succeeds and the
    /// snapshot is saved does the copy replace the state and its events get
    /// published; on any error nothing is committed. A command that emits no
    /// events changed nothing and is not saved.
    async fn transact<T>(
        &mut self,
        operation: &'static str,
        apply: impl FnOnce(&mut LedgerState, &mut Vec<LedgerEvent>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut next = LedgerState::clone(&self.state);
        let mut events = Vec::new();

        let value = match apply(&mut next, &mut events) {
            Ok(value) => value,
            Err(err) => {
                debug!(operation, error = %err, "command rejected");
                return Err(err);
            }
        };

        if events.is_empty() {
            debug!(operation, "command changed nothing");
            return Ok(value);
        }

        // Sequences live in the snapshot so they keep counting after a restart.
        let first = next.advance_sequence(events.len() as u64);

        if let Err(err) = self.store.save(&next).await {
            error!(operation, error = %err, "failed to persist ledger snapshot");
            return Err(LedgerError::Storage(err));
        }

        self.state = Arc::new(next);
        self.snapshots.send_replace(self.state.clone());
        for (sequence, event) in (first..).zip(events) {
            self.publish(sequence, event);
        }

        Ok(value)
    }

    fn publish(&mut self, sequence: u64, event: LedgerEvent) {
        let record = EventRecord {
            sequence,
            recorded_at: Utc::now(),
            event,
        };
        debug!(sequence, event = record.event.name(), "event published");
        if self.journal.len() == self.journal_capacity {
            self.journal.pop_front();
        }
        self.journal.push_back(record.clone());
        // Nobody listening is fine; the journal still has it.
        let _ = self.events.send(record);
    }

    fn replay(&self, from: u64) -> Vec<EventRecord> {
        self.journal
            .iter()
            .filter(|record| record.sequence >= from)
            .cloned()
            .collect()
    }

    fn resume(&self, after: u64) -> Resume {
        let from = after.saturating_add(1);
        let covered = from > self.state.last_sequence()
            || self.journal.front().map_or(false, |oldest| oldest.sequence <= from);

        if covered {
            Resume::Events(self.replay(from))
        } else {
            debug!(
                after,
                last_sequence = self.state.last_sequence(),
                "journal does not reach back; sending snapshot"
            );
            Resume::Snapshot(self.state.clone())
        }
    }
}

/// Settings in `config` that the restored `state` disagrees with. The
/// snapshot wins; these only apply to a brand-new ledger.
fn config_drift(config: &LedgerConfig, state: &LedgerState) -> Vec<&'static str> {
    let mut drift = Vec::new();
    if config.admin != *state.admin() {
        drift.push("admin");
    }
    if config.rules != *state.rules() {
        drift.push("rules");
    }
    drift
}

/// Cloneable client for the ledger service
#[derive(Clone)]
pub struct LedgerHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<LedgerState>>,
    events: broadcast::Sender<EventRecord>,
}

impl LedgerHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> LedgerResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| LedgerError::ServiceUnavailable)?;
        response.await.map_err(|_| LedgerError::ServiceUnavailable)?
    }

    // ===== Mutations =====

    pub async fn set_operational(&self, caller: &IdentityKey, operational: bool) -> LedgerResult<()> {
        self.call(|reply| Command::SetOperational {
            caller: caller.clone(),
            operational,
            reply,
        })
        .await
    }

    pub async fn pause(&self, caller: &IdentityKey) -> LedgerResult<()> {
        self.set_operational(caller, false).await
    }

    pub async fn resume(&self, caller: &IdentityKey) -> LedgerResult<()> {
        self.set_operational(caller, true).await
    }

    pub async fn sponsor_airline(
        &self,
        sponsor: &IdentityKey,
        candidate: &IdentityKey,
    ) -> LedgerResult<SponsorOutcome> {
        self.call(|reply| Command::SponsorAirline {
            sponsor: sponsor.clone(),
            candidate: candidate.clone(),
            reply,
        })
        .await
    }

    pub async fn provide_funding(&self, airline: &IdentityKey, amount: Amount) -> LedgerResult<()> {
        self.call(|reply| Command::ProvideFunding {
            airline: airline.clone(),
            amount,
            reply,
        })
        .await
    }

    pub async fn register_flight(
        &self,
        airline: &IdentityKey,
        registration: FlightRegistration,
    ) -> LedgerResult<FlightKey> {
        self.call(|reply| Command::RegisterFlight {
            airline: airline.clone(),
            registration,
            reply,
        })
        .await
    }

    pub async fn buy_insurance(
        &self,
        passenger: &IdentityKey,
        flight_key: &FlightKey,
        amount: Amount,
    ) -> LedgerResult<()> {
        self.call(|reply| Command::BuyInsurance {
            passenger: passenger.clone(),
            flight_key: *flight_key,
            amount,
            reply,
        })
        .await
    }

    /// Zeroes the balance and returns the amount the caller should transfer out.
    pub async fn withdraw(&self, account: &IdentityKey) -> LedgerResult<Amount> {
        self.call(|reply| Command::Withdraw {
            account: account.clone(),
            reply,
        })
        .await
    }

    pub async fn register_oracle(&self, oracle: &IdentityKey, fee: Amount) -> LedgerResult<IndexTriple> {
        self.call(|reply| Command::RegisterOracle {
            oracle: oracle.clone(),
            fee,
            reply,
        })
        .await
    }

    pub async fn request_flight_status(
        &self,
        requester: &IdentityKey,
        code: &str,
        destination: &str,
        timestamp: u64,
    ) -> LedgerResult<Index> {
        self.call(|reply| Command::RequestFlightStatus {
            requester: requester.clone(),
            code: code.to_string(),
            destination: destination.to_string(),
            timestamp,
            reply,
        })
        .await
    }

    pub async fn submit_oracle_response(
        &self,
        oracle: &IdentityKey,
        index: Index,
        code: &str,
        destination: &str,
        timestamp: u64,
        status_code: u8,
    ) -> LedgerResult<ResponseOutcome> {
        self.call(|reply| Command::SubmitOracleResponse {
            oracle: oracle.clone(),
            index,
            code: code.to_string(),
            destination: destination.to_string(),
            timestamp,
            status_code,
            reply,
        })
        .await
    }

    // ===== Event stream =====

    /// Live events from now on. Combine with `replay` to catch up after lag.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }

    /// Every journaled event with `sequence >= from`, in commit order. The
    /// journal only holds the most recent events of this process; use
    /// `resume_from` when older history may be needed.
    pub async fn replay(&self, from: u64) -> LedgerResult<Vec<EventRecord>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Replay { from, reply })
            .await
            .map_err(|_| LedgerError::ServiceUnavailable)?;
        response.await.map_err(|_| LedgerError::ServiceUnavailable)
    }

    /// Everything a reader needs after having applied events up to `after`:
    /// the missing events, or a snapshot when the journal cannot supply them.
    pub async fn resume_from(&self, after: u64) -> LedgerResult<Resume> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Resume { after, reply })
            .await
            .map_err(|_| LedgerError::ServiceUnavailable)?;
        response.await.map_err(|_| LedgerError::ServiceUnavailable)
    }

    // ===== Queries (served from the latest snapshot) =====

    pub fn snapshot(&self) -> Arc<LedgerState> {
        self.snapshots.borrow().clone()
    }

    pub fn is_operational(&self) -> bool {
        self.snapshot().is_operational()
    }

    pub fn is_airline_registered(&self, id: &IdentityKey) -> bool {
        self.snapshot().is_airline_registered(id)
    }

    pub fn is_airline_funded(&self, id: &IdentityKey) -> bool {
        self.snapshot().is_airline_funded(id)
    }

    pub fn airline(&self, id: &IdentityKey) -> Option<Airline> {
        self.snapshot().airline(id).cloned()
    }

    pub fn federation_size(&self) -> usize {
        self.snapshot().federation_size()
    }

    pub fn registered_flight_count(&self) -> usize {
        self.snapshot().registered_flight_count()
    }

    pub fn is_flight_registered(&self, key: &FlightKey) -> bool {
        self.snapshot().is_flight_registered(key)
    }

    pub fn flight(&self, key: &FlightKey) -> Option<Flight> {
        self.snapshot().flight(key).cloned()
    }

    pub fn flights_by_status(&self, status: FlightStatus) -> Vec<Flight> {
        self.snapshot()
            .flights_by_status(status)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn passenger_paid_amount(&self, flight_key: &FlightKey, passenger: &IdentityKey) -> Amount {
        self.snapshot().passenger_paid_amount(flight_key, passenger)
    }

    pub fn balance_of(&self, account: &IdentityKey) -> Amount {
        self.snapshot().balance_of(account)
    }

    /// The indexes assigned to `oracle` at registration.
    pub fn oracle_indexes(&self, oracle: &IdentityKey) -> Option<IndexTriple> {
        self.snapshot().oracle_indexes(oracle)
    }
}
