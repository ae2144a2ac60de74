//! Ledger state and its guarded operations
//!
//! `LedgerState` sequences calls across the four registries. Every mutating
//! operation checks the operational guard first and reports the events it
//! produced through the `events` buffer; the service commits state and events
//! together or not at all.

pub mod airlines;
pub mod flights;
pub mod insurance;
pub mod oracles;

use serde::{Deserialize, Serialize};

pub use airlines::{AirlineRegistry, SponsorOutcome};
pub use flights::FlightRegistry;
pub use insurance::InsuranceLedger;
pub use oracles::{OracleConsensus, ResponseOutcome};

use crate::config::LedgerRules;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Airline, Amount, Flight, FlightKey, FlightRegistration, FlightStatus, IdentityKey, Index,
    IndexTriple, InsurancePolicy, LedgerEvent, ResponseBucket,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerState {
    operational: bool,
    admin: IdentityKey,
    rules: LedgerRules,
    airlines: AirlineRegistry,
    flights: FlightRegistry,
    insurance: InsuranceLedger,
    oracles: OracleConsensus,
    /// Sequence of the last event committed with this state
    #[serde(default)]
    last_sequence: u64,
}

impl LedgerState {
    pub fn genesis(admin: IdentityKey, first_airline: IdentityKey, rules: LedgerRules) -> Self {
        Self {
            operational: true,
            admin,
            rules,
            airlines: AirlineRegistry::genesis(first_airline),
            flights: FlightRegistry::default(),
            insurance: InsuranceLedger::default(),
            oracles: OracleConsensus::default(),
            last_sequence: 0,
        }
    }

    /// Reserve `count` event sequences and return the first one.
    pub(crate) fn advance_sequence(&mut self, count: u64) -> u64 {
        let first = self.last_sequence + 1;
        self.last_sequence += count;
        first
    }

    fn require_operational(&self) -> LedgerResult<()> {
        if self.operational {
            Ok(())
        } else {
            Err(LedgerError::SystemPaused)
        }
    }

    fn require_admin(&self, caller: &IdentityKey) -> LedgerResult<()> {
        if *caller == self.admin {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(caller.clone()))
        }
    }

    // ===== Mutations =====

    /// Pause or resume the ledger (administrator only). Setting the current
    /// value again is a no-op and emits nothing.
    pub fn set_operational(
        &mut self,
        caller: &IdentityKey,
        operational: bool,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<()> {
        self.require_admin(caller)?;
        if self.operational == operational {
            return Ok(());
        }

        self.operational = operational;
        events.push(LedgerEvent::OperationalStatusChanged { operational });
        tracing::warn!(operational, %caller, "ledger operational status changed");

        Ok(())
    }

    pub fn sponsor_airline(
        &mut self,
        sponsor: &IdentityKey,
        candidate: &IdentityKey,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<SponsorOutcome> {
        self.require_operational()?;
        self.airlines.sponsor(sponsor, candidate, &self.rules, events)
    }

    pub fn provide_funding(
        &mut self,
        airline: &IdentityKey,
        amount: Amount,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<()> {
        self.require_operational()?;
        self.airlines.provide_funding(airline, amount, &self.rules, events)
    }

    pub fn register_flight(
        &mut self,
        airline: &IdentityKey,
        registration: FlightRegistration,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<FlightKey> {
        self.require_operational()?;
        self.flights.register(airline, registration, &self.airlines, events)
    }

    pub fn buy_insurance(
        &mut self,
        passenger: &IdentityKey,
        flight_key: &FlightKey,
        amount: Amount,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<()> {
        self.require_operational()?;
        self.insurance
            .buy(passenger, flight_key, amount, &self.flights, &self.rules, events)
    }

    pub fn withdraw(
        &mut self,
        account: &IdentityKey,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<Amount> {
        self.require_operational()?;
        self.insurance.withdraw(account, events)
    }

    pub fn register_oracle(
        &mut self,
        oracle: &IdentityKey,
        fee_paid: Amount,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<IndexTriple> {
        self.require_operational()?;
        self.oracles.register_oracle(oracle, fee_paid, &self.rules, events)
    }

    pub fn request_flight_status(
        &mut self,
        requester: &IdentityKey,
        code: &str,
        destination: &str,
        timestamp: u64,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<Index> {
        self.require_operational()?;
        let flight_key = FlightRegistry::derive_key(code, destination, timestamp);
        let flight = self
            .flights
            .lookup(&flight_key)
            .ok_or(LedgerError::UnknownFlight(flight_key))?;
        self.oracles.request_status(requester, flight, &self.rules, events)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn submit_oracle_response(
        &mut self,
        oracle: &IdentityKey,
        index: Index,
        code: &str,
        destination: &str,
        timestamp: u64,
        status_code: u8,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<ResponseOutcome> {
        self.require_operational()?;
        let flight_key = FlightRegistry::derive_key(code, destination, timestamp);
        self.oracles.submit_response(
            oracle,
            index,
            &flight_key,
            status_code,
            &self.rules,
            &mut self.flights,
            &mut self.insurance,
            events,
        )
    }

    // ===== Queries =====

    pub fn is_operational(&self) -> bool {
        self.operational
    }

    pub fn admin(&self) -> &IdentityKey {
        &self.admin
    }

    /// Sequence of the last event this state includes. Zero before any event.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn rules(&self) -> &LedgerRules {
        &self.rules
    }

    pub fn airline(&self, id: &IdentityKey) -> Option<&Airline> {
        self.airlines.get(id)
    }

    pub fn is_airline_registered(&self, id: &IdentityKey) -> bool {
        self.airlines.is_registered(id)
    }

    pub fn is_airline_funded(&self, id: &IdentityKey) -> bool {
        self.airlines.is_funded(id)
    }

    pub fn federation_size(&self) -> usize {
        self.airlines.federation_size()
    }

    pub fn flight(&self, key: &FlightKey) -> Option<&Flight> {
        self.flights.lookup(key)
    }

    pub fn is_flight_registered(&self, key: &FlightKey) -> bool {
        self.flights.contains(key)
    }

    pub fn flights_by_status(&self, status: FlightStatus) -> Vec<&Flight> {
        self.flights.by_status(status)
    }

    pub fn registered_flight_keys(&self) -> &[FlightKey] {
        self.flights.keys()
    }

    pub fn registered_flight_count(&self) -> usize {
        self.flights.len()
    }

    pub fn passenger_paid_amount(&self, flight_key: &FlightKey, passenger: &IdentityKey) -> Amount {
        self.insurance.paid_amount(flight_key, passenger)
    }

    pub fn policy(&self, flight_key: &FlightKey, passenger: &IdentityKey) -> Option<&InsurancePolicy> {
        self.insurance.policy(flight_key, passenger)
    }

    pub fn policies_for(&self, flight_key: &FlightKey) -> Vec<&InsurancePolicy> {
        self.insurance.policies_for(flight_key)
    }

    pub fn balance_of(&self, account: &IdentityKey) -> Amount {
        self.insurance.balance_of(account)
    }

    pub fn is_oracle_registered(&self, id: &IdentityKey) -> bool {
        self.oracles.is_registered(id)
    }

    pub fn oracle_indexes(&self, id: &IdentityKey) -> Option<IndexTriple> {
        self.oracles.indexes_of(id)
    }

    pub fn oracle_count(&self) -> usize {
        self.oracles.oracle_count()
    }

    pub fn response_bucket(&self, flight_key: &FlightKey, index: Index) -> Option<&ResponseBucket> {
        self.oracles.bucket(flight_key, index)
    }

    pub fn response_buckets(&self, flight_key: &FlightKey) -> Vec<&ResponseBucket> {
        self.oracles.buckets_for(flight_key)
    }
}
