//! Flight registration and status tracking

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::airlines::AirlineRegistry;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Flight, FlightKey, FlightRegistration, FlightStatus, IdentityKey, LedgerEvent};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlightRegistry {
    flights: BTreeMap<FlightKey, Flight>,
    /// Keys in registration order.
    order: Vec<FlightKey>,
}

impl FlightRegistry {
    pub fn derive_key(code: &str, destination: &str, timestamp: u64) -> FlightKey {
        FlightKey::derive(code, destination, timestamp)
    }

    pub fn register(
        &mut self,
        airline: &IdentityKey,
        registration: FlightRegistration,
        airlines: &AirlineRegistry,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<FlightKey> {
        if !airlines.is_participating(airline) {
            return Err(LedgerError::AirlineNotEligible(airline.clone()));
        }
        registration
            .validate()
            .map_err(|e| LedgerError::InvalidFlight(e.to_string()))?;

        let key = registration.key();
        if self.flights.contains_key(&key) {
            return Err(LedgerError::DuplicateFlight(key));
        }

        let flight = Flight {
            key,
            code: registration.code,
            departure: registration.departure,
            destination: registration.destination,
            timestamp: registration.timestamp,
            airline: airline.clone(),
            price: registration.price,
            status: FlightStatus::Unknown,
        };

        events.push(LedgerEvent::FlightRegistered {
            flight_key: key,
            airline: airline.clone(),
            code: flight.code.clone(),
            departure: flight.departure.clone(),
            destination: flight.destination.clone(),
            timestamp: flight.timestamp,
            price: flight.price,
        });
        tracing::info!(flight_key = %key, code = %flight.code, %airline, "flight registered");

        self.flights.insert(key, flight);
        self.order.push(key);

        Ok(key)
    }

    pub fn lookup(&self, key: &FlightKey) -> Option<&Flight> {
        self.flights.get(key)
    }

    pub fn contains(&self, key: &FlightKey) -> bool {
        self.flights.contains_key(key)
    }

    /// Record the finalized status. A flight's status is written at most once.
    pub fn set_status(
        &mut self,
        key: &FlightKey,
        status: FlightStatus,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<()> {
        let flight = self
            .flights
            .get_mut(key)
            .ok_or(LedgerError::UnknownFlight(*key))?;
        if flight.status.is_final() {
            return Err(LedgerError::AlreadyFinalized(*key));
        }

        flight.status = status;
        events.push(LedgerEvent::FlightStatusUpdated {
            flight_key: *key,
            status,
        });
        tracing::info!(flight_key = %key, %status, "flight status updated");

        Ok(())
    }

    /// Flights with `status`, in registration order.
    pub fn by_status(&self, status: FlightStatus) -> Vec<&Flight> {
        self.order
            .iter()
            .filter_map(|key| self.flights.get(key))
            .filter(|flight| flight.status == status)
            .collect()
    }

    pub fn keys(&self) -> &[FlightKey] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
