//! Ledger events consumed by read models and oracle operators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Amount, FlightKey, FlightStatus, IdentityKey, Index, IndexTriple};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    OperationalStatusChanged {
        operational: bool,
    },
    AirlineVoted {
        candidate: IdentityKey,
        voter: IdentityKey,
        votes: usize,
        required: usize,
    },
    AirlineRegistered {
        airline: IdentityKey,
        sponsor: IdentityKey,
    },
    AirlineFunded {
        airline: IdentityKey,
        amount: Amount,
    },
    FlightRegistered {
        flight_key: FlightKey,
        airline: IdentityKey,
        code: String,
        departure: String,
        destination: String,
        timestamp: u64,
        price: Amount,
    },
    FlightStatusUpdated {
        flight_key: FlightKey,
        status: FlightStatus,
    },
    InsurancePurchased {
        flight_key: FlightKey,
        passenger: IdentityKey,
        amount: Amount,
    },
    PassengerCredited {
        flight_key: FlightKey,
        passenger: IdentityKey,
        amount: Amount,
    },
    Withdrawal {
        recipient: IdentityKey,
        amount: Amount,
    },
    OracleRegistered {
        oracle: IdentityKey,
        indexes: IndexTriple,
    },
    OracleRequest {
        index: Index,
        flight_key: FlightKey,
        code: String,
        destination: String,
        timestamp: u64,
    },
    OracleReport {
        oracle: IdentityKey,
        index: Index,
        flight_key: FlightKey,
        status: FlightStatus,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::OperationalStatusChanged { .. } => "OperationalStatusChanged",
            LedgerEvent::AirlineVoted { .. } => "AirlineVoted",
            LedgerEvent::AirlineRegistered { .. } => "AirlineRegistered",
            LedgerEvent::AirlineFunded { .. } => "AirlineFunded",
            LedgerEvent::FlightRegistered { .. } => "FlightRegistered",
            LedgerEvent::FlightStatusUpdated { .. } => "FlightStatusUpdated",
            LedgerEvent::InsurancePurchased { .. } => "InsurancePurchased",
            LedgerEvent::PassengerCredited { .. } => "PassengerCredited",
            LedgerEvent::Withdrawal { .. } => "Withdrawal",
            LedgerEvent::OracleRegistered { .. } => "OracleRegistered",
            LedgerEvent::OracleRequest { .. } => "OracleRequest",
            LedgerEvent::OracleReport { .. } => "OracleReport",
        }
    }
}

/// A committed event with its position in the stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Gap-free, starting at 1.
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: LedgerEvent,
}
