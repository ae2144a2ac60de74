//! Data models for the FlightSurety ledger

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use validator::Validate;

pub mod event;
pub mod oracle;

pub use event::{EventRecord, LedgerEvent};
pub use oracle::{BucketState, Index, IndexTriple, Oracle, ResponseBucket};

/// Amounts are counted in base units; `UNIT` base units make one native unit.
pub type Amount = u128;

/// One native currency unit.
pub const UNIT: Amount = 1_000_000_000_000_000_000;

/// Convert whole native units into base units.
pub const fn units(n: u64) -> Amount {
    n as Amount * UNIT
}

/// Opaque participant identifier (airline, passenger, oracle or admin)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for IdentityKey {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for IdentityKey {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content-addressed flight identifier: SHA-256 over the length-prefixed
/// `(code, destination, timestamp)` tuple.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlightKey([u8; 32]);

impl FlightKey {
    pub fn derive(code: &str, destination: &str, timestamp: u64) -> Self {
        let mut hasher = Sha256::new();
        for field in [code.as_bytes(), destination.as_bytes()] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
        hasher.update(timestamp.to_be_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(value: &str) -> Result<Self, String> {
        let bytes = hex::decode(value).map_err(|e| format!("Invalid flight key hex: {}", e))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "Flight key must be 32 bytes".to_string())?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for FlightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FlightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlightKey({})", &self.to_hex()[..16])
    }
}

impl Serialize for FlightKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FlightKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// Flight status codes as reported by oracles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum FlightStatus {
    Unknown = 0,
    OnTime = 10,
    LateAirline = 20,
    LateWeather = 30,
    LateTechnical = 40,
    LateOther = 50,
}

impl FlightStatus {
    /// Codes an oracle may report. `Unknown` is only ever the initial state.
    pub const REPORTABLE: [FlightStatus; 5] = [
        FlightStatus::OnTime,
        FlightStatus::LateAirline,
        FlightStatus::LateWeather,
        FlightStatus::LateTechnical,
        FlightStatus::LateOther,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_final(self) -> bool {
        self != FlightStatus::Unknown
    }

    /// Only delays attributable to the airline pay out.
    pub fn is_airline_fault(self) -> bool {
        self == FlightStatus::LateAirline
    }
}

impl From<FlightStatus> for u8 {
    fn from(status: FlightStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for FlightStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(FlightStatus::Unknown),
            10 => Ok(FlightStatus::OnTime),
            20 => Ok(FlightStatus::LateAirline),
            30 => Ok(FlightStatus::LateWeather),
            40 => Ok(FlightStatus::LateTechnical),
            50 => Ok(FlightStatus::LateOther),
            other => Err(format!("Unknown flight status code: {}", other)),
        }
    }
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Airline membership record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airline {
    pub id: IdentityKey,
    pub registered: bool,
    pub funded: bool,
    /// Total deposited; anything above the minimum is retained.
    pub deposited: Amount,
    /// Funded airlines that approved this candidate once the bootstrap phase ended.
    pub pending_votes: BTreeSet<IdentityKey>,
}

impl Airline {
    pub fn new(id: IdentityKey) -> Self {
        Self {
            id,
            registered: false,
            funded: false,
            deposited: 0,
            pending_votes: BTreeSet::new(),
        }
    }

    /// Registered and funded: a voting member of the federation.
    pub fn is_participating(&self) -> bool {
        self.registered && self.funded
    }
}

/// Input for registering a flight
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FlightRegistration {
    #[validate(length(min = 1, max = 16))]
    pub code: String,
    #[validate(length(min = 1, max = 64))]
    pub departure: String,
    #[validate(length(min = 1, max = 64))]
    pub destination: String,
    #[validate(range(min = 1))]
    pub timestamp: u64,
    pub price: Amount,
}

impl FlightRegistration {
    pub fn new(
        code: impl Into<String>,
        departure: impl Into<String>,
        destination: impl Into<String>,
        timestamp: u64,
        price: Amount,
    ) -> Self {
        Self {
            code: code.into(),
            departure: departure.into(),
            destination: destination.into(),
            timestamp,
            price,
        }
    }

    pub fn key(&self) -> FlightKey {
        FlightKey::derive(&self.code, &self.destination, self.timestamp)
    }
}

/// Registered flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flight {
    pub key: FlightKey,
    pub code: String,
    pub departure: String,
    pub destination: String,
    pub timestamp: u64,
    pub airline: IdentityKey,
    pub price: Amount,
    pub status: FlightStatus,
}

/// A passenger's insurance on one flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsurancePolicy {
    pub flight_key: FlightKey,
    pub passenger: IdentityKey,
    pub amount_paid: Amount,
    pub credited: bool,
}
