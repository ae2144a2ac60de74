use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{Amount, FlightKey, FlightStatus, IdentityKey};

/// Shard index drawn from `[0, index_range)`
pub type Index = u8;

/// The three indexes assigned to an oracle at registration.
/// Draws are independent, so duplicates are possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexTriple(pub [Index; 3]);

impl IndexTriple {
    pub fn contains(&self, index: Index) -> bool {
        self.0.contains(&index)
    }

    pub fn as_array(&self) -> [Index; 3] {
        self.0
    }
}

/// Registered oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Oracle {
    pub id: IdentityKey,
    pub indexes: IndexTriple,
    pub fee_paid: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketState {
    Open,
    /// This bucket reached quorum for `status`.
    Finalized { status: FlightStatus },
    /// Another bucket for the same flight reached quorum first.
    Closed,
}

/// Responses collected for one `(index, flight key)` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBucket {
    pub index: Index,
    pub flight_key: FlightKey,
    pub requester: IdentityKey,
    pub state: BucketState,
    pub responses: BTreeMap<FlightStatus, BTreeSet<IdentityKey>>,
}

impl ResponseBucket {
    pub fn open(index: Index, flight_key: FlightKey, requester: IdentityKey) -> Self {
        Self {
            index,
            flight_key,
            requester,
            state: BucketState::Open,
            responses: BTreeMap::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == BucketState::Open
    }

    pub fn has_voted(&self, oracle: &IdentityKey) -> bool {
        self.responses.values().any(|voters| voters.contains(oracle))
    }

    pub fn supporters(&self, status: FlightStatus) -> usize {
        self.responses.get(&status).map_or(0, BTreeSet::len)
    }
}
