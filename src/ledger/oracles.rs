//! Oracle registration, index sharding and quorum finalization
//!
//! Every oracle is assigned three indexes at registration. A status request
//! draws one index and opens a response bucket for `(index, flight key)`;
//! only oracles holding that index may answer. Once `oracle_quorum` oracles
//! agree on a status code the flight is finalized, insured passengers are
//! credited when the airline is at fault, and every other bucket for the
//! flight is closed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::flights::FlightRegistry;
use super::insurance::InsuranceLedger;
use crate::config::LedgerRules;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Amount, BucketState, Flight, FlightKey, FlightStatus, IdentityKey, Index, IndexTriple,
    LedgerEvent, Oracle, ResponseBucket,
};

/// Result of an accepted oracle response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Recorded; `supporters` oracles now back `status` in this bucket.
    Recorded { status: FlightStatus, supporters: usize },
    /// This response completed the quorum and finalized the flight.
    Finalized { status: FlightStatus, credited: Amount },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleConsensus {
    oracles: BTreeMap<IdentityKey, Oracle>,
    buckets: BTreeMap<FlightKey, BTreeMap<Index, ResponseBucket>>,
    /// Monotonic draw counter mixed into every index derivation.
    nonce: u64,
}

impl OracleConsensus {
    pub fn register_oracle(
        &mut self,
        oracle: &IdentityKey,
        fee_paid: Amount,
        rules: &LedgerRules,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<IndexTriple> {
        if fee_paid < rules.oracle_registration_fee {
            return Err(LedgerError::InsufficientFee {
                provided: fee_paid,
                required: rules.oracle_registration_fee,
            });
        }
        if self.oracles.contains_key(oracle) {
            return Err(LedgerError::OracleAlreadyRegistered(oracle.clone()));
        }

        let range = rules.oracle_index_range;
        let indexes = IndexTriple([
            self.draw_index(oracle, range),
            self.draw_index(oracle, range),
            self.draw_index(oracle, range),
        ]);

        self.oracles.insert(
            oracle.clone(),
            Oracle {
                id: oracle.clone(),
                indexes,
                fee_paid,
            },
        );
        events.push(LedgerEvent::OracleRegistered {
            oracle: oracle.clone(),
            indexes,
        });
        tracing::info!(%oracle, indexes = ?indexes.as_array(), "oracle registered");

        Ok(indexes)
    }

    /// Draw an index for `flight` and open a bucket for it.
    /// An already open bucket for the drawn index is kept as is.
    pub fn request_status(
        &mut self,
        requester: &IdentityKey,
        flight: &Flight,
        rules: &LedgerRules,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<Index> {
        if flight.status.is_final() {
            return Err(LedgerError::AlreadyFinalized(flight.key));
        }

        let index = self.draw_index(requester, rules.oracle_index_range);
        self.buckets
            .entry(flight.key)
            .or_default()
            .entry(index)
            .or_insert_with(|| ResponseBucket::open(index, flight.key, requester.clone()));

        events.push(LedgerEvent::OracleRequest {
            index,
            flight_key: flight.key,
            code: flight.code.clone(),
            destination: flight.destination.clone(),
            timestamp: flight.timestamp,
        });
        tracing::info!(%requester, flight_key = %flight.key, index, "flight status requested");

        Ok(index)
    }

    /// Record an oracle's report and finalize the flight once quorum is reached.
    ///
    /// Every check runs before the bucket is touched, so a rejected response
    /// leaves no trace.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_response(
        &mut self,
        oracle: &IdentityKey,
        index: Index,
        flight_key: &FlightKey,
        status_code: u8,
        rules: &LedgerRules,
        flights: &mut FlightRegistry,
        insurance: &mut InsuranceLedger,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<ResponseOutcome> {
        let registered = self
            .oracles
            .get(oracle)
            .ok_or_else(|| LedgerError::OracleNotRegistered(oracle.clone()))?;
        if !registered.indexes.contains(index) {
            return Err(LedgerError::IndexMismatch {
                oracle: oracle.clone(),
                index,
            });
        }

        let status = FlightStatus::try_from(status_code)
            .ok()
            .filter(|status| status.is_final())
            .ok_or(LedgerError::InvalidStatusCode(status_code))?;

        let bucket = self
            .buckets
            .get_mut(flight_key)
            .and_then(|buckets| buckets.get_mut(&index))
            .ok_or(LedgerError::NoSuchRequest {
                index,
                flight_key: *flight_key,
            })?;
        if !bucket.is_open() {
            return Err(LedgerError::AlreadyFinalized(*flight_key));
        }
        if bucket.has_voted(oracle) {
            return Err(LedgerError::DuplicateVote {
                oracle: oracle.clone(),
                index,
            });
        }

        bucket.responses.entry(status).or_default().insert(oracle.clone());
        let supporters = bucket.supporters(status);
        events.push(LedgerEvent::OracleReport {
            oracle: oracle.clone(),
            index,
            flight_key: *flight_key,
            status,
        });

        if supporters < rules.oracle_quorum {
            tracing::debug!(%oracle, %flight_key, index, %status, supporters, "oracle response recorded");
            return Ok(ResponseOutcome::Recorded { status, supporters });
        }

        bucket.state = BucketState::Finalized { status };
        self.close_requests(flight_key, index);

        flights.set_status(flight_key, status, events)?;
        let credited = insurance.credit_if_eligible(flight_key, status, rules, events)?;
        tracing::info!(%flight_key, index, %status, supporters, credited, "oracle quorum reached");

        Ok(ResponseOutcome::Finalized { status, credited })
    }

    pub fn oracle(&self, id: &IdentityKey) -> Option<&Oracle> {
        self.oracles.get(id)
    }

    pub fn indexes_of(&self, id: &IdentityKey) -> Option<IndexTriple> {
        self.oracles.get(id).map(|o| o.indexes)
    }

    pub fn is_registered(&self, id: &IdentityKey) -> bool {
        self.oracles.contains_key(id)
    }

    pub fn oracle_count(&self) -> usize {
        self.oracles.len()
    }

    pub fn bucket(&self, flight_key: &FlightKey, index: Index) -> Option<&ResponseBucket> {
        self.buckets.get(flight_key)?.get(&index)
    }

    pub fn buckets_for(&self, flight_key: &FlightKey) -> Vec<&ResponseBucket> {
        self.buckets
            .get(flight_key)
            .map(|buckets| buckets.values().collect())
            .unwrap_or_default()
    }

    /// Close every still-open bucket of the flight except the finalizing one.
    fn close_requests(&mut self, flight_key: &FlightKey, finalized: Index) {
        if let Some(buckets) = self.buckets.get_mut(flight_key) {
            for (index, bucket) in buckets.iter_mut() {
                if *index != finalized && bucket.is_open() {
                    bucket.state = BucketState::Closed;
                }
            }
        }
    }

    /// Deterministic draw from `[0, range)` seeded by the nonce and `seed`.
    fn draw_index(&mut self, seed: &IdentityKey, range: u8) -> Index {
        let mut hasher = Sha256::new();
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(seed.as_bytes());
        self.nonce = self.nonce.wrapping_add(1);

        let digest = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(word) % u64::from(range.max(1))) as Index
    }
}
