//! Airline admission and funding

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::LedgerRules;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Airline, Amount, IdentityKey, LedgerEvent};

/// Result of a sponsorship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SponsorOutcome {
    Registered,
    /// Vote recorded; the candidate needs `required` distinct voters.
    Pending { votes: usize, required: usize },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AirlineRegistry {
    airlines: BTreeMap<IdentityKey, Airline>,
}

impl AirlineRegistry {
    /// The first airline is registered up front but must still fund itself.
    pub fn genesis(first_airline: IdentityKey) -> Self {
        let mut airline = Airline::new(first_airline.clone());
        airline.registered = true;

        let mut airlines = BTreeMap::new();
        airlines.insert(first_airline, airline);
        Self { airlines }
    }

    pub fn get(&self, id: &IdentityKey) -> Option<&Airline> {
        self.airlines.get(id)
    }

    pub fn is_registered(&self, id: &IdentityKey) -> bool {
        self.airlines.get(id).map_or(false, |a| a.registered)
    }

    pub fn is_funded(&self, id: &IdentityKey) -> bool {
        self.airlines.get(id).map_or(false, |a| a.funded)
    }

    pub fn is_participating(&self, id: &IdentityKey) -> bool {
        self.airlines.get(id).map_or(false, Airline::is_participating)
    }

    /// Number of registered and funded airlines.
    pub fn federation_size(&self) -> usize {
        self.airlines.values().filter(|a| a.is_participating()).count()
    }

    /// Sponsor `candidate` on behalf of `sponsor`.
    ///
    /// While the federation is smaller than the bootstrap size a single
    /// sponsor admits the candidate. Afterwards each sponsorship is a vote and
    /// the candidate is admitted once `votes * 2 >= federation size`.
    pub fn sponsor(
        &mut self,
        sponsor: &IdentityKey,
        candidate: &IdentityKey,
        rules: &LedgerRules,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<SponsorOutcome> {
        match self.airlines.get(sponsor) {
            Some(airline) if !airline.funded => {
                return Err(LedgerError::NotFunded(sponsor.clone()))
            }
            Some(airline) if !airline.registered => {
                return Err(LedgerError::SponsorNotRegistered(sponsor.clone()))
            }
            Some(_) => {}
            None => return Err(LedgerError::NotFunded(sponsor.clone())),
        }

        if self.is_registered(candidate) {
            return Err(LedgerError::AlreadyRegistered(candidate.clone()));
        }

        let federation = self.federation_size();
        let entry = self
            .airlines
            .entry(candidate.clone())
            .or_insert_with(|| Airline::new(candidate.clone()));

        if federation < rules.bootstrap_federation_size {
            entry.registered = true;
            entry.pending_votes.clear();
            events.push(LedgerEvent::AirlineRegistered {
                airline: candidate.clone(),
                sponsor: sponsor.clone(),
            });
            tracing::info!(%candidate, %sponsor, federation, "airline registered during bootstrap");
            return Ok(SponsorOutcome::Registered);
        }

        let first_vote = entry.pending_votes.insert(sponsor.clone());
        let votes = entry.pending_votes.len();
        let required = federation.div_ceil(2);

        // A repeated vote changes nothing, so it is not an event either.
        if !first_vote {
            tracing::debug!(%candidate, %sponsor, votes, required, "repeat airline vote ignored");
            return Ok(SponsorOutcome::Pending { votes, required });
        }

        events.push(LedgerEvent::AirlineVoted {
            candidate: candidate.clone(),
            voter: sponsor.clone(),
            votes,
            required,
        });

        if votes * 2 < federation {
            tracing::debug!(%candidate, votes, required, "airline vote recorded");
            return Ok(SponsorOutcome::Pending { votes, required });
        }

        entry.registered = true;
        entry.pending_votes.clear();
        events.push(LedgerEvent::AirlineRegistered {
            airline: candidate.clone(),
            sponsor: sponsor.clone(),
        });
        tracing::info!(%candidate, votes, federation, "airline registered by federation vote");

        Ok(SponsorOutcome::Registered)
    }

    /// Deposit funding. Anything at or above the minimum marks the airline funded;
    /// excess is kept.
    pub fn provide_funding(
        &mut self,
        airline: &IdentityKey,
        amount: Amount,
        rules: &LedgerRules,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<()> {
        if amount < rules.min_airline_funding {
            return Err(LedgerError::InsufficientFunds {
                provided: amount,
                required: rules.min_airline_funding,
            });
        }

        let entry = self
            .airlines
            .entry(airline.clone())
            .or_insert_with(|| Airline::new(airline.clone()));
        entry.deposited = entry
            .deposited
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;
        entry.funded = true;

        events.push(LedgerEvent::AirlineFunded {
            airline: airline.clone(),
            amount,
        });
        tracing::info!(%airline, amount, "airline funded");

        Ok(())
    }
}
