//! Passenger policies, payouts and withdrawable balances

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::flights::FlightRegistry;
use crate::config::LedgerRules;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Amount, FlightKey, FlightStatus, IdentityKey, InsurancePolicy, LedgerEvent};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsuranceLedger {
    policies: BTreeMap<FlightKey, BTreeMap<IdentityKey, InsurancePolicy>>,
    balances: BTreeMap<IdentityKey, Amount>,
}

impl InsuranceLedger {
    /// Buy (or top up) insurance. A passenger's total on one flight never exceeds the cap.
    pub fn buy(
        &mut self,
        passenger: &IdentityKey,
        flight_key: &FlightKey,
        amount: Amount,
        flights: &FlightRegistry,
        rules: &LedgerRules,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<()> {
        let flight = flights
            .lookup(flight_key)
            .ok_or(LedgerError::UnknownFlight(*flight_key))?;
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if flight.status.is_final() {
            return Err(LedgerError::AlreadyFinalized(*flight_key));
        }

        let already_paid = self.paid_amount(flight_key, passenger);
        let total = already_paid
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;
        if total > rules.insurance_cap {
            return Err(LedgerError::ExceedsCap {
                total,
                cap: rules.insurance_cap,
            });
        }

        let policy = self
            .policies
            .entry(*flight_key)
            .or_default()
            .entry(passenger.clone())
            .or_insert_with(|| InsurancePolicy {
                flight_key: *flight_key,
                passenger: passenger.clone(),
                amount_paid: 0,
                credited: false,
            });
        policy.amount_paid = total;

        events.push(LedgerEvent::InsurancePurchased {
            flight_key: *flight_key,
            passenger: passenger.clone(),
            amount,
        });
        tracing::info!(%passenger, %flight_key, amount, total, "insurance purchased");

        Ok(())
    }

    /// Credit every uncredited policy on the flight when `status` is the airline's fault.
    /// Returns the total credited; policies already credited are skipped.
    pub fn credit_if_eligible(
        &mut self,
        flight_key: &FlightKey,
        status: FlightStatus,
        rules: &LedgerRules,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<Amount> {
        if !status.is_airline_fault() {
            return Ok(0);
        }
        let Some(policies) = self.policies.get_mut(flight_key) else {
            return Ok(0);
        };

        // Compute every payout before touching balances so an overflow changes nothing.
        let mut payouts = Vec::new();
        for policy in policies.values().filter(|p| !p.credited) {
            let payout = rules
                .payout(policy.amount_paid)
                .ok_or(LedgerError::AmountOverflow)?;
            let balance = self.balances.get(&policy.passenger).copied().unwrap_or(0);
            balance
                .checked_add(payout)
                .ok_or(LedgerError::AmountOverflow)?;
            payouts.push((policy.passenger.clone(), payout));
        }

        let mut total: Amount = 0;
        for (passenger, payout) in payouts {
            if let Some(policy) = policies.get_mut(&passenger) {
                policy.credited = true;
            }
            let balance = self.balances.entry(passenger.clone()).or_insert(0);
            *balance = balance.saturating_add(payout);
            total = total.saturating_add(payout);

            events.push(LedgerEvent::PassengerCredited {
                flight_key: *flight_key,
                passenger: passenger.clone(),
                amount: payout,
            });
            tracing::info!(%passenger, %flight_key, amount = payout, "passenger credited");
        }

        Ok(total)
    }

    /// Zero the balance and hand the amount back for transfer.
    /// The balance is cleared before the caller moves any funds.
    pub fn withdraw(
        &mut self,
        account: &IdentityKey,
        events: &mut Vec<LedgerEvent>,
    ) -> LedgerResult<Amount> {
        let amount = match self.balances.get_mut(account) {
            Some(balance) if *balance > 0 => std::mem::take(balance),
            _ => return Err(LedgerError::ZeroBalance(account.clone())),
        };

        events.push(LedgerEvent::Withdrawal {
            recipient: account.clone(),
            amount,
        });
        tracing::info!(%account, amount, "withdrawal");

        Ok(amount)
    }

    pub fn paid_amount(&self, flight_key: &FlightKey, passenger: &IdentityKey) -> Amount {
        self.policy(flight_key, passenger).map_or(0, |p| p.amount_paid)
    }

    pub fn policy(&self, flight_key: &FlightKey, passenger: &IdentityKey) -> Option<&InsurancePolicy> {
        self.policies.get(flight_key)?.get(passenger)
    }

    pub fn policies_for(&self, flight_key: &FlightKey) -> Vec<&InsurancePolicy> {
        self.policies
            .get(flight_key)
            .map(|policies| policies.values().collect())
            .unwrap_or_default()
    }

    pub fn balance_of(&self, account: &IdentityKey) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::airlines::AirlineRegistry;
    use crate::models::{units, FlightRegistration};

    fn key(id: &str) -> IdentityKey {
        IdentityKey::from(id)
    }

    fn setup() -> (FlightRegistry, FlightKey, LedgerRules) {
        let rules = LedgerRules::default();
        let mut airlines = AirlineRegistry::genesis(key("a1"));
        airlines
            .provide_funding(&key("a1"), units(10), &rules, &mut Vec::new())
            .unwrap();
        let mut flights = FlightRegistry::default();
        let flight_key = flights
            .register(
                &key("a1"),
                FlightRegistration::new("BE287", "CAI", "PAR", 1_700_000_000, units(1)),
                &airlines,
                &mut Vec::new(),
            )
            .unwrap();
        (flights, flight_key, rules)
    }

    #[test]
    fn test_buy_within_cap() {
        let (flights, flight_key, rules) = setup();
        let mut ledger = InsuranceLedger::default();
        let mut events = Vec::new();

        ledger
            .buy(&key("p1"), &flight_key, units(1), &flights, &rules, &mut events)
            .unwrap();
        assert_eq!(ledger.paid_amount(&flight_key, &key("p1")), units(1));
        assert_eq!(ledger.paid_amount(&flight_key, &key("p2")), 0);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_buy_rejections() {
        let (flights, flight_key, rules) = setup();
        let mut ledger = InsuranceLedger::default();
        let missing = FlightKey::derive("XX1", "NOWHERE", 1);

        assert_eq!(
            ledger.buy(&key("p1"), &missing, units(1), &flights, &rules, &mut Vec::new()),
            Err(LedgerError::UnknownFlight(missing))
        );
        assert_eq!(
            ledger.buy(&key("p1"), &flight_key, units(2), &flights, &rules, &mut Vec::new()),
            Err(LedgerError::ExceedsCap {
                total: units(2),
                cap: units(1),
            })
        );
        assert_eq!(
            ledger.buy(&key("p1"), &flight_key, 0, &flights, &rules, &mut Vec::new()),
            Err(LedgerError::InvalidAmount)
        );
        assert!(ledger.policy(&flight_key, &key("p1")).is_none());
    }

    #[test]
    fn test_repeat_purchase_accumulates_up_to_cap() {
        let (flights, flight_key, rules) = setup();
        let mut ledger = InsuranceLedger::default();
        let half = units(1) / 2;

        ledger
            .buy(&key("p1"), &flight_key, half, &flights, &rules, &mut Vec::new())
            .unwrap();
        ledger
            .buy(&key("p1"), &flight_key, half, &flights, &rules, &mut Vec::new())
            .unwrap();
        assert_eq!(ledger.paid_amount(&flight_key, &key("p1")), units(1));

        assert_eq!(
            ledger.buy(&key("p1"), &flight_key, 1, &flights, &rules, &mut Vec::new()),
            Err(LedgerError::ExceedsCap {
                total: units(1) + 1,
                cap: units(1),
            })
        );
        assert_eq!(ledger.policies_for(&flight_key).len(), 1);
    }

    #[test]
    fn test_buy_after_finalization_is_rejected() {
        let (mut flights, flight_key, rules) = setup();
        let mut ledger = InsuranceLedger::default();
        flights
            .set_status(&flight_key, FlightStatus::LateWeather, &mut Vec::new())
            .unwrap();

        assert_eq!(
            ledger.buy(&key("p1"), &flight_key, units(1), &flights, &rules, &mut Vec::new()),
            Err(LedgerError::AlreadyFinalized(flight_key))
        );
    }

    #[test]
    fn test_credit_pays_one_and_a_half() {
        let (flights, flight_key, rules) = setup();
        let mut ledger = InsuranceLedger::default();
        ledger
            .buy(&key("p1"), &flight_key, units(1), &flights, &rules, &mut Vec::new())
            .unwrap();
        ledger
            .buy(&key("p2"), &flight_key, units(1) / 2, &flights, &rules, &mut Vec::new())
            .unwrap();

        let mut events = Vec::new();
        let total = ledger
            .credit_if_eligible(&flight_key, FlightStatus::LateAirline, &rules, &mut events)
            .unwrap();

        assert_eq!(ledger.balance_of(&key("p1")), units(3) / 2);
        assert_eq!(ledger.balance_of(&key("p2")), units(3) / 4);
        assert_eq!(total, units(3) / 2 + units(3) / 4);
        assert_eq!(events.len(), 2);
        assert!(ledger.policy(&flight_key, &key("p1")).unwrap().credited);
    }

    #[test]
    fn test_credit_is_idempotent() {
        let (flights, flight_key, rules) = setup();
        let mut ledger = InsuranceLedger::default();
        ledger
            .buy(&key("p1"), &flight_key, units(1), &flights, &rules, &mut Vec::new())
            .unwrap();

        ledger
            .credit_if_eligible(&flight_key, FlightStatus::LateAirline, &rules, &mut Vec::new())
            .unwrap();
        let mut events = Vec::new();
        let second = ledger
            .credit_if_eligible(&flight_key, FlightStatus::LateAirline, &rules, &mut events)
            .unwrap();

        assert_eq!(second, 0);
        assert!(events.is_empty());
        assert_eq!(ledger.balance_of(&key("p1")), units(3) / 2);
    }

    #[test]
    fn test_non_airline_delays_do_not_pay() {
        let (flights, flight_key, rules) = setup();
        let mut ledger = InsuranceLedger::default();
        ledger
            .buy(&key("p1"), &flight_key, units(1), &flights, &rules, &mut Vec::new())
            .unwrap();

        for status in [
            FlightStatus::OnTime,
            FlightStatus::LateWeather,
            FlightStatus::LateTechnical,
            FlightStatus::LateOther,
        ] {
            let credited = ledger
                .credit_if_eligible(&flight_key, status, &rules, &mut Vec::new())
                .unwrap();
            assert_eq!(credited, 0);
        }
        assert_eq!(ledger.balance_of(&key("p1")), 0);
        assert!(!ledger.policy(&flight_key, &key("p1")).unwrap().credited);
    }

    #[test]
    fn test_withdraw_zeroes_balance() {
        let (flights, flight_key, rules) = setup();
        let mut ledger = InsuranceLedger::default();
        ledger
            .buy(&key("p1"), &flight_key, units(1), &flights, &rules, &mut Vec::new())
            .unwrap();
        ledger
            .credit_if_eligible(&flight_key, FlightStatus::LateAirline, &rules, &mut Vec::new())
            .unwrap();

        let mut events = Vec::new();
        assert_eq!(ledger.withdraw(&key("p1"), &mut events), Ok(units(3) / 2));
        assert_eq!(ledger.balance_of(&key("p1")), 0);
        assert_eq!(
            ledger.withdraw(&key("p1"), &mut events),
            Err(LedgerError::ZeroBalance(key("p1")))
        );
        assert_eq!(
            ledger.withdraw(&key("never-credited"), &mut events),
            Err(LedgerError::ZeroBalance(key("never-credited")))
        );
        assert_eq!(events.len(), 1);
    }
}
