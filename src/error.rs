//! Ledger error taxonomy

use thiserror::Error;

use crate::models::{FlightKey, IdentityKey, Index};

/// Coarse classification of ledger failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Paused system or caller lacking the required role
    GuardViolation,
    /// Unfunded or unregistered participant attempting a privileged action
    NotEligible,
    NotFound,
    /// Re-registration, replayed vote or submission to a finalized request
    Duplicate,
    /// Underpaid fee or funding, cap exceeded, nothing to withdraw
    InsufficientAmount,
    InvariantViolation,
    /// Storage or service failure outside the ledger rules
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger is paused")]
    SystemPaused,
    #[error("{0} is not authorized for this operation")]
    Unauthorized(IdentityKey),

    #[error("airline {0} has not provided funding")]
    NotFunded(IdentityKey),
    #[error("sponsor {0} is not a registered airline")]
    SponsorNotRegistered(IdentityKey),
    #[error("airline {0} must be registered and funded")]
    AirlineNotEligible(IdentityKey),

    #[error("unknown flight {0}")]
    UnknownFlight(FlightKey),
    #[error("oracle {0} is not registered")]
    OracleNotRegistered(IdentityKey),
    #[error("no open request for index {index} on flight {flight_key}")]
    NoSuchRequest { index: Index, flight_key: FlightKey },

    #[error("airline {0} is already registered")]
    AlreadyRegistered(IdentityKey),
    #[error("flight {0} is already registered")]
    DuplicateFlight(FlightKey),
    #[error("oracle {oracle} already responded to index {index}")]
    DuplicateVote { oracle: IdentityKey, index: Index },
    #[error("flight {0} status is already finalized")]
    AlreadyFinalized(FlightKey),
    #[error("oracle {0} is already registered")]
    OracleAlreadyRegistered(IdentityKey),

    #[error("funding of {provided} is below the minimum of {required}")]
    InsufficientFunds { provided: u128, required: u128 },
    #[error("registration fee of {provided} is below the required {required}")]
    InsufficientFee { provided: u128, required: u128 },
    #[error("purchase would bring the policy to {total}, above the cap of {cap}")]
    ExceedsCap { total: u128, cap: u128 },
    #[error("{0} has no balance to withdraw")]
    ZeroBalance(IdentityKey),
    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("index {index} is not assigned to oracle {oracle}")]
    IndexMismatch { oracle: IdentityKey, index: Index },
    #[error("status code {0} cannot be reported")]
    InvalidStatusCode(u8),
    #[error("invalid flight registration: {0}")]
    InvalidFlight(String),
    #[error("amount arithmetic overflowed")]
    AmountOverflow,

    #[error("storage failure: {0}")]
    Storage(String),
    #[error("ledger service is not running")]
    ServiceUnavailable,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::SystemPaused | LedgerError::Unauthorized(_) => ErrorKind::GuardViolation,
            LedgerError::NotFunded(_)
            | LedgerError::SponsorNotRegistered(_)
            | LedgerError::AirlineNotEligible(_) => ErrorKind::NotEligible,
            LedgerError::UnknownFlight(_)
            | LedgerError::OracleNotRegistered(_)
            | LedgerError::NoSuchRequest { .. } => ErrorKind::NotFound,
            LedgerError::AlreadyRegistered(_)
            | LedgerError::DuplicateFlight(_)
            | LedgerError::DuplicateVote { .. }
            | LedgerError::AlreadyFinalized(_)
            | LedgerError::OracleAlreadyRegistered(_) => ErrorKind::Duplicate,
            LedgerError::InsufficientFunds { .. }
            | LedgerError::InsufficientFee { .. }
            | LedgerError::ExceedsCap { .. }
            | LedgerError::ZeroBalance(_)
            | LedgerError::InvalidAmount => ErrorKind::InsufficientAmount,
            LedgerError::IndexMismatch { .. }
            | LedgerError::InvalidStatusCode(_)
            | LedgerError::InvalidFlight(_)
            | LedgerError::AmountOverflow => ErrorKind::InvariantViolation,
            LedgerError::Storage(_) | LedgerError::ServiceUnavailable => ErrorKind::Unavailable,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let airline = IdentityKey::from("airline-1");
        assert_eq!(LedgerError::SystemPaused.kind(), ErrorKind::GuardViolation);
        assert_eq!(LedgerError::NotFunded(airline.clone()).kind(), ErrorKind::NotEligible);
        assert_eq!(LedgerError::ZeroBalance(airline.clone()).kind(), ErrorKind::InsufficientAmount);
        assert_eq!(
            LedgerError::IndexMismatch { oracle: airline, index: 3 }.kind(),
            ErrorKind::InvariantViolation
        );
        assert_eq!(
            LedgerError::AlreadyFinalized(FlightKey::derive("BE287", "PAR", 1)).kind(),
            ErrorKind::Duplicate
        );
    }
}
