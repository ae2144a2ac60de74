//! FlightSurety ledger library
//!
//! Airline federation governance, flight and insurance bookkeeping, and
//! quorum-based oracle resolution of flight status, served by a
//! single-writer ledger service.

pub mod config;
pub mod error;
pub mod indexer;
pub mod ledger;
pub mod ledger_service;
pub mod models;
pub mod services;
pub mod storage;

pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use ledger_service::{LedgerHandle, LedgerService, Resume};
