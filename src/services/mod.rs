//! Background services that drive the ledger from outside

pub mod oracle_service;

pub use oracle_service::{OracleFleet, StatusPolicy, StatusRequest};
