//! Test Utilities Crate
//!
//! Shared test infrastructure for the courier billing workspace.
//!
//! # Modules
//!
//! - `fixtures`: ready-made customers and shipments
//! - `builders`: `ShipmentBuilder` for tests that vary one field
//! - `database`: testcontainers PostgreSQL harness with migrations applied
//! - `assertions`: ledger and invoice consistency checks
//! - `generators`: proptest strategies for shipments and postings

pub mod assertions;
pub mod builders;
pub mod database;
pub mod fixtures;
pub mod generators;

pub use assertions::*;
pub use builders::*;
pub use database::*;
pub use fixtures::*;
pub use generators::*;
