//! Repository implementations for billing aggregates
//!
//! Repositories are stateless: every function takes the connection it runs
//! on, so the caller decides the transaction boundary. Rows are read with
//! `sqlx::FromRow` structs and converted into domain types; a stored value
//! that no longer parses surfaces as `DatabaseError::SerializationError`.

pub mod invoice;
pub mod ledger;
pub mod render_job;
pub mod shipment;

pub use invoice::InvoiceRepository;
pub use ledger::LedgerRepository;
pub use render_job::RenderJobRepository;
pub use shipment::ShipmentRepository;
