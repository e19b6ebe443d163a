//! Infrastructure Database Layer
//!
//! PostgreSQL persistence for the courier billing engine, built on SQLx.
//!
//! # Architecture
//!
//! - `pool`: connection pool configuration and schema migrations
//! - `repositories`: SQL for each aggregate, one function per statement
//! - `adapters`: implementations of the `domain_billing` storage ports
//!
//! Row locks (`SELECT ... FOR UPDATE`) on customers, shipments and invoices
//! serialize concurrent read-modify-write operations; unique constraints on
//! invoice numbers and `(shipment_id, invoice_type)` back the exactly-once
//! invoice guarantees.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresBillingStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/courier_billing")).await?;
//! run_migrations(&pool).await?;
//! let store = PostgresBillingStore::new(pool);
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;

pub use adapters::{PgBillingTx, PostgresBillingStore, PostgresRenderJobStore};
pub use error::DatabaseError;
pub use pool::{create_pool, run_migrations, DatabaseConfig, DatabasePool};
