//! Storage port adapters
//!
//! Connects the billing engine's ports to PostgreSQL through the repository
//! layer, translating `DatabaseError` into `BillingError` on the way out.
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresBillingStore;
//! use domain_billing::BillingStore;
//!
//! let store = PostgresBillingStore::new(pool);
//! let mut tx = store.begin().await?;
//! ```

pub mod billing;
pub mod render_job;

pub use billing::{PgBillingTx, PostgresBillingStore};
pub use render_job::PostgresRenderJobStore;
