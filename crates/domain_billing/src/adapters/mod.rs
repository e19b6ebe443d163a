//! Port adapters shipped with the domain crate
//!
//! The PostgreSQL adapter lives in `infra_db`; this module only holds the
//! in-memory store used by tests and local runs.
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_billing::adapters::InMemoryBillingStore;
//!
//! let store = Arc::new(InMemoryBillingStore::new());
//! store.insert_customer(customer).await;
//! let queue = RenderQueue::new(renderer, store.clone(), RenderQueueConfig::default());
//! let coordinator = TransactionCoordinator::new(store, queue, CoordinatorConfig::default());
//! ```

pub mod memory;

pub use memory::InMemoryBillingStore;
