//! PostgreSQL render job store
//!
//! Updates run on pooled autocommit connections, outside any billing
//! transaction, so a render outcome never rolls back a financial write.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use domain_billing::{BillingError, RenderJob, RenderJobStore};

use crate::error::DatabaseError;
use crate::repositories::RenderJobRepository;

#[derive(Debug, Clone)]
pub struct PostgresRenderJobStore {
    pool: PgPool,
}

impl PostgresRenderJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RenderJobStore for PostgresRenderJobStore {
    async fn get(&self, invoice_id: Uuid) -> Result<Option<RenderJob>, BillingError> {
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from)?;
        Ok(RenderJobRepository::get(&mut conn, invoice_id).await?)
    }

    #[instrument(skip(self))]
    async fn due(&self, limit: usize, max_attempts: u32) -> Result<Vec<RenderJob>, BillingError> {
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from)?;
        Ok(RenderJobRepository::due(&mut conn, limit, max_attempts).await?)
    }

    async fn mark_succeeded(&self, invoice_id: Uuid, storage_key: &str) -> Result<(), BillingError> {
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from)?;
        Ok(RenderJobRepository::mark_succeeded(&mut conn, invoice_id, storage_key).await?)
    }

    #[instrument(skip(self))]
    async fn mark_failed(&self, invoice_id: Uuid, error: &str) -> Result<(), BillingError> {
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from)?;
        Ok(RenderJobRepository::mark_failed(&mut conn, invoice_id, error).await?)
    }
}
