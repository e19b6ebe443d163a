//! File-system invoice renderer
//!
//! Writes each invoice snapshot as a JSON document named after the invoice
//! id, so rendering the same invoice again replaces the earlier file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use domain_billing::{BillingError, InvoiceRenderer, InvoiceSnapshot};

/// Stores rendered invoices under a local directory
#[derive(Debug, Clone)]
pub struct FileSnapshotRenderer {
    storage_dir: PathBuf,
}

impl FileSnapshotRenderer {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Storage key for an invoice document
    pub fn key_for(&self, invoice_id: Uuid) -> PathBuf {
        self.storage_dir.join(format!("{}.json", invoice_id))
    }
}

#[async_trait]
impl InvoiceRenderer for FileSnapshotRenderer {
    async fn render(&self, invoice_id: Uuid, snapshot: &InvoiceSnapshot) -> Result<String, BillingError> {
        let document = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| BillingError::Storage(format!("cannot encode {}: {}", snapshot.invoice_number, e)))?;

        tokio::fs::create_dir_all(&self.storage_dir)
            .await
            .map_err(|e| BillingError::Storage(format!("{}: {}", self.storage_dir.display(), e)))?;

        let path = self.key_for(invoice_id);
        tokio::fs::write(&path, document)
            .await
            .map_err(|e| BillingError::Storage(format!("{}: {}", path.display(), e)))?;

        debug!(invoice_number = %snapshot.invoice_number, path = %path.display(), "Invoice written");
        Ok(path.display().to_string())
    }
}
