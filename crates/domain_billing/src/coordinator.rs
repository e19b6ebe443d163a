//! Transaction coordinator
//!
//! The only component that opens transactions. Each public operation is one
//! unit of work: begin, run the components against the same transaction,
//! commit. Any error rolls everything back. A deadline covers the whole unit;
//! when it expires the transaction is dropped, which discards its writes.
//!
//! Rendering runs after commit and can only produce [`StorageWarning`]s.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use core_kernel::{ensure_money, ensure_non_negative, round_money, CustomerId, ShipmentId};

use crate::error::BillingError;
use crate::factory::{GeneratedInvoices, InvoiceFactory};
use crate::ledger::{EntryType, LedgerEntry, LedgerPoster, LedgerPosting, LedgerStatement};
use crate::payment::{PaymentReceipt, PaymentReconciler, PaymentRequest};
use crate::ports::{BillingStore, BillingTx};
use crate::rendering::RenderQueue;
use crate::shipment::{BillingInputPatch, Shipment, ShipmentStatus};

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline for one unit of work, including waiting for locks
    pub transaction_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(30),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }
}

/// Who is performing an operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorContext {
    pub user_id: Option<String>,
}

impl ActorContext {
    /// Unattributed, e.g. a scheduled job
    pub fn system() -> Self {
        Self { user_id: None }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }
}

/// A render that failed after the financial work committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageWarning {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub message: String,
}

/// Result of confirming a shipment or generating its invoices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationOutcome {
    pub shipment_id: ShipmentId,
    pub invoices: GeneratedInvoices,
    /// Renders that failed; the jobs stay queued for retry
    pub warnings: Vec<StorageWarning>,
}

/// A manual ledger correction
///
/// Exactly one of `debit` and `credit` must be positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub customer_id: CustomerId,
    pub debit: Decimal,
    pub credit: Decimal,
    pub reason: String,
    /// Document the adjustment relates to; a fresh id is used when absent
    pub reference_id: Option<Uuid>,
}

impl AdjustmentRequest {
    pub fn debit(customer_id: CustomerId, amount: Decimal, reason: impl Into<String>) -> Self {
        Self {
            customer_id,
            debit: amount,
            credit: Decimal::ZERO,
            reason: reason.into(),
            reference_id: None,
        }
    }

    pub fn credit(customer_id: CustomerId, amount: Decimal, reason: impl Into<String>) -> Self {
        Self {
            debit: Decimal::ZERO,
            credit: amount,
            ..Self::debit(customer_id, Decimal::ZERO, reason)
        }
    }

    pub fn with_reference(mut self, reference_id: Uuid) -> Self {
        self.reference_id = Some(reference_id);
        self
    }

    /// Rounds both sides to cents, then checks the request
    fn normalized(mut self) -> Result<Self, BillingError> {
        ensure_non_negative("adjustment debit", self.debit)?;
        ensure_non_negative("adjustment credit", self.credit)?;
        self.debit = ensure_money("adjustment debit", round_money(self.debit))?;
        self.credit = ensure_money("adjustment credit", round_money(self.credit))?;
        if self.debit.is_zero() == self.credit.is_zero() {
            return Err(BillingError::validation(
                "adjustment needs exactly one of debit or credit",
            ));
        }
        if self.reason.trim().is_empty() {
            return Err(BillingError::validation("adjustment reason is required"));
        }
        Ok(self)
    }
}

/// Runs billing operations as atomic units of work
///
/// # Example
///
/// ```rust,ignore
/// let coordinator = TransactionCoordinator::new(store, render_queue, CoordinatorConfig::default());
///
/// let outcome = coordinator.confirm_shipment(shipment_id, &ActorContext::user("clerk-7")).await?;
/// let receipt = coordinator
///     .record_payment(
///         PaymentRequest::new(outcome.invoices.customer_invoice.id, dec!(400), PaymentMethod::Cash),
///         &ActorContext::user("clerk-7"),
///     )
///     .await?;
/// ```
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn BillingStore>,
    renders: RenderQueue,
    config: CoordinatorConfig,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn BillingStore>, renders: RenderQueue, config: CoordinatorConfig) -> Self {
        Self { store, renders, config }
    }

    /// Confirms a draft shipment and generates its invoices
    ///
    /// Moves the shipment `Draft -> Confirmed`, runs the invoice factory and
    /// commits. Queued renders are then attempted; failures become warnings
    /// and never undo the commit.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the shipment does not exist
    /// - `InvalidState` if the shipment is not `Draft`
    /// - any factory error; nothing is persisted in that case
    /// - `TransactionTimeout` if the unit of work overran its deadline
    /// - `CommitOutcomeUnknown` if the commit itself failed
    #[instrument(skip(self, actor), fields(user = ?actor.user_id))]
    pub async fn confirm_shipment(
        &self,
        shipment_id: ShipmentId,
        actor: &ActorContext,
    ) -> Result<ConfirmationOutcome, BillingError> {
        let created_by = actor.user_id.clone();
        let staged = self
            .within_deadline("confirm_shipment", async {
                let mut tx = self.store.begin().await?;
                let result = Self::confirm_in(tx.as_mut(), shipment_id, created_by).await;
                stage(tx, result)
            })
            .await?;
        let invoices = finish("confirm_shipment", staged).await?;

        info!(%shipment_id, invoice = %invoices.customer_invoice.invoice_number, "Shipment confirmed");
        Ok(self.after_commit(shipment_id, invoices).await)
    }

    async fn confirm_in(
        tx: &mut dyn BillingTx,
        shipment_id: ShipmentId,
        created_by: Option<String>,
    ) -> Result<GeneratedInvoices, BillingError> {
        let mut shipment = load_shipment(tx, shipment_id).await?;
        shipment.ensure_status(ShipmentStatus::Draft)?;

        tx.update_shipment_status(shipment_id, ShipmentStatus::Confirmed).await?;
        shipment.status = ShipmentStatus::Confirmed;

        InvoiceFactory::generate(tx, &shipment, Utc::now().date_naive(), created_by).await
    }

    /// Runs the invoice factory for an already confirmed shipment
    ///
    /// Safe to repeat: existing invoices are returned without new numbers,
    /// postings or render jobs.
    #[instrument(skip(self, actor), fields(user = ?actor.user_id))]
    pub async fn generate_invoices(
        &self,
        shipment_id: ShipmentId,
        actor: &ActorContext,
    ) -> Result<ConfirmationOutcome, BillingError> {
        let created_by = actor.user_id.clone();
        let staged = self
            .within_deadline("generate_invoices", async {
                let mut tx = self.store.begin().await?;
                let result: Result<GeneratedInvoices, BillingError> = async {
                    let shipment = load_shipment(tx.as_mut(), shipment_id).await?;
                    InvoiceFactory::generate(tx.as_mut(), &shipment, Utc::now().date_naive(), created_by).await
                }
                .await;
                stage(tx, result)
            })
            .await?;
        let invoices = finish("generate_invoices", staged).await?;

        if !invoices.created {
            debug!(%shipment_id, "Invoice generation was a no-op");
        }
        Ok(self.after_commit(shipment_id, invoices).await)
    }

    /// Applies a payment to a customer invoice in one unit of work
    #[instrument(skip(self, request, actor), fields(invoice_id = %request.invoice_id, user = ?actor.user_id))]
    pub async fn record_payment(
        &self,
        request: PaymentRequest,
        actor: &ActorContext,
    ) -> Result<PaymentReceipt, BillingError> {
        let created_by = actor.user_id.clone();
        let staged = self
            .within_deadline("record_payment", async {
                let mut tx = self.store.begin().await?;
                let result = PaymentReconciler::apply_payment(tx.as_mut(), request, created_by).await;
                stage(tx, result)
            })
            .await?;
        finish("record_payment", staged).await
    }

    /// Posts a manual `ADJUSTMENT` entry to a customer's ledger
    ///
    /// # Errors
    ///
    /// - `Validation` unless exactly one of debit/credit is at least one cent
    ///   after rounding and a reason is given
    /// - `NotFound` if the customer does not exist
    #[instrument(skip(self, request, actor), fields(customer_id = %request.customer_id, user = ?actor.user_id))]
    pub async fn record_adjustment(
        &self,
        request: AdjustmentRequest,
        actor: &ActorContext,
    ) -> Result<LedgerEntry, BillingError> {
        let request = request.normalized()?;

        let posting = LedgerPosting {
            customer_id: request.customer_id,
            debit: request.debit,
            credit: request.credit,
            entry_type: EntryType::Adjustment,
            reference_id: request.reference_id.unwrap_or_else(Uuid::now_v7),
            description: request.reason,
            created_by: actor.user_id.clone(),
        };

        let staged = self
            .within_deadline("record_adjustment", async {
                let mut tx = self.store.begin().await?;
                let result = LedgerPoster::post(tx.as_mut(), posting).await;
                stage(tx, result)
            })
            .await?;
        let entry = finish("record_adjustment", staged).await?;

        info!(entry_id = %entry.id, balance_after = %entry.balance_after, "Adjustment posted");
        Ok(entry)
    }

    /// Patches the billing input of a shipment that is still `Draft`
    ///
    /// See [`crate::BillingInvoiceInput::merge`] for precedence.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the shipment does not exist
    /// - `InvalidState` once the shipment has left `Draft`
    /// - `Validation` if there is no stored input or the merged input is invalid
    #[instrument(skip(self, patch, actor), fields(user = ?actor.user_id))]
    pub async fn revise_billing_input(
        &self,
        shipment_id: ShipmentId,
        patch: BillingInputPatch,
        actor: &ActorContext,
    ) -> Result<Shipment, BillingError> {
        let staged = self
            .within_deadline("revise_billing_input", async {
                let mut tx = self.store.begin().await?;
                let result: Result<Shipment, BillingError> = async {
                    let mut shipment = load_shipment(tx.as_mut(), shipment_id).await?;
                    shipment.ensure_status(ShipmentStatus::Draft)?;
                    if patch.is_empty() {
                        return Ok(shipment);
                    }

                    let merged = shipment.require_billing_input()?.clone().merge(patch);
                    merged.validate()?;
                    tx.update_billing_input(shipment_id, &merged).await?;

                    shipment.billing_input = Some(merged);
                    Ok(shipment)
                }
                .await;
                stage(tx, result)
            })
            .await?;
        finish("revise_billing_input", staged).await
    }

    /// Reads a customer's ledger with its stored and recomputed balances
    ///
    /// The read takes the customer lock, so it never observes a half-applied posting.
    #[instrument(skip(self))]
    pub async fn customer_statement(&self, customer_id: CustomerId) -> Result<LedgerStatement, BillingError> {
        self.within_deadline("customer_statement", async {
            let mut tx = self.store.begin().await?;
            let result = LedgerPoster::statement(tx.as_mut(), customer_id).await;
            if let Err(error) = tx.rollback().await {
                warn!(%error, "Read-only transaction rollback failed");
            }
            result
        })
        .await
    }

    /// Bounds `begin` and the work of a unit of work by the configured timeout
    ///
    /// An overrun drops the in-flight transaction, which rolls it back, so a
    /// `TransactionTimeout` always means nothing was written. The commit is
    /// left to [`finish`] and is not timed.
    async fn within_deadline<T, F>(&self, operation: &'static str, work: F) -> Result<T, BillingError>
    where
        F: Future<Output = Result<T, BillingError>>,
    {
        let timeout = self.config.transaction_timeout;
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, ?timeout, "Transaction deadline exceeded, rolled back");
                Err(BillingError::TransactionTimeout { operation, timeout })
            }
        }
    }

    async fn after_commit(&self, shipment_id: ShipmentId, invoices: GeneratedInvoices) -> ConfirmationOutcome {
        let mut warnings = Vec::new();

        for invoice_id in &invoices.render_job_ids {
            if let Err(error) = self.renders.process(*invoice_id).await {
                warnings.push(StorageWarning {
                    invoice_id: *invoice_id,
                    invoice_number: invoice_number_for(&invoices, *invoice_id),
                    message: error.to_string(),
                });
            }
        }

        if !warnings.is_empty() {
            warn!(%shipment_id, failed = warnings.len(), "Invoices committed but some renders failed");
        }

        ConfirmationOutcome {
            shipment_id,
            invoices,
            warnings,
        }
    }
}

async fn load_shipment(tx: &mut dyn BillingTx, shipment_id: ShipmentId) -> Result<Shipment, BillingError> {
    tx.lock_shipment(shipment_id)
        .await?
        .ok_or_else(|| BillingError::not_found("Shipment", shipment_id))
}

/// A unit of work whose body has run but which is not yet committed
type Staged<T> = (Box<dyn BillingTx>, Result<T, BillingError>);

fn stage<T>(tx: Box<dyn BillingTx>, result: Result<T, BillingError>) -> Result<Staged<T>, BillingError> {
    Ok((tx, result))
}

async fn finish<T>(operation: &'static str, (tx, result): Staged<T>) -> Result<T, BillingError> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(|error| {
                warn!(operation, %error, "Commit failed, outcome unknown");
                BillingError::CommitOutcomeUnknown {
                    operation,
                    reason: error.to_string(),
                }
            })?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!(error = %rollback_error, "Rollback failed");
            }
            Err(error)
        }
    }
}

fn invoice_number_for(invoices: &GeneratedInvoices, invoice_id: Uuid) -> String {
    [
        (*invoices.declared_value.id.as_uuid(), &invoices.declared_value.invoice_number),
        (*invoices.billing.id.as_uuid(), &invoices.billing.invoice_number),
        (*invoices.customer_invoice.id.as_uuid(), &invoices.customer_invoice.invoice_number),
    ]
    .into_iter()
    .find(|(id, _)| *id == invoice_id)
    .map(|(_, number)| number.clone())
    .unwrap_or_default()
}
