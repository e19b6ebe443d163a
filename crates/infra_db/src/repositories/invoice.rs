//! Invoice repository
//!
//! Covers shipment invoices (declared-value and billing) with their lines,
//! customer invoices, payments and the invoice number counters.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use core_kernel::{CustomerId, InvoiceId, LedgerEntryId, ShipmentId, ShipmentInvoiceId};
use domain_billing::{
    Invoice, InvoiceLine, InvoiceStatus, LineKind, Payment, ShipmentInvoice, ShipmentInvoiceType,
};

use crate::error::DatabaseError;
use crate::repositories::shipment::to_db_count;

/// Database row for a declared-value or billing invoice
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ShipmentInvoiceRow {
    pub shipment_invoice_id: Uuid,
    pub shipment_id: Uuid,
    pub customer_id: Uuid,
    pub invoice_type: String,
    pub invoice_number: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub status: String,
    pub posted_ledger_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceLineRow {
    pub shipment_invoice_id: Uuid,
    pub position: i32,
    pub kind: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
}

/// Database row for a customer invoice
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceRow {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub shipment_id: Uuid,
    pub customer_id: Uuid,
    pub billing_invoice_id: Uuid,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<InvoiceLineRow> for InvoiceLine {
    type Error = DatabaseError;

    fn try_from(row: InvoiceLineRow) -> Result<Self, Self::Error> {
        Ok(InvoiceLine {
            position: u32::try_from(row.position)
                .map_err(|e| DatabaseError::decode("shipment_invoice_lines.position", e))?,
            kind: row
                .kind
                .parse::<LineKind>()
                .map_err(|e| DatabaseError::decode("shipment_invoice_lines.kind", e))?,
            description: row.description,
            quantity: row.quantity,
            unit_price: row.unit_price,
            total: row.total,
        })
    }
}

impl ShipmentInvoiceRow {
    fn into_domain(self, lines: Vec<InvoiceLine>) -> Result<ShipmentInvoice, DatabaseError> {
        Ok(ShipmentInvoice {
            id: ShipmentInvoiceId::from_uuid(self.shipment_invoice_id),
            shipment_id: ShipmentId::from_uuid(self.shipment_id),
            customer_id: CustomerId::from_uuid(self.customer_id),
            invoice_type: self
                .invoice_type
                .parse::<ShipmentInvoiceType>()
                .map_err(|e| DatabaseError::decode("shipment_invoices.invoice_type", e))?,
            invoice_number: self.invoice_number,
            subtotal: self.subtotal,
            tax: self.tax,
            total: self.total,
            status: self
                .status
                .parse::<InvoiceStatus>()
                .map_err(|e| DatabaseError::decode("shipment_invoices.status", e))?,
            posted_ledger_entry_id: self.posted_ledger_entry_id.map(LedgerEntryId::from_uuid),
            lines,
            created_at: self.created_at,
        })
    }
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = DatabaseError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            id: InvoiceId::from_uuid(row.invoice_id),
            invoice_number: row.invoice_number,
            shipment_id: ShipmentId::from_uuid(row.shipment_id),
            customer_id: CustomerId::from_uuid(row.customer_id),
            billing_invoice_id: ShipmentInvoiceId::from_uuid(row.billing_invoice_id),
            total: row.total,
            amount_paid: row.amount_paid,
            balance_due: row.balance_due,
            status: row
                .status
                .parse::<InvoiceStatus>()
                .map_err(|e| DatabaseError::decode("invoices.status", e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, shipment_id, customer_id, \
    billing_invoice_id, total, amount_paid, balance_due, status, created_at, updated_at";

/// Repository for invoices, payments and invoice numbering
#[derive(Debug, Clone, Copy, Default)]
pub struct InvoiceRepository;

impl InvoiceRepository {
    /// Shipment invoices for a shipment, declared-value first
    pub async fn shipment_invoices(
        conn: &mut PgConnection,
        shipment_id: ShipmentId,
    ) -> Result<Vec<ShipmentInvoice>, DatabaseError> {
        let rows = sqlx::query_as::<_, ShipmentInvoiceRow>(
            r#"
            SELECT shipment_invoice_id, shipment_id, customer_id, invoice_type, invoice_number,
                   subtotal, tax, total, status, posted_ledger_entry_id, created_at
            FROM shipment_invoices
            WHERE shipment_id = $1
            ORDER BY invoice_type DESC
            "#,
        )
        .bind(shipment_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.shipment_invoice_id).collect();
        let line_rows = sqlx::query_as::<_, InvoiceLineRow>(
            r#"
            SELECT shipment_invoice_id, position, kind, description, quantity, unit_price, total
            FROM shipment_invoice_lines
            WHERE shipment_invoice_id = ANY($1)
            ORDER BY shipment_invoice_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter()
            .map(|row| {
                let lines = line_rows
                    .iter()
                    .filter(|l| l.shipment_invoice_id == row.shipment_invoice_id)
                    .cloned()
                    .map(InvoiceLine::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                row.into_domain(lines)
            })
            .collect()
    }

    pub async fn insert_shipment_invoice(
        conn: &mut PgConnection,
        invoice: &ShipmentInvoice,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO shipment_invoices (
                shipment_invoice_id, shipment_id, customer_id, invoice_type, invoice_number,
                subtotal, tax, total, status, posted_ledger_entry_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.shipment_id.as_uuid())
        .bind(invoice.customer_id.as_uuid())
        .bind(invoice.invoice_type.as_str())
        .bind(&invoice.invoice_number)
        .bind(invoice.subtotal)
        .bind(invoice.tax)
        .bind(invoice.total)
        .bind(invoice.status.as_str())
        .bind(invoice.posted_ledger_entry_id.map(|id| *id.as_uuid()))
        .bind(invoice.created_at)
        .execute(&mut *conn)
        .await?;

        for line in &invoice.lines {
            sqlx::query(
                r#"
                INSERT INTO shipment_invoice_lines (
                    shipment_invoice_id, position, kind, description, quantity, unit_price, total
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(invoice.id.as_uuid())
            .bind(to_db_count(line.position, "shipment_invoice_lines.position")?)
            .bind(line.kind.as_str())
            .bind(&line.description)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.total)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    pub async fn invoice_for_shipment(
        conn: &mut PgConnection,
        shipment_id: ShipmentId,
    ) -> Result<Option<Invoice>, DatabaseError> {
        let sql = format!("SELECT {} FROM invoices WHERE shipment_id = $1", INVOICE_COLUMNS);
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(shipment_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;

        row.map(Invoice::try_from).transpose()
    }

    /// Loads a customer invoice under a row lock
    pub async fn lock_invoice(
        conn: &mut PgConnection,
        id: InvoiceId,
    ) -> Result<Option<Invoice>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM invoices WHERE invoice_id = $1 FOR UPDATE",
            INVOICE_COLUMNS
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;

        row.map(Invoice::try_from).transpose()
    }

    pub async fn insert_invoice(conn: &mut PgConnection, invoice: &Invoice) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO invoices (
                invoice_id, invoice_number, shipment_id, customer_id, billing_invoice_id,
                total, amount_paid, balance_due, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(&invoice.invoice_number)
        .bind(invoice.shipment_id.as_uuid())
        .bind(invoice.customer_id.as_uuid())
        .bind(invoice.billing_invoice_id.as_uuid())
        .bind(invoice.total)
        .bind(invoice.amount_paid)
        .bind(invoice.balance_due)
        .bind(invoice.status.as_str())
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn update_payment_state(
        conn: &mut PgConnection,
        invoice: &Invoice,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET amount_paid = $2, balance_due = $3, status = $4, updated_at = $5
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.amount_paid)
        .bind(invoice.balance_due)
        .bind(invoice.status.as_str())
        .bind(invoice.updated_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Invoice", &invoice.invoice_number));
        }
        Ok(())
    }

    pub async fn insert_payment(conn: &mut PgConnection, payment: &Payment) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                payment_id, customer_id, invoice_id, amount, method, reference, created_by, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.customer_id.as_uuid())
        .bind(payment.invoice_id.map(|id| *id.as_uuid()))
        .bind(payment.amount)
        .bind(payment.method.as_str())
        .bind(&payment.reference)
        .bind(&payment.created_by)
        .bind(payment.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Reserves the next counter value for `(prefix, year)`
    ///
    /// The upsert takes the counter row lock, so concurrent allocators for
    /// the same key are serialized until the surrounding transaction ends.
    pub async fn next_sequence(
        conn: &mut PgConnection,
        prefix: &str,
        year: i32,
    ) -> Result<i64, DatabaseError> {
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO invoice_sequences (prefix, year, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (prefix, year)
            DO UPDATE SET last_value = invoice_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(prefix)
        .bind(year)
        .fetch_one(&mut *conn)
        .await?;
        Ok(value)
    }
}
