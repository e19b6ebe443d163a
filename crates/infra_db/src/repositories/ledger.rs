//! Customer and ledger repository
//!
//! Customer balances and ledger entries are always written together by the
//! ledger poster, so they share a repository. All functions run on a
//! connection that is already inside a transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use core_kernel::{CustomerId, LedgerEntryId};
use domain_billing::{Customer, EntryType, LedgerEntry};

use crate::error::DatabaseError;

/// Database row for a customer
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CustomerRow {
    pub customer_id: Uuid,
    pub name: String,
    pub ledger_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: CustomerId::from_uuid(row.customer_id),
            name: row.name,
            ledger_balance: row.ledger_balance,
            created_at: row.created_at,
        }
    }
}

/// Database row for a ledger entry
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerEntryRow {
    pub seq: i64,
    pub entry_id: Uuid,
    pub customer_id: Uuid,
    pub reference_id: Uuid,
    pub entry_type: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = DatabaseError;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: LedgerEntryId::from_uuid(row.entry_id),
            customer_id: CustomerId::from_uuid(row.customer_id),
            reference_id: row.reference_id,
            entry_type: row
                .entry_type
                .parse::<EntryType>()
                .map_err(|e| DatabaseError::decode("ledger_entries.entry_type", e))?,
            debit: row.debit,
            credit: row.credit,
            balance_after: row.balance_after,
            description: row.description,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

/// Repository for customers and their ledger
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerRepository;

impl LedgerRepository {
    /// Inserts a customer; used when onboarding and by test fixtures
    pub async fn insert_customer(conn: &mut PgConnection, customer: &Customer) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO customers (customer_id, name, ledger_balance, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(customer.id.as_uuid())
        .bind(&customer.name)
        .bind(customer.ledger_balance)
        .bind(customer.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Reads a customer and holds its row lock until the transaction ends
    ///
    /// `NO KEY UPDATE` still serializes balance writers but lets other
    /// transactions insert rows that reference the customer.
    pub async fn lock_customer(
        conn: &mut PgConnection,
        customer_id: CustomerId,
    ) -> Result<Option<Customer>, DatabaseError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r#"
            SELECT customer_id, name, ledger_balance, created_at
            FROM customers
            WHERE customer_id = $1
            FOR NO KEY UPDATE
            "#,
        )
        .bind(customer_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(Customer::from))
    }

    pub async fn update_balance(
        conn: &mut PgConnection,
        customer_id: CustomerId,
        ledger_balance: Decimal,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE customers SET ledger_balance = $2 WHERE customer_id = $1")
            .bind(customer_id.as_uuid())
            .bind(ledger_balance)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Customer", customer_id));
        }
        Ok(())
    }

    pub async fn insert_entry(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                entry_id, customer_id, reference_id, entry_type, debit, credit,
                balance_after, description, created_by, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.customer_id.as_uuid())
        .bind(entry.reference_id)
        .bind(entry.entry_type.as_str())
        .bind(entry.debit)
        .bind(entry.credit)
        .bind(entry.balance_after)
        .bind(&entry.description)
        .bind(&entry.created_by)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// A customer's entries in creation order
    pub async fn entries_for_customer(
        conn: &mut PgConnection,
        customer_id: CustomerId,
    ) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            SELECT seq, entry_id, customer_id, reference_id, entry_type, debit, credit,
                   balance_after, description, created_by, created_at
            FROM ledger_entries
            WHERE customer_id = $1
            ORDER BY seq
            "#,
        )
        .bind(customer_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }
}
