//! Shipment repository
//!
//! A shipment is stored across four tables: the shipment row, its boxes, its
//! product invoice items and the optional billing invoice input. Loading takes
//! the shipment row lock first and then reads the children.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use core_kernel::{BoxId, CustomerId, ShipmentId};
use domain_billing::{
    BillingInvoiceInput, PaymentMethod, ProductInvoiceItem, Shipment, ShipmentBox, ShipmentStatus,
};

use crate::error::DatabaseError;

/// Database row for a shipment
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ShipmentRow {
    pub shipment_id: Uuid,
    pub customer_id: Uuid,
    pub tracking_number: String,
    pub actual_weight_kg: Decimal,
    pub charged_weight_kg: Option<Decimal>,
    pub customs_value: Option<Decimal>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ShipmentBoxRow {
    pub box_id: Uuid,
    pub length_cm: Decimal,
    pub width_cm: Decimal,
    pub height_cm: Decimal,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductInvoiceItemRow {
    pub description: String,
    pub pieces: i32,
    pub unit_value: Decimal,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillingInvoiceInputRow {
    pub rate_per_kg: Option<Decimal>,
    pub total_rate: Decimal,
    pub e_form_charges: Decimal,
    pub remote_area_charges: Decimal,
    pub box_charges: Decimal,
    pub grand_total: Decimal,
    pub payment_method: String,
}

impl From<ShipmentBoxRow> for ShipmentBox {
    fn from(row: ShipmentBoxRow) -> Self {
        ShipmentBox {
            id: BoxId::from_uuid(row.box_id),
            length_cm: row.length_cm,
            width_cm: row.width_cm,
            height_cm: row.height_cm,
        }
    }
}

impl TryFrom<ProductInvoiceItemRow> for ProductInvoiceItem {
    type Error = DatabaseError;

    fn try_from(row: ProductInvoiceItemRow) -> Result<Self, Self::Error> {
        Ok(ProductInvoiceItem {
            description: row.description,
            pieces: u32::try_from(row.pieces)
                .map_err(|e| DatabaseError::decode("product_invoice_items.pieces", e))?,
            unit_value: row.unit_value,
        })
    }
}

impl TryFrom<BillingInvoiceInputRow> for BillingInvoiceInput {
    type Error = DatabaseError;

    fn try_from(row: BillingInvoiceInputRow) -> Result<Self, Self::Error> {
        Ok(BillingInvoiceInput {
            rate_per_kg: row.rate_per_kg,
            total_rate: row.total_rate,
            e_form_charges: row.e_form_charges,
            remote_area_charges: row.remote_area_charges,
            box_charges: row.box_charges,
            grand_total: row.grand_total,
            payment_method: row
                .payment_method
                .parse::<PaymentMethod>()
                .map_err(|e| DatabaseError::decode("billing_invoice_inputs.payment_method", e))?,
        })
    }
}

/// Repository for shipments and their billing inputs
#[derive(Debug, Clone, Copy, Default)]
pub struct ShipmentRepository;

impl ShipmentRepository {
    /// Inserts a shipment with its boxes, items and billing input
    ///
    /// Shipment capture lives outside this engine; this is used by seeding
    /// tools and tests.
    pub async fn insert(conn: &mut PgConnection, shipment: &Shipment) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO shipments (
                shipment_id, customer_id, tracking_number, actual_weight_kg,
                charged_weight_kg, customs_value, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(shipment.id.as_uuid())
        .bind(shipment.customer_id.as_uuid())
        .bind(&shipment.tracking_number)
        .bind(shipment.actual_weight_kg)
        .bind(shipment.charged_weight_kg)
        .bind(shipment.customs_value)
        .bind(shipment.status.as_str())
        .bind(shipment.created_at)
        .bind(shipment.updated_at)
        .execute(&mut *conn)
        .await?;

        for (position, parcel) in shipment.boxes.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO shipment_boxes (box_id, shipment_id, position, length_cm, width_cm, height_cm)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(parcel.id.as_uuid())
            .bind(shipment.id.as_uuid())
            .bind(position as i32)
            .bind(parcel.length_cm)
            .bind(parcel.width_cm)
            .bind(parcel.height_cm)
            .execute(&mut *conn)
            .await?;
        }

        for (position, item) in shipment.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO product_invoice_items (shipment_id, position, description, pieces, unit_value)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(shipment.id.as_uuid())
            .bind(position as i32)
            .bind(&item.description)
            .bind(to_db_count(item.pieces, "product_invoice_items.pieces")?)
            .bind(item.unit_value)
            .execute(&mut *conn)
            .await?;
        }

        if let Some(input) = &shipment.billing_input {
            Self::upsert_billing_input(conn, shipment.id, input).await?;
        }

        Ok(())
    }

    /// Loads a shipment under a row lock
    pub async fn lock(conn: &mut PgConnection, id: ShipmentId) -> Result<Option<Shipment>, DatabaseError> {
        let row = sqlx::query_as::<_, ShipmentRow>(
            r#"
            SELECT shipment_id, customer_id, tracking_number, actual_weight_kg,
                   charged_weight_kg, customs_value, status, created_at, updated_at
            FROM shipments
            WHERE shipment_id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let boxes = sqlx::query_as::<_, ShipmentBoxRow>(
            r#"
            SELECT box_id, length_cm, width_cm, height_cm
            FROM shipment_boxes
            WHERE shipment_id = $1
            ORDER BY position
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;

        let items = sqlx::query_as::<_, ProductInvoiceItemRow>(
            r#"
            SELECT description, pieces, unit_value
            FROM product_invoice_items
            WHERE shipment_id = $1
            ORDER BY position
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;

        let input = sqlx::query_as::<_, BillingInvoiceInputRow>(
            r#"
            SELECT rate_per_kg, total_rate, e_form_charges, remote_area_charges,
                   box_charges, grand_total, payment_method
            FROM billing_invoice_inputs
            WHERE shipment_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;

        Ok(Some(Shipment {
            id: ShipmentId::from_uuid(row.shipment_id),
            customer_id: CustomerId::from_uuid(row.customer_id),
            tracking_number: row.tracking_number,
            actual_weight_kg: row.actual_weight_kg,
            charged_weight_kg: row.charged_weight_kg,
            customs_value: row.customs_value,
            status: row
                .status
                .parse::<ShipmentStatus>()
                .map_err(|e| DatabaseError::decode("shipments.status", e))?,
            boxes: boxes.into_iter().map(ShipmentBox::from).collect(),
            items: items
                .into_iter()
                .map(ProductInvoiceItem::try_from)
                .collect::<Result<Vec<_>, _>>()?,
            billing_input: input.map(BillingInvoiceInput::try_from).transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    pub async fn update_status(
        conn: &mut PgConnection,
        id: ShipmentId,
        status: ShipmentStatus,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE shipments SET status = $2, updated_at = now() WHERE shipment_id = $1",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Shipment", id));
        }
        Ok(())
    }

    /// Stores the computed charged weight and customs value
    pub async fn update_charges(
        conn: &mut PgConnection,
        id: ShipmentId,
        charged_weight_kg: Decimal,
        customs_value: Decimal,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE shipments
            SET charged_weight_kg = $2, customs_value = $3, updated_at = now()
            WHERE shipment_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(charged_weight_kg)
        .bind(customs_value)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Shipment", id));
        }
        Ok(())
    }

    pub async fn upsert_billing_input(
        conn: &mut PgConnection,
        id: ShipmentId,
        input: &BillingInvoiceInput,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO billing_invoice_inputs (
                shipment_id, rate_per_kg, total_rate, e_form_charges,
                remote_area_charges, box_charges, grand_total, payment_method
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (shipment_id) DO UPDATE SET
                rate_per_kg = EXCLUDED.rate_per_kg,
                total_rate = EXCLUDED.total_rate,
                e_form_charges = EXCLUDED.e_form_charges,
                remote_area_charges = EXCLUDED.remote_area_charges,
                box_charges = EXCLUDED.box_charges,
                grand_total = EXCLUDED.grand_total,
                payment_method = EXCLUDED.payment_method
            "#,
        )
        .bind(id.as_uuid())
        .bind(input.rate_per_kg)
        .bind(input.total_rate)
        .bind(input.e_form_charges)
        .bind(input.remote_area_charges)
        .bind(input.box_charges)
        .bind(input.grand_total)
        .bind(input.payment_method.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

/// Converts an unsigned count to the INTEGER column type
pub(crate) fn to_db_count(value: u32, column: &str) -> Result<i32, DatabaseError> {
    i32::try_from(value).map_err(|e| DatabaseError::decode(column, e))
}
