use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use uuid::Uuid;

use super::{fmt_ts, parse_date, parse_id, parse_ts};
use crate::db::DatabaseError;
use crate::models::*;

pub fn insert_medication(conn: &Connection, med: &Medication) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medications (id, name, unit_price_cents, reorder_level)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            med.id.to_string(),
            med.name,
            med.unit_price_cents,
            med.reorder_level,
        ],
    )?;
    Ok(())
}

pub fn get_medication(conn: &Connection, id: &Uuid) -> Result<Option<Medication>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, name, unit_price_cents, reorder_level FROM medications WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, name, unit_price_cents, reorder_level)| -> Result<Medication, DatabaseError> {
        Ok(Medication {
            id: parse_id("medications.id", &id)?,
            name,
            unit_price_cents,
            reorder_level,
        })
    })
    .transpose()
}

pub fn medication_name_taken(conn: &Connection, name: &str) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM medications WHERE name = ?1", params![name], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

const BATCH_COLUMNS: &str = "id, medication_id, batch_number, quantity_on_hand, expiry_date,
    cost_price_cents, supplier, received_at";

struct BatchRow {
    id: String,
    medication_id: String,
    batch_number: String,
    quantity_on_hand: i64,
    expiry_date: String,
    cost_price_cents: i64,
    supplier: Option<String>,
    received_at: String,
}

fn batch_row(row: &Row<'_>) -> rusqlite::Result<BatchRow> {
    Ok(BatchRow {
        id: row.get(0)?,
        medication_id: row.get(1)?,
        batch_number: row.get(2)?,
        quantity_on_hand: row.get(3)?,
        expiry_date: row.get(4)?,
        cost_price_cents: row.get(5)?,
        supplier: row.get(6)?,
        received_at: row.get(7)?,
    })
}

fn batch_from_row(row: BatchRow) -> Result<InventoryBatch, DatabaseError> {
    Ok(InventoryBatch {
        id: parse_id("inventory_batches.id", &row.id)?,
        medication_id: parse_id("inventory_batches.medication_id", &row.medication_id)?,
        batch_number: row.batch_number,
        quantity_on_hand: row.quantity_on_hand,
        expiry_date: parse_date("inventory_batches.expiry_date", &row.expiry_date)?,
        cost_price_cents: row.cost_price_cents,
        supplier: row.supplier,
        received_at: parse_ts("inventory_batches.received_at", &row.received_at)?,
    })
}

fn query_batches<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<InventoryBatch>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, batch_row)?;

    let mut batches = Vec::new();
    for row in rows {
        batches.push(batch_from_row(row?)?);
    }
    Ok(batches)
}

pub fn insert_batch(conn: &Connection, batch: &InventoryBatch) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO inventory_batches (id, medication_id, batch_number, quantity_on_hand,
         expiry_date, cost_price_cents, supplier, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            batch.id.to_string(),
            batch.medication_id.to_string(),
            batch.batch_number,
            batch.quantity_on_hand,
            batch.expiry_date.to_string(),
            batch.cost_price_cents,
            batch.supplier,
            fmt_ts(&batch.received_at),
        ],
    )?;
    Ok(())
}

/// Batches of a medication in FEFO order: soonest expiry first, then
/// earliest receipt. `only_in_stock` drops emptied batches.
pub fn list_batches_fefo(
    conn: &Connection,
    medication_id: &Uuid,
    only_in_stock: bool,
) -> Result<Vec<InventoryBatch>, DatabaseError> {
    let sql = format!(
        "SELECT {BATCH_COLUMNS} FROM inventory_batches
         WHERE medication_id = ?1 AND (?2 = 0 OR quantity_on_hand > 0)
         ORDER BY expiry_date ASC, received_at ASC, rowid ASC"
    );
    query_batches(conn, &sql, params![medication_id.to_string(), only_in_stock as i32])
}

/// Guarded decrement: succeeds only if the batch still holds `quantity`.
pub fn decrement_batch(conn: &Connection, id: &Uuid, quantity: i64) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE inventory_batches
         SET quantity_on_hand = quantity_on_hand - ?1
         WHERE id = ?2 AND quantity_on_hand >= ?1",
        params![quantity, id.to_string()],
    )?;
    Ok(changed == 1)
}

pub fn total_stock(conn: &Connection, medication_id: &Uuid) -> Result<i64, DatabaseError> {
    let total = conn.query_row(
        "SELECT COALESCE(SUM(quantity_on_hand), 0) FROM inventory_batches WHERE medication_id = ?1",
        params![medication_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Medications whose summed stock is at or below their reorder level.
pub fn low_stock_medications(conn: &Connection) -> Result<Vec<LowStockAlert>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.name, COALESCE(SUM(b.quantity_on_hand), 0), m.reorder_level
         FROM medications m LEFT JOIN inventory_batches b ON b.medication_id = m.id
         GROUP BY m.id, m.name, m.reorder_level
         HAVING COALESCE(SUM(b.quantity_on_hand), 0) <= m.reorder_level
         ORDER BY m.name ASC",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    let mut alerts = Vec::new();
    for row in rows {
        let (id, name, current_stock, reorder_level) = row?;
        alerts.push(LowStockAlert {
            medication_id: parse_id("medications.id", &id)?,
            name,
            current_stock,
            reorder_level,
        });
    }
    Ok(alerts)
}
