use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{fmt_ts, parse_id, parse_opt_id, parse_ts};
use crate::db::DatabaseError;
use crate::models::*;

const INVOICE_COLUMNS: &str = "id, invoice_number, patient_ref, medical_record_id, items,
    subtotal_cents, tax_cents, total_cents, amount_paid_cents, balance_cents, status,
    created_at, updated_at";

struct InvoiceRow {
    id: String,
    invoice_number: String,
    patient_ref: String,
    medical_record_id: Option<String>,
    items: String,
    subtotal_cents: i64,
    tax_cents: i64,
    total_cents: i64,
    amount_paid_cents: i64,
    balance_cents: i64,
    status: String,
    created_at: String,
    updated_at: String,
}

fn invoice_row(row: &Row<'_>) -> rusqlite::Result<InvoiceRow> {
    Ok(InvoiceRow {
        id: row.get(0)?,
        invoice_number: row.get(1)?,
        patient_ref: row.get(2)?,
        medical_record_id: row.get(3)?,
        items: row.get(4)?,
        subtotal_cents: row.get(5)?,
        tax_cents: row.get(6)?,
        total_cents: row.get(7)?,
        amount_paid_cents: row.get(8)?,
        balance_cents: row.get(9)?,
        status: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn invoice_from_row(row: InvoiceRow) -> Result<Invoice, DatabaseError> {
    let items: Vec<InvoiceItem> =
        serde_json::from_str(&row.items).map_err(|e| DatabaseError::InvalidJson {
            field: "invoices.items".into(),
            reason: e.to_string(),
        })?;

    Ok(Invoice {
        id: parse_id("invoices.id", &row.id)?,
        invoice_number: row.invoice_number,
        patient_ref: parse_id("invoices.patient_ref", &row.patient_ref)?,
        medical_record_id: parse_opt_id("invoices.medical_record_id", row.medical_record_id)?,
        items,
        subtotal_cents: row.subtotal_cents,
        tax_cents: row.tax_cents,
        total_cents: row.total_cents,
        amount_paid_cents: row.amount_paid_cents,
        balance_cents: row.balance_cents,
        status: row.status.parse()?,
        created_at: parse_ts("invoices.created_at", &row.created_at)?,
        updated_at: parse_ts("invoices.updated_at", &row.updated_at)?,
    })
}

pub fn insert_invoice(conn: &Connection, invoice: &Invoice) -> Result<(), DatabaseError> {
    let items = serde_json::to_string(&invoice.items).map_err(|e| DatabaseError::InvalidJson {
        field: "invoices.items".into(),
        reason: e.to_string(),
    })?;

    conn.execute(
        "INSERT INTO invoices (id, invoice_number, patient_ref, medical_record_id, items,
         subtotal_cents, tax_cents, total_cents, amount_paid_cents, balance_cents, status,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            invoice.id.to_string(),
            invoice.invoice_number,
            invoice.patient_ref.to_string(),
            invoice.medical_record_id.map(|id| id.to_string()),
            items,
            invoice.subtotal_cents,
            invoice.tax_cents,
            invoice.total_cents,
            invoice.amount_paid_cents,
            invoice.balance_cents,
            invoice.status.as_str(),
            fmt_ts(&invoice.created_at),
            fmt_ts(&invoice.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_invoice(conn: &Connection, id: &Uuid) -> Result<Option<Invoice>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1"),
            params![id.to_string()],
            invoice_row,
        )
        .optional()?;
    row.map(invoice_from_row).transpose()
}

/// A patient's invoices, newest first.
pub fn list_invoices_for_patient(
    conn: &Connection,
    patient_ref: &Uuid,
) -> Result<Vec<Invoice>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE patient_ref = ?1
         ORDER BY created_at DESC, rowid DESC"
    ))?;
    let rows = stmt.query_map(params![patient_ref.to_string()], invoice_row)?;

    let mut invoices = Vec::new();
    for row in rows {
        invoices.push(invoice_from_row(row?)?);
    }
    Ok(invoices)
}

/// Number of invoices issued so far; feeds the invoice number sequence.
pub fn count_invoices(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM invoices", [], |row| row.get(0))?;
    Ok(count)
}

/// Writes the payment-derived columns, guarded on the previously read
/// `amount_paid_cents` so a stale writer changes nothing.
pub fn update_invoice_payment_state(
    conn: &Connection,
    id: &Uuid,
    expected_paid_cents: i64,
    amount_paid_cents: i64,
    balance_cents: i64,
    status: InvoiceStatus,
    updated_at: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE invoices
         SET amount_paid_cents = ?1, balance_cents = ?2, status = ?3, updated_at = ?4
         WHERE id = ?5 AND amount_paid_cents = ?6",
        params![
            amount_paid_cents,
            balance_cents,
            status.as_str(),
            fmt_ts(updated_at),
            id.to_string(),
            expected_paid_cents,
        ],
    )?;
    Ok(changed == 1)
}

pub fn insert_payment(conn: &Connection, payment: &Payment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO payments (id, invoice_id, amount_cents, method, status,
         transaction_reference, processed_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            payment.id.to_string(),
            payment.invoice_id.to_string(),
            payment.amount_cents,
            payment.method.as_str(),
            payment.status.as_str(),
            payment.transaction_reference,
            payment.processed_by.to_string(),
            fmt_ts(&payment.created_at),
        ],
    )?;
    Ok(())
}

pub fn list_payments_for_invoice(
    conn: &Connection,
    invoice_id: &Uuid,
) -> Result<Vec<Payment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, invoice_id, amount_cents, method, status, transaction_reference,
                processed_by, created_at
         FROM payments WHERE invoice_id = ?1
         ORDER BY created_at ASC, rowid ASC",
    )?;

    let rows = stmt.query_map(params![invoice_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;

    let mut payments = Vec::new();
    for row in rows {
        let (id, invoice_id, amount_cents, method, status, reference, processed_by, created_at) = row?;
        payments.push(Payment {
            id: parse_id("payments.id", &id)?,
            invoice_id: parse_id("payments.invoice_id", &invoice_id)?,
            amount_cents,
            method: method.parse()?,
            status: status.parse()?,
            transaction_reference: reference,
            processed_by: parse_id("payments.processed_by", &processed_by)?,
            created_at: parse_ts("payments.created_at", &created_at)?,
        });
    }
    Ok(payments)
}

pub fn sum_payments(conn: &Connection, invoice_id: &Uuid) -> Result<i64, DatabaseError> {
    let total = conn.query_row(
        "SELECT COALESCE(SUM(amount_cents), 0) FROM payments WHERE invoice_id = ?1",
        params![invoice_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap()
    }

    fn invoice(conn: &Connection, number: &str, total: i64) -> Invoice {
        let inv = Invoice {
            id: Uuid::new_v4(),
            invoice_number: number.into(),
            patient_ref: Uuid::new_v4(),
            medical_record_id: None,
            items: vec![InvoiceItem {
                description: "Consultation fee".into(),
                quantity: 1,
                unit_price_cents: total,
            }],
            subtotal_cents: total,
            tax_cents: 0,
            total_cents: total,
            amount_paid_cents: 0,
            balance_cents: total,
            status: InvoiceStatus::Issued,
            created_at: now(),
            updated_at: now(),
        };
        insert_invoice(conn, &inv).unwrap();
        inv
    }

    #[test]
    fn invoice_items_round_trip_through_json_column() {
        let conn = open_memory_database().unwrap();
        let inv = invoice(&conn, "INV-1", 10_000);
        let stored = get_invoice(&conn, &inv.id).unwrap().unwrap();
        assert_eq!(stored, inv);
        assert_eq!(count_invoices(&conn).unwrap(), 1);
    }

    #[test]
    fn patient_invoices_listed_newest_first() {
        let conn = open_memory_database().unwrap();
        let patient = Uuid::new_v4();
        let mut ids = Vec::new();
        for day in 0..3 {
            let inv = invoice(&conn, &format!("INV-{day}"), 100);
            conn.execute(
                "UPDATE invoices SET patient_ref = ?1, created_at = ?2 WHERE id = ?3",
                params![
                    patient.to_string(),
                    fmt_ts(&(now() + chrono::Duration::days(day))),
                    inv.id.to_string()
                ],
            )
            .unwrap();
            ids.push(inv.id);
        }
        invoice(&conn, "INV-other", 100);

        let listed: Vec<_> = list_invoices_for_patient(&conn, &patient)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        ids.reverse();
        assert_eq!(listed, ids);
    }

    #[test]
    fn duplicate_invoice_number_is_rejected() {
        let conn = open_memory_database().unwrap();
        invoice(&conn, "INV-1", 100);
        let mut dup = invoice(&conn, "INV-2", 100);
        dup.id = Uuid::new_v4();
        dup.invoice_number = "INV-1".into();
        assert!(insert_invoice(&conn, &dup).is_err());
    }

    #[test]
    fn corrupt_items_column_surfaces_invalid_json() {
        let conn = open_memory_database().unwrap();
        let inv = invoice(&conn, "INV-1", 100);
        conn.execute(
            "UPDATE invoices SET items = 'not json' WHERE id = ?1",
            params![inv.id.to_string()],
        )
        .unwrap();
        assert!(matches!(
            get_invoice(&conn, &inv.id),
            Err(DatabaseError::InvalidJson { .. })
        ));
    }

    #[test]
    fn stale_payment_state_update_changes_nothing() {
        let conn = open_memory_database().unwrap();
        let inv = invoice(&conn, "INV-1", 100);
        assert!(update_invoice_payment_state(&conn, &inv.id, 0, 60, 40, InvoiceStatus::Partial, &now()).unwrap());
        assert!(!update_invoice_payment_state(&conn, &inv.id, 0, 60, 40, InvoiceStatus::Partial, &now()).unwrap());
        let stored = get_invoice(&conn, &inv.id).unwrap().unwrap();
        assert_eq!(stored.amount_paid_cents, 60);
        assert_eq!(stored.status, InvoiceStatus::Partial);
    }

    #[test]
    fn payments_listed_in_order_and_summed() {
        let conn = open_memory_database().unwrap();
        let inv = invoice(&conn, "INV-1", 100);
        for (i, amount) in [60, 40].into_iter().enumerate() {
            insert_payment(
                &conn,
                &Payment {
                    id: Uuid::new_v4(),
                    invoice_id: inv.id,
                    amount_cents: amount,
                    method: PaymentMethod::Cash,
                    status: PaymentStatus::Completed,
                    transaction_reference: format!("TX-{i}"),
                    processed_by: Uuid::new_v4(),
                    created_at: now() + chrono::Duration::minutes(i as i64),
                },
            )
            .unwrap();
        }
        let payments = list_payments_for_invoice(&conn, &inv.id).unwrap();
        assert_eq!(payments.iter().map(|p| p.amount_cents).collect::<Vec<_>>(), vec![60, 40]);
        assert_eq!(sum_payments(&conn, &inv.id).unwrap(), 100);
    }
}
