use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use uuid::Uuid;

use super::{fmt_ts, parse_id, parse_opt_id, parse_ts};
use crate::db::DatabaseError;
use crate::models::*;

// ─── Medical records ──────────────────────────────────────────────────────────

pub fn insert_medical_record(conn: &Connection, record: &MedicalRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medical_records (id, patient_ref, doctor_ref, appointment_id, visit_date,
         subjective, objective, assessment, plan)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.id.to_string(),
            record.patient_ref.to_string(),
            record.doctor_ref.to_string(),
            record.appointment_id.map(|id| id.to_string()),
            fmt_ts(&record.visit_date),
            record.soap.subjective,
            record.soap.objective,
            record.soap.assessment,
            record.soap.plan,
        ],
    )?;
    Ok(())
}

pub fn get_medical_record(conn: &Connection, id: &Uuid) -> Result<Option<MedicalRecord>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, patient_ref, doctor_ref, appointment_id, visit_date,
                    subjective, objective, assessment, plan
             FROM medical_records WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    SoapNote {
                        subjective: row.get(5)?,
                        objective: row.get(6)?,
                        assessment: row.get(7)?,
                        plan: row.get(8)?,
                    },
                ))
            },
        )
        .optional()?;

    row.map(
        |(id, patient_ref, doctor_ref, appointment_id, visit_date, soap)| -> Result<MedicalRecord, DatabaseError> {
            Ok(MedicalRecord {
                id: parse_id("medical_records.id", &id)?,
                patient_ref: parse_id("medical_records.patient_ref", &patient_ref)?,
                doctor_ref: parse_id("medical_records.doctor_ref", &doctor_ref)?,
                appointment_id: parse_opt_id("medical_records.appointment_id", appointment_id)?,
                visit_date: parse_ts("medical_records.visit_date", &visit_date)?,
                soap,
            })
        },
    )
    .transpose()
}

pub fn medical_record_exists_for_appointment(
    conn: &Connection,
    appointment_id: &Uuid,
) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM medical_records WHERE appointment_id = ?1",
            params![appointment_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

// ─── Prescriptions ────────────────────────────────────────────────────────────

const PRESCRIPTION_COLUMNS: &str = "id, medical_record_id, patient_ref, medication_name, dosage,
    frequency, duration_days, quantity, status, created_at";

struct PrescriptionRow {
    id: String,
    medical_record_id: String,
    patient_ref: String,
    medication_name: String,
    dosage: String,
    frequency: String,
    duration_days: i64,
    quantity: i64,
    status: String,
    created_at: String,
}

fn prescription_row(row: &Row<'_>) -> rusqlite::Result<PrescriptionRow> {
    Ok(PrescriptionRow {
        id: row.get(0)?,
        medical_record_id: row.get(1)?,
        patient_ref: row.get(2)?,
        medication_name: row.get(3)?,
        dosage: row.get(4)?,
        frequency: row.get(5)?,
        duration_days: row.get(6)?,
        quantity: row.get(7)?,
        status: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn prescription_from_row(row: PrescriptionRow) -> Result<Prescription, DatabaseError> {
    Ok(Prescription {
        id: parse_id("prescriptions.id", &row.id)?,
        medical_record_id: parse_id("prescriptions.medical_record_id", &row.medical_record_id)?,
        patient_ref: parse_id("prescriptions.patient_ref", &row.patient_ref)?,
        medication_name: row.medication_name,
        dosage: row.dosage,
        frequency: row.frequency,
        duration_days: row.duration_days,
        quantity: row.quantity,
        status: row.status.parse()?,
        created_at: parse_ts("prescriptions.created_at", &row.created_at)?,
    })
}

fn query_prescriptions<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Prescription>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, prescription_row)?;

    let mut prescriptions = Vec::new();
    for row in rows {
        prescriptions.push(prescription_from_row(row?)?);
    }
    Ok(prescriptions)
}

pub fn insert_prescription(conn: &Connection, rx: &Prescription) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO prescriptions (id, medical_record_id, patient_ref, medication_name, dosage,
         frequency, duration_days, quantity, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            rx.id.to_string(),
            rx.medical_record_id.to_string(),
            rx.patient_ref.to_string(),
            rx.medication_name,
            rx.dosage,
            rx.frequency,
            rx.duration_days,
            rx.quantity,
            rx.status.as_str(),
            fmt_ts(&rx.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_prescription(conn: &Connection, id: &Uuid) -> Result<Option<Prescription>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions WHERE id = ?1"),
            params![id.to_string()],
            prescription_row,
        )
        .optional()?;
    row.map(prescription_from_row).transpose()
}

pub fn list_prescriptions_for_record(
    conn: &Connection,
    medical_record_id: &Uuid,
) -> Result<Vec<Prescription>, DatabaseError> {
    query_prescriptions(
        conn,
        &format!(
            "SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions
             WHERE medical_record_id = ?1 ORDER BY created_at ASC, rowid ASC"
        ),
        params![medical_record_id.to_string()],
    )
}

/// Pharmacy queue: PENDING and REFILL_REQUESTED, oldest first.
pub fn list_dispensable_prescriptions(conn: &Connection) -> Result<Vec<Prescription>, DatabaseError> {
    query_prescriptions(
        conn,
        &format!(
            "SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions
             WHERE status IN (?1, ?2) ORDER BY created_at ASC, rowid ASC"
        ),
        params![
            PrescriptionStatus::Pending.as_str(),
            PrescriptionStatus::RefillRequested.as_str(),
        ],
    )
}

/// Compare-and-set on prescription status.
pub fn transition_prescription_status(
    conn: &Connection,
    id: &Uuid,
    expected: PrescriptionStatus,
    next: PrescriptionStatus,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE prescriptions SET status = ?1 WHERE id = ?2 AND status = ?3",
        params![next.as_str(), id.to_string(), expected.as_str()],
    )?;
    Ok(changed == 1)
}

// ─── Lab orders ───────────────────────────────────────────────────────────────

const LAB_ORDER_COLUMNS: &str = "id, medical_record_id, patient_ref, test_name, priority,
    clinical_indication, status, ordered_at";

struct LabOrderRow {
    id: String,
    medical_record_id: String,
    patient_ref: String,
    test_name: String,
    priority: String,
    clinical_indication: Option<String>,
    status: String,
    ordered_at: String,
}

fn lab_order_row(row: &Row<'_>) -> rusqlite::Result<LabOrderRow> {
    Ok(LabOrderRow {
        id: row.get(0)?,
        medical_record_id: row.get(1)?,
        patient_ref: row.get(2)?,
        test_name: row.get(3)?,
        priority: row.get(4)?,
        clinical_indication: row.get(5)?,
        status: row.get(6)?,
        ordered_at: row.get(7)?,
    })
}

fn lab_order_from_row(row: LabOrderRow) -> Result<LabOrder, DatabaseError> {
    Ok(LabOrder {
        id: parse_id("lab_orders.id", &row.id)?,
        medical_record_id: parse_id("lab_orders.medical_record_id", &row.medical_record_id)?,
        patient_ref: parse_id("lab_orders.patient_ref", &row.patient_ref)?,
        test_name: row.test_name,
        priority: row.priority.parse()?,
        clinical_indication: row.clinical_indication,
        status: row.status.parse()?,
        ordered_at: parse_ts("lab_orders.ordered_at", &row.ordered_at)?,
    })
}

fn query_lab_orders<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<LabOrder>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, lab_order_row)?;

    let mut orders = Vec::new();
    for row in rows {
        orders.push(lab_order_from_row(row?)?);
    }
    Ok(orders)
}

pub fn insert_lab_order(conn: &Connection, order: &LabOrder) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO lab_orders (id, medical_record_id, patient_ref, test_name, priority,
         clinical_indication, status, ordered_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            order.id.to_string(),
            order.medical_record_id.to_string(),
            order.patient_ref.to_string(),
            order.test_name,
            order.priority.as_str(),
            order.clinical_indication,
            order.status.as_str(),
            fmt_ts(&order.ordered_at),
        ],
    )?;
    Ok(())
}

pub fn list_lab_orders_for_record(
    conn: &Connection,
    medical_record_id: &Uuid,
) -> Result<Vec<LabOrder>, DatabaseError> {
    query_lab_orders(
        conn,
        &format!(
            "SELECT {LAB_ORDER_COLUMNS} FROM lab_orders
             WHERE medical_record_id = ?1 ORDER BY ordered_at ASC, rowid ASC"
        ),
        params![medical_record_id.to_string()],
    )
}

/// Lab work queue: STAT first, then URGENT, then ROUTINE; oldest first within each.
pub fn list_pending_lab_orders(conn: &Connection) -> Result<Vec<LabOrder>, DatabaseError> {
    query_lab_orders(
        conn,
        &format!(
            "SELECT {LAB_ORDER_COLUMNS} FROM lab_orders
             WHERE status = ?1
             ORDER BY CASE priority WHEN ?2 THEN 0 WHEN ?3 THEN 1 ELSE 2 END,
                      ordered_at ASC, rowid ASC"
        ),
        params![
            LabOrderStatus::Pending.as_str(),
            LabPriority::Stat.as_str(),
            LabPriority::Urgent.as_str(),
        ],
    )
}

// ─── Dispensings ──────────────────────────────────────────────────────────────

pub fn insert_dispensing(conn: &Connection, d: &Dispensing) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO dispensings (id, prescription_id, medication_id, batch_id, batch_number,
         quantity, dispensed_by, dispensed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            d.id.to_string(),
            d.prescription_id.to_string(),
            d.medication_id.to_string(),
            d.batch_id.to_string(),
            d.batch_number,
            d.quantity,
            d.dispensed_by.to_string(),
            fmt_ts(&d.dispensed_at),
        ],
    )?;
    Ok(())
}

pub fn list_dispensings_for_prescription(
    conn: &Connection,
    prescription_id: &Uuid,
) -> Result<Vec<Dispensing>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, prescription_id, medication_id, batch_id, batch_number, quantity,
                dispensed_by, dispensed_at
         FROM dispensings WHERE prescription_id = ?1
         ORDER BY dispensed_at ASC, rowid ASC",
    )?;

    let rows = stmt.query_map(params![prescription_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, i64>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;

    let mut dispensings = Vec::new();
    for row in rows {
        let (id, prescription_id, medication_id, batch_id, batch_number, quantity, by, at) = row?;
        dispensings.push(Dispensing {
            id: parse_id("dispensings.id", &id)?,
            prescription_id: parse_id("dispensings.prescription_id", &prescription_id)?,
            medication_id: parse_id("dispensings.medication_id", &medication_id)?,
            batch_id: parse_id("dispensings.batch_id", &batch_id)?,
            batch_number,
            quantity,
            dispensed_by: parse_id("dispensings.dispensed_by", &by)?,
            dispensed_at: parse_ts("dispensings.dispensed_at", &at)?,
        });
    }
    Ok(dispensings)
}
