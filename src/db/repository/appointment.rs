use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use uuid::Uuid;

use super::{fmt_ts, parse_id, parse_ts};
use crate::db::DatabaseError;
use crate::models::*;

const APPOINTMENT_COLUMNS: &str = "id, patient_ref, doctor_ref, start_time, end_time,
    appointment_type, reason, status, created_at, updated_at";

struct AppointmentRow {
    id: String,
    patient_ref: String,
    doctor_ref: String,
    start_time: String,
    end_time: String,
    appointment_type: String,
    reason: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

fn appointment_row(row: &Row<'_>) -> rusqlite::Result<AppointmentRow> {
    Ok(AppointmentRow {
        id: row.get(0)?,
        patient_ref: row.get(1)?,
        doctor_ref: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        appointment_type: row.get(5)?,
        reason: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn appointment_from_row(row: AppointmentRow) -> Result<Appointment, DatabaseError> {
    Ok(Appointment {
        id: parse_id("appointments.id", &row.id)?,
        patient_ref: parse_id("appointments.patient_ref", &row.patient_ref)?,
        doctor_ref: parse_id("appointments.doctor_ref", &row.doctor_ref)?,
        start_time: parse_ts("appointments.start_time", &row.start_time)?,
        end_time: parse_ts("appointments.end_time", &row.end_time)?,
        appointment_type: row.appointment_type.parse()?,
        reason: row.reason,
        status: row.status.parse()?,
        created_at: parse_ts("appointments.created_at", &row.created_at)?,
        updated_at: parse_ts("appointments.updated_at", &row.updated_at)?,
    })
}

fn query_appointments<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Appointment>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, appointment_row)?;

    let mut appointments = Vec::new();
    for row in rows {
        appointments.push(appointment_from_row(row?)?);
    }
    Ok(appointments)
}

pub fn insert_appointment(conn: &Connection, appt: &Appointment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO appointments (id, patient_ref, doctor_ref, start_time, end_time,
         appointment_type, reason, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            appt.id.to_string(),
            appt.patient_ref.to_string(),
            appt.doctor_ref.to_string(),
            fmt_ts(&appt.start_time),
            fmt_ts(&appt.end_time),
            appt.appointment_type.as_str(),
            appt.reason,
            appt.status.as_str(),
            fmt_ts(&appt.created_at),
            fmt_ts(&appt.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_appointment(conn: &Connection, id: &Uuid) -> Result<Option<Appointment>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
            params![id.to_string()],
            appointment_row,
        )
        .optional()?;
    row.map(appointment_from_row).transpose()
}

/// First non-cancelled appointment of `doctor_ref` overlapping `[start, end)`.
///
/// Half-open test: `existing.start < end AND existing.end > start`.
/// `exclude` skips one appointment (the one being rescheduled).
pub fn find_overlapping_appointment(
    conn: &Connection,
    doctor_ref: &Uuid,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    exclude: Option<&Uuid>,
) -> Result<Option<Appointment>, DatabaseError> {
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE doctor_ref = ?1
           AND status != ?2
           AND start_time < ?3
           AND end_time > ?4
           AND (?5 IS NULL OR id != ?5)
         ORDER BY start_time ASC
         LIMIT 1"
    );
    let found = query_appointments(
        conn,
        &sql,
        params![
            doctor_ref.to_string(),
            AppointmentStatus::Cancelled.as_str(),
            fmt_ts(end),
            fmt_ts(start),
            exclude.map(|id| id.to_string()),
        ],
    )?;
    Ok(found.into_iter().next())
}

pub fn update_appointment_status(
    conn: &Connection,
    id: &Uuid,
    status: AppointmentStatus,
    updated_at: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE appointments SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), fmt_ts(updated_at), id.to_string()],
    )?;
    Ok(())
}

pub fn update_appointment_slot(
    conn: &Connection,
    id: &Uuid,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    status: AppointmentStatus,
    updated_at: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE appointments
         SET start_time = ?1, end_time = ?2, status = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            fmt_ts(start),
            fmt_ts(end),
            status.as_str(),
            fmt_ts(updated_at),
            id.to_string(),
        ],
    )?;
    Ok(())
}

/// A doctor's appointments starting in `[from, to)`, earliest first.
pub fn list_doctor_appointments(
    conn: &Connection,
    doctor_ref: &Uuid,
    from: &DateTime<Utc>,
    to: &DateTime<Utc>,
) -> Result<Vec<Appointment>, DatabaseError> {
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE doctor_ref = ?1 AND start_time >= ?2 AND start_time < ?3
         ORDER BY start_time ASC"
    );
    query_appointments(
        conn,
        &sql,
        params![doctor_ref.to_string(), fmt_ts(from), fmt_ts(to)],
    )
}

/// All non-cancelled appointments of a doctor, earliest first.
pub fn list_active_doctor_appointments(
    conn: &Connection,
    doctor_ref: &Uuid,
) -> Result<Vec<Appointment>, DatabaseError> {
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE doctor_ref = ?1 AND status != ?2
         ORDER BY start_time ASC"
    );
    query_appointments(
        conn,
        &sql,
        params![doctor_ref.to_string(), AppointmentStatus::Cancelled.as_str()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn make(conn: &Connection, doctor: Uuid, start: DateTime<Utc>, minutes: i64, status: AppointmentStatus) -> Uuid {
        let appt = Appointment {
            id: Uuid::new_v4(),
            patient_ref: Uuid::new_v4(),
            doctor_ref: doctor,
            start_time: start,
            end_time: start + Duration::minutes(minutes),
            appointment_type: AppointmentType::Consultation,
            reason: None,
            status,
            created_at: at(8, 0),
            updated_at: at(8, 0),
        };
        insert_appointment(conn, &appt).unwrap();
        appt.id
    }

    #[test]
    fn insert_and_retrieve() {
        let conn = open_memory_database().unwrap();
        let doctor = Uuid::new_v4();
        let id = make(&conn, doctor, at(9, 0), 30, AppointmentStatus::Confirmed);
        let appt = get_appointment(&conn, &id).unwrap().unwrap();
        assert_eq!(appt.doctor_ref, doctor);
        assert_eq!(appt.start_time, at(9, 0));
        assert_eq!(appt.end_time, at(9, 30));
        assert_eq!(appt.status, AppointmentStatus::Confirmed);
    }

    #[test]
    fn overlap_query_uses_half_open_intervals() {
        let conn = open_memory_database().unwrap();
        let doctor = Uuid::new_v4();
        make(&conn, doctor, at(9, 0), 30, AppointmentStatus::Confirmed);

        assert!(find_overlapping_appointment(&conn, &doctor, &at(9, 15), &at(9, 45), None)
            .unwrap()
            .is_some());
        assert!(find_overlapping_appointment(&conn, &doctor, &at(8, 30), &at(9, 0), None)
            .unwrap()
            .is_none());
        assert!(find_overlapping_appointment(&conn, &doctor, &at(9, 30), &at(10, 0), None)
            .unwrap()
            .is_none());
        assert!(find_overlapping_appointment(&conn, &doctor, &at(8, 0), &at(11, 0), None)
            .unwrap()
            .is_some());
    }

    #[test]
    fn overlap_ignores_cancelled_other_doctors_and_excluded_id() {
        let conn = open_memory_database().unwrap();
        let doctor = Uuid::new_v4();
        let cancelled = make(&conn, doctor, at(9, 0), 30, AppointmentStatus::Cancelled);
        make(&conn, Uuid::new_v4(), at(9, 0), 30, AppointmentStatus::Confirmed);
        assert!(find_overlapping_appointment(&conn, &doctor, &at(9, 0), &at(9, 30), None)
            .unwrap()
            .is_none());

        let own = make(&conn, doctor, at(11, 0), 30, AppointmentStatus::Requested);
        assert!(find_overlapping_appointment(&conn, &doctor, &at(11, 10), &at(11, 40), Some(&own))
            .unwrap()
            .is_none());
        assert_ne!(cancelled, own);
    }

    #[test]
    fn inverted_interval_violates_check_constraint() {
        let conn = open_memory_database().unwrap();
        let appt = Appointment {
            id: Uuid::new_v4(),
            patient_ref: Uuid::new_v4(),
            doctor_ref: Uuid::new_v4(),
            start_time: at(10, 0),
            end_time: at(9, 0),
            appointment_type: AppointmentType::FollowUp,
            reason: None,
            status: AppointmentStatus::Confirmed,
            created_at: at(8, 0),
            updated_at: at(8, 0),
        };
        assert!(insert_appointment(&conn, &appt).is_err());
    }

    #[test]
    fn list_doctor_appointments_orders_by_start() {
        let conn = open_memory_database().unwrap();
        let doctor = Uuid::new_v4();
        make(&conn, doctor, at(14, 0), 30, AppointmentStatus::Confirmed);
        make(&conn, doctor, at(9, 0), 30, AppointmentStatus::Requested);
        make(&conn, doctor, at(11, 0), 30, AppointmentStatus::Cancelled);

        let day = list_doctor_appointments(&conn, &doctor, &at(0, 0), &(at(0, 0) + Duration::days(1))).unwrap();
        let starts: Vec<_> = day.iter().map(|a| a.start_time).collect();
        assert_eq!(starts, vec![at(9, 0), at(11, 0), at(14, 0)]);

        let active = list_active_doctor_appointments(&conn, &doctor).unwrap();
        assert_eq!(active.len(), 2);
    }
}
