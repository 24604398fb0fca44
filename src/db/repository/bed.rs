use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{fmt_ts, parse_date, parse_id, parse_ts};
use crate::db::DatabaseError;
use crate::models::*;

pub fn insert_ward(conn: &Connection, ward: &Ward) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO wards (id, name, capacity) VALUES (?1, ?2, ?3)",
        params![ward.id.to_string(), ward.name, ward.capacity],
    )?;
    Ok(())
}

pub fn get_ward(conn: &Connection, id: &Uuid) -> Result<Option<Ward>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, name, capacity FROM wards WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, name, capacity)| -> Result<Ward, DatabaseError> {
        Ok(Ward {
            id: parse_id("wards.id", &id)?,
            name,
            capacity,
        })
    })
    .transpose()
}

pub fn ward_name_taken(conn: &Connection, name: &str) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM wards WHERE name = ?1", params![name], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub fn count_beds_in_ward(conn: &Connection, ward_id: &Uuid) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM beds WHERE ward_id = ?1",
        params![ward_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn insert_bed(conn: &Connection, bed: &Bed) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO beds (id, ward_id, number, status) VALUES (?1, ?2, ?3, ?4)",
        params![
            bed.id.to_string(),
            bed.ward_id.to_string(),
            bed.number,
            bed.status.as_str(),
        ],
    )?;
    Ok(())
}

pub fn get_bed(conn: &Connection, id: &Uuid) -> Result<Option<Bed>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, ward_id, number, status FROM beds WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, ward_id, number, status)| -> Result<Bed, DatabaseError> {
        Ok(Bed {
            id: parse_id("beds.id", &id)?,
            ward_id: parse_id("beds.ward_id", &ward_id)?,
            number,
            status: status.parse()?,
        })
    })
    .transpose()
}

pub fn bed_number_taken(conn: &Connection, ward_id: &Uuid, number: &str) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM beds WHERE ward_id = ?1 AND number = ?2",
            params![ward_id.to_string(), number],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Beds of one ward ordered by bed number.
pub fn list_beds_in_ward(conn: &Connection, ward_id: &Uuid) -> Result<Vec<Bed>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, ward_id, number, status FROM beds WHERE ward_id = ?1 ORDER BY number ASC",
    )?;
    let rows = stmt.query_map(params![ward_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut beds = Vec::new();
    for row in rows {
        let (id, ward_id, number, status) = row?;
        beds.push(Bed {
            id: parse_id("beds.id", &id)?,
            ward_id: parse_id("beds.ward_id", &ward_id)?,
            number,
            status: status.parse()?,
        });
    }
    Ok(beds)
}

/// Compare-and-set on bed status. Returns false when the bed was not in
/// `expected`, which the caller treats as a lost race.
pub fn transition_bed_status(
    conn: &Connection,
    id: &Uuid,
    expected: BedStatus,
    next: BedStatus,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE beds SET status = ?1 WHERE id = ?2 AND status = ?3",
        params![next.as_str(), id.to_string(), expected.as_str()],
    )?;
    Ok(changed == 1)
}

const ADMISSION_COLUMNS: &str = "id, patient_ref, bed_id, reason, status, admitted_by,
    admission_date, estimated_discharge_date, discharge_date";

struct AdmissionRow {
    id: String,
    patient_ref: String,
    bed_id: String,
    reason: String,
    status: String,
    admitted_by: String,
    admission_date: String,
    estimated_discharge_date: Option<String>,
    discharge_date: Option<String>,
}

fn admission_row(row: &Row<'_>) -> rusqlite::Result<AdmissionRow> {
    Ok(AdmissionRow {
        id: row.get(0)?,
        patient_ref: row.get(1)?,
        bed_id: row.get(2)?,
        reason: row.get(3)?,
        status: row.get(4)?,
        admitted_by: row.get(5)?,
        admission_date: row.get(6)?,
        estimated_discharge_date: row.get(7)?,
        discharge_date: row.get(8)?,
    })
}

fn admission_from_row(row: AdmissionRow) -> Result<Admission, DatabaseError> {
    Ok(Admission {
        id: parse_id("admissions.id", &row.id)?,
        patient_ref: parse_id("admissions.patient_ref", &row.patient_ref)?,
        bed_id: parse_id("admissions.bed_id", &row.bed_id)?,
        reason: row.reason,
        status: row.status.parse()?,
        admitted_by: parse_id("admissions.admitted_by", &row.admitted_by)?,
        admission_date: parse_ts("admissions.admission_date", &row.admission_date)?,
        estimated_discharge_date: row
            .estimated_discharge_date
            .as_deref()
            .map(|d| parse_date("admissions.estimated_discharge_date", d))
            .transpose()?,
        discharge_date: row
            .discharge_date
            .as_deref()
            .map(|d| parse_ts("admissions.discharge_date", d))
            .transpose()?,
    })
}

pub fn insert_admission(conn: &Connection, admission: &Admission) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO admissions (id, patient_ref, bed_id, reason, status, admitted_by,
         admission_date, estimated_discharge_date, discharge_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            admission.id.to_string(),
            admission.patient_ref.to_string(),
            admission.bed_id.to_string(),
            admission.reason,
            admission.status.as_str(),
            admission.admitted_by.to_string(),
            fmt_ts(&admission.admission_date),
            admission.estimated_discharge_date.map(|d| d.to_string()),
            admission.discharge_date.as_ref().map(fmt_ts),
        ],
    )?;
    Ok(())
}

pub fn get_admission(conn: &Connection, id: &Uuid) -> Result<Option<Admission>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {ADMISSION_COLUMNS} FROM admissions WHERE id = ?1"),
            params![id.to_string()],
            admission_row,
        )
        .optional()?;
    row.map(admission_from_row).transpose()
}

pub fn find_active_admission_for_patient(
    conn: &Connection,
    patient_ref: &Uuid,
) -> Result<Option<Admission>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {ADMISSION_COLUMNS} FROM admissions WHERE patient_ref = ?1 AND status = ?2"),
            params![patient_ref.to_string(), AdmissionStatus::Admitted.as_str()],
            admission_row,
        )
        .optional()?;
    row.map(admission_from_row).transpose()
}

#[cfg(test)]
pub fn count_active_admissions_for_bed(conn: &Connection, bed_id: &Uuid) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM admissions WHERE bed_id = ?1 AND status = ?2",
        params![bed_id.to_string(), AdmissionStatus::Admitted.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// ADMITTED admissions on any bed of the ward.
pub fn list_active_admissions_in_ward(
    conn: &Connection,
    ward_id: &Uuid,
) -> Result<Vec<Admission>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.patient_ref, a.bed_id, a.reason, a.status, a.admitted_by,
                a.admission_date, a.estimated_discharge_date, a.discharge_date
         FROM admissions a JOIN beds b ON b.id = a.bed_id
         WHERE b.ward_id = ?1 AND a.status = ?2",
    )?;
    let rows = stmt.query_map(
        params![ward_id.to_string(), AdmissionStatus::Admitted.as_str()],
        admission_row,
    )?;

    let mut admissions = Vec::new();
    for row in rows {
        admissions.push(admission_from_row(row?)?);
    }
    Ok(admissions)
}

/// Close an ADMITTED admission. Returns false if it was not ADMITTED.
pub fn close_admission(
    conn: &Connection,
    id: &Uuid,
    discharged_at: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE admissions SET status = ?1, discharge_date = ?2 WHERE id = ?3 AND status = ?4",
        params![
            AdmissionStatus::Discharged.as_str(),
            fmt_ts(discharged_at),
            id.to_string(),
            AdmissionStatus::Admitted.as_str(),
        ],
    )?;
    Ok(changed == 1)
}

/// Per-ward bed counts, wards ordered by name.
pub fn ward_occupancy(conn: &Connection) -> Result<Vec<WardOccupancy>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT w.id, w.name, w.capacity,
                COUNT(b.id),
                COALESCE(SUM(CASE WHEN b.status = ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN b.status = ?2 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN b.status = ?3 THEN 1 ELSE 0 END), 0)
         FROM wards w LEFT JOIN beds b ON b.ward_id = w.id
         GROUP BY w.id, w.name, w.capacity
         ORDER BY w.name ASC",
    )?;

    let rows = stmt.query_map(
        params![
            BedStatus::Occupied.as_str(),
            BedStatus::VacantClean.as_str(),
            BedStatus::VacantDirty.as_str(),
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        },
    )?;

    let mut wards = Vec::new();
    for row in rows {
        let (id, name, capacity, total, occupied, available, dirty) = row?;
        wards.push(WardOccupancy {
            ward_id: parse_id("wards.id", &id)?,
            name,
            capacity,
            total,
            occupied,
            available,
            dirty,
        });
    }
    Ok(wards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::TimeZone;

    fn ward_with_bed(conn: &Connection) -> (Uuid, Uuid) {
        let ward = Ward {
            id: Uuid::new_v4(),
            name: "General".into(),
            capacity: 2,
        };
        insert_ward(conn, &ward).unwrap();
        let bed = Bed {
            id: Uuid::new_v4(),
            ward_id: ward.id,
            number: "G-1".into(),
            status: BedStatus::VacantClean,
        };
        insert_bed(conn, &bed).unwrap();
        (ward.id, bed.id)
    }

    fn admission(bed_id: Uuid, patient: Uuid) -> Admission {
        Admission {
            id: Uuid::new_v4(),
            patient_ref: patient,
            bed_id,
            reason: "Observation".into(),
            status: AdmissionStatus::Admitted,
            admitted_by: Uuid::new_v4(),
            admission_date: Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap(),
            estimated_discharge_date: None,
            discharge_date: None,
        }
    }

    #[test]
    fn bed_status_compare_and_set() {
        let conn = open_memory_database().unwrap();
        let (_, bed_id) = ward_with_bed(&conn);
        assert!(transition_bed_status(&conn, &bed_id, BedStatus::VacantClean, BedStatus::Occupied).unwrap());
        assert!(!transition_bed_status(&conn, &bed_id, BedStatus::VacantClean, BedStatus::Occupied).unwrap());
        assert_eq!(get_bed(&conn, &bed_id).unwrap().unwrap().status, BedStatus::Occupied);
    }

    #[test]
    fn unique_index_blocks_second_active_admission_per_bed() {
        let conn = open_memory_database().unwrap();
        let (_, bed_id) = ward_with_bed(&conn);
        insert_admission(&conn, &admission(bed_id, Uuid::new_v4())).unwrap();
        assert!(insert_admission(&conn, &admission(bed_id, Uuid::new_v4())).is_err());
    }

    #[test]
    fn unique_index_blocks_second_active_admission_per_patient() {
        let conn = open_memory_database().unwrap();
        let (ward_id, bed_id) = ward_with_bed(&conn);
        let other_bed = Bed {
            id: Uuid::new_v4(),
            ward_id,
            number: "G-2".into(),
            status: BedStatus::VacantClean,
        };
        insert_bed(&conn, &other_bed).unwrap();

        let patient = Uuid::new_v4();
        insert_admission(&conn, &admission(bed_id, patient)).unwrap();
        assert!(insert_admission(&conn, &admission(other_bed.id, patient)).is_err());
    }

    #[test]
    fn close_admission_only_once() {
        let conn = open_memory_database().unwrap();
        let (_, bed_id) = ward_with_bed(&conn);
        let adm = admission(bed_id, Uuid::new_v4());
        insert_admission(&conn, &adm).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 2, 3, 10, 0, 0).unwrap();

        assert!(close_admission(&conn, &adm.id, &now).unwrap());
        assert!(!close_admission(&conn, &adm.id, &now).unwrap());

        let stored = get_admission(&conn, &adm.id).unwrap().unwrap();
        assert_eq!(stored.status, AdmissionStatus::Discharged);
        assert_eq!(stored.discharge_date, Some(now));
        assert_eq!(count_active_admissions_for_bed(&conn, &bed_id).unwrap(), 0);
    }

    #[test]
    fn ward_listing_orders_beds_and_finds_active_admissions() {
        let conn = open_memory_database().unwrap();
        let (ward_id, bed_id) = ward_with_bed(&conn);
        let first = Bed {
            id: Uuid::new_v4(),
            ward_id,
            number: "G-0".into(),
            status: BedStatus::VacantClean,
        };
        insert_bed(&conn, &first).unwrap();

        let active = admission(bed_id, Uuid::new_v4());
        insert_admission(&conn, &active).unwrap();
        let closed = admission(first.id, Uuid::new_v4());
        insert_admission(&conn, &closed).unwrap();
        close_admission(&conn, &closed.id, &Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap()).unwrap();

        let numbers: Vec<_> = list_beds_in_ward(&conn, &ward_id)
            .unwrap()
            .into_iter()
            .map(|b| b.number)
            .collect();
        assert_eq!(numbers, vec!["G-0", "G-1"]);

        let admissions = list_active_admissions_in_ward(&conn, &ward_id).unwrap();
        assert_eq!(admissions, vec![active]);
        assert!(list_beds_in_ward(&conn, &Uuid::new_v4()).unwrap().is_empty());
    }

    #[test]
    fn occupancy_counts_each_status() {
        let conn = open_memory_database().unwrap();
        let (ward_id, bed_id) = ward_with_bed(&conn);
        let dirty = Bed {
            id: Uuid::new_v4(),
            ward_id,
            number: "G-2".into(),
            status: BedStatus::VacantDirty,
        };
        insert_bed(&conn, &dirty).unwrap();
        transition_bed_status(&conn, &bed_id, BedStatus::VacantClean, BedStatus::Occupied).unwrap();

        let stats = ward_occupancy(&conn).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].total, 2);
        assert_eq!(stats[0].occupied, 1);
        assert_eq!(stats[0].dirty, 1);
        assert_eq!(stats[0].available, 0);
    }
}
