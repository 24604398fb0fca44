//! Bed allocation: wards, beds and admissions.
//!
//! A bed is OCCUPIED exactly when one ADMITTED admission points at it. Admit
//! and discharge change the admission and the bed in one transaction, and
//! every bed status write is a compare-and-set on the status that was read.

use std::sync::Arc;

use chrono::NaiveDate;
use rusqlite::Connection;
use uuid::Uuid;

use crate::context::{Actor, Clock};
use crate::db::repository;
use crate::db::Store;
use crate::error::EngineError;
use crate::models::{Admission, AdmissionStatus, Bed, BedStatus, Role, Ward, WardBed, WardOccupancy};

const WARD_ADMIN: &[Role] = &[Role::Admin];
const ADMITTING: &[Role] = &[Role::Doctor, Role::Admin];
const DISCHARGING: &[Role] = &[Role::Doctor, Role::Nurse, Role::Admin];
const HOUSEKEEPING: &[Role] = &[Role::Nurse, Role::Admin];

/// Admission request for one patient into one bed.
#[derive(Debug, Clone)]
pub struct AdmitRequest {
    pub patient_ref: Uuid,
    pub bed_id: Uuid,
    pub reason: String,
    pub estimated_discharge_date: Option<NaiveDate>,
}

pub struct BedAllocationManager {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl BedAllocationManager {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn create_ward(&self, actor: &Actor, name: &str, capacity: i64) -> Result<Ward, EngineError> {
        actor.ensure_role(WARD_ADMIN, "create wards")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation("ward name is required".into()));
        }
        if capacity <= 0 {
            return Err(EngineError::Validation(format!(
                "ward capacity must be positive, got {capacity}"
            )));
        }

        let ward = self.store.transaction(|conn| {
            if repository::ward_name_taken(conn, name)? {
                return Err(EngineError::Conflict(format!("ward {name} already exists")));
            }
            let ward = Ward {
                id: Uuid::new_v4(),
                name: name.to_string(),
                capacity,
            };
            repository::insert_ward(conn, &ward)?;
            Ok(ward)
        })?;

        tracing::info!(ward_id = %ward.id, name = %ward.name, capacity, "Ward created");
        Ok(ward)
    }

    /// Add a clean, vacant bed. A ward never holds more beds than its capacity.
    pub fn add_bed(&self, actor: &Actor, ward_id: &Uuid, number: &str) -> Result<Bed, EngineError> {
        actor.ensure_role(WARD_ADMIN, "add beds")?;
        let number = number.trim();
        if number.is_empty() {
            return Err(EngineError::Validation("bed number is required".into()));
        }

        let bed = self.store.transaction(|conn| {
            let ward = repository::get_ward(conn, ward_id)?
                .ok_or_else(|| EngineError::not_found("Ward", ward_id))?;

            if repository::count_beds_in_ward(conn, ward_id)? >= ward.capacity {
                return Err(EngineError::Conflict(format!(
                    "ward {} is at capacity ({})",
                    ward.name, ward.capacity
                )));
            }
            if repository::bed_number_taken(conn, ward_id, number)? {
                return Err(EngineError::Conflict(format!(
                    "bed {number} already exists in ward {}",
                    ward.name
                )));
            }

            let bed = Bed {
                id: Uuid::new_v4(),
                ward_id: *ward_id,
                number: number.to_string(),
                status: BedStatus::VacantClean,
            };
            repository::insert_bed(conn, &bed)?;
            Ok(bed)
        })?;

        tracing::info!(bed_id = %bed.id, ward_id = %ward_id, number = %bed.number, "Bed added");
        Ok(bed)
    }

    /// Admit a patient into a clean vacant bed.
    ///
    /// Conflict when the bed is not VACANT_CLEAN or the patient already has
    /// an active admission.
    pub fn admit_patient(&self, actor: &Actor, request: AdmitRequest) -> Result<Admission, EngineError> {
        actor.ensure_role(ADMITTING, "admit patients")?;
        if request.reason.trim().is_empty() {
            return Err(EngineError::Validation("admission reason is required".into()));
        }
        let now = self.clock.now();

        let admission = self.store.transaction(|conn| {
            let bed = load_bed(conn, &request.bed_id)?;
            if bed.status != BedStatus::VacantClean {
                tracing::warn!(bed_id = %bed.id, status = %bed.status, "Admission rejected: bed not available");
                return Err(EngineError::Conflict(format!(
                    "bed {} is {}, not vacant_clean",
                    bed.number, bed.status
                )));
            }

            if let Some(active) = repository::find_active_admission_for_patient(conn, &request.patient_ref)? {
                tracing::warn!(
                    patient_ref = %request.patient_ref,
                    admission_id = %active.id,
                    "Admission rejected: patient already admitted"
                );
                return Err(EngineError::Conflict(format!(
                    "patient {} is already admitted (admission {})",
                    request.patient_ref, active.id
                )));
            }

            let admission = Admission {
                id: Uuid::new_v4(),
                patient_ref: request.patient_ref,
                bed_id: bed.id,
                reason: request.reason.trim().to_string(),
                status: AdmissionStatus::Admitted,
                admitted_by: actor.id,
                admission_date: now,
                estimated_discharge_date: request.estimated_discharge_date,
                discharge_date: None,
            };
            repository::insert_admission(conn, &admission)?;

            if !repository::transition_bed_status(conn, &bed.id, BedStatus::VacantClean, BedStatus::Occupied)? {
                return Err(EngineError::Conflict(format!("bed {} was taken concurrently", bed.number)));
            }
            load_admission(conn, &admission.id)
        })?;

        tracing::info!(
            admission_id = %admission.id,
            patient_ref = %admission.patient_ref,
            bed_id = %admission.bed_id,
            "Patient admitted"
        );
        Ok(admission)
    }

    /// Discharge an active admission; the bed goes to VACANT_DIRTY until
    /// housekeeping marks it clean.
    pub fn discharge_patient(&self, actor: &Actor, admission_id: &Uuid) -> Result<Admission, EngineError> {
        actor.ensure_role(DISCHARGING, "discharge patients")?;
        let now = self.clock.now();

        let admission = self.store.transaction(|conn| {
            let current = load_admission(conn, admission_id)?;
            if current.status != AdmissionStatus::Admitted
                || !repository::close_admission(conn, admission_id, &now)?
            {
                return Err(EngineError::illegal_transition(
                    "admission",
                    current.status,
                    AdmissionStatus::Discharged,
                ));
            }

            if !repository::transition_bed_status(conn, &current.bed_id, BedStatus::Occupied, BedStatus::VacantDirty)? {
                let bed = load_bed(conn, &current.bed_id)?;
                return Err(EngineError::illegal_transition("bed", bed.status, BedStatus::VacantDirty));
            }
            load_admission(conn, admission_id)
        })?;

        tracing::info!(
            admission_id = %admission.id,
            bed_id = %admission.bed_id,
            "Patient discharged"
        );
        Ok(admission)
    }

    /// Housekeeping transition between VACANT_DIRTY and VACANT_CLEAN.
    /// OCCUPIED is never set or cleared here.
    pub fn set_bed_status(&self, actor: &Actor, bed_id: &Uuid, next: BedStatus) -> Result<Bed, EngineError> {
        actor.ensure_role(HOUSEKEEPING, "change bed status")?;

        let (bed, previous) = self.store.transaction(|conn| {
            let current = load_bed(conn, bed_id)?;
            if !current.status.can_set_administratively(next)
                || !repository::transition_bed_status(conn, bed_id, current.status, next)?
            {
                return Err(EngineError::illegal_transition("bed", current.status, next));
            }
            Ok((load_bed(conn, bed_id)?, current.status))
        })?;

        tracing::info!(bed_id = %bed_id, from = %previous, to = %bed.status, "Bed status updated");
        Ok(bed)
    }

    pub fn get_bed(&self, bed_id: &Uuid) -> Result<Bed, EngineError> {
        self.store.read(|conn| load_bed(conn, bed_id))
    }

    pub fn get_admission(&self, admission_id: &Uuid) -> Result<Admission, EngineError> {
        self.store.read(|conn| load_admission(conn, admission_id))
    }

    /// Beds of a ward by number, each with its current admission.
    pub fn list_ward_beds(&self, ward_id: &Uuid) -> Result<Vec<WardBed>, EngineError> {
        self.store.read(|conn| {
            repository::get_ward(conn, ward_id)?.ok_or_else(|| EngineError::not_found("Ward", ward_id))?;
            let mut admissions = repository::list_active_admissions_in_ward(conn, ward_id)?;
            let beds = repository::list_beds_in_ward(conn, ward_id)?;
            Ok(beds
                .into_iter()
                .map(|bed| {
                    let admission = admissions
                        .iter()
                        .position(|a| a.bed_id == bed.id)
                        .map(|i| admissions.swap_remove(i));
                    WardBed { bed, admission }
                })
                .collect())
        })
    }

    pub fn ward_occupancy(&self) -> Result<Vec<WardOccupancy>, EngineError> {
        self.store.read(|conn| Ok(repository::ward_occupancy(conn)?))
    }
}

fn load_bed(conn: &Connection, id: &Uuid) -> Result<Bed, EngineError> {
    repository::get_bed(conn, id)?.ok_or_else(|| EngineError::not_found("Bed", id))
}

fn load_admission(conn: &Connection, id: &Uuid) -> Result<Admission, EngineError> {
    repository::get_admission(conn, id)?.ok_or_else(|| EngineError::not_found("Admission", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FixedClock;
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        store: Arc<Store>,
        clock: Arc<FixedClock>,
        beds: BedAllocationManager,
        admin: Actor,
        doctor: Actor,
        nurse: Actor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()));
        let beds = BedAllocationManager::new(store.clone(), clock.clone());
        Fixture {
            store,
            clock,
            beds,
            admin: Actor::new(Uuid::new_v4(), Role::Admin),
            doctor: Actor::new(Uuid::new_v4(), Role::Doctor),
            nurse: Actor::new(Uuid::new_v4(), Role::Nurse),
        }
    }

    fn admit(patient: Uuid, bed: Uuid) -> AdmitRequest {
        AdmitRequest {
            patient_ref: patient,
            bed_id: bed,
            reason: "Pneumonia".into(),
            estimated_discharge_date: NaiveDate::from_ymd_opt(2026, 2, 5),
        }
    }

    /// OCCUPIED iff exactly one ADMITTED admission references the bed.
    fn assert_occupancy_invariant(store: &Store, bed_id: &Uuid) {
        store
            .read(|conn| -> Result<(), EngineError> {
                let bed = load_bed(conn, bed_id)?;
                let active = repository::count_active_admissions_for_bed(conn, bed_id)?;
                assert_eq!(bed.status == BedStatus::Occupied, active == 1);
                assert!(active <= 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn admit_discharge_and_readmit_before_cleaning() {
        let f = fixture();
        let ward = f.beds.create_ward(&f.admin, "Medical", 4).unwrap();
        let bed = f.beds.add_bed(&f.admin, &ward.id, "M-1").unwrap();
        assert_eq!(bed.status, BedStatus::VacantClean);

        let admission = f.beds.admit_patient(&f.doctor, admit(Uuid::new_v4(), bed.id)).unwrap();
        assert_eq!(admission.status, AdmissionStatus::Admitted);
        assert_eq!(admission.admitted_by, f.doctor.id);
        assert_eq!(f.beds.get_bed(&bed.id).unwrap().status, BedStatus::Occupied);
        assert_occupancy_invariant(&f.store, &bed.id);

        f.clock.advance(Duration::days(3));
        let discharged = f.beds.discharge_patient(&f.nurse, &admission.id).unwrap();
        assert_eq!(discharged.status, AdmissionStatus::Discharged);
        assert_eq!(discharged.discharge_date, Some(f.clock.now()));
        assert_eq!(f.beds.get_bed(&bed.id).unwrap().status, BedStatus::VacantDirty);
        assert_occupancy_invariant(&f.store, &bed.id);

        let again = f.beds.admit_patient(&f.doctor, admit(Uuid::new_v4(), bed.id));
        assert!(matches!(again, Err(EngineError::Conflict(_))));

        f.beds.set_bed_status(&f.nurse, &bed.id, BedStatus::VacantClean).unwrap();
        assert!(f.beds.admit_patient(&f.doctor, admit(Uuid::new_v4(), bed.id)).is_ok());
        assert_occupancy_invariant(&f.store, &bed.id);
    }

    #[test]
    fn patient_cannot_hold_two_beds() {
        let f = fixture();
        let ward = f.beds.create_ward(&f.admin, "Surgical", 2).unwrap();
        let first = f.beds.add_bed(&f.admin, &ward.id, "S-1").unwrap();
        let second = f.beds.add_bed(&f.admin, &ward.id, "S-2").unwrap();
        let patient = Uuid::new_v4();

        f.beds.admit_patient(&f.doctor, admit(patient, first.id)).unwrap();
        let result = f.beds.admit_patient(&f.doctor, admit(patient, second.id));
        assert!(matches!(result, Err(EngineError::Conflict(_))));

        // The rejected admission left the second bed untouched.
        assert_eq!(f.beds.get_bed(&second.id).unwrap().status, BedStatus::VacantClean);
        assert_occupancy_invariant(&f.store, &second.id);
    }

    #[test]
    fn occupied_cannot_be_set_or_cleared_administratively() {
        let f = fixture();
        let ward = f.beds.create_ward(&f.admin, "ICU", 1).unwrap();
        let bed = f.beds.add_bed(&f.admin, &ward.id, "I-1").unwrap();

        assert!(matches!(
            f.beds.set_bed_status(&f.nurse, &bed.id, BedStatus::Occupied),
            Err(EngineError::IllegalTransition { .. })
        ));

        f.beds.admit_patient(&f.doctor, admit(Uuid::new_v4(), bed.id)).unwrap();
        assert!(matches!(
            f.beds.set_bed_status(&f.nurse, &bed.id, BedStatus::VacantClean),
            Err(EngineError::IllegalTransition { .. })
        ));
        assert_occupancy_invariant(&f.store, &bed.id);
    }

    #[test]
    fn double_discharge_is_illegal() {
        let f = fixture();
        let ward = f.beds.create_ward(&f.admin, "Maternity", 1).unwrap();
        let bed = f.beds.add_bed(&f.admin, &ward.id, "MT-1").unwrap();
        let admission = f.beds.admit_patient(&f.doctor, admit(Uuid::new_v4(), bed.id)).unwrap();

        f.beds.discharge_patient(&f.doctor, &admission.id).unwrap();
        assert!(matches!(
            f.beds.discharge_patient(&f.doctor, &admission.id),
            Err(EngineError::IllegalTransition { .. })
        ));
        assert!(matches!(
            f.beds.discharge_patient(&f.doctor, &Uuid::new_v4()),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn ward_capacity_and_bed_numbers_are_enforced() {
        let f = fixture();
        let ward = f.beds.create_ward(&f.admin, "Pediatrics", 2).unwrap();
        f.beds.add_bed(&f.admin, &ward.id, "P-1").unwrap();
        assert!(matches!(
            f.beds.add_bed(&f.admin, &ward.id, "P-1"),
            Err(EngineError::Conflict(_))
        ));
        f.beds.add_bed(&f.admin, &ward.id, "P-2").unwrap();
        assert!(matches!(
            f.beds.add_bed(&f.admin, &ward.id, "P-3"),
            Err(EngineError::Conflict(_))
        ));
        assert!(matches!(
            f.beds.create_ward(&f.admin, "Pediatrics", 3),
            Err(EngineError::Conflict(_))
        ));
        assert!(matches!(
            f.beds.create_ward(&f.admin, "Empty", 0),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn role_gates() {
        let f = fixture();
        let ward = f.beds.create_ward(&f.admin, "General", 1).unwrap();
        let bed = f.beds.add_bed(&f.admin, &ward.id, "G-1").unwrap();

        assert!(matches!(
            f.beds.create_ward(&f.nurse, "Other", 1),
            Err(EngineError::Authorization(_))
        ));
        assert!(matches!(
            f.beds.admit_patient(&f.nurse, admit(Uuid::new_v4(), bed.id)),
            Err(EngineError::Authorization(_))
        ));
        assert!(matches!(
            f.beds.set_bed_status(&f.doctor, &bed.id, BedStatus::VacantDirty),
            Err(EngineError::Authorization(_))
        ));
    }

    #[test]
    fn ward_bed_listing_shows_current_occupants() {
        let f = fixture();
        let ward = f.beds.create_ward(&f.admin, "Medical", 3).unwrap();
        let b2 = f.beds.add_bed(&f.admin, &ward.id, "M-2").unwrap();
        let b1 = f.beds.add_bed(&f.admin, &ward.id, "M-1").unwrap();
        let b3 = f.beds.add_bed(&f.admin, &ward.id, "M-3").unwrap();

        let patient = Uuid::new_v4();
        let admission = f.beds.admit_patient(&f.doctor, admit(patient, b2.id)).unwrap();
        let gone = f.beds.admit_patient(&f.doctor, admit(Uuid::new_v4(), b3.id)).unwrap();
        f.beds.discharge_patient(&f.doctor, &gone.id).unwrap();

        let listing = f.beds.list_ward_beds(&ward.id).unwrap();
        assert_eq!(
            listing.iter().map(|w| w.bed.id).collect::<Vec<_>>(),
            vec![b1.id, b2.id, b3.id]
        );
        assert_eq!(listing[0].bed.status, BedStatus::VacantClean);
        assert!(listing[0].admission.is_none());
        assert_eq!(listing[1].bed.status, BedStatus::Occupied);
        assert_eq!(listing[1].admission.as_ref().map(|a| a.patient_ref), Some(patient));
        assert_eq!(listing[1].admission.as_ref().map(|a| a.id), Some(admission.id));
        assert_eq!(listing[2].bed.status, BedStatus::VacantDirty);
        assert!(listing[2].admission.is_none());

        assert!(matches!(
            f.beds.list_ward_beds(&Uuid::new_v4()),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn concurrent_admissions_to_one_bed_admit_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beds.db");
        let timeout = std::time::Duration::from_secs(10);
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()));

        let setup = Arc::new(Store::open(&path, timeout).unwrap());
        let admin = Actor::new(Uuid::new_v4(), Role::Admin);
        let manager = BedAllocationManager::new(setup.clone(), clock.clone());
        let ward = manager.create_ward(&admin, "Emergency", 1).unwrap();
        let bed = manager.add_bed(&admin, &ward.id, "E-1").unwrap();

        let managers: Vec<_> = (0..6)
            .map(|_| BedAllocationManager::new(Arc::new(Store::open(&path, timeout).unwrap()), clock.clone()))
            .collect();
        let doctor = Actor::new(Uuid::new_v4(), Role::Doctor);
        let bed_id = bed.id;

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = managers
                .iter()
                .map(|m| {
                    let doctor = &doctor;
                    scope.spawn(move || m.admit_patient(doctor, admit(Uuid::new_v4(), bed_id)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, EngineError::Conflict(_))));
        assert_eq!(manager.get_bed(&bed_id).unwrap().status, BedStatus::Occupied);
        assert_occupancy_invariant(&setup, &bed_id);
    }

    #[test]
    fn occupancy_summary_reflects_bed_states() {
        let f = fixture();
        let ward = f.beds.create_ward(&f.admin, "General", 3).unwrap();
        let a = f.beds.add_bed(&f.admin, &ward.id, "G-1").unwrap();
        let b = f.beds.add_bed(&f.admin, &ward.id, "G-2").unwrap();
        f.beds.add_bed(&f.admin, &ward.id, "G-3").unwrap();

        f.beds.admit_patient(&f.doctor, admit(Uuid::new_v4(), a.id)).unwrap();
        f.beds.set_bed_status(&f.nurse, &b.id, BedStatus::VacantDirty).unwrap();

        let summary = f.beds.ward_occupancy().unwrap();
        assert_eq!(
            summary,
            vec![WardOccupancy {
                ward_id: ward.id,
                name: "General".into(),
                capacity: 3,
                total: 3,
                occupied: 1,
                available: 1,
                dirty: 1,
            }]
        );
    }
}
