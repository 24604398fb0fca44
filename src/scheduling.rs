//! Scheduling ledger: appointment lifecycle and doctor-time conflicts.
//!
//! The overlap check and the write that depends on it always run inside one
//! `Store::transaction`, so two bookings racing for the same doctor cannot
//! both pass the check.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, SubsecRound, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::context::{Actor, Clock};
use crate::db::repository;
use crate::db::Store;
use crate::error::EngineError;
use crate::models::{Appointment, AppointmentStatus, NewAppointment};

pub struct SchedulingLedger {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl SchedulingLedger {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Book a doctor time slot.
    ///
    /// Staff bookings (admin, doctor, receptionist) start CONFIRMED, every
    /// other booking starts REQUESTED. A patient may only book for themselves.
    pub fn schedule_appointment(
        &self,
        actor: &Actor,
        request: NewAppointment,
    ) -> Result<Appointment, EngineError> {
        let (start, end) = normalize_slot(request.start_time, request.end_time)?;
        actor.ensure_owns(&request.patient_ref, "appointment")?;

        let now = self.clock.now();
        let status = if actor.role.confirms_on_booking() {
            AppointmentStatus::Confirmed
        } else {
            AppointmentStatus::Requested
        };

        let appointment = self.store.transaction(|conn| {
            ensure_slot_free(conn, &request.doctor_ref, &start, &end, None)?;

            let appointment = Appointment {
                id: Uuid::new_v4(),
                patient_ref: request.patient_ref,
                doctor_ref: request.doctor_ref,
                start_time: start,
                end_time: end,
                appointment_type: request.appointment_type,
                reason: request.reason,
                status,
                created_at: now,
                updated_at: now,
            };
            repository::insert_appointment(conn, &appointment)?;
            load(conn, &appointment.id)
        })?;

        tracing::info!(
            appointment_id = %appointment.id,
            doctor_ref = %appointment.doctor_ref,
            status = %appointment.status,
            "Appointment scheduled"
        );
        Ok(appointment)
    }

    /// Move an appointment along its lifecycle.
    ///
    /// Patients may only cancel, and only their own appointments; both
    /// checks run before the transition table so they surface as
    /// authorization failures.
    pub fn update_status(
        &self,
        id: &Uuid,
        next: AppointmentStatus,
        actor: &Actor,
    ) -> Result<Appointment, EngineError> {
        let now = self.clock.now();

        let (appointment, previous) = self.store.transaction(|conn| {
            let current = load(conn, id)?;

            if actor.role.is_patient() {
                if next != AppointmentStatus::Cancelled {
                    return Err(EngineError::Authorization(format!(
                        "patients may only cancel appointments, not set {next}"
                    )));
                }
                actor.ensure_owns(&current.patient_ref, "appointment")?;
            }

            if !current.status.can_transition_to(next) {
                return Err(EngineError::illegal_transition(
                    "appointment",
                    current.status,
                    next,
                ));
            }

            repository::update_appointment_status(conn, id, next, &now)?;
            Ok((load(conn, id)?, current.status))
        })?;

        tracing::info!(
            appointment_id = %id,
            from = %previous,
            to = %appointment.status,
            "Appointment status updated"
        );
        Ok(appointment)
    }

    /// Move an appointment to a new slot.
    ///
    /// Only REQUESTED and CONFIRMED appointments can move. The conflict check
    /// ignores the appointment itself. A patient-initiated move drops the
    /// booking back to REQUESTED; a staff move confirms it.
    pub fn reschedule(
        &self,
        id: &Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<Appointment, EngineError> {
        let (start, end) = normalize_slot(start, end)?;
        let now = self.clock.now();
        let next = if actor.role.is_patient() {
            AppointmentStatus::Requested
        } else {
            AppointmentStatus::Confirmed
        };

        let appointment = self.store.transaction(|conn| {
            let current = load(conn, id)?;
            actor.ensure_owns(&current.patient_ref, "appointment")?;

            if !matches!(
                current.status,
                AppointmentStatus::Requested | AppointmentStatus::Confirmed
            ) {
                return Err(EngineError::illegal_transition(
                    "appointment",
                    current.status,
                    next,
                ));
            }

            ensure_slot_free(conn, &current.doctor_ref, &start, &end, Some(id))?;
            repository::update_appointment_slot(conn, id, &start, &end, next, &now)?;
            load(conn, id)
        })?;

        tracing::info!(
            appointment_id = %id,
            start = %appointment.start_time,
            end = %appointment.end_time,
            status = %appointment.status,
            "Appointment rescheduled"
        );
        Ok(appointment)
    }

    pub fn get_appointment(&self, id: &Uuid) -> Result<Appointment, EngineError> {
        self.store.read(|conn| load(conn, id))
    }

    /// A doctor's appointments in start order. With `day`, every appointment
    /// starting that UTC day (cancelled ones included); without, every
    /// appointment still holding time on the doctor's timeline.
    pub fn list_doctor_appointments(
        &self,
        doctor_ref: &Uuid,
        day: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, EngineError> {
        self.store.read(|conn| {
            let appointments = match day {
                Some(day) => {
                    let from = day.and_time(chrono::NaiveTime::MIN).and_utc();
                    let to = from + Duration::days(1);
                    repository::list_doctor_appointments(conn, doctor_ref, &from, &to)?
                }
                None => repository::list_active_doctor_appointments(conn, doctor_ref)?,
            };
            Ok(appointments)
        })
    }
}

/// Close out the appointment a consultation was recorded against.
///
/// Runs inside the caller's transaction. The appointment must belong to the
/// same patient and doctor, and COMPLETED must be reachable from its current
/// status through the transition table.
pub(crate) fn complete_for_consultation(
    conn: &Connection,
    id: &Uuid,
    patient_ref: &Uuid,
    doctor_ref: &Uuid,
    now: &DateTime<Utc>,
) -> Result<Appointment, EngineError> {
    let current = load(conn, id)?;

    if current.patient_ref != *patient_ref || current.doctor_ref != *doctor_ref {
        return Err(EngineError::Validation(format!(
            "appointment {id} does not belong to this patient and doctor"
        )));
    }

    if !current.status.can_reach(AppointmentStatus::Completed) {
        return Err(EngineError::illegal_transition(
            "appointment",
            current.status,
            AppointmentStatus::Completed,
        ));
    }

    repository::update_appointment_status(conn, id, AppointmentStatus::Completed, now)?;
    load(conn, id)
}

/// Slot bounds at the millisecond precision they are stored with; the
/// range must still be non-empty after truncation.
fn normalize_slot(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), EngineError> {
    let (start, end) = (start.trunc_subsecs(3), end.trunc_subsecs(3));
    if start >= end {
        return Err(EngineError::Validation(format!(
            "appointment start {start} must be before end {end}"
        )));
    }
    Ok((start, end))
}

fn ensure_slot_free(
    conn: &Connection,
    doctor_ref: &Uuid,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    exclude: Option<&Uuid>,
) -> Result<(), EngineError> {
    if let Some(existing) = repository::find_overlapping_appointment(conn, doctor_ref, start, end, exclude)? {
        tracing::warn!(
            doctor_ref = %doctor_ref,
            existing = %existing.id,
            "Rejected overlapping appointment"
        );
        return Err(EngineError::Conflict(format!(
            "doctor {doctor_ref} already has appointment {} from {} to {}",
            existing.id, existing.start_time, existing.end_time
        )));
    }
    Ok(())
}

fn load(conn: &Connection, id: &Uuid) -> Result<Appointment, EngineError> {
    repository::get_appointment(conn, id)?.ok_or_else(|| EngineError::not_found("Appointment", id))
}
