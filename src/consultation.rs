//! Consultation orchestrator.
//!
//! Saving a consultation writes the medical record, its prescriptions and
//! lab orders, completes the appointment and issues the invoice in one
//! transaction. The lab and pharmacy are told about the new work only after
//! the commit.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::billing::create_invoice_in_tx;
use crate::context::{Actor, Clock};
use crate::db::repository;
use crate::db::Store;
use crate::error::EngineError;
use crate::models::{
    Invoice, InvoiceItem, LabOrder, LabOrderStatus, LabPriority, MedicalRecord, Prescription,
    PrescriptionStatus, Role, SoapNote,
};
use crate::notify::{PendingWork, WorkNotifier};
use crate::scheduling::complete_for_consultation;

const CLINICIANS: &[Role] = &[Role::Doctor, Role::Admin];
const RECORD_READERS: &[Role] = &[Role::Doctor, Role::Admin, Role::Patient];

const CONSULTATION_FEE_DESCRIPTION: &str = "Consultation fee";

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionLine {
    pub medication_name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration_days: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabOrderLine {
    pub test_name: String,
    pub priority: LabPriority,
    pub clinical_indication: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationInput {
    pub appointment_id: Option<Uuid>,
    pub patient_ref: Uuid,
    pub doctor_ref: Uuid,
    pub soap: SoapNote,
    pub prescriptions: Vec<PrescriptionLine>,
    pub lab_orders: Vec<LabOrderLine>,
    pub extra_billing_items: Vec<InvoiceItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationOutcome {
    pub medical_record: MedicalRecord,
    pub invoice: Invoice,
    pub prescriptions: Vec<Prescription>,
    pub lab_orders: Vec<LabOrder>,
}

/// A stored medical record with the orders written on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalRecordDetail {
    pub medical_record: MedicalRecord,
    pub prescriptions: Vec<Prescription>,
    pub lab_orders: Vec<LabOrder>,
}

// ─── Orchestrator ─────────────────────────────────────────────────────────────

pub struct ConsultationOrchestrator {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn WorkNotifier>,
    consultation_fee_cents: i64,
    invoice_prefix: String,
}

impl ConsultationOrchestrator {
    pub fn new(
        store: Arc<Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn WorkNotifier>,
        consultation_fee_cents: i64,
        invoice_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            consultation_fee_cents,
            invoice_prefix: invoice_prefix.into(),
        }
    }

    /// Record a consultation.
    ///
    /// Only doctors (as themselves) and admins may save. When an appointment
    /// is given it must belong to the same patient and doctor, must not
    /// already have a record, and must be able to reach COMPLETED; any
    /// failure rolls back the whole save.
    pub fn save_consultation(
        &self,
        actor: &Actor,
        input: ConsultationInput,
    ) -> Result<ConsultationOutcome, EngineError> {
        actor.ensure_role(CLINICIANS, "record consultations")?;
        if actor.role == Role::Doctor && actor.id != input.doctor_ref {
            return Err(EngineError::Authorization(
                "doctors may only record their own consultations".into(),
            ));
        }
        validate_lines(&input)?;
        let now = self.clock.now();

        let outcome = self.store.transaction(|conn| {
            if let Some(appointment_id) = &input.appointment_id {
                if repository::medical_record_exists_for_appointment(conn, appointment_id)? {
                    return Err(EngineError::Conflict(format!(
                        "appointment {appointment_id} already has a medical record"
                    )));
                }
                complete_for_consultation(conn, appointment_id, &input.patient_ref, &input.doctor_ref, &now)?;
            }

            let medical_record = MedicalRecord {
                id: Uuid::new_v4(),
                patient_ref: input.patient_ref,
                doctor_ref: input.doctor_ref,
                appointment_id: input.appointment_id,
                visit_date: now,
                soap: input.soap.clone(),
            };
            repository::insert_medical_record(conn, &medical_record)?;

            let mut prescriptions = Vec::with_capacity(input.prescriptions.len());
            for line in &input.prescriptions {
                let rx = Prescription {
                    id: Uuid::new_v4(),
                    medical_record_id: medical_record.id,
                    patient_ref: input.patient_ref,
                    medication_name: line.medication_name.trim().to_string(),
                    dosage: line.dosage.clone(),
                    frequency: line.frequency.clone(),
                    duration_days: line.duration_days,
                    quantity: line.quantity,
                    status: PrescriptionStatus::Pending,
                    created_at: now,
                };
                repository::insert_prescription(conn, &rx)?;
                prescriptions.push(rx);
            }

            let mut lab_orders = Vec::with_capacity(input.lab_orders.len());
            for line in &input.lab_orders {
                let order = LabOrder {
                    id: Uuid::new_v4(),
                    medical_record_id: medical_record.id,
                    patient_ref: input.patient_ref,
                    test_name: line.test_name.trim().to_string(),
                    priority: line.priority,
                    clinical_indication: line.clinical_indication.clone(),
                    status: LabOrderStatus::Pending,
                    ordered_at: now,
                };
                repository::insert_lab_order(conn, &order)?;
                lab_orders.push(order);
            }

            let mut items = vec![InvoiceItem {
                description: CONSULTATION_FEE_DESCRIPTION.into(),
                quantity: 1,
                unit_price_cents: self.consultation_fee_cents,
            }];
            items.extend(input.extra_billing_items.iter().cloned());
            let invoice = create_invoice_in_tx(
                conn,
                &input.patient_ref,
                Some(medical_record.id),
                items,
                &self.invoice_prefix,
                &now,
            )?;

            Ok(ConsultationOutcome {
                medical_record,
                invoice,
                prescriptions,
                lab_orders,
            })
        })?;

        tracing::info!(
            medical_record_id = %outcome.medical_record.id,
            patient_ref = %outcome.medical_record.patient_ref,
            prescriptions = outcome.prescriptions.len(),
            lab_orders = outcome.lab_orders.len(),
            invoice_id = %outcome.invoice.id,
            "Consultation saved"
        );
        self.announce(&outcome);
        Ok(outcome)
    }

    /// Read back a medical record; patients only see their own.
    pub fn get_medical_record(&self, actor: &Actor, record_id: &Uuid) -> Result<MedicalRecordDetail, EngineError> {
        actor.ensure_role(RECORD_READERS, "read medical records")?;
        self.store.read(|conn| {
            let medical_record = repository::get_medical_record(conn, record_id)?
                .ok_or_else(|| EngineError::not_found("MedicalRecord", record_id))?;
            actor.ensure_owns(&medical_record.patient_ref, "medical record")?;
            Ok(MedicalRecordDetail {
                prescriptions: repository::list_prescriptions_for_record(conn, record_id)?,
                lab_orders: repository::list_lab_orders_for_record(conn, record_id)?,
                medical_record,
            })
        })
    }

    /// Lab work queue: STAT, then URGENT, then ROUTINE.
    pub fn pending_lab_orders(&self) -> Result<Vec<LabOrder>, EngineError> {
        self.store.read(|conn| Ok(repository::list_pending_lab_orders(conn)?))
    }

    fn announce(&self, outcome: &ConsultationOutcome) {
        let record = &outcome.medical_record;
        if !outcome.prescriptions.is_empty() {
            self.notifier.notify(PendingWork::Prescriptions {
                medical_record_id: record.id,
                patient_ref: record.patient_ref,
                count: outcome.prescriptions.len(),
            });
        }
        if !outcome.lab_orders.is_empty() {
            self.notifier.notify(PendingWork::LabOrders {
                medical_record_id: record.id,
                patient_ref: record.patient_ref,
                count: outcome.lab_orders.len(),
            });
        }
    }
}

fn validate_lines(input: &ConsultationInput) -> Result<(), EngineError> {
    for line in &input.prescriptions {
        if line.medication_name.trim().is_empty() {
            return Err(EngineError::Validation("prescription needs a medication name".into()));
        }
        if line.quantity <= 0 || line.duration_days <= 0 {
            return Err(EngineError::Validation(format!(
                "prescription for {} needs a positive quantity and duration",
                line.medication_name
            )));
        }
    }
    if input.lab_orders.iter().any(|o| o.test_name.trim().is_empty()) {
        return Err(EngineError::Validation("lab order needs a test name".into()));
    }
    Ok(())
}
