//! Pharmacy dispensing: stock allocation, prescription status and the
//! resulting invoice, all in one transaction.

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::billing::create_invoice_in_tx;
use crate::context::{Actor, Clock};
use crate::db::repository;
use crate::db::Store;
use crate::error::EngineError;
use crate::inventory::{allocate_in_tx, load_medication};
use crate::models::{
    Dispensing, Invoice, InvoiceItem, Prescription, PrescriptionStatus, Role,
};

const DISPENSERS: &[Role] = &[Role::Pharmacist, Role::Admin];

/// One medication line of a dispense request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispenseItem {
    pub medication_id: Uuid,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispenseOutcome {
    pub invoice: Invoice,
    pub dispensings: Vec<Dispensing>,
}

pub struct DispensingCoordinator {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    invoice_prefix: String,
}

impl DispensingCoordinator {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, invoice_prefix: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            invoice_prefix: invoice_prefix.into(),
        }
    }

    /// Dispense a prescription.
    ///
    /// All-or-nothing across every requested medication: if any allocation
    /// fails, no stock moves, the prescription keeps its status and no
    /// invoice is created. One dispensing row is written per batch touched.
    pub fn dispense(
        &self,
        actor: &Actor,
        prescription_id: &Uuid,
        items: &[DispenseItem],
    ) -> Result<DispenseOutcome, EngineError> {
        actor.ensure_role(DISPENSERS, "dispense medication")?;
        if items.is_empty() {
            return Err(EngineError::Validation("dispense requires at least one item".into()));
        }
        let now = self.clock.now();

        let outcome = self.store.transaction(|conn| {
            let prescription = load_prescription(conn, prescription_id)?;
            if !prescription.status.can_transition_to(PrescriptionStatus::Dispensed) {
                return Err(EngineError::illegal_transition(
                    "prescription",
                    prescription.status,
                    PrescriptionStatus::Dispensed,
                ));
            }

            let mut dispensings = Vec::new();
            let mut lines = Vec::with_capacity(items.len());
            for item in items {
                let medication = load_medication(conn, &item.medication_id)?;
                for allocation in allocate_in_tx(conn, &item.medication_id, item.quantity)? {
                    let dispensing = Dispensing {
                        id: Uuid::new_v4(),
                        prescription_id: prescription.id,
                        medication_id: medication.id,
                        batch_id: allocation.batch_id,
                        batch_number: allocation.batch_number,
                        quantity: allocation.quantity,
                        dispensed_by: actor.id,
                        dispensed_at: now,
                    };
                    repository::insert_dispensing(conn, &dispensing)?;
                    dispensings.push(dispensing);
                }
                lines.push(InvoiceItem {
                    description: medication.name,
                    quantity: item.quantity,
                    unit_price_cents: medication.unit_price_cents,
                });
            }

            if !repository::transition_prescription_status(
                conn,
                prescription_id,
                prescription.status,
                PrescriptionStatus::Dispensed,
            )? {
                return Err(EngineError::Conflict(format!(
                    "prescription {prescription_id} changed during dispensing"
                )));
            }

            let invoice = create_invoice_in_tx(
                conn,
                &prescription.patient_ref,
                Some(prescription.medical_record_id),
                lines,
                &self.invoice_prefix,
                &now,
            )?;
            Ok(DispenseOutcome { invoice, dispensings })
        })?;

        tracing::info!(
            prescription_id = %prescription_id,
            invoice_id = %outcome.invoice.id,
            dispensings = outcome.dispensings.len(),
            total_cents = outcome.invoice.total_cents,
            "Prescription dispensed"
        );
        Ok(outcome)
    }

    /// Patient asks for another fill of a dispensed prescription.
    pub fn request_refill(&self, actor: &Actor, prescription_id: &Uuid) -> Result<Prescription, EngineError> {
        let prescription = self.store.transaction(|conn| {
            let current = load_prescription(conn, prescription_id)?;
            actor.ensure_owns(&current.patient_ref, "prescription")?;

            if !current.status.can_transition_to(PrescriptionStatus::RefillRequested)
                || !repository::transition_prescription_status(
                    conn,
                    prescription_id,
                    current.status,
                    PrescriptionStatus::RefillRequested,
                )?
            {
                return Err(EngineError::illegal_transition(
                    "prescription",
                    current.status,
                    PrescriptionStatus::RefillRequested,
                ));
            }
            load_prescription(conn, prescription_id)
        })?;

        tracing::info!(prescription_id = %prescription_id, "Refill requested");
        Ok(prescription)
    }

    /// Pharmacy work queue, oldest first.
    pub fn pending_prescriptions(&self) -> Result<Vec<Prescription>, EngineError> {
        self.store
            .read(|conn| Ok(repository::list_dispensable_prescriptions(conn)?))
    }

    pub fn list_dispensings(&self, prescription_id: &Uuid) -> Result<Vec<Dispensing>, EngineError> {
        self.store.read(|conn| {
            load_prescription(conn, prescription_id)?;
            Ok(repository::list_dispensings_for_prescription(conn, prescription_id)?)
        })
    }
}

fn load_prescription(conn: &Connection, id: &Uuid) -> Result<Prescription, EngineError> {
    repository::get_prescription(conn, id)?.ok_or_else(|| EngineError::not_found("Prescription", id))
}
