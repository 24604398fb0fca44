use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{LabOrderStatus, LabPriority, PrescriptionStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalRecord {
    pub id: Uuid,
    pub patient_ref: Uuid,
    pub doctor_ref: Uuid,
    pub appointment_id: Option<Uuid>,
    pub visit_date: DateTime<Utc>,
    pub soap: SoapNote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoapNote {
    pub subjective: String,
    pub objective: String,
    pub assessment: String,
    pub plan: String,
}

/// One drug line on a medical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub medical_record_id: Uuid,
    pub patient_ref: Uuid,
    pub medication_name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration_days: i64,
    pub quantity: i64,
    pub status: PrescriptionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabOrder {
    pub id: Uuid,
    pub medical_record_id: Uuid,
    pub patient_ref: Uuid,
    pub test_name: String,
    pub priority: LabPriority,
    pub clinical_indication: Option<String>,
    pub status: LabOrderStatus,
    pub ordered_at: DateTime<Utc>,
}

/// Immutable audit row for a stock deduction from one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispensing {
    pub id: Uuid,
    pub prescription_id: Uuid,
    pub medication_id: Uuid,
    pub batch_id: Uuid,
    pub batch_number: String,
    pub quantity: i64,
    pub dispensed_by: Uuid,
    pub dispensed_at: DateTime<Utc>,
}
