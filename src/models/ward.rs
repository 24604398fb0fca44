use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AdmissionStatus, BedStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ward {
    pub id: Uuid,
    pub name: String,
    pub capacity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bed {
    pub id: Uuid,
    pub ward_id: Uuid,
    pub number: String,
    pub status: BedStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub id: Uuid,
    pub patient_ref: Uuid,
    pub bed_id: Uuid,
    pub reason: String,
    pub status: AdmissionStatus,
    pub admitted_by: Uuid,
    pub admission_date: DateTime<Utc>,
    pub estimated_discharge_date: Option<NaiveDate>,
    pub discharge_date: Option<DateTime<Utc>>,
}

/// Bed counts for one ward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardOccupancy {
    pub ward_id: Uuid,
    pub name: String,
    pub capacity: i64,
    pub total: i64,
    pub occupied: i64,
    pub available: i64,
    pub dirty: i64,
}

/// One bed of a ward with the admission currently holding it, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WardBed {
    pub bed: Bed,
    pub admission: Option<Admission>,
}
