//! Collaborator seams: the authenticated actor and the clock.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::Role;

/// Authenticated caller, resolved by the surrounding application layer.
///
/// For a `Patient` actor, `id` is the patient reference itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    /// Patients may only touch their own records; staff are not restricted here.
    pub fn ensure_owns(&self, patient_ref: &Uuid, what: &str) -> Result<(), EngineError> {
        if self.role.is_patient() && self.id != *patient_ref {
            return Err(EngineError::Authorization(format!(
                "patient {} cannot act on another patient's {what}",
                self.id
            )));
        }
        Ok(())
    }

    pub fn ensure_role(&self, allowed: &[Role], action: &str) -> Result<(), EngineError> {
        if !allowed.contains(&self.role) {
            return Err(EngineError::Authorization(format!(
                "role {} may not {action}",
                self.role
            )));
        }
        Ok(())
    }
}

/// Source of `now()`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
