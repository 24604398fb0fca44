//! Post-commit notifications to the lab and pharmacy collaborators.
//!
//! Delivery is fire-and-forget: a notification is sent only after the
//! consultation transaction committed, and a failed send never undoes it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// New PENDING work created by a consultation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingWork {
    Prescriptions {
        medical_record_id: Uuid,
        patient_ref: Uuid,
        count: usize,
    },
    LabOrders {
        medical_record_id: Uuid,
        patient_ref: Uuid,
        count: usize,
    },
}

pub trait WorkNotifier: Send + Sync {
    fn notify(&self, work: PendingWork);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl WorkNotifier for NoopNotifier {
    fn notify(&self, _work: PendingWork) {}
}

/// Forwards notifications into an unbounded tokio channel drained by the
/// delivery task of the surrounding application.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<PendingWork>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingWork>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl WorkNotifier for ChannelNotifier {
    fn notify(&self, work: PendingWork) {
        if let Err(e) = self.tx.send(work) {
            tracing::warn!(work = ?e.0, "Pending-work receiver dropped; notification lost");
        }
    }
}
