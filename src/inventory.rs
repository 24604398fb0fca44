//! Medication stock with first-expire-first-out allocation.

use std::sync::Arc;

use rusqlite::Connection;
use uuid::Uuid;

use crate::context::{Actor, Clock};
use crate::db::repository;
use crate::db::Store;
use crate::error::EngineError;
use crate::models::{
    BatchAllocation, InventoryBatch, LowStockAlert, Medication, Role, StockReceipt,
};

const STOCK_KEEPERS: &[Role] = &[Role::Pharmacist, Role::Admin];

pub struct InventoryAllocationEngine {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl InventoryAllocationEngine {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn register_medication(
        &self,
        actor: &Actor,
        name: &str,
        unit_price_cents: i64,
        reorder_level: i64,
    ) -> Result<Medication, EngineError> {
        actor.ensure_role(STOCK_KEEPERS, "register medications")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation("medication name is required".into()));
        }
        if unit_price_cents < 0 || reorder_level < 0 {
            return Err(EngineError::Validation(
                "unit price and reorder level must not be negative".into(),
            ));
        }

        let medication = self.store.transaction(|conn| {
            if repository::medication_name_taken(conn, name)? {
                return Err(EngineError::Conflict(format!("medication {name} already registered")));
            }
            let medication = Medication {
                id: Uuid::new_v4(),
                name: name.to_string(),
                unit_price_cents,
                reorder_level,
            };
            repository::insert_medication(conn, &medication)?;
            Ok(medication)
        })?;

        tracing::info!(medication_id = %medication.id, name = %medication.name, "Medication registered");
        Ok(medication)
    }

    /// Record a delivery as a new batch. Batches are never merged, even when
    /// the batch number repeats.
    pub fn receive_stock(&self, actor: &Actor, receipt: StockReceipt) -> Result<InventoryBatch, EngineError> {
        actor.ensure_role(STOCK_KEEPERS, "receive stock")?;
        if receipt.quantity <= 0 {
            return Err(EngineError::Validation(format!(
                "received quantity must be positive, got {}",
                receipt.quantity
            )));
        }
        if receipt.cost_price_cents < 0 {
            return Err(EngineError::Validation("cost price must not be negative".into()));
        }
        if receipt.batch_number.trim().is_empty() {
            return Err(EngineError::Validation("batch number is required".into()));
        }
        let now = self.clock.now();

        let batch = self.store.transaction(|conn| -> Result<InventoryBatch, EngineError> {
            load_medication(conn, &receipt.medication_id)?;
            let batch = InventoryBatch {
                id: Uuid::new_v4(),
                medication_id: receipt.medication_id,
                batch_number: receipt.batch_number.trim().to_string(),
                quantity_on_hand: receipt.quantity,
                expiry_date: receipt.expiry_date,
                cost_price_cents: receipt.cost_price_cents,
                supplier: receipt.supplier,
                received_at: now,
            };
            repository::insert_batch(conn, &batch)?;
            Ok(batch)
        })?;

        tracing::info!(
            batch_id = %batch.id,
            medication_id = %batch.medication_id,
            batch_number = %batch.batch_number,
            quantity = batch.quantity_on_hand,
            expiry = %batch.expiry_date,
            "Stock received"
        );
        Ok(batch)
    }

    /// Take `quantity` units of a medication, soonest expiry first, in its
    /// own transaction. See [`allocate_in_tx`].
    pub fn allocate_for_dispense(
        &self,
        medication_id: &Uuid,
        quantity: i64,
    ) -> Result<Vec<BatchAllocation>, EngineError> {
        self.store
            .transaction(|conn| allocate_in_tx(conn, medication_id, quantity))
    }

    pub fn total_stock(&self, medication_id: &Uuid) -> Result<i64, EngineError> {
        self.store.read(|conn| {
            load_medication(conn, medication_id)?;
            Ok(repository::total_stock(conn, medication_id)?)
        })
    }

    /// Every batch of a medication in FEFO order, emptied ones included.
    pub fn list_batches(&self, medication_id: &Uuid) -> Result<Vec<InventoryBatch>, EngineError> {
        self.store.read(|conn| {
            load_medication(conn, medication_id)?;
            Ok(repository::list_batches_fefo(conn, medication_id, false)?)
        })
    }

    /// Medications whose total stock is at or below their reorder level.
    pub fn low_stock_alerts(&self) -> Result<Vec<LowStockAlert>, EngineError> {
        self.store.read(|conn| Ok(repository::low_stock_medications(conn)?))
    }

    pub fn get_medication(&self, medication_id: &Uuid) -> Result<Medication, EngineError> {
        self.store.read(|conn| load_medication(conn, medication_id))
    }
}

/// FEFO allocation inside the caller's transaction.
///
/// Greedily consumes in-stock batches ordered by expiry date, then receipt
/// time. Either the full quantity is allocated and every touched batch
/// decremented, or nothing is written and a `Conflict` is returned.
/// Expired batches are not skipped; expiry only orders them.
pub(crate) fn allocate_in_tx(
    conn: &Connection,
    medication_id: &Uuid,
    quantity: i64,
) -> Result<Vec<BatchAllocation>, EngineError> {
    if quantity <= 0 {
        return Err(EngineError::Validation(format!(
            "allocation quantity must be positive, got {quantity}"
        )));
    }
    let medication = load_medication(conn, medication_id)?;
    let batches = repository::list_batches_fefo(conn, medication_id, true)?;

    let mut remaining = quantity;
    let mut plan = Vec::new();
    for batch in batches {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.quantity_on_hand);
        plan.push(BatchAllocation {
            batch_id: batch.id,
            batch_number: batch.batch_number,
            quantity: take,
        });
        remaining -= take;
    }

    if remaining > 0 {
        let available = quantity - remaining;
        tracing::warn!(
            medication_id = %medication_id,
            requested = quantity,
            available,
            "Allocation rejected: insufficient stock"
        );
        return Err(EngineError::Conflict(format!(
            "insufficient stock for {}: requested {quantity}, available {available}",
            medication.name
        )));
    }

    for allocation in &plan {
        if !repository::decrement_batch(conn, &allocation.batch_id, allocation.quantity)? {
            return Err(EngineError::Conflict(format!(
                "batch {} changed during allocation",
                allocation.batch_number
            )));
        }
    }

    tracing::info!(
        medication_id = %medication_id,
        quantity,
        batches = plan.len(),
        "Stock allocated"
    );
    Ok(plan)
}

pub(crate) fn load_medication(conn: &Connection, id: &Uuid) -> Result<Medication, EngineError> {
    repository::get_medication(conn, id)?.ok_or_else(|| EngineError::not_found("Medication", id))
}
