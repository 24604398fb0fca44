use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub name: String,
    pub unit_price_cents: i64,
    pub reorder_level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryBatch {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub batch_number: String,
    pub quantity_on_hand: i64,
    pub expiry_date: NaiveDate,
    pub cost_price_cents: i64,
    pub supplier: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Incoming purchase-order line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReceipt {
    pub medication_id: Uuid,
    pub batch_number: String,
    pub quantity: i64,
    pub expiry_date: NaiveDate,
    pub cost_price_cents: i64,
    pub supplier: Option<String>,
}

/// Units taken from one batch by a FEFO allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocation {
    pub batch_id: Uuid,
    pub batch_number: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub medication_id: Uuid,
    pub name: String,
    pub current_stock: i64,
    pub reorder_level: i64,
}
