use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{InvoiceStatus, PaymentMethod, PaymentStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub description: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl InvoiceItem {
    /// `quantity * unit_price`, `None` on overflow.
    pub fn line_total_cents(&self) -> Option<i64> {
        self.quantity.checked_mul(self.unit_price_cents)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub patient_ref: Uuid,
    pub medical_record_id: Option<Uuid>,
    pub items: Vec<InvoiceItem>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub amount_paid_cents: i64,
    pub balance_cents: i64,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Amount received beyond the invoice total, held as patient credit.
    pub fn overpaid_cents(&self) -> i64 {
        (self.amount_paid_cents - self.total_cents).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_reference: String,
    pub processed_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Remaining amount owed, floored at zero.
pub fn invoice_balance(total_cents: i64, amount_paid_cents: i64) -> i64 {
    (total_cents - amount_paid_cents).max(0)
}

/// The single invoice status rule shared by every invoice mutator.
///
/// balance <= 0 is PAID; anything paid short of the total is PARTIAL;
/// otherwise ISSUED.
pub fn derive_invoice_status(total_cents: i64, amount_paid_cents: i64) -> InvoiceStatus {
    if total_cents - amount_paid_cents <= 0 {
        InvoiceStatus::Paid
    } else if amount_paid_cents > 0 {
        InvoiceStatus::Partial
    } else {
        InvoiceStatus::Issued
    }
}
