//! Invoices and payment application.
//!
//! Every invoice mutator derives balance and status through
//! [`invoice_balance`] and [`derive_invoice_status`]; nothing else writes
//! those columns.
//!
//! Overpayment is allowed and reconciled: the payment row keeps the amount
//! actually received, `amount_paid` is the running sum of payments, the
//! balance floors at zero and the surplus is reported by
//! [`Invoice::overpaid_cents`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::context::{Actor, Clock};
use crate::db::repository;
use crate::db::Store;
use crate::error::EngineError;
use crate::models::{
    derive_invoice_status, invoice_balance, Invoice, InvoiceItem, InvoiceStatus, Payment,
    PaymentMethod, PaymentStatus,
};

pub struct BillingLedger {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl BillingLedger {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Apply one payment to an invoice.
    ///
    /// Rejects non-positive amounts and invoices already PAID. A patient may
    /// only pay their own invoice. `reference` defaults to a generated
    /// `TX-<millis>-<suffix>` transaction reference.
    pub fn apply_payment(
        &self,
        actor: &Actor,
        invoice_id: &Uuid,
        amount_cents: i64,
        method: PaymentMethod,
        reference: Option<String>,
    ) -> Result<Payment, EngineError> {
        if amount_cents <= 0 {
            return Err(EngineError::Validation(format!(
                "payment amount must be positive, got {amount_cents}"
            )));
        }
        let now = self.clock.now();
        let reference = reference
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| default_reference(&now));

        let (payment, invoice) = self.store.transaction(|conn| {
            let invoice = load_invoice(conn, invoice_id)?;
            actor.ensure_owns(&invoice.patient_ref, "invoice")?;

            if invoice.status == InvoiceStatus::Paid {
                tracing::warn!(invoice_id = %invoice_id, "Payment rejected: invoice already paid");
                return Err(EngineError::illegal_transition(
                    "invoice",
                    invoice.status,
                    InvoiceStatus::Paid,
                ));
            }

            let amount_paid = invoice
                .amount_paid_cents
                .checked_add(amount_cents)
                .ok_or_else(|| EngineError::Validation("payment amount overflows invoice".into()))?;
            let balance = invoice_balance(invoice.total_cents, amount_paid);
            let status = derive_invoice_status(invoice.total_cents, amount_paid);

            let payment = Payment {
                id: Uuid::new_v4(),
                invoice_id: invoice.id,
                amount_cents,
                method,
                status: PaymentStatus::Completed,
                transaction_reference: reference.clone(),
                processed_by: actor.id,
                created_at: now,
            };
            repository::insert_payment(conn, &payment)?;

            // amount_paid is the sum of the payment rows, new one included.
            let recorded = repository::sum_payments(conn, &invoice.id)?;
            if recorded != amount_paid {
                return Err(EngineError::Conflict(format!(
                    "invoice {} payments sum to {recorded} cents, expected {amount_paid}",
                    invoice.invoice_number
                )));
            }

            if !repository::update_invoice_payment_state(
                conn,
                &invoice.id,
                invoice.amount_paid_cents,
                amount_paid,
                balance,
                status,
                &now,
            )? {
                return Err(EngineError::Conflict(format!(
                    "invoice {} changed while applying payment",
                    invoice.invoice_number
                )));
            }

            Ok((payment, load_invoice(conn, invoice_id)?))
        })?;

        if invoice.overpaid_cents() > 0 {
            tracing::warn!(
                invoice_id = %invoice.id,
                overpaid_cents = invoice.overpaid_cents(),
                "Invoice overpaid; surplus held as credit"
            );
        }
        tracing::info!(
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            amount_cents,
            balance_cents = invoice.balance_cents,
            status = %invoice.status,
            "Payment applied"
        );
        Ok(payment)
    }

    /// Fetch an invoice; patients only see their own.
    pub fn get_invoice(&self, actor: &Actor, invoice_id: &Uuid) -> Result<Invoice, EngineError> {
        self.store.read(|conn| {
            let invoice = load_invoice(conn, invoice_id)?;
            actor.ensure_owns(&invoice.patient_ref, "invoice")?;
            Ok(invoice)
        })
    }

    /// A patient's invoices, newest first; patients only see their own.
    pub fn list_patient_invoices(&self, actor: &Actor, patient_ref: &Uuid) -> Result<Vec<Invoice>, EngineError> {
        actor.ensure_owns(patient_ref, "invoice")?;
        self.store
            .read(|conn| Ok(repository::list_invoices_for_patient(conn, patient_ref)?))
    }

    pub fn list_payments(&self, actor: &Actor, invoice_id: &Uuid) -> Result<Vec<Payment>, EngineError> {
        self.store.read(|conn| {
            let invoice = load_invoice(conn, invoice_id)?;
            actor.ensure_owns(&invoice.patient_ref, "invoice")?;
            Ok(repository::list_payments_for_invoice(conn, invoice_id)?)
        })
    }
}

/// Create an invoice inside the caller's transaction.
///
/// Tax is zero, so subtotal and total are the sum of the line totals.
/// Nothing is paid yet, so the status comes out ISSUED, or PAID for a
/// zero-total invoice.
pub(crate) fn create_invoice_in_tx(
    conn: &Connection,
    patient_ref: &Uuid,
    medical_record_id: Option<Uuid>,
    items: Vec<InvoiceItem>,
    invoice_prefix: &str,
    now: &DateTime<Utc>,
) -> Result<Invoice, EngineError> {
    if items.is_empty() {
        return Err(EngineError::Validation("an invoice needs at least one item".into()));
    }

    let mut subtotal: i64 = 0;
    for item in &items {
        if item.quantity <= 0 || item.unit_price_cents < 0 {
            return Err(EngineError::Validation(format!(
                "invalid invoice line '{}': quantity {} at {} cents",
                item.description, item.quantity, item.unit_price_cents
            )));
        }
        subtotal = item
            .line_total_cents()
            .and_then(|line| subtotal.checked_add(line))
            .ok_or_else(|| EngineError::Validation("invoice total overflows".into()))?;
    }

    let tax = 0;
    let total = subtotal + tax;
    let sequence = repository::count_invoices(conn)? + 1;

    let invoice = Invoice {
        id: Uuid::new_v4(),
        invoice_number: format!("{invoice_prefix}-{}-{sequence:06}", now.format("%Y%m%d")),
        patient_ref: *patient_ref,
        medical_record_id,
        items,
        subtotal_cents: subtotal,
        tax_cents: tax,
        total_cents: total,
        amount_paid_cents: 0,
        balance_cents: invoice_balance(total, 0),
        status: derive_invoice_status(total, 0),
        created_at: *now,
        updated_at: *now,
    };
    repository::insert_invoice(conn, &invoice)?;

    tracing::info!(
        invoice_id = %invoice.id,
        invoice_number = %invoice.invoice_number,
        total_cents = invoice.total_cents,
        "Invoice issued"
    );
    load_invoice(conn, &invoice.id)
}

fn load_invoice(conn: &Connection, id: &Uuid) -> Result<Invoice, EngineError> {
    repository::get_invoice(conn, id)?.ok_or_else(|| EngineError::not_found("Invoice", id))
}

fn default_reference(now: &DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("TX-{}-{}", now.timestamp_millis(), &suffix[..8])
}
