//! Repository layer: entity-scoped database operations.
//!
//! Every function takes a plain `&Connection`, so the same call works inside
//! a `Store::transaction` closure and in a read-only `Store::read`.

mod appointment;
mod bed;
mod billing;
mod clinical;
mod inventory;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use uuid::Uuid;

use super::DatabaseError;

// Re-export all public items from sub-modules
pub use appointment::*;
pub use bed::*;
pub use billing::*;
pub use clinical::*;
pub use inventory::*;

/// Fixed-width RFC 3339 UTC with milliseconds: lexical order is time order.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(field: &str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidColumn {
            field: field.into(),
            value: raw.into(),
        })
}

pub(crate) fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| DatabaseError::InvalidColumn {
        field: field.into(),
        value: raw.into(),
    })
}

pub(crate) fn parse_id(field: &str, raw: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|_| DatabaseError::InvalidColumn {
        field: field.into(),
        value: raw.into(),
    })
}

pub(crate) fn parse_opt_id(field: &str, raw: Option<String>) -> Result<Option<Uuid>, DatabaseError> {
    raw.as_deref().map(|s| parse_id(field, s)).transpose()
}
