pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;

pub mod scheduling; // Doctor time slots
pub mod beds; // Wards, beds, admissions
pub mod inventory; // FEFO stock
pub mod billing; // Invoices and payments
pub mod dispensing; // Pharmacy dispense
pub mod consultation; // Visit records and orders

pub mod engine;

pub use context::{Actor, Clock, FixedClock, SystemClock};
pub use engine::{BootstrapError, Engine};
pub use error::EngineError;

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` (normally
/// `EngineConfig::log_filter`) applies. A second call is a no-op.
pub fn init_tracing(default_filter: &str) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
    }
}
