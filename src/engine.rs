//! Process bootstrap: one store, one clock, one notifier, shared by every
//! component handed out from here.

use std::sync::Arc;

use thiserror::Error;

use crate::beds::BedAllocationManager;
use crate::billing::BillingLedger;
use crate::config::{ConfigError, EngineConfig};
use crate::consultation::ConsultationOrchestrator;
use crate::context::{Clock, SystemClock};
use crate::db::{DatabaseError, Store};
use crate::dispensing::DispensingCoordinator;
use crate::inventory::InventoryAllocationEngine;
use crate::notify::{NoopNotifier, WorkNotifier};
use crate::scheduling::SchedulingLedger;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Cannot create data directory {path}: {reason}")]
    DataDir { path: String, reason: String },
}

pub struct Engine {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn WorkNotifier>,
    config: EngineConfig,
}

impl Engine {
    /// Open the file-backed store named by `config`, creating its directory
    /// and applying migrations.
    pub fn open(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn WorkNotifier>,
    ) -> Result<Self, BootstrapError> {
        if let Some(dir) = config.database_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| BootstrapError::DataDir {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        let store = Store::open(&config.database_path, config.busy_timeout())?;
        tracing::info!(
            path = %config.database_path.display(),
            version = crate::config::APP_VERSION,
            "Engine store opened"
        );
        Ok(Self::from_parts(Arc::new(store), clock, notifier, config))
    }

    /// Environment-configured engine on the system clock, without a
    /// work notifier.
    pub fn from_env() -> Result<Self, BootstrapError> {
        let config = EngineConfig::from_env()?;
        Self::open(config, Arc::new(SystemClock), Arc::new(NoopNotifier))
    }

    pub fn in_memory(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn WorkNotifier>,
    ) -> Result<Self, BootstrapError> {
        let store = Store::open_in_memory()?;
        Ok(Self::from_parts(Arc::new(store), clock, notifier, config))
    }

    pub fn from_parts(
        store: Arc<Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn WorkNotifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduling(&self) -> SchedulingLedger {
        SchedulingLedger::new(self.store.clone(), self.clock.clone())
    }

    pub fn beds(&self) -> BedAllocationManager {
        BedAllocationManager::new(self.store.clone(), self.clock.clone())
    }

    pub fn inventory(&self) -> InventoryAllocationEngine {
        InventoryAllocationEngine::new(self.store.clone(), self.clock.clone())
    }

    pub fn billing(&self) -> BillingLedger {
        BillingLedger::new(self.store.clone(), self.clock.clone())
    }

    pub fn dispensing(&self) -> DispensingCoordinator {
        DispensingCoordinator::new(
            self.store.clone(),
            self.clock.clone(),
            self.config.invoice_prefix.clone(),
        )
    }

    pub fn consultations(&self) -> ConsultationOrchestrator {
        ConsultationOrchestrator::new(
            self.store.clone(),
            self.clock.clone(),
            self.notifier.clone(),
            self.config.consultation_fee_cents,
            self.config.invoice_prefix.clone(),
        )
    }
}
