//! Application state wiring.

use std::sync::Arc;
use std::time::Duration;

use warden_core::{CryptoService, EventBus, Result, RuntimeConfig};
use warden_devices::{AdapterRegistry, DeviceRegistry, DeviceService, WebhookIngest};
use warden_storage::FleetStore;
use warden_sync::{BackoffPolicy, InMemoryDirectory, ReconciliationEngine, SyncLedger};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub service: Arc<DeviceService>,
    pub engine: Arc<ReconciliationEngine>,
    pub ingest: Arc<WebhookIngest>,
    pub directory: Arc<InMemoryDirectory>,
    pub event_bus: EventBus,
}

impl AppState {
    /// Build the full state from runtime configuration: open storage,
    /// wire the registries and services together.
    pub async fn build(config: &RuntimeConfig) -> Result<Self> {
        let store = FleetStore::open(&config.storage_path)?;
        Self::build_with_store(config, Some(store)).await
    }

    /// Build state without persistence (tests, ephemeral runs).
    pub async fn build_in_memory() -> Result<Self> {
        Self::build_with_store(&RuntimeConfig::default(), None).await
    }

    async fn build_with_store(
        config: &RuntimeConfig,
        store: Option<Arc<FleetStore>>,
    ) -> Result<Self> {
        let crypto = CryptoService::from_env_or_generate();
        let event_bus = EventBus::with_name("warden");

        let registry = Arc::new(match &store {
            Some(store) => DeviceRegistry::with_store(store.clone(), crypto).await?,
            None => DeviceRegistry::new(crypto),
        });

        let adapters = Arc::new(AdapterRegistry::with_default_adapters(
            Duration::from_secs(config.command_timeout_secs),
        ));
        let service = Arc::new(DeviceService::new(
            registry.clone(),
            adapters,
            event_bus.clone(),
        ));

        let ledger = Arc::new(match &store {
            Some(store) => SyncLedger::with_store(store.clone()).await?,
            None => SyncLedger::new(),
        });
        let directory = Arc::new(InMemoryDirectory::new());
        let engine = Arc::new(ReconciliationEngine::with_backoff(
            service.clone(),
            directory.clone(),
            ledger,
            event_bus.clone(),
            BackoffPolicy::new(
                Duration::from_millis(config.sync_backoff_base_ms),
                Duration::from_millis(config.sync_backoff_cap_ms),
            ),
        ));

        let ingest = Arc::new(WebhookIngest::new(registry.clone(), event_bus.clone()));

        Ok(Self {
            registry,
            service,
            engine,
            ingest,
            directory,
            event_bus,
        })
    }
}
