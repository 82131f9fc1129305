use crate::config::{DiscoveryConfig, PlatformConfig, Settings, StoreConfig};
use crate::coordinator::ExecutionCoordinator;
use crate::discovery::CutoffDiscoveryEngine;
use crate::platform::PlatformClient;
use crate::probe::HttpMarketProbe;
use crate::store::CutoffStore;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Application wiring. Owns the parsed configuration and constructs the
/// store, probe, engine and coordinator, so tests can assemble the same
/// pieces around in-memory fakes instead.
#[derive(Clone)]
pub struct AppContext {
    settings: Settings,
}

impl AppContext {
    pub fn initialize(settings: Settings) -> Result<Self> {
        Ok(Self { settings })
    }

    pub fn store_config(&self) -> Result<StoreConfig> {
        StoreConfig::from_settings(&self.settings)
    }

    pub fn discovery_config(&self) -> Result<DiscoveryConfig> {
        DiscoveryConfig::from_settings(&self.settings)
    }

    pub fn store(&self) -> Result<Arc<CutoffStore>> {
        let config = self.store_config()?;
        let store = CutoffStore::open(&config.dir).with_context(|| {
            format!("failed to open cutoff store at {}", config.dir.display())
        })?;
        Ok(Arc::new(store))
    }

    /// Builds the platform-backed client. Fails when PLATFORM_BASE_URL is
    /// unset; commands that only touch the local store never call this.
    pub fn platform_client(&self) -> Result<Arc<PlatformClient>> {
        let config = PlatformConfig::from_settings(&self.settings)?;
        Ok(Arc::new(PlatformClient::new(&config)?))
    }

    pub fn coordinator(&self) -> Result<ExecutionCoordinator> {
        let store = self.store()?;
        let platform = self.platform_client()?;
        let probe = Arc::new(HttpMarketProbe::new(platform.clone()));
        let engine = CutoffDiscoveryEngine::new(probe, self.discovery_config()?);
        let max_record_age = self.store_config()?.max_record_age;
        Ok(ExecutionCoordinator::new(
            store,
            engine,
            platform,
            max_record_age,
        ))
    }
}
