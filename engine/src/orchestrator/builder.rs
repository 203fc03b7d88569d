//! Orchestrator construction

use parking_lot::Mutex;
use sdk::errors::Result;
use sdk::interfaces::{PluginLoader, SigningBackend, Transport};
use sdk::source::RemoteSource;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

use super::{AcquisitionOrchestrator, Inner};
use crate::cache::DownloadCache;
use crate::config::AcquisitionConfig;
use crate::discovery::{DiscoveryCoordinator, DiscoveryEngine, IndexEngine, RegistryEngine};
use crate::downloader::Downloader;
use crate::events::EventBus;
use crate::sources::SourceRegistry;
use crate::transport::HttpTransport;
use crate::validator::Validator;

/// Assembles an [`AcquisitionOrchestrator`] from a configuration and its
/// collaborators
///
/// Unset collaborators fall back to the built-in ones: [`HttpTransport`] for
/// transport, no loader, no signing backend, and a fresh [`EventBus`].
/// Engines added with [`discovery_engine`](Self::discovery_engine) take
/// precedence over the built-in index and registry engines.
pub struct OrchestratorBuilder {
    config: AcquisitionConfig,
    transport: Option<Arc<dyn Transport>>,
    loader: Option<Arc<dyn PluginLoader>>,
    signer: Option<Arc<dyn SigningBackend>>,
    engines: Vec<Arc<dyn DiscoveryEngine>>,
    events: Option<Arc<EventBus>>,
    sources: Vec<RemoteSource>,
}

impl OrchestratorBuilder {
    pub fn new(config: AcquisitionConfig) -> Self {
        Self {
            config,
            transport: None,
            loader: None,
            signer: None,
            engines: Vec::new(),
            events: None,
            sources: Vec::new(),
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn signing_backend(mut self, signer: Arc<dyn SigningBackend>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn discovery_engine(mut self, engine: Arc<dyn DiscoveryEngine>) -> Self {
        self.engines.push(engine);
        self
    }

    pub fn event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Register `source` when the orchestrator is built
    pub fn source(mut self, source: RemoteSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Validate the configuration, open the cache and reputation store, and
    /// wire the components together
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, an unusable cache directory, an
    /// unreadable reputation store, or an invalid initial source.
    pub async fn build(self) -> Result<AcquisitionOrchestrator> {
        let mut config = self.config;
        config.validate_and_process()?;
        let config = Arc::new(config);

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config.network)?),
        };
        let events = self.events.unwrap_or_else(|| Arc::new(EventBus::new()));

        let registry = SourceRegistry::with_sources(self.sources)?;
        let cache = Arc::new(DownloadCache::open(&config.cache).await?);
        let downloader = Downloader::new(
            Arc::clone(&config),
            cache,
            Arc::clone(&transport),
            Arc::clone(&events),
        );

        let discovery = DiscoveryCoordinator::new(config.discovery.clone(), Arc::clone(&events));
        for engine in self.engines {
            discovery.register_engine(engine);
        }
        let headers = config.network.custom_headers.clone();
        discovery.register_engine(Arc::new(
            IndexEngine::new(Arc::clone(&transport)).with_headers(headers.clone()),
        ));
        discovery.register_engine(Arc::new(
            RegistryEngine::new(Arc::clone(&transport)).with_headers(headers),
        ));

        let validator = Validator::new(&config, self.signer, Arc::clone(&events))?;
        let workers = Arc::new(Semaphore::new(
            config.orchestrator.max_concurrent_operations.max(1),
        ));

        info!(
            "Acquisition pipeline ready: {} sources, cache at {}",
            registry.len(),
            config.cache.directory.display()
        );

        Ok(AcquisitionOrchestrator {
            inner: Arc::new(Inner {
                config,
                registry,
                downloader,
                discovery,
                validator,
                loader: self.loader,
                events,
                workers,
                operations: Mutex::new(HashMap::new()),
            }),
        })
    }
}
