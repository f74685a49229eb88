//! Explicit per-connection context handed to every operation.

use std::sync::Arc;

use kube::Client;
use kubedyn_core::OperatorConfig;
use tracing::info;

use crate::discovery::{DiscoveryBackend, KubeDiscovery, StaticDiscovery};
use crate::mapper::ResourceMapper;
use crate::memory::MemoryResources;
use crate::resources::{KubeResourceClient, ResourceClient};

/// One cluster connection: discovery cache, resource endpoints and settings.
///
/// Built once per connection by the caller and torn down with [`ClusterContext::close`].
pub struct ClusterContext {
    mapper: ResourceMapper,
    resources: Arc<dyn ResourceClient>,
    config: OperatorConfig,
}

impl ClusterContext {
    pub fn from_client(client: Client, config: OperatorConfig) -> Self {
        let discovery = Arc::new(KubeDiscovery::new(client.clone()));
        let resources = Arc::new(KubeResourceClient::new(client));
        Self::with_parts(discovery, resources, config)
    }

    /// Build a client from `cfg` and wrap it.
    pub fn connect(cfg: kube::Config, config: OperatorConfig) -> Result<Self, kube::Error> {
        let cluster = cfg.cluster_url.to_string();
        let client = Client::try_from(cfg)?;
        info!(cluster = %cluster, field_manager = %config.field_manager, "cluster context ready");
        Ok(Self::from_client(client, config))
    }

    pub fn with_parts(
        discovery: Arc<dyn DiscoveryBackend>,
        resources: Arc<dyn ResourceClient>,
        config: OperatorConfig,
    ) -> Self {
        let mapper = ResourceMapper::new(discovery, config.discovery_timeout);
        Self { mapper, resources, config }
    }

    /// Context over the built-in static discovery table and an in-memory endpoint.
    pub fn in_memory(config: OperatorConfig) -> (Self, Arc<StaticDiscovery>, Arc<MemoryResources>) {
        let discovery = Arc::new(StaticDiscovery::builtin());
        let resources = Arc::new(MemoryResources::new());
        let ctx = Self::with_parts(discovery.clone(), resources.clone(), config);
        (ctx, discovery, resources)
    }

    pub fn mapper(&self) -> &ResourceMapper {
        &self.mapper
    }

    pub fn resources(&self) -> &dyn ResourceClient {
        self.resources.as_ref()
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Drop cached mappings and release the connection.
    pub fn close(self) {
        let cached = self.mapper.cached_len();
        self.mapper.invalidate();
        info!(cached, "cluster context closed");
    }
}
