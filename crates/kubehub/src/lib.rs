//! kubedyn kubehub: discovery, cached resource mapping and resource endpoints.
//!
//! Every cluster interaction goes through two seams, [`DiscoveryBackend`] and
//! [`ResourceClient`]. The kube-backed implementations talk to a real API server;
//! [`StaticDiscovery`] and [`MemoryResources`] stand in for it in tests.

#![forbid(unsafe_code)]

pub mod context;
pub mod discovery;
pub mod mapper;
pub mod memory;
pub mod resources;

pub use context::ClusterContext;
pub use discovery::{DiscoveredResource, DiscoveryBackend, KubeDiscovery, StaticDiscovery};
pub use mapper::ResourceMapper;
pub use memory::MemoryResources;
pub use resources::{EventStream, KubeResourceClient, ResourceClient, WatchOptions};
