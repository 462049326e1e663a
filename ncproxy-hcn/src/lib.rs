//! Host network manager seam for ncproxy.
//!
//! The host network manager owns network, endpoint and namespace objects and
//! applies policies to them. ncproxy and the compute agents only talk to it
//! through the [`HostNetwork`] trait so the backing implementation can be the
//! platform's native manager or the [`InMemoryHostNetwork`] shipped here.

pub mod error;
pub mod memory;
pub mod model;

use async_trait::async_trait;

pub use error::{HcnError, Result};
pub use memory::InMemoryHostNetwork;
pub use model::*;

/// Operations ncproxy needs from the host network manager.
///
/// Name lookups fail with the matching `*NotFound` error when nothing carries
/// the requested name. Name uniqueness is enforced by the implementation.
#[async_trait]
pub trait HostNetwork: Send + Sync {
    async fn get_network_by_name(&self, name: &str) -> Result<NetworkDescriptor>;

    async fn list_networks(&self) -> Result<Vec<NetworkDescriptor>>;

    /// Create a network. An empty `id` is replaced by a generated one.
    async fn create_network(&self, network: NetworkDescriptor) -> Result<NetworkDescriptor>;

    async fn delete_network(&self, id: &str) -> Result<()>;

    async fn get_endpoint_by_name(&self, name: &str) -> Result<EndpointDescriptor>;

    async fn list_endpoints(&self) -> Result<Vec<EndpointDescriptor>>;

    /// Create an endpoint on an existing network. An empty `id` is replaced
    /// by a generated one.
    async fn create_endpoint(&self, endpoint: EndpointDescriptor) -> Result<EndpointDescriptor>;

    async fn delete_endpoint(&self, id: &str) -> Result<()>;

    async fn get_namespace(&self, id: &str) -> Result<NamespaceBinding>;

    async fn add_namespace_endpoint(&self, namespace_id: &str, endpoint_id: &str) -> Result<()>;

    async fn remove_namespace_endpoint(&self, namespace_id: &str, endpoint_id: &str)
    -> Result<()>;

    async fn modify_endpoint_settings(
        &self,
        endpoint_id: &str,
        request: &ModifyEndpointSettingRequest,
    ) -> Result<()>;
}
