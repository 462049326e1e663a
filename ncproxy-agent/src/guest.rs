//! Guest-side network seam.
//!
//! A [`GuestNetwork`] performs the actual hot-add, hot-remove and adapter
//! update inside one isolated guest. The runtime owning the guest provides
//! the real implementation; [`InMemoryGuest`] records attachments instead.

use std::collections::HashMap;

use async_trait::async_trait;
use ncproxy_hcn::EndpointDescriptor;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Guest errors.
#[derive(Debug, Error)]
pub enum GuestError {
    #[error("NIC already attached: {0}")]
    NicExists(String),

    #[error("NIC not found: {0}")]
    NicNotFound(String),

    #[error("Endpoint {endpoint} is not attached in namespace {namespace}")]
    EndpointNotAttached { endpoint: String, namespace: String },

    #[error("Guest operation failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, GuestError>;

/// Offload settings carried on a guest network adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IovSettings {
    pub offload_weight: u32,
}

/// Guest-visible description of a network adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAdapter {
    pub endpoint_id: String,
    pub mac_address: String,
    pub iov_settings: Option<IovSettings>,
}

impl NetworkAdapter {
    pub fn offload_weight(&self) -> u32 {
        self.iov_settings.map(|s| s.offload_weight).unwrap_or(0)
    }
}

#[async_trait]
pub trait GuestNetwork: Send + Sync {
    /// Hot-add `endpoint` into the guest namespace as NIC `nic_id`.
    async fn add_endpoint_to_namespace(
        &self,
        namespace_id: &str,
        nic_id: &str,
        endpoint: &EndpointDescriptor,
    ) -> Result<()>;

    /// Hot-remove every endpoint in `endpoints` from the guest namespace.
    /// Stops at the first failure; endpoints already removed stay removed.
    async fn remove_endpoints_from_namespace(
        &self,
        namespace_id: &str,
        endpoints: &[EndpointDescriptor],
    ) -> Result<()>;

    /// Replace the adapter settings of NIC `nic_id`.
    async fn update_nic(&self, nic_id: &str, adapter: &NetworkAdapter) -> Result<()>;
}

/// A NIC as seen from inside the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestNic {
    pub namespace_id: String,
    pub adapter: NetworkAdapter,
}

/// [`GuestNetwork`] that keeps attached NICs in memory.
#[derive(Default)]
pub struct InMemoryGuest {
    nics: Mutex<HashMap<String, GuestNic>>,
}

impl InMemoryGuest {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn nic(&self, nic_id: &str) -> Option<GuestNic> {
        self.nics.lock().await.get(nic_id).cloned()
    }

    pub async fn nic_count(&self) -> usize {
        self.nics.lock().await.len()
    }
}

#[async_trait]
impl GuestNetwork for InMemoryGuest {
    async fn add_endpoint_to_namespace(
        &self,
        namespace_id: &str,
        nic_id: &str,
        endpoint: &EndpointDescriptor,
    ) -> Result<()> {
        let mut nics = self.nics.lock().await;
        if nics.contains_key(nic_id) {
            return Err(GuestError::NicExists(nic_id.to_string()));
        }
        nics.insert(
            nic_id.to_string(),
            GuestNic {
                namespace_id: namespace_id.to_string(),
                adapter: NetworkAdapter {
                    endpoint_id: endpoint.id.clone(),
                    mac_address: endpoint.mac_address.clone(),
                    iov_settings: None,
                },
            },
        );
        debug!(nic_id = %nic_id, endpoint = %endpoint.id, namespace = %namespace_id, "Guest NIC added");
        Ok(())
    }

    async fn remove_endpoints_from_namespace(
        &self,
        namespace_id: &str,
        endpoints: &[EndpointDescriptor],
    ) -> Result<()> {
        let mut nics = self.nics.lock().await;
        for endpoint in endpoints {
            let nic_id = nics
                .iter()
                .find(|(_, nic)| {
                    nic.namespace_id == namespace_id && nic.adapter.endpoint_id == endpoint.id
                })
                .map(|(id, _)| id.clone())
                .ok_or_else(|| GuestError::EndpointNotAttached {
                    endpoint: endpoint.id.clone(),
                    namespace: namespace_id.to_string(),
                })?;
            nics.remove(&nic_id);
            debug!(nic_id = %nic_id, endpoint = %endpoint.id, "Guest NIC removed");
        }
        Ok(())
    }

    async fn update_nic(&self, nic_id: &str, adapter: &NetworkAdapter) -> Result<()> {
        let mut nics = self.nics.lock().await;
        let nic = nics
            .get_mut(nic_id)
            .ok_or_else(|| GuestError::NicNotFound(nic_id.to_string()))?;
        nic.adapter = adapter.clone();
        debug!(nic_id = %nic_id, weight = adapter.offload_weight(), "Guest NIC updated");
        Ok(())
    }
}
