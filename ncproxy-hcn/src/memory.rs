//! In-memory host network manager.
//!
//! Keeps networks, endpoints and namespace bindings in process memory. Used by
//! the daemon on hosts without a native network manager and by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{HcnError, Result};
use crate::model::*;
use crate::HostNetwork;

#[derive(Default)]
struct State {
    networks: HashMap<String, NetworkDescriptor>,
    endpoints: HashMap<String, EndpointDescriptor>,
    namespaces: HashMap<String, NamespaceBinding>,
}

impl State {
    fn network_by_name(&self, name: &str) -> Option<&NetworkDescriptor> {
        self.networks.values().find(|n| n.name == name)
    }

    fn endpoint_by_name(&self, name: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.values().find(|e| e.name == name)
    }
}

/// [`HostNetwork`] implementation backed by a mutex-protected map.
#[derive(Default)]
pub struct InMemoryHostNetwork {
    state: Mutex<State>,
}

impl InMemoryHostNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an external switch as a transparent network with its own
    /// layer id, the way the host manager exposes switches it did not create.
    pub async fn seed_switch(&self, name: &str) -> Result<NetworkDescriptor> {
        let network = NetworkDescriptor {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            mode: NetworkMode::Transparent,
            ipams: Vec::new(),
            policies: Vec::new(),
            layered_on: Some(Uuid::new_v4().to_string()),
        };

        let mut state = self.state.lock().await;
        if state.network_by_name(name).is_some() {
            return Err(HcnError::NetworkExists(name.to_string()));
        }
        state.networks.insert(network.id.clone(), network.clone());
        debug!(name = %name, layer = ?network.layered_on, "Seeded external switch");
        Ok(network)
    }
}

fn apply_policy_request(endpoint: &mut EndpointDescriptor, request: &ModifyEndpointSettingRequest) {
    let policies = &request.settings.policies;
    match request.request_type {
        RequestType::Add => endpoint.policies.extend(policies.iter().cloned()),
        RequestType::Update | RequestType::Refresh => {
            for policy in policies {
                match endpoint
                    .policies
                    .iter_mut()
                    .find(|p| p.policy_type == policy.policy_type)
                {
                    Some(existing) => existing.settings = policy.settings.clone(),
                    None => endpoint.policies.push(policy.clone()),
                }
            }
        }
        RequestType::Remove => endpoint
            .policies
            .retain(|p| !policies.iter().any(|r| r.policy_type == p.policy_type)),
    }
}

#[async_trait]
impl HostNetwork for InMemoryHostNetwork {
    async fn get_network_by_name(&self, name: &str) -> Result<NetworkDescriptor> {
        let state = self.state.lock().await;
        state
            .network_by_name(name)
            .cloned()
            .ok_or_else(|| HcnError::NetworkNotFound(name.to_string()))
    }

    async fn list_networks(&self) -> Result<Vec<NetworkDescriptor>> {
        let state = self.state.lock().await;
        let mut networks: Vec<_> = state.networks.values().cloned().collect();
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }

    async fn create_network(&self, mut network: NetworkDescriptor) -> Result<NetworkDescriptor> {
        let mut state = self.state.lock().await;
        if state.network_by_name(&network.name).is_some() {
            return Err(HcnError::NetworkExists(network.name));
        }
        if network.id.is_empty() {
            network.id = Uuid::new_v4().to_string();
        }
        if network.layered_on.is_none() {
            network.layered_on = network.layer_constraint();
        }
        state.networks.insert(network.id.clone(), network.clone());
        Ok(network)
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.networks.contains_key(id) {
            return Err(HcnError::NetworkNotFound(id.to_string()));
        }
        if state.endpoints.values().any(|e| e.network_id == id) {
            return Err(HcnError::NetworkInUse(id.to_string()));
        }
        state.networks.remove(id);
        Ok(())
    }

    async fn get_endpoint_by_name(&self, name: &str) -> Result<EndpointDescriptor> {
        let state = self.state.lock().await;
        state
            .endpoint_by_name(name)
            .cloned()
            .ok_or_else(|| HcnError::EndpointNotFound(name.to_string()))
    }

    async fn list_endpoints(&self) -> Result<Vec<EndpointDescriptor>> {
        let state = self.state.lock().await;
        let mut endpoints: Vec<_> = state.endpoints.values().cloned().collect();
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(endpoints)
    }

    async fn create_endpoint(&self, mut endpoint: EndpointDescriptor) -> Result<EndpointDescriptor> {
        let mut state = self.state.lock().await;
        if !state.networks.contains_key(&endpoint.network_id) {
            return Err(HcnError::NetworkNotFound(endpoint.network_id));
        }
        if state.endpoint_by_name(&endpoint.name).is_some() {
            return Err(HcnError::EndpointExists(endpoint.name));
        }
        if endpoint.id.is_empty() {
            endpoint.id = Uuid::new_v4().to_string();
        }
        // Namespace membership is only established through add_namespace_endpoint.
        endpoint.namespace_id = None;
        state.endpoints.insert(endpoint.id.clone(), endpoint.clone());
        Ok(endpoint)
    }

    async fn delete_endpoint(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let endpoint = state
            .endpoints
            .remove(id)
            .ok_or_else(|| HcnError::EndpointNotFound(id.to_string()))?;
        if let Some(ns) = endpoint
            .namespace_id
            .as_ref()
            .and_then(|ns| state.namespaces.get_mut(ns))
        {
            ns.endpoint_ids.retain(|e| e != id);
        }
        Ok(())
    }

    async fn get_namespace(&self, id: &str) -> Result<NamespaceBinding> {
        let state = self.state.lock().await;
        state
            .namespaces
            .get(id)
            .cloned()
            .ok_or_else(|| HcnError::NamespaceNotFound(id.to_string()))
    }

    async fn add_namespace_endpoint(&self, namespace_id: &str, endpoint_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let endpoint = state
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| HcnError::EndpointNotFound(endpoint_id.to_string()))?;

        match endpoint.namespace_id.as_deref() {
            Some(current) if current == namespace_id => return Ok(()),
            Some(current) => {
                return Err(HcnError::EndpointBound {
                    endpoint: endpoint_id.to_string(),
                    namespace: current.to_string(),
                });
            }
            None => endpoint.namespace_id = Some(namespace_id.to_string()),
        }

        let binding = state
            .namespaces
            .entry(namespace_id.to_string())
            .or_insert_with(|| NamespaceBinding {
                id: namespace_id.to_string(),
                endpoint_ids: Vec::new(),
            });
        binding.endpoint_ids.push(endpoint_id.to_string());
        Ok(())
    }

    async fn remove_namespace_endpoint(
        &self,
        namespace_id: &str,
        endpoint_id: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let binding = state
            .namespaces
            .get_mut(namespace_id)
            .ok_or_else(|| HcnError::NamespaceNotFound(namespace_id.to_string()))?;
        if !binding.endpoint_ids.iter().any(|e| e == endpoint_id) {
            return Err(HcnError::EndpointNotFound(endpoint_id.to_string()));
        }
        binding.endpoint_ids.retain(|e| e != endpoint_id);

        if let Some(endpoint) = state.endpoints.get_mut(endpoint_id) {
            endpoint.namespace_id = None;
        }
        Ok(())
    }

    async fn modify_endpoint_settings(
        &self,
        endpoint_id: &str,
        request: &ModifyEndpointSettingRequest,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let endpoint = state
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| HcnError::EndpointNotFound(endpoint_id.to_string()))?;
        apply_policy_request(endpoint, request);
        debug!(
            endpoint = %endpoint_id,
            request_type = %request.request_type,
            policies = endpoint.policies.len(),
            "Modified endpoint settings"
        );
        Ok(())
    }
}
