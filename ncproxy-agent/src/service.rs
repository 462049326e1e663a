//! gRPC ComputeAgent implementation.

use std::sync::Arc;

use ncproxy_hcn::{EndpointDescriptor, HcnError, HostNetwork};
use thiserror::Error;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::guest::{GuestError, GuestNetwork, IovSettings, NetworkAdapter};
use crate::proto::compute_agent_server::ComputeAgent;
use crate::proto::*;

/// Agent errors.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to get endpoint with name `{name}`: {source}")]
    Endpoint {
        name: String,
        #[source]
        source: HcnError,
    },

    #[error("endpoint `{0}` is not bound to a namespace")]
    NoNamespace(String),

    #[error("failed to remove endpoint `{endpoint}` from namespace `{namespace}`: {source}")]
    Detach {
        endpoint: String,
        namespace: String,
        #[source]
        source: GuestError,
    },

    #[error("failed to update guest network adapter: {0}")]
    UpdateAdapter(#[source] GuestError),

    #[error(transparent)]
    Guest(#[from] GuestError),
}

impl From<AgentError> for Status {
    fn from(e: AgentError) -> Self {
        match &e {
            AgentError::Endpoint { source, .. } if source.is_not_found() => {
                Status::not_found(e.to_string())
            }
            AgentError::NoNamespace(_) => Status::failed_precondition(e.to_string()),
            AgentError::Guest(GuestError::NicExists(_)) => Status::already_exists(e.to_string()),
            AgentError::UpdateAdapter(GuestError::NicNotFound(_)) => {
                Status::not_found(e.to_string())
            }
            _ => Status::internal(e.to_string()),
        }
    }
}

/// Serves NIC operations for a single guest.
///
/// Every call is a single attempt: endpoint resolution and the guest
/// operation run once and the first error is returned.
pub struct ComputeAgentImpl {
    host: Arc<dyn HostNetwork>,
    guest: Arc<dyn GuestNetwork>,
}

impl ComputeAgentImpl {
    pub fn new(host: Arc<dyn HostNetwork>, guest: Arc<dyn GuestNetwork>) -> Self {
        Self { host, guest }
    }

    async fn resolve_endpoint(&self, name: &str) -> Result<EndpointDescriptor, AgentError> {
        self.host
            .get_endpoint_by_name(name)
            .await
            .map_err(|source| AgentError::Endpoint {
                name: name.to_string(),
                source,
            })
    }

    pub async fn attach_nic(&self, nic_id: &str, endpoint_name: &str) -> Result<(), AgentError> {
        let endpoint = self.resolve_endpoint(endpoint_name).await?;
        let namespace = endpoint
            .namespace_id
            .clone()
            .ok_or_else(|| AgentError::NoNamespace(endpoint_name.to_string()))?;

        self.guest
            .add_endpoint_to_namespace(&namespace, nic_id, &endpoint)
            .await?;
        Ok(())
    }

    pub async fn detach_nic(&self, endpoint_name: &str) -> Result<(), AgentError> {
        let endpoint = self.resolve_endpoint(endpoint_name).await?;
        let namespace = endpoint
            .namespace_id
            .clone()
            .ok_or_else(|| AgentError::NoNamespace(endpoint_name.to_string()))?;

        let endpoints = [endpoint];
        self.guest
            .remove_endpoints_from_namespace(&namespace, &endpoints)
            .await
            .map_err(|source| AgentError::Detach {
                endpoint: endpoint_name.to_string(),
                namespace,
                source,
            })
    }

    pub async fn update_adapter(
        &self,
        nic_id: &str,
        endpoint_name: &str,
        iov_weight: u32,
    ) -> Result<(), AgentError> {
        let endpoint = self.resolve_endpoint(endpoint_name).await?;
        let adapter = NetworkAdapter {
            endpoint_id: endpoint.id,
            mac_address: endpoint.mac_address,
            iov_settings: Some(IovSettings {
                offload_weight: iov_weight,
            }),
        };

        self.guest
            .update_nic(nic_id, &adapter)
            .await
            .map_err(AgentError::UpdateAdapter)
    }
}

#[tonic::async_trait]
impl ComputeAgent for ComputeAgentImpl {
    async fn add_nic(
        &self,
        request: Request<AddNicInternalRequest>,
    ) -> Result<Response<AddNicInternalResponse>, Status> {
        let req = request.into_inner();
        info!(
            container_id = %req.container_id,
            nic_id = %req.nic_id,
            endpoint = %req.endpoint_name,
            "AddNIC"
        );

        self.attach_nic(&req.nic_id, &req.endpoint_name).await?;
        Ok(Response::new(AddNicInternalResponse {}))
    }

    async fn modify_nic(
        &self,
        request: Request<ModifyNicInternalRequest>,
    ) -> Result<Response<ModifyNicInternalResponse>, Status> {
        let req = request.into_inner();
        info!(
            nic_id = %req.nic_id,
            endpoint = %req.endpoint_name,
            iov_weight = req.iov_weight,
            "ModifyNIC"
        );

        self.update_adapter(&req.nic_id, &req.endpoint_name, req.iov_weight)
            .await?;
        Ok(Response::new(ModifyNicInternalResponse {}))
    }

    async fn delete_nic(
        &self,
        request: Request<DeleteNicInternalRequest>,
    ) -> Result<Response<DeleteNicInternalResponse>, Status> {
        let req = request.into_inner();
        info!(
            container_id = %req.container_id,
            nic_id = %req.nic_id,
            endpoint = %req.endpoint_name,
            "DeleteNIC"
        );

        self.detach_nic(&req.endpoint_name).await?;
        Ok(Response::new(DeleteNicInternalResponse {}))
    }
}
