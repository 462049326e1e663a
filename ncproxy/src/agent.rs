//! Broker-side handles to per-guest compute agents.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ncproxy_agent::ComputeAgentClient;
use ncproxy_agent::proto::{
    AddNicInternalRequest, DeleteNicInternalRequest, ModifyNicInternalRequest,
};
use tonic::Status;
use tonic::transport::Channel;
use tracing::info;

use crate::locator::{DialError, Locator};

/// A handle capable of invoking one compute agent.
///
/// Results are the agent's own; callers propagate them unchanged.
#[async_trait]
pub trait ComputeAgentHandle: Send + Sync {
    async fn add_nic(&self, container_id: &str, nic_id: &str, endpoint_name: &str)
    -> Result<(), Status>;

    async fn modify_nic(&self, nic_id: &str, endpoint_name: &str, iov_weight: u32)
    -> Result<(), Status>;

    async fn delete_nic(
        &self,
        container_id: &str,
        nic_id: &str,
        endpoint_name: &str,
    ) -> Result<(), Status>;
}

/// Opens handles to compute agents.
#[async_trait]
pub trait AgentDialer: Send + Sync {
    async fn dial(&self, locator: &Locator) -> Result<Arc<dyn ComputeAgentHandle>, DialError>;
}

/// Compute agent reached over gRPC.
pub struct GrpcComputeAgent {
    client: ComputeAgentClient<Channel>,
}

impl GrpcComputeAgent {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: ComputeAgentClient::new(channel),
        }
    }
}

#[async_trait]
impl ComputeAgentHandle for GrpcComputeAgent {
    async fn add_nic(
        &self,
        container_id: &str,
        nic_id: &str,
        endpoint_name: &str,
    ) -> Result<(), Status> {
        let mut client = self.client.clone();
        client
            .add_nic(AddNicInternalRequest {
                container_id: container_id.to_string(),
                nic_id: nic_id.to_string(),
                endpoint_name: endpoint_name.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn modify_nic(
        &self,
        nic_id: &str,
        endpoint_name: &str,
        iov_weight: u32,
    ) -> Result<(), Status> {
        let mut client = self.client.clone();
        client
            .modify_nic(ModifyNicInternalRequest {
                nic_id: nic_id.to_string(),
                endpoint_name: endpoint_name.to_string(),
                iov_weight,
            })
            .await?;
        Ok(())
    }

    async fn delete_nic(
        &self,
        container_id: &str,
        nic_id: &str,
        endpoint_name: &str,
    ) -> Result<(), Status> {
        let mut client = self.client.clone();
        client
            .delete_nic(DeleteNicInternalRequest {
                container_id: container_id.to_string(),
                nic_id: nic_id.to_string(),
                endpoint_name: endpoint_name.to_string(),
            })
            .await?;
        Ok(())
    }
}

/// Dials compute agents over gRPC with a fixed connect timeout.
pub struct GrpcAgentDialer {
    timeout: Duration,
}

impl GrpcAgentDialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl AgentDialer for GrpcAgentDialer {
    async fn dial(&self, locator: &Locator) -> Result<Arc<dyn ComputeAgentHandle>, DialError> {
        let channel = locator.connect(self.timeout).await?;
        info!(addr = %locator, "Connected to compute agent");
        Ok(Arc::new(GrpcComputeAgent::new(channel)))
    }
}
