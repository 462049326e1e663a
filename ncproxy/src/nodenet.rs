//! Client for the external node network service.

use std::time::Duration;

use async_trait::async_trait;
use tonic::Status;
use tonic::transport::Channel;

use crate::grpc::proto::nodenetsvc::{
    self, ConfigureNetworkingRequest, PingNodeNetworkServiceRequest,
    node_network_service_client::NodeNetworkServiceClient,
};
use crate::grpc::proto::registration;
use crate::locator::{DialError, Locator};

/// Kind of networking change requested for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkingRequestType {
    Setup,
    Teardown,
    Modify,
}

impl std::fmt::Display for NetworkingRequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkingRequestType::Setup => write!(f, "setup"),
            NetworkingRequestType::Teardown => write!(f, "teardown"),
            NetworkingRequestType::Modify => write!(f, "modify"),
        }
    }
}

impl From<registration::RequestType> for NetworkingRequestType {
    fn from(t: registration::RequestType) -> Self {
        match t {
            registration::RequestType::Setup => NetworkingRequestType::Setup,
            registration::RequestType::Teardown => NetworkingRequestType::Teardown,
            registration::RequestType::Modify => NetworkingRequestType::Modify,
        }
    }
}

impl From<NetworkingRequestType> for nodenetsvc::RequestType {
    fn from(t: NetworkingRequestType) -> Self {
        match t {
            NetworkingRequestType::Setup => nodenetsvc::RequestType::Setup,
            NetworkingRequestType::Teardown => nodenetsvc::RequestType::Teardown,
            NetworkingRequestType::Modify => nodenetsvc::RequestType::Modify,
        }
    }
}

/// The external orchestrator deciding node network topology.
#[async_trait]
pub trait NodeNetworkService: Send + Sync {
    async fn configure_networking(
        &self,
        container_id: &str,
        request_type: NetworkingRequestType,
    ) -> Result<(), Status>;

    /// Returns the service's ping response message.
    async fn ping(&self) -> Result<String, Status>;
}

pub struct GrpcNodeNetworkClient {
    client: NodeNetworkServiceClient<Channel>,
}

impl GrpcNodeNetworkClient {
    pub async fn connect(locator: &Locator, timeout: Duration) -> Result<Self, DialError> {
        let channel = locator.connect(timeout).await?;
        Ok(Self {
            client: NodeNetworkServiceClient::new(channel),
        })
    }
}

#[async_trait]
impl NodeNetworkService for GrpcNodeNetworkClient {
    async fn configure_networking(
        &self,
        container_id: &str,
        request_type: NetworkingRequestType,
    ) -> Result<(), Status> {
        let mut client = self.client.clone();
        client
            .configure_networking(ConfigureNetworkingRequest {
                container_id: container_id.to_string(),
                request_type: nodenetsvc::RequestType::from(request_type) as i32,
            })
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<String, Status> {
        let mut client = self.client.clone();
        let response = client
            .ping_node_network_service(PingNodeNetworkServiceRequest {
                ping_request_message: "ncproxy".to_string(),
            })
            .await?;
        Ok(response.into_inner().ping_response_message)
    }
}
