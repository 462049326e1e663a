//! gRPC Registration implementation.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::info;

use super::proto::registration::registration_server::Registration;
use super::proto::registration::*;
use crate::broker::{BrokerError, NetworkConfigBroker};
use crate::nodenet::NetworkingRequestType;
use crate::validation::ValidationError;

/// Runtime-facing service. Shares its broker with the orchestration surface.
pub struct RegistrationImpl {
    broker: Arc<NetworkConfigBroker>,
}

impl RegistrationImpl {
    pub fn new(broker: Arc<NetworkConfigBroker>) -> Self {
        Self { broker }
    }
}

#[tonic::async_trait]
impl Registration for RegistrationImpl {
    async fn register_compute_agent(
        &self,
        request: Request<RegisterComputeAgentRequest>,
    ) -> Result<Response<RegisterComputeAgentResponse>, Status> {
        let req = request.into_inner();
        info!(
            container_id = %req.container_id,
            agent_address = %req.agent_address,
            "RegisterComputeAgent"
        );

        self.broker
            .register_compute_agent(&req.container_id, &req.agent_address)
            .await?;
        Ok(Response::new(RegisterComputeAgentResponse {}))
    }

    async fn configure_networking(
        &self,
        request: Request<ConfigureNetworkingInternalRequest>,
    ) -> Result<Response<ConfigureNetworkingInternalResponse>, Status> {
        let req = request.into_inner();
        info!(
            container_id = %req.container_id,
            request_type = req.request_type,
            "ConfigureNetworking"
        );

        let request_type = RequestType::try_from(req.request_type)
            .map(NetworkingRequestType::from)
            .map_err(|_| {
                BrokerError::from(ValidationError::UnknownEnum {
                    field: "request_type",
                    value: req.request_type,
                })
            })?;

        self.broker
            .configure_networking(&req.container_id, request_type)
            .await?;
        Ok(Response::new(ConfigureNetworkingInternalResponse {}))
    }
}
