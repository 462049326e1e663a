//! gRPC NetworkConfigProxy implementation.

use std::sync::Arc;

use ncproxy_hcn as hcn;
use tonic::{Request, Response, Status};
use tracing::info;

use super::proto::ncproxy::create_endpoint_request::PolicySettings;
use super::proto::ncproxy::network_config_proxy_server::NetworkConfigProxy;
use super::proto::ncproxy::*;
use crate::broker::{
    BrokerError, CreateEndpointParams, CreateNetworkParams, NetworkConfigBroker, NicRequest,
};
use crate::validation::ValidationError;

fn network_mode(value: i32) -> Result<hcn::NetworkMode, ValidationError> {
    match NetworkMode::try_from(value) {
        Ok(NetworkMode::Transparent) => Ok(hcn::NetworkMode::Transparent),
        Ok(NetworkMode::Nat) => Ok(hcn::NetworkMode::Nat),
        Err(_) => Err(ValidationError::UnknownEnum {
            field: "mode",
            value,
        }),
    }
}

fn ipam_type(value: i32) -> Result<hcn::IpamType, ValidationError> {
    match IpamType::try_from(value) {
        Ok(IpamType::Static) => Ok(hcn::IpamType::Static),
        Ok(IpamType::Dhcp) => Ok(hcn::IpamType::Dhcp),
        Err(_) => Err(ValidationError::UnknownEnum {
            field: "ipam_type",
            value,
        }),
    }
}

fn interrupt_moderation(value: i32) -> Result<hcn::InterruptModeration, ValidationError> {
    match InterruptModeration::try_from(value) {
        Ok(InterruptModeration::Default) => Ok(hcn::InterruptModeration::Default),
        Ok(InterruptModeration::Adaptive) => Ok(hcn::InterruptModeration::Adaptive),
        Ok(InterruptModeration::Off) => Ok(hcn::InterruptModeration::Off),
        Ok(InterruptModeration::Low) => Ok(hcn::InterruptModeration::Low),
        Ok(InterruptModeration::Medium) => Ok(hcn::InterruptModeration::Medium),
        Ok(InterruptModeration::High) => Ok(hcn::InterruptModeration::High),
        Err(_) => Err(ValidationError::UnknownEnum {
            field: "interrupt_moderation",
            value,
        }),
    }
}

/// Build the endpoint policy described by `policy_type` and its settings.
/// The settings variant must match the type; no type and no settings means
/// no policy.
fn endpoint_policy(
    policy_type: i32,
    settings: Option<PolicySettings>,
) -> Result<Option<hcn::EndpointPolicy>, BrokerError> {
    let policy_type = EndpointPolicyType::try_from(policy_type).map_err(|_| {
        ValidationError::UnknownEnum {
            field: "policy_type",
            value: policy_type,
        }
    })?;

    let (hcn_type, settings) = match (policy_type, settings) {
        (EndpointPolicyType::Unspecified, None) => return Ok(None),
        (EndpointPolicyType::Iov, Some(PolicySettings::Iov(iov))) => {
            let setting = hcn::IovPolicySetting {
                iov_offload_weight: iov.iov_offload_weight,
                queue_pairs_requested: iov.queue_pairs_requested,
                interrupt_moderation: interrupt_moderation(iov.interrupt_moderation)?,
            };
            (hcn::EndpointPolicyType::Iov, serde_json::to_value(setting))
        }
        (EndpointPolicyType::PortName, Some(PolicySettings::PortName(port))) => {
            crate::validation::require_fields(&[("port_name", port.port_name.as_str())])?;
            let setting = hcn::PortNamePolicySetting {
                name: port.port_name,
            };
            (hcn::EndpointPolicyType::PortName, serde_json::to_value(setting))
        }
        (other, _) => {
            return Err(ValidationError::PolicyMismatch(other.as_str_name().to_string()).into());
        }
    };

    let settings = settings
        .map_err(|e| BrokerError::Host {
            context: "failed to encode endpoint policy".to_string(),
            source: e.into(),
        })?;
    Ok(Some(hcn::EndpointPolicy {
        policy_type: hcn_type,
        settings,
    }))
}

fn endpoint_to_proto(endpoint: hcn::EndpointDescriptor) -> GetEndpointResponse {
    GetEndpointResponse {
        id: endpoint.id,
        name: endpoint.name,
        network_id: endpoint.network_id,
        namespace_id: endpoint.namespace_id.unwrap_or_default(),
    }
}

fn network_to_proto(network: hcn::NetworkDescriptor) -> GetNetworkResponse {
    GetNetworkResponse {
        id: network.id,
        name: network.name,
    }
}

/// Orchestration-facing service.
pub struct NetworkConfigProxyImpl {
    broker: Arc<NetworkConfigBroker>,
}

impl NetworkConfigProxyImpl {
    pub fn new(broker: Arc<NetworkConfigBroker>) -> Self {
        Self { broker }
    }
}

#[tonic::async_trait]
impl NetworkConfigProxy for NetworkConfigProxyImpl {
    async fn add_nic(
        &self,
        request: Request<AddNicRequest>,
    ) -> Result<Response<AddNicResponse>, Status> {
        let req = request.into_inner();
        info!(
            container_id = %req.container_id,
            nic_id = %req.nic_id,
            endpoint = %req.endpoint_name,
            "AddNIC"
        );

        self.broker
            .add_nic(&NicRequest::new(
                req.container_id,
                req.nic_id,
                req.endpoint_name,
            ))
            .await?;
        Ok(Response::new(AddNicResponse {}))
    }

    async fn modify_nic(
        &self,
        request: Request<ModifyNicRequest>,
    ) -> Result<Response<ModifyNicResponse>, Status> {
        let req = request.into_inner();
        info!(
            container_id = %req.container_id,
            nic_id = %req.nic_id,
            endpoint = %req.endpoint_name,
            iov_weight = req.iov_weight,
            "ModifyNIC"
        );

        self.broker
            .modify_nic(
                &NicRequest::new(req.container_id, req.nic_id, req.endpoint_name),
                req.iov_weight,
            )
            .await?;
        Ok(Response::new(ModifyNicResponse {}))
    }

    async fn delete_nic(
        &self,
        request: Request<DeleteNicRequest>,
    ) -> Result<Response<DeleteNicResponse>, Status> {
        let req = request.into_inner();
        info!(
            container_id = %req.container_id,
            nic_id = %req.nic_id,
            endpoint = %req.endpoint_name,
            "DeleteNIC"
        );

        self.broker
            .delete_nic(&NicRequest::new(
                req.container_id,
                req.nic_id,
                req.endpoint_name,
            ))
            .await?;
        Ok(Response::new(DeleteNicResponse {}))
    }

    async fn create_network(
        &self,
        request: Request<CreateNetworkRequest>,
    ) -> Result<Response<CreateNetworkResponse>, Status> {
        let req = request.into_inner();
        info!(
            name = %req.name,
            switch = %req.switch_name,
            mode = req.mode,
            ipam_type = req.ipam_type,
            "CreateNetwork"
        );

        let params = CreateNetworkParams {
            mode: network_mode(req.mode).map_err(BrokerError::from)?,
            ipam_type: ipam_type(req.ipam_type).map_err(BrokerError::from)?,
            name: req.name,
            switch_name: req.switch_name,
            subnet_prefixes: req.subnet_ipaddress_prefix,
            default_gateway: req.default_gateway,
        };
        let id = self.broker.create_network(params).await?;
        Ok(Response::new(CreateNetworkResponse { id }))
    }

    async fn create_endpoint(
        &self,
        request: Request<CreateEndpointRequest>,
    ) -> Result<Response<CreateEndpointResponse>, Status> {
        let req = request.into_inner();
        info!(
            name = %req.name,
            network = %req.network_name,
            mac = %req.macaddress,
            ip = %req.ipaddress,
            "CreateEndpoint"
        );

        let params = CreateEndpointParams {
            policy: endpoint_policy(req.policy_type, req.policy_settings)?,
            name: req.name,
            network_name: req.network_name,
            mac_address: req.macaddress,
            ip_address: req.ipaddress,
            prefix_length: req.ipaddress_prefixlength,
        };
        let id = self.broker.create_endpoint(params).await?;
        Ok(Response::new(CreateEndpointResponse { id }))
    }

    async fn add_endpoint(
        &self,
        request: Request<AddEndpointRequest>,
    ) -> Result<Response<AddEndpointResponse>, Status> {
        let req = request.into_inner();
        info!(name = %req.name, namespace_id = %req.namespace_id, "AddEndpoint");

        self.broker
            .add_endpoint(&req.name, &req.namespace_id)
            .await?;
        Ok(Response::new(AddEndpointResponse {}))
    }

    async fn delete_endpoint(
        &self,
        request: Request<DeleteEndpointRequest>,
    ) -> Result<Response<DeleteEndpointResponse>, Status> {
        let req = request.into_inner();
        info!(name = %req.name, "DeleteEndpoint");

        self.broker.delete_endpoint(&req.name).await?;
        Ok(Response::new(DeleteEndpointResponse {}))
    }

    async fn delete_network(
        &self,
        request: Request<DeleteNetworkRequest>,
    ) -> Result<Response<DeleteNetworkResponse>, Status> {
        let req = request.into_inner();
        info!(name = %req.name, "DeleteNetwork");

        self.broker.delete_network(&req.name).await?;
        Ok(Response::new(DeleteNetworkResponse {}))
    }

    async fn get_endpoint(
        &self,
        request: Request<GetEndpointRequest>,
    ) -> Result<Response<GetEndpointResponse>, Status> {
        let req = request.into_inner();
        let endpoint = self.broker.get_endpoint(&req.name).await?;
        Ok(Response::new(endpoint_to_proto(endpoint)))
    }

    async fn get_network(
        &self,
        request: Request<GetNetworkRequest>,
    ) -> Result<Response<GetNetworkResponse>, Status> {
        let req = request.into_inner();
        let network = self.broker.get_network(&req.name).await?;
        Ok(Response::new(network_to_proto(network)))
    }

    async fn get_endpoints(
        &self,
        _request: Request<GetEndpointsRequest>,
    ) -> Result<Response<GetEndpointsResponse>, Status> {
        let endpoints = self
            .broker
            .get_endpoints()
            .await?
            .into_iter()
            .map(endpoint_to_proto)
            .collect();
        Ok(Response::new(GetEndpointsResponse { endpoints }))
    }

    async fn get_networks(
        &self,
        _request: Request<GetNetworksRequest>,
    ) -> Result<Response<GetNetworksResponse>, Status> {
        let networks = self
            .broker
            .get_networks()
            .await?
            .into_iter()
            .map(network_to_proto)
            .collect();
        Ok(Response::new(GetNetworksResponse { networks }))
    }
}
