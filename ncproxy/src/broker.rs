//! Network configuration broker.
//!
//! Holds the routing and ordering logic shared by both RPC surfaces. NIC
//! operations resolve the container's compute agent through the
//! [`AgentRegistry`]; network and endpoint operations go straight to the
//! host network manager.

use std::sync::Arc;

use ncproxy_hcn::{
    EndpointDescriptor, EndpointPolicy, EndpointPolicyType, HcnError, HostNetwork, Ipam,
    IpamType, IovPolicySetting, LayerConstraintPolicySetting, ModifyEndpointSettingRequest,
    NetworkDescriptor, NetworkMode, NetworkPolicy, NetworkPolicyType, RequestType, Route,
    Subnet,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tonic::Status;
use tracing::{debug, info, warn};

use crate::agent::{AgentDialer, ComputeAgentHandle};
use crate::audit::BrokerAuditLogger;
use crate::locator::{DialError, Locator};
use crate::nodenet::{NetworkingRequestType, NodeNetworkService};
use crate::registry::{AgentRegistration, AgentRegistry};
use crate::validation::{self, ValidationError};

const DEFAULT_ROUTE: &str = "0.0.0.0/0";

/// Step of the ModifyNIC sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyNicStep {
    GuestAdapterUpdate,
    HostPolicyUpdate,
    HostPolicyRemove,
}

impl std::fmt::Display for ModifyNicStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModifyNicStep::GuestAdapterUpdate => write!(f, "guest adapter update"),
            ModifyNicStep::HostPolicyUpdate => write!(f, "host policy update"),
            ModifyNicStep::HostPolicyRemove => write!(f, "host policy remove"),
        }
    }
}

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("failed to connect to compute agent at `{locator}`: {source}")]
    AgentDial {
        locator: String,
        #[source]
        source: DialError,
    },

    #[error("{}", .0.message())]
    Downstream(Status),

    #[error("ModifyNIC {step} step failed: {source}")]
    ModifyNic {
        step: ModifyNicStep,
        #[source]
        source: Box<BrokerError>,
    },

    #[error("{context}: {source}")]
    Host {
        context: String,
        #[source]
        source: HcnError,
    },
}

impl BrokerError {
    fn host(context: impl Into<String>, source: HcnError) -> Self {
        BrokerError::Host {
            context: context.into(),
            source,
        }
    }
}

impl From<BrokerError> for Status {
    fn from(e: BrokerError) -> Self {
        let message = e.to_string();
        match e {
            BrokerError::Validation(_) => Status::invalid_argument(message),
            BrokerError::NotFound(_) => Status::not_found(message),
            BrokerError::FailedPrecondition(_) => Status::failed_precondition(message),
            BrokerError::AgentDial { .. } => Status::unavailable(message),
            BrokerError::Downstream(status) => status,
            BrokerError::ModifyNic { source, .. } => {
                let code = Status::from(*source).code();
                Status::new(code, message)
            }
            BrokerError::Host { source, .. } => match source {
                e if e.is_not_found() => Status::not_found(message),
                HcnError::NetworkExists(_)
                | HcnError::NetworkInUse(_)
                | HcnError::EndpointBound { .. } => Status::failed_precondition(message),
                HcnError::EndpointExists(_) => Status::already_exists(message),
                _ => Status::internal(message),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Correlates one NIC with the container and endpoint it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicRequest {
    pub container_id: String,
    pub nic_id: String,
    pub endpoint_name: String,
}

impl NicRequest {
    pub fn new(
        container_id: impl Into<String>,
        nic_id: impl Into<String>,
        endpoint_name: impl Into<String>,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            nic_id: nic_id.into(),
            endpoint_name: endpoint_name.into(),
        }
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        validation::require_fields(&[
            ("container_id", self.container_id.as_str()),
            ("nic_id", self.nic_id.as_str()),
            ("endpoint_name", self.endpoint_name.as_str()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNetworkParams {
    pub name: String,
    pub mode: NetworkMode,
    pub ipam_type: IpamType,
    pub switch_name: String,
    pub subnet_prefixes: Vec<String>,
    pub default_gateway: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateEndpointParams {
    pub name: String,
    pub network_name: String,
    pub mac_address: String,
    pub ip_address: String,
    pub prefix_length: u32,
    pub policy: Option<EndpointPolicy>,
}

pub struct NetworkConfigBroker {
    host: Arc<dyn HostNetwork>,
    dialer: Arc<dyn AgentDialer>,
    registry: AgentRegistry,
    node_network: Mutex<Option<Arc<dyn NodeNetworkService>>>,
    audit: Arc<BrokerAuditLogger>,
}

impl NetworkConfigBroker {
    pub fn new(
        host: Arc<dyn HostNetwork>,
        dialer: Arc<dyn AgentDialer>,
        audit: Arc<BrokerAuditLogger>,
    ) -> Self {
        Self {
            host,
            dialer,
            registry: AgentRegistry::new(),
            node_network: Mutex::new(None),
            audit,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub async fn set_node_network_service(&self, service: Arc<dyn NodeNetworkService>) {
        *self.node_network.lock().await = Some(service);
    }

    // === Registration ===

    /// Dial the compute agent at `agent_address` and make it the agent for
    /// `container_id`, replacing any earlier registration. Only a failed dial
    /// rejects the call; an unparseable address counts as one.
    pub async fn register_compute_agent(
        &self,
        container_id: &str,
        agent_address: &str,
    ) -> Result<()> {
        let locator: Locator = agent_address
            .parse()
            .map_err(|e| BrokerError::AgentDial {
                locator: agent_address.to_string(),
                source: DialError::Locator(e),
            })?;
        let agent = self
            .dialer
            .dial(&locator)
            .await
            .map_err(|source| BrokerError::AgentDial {
                locator: locator.to_string(),
                source,
            })?;

        let previous = self
            .registry
            .insert(AgentRegistration {
                container_id: container_id.to_string(),
                locator: locator.clone(),
                agent,
            })
            .await;

        match previous {
            Some(previous) => {
                info!(
                    container_id = %container_id,
                    previous = %previous.locator,
                    addr = %locator,
                    "Replaced compute agent registration"
                );
                self.audit
                    .agent_replaced(container_id, &previous.locator, &locator);
            }
            None => {
                info!(container_id = %container_id, addr = %locator, "Registered compute agent");
                self.audit.agent_registered(container_id, &locator);
            }
        }
        Ok(())
    }

    /// Ask the node network service to configure networking for a container.
    pub async fn configure_networking(
        &self,
        container_id: &str,
        request_type: NetworkingRequestType,
    ) -> Result<()> {
        validation::require_fields(&[("container_id", container_id)])?;

        let service = self.node_network.lock().await.clone().ok_or_else(|| {
            BrokerError::FailedPrecondition("no node network service configured".to_string())
        })?;
        service
            .configure_networking(container_id, request_type)
            .await
            .map_err(BrokerError::Downstream)
    }

    // === NIC Operations ===

    async fn agent_for(&self, container_id: &str) -> Result<Arc<dyn ComputeAgentHandle>> {
        self.registry.get(container_id).await.ok_or_else(|| {
            BrokerError::FailedPrecondition(format!(
                "no compute agent registered for container `{}`",
                container_id
            ))
        })
    }

    pub async fn add_nic(&self, req: &NicRequest) -> Result<()> {
        req.validate()?;
        let agent = self.agent_for(&req.container_id).await?;

        agent
            .add_nic(&req.container_id, &req.nic_id, &req.endpoint_name)
            .await
            .map_err(BrokerError::Downstream)?;

        self.audit
            .nic_added(&req.container_id, &req.nic_id, &req.endpoint_name);
        Ok(())
    }

    pub async fn delete_nic(&self, req: &NicRequest) -> Result<()> {
        req.validate()?;
        let agent = self.agent_for(&req.container_id).await?;

        agent
            .delete_nic(&req.container_id, &req.nic_id, &req.endpoint_name)
            .await
            .map_err(BrokerError::Downstream)?;

        self.audit
            .nic_deleted(&req.container_id, &req.nic_id, &req.endpoint_name);
        Ok(())
    }

    /// Change the hardware offload weight of a NIC.
    ///
    /// The guest adapter and the host IOV policy are updated separately, so
    /// the order depends on the direction of the change:
    ///
    /// - weight 0: guest adapter, then host policy update, then host policy
    ///   removal. The guest stops using offload before the host withdraws it.
    /// - weight > 0: host policy update, then guest adapter. The host offers
    ///   offload before the guest starts using it.
    ///
    /// The first failing step ends the call. Steps already applied are left
    /// in place and the error names the step that failed.
    pub async fn modify_nic(&self, req: &NicRequest, iov_weight: u32) -> Result<()> {
        req.validate()?;
        let agent = self.agent_for(&req.container_id).await?;
        let endpoint = self.endpoint_by_name(&req.endpoint_name).await?;

        let settings = serde_json::to_value(IovPolicySetting::with_weight(iov_weight))
            .map_err(|e| BrokerError::host("failed to encode IOV policy", e.into()))?;
        let policies = vec![EndpointPolicy {
            policy_type: EndpointPolicyType::Iov,
            settings,
        }];

        debug!(
            container_id = %req.container_id,
            nic_id = %req.nic_id,
            endpoint_id = %endpoint.id,
            iov_weight,
            "ModifyNIC parameters"
        );

        if iov_weight == 0 {
            self.update_guest_adapter(agent.as_ref(), req, iov_weight)
                .await?;
            self.modify_host_policy(&endpoint, RequestType::Update, &policies)
                .await?;
            self.modify_host_policy(&endpoint, RequestType::Remove, &policies)
                .await?;
        } else {
            self.modify_host_policy(&endpoint, RequestType::Update, &policies)
                .await?;
            self.update_guest_adapter(agent.as_ref(), req, iov_weight)
                .await?;
        }

        self.audit
            .nic_modified(&req.container_id, &req.nic_id, iov_weight);
        Ok(())
    }

    async fn update_guest_adapter(
        &self,
        agent: &dyn ComputeAgentHandle,
        req: &NicRequest,
        iov_weight: u32,
    ) -> Result<()> {
        agent
            .modify_nic(&req.nic_id, &req.endpoint_name, iov_weight)
            .await
            .map_err(|status| {
                step_failed(
                    ModifyNicStep::GuestAdapterUpdate,
                    BrokerError::Downstream(status),
                )
            })
    }

    async fn modify_host_policy(
        &self,
        endpoint: &EndpointDescriptor,
        request_type: RequestType,
        policies: &[EndpointPolicy],
    ) -> Result<()> {
        let step = match request_type {
            RequestType::Remove => ModifyNicStep::HostPolicyRemove,
            _ => ModifyNicStep::HostPolicyUpdate,
        };
        let request = ModifyEndpointSettingRequest::policies(request_type, policies.to_vec());
        self.host
            .modify_endpoint_settings(&endpoint.id, &request)
            .await
            .map_err(|e| {
                step_failed(
                    step,
                    BrokerError::host(
                        format!("failed to modify network adapter `{}`", endpoint.name),
                        e,
                    ),
                )
            })
    }

    // === Network Operations ===

    /// Create a network layered on the physical switch `switch_name`.
    /// Returns the new network's id.
    pub async fn create_network(&self, params: CreateNetworkParams) -> Result<String> {
        validation::require_fields(&[
            ("name", params.name.as_str()),
            ("switch_name", params.switch_name.as_str()),
        ])?;
        let gateway = validation::gateway(&params.default_gateway)?;
        let prefixes = params
            .subnet_prefixes
            .iter()
            .map(|p| validation::subnet(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        match self.host.get_network_by_name(&params.name).await {
            Ok(_) => {
                return Err(BrokerError::FailedPrecondition(format!(
                    "network with name `{}` already exists",
                    params.name
                )));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(BrokerError::host(
                    format!("failed to get network with name `{}`", params.name),
                    e,
                ));
            }
        }

        // Switches not created through the host manager show up as
        // transparent networks carrying the layer id of the uplink.
        let switch = self
            .host
            .get_network_by_name(&params.switch_name)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    BrokerError::NotFound(format!(
                        "no network/switch with name `{}` found",
                        params.switch_name
                    ))
                } else {
                    BrokerError::host(
                        format!("failed to get network/switch `{}`", params.switch_name),
                        e,
                    )
                }
            })?;
        let layer_id = switch
            .layered_on
            .clone()
            .filter(|layer| !layer.is_empty())
            .ok_or_else(|| {
                BrokerError::NotFound(format!("no layer ID found for network `{}`", switch.id))
            })?;

        let routes = match gateway {
            Some(gw) => vec![Route {
                next_hop: gw.to_string(),
                destination_prefix: DEFAULT_ROUTE.to_string(),
            }],
            None => Vec::new(),
        };
        let subnets = prefixes
            .iter()
            .map(|prefix| Subnet {
                ip_address_prefix: prefix.to_string(),
                routes: routes.clone(),
            })
            .collect();

        let layer_policy = serde_json::to_value(LayerConstraintPolicySetting {
            layer_id: layer_id.clone(),
        })
        .map_err(|e| BrokerError::host("failed to encode layer policy", e.into()))?;

        let network = NetworkDescriptor {
            id: String::new(),
            name: params.name.clone(),
            mode: params.mode,
            ipams: vec![Ipam {
                ipam_type: params.ipam_type,
                subnets,
            }],
            policies: vec![NetworkPolicy {
                policy_type: NetworkPolicyType::LayerConstraint,
                settings: layer_policy,
            }],
            layered_on: None,
        };

        let network = self.host.create_network(network).await.map_err(|e| {
            BrokerError::host(format!("failed to create network `{}`", params.name), e)
        })?;

        info!(
            network_id = %network.id,
            name = %network.name,
            mode = %network.mode,
            layer_id = %layer_id,
            "Created network"
        );
        self.audit
            .network_created(&network.id, &network.name, &layer_id);
        Ok(network.id)
    }

    pub async fn delete_network(&self, name: &str) -> Result<()> {
        validation::require_fields(&[("name", name)])?;
        let network = self.network_by_name(name).await?;

        self.host.delete_network(&network.id).await.map_err(|e| {
            BrokerError::host(format!("failed to delete network with name `{}`", name), e)
        })?;

        info!(network_id = %network.id, name = %name, "Deleted network");
        self.audit.network_deleted(&network.id, name);
        Ok(())
    }

    pub async fn get_network(&self, name: &str) -> Result<NetworkDescriptor> {
        validation::require_fields(&[("name", name)])?;
        self.network_by_name(name).await
    }

    pub async fn get_networks(&self) -> Result<Vec<NetworkDescriptor>> {
        self.host
            .list_networks()
            .await
            .map_err(|e| BrokerError::host("failed to list networks", e))
    }

    async fn network_by_name(&self, name: &str) -> Result<NetworkDescriptor> {
        self.host.get_network_by_name(name).await.map_err(|e| {
            if e.is_not_found() {
                BrokerError::NotFound(format!("no network with name `{}` found", name))
            } else {
                BrokerError::host(format!("failed to get network with name `{}`", name), e)
            }
        })
    }

    // === Endpoint Operations ===

    /// Create an endpoint on network `network_name`. Returns the new
    /// endpoint's id.
    pub async fn create_endpoint(&self, params: CreateEndpointParams) -> Result<String> {
        validation::require_fields(&[
            ("name", params.name.as_str()),
            ("network_name", params.network_name.as_str()),
            ("mac_address", params.mac_address.as_str()),
            ("ip_address", params.ip_address.as_str()),
        ])?;
        let ip_config = validation::ip_config(&params.ip_address, params.prefix_length)?;

        let network = self.network_by_name(&params.network_name).await?;

        let endpoint = EndpointDescriptor {
            id: String::new(),
            name: params.name.clone(),
            network_id: network.id.clone(),
            mac_address: params.mac_address.clone(),
            ip_configurations: vec![ip_config],
            policies: params.policy.into_iter().collect(),
            namespace_id: None,
        };

        let endpoint = self
            .host
            .create_endpoint(endpoint)
            .await
            .map_err(|e| BrokerError::host("failed to create endpoint", e))?;

        info!(
            endpoint_id = %endpoint.id,
            name = %endpoint.name,
            network = %params.network_name,
            "Created endpoint"
        );
        self.audit
            .endpoint_created(&endpoint.id, &endpoint.name, &network.id);
        Ok(endpoint.id)
    }

    /// Bind endpoint `name` into namespace `namespace_id`.
    pub async fn add_endpoint(&self, name: &str, namespace_id: &str) -> Result<()> {
        validation::require_fields(&[("name", name), ("namespace_id", namespace_id)])?;
        let endpoint = self.endpoint_by_name(name).await?;

        self.host
            .add_namespace_endpoint(namespace_id, &endpoint.id)
            .await
            .map_err(|e| {
                BrokerError::host(
                    format!("failed to add endpoint with name `{}` to namespace", name),
                    e,
                )
            })?;

        info!(endpoint_id = %endpoint.id, namespace_id = %namespace_id, "Added endpoint to namespace");
        self.audit
            .endpoint_added(&endpoint.id, name, namespace_id);
        Ok(())
    }

    pub async fn delete_endpoint(&self, name: &str) -> Result<()> {
        validation::require_fields(&[("name", name)])?;
        let endpoint = self.endpoint_by_name(name).await?;

        self.host.delete_endpoint(&endpoint.id).await.map_err(|e| {
            BrokerError::host(format!("failed to delete endpoint with name `{}`", name), e)
        })?;

        info!(endpoint_id = %endpoint.id, name = %name, "Deleted endpoint");
        self.audit.endpoint_deleted(&endpoint.id, name);
        Ok(())
    }

    pub async fn get_endpoint(&self, name: &str) -> Result<EndpointDescriptor> {
        validation::require_fields(&[("name", name)])?;
        self.endpoint_by_name(name).await
    }

    pub async fn get_endpoints(&self) -> Result<Vec<EndpointDescriptor>> {
        self.host
            .list_endpoints()
            .await
            .map_err(|e| BrokerError::host("failed to list endpoints", e))
    }

    async fn endpoint_by_name(&self, name: &str) -> Result<EndpointDescriptor> {
        self.host.get_endpoint_by_name(name).await.map_err(|e| {
            if e.is_not_found() {
                BrokerError::NotFound(format!("no endpoint with name `{}` found", name))
            } else {
                BrokerError::host(format!("failed to get endpoint with name `{}`", name), e)
            }
        })
    }
}

fn step_failed(step: ModifyNicStep, source: BrokerError) -> BrokerError {
    warn!(step = %step, error = %source, "ModifyNIC step failed");
    BrokerError::ModifyNic {
        step,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{CallLog, RecordingHostNetwork, RecordingNodeNetwork, StaticDialer};
    use ncproxy_hcn::InMemoryHostNetwork;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tonic::Code;

    const P1: &str = "unix:///run/ncproxy/P1.sock";
    const P2: &str = "unix:///run/ncproxy/P2.sock";

    struct Fixture {
        log: CallLog,
        host: Arc<InMemoryHostNetwork>,
        recording: Arc<RecordingHostNetwork>,
        dialer: Arc<StaticDialer>,
        broker: NetworkConfigBroker,
    }

    async fn fixture() -> Fixture {
        let log = CallLog::new();
        let host = Arc::new(InMemoryHostNetwork::new());
        host.seed_switch("ext").await.unwrap();

        let recording = Arc::new(RecordingHostNetwork::new(host.clone(), log.clone()));
        let dialer = Arc::new(StaticDialer::new(log.clone()));
        dialer.add_agent(P1).await;
        dialer.add_agent(P2).await;

        let broker = NetworkConfigBroker::new(
            recording.clone(),
            dialer.clone(),
            Arc::new(BrokerAuditLogger::new()),
        );
        Fixture {
            log,
            host,
            recording,
            dialer,
            broker,
        }
    }

    async fn create_endpoint(broker: &NetworkConfigBroker, name: &str) -> String {
        broker
            .create_network(CreateNetworkParams {
                name: "net-a".to_string(),
                mode: NetworkMode::Transparent,
                ipam_type: IpamType::Static,
                switch_name: "ext".to_string(),
                subnet_prefixes: vec!["10.0.0.0/24".to_string()],
                default_gateway: "10.0.0.1".to_string(),
            })
            .await
            .unwrap();
        broker
            .create_endpoint(CreateEndpointParams {
                name: name.to_string(),
                network_name: "net-a".to_string(),
                mac_address: "00-15-5D-00-00-01".to_string(),
                ip_address: "10.0.0.2".to_string(),
                prefix_length: 24,
                policy: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unregistered_container_is_precondition() {
        let f = fixture().await;
        let req = NicRequest::new("C2", "nic-1", "ep-A");

        let err = f.broker.add_nic(&req).await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::FailedPrecondition);
        let err = f.broker.delete_nic(&req).await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::FailedPrecondition);
        let err = f.broker.modify_nic(&req, 100).await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::FailedPrecondition);

        assert!(f.log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_validation_precedes_lookup() {
        let f = fixture().await;

        let err = f
            .broker
            .add_nic(&NicRequest::new("C2", "", "ep-A"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Validation(ValidationError::EmptyField("nic_id"))
        ));
        assert_eq!(Status::from(err).code(), Code::InvalidArgument);

        let err = f
            .broker
            .modify_nic(&NicRequest::new("", "nic-1", "ep-A"), 0)
            .await
            .unwrap_err();
        assert_eq!(Status::from(err).code(), Code::InvalidArgument);

        let err = f
            .broker
            .delete_nic(&NicRequest::new("C2", "nic-1", ""))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Validation(ValidationError::EmptyField("endpoint_name"))
        ));
        assert_eq!(Status::from(err).code(), Code::InvalidArgument);
        assert!(f.log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_add_nic_routes_to_registered_agent() {
        let f = fixture().await;
        f.broker.register_compute_agent("C1", P1).await.unwrap();

        f.broker
            .add_nic(&NicRequest::new("C1", "nic-1", "ep-A"))
            .await
            .unwrap();

        assert_eq!(
            f.log.calls(),
            vec![format!("{}: add_nic(C1, nic-1, ep-A)", P1)]
        );
    }

    #[tokio::test]
    async fn test_reregistration_last_write_wins() {
        let f = fixture().await;
        f.broker.register_compute_agent("C1", P1).await.unwrap();
        f.broker.register_compute_agent("C1", P2).await.unwrap();
        assert_eq!(f.broker.registry().len().await, 1);

        let req = NicRequest::new("C1", "nic-1", "ep-A");
        f.broker.add_nic(&req).await.unwrap();
        f.broker.delete_nic(&req).await.unwrap();

        assert_eq!(
            f.log.calls(),
            vec![
                format!("{}: add_nic(C1, nic-1, ep-A)", P2),
                format!("{}: delete_nic(C1, nic-1, ep-A)", P2),
            ]
        );
    }

    #[tokio::test]
    async fn test_register_dial_failure() {
        let f = fixture().await;

        let err = f
            .broker
            .register_compute_agent("C1", "unix:///run/ncproxy/nobody.sock")
            .await
            .unwrap_err();
        assert_eq!(Status::from(err).code(), Code::Unavailable);

        let err = f
            .broker
            .register_compute_agent("C1", "npipe://computeagent")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AgentDial { .. }));

        // An empty address is a failed dial, not a bad argument.
        let err = f
            .broker
            .register_compute_agent("C1", "")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::AgentDial {
                source: DialError::Locator(_),
                ..
            }
        ));
        assert_eq!(Status::from(err).code(), Code::Unavailable);
        assert!(f.broker.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_modify_nic_disable_order() {
        let f = fixture().await;
        let ep_id = create_endpoint(&f.broker, "ep-A").await;
        f.broker.register_compute_agent("C1", P1).await.unwrap();

        // Offload currently enabled on the endpoint.
        f.host
            .modify_endpoint_settings(
                &ep_id,
                &ModifyEndpointSettingRequest::policies(
                    RequestType::Add,
                    vec![EndpointPolicy {
                        policy_type: EndpointPolicyType::Iov,
                        settings: serde_json::to_value(IovPolicySetting::with_weight(100))
                            .unwrap(),
                    }],
                ),
            )
            .await
            .unwrap();
        f.log.clear();

        f.broker
            .modify_nic(&NicRequest::new("C1", "nic-1", "ep-A"), 0)
            .await
            .unwrap();

        assert_eq!(
            f.log.calls(),
            vec![
                format!("{}: modify_nic(nic-1, ep-A, 0)", P1),
                "host: modify_endpoint_settings(Update)".to_string(),
                "host: modify_endpoint_settings(Remove)".to_string(),
            ]
        );
        let ep = f.host.get_endpoint_by_name("ep-A").await.unwrap();
        assert!(!ep.has_policy(EndpointPolicyType::Iov));
    }

    #[tokio::test]
    async fn test_modify_nic_enable_order() {
        let f = fixture().await;
        create_endpoint(&f.broker, "ep-A").await;
        f.broker.register_compute_agent("C1", P1).await.unwrap();
        f.log.clear();

        f.broker
            .modify_nic(&NicRequest::new("C1", "nic-1", "ep-A"), 100)
            .await
            .unwrap();

        assert_eq!(
            f.log.calls(),
            vec![
                "host: modify_endpoint_settings(Update)".to_string(),
                format!("{}: modify_nic(nic-1, ep-A, 100)", P1),
            ]
        );
        let ep = f.host.get_endpoint_by_name("ep-A").await.unwrap();
        let iov: IovPolicySetting = serde_json::from_value(
            ep.policies
                .iter()
                .find(|p| p.policy_type == EndpointPolicyType::Iov)
                .unwrap()
                .settings
                .clone(),
        )
        .unwrap();
        assert_eq!(iov, IovPolicySetting::with_weight(100));
    }

    #[tokio::test]
    async fn test_modify_nic_guest_failure_stops_sequence() {
        let f = fixture().await;
        create_endpoint(&f.broker, "ep-A").await;
        f.broker.register_compute_agent("C1", P1).await.unwrap();
        f.dialer
            .fail_modify(P1, Status::unavailable("guest gone"))
            .await;
        f.log.clear();

        let err = f
            .broker
            .modify_nic(&NicRequest::new("C1", "nic-1", "ep-A"), 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::ModifyNic {
                step: ModifyNicStep::GuestAdapterUpdate,
                ..
            }
        ));
        let status = Status::from(err);
        assert_eq!(status.code(), Code::Unavailable);
        assert!(status.message().contains("guest adapter update"));

        // No host step ran after the failed guest step.
        assert_eq!(
            f.log.calls(),
            vec![format!("{}: modify_nic(nic-1, ep-A, 0)", P1)]
        );
    }

    #[tokio::test]
    async fn test_modify_nic_enable_host_failure_skips_guest() {
        let f = fixture().await;
        create_endpoint(&f.broker, "ep-A").await;
        f.broker.register_compute_agent("C1", P1).await.unwrap();
        f.recording.fail_modify(RequestType::Update);
        f.log.clear();

        let err = f
            .broker
            .modify_nic(&NicRequest::new("C1", "nic-1", "ep-A"), 100)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::ModifyNic {
                step: ModifyNicStep::HostPolicyUpdate,
                ..
            }
        ));
        let status = Status::from(err);
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("host policy update"));

        // The guest never saw the new weight.
        assert_eq!(
            f.log.calls(),
            vec!["host: modify_endpoint_settings(Update)".to_string()]
        );
        let ep = f.host.get_endpoint_by_name("ep-A").await.unwrap();
        assert!(!ep.has_policy(EndpointPolicyType::Iov));
    }

    #[tokio::test]
    async fn test_modify_nic_disable_remove_failure_keeps_earlier_steps() {
        let f = fixture().await;
        create_endpoint(&f.broker, "ep-A").await;
        f.broker.register_compute_agent("C1", P1).await.unwrap();
        f.recording.fail_modify(RequestType::Remove);
        f.log.clear();

        let err = f
            .broker
            .modify_nic(&NicRequest::new("C1", "nic-1", "ep-A"), 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::ModifyNic {
                step: ModifyNicStep::HostPolicyRemove,
                ..
            }
        ));
        let status = Status::from(err);
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("host policy remove"));

        // Nothing is rolled back: no second guest call, no extra host call.
        assert_eq!(
            f.log.calls(),
            vec![
                format!("{}: modify_nic(nic-1, ep-A, 0)", P1),
                "host: modify_endpoint_settings(Update)".to_string(),
                "host: modify_endpoint_settings(Remove)".to_string(),
            ]
        );

        // The weight-0 policy from the update step stays on the endpoint.
        let ep = f.host.get_endpoint_by_name("ep-A").await.unwrap();
        let iov: IovPolicySetting = serde_json::from_value(
            ep.policies
                .iter()
                .find(|p| p.policy_type == EndpointPolicyType::Iov)
                .unwrap()
                .settings
                .clone(),
        )
        .unwrap();
        assert_eq!(iov, IovPolicySetting::with_weight(0));
    }

    /// Agent whose add_nic blocks until released.
    #[derive(Default)]
    struct BlockingAgent {
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl ComputeAgentHandle for BlockingAgent {
        async fn add_nic(&self, _: &str, _: &str, _: &str) -> std::result::Result<(), Status> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }

        async fn modify_nic(&self, _: &str, _: &str, _: u32) -> std::result::Result<(), Status> {
            Ok(())
        }

        async fn delete_nic(&self, _: &str, _: &str, _: &str) -> std::result::Result<(), Status> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_hung_agent_does_not_block_registry() {
        let log = CallLog::new();
        let dialer = Arc::new(StaticDialer::new(log.clone()));
        dialer.add_agent(P2).await;
        let broker = Arc::new(NetworkConfigBroker::new(
            Arc::new(InMemoryHostNetwork::new()),
            dialer,
            Arc::new(BrokerAuditLogger::new()),
        ));

        let hung = Arc::new(BlockingAgent::default());
        broker
            .registry()
            .insert(AgentRegistration {
                container_id: "C1".to_string(),
                locator: P1.parse().unwrap(),
                agent: hung.clone(),
            })
            .await;

        let pending = tokio::spawn({
            let broker = broker.clone();
            async move {
                broker
                    .add_nic(&NicRequest::new("C1", "nic-1", "ep-A"))
                    .await
            }
        });
        hung.entered.notified().await;

        tokio::time::timeout(Duration::from_secs(5), async {
            broker.register_compute_agent("C2", P2).await.unwrap();
            broker
                .add_nic(&NicRequest::new("C2", "nic-1", "ep-B"))
                .await
                .unwrap();
        })
        .await
        .expect("registry blocked by in-flight agent call");
        assert!(!pending.is_finished());
        assert_eq!(
            log.calls(),
            vec![format!("{}: add_nic(C2, nic-1, ep-B)", P2)]
        );

        hung.release.notify_one();
        pending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_modify_nic_unknown_endpoint() {
        let f = fixture().await;
        f.broker.register_compute_agent("C1", P1).await.unwrap();

        // Endpoint lookup fails before any step.
        let err = f
            .broker
            .modify_nic(&NicRequest::new("C1", "nic-1", "missing"), 100)
            .await
            .unwrap_err();
        assert_eq!(Status::from(err).code(), Code::NotFound);
        assert!(f.log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_network_layers_on_switch() {
        let f = fixture().await;
        let switch = f.host.get_network_by_name("ext").await.unwrap();

        let id = f
            .broker
            .create_network(CreateNetworkParams {
                name: "net-a".to_string(),
                mode: NetworkMode::Nat,
                ipam_type: IpamType::Static,
                switch_name: "ext".to_string(),
                subnet_prefixes: vec!["10.0.0.0/24".to_string(), "10.1.0.0/24".to_string()],
                default_gateway: "10.0.0.1".to_string(),
            })
            .await
            .unwrap();

        let net = f.broker.get_network("net-a").await.unwrap();
        assert_eq!(net.id, id);
        assert_eq!(net.mode, NetworkMode::Nat);
        assert_eq!(net.layer_constraint(), switch.layered_on);
        assert_eq!(net.ipams.len(), 1);
        assert_eq!(net.ipams[0].subnets.len(), 2);
        for subnet in &net.ipams[0].subnets {
            assert_eq!(
                subnet.routes,
                vec![Route {
                    next_hop: "10.0.0.1".to_string(),
                    destination_prefix: "0.0.0.0/0".to_string(),
                }]
            );
        }
    }

    #[tokio::test]
    async fn test_create_network_duplicate_name_no_mutation() {
        let f = fixture().await;
        let params = CreateNetworkParams {
            name: "net-a".to_string(),
            mode: NetworkMode::Transparent,
            ipam_type: IpamType::Static,
            switch_name: "ext".to_string(),
            subnet_prefixes: vec![],
            default_gateway: String::new(),
        };
        f.broker.create_network(params.clone()).await.unwrap();
        let before = f.broker.get_networks().await.unwrap();
        f.log.clear();

        let err = f.broker.create_network(params).await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::FailedPrecondition);
        assert_eq!(f.broker.get_networks().await.unwrap(), before);
        assert!(!f.log.calls().iter().any(|c| c.contains("create_network")));
    }

    #[tokio::test]
    async fn test_create_network_switch_errors() {
        let f = fixture().await;
        let params = |switch: &str| CreateNetworkParams {
            name: "net-a".to_string(),
            mode: NetworkMode::Transparent,
            ipam_type: IpamType::Static,
            switch_name: switch.to_string(),
            subnet_prefixes: vec![],
            default_gateway: String::new(),
        };

        let err = f.broker.create_network(params("")).await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::InvalidArgument);

        let err = f.broker.create_network(params("missing")).await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::NotFound);

        // A network created without a layer constraint has no layer id.
        f.host
            .create_network(NetworkDescriptor {
                id: String::new(),
                name: "plain".to_string(),
                mode: NetworkMode::Nat,
                ipams: vec![],
                policies: vec![],
                layered_on: None,
            })
            .await
            .unwrap();
        let err = f.broker.create_network(params("plain")).await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::NotFound);

        let mut bad = params("ext");
        bad.subnet_prefixes = vec!["10.0.0.0".to_string()];
        let err = f.broker.create_network(bad).await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_endpoint_lifecycle() {
        let f = fixture().await;
        let id = create_endpoint(&f.broker, "ep-A").await;

        f.broker.add_endpoint("ep-A", "ns-1").await.unwrap();
        let ep = f.broker.get_endpoint("ep-A").await.unwrap();
        assert_eq!(ep.id, id);
        assert_eq!(ep.namespace_id.as_deref(), Some("ns-1"));
        assert_eq!(f.broker.get_endpoints().await.unwrap().len(), 1);

        // Network still has an endpoint.
        let err = f.broker.delete_network("net-a").await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::FailedPrecondition);

        f.broker.delete_endpoint("ep-A").await.unwrap();
        let err = f.broker.get_endpoint("ep-A").await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::NotFound);

        f.broker.delete_network("net-a").await.unwrap();
        let err = f.broker.delete_network("net-a").await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_create_endpoint_validation() {
        let f = fixture().await;

        let params = CreateEndpointParams {
            name: "ep-A".to_string(),
            network_name: "missing".to_string(),
            mac_address: "00-15-5D-00-00-01".to_string(),
            ip_address: "10.0.0.2".to_string(),
            prefix_length: 24,
            policy: None,
        };
        let err = f.broker.create_endpoint(params.clone()).await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::NotFound);

        let mut bad = params.clone();
        bad.prefix_length = 40;
        let err = f.broker.create_endpoint(bad).await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::InvalidArgument);

        let mut bad = params;
        bad.mac_address = String::new();
        let err = f.broker.create_endpoint(bad).await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::InvalidArgument);

        let err = f.broker.add_endpoint("ep-A", "").await.unwrap_err();
        assert_eq!(Status::from(err).code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_configure_networking() {
        let f = fixture().await;

        let err = f
            .broker
            .configure_networking("C1", NetworkingRequestType::Setup)
            .await
            .unwrap_err();
        assert_eq!(Status::from(err).code(), Code::FailedPrecondition);

        let err = f
            .broker
            .configure_networking("", NetworkingRequestType::Setup)
            .await
            .unwrap_err();
        assert_eq!(Status::from(err).code(), Code::InvalidArgument);

        f.broker
            .set_node_network_service(Arc::new(RecordingNodeNetwork::new(f.log.clone())))
            .await;
        f.broker
            .configure_networking("C1", NetworkingRequestType::Teardown)
            .await
            .unwrap();
        assert_eq!(
            f.log.calls(),
            vec!["nodenet: configure_networking(C1, teardown)".to_string()]
        );
    }
}
