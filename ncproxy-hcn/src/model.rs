//! Host network object model.
//!
//! These types mirror the JSON schema the host network manager speaks, so
//! settings blobs are kept as `serde_json::Value` and field names are
//! PascalCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Network mode of a logical network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMode {
    Transparent,
    #[serde(rename = "NAT")]
    Nat,
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkMode::Transparent => write!(f, "Transparent"),
            NetworkMode::Nat => write!(f, "NAT"),
        }
    }
}

/// Address management type of an IPAM block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpamType {
    Static,
    #[serde(rename = "DHCP")]
    Dhcp,
}

impl std::fmt::Display for IpamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpamType::Static => write!(f, "Static"),
            IpamType::Dhcp => write!(f, "DHCP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Route {
    pub next_hop: String,
    pub destination_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subnet {
    pub ip_address_prefix: String,
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ipam {
    #[serde(rename = "Type")]
    pub ipam_type: IpamType,
    #[serde(default)]
    pub subnets: Vec<Subnet>,
}

/// Network policy types understood by the host manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkPolicyType {
    LayerConstraint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkPolicy {
    #[serde(rename = "Type")]
    pub policy_type: NetworkPolicyType,
    pub settings: Value,
}

/// Pins a logical network onto the layer of an existing physical switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LayerConstraintPolicySetting {
    pub layer_id: String,
}

/// A logical network owned by the host network manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkDescriptor {
    pub id: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub mode: NetworkMode,
    #[serde(default)]
    pub ipams: Vec<Ipam>,
    #[serde(default)]
    pub policies: Vec<NetworkPolicy>,
    /// Layer id of the physical uplink this network sits on, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layered_on: Option<String>,
}

impl NetworkDescriptor {
    /// Layer id requested through a `LayerConstraint` policy, if present.
    pub fn layer_constraint(&self) -> Option<String> {
        self.policies
            .iter()
            .filter(|p| p.policy_type == NetworkPolicyType::LayerConstraint)
            .find_map(|p| {
                serde_json::from_value::<LayerConstraintPolicySetting>(p.settings.clone()).ok()
            })
            .map(|s| s.layer_id)
    }
}

/// Endpoint policy types understood by the host manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointPolicyType {
    #[serde(rename = "IOV")]
    Iov,
    PortName,
}

impl std::fmt::Display for EndpointPolicyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointPolicyType::Iov => write!(f, "IOV"),
            EndpointPolicyType::PortName => write!(f, "PortName"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointPolicy {
    #[serde(rename = "Type")]
    pub policy_type: EndpointPolicyType,
    pub settings: Value,
}

/// Interrupt moderation levels for IOV offload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptModeration {
    Default,
    Adaptive,
    Off,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IovPolicySetting {
    pub iov_offload_weight: u32,
    pub queue_pairs_requested: u32,
    pub interrupt_moderation: InterruptModeration,
}

impl IovPolicySetting {
    /// Settings used when toggling offload on an existing NIC.
    pub fn with_weight(iov_offload_weight: u32) -> Self {
        Self {
            iov_offload_weight,
            queue_pairs_requested: 1,
            interrupt_moderation: InterruptModeration::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortNamePolicySetting {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpConfig {
    pub ip_address: String,
    pub prefix_length: u8,
}

/// A network endpoint owned by the host network manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointDescriptor {
    pub id: String,
    pub name: String,
    #[serde(rename = "HostComputeNetwork")]
    pub network_id: String,
    pub mac_address: String,
    #[serde(default)]
    pub ip_configurations: Vec<IpConfig>,
    #[serde(default)]
    pub policies: Vec<EndpointPolicy>,
    #[serde(rename = "HostComputeNamespace", default)]
    pub namespace_id: Option<String>,
}

impl EndpointDescriptor {
    pub fn has_policy(&self, policy_type: EndpointPolicyType) -> bool {
        self.policies.iter().any(|p| p.policy_type == policy_type)
    }
}

/// Association between a namespace and the endpoints bound into it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NamespaceBinding {
    pub id: String,
    pub endpoint_ids: Vec<String>,
}

/// What part of an endpoint a modify request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointResourceType {
    Policy,
}

/// How a modify request changes the targeted resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Add,
    Remove,
    Update,
    Refresh,
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestType::Add => "Add",
            RequestType::Remove => "Remove",
            RequestType::Update => "Update",
            RequestType::Refresh => "Refresh",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyEndpointRequest {
    pub policies: Vec<EndpointPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModifyEndpointSettingRequest {
    pub resource_type: EndpointResourceType,
    pub request_type: RequestType,
    pub settings: PolicyEndpointRequest,
}

impl ModifyEndpointSettingRequest {
    pub fn policies(request_type: RequestType, policies: Vec<EndpointPolicy>) -> Self {
        Self {
            resource_type: EndpointResourceType::Policy,
            request_type,
            settings: PolicyEndpointRequest { policies },
        }
    }
}
