//! Broker audit logging
//!
//! Emits one `audit` target event per successful state change. Events go
//! through the process-wide tracing subscriber and never fail the operation
//! that produced them.

use tracing::info;

use crate::locator::Locator;

/// Broker audit logger with domain-specific methods.
#[derive(Debug)]
pub struct BrokerAuditLogger {
    component: &'static str,
}

impl Default for BrokerAuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerAuditLogger {
    pub fn new() -> Self {
        Self {
            component: "ncproxy",
        }
    }

    fn log(&self, message: String, object_ids: &[&str]) {
        info!(
            target: "audit",
            component = self.component,
            objects = ?object_ids,
            "{}",
            message
        );
    }

    // === Agent Events ===

    pub fn agent_registered(&self, container_id: &str, locator: &Locator) {
        self.log(
            format!("Compute agent for '{}' registered at {}", container_id, locator),
            &[container_id],
        );
    }

    pub fn agent_replaced(&self, container_id: &str, previous: &Locator, locator: &Locator) {
        self.log(
            format!(
                "Compute agent for '{}' replaced: {} -> {}",
                container_id, previous, locator
            ),
            &[container_id],
        );
    }

    // === NIC Events ===

    pub fn nic_added(&self, container_id: &str, nic_id: &str, endpoint_name: &str) {
        self.log(
            format!("NIC '{}' added with endpoint '{}'", nic_id, endpoint_name),
            &[container_id, nic_id],
        );
    }

    pub fn nic_modified(&self, container_id: &str, nic_id: &str, iov_weight: u32) {
        self.log(
            format!("NIC '{}' offload weight set to {}", nic_id, iov_weight),
            &[container_id, nic_id],
        );
    }

    pub fn nic_deleted(&self, container_id: &str, nic_id: &str, endpoint_name: &str) {
        self.log(
            format!("NIC '{}' with endpoint '{}' deleted", nic_id, endpoint_name),
            &[container_id, nic_id],
        );
    }

    // === Network Events ===

    pub fn network_created(&self, network_id: &str, network_name: &str, layer_id: &str) {
        self.log(
            format!("Network '{}' created on layer {}", network_name, layer_id),
            &[network_id],
        );
    }

    pub fn network_deleted(&self, network_id: &str, network_name: &str) {
        self.log(format!("Network '{}' deleted", network_name), &[network_id]);
    }

    // === Endpoint Events ===

    pub fn endpoint_created(&self, endpoint_id: &str, endpoint_name: &str, network_id: &str) {
        self.log(
            format!("Endpoint '{}' created", endpoint_name),
            &[endpoint_id, network_id],
        );
    }

    pub fn endpoint_added(&self, endpoint_id: &str, endpoint_name: &str, namespace_id: &str) {
        self.log(
            format!(
                "Endpoint '{}' added to namespace {}",
                endpoint_name, namespace_id
            ),
            &[endpoint_id, namespace_id],
        );
    }

    pub fn endpoint_deleted(&self, endpoint_id: &str, endpoint_name: &str) {
        self.log(format!("Endpoint '{}' deleted", endpoint_name), &[endpoint_id]);
    }
}
