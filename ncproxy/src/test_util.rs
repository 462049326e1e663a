//! Recording test doubles for the broker's collaborators.
//!
//! Every double appends a line to a shared [`CallLog`] so tests can assert on
//! the exact order in which downstream calls were made.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use ncproxy_hcn::{
    EndpointDescriptor, HcnError, HostNetwork, ModifyEndpointSettingRequest, NamespaceBinding,
    NetworkDescriptor, RequestType, Result as HcnResult,
};
use tokio::sync::Mutex;
use tonic::Status;

use crate::agent::{AgentDialer, ComputeAgentHandle};
use crate::locator::{DialError, Locator};
use crate::nodenet::{NetworkingRequestType, NodeNetworkService};

/// Ordered record of downstream calls.
#[derive(Clone, Default)]
pub struct CallLog(Arc<StdMutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: String) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Compute agent that records calls as `<addr>: <method>(<args>)`.
pub struct RecordingAgent {
    addr: String,
    log: CallLog,
    modify_error: StdMutex<Option<Status>>,
}

impl RecordingAgent {
    pub fn new(addr: impl Into<String>, log: CallLog) -> Self {
        Self {
            addr: addr.into(),
            log,
            modify_error: StdMutex::new(None),
        }
    }

    /// Make every later modify_nic call fail with `status`.
    pub fn fail_modify(&self, status: Status) {
        *self.modify_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(status);
    }
}

#[async_trait]
impl ComputeAgentHandle for RecordingAgent {
    async fn add_nic(
        &self,
        container_id: &str,
        nic_id: &str,
        endpoint_name: &str,
    ) -> Result<(), Status> {
        self.log.record(format!(
            "{}: add_nic({}, {}, {})",
            self.addr, container_id, nic_id, endpoint_name
        ));
        Ok(())
    }

    async fn modify_nic(
        &self,
        nic_id: &str,
        endpoint_name: &str,
        iov_weight: u32,
    ) -> Result<(), Status> {
        self.log.record(format!(
            "{}: modify_nic({}, {}, {})",
            self.addr, nic_id, endpoint_name, iov_weight
        ));
        match self
            .modify_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    async fn delete_nic(
        &self,
        container_id: &str,
        nic_id: &str,
        endpoint_name: &str,
    ) -> Result<(), Status> {
        self.log.record(format!(
            "{}: delete_nic({}, {}, {})",
            self.addr, container_id, nic_id, endpoint_name
        ));
        Ok(())
    }
}

/// Dialer that hands out pre-registered [`RecordingAgent`]s by address.
/// Unknown addresses fail to dial.
pub struct StaticDialer {
    log: CallLog,
    agents: Mutex<HashMap<String, Arc<RecordingAgent>>>,
}

impl StaticDialer {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            agents: Mutex::new(HashMap::new()),
        }
    }

    fn key(addr: &str) -> String {
        addr.parse::<Locator>()
            .map(|l| l.to_string())
            .unwrap_or_else(|_| addr.to_string())
    }

    pub async fn add_agent(&self, addr: &str) -> Arc<RecordingAgent> {
        let key = Self::key(addr);
        let agent = Arc::new(RecordingAgent::new(key.clone(), self.log.clone()));
        self.agents.lock().await.insert(key, agent.clone());
        agent
    }

    pub async fn fail_modify(&self, addr: &str, status: Status) {
        if let Some(agent) = self.agents.lock().await.get(&Self::key(addr)) {
            agent.fail_modify(status);
        }
    }
}

#[async_trait]
impl AgentDialer for StaticDialer {
    async fn dial(&self, locator: &Locator) -> Result<Arc<dyn ComputeAgentHandle>, DialError> {
        match self.agents.lock().await.get(&locator.to_string()) {
            Some(agent) => Ok(agent.clone()),
            None => Err(DialError::Timeout(Duration::ZERO)),
        }
    }
}

/// Host network wrapper recording every mutating call as
/// `host: <method>(<args>)`. Reads are passed through unrecorded.
pub struct RecordingHostNetwork {
    inner: Arc<dyn HostNetwork>,
    log: CallLog,
    failing_modify: StdMutex<Option<RequestType>>,
}

impl RecordingHostNetwork {
    pub fn new(inner: Arc<dyn HostNetwork>, log: CallLog) -> Self {
        Self {
            inner,
            log,
            failing_modify: StdMutex::new(None),
        }
    }

    /// Make later endpoint setting requests of `request_type` fail. The call
    /// is still recorded but never reaches the wrapped host.
    pub fn fail_modify(&self, request_type: RequestType) {
        *self
            .failing_modify
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(request_type);
    }
}

#[async_trait]
impl HostNetwork for RecordingHostNetwork {
    async fn get_network_by_name(&self, name: &str) -> HcnResult<NetworkDescriptor> {
        self.inner.get_network_by_name(name).await
    }

    async fn list_networks(&self) -> HcnResult<Vec<NetworkDescriptor>> {
        self.inner.list_networks().await
    }

    async fn create_network(&self, network: NetworkDescriptor) -> HcnResult<NetworkDescriptor> {
        self.log
            .record(format!("host: create_network({})", network.name));
        self.inner.create_network(network).await
    }

    async fn delete_network(&self, id: &str) -> HcnResult<()> {
        self.log.record(format!("host: delete_network({})", id));
        self.inner.delete_network(id).await
    }

    async fn get_endpoint_by_name(&self, name: &str) -> HcnResult<EndpointDescriptor> {
        self.inner.get_endpoint_by_name(name).await
    }

    async fn list_endpoints(&self) -> HcnResult<Vec<EndpointDescriptor>> {
        self.inner.list_endpoints().await
    }

    async fn create_endpoint(&self, endpoint: EndpointDescriptor) -> HcnResult<EndpointDescriptor> {
        self.log
            .record(format!("host: create_endpoint({})", endpoint.name));
        self.inner.create_endpoint(endpoint).await
    }

    async fn delete_endpoint(&self, id: &str) -> HcnResult<()> {
        self.log.record(format!("host: delete_endpoint({})", id));
        self.inner.delete_endpoint(id).await
    }

    async fn get_namespace(&self, id: &str) -> HcnResult<NamespaceBinding> {
        self.inner.get_namespace(id).await
    }

    async fn add_namespace_endpoint(&self, namespace_id: &str, endpoint_id: &str) -> HcnResult<()> {
        self.log.record(format!(
            "host: add_namespace_endpoint({}, {})",
            namespace_id, endpoint_id
        ));
        self.inner
            .add_namespace_endpoint(namespace_id, endpoint_id)
            .await
    }

    async fn remove_namespace_endpoint(
        &self,
        namespace_id: &str,
        endpoint_id: &str,
    ) -> HcnResult<()> {
        self.log.record(format!(
            "host: remove_namespace_endpoint({}, {})",
            namespace_id, endpoint_id
        ));
        self.inner
            .remove_namespace_endpoint(namespace_id, endpoint_id)
            .await
    }

    async fn modify_endpoint_settings(
        &self,
        endpoint_id: &str,
        request: &ModifyEndpointSettingRequest,
    ) -> HcnResult<()> {
        self.log.record(format!(
            "host: modify_endpoint_settings({})",
            request.request_type
        ));
        let failing = *self
            .failing_modify
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if failing == Some(request.request_type) {
            return Err(HcnError::Internal(format!(
                "{} request rejected for endpoint {}",
                request.request_type, endpoint_id
            )));
        }
        self.inner
            .modify_endpoint_settings(endpoint_id, request)
            .await
    }
}

/// Node network service recording configure requests.
pub struct RecordingNodeNetwork {
    log: CallLog,
}

impl RecordingNodeNetwork {
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl NodeNetworkService for RecordingNodeNetwork {
    async fn configure_networking(
        &self,
        container_id: &str,
        request_type: NetworkingRequestType,
    ) -> Result<(), Status> {
        self.log.record(format!(
            "nodenet: configure_networking({}, {})",
            container_id, request_type
        ));
        Ok(())
    }

    async fn ping(&self) -> Result<String, Status> {
        Ok("pong".to_string())
    }
}
