//! ncproxy: network configuration proxy.
//!
//! Sits between a node's network orchestrator and the compute agents that
//! attach NICs inside isolated guests. Orchestrators talk to the
//! `NetworkConfigProxy` service; runtimes publish their compute agent through
//! the `Registration` service. Both share one [`NetworkConfigBroker`].

pub mod agent;
pub mod audit;
pub mod broker;
pub mod config;
pub mod grpc;
pub mod locator;
pub mod nodenet;
pub mod registry;
pub mod server;
pub mod test_util;
pub mod validation;

pub use agent::{AgentDialer, ComputeAgentHandle, GrpcAgentDialer, GrpcComputeAgent};
pub use audit::BrokerAuditLogger;
pub use broker::{BrokerError, ModifyNicStep, NetworkConfigBroker, NicRequest};
pub use config::{Config, ConfigError};
pub use locator::{DialError, Locator, LocatorError};
pub use nodenet::{GrpcNodeNetworkClient, NetworkingRequestType, NodeNetworkService};
pub use registry::AgentRegistry;
pub use server::{BoundListener, ProxyServer, ServeError};
