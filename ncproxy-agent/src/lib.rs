//! ncproxy compute agent.
//!
//! One compute agent runs per isolated guest, next to the runtime that owns
//! the guest. It resolves endpoints through the host network manager and
//! performs NIC hot-add, hot-remove and adapter updates through a
//! [`GuestNetwork`]. ncproxy reaches it over the `ComputeAgent` gRPC service
//! on a per-guest Unix socket (see [`agent_address`]).

pub mod guest;
pub mod server;
pub mod service;

pub mod proto {
    tonic::include_proto!("ncproxy.computeagent.v1");
}

pub use guest::{GuestError, GuestNetwork, InMemoryGuest, NetworkAdapter};
pub use proto::compute_agent_client::ComputeAgentClient;
pub use server::{agent_address, agent_address_in, bind_unix, serve_agent};
pub use service::{AgentError, ComputeAgentImpl};
