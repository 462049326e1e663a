//! Serving a compute agent on its per-guest Unix socket.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::{info, warn};

use crate::proto::compute_agent_server::ComputeAgentServer;
use crate::service::ComputeAgentImpl;

/// Directory holding the per-guest compute agent sockets.
pub const AGENT_SOCKET_DIR: &str = "/run/ncproxy";

/// Well-known socket address of the compute agent for guest `guest_id`.
pub fn agent_address(guest_id: &str) -> PathBuf {
    agent_address_in(Path::new(AGENT_SOCKET_DIR), guest_id)
}

/// Socket address of the compute agent for `guest_id` under `dir`.
pub fn agent_address_in(dir: &Path, guest_id: &str) -> PathBuf {
    dir.join(format!("computeagent-{}.sock", guest_id))
}

/// Bind `path`, replacing a stale socket file left behind by a previous run.
pub fn bind_unix(path: &Path) -> io::Result<UnixListener> {
    if path.exists() {
        warn!(path = %path.display(), "Removing stale socket");
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    UnixListener::bind(path)
}

/// Serve `agent` on `listener` until `shutdown` resolves.
///
/// In-flight calls finish before this returns; the socket file is removed
/// afterwards.
pub async fn serve_agent<F>(
    agent: ComputeAgentImpl,
    listener: UnixListener,
    path: PathBuf,
    shutdown: F,
) -> Result<(), tonic::transport::Error>
where
    F: Future<Output = ()> + Send,
{
    info!(path = %path.display(), "Serving compute agent");

    let result = Server::builder()
        .add_service(ComputeAgentServer::new(agent))
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
        .await;

    if let Err(e) = std::fs::remove_file(&path) {
        warn!(path = %path.display(), error = %e, "Failed to remove agent socket");
    }
    info!(path = %path.display(), "Compute agent stopped");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_address_template() {
        assert_eq!(
            agent_address("pod-1"),
            PathBuf::from("/run/ncproxy/computeagent-pod-1.sock")
        );
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = agent_address_in(dir.path(), "g1");
        std::fs::write(&path, b"stale").unwrap();

        let listener = bind_unix(&path).unwrap();
        drop(listener);
        assert!(path.exists());
    }
}
