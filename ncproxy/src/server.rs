//! Listener binding and the combined server lifecycle.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use ncproxy_agent::bind_unix;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tonic::transport::Server;
use tonic::transport::server::Router;
use tracing::{info, warn};

use crate::broker::NetworkConfigBroker;
use crate::grpc::proto::ncproxy::network_config_proxy_server::NetworkConfigProxyServer;
use crate::grpc::proto::registration::registration_server::RegistrationServer;
use crate::grpc::{NetworkConfigProxyImpl, RegistrationImpl};
use crate::locator::Locator;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: Locator,
        #[source]
        source: io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// A listener bound to a [`Locator`].
pub enum BoundListener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl BoundListener {
    /// Bind `locator`. A stale Unix socket file is replaced.
    pub async fn bind(locator: &Locator) -> Result<Self, ServeError> {
        let bind_err = |source| ServeError::Bind {
            addr: locator.clone(),
            source,
        };
        match locator {
            Locator::Tcp(authority) => TcpListener::bind(authority.as_str())
                .await
                .map(BoundListener::Tcp)
                .map_err(bind_err),
            Locator::Unix(path) => bind_unix(path)
                .map(|listener| BoundListener::Unix {
                    listener,
                    path: path.clone(),
                })
                .map_err(bind_err),
        }
    }

    /// The address clients should dial. Resolves port 0 to the bound port.
    pub fn local_locator(&self) -> io::Result<Locator> {
        match self {
            BoundListener::Tcp(listener) => Ok(Locator::Tcp(listener.local_addr()?.to_string())),
            BoundListener::Unix { path, .. } => Ok(Locator::Unix(path.clone())),
        }
    }
}

/// Serve `router` on `listener` until `shutdown` resolves, then remove the
/// socket file of a Unix listener.
async fn serve_router<F>(
    router: Router,
    listener: BoundListener,
    shutdown: F,
) -> Result<(), tonic::transport::Error>
where
    F: Future<Output = ()> + Send,
{
    match listener {
        BoundListener::Tcp(listener) => {
            router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
                .await
        }
        BoundListener::Unix { listener, path } => {
            let result = router
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
                .await;
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove socket");
            }
            result
        }
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    // A dropped sender also ends the wait.
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Runs the orchestration-facing and runtime-facing services side by side
/// over one shared broker.
pub struct ProxyServer {
    broker: Arc<NetworkConfigBroker>,
}

impl ProxyServer {
    pub fn new(broker: Arc<NetworkConfigBroker>) -> Self {
        Self { broker }
    }

    /// Serve both surfaces until `shutdown` resolves.
    ///
    /// Shutdown stops both listeners from accepting and waits for in-flight
    /// calls to finish.
    pub async fn serve<F>(
        self,
        grpc: BoundListener,
        registration: BoundListener,
        shutdown: F,
    ) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send,
    {
        let proxy = Server::builder().add_service(NetworkConfigProxyServer::new(
            NetworkConfigProxyImpl::new(self.broker.clone()),
        ));
        let runtime = Server::builder().add_service(RegistrationServer::new(
            RegistrationImpl::new(self.broker.clone()),
        ));

        if let Ok(addr) = grpc.local_locator() {
            info!(addr = %addr, "NetworkConfigProxy listening");
        }
        if let Ok(addr) = registration.local_locator() {
            info!(addr = %addr, "Registration listening");
        }

        let (tx, rx) = watch::channel(false);
        let trigger = async move {
            shutdown.await;
            info!("Shutting down servers");
            let _ = tx.send(true);
            Ok::<(), ServeError>(())
        };

        tokio::try_join!(
            async {
                serve_router(proxy, grpc, stopped(rx.clone()))
                    .await
                    .map_err(ServeError::from)
            },
            async {
                serve_router(runtime, registration, stopped(rx.clone()))
                    .await
                    .map_err(ServeError::from)
            },
            trigger,
        )?;

        info!("Servers stopped");
        Ok(())
    }
}
