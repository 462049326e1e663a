//! Transport locators.
//!
//! A [`Locator`] names where a gRPC peer lives: a Unix socket on the local
//! host or a TCP address. It is used both for the addresses ncproxy listens
//! on and for the compute agents and orchestrator it dials.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::debug;

/// Placeholder authority for Unix socket channels; the connector ignores it.
const UNIX_AUTHORITY: &str = "http://[::]:50051";

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("empty address")]
    Empty,

    #[error("unsupported address scheme in `{0}`")]
    UnsupportedScheme(String),

    #[error("unix socket path must be absolute: `{0}`")]
    RelativePath(String),

    #[error("missing host or port in `{0}`")]
    MissingAuthority(String),
}

/// Dial errors.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("invalid address: {0}")]
    Locator(#[from] LocatorError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Absolute path of a Unix domain socket.
    Unix(PathBuf),
    /// `host:port` of a TCP listener.
    Tcp(String),
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LocatorError::Empty);
        }

        if let Some(path) = s.strip_prefix("unix://") {
            return unix_path(path);
        }
        if s.starts_with('/') {
            return unix_path(s);
        }

        let authority = match s.split_once("://") {
            Some(("http" | "tcp", rest)) => rest,
            Some(_) => return Err(LocatorError::UnsupportedScheme(s.to_string())),
            None => s,
        };
        let authority = authority.trim_end_matches('/');
        match authority.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Locator::Tcp(authority.to_string()))
            }
            _ => Err(LocatorError::MissingAuthority(s.to_string())),
        }
    }
}

fn unix_path(path: &str) -> Result<Locator, LocatorError> {
    if path.is_empty() {
        return Err(LocatorError::Empty);
    }
    if !path.starts_with('/') {
        return Err(LocatorError::RelativePath(path.to_string()));
    }
    Ok(Locator::Unix(PathBuf::from(path)))
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Unix(path) => write!(f, "unix://{}", path.display()),
            Locator::Tcp(authority) => write!(f, "http://{}", authority),
        }
    }
}

impl Locator {
    /// Open a gRPC channel to this locator, failing if no connection is
    /// established within `timeout`.
    pub async fn connect(&self, timeout: Duration) -> Result<Channel, DialError> {
        debug!(addr = %self, "Dialing");
        let dial = async {
            match self {
                Locator::Unix(path) => {
                    let path = path.clone();
                    Endpoint::from_static(UNIX_AUTHORITY)
                        .connect_timeout(timeout)
                        .connect_with_connector(service_fn(move |_: Uri| {
                            let path = path.clone();
                            async move {
                                let stream = UnixStream::connect(path).await?;
                                // Wrap with TokioIo to implement hyper's Read/Write traits
                                Ok::<_, std::io::Error>(TokioIo::new(stream))
                            }
                        }))
                        .await
                }
                Locator::Tcp(authority) => {
                    match Endpoint::from_shared(format!("http://{}", authority)) {
                        Ok(endpoint) => endpoint.connect_timeout(timeout).connect().await,
                        Err(e) => Err(e),
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, dial).await {
            Ok(channel) => Ok(channel?),
            Err(_) => Err(DialError::Timeout(timeout)),
        }
    }
}
