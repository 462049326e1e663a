//! Host network manager errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HcnError {
    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Network name already exists: {0}")]
    NetworkExists(String),

    #[error("Endpoint name already exists: {0}")]
    EndpointExists(String),

    #[error("Network {0} still has endpoints")]
    NetworkInUse(String),

    #[error("Endpoint {endpoint} is already bound to namespace {namespace}")]
    EndpointBound { endpoint: String, namespace: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Host network manager error: {0}")]
    Internal(String),
}

impl HcnError {
    /// True for errors caused by a named object being absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HcnError::NetworkNotFound(_)
                | HcnError::EndpointNotFound(_)
                | HcnError::NamespaceNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HcnError>;
