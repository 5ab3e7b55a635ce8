//! Error types shared by the catalogs, executors and cluster connection

use thiserror::Error;

/// Boxed source error carried by catalog and executor failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A catalog listing call failed; the whole cycle is abandoned
#[derive(Debug, Error)]
#[error("failed to fetch {resource}: {source}")]
pub struct FetchError {
    /// Resource that could not be listed (e.g. "deployments")
    pub resource: String,
    #[source]
    pub source: BoxError,
}

impl FetchError {
    pub fn new(resource: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            resource: resource.into(),
            source: source.into(),
        }
    }
}

/// A single create or delete call failed; the rest of the plan still runs
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to create vpa {namespace}/{name} for {kind}: {source}")]
    Create {
        name: String,
        namespace: String,
        kind: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to delete vpa {namespace}/{name}: {source}")]
    Delete {
        name: String,
        namespace: String,
        #[source]
        source: BoxError,
    },
}

impl ApplyError {
    pub fn name(&self) -> &str {
        match self {
            ApplyError::Create { name, .. } | ApplyError::Delete { name, .. } => name,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            ApplyError::Create { namespace, .. } | ApplyError::Delete { namespace, .. } => {
                namespace
            }
        }
    }
}

/// The operator could not build a client for the cluster
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to read kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("failed to infer cluster configuration: {0}")]
    Infer(#[from] kube::config::InferConfigError),

    #[error("failed to build kubernetes client: {0}")]
    Client(#[from] kube::Error),
}
