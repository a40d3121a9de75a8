//! Error types for realname-kube

use thiserror::Error;

/// Result type for realname-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while resolving and diffing live objects
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error not covered by a more specific variant
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Live object does not exist
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    /// Create of an object whose name is taken
    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: String, name: String },

    /// Two or more live objects declare the same real name
    #[error("multiple objects have same realname label: realname={identity}")]
    Ambiguous { identity: String },

    /// Live object changed between fetch and write (HTTP 409)
    #[error("Operation cannot be fulfilled on {kind} \"{name}\": the object has been modified")]
    Conflict { kind: String, name: String },

    /// Patch type rejected by the server (HTTP 415)
    #[error("unsupported patch type for {kind} \"{name}\"")]
    UnsupportedMediaType { kind: String, name: String },

    /// Kind not served by the cluster
    #[error("no matches for kind \"{kind}\" in version \"{api_version}\"")]
    UnknownResource { api_version: String, kind: String },

    /// Object namespace differs from the enforced one
    #[error(
        "the namespace from the provided object \"{object}\" does not match the namespace \"{enforced}\". You must pass '--namespace={object}' to perform this operation."
    )]
    NamespaceMismatch { object: String, enforced: String },

    /// Incompatible options
    #[error("{0}")]
    Validation(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Cluster configuration could not be loaded
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// External diff program failed
    #[error("diff program failed: {0}")]
    DiffProgram(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure attributed to one object
    #[error("{}: {source}", object_ref(.kind, .namespace, .name))]
    Object {
        kind: String,
        namespace: Option<String>,
        name: String,
        #[source]
        source: Box<KubeError>,
    },
}

fn object_ref(kind: &str, namespace: &Option<String>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{} {}/{}", kind, ns, name),
        None => format!("{} {}", kind, name),
    }
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<realname_core::CoreError> for KubeError {
    fn from(e: realname_core::CoreError) -> Self {
        KubeError::InvalidManifest(e.to_string())
    }
}

impl From<kube::config::KubeconfigError> for KubeError {
    fn from(e: kube::config::KubeconfigError) -> Self {
        KubeError::InvalidConfig(e.to_string())
    }
}

impl From<kube::config::InferConfigError> for KubeError {
    fn from(e: kube::config::InferConfigError) -> Self {
        KubeError::InvalidConfig(e.to_string())
    }
}

impl KubeError {
    /// Classify a raw client error for an operation on `kind`/`name`
    pub fn from_api(err: kube::Error, kind: &str, name: &str) -> Self {
        let (kind, name) = (kind.to_string(), name.to_string());
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => KubeError::NotFound { kind, name },
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                KubeError::AlreadyExists { kind, name }
            }
            kube::Error::Api(resp) if resp.code == 409 => KubeError::Conflict { kind, name },
            kube::Error::Api(resp) if resp.code == 415 => {
                KubeError::UnsupportedMediaType { kind, name }
            }
            _ => KubeError::Api(err),
        }
    }

    /// Attach object coordinates to an error
    pub fn for_object(self, kind: &str, namespace: Option<&str>, name: &str) -> Self {
        match self {
            KubeError::Object { .. } => self,
            other => KubeError::Object {
                kind: kind.to_string(),
                namespace: namespace.map(str::to_string),
                name: name.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The error with any object context removed
    pub fn root(&self) -> &KubeError {
        match self {
            KubeError::Object { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        match self.root() {
            KubeError::Conflict { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => {
                resp.code == 409 && resp.reason != "AlreadyExists"
            }
            _ => false,
        }
    }

    /// Check if the server rejected the patch type (415)
    pub fn is_unsupported_media_type(&self) -> bool {
        match self.root() {
            KubeError::UnsupportedMediaType { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 415,
            _ => false,
        }
    }

    /// Check if the error comes from talking to the cluster
    pub fn is_cluster_error(&self) -> bool {
        matches!(
            self.root(),
            KubeError::Api(_)
                | KubeError::NotFound { .. }
                | KubeError::AlreadyExists { .. }
                | KubeError::Conflict { .. }
                | KubeError::UnsupportedMediaType { .. }
                | KubeError::UnknownResource { .. }
                | KubeError::InvalidConfig(_)
        )
    }
}
