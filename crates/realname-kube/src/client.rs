//! Cluster connection from kubeconfig and command-line overrides

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::resources::NamespaceOptions;

/// Default timeout for Kubernetes API requests
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Where to find the cluster, as given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Explicit kubeconfig file, instead of `$KUBECONFIG` or `~/.kube/config`
    pub kubeconfig: Option<PathBuf>,
    /// Context to use instead of the current one
    pub context: Option<String>,
    /// Namespace given with `-n`; enforced on every object
    pub namespace: Option<String>,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kubeconfig(mut self, path: Option<PathBuf>) -> Self {
        self.kubeconfig = path;
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty());
        self
    }

    fn kube_config_options(&self) -> KubeConfigOptions {
        KubeConfigOptions {
            context: self.context.clone(),
            ..Default::default()
        }
    }

    /// Load configuration without contacting the cluster
    #[instrument(skip_all)]
    pub async fn load_config(&self) -> Result<Config> {
        let config = match (&self.kubeconfig, &self.context) {
            (Some(path), _) => {
                debug!(path = %path.display(), "reading kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &self.kube_config_options()).await?
            }
            (None, Some(context)) => {
                debug!(%context, "using kubeconfig context");
                Config::from_kubeconfig(&self.kube_config_options()).await?
            }
            (None, None) => Config::infer().await?,
        };
        Ok(config)
    }

    /// Namespace rules given the context's default namespace
    pub fn namespace_options(&self, context_namespace: &str) -> NamespaceOptions {
        match &self.namespace {
            Some(ns) => NamespaceOptions::new(ns.clone()).enforced(),
            None => NamespaceOptions::new(context_namespace),
        }
    }

    /// Build a client and work out the namespace defaults
    #[instrument(skip_all)]
    pub async fn connect(&self) -> Result<ClusterConnection> {
        let mut config = self.load_config().await?;
        config.read_timeout = Some(DEFAULT_API_TIMEOUT);

        let namespaces = self.namespace_options(&config.default_namespace);
        debug!(
            namespace = %namespaces.default_namespace,
            enforce = namespaces.enforce,
            "resolved namespace"
        );

        let client = Client::try_from(config)?;
        Ok(ClusterConnection { client, namespaces })
    }
}

/// Client plus the namespace rules that apply to local objects
#[derive(Clone)]
pub struct ClusterConnection {
    client: Client,
    namespaces: NamespaceOptions,
}

impl fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("namespaces", &self.namespaces)
            .finish_non_exhaustive()
    }
}

impl ClusterConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn namespaces(&self) -> &NamespaceOptions {
        &self.namespaces
    }
}
