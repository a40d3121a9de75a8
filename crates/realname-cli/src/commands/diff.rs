//! Diff command - compare local manifests with their live counterparts

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Args;
use realname_core::{FilenameOptions, LabelSelector, ManifestSource, filter_by_selector};
use realname_kube::{
    ConnectOptions, DiffOptions, DiffReport, EXTERNAL_DIFF_ENV, KubeStore, MergeOptions,
    ResourceMapper, TargetSelection,
};
use tracing::{debug, instrument};

use crate::error::Result;

/// Flags of `kubectl realname-diff`
#[derive(Args, Debug, Clone, Default)]
pub struct DiffArgs {
    /// Filename, directory, or `-` for stdin, that contains the configuration to diff
    #[arg(short = 'f', long = "filename", value_name = "FILENAME")]
    pub filenames: Vec<PathBuf>,

    /// Process the kustomization directory. This flag can't be used together with -f or -R
    #[arg(short = 'k', long, value_name = "DIR")]
    pub kustomize: Option<PathBuf>,

    /// Process the directory used in -f recursively
    #[arg(short = 'R', long)]
    pub recursive: bool,

    /// Selector (label query) to filter on, supports '=', '==', and '!='
    #[arg(short = 'l', long)]
    pub selector: Option<String>,

    /// Namespace for objects that declare none; objects declaring another one are rejected
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Name of the kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Path to the kubeconfig file to use
    #[arg(long, value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Compute merged objects with server-side apply
    #[arg(long)]
    pub server_side: bool,

    /// Take ownership of conflicting fields during server-side apply
    #[arg(long)]
    pub force_conflicts: bool,

    /// Name of the manager used to track field ownership
    #[arg(long, value_name = "NAME")]
    pub field_manager: Option<String>,

    /// Include managed fields in the diff
    #[arg(long)]
    pub show_managed_fields: bool,

    /// What to do when several live objects share a real name
    #[arg(
        long,
        value_name = "POLICY",
        default_value = "error",
        value_parser = parse_target_selection
    )]
    pub target_selection: TargetSelection,
}

fn parse_target_selection(value: &str) -> std::result::Result<TargetSelection, String> {
    value.parse().map_err(|e: realname_kube::KubeError| e.to_string())
}

/// Everything needed to run, checked without touching the cluster
#[derive(Debug)]
pub struct Plan {
    pub source: ManifestSource,
    pub selector: Option<LabelSelector>,
    pub options: DiffOptions,
    pub connect: ConnectOptions,
}

impl DiffArgs {
    /// Validate flags and turn them into a plan
    pub fn plan(&self, external_diff: Option<String>) -> Result<Plan> {
        let mut filenames = FilenameOptions::new().with_recursive(self.recursive);
        for path in &self.filenames {
            filenames = filenames.with_filename(path);
        }
        if let Some(dir) = &self.kustomize {
            filenames = filenames.with_kustomize(dir);
        }
        let source = filenames.validate()?;

        let selector = self
            .selector
            .as_deref()
            .map(LabelSelector::parse)
            .transpose()?;

        let mut merge = MergeOptions::new(self.server_side).with_force_conflicts(self.force_conflicts);
        if let Some(manager) = &self.field_manager {
            merge = merge.with_field_manager(manager.clone());
        }

        let options = DiffOptions::new()
            .with_merge(merge)
            .with_target_selection(self.target_selection)
            .with_managed_fields(self.show_managed_fields)
            .with_external_diff(external_diff);
        options.validate()?;

        let connect = ConnectOptions::new()
            .with_kubeconfig(self.kubeconfig.clone())
            .with_context(self.context.clone())
            .with_namespace(self.namespace.clone());

        Ok(Plan {
            source,
            selector,
            options,
            connect,
        })
    }
}

/// Run the diff command
#[instrument(skip_all)]
pub async fn run(args: &DiffArgs) -> Result<DiffReport> {
    let plan = args.plan(std::env::var(EXTERNAL_DIFF_ENV).ok())?;

    let mut manifests = plan.source.load()?;
    if let Some(selector) = &plan.selector {
        manifests = filter_by_selector(manifests, selector);
    }
    debug!(count = manifests.len(), "loaded manifests");
    if manifests.is_empty() {
        return Ok(DiffReport::default());
    }

    let connection = plan.connect.connect().await?;
    let mapper = ResourceMapper::new(connection.client().clone()).await?;
    let objects = mapper.map_all(&manifests, connection.namespaces())?;
    let store = KubeStore::new(connection.client().clone());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut warnings = io::stderr();
    let report = realname_kube::run(&store, &objects, &plan.options, &mut out, &mut warnings).await?;
    out.flush()?;
    Ok(report)
}
