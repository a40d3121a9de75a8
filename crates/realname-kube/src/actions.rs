//! Options for a diff run

use crate::error::Result;
use crate::pair::MergeOptions;
use crate::resolve::TargetSelection;
use crate::retry::RetryPolicy;

/// Options for the diff operation
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// How merged views are computed
    pub merge: MergeOptions,

    /// Policy for duplicate real names
    pub target_selection: TargetSelection,

    /// Bound on fetch/diff attempts per object
    pub retry: RetryPolicy,

    /// Keep metadata.managedFields in the output
    pub show_managed_fields: bool,

    /// External diff command, as found in `KUBECTL_EXTERNAL_DIFF`
    pub external_diff: Option<String>,
}

impl DiffOptions {
    /// Create default diff options
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_merge(mut self, merge: MergeOptions) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_target_selection(mut self, selection: TargetSelection) -> Self {
        self.target_selection = selection;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_managed_fields(mut self, show: bool) -> Self {
        self.show_managed_fields = show;
        self
    }

    pub fn with_external_diff(mut self, program: Option<String>) -> Self {
        self.external_diff = program.filter(|p| !p.trim().is_empty());
        self
    }

    /// Check option combinations before touching the cluster
    pub fn validate(&self) -> Result<()> {
        self.merge.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = DiffOptions::new();
        assert!(!opts.merge.server_side);
        assert_eq!(opts.merge.field_manager, "kubectl-client-side-apply");
        assert_eq!(opts.target_selection, TargetSelection::Error);
        assert_eq!(opts.retry.max_retries, 4);
        assert!(!opts.show_managed_fields);
        assert!(opts.external_diff.is_none());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_blank_external_diff_ignored() {
        let opts = DiffOptions::new().with_external_diff(Some("  ".to_string()));
        assert!(opts.external_diff.is_none());

        let opts = DiffOptions::new().with_external_diff(Some("meld".to_string()));
        assert_eq!(opts.external_diff.as_deref(), Some("meld"));
    }

    #[test]
    fn test_validate_force_conflicts() {
        let opts = DiffOptions::new().with_merge(MergeOptions::new(false).with_force_conflicts(true));
        assert!(opts.validate().is_err());
    }
}
