//! Standard exit codes for CLI operations
//!
//! 0 and 1 follow `diff(1)`; 64 follows sysexits.h.

/// Success - no differences found
pub const SUCCESS: u8 = 0;

/// Differences found between live and merged objects
pub const DIFFERENCES: u8 = 1;

/// General error - unspecified failure
pub const ERROR: u8 = 2;

/// Validation error - incompatible options or invalid manifests
pub const VALIDATION_ERROR: u8 = 3;

/// Cluster error - kubeconfig, discovery or API failure
pub const CLUSTER_ERROR: u8 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: u8 = 5;

/// Usage error - invalid arguments or options
pub const USAGE_ERROR: u8 = 64;
