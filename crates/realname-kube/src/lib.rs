//! Realname Kube - live object resolution and diffing for realname-diff
//!
//! This crate provides:
//! - **Live Store**: `LiveStore` trait over the Kubernetes API, with an in-memory mock
//! - **Resolution**: find the live counterpart of a manifest by its real-name label
//! - **Diff Pairs**: live and merged views, with last-applied stripping on rename
//! - **Retry Loop**: conflict-aware fetch with a bounded number of attempts
//! - **Rendering**: coloured unified diff or an external diff program

pub mod actions;
pub mod client;
pub mod diff;
pub mod driver;
pub mod error;
pub mod notices;
pub mod pair;
pub mod resolve;
pub mod resources;
pub mod retry;
pub mod store;

pub use actions::DiffOptions;
pub use client::{ClusterConnection, ConnectOptions};
pub use diff::{DiffReport, Differ, EXTERNAL_DIFF_ENV, ResourceDiff};
pub use driver::run;
pub use error::{KubeError, Result};
pub use pair::{
    CLIENT_SIDE_FIELD_MANAGER, DiffPair, MergeOptions, PairMode, SERVER_SIDE_FIELD_MANAGER,
    default_field_manager,
};
pub use resolve::{Resolution, TargetSelection, resolve};
pub use resources::{LocalObject, NamespaceOptions, ResourceMapper};
pub use retry::{FetchOutcome, RetryPolicy, fetch_with_retry};
pub use store::{KubeStore, LiveStore, MockLiveStore, OperationCounts, PatchRequest, Target, WriteParams};
