//! Core error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("must specify exactly one of -f/--filename or -k/--kustomize")]
    MissingSource,

    #[error("only one of -f/--filename or -k/--kustomize can be specified")]
    ConflictingSources,

    #[error("the -k flag can't be used with -f or -R")]
    KustomizeWithRecursive,

    #[error("the path \"{}\" does not exist", .path.display())]
    PathNotFound { path: PathBuf },

    #[error("error parsing {origin}: {source}")]
    YamlParse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("invalid object in {origin} (document {index}): {message}")]
    InvalidObject {
        origin: String,
        index: usize,
        message: String,
    },

    #[error("unable to parse label selector \"{selector}\": {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("kustomize build of {} failed: {message}", .dir.display())]
    Kustomize { dir: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
