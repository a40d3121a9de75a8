//! Where local manifests come from
//!
//! Mirrors the `-f`, `-k` and `-R` flags of `kubectl diff`: files and
//! directories, standard input (`-f -`), or the output of a kustomize build.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

use walkdir::WalkDir;

use crate::error::{CoreError, Result};
use crate::manifest::{Manifest, parse_documents};

const STDIN_MARKER: &str = "-";
const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Raw filename flags as given on the command line
#[derive(Debug, Clone, Default)]
pub struct FilenameOptions {
    pub filenames: Vec<PathBuf>,
    pub kustomize: Option<PathBuf>,
    pub recursive: bool,
}

impl FilenameOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.filenames.push(path.into());
        self
    }

    pub fn with_kustomize(mut self, dir: impl Into<PathBuf>) -> Self {
        self.kustomize = Some(dir.into());
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Check flag combinations and build the matching source
    pub fn validate(&self) -> Result<ManifestSource> {
        match (&self.kustomize, self.filenames.is_empty()) {
            (Some(_), false) => Err(CoreError::ConflictingSources),
            (Some(_), true) if self.recursive => Err(CoreError::KustomizeWithRecursive),
            (Some(dir), true) => Ok(ManifestSource::Kustomize(dir.clone())),
            (None, true) => Err(CoreError::MissingSource),
            (None, false) => {
                if self.filenames.len() == 1 && self.filenames[0] == Path::new(STDIN_MARKER) {
                    Ok(ManifestSource::Stdin)
                } else {
                    Ok(ManifestSource::Files {
                        paths: self.filenames.clone(),
                        recursive: self.recursive,
                    })
                }
            }
        }
    }
}

/// A validated manifest source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    Files { paths: Vec<PathBuf>, recursive: bool },
    Stdin,
    Kustomize(PathBuf),
}

impl ManifestSource {
    /// Load every manifest, reading process stdin when asked to
    pub fn load(&self) -> Result<Vec<Manifest>> {
        self.load_with_stdin(&mut io::stdin())
    }

    /// Load every manifest, using `stdin` for `-`
    pub fn load_with_stdin(&self, stdin: &mut dyn Read) -> Result<Vec<Manifest>> {
        match self {
            ManifestSource::Stdin => read_stdin(stdin),
            ManifestSource::Files { paths, recursive } => {
                let mut manifests = Vec::new();
                for path in paths {
                    if path == Path::new(STDIN_MARKER) {
                        manifests.extend(read_stdin(stdin)?);
                        continue;
                    }
                    for file in expand_path(path, *recursive)? {
                        let text = std::fs::read_to_string(&file)?;
                        manifests.extend(parse_documents(&text, &file.display().to_string())?);
                    }
                }
                Ok(manifests)
            }
            ManifestSource::Kustomize(dir) => {
                let text = kustomize_build(dir)?;
                parse_documents(&text, &dir.display().to_string())
            }
        }
    }
}

fn read_stdin(stdin: &mut dyn Read) -> Result<Vec<Manifest>> {
    let mut text = String::new();
    stdin.read_to_string(&mut text)?;
    parse_documents(&text, "<stdin>")
}

/// Expand a file or directory into manifest files, sorted by path
///
/// Explicitly named files are taken as-is; directory walks only pick up
/// known manifest extensions.
pub fn expand_path(path: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(CoreError::PathNotFound {
            path: path.to_path_buf(),
        });
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(path).max_depth(max_depth) {
        let entry = entry.map_err(|e| {
            CoreError::Io(e.into_io_error().unwrap_or_else(|| {
                io::Error::other(format!("failed to walk {}", path.display()))
            }))
        })?;
        if entry.file_type().is_file() && has_manifest_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

fn has_manifest_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| MANIFEST_EXTENSIONS.contains(&e))
}

/// Render a kustomization directory
///
/// Prefers `kubectl kustomize`; falls back to a standalone `kustomize`
/// binary when kubectl is not installed.
fn kustomize_build(dir: &Path) -> Result<String> {
    if !dir.exists() {
        return Err(CoreError::PathNotFound {
            path: dir.to_path_buf(),
        });
    }

    let output = match Command::new("kubectl").arg("kustomize").arg(dir).output() {
        Ok(output) => output,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("kubectl not found, trying standalone kustomize");
            Command::new("kustomize")
                .arg("build")
                .arg(dir)
                .output()
                .map_err(|e| CoreError::Kustomize {
                    dir: dir.to_path_buf(),
                    message: format!("neither kubectl nor kustomize could be run: {}", e),
                })?
        }
        Err(e) => return Err(e.into()),
    };

    if !output.status.success() {
        return Err(CoreError::Kustomize {
            dir: dir.to_path_buf(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8(output.stdout).map_err(|e| CoreError::Kustomize {
        dir: dir.to_path_buf(),
        message: format!("output is not valid UTF-8: {}", e),
    })
}
