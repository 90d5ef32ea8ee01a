//! Sandbox path resolution.
//!
//! Every path a client sends is interpreted relative to a single root
//! directory. Resolution follows symlinks and refuses anything whose real
//! location is outside the root.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Errors that can occur while resolving a client path.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The path resolves outside the sandbox root.
    #[error("path escapes the sandbox root: {0}")]
    AccessDenied(String),

    /// The path does not exist.
    #[error("path not found: {0}")]
    NotFound(String),

    /// The path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The sandbox root itself is unusable.
    #[error("invalid sandbox root {path}: {source}")]
    InvalidRoot {
        /// Root as configured.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Any other I/O failure while inspecting the path.
    #[error("I/O error resolving {path}: {source}")]
    Io {
        /// Path as sent by the client.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Resolves client paths against a fixed root directory.
#[derive(Debug, Clone)]
pub struct SandboxResolver {
    root: PathBuf,
}

impl SandboxResolver {
    /// Creates a resolver for `root`, canonicalizing it once.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root).map_err(|source| SandboxError::InvalidRoot {
            path: root.to_path_buf(),
            source,
        })?;

        if !canonical.is_dir() {
            return Err(SandboxError::InvalidRoot {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "not a directory"),
            });
        }

        Ok(Self { root: canonical })
    }

    /// Returns the canonical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a root-relative client path to a canonical absolute path.
    ///
    /// A leading `/` is ignored, so `"/src"` and `"src"` are the same path,
    /// and `""`, `"/"` and `"."` name the root itself.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        let trimmed = relative.trim_start_matches(['/', '\\']);

        if escapes_lexically(Path::new(trimmed)) {
            tracing::debug!(path = %relative, "Rejected path climbing above the sandbox root");
            return Err(SandboxError::AccessDenied(relative.to_string()));
        }

        let joined = self.root.join(trimmed);
        let canonical = fs::canonicalize(&joined).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SandboxError::NotFound(relative.to_string()),
            _ => SandboxError::Io {
                path: relative.to_string(),
                source: e,
            },
        })?;

        // Symlinks are followed by canonicalize, so this also catches links out.
        if !canonical.starts_with(&self.root) {
            tracing::debug!(
                path = %relative,
                resolved = %canonical.display(),
                "Rejected path resolving outside the sandbox root"
            );
            return Err(SandboxError::AccessDenied(relative.to_string()));
        }

        Ok(canonical)
    }

    /// Like [`resolve`](Self::resolve), but the result must be a directory.
    pub fn resolve_dir(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        let resolved = self.resolve(relative)?;
        if !resolved.is_dir() {
            return Err(SandboxError::NotADirectory(relative.to_string()));
        }
        Ok(resolved)
    }
}

/// True when `..` components would climb above the starting directory.
fn escapes_lexically(path: &Path) -> bool {
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if depth == 0 {
                    return true;
                }
                depth -= 1;
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    false
}
