//! Sandboxed access to a package directory on disk (`§4.6`, phase a).
//!
//! Every path the importer reads is resolved through a [`cap_std::fs::Dir`]
//! rooted at the package root, so a `content_index` entry containing `..` or
//! a symlink pointing outside the package can never escape it — the
//! operating system enforces the sandbox, not application-level string
//! checks.

use std::path::{Path, PathBuf};

use cap_std::ambient_authority;
use cap_std::fs::Dir;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Failures opening or reading within a package's sandboxed root.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The package root could not be opened.
    #[error("failed to open package root {path}: {source}")]
    OpenRoot {
        /// The root path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A path escaped the package sandbox (traversal or symlink escape).
    #[error("path {path} escapes the package root")]
    PathTraversal {
        /// The offending relative path.
        path: String,
    },
    /// A file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The relative path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A directory could not be listed.
    #[error("failed to list directory {path}: {source}")]
    ReadDir {
        /// The relative directory path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A package root, opened once and reused across every phase.
pub(super) struct PackageDir {
    dir: Dir,
}

impl PackageDir {
    pub(super) fn open(root: &Path) -> Result<Self, PackageError> {
        let dir = Dir::open_ambient_dir(root, ambient_authority()).map_err(|source| {
            PackageError::OpenRoot {
                path: root.to_path_buf(),
                source,
            }
        })?;
        Ok(Self { dir })
    }

    /// Read `relative_path` (sandbox-checked) and return its bytes alongside
    /// the SHA-256 digest of those bytes.
    pub(super) fn read_with_hash(&self, relative_path: &str) -> Result<(Vec<u8>, [u8; 32]), PackageError> {
        reject_traversal(relative_path)?;
        let bytes = self
            .dir
            .read(relative_path)
            .map_err(|source| PackageError::Read {
                path: relative_path.to_owned(),
                source,
            })?;
        let hash = Sha256::digest(&bytes).into();
        Ok((bytes, hash))
    }

    /// Read `relative_path` (sandbox-checked) as UTF-8 text.
    pub(super) fn read_to_string(&self, relative_path: &str) -> Result<String, PackageError> {
        reject_traversal(relative_path)?;
        self.dir
            .read_to_string(relative_path)
            .map_err(|source| PackageError::Read {
                path: relative_path.to_owned(),
                source,
            })
    }

    /// List every regular file under `relative_dir`, sorted by path, or an
    /// empty list if the directory does not exist.
    pub(super) fn list_sorted_files(&self, relative_dir: &str) -> Result<Vec<String>, PackageError> {
        reject_traversal(relative_dir)?;
        let entries = match self.dir.read_dir(relative_dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PackageError::ReadDir {
                    path: relative_dir.to_owned(),
                    source,
                });
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| PackageError::ReadDir {
                path: relative_dir.to_owned(),
                source,
            })?;
            let file_type = entry.file_type().map_err(|source| PackageError::ReadDir {
                path: relative_dir.to_owned(),
                source,
            })?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push(format!("{relative_dir}/{name}"));
        }
        files.sort();
        Ok(files)
    }
}

/// Reject any relative path containing a `..` component or an absolute
/// prefix before handing it to `cap_std`, which would otherwise surface the
/// escape as an opaque I/O error.
fn reject_traversal(relative_path: &str) -> Result<(), PackageError> {
    let path = Path::new(relative_path);
    if path.is_absolute()
        || path
            .components()
            .any(|component| matches!(component, std::path::Component::ParentDir))
    {
        return Err(PackageError::PathTraversal {
            path: relative_path.to_owned(),
        });
    }
    Ok(())
}
