//! Workspace confinement for filesystem tools
//!
//! Every path a tool touches is resolved against the workspace root and must
//! stay inside it after symlinks are followed.

use sdk::errors::{EngineError, Result};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// The root must exist; it is canonicalized once here
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an existing path
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let abs = self.lexical(path)?;
        let canonical = abs.canonicalize()?;
        self.check(canonical)
    }

    /// Resolve a path that may not exist yet, creating missing parent
    /// directories inside the workspace
    pub async fn resolve_for_write(&self, path: &str) -> Result<PathBuf> {
        let abs = self.lexical(path)?;
        let file_name = abs
            .file_name()
            .ok_or_else(|| EngineError::ToolError(format!("Not a file path: {}", path)))?
            .to_owned();
        let parent = abs.parent().unwrap_or(&self.root).to_path_buf();

        tokio::fs::create_dir_all(&parent).await?;
        let canonical_parent = self.check(parent.canonicalize()?)?;

        let target = canonical_parent.join(file_name);
        if target.exists() {
            return self.check(target.canonicalize()?);
        }
        Ok(target)
    }

    /// Join onto the root and fold `.`/`..` without touching the filesystem
    fn lexical(&self, path: &str) -> Result<PathBuf> {
        let target = Path::new(path);
        let joined = if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.root.join(target)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                other => normalized.push(other.as_os_str()),
            }
        }
        self.check(normalized)
    }

    fn check(&self, path: PathBuf) -> Result<PathBuf> {
        if path.starts_with(&self.root) {
            Ok(path)
        } else {
            warn!("Rejected path outside workspace: {}", path.display());
            Err(EngineError::PathOutsideWorkspace(path))
        }
    }
}
