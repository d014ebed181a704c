//! Workspace filesystem tools
//!
//! `read_file`, `list_dir` and `write_file`, each confined to the
//! [`Workspace`]. Writes are what consolidation later records as code changes.

use async_trait::async_trait;
use sdk::errors::{EngineError, Result};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use super::{str_arg, Tool, Workspace};

/// Largest file `read_file` returns in full
const MAX_READ_BYTES: usize = 64 * 1024;

pub struct ReadFileTool {
    workspace: Arc<Workspace>,
}

impl ReadFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the workspace."
    }

    fn arguments_hint(&self) -> &str {
        r#"{"path": "relative/path"}"#
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String> {
        let path = self.workspace.resolve(str_arg(&args, "path")?)?;
        info!("Reading file: {}", path.display());

        let mut content = fs::read_to_string(&path).await.map_err(|e| {
            EngineError::ToolError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        debug!("Read {} bytes from {}", content.len(), path.display());

        if content.len() > MAX_READ_BYTES {
            let mut cut = MAX_READ_BYTES;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str("\n[truncated]");
        }
        Ok(content)
    }
}

pub struct ListDirTool {
    workspace: Arc<Workspace>,
}

impl ListDirTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List files and directories at a path. Returns entries with type, size, and name."
    }

    fn arguments_hint(&self) -> &str {
        r#"{"path": "directory/path"}"#
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String> {
        let raw = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let path = self.workspace.resolve(raw)?;
        info!("Listing directory: {}", path.display());

        let mut entries = fs::read_dir(&path).await.map_err(|e| {
            EngineError::ToolError(format!("Failed to read directory {}: {}", path.display(), e))
        })?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut links = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let ft = entry.file_type().await?;
            if ft.is_dir() {
                dirs.push(format!("d  {}/", name));
            } else if ft.is_symlink() {
                links.push(format!("l  {}", name));
            } else {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                files.push(format!("f  {:>8}  {}", format_size(size), name));
            }
        }

        dirs.sort();
        files.sort();
        links.sort();

        let total = dirs.len() + files.len() + links.len();
        let mut out = Vec::with_capacity(total + 1);
        out.push(format!("{}/  ({} entries)", raw.trim_end_matches('/'), total));
        out.extend(dirs);
        out.extend(files);
        out.extend(links);
        Ok(out.join("\n"))
    }
}

pub struct WriteFileTool {
    workspace: Arc<Workspace>,
}

impl WriteFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file (creates parent directories if needed)."
    }

    fn arguments_hint(&self) -> &str {
        r#"{"path": "file/path", "content": "file contents"}"#
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String> {
        let raw = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;
        let target = self.workspace.resolve_for_write(raw).await?;

        info!("Writing {} bytes to: {}", content.len(), target.display());
        fs::write(&target, content).await.map_err(|e| {
            EngineError::ToolError(format!("Failed to write {}: {}", target.display(), e))
        })?;

        Ok(format!("Wrote {} bytes to {}", content.len(), raw))
    }
}

/// Format a byte count into a human-readable size string.
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Workspace>) {
        let temp = TempDir::new().unwrap();
        let workspace = Arc::new(Workspace::new(temp.path()).unwrap());
        (temp, workspace)
    }

    #[tokio::test]
    async fn test_write_and_read_file() {
        let (_temp, ws) = setup();
        let write = WriteFileTool::new(ws.clone());
        let read = ReadFileTool::new(ws);

        write
            .execute(json!({"path": "a/b/hello.txt", "content": "hello world"}))
            .await
            .unwrap();
        let content = read.execute(json!({"path": "a/b/hello.txt"})).await.unwrap();
        assert_eq!(content, "hello world");
    }

    #[tokio::test]
    async fn test_read_nonexistent_file() {
        let (_temp, ws) = setup();
        let result = ReadFileTool::new(ws).execute(json!({"path": "nope.txt"})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_dir() {
        let (temp, ws) = setup();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();
        std::fs::write(temp.path().join("b.txt"), "b").unwrap();
        std::fs::create_dir(temp.path().join("subdir")).unwrap();

        let listing = ListDirTool::new(ws).execute(json!({})).await.unwrap();
        assert!(listing.contains("a.txt"));
        assert!(listing.contains("d  subdir/"));
        assert!(listing.contains("3 entries"));
    }

    #[tokio::test]
    async fn test_write_outside_workspace_rejected() {
        let (_temp, ws) = setup();
        let result = WriteFileTool::new(ws)
            .execute(json!({"path": "../outside.txt", "content": "x"}))
            .await;
        assert!(matches!(result, Err(EngineError::PathOutsideWorkspace(_))));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
