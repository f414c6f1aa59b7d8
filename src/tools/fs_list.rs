use crate::{
    errors::AppError,
    mcp::registry::Tool,
    sandbox::PathResolver,
    tools::{blocking, resolve_path_param},
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::{fs, io, path::Path};

#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
}

pub struct FsListTool {
    resolver: PathResolver,
}

impl FsListTool {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Tool for FsListTool {
    fn name(&self) -> &'static str { "fs_list" }
    fn description(&self) -> &'static str { "List directory contents as a tree structure" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","required":["path"],"properties": {"path": {"type":"string"},"max_depth":{"type":"integer"}}}, "output": {"type":"object","properties": {"tree":{"type":"object"}}}})
    }
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let full = resolve_path_param(&self.resolver, &params)?;
        let max_depth = params.get("max_depth").and_then(|v| v.as_u64()).map(|d| d as usize);
        let tree = blocking(move || build_tree(&full, max_depth).map_err(|e| AppError::from_io(&e))).await?;
        Ok(json!({"tree": tree}))
    }
}

/// Symlinks below the top entry are listed but never followed, so the walk
/// cannot leave the resolved directory or loop.
fn build_tree(path: &Path, depth: Option<usize>) -> io::Result<FileEntry> {
    let meta = fs::symlink_metadata(path)?;
    let mut entry = FileEntry {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        path: path.display().to_string(),
        is_dir: meta.is_dir(),
        is_symlink: meta.file_type().is_symlink(),
        files: Vec::new(),
    };
    if !entry.is_dir || depth == Some(0) {
        return Ok(entry);
    }

    let mut children: Vec<_> = fs::read_dir(path)?.filter_map(Result::ok).collect();
    children.sort_by_key(|c| c.file_name());
    for child in children {
        // unreadable entries are skipped, not fatal
        if let Ok(node) = build_tree(&child.path(), depth.map(|d| d - 1)) {
            entry.files.push(node);
        }
    }
    Ok(entry)
}
