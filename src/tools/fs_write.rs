use crate::{
    errors::AppError,
    mcp::registry::Tool,
    sandbox::PathResolver,
    tools::{blocking, resolve_path_param},
};
use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use std::{fs, path::Path};

pub struct FsWriteTool {
    resolver: PathResolver,
}

impl FsWriteTool {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Tool for FsWriteTool {
    fn name(&self) -> &'static str { "fs_write" }
    fn description(&self) -> &'static str { "Write content to a file" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","required":["path"],"properties": {"path": {"type":"string"},"content":{"type":"string"},"content_b64":{"type":"string"},"mode":{"type":"string"}}}, "output": {"type":"object","properties": {"success":{"type":"boolean"},"bytes_written":{"type":"integer"}}}})
    }
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let bytes = match (
            params.get("content").and_then(|v| v.as_str()),
            params.get("content_b64").and_then(|v| v.as_str()),
        ) {
            (Some(text), None) => text.as_bytes().to_vec(),
            (None, Some(b64)) => base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|_| AppError::ToolError("invalid base64".into()))?,
            (Some(_), Some(_)) => {
                return Err(AppError::ToolError("give either content or content_b64".into()))
            }
            (None, None) => return Err(AppError::ToolError("missing content".into())),
        };
        let mode = params
            .get("mode")
            .and_then(|v| v.as_str())
            .map(|m| u32::from_str_radix(m, 8).map_err(|_| AppError::ToolError("invalid mode".into())))
            .transpose()?;
        let full = resolve_path_param(&self.resolver, &params)?;

        let written = blocking(move || {
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).map_err(|e| AppError::from_io(&e))?;
            }
            if full.is_dir() {
                return Err(AppError::ToolError("path is a directory, not a file".into()));
            }
            fs::write(&full, &bytes).map_err(|e| AppError::from_io(&e))?;
            if let Some(m) = mode {
                set_mode(&full, m).map_err(|e| AppError::from_io(&e))?;
            }
            Ok(bytes.len())
        })
        .await?;
        Ok(json!({"success": true, "bytes_written": written}))
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
