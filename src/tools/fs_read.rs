use crate::{
    errors::AppError,
    mcp::registry::Tool,
    sandbox::PathResolver,
    tools::{blocking, resolve_path_param},
};
use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use std::fs;

pub struct FsReadTool {
    resolver: PathResolver,
}

impl FsReadTool {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Tool for FsReadTool {
    fn name(&self) -> &'static str { "fs_read" }
    fn description(&self) -> &'static str { "Read file contents" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","required":["path"],"properties": {"path": {"type":"string"},"encoding":{"type":"string","enum":["utf8","base64"]}}}, "output": {"type":"object","properties": {"content":{"type":"string"},"content_b64":{"type":"string"},"encoding":{"type":"string"},"size":{"type":"integer"}}}})
    }
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let full = resolve_path_param(&self.resolver, &params)?;
        let base64 = match params.get("encoding").and_then(|v| v.as_str()) {
            None | Some("utf8") => false,
            Some("base64") => true,
            Some(other) => return Err(AppError::ToolError(format!("unknown encoding: {other}"))),
        };
        let data = blocking(move || {
            let meta = fs::metadata(&full).map_err(|e| AppError::from_io(&e))?;
            if meta.is_dir() {
                return Err(AppError::ToolError("path is a directory, not a file".into()));
            }
            fs::read(&full).map_err(|e| AppError::from_io(&e))
        })
        .await?;
        if base64 {
            let b64 = base64::engine::general_purpose::STANDARD.encode(&data);
            Ok(json!({"content_b64": b64, "encoding": "base64", "size": data.len()}))
        } else {
            let text = String::from_utf8_lossy(&data);
            Ok(json!({"content": text, "encoding": "utf8", "size": data.len()}))
        }
    }
}
