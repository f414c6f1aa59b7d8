use crate::{config::Config, errors::AppError, sandbox::PathResolver};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type DynTool = Arc<dyn Tool + Send + Sync + 'static>;

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Vec<(String, DynTool)>,
}

impl ToolRegistry {
    pub fn new(cfg: &Config, resolver: &PathResolver) -> anyhow::Result<Self> {
        use crate::tools::{
            exec::{ExecListTool, ExecTool},
            fs_delete::FsDeleteTool,
            fs_list::FsListTool,
            fs_read::FsReadTool,
            fs_write::FsWriteTool,
        };
        let exec = ExecTool::new(cfg, resolver.clone())?;
        let exec_list = ExecListTool::new(exec.commands());
        let all: Vec<DynTool> = vec![
            Arc::new(FsListTool::new(resolver.clone())),
            Arc::new(FsReadTool::new(resolver.clone())),
            Arc::new(FsWriteTool::new(resolver.clone())),
            Arc::new(FsDeleteTool::new(resolver.clone())),
            Arc::new(exec_list),
            Arc::new(exec),
        ];
        let mut tools: Vec<(String, DynTool)> =
            all.into_iter().map(|t| (t.name().to_string(), t)).collect();
        tools.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self { tools })
    }

    pub fn get(&self, name: &str) -> Option<DynTool> { self.tools.iter().find(|(n, _)| n == name).map(|(_, t)| t.clone()) }
    pub fn list_names(&self) -> Vec<String> { self.tools.iter().map(|(n, _)| n.clone()).collect() }
    pub fn iter(&self) -> impl Iterator<Item = &DynTool> { self.tools.iter().map(|(_, t)| t) }
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct CallResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")] pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")] pub error: Option<super::types::ErrorObj>,
}

impl CallResponse {
    pub fn ok(id: String, result: serde_json::Value) -> Self {
        Self { id, result: Some(result), error: None }
    }

    pub fn err(id: String, e: &AppError) -> Self {
        let error = super::types::ErrorObj { code: e.code().to_string(), message: e.to_string() };
        Self { id, result: None, error: Some(error) }
    }
}

#[async_trait]
pub trait Tool {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn capabilities(&self) -> serde_json::Value;
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError>;
    async fn call_stream(&self, _params: serde_json::Value) -> Result<crate::server::StreamBody, AppError> {
        Err(AppError::ToolError("streaming not supported".into()))
    }
}

/// Reads a required string parameter.
pub fn str_param<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, AppError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::ToolError(format!("missing {key}")))
}
