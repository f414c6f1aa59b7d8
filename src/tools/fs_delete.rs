use crate::{
    errors::AppError,
    mcp::registry::Tool,
    sandbox::PathResolver,
    tools::{blocking, resolve_path_param},
};
use async_trait::async_trait;
use serde_json::json;
use std::fs;

pub struct FsDeleteTool {
    resolver: PathResolver,
}

impl FsDeleteTool {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Tool for FsDeleteTool {
    fn name(&self) -> &'static str { "fs_delete" }
    fn description(&self) -> &'static str { "Delete a file or directory" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","required":["path"],"properties": {"path": {"type":"string"}}}, "output": {"type":"object","properties": {"success":{"type":"boolean"}}}})
    }
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let full = resolve_path_param(&self.resolver, &params)?;
        if full == self.resolver.root().get() {
            return Err(AppError::ToolError("refusing to delete the root directory".into()));
        }
        blocking(move || {
            let meta = fs::symlink_metadata(&full).map_err(|e| AppError::from_io(&e))?;
            let removed = if meta.is_dir() { fs::remove_dir_all(&full) } else { fs::remove_file(&full) };
            removed.map_err(|e| AppError::from_io(&e))
        })
        .await?;
        Ok(json!({"success": true}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::RootRegistry;
    use assert_fs::prelude::*;

    fn tool(dir: &assert_fs::TempDir) -> FsDeleteTool {
        FsDeleteTool::new(PathResolver::new(RootRegistry::new(dir.path()).unwrap()))
    }

    #[tokio::test]
    async fn deletes_file_and_tree() {
        let tmp = assert_fs::TempDir::new().unwrap();
        tmp.child("f.txt").touch().unwrap();
        tmp.child("d/e").create_dir_all().unwrap();
        tmp.child("d/e/g.txt").touch().unwrap();
        tool(&tmp).call(json!({"path": "f.txt"})).await.unwrap();
        tool(&tmp).call(json!({"path": "d"})).await.unwrap();
        assert!(!tmp.path().join("f.txt").exists());
        assert!(!tmp.path().join("d").exists());
    }

    #[tokio::test]
    async fn root_is_protected() {
        let tmp = assert_fs::TempDir::new().unwrap();
        for candidate in [".", "sub/.."] {
            let err = tool(&tmp).call(json!({"path": candidate})).await.unwrap_err();
            assert!(matches!(err, AppError::ToolError(_)));
        }
        assert!(tmp.path().is_dir());
    }

    #[tokio::test]
    async fn missing_target_is_not_found() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let err = tool(&tmp).call(json!({"path": "ghost"})).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn outside_target_survives() {
        let tmp = assert_fs::TempDir::new().unwrap();
        tmp.child("root").create_dir_all().unwrap();
        tmp.child("keep.txt").touch().unwrap();
        let t = FsDeleteTool::new(PathResolver::new(
            RootRegistry::new(tmp.path().join("root")).unwrap(),
        ));
        let err = t.call(json!({"path": "../keep.txt"})).await.unwrap_err();
        assert!(matches!(err, AppError::PathOutsideRoot));
        assert!(tmp.path().join("keep.txt").exists());
    }
}
