pub mod exec;
pub mod fs_delete;
pub mod fs_list;
pub mod fs_read;
pub mod fs_write;

use crate::{errors::AppError, mcp::registry::str_param, sandbox::PathResolver};
use std::path::PathBuf;

/// Resolves the `path` parameter. Nothing touches the filesystem on failure.
pub fn resolve_path_param(
    resolver: &PathResolver,
    params: &serde_json::Value,
) -> Result<PathBuf, AppError> {
    let path = str_param(params, "path")?;
    Ok(resolver.validate(path)?)
}

/// Runs blocking filesystem work off the async workers.
pub async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
}
