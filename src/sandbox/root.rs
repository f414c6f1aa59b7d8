use super::PathError;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

/// Shared handle to the allowed root directory.
///
/// Clones share the same root. Tests that need isolation build their own
/// registry instead of swapping a global.
#[derive(Debug, Clone)]
pub struct RootRegistry {
    root: Arc<RwLock<PathBuf>>,
}

impl RootRegistry {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PathError> {
        let root = canonical_dir(path.as_ref())?;
        Ok(Self {
            root: Arc::new(RwLock::new(root)),
        })
    }

    /// Root for a normal startup. There is no fallback if the working
    /// directory cannot be read.
    pub fn from_current_dir() -> Result<Self, PathError> {
        let cwd = std::env::current_dir()?;
        Self::new(cwd)
    }

    pub fn get(&self) -> PathBuf {
        // a writer only ever stores a complete PathBuf, so a poisoned value is still whole
        match self.root.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces the root. Only for startup wiring and tests; requests
    /// already inside `validate` keep the root they read on entry.
    pub fn set(&self, path: impl AsRef<Path>) -> Result<(), PathError> {
        let root = canonical_dir(path.as_ref())?;
        let mut guard = match self.root.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = root;
        Ok(())
    }
}

fn canonical_dir(path: &Path) -> Result<PathBuf, PathError> {
    let root = dunce::canonicalize(path)?;
    if !root.is_dir() {
        return Err(PathError::InvalidPath);
    }
    Ok(root)
}
