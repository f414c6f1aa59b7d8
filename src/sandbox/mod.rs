//! Root containment for every caller-supplied path.
//!
//! [`RootRegistry`] holds the allowed root, [`PathResolver`] proves that a
//! candidate path stays inside it, and [`looks_like_path`] picks which exec
//! arguments have to go through the resolver at all.

mod classify;
mod resolver;
mod root;

pub use classify::looks_like_path;
pub use resolver::PathResolver;
pub use root::RootRegistry;

use thiserror::Error;

/// Why a candidate path was not resolved.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("invalid path")]
    InvalidPath,
    #[error("path is outside allowed directory")]
    OutsideRoot,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
