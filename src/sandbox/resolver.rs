use super::{PathError, RootRegistry};
use std::{
    ffi::OsString,
    fs, io,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, warn};

/// Dangling links followed during one resolution before giving up.
const MAX_SYMLINK_HOPS: u8 = 40;

/// Maps untrusted path strings to real locations under the allowed root.
///
/// Every call reads the live filesystem. Nothing is cached, so a symlink
/// swapped between two calls is seen by the second one.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: RootRegistry,
}

impl PathResolver {
    pub fn new(root: RootRegistry) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &RootRegistry {
        &self.root
    }

    /// Resolves `candidate` and checks that the result is the root or lies
    /// below it.
    ///
    /// Relative candidates are taken from the root. Targets that do not exist
    /// yet resolve through their nearest existing ancestor, so callers can
    /// create them.
    pub fn validate(&self, candidate: &str) -> Result<PathBuf, PathError> {
        if candidate.is_empty() {
            warn!(candidate, reason = "empty", "path rejected");
            return Err(PathError::InvalidPath);
        }
        let root = self.root.get();
        let input = Path::new(candidate);
        let absolute = if input.is_absolute() {
            normalize(input)
        } else {
            normalize(&root.join(input))
        };

        let outcome = resolve(&root, &absolute, MAX_SYMLINK_HOPS);
        match &outcome {
            Ok(resolved) => debug!(candidate, resolved = %resolved.display(), "path resolved"),
            Err(err) => warn!(candidate, reason = %err, "path rejected"),
        }
        outcome
    }
}

fn resolve(root: &Path, absolute: &Path, hops: u8) -> Result<PathBuf, PathError> {
    match dunce::canonicalize(absolute) {
        Ok(real) if is_within(root, &real) => Ok(real),
        Ok(_) => Err(PathError::OutsideRoot),
        Err(e) if e.kind() == io::ErrorKind::NotFound => resolve_missing(root, absolute, hops),
        Err(e) => Err(e.into()),
    }
}

/// Resolves a path with a missing component through its nearest existing
/// ancestor and re-attaches the part that does not exist yet.
fn resolve_missing(root: &Path, absolute: &Path, hops: u8) -> Result<PathBuf, PathError> {
    let mut ancestor = absolute.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();
    // lstat, so a dangling link is found as an entry instead of walked past
    let meta = loop {
        match fs::symlink_metadata(&ancestor) {
            Ok(meta) => break meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(name) = ancestor.file_name() else {
                    return Err(PathError::InvalidPath);
                };
                missing.push(name.to_os_string());
                if !ancestor.pop() {
                    return Err(PathError::InvalidPath);
                }
            }
            Err(e) => return Err(e.into()),
        }
    };
    let remainder: PathBuf = missing.iter().rev().collect();

    match dunce::canonicalize(&ancestor) {
        Ok(real) => {
            if !is_within(root, &real) {
                return Err(PathError::OutsideRoot);
            }
            let full = append(real, &remainder);
            if !is_within(root, &full) {
                return Err(PathError::OutsideRoot);
            }
            Ok(full)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound && meta.file_type().is_symlink() => {
            if hops == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "too many levels of symbolic links",
                )
                .into());
            }
            // the OS would create the link's target, so that is what has to be checked
            let target = fs::read_link(&ancestor)?;
            let anchored = match ancestor.parent() {
                Some(parent) => dunce::canonicalize(parent)?.join(target),
                None => target,
            };
            resolve(root, &normalize(&append(anchored, &remainder)), hops - 1)
        }
        Err(e) => Err(e.into()),
    }
}

fn append(base: PathBuf, remainder: &Path) -> PathBuf {
    if remainder.as_os_str().is_empty() {
        base
    } else {
        base.join(remainder)
    }
}

/// Removes `.` and folds `..` without touching the filesystem. `..` never
/// climbs above the filesystem root.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if out.file_name().is_some() {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Component-wise containment: `path` is `root` or `root` followed by
/// plain components. `/srv/app-other` is not inside `/srv/app`.
pub(crate) fn is_within(root: &Path, path: &Path) -> bool {
    match path.strip_prefix(root) {
        Ok(rest) => rest.components().all(|c| matches!(c, Component::Normal(_))),
        Err(_) => false,
    }
}
