use std::{fs, path::Path};

/// Guesses whether an exec argument names a file, so it can be sent through
/// [`PathResolver`](super::PathResolver) before the process sees it.
///
/// This is not a security boundary. The filesystem probe races with the
/// command that later uses the token, and a path the heuristic misses is
/// passed through unchecked. Only the resolver's containment check is a
/// guarantee; the command whitelist bounds what a miss can do.
///
/// `base` is the directory the command will run in (the root).
pub fn looks_like_path(token: &str, base: &Path) -> bool {
    if token.starts_with('-') {
        return false;
    }
    if token.contains(&['/', '\\'][..]) || token.starts_with('.') || Path::new(token).is_absolute()
    {
        return true;
    }
    if fs::symlink_metadata(base.join(token)).is_ok() {
        return true;
    }
    // a bare word's parent is the base itself
    Path::new(token)
        .parent()
        .is_some_and(|parent| base.join(parent).exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn flags_are_not_paths() {
        let tmp = assert_fs::TempDir::new().unwrap();
        assert!(!looks_like_path("-L", tmp.path()));
        assert!(!looks_like_path("--all", tmp.path()));
        assert!(!looks_like_path("-/etc", tmp.path()));
    }

    #[test]
    fn separators_and_dots_are_paths() {
        let tmp = assert_fs::TempDir::new().unwrap();
        assert!(looks_like_path("/abs/path", tmp.path()));
        assert!(looks_like_path("./rel", tmp.path()));
        assert!(looks_like_path("..", tmp.path()));
        assert!(looks_like_path(".hidden", tmp.path()));
        assert!(looks_like_path("dir/file", tmp.path()));
        assert!(looks_like_path("dir\\file", tmp.path()));
    }

    #[test]
    fn bare_names_under_existing_base_are_paths() {
        let tmp = assert_fs::TempDir::new().unwrap();
        tmp.child("notes.txt").touch().unwrap();
        assert!(looks_like_path("notes.txt", tmp.path()));
        assert!(looks_like_path("ghost.txt", tmp.path()));
        assert!(looks_like_path("2", tmp.path()));
    }

    #[test]
    fn bare_name_under_missing_base_is_not_a_path() {
        let tmp = assert_fs::TempDir::new().unwrap();
        assert!(!looks_like_path("ghost.txt", &tmp.path().join("gone")));
    }
}
