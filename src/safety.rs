//! Path handling for directive targets.
//!
//! Resolution is purely lexical: targets usually do not exist yet, so
//! `canonicalize` is not an option. Because `..` segments are folded
//! lexically, a resolved path can land outside the base directory; callers
//! must reject such paths with [`has_parent_segment`] before resolving.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Make `base` absolute against the current directory, without touching
/// the filesystem beyond reading the cwd.
pub fn absolute_base(base: impl AsRef<Path>) -> io::Result<PathBuf> {
    let base = base.as_ref();
    if base.is_absolute() {
        Ok(normalize(base))
    } else {
        Ok(normalize(&std::env::current_dir()?.join(base)))
    }
}

/// Resolve `relative` against `base`.
///
/// An absolute `relative` replaces `base` entirely, and `..` segments pop
/// components, so the result is not guaranteed to stay under `base`.
pub fn resolve(base: &Path, relative: &str) -> PathBuf {
    normalize(&base.join(relative))
}

/// True if any component of `path` is a parent-directory segment.
pub fn has_parent_segment(path: &str) -> bool {
    Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
}

/// True if `path` is absolute or carries a root/prefix component.
pub fn is_rooted(path: &str) -> bool {
    let p = Path::new(path);
    p.is_absolute() || p.has_root()
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
