//! Filesystem access used by the applier and splicer.
//!
//! The engine only touches the filesystem through [`Filesystem`], so it can
//! run against the real disk ([`OsFilesystem`]) or an in-memory tree
//! ([`MemoryFilesystem`]).

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Blocking filesystem operations needed to apply directives.
pub trait Filesystem {
    fn exists(&self, path: &Path) -> bool;

    fn is_file(&self, path: &Path) -> bool;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Replace the whole contents of `path`. The parent directory must exist.
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Copy `from` to a new file at `to`. Fails with `AlreadyExists` when
    /// `to` is already present; nothing is overwritten.
    fn copy_new(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// The real filesystem. Writes are atomic (tempfile + fsync + rename).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        atomic_write(path, contents.as_bytes())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn copy_new(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut source = fs::File::open(from)?;
        let mut dest = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(to)?;
        io::copy(&mut source, &mut dest)?;
        dest.set_permissions(source.metadata()?.permissions())?;
        dest.sync_all()
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or the target is left untouched. An
/// existing target keeps its permissions; a new file gets the usual
/// umask-filtered `0o666`.
fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    // Tempfile must live in the same directory so the rename stays on one filesystem
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Path has no parent directory",
            ))
        }
    };

    let existing = fs::metadata(path).ok().map(|meta| meta.permissions());

    let mut builder = tempfile::Builder::new();
    if existing.is_none() {
        new_file_mode(&mut builder);
    }

    let mut temp = builder.tempfile_in(parent)?;
    temp.write_all(content)?;
    if let Some(permissions) = existing {
        temp.as_file().set_permissions(permissions)?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

// Applied at creation, so the process umask still filters it
#[cfg(unix)]
fn new_file_mode(builder: &mut tempfile::Builder<'_, '_>) {
    use std::os::unix::fs::PermissionsExt;
    builder.permissions(fs::Permissions::from_mode(0o666));
}

#[cfg(not(unix))]
fn new_file_mode(_builder: &mut tempfile::Builder<'_, '_>) {}

/// In-memory filesystem for tests and previews.
///
/// Paths under a read-only prefix reject every mutation with
/// `PermissionDenied`, which is how tests inject write failures.
#[derive(Debug, Default)]
pub struct MemoryFilesystem {
    state: RefCell<MemoryState>,
}

#[derive(Debug, Default, Clone)]
struct MemoryState {
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeSet<PathBuf>,
    read_only: Vec<PathBuf>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file, creating its parent directories.
    pub fn with_file(self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let path = path.into();
        {
            let mut state = self.state.borrow_mut();
            if let Some(parent) = path.parent() {
                state.add_dirs(parent);
            }
            state.files.insert(path, contents.into());
        }
        self
    }

    /// Reject writes at or below `prefix`.
    pub fn with_read_only(self, prefix: impl Into<PathBuf>) -> Self {
        self.state.borrow_mut().read_only.push(prefix.into());
        self
    }

    /// Current contents of `path`, if it is a file.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state.borrow().files.get(path.as_ref()).cloned()
    }

    /// All file paths currently stored, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.state.borrow().files.keys().cloned().collect()
    }

    fn check_writable(&self, path: &Path) -> io::Result<()> {
        if self
            .state
            .borrow()
            .read_only
            .iter()
            .any(|prefix| path.starts_with(prefix))
        {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", path.display()),
            ));
        }
        Ok(())
    }
}

impl MemoryState {
    fn add_dirs(&mut self, dir: &Path) {
        for ancestor in dir.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path) || path.parent().is_none()
    }
}

impl Filesystem for MemoryFilesystem {
    fn exists(&self, path: &Path) -> bool {
        let state = self.state.borrow();
        state.files.contains_key(path) || state.is_dir(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.state.borrow().files.contains_key(path)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.state.borrow().files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            )
        })
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        self.check_writable(path)?;
        let mut state = self.state.borrow_mut();
        if state.is_dir(path) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("is a directory: {}", path.display()),
            ));
        }
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !state.is_dir(parent) => {
                Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("parent directory missing: {}", parent.display()),
                ))
            }
            _ => {
                state.files.insert(path.to_path_buf(), contents.to_string());
                Ok(())
            }
        }
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        if self.state.borrow().is_dir(path) {
            return Ok(());
        }
        self.check_writable(path)?;
        let mut state = self.state.borrow_mut();
        if let Some(blocker) = path.ancestors().find(|a| state.files.contains_key(*a)) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("not a directory: {}", blocker.display()),
            ));
        }
        state.add_dirs(path);
        Ok(())
    }

    fn copy_new(&self, from: &Path, to: &Path) -> io::Result<()> {
        let contents = self.read_to_string(from)?;
        if self.exists(to) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already exists: {}", to.display()),
            ));
        }
        self.write(to, &contents)
    }
}
