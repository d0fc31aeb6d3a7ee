//! Patch application - turns validated directives into filesystem effects
//!
//! This module provides the [`Patcher`] engine that:
//! - Extracts directives from tagged text
//! - Validates them (callers must stop on an invalid report)
//! - Backs up existing targets before mutating them
//! - Replaces whole files and splices named functions
//! - Reports one [`OperationRecord`] per directive
//!
//! A failing directive is recorded and the batch moves on; inspect every
//! record, not just the first failure.

use crate::directive::{
    FileDirective, FunctionDirective, OperationKind, OperationRecord, ParseResult, SpliceOutcome,
};
use crate::extract::{ExtractError, TagExtractor, TagSet};
use crate::fs::{Filesystem, OsFilesystem};
use crate::safety;
use crate::splice::{self, SpliceError};
use crate::validate::{self, ValidationReport};
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Options for [`Patcher::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Copy existing targets to `<file>.backup.<timestamp>` before mutating
    pub backup: bool,
    /// Report what would happen without writing anything
    pub dry_run: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            backup: true,
            dry_run: false,
        }
    }
}

/// Per-directive failure. Never aborts the batch.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("backup of {} failed: {source}", path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Splice(#[from] SpliceError),
}

/// What a directive would do to its target, computed without writing.
#[derive(Debug)]
pub struct PlannedChange {
    pub kind: OperationKind,
    pub path: String,
    pub name: Option<String>,
    pub target: PathBuf,
    /// Target text before this directive (after earlier directives in the run)
    pub before: Option<String>,
    pub after: Result<String, ApplyError>,
}

/// Directive engine bound to one base directory.
///
/// Holds no state between calls; one instance can serve any number of
/// unrelated inputs.
#[derive(Debug)]
pub struct Patcher<F: Filesystem = OsFilesystem> {
    extractor: TagExtractor,
    fs: F,
}

impl Patcher<OsFilesystem> {
    /// Engine over the real filesystem with the default `ai_gen` tags.
    pub fn new(base_dir: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_tags(base_dir, TagSet::default())
    }

    pub fn with_tags(base_dir: impl AsRef<Path>, tags: TagSet) -> io::Result<Self> {
        let base_dir = safety::absolute_base(base_dir)?;
        Ok(Self::with_filesystem(base_dir, tags, OsFilesystem))
    }
}

impl<F: Filesystem> Patcher<F> {
    /// Engine over an arbitrary filesystem. `base_dir` is used as given.
    pub fn with_filesystem(base_dir: impl Into<PathBuf>, tags: TagSet, fs: F) -> Self {
        Self {
            extractor: TagExtractor::new(base_dir, tags),
            fs,
        }
    }

    pub fn base_dir(&self) -> &Path {
        self.extractor.base_dir()
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    pub fn extract(&self, content: &str) -> ParseResult {
        self.extractor.extract(content)
    }

    pub fn extract_from_reader<R: Read>(&self, reader: R) -> Result<ParseResult, ExtractError> {
        self.extractor.extract_from_reader(reader)
    }

    pub fn extract_from_path(&self, path: impl AsRef<Path>) -> Result<ParseResult, ExtractError> {
        self.extractor.extract_from_path(path)
    }

    pub fn validate(&self, result: &ParseResult) -> ValidationReport {
        validate::validate(result)
    }

    /// Apply every directive: files first, then functions, each in
    /// extraction order. Does not validate.
    pub fn apply(&self, result: &ParseResult, options: ApplyOptions) -> Vec<OperationRecord> {
        let mut records = Vec::with_capacity(result.directive_count());

        for file in &result.files {
            let mut record = OperationRecord::for_file(file);
            let outcome = self
                .prepare(&file.resolved_path, options, &mut record)
                .and_then(|()| self.replace_file(file, options));
            records.push(finish(record, outcome.map(|()| None)));
        }

        for func in &result.functions {
            let mut record = OperationRecord::for_function(func);
            let outcome = self
                .prepare(&func.resolved_path, options, &mut record)
                .and_then(|()| self.replace_function(func, options));
            records.push(finish(record, outcome));
        }

        records
    }

    /// Splice `content` into the file at `path` in place of `name`.
    pub fn splice_function(
        &self,
        path: &Path,
        name: &str,
        content: &str,
    ) -> Result<SpliceOutcome, SpliceError> {
        splice::splice_function(&self.fs, path, name, content)
    }

    /// Compute the text each directive would produce, in apply order,
    /// without touching the filesystem.
    pub fn preview(&self, result: &ParseResult) -> Vec<PlannedChange> {
        let mut current: HashMap<PathBuf, Option<String>> = HashMap::new();
        let mut planned = Vec::with_capacity(result.directive_count());

        for file in &result.files {
            let before = self.current_text(&mut current, &file.resolved_path);
            current.insert(file.resolved_path.clone(), Some(file.content.clone()));
            planned.push(PlannedChange {
                kind: OperationKind::FileReplace,
                path: file.path.clone(),
                name: None,
                target: file.resolved_path.clone(),
                before,
                after: Ok(file.content.clone()),
            });
        }

        for func in &result.functions {
            let before = self.current_text(&mut current, &func.resolved_path);
            let after = match &before {
                Some(source) => splice::splice_source(source, &func.name, &func.content)
                    .map(|splice| splice.text)
                    .map_err(ApplyError::from),
                None => Err(SpliceError::NotFound(func.resolved_path.clone()).into()),
            };
            if let Ok(text) = &after {
                current.insert(func.resolved_path.clone(), Some(text.clone()));
            }
            planned.push(PlannedChange {
                kind: OperationKind::FunctionReplace,
                path: func.path.clone(),
                name: Some(func.name.clone()),
                target: func.resolved_path.clone(),
                before,
                after,
            });
        }

        planned
    }

    fn current_text(
        &self,
        current: &mut HashMap<PathBuf, Option<String>>,
        path: &Path,
    ) -> Option<String> {
        current
            .entry(path.to_path_buf())
            .or_insert_with(|| {
                if self.fs.is_file(path) {
                    self.fs.read_to_string(path).ok()
                } else {
                    None
                }
            })
            .clone()
    }

    /// Backup step shared by both directive kinds.
    fn prepare(
        &self,
        target: &Path,
        options: ApplyOptions,
        record: &mut OperationRecord,
    ) -> Result<(), ApplyError> {
        // Dry runs write nothing, backups included
        if options.backup && !options.dry_run && self.fs.is_file(target) {
            record.backup = Some(self.backup_file(target)?);
        }
        Ok(())
    }

    fn backup_file(&self, target: &Path) -> Result<PathBuf, ApplyError> {
        self.backup_to(target, backup_path(target))
    }

    /// Copy `target` to `stem`, or to `stem-1`, `stem-2`, ... when earlier
    /// backups already hold those names. Existing backups are never replaced.
    fn backup_to(&self, target: &Path, stem: PathBuf) -> Result<PathBuf, ApplyError> {
        let mut candidate = stem.clone();
        for attempt in 1u32.. {
            match self.fs.copy_new(target, &candidate) {
                Ok(()) => {
                    debug!(target = %target.display(), backup = %candidate.display(), "backed up");
                    return Ok(candidate);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let mut name = stem.as_os_str().to_owned();
                    name.push(format!("-{attempt}"));
                    candidate = PathBuf::from(name);
                }
                Err(source) => {
                    return Err(ApplyError::Backup {
                        path: target.to_path_buf(),
                        source,
                    })
                }
            }
        }
        Err(ApplyError::Backup {
            path: target.to_path_buf(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free backup name"),
        })
    }

    fn replace_file(&self, file: &FileDirective, options: ApplyOptions) -> Result<(), ApplyError> {
        if options.dry_run {
            return Ok(());
        }

        let target = &file.resolved_path;
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !self.fs.exists(parent) {
                self.fs
                    .create_dir_all(parent)
                    .map_err(|source| ApplyError::CreateDir {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        self.fs
            .write(target, &file.content)
            .map_err(|source| ApplyError::Write {
                path: target.clone(),
                source,
            })
    }

    fn replace_function(
        &self,
        func: &FunctionDirective,
        options: ApplyOptions,
    ) -> Result<Option<SpliceOutcome>, ApplyError> {
        if options.dry_run {
            return Ok(None);
        }
        let outcome = self.splice_function(&func.resolved_path, &func.name, &func.content)?;
        Ok(Some(outcome))
    }
}

fn finish(
    mut record: OperationRecord,
    outcome: Result<Option<SpliceOutcome>, ApplyError>,
) -> OperationRecord {
    match outcome {
        Ok(splice) => {
            info!(kind = %record.kind, path = %record.path, "directive applied");
            record.success = true;
            record.splice = splice;
        }
        Err(e) => {
            warn!(kind = %record.kind, path = %record.path, error = %e, "directive failed");
            record.success = false;
            record.error = Some(e.to_string());
        }
    }
    record
}

/// `<target>.backup.<timestamp>`, with `:` and `.` in the ISO-8601 UTC
/// timestamp replaced by `-`.
pub fn backup_path(target: &Path) -> PathBuf {
    let timestamp = Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    let mut name = target.as_os_str().to_owned();
    name.push(".backup.");
    name.push(timestamp);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;

    const BASE: &str = "/project";

    fn patcher(memfs: MemoryFilesystem) -> Patcher<MemoryFilesystem> {
        Patcher::with_filesystem(BASE, TagSet::default(), memfs)
    }

    fn backups_of(memfs: &MemoryFilesystem, target: &str) -> Vec<PathBuf> {
        let prefix = format!("{target}.backup.");
        memfs
            .paths()
            .into_iter()
            .filter(|p| p.to_string_lossy().starts_with(&prefix))
            .collect()
    }

    #[test]
    fn test_backup_path_format() {
        let path = backup_path(Path::new("/p/a.txt"));
        let name = path.to_string_lossy().into_owned();
        let stamp = name.strip_prefix("/p/a.txt.backup.").unwrap();

        // 2026-10-19T12-34-56-789Z
        assert_eq!(stamp.len(), 24);
        assert!(stamp.ends_with('Z'));
        assert!(!stamp.contains(':'));
        assert!(!stamp.contains('.'));
    }

    #[test]
    fn test_repeated_directives_keep_every_backup() {
        let memfs = MemoryFilesystem::new().with_file("/project/a.txt", "v0");
        let engine = patcher(memfs);
        let result = engine.extract(
            r#"<ai_gen:data>
<ai_gen:file path="a.txt">v1</ai_gen:file>
<ai_gen:file path="a.txt">v2</ai_gen:file>
<ai_gen:file path="a.txt">v3</ai_gen:file>
</ai_gen:data>"#,
        );

        let records = engine.apply(&result, ApplyOptions::default());

        assert!(records.iter().all(|r| r.success));
        let saved: Vec<_> = records
            .iter()
            .map(|r| {
                let backup = r.backup.as_ref().unwrap();
                engine.filesystem().contents(backup).unwrap()
            })
            .collect();
        assert_eq!(saved, vec!["v0", "v1", "v2"]);
        assert_eq!(backups_of(engine.filesystem(), "/project/a.txt").len(), 3);
        assert_eq!(
            engine.filesystem().contents("/project/a.txt").as_deref(),
            Some("v3")
        );
    }

    #[test]
    fn test_backup_name_collision_gets_suffix() {
        let memfs = MemoryFilesystem::new()
            .with_file("/project/a.txt", "current")
            .with_file("/project/a.txt.bak", "oldest")
            .with_file("/project/a.txt.bak-1", "older");
        let engine = patcher(memfs);

        let backup = engine
            .backup_to(Path::new("/project/a.txt"), PathBuf::from("/project/a.txt.bak"))
            .unwrap();

        assert_eq!(backup, PathBuf::from("/project/a.txt.bak-2"));
        let fs = engine.filesystem();
        assert_eq!(fs.contents("/project/a.txt.bak").as_deref(), Some("oldest"));
        assert_eq!(fs.contents("/project/a.txt.bak-1").as_deref(), Some("older"));
        assert_eq!(fs.contents("/project/a.txt.bak-2").as_deref(), Some("current"));
    }

    #[test]
    fn test_file_directive_creates_directories() {
        let engine = patcher(MemoryFilesystem::new());
        let result = engine.extract(
            r#"<ai_gen:data><ai_gen:file path="src/deep/new.js">hello</ai_gen:file></ai_gen:data>"#,
        );

        let records = engine.apply(&result, ApplyOptions::default());

        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert_eq!(records[0].backup, None);
        assert_eq!(
            engine.filesystem().contents("/project/src/deep/new.js").as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn test_backup_keeps_old_content() {
        let memfs = MemoryFilesystem::new().with_file("/project/a.txt", "old");
        let engine = patcher(memfs);
        let result = engine
            .extract(r#"<ai_gen:data><ai_gen:file path="a.txt">new</ai_gen:file></ai_gen:data>"#);

        let records = engine.apply(&result, ApplyOptions::default());

        assert!(records[0].success);
        let backups = backups_of(engine.filesystem(), "/project/a.txt");
        assert_eq!(backups.len(), 1);
        assert_eq!(records[0].backup.as_ref(), Some(&backups[0]));
        assert_eq!(
            engine.filesystem().contents(&backups[0]).as_deref(),
            Some("old")
        );
        assert_eq!(
            engine.filesystem().contents("/project/a.txt").as_deref(),
            Some("new")
        );
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let memfs = MemoryFilesystem::new().with_file("/project/a.txt", "old");
        let engine = patcher(memfs);
        let result = engine.extract(
            r#"<ai_gen:data>
<ai_gen:file path="a.txt">new</ai_gen:file>
<ai_gen:function path="missing.js" name="run">function run() {}</ai_gen:function>
</ai_gen:data>"#,
        );

        let records = engine.apply(
            &result,
            ApplyOptions {
                backup: true,
                dry_run: true,
            },
        );

        assert!(records.iter().all(|r| r.success));
        assert_eq!(engine.filesystem().paths(), vec![PathBuf::from("/project/a.txt")]);
        assert_eq!(
            engine.filesystem().contents("/project/a.txt").as_deref(),
            Some("old")
        );
    }

    #[test]
    fn test_failure_is_isolated() {
        let memfs = MemoryFilesystem::new().with_read_only("/project/locked");
        let engine = patcher(memfs);
        let result = engine.extract(
            r#"<ai_gen:data>
<ai_gen:file path="locked/a.txt">A</ai_gen:file>
<ai_gen:file path="open/b.txt">B</ai_gen:file>
</ai_gen:data>"#,
        );

        let records = engine.apply(&result, ApplyOptions::default());

        assert_eq!(records.len(), 2);
        assert!(!records[0].success);
        assert!(records[0]
            .error
            .as_deref()
            .unwrap()
            .contains("permission denied"));
        assert!(records[1].success);
        assert_eq!(
            engine.filesystem().contents("/project/open/b.txt").as_deref(),
            Some("B")
        );
    }

    #[test]
    fn test_backup_failure_skips_directive() {
        let memfs = MemoryFilesystem::new()
            .with_file("/project/ro/a.txt", "old")
            .with_read_only("/project/ro");
        let engine = patcher(memfs);
        let result = engine.extract(
            r#"<ai_gen:data><ai_gen:file path="ro/a.txt">new</ai_gen:file></ai_gen:data>"#,
        );

        let records = engine.apply(&result, ApplyOptions::default());

        assert!(!records[0].success);
        assert!(records[0].error.as_deref().unwrap().starts_with("backup of"));
        assert_eq!(
            engine.filesystem().contents("/project/ro/a.txt").as_deref(),
            Some("old")
        );
    }

    #[test]
    fn test_records_files_before_functions() {
        let memfs = MemoryFilesystem::new().with_file("/project/main.js", "function run() {}\n");
        let engine = patcher(memfs);
        let result = engine.extract(
            r#"<ai_gen:data>
<ai_gen:function path="main.js" name="run">function run() { return 1; }</ai_gen:function>
<ai_gen:file path="b.js">b</ai_gen:file>
<ai_gen:function path="absent.js" name="go">function go() {}</ai_gen:function>
</ai_gen:data>"#,
        );

        let records = engine.apply(
            &result,
            ApplyOptions {
                backup: false,
                dry_run: false,
            },
        );

        let kinds: Vec<_> = records.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::FileReplace,
                OperationKind::FunctionReplace,
                OperationKind::FunctionReplace
            ]
        );
        assert_eq!(records[1].splice, Some(SpliceOutcome::Replaced));
        assert!(!records[2].success);
        assert!(records[2]
            .error
            .as_deref()
            .unwrap()
            .starts_with("File not found"));
        assert_eq!(
            engine.filesystem().contents("/project/main.js").as_deref(),
            Some("function run() { return 1; }\n")
        );
    }

    #[test]
    fn test_preview_is_cumulative_and_read_only() {
        let memfs = MemoryFilesystem::new().with_file("/project/main.js", "const x = 1;");
        let engine = patcher(memfs);
        let result = engine.extract(
            r#"<ai_gen:data>
<ai_gen:function path="main.js" name="a">function a() {}</ai_gen:function>
<ai_gen:function path="main.js" name="b">function b() {}</ai_gen:function>
<ai_gen:function path="none.js" name="c">function c() {}</ai_gen:function>
</ai_gen:data>"#,
        );

        let planned = engine.preview(&result);

        assert_eq!(planned.len(), 3);
        assert_eq!(planned[0].before.as_deref(), Some("const x = 1;"));
        assert_eq!(
            planned[1].before.as_deref(),
            Some("const x = 1;\n\nfunction a() {}")
        );
        assert_eq!(
            planned[1].after.as_deref().unwrap(),
            "const x = 1;\n\nfunction a() {}\n\nfunction b() {}"
        );
        assert!(planned[2].after.is_err());
        assert_eq!(
            engine.filesystem().contents("/project/main.js").as_deref(),
            Some("const x = 1;")
        );
    }
}
