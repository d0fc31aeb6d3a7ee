//! Directive records produced by extraction and consumed by the applier.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Replace the entire contents of `path` with `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDirective {
    /// Path as written in the tag, relative to the base directory
    pub path: String,
    /// Tag body with surrounding whitespace trimmed
    pub content: String,
    /// `path` resolved against the base directory
    pub resolved_path: PathBuf,
}

/// Replace (or append) the definition named `name` inside `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionDirective {
    pub path: String,
    pub name: String,
    pub content: String,
    pub resolved_path: PathBuf,
}

/// A malformed tag found while extracting one outer block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseError {
    /// First 100 characters of the offending block
    pub block: String,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (in block: {})", self.message, self.block)
    }
}

/// Everything extracted from one input text.
///
/// Files and functions each keep their order of appearance in the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseResult {
    pub files: Vec<FileDirective>,
    pub functions: Vec<FunctionDirective>,
    pub errors: Vec<ParseError>,
}

impl ParseResult {
    /// True when no directives were found.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.functions.is_empty()
    }

    /// Number of directives (files plus functions).
    pub fn directive_count(&self) -> usize {
        self.files.len() + self.functions.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    FileReplace,
    FunctionReplace,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::FileReplace => f.write_str("file_replace"),
            OperationKind::FunctionReplace => f.write_str("function_replace"),
        }
    }
}

/// How a function directive landed in its target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpliceOutcome {
    /// An existing definition was replaced
    Replaced,
    /// No definition matched; the content was appended
    Appended,
}

/// Audit entry for one attempted directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[must_use = "OperationRecord should be checked for success/failure"]
pub struct OperationRecord {
    pub kind: OperationKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Backup copy written before mutation, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splice: Option<SpliceOutcome>,
}

impl OperationRecord {
    pub(crate) fn for_file(directive: &FileDirective) -> Self {
        Self {
            kind: OperationKind::FileReplace,
            path: directive.path.clone(),
            name: None,
            success: false,
            error: None,
            backup: None,
            splice: None,
        }
    }

    pub(crate) fn for_function(directive: &FunctionDirective) -> Self {
        Self {
            kind: OperationKind::FunctionReplace,
            path: directive.path.clone(),
            name: Some(directive.name.clone()),
            success: false,
            error: None,
            backup: None,
            splice: None,
        }
    }
}

impl fmt::Display for OperationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.name {
            Some(name) => format!("{}#{}", self.path, name),
            None => self.path.clone(),
        };
        match (&self.error, self.success) {
            (_, true) => write!(f, "{} {}: ok", self.kind, target),
            (Some(error), false) => write!(f, "{} {}: failed: {}", self.kind, target, error),
            (None, false) => write!(f, "{} {}: failed", self.kind, target),
        }
    }
}
