//! Structural validation of extracted directives.
//!
//! This is the only path-safety gate in the engine: the applier trusts
//! whatever it is given. Callers must validate and stop on an invalid
//! report before calling apply.
//!
//! Validation never touches the filesystem and never mutates directives.

use crate::directive::ParseResult;
use crate::safety;
use serde::Serialize;
use std::fmt;

/// One problem found in a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// File directive with an empty `path`
    EmptyFilePath,
    /// Path contains a `..` segment
    ParentTraversal { path: String },
    /// Path is absolute and would ignore the base directory
    AbsolutePath { path: String },
    /// Function directive with an empty `path` or `name`
    InvalidFunction { path: String, name: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyFilePath => write!(f, "Invalid file path: (empty)"),
            ValidationIssue::ParentTraversal { path } => {
                write!(f, "Invalid file path: {path} (parent directory traversal)")
            }
            ValidationIssue::AbsolutePath { path } => {
                write!(f, "Invalid file path: {path} (absolute path)")
            }
            ValidationIssue::InvalidFunction { path, name } => {
                write!(f, "Invalid function definition: path={path}, name={name}")
            }
        }
    }
}

/// Outcome of [`validate`]. Valid exactly when there are no issues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Human-readable error strings, one per issue.
    pub fn errors(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

impl Serialize for ValidationReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("ValidationReport", 2)?;
        state.serialize_field("valid", &self.is_valid())?;
        state.serialize_field("errors", &self.errors())?;
        state.end()
    }
}

/// Check every directive in `result` for path safety and required fields.
pub fn validate(result: &ParseResult) -> ValidationReport {
    let mut issues = Vec::new();

    for file in &result.files {
        if file.path.is_empty() {
            issues.push(ValidationIssue::EmptyFilePath);
        } else {
            check_path(&file.path, &mut issues);
        }
    }

    for func in &result.functions {
        if func.path.is_empty() || func.name.is_empty() {
            issues.push(ValidationIssue::InvalidFunction {
                path: func.path.clone(),
                name: func.name.clone(),
            });
        }
        if !func.path.is_empty() {
            check_path(&func.path, &mut issues);
        }
    }

    ValidationReport { issues }
}

fn check_path(path: &str, issues: &mut Vec<ValidationIssue>) {
    if safety::has_parent_segment(path) {
        issues.push(ValidationIssue::ParentTraversal {
            path: path.to_string(),
        });
    }
    if safety::is_rooted(path) {
        issues.push(ValidationIssue::AbsolutePath {
            path: path.to_string(),
        });
    }
}
