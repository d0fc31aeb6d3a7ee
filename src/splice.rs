//! Function splicing: replace a named definition inside a source file, or
//! append the new definition when none is found.
//!
//! Definitions are located textually. A regex finds the declaration head and
//! a small scanner (string- and comment-aware) walks brackets to find where
//! the definition ends. Four declaration shapes are tried in order:
//!
//! 1. `function name(...) { ... }` (optionally `async`)
//! 2. `const|let|var name = ...` up to the next top-level declaration
//! 3. `name: function(...) { ... }` inside an object literal
//! 4. `name = ...` up to the next top-level declaration
//!
//! The first occurrence of the first shape that matches is replaced. Heads
//! that start inside a comment or string literal are ignored.

use crate::directive::SpliceOutcome;
use crate::fs::Filesystem;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DECLARATION_KEYWORDS: [&str; 5] = ["const", "let", "var", "function", "class"];

#[derive(Error, Debug)]
pub enum SpliceError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid declaration pattern for `{name}`: {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// Declaration shapes recognized by the locator, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationShape {
    /// `function name(...) { ... }`
    FunctionDeclaration,
    /// `const name = ...`
    BoundAssignment,
    /// `name: function(...) { ... }`
    MethodExpression,
    /// `name = ...`
    BareAssignment,
}

impl DeclarationShape {
    const ALL: [DeclarationShape; 4] = [
        DeclarationShape::FunctionDeclaration,
        DeclarationShape::BoundAssignment,
        DeclarationShape::MethodExpression,
        DeclarationShape::BareAssignment,
    ];

    fn head_pattern(self, name: &str) -> String {
        let name = regex::escape(name);
        match self {
            DeclarationShape::FunctionDeclaration => {
                format!(r"(?:\basync\s+)?\bfunction\b\s*\*?\s*{name}\s*\(")
            }
            DeclarationShape::BoundAssignment => format!(r"\b(?:const|let|var)\s+{name}\s*="),
            DeclarationShape::MethodExpression => {
                format!(r"{name}\s*:\s*(?:async\s+)?function\b\s*\*?\s*\(")
            }
            DeclarationShape::BareAssignment => format!(r"{name}\s*="),
        }
    }
}

/// A located definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub shape: DeclarationShape,
    pub span: Range<usize>,
}

/// Result of splicing into a source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    pub text: String,
    pub outcome: SpliceOutcome,
    pub shape: Option<DeclarationShape>,
}

/// Find the definition of `name` in `source`.
pub fn locate(source: &str, name: &str) -> Result<Option<Located>, regex::Error> {
    if name.is_empty() {
        return Ok(None);
    }

    let code: HashSet<usize> = CodeChars::new(source, 0).map(|(i, _)| i).collect();

    for shape in DeclarationShape::ALL {
        let head = Regex::new(&shape.head_pattern(name))?;
        for m in head.find_iter(source) {
            if !code.contains(&m.start()) {
                continue;
            }
            if let Some(span) = definition_span(source, shape, m.start(), m.end()) {
                return Ok(Some(Located { shape, span }));
            }
        }
    }

    Ok(None)
}

/// Replace the definition of `name` in `source` with `new_content`, or
/// append `new_content` after a blank line when nothing matches.
pub fn splice_source(source: &str, name: &str, new_content: &str) -> Result<Splice, SpliceError> {
    let located = locate(source, name).map_err(|source| SpliceError::Pattern {
        name: name.to_string(),
        source,
    })?;

    Ok(match located {
        Some(Located { shape, span }) => {
            let mut text = String::with_capacity(source.len() + new_content.len());
            text.push_str(&source[..span.start]);
            text.push_str(new_content);
            text.push_str(&source[span.end..]);
            Splice {
                text,
                outcome: SpliceOutcome::Replaced,
                shape: Some(shape),
            }
        }
        None => Splice {
            text: format!("{source}\n\n{new_content}"),
            outcome: SpliceOutcome::Appended,
            shape: None,
        },
    })
}

/// Splice `new_content` into the file at `path` and write it back.
pub fn splice_function<F: Filesystem>(
    fs: &F,
    path: &Path,
    name: &str,
    new_content: &str,
) -> Result<SpliceOutcome, SpliceError> {
    if !fs.is_file(path) {
        return Err(SpliceError::NotFound(path.to_path_buf()));
    }

    let source = fs.read_to_string(path).map_err(|source| SpliceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let splice = splice_source(&source, name, new_content)?;

    fs.write(path, &splice.text)
        .map_err(|source| SpliceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(splice.outcome)
}

/// Span of the definition whose head regex matched `[head_start, head_end)`.
fn definition_span(
    source: &str,
    shape: DeclarationShape,
    head_start: usize,
    head_end: usize,
) -> Option<Range<usize>> {
    match shape {
        DeclarationShape::FunctionDeclaration => {
            let end = block_end_after_params(source, head_end)?;
            Some(head_start..end)
        }
        DeclarationShape::MethodExpression => {
            if !starts_identifier(source, head_start) {
                return None;
            }
            let end = block_end_after_params(source, head_end)?;
            Some(head_start..end)
        }
        DeclarationShape::BoundAssignment => {
            Some(head_start..assignment_end(source, head_start, head_end))
        }
        DeclarationShape::BareAssignment => {
            if !starts_identifier(source, head_start) || source[..head_start].ends_with('.') {
                return None;
            }
            if matches!(source[head_end..].chars().next(), Some('=') | Some('>')) {
                return None;
            }
            Some(head_start..assignment_end(source, head_start, head_end))
        }
    }
}

/// True if the identifier at `at` is not the tail of a longer identifier.
fn starts_identifier(source: &str, at: usize) -> bool {
    !source[..at].chars().next_back().is_some_and(is_ident_char)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// `params_start` is just past the opening paren. Returns the offset just
/// past the closing brace of the body.
fn block_end_after_params(source: &str, params_start: usize) -> Option<usize> {
    let close_paren = matching_close(source, params_start, '(', ')')?;

    // Only whitespace, or a `: Type` return annotation, may sit between `)`
    // and `{`
    let mut body_open = None;
    let mut annotated = false;
    for (i, c) in CodeChars::new(source, close_paren + 1) {
        match c {
            '{' => {
                body_open = Some(i);
                break;
            }
            ';' | '}' => return None,
            ':' if !annotated => annotated = true,
            c if annotated || c.is_whitespace() => {}
            _ => return None,
        }
    }

    let close_brace = matching_close(source, body_open? + 1, '{', '}')?;
    Some(close_brace + 1)
}

/// Offset of the bracket closing one already opened just before `from`.
fn matching_close(source: &str, from: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in CodeChars::new(source, from) {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// End of an assignment: the newline before the next top-level declaration,
/// or the end of the file without trailing whitespace.
fn assignment_end(source: &str, head_start: usize, value_start: usize) -> usize {
    let mut depth = 0usize;
    for (i, c) in CodeChars::new(source, value_start) {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '\n' if depth == 0 && declaration_follows(&source[i + 1..]) => {
                return if source[..i].ends_with('\r') { i - 1 } else { i };
            }
            _ => {}
        }
    }
    source.trim_end().len().max(value_start).max(head_start)
}

fn declaration_follows(rest: &str) -> bool {
    let rest = rest.trim_start();
    DECLARATION_KEYWORDS.iter().any(|kw| {
        rest.strip_prefix(kw)
            .is_some_and(|after| !after.chars().next().is_some_and(is_ident_char))
    })
}

/// Iterates characters outside of string literals and comments.
struct CodeChars<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> CodeChars<'a> {
    fn new(source: &'a str, pos: usize) -> Self {
        Self { source, pos }
    }

    fn skip_line_comment(&mut self) {
        let rest = &self.source[self.pos..];
        self.pos += rest.find('\n').unwrap_or(rest.len());
    }

    fn skip_block_comment(&mut self) {
        let rest = &self.source[self.pos + 2..];
        self.pos += 2 + rest.find("*/").map_or(rest.len(), |i| i + 2);
    }

    fn skip_string(&mut self, quote: char) {
        let mut escaped = false;
        let start = self.pos + quote.len_utf8();
        for (i, c) in self.source[start..].char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' => escaped = true,
                '\n' if quote != '`' => {
                    // Unterminated single-line string; resume at the newline
                    self.pos = start + i;
                    return;
                }
                c if c == quote => {
                    self.pos = start + i + c.len_utf8();
                    return;
                }
                _ => {}
            }
        }
        self.pos = self.source.len();
    }
}

impl Iterator for CodeChars<'_> {
    type Item = (usize, char);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rest = self.source.get(self.pos..)?;
            let c = rest.chars().next()?;

            if rest.starts_with("//") {
                self.skip_line_comment();
            } else if rest.starts_with("/*") {
                self.skip_block_comment();
            } else if matches!(c, '"' | '\'' | '`') {
                self.skip_string(c);
            } else {
                let at = self.pos;
                self.pos += c.len_utf8();
                return Some((at, c));
            }
        }
    }
}
