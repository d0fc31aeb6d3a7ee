//! Tag extraction: turns free-form text into directive records.
//!
//! The input is scanned for outer blocks (`<ai_gen:data>...</ai_gen:data>`
//! by default). Each block is scanned independently for file and function
//! tags. A malformed tag becomes a [`ParseError`] and scanning resumes right
//! after it, so one bad tag never hides the directives around it.

use crate::directive::{FileDirective, FunctionDirective, ParseError, ParseResult};
use crate::safety;
use regex::Regex;
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Default tag namespace.
pub const DEFAULT_NAMESPACE: &str = "ai_gen";

const EXCERPT_CHARS: usize = 100;

/// Failure to read the input text at all. Malformed tags are never errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed to read input from {path}: {source}")]
    ReadPath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read input: {0}")]
    Read(#[from] io::Error),
}

/// Tag names recognized by the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    pub data: String,
    pub file: String,
    pub function: String,
}

impl TagSet {
    /// Tags `<ns:data>`, `<ns:file>` and `<ns:function>`.
    pub fn with_namespace(namespace: &str) -> Self {
        Self {
            data: format!("{namespace}:data"),
            file: format!("{namespace}:file"),
            function: format!("{namespace}:function"),
        }
    }
}

impl Default for TagSet {
    fn default() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    File,
    Function,
}

/// Extracts directives, resolving their paths against a fixed base directory.
#[derive(Debug, Clone)]
pub struct TagExtractor {
    base_dir: PathBuf,
    tags: TagSet,
}

impl TagExtractor {
    /// `base_dir` should already be absolute; see [`safety::absolute_base`].
    pub fn new(base_dir: impl Into<PathBuf>, tags: TagSet) -> Self {
        Self {
            base_dir: base_dir.into(),
            tags,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Extract every directive from `content`.
    pub fn extract(&self, content: &str) -> ParseResult {
        let mut result = ParseResult::default();

        for (index, block) in self.outer_blocks(content).into_iter().enumerate() {
            debug!(block = index, len = block.len(), "scanning outer block");
            self.scan_block(block, &mut result);
        }

        debug!(
            files = result.files.len(),
            functions = result.functions.len(),
            errors = result.errors.len(),
            "extraction finished"
        );
        result
    }

    /// Read all of `reader` and extract from it.
    pub fn extract_from_reader<R: Read>(&self, mut reader: R) -> Result<ParseResult, ExtractError> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        Ok(self.extract(&content))
    }

    /// Read the file at `path` and extract from it.
    pub fn extract_from_path(&self, path: impl AsRef<Path>) -> Result<ParseResult, ExtractError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ExtractError::ReadPath {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.extract(&content))
    }

    /// Trimmed inner text of every closed outer block, in order.
    fn outer_blocks<'a>(&self, content: &'a str) -> Vec<&'a str> {
        let open = format!("<{}>", self.tags.data);
        let close = format!("</{}>", self.tags.data);

        let mut blocks = Vec::new();
        let mut pos = 0;
        while let Some(start) = content[pos..].find(&open) {
            let inner_start = pos + start + open.len();
            let Some(end) = content[inner_start..].find(&close) else {
                debug!(offset = pos + start, "unclosed outer block ignored");
                break;
            };
            blocks.push(content[inner_start..inner_start + end].trim());
            pos = inner_start + end + close.len();
        }
        blocks
    }

    fn scan_block(&self, block: &str, result: &mut ParseResult) {
        let mut pos = 0;

        while let Some((tag_start, kind)) = self.next_open_tag(block, pos) {
            let name = self.tag_name(kind);
            let attrs_start = tag_start + 1 + name.len();

            let Some(attrs_len) = find_tag_end(&block[attrs_start..]) else {
                self.record_error(result, block, format!("unterminated <{name}> opening tag"));
                return;
            };
            let attrs_text = &block[attrs_start..attrs_start + attrs_len];
            let body_start = attrs_start + attrs_len + 1;

            // A tag with bad attributes owns no body; scanning resumes after it
            let attrs = match parse_attributes(attrs_text) {
                Ok(attrs) => attrs,
                Err(message) => {
                    self.record_error(result, block, format!("<{name}>: {message}"));
                    pos = body_start;
                    continue;
                }
            };

            let close = format!("</{name}>");
            let Some(body_len) = block[body_start..].find(&close) else {
                self.record_error(result, block, format!("missing closing tag {close}"));
                pos = body_start;
                continue;
            };
            let body = block[body_start..body_start + body_len].trim();
            pos = body_start + body_len + close.len();

            match kind {
                TagKind::File => match attrs.get("path") {
                    Some(path) => {
                        debug!(path = %path, "file directive");
                        result.files.push(FileDirective {
                            path: path.clone(),
                            content: body.to_string(),
                            resolved_path: safety::resolve(&self.base_dir, path),
                        });
                    }
                    None => {
                        self.record_error(result, block, format!("<{name}> is missing `path`"));
                    }
                },
                TagKind::Function => match (attrs.get("path"), attrs.get("name")) {
                    (Some(path), Some(fn_name)) => {
                        debug!(path = %path, name = %fn_name, "function directive");
                        result.functions.push(FunctionDirective {
                            path: path.clone(),
                            name: fn_name.clone(),
                            content: body.to_string(),
                            resolved_path: safety::resolve(&self.base_dir, path),
                        });
                    }
                    (None, _) => {
                        self.record_error(result, block, format!("<{name}> is missing `path`"));
                    }
                    (_, None) => {
                        self.record_error(result, block, format!("<{name}> is missing `name`"));
                    }
                },
            }
        }
    }

    /// Earliest file or function opening tag at or after `from`.
    fn next_open_tag(&self, block: &str, from: usize) -> Option<(usize, TagKind)> {
        let file = find_open_tag(block, from, &self.tags.file).map(|i| (i, TagKind::File));
        let function =
            find_open_tag(block, from, &self.tags.function).map(|i| (i, TagKind::Function));

        match (file, function) {
            (Some(f), Some(g)) => Some(if f.0 <= g.0 { f } else { g }),
            (found, None) | (None, found) => found,
        }
    }

    fn tag_name(&self, kind: TagKind) -> &str {
        match kind {
            TagKind::File => &self.tags.file,
            TagKind::Function => &self.tags.function,
        }
    }

    fn record_error(&self, result: &mut ParseResult, block: &str, message: String) {
        warn!(%message, "malformed directive tag");
        result.errors.push(ParseError {
            block: excerpt(block),
            message,
        });
    }
}

/// Offset of `<name` in `haystack[from..]` (absolute), where the name is
/// followed by whitespace, `>` or `/`.
fn find_open_tag(haystack: &str, from: usize, name: &str) -> Option<usize> {
    let needle = format!("<{name}");
    let mut pos = from;

    while let Some(found) = haystack[pos..].find(&needle) {
        let start = pos + found;
        let after = start + needle.len();
        match haystack[after..].chars().next() {
            Some(c) if c.is_whitespace() || c == '>' || c == '/' => return Some(start),
            _ => pos = after,
        }
    }
    None
}

/// Length up to the `>` closing an opening tag, skipping quoted values.
fn find_tag_end(s: &str) -> Option<usize> {
    let mut in_quote = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            '>' if !in_quote => return Some(i),
            _ => {}
        }
    }
    None
}

fn attribute_regex() -> &'static Regex {
    static ATTRIBUTE: OnceLock<Regex> = OnceLock::new();
    ATTRIBUTE.get_or_init(|| {
        Regex::new(r#"^([A-Za-z_][A-Za-z0-9_:.-]*)\s*=\s*"([^"]*)""#)
            .expect("attribute pattern is a valid regex")
    })
}

/// Parse `key="value"` pairs. Any leftover text makes the whole tag invalid.
fn parse_attributes(text: &str) -> Result<HashMap<String, String>, String> {
    let mut attrs = HashMap::new();
    let mut rest = text.trim_start();

    while !rest.is_empty() {
        let caps = attribute_regex()
            .captures(rest)
            .ok_or_else(|| format!("unparsable attributes `{}`", text.trim()))?;
        let whole = caps.get(0).map_or(0, |m| m.end());
        attrs
            .entry(caps[1].to_string())
            .or_insert_with(|| caps[2].to_string());
        rest = rest[whole..].trim_start();
    }

    Ok(attrs)
}

fn excerpt(block: &str) -> String {
    let mut chars = block.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
