//! Aigen Patcher: directive-driven code patching
//!
//! Scans free-form text (typically model output) for `ai_gen` markup,
//! extracts whole-file and named-function replacement directives, validates
//! them, and applies them to a project tree.
//!
//! # Pipeline
//!
//! raw text -> [`TagExtractor`] -> [`ParseResult`] -> [`validate()`] ->
//! [`ValidationReport`] -> [`Patcher::apply`] -> [`OperationRecord`]s
//!
//! # Safety
//!
//! - Validation is the only path-traversal gate; never apply an invalid result
//! - Existing targets are backed up before mutation (unless disabled)
//! - Writes to the real filesystem are atomic (tempfile + fsync + rename)
//! - One failing directive never aborts the rest of the batch
//!
//! # Example
//!
//! ```no_run
//! use aigen_patcher::{ApplyOptions, Patcher};
//!
//! # fn main() -> std::io::Result<()> {
//! let patcher = Patcher::new("./project")?;
//! let result = patcher.extract(
//!     r#"<ai_gen:data>
//!     <ai_gen:file path="src/utils.js">module.exports = {};</ai_gen:file>
//!     </ai_gen:data>"#,
//! );
//!
//! let report = patcher.validate(&result);
//! if report.is_valid() {
//!     for record in patcher.apply(&result, ApplyOptions::default()) {
//!         println!("{record}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod apply;
pub mod config;
pub mod directive;
pub mod extract;
pub mod fs;
pub mod safety;
pub mod splice;
pub mod validate;

// Re-exports
pub use apply::{backup_path, ApplyError, ApplyOptions, Patcher, PlannedChange};
pub use config::{load_for_base, load_from_path, load_from_str, ConfigError, PatcherConfig};
pub use directive::{
    FileDirective, FunctionDirective, OperationKind, OperationRecord, ParseError, ParseResult,
    SpliceOutcome,
};
pub use extract::{ExtractError, TagExtractor, TagSet};
pub use fs::{Filesystem, MemoryFilesystem, OsFilesystem};
pub use splice::{locate, splice_function, splice_source, DeclarationShape, Splice, SpliceError};
pub use validate::{validate, ValidationIssue, ValidationReport};
