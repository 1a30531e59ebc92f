//! Unified diff handling.
//!
//! Model output is parsed exactly once into a [`UnifiedDiff`]. Parsing is the
//! strict grammar check: anything that does not parse is rejected with a
//! [`DiffError`] naming the offending construct. The parsed value is then
//! threaded through application and commit without re-reading the text.

mod apply;
mod validate;

use serde::Serialize;
use thiserror::Error;

pub use apply::{apply_file_patch, apply_patch};
pub use validate::{parse, validate, Validation};

/// Diffs shorter than this (after trimming) are treated as empty.
pub const MIN_DIFF_LEN: usize = 10;

/// A parsed unified diff: one entry per `diff --git` section, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedDiff {
    pub files: Vec<FilePatch>,
}

/// Changes to a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// Path on the old side, without the `a/` prefix
    pub old_path: String,
    /// Path on the new side, without the `b/` prefix
    pub new_path: String,
    pub is_new: bool,
    pub is_deleted: bool,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    /// Path the patch writes to.
    pub fn target_path(&self) -> &str {
        &self.new_path
    }
}

/// One `@@ -a,b +c,d @@` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines the hunk expects to find in the original (context and deletions).
    pub fn old_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            HunkLine::Context(text) | HunkLine::Removed(text) => Some(text.as_str()),
            HunkLine::Added(_) => None,
        })
    }

    /// Lines the hunk leaves behind (context and additions).
    pub fn new_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            HunkLine::Context(text) | HunkLine::Added(text) => Some(text.as_str()),
            HunkLine::Removed(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Removed(String),
    Added(String),
}

/// Reasons a diff fails the grammar check.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DiffError {
    #[error("Empty or invalid diff")]
    Empty,

    #[error("Missing diff header")]
    MissingHeader,

    #[error("Unexpected line outside hunk: \"{0}\"")]
    UnexpectedLine(String),

    #[error("Malformed hunk header: \"{0}\"")]
    MalformedHunkHeader(String),

    #[error("Invalid diff line inside hunk: \"{0}\"")]
    InvalidHunkLine(String),

    #[error("Hunk old_count mismatch: expected {expected}, saw {seen}")]
    OldCountMismatch { expected: usize, seen: usize },

    #[error("Hunk new_count mismatch: expected {expected}, saw {seen}")]
    NewCountMismatch { expected: usize, seen: usize },
}

/// Reasons a parsed diff cannot be applied to a file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("invalid new-file patch content")]
    EmptyNewFile,

    #[error("context mismatch at line {line}: expected {expected:?}, found {found:?}")]
    ContextMismatch {
        line: usize,
        expected: String,
        found: Option<String>,
    },

    #[error("overlapping hunks at line {0}")]
    OverlappingHunks(usize),

    #[error("could not apply patch to existing file")]
    Unchanged,

    #[error("file deletion is not supported: {0}")]
    DeletionUnsupported(String),

    #[error("expected a diff for exactly one file, got {0}")]
    NotSingleFile(usize),
}
