use log::{debug, warn};
use serde::Serialize;

use super::{DiffError, FilePatch, Hunk, HunkLine, UnifiedDiff, MIN_DIFF_LEN};

/// Outcome of the grammar check in the shape surfaced to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the strict grammar check and reports `{ok, error}`.
pub fn validate(diff: &str) -> Validation {
    match parse(diff) {
        Ok(_) => Validation {
            ok: true,
            error: None,
        },
        Err(e) => Validation {
            ok: false,
            error: Some(e.to_string()),
        },
    }
}

/// Parses a unified diff, rejecting anything outside the accepted grammar.
///
/// Only structure is checked; target file content is never consulted. Rules
/// are applied line by line and the first violation wins.
///
/// # Errors
///
/// Returns the [`DiffError`] describing the first violation.
pub fn parse(diff: &str) -> Result<UnifiedDiff, DiffError> {
    if diff.trim().len() < MIN_DIFF_LEN {
        warn!("Diff rejected: empty or too short");
        return Err(DiffError::Empty);
    }

    // A final newline is not an extra (empty) hunk line.
    let body = diff.trim_end_matches(['\n', '\r']);
    let mut lines = body.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

    let first = lines.next().unwrap_or_default();
    let Some(first_file) = parse_file_header(first) else {
        warn!("Diff rejected: missing 'diff --git' header");
        return Err(DiffError::MissingHeader);
    };

    let mut parser = Parser {
        files: Vec::new(),
        current: first_file,
        hunk: None,
    };

    for line in lines {
        parser.feed(line)?;
    }

    let diff = parser.finish()?;
    debug!("Diff accepted: {} file(s)", diff.files.len());
    Ok(diff)
}

struct Parser {
    files: Vec<FilePatch>,
    current: FilePatch,
    hunk: Option<OpenHunk>,
}

struct OpenHunk {
    hunk: Hunk,
    old_seen: usize,
    new_seen: usize,
}

impl Parser {
    fn feed(&mut self, line: &str) -> Result<(), DiffError> {
        if line.starts_with("diff --git") {
            self.close_hunk()?;
            let next = parse_file_header(line).ok_or(DiffError::MissingHeader)?;
            let finished = std::mem::replace(&mut self.current, next);
            self.files.push(finished);
            return Ok(());
        }

        if line.starts_with("@@") {
            self.close_hunk()?;
            let (old_start, old_count, new_start, new_count) = parse_hunk_header(line)
                .ok_or_else(|| DiffError::MalformedHunkHeader(line.to_string()))?;
            self.hunk = Some(OpenHunk {
                hunk: Hunk {
                    old_start,
                    old_count,
                    new_start,
                    new_count,
                    lines: Vec::new(),
                },
                old_seen: 0,
                new_seen: 0,
            });
            return Ok(());
        }

        if let Some(open) = self.hunk.as_mut() {
            return open.push(line);
        }

        self.header_line(line)
    }

    fn header_line(&mut self, line: &str) -> Result<(), DiffError> {
        if line.trim().is_empty() || line.starts_with("index ") {
            return Ok(());
        }

        if line.starts_with("new file mode") {
            self.current.is_new = true;
        } else if line.starts_with("deleted file mode") {
            self.current.is_deleted = true;
        } else if let Some(path) = line.strip_prefix("--- ") {
            if path.trim() == "/dev/null" {
                self.current.is_new = true;
            } else {
                self.current.old_path = strip_side_prefix(path, "a/");
            }
        } else if let Some(path) = line.strip_prefix("+++ ") {
            if path.trim() == "/dev/null" {
                self.current.is_deleted = true;
            } else {
                self.current.new_path = strip_side_prefix(path, "b/");
            }
        } else {
            warn!("Diff rejected: unexpected line outside hunk: {line:?}");
            return Err(DiffError::UnexpectedLine(line.to_string()));
        }

        Ok(())
    }

    fn close_hunk(&mut self) -> Result<(), DiffError> {
        let Some(open) = self.hunk.take() else {
            return Ok(());
        };

        if open.old_seen < open.hunk.old_count {
            warn!(
                "Diff rejected: hunk declares {} old lines, saw {}",
                open.hunk.old_count, open.old_seen
            );
            return Err(DiffError::OldCountMismatch {
                expected: open.hunk.old_count,
                seen: open.old_seen,
            });
        }

        if open.new_seen < open.hunk.new_count {
            warn!(
                "Diff rejected: hunk declares {} new lines, saw {}",
                open.hunk.new_count, open.new_seen
            );
            return Err(DiffError::NewCountMismatch {
                expected: open.hunk.new_count,
                seen: open.new_seen,
            });
        }

        self.current.hunks.push(open.hunk);
        Ok(())
    }

    fn finish(mut self) -> Result<UnifiedDiff, DiffError> {
        self.close_hunk()?;
        self.files.push(self.current);
        Ok(UnifiedDiff { files: self.files })
    }
}

impl OpenHunk {
    fn push(&mut self, line: &str) -> Result<(), DiffError> {
        if let Some(text) = line.strip_prefix('+') {
            if text.starts_with("++") {
                return Err(invalid_line(line));
            }
            self.new_seen += 1;
            self.hunk.lines.push(HunkLine::Added(text.to_string()));
        } else if let Some(text) = line.strip_prefix('-') {
            if text.starts_with("--") {
                return Err(invalid_line(line));
            }
            self.old_seen += 1;
            self.hunk.lines.push(HunkLine::Removed(text.to_string()));
        } else if let Some(text) = line.strip_prefix(' ') {
            self.old_seen += 1;
            self.new_seen += 1;
            self.hunk.lines.push(HunkLine::Context(text.to_string()));
        } else if line.starts_with("\\ No newline at end of file") {
            // Marker only; carries no line of its own.
        } else {
            return Err(invalid_line(line));
        }

        Ok(())
    }
}

fn invalid_line(line: &str) -> DiffError {
    warn!("Diff rejected: invalid line inside hunk: {line:?}");
    DiffError::InvalidHunkLine(line.to_string())
}

/// Parses `diff --git a/<path> b/<path>`.
fn parse_file_header(line: &str) -> Option<FilePatch> {
    let rest = line.strip_prefix("diff --git a/")?;
    let split = rest.rfind(" b/")?;
    let old_path = &rest[..split];
    let new_path = &rest[split + 3..];

    if old_path.is_empty() || new_path.is_empty() {
        return None;
    }

    Some(FilePatch {
        old_path: old_path.to_string(),
        new_path: new_path.to_string(),
        is_new: false,
        is_deleted: false,
        hunks: Vec::new(),
    })
}

fn strip_side_prefix(path: &str, prefix: &str) -> String {
    let path = path.trim_end();
    // Some generators append a tab and timestamp after the path.
    let path = path.split('\t').next().unwrap_or(path);
    path.strip_prefix(prefix).unwrap_or(path).to_string()
}

/// Parses `@@ -<oldStart>[,<oldCount>] +<newStart>[,<newCount>] @@[ section]`.
///
/// Missing counts default to 1.
fn parse_hunk_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    let rest = line.strip_prefix("@@ -")?;
    let (ranges, _section) = rest.split_once(" @@")?;
    let (old, new) = ranges.split_once(" +")?;
    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;
    Some((old_start, old_count, new_start, new_count))
}

fn parse_range(range: &str) -> Option<(usize, usize)> {
    let (start, count) = match range.split_once(',') {
        Some((start, count)) => (start, Some(count)),
        None => (range, None),
    };

    let start = parse_digits(start)?;
    let count = match count {
        Some(count) => parse_digits(count)?,
        None => 1,
    };

    Some((start, count))
}

fn parse_digits(raw: &str) -> Option<usize> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
