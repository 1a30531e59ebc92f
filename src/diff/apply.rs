use log::{debug, warn};

use super::{ApplyError, FilePatch, Hunk, HunkLine, UnifiedDiff};

/// Applies a diff that targets exactly one file.
///
/// # Errors
///
/// Returns [`ApplyError::NotSingleFile`] when the diff touches more or fewer
/// than one file, otherwise whatever [`apply_file_patch`] reports.
pub fn apply_patch(original: &str, diff: &UnifiedDiff) -> Result<String, ApplyError> {
    match diff.files.as_slice() {
        [file] => apply_file_patch(original, file),
        files => Err(ApplyError::NotSingleFile(files.len())),
    }
}

/// Produces the new content of one file.
///
/// New files are built from the added lines alone. For existing files every
/// hunk must match the original line for line at its declared position; there
/// is no fuzzy search for a better offset. A file with CRLF line endings is
/// matched without the `\r` and written back with CRLF throughout.
///
/// # Errors
///
/// Fails on context mismatch, overlapping hunks, empty new-file content, or
/// when the result is empty or identical to the original.
pub fn apply_file_patch(original: &str, patch: &FilePatch) -> Result<String, ApplyError> {
    if patch.is_deleted {
        return Err(ApplyError::DeletionUnsupported(patch.old_path.clone()));
    }

    if patch.is_new {
        return build_new_file(patch);
    }

    let had_trailing_newline = original.ends_with('\n');
    let line_ending = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = split_lines(original);

    let mut hunks: Vec<&Hunk> = patch.hunks.iter().collect();
    hunks.sort_by_key(|hunk| hunk.old_start);

    // Hunk positions are in original coordinates; `offset` tracks how far
    // earlier splices have shifted them.
    let mut offset: isize = 0;
    let mut previous_end = 0usize;

    for hunk in hunks {
        let old: Vec<&str> = hunk.old_lines().collect();
        let new: Vec<String> = hunk.new_lines().map(str::to_string).collect();

        let start = hunk_start(hunk, old.is_empty())?;
        if start < previous_end {
            warn!("Overlapping hunk at line {}", hunk.old_start);
            return Err(ApplyError::OverlappingHunks(hunk.old_start));
        }

        let position = start
            .checked_add_signed(offset)
            .ok_or(ApplyError::OverlappingHunks(hunk.old_start))?;

        verify_context(&lines, position, start, &old)?;

        debug!(
            "Applying hunk @@ -{},{} +{},{} @@ at line {}",
            hunk.old_start,
            hunk.old_count,
            hunk.new_start,
            hunk.new_count,
            position + 1
        );

        let removed = old.len();
        let added = new.len();
        lines.splice(position..position + removed, new);

        #[allow(clippy::cast_possible_wrap)]
        {
            offset += added as isize - removed as isize;
        }
        previous_end = start + removed;
    }

    let mut result = lines.join(line_ending);
    if !result.is_empty() && (had_trailing_newline || original.is_empty()) {
        result.push_str(line_ending);
    }

    if result.trim().is_empty() || result == original {
        warn!("Patch left {} empty or unchanged", patch.target_path());
        return Err(ApplyError::Unchanged);
    }

    Ok(result)
}

fn build_new_file(patch: &FilePatch) -> Result<String, ApplyError> {
    let added: Vec<&str> = patch
        .hunks
        .iter()
        .flat_map(|hunk| hunk.lines.iter())
        .filter_map(|line| match line {
            HunkLine::Added(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();

    let content = added.join("\n");
    if content.trim().is_empty() {
        warn!("New-file patch for {} has no content", patch.target_path());
        return Err(ApplyError::EmptyNewFile);
    }

    Ok(content + "\n")
}

/// Zero-based index of the first original line the hunk covers.
///
/// A pure insertion (`-N,0`) goes after line N, anything else starts at N.
fn hunk_start(hunk: &Hunk, pure_insertion: bool) -> Result<usize, ApplyError> {
    if pure_insertion {
        return Ok(hunk.old_start);
    }

    hunk.old_start
        .checked_sub(1)
        .ok_or_else(|| ApplyError::ContextMismatch {
            line: 0,
            expected: hunk.old_lines().next().unwrap_or_default().to_string(),
            found: None,
        })
}

fn verify_context(
    lines: &[String],
    position: usize,
    original_start: usize,
    expected: &[&str],
) -> Result<(), ApplyError> {
    if expected.is_empty() && position > lines.len() {
        return Err(ApplyError::ContextMismatch {
            line: original_start,
            expected: String::new(),
            found: None,
        });
    }

    for (i, expected_line) in expected.iter().enumerate() {
        let found = lines.get(position + i);
        if found.map(String::as_str) != Some(*expected_line) {
            warn!(
                "Context mismatch at line {}: expected {expected_line:?}, found {found:?}",
                original_start + i + 1
            );
            return Err(ApplyError::ContextMismatch {
                line: original_start + i + 1,
                expected: (*expected_line).to_string(),
                found: found.cloned(),
            });
        }
    }

    Ok(())
}

fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    text.strip_suffix('\n')
        .unwrap_or(text)
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}
