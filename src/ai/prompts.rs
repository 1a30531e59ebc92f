use std::fmt::Write;

use serde_json::Value;

use crate::providers::RepoFile;

pub const LOG_BUDGET: usize = 15_000;
pub const CI_CONFIG_BUDGET: usize = 10_000;
pub const FILE_BUDGET: usize = 6_000;
pub const METADATA_BUDGET: usize = 5_000;
pub const TARGETS_BUDGET: usize = 5_000;
pub const MAX_PROMPT_FILES: usize = 12;

/// Keeps at most `max` characters from the start of `text`.
///
/// Cuts on a char boundary, so multi-byte input never panics.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

fn metadata_section(metadata: &Value) -> String {
    let rendered = serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string());
    truncate_chars(&rendered, METADATA_BUDGET).to_string()
}

/// Prompt asking for a root-cause analysis as a single JSON object.
pub fn diagnosis_prompt(logs: &str, ci_config: &str, metadata: &Value) -> String {
    format!(
        r#"Diagnose the CI pipeline failure below.
Output ONLY a JSON object of this shape, with no prose and no code fences:
{{ "summary": "string", "rootCause": "string", "category": "config | dependency | test | infra | timeout | other", "failingFile": "repository path or null", "confidence": 0.0 }}
confidence is a number between 0 and 1.

LOGS:
{logs}

CI CONFIG:
{ci}

METADATA:
{meta}
"#,
        logs = truncate_chars(logs, LOG_BUDGET),
        ci = truncate_chars(ci_config, CI_CONFIG_BUDGET),
        meta = metadata_section(metadata),
    )
}

/// Prompt asking for a fix as a raw unified diff over the given files.
///
/// Only the first [`MAX_PROMPT_FILES`] files are embedded, each cut to
/// [`FILE_BUDGET`] characters.
pub fn patch_prompt(
    logs: &str,
    ci_config: &str,
    metadata: &Value,
    files: &[RepoFile],
    target_paths: &[String],
) -> String {
    let mut file_sections = String::new();
    for (i, file) in files.iter().take(MAX_PROMPT_FILES).enumerate() {
        let _ = write!(
            file_sections,
            "\n### FILE {}: {}\n{}\n",
            i + 1,
            file.path,
            truncate_chars(&file.content, FILE_BUDGET)
        );
    }

    let targets = target_paths.join("\n");

    format!(
        r#"Fix the CI pipeline failure below by editing repository files.
Output ONLY a raw unified diff. No explanations, no markdown, no code fences.

Diff rules:
1. Each file starts with
   diff --git a/<path> b/<path>
   --- a/<path>
   +++ b/<path>
2. Use exactly one hunk per changed region:
   @@ -<old_start>,<old_count> +<new_start>,<new_count> @@
3. Inside a hunk every line starts with a single space (context), "+" (added) or "-" (removed).
   Context and removed lines must match the current file exactly.
4. Only edit paths listed under TARGET FILES.
5. Make the smallest change that fixes the error shown in the logs. Do not invent edits.

LOGS:
{logs}

CI CONFIG:
{ci}

TARGET FILES:
{targets}

FILE CONTENTS:
{file_sections}
METADATA:
{meta}

Respond with the unified diff only.
"#,
        logs = truncate_chars(logs, LOG_BUDGET),
        ci = truncate_chars(ci_config, CI_CONFIG_BUDGET),
        targets = truncate_chars(&targets, TARGETS_BUDGET),
        meta = metadata_section(metadata),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file(path: &str, content: &str) -> RepoFile {
        RepoFile {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn truncate_keeps_prefix() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
    }

    #[test]
    fn diagnosis_prompt_bounds_logs() {
        let logs = "x".repeat(LOG_BUDGET + 500);
        let prompt = diagnosis_prompt(&logs, "stages: [test]", &json!({"pipelineId": 9}));

        assert!(!prompt.contains(&"x".repeat(LOG_BUDGET + 1)));
        assert!(prompt.contains(&"x".repeat(LOG_BUDGET)));
        assert!(prompt.contains("stages: [test]"));
        assert!(prompt.contains(r#""pipelineId":9"#));
        assert!(prompt.contains("rootCause"));
    }

    #[test]
    fn patch_prompt_embeds_at_most_twelve_files() {
        let files: Vec<RepoFile> = (1..=15)
            .map(|i| file(&format!("src/file{i}.rs"), "fn main() {}"))
            .collect();
        let targets = vec!["src/file1.rs".to_string()];

        let prompt = patch_prompt("error", "ci", &json!({}), &files, &targets);

        assert!(prompt.contains("### FILE 12: src/file12.rs"));
        assert!(!prompt.contains("src/file13.rs"));
        assert!(prompt.contains("TARGET FILES:\nsrc/file1.rs"));
    }

    #[test]
    fn patch_prompt_truncates_each_file() {
        let big = "y".repeat(FILE_BUDGET * 2);
        let prompt = patch_prompt("", "", &json!({}), &[file("big.txt", &big)], &[]);
        assert!(prompt.contains(&"y".repeat(FILE_BUDGET)));
        assert!(!prompt.contains(&"y".repeat(FILE_BUDGET + 1)));
    }
}
