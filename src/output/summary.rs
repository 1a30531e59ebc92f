use std::fmt::Write;

use comfy_table::Cell;

use crate::incident::Incident;

use super::styling::{bright, bright_green, bright_red, bright_yellow, cyan, dim};
use super::tables::{
    analysis_status_cell, confidence_cell, create_table, cyan_header, incident_status_cell,
    mr_status_cell, patch_status_cell,
};

/// Lines of the stored log shown in the detail view
const LOG_TAIL_LINES: usize = 15;

/// Prints one row per incident, newest first.
pub fn print_incidents(incidents: &[Incident]) {
    println!("{}", render_incidents(incidents));
}

/// Prints everything automation recorded for one incident.
pub fn print_incident(incident: &Incident) {
    println!("{}", render_incident(incident));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn add_field(output: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(output, "  {} {}", dim(format!("{label}:")), value);
}

fn render_incidents(incidents: &[Incident]) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "🚨", "Incidents");

    if incidents.is_empty() {
        let _ = writeln!(output, "{}", bright_yellow("No incidents recorded."));
        return output;
    }

    let mut table = create_table();
    table.set_header(cyan_header(&[
        "ID", "Pipeline", "Ref", "Category", "Status", "Analysis", "Patch", "MR", "Retries",
    ]));

    for incident in incidents {
        table.add_row(vec![
            Cell::new(&incident.id),
            Cell::new(format!("#{}", incident.pipeline_id)),
            Cell::new(incident.git_ref.as_deref().unwrap_or("-")),
            Cell::new(incident.category.map_or("-", |c| c.as_str())),
            incident_status_cell(incident.status),
            analysis_status_cell(incident.analysis_status),
            patch_status_cell(incident.patch_status),
            mr_status_cell(incident.mr_status),
            Cell::new(incident.retry_count),
        ]);
    }

    let _ = writeln!(output, "{table}");
    let _ = writeln!(
        output,
        "  {} Use {} for details",
        cyan("•"),
        bright_yellow("pipefix status <id>")
    );
    output
}

fn render_incident(incident: &Incident) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "🚨", "Incident");
    add_field(&mut output, "ID", cyan(&incident.id));
    add_field(&mut output, "Project", &incident.project);
    add_field(&mut output, "Pipeline", format!("#{}", incident.pipeline_id));
    if let Some(url) = &incident.pipeline_url {
        add_field(&mut output, "Pipeline URL", url);
    }
    if let Some(job) = &incident.job_name {
        add_field(&mut output, "Job", job);
    }
    add_field(&mut output, "Ref", incident.git_ref.as_deref().unwrap_or("-"));
    add_field(&mut output, "Retries", incident.retry_count);
    add_field(
        &mut output,
        "Opened",
        dim(incident.created_at.format("%Y-%m-%d %H:%M UTC")),
    );
    if !incident.error_snippet.is_empty() {
        add_field(&mut output, "Error", bright_red(&incident.error_snippet));
    }
    if let Some(error) = &incident.last_error {
        add_field(&mut output, "Last error", bright_red(error));
    }
    output.push('\n');

    let mut stages = create_table();
    stages.set_header(cyan_header(&["Status", "Analysis", "Patch", "MR"]));
    stages.add_row(vec![
        incident_status_cell(incident.status),
        analysis_status_cell(incident.analysis_status),
        patch_status_cell(incident.patch_status),
        mr_status_cell(incident.mr_status),
    ]);
    let _ = writeln!(output, "{stages}\n");

    if let Some(analysis) = &incident.analysis {
        add_section_header(&mut output, "🔍", "Root Cause");
        let mut table = create_table();
        table.set_header(cyan_header(&["Category", "Confidence", "Failing file", "Provider"]));
        table.add_row(vec![
            Cell::new(analysis.category.as_str()),
            confidence_cell(analysis.confidence),
            Cell::new(analysis.failing_file.as_deref().unwrap_or("-")),
            Cell::new(analysis.provider.as_deref().unwrap_or("safe mode")),
        ]);
        let _ = writeln!(output, "  {}", bright(&analysis.summary));
        let _ = writeln!(output, "  {}", analysis.root_cause);
        let _ = writeln!(output, "{table}\n");
    }

    if let Some(patch) = &incident.patch {
        add_section_header(&mut output, "🩹", "Patch");
        match &patch.validation_error {
            Some(reason) => add_field(&mut output, "Rejected", bright_red(reason)),
            None => add_field(&mut output, "Validated", bright_green("yes")),
        }
        if patch.previous_attempt {
            add_field(&mut output, "Retry", dim("regenerated after a failed fix pipeline"));
        }
        if !patch.diff.is_empty() {
            output.push('\n');
            for line in patch.diff.lines() {
                let styled = if line.starts_with('+') && !line.starts_with("+++") {
                    bright_green(line)
                } else if line.starts_with('-') && !line.starts_with("---") {
                    bright_red(line)
                } else {
                    dim(line)
                };
                let _ = writeln!(output, "    {styled}");
            }
        }
        output.push('\n');
    }

    if let Some(change_request) = &incident.change_request {
        add_section_header(&mut output, "🔀", "Merge Request");
        add_field(&mut output, "URL", cyan(&change_request.url));
        add_field(
            &mut output,
            "Branch",
            format!("{} → {}", change_request.source_branch, change_request.target_branch),
        );
        output.push('\n');
    }

    if !incident.logs.is_empty() {
        add_section_header(&mut output, "📜", "Log Tail");
        let lines: Vec<&str> = incident.logs.lines().collect();
        for line in &lines[lines.len().saturating_sub(LOG_TAIL_LINES)..] {
            let _ = writeln!(output, "    {}", dim(line));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{
        Analysis, Category, ChangeRequest, ChangeRequestStatus, MrStatus, Patch, PatchState,
        RiskTier,
    };
    use chrono::Utc;

    fn analysed_incident() -> Incident {
        let mut incident = Incident::new("group/app", 4242);
        incident.git_ref = Some("main".to_string());
        incident.category = Some(Category::Dependency);
        incident.error_snippet = "Error: Cannot find module 'jest'".to_string();
        incident.analysis = Some(Analysis {
            summary: "jest missing from devDependencies".to_string(),
            root_cause: "package.json lost the jest entry".to_string(),
            category: Category::Dependency,
            confidence: 0.85,
            failing_file: Some("package.json".to_string()),
            provider: Some("openai".to_string()),
            safe_mode: false,
            created_at: Utc::now(),
        });
        incident
    }

    #[test]
    fn test_render_incidents_empty() {
        let output = render_incidents(&[]);
        assert!(output.contains("Incidents"));
        assert!(output.contains("No incidents recorded"));
    }

    #[test]
    fn test_render_incidents_lists_each_incident() {
        let first = analysed_incident();
        let mut second = Incident::new("group/app", 17);
        second.retry_count = 2;

        let output = render_incidents(&[first.clone(), second.clone()]);

        assert!(output.contains(&first.id));
        assert!(output.contains(&second.id));
        assert!(output.contains("#4242"));
        assert!(output.contains("dependency"));
        assert!(output.contains("pipefix status <id>"));
    }

    #[test]
    fn test_render_incident_shows_analysis_and_confidence() {
        let output = render_incident(&analysed_incident());

        assert!(output.contains("Root Cause"));
        assert!(output.contains("jest missing from devDependencies"));
        assert!(output.contains("85%"));
        assert!(output.contains("package.json"));
        assert!(output.contains("openai"));
        assert!(!output.contains("Merge Request"));
    }

    #[test]
    fn test_render_incident_shows_rejected_patch_reason() {
        let mut incident = analysed_incident();
        incident.patch = Some(Patch {
            diff: String::new(),
            description: "Fix for: jest".to_string(),
            risk: RiskTier::High,
            provider: None,
            safe_mode: true,
            validation_error: Some("Empty patch".to_string()),
            status: PatchState::Failed,
            previous_attempt: true,
            created_at: Utc::now(),
        });

        let output = render_incident(&incident);

        assert!(output.contains("Rejected"));
        assert!(output.contains("Empty patch"));
        assert!(output.contains("regenerated after a failed fix pipeline"));
    }

    #[test]
    fn test_render_incident_shows_merge_request_and_log_tail() {
        let mut incident = analysed_incident();
        incident.mr_status = MrStatus::Open;
        incident.change_request = Some(ChangeRequest {
            branch: incident.branch_name(),
            external_id: 3,
            url: "https://gitlab.com/group/app/-/merge_requests/3".to_string(),
            source_branch: incident.branch_name(),
            target_branch: "main".to_string(),
            status: ChangeRequestStatus::Open,
        });
        incident.logs = (0..40).map(|i| format!("line-{i:02}\n")).collect();

        let output = render_incident(&incident);

        assert!(output.contains("https://gitlab.com/group/app/-/merge_requests/3"));
        assert!(output.contains("line-39"));
        assert!(output.contains("line-25"));
        assert!(!output.contains("line-24"));
    }
}
