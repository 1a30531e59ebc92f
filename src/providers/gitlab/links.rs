/// Web URL of a pipeline.
///
/// # Arguments
///
/// * `base_url` - GitLab instance base URL (e.g., <https://gitlab.com>)
/// * `project_path` - Project path (e.g., "group/project")
/// * `pipeline_id` - Numeric pipeline id
///
/// # Returns
///
/// Clickable URL to the pipeline (e.g., <https://gitlab.com/group/project/-/pipelines/123>)
pub fn pipeline_url(base_url: &str, project_path: &str, pipeline_id: u64) -> String {
    format!("{}/{project_path}/-/pipelines/{pipeline_id}", trim(base_url))
}

/// Web URL of a job (e.g., <https://gitlab.com/group/project/-/jobs/456>).
pub fn job_url(base_url: &str, project_path: &str, job_id: u64) -> String {
    format!("{}/{project_path}/-/jobs/{job_id}", trim(base_url))
}

fn trim(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}
