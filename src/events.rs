//! Inbound events: failed pipelines that open incidents, and pipeline
//! outcomes on remediation branches that drive self-heal.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ai::truncate_chars;
use crate::error::{PipefixError, Result};
use crate::incident::REMEDIATION_BRANCH_PREFIX;

const SNIPPET_LIMIT: usize = 300;

/// A failed pipeline reported by CI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEvent {
    pub pipeline_id: u64,
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub ci_config_text: String,
    #[serde(default)]
    pub job_name: Option<String>,
    /// Free-form project context passed through to prompts
    #[serde(default)]
    pub project_metadata: Value,
    #[serde(default)]
    pub job_id: Option<u64>,
    #[serde(default)]
    pub pipeline_url: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub error_snippet: Option<String>,
    /// Project path; the configured project is used when absent
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PipelineStatus {
    Success,
    Failed,
    /// running, pending, canceled, skipped, ...
    Other(String),
}

impl From<String> for PipelineStatus {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<&str> for PipelineStatus {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Self::Success,
            "failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<PipelineStatus> for String {
    fn from(status: PipelineStatus) -> Self {
        match status {
            PipelineStatus::Success => "success".to_string(),
            PipelineStatus::Failed => "failed".to_string(),
            PipelineStatus::Other(other) => other,
        }
    }
}

/// Outcome of a pipeline that ran on some branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcomeEvent {
    pub branch: String,
    pub status: PipelineStatus,
    #[serde(default)]
    pub pipeline_id: Option<u64>,
}

/// What a GitLab pipeline webhook turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    /// Failed pipeline on a regular ref
    Failure(FailureEvent),
    /// Any status on a remediation branch
    Outcome(PipelineOutcomeEvent),
    Ignored(String),
}

/// Classifies a GitLab "Pipeline Hook" payload.
///
/// Pipelines on `incident-fix-*` branches become outcome events whatever
/// their status. Other refs only produce a failure event when the pipeline
/// failed; the first failed job in `builds` (or `jobs`) supplies the job
/// fields and its `failure_reason` the error snippet.
///
/// # Errors
///
/// Returns [`PipefixError::InvalidEvent`] when a failed pipeline carries no
/// failed job or the payload lacks a pipeline id.
pub fn parse_pipeline_hook(payload: &Value) -> Result<HookEvent> {
    if let Some(kind) = payload.get("object_kind").and_then(Value::as_str) {
        if kind != "pipeline" {
            return Ok(HookEvent::Ignored(format!("not a pipeline event: {kind}")));
        }
    }

    let Some(attributes) = payload.get("object_attributes") else {
        return Ok(HookEvent::Ignored("missing object_attributes".to_string()));
    };

    let git_ref = attributes.get("ref").and_then(Value::as_str).unwrap_or_default();
    let status = attributes.get("status").and_then(Value::as_str).unwrap_or_default();
    let pipeline_id = attributes.get("id").and_then(Value::as_u64);

    debug!("Pipeline hook: ref={git_ref} status={status} id={pipeline_id:?}");

    if git_ref.starts_with(REMEDIATION_BRANCH_PREFIX) {
        info!("Pipeline on remediation branch {git_ref} finished with {status}");
        return Ok(HookEvent::Outcome(PipelineOutcomeEvent {
            branch: git_ref.to_string(),
            status: PipelineStatus::from(status),
            pipeline_id,
        }));
    }

    if status != "failed" {
        return Ok(HookEvent::Ignored(format!("pipeline status is {status}")));
    }

    let pipeline_id = pipeline_id
        .ok_or_else(|| PipefixError::InvalidEvent("pipeline hook without object_attributes.id".to_string()))?;

    let Some(job) = failed_job(payload) else {
        warn!("No failed job found in pipeline {pipeline_id}");
        return Err(PipefixError::InvalidEvent(format!(
            "pipeline {pipeline_id} has no failed job"
        )));
    };

    let text = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_string);

    Ok(HookEvent::Failure(FailureEvent {
        pipeline_id,
        git_ref: Some(git_ref.to_string()).filter(|r| !r.is_empty()),
        logs: String::new(),
        ci_config_text: String::new(),
        job_name: text(job.get("name")),
        project_metadata: payload.get("project").cloned().unwrap_or(Value::Null),
        job_id: job.get("id").and_then(Value::as_u64),
        pipeline_url: text(attributes.get("url")),
        commit_sha: text(payload.pointer("/commit/id")).or_else(|| text(attributes.get("sha"))),
        error_snippet: text(job.get("failure_reason")),
        project: text(payload.pointer("/project/path_with_namespace")),
    }))
}

fn failed_job(payload: &Value) -> Option<&Value> {
    ["builds", "jobs"].iter().find_map(|key| {
        payload.get(*key)?.as_array()?.iter().find(|job| {
            job.get("status").and_then(Value::as_str) == Some("failed")
        })
    })
}

/// First log line that mentions an error, used as a dedupe key when the
/// event carries no snippet of its own.
pub fn extract_error_snippet(logs: &str) -> String {
    logs.lines()
        .map(str::trim)
        .find(|line| {
            let lower = line.to_ascii_lowercase();
            lower.contains("error") || lower.contains("failed")
        })
        .map(|line| truncate_chars(line, SNIPPET_LIMIT).to_string())
        .unwrap_or_default()
}
