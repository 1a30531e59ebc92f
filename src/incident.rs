use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of every remediation branch. The full branch name is the join key
/// between the automation run that opens a merge request and the pipeline
/// events that later report on it.
pub const REMEDIATION_BRANCH_PREFIX: &str = "incident-fix-";

/// Returns the remediation branch name for an incident.
pub fn remediation_branch(incident_id: &str) -> String {
    format!("{REMEDIATION_BRANCH_PREFIX}{incident_id}")
}

/// Extracts the incident id from a remediation branch name.
///
/// Returns `None` for any branch outside the naming convention, including
/// the bare prefix.
pub fn incident_id_from_branch(branch: &str) -> Option<&str> {
    branch
        .strip_prefix(REMEDIATION_BRANCH_PREFIX)
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    #[default]
    Pending,
    Running,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MrStatus {
    #[default]
    NotRequested,
    Open,
    Fixing,
    Resolved,
    Failed,
}

/// Failure category assigned by the diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Config,
    Dependency,
    Test,
    Infra,
    Timeout,
    Other,
}

impl Category {
    /// Lenient parse of a model-supplied category; unknown values map to `Other`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "config" => Self::Config,
            "dependency" => Self::Dependency,
            "test" => Self::Test,
            "infra" => Self::Infra,
            "timeout" => Self::Timeout,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Dependency => "dependency",
            Self::Test => "test",
            Self::Infra => "infra",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }
}

/// Root-cause analysis produced by one automation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub summary: String,
    pub root_cause: String,
    pub category: Category,
    /// Clamped to `[0, 1]`
    pub confidence: f64,
    pub failing_file: Option<String>,
    /// Provider that produced the text, `None` in safe mode
    pub provider: Option<String>,
    pub safe_mode: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchState {
    Generated,
    Valid,
    Failed,
}

/// Model-generated fix for an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub diff: String,
    pub description: String,
    pub risk: RiskTier,
    pub provider: Option<String>,
    pub safe_mode: bool,
    pub validation_error: Option<String>,
    pub status: PatchState,
    /// Set when a self-heal regeneration for this patch failed
    #[serde(default)]
    pub previous_attempt: bool,
    pub created_at: DateTime<Utc>,
}

impl Patch {
    pub fn is_valid(&self) -> bool {
        self.status == PatchState::Valid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeRequestStatus {
    Open,
    Merged,
    Closed,
    Failed,
}

/// Merge request opened on the remediation branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    pub branch: String,
    pub external_id: u64,
    pub url: String,
    pub source_branch: String,
    pub target_branch: String,
    pub status: ChangeRequestStatus,
}

/// One detected pipeline failure and everything automation learned about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub project: String,
    pub pipeline_id: u64,
    pub pipeline_url: Option<String>,
    pub job_id: Option<u64>,
    pub job_name: Option<String>,
    pub git_ref: Option<String>,
    pub commit_sha: Option<String>,

    pub status: IncidentStatus,
    pub analysis_status: AnalysisStatus,
    pub patch_status: PatchStatus,
    pub mr_status: MrStatus,
    pub category: Option<Category>,

    pub logs: String,
    pub ci_config: String,
    pub error_snippet: String,
    /// Free-form project context from the failure event
    #[serde(default)]
    pub project_metadata: serde_json::Value,

    pub retry_count: u32,
    pub last_error: Option<String>,

    pub analysis: Option<Analysis>,
    pub patch: Option<Patch>,
    pub change_request: Option<ChangeRequest>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    pub fn new(project: impl Into<String>, pipeline_id: u64) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            project: project.into(),
            pipeline_id,
            pipeline_url: None,
            job_id: None,
            job_name: None,
            git_ref: None,
            commit_sha: None,
            status: IncidentStatus::Open,
            analysis_status: AnalysisStatus::Pending,
            patch_status: PatchStatus::Pending,
            mr_status: MrStatus::NotRequested,
            category: None,
            logs: String::new(),
            ci_config: String::new(),
            error_snippet: String::new(),
            project_metadata: serde_json::Value::Null,
            retry_count: 0,
            last_error: None,
            analysis: None,
            patch: None,
            change_request: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn branch_name(&self) -> String {
        remediation_branch(&self.id)
    }

    /// True while either automation stage holds the incident.
    pub fn is_running(&self) -> bool {
        self.analysis_status == AnalysisStatus::Running
            || self.patch_status == PatchStatus::Running
    }
}
