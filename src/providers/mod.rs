mod gitlab;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use gitlab::GitLabRepository;

/// A repository blob with its text content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoFile {
    pub path: String,
    pub content: String,
}

/// Job of a pipeline as reported by the source-control provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub id: u64,
    pub name: String,
    /// Provider status string (e.g., "failed", "success")
    pub status: String,
}

impl PipelineJob {
    pub fn is_failed(&self) -> bool {
        self.status.eq_ignore_ascii_case("failed")
    }
}

/// Merge request as created on the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequestInfo {
    pub id: u64,
    pub url: String,
    pub status: String,
}

/// Source-control operations automation needs.
///
/// Implemented for GitLab by [`GitLabRepository`]; tests substitute
/// in-memory fakes.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Text files at `git_ref`, oversize and unreadable blobs left out.
    async fn list_files(&self, git_ref: &str) -> Result<Vec<RepoFile>>;

    async fn get_file(&self, path: &str, git_ref: &str) -> Result<String>;

    /// Creates `name` from `base_ref`. An existing branch is not an error.
    async fn create_branch(&self, name: &str, base_ref: &str) -> Result<()>;

    async fn commit_file(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
        is_new: bool,
    ) -> Result<()>;

    async fn create_change_request(
        &self,
        branch: &str,
        base: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequestInfo>;

    async fn fetch_job_log(&self, job_id: u64) -> Result<String>;

    async fn fetch_pipeline_jobs(&self, pipeline_id: u64) -> Result<Vec<PipelineJob>>;

    /// Browser link to a pipeline, when the provider can build one.
    fn pipeline_web_url(&self, _pipeline_id: u64) -> Option<String> {
        None
    }

    /// Browser link to a job, when the provider can build one.
    fn job_web_url(&self, _job_id: u64) -> Option<String> {
        None
    }
}
