use serde::{Deserialize, Serialize};

/// Entry of `GET /projects/:id/repository/tree`.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    /// "blob", "tree" or "commit" (submodule)
    #[serde(rename = "type")]
    pub kind: String,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

#[derive(Debug, Serialize)]
pub struct NewBranch<'a> {
    pub branch: &'a str,
    #[serde(rename = "ref")]
    pub git_ref: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitActionKind {
    Create,
    Update,
}

#[derive(Debug, Serialize)]
pub struct CommitAction<'a> {
    pub action: CommitActionKind,
    pub file_path: &'a str,
    pub content: &'a str,
}

/// Body of `POST /projects/:id/repository/commits`.
#[derive(Debug, Serialize)]
pub struct NewCommit<'a> {
    pub branch: &'a str,
    pub commit_message: &'a str,
    pub actions: Vec<CommitAction<'a>>,
}

#[derive(Debug, Deserialize)]
pub struct Commit {
    pub id: String,
}

/// Body of `POST /projects/:id/merge_requests`.
#[derive(Debug, Serialize)]
pub struct NewMergeRequest<'a> {
    pub source_branch: &'a str,
    pub target_branch: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub remove_source_branch: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequest {
    /// Project-scoped merge request number
    pub iid: u64,
    pub web_url: String,
    /// "opened", "merged", "closed"
    pub state: String,
}

/// Entry of `GET /projects/:id/pipelines/:pipeline_id/jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub id: u64,
    pub name: String,
    pub status: String,
}
