use log::info;

use super::core::GitLabClient;
use crate::error::Result;
use crate::providers::gitlab::types::{MergeRequest, NewMergeRequest};

impl GitLabClient {
    /// Opens a merge request from `source_branch` into `target_branch`.
    ///
    /// The source branch is kept after merge so the outcome webhook can still
    /// be routed back to its incident.
    pub async fn create_merge_request(
        &self,
        project: &str,
        source_branch: &str,
        target_branch: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequest> {
        info!("Creating merge request {source_branch} -> {target_branch}");
        let url = self.endpoint(project, "merge_requests")?;
        let body = NewMergeRequest {
            source_branch,
            target_branch,
            title,
            description,
            remove_source_branch: false,
        };

        Ok(self
            .send_once(|| self.client().post(url.clone()).json(&body))
            .await?
            .json()
            .await?)
    }
}
