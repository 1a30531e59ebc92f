use log::info;

use super::core::GitLabClient;
use crate::error::Result;
use crate::providers::gitlab::types::Job;

impl GitLabClient {
    /// All jobs of one pipeline, across pages.
    pub async fn fetch_pipeline_jobs(&self, project: &str, pipeline_id: u64) -> Result<Vec<Job>> {
        info!("Fetching jobs for pipeline {pipeline_id}");
        let url = self.endpoint(project, &format!("pipelines/{pipeline_id}/jobs"))?;
        self.get_all_pages(url, &[]).await
    }

    /// Full trace (log output) of a job.
    pub async fn fetch_job_trace(&self, project: &str, job_id: u64) -> Result<String> {
        info!("Fetching log for job {job_id}");
        let url = self.endpoint(project, &format!("jobs/{job_id}/trace"))?;
        Ok(self.send(|| self.client().get(url.clone())).await?.text().await?)
    }
}
