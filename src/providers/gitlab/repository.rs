use async_trait::async_trait;
use log::{debug, info};
use std::time::Duration;

use super::client::GitLabClient;
use super::links;
use crate::auth::Token;
use crate::config::{AutomationConfig, GitLabConfig};
use crate::error::{PipefixError, Result};
use crate::providers::{MergeRequestInfo, PipelineJob, RepoFile, Repository};

const FETCH_BATCH: usize = 16;

/// Bounds on a repository snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotLimits {
    /// Files of this many bytes or more are skipped
    pub max_file_bytes: usize,
    /// Collection stops once this many files are held
    pub max_files: usize,
}

impl From<&AutomationConfig> for SnapshotLimits {
    fn from(config: &AutomationConfig) -> Self {
        Self {
            max_file_bytes: config.max_file_bytes,
            max_files: config.max_snapshot_files,
        }
    }
}

/// [`Repository`] backed by one GitLab project.
pub struct GitLabRepository {
    client: GitLabClient,
    web_url: String,
    project: String,
    limits: SnapshotLimits,
}

impl GitLabRepository {
    /// # Arguments
    ///
    /// * `web_url` - Instance base URL used for browser links (e.g., <https://gitlab.com>)
    /// * `project` - Project path or numeric id
    pub fn new(
        client: GitLabClient,
        web_url: impl Into<String>,
        project: impl Into<String>,
        limits: SnapshotLimits,
    ) -> Self {
        Self {
            client,
            web_url: web_url.into(),
            project: project.into(),
            limits,
        }
    }

    /// Builds the repository from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no project is configured or the client cannot be built.
    pub fn from_config(
        gitlab: &GitLabConfig,
        automation: &AutomationConfig,
        token: Option<Token>,
    ) -> Result<Self> {
        let project = gitlab
            .project
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                PipefixError::Config("No GitLab project configured (set gitlab.project or --project)".to_string())
            })?;

        let client = GitLabClient::new(
            &gitlab.base_url,
            token,
            Duration::from_secs(gitlab.timeout_secs),
        )?;

        Ok(Self::new(client, &gitlab.base_url, project, automation.into()))
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Links need the project path; a numeric id gives none.
    fn project_path(&self) -> Option<&str> {
        Some(self.project.as_str()).filter(|p| p.contains('/'))
    }
}

#[async_trait]
impl Repository for GitLabRepository {
    async fn list_files(&self, git_ref: &str) -> Result<Vec<RepoFile>> {
        let tree = self.client.fetch_tree(&self.project, git_ref).await?;
        let blobs: Vec<String> = tree
            .into_iter()
            .filter(|entry| entry.is_blob())
            .map(|entry| entry.path)
            .collect();

        info!("Collecting snapshot of {} blobs at {git_ref}", blobs.len());

        let mut files = Vec::new();
        for batch in blobs.chunks(FETCH_BATCH) {
            let fetches = batch
                .iter()
                .map(|path| self.client.fetch_raw_file(&self.project, path, git_ref));
            let results = futures::future::join_all(fetches).await;

            for (path, result) in batch.iter().zip(results) {
                match result {
                    Ok(content) if content.len() < self.limits.max_file_bytes => {
                        files.push(RepoFile {
                            path: path.clone(),
                            content,
                        });
                    }
                    Ok(content) => debug!("Skipping {path}: {} bytes", content.len()),
                    Err(e) => debug!("Skipping {path}: {e}"),
                }

                if files.len() >= self.limits.max_files {
                    info!("Snapshot capped at {} files", files.len());
                    return Ok(files);
                }
            }
        }

        info!("Collected {} files", files.len());
        Ok(files)
    }

    async fn get_file(&self, path: &str, git_ref: &str) -> Result<String> {
        self.client.fetch_raw_file(&self.project, path, git_ref).await
    }

    async fn create_branch(&self, name: &str, base_ref: &str) -> Result<()> {
        self.client.create_branch(&self.project, name, base_ref).await?;
        Ok(())
    }

    async fn commit_file(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
        is_new: bool,
    ) -> Result<()> {
        self.client
            .commit_file(&self.project, branch, path, content, message, is_new)
            .await?;
        Ok(())
    }

    async fn create_change_request(
        &self,
        branch: &str,
        base: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequestInfo> {
        let mr = self
            .client
            .create_merge_request(&self.project, branch, base, title, description)
            .await?;

        Ok(MergeRequestInfo {
            id: mr.iid,
            url: mr.web_url,
            status: mr.state,
        })
    }

    async fn fetch_job_log(&self, job_id: u64) -> Result<String> {
        self.client.fetch_job_trace(&self.project, job_id).await
    }

    async fn fetch_pipeline_jobs(&self, pipeline_id: u64) -> Result<Vec<PipelineJob>> {
        Ok(self
            .client
            .fetch_pipeline_jobs(&self.project, pipeline_id)
            .await?
            .into_iter()
            .map(|job| PipelineJob {
                id: job.id,
                name: job.name,
                status: job.status,
            })
            .collect())
    }

    fn pipeline_web_url(&self, pipeline_id: u64) -> Option<String> {
        self.project_path()
            .map(|path| links::pipeline_url(&self.web_url, path, pipeline_id))
    }

    fn job_web_url(&self, job_id: u64) -> Option<String> {
        self.project_path()
            .map(|path| links::job_url(&self.web_url, path, job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn repository(server: &mockito::Server, limits: SnapshotLimits) -> GitLabRepository {
        let client = GitLabClient::new(&server.url(), Some(Token::from("t")), Duration::from_secs(5)).unwrap();
        GitLabRepository::new(client, server.url(), "7", limits)
    }

    async fn mock_file(server: &mut mockito::Server, encoded: &str, body: &str) -> mockito::Mock {
        server
            .mock("GET", format!("/api/v4/projects/7/repository/files/{encoded}/raw").as_str())
            .match_query(Matcher::UrlEncoded("ref".into(), "main".into()))
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_list_files_skips_trees_large_files_and_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/7/repository/tree")
            .match_query(Matcher::Any)
            .with_body(
                r#"[
                    {"path":"src","type":"tree"},
                    {"path":".gitlab-ci.yml","type":"blob"},
                    {"path":"big.bin","type":"blob"},
                    {"path":"missing.txt","type":"blob"},
                    {"path":"src/lib.rs","type":"blob"}
                ]"#,
            )
            .create_async()
            .await;
        mock_file(&mut server, ".gitlab-ci.yml", "stages: [test]\n").await;
        mock_file(&mut server, "big.bin", &"x".repeat(64)).await;
        mock_file(&mut server, "src%2Flib.rs", "pub fn f() {}\n").await;
        server
            .mock("GET", "/api/v4/projects/7/repository/files/missing.txt/raw")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let repo = repository(
            &server,
            SnapshotLimits {
                max_file_bytes: 64,
                max_files: 100,
            },
        );
        let files = repo.list_files("main").await.unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec![".gitlab-ci.yml", "src/lib.rs"]);
    }

    #[tokio::test]
    async fn test_list_files_respects_file_cap() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/7/repository/tree")
            .match_query(Matcher::Any)
            .with_body(r#"[{"path":"a","type":"blob"},{"path":"b","type":"blob"},{"path":"c","type":"blob"}]"#)
            .create_async()
            .await;
        for name in ["a", "b", "c"] {
            mock_file(&mut server, name, "content").await;
        }

        let repo = repository(
            &server,
            SnapshotLimits {
                max_file_bytes: 1000,
                max_files: 2,
            },
        );
        assert_eq!(repo.list_files("main").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_pipeline_jobs_maps_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/7/pipelines/5/jobs")
            .match_query(Matcher::Any)
            .with_body(r#"[{"id":9,"name":"lint","status":"failed"}]"#)
            .create_async()
            .await;

        let repo = repository(
            &server,
            SnapshotLimits {
                max_file_bytes: 10,
                max_files: 10,
            },
        );
        let jobs = repo.fetch_pipeline_jobs(5).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].is_failed());
    }

    #[test]
    fn test_web_links_need_project_path() {
        let gitlab = GitLabConfig {
            project: Some("group/app".to_string()),
            ..GitLabConfig::default()
        };
        let repo = GitLabRepository::from_config(&gitlab, &AutomationConfig::default(), None).unwrap();
        assert_eq!(
            repo.pipeline_web_url(12).as_deref(),
            Some("https://gitlab.com/group/app/-/pipelines/12")
        );
        assert_eq!(
            repo.job_web_url(34).as_deref(),
            Some("https://gitlab.com/group/app/-/jobs/34")
        );

        let by_id = GitLabConfig {
            project: Some("278964".to_string()),
            ..GitLabConfig::default()
        };
        let repo = GitLabRepository::from_config(&by_id, &AutomationConfig::default(), None).unwrap();
        assert_eq!(repo.pipeline_web_url(12), None);
    }

    #[test]
    fn test_from_config_requires_project() {
        let result = GitLabRepository::from_config(&GitLabConfig::default(), &AutomationConfig::default(), None);
        assert!(matches!(result, Err(PipefixError::Config(_))));
    }
}
