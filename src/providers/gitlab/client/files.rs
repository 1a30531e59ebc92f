use log::{info, warn};

use super::core::GitLabClient;
use crate::error::{PipefixError, Result};
use crate::providers::gitlab::types::{
    CommitAction, CommitActionKind, Commit, NewBranch, NewCommit, TreeEntry,
};

impl GitLabClient {
    /// Lists every entry of the repository tree at `git_ref`, recursively.
    pub async fn fetch_tree(&self, project: &str, git_ref: &str) -> Result<Vec<TreeEntry>> {
        info!("Fetching repository tree for {project}@{git_ref}");
        let url = self.endpoint(project, "repository/tree")?;
        self.get_all_pages(url, &[("ref", git_ref), ("recursive", "true")])
            .await
    }

    /// Raw content of one file at `git_ref`.
    pub async fn fetch_raw_file(&self, project: &str, path: &str, git_ref: &str) -> Result<String> {
        let url = self.endpoint(
            project,
            &format!("repository/files/{}/raw", urlencoding::encode(path)),
        )?;

        let response = self
            .send(|| self.client().get(url.clone()).query(&[("ref", git_ref)]))
            .await?;

        Ok(response.text().await?)
    }

    /// Creates `branch` from `git_ref`.
    ///
    /// Returns `false` when the branch already existed, which callers treat as
    /// success so retries can reuse the remediation branch.
    pub async fn create_branch(&self, project: &str, branch: &str, git_ref: &str) -> Result<bool> {
        info!("Creating branch {branch} from {git_ref}");
        let url = self.endpoint(project, "repository/branches")?;
        let body = NewBranch { branch, git_ref };

        match self.send_once(|| self.client().post(url.clone()).json(&body)).await {
            Ok(_) => Ok(true),
            Err(PipefixError::ApiError { status: 400, message }) if message.contains("already exists") => {
                warn!("Branch {branch} already exists, reusing it");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Commits a single-file create or update to `branch`.
    pub async fn commit_file(
        &self,
        project: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
        is_new: bool,
    ) -> Result<String> {
        info!("Committing {path} to {branch}");
        let url = self.endpoint(project, "repository/commits")?;
        let body = NewCommit {
            branch,
            commit_message: message,
            actions: vec![CommitAction {
                action: if is_new {
                    CommitActionKind::Create
                } else {
                    CommitActionKind::Update
                },
                file_path: path,
                content,
            }],
        };

        let commit: Commit = self
            .send_once(|| self.client().post(url.clone()).json(&body))
            .await?
            .json()
            .await?;

        Ok(commit.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Token;
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    fn client(server: &mockito::Server) -> GitLabClient {
        GitLabClient::new(&server.url(), Some(Token::from("glpat-test")), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_tree_follows_pages() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/api/v4/projects/group%2Fapp/repository/tree")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("ref".into(), "main".into()),
                Matcher::UrlEncoded("recursive".into(), "true".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .with_header("x-next-page", "2")
            .with_body(r#"[{"path":"src","type":"tree"},{"path":"src/main.rs","type":"blob"}]"#)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/api/v4/projects/group%2Fapp/repository/tree")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_header("x-next-page", "")
            .with_body(r#"[{"path":".gitlab-ci.yml","type":"blob"}]"#)
            .create_async()
            .await;

        let tree = client(&server).fetch_tree("group/app", "main").await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        let paths: Vec<_> = tree.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["src", "src/main.rs", ".gitlab-ci.yml"]);
        assert!(!tree[0].is_blob());
        assert!(tree[1].is_blob());
    }

    #[tokio::test]
    async fn test_fetch_raw_file_encodes_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/projects/7/repository/files/ci%2Fbuild.sh/raw")
            .match_query(Matcher::UrlEncoded("ref".into(), "feature".into()))
            .match_header("private-token", "glpat-test")
            .with_body("#!/bin/sh\nmake\n")
            .create_async()
            .await;

        let content = client(&server)
            .fetch_raw_file("7", "ci/build.sh", "feature")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(content, "#!/bin/sh\nmake\n");
    }

    #[tokio::test]
    async fn test_create_branch_tolerates_existing_branch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v4/projects/7/repository/branches")
            .match_body(Matcher::Json(json!({"branch": "incident-fix-abc", "ref": "main"})))
            .with_status(400)
            .with_body(r#"{"message":"Branch already exists"}"#)
            .create_async()
            .await;

        let created = client(&server)
            .create_branch("7", "incident-fix-abc", "main")
            .await
            .unwrap();
        assert!(!created);
    }

    #[tokio::test]
    async fn test_create_branch_propagates_other_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v4/projects/7/repository/branches")
            .with_status(403)
            .with_body(r#"{"message":"403 Forbidden"}"#)
            .create_async()
            .await;

        let result = client(&server).create_branch("7", "incident-fix-abc", "main").await;
        assert!(matches!(result, Err(PipefixError::ApiError { status: 403, .. })));
    }

    #[tokio::test]
    async fn test_commit_file_sends_single_action() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v4/projects/7/repository/commits")
            .match_body(Matcher::Json(json!({
                "branch": "incident-fix-abc",
                "commit_message": "fix: pin node",
                "actions": [{"action": "update", "file_path": ".gitlab-ci.yml", "content": "image: node:20\n"}]
            })))
            .with_status(201)
            .with_body(r#"{"id":"ed899a2f4b50b4370feeea94676502b42383c746"}"#)
            .create_async()
            .await;

        let sha = client(&server)
            .commit_file("7", "incident-fix-abc", ".gitlab-ci.yml", "image: node:20\n", "fix: pin node", false)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(sha, "ed899a2f4b50b4370feeea94676502b42383c746");
    }

    #[tokio::test]
    async fn test_commit_file_is_not_retried_on_server_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v4/projects/7/repository/commits")
            .with_status(502)
            .with_body("Bad Gateway")
            .expect(1)
            .create_async()
            .await;

        let result = client(&server)
            .commit_file("7", "incident-fix-abc", ".gitlab-ci.yml", "image: node:20\n", "fix: pin node", false)
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(PipefixError::ApiError { status: 502, .. })));
    }
}
