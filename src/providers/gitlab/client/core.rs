use log::warn;
use reqwest::{Client, RequestBuilder, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

use crate::auth::Token;
use crate::error::{PipefixError, Result};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECONDS: u64 = 2;
const MAX_CONCURRENT_REQUESTS: usize = 16;
pub(super) const PAGE_SIZE: usize = 100;

/// GitLab REST v4 client scoped to one instance.
pub struct GitLabClient {
    client: Client,
    api_url: Url,
    token: Option<Token>,
    semaphore: Arc<Semaphore>,
}

impl GitLabClient {
    /// Creates a client for `base_url` (e.g., <https://gitlab.com>).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the URL is invalid.
    pub fn new(base_url: &str, token: Option<Token>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("pipefix/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PipefixError::Config(format!("Failed to create HTTP client: {e}")))?;

        let api_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| PipefixError::Config(format!("Invalid base URL: {e}")))?
            .join("api/v4/")
            .map_err(|e| PipefixError::Config(format!("Invalid API base URL: {e}")))?;

        Ok(Self {
            client,
            api_url,
            token,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        })
    }

    pub(super) fn client(&self) -> &Client {
        &self.client
    }

    /// Attaches the access token, if any, as `PRIVATE-TOKEN`.
    pub(super) fn auth_request(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request.header("PRIVATE-TOKEN", token.as_str())
        } else {
            request
        }
    }

    /// Construct project base URL; `project` is a path ("group/project") or numeric id.
    pub(super) fn project_url(&self, project: &str) -> Result<Url> {
        self.api_url
            .join(&format!("projects/{}/", urlencoding::encode(project)))
            .map_err(|e| PipefixError::Config(format!("Invalid project URL: {e}")))
    }

    pub(super) fn endpoint(&self, project: &str, path: &str) -> Result<Url> {
        self.project_url(project)?
            .join(path)
            .map_err(|e| PipefixError::Config(format!("Invalid endpoint URL {path}: {e}")))
    }

    /// Sends a read request, retrying transient network errors, rate limits
    /// and server errors. Non-success responses become
    /// [`PipefixError::ApiError`].
    pub(super) async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        self.dispatch(build, MAX_RETRIES).await
    }

    /// Sends a write request exactly once.
    ///
    /// Branch, commit and merge request creation are not idempotent: a write
    /// that timed out may still have been applied server-side.
    pub(super) async fn send_once<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        self.dispatch(build, 0).await
    }

    async fn dispatch<F>(&self, build: F, max_retries: u32) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| PipefixError::Api(format!("Request limiter closed: {e}")))?;

        let mut retry_count = 0;
        loop {
            let response = match self.auth_request(build()).send().await {
                Ok(resp) => resp,
                Err(e) if (e.is_connect() || e.is_timeout()) && retry_count < max_retries => {
                    warn!(
                        "Network error ({e}), retrying in {RETRY_DELAY_SECONDS}s ({}/{max_retries})...",
                        retry_count + 1
                    );
                    tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if (status == 429 || status.is_server_error()) && retry_count < max_retries {
                warn!(
                    "GitLab API error (status {status}). Waiting {RETRY_DELAY_SECONDS} seconds before retry {}/{max_retries}...",
                    retry_count + 1
                );
                tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(PipefixError::ApiError {
                    status: status.as_u16(),
                    message: error_text,
                });
            }

            return Ok(response);
        }
    }

    /// Follows GitLab's `X-Next-Page` header until the last page.
    pub(super) async fn get_all_pages<T>(&self, url: Url, query: &[(&str, &str)]) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page = 1usize;
        let per_page = PAGE_SIZE.to_string();

        loop {
            let page_param = page.to_string();
            let response = self
                .send(|| {
                    self.client
                        .get(url.clone())
                        .query(query)
                        .query(&[("per_page", per_page.as_str()), ("page", page_param.as_str())])
                })
                .await?;

            let next_page = response
                .headers()
                .get("x-next-page")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<usize>().ok());

            let batch: Vec<T> = response.json().await?;
            items.extend(batch);

            match next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> GitLabClient {
        GitLabClient::new(base, None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_project_url_encodes_path() {
        let url = client("https://gitlab.example.com")
            .project_url("group/sub/project")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gitlab.example.com/api/v4/projects/group%2Fsub%2Fproject/"
        );
    }

    #[test]
    fn test_base_url_with_path_prefix() {
        let url = client("https://example.com/gitlab/").project_url("42").unwrap();
        assert_eq!(url.as_str(), "https://example.com/gitlab/api/v4/projects/42/");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(GitLabClient::new("not a url", None, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_error_status_maps_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/1/jobs/5/trace")
            .match_header("private-token", "glpat-x")
            .with_status(404)
            .with_body(r#"{"message":"404 Not found"}"#)
            .create_async()
            .await;

        let gitlab = GitLabClient::new(&server.url(), Some(Token::from("glpat-x")), Duration::from_secs(5)).unwrap();
        let url = gitlab.endpoint("1", "jobs/5/trace").unwrap();
        let err = gitlab.send(|| gitlab.client().get(url.clone())).await.unwrap_err();

        match err {
            PipefixError::ApiError { status, message } => {
                assert_eq!(status, 404);
                assert!(message.contains("404 Not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
