use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{FileWrite, StorageBackend, StoredFile};
use crate::config::StorageConfig;
use crate::errors::StorageError;

const GITHUB_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "macc";

/// Known GitHub token prefixes.
/// See: https://github.blog/2021-04-05-behind-githubs-new-authentication-token-formats/
const GITHUB_TOKEN_PREFIXES: &[&str] = &["ghp_", "github_pat_", "gho_", "ghu_", "ghs_", "ghr_"];

/// Format check only; does not verify the token is active.
pub fn is_valid_github_token(token: &str) -> bool {
    !token.is_empty()
        && GITHUB_TOKEN_PREFIXES
            .iter()
            .any(|prefix| token.starts_with(prefix))
}

/// Split a location into `(owner, repo)`. A bare `repo` has no owner and is
/// resolved against the authenticated user.
pub fn split_location(location: &str) -> (Option<&str>, &str) {
    let location = location
        .trim()
        .trim_start_matches("https://github.com/")
        .trim_end_matches('/')
        .trim_end_matches(".git");
    match location.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => (Some(owner), repo),
        _ => (None, location),
    }
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: PutContent,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
    html_url: String,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: String,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    auto_init: bool,
}

fn map_status(status: StatusCode, path: &str, body: String) -> StorageError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::Unauthorized(body),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => StorageError::Conflict {
            path: path.to_string(),
        },
        _ => StorageError::Request(format!("GitHub returned {}: {}", status, body)),
    }
}

fn request_err(e: reqwest::Error) -> StorageError {
    StorageError::Request(e.to_string())
}

/// GitHub contents-API storage. Each location is a repository; files are
/// written to the configured branch.
pub struct GitHubStorage {
    client: reqwest::Client,
    api_url: String,
    token: String,
    branch: String,
    login: OnceCell<String>,
}

impl GitHubStorage {
    pub fn new(token: String, branch: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: GITHUB_API_URL.to_string(),
            token,
            branch,
            login: OnceCell::new(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> anyhow::Result<Self> {
        let token = std::env::var(&config.token_env).with_context(|| {
            format!(
                "GitHub token not found in environment variable '{}'",
                config.token_env
            )
        })?;
        if !is_valid_github_token(&token) {
            tracing::warn!("GitHub token does not match a known token prefix");
        }
        Ok(Self::new(token, config.branch.clone()))
    }

    /// GET for one file on the configured branch.
    fn contents_request(&self, owner: &str, repo: &str, path: &str) -> reqwest::RequestBuilder {
        self.get(&format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url, owner, repo, path
        ))
        .query(&[("ref", self.branch.as_str())])
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    async fn login(&self) -> Result<&str, StorageError> {
        self.login
            .get_or_try_init(|| async {
                let resp = self
                    .get(&format!("{}/user", self.api_url))
                    .send()
                    .await
                    .map_err(request_err)?;
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(map_status(status, "user", body));
                }
                let user: GitHubUser = resp.json().await.map_err(request_err)?;
                Ok(user.login)
            })
            .await
            .map(String::as_str)
    }

    async fn owner_repo(&self, location: &str) -> Result<(String, String), StorageError> {
        let (owner, repo) = split_location(location);
        let owner = match owner {
            Some(o) => o.to_string(),
            None => self.login().await?.to_string(),
        };
        Ok((owner, repo.to_string()))
    }

    /// Create the repository under the authenticated user if it is missing.
    async fn ensure_repo(&self, owner: &str, repo: &str) -> Result<(), StorageError> {
        let resp = self
            .get(&format!("{}/repos/{}/{}", self.api_url, owner, repo))
            .send()
            .await
            .map_err(request_err)?;
        if resp.status().is_success() {
            return Ok(());
        }
        if resp.status() != StatusCode::NOT_FOUND {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, repo, body));
        }

        info!(owner, repo, "creating missing GitHub repository");
        let resp = self
            .client
            .post(format!("{}/user/repos", self.api_url))
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .json(&CreateRepoRequest {
                name: repo,
                auto_init: true,
            })
            .send()
            .await
            .map_err(request_err)?;
        let status = resp.status();
        // 422 means another writer created it first.
        if status.is_success() || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(map_status(status, repo, body))
    }
}

#[async_trait]
impl StorageBackend for GitHubStorage {
    async fn read_file(&self, location: &str, path: &str) -> Result<Option<StoredFile>, StorageError> {
        let (owner, repo) = self.owner_repo(location).await?;
        let resp = self
            .contents_request(&owner, &repo, path)
            .send()
            .await
            .map_err(request_err)?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, path, body));
        }
        let contents: ContentsResponse = resp.json().await.map_err(request_err)?;
        // GitHub wraps base64 at 60 columns.
        let packed: String = contents.content.split_whitespace().collect();
        let bytes = STANDARD
            .decode(packed)
            .map_err(|e| StorageError::Request(format!("invalid base64 content: {}", e)))?;
        Ok(Some(StoredFile {
            content: String::from_utf8_lossy(&bytes).into_owned(),
            revision: contents.sha,
            url: contents.html_url,
        }))
    }

    async fn create_or_update_file(
        &self,
        location: &str,
        path: &str,
        content: &str,
        revision: Option<&str>,
    ) -> Result<FileWrite, StorageError> {
        let (owner, repo) = self.owner_repo(location).await?;
        if revision.is_none() {
            self.ensure_repo(&owner, &repo).await?;
        }

        let message = match revision {
            Some(_) => format!("Update {}", path),
            None => format!("Add {}", path),
        };
        debug!(owner = %owner, repo = %repo, path, "writing file via contents API");
        let resp = self
            .client
            .put(format!(
                "{}/repos/{}/{}/contents/{}",
                self.api_url, owner, repo, path
            ))
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .json(&PutContentsRequest {
                message,
                content: STANDARD.encode(content),
                branch: &self.branch,
                sha: revision,
            })
            .send()
            .await
            .map_err(request_err)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, path, body));
        }
        let put: PutContentsResponse = resp.json().await.map_err(request_err)?;
        Ok(FileWrite {
            url: put.content.html_url,
            revision: put.content.sha,
        })
    }
}
