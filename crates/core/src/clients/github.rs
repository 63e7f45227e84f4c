use crate::error::FetchError;
use crate::ingest::is_indexable;
use crate::models::{RepositoryTree, SourceFile};
use crate::traits::RepositoryFetcher;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const GITHUB_URL_PATTERN: &str = r"github\.com[/:]([^/\s]+)/([^/\s?#]+)";

/// Extracts `(owner, repo)` from a GitHub URL, dropping any `.git` suffix.
pub fn parse_github_url(url: &str) -> Result<(String, String), FetchError> {
    let pattern = Regex::new(GITHUB_URL_PATTERN).map_err(|error| FetchError::InvalidUrl(error.to_string()))?;
    let captures = pattern
        .captures(url)
        .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;

    let owner = captures[1].to_string();
    let repo = captures[2].trim_end_matches(".git").to_string();
    if repo.is_empty() {
        return Err(FetchError::InvalidUrl(url.to_string()));
    }
    Ok((owner, repo))
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BranchInfo {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

/// Fetches repository trees through the GitHub REST API. The fingerprint is the
/// head commit of the default branch.
#[derive(Debug, Clone)]
pub struct GitHubFetcher {
    client: Client,
    api_base: String,
}

impl Default for GitHubFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl GitHubFetcher {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, url: &str, auth_token: Option<&str>) -> Result<Response, FetchError> {
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github.v3+json")
            .header(USER_AGENT, "repolens");
        if let Some(token) = auth_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(status_error(&response, url))
        }
    }

    async fn head_commit(&self, owner: &str, repo: &str, auth_token: Option<&str>) -> Result<String, FetchError> {
        let repo_url = format!("{}/repos/{owner}/{repo}", self.api_base);
        let info: RepoInfo = self.get(&repo_url, auth_token).await?.json().await?;
        let branch = info.default_branch.unwrap_or_else(|| "main".to_string());

        let branch_url = format!("{repo_url}/branches/{branch}");
        let details: BranchInfo = self.get(&branch_url, auth_token).await?.json().await?;
        Ok(details.commit.sha)
    }

    async fn fetch_blob(&self, owner: &str, repo: &str, sha: &str, auth_token: Option<&str>) -> Result<Option<String>, FetchError> {
        let url = format!("{}/repos/{owner}/{repo}/git/blobs/{sha}", self.api_base);
        let blob: BlobResponse = self.get(&url, auth_token).await?.json().await?;
        if blob.encoding != "base64" {
            tracing::warn!(sha, encoding = %blob.encoding, "unsupported blob encoding");
            return Ok(None);
        }

        let compact: String = blob.content.split_whitespace().collect();
        match STANDARD.decode(compact.as_bytes()) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(error) => {
                tracing::warn!(sha, error = %error, "undecodable blob");
                Ok(None)
            }
        }
    }
}

fn status_error(response: &Response, url: &str) -> FetchError {
    let status = response.status();
    let quota_exhausted = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim() == "0");

    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound(url.to_string()),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited,
        StatusCode::FORBIDDEN if quota_exhausted => FetchError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchError::AuthRequired(format!("{status} from {url}"))
        }
        _ => FetchError::Io(std::io::Error::other(format!("{status} from {url}"))),
    }
}

#[async_trait]
impl RepositoryFetcher for GitHubFetcher {
    async fn fetch_repository_tree(
        &self,
        url: &str,
        auth_token: Option<&str>,
    ) -> Result<RepositoryTree, FetchError> {
        let (owner, repo) = parse_github_url(url)?;
        let commit = self.head_commit(&owner, &repo, auth_token).await?;

        let tree_url = format!(
            "{}/repos/{owner}/{repo}/git/trees/{commit}?recursive=1",
            self.api_base
        );
        let listing: TreeResponse = self.get(&tree_url, auth_token).await?.json().await?;
        if listing.truncated {
            tracing::warn!(%owner, %repo, "github returned a truncated tree");
        }

        let mut tree = RepositoryTree {
            truncated: listing.truncated,
            ..RepositoryTree::default()
        };
        for item in listing.tree {
            if item.kind != "blob" || !is_indexable(&item.path, item.size) {
                continue;
            }

            match self.fetch_blob(&owner, &repo, &item.sha, auth_token).await {
                Ok(Some(content)) => tree.files.push(SourceFile::new(item.path, content)),
                Ok(None) => tree.unreadable.push(item.path),
                Err(error @ FetchError::RateLimited) => return Err(error),
                Err(error) => {
                    tracing::warn!(path = %item.path, error = %error, "blob fetch failed");
                    tree.unreadable.push(item.path);
                }
            }
        }

        tree.files.sort_by(|left, right| left.path.cmp(&right.path));
        tracing::info!(
            %owner,
            %repo,
            %commit,
            files = tree.files.len(),
            unreadable = tree.unreadable.len(),
            "fetched repository tree"
        );
        Ok(tree)
    }

    async fn resolve_fingerprint(
        &self,
        url: &str,
        auth_token: Option<&str>,
    ) -> Result<String, FetchError> {
        let (owner, repo) = parse_github_url(url)?;
        self.head_commit(&owner, &repo, auth_token).await
    }
}
