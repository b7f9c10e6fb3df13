//! Upstream code-host client: fetches the pull request, its reviews, and
//! combined CI status for a release's commit. Behind a trait so policy
//! evaluation can be tested against fixtures without a live GitHub call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub author_login: String,
    pub merged: bool,
    pub merge_commit_sha: Option<String>,
    pub base_branch: String,
    pub head_branch: String,
}

#[derive(Debug, Clone)]
pub struct Review {
    pub author_login: String,
    pub author_email: Option<String>,
    pub state: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CiStatus {
    pub state: String,
    pub checks: HashMap<String, String>,
}

#[async_trait]
pub trait CodeHostClient: Send + Sync {
    async fn find_pull_request_for_commit(
        &self,
        repo: &str,
        commit_sha: &str,
    ) -> Result<Option<PullRequest>>;

    async fn list_reviews(&self, repo: &str, pr_number: u64) -> Result<Vec<Review>>;

    async fn get_ci_status(&self, repo: &str, commit_sha: &str) -> Result<CiStatus>;
}

/// GitHub REST v3 implementation, scoped to the endpoints the gate needs.
pub struct GitHubCodeHostClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubCodeHostClient {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("User-Agent", "enclii-control-plane");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhSearchResponse {
    items: Vec<GhPullRequestSummary>,
}

#[derive(Debug, Deserialize)]
struct GhPullRequestSummary {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct GhPullRequest {
    html_url: String,
    user: GhUser,
    merged: bool,
    merge_commit_sha: Option<String>,
    base: GhBranchRef,
    head: GhBranchRef,
}

#[derive(Debug, Deserialize)]
struct GhBranchRef {
    #[serde(rename = "ref")]
    git_ref: String,
}

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhReview {
    user: GhUser,
    state: String,
    submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GhCombinedStatus {
    state: String,
    statuses: Vec<GhStatus>,
}

#[derive(Debug, Deserialize)]
struct GhStatus {
    context: String,
    state: String,
}

#[async_trait]
impl CodeHostClient for GitHubCodeHostClient {
    async fn find_pull_request_for_commit(
        &self,
        repo: &str,
        commit_sha: &str,
    ) -> Result<Option<PullRequest>> {
        let search_url = format!(
            "{}/search/issues?q={}+repo:{}+type:pr",
            self.base_url, commit_sha, repo
        );
        let search: GhSearchResponse = self
            .authed(self.http.get(&search_url))
            .send()
            .await
            .context("failed to search for pull request by commit")?
            .error_for_status()
            .context("code host returned an error searching for the pull request")?
            .json()
            .await
            .context("failed to parse pull request search response")?;

        let Some(summary) = search.items.into_iter().next() else {
            return Ok(None);
        };

        let pr_url = format!("{}/repos/{}/pulls/{}", self.base_url, repo, summary.number);
        let pr: GhPullRequest = self
            .authed(self.http.get(&pr_url))
            .send()
            .await
            .context("failed to fetch pull request")?
            .error_for_status()
            .context("code host returned an error fetching the pull request")?
            .json()
            .await
            .context("failed to parse pull request response")?;

        Ok(Some(PullRequest {
            number: summary.number,
            url: pr.html_url,
            author_login: pr.user.login,
            merged: pr.merged,
            merge_commit_sha: pr.merge_commit_sha,
            base_branch: pr.base.git_ref,
            head_branch: pr.head.git_ref,
        }))
    }

    async fn list_reviews(&self, repo: &str, pr_number: u64) -> Result<Vec<Review>> {
        let url = format!(
            "{}/repos/{}/pulls/{}/reviews",
            self.base_url, repo, pr_number
        );
        let reviews: Vec<GhReview> = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("failed to fetch pull request reviews")?
            .error_for_status()
            .context("code host returned an error fetching reviews")?
            .json()
            .await
            .context("failed to parse pull request reviews response")?;

        Ok(reviews
            .into_iter()
            .map(|r| Review {
                author_login: r.user.login,
                author_email: None,
                state: r.state,
                submitted_at: r.submitted_at.unwrap_or_else(Utc::now),
            })
            .collect())
    }

    async fn get_ci_status(&self, repo: &str, commit_sha: &str) -> Result<CiStatus> {
        let url = format!(
            "{}/repos/{}/commits/{}/status",
            self.base_url, repo, commit_sha
        );
        let combined: GhCombinedStatus = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("failed to fetch combined CI status")?
            .error_for_status()
            .context("code host returned an error fetching CI status")?
            .json()
            .await
            .context("failed to parse combined CI status response")?;

        let checks = combined
            .statuses
            .into_iter()
            .map(|s| (s.context, s.state))
            .collect();

        Ok(CiStatus {
            state: combined.state,
            checks,
        })
    }
}
