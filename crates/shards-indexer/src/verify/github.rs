// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Source-control verification against the GitHub REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use shard_rewards::{verify::commit_in_branch, ContributionClaim, Verification};
use thiserror::Error;
use url::Url;

use super::ContributionVerifier;

pub const GITHUB_API_URL: &str = "https://api.github.com/";

const USER_AGENT: &str = concat!("shards-indexer/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum GithubError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid GitHub URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Ok,
    /// The resource does not exist or the request names something invalid.
    Missing,
    /// Rate limits, auth hiccups and server errors.
    Transient,
}

fn classify(status: StatusCode) -> StatusClass {
    if status.is_success() {
        return StatusClass::Ok;
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE | StatusCode::UNPROCESSABLE_ENTITY => {
            StatusClass::Missing
        }
        _ => StatusClass::Transient,
    }
}

enum Lookup<T> {
    Found(T),
    Missing(StatusCode),
}

#[derive(Deserialize)]
struct User {
    login: String,
}

#[derive(Deserialize)]
struct PullRequest {
    #[serde(default)]
    merged: bool,
    user: Option<User>,
}

#[derive(Deserialize)]
struct Commit {
    author: Option<User>,
}

#[derive(Deserialize)]
struct Branch {
    #[serde(default)]
    protected: bool,
}

#[derive(Deserialize)]
struct Compare {
    status: String,
}

pub struct GithubVerifier {
    client: reqwest::Client,
    api_base: Url,
    token: Option<String>,
}

impl GithubVerifier {
    pub fn new(
        api_base: Url,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GithubError> {
        let client = reqwest::Client::builder().timeout(timeout).user_agent(USER_AGENT).build()?;
        Ok(Self { client, api_base, token })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Lookup<T>, Verification> {
        let url = self
            .api_base
            .join(path)
            .map_err(|e| Verification::rejected(format!("invalid repository path {path}: {e}")))?;

        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Verification::unavailable(format!("GitHub request failed: {e}")))?;
        let status = response.status();
        match classify(status) {
            StatusClass::Ok => response
                .json::<T>()
                .await
                .map(Lookup::Found)
                .map_err(|e| Verification::unavailable(format!("unreadable GitHub response: {e}"))),
            StatusClass::Missing => Ok(Lookup::Missing(status)),
            StatusClass::Transient => {
                tracing::warn!("GitHub returned {} for {}", status, path);
                Err(Verification::unavailable(format!("GitHub returned {status}")))
            }
        }
    }

    async fn verify_pull_request(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        author: Option<&str>,
    ) -> Result<Verification, Verification> {
        let path = format!("repos/{org}/{repo}/pulls/{number}");
        let pr = match self.get::<PullRequest>(&path).await? {
            Lookup::Found(pr) => pr,
            Lookup::Missing(status) => {
                return Ok(Verification::rejected(format!(
                    "pull request {org}/{repo}#{number} not found ({status})"
                )))
            }
        };
        if !pr.merged {
            return Ok(Verification::rejected(format!(
                "pull request {org}/{repo}#{number} is not merged"
            )));
        }
        Ok(check_author(author, pr.user.as_ref()))
    }

    async fn verify_commit(
        &self,
        org: &str,
        repo: &str,
        sha: &str,
        branch: &str,
        author: Option<&str>,
    ) -> Result<Verification, Verification> {
        let path = format!("repos/{org}/{repo}/commits/{sha}");
        let commit = match self.get::<Commit>(&path).await? {
            Lookup::Found(commit) => commit,
            Lookup::Missing(status) => {
                return Ok(Verification::rejected(format!(
                    "commit {sha} not found in {org}/{repo} ({status})"
                )))
            }
        };
        let author_check = check_author(author, commit.author.as_ref());
        if !author_check.is_verified() {
            return Ok(author_check);
        }

        match self.get::<Branch>(&format!("repos/{org}/{repo}/branches/{branch}")).await? {
            Lookup::Found(b) if b.protected => {}
            Lookup::Found(_) => {
                return Ok(Verification::rejected(format!("branch {branch} is not protected")))
            }
            Lookup::Missing(status) => {
                return Ok(Verification::rejected(format!("branch {branch} not found ({status})")))
            }
        }

        let path = format!("repos/{org}/{repo}/compare/{branch}...{sha}");
        match self.get::<Compare>(&path).await? {
            Lookup::Found(compare) if commit_in_branch(&compare.status) => {
                Ok(Verification::Verified)
            }
            Lookup::Found(compare) => Ok(Verification::rejected(format!(
                "commit {sha} is not in {branch} (compare status {})",
                compare.status
            ))),
            Lookup::Missing(status) => {
                Ok(Verification::rejected(format!("cannot compare {branch} with {sha} ({status})")))
            }
        }
    }
}

fn check_author(claimed: Option<&str>, actual: Option<&User>) -> Verification {
    match (claimed, actual) {
        (None, _) => Verification::Verified,
        (Some(claimed), Some(user)) if user.login.eq_ignore_ascii_case(claimed) => {
            Verification::Verified
        }
        (Some(claimed), Some(user)) => {
            Verification::rejected(format!("authored by {}, not {claimed}", user.login))
        }
        (Some(claimed), None) => {
            Verification::rejected(format!("no GitHub account linked, expected {claimed}"))
        }
    }
}

#[async_trait]
impl ContributionVerifier for GithubVerifier {
    async fn verify(&self, claim: &ContributionClaim) -> Verification {
        let result = match claim {
            ContributionClaim::PullRequest { org, repo, number, author } => {
                self.verify_pull_request(org, repo, *number, author.as_deref()).await
            }
            ContributionClaim::Commit { org, repo, sha, branch, author } => {
                self.verify_commit(org, repo, sha, branch, author.as_deref()).await
            }
            ContributionClaim::ContractDeployment { .. } => {
                Ok(Verification::rejected("not a source control claim"))
            }
        };
        result.unwrap_or_else(|verdict| verdict)
    }
}
