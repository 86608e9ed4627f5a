//! GitHub network collaborator.
//!
//! [`GitHubApi`] is the black-box contract the adapter needs; [`GhCli`] is
//! the production implementation backed by the `gh` CLI, which handles
//! authentication and pagination for us.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Command;

/// Raw GitHub operations the adapter defers to. Everything returns
/// backend-shaped JSON; normalization happens in the adapter.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// The PR payload, including `base`/`head` refs.
    async fn pull_request(&self) -> Result<Value>;

    /// The `/files` payload: per-file status, counts and patch.
    async fn changed_files(&self) -> Result<Value>;

    /// The `/commits` payload, in API order (oldest first).
    async fn commits(&self) -> Result<Value>;

    /// The full unified diff of the PR.
    async fn full_diff(&self) -> Result<String>;

    /// Raw contents of `path` at `git_ref`; `None` when the file does not
    /// exist at that ref.
    async fn file_contents(&self, path: &str, git_ref: &str) -> Result<Option<String>>;

    async fn issue_comments(&self) -> Result<Value>;
    async fn create_issue_comment(&self, body: &str) -> Result<Value>;
    async fn update_issue_comment(&self, id: u64, body: &str) -> Result<Value>;
    async fn delete_issue_comment(&self, id: u64) -> Result<()>;

    async fn review_comments(&self) -> Result<Value>;
    async fn create_review_comment(
        &self,
        body: &str,
        commit_id: &str,
        path: &str,
        position: u32,
    ) -> Result<Value>;
    async fn update_review_comment(&self, id: u64, body: &str) -> Result<Value>;
    async fn delete_review_comment(&self, id: u64) -> Result<()>;

    async fn create_status(
        &self,
        sha: &str,
        state: &str,
        description: &str,
        context: &str,
        target_url: Option<&str>,
    ) -> Result<Value>;
}

/// Field type for `gh api` requests.
pub enum FieldValue<'a> {
    /// String field (`-f`).
    String(&'a str),
    /// Raw/typed field (`-F`), for integers, booleans, null.
    Raw(&'a str),
}

/// Execute a `gh` CLI command and return stdout.
/// Uses `spawn_blocking` to keep the subprocess off the async runtime.
async fn gh_command(args: &[&str]) -> Result<String> {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();

    tokio::task::spawn_blocking(move || {
        let output = Command::new("gh")
            .args(&args)
            .output()
            .context("Failed to execute gh CLI - is it installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("gh command failed: {}", stderr);
        }

        String::from_utf8(output.stdout).context("gh output contains invalid UTF-8")
    })
    .await
    .context("spawn_blocking task panicked")?
}

async fn gh_api(endpoint: &str) -> Result<Value> {
    let output = gh_command(&["api", endpoint]).await?;
    serde_json::from_str(&output).context("Failed to parse gh api response as JSON")
}

/// Execute `gh api` with an explicit method and body fields. An empty
/// response body (DELETE) parses as JSON null.
async fn gh_api_send(
    method: &str,
    endpoint: &str,
    fields: &[(&str, FieldValue<'_>)],
) -> Result<Value> {
    let mut args = vec![
        "api".to_string(),
        "--method".to_string(),
        method.to_string(),
        endpoint.to_string(),
    ];
    for (key, value) in fields {
        match value {
            FieldValue::String(v) => {
                args.push("-f".to_string());
                args.push(format!("{}={}", key, v));
            }
            FieldValue::Raw(v) => {
                args.push("-F".to_string());
                args.push(format!("{}={}", key, v));
            }
        }
    }
    let args_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    let output = gh_command(&args_refs).await?;
    if output.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&output).context("Failed to parse gh api response as JSON")
}

/// `gh`-CLI-backed [`GitHubApi`] for one pull request.
#[derive(Debug, Clone)]
pub struct GhCli {
    repo: String,
    pr_number: u32,
}

impl GhCli {
    pub fn new(repo: impl Into<String>, pr_number: u32) -> Self {
        Self {
            repo: repo.into(),
            pr_number,
        }
    }

    fn pr_endpoint(&self, suffix: &str) -> String {
        format!("repos/{}/pulls/{}{}", self.repo, self.pr_number, suffix)
    }

    fn issue_endpoint(&self, suffix: &str) -> String {
        format!("repos/{}/issues/{}{}", self.repo, self.pr_number, suffix)
    }
}

#[async_trait]
impl GitHubApi for GhCli {
    async fn pull_request(&self) -> Result<Value> {
        gh_api(&self.pr_endpoint("")).await
    }

    async fn changed_files(&self) -> Result<Value> {
        gh_api(&format!("{}?per_page=100", self.pr_endpoint("/files"))).await
    }

    async fn commits(&self) -> Result<Value> {
        gh_api(&format!("{}?per_page=100", self.pr_endpoint("/commits"))).await
    }

    async fn full_diff(&self) -> Result<String> {
        gh_command(&[
            "pr",
            "diff",
            &self.pr_number.to_string(),
            "-R",
            &self.repo,
        ])
        .await
    }

    async fn file_contents(&self, path: &str, git_ref: &str) -> Result<Option<String>> {
        let endpoint = format!("repos/{}/contents/{}?ref={}", self.repo, path, git_ref);
        let result = gh_command(&[
            "api",
            "-H",
            "Accept: application/vnd.github.raw+json",
            &endpoint,
        ])
        .await;
        match result {
            Ok(contents) => Ok(Some(contents)),
            // gh reports 404s on stderr; absent files are a normal outcome
            // for created/deleted sides.
            Err(err) if err.to_string().contains("404") => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn issue_comments(&self) -> Result<Value> {
        gh_api(&format!("{}?per_page=100", self.issue_endpoint("/comments"))).await
    }

    async fn create_issue_comment(&self, body: &str) -> Result<Value> {
        gh_api_send(
            "POST",
            &self.issue_endpoint("/comments"),
            &[("body", FieldValue::String(body))],
        )
        .await
    }

    async fn update_issue_comment(&self, id: u64, body: &str) -> Result<Value> {
        gh_api_send(
            "PATCH",
            &format!("repos/{}/issues/comments/{}", self.repo, id),
            &[("body", FieldValue::String(body))],
        )
        .await
    }

    async fn delete_issue_comment(&self, id: u64) -> Result<()> {
        gh_api_send(
            "DELETE",
            &format!("repos/{}/issues/comments/{}", self.repo, id),
            &[],
        )
        .await
        .map(|_| ())
    }

    async fn review_comments(&self) -> Result<Value> {
        gh_api(&format!("{}?per_page=100", self.pr_endpoint("/comments"))).await
    }

    async fn create_review_comment(
        &self,
        body: &str,
        commit_id: &str,
        path: &str,
        position: u32,
    ) -> Result<Value> {
        let position_str = position.to_string();
        gh_api_send(
            "POST",
            &self.pr_endpoint("/comments"),
            &[
                ("body", FieldValue::String(body)),
                ("commit_id", FieldValue::String(commit_id)),
                ("path", FieldValue::String(path)),
                ("position", FieldValue::Raw(&position_str)),
            ],
        )
        .await
    }

    async fn update_review_comment(&self, id: u64, body: &str) -> Result<Value> {
        gh_api_send(
            "PATCH",
            &format!("repos/{}/pulls/comments/{}", self.repo, id),
            &[("body", FieldValue::String(body))],
        )
        .await
    }

    async fn delete_review_comment(&self, id: u64) -> Result<()> {
        gh_api_send(
            "DELETE",
            &format!("repos/{}/pulls/comments/{}", self.repo, id),
            &[],
        )
        .await
        .map(|_| ())
    }

    async fn create_status(
        &self,
        sha: &str,
        state: &str,
        description: &str,
        context: &str,
        target_url: Option<&str>,
    ) -> Result<Value> {
        let mut fields = vec![
            ("state", FieldValue::String(state)),
            ("description", FieldValue::String(description)),
            ("context", FieldValue::String(context)),
        ];
        if let Some(url) = target_url {
            fields.push(("target_url", FieldValue::String(url)));
        }
        gh_api_send(
            "POST",
            &format!("repos/{}/statuses/{}", self.repo, sha),
            &fields,
        )
        .await
    }
}
