//! GitHub reference adapter.
//!
//! Implements the uniform [`Platform`] contract on top of a [`GitHubApi`]
//! collaborator. The change set is built from the `/files` and `/commits`
//! payloads; file contents, the full diff and per-file patches are wired in
//! as lazy fetchers.

mod api;

pub use api::{FieldValue, GhCli, GitHubApi};

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{body_has_marker, ownership_marker, CheckStatus, Comment, Platform};
use crate::diff::{self, DiffChunk};
use crate::error::{Error, Result};
use crate::git::types::{Capability, Commit, CommitAuthor, CommitTree, RawChangeSet, RawFileEntry};
use crate::git::{ChangeSet, ChangeSetFetchers};

/// The GitHub platform adapter. Stateless across calls apart from the API
/// connection and the lazily fetched base/head refs.
pub struct GitHub {
    api: Arc<dyn GitHubApi>,
    refs: OnceCell<PrRefs>,
}

impl GitHub {
    pub fn new(api: Arc<dyn GitHubApi>) -> Self {
        Self {
            api,
            refs: OnceCell::new(),
        }
    }

    /// Adapter for one PR, backed by the `gh` CLI.
    pub fn via_gh_cli(repo: impl Into<String>, pr_number: u32) -> Self {
        Self::new(Arc::new(GhCli::new(repo, pr_number)))
    }

    async fn refs(&self) -> Result<&PrRefs> {
        self.refs
            .get_or_try_init(|| async {
                let pr = self.api.pull_request().await?;
                Ok(serde_json::from_value(pr).context("unexpected pull request payload")?)
            })
            .await
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PrRefs {
    base: BaseRef,
    head: RefSha,
}

#[derive(Debug, Clone, Deserialize)]
struct BaseRef {
    sha: String,
    repo: RepoInfo,
}

#[derive(Debug, Clone, Deserialize)]
struct RepoInfo {
    full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RefSha {
    sha: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiChangedFile {
    filename: String,
    status: String,
    #[serde(default)]
    patch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    commit: ApiCommitDetail,
    #[serde(default)]
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    #[serde(default)]
    author: Option<ApiIdentity>,
    #[serde(default)]
    committer: Option<ApiIdentity>,
    message: String,
    tree: ApiTree,
}

#[derive(Debug, Default, Deserialize)]
struct ApiIdentity {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    date: String,
}

#[derive(Debug, Deserialize)]
struct ApiTree {
    sha: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiIssueComment {
    id: u64,
    body: String,
    #[serde(default)]
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiReviewComment {
    id: u64,
    body: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    line: Option<u32>,
}

fn normalize_commit(api_commit: ApiCommit) -> Commit {
    fn identity(identity: Option<ApiIdentity>) -> CommitAuthor {
        let identity = identity.unwrap_or_default();
        CommitAuthor {
            name: identity.name,
            email: identity.email,
            date: identity.date,
        }
    }
    Commit {
        sha: api_commit.sha,
        author: identity(api_commit.commit.author),
        committer: identity(api_commit.commit.committer),
        message: api_commit.commit.message,
        tree: CommitTree {
            sha: api_commit.commit.tree.sha,
            url: api_commit.commit.tree.url,
        },
        url: api_commit.html_url,
    }
}

/// Fetcher bundle handed to [`ChangeSet::build`]. The per-file patches from
/// `/files` double as the structured-diff source, so no extra round trip is
/// needed for hunks.
struct GitHubFetchers {
    api: Arc<dyn GitHubApi>,
    repo: String,
    base_sha: String,
    head_sha: String,
    patches: HashMap<String, Option<String>>,
}

#[async_trait]
impl ChangeSetFetchers for GitHubFetchers {
    fn repo(&self) -> &str {
        &self.repo
    }

    fn base_sha(&self) -> &str {
        &self.base_sha
    }

    fn head_sha(&self) -> &str {
        &self.head_sha
    }

    async fn file_contents(&self, path: &str, sha: &str) -> anyhow::Result<Capability<String>> {
        // A file absent at this ref (created or deleted side) reads as empty.
        let contents = self.api.file_contents(path, sha).await?.unwrap_or_default();
        Ok(Capability::Available(contents))
    }

    async fn full_diff(&self) -> anyhow::Result<Capability<String>> {
        Ok(Capability::Available(self.api.full_diff().await?))
    }

    async fn structured_diff(&self, path: &str) -> anyhow::Result<Capability<Vec<DiffChunk>>> {
        // Binary files carry no patch and parse to no hunks.
        Ok(Capability::Available(
            self.patches
                .get(path)
                .and_then(|patch| patch.as_deref())
                .map(diff::parse_patch)
                .unwrap_or_default(),
        ))
    }
}

#[async_trait]
impl Platform for GitHub {
    fn name(&self) -> &str {
        "GitHub"
    }

    async fn get_review_info(&self) -> Result<Value> {
        Ok(self.api.pull_request().await?)
    }

    async fn get_platform_review_dsl_representation(&self) -> Result<Value> {
        Ok(self.api.pull_request().await?)
    }

    async fn get_platform_git_representation(&self) -> Result<ChangeSet> {
        let refs = self.refs().await?.clone();

        let files: Vec<ApiChangedFile> =
            serde_json::from_value(self.api.changed_files().await?)
                .context("unexpected changed-files payload")?;
        let commits: Vec<ApiCommit> = serde_json::from_value(self.api.commits().await?)
            .context("unexpected commits payload")?;

        let raw = RawChangeSet {
            files: files
                .iter()
                .map(|file| RawFileEntry {
                    filename: file.filename.clone(),
                    status: file.status.clone(),
                })
                .collect(),
            commits: commits.into_iter().map(normalize_commit).collect(),
        };
        let patches = files
            .into_iter()
            .map(|file| (file.filename, file.patch))
            .collect();

        let fetchers = GitHubFetchers {
            api: Arc::clone(&self.api),
            repo: refs.base.repo.full_name,
            base_sha: refs.base.sha,
            head_sha: refs.head.sha,
            patches,
        };
        Ok(ChangeSet::build(raw, Arc::new(fetchers)))
    }

    async fn get_inline_comments(&self, owner_id: &str) -> Result<Vec<Comment>> {
        let comments: Vec<ApiReviewComment> =
            serde_json::from_value(self.api.review_comments().await?)
                .context("unexpected review-comments payload")?;
        Ok(comments
            .into_iter()
            .filter(|comment| body_has_marker(&comment.body, owner_id))
            .map(|comment| Comment {
                id: comment.id,
                body: comment.body,
                owned: true,
                path: Some(comment.path),
                line: comment.line,
            })
            .collect())
    }

    fn supports_commenting(&self) -> bool {
        true
    }

    fn supports_inline_comments(&self) -> bool {
        true
    }

    async fn update_or_create_comment(&self, owner_id: &str, body: &str) -> Result<String> {
        let tagged = format!("{body}\n\n{}", ownership_marker(owner_id));
        let existing: Vec<ApiIssueComment> =
            serde_json::from_value(self.api.issue_comments().await?)
                .context("unexpected issue-comments payload")?;

        let response = match existing
            .iter()
            .find(|comment| body_has_marker(&comment.body, owner_id))
        {
            Some(found) => {
                debug!(id = found.id, "updating existing main comment");
                self.api.update_issue_comment(found.id, &tagged).await?
            }
            None => self.api.create_issue_comment(&tagged).await?,
        };
        let comment: ApiIssueComment =
            serde_json::from_value(response).context("unexpected comment payload")?;
        Ok(comment.html_url)
    }

    async fn create_comment(&self, body: &str) -> Result<u64> {
        let comment: ApiIssueComment =
            serde_json::from_value(self.api.create_issue_comment(body).await?)
                .context("unexpected comment payload")?;
        Ok(comment.id)
    }

    async fn create_inline_comment(
        &self,
        git: &ChangeSet,
        body: &str,
        path: &str,
        line: u32,
    ) -> Result<u64> {
        let Capability::Available(file_diff) = git.diff_for_file(path).await? else {
            return Err(Error::Backend(anyhow::anyhow!(
                "backend serves no diff to anchor the inline comment"
            )));
        };
        let position = diff::line_to_position(&file_diff.diff, line).ok_or_else(|| {
            Error::not_found(format!("line {line} of `{path}` is not part of the diff"))
        })?;

        let head_sha = self.refs().await?.head.sha.clone();
        let comment: ApiReviewComment = serde_json::from_value(
            self.api
                .create_review_comment(body, &head_sha, path, position)
                .await?,
        )
        .context("unexpected review-comment payload")?;
        Ok(comment.id)
    }

    async fn update_inline_comment(&self, body: &str, id: u64) -> Result<()> {
        self.api.update_review_comment(id, body).await?;
        Ok(())
    }

    async fn delete_inline_comment(&self, id: u64) -> Result<()> {
        Ok(self.api.delete_review_comment(id).await?)
    }

    async fn delete_main_comment(&self, owner_id: &str) -> Result<bool> {
        let existing: Vec<ApiIssueComment> =
            serde_json::from_value(self.api.issue_comments().await?)
                .context("unexpected issue-comments payload")?;
        match existing
            .iter()
            .find(|comment| body_has_marker(&comment.body, owner_id))
        {
            Some(found) => {
                self.api.delete_issue_comment(found.id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_status(&self, status: &CheckStatus) -> Result<bool> {
        let head_sha = self.refs().await?.head.sha.clone();
        self.api
            .create_status(
                &head_sha,
                status.state.as_str(),
                &status.description,
                &status.context,
                status.target_url.as_deref(),
            )
            .await?;
        Ok(true)
    }

    async fn get_file_contents(&self, path: &str) -> Result<String> {
        let head_sha = self.refs().await?.head.sha.clone();
        self.api
            .file_contents(path, &head_sha)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("`{path}` does not exist at the head of the change set"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::StatusState;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockApi {
        issue_comments: Mutex<Vec<(u64, String)>>,
        review_comments: Mutex<Vec<(u64, String, String, u32)>>,
        statuses: Mutex<Vec<(String, String)>>,
        next_id: AtomicU64,
        issue_creates: AtomicUsize,
    }

    impl MockApi {
        fn new() -> Self {
            Self {
                next_id: AtomicU64::new(100),
                ..Default::default()
            }
        }

        fn issue_comment_json(id: u64, body: &str) -> Value {
            json!({
                "id": id,
                "body": body,
                "html_url": format!("https://github.com/acme/widgets/pull/7#issuecomment-{id}"),
            })
        }
    }

    #[async_trait]
    impl GitHubApi for MockApi {
        async fn pull_request(&self) -> anyhow::Result<Value> {
            Ok(json!({
                "number": 7,
                "title": "Add widget polish",
                "base": {"sha": "base000", "repo": {"full_name": "acme/widgets"}},
                "head": {"sha": "head111"},
            }))
        }

        async fn changed_files(&self) -> anyhow::Result<Value> {
            Ok(json!([
                {
                    "filename": "src/lib.rs",
                    "status": "modified",
                    "patch": "@@ -1,2 +1,3 @@\n ctx\n+added line\n ctx",
                },
                {"filename": "docs/new.md", "status": "added", "patch": "@@ -0,0 +1 @@\n+hello"},
            ]))
        }

        async fn commits(&self) -> anyhow::Result<Value> {
            Ok(json!([
                {
                    "sha": "c1",
                    "commit": {
                        "author": {"name": "Ada", "email": "ada@acme.dev", "date": "2026-08-01T00:00:00Z"},
                        "committer": {"name": "Ada", "email": "ada@acme.dev", "date": "2026-08-01T00:00:00Z"},
                        "message": "first",
                        "tree": {"sha": "t1", "url": "https://api.github.com/t1"},
                    },
                    "html_url": "https://github.com/acme/widgets/commit/c1",
                },
                {
                    "sha": "c2",
                    "commit": {"message": "second", "tree": {"sha": "t2"}},
                },
            ]))
        }

        async fn full_diff(&self) -> anyhow::Result<String> {
            Ok("diff --git a/src/lib.rs b/src/lib.rs\n--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1,2 +1,3 @@\n ctx\n+added line\n ctx".to_string())
        }

        async fn file_contents(&self, path: &str, git_ref: &str) -> anyhow::Result<Option<String>> {
            if path == "missing.txt" {
                return Ok(None);
            }
            Ok(Some(format!("{path}@{git_ref}")))
        }

        async fn issue_comments(&self) -> anyhow::Result<Value> {
            let comments = self.issue_comments.lock().unwrap();
            Ok(Value::Array(
                comments
                    .iter()
                    .map(|(id, body)| Self::issue_comment_json(*id, body))
                    .collect(),
            ))
        }

        async fn create_issue_comment(&self, body: &str) -> anyhow::Result<Value> {
            self.issue_creates.fetch_add(1, Ordering::SeqCst);
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.issue_comments
                .lock()
                .unwrap()
                .push((id, body.to_string()));
            Ok(Self::issue_comment_json(id, body))
        }

        async fn update_issue_comment(&self, id: u64, body: &str) -> anyhow::Result<Value> {
            let mut comments = self.issue_comments.lock().unwrap();
            let comment = comments
                .iter_mut()
                .find(|(existing, _)| *existing == id)
                .ok_or_else(|| anyhow::anyhow!("no comment {id}"))?;
            comment.1 = body.to_string();
            Ok(Self::issue_comment_json(id, body))
        }

        async fn delete_issue_comment(&self, id: u64) -> anyhow::Result<()> {
            self.issue_comments
                .lock()
                .unwrap()
                .retain(|(existing, _)| *existing != id);
            Ok(())
        }

        async fn review_comments(&self) -> anyhow::Result<Value> {
            let comments = self.review_comments.lock().unwrap();
            Ok(Value::Array(
                comments
                    .iter()
                    .map(|(id, body, path, line)| {
                        json!({"id": id, "body": body, "path": path, "line": line})
                    })
                    .collect(),
            ))
        }

        async fn create_review_comment(
            &self,
            body: &str,
            _commit_id: &str,
            path: &str,
            position: u32,
        ) -> anyhow::Result<Value> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.review_comments.lock().unwrap().push((
                id,
                body.to_string(),
                path.to_string(),
                position,
            ));
            Ok(json!({"id": id, "body": body, "path": path}))
        }

        async fn update_review_comment(&self, id: u64, body: &str) -> anyhow::Result<Value> {
            let mut comments = self.review_comments.lock().unwrap();
            let comment = comments
                .iter_mut()
                .find(|(existing, ..)| *existing == id)
                .ok_or_else(|| anyhow::anyhow!("no review comment {id}"))?;
            comment.1 = body.to_string();
            let path = comment.2.clone();
            Ok(json!({"id": id, "body": body, "path": path}))
        }

        async fn delete_review_comment(&self, id: u64) -> anyhow::Result<()> {
            self.review_comments
                .lock()
                .unwrap()
                .retain(|(existing, ..)| *existing != id);
            Ok(())
        }

        async fn create_status(
            &self,
            sha: &str,
            state: &str,
            _description: &str,
            _context: &str,
            _target_url: Option<&str>,
        ) -> anyhow::Result<Value> {
            self.statuses
                .lock()
                .unwrap()
                .push((sha.to_string(), state.to_string()));
            Ok(json!({"state": state}))
        }
    }

    fn adapter() -> (GitHub, Arc<MockApi>) {
        let api = Arc::new(MockApi::new());
        (GitHub::new(Arc::clone(&api) as Arc<dyn GitHubApi>), api)
    }

    #[tokio::test]
    async fn builds_change_set_from_api_payloads() {
        let (github, _) = adapter();
        let git = github.get_platform_git_representation().await.unwrap();

        assert_eq!(git.modified_files(), ["src/lib.rs"]);
        assert_eq!(git.created_files(), ["docs/new.md"]);
        assert!(git.deleted_files().is_empty());
        assert_eq!(git.repo(), "acme/widgets");
        assert_eq!(git.base_sha(), "base000");

        // Commit order and normalization, including the sparse second commit.
        let commits = git.commits();
        assert_eq!(commits[0].author.name, "Ada");
        assert_eq!(commits[1].sha, "c2");
        assert_eq!(commits[1].author.name, "");

        // Structured diff comes straight from the /files patch.
        let chunks = git
            .structured_diff_for_file("src/lib.rs")
            .await
            .unwrap()
            .into_option()
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(git.lines_of_code().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_owner_id() {
        let (github, api) = adapter();

        let first_url = github
            .update_or_create_comment("revet-ci", "1 warning")
            .await
            .unwrap();
        let second_url = github
            .update_or_create_comment("revet-ci", "all clear")
            .await
            .unwrap();

        assert_eq!(first_url, second_url);
        assert_eq!(api.issue_creates.load(Ordering::SeqCst), 1);

        let comments = api.issue_comments.lock().unwrap();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].1.contains("all clear"));
        assert!(comments[0].1.contains("revet-id: revet-ci"));
    }

    #[tokio::test]
    async fn different_owner_ids_get_separate_comments() {
        let (github, api) = adapter();
        github
            .update_or_create_comment("bot-a", "from a")
            .await
            .unwrap();
        github
            .update_or_create_comment("bot-b", "from b")
            .await
            .unwrap();
        assert_eq!(api.issue_creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn inline_comments_filter_on_ownership_marker() {
        let (github, api) = adapter();
        api.review_comments.lock().unwrap().extend([
            (1, format!("mine {}", ownership_marker("revet-ci")), "a.rs".to_string(), 3),
            (2, "someone else's note".to_string(), "b.rs".to_string(), 5),
        ]);

        let comments = github.get_inline_comments("revet-ci").await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].id, 1);
        assert!(comments[0].owned);
        assert_eq!(comments[0].path.as_deref(), Some("a.rs"));
    }

    #[tokio::test]
    async fn inline_comment_is_anchored_by_patch_position() {
        let (github, api) = adapter();
        let git = github.get_platform_git_representation().await.unwrap();

        let id = github
            .create_inline_comment(&git, "nit", "src/lib.rs", 2)
            .await
            .unwrap();

        let comments = api.review_comments.lock().unwrap();
        let (stored_id, _, path, position) = &comments[0];
        assert_eq!(*stored_id, id);
        assert_eq!(path, "src/lib.rs");
        // Line 2 is "+added line": context=1, added=2.
        assert_eq!(*position, 2);
    }

    #[tokio::test]
    async fn inline_comment_off_diff_line_is_not_found() {
        let (github, _) = adapter();
        let git = github.get_platform_git_representation().await.unwrap();
        let err = github
            .create_inline_comment(&git, "nit", "src/lib.rs", 40)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_main_comment_reports_whether_it_deleted() {
        let (github, _) = adapter();
        assert!(!github.delete_main_comment("revet-ci").await.unwrap());

        github
            .update_or_create_comment("revet-ci", "hello")
            .await
            .unwrap();
        assert!(github.delete_main_comment("revet-ci").await.unwrap());
        assert!(!github.delete_main_comment("revet-ci").await.unwrap());
    }

    #[tokio::test]
    async fn status_lands_on_the_head_commit() {
        let (github, api) = adapter();
        let applied = github
            .update_status(&CheckStatus {
                state: StatusState::Success,
                description: "all rules passed".into(),
                context: "revet/review".into(),
                target_url: None,
            })
            .await
            .unwrap();
        assert!(applied);
        let statuses = api.statuses.lock().unwrap();
        assert_eq!(statuses[0], ("head111".to_string(), "success".to_string()));
    }

    #[tokio::test]
    async fn file_contents_read_at_head() {
        let (github, _) = adapter();
        assert_eq!(
            github.get_file_contents("rules/config.toml").await.unwrap(),
            "rules/config.toml@head111"
        );
        let err = github.get_file_contents("missing.txt").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
