//! GitLab adapter.
//!
//! Commenting works through MR-level notes; the diff/content fetchers are
//! not wired up yet, so the change set it produces runs under the
//! degraded-capability contract: structured diffs come back as
//! [`Capability::Unsupported`] and `lines_of_code` reports 0. Rules that
//! only look at path lists and commits are fully served.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::{body_has_marker, ownership_marker, CheckStatus, Comment, Platform};
use crate::error::{Error, Result};
use crate::git::types::{Commit, CommitAuthor, RawChangeSet, RawFileEntry};
use crate::git::{ChangeSet, ChangeSetFetchers};

/// Raw GitLab operations the adapter defers to. Shapes follow the GitLab
/// merge-request API.
#[async_trait]
pub trait GitLabApi: Send + Sync {
    /// The MR payload, including `project_id` and `diff_refs`.
    async fn merge_request(&self) -> anyhow::Result<Value>;

    /// The MR `changes` payload: per-file `new_path` plus change flags.
    async fn mr_changes(&self) -> anyhow::Result<Value>;

    /// The MR commits, newest first as GitLab reports them.
    async fn mr_commits(&self) -> anyhow::Result<Value>;

    async fn notes(&self) -> anyhow::Result<Value>;
    async fn create_note(&self, body: &str) -> anyhow::Result<Value>;
    async fn update_note(&self, id: u64, body: &str) -> anyhow::Result<Value>;
    async fn delete_note(&self, id: u64) -> anyhow::Result<()>;
}

pub struct GitLab {
    api: Arc<dyn GitLabApi>,
}

impl GitLab {
    pub fn new(api: Arc<dyn GitLabApi>) -> Self {
        Self { api }
    }

    async fn mr_view(&self) -> Result<MrView> {
        let mr = self.api.merge_request().await?;
        Ok(serde_json::from_value(mr).context("unexpected merge request payload")?)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MrView {
    project_id: u64,
    diff_refs: DiffRefs,
    #[serde(default)]
    web_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DiffRefs {
    base_sha: String,
    head_sha: String,
}

#[derive(Debug, Deserialize)]
struct MrChanges {
    changes: Vec<MrChange>,
}

#[derive(Debug, Deserialize)]
struct MrChange {
    new_path: String,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    deleted_file: bool,
}

#[derive(Debug, Deserialize)]
struct MrCommit {
    id: String,
    #[serde(default)]
    author_name: String,
    #[serde(default)]
    author_email: String,
    #[serde(default)]
    authored_date: String,
    #[serde(default)]
    committer_name: String,
    #[serde(default)]
    committer_email: String,
    #[serde(default)]
    committed_date: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct Note {
    id: u64,
    body: String,
}

impl MrChange {
    fn status(&self) -> &'static str {
        if self.new_file {
            "added"
        } else if self.deleted_file {
            "deleted"
        } else {
            "modified"
        }
    }
}

fn normalize_commit(commit: MrCommit) -> Commit {
    Commit {
        sha: commit.id,
        author: CommitAuthor {
            name: commit.author_name,
            email: commit.author_email,
            date: commit.authored_date,
        },
        committer: CommitAuthor {
            name: commit.committer_name,
            email: commit.committer_email,
            date: commit.committed_date,
        },
        message: commit.message,
        // GitLab's MR commit payload carries no tree object.
        tree: Default::default(),
        url: commit.web_url,
    }
}

/// Identifying fields only; every fetch method keeps its `Unsupported`
/// default until the corresponding API endpoints are wired in.
struct GitLabFetchers {
    project_id: String,
    base_sha: String,
    head_sha: String,
}

#[async_trait]
impl ChangeSetFetchers for GitLabFetchers {
    fn repo(&self) -> &str {
        // No repo slug in the MR payload; project_id is equivalent in API
        // calls.
        &self.project_id
    }

    fn base_sha(&self) -> &str {
        &self.base_sha
    }

    fn head_sha(&self) -> &str {
        &self.head_sha
    }
}

#[async_trait]
impl Platform for GitLab {
    fn name(&self) -> &str {
        "GitLab"
    }

    async fn get_review_info(&self) -> Result<Value> {
        Ok(self.api.merge_request().await?)
    }

    async fn get_platform_review_dsl_representation(&self) -> Result<Value> {
        Ok(self.api.merge_request().await?)
    }

    async fn get_platform_git_representation(&self) -> Result<ChangeSet> {
        let view = self.mr_view().await?;
        let changes: MrChanges = serde_json::from_value(self.api.mr_changes().await?)
            .context("unexpected MR changes payload")?;
        let commits: Vec<MrCommit> = serde_json::from_value(self.api.mr_commits().await?)
            .context("unexpected MR commits payload")?;

        let raw = RawChangeSet {
            files: changes
                .changes
                .iter()
                .map(|change| RawFileEntry {
                    filename: change.new_path.clone(),
                    status: change.status().to_string(),
                })
                .collect(),
            commits: commits.into_iter().map(normalize_commit).collect(),
        };
        let fetchers = GitLabFetchers {
            project_id: view.project_id.to_string(),
            base_sha: view.diff_refs.base_sha,
            head_sha: view.diff_refs.head_sha,
        };
        Ok(ChangeSet::build(raw, Arc::new(fetchers)))
    }

    async fn get_inline_comments(&self, _owner_id: &str) -> Result<Vec<Comment>> {
        // Notes are MR-level in this adapter; there are no owned inline
        // comments to report.
        Ok(Vec::new())
    }

    fn supports_commenting(&self) -> bool {
        true
    }

    fn supports_inline_comments(&self) -> bool {
        false
    }

    async fn update_or_create_comment(&self, owner_id: &str, body: &str) -> Result<String> {
        let tagged = format!("{body}\n\n{}", ownership_marker(owner_id));
        let notes: Vec<Note> = serde_json::from_value(self.api.notes().await?)
            .context("unexpected notes payload")?;

        let note: Note = match notes
            .iter()
            .find(|note| body_has_marker(&note.body, owner_id))
        {
            Some(found) => serde_json::from_value(self.api.update_note(found.id, &tagged).await?)
                .context("unexpected note payload")?,
            None => serde_json::from_value(self.api.create_note(&tagged).await?)
                .context("unexpected note payload")?,
        };

        let mr = self.mr_view().await?;
        Ok(format!("{}#note_{}", mr.web_url, note.id))
    }

    async fn create_comment(&self, body: &str) -> Result<u64> {
        let note: Note = serde_json::from_value(self.api.create_note(body).await?)
            .context("unexpected note payload")?;
        Ok(note.id)
    }

    async fn create_inline_comment(
        &self,
        _git: &ChangeSet,
        _body: &str,
        _path: &str,
        _line: u32,
    ) -> Result<u64> {
        Err(Error::Backend(anyhow::anyhow!(
            "the GitLab adapter does not support inline comments"
        )))
    }

    async fn update_inline_comment(&self, _body: &str, _id: u64) -> Result<()> {
        Err(Error::Backend(anyhow::anyhow!(
            "the GitLab adapter does not support inline comments"
        )))
    }

    async fn delete_inline_comment(&self, _id: u64) -> Result<()> {
        Err(Error::Backend(anyhow::anyhow!(
            "the GitLab adapter does not support inline comments"
        )))
    }

    async fn delete_main_comment(&self, owner_id: &str) -> Result<bool> {
        let notes: Vec<Note> = serde_json::from_value(self.api.notes().await?)
            .context("unexpected notes payload")?;
        match notes
            .iter()
            .find(|note| body_has_marker(&note.body, owner_id))
        {
            Some(found) => {
                self.api.delete_note(found.id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_status(&self, status: &CheckStatus) -> Result<bool> {
        // No pipeline-status endpoint is wired in yet; report the status as
        // not applied rather than pretending success.
        warn!(
            state = status.state.as_str(),
            "GitLab adapter has no status API; status not applied"
        );
        Ok(false)
    }

    async fn get_file_contents(&self, path: &str) -> Result<String> {
        // Runner and repository share a checkout in GitLab CI; read from
        // the working tree.
        Ok(tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read `{path}`"))?)
    }
}
