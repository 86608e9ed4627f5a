//! The uniform capability contract every hosting backend satisfies.
//!
//! Review-comment lifecycle, status checks and diff retrieval behave
//! identically regardless of which backend an adapter talks to. Adapters are
//! stateless across calls except for their connection context; only the
//! create → update/delete lifecycle of a specific comment id is sequential.

pub mod github;
pub mod gitlab;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::git::ChangeSet;

/// A main or inline comment as the core sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    /// Whether the body carries the caller's ownership marker.
    pub owned: bool,
    /// File path, for inline comments.
    pub path: Option<String>,
    /// New-side line number, for inline comments.
    pub line: Option<u32>,
}

/// The marker embedded in comment bodies so later runs can find and update
/// the same comment instead of creating duplicates. `owner_id` is chosen by
/// the caller; matching it is a plain substring lookup, not a foreign key.
pub fn ownership_marker(owner_id: &str) -> String {
    format!("<!-- revet-id: {owner_id} -->")
}

/// The ownership predicate applied when listing comments.
pub fn body_has_marker(body: &str, owner_id: &str) -> bool {
    body.contains(&ownership_marker(owner_id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusState {
    Pending,
    Success,
    Failure,
}

impl StatusState {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusState::Pending => "pending",
            StatusState::Success => "success",
            StatusState::Failure => "failure",
        }
    }
}

/// A pass/fail/pending check to attach to the change set's head commit.
#[derive(Debug, Clone)]
pub struct CheckStatus {
    pub state: StatusState,
    pub description: String,
    /// Status namespace shown by the backend ("revet/review", ...).
    pub context: String,
    pub target_url: Option<String>,
}

/// Capability set every backend adapter implements.
///
/// All I/O-bearing operations are asynchronous and may be issued
/// concurrently. CRUD failures are surfaced as [`Error::Backend`]
/// (crate::Error::Backend); no operation silently no-ops on failure.
#[async_trait]
pub trait Platform: Send + Sync {
    fn name(&self) -> &str;

    /// Backend-shaped review/PR metadata, opaque to the core.
    async fn get_review_info(&self) -> Result<Value>;

    /// Backend-shaped review object handed to rule hosts that want the raw
    /// platform view.
    async fn get_platform_review_dsl_representation(&self) -> Result<Value>;

    /// The normalized change set, built via [`ChangeSet::build`].
    async fn get_platform_git_representation(&self) -> Result<ChangeSet>;

    /// Inline comments recognized as owned via the embedded marker for
    /// `owner_id`. Comments without the marker are filtered out.
    async fn get_inline_comments(&self, owner_id: &str) -> Result<Vec<Comment>>;

    /// Static capability flag; no I/O.
    fn supports_commenting(&self) -> bool;

    /// Static capability flag; no I/O.
    fn supports_inline_comments(&self) -> bool;

    /// Idempotent upsert of the main review comment for `owner_id`: replace
    /// the body of an existing owned comment, or create one. Returns the
    /// comment's URL. Repeated calls never create duplicates.
    async fn update_or_create_comment(&self, owner_id: &str, body: &str) -> Result<String>;

    /// Create a main comment; returns its id.
    async fn create_comment(&self, body: &str) -> Result<u64>;

    /// Create an inline comment anchored at `path`:`line` (new-side line
    /// number); returns its id. The change set supplies the diff needed to
    /// anchor the comment.
    async fn create_inline_comment(
        &self,
        git: &ChangeSet,
        body: &str,
        path: &str,
        line: u32,
    ) -> Result<u64>;

    async fn update_inline_comment(&self, body: &str, id: u64) -> Result<()>;

    async fn delete_inline_comment(&self, id: u64) -> Result<()>;

    /// Delete the owned main comment, if one exists. Returns whether a
    /// comment was deleted.
    async fn delete_main_comment(&self, owner_id: &str) -> Result<bool>;

    /// Set a check status on the change set. Returns whether the status was
    /// applied; backends without a status API report `false`.
    async fn update_status(&self, status: &CheckStatus) -> Result<bool>;

    /// Plain read of a file's raw content, for ancillary rule logic.
    /// Not part of the diff model.
    async fn get_file_contents(&self, path: &str) -> Result<String>;
}
