//! Data types of the unified change-set model.

use serde::{Deserialize, Serialize};

/// Name/email/date triple for a commit author or committer. Dates are kept
/// as the backend-reported strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
    pub date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTree {
    pub sha: String,
    pub url: String,
}

/// A normalized commit. Commit order inside a change set is exactly the
/// order the backend reported (oldest first for GitHub's PR commit list);
/// it is never re-sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub author: CommitAuthor,
    pub committer: CommitAuthor,
    pub message: String,
    pub tree: CommitTree,
    pub url: String,
}

/// Textual diff of a single file within a change set.
///
/// `added` and `removed` are the `+`/`-` lines of `diff`, prefixes kept,
/// joined with newlines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    pub before: String,
    pub after: String,
    pub diff: String,
    pub added: String,
    pub removed: String,
}

/// Which of the three disjoint path lists a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Created,
    Modified,
    Deleted,
}

impl FileStatus {
    /// Classify a backend status string. Renames, copies and content
    /// changes all count as modifications.
    pub fn from_backend(status: &str) -> Self {
        match status {
            "added" | "new" => FileStatus::Created,
            "removed" | "deleted" => FileStatus::Deleted,
            _ => FileStatus::Modified,
        }
    }
}

/// One file entry of a backend's raw change-set description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFileEntry {
    pub filename: String,
    pub status: String,
}

/// The backend-agnostic input to [`ChangeSet::build`](crate::git::ChangeSet):
/// file entries with their raw status strings, plus already-normalized
/// commits in backend order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawChangeSet {
    pub files: Vec<RawFileEntry>,
    #[serde(default)]
    pub commits: Vec<Commit>,
}

/// Result of an optional backend capability.
///
/// `Unsupported` means the adapter has not wired this fetcher up for its
/// backend. It is not an error and is distinguishable from an empty value:
/// a file with no diff is `Available` with empty content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability<T> {
    Available(T),
    Unsupported,
}

impl<T> Capability<T> {
    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Available(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Capability::Available(value) => Some(value),
            Capability::Unsupported => None,
        }
    }

    pub fn as_ref(&self) -> Capability<&T> {
        match self {
            Capability::Available(value) => Capability::Available(value),
            Capability::Unsupported => Capability::Unsupported,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Capability<U> {
        match self {
            Capability::Available(value) => Capability::Available(f(value)),
            Capability::Unsupported => Capability::Unsupported,
        }
    }

    /// The explicit empty placeholder for an unsupported capability.
    pub fn unwrap_or_default(self) -> T
    where
        T: Default,
    {
        self.into_option().unwrap_or_default()
    }
}
