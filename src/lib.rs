//! revet: platform-neutral code review automation core.
//!
//! Three layers, each usable on its own:
//!
//! - [`platform`]: the capability contract a hosting backend satisfies
//!   (comments, check statuses, diff retrieval), with a full GitHub adapter
//!   and a commenting-only GitLab adapter.
//! - [`git`]: the normalized, lazily-populated view of a change set. Path
//!   lists and commits are available immediately; per-file diffs, structured
//!   hunks and JSON diffs are fetched on first use and memoized.
//! - [`filematch`]: glob matching over the change set's categorized path
//!   lists, for rules like "did anything under `src/` change without a
//!   changelog entry?".
//!
//! Backends differ in what they can fetch; anything a backend cannot provide
//! surfaces as [`Capability::Unsupported`] rather than an error, so rules can
//! degrade gracefully.

pub mod diff;
pub mod error;
pub mod filematch;
pub mod git;
pub mod platform;

pub use error::{Error, Result};
pub use filematch::{FileMatch, KeyedPaths};
pub use git::types::Capability;
pub use git::{ChangeSet, ChangeSetFetchers};
pub use platform::{CheckStatus, Comment, Platform, StatusState};
