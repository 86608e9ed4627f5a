//! The unified change-set model ("Git DSL").
//!
//! [`ChangeSet::build`] eagerly classifies a backend's raw file-status
//! entries into three disjoint path lists, then wires lazy accessors into a
//! small fetcher bundle supplied by the platform adapter. Nothing touches
//! the network until a rule actually asks for a diff.

pub mod json_diff;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::diff::{self, DiffChunk, LineKind};
use crate::error::{Error, Result};
use json_diff::{JsonDiff, JsonPatch};
use types::{Capability, Commit, FileDiff, FileStatus, RawChangeSet};

/// Backend-specific fetch operations a [`ChangeSet`] defers to.
///
/// Every fetch method has a default body returning
/// [`Capability::Unsupported`], so a new backend starts life fully degraded
/// and grows capabilities as its API client gains endpoints.
#[async_trait]
pub trait ChangeSetFetchers: Send + Sync {
    /// Backend identifier for the repository (slug, project id, ...).
    fn repo(&self) -> &str;
    fn base_sha(&self) -> &str;
    fn head_sha(&self) -> &str;

    /// Full contents of `path` at `sha`. A file that does not exist at that
    /// sha is `Available` with empty content, not an error.
    async fn file_contents(&self, _path: &str, _sha: &str) -> anyhow::Result<Capability<String>> {
        Ok(Capability::Unsupported)
    }

    /// The complete unified diff between base and head.
    async fn full_diff(&self) -> anyhow::Result<Capability<String>> {
        Ok(Capability::Unsupported)
    }

    /// Pre-structured hunks for one file, for backends whose API serves
    /// them directly.
    async fn structured_diff(&self, _path: &str) -> anyhow::Result<Capability<Vec<DiffChunk>>> {
        Ok(Capability::Unsupported)
    }
}

/// Per-key memo table. Concurrent callers for the same key coalesce on one
/// underlying fetch; distinct keys proceed independently.
struct KeyedCell<T> {
    cells: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone> KeyedCell<T> {
    fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    async fn get_or_try_init<F, Fut>(&self, key: &str, init: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cell = {
            let mut cells = self.cells.lock().await;
            Arc::clone(cells.entry(key.to_string()).or_default())
        };
        // The lock is released before awaiting the init future, so other
        // keys are not blocked behind this fetch.
        cell.get_or_try_init(init).await.cloned()
    }
}

/// The unified, backend-agnostic view of a code change.
///
/// The three path lists partition the changed-path set: a path appears in
/// exactly one of them. Diff accessors are lazy and memoized per path for
/// the lifetime of the change set.
pub struct ChangeSet {
    modified_files: Vec<String>,
    created_files: Vec<String>,
    deleted_files: Vec<String>,
    commits: Vec<Commit>,
    fetchers: Arc<dyn ChangeSetFetchers>,
    full_diff: OnceCell<Capability<String>>,
    patches: OnceCell<Capability<HashMap<String, String>>>,
    file_diffs: KeyedCell<Capability<FileDiff>>,
    structured: KeyedCell<Capability<Vec<DiffChunk>>>,
    json_diffs: KeyedCell<Option<JsonDiff>>,
    json_patches: KeyedCell<Option<JsonPatch>>,
    loc: OnceCell<u64>,
}

impl ChangeSet {
    /// Classify the raw file entries and wire up the lazy accessors.
    ///
    /// Classification happens here because it is cheap and almost every rule
    /// needs the path lists. A path reported twice keeps its first status.
    pub fn build(raw: RawChangeSet, fetchers: Arc<dyn ChangeSetFetchers>) -> Self {
        let mut modified_files = Vec::new();
        let mut created_files = Vec::new();
        let mut deleted_files = Vec::new();
        let mut seen = HashSet::new();

        for entry in raw.files {
            if !seen.insert(entry.filename.clone()) {
                continue;
            }
            match FileStatus::from_backend(&entry.status) {
                FileStatus::Created => created_files.push(entry.filename),
                FileStatus::Modified => modified_files.push(entry.filename),
                FileStatus::Deleted => deleted_files.push(entry.filename),
            }
        }

        debug!(
            repo = fetchers.repo(),
            modified = modified_files.len(),
            created = created_files.len(),
            deleted = deleted_files.len(),
            commits = raw.commits.len(),
            "built change set"
        );

        Self {
            modified_files,
            created_files,
            deleted_files,
            commits: raw.commits,
            fetchers,
            full_diff: OnceCell::new(),
            patches: OnceCell::new(),
            file_diffs: KeyedCell::new(),
            structured: KeyedCell::new(),
            json_diffs: KeyedCell::new(),
            json_patches: KeyedCell::new(),
            loc: OnceCell::new(),
        }
    }

    pub fn modified_files(&self) -> &[String] {
        &self.modified_files
    }

    pub fn created_files(&self) -> &[String] {
        &self.created_files
    }

    pub fn deleted_files(&self) -> &[String] {
        &self.deleted_files
    }

    /// Commits in backend-reported order.
    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    pub fn repo(&self) -> &str {
        self.fetchers.repo()
    }

    pub fn base_sha(&self) -> &str {
        self.fetchers.base_sha()
    }

    pub fn head_sha(&self) -> &str {
        self.fetchers.head_sha()
    }

    /// Which list `path` belongs to, if it is part of the change set.
    pub fn status_of(&self, path: &str) -> Option<FileStatus> {
        if self.modified_files.iter().any(|p| p == path) {
            Some(FileStatus::Modified)
        } else if self.created_files.iter().any(|p| p == path) {
            Some(FileStatus::Created)
        } else if self.deleted_files.iter().any(|p| p == path) {
            Some(FileStatus::Deleted)
        } else {
            None
        }
    }

    fn require(&self, path: &str) -> Result<FileStatus> {
        self.status_of(path)
            .ok_or_else(|| Error::not_found(format!("`{path}` is not part of this change set")))
    }

    /// Textual before/after/diff for one file. `NotFound` when the path is
    /// not part of the change set; `Unsupported` when the backend can serve
    /// neither file contents nor a diff.
    pub async fn diff_for_file(&self, path: &str) -> Result<Capability<FileDiff>> {
        let status = self.require(path)?;
        self.file_diffs
            .get_or_try_init(path, || self.load_file_diff(path, status))
            .await
    }

    /// Ordered hunks for one file. Falls back to slicing the full diff when
    /// the backend has no structured endpoint; `Unsupported` only when
    /// neither source exists.
    pub async fn structured_diff_for_file(&self, path: &str) -> Result<Capability<Vec<DiffChunk>>> {
        self.require(path)?;
        self.structured
            .get_or_try_init(path, || self.load_structured(path))
            .await
    }

    /// Keyed structural diff for a file that is itself JSON. `None` when
    /// either side is not parseable or contents are unavailable; never an
    /// error for unparseable data.
    pub async fn json_diff_for_file(&self, path: &str) -> Result<Option<JsonDiff>> {
        self.require(path)?;
        self.json_diffs
            .get_or_try_init(path, || async {
                Ok(self
                    .parsed_sides(path)
                    .await?
                    .map(|(before, after)| json_diff::diff_values(&before, &after)))
            })
            .await
    }

    /// RFC-6902-shaped patch for a file that is itself JSON. Same `None`
    /// contract as [`json_diff_for_file`](Self::json_diff_for_file).
    pub async fn json_patch_for_file(&self, path: &str) -> Result<Option<JsonPatch>> {
        self.require(path)?;
        self.json_patches
            .get_or_try_init(path, || async {
                Ok(self
                    .parsed_sides(path)
                    .await?
                    .map(|(before, after)| JsonPatch::new(before, after)))
            })
            .await
    }

    /// Added plus removed line count across the whole change set. Computed
    /// once; 0 when the backend serves no diff at all.
    pub async fn lines_of_code(&self) -> Result<u64> {
        self.loc
            .get_or_try_init(|| async {
                match self.file_patches().await? {
                    Capability::Available(patches) => Ok(patches
                        .values()
                        .map(|patch| {
                            let (added, removed) = diff::count_changes(patch);
                            added + removed
                        })
                        .sum()),
                    Capability::Unsupported => Ok(0),
                }
            })
            .await
            .copied()
    }

    async fn full_diff_text(&self) -> Result<&Capability<String>> {
        self.full_diff
            .get_or_try_init(|| async { Ok(self.fetchers.full_diff().await?) })
            .await
    }

    async fn file_patches(&self) -> Result<&Capability<HashMap<String, String>>> {
        self.patches
            .get_or_try_init(|| async {
                let full = self.full_diff_text().await?;
                Ok(full.as_ref().map(|text| diff::parse_unified_diff(text)))
            })
            .await
    }

    async fn load_file_diff(&self, path: &str, status: FileStatus) -> Result<Capability<FileDiff>> {
        let before = if status == FileStatus::Created {
            Capability::Available(String::new())
        } else {
            self.fetchers
                .file_contents(path, self.fetchers.base_sha())
                .await?
        };
        let after = if status == FileStatus::Deleted {
            Capability::Available(String::new())
        } else {
            self.fetchers
                .file_contents(path, self.fetchers.head_sha())
                .await?
        };
        let patch = self
            .file_patches()
            .await?
            .as_ref()
            .map(|patches| patches.get(path).cloned().unwrap_or_default());

        if !before.is_supported() && !after.is_supported() && !patch.is_supported() {
            return Ok(Capability::Unsupported);
        }

        let diff_text = patch.unwrap_or_default();
        let (added, removed) = signed_lines(&diff_text);
        Ok(Capability::Available(FileDiff {
            before: before.unwrap_or_default(),
            after: after.unwrap_or_default(),
            diff: diff_text,
            added,
            removed,
        }))
    }

    async fn load_structured(&self, path: &str) -> Result<Capability<Vec<DiffChunk>>> {
        if let Capability::Available(chunks) = self.fetchers.structured_diff(path).await? {
            return Ok(Capability::Available(chunks));
        }
        Ok(self.file_patches().await?.as_ref().map(|patches| {
            patches
                .get(path)
                .map(|patch| diff::parse_patch(patch))
                .unwrap_or_default()
        }))
    }

    async fn parsed_sides(&self, path: &str) -> Result<Option<(Value, Value)>> {
        let Capability::Available(file_diff) = self.diff_for_file(path).await? else {
            return Ok(None);
        };
        let before = parse_json_side(&file_diff.before);
        let after = parse_json_side(&file_diff.after);
        Ok(before.zip(after))
    }
}

/// The `+`/`-` lines of a patch, prefixes kept, hunk and meta lines dropped.
fn signed_lines(patch: &str) -> (String, String) {
    let mut added = Vec::new();
    let mut removed = Vec::new();
    for chunk in diff::parse_patch(patch) {
        for line in chunk.lines {
            match line.kind {
                LineKind::Added => added.push(format!("+{}", line.content)),
                LineKind::Removed => removed.push(format!("-{}", line.content)),
                LineKind::Context => {}
            }
        }
    }
    (added.join("\n"), removed.join("\n"))
}

/// An absent side (created/deleted file) diffs as an empty document, the
/// way manifest-style rules expect.
fn parse_json_side(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        Some(Value::Object(serde_json::Map::new()))
    } else {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::types::RawFileEntry;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FULL_DIFF: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
index 111..222 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,2 +1,4 @@
 fn keep() {}
+fn one() {}
+fn two() {}
+fn three() {}
-fn gone() {}";

    struct MockFetchers {
        full_diff: Option<String>,
        contents: HashMap<String, String>,
        contents_calls: AtomicUsize,
        full_diff_calls: AtomicUsize,
        structured_calls: AtomicUsize,
        contents_supported: bool,
    }

    impl MockFetchers {
        fn new(full_diff: Option<&str>) -> Self {
            Self {
                full_diff: full_diff.map(str::to_string),
                contents: HashMap::new(),
                contents_calls: AtomicUsize::new(0),
                full_diff_calls: AtomicUsize::new(0),
                structured_calls: AtomicUsize::new(0),
                contents_supported: true,
            }
        }

        fn with_contents(mut self, path: &str, sha: &str, body: &str) -> Self {
            self.contents
                .insert(format!("{path}@{sha}"), body.to_string());
            self
        }
    }

    #[async_trait]
    impl ChangeSetFetchers for MockFetchers {
        fn repo(&self) -> &str {
            "acme/widgets"
        }
        fn base_sha(&self) -> &str {
            "base000"
        }
        fn head_sha(&self) -> &str {
            "head111"
        }

        async fn file_contents(&self, path: &str, sha: &str) -> anyhow::Result<Capability<String>> {
            self.contents_calls.fetch_add(1, Ordering::SeqCst);
            if !self.contents_supported {
                return Ok(Capability::Unsupported);
            }
            Ok(Capability::Available(
                self.contents
                    .get(&format!("{path}@{sha}"))
                    .cloned()
                    .unwrap_or_default(),
            ))
        }

        async fn full_diff(&self) -> anyhow::Result<Capability<String>> {
            self.full_diff_calls.fetch_add(1, Ordering::SeqCst);
            match &self.full_diff {
                Some(diff) => Ok(Capability::Available(diff.clone())),
                None => Ok(Capability::Unsupported),
            }
        }

        async fn structured_diff(&self, _path: &str) -> anyhow::Result<Capability<Vec<DiffChunk>>> {
            self.structured_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Capability::Unsupported)
        }
    }

    fn raw(files: &[(&str, &str)]) -> RawChangeSet {
        RawChangeSet {
            files: files
                .iter()
                .map(|(name, status)| RawFileEntry {
                    filename: name.to_string(),
                    status: status.to_string(),
                })
                .collect(),
            commits: Vec::new(),
        }
    }

    fn changeset(files: &[(&str, &str)], fetchers: MockFetchers) -> (ChangeSet, Arc<MockFetchers>) {
        let fetchers = Arc::new(fetchers);
        let cs = ChangeSet::build(raw(files), Arc::clone(&fetchers) as Arc<dyn ChangeSetFetchers>);
        (cs, fetchers)
    }

    #[test]
    fn path_lists_are_pairwise_disjoint() {
        let (cs, _) = changeset(
            &[
                ("a.rs", "modified"),
                ("b.rs", "added"),
                ("c.rs", "removed"),
                ("d.rs", "renamed"),
                // Duplicate entry: first status wins.
                ("a.rs", "added"),
            ],
            MockFetchers::new(None),
        );
        assert_eq!(cs.modified_files(), ["a.rs", "d.rs"]);
        assert_eq!(cs.created_files(), ["b.rs"]);
        assert_eq!(cs.deleted_files(), ["c.rs"]);

        let all: Vec<&String> = cs
            .modified_files()
            .iter()
            .chain(cs.created_files())
            .chain(cs.deleted_files())
            .collect();
        let unique: HashSet<&String> = all.iter().copied().collect();
        assert_eq!(all.len(), unique.len());
    }

    #[test]
    fn commits_keep_backend_order() {
        let mut raw = raw(&[]);
        raw.commits = vec![
            Commit {
                sha: "zzz".into(),
                ..Default::default()
            },
            Commit {
                sha: "aaa".into(),
                ..Default::default()
            },
        ];
        let cs = ChangeSet::build(raw, Arc::new(MockFetchers::new(None)));
        let shas: Vec<&str> = cs.commits().iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, ["zzz", "aaa"]);
    }

    #[tokio::test]
    async fn diff_for_unknown_path_is_not_found() {
        let (cs, _) = changeset(&[("a.rs", "modified")], MockFetchers::new(Some(FULL_DIFF)));
        let err = cs.diff_for_file("missing.rs").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn diff_for_file_is_fetched_once() {
        let (cs, fetchers) = changeset(
            &[("src/lib.rs", "modified")],
            MockFetchers::new(Some(FULL_DIFF))
                .with_contents("src/lib.rs", "base000", "fn keep() {}\nfn gone() {}")
                .with_contents("src/lib.rs", "head111", "fn keep() {}\nfn one() {}"),
        );

        let first = cs.diff_for_file("src/lib.rs").await.unwrap();
        let second = cs.diff_for_file("src/lib.rs").await.unwrap();
        assert_eq!(first, second);

        // One fetch per side, and only one full-diff fetch, despite two calls.
        assert_eq!(fetchers.contents_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fetchers.full_diff_calls.load(Ordering::SeqCst), 1);

        let diff = first.into_option().unwrap();
        assert_eq!(diff.after, "fn keep() {}\nfn one() {}");
        assert_eq!(diff.added, "+fn one() {}\n+fn two() {}\n+fn three() {}");
        assert_eq!(diff.removed, "-fn gone() {}");
    }

    #[tokio::test]
    async fn concurrent_calls_for_one_path_coalesce() {
        let (cs, fetchers) = changeset(
            &[("src/lib.rs", "modified")],
            MockFetchers::new(Some(FULL_DIFF)),
        );

        let (a, b) = tokio::join!(
            cs.diff_for_file("src/lib.rs"),
            cs.diff_for_file("src/lib.rs")
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(fetchers.contents_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fetchers.full_diff_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn created_and_deleted_files_have_one_empty_side() {
        let (cs, _) = changeset(
            &[("new.rs", "added"), ("old.rs", "removed")],
            MockFetchers::new(Some(""))
                .with_contents("new.rs", "head111", "fn fresh() {}")
                .with_contents("old.rs", "base000", "fn stale() {}"),
        );

        let created = cs.diff_for_file("new.rs").await.unwrap().into_option().unwrap();
        assert_eq!(created.before, "");
        assert_eq!(created.after, "fn fresh() {}");

        let deleted = cs.diff_for_file("old.rs").await.unwrap().into_option().unwrap();
        assert_eq!(deleted.before, "fn stale() {}");
        assert_eq!(deleted.after, "");
    }

    #[tokio::test]
    async fn structured_diff_falls_back_to_full_diff() {
        let (cs, fetchers) = changeset(
            &[("src/lib.rs", "modified")],
            MockFetchers::new(Some(FULL_DIFF)),
        );
        let chunks = cs
            .structured_diff_for_file("src/lib.rs")
            .await
            .unwrap()
            .into_option()
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].new_lines, 4);
        assert_eq!(fetchers.structured_calls.load(Ordering::SeqCst), 1);

        // Second call hits the memo, not the fetcher.
        cs.structured_diff_for_file("src/lib.rs").await.unwrap();
        assert_eq!(fetchers.structured_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unimplemented_fetchers_degrade_not_fail() {
        let mut fetchers = MockFetchers::new(None);
        fetchers.contents_supported = false;
        let (cs, _) = changeset(&[("a.rs", "modified")], fetchers);

        assert_eq!(
            cs.structured_diff_for_file("a.rs").await.unwrap(),
            Capability::Unsupported
        );
        // The documented empty placeholder.
        assert!(cs
            .structured_diff_for_file("a.rs")
            .await
            .unwrap()
            .unwrap_or_default()
            .is_empty());
        assert_eq!(cs.diff_for_file("a.rs").await.unwrap(), Capability::Unsupported);
        assert_eq!(cs.lines_of_code().await.unwrap(), 0);
        assert_eq!(cs.json_diff_for_file("a.rs").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lines_of_code_sums_added_and_removed() {
        let (cs, _) = changeset(
            &[("src/lib.rs", "modified")],
            MockFetchers::new(Some(FULL_DIFF)),
        );
        // Three added lines plus one removed line.
        assert_eq!(cs.lines_of_code().await.unwrap(), 4);
        // Memoized.
        assert_eq!(cs.lines_of_code().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn json_diff_reports_manifest_changes() {
        let (cs, _) = changeset(
            &[("package.json", "modified")],
            MockFetchers::new(Some(""))
                .with_contents("package.json", "base000", r#"{"version": "1.0.0"}"#)
                .with_contents("package.json", "head111", r#"{"version": "2.0.0"}"#),
        );
        let diff = cs.json_diff_for_file("package.json").await.unwrap().unwrap();
        assert_eq!(
            diff.changes["version"].after,
            Some(serde_json::json!("2.0.0"))
        );

        let patch = cs.json_patch_for_file("package.json").await.unwrap().unwrap();
        assert_eq!(patch.ops.len(), 1);
    }

    #[tokio::test]
    async fn non_json_file_yields_none_not_error() {
        let (cs, _) = changeset(
            &[("notes.txt", "modified")],
            MockFetchers::new(Some(""))
                .with_contents("notes.txt", "base000", "plain old text")
                .with_contents("notes.txt", "head111", "still plain text"),
        );
        assert_eq!(cs.json_diff_for_file("notes.txt").await.unwrap(), None);
        assert_eq!(cs.json_patch_for_file("notes.txt").await.unwrap(), None);
    }
}
