//! Glob-based matching of categorized file path lists.
//!
//! Rules declare interest in file categories ("modified", "created", ...) via
//! glob patterns; this module answers, per category, whether any path
//! survives the include/exclude filtering. Patterns prefixed with `!` are
//! excludes; the prefix is only recognized as the first byte of a pattern
//! token, never inside the glob expression itself.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Context;
use globset::{GlobBuilder, GlobMatcher};

use crate::error::{Error, Result};

/// Per-category verdicts, keyed by category name.
pub type MatchVerdicts = BTreeMap<String, bool>;

/// The intermediate per-category matched-path table.
pub type MatchedPaths = BTreeMap<String, Vec<String>>;

/// Ordered mapping of category name to the file paths it contains.
///
/// Built freshly per matcher invocation from whatever slice of a change set
/// the caller cares about.
#[derive(Debug, Clone, Default)]
pub struct KeyedPaths {
    categories: BTreeMap<String, Vec<String>>,
}

impl KeyedPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: impl Into<String>, paths: Vec<String>) {
        self.categories.insert(category.into(), paths);
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Vec<String>)> for KeyedPaths {
    fn from_iter<I: IntoIterator<Item = (K, Vec<String>)>>(iter: I) -> Self {
        Self {
            categories: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Resolves glob patterns against a fixed [`KeyedPaths`] table.
///
/// The core ([`FileMatch::matches`]) is pure and synchronous. The `debug` and
/// `tap` entry points are side-effect wrappers over the same algorithm and
/// never alter its results.
#[derive(Debug, Clone)]
pub struct FileMatch {
    keyed: KeyedPaths,
}

impl FileMatch {
    pub fn new(keyed: KeyedPaths) -> Self {
        Self { keyed }
    }

    /// Per-category boolean verdicts for the given patterns.
    ///
    /// A category is `true` iff at least one of its paths survives the
    /// include/exclude filtering. No include patterns means every category
    /// is `false`, regardless of excludes.
    pub fn matches(&self, patterns: &[&str]) -> Result<MatchVerdicts> {
        Ok(finalize(&self.matched_paths(patterns)?))
    }

    /// The intermediate table: which paths each category retained.
    ///
    /// Include patterns accumulate matches over the category's full path
    /// list, in pattern order, without deduplication. Each exclude pattern is
    /// then applied left to right, removing from the accumulated set every
    /// path that matches the pattern with the `!` prefix stripped.
    pub fn matched_paths(&self, patterns: &[&str]) -> Result<MatchedPaths> {
        let (excludes, includes): (Vec<&str>, Vec<&str>) =
            patterns.iter().copied().partition(|p| p.starts_with('!'));

        let includes = includes
            .into_iter()
            .map(compile)
            .collect::<Result<Vec<_>>>()?;
        let excludes = excludes
            .into_iter()
            .map(|p| compile(&p[1..]))
            .collect::<Result<Vec<_>>>()?;

        let mut table = MatchedPaths::new();
        for (category, paths) in &self.keyed.categories {
            let mut kept: Vec<String> = Vec::new();
            for matcher in &includes {
                kept.extend(paths.iter().filter(|p| matcher.is_match(p)).cloned());
            }
            for matcher in &excludes {
                kept.retain(|p| !matcher.is_match(p));
            }
            table.insert(category.clone(), kept);
        }
        Ok(table)
    }

    /// Like [`matches`](Self::matches), but first writes the intermediate
    /// matched-path table as pretty JSON to the given sink.
    pub fn debug(&self, patterns: &[&str], sink: &mut dyn Write) -> Result<MatchVerdicts> {
        let table = self.matched_paths(patterns)?;
        let rendered = serde_json::to_string_pretty(&table)
            .context("failed to render matched-path table")?;
        writeln!(sink, "{rendered}").context("failed to write to diagnostic sink")?;
        Ok(finalize(&table))
    }

    /// Like [`matches`](Self::matches), but first hands the intermediate
    /// matched-path table to `callback`.
    pub fn tap(
        &self,
        patterns: &[&str],
        callback: impl FnOnce(&MatchedPaths),
    ) -> Result<MatchVerdicts> {
        let table = self.matched_paths(patterns)?;
        callback(&table);
        Ok(finalize(&table))
    }
}

fn finalize(table: &MatchedPaths) -> MatchVerdicts {
    table
        .iter()
        .map(|(category, paths)| (category.clone(), !paths.is_empty()))
        .collect()
}

fn compile(pattern: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        // `*` stops at `/`; only `**` crosses directories.
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}
