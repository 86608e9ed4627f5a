//! Unified-diff parsing for the change-set model.
//!
//! Diff text arrives from a backend API or a local diff tool; this module
//! only re-shapes it. It splits a multi-file diff into per-file patches,
//! parses one patch into ordered hunks with line-level markers, and maps
//! new-file line numbers to the patch positions inline-comment APIs expect.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Marker for a single line inside a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Added,
    Removed,
    Context,
}

/// One line of a hunk, with its position on each side of the diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: LineKind,
    /// Line content without the `+`/`-`/space prefix.
    pub content: String,
    /// Line number in the old file; `None` for added lines.
    pub old_line: Option<u32>,
    /// Line number in the new file; `None` for removed lines.
    pub new_line: Option<u32>,
}

/// A hunk: a contiguous run of changes with its `@@` header ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffChunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    /// The raw `@@ ... @@` header line.
    pub header: String,
    pub lines: Vec<DiffLine>,
}

enum Classified<'a> {
    Hunk,
    Meta,
    Line(LineKind, &'a str),
}

fn classify(line: &str) -> Classified<'_> {
    if line.starts_with("@@") {
        Classified::Hunk
    } else if line.starts_with("+++")
        || line.starts_with("---")
        || line.starts_with("diff ")
        || line.starts_with("index ")
        || line.starts_with("\\ No newline")
        || line.starts_with("new file mode")
        || line.starts_with("deleted file mode")
        || line.starts_with("old mode")
        || line.starts_with("new mode")
        || line.starts_with("similarity index")
        || line.starts_with("rename from")
        || line.starts_with("rename to")
        || line.starts_with("Binary files")
    {
        Classified::Meta
    } else if let Some(content) = line.strip_prefix('+') {
        Classified::Line(LineKind::Added, content)
    } else if let Some(content) = line.strip_prefix('-') {
        Classified::Line(LineKind::Removed, content)
    } else if let Some(content) = line.strip_prefix(' ') {
        Classified::Line(LineKind::Context, content)
    } else {
        // Unprefixed lines should not appear in a valid patch; treat as
        // context rather than dropping them.
        Classified::Line(LineKind::Context, line)
    }
}

/// Parse an `@@ -old_start,old_lines +new_start,new_lines @@` header.
/// A missing count defaults to 1, per the unified diff format.
fn parse_hunk_header(line: &str) -> Option<(u32, u32, u32, u32)> {
    let inner = line.strip_prefix("@@ ")?;
    let end = inner.find(" @@")?;
    let (old_part, new_part) = inner[..end].split_once(' ')?;
    let (old_start, old_lines) = parse_range(old_part.strip_prefix('-')?)?;
    let (new_start, new_lines) = parse_range(new_part.strip_prefix('+')?)?;
    Some((old_start, old_lines, new_start, new_lines))
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

/// Parse a single file's patch into ordered hunks.
///
/// Tolerates leading meta lines (`diff --git`, `index`, `---`, `+++`), so it
/// accepts both API-supplied patches that start at `@@` and per-file slices
/// of a full `git diff`.
pub fn parse_patch(patch: &str) -> Vec<DiffChunk> {
    let mut chunks: Vec<DiffChunk> = Vec::new();
    let mut old_line = 0u32;
    let mut new_line = 0u32;

    for line in patch.lines() {
        match classify(line) {
            Classified::Hunk => {
                let Some((old_start, old_lines, new_start, new_lines)) = parse_hunk_header(line)
                else {
                    warn!("skipping unparseable hunk header: {}", line);
                    continue;
                };
                old_line = old_start;
                new_line = new_start;
                chunks.push(DiffChunk {
                    old_start,
                    old_lines,
                    new_start,
                    new_lines,
                    header: line.to_string(),
                    lines: Vec::new(),
                });
            }
            Classified::Meta => {}
            Classified::Line(kind, content) => {
                let Some(chunk) = chunks.last_mut() else {
                    // Content before the first @@ header; nothing to anchor
                    // it to.
                    continue;
                };
                let (old, new) = match kind {
                    LineKind::Added => {
                        let n = new_line;
                        new_line += 1;
                        (None, Some(n))
                    }
                    LineKind::Removed => {
                        let o = old_line;
                        old_line += 1;
                        (Some(o), None)
                    }
                    LineKind::Context => {
                        let (o, n) = (old_line, new_line);
                        old_line += 1;
                        new_line += 1;
                        (Some(o), Some(n))
                    }
                };
                chunk.lines.push(DiffLine {
                    kind,
                    content: content.to_string(),
                    old_line: old,
                    new_line: new,
                });
            }
        }
    }
    chunks
}

/// Count (added, removed) lines across all hunks of a patch.
pub fn count_changes(patch: &str) -> (u64, u64) {
    let mut added = 0;
    let mut removed = 0;
    for chunk in parse_patch(patch) {
        for line in &chunk.lines {
            match line.kind {
                LineKind::Added => added += 1,
                LineKind::Removed => removed += 1,
                LineKind::Context => {}
            }
        }
    }
    (added, removed)
}

/// Map a new-file line number to its position within the patch.
///
/// "Position" follows the GitHub review-comment convention: meta lines are
/// not counted, the first `@@` header is not counted (position 1 is the line
/// directly below it), and subsequent `@@` headers in a multi-hunk patch are
/// counted.
pub fn line_to_position(patch: &str, target_line: u32) -> Option<u32> {
    let mut new_line: Option<u32> = None;
    let mut position: Option<u32> = None;

    for line in patch.lines() {
        match classify(line) {
            Classified::Meta => {}
            Classified::Hunk => {
                new_line = parse_hunk_header(line).map(|(_, _, new_start, _)| new_start);
                position = Some(position.map_or(0, |p| p + 1));
            }
            Classified::Line(kind, _) => {
                position = position.map(|p| p + 1);
                match kind {
                    LineKind::Added | LineKind::Context => {
                        if new_line == Some(target_line) {
                            return position;
                        }
                        new_line = new_line.map(|n| n + 1);
                    }
                    LineKind::Removed => {}
                }
            }
        }
    }
    None
}

/// Split a full unified diff into per-file patches keyed by the new-side
/// filename, with the `a/`/`b/` (or mnemonic) prefixes stripped. Renamed
/// files are keyed by their new name, matching hosting-API conventions.
pub fn parse_unified_diff(unified_diff: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let lines: Vec<&str> = unified_diff.lines().collect();

    let mut filename: Option<String> = None;
    let mut patch_start: Option<usize> = None;
    let mut old_side_fallback: Option<String> = None;

    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("diff --git ") {
            flush_patch(&lines, &filename, patch_start, i, &mut result);
            filename = new_side_filename(line);
            patch_start = Some(i);
            old_side_fallback = None;
        } else if filename.is_none() && patch_start.is_some() {
            // The diff --git line was ambiguous (spaces in paths); recover
            // the name from the +++ line, or from --- for deletions.
            if let Some(rest) = line.strip_prefix("+++ ") {
                if rest != "/dev/null" {
                    filename = Some(strip_side_prefix(rest));
                } else {
                    filename = old_side_fallback.take();
                }
            } else if let Some(rest) = line.strip_prefix("--- ") {
                if rest != "/dev/null" {
                    old_side_fallback = Some(strip_side_prefix(rest));
                }
            }
        }
    }
    flush_patch(&lines, &filename, patch_start, lines.len(), &mut result);
    result
}

fn flush_patch(
    lines: &[&str],
    filename: &Option<String>,
    start: Option<usize>,
    end: usize,
    result: &mut HashMap<String, String>,
) {
    if let (Some(name), Some(start)) = (filename, start) {
        let patch = lines[start..end].join("\n");
        if !patch.is_empty() {
            result.insert(name.clone(), patch);
        }
    }
}

/// Strip the single-char side prefix (`a/`, `b/`, `w/`, ...) from a
/// `---`/`+++` path.
fn strip_side_prefix(path: &str) -> String {
    if path.len() >= 2 && path.as_bytes()[1] == b'/' {
        path[2..].to_string()
    } else {
        path.to_string()
    }
}

/// Extract the new-side filename from a `diff --git X/old Y/new` line.
///
/// Handles the standard `a/`..`b/` prefixes as well as git's mnemonic
/// prefixes (`c/`, `i/`, `o/` paired with `w/`), and paths containing
/// spaces. Returns `None` when the line is ambiguous, in which case the
/// caller falls back to the `+++`/`---` lines.
fn new_side_filename(git_diff_line: &str) -> Option<String> {
    let content = git_diff_line.strip_prefix("diff --git ")?;
    if content.len() < 2 || content.as_bytes()[1] != b'/' {
        warn!("unparseable diff --git line: {}", git_diff_line);
        return None;
    }

    let first_prefix = content.as_bytes()[0];
    let rest = &content[2..];

    // Non-rename case: "path Y/path" with identical paths. The total length
    // pins the separator position exactly, so spaces in paths are safe.
    let total = rest.len();
    if total >= 3 && (total - 3) % 2 == 0 {
        let path_len = (total - 3) / 2;
        if path_len > 0 {
            let bytes = rest.as_bytes();
            if bytes[path_len] == b' ' && bytes[path_len + 2] == b'/' {
                let (old_path, new_path) = (&rest[..path_len], &rest[path_len + 3..]);
                if old_path == new_path {
                    return Some(new_path.to_string());
                }
            }
        }
    }

    // Rename case: find " Y/" where Y is the expected partner prefix.
    // Only an unambiguous single occurrence is accepted.
    let second_prefix = match first_prefix {
        b'a' => b'b',
        b'c' | b'i' | b'o' => b'w',
        _ => {
            warn!("unknown diff prefix in: {}", git_diff_line);
            return None;
        }
    };
    let bytes = rest.as_bytes();
    let mut separators = Vec::new();
    for i in 0..bytes.len().saturating_sub(2) {
        if bytes[i] == b' ' && bytes[i + 1] == second_prefix && bytes[i + 2] == b'/' {
            separators.push(i);
        }
    }
    if let [sep] = separators[..] {
        let new_path = &rest[sep + 3..];
        if !new_path.is_empty() {
            return Some(new_path.to_string());
        }
    }
    None
}
