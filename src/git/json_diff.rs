//! Structural diffing of JSON documents.
//!
//! Used when a changed file is itself structured data (a manifest, a lock
//! file): rules get a keyed view of what changed instead of re-parsing diff
//! text. The patch flavor produces RFC-6902-shaped operations computed
//! structurally; no diff algorithm is involved.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Change record for one key path. For arrays, `added`/`removed` list the
/// elements that appeared/disappeared; for everything else they are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JsonChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<Value>,
}

/// All changes between two JSON documents, keyed by dotted path
/// (e.g. `dependencies.serde`). The root is keyed by the empty string.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JsonDiff {
    pub changes: BTreeMap<String, JsonChange>,
}

impl JsonDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// A single RFC-6902-shaped operation, with a JSON-pointer path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum JsonPatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

/// Parsed before/after documents plus the operations between them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonPatch {
    pub before: Value,
    pub after: Value,
    pub ops: Vec<JsonPatchOp>,
}

impl JsonPatch {
    pub fn new(before: Value, after: Value) -> Self {
        let mut ops = Vec::new();
        collect_ops("", &before, &after, &mut ops);
        Self { before, after, ops }
    }
}

/// Keyed change view between two documents.
pub fn diff_values(before: &Value, after: &Value) -> JsonDiff {
    let mut diff = JsonDiff::default();
    collect_changes("", before, after, &mut diff.changes);
    diff
}

fn collect_changes(path: &str, before: &Value, after: &Value, out: &mut BTreeMap<String, JsonChange>) {
    if before == after {
        return;
    }
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            for (key, b_val) in b {
                let child = join_dotted(path, key);
                match a.get(key) {
                    Some(a_val) => collect_changes(&child, b_val, a_val, out),
                    None => {
                        out.insert(
                            child,
                            JsonChange {
                                before: Some(b_val.clone()),
                                ..Default::default()
                            },
                        );
                    }
                }
            }
            for (key, a_val) in a {
                if !b.contains_key(key) {
                    out.insert(
                        join_dotted(path, key),
                        JsonChange {
                            after: Some(a_val.clone()),
                            ..Default::default()
                        },
                    );
                }
            }
        }
        (Value::Array(b), Value::Array(a)) => {
            let added: Vec<Value> = a.iter().filter(|v| !b.contains(v)).cloned().collect();
            let removed: Vec<Value> = b.iter().filter(|v| !a.contains(v)).cloned().collect();
            out.insert(
                path.to_string(),
                JsonChange {
                    before: Some(before.clone()),
                    after: Some(after.clone()),
                    added: Some(Value::Array(added)),
                    removed: Some(Value::Array(removed)),
                },
            );
        }
        _ => {
            out.insert(
                path.to_string(),
                JsonChange {
                    before: Some(before.clone()),
                    after: Some(after.clone()),
                    ..Default::default()
                },
            );
        }
    }
}

fn collect_ops(path: &str, before: &Value, after: &Value, out: &mut Vec<JsonPatchOp>) {
    if before == after {
        return;
    }
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            for (key, b_val) in b {
                let child = join_pointer(path, key);
                match a.get(key) {
                    Some(a_val) => collect_ops(&child, b_val, a_val, out),
                    None => out.push(JsonPatchOp::Remove { path: child }),
                }
            }
            for (key, a_val) in a {
                if !b.contains_key(key) {
                    out.push(JsonPatchOp::Add {
                        path: join_pointer(path, key),
                        value: a_val.clone(),
                    });
                }
            }
        }
        (Value::Array(b), Value::Array(a)) => {
            let shared = b.len().min(a.len());
            for i in 0..shared {
                collect_ops(&join_pointer(path, &i.to_string()), &b[i], &a[i], out);
            }
            for (i, a_val) in a.iter().enumerate().skip(shared) {
                out.push(JsonPatchOp::Add {
                    path: join_pointer(path, &i.to_string()),
                    value: a_val.clone(),
                });
            }
            // Remove trailing elements highest-index first so earlier
            // removals do not shift later paths.
            for i in (shared..b.len()).rev() {
                out.push(JsonPatchOp::Remove {
                    path: join_pointer(path, &i.to_string()),
                });
            }
        }
        _ => out.push(JsonPatchOp::Replace {
            path: path.to_string(),
            value: after.clone(),
        }),
    }
}

fn join_dotted(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn join_pointer(path: &str, key: &str) -> String {
    // RFC 6901 escaping for the two special characters.
    let escaped = key.replace('~', "~0").replace('/', "~1");
    format!("{path}/{escaped}")
}
