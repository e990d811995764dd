//! Shared Kubernetes helpers
//!
//! Finalizer list manipulation, label selector rendering and content hashing
//! used by the reconcilers.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use sha2::{Digest, Sha256};

use crate::Error;

/// Whether `meta` carries `finalizer`
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == finalizer))
}

/// Finalizers of `meta` with `finalizer` appended, or None if already present
pub fn with_finalizer(meta: &ObjectMeta, finalizer: &str) -> Option<Vec<String>> {
    if has_finalizer(meta, finalizer) {
        return None;
    }
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.to_string());
    Some(finalizers)
}

/// Finalizers of `meta` without `finalizer`, or None if it was absent
pub fn without_finalizer(meta: &ObjectMeta, finalizer: &str) -> Option<Vec<String>> {
    if !has_finalizer(meta, finalizer) {
        return None;
    }
    Some(
        meta.finalizers
            .iter()
            .flatten()
            .filter(|s| *s != finalizer)
            .cloned()
            .collect(),
    )
}

/// Merge patch replacing the finalizer list.
///
/// Carries the resourceVersion that was read so that the API server rejects
/// the write with 409 if another writer got there first.
pub fn finalizer_patch(meta: &ObjectMeta, finalizers: &[String]) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "resourceVersion": meta.resource_version,
            "finalizers": finalizers,
        }
    })
}

/// Render a LabelSelector in the `key=value,key in (a,b)` list syntax.
///
/// An empty selector renders as the empty string, which matches everything.
pub fn label_selector_string(selector: &LabelSelector) -> Result<String, Error> {
    let mut parts: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.clone().unwrap_or_default().join(",");
        let part = match expr.operator.as_str() {
            "In" => format!("{} in ({})", expr.key, values),
            "NotIn" => format!("{} notin ({})", expr.key, values),
            "Exists" => expr.key.clone(),
            "DoesNotExist" => format!("!{}", expr.key),
            other => {
                return Err(Error::validation_for_field(
                    "LabelSelector",
                    "matchExpressions.operator",
                    format!("unsupported operator {}", other),
                ))
            }
        };
        parts.push(part);
    }

    Ok(parts.join(","))
}

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Truncated SHA-256, stable across toolchains, so it is safe to persist in
/// status and annotations.
pub fn deterministic_hash(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    hash[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}
