//! Stable build fingerprinting for cache keying.

use crate::types::BuildId;
use blake3::Hasher;
use std::collections::BTreeMap;

const SEP: u8 = 0x1f;

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[SEP]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Stable hash over a build's cacheable identity: project path, task name,
/// sorted build options, and an opaque build-tool input descriptor (e.g. a
/// lockfile hash supplied by the caller). Two builds with the same
/// fingerprint are expected to produce identical artifacts.
pub fn fingerprint_build(
    project_path: &str,
    task_name: &str,
    options: &BTreeMap<String, String>,
    tool_input_descriptor: &str,
) -> String {
    let options_repr: String = options
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    hash_parts(&[project_path, task_name, &options_repr, tool_input_descriptor])
}

/// Cache storage key derived from a fingerprint, safe to use as a path
/// component.
pub fn cache_key(fingerprint: &str) -> String {
    fingerprint.to_string()
}

/// Fingerprint used purely for log correlation when the real fingerprint is
/// not yet known (e.g. before dispatch), derived from the build id alone.
pub fn provisional_fingerprint(build_id: BuildId) -> String {
    hash_parts(&[&build_id.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_same_inputs() {
        let mut opts = BTreeMap::new();
        opts.insert("target".to_string(), "release".to_string());
        let a = fingerprint_build("proj", "build", &opts, "lock-abc");
        let b = fingerprint_build("proj", "build", &opts, "lock-abc");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_option_change() {
        let mut opts_a = BTreeMap::new();
        opts_a.insert("target".to_string(), "release".to_string());
        let mut opts_b = BTreeMap::new();
        opts_b.insert("target".to_string(), "debug".to_string());

        let a = fingerprint_build("proj", "build", &opts_a, "lock-abc");
        let b = fingerprint_build("proj", "build", &opts_b, "lock-abc");
        assert_ne!(a, b);
    }

    #[test]
    fn option_order_does_not_affect_fingerprint() {
        let mut opts_a = BTreeMap::new();
        opts_a.insert("a".to_string(), "1".to_string());
        opts_a.insert("b".to_string(), "2".to_string());

        let mut opts_b = BTreeMap::new();
        opts_b.insert("b".to_string(), "2".to_string());
        opts_b.insert("a".to_string(), "1".to_string());

        assert_eq!(
            fingerprint_build("proj", "build", &opts_a, "lock"),
            fingerprint_build("proj", "build", &opts_b, "lock")
        );
    }
}
