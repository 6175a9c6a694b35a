//! Reproducibility provenance: the engine version and the two content
//! checksums stamped into every result document. Values are computed
//! explicitly and threaded into the orchestrator; nothing here is ambient
//! mutable state.

use anyhow::Result;
use std::path::Path;
use wav_core::{sha256_bytes, sha256_file};

pub const WEBARENA_VERIFIED_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The evaluator sources, embedded at compile time. Two binaries built from
/// different evaluator code produce different checksums, so results are
/// distinguishable without diffing code.
const EVALUATOR_SOURCES: &[(&str, &str)] = &[
    (
        "data_types.rs",
        include_str!("../../wav-eval/src/data_types.rs"),
    ),
    (
        "comparator.rs",
        include_str!("../../wav-eval/src/comparator.rs"),
    ),
    ("schema.rs", include_str!("../../wav-eval/src/schema.rs")),
    (
        "evaluators.rs",
        include_str!("../../wav-eval/src/evaluators.rs"),
    ),
    ("jsonpath.rs", include_str!("../../wav-eval/src/jsonpath.rs")),
];

/// Content hash of the evaluator implementation in use.
pub fn evaluator_checksum() -> String {
    let mut buffer = Vec::new();
    for (name, source) in EVALUATOR_SOURCES {
        buffer.extend_from_slice(name.as_bytes());
        buffer.push(0);
        buffer.extend_from_slice(source.as_bytes());
        buffer.push(0);
    }
    sha256_bytes(&buffer)
}

/// Content hash of the dataset file a run was evaluated against.
pub fn data_checksum(dataset_path: &Path) -> Result<String> {
    sha256_file(dataset_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn evaluator_checksum_is_stable_within_a_build() {
        let first = evaluator_checksum();
        assert!(first.starts_with("sha256:"));
        assert_eq!(first, evaluator_checksum());
    }

    #[test]
    fn data_checksum_tracks_file_content() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("wav_provenance_{}.json", nanos));
        fs::write(&path, b"[{\"task_id\": 1}]").expect("write");
        let first = data_checksum(&path).expect("digest");
        fs::write(&path, b"[{\"task_id\": 2}]").expect("write");
        let second = data_checksum(&path).expect("digest");
        assert_ne!(first, second);
        let _ = fs::remove_file(path);
    }
}
