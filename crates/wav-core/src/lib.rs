use anyhow::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;

pub mod url;

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(sha256_bytes(&bytes))
}

/// Canonical JSON: object keys sorted, no insignificant whitespace. Used so
/// digests of semantically equal documents are byte-identical.
pub fn canonical_json(value: &Value) -> String {
    canonical_json_inner(value)
}

fn canonical_json_inner(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s)),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(canonical_json_inner).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut parts = Vec::with_capacity(keys.len());
            for k in keys {
                let v = map.get(k).unwrap();
                let ks = serde_json::to_string(k).unwrap();
                let vs = canonical_json_inner(v);
                parts.push(format!("{}:{}", ks, vs));
            }
            format!("{{{}}}", parts.join(","))
        }
    }
}

pub fn canonical_json_digest(value: &Value) -> String {
    let canonical = canonical_json(value);
    sha256_bytes(canonical.as_bytes())
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    atomic_write_bytes(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        std::env::temp_dir().join(format!("wav_core_{}_{}", label, nanos))
    }

    #[test]
    fn sha256_bytes_is_stable_and_prefixed() {
        let digest = sha256_bytes(b"webarena");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest, sha256_bytes(b"webarena"));
        assert_ne!(digest, sha256_bytes(b"webarena2"));
    }

    #[test]
    fn canonical_json_sorts_object_keys() {
        let a = json!({"b": 1, "a": [true, null, "x"]});
        let b = json!({"a": [true, null, "x"], "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":[true,null,"x"],"b":1}"#);
        assert_eq!(canonical_json_digest(&a), canonical_json_digest(&b));
    }

    #[test]
    fn atomic_write_creates_parent_dirs() {
        let root = temp_root("atomic");
        let path = root.join("nested").join("out.json");
        atomic_write_json_pretty(&path, &json!({"ok": true})).expect("write should succeed");
        let content = fs::read_to_string(&path).expect("file should exist");
        assert!(content.contains("\"ok\": true"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn sha256_file_matches_bytes_digest() {
        let root = temp_root("digest");
        ensure_dir(&root).expect("temp dir");
        let path = root.join("data.json");
        fs::write(&path, b"[1,2,3]").expect("write");
        assert_eq!(sha256_file(&path).expect("digest"), sha256_bytes(b"[1,2,3]"));
        let _ = fs::remove_dir_all(root);
    }
}
