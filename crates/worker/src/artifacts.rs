use std::path::PathBuf;

use aiop_domain::{Error, Result};
use chrono::Utc;
use serde_json::{json, Value};

/// Writes `repo.change`/`doc.build` artifacts under the task's
/// `payload.repo_path`, per SPEC_FULL.md §4.6.1: `artifacts/patches/<ts>_<name>.patch`
/// or `artifacts/docs/<ts>_<name>.md`, where `<ts>` is the compact UTC
/// timestamp `YYYYMMDDTHHMMSSZ`.
pub struct Artifacts;

impl Artifacts {
    /// Compact UTC timestamp used in artifact filenames, e.g. `20260221T225059Z`.
    pub fn utc_ts_compact() -> String {
        Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn repo_path(payload: &Value) -> Result<PathBuf> {
        let repo_path = payload
            .get("repo_path")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidArgument("payload.repo_path required".into()))?;
        let path = PathBuf::from(repo_path);
        if !path.is_dir() {
            return Err(Error::InvalidArgument(format!("repo_path not found: {repo_path}")));
        }
        Ok(path)
    }

    fn artifact_name(payload: &Value) -> String {
        payload
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("artifact")
            .to_string()
    }

    /// `repo.change`: writes `payload.patch` to `artifacts/patches/<ts>_<name>.patch`.
    pub fn write_patch(payload: &Value) -> Result<Value> {
        let repo_path = Self::repo_path(payload)?;
        let name = Self::artifact_name(payload);
        let patch = payload
            .get("patch")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidArgument("payload.patch required".into()))?;

        let ts = Self::utc_ts_compact();
        let dir = repo_path.join("artifacts").join("patches");
        std::fs::create_dir_all(&dir)?;
        let file = dir.join(format!("{ts}_{name}.patch"));
        std::fs::write(&file, patch)?;
        let bytes = std::fs::metadata(&file)?.len();

        Ok(json!({"kind": "patch", "name": name, "path": file.to_string_lossy(), "bytes": bytes}))
    }

    /// `doc.build`: writes `payload.markdown` to `artifacts/docs/<ts>_<name>.md`.
    pub fn write_doc(payload: &Value) -> Result<Value> {
        let repo_path = Self::repo_path(payload)?;
        let name = Self::artifact_name(payload);
        let markdown = payload
            .get("markdown")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidArgument("payload.markdown required".into()))?;

        let ts = Self::utc_ts_compact();
        let dir = repo_path.join("artifacts").join("docs");
        std::fs::create_dir_all(&dir)?;
        let file = dir.join(format!("{ts}_{name}.md"));
        std::fs::write(&file, markdown)?;
        let bytes = std::fs::metadata(&file)?.len();

        Ok(json!({"kind": "doc", "name": name, "path": file.to_string_lossy(), "bytes": bytes}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_patch_requires_existing_repo_path() {
        let err = Artifacts::write_patch(&json!({"repo_path": "/nonexistent/path", "patch": "diff"})).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn write_patch_creates_artifact_file() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Artifacts::write_patch(&json!({
            "repo_path": dir.path().to_string_lossy(),
            "name": "demo",
            "patch": "diff --git a/x b/x\n",
        }))
        .unwrap();
        assert_eq!(meta["kind"], "patch");
        assert_eq!(meta["name"], "demo");
        let path = meta["path"].as_str().unwrap();
        assert!(path.ends_with(".patch"));
        assert!(std::path::Path::new(path).exists());
    }

    #[test]
    fn write_doc_creates_artifact_file() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Artifacts::write_doc(&json!({
            "repo_path": dir.path().to_string_lossy(),
            "name": "notes",
            "markdown": "# Notes\n",
        }))
        .unwrap();
        assert_eq!(meta["kind"], "doc");
        let path = meta["path"].as_str().unwrap();
        assert!(path.ends_with(".md"));
    }
}
