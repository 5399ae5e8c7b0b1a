use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use aiop_domain::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

/// Result of a `patch.apply` attempt (SPEC_FULL.md §6). Mirrors the four-step
/// check/apply/diff sequence of `original_source/ai_operator/repo/patch_apply.py`'s
/// `apply_patch`, minus the report-writing/sha256 bookkeeping that file also does —
/// the Worker already records the task's result via `complete_task_success`.
#[derive(Debug, Clone, Serialize)]
pub struct PatchApplyResult {
    pub ok: bool,
    pub checked: bool,
    pub applied: bool,
    pub git_status_porcelain: String,
    pub diff_stat: String,
    pub check_stdout: String,
    pub check_stderr: String,
    pub apply_stdout: String,
    pub apply_stderr: String,
}

/// Out-of-scope collaborator the Worker dispatches `patch.apply` tasks to
/// (SPEC_FULL.md §6). The shipped implementation shells out to `git`; tests
/// substitute a stub.
#[async_trait]
pub trait PatchApplier: Send + Sync {
    async fn apply(
        &self,
        repo_path: &str,
        patch_path: &str,
        require_clean: bool,
        check_only: bool,
    ) -> Result<PatchApplyResult>;
}

const CHECK_TIMEOUT_S: u64 = 30;
const APPLY_TIMEOUT_S: u64 = 120;

/// `PatchApplier` backed by the `git` CLI: `git status --porcelain`,
/// `git apply --check`, `git apply`, `git diff --stat`, each with its own
/// timeout, exactly reproducing the original's four-step sequence.
pub struct GitPatchApplier;

impl GitPatchApplier {
    async fn run(cmd: &str, args: &[&str], cwd: &Path, timeout_s: u64) -> Result<(i32, String, String)> {
        let fut = Command::new(cmd)
            .args(args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        let output = tokio::time::timeout(Duration::from_secs(timeout_s), fut)
            .await
            .map_err(|_| Error::Other(format!("{cmd} {args:?} timed out after {timeout_s}s")))?
            .map_err(|e| Error::Other(format!("failed to spawn {cmd}: {e}")))?;
        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok((code, stdout, stderr))
    }
}

#[async_trait]
impl PatchApplier for GitPatchApplier {
    async fn apply(
        &self,
        repo_path: &str,
        patch_path: &str,
        require_clean: bool,
        check_only: bool,
    ) -> Result<PatchApplyResult> {
        let repo = Path::new(repo_path);
        if !repo.is_dir() {
            return Err(Error::InvalidArgument(format!("repo_path does not exist or is not a directory: {repo_path}")));
        }
        if !Path::new(patch_path).is_file() {
            return Err(Error::InvalidArgument(format!("patch_path does not exist or is not a file: {patch_path}")));
        }

        let (status_code, porcelain, status_stderr) =
            Self::run("git", &["status", "--porcelain"], repo, CHECK_TIMEOUT_S).await?;
        if status_code != 0 {
            return Err(Error::Other(format!("git status failed: {status_stderr}")));
        }
        if require_clean && !porcelain.is_empty() {
            return Err(Error::Other(format!(
                "working tree not clean; refusing to apply patch:\n{porcelain}"
            )));
        }

        let (check_code, check_stdout, check_stderr) =
            Self::run("git", &["apply", "--check", patch_path], repo, APPLY_TIMEOUT_S).await?;
        if check_code != 0 {
            return Ok(PatchApplyResult {
                ok: false,
                checked: true,
                applied: false,
                git_status_porcelain: porcelain,
                diff_stat: String::new(),
                check_stdout,
                check_stderr,
                apply_stdout: String::new(),
                apply_stderr: String::new(),
            });
        }

        if check_only {
            return Ok(PatchApplyResult {
                ok: true,
                checked: true,
                applied: false,
                git_status_porcelain: porcelain,
                diff_stat: String::new(),
                check_stdout,
                check_stderr,
                apply_stdout: String::new(),
                apply_stderr: String::new(),
            });
        }

        let (apply_code, apply_stdout, apply_stderr) =
            Self::run("git", &["apply", patch_path], repo, APPLY_TIMEOUT_S).await?;
        if apply_code != 0 {
            return Ok(PatchApplyResult {
                ok: false,
                checked: true,
                applied: false,
                git_status_porcelain: porcelain,
                diff_stat: String::new(),
                check_stdout,
                check_stderr,
                apply_stdout,
                apply_stderr,
            });
        }

        let (_, diff_stat, _) = Self::run("git", &["diff", "--stat"], repo, CHECK_TIMEOUT_S).await?;

        Ok(PatchApplyResult {
            ok: true,
            checked: true,
            applied: true,
            git_status_porcelain: porcelain,
            diff_stat,
            check_stdout,
            check_stderr,
            apply_stdout,
            apply_stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_missing_repo_path() {
        let err = GitPatchApplier
            .apply("/nonexistent/repo", "/nonexistent/patch", true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn rejects_missing_patch_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = GitPatchApplier
            .apply(&dir.path().to_string_lossy(), "/nonexistent/patch", true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
