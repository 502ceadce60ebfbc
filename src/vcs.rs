//! Git working-tree detection.
use crate::error::SubmitError;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Directory skipped when a repository is copied into a bag.
pub const GIT_DIR_NAME: &str = ".git";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCheckout {
    pub root: PathBuf,
    pub revision: String,
}

impl GitCheckout {
    /// Sibling directory `<root name>_<revision>` the checkout is copied into.
    pub fn output_dir(&self) -> Result<PathBuf> {
        let name = self
            .root
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("repository root {} has no name", self.root.display()))?;
        let parent = self.root.parent().unwrap_or_else(|| Path::new("."));
        Ok(parent.join(format!("{name}_{}", self.revision)))
    }
}

/// Return the enclosing checkout of `path`, if it is inside one.
///
/// Without a `git` binary every path counts as "not a repository".
pub fn detect_checkout(path: &Path) -> Result<Option<GitCheckout>> {
    if !path.exists() {
        return Err(SubmitError::RepositoryPathMissing(path.to_path_buf()).into());
    }
    let git = match which::which("git") {
        Ok(git) => git,
        Err(err) => {
            tracing::debug!(error = %err, "git not found on PATH; skipping repository detection");
            return Ok(None);
        }
    };
    let workdir = if path.is_dir() {
        path
    } else {
        path.parent().unwrap_or_else(|| Path::new("."))
    };

    let toplevel = run_git(&git, workdir, &["rev-parse", "--show-toplevel"])?;
    if !toplevel.status.success() {
        tracing::debug!(path = %path.display(), "not inside a git working tree");
        return Ok(None);
    }
    let root = PathBuf::from(stdout_trim(&toplevel));

    let head = run_git(&git, &root, &["rev-parse", "HEAD"])?;
    if !head.status.success() {
        return Err(anyhow!(
            "git repository {} has no commits: {}",
            root.display(),
            String::from_utf8_lossy(&head.stderr).trim()
        ));
    }
    let checkout = GitCheckout {
        root,
        revision: stdout_trim(&head),
    };
    tracing::debug!(root = %checkout.root.display(), revision = %checkout.revision, "git checkout detected");
    Ok(Some(checkout))
}

fn run_git(git: &Path, dir: &Path, args: &[&str]) -> Result<Output> {
    Command::new(git)
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("run git {} in {}", args.join(" "), dir.display()))
}

fn stdout_trim(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.org")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.org")
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?}");
    }

    #[test]
    fn missing_path_is_a_repository_error() {
        let err = detect_checkout(Path::new("/definitely/not/here")).expect_err("missing path");
        assert!(matches!(
            err.downcast_ref::<SubmitError>(),
            Some(SubmitError::RepositoryPathMissing(_))
        ));
    }

    #[test]
    fn output_dir_is_a_sibling_named_after_the_revision() {
        let checkout = GitCheckout {
            root: PathBuf::from("/work/dataset"),
            revision: "abc123".to_string(),
        };
        assert_eq!(
            checkout.output_dir().expect("output dir"),
            PathBuf::from("/work/dataset_abc123")
        );
    }

    #[test]
    fn detects_checkout_from_a_subdirectory() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("temp dir");
        let repo = dir.path().join("dataset");
        std::fs::create_dir_all(repo.join("tables")).expect("create repo");
        std::fs::write(repo.join("tables/a.tsv"), "id\n1\n").expect("write table");
        git(&repo, &["init", "-q"]);
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "-q", "-m", "initial"]);

        let checkout = detect_checkout(&repo.join("tables"))
            .expect("detect")
            .expect("inside checkout");
        assert_eq!(
            checkout.root.canonicalize().expect("canonical root"),
            repo.canonicalize().expect("canonical repo")
        );
        assert_eq!(checkout.revision.len(), 40);
    }
}
