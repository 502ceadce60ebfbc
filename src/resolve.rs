//! Turn whatever path the submitter gave into one archive file.
//!
//! Accepted inputs: a Git checkout, a plain directory, a directory that is
//! already a bag, or an archive file. Directories are bagged (optionally in
//! a copy) and zipped; files pass through untouched.
use crate::bag::{BagOptions, Packager};
use crate::error::SubmitError;
use crate::util::absolute_path;
use crate::vcs::{self, GIT_DIR_NAME};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Copy the source here before bagging instead of bagging in place.
    pub output_dir: Option<PathBuf>,
    /// Remove the copy once the archive exists.
    pub delete_dir: bool,
    /// Treat Git checkouts specially (copy the repository root, always delete).
    pub handle_git: bool,
    pub bag_options: BagOptions,
}

/// A working directory removed when the guard drops.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    armed: bool,
}

impl ScratchDir {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Leave the directory in place.
    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if !self.armed || !self.path.exists() {
            return;
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!(dir = %self.path.display(), "working directory deleted"),
            Err(err) => tracing::warn!(
                dir = %self.path.display(),
                error = %err,
                "failed to delete working directory"
            ),
        }
    }
}

/// The archive to submit, plus the working directory to discard afterwards.
#[derive(Debug)]
pub struct ResolvedArchive {
    path: PathBuf,
    scratch: Option<ScratchDir>,
}

impl ResolvedArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn deletes_working_dir(&self) -> bool {
        self.scratch.is_some()
    }
}

pub struct PathResolver<'a> {
    packager: &'a dyn Packager,
}

impl<'a> PathResolver<'a> {
    pub fn new(packager: &'a dyn Packager) -> Self {
        Self { packager }
    }

    pub fn resolve(&self, path: &Path, options: &ResolveOptions) -> Result<ResolvedArchive> {
        let path = absolute_path(path)?;
        if !path.exists() {
            return Err(SubmitError::SourceMissing(path).into());
        }
        let mut source = path.clone();
        let mut output_dir = options
            .output_dir
            .as_deref()
            .map(absolute_path)
            .transpose()?;
        let mut delete_dir = options.delete_dir;
        let mut skip_git_dir = false;

        if options.handle_git && path.is_dir() {
            if let Some(checkout) = vcs::detect_checkout(&path)? {
                output_dir = Some(checkout.output_dir()?);
                source = checkout.root;
                delete_dir = true;
                skip_git_dir = true;
            }
        }

        let mut scratch = None;
        let mut working = source.clone();
        if source.is_dir() && !self.packager.is_bag(&source) {
            match output_dir {
                Some(output) => {
                    if output.starts_with(&source) {
                        return Err(SubmitError::OutputDirNested {
                            output,
                            source_dir: source,
                        }
                        .into());
                    }
                    if output.exists() {
                        return Err(SubmitError::OutputDirExists(output).into());
                    }
                    // Removes a partial copy if the copy fails.
                    let guard = ScratchDir::new(output.clone());
                    copy_tree(&source, &output, skip_git_dir)?;
                    tracing::debug!(
                        source = %source.display(),
                        output = %output.display(),
                        "copied source into output directory"
                    );
                    if delete_dir {
                        scratch = Some(guard);
                    } else {
                        guard.keep();
                    }
                    working = output;
                }
                None => {
                    if delete_dir {
                        tracing::warn!("bagging in place; the source directory will not be deleted");
                    }
                }
            }
            self.packager
                .make_bag(&working, &options.bag_options)
                .with_context(|| format!("bag {}", working.display()))?;
            if !self.packager.is_bag(&working) {
                return Err(SubmitError::BagCreationFailed(working).into());
            }
        }

        if working.is_dir() {
            let archive = self
                .packager
                .archive_bag(&working)
                .with_context(|| format!("archive {}", working.display()))?;
            tracing::info!(archive = %archive.display(), "bag archived");
            return Ok(ResolvedArchive {
                path: archive,
                scratch,
            });
        }
        Ok(ResolvedArchive {
            path: working,
            scratch: None,
        })
    }
}

fn copy_tree(source: &Path, destination: &Path, skip_git_dir: bool) -> Result<()> {
    fs::create_dir_all(destination)
        .with_context(|| format!("create {}", destination.display()))?;
    let walker = WalkDir::new(source)
        .into_iter()
        .filter_entry(|entry| !(skip_git_dir && entry.file_name() == GIT_DIR_NAME));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", source.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .with_context(|| format!("{} is outside {}", entry.path().display(), source.display()))?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("create {}", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}
