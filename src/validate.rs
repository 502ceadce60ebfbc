//! Gate a resolved archive on its embedded descriptor.
//!
//! Validation never fails the process: every problem becomes an invalid
//! verdict with a message the submitter can act on.
//!
//! ## Pipeline summary
//! - **Unpack**: archives are extracted into a temporary directory that is
//!   removed when the gate returns.
//! - **Locate**: inside a directory (or its `data/` payload when present),
//!   exactly one non-hidden `*.json` file must exist.
//! - **Check**: the descriptor goes through the `SchemaValidator`.
//! - **Reference schema**: when one is named it is downloaded but not
//!   enforced; only a failed download changes the verdict.
//!
//! ## Example walkthroughs
//! ```text
//! dataset.zip -> dataset/data/{datapackage.json, subject.tsv}
//! -> datapackage.json checked
//! ```
//! ```text
//! dataset/data/{a.json, b.json}
//! -> invalid: "Multiple JSON files found in directory."
//! ```
use crate::bag::Packager;
use crate::http;
use crate::schema::SchemaValidator;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use ureq::Agent;

pub const NO_DESCRIPTOR: &str = "No TableSchema JSON file found.";
pub const MULTIPLE_DESCRIPTORS: &str = "Multiple JSON files found in directory.";

const PAYLOAD_DIR: &str = "data";
const REFERENCE_SCHEMA_FILE: &str = "validation_schema.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub summary: String,
}

impl ValidationVerdict {
    fn valid(descriptor: &Path) -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            summary: format!("Descriptor '{}' is valid.", descriptor.display()),
        }
    }

    fn invalid(errors: Vec<String>) -> Self {
        let summary = errors.join("\n");
        Self {
            is_valid: false,
            errors,
            summary,
        }
    }

    fn single(error: impl Into<String>) -> Self {
        Self::invalid(vec![error.into()])
    }
}

pub struct SchemaGate<'a> {
    packager: &'a dyn Packager,
    validator: &'a dyn SchemaValidator,
    agent: &'a Agent,
}

impl<'a> SchemaGate<'a> {
    pub fn new(
        packager: &'a dyn Packager,
        validator: &'a dyn SchemaValidator,
        agent: &'a Agent,
    ) -> Self {
        Self {
            packager,
            validator,
            agent,
        }
    }

    pub fn validate(&self, path: &Path, schema_reference: Option<&str>) -> ValidationVerdict {
        let scratch = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => {
                return ValidationVerdict::single(format!(
                    "Unable to create temporary directory: {err}"
                ))
            }
        };

        let mut target = path.to_path_buf();
        if self.packager.is_archive(path) {
            let into = scratch.path().join("extracted");
            let extracted = fs::create_dir_all(&into)
                .map_err(anyhow::Error::from)
                .and_then(|()| self.packager.extract_bag(path, &into));
            match extracted {
                Ok(root) => target = root,
                Err(err) => {
                    return ValidationVerdict::single(format!(
                        "Unable to extract '{}': {err:#}",
                        path.display()
                    ))
                }
            }
        }

        if target.is_dir() {
            match locate_descriptor(&target) {
                Ok(descriptor) => target = descriptor,
                Err(verdict) => return verdict,
            }
        }
        if !target.is_file() {
            return ValidationVerdict::single(format!(
                "Path '{}' does not refer to a file",
                target.display()
            ));
        }

        let errors = self.validator.validate_descriptor(&target);

        if let Some(reference) = schema_reference {
            if let Err(message) = self.download_reference(reference, &scratch) {
                return ValidationVerdict::single(format!(
                    "Error while downloading schema: {message}"
                ));
            }
            tracing::warn!(
                schema = reference,
                "currently unable to validate data against an existing schema; only the \
                 descriptor itself was checked"
            );
        }

        if errors.is_empty() {
            ValidationVerdict::valid(&target)
        } else {
            ValidationVerdict::invalid(errors)
        }
    }

    /// Fetch the reference schema. The copy is informational and discarded with `scratch`.
    fn download_reference(&self, reference: &str, scratch: &TempDir) -> Result<PathBuf, String> {
        let mut response = self
            .agent
            .get(reference)
            .call()
            .map_err(|err| err.to_string())?;
        let status = response.status().as_u16();
        if status >= 300 {
            return Err(format!("error {status}: {}", http::body_text(&mut response)));
        }
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|err| err.to_string())?;
        let path = scratch.path().join(REFERENCE_SCHEMA_FILE);
        fs::write(&path, body).map_err(|err| err.to_string())?;
        tracing::debug!(schema = reference, path = %path.display(), "reference schema downloaded");
        Ok(path)
    }
}

/// Exactly one non-hidden JSON file, looked up under `data/` when present.
fn locate_descriptor(dir: &Path) -> Result<PathBuf, ValidationVerdict> {
    let payload = dir.join(PAYLOAD_DIR);
    let search = if payload.is_dir() { payload } else { dir.to_path_buf() };
    let entries = fs::read_dir(&search).map_err(|err| {
        ValidationVerdict::single(format!("Unable to read '{}': {err}", search.display()))
    })?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(".json") && !name.starts_with('.'))
        })
        .collect();
    match candidates.len() {
        0 => Err(ValidationVerdict::single(NO_DESCRIPTOR)),
        1 => Ok(candidates.remove(0)),
        _ => Err(ValidationVerdict::single(MULTIPLE_DESCRIPTORS)),
    }
}
