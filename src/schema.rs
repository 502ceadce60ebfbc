//! Descriptor validation.
//!
//! A dataset describes its tables in one Data Package JSON descriptor. The
//! validator checks that descriptor; it knows nothing about bags or archives.
use crate::templates::DATA_PACKAGE_PROFILE_JSON;
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Checks a descriptor file, returning one diagnostic per violation.
pub trait SchemaValidator {
    fn validate_descriptor(&self, path: &Path) -> Vec<String>;
}

pub struct DataPackageValidator {
    profile: jsonschema::Validator,
}

impl DataPackageValidator {
    pub fn new() -> Result<Self> {
        let profile: Value = serde_json::from_str(DATA_PACKAGE_PROFILE_JSON)
            .context("parse data package profile")?;
        let profile = jsonschema::Validator::new(&profile)
            .map_err(|err| anyhow!("compile data package profile: {err}"))?;
        Ok(Self { profile })
    }
}

impl SchemaValidator for DataPackageValidator {
    fn validate_descriptor(&self, path: &Path) -> Vec<String> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => return vec![format!("Unable to read '{}': {err}", path.display())],
        };
        let descriptor: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(err) => return vec![format!("Unable to parse '{}': {err}", path.display())],
        };
        let errors: Vec<String> = self
            .profile
            .iter_errors(&descriptor)
            .map(|err| err.to_string())
            .collect();
        tracing::debug!(
            descriptor = %path.display(),
            errors = errors.len(),
            "descriptor checked"
        );
        errors
    }
}
