//! Named failures the CLI recognizes and explains.
//!
//! Most errors travel as `anyhow::Error` with context attached. The variants
//! here are the ones a caller has to tell apart: they either carry a specific
//! remediation message or decide whether a submission is rejected or raised.
use std::path::PathBuf;
use thiserror::Error;

/// Group that grants access to the ingest flow.
pub const ACCESS_GROUP_URL: &str =
    "https://app.globus.org/groups/a437abe3-c9a4-11e9-b441-0efb3ba9a670/about";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("you are not logged in ({reason}); log in with the Globus login helper and retry")]
    NotLoggedIn { reason: String },

    #[error(
        "this CFDE client ({client}) is not up to date and can no longer make submissions \
         (minimum supported version is {required}); please update the client and try again"
    )]
    OutdatedVersion { client: String, required: String },

    #[error(
        "could not access ingest flow {flow_id} ({detail}); are you in the CFDE DERIVA Demo \
         Globus Group? Check your membership or apply for access here: {url}",
        url = ACCESS_GROUP_URL
    )]
    AccessDenied { flow_id: String, detail: String },

    #[error("flow configuration for service instance '{0}' not found")]
    UnknownServiceInstance(String),

    #[error("unable to download required configuration: error {status}: {body}")]
    ConfigUnavailable { status: u16, body: String },

    #[error("path '{}' does not exist", .0.display())]
    SourceMissing(PathBuf),

    #[error("path '{}' does not exist (raised while looking for a Git repository)", .0.display())]
    RepositoryPathMissing(PathBuf),

    #[error(
        "the output directory must not exist; delete '{}' to submit (pass --delete-dir to avoid \
         this in the future)",
        .0.display()
    )]
    OutputDirExists(PathBuf),

    #[error("the output directory ('{}') must not be inside the data path ('{}')", .output.display(), .source_dir.display())]
    OutputDirNested { output: PathBuf, source_dir: PathBuf },

    #[error("failed to create a BDBag from '{}'", .0.display())]
    BagCreationFailed(PathBuf),

    #[error(
        "you may not specify a schema ('{schema}') when ingesting to a catalog ('{catalog}'); \
         retry without specifying a schema"
    )]
    ConflictingSchema { schema: String, catalog: String },

    #[error("Flow not started and flow-id or flow-instance-id not specified")]
    NoFlowRun,
}

/// Error returned by the workflow-engine API.
#[derive(Debug, Error)]
pub enum FlowsError {
    #[error("flows service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("flows service request failed: {0}")]
    Transport(String),

    #[error("flows service response could not be parsed: {0}")]
    Decode(String),

    #[error("no token available for scope {0}")]
    MissingToken(String),
}

impl FlowsError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(_) | Self::Decode(_) | Self::MissingToken(_) => None,
        }
    }

    /// Missing flow, missing group membership and forbidden method all mean the
    /// caller cannot use this flow.
    pub fn is_access_denied(&self) -> bool {
        matches!(self.status(), Some(403..=405))
    }
}

impl From<ureq::Error> for FlowsError {
    fn from(err: ureq::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Find the first named failure in an error chain.
pub fn find_submit_error(err: &anyhow::Error) -> Option<&SubmitError> {
    err.chain().find_map(|cause| cause.downcast_ref::<SubmitError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn access_denied_covers_missing_and_forbidden_flows() {
        for status in [403, 404, 405] {
            let err = FlowsError::Status {
                status,
                body: String::new(),
            };
            assert!(err.is_access_denied(), "status {status}");
        }
        let err = FlowsError::Status {
            status: 500,
            body: String::new(),
        };
        assert!(!err.is_access_denied());
        assert!(!FlowsError::Transport("reset".to_string()).is_access_denied());
    }

    #[test]
    fn find_submit_error_sees_through_context() {
        let err = anyhow::Error::new(SubmitError::NoFlowRun);
        let wrapped = Err::<(), _>(err).context("check status").unwrap_err();
        assert!(matches!(
            find_submit_error(&wrapped),
            Some(SubmitError::NoFlowRun)
        ));
    }
}
