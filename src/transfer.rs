//! Getting the archive to the ingest endpoint.
//!
//! With a local Globus Connect Personal endpoint the workflow pulls the file
//! itself; otherwise the client PUTs it over HTTPS.
use crate::auth::Authorizer;
use crate::error::SubmitError;
use crate::http::{self, Headers};
use crate::settings::Destination;
use crate::util::truncate_string;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use ureq::Agent;

/// How the archive reaches the destination. Chosen once per submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportPlan {
    ManagedTransfer {
        source_endpoint: String,
        source_path: String,
        destination_path: String,
    },
    DirectUpload {
        destination_url: String,
    },
}

impl TransportPlan {
    /// Pick a transport right before upload, since the local endpoint can
    /// come and go while the process runs.
    pub fn select(
        locator: &dyn EndpointLocator,
        force_direct: bool,
        archive: &Path,
        destination: &Destination,
    ) -> Result<Self> {
        let file_name = crate::util::file_name_string(archive)?;
        let local = locator.local_endpoint();
        let plan = match local {
            Some(endpoint) if !force_direct => Self::ManagedTransfer {
                source_endpoint: endpoint,
                source_path: archive
                    .to_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("archive path is not valid UTF-8"))?,
                destination_path: destination.path_for(&file_name),
            },
            _ => Self::DirectUpload {
                destination_url: destination.url_for(&file_name),
            },
        };
        tracing::info!(
            transport = plan.label(),
            local_endpoint = local_endpoint_label(&plan),
            force_direct,
            "transport selected"
        );
        Ok(plan)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ManagedTransfer { .. } => "managed-transfer",
            Self::DirectUpload { .. } => "direct-upload",
        }
    }
}

fn local_endpoint_label(plan: &TransportPlan) -> &str {
    match plan {
        TransportPlan::ManagedTransfer {
            source_endpoint, ..
        } => source_endpoint,
        TransportPlan::DirectUpload { .. } => "",
    }
}

/// Finds a managed-transfer endpoint running on this machine.
pub trait EndpointLocator {
    fn local_endpoint(&self) -> Option<String>;
}

/// Reads the endpoint id a Globus Connect Personal install leaves on disk.
#[derive(Debug, Clone)]
pub struct GlobusConnectPersonal {
    client_id_file: Option<PathBuf>,
}

impl GlobusConnectPersonal {
    pub fn new() -> Self {
        let client_id_file = if cfg!(windows) {
            dirs::data_local_dir().map(|dir| dir.join("Globus Connect").join("client-id.txt"))
        } else {
            dirs::home_dir().map(|dir| dir.join(".globusonline/lta/client-id.txt"))
        };
        Self { client_id_file }
    }
}

impl Default for GlobusConnectPersonal {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointLocator for GlobusConnectPersonal {
    fn local_endpoint(&self) -> Option<String> {
        let path = self.client_id_file.as_ref()?;
        let id = fs::read_to_string(path).ok()?;
        let id = id.trim();
        (!id.is_empty()).then(|| id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The archive is where the workflow expects it. `status` is the HTTP
    /// status for direct uploads.
    Delivered {
        destination: TransportPlan,
        status: Option<u16>,
    },
    Failed {
        status: u16,
        message: String,
    },
}

pub struct Uploader<'a> {
    agent: &'a Agent,
}

impl<'a> Uploader<'a> {
    pub fn new(agent: &'a Agent) -> Self {
        Self { agent }
    }

    /// Execute `plan`. A 401 gets exactly one refresh and one retry.
    pub fn upload(
        &self,
        plan: &TransportPlan,
        archive: &Path,
        authorizer: &mut dyn Authorizer,
    ) -> Result<UploadOutcome> {
        let destination_url = match plan {
            TransportPlan::ManagedTransfer { .. } => {
                if !archive.is_file() {
                    return Err(SubmitError::SourceMissing(archive.to_path_buf()).into());
                }
                return Ok(UploadOutcome::Delivered {
                    destination: plan.clone(),
                    status: None,
                });
            }
            TransportPlan::DirectUpload { destination_url } => destination_url,
        };

        let bytes = fs::read(archive).with_context(|| format!("read {}", archive.display()))?;
        let mut headers = Headers::new();
        authorizer.set_authorization_header(&mut headers);
        let (mut status, mut body) = self.put(destination_url, &headers, &bytes)?;
        if status == 401 {
            tracing::info!(url = %destination_url, "upload unauthorized; refreshing token and retrying once");
            authorizer.handle_missing_authorization()?;
            authorizer.set_authorization_header(&mut headers);
            (status, body) = self.put(destination_url, &headers, &bytes)?;
        }

        if status >= 300 {
            return Ok(UploadOutcome::Failed {
                status,
                message: format!("Could not upload BDBag to server (error {status}):\n{body}"),
            });
        }
        if status != 200 {
            tracing::warn!(status, "HTTP upload returned an unexpected success status");
        }
        tracing::debug!(status, body = %truncate_string(&body, 512), "upload results");
        Ok(UploadOutcome::Delivered {
            destination: plan.clone(),
            status: Some(status),
        })
    }

    fn put(&self, url: &str, headers: &Headers, bytes: &[u8]) -> Result<(u16, String)> {
        let started = std::time::Instant::now();
        let mut response = http::with_headers(self.agent.put(url), headers)
            .send(bytes)
            .with_context(|| format!("upload to {url}"))?;
        let status = response.status().as_u16();
        tracing::debug!(
            url,
            status,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "PUT archive"
        );
        Ok((status, http::body_text(&mut response)))
    }
}
