use crate::auth::{Authorizer, LoginOptions, TokenStore};
use crate::bag::{BagItPackager, BagOptions, Packager};
use crate::error::{find_submit_error, SubmitError};
use crate::flows::{access_error, FlowInvoker, FlowParams, FlowRun, FlowsApi, FlowsClient};
use crate::http;
use crate::remote::{fetch_remote_config, FlowInfo, RemoteConfig};
use crate::resolve::{PathResolver, ResolveOptions};
use crate::schema::{DataPackageValidator, SchemaValidator};
use crate::settings::{ClientSettings, Destination, HTTPS_SCOPE};
use crate::status::{StatusTranslator, StatusView};
use crate::transfer::{
    EndpointLocator, GlobusConnectPersonal, TransportPlan, UploadOutcome, Uploader,
};
use crate::validate::SchemaGate;
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use ureq::Agent;

/// One submission, as requested on the command line.
#[derive(Debug, Clone, Default)]
pub struct SubmissionRequest {
    pub data_path: PathBuf,
    pub author_email: String,
    /// Catalog to ingest into; a named catalog also implies its schema.
    pub catalog: Option<String>,
    /// Schema reference; not allowed together with `catalog`.
    pub schema: Option<String>,
    pub server: Option<String>,
    pub dataset_acls: Option<Value>,
    pub output_dir: Option<PathBuf>,
    pub delete_dir: bool,
    pub handle_git: bool,
    pub dry_run: bool,
    pub force_http: bool,
    pub bag_options: BagOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Started { flow_run: FlowRun, message: String },
    DryRun { message: String },
    /// The submission was refused before reaching the workflow engine.
    Rejected { error: String },
}

/// External collaborators the context drives.
pub struct Collaborators {
    pub https_authorizer: Box<dyn Authorizer>,
    pub packager: Box<dyn Packager>,
    pub validator: Box<dyn SchemaValidator>,
    pub locator: Box<dyn EndpointLocator>,
    pub flows: Box<dyn FlowsApi>,
}

/// Process-wide submission state: settings, remote config, credentials, last run.
pub struct SubmissionContext {
    agent: Agent,
    service_instance: String,
    flow_info: FlowInfo,
    catalogs: BTreeMap<String, String>,
    destination: Destination,
    collaborators: Collaborators,
    last_run: Option<FlowRun>,
}

impl SubmissionContext {
    /// Production wiring: remote config and version gate first, then tokens.
    pub fn login(
        settings: ClientSettings,
        service_instance: &str,
        options: LoginOptions,
    ) -> Result<Self> {
        let agent = http::agent();
        let remote = fetch_checked_config(&settings, &agent, service_instance)?;

        let store = TokenStore::new(
            settings.token_file.clone(),
            settings.token_url.clone(),
            agent.clone(),
        );
        let tokens = store.login(&settings.login_scopes(), options)?;
        let https_token = tokens.get(HTTPS_SCOPE).ok_or_else(|| SubmitError::NotLoggedIn {
            reason: format!("no token for scope {HTTPS_SCOPE}"),
        })?;
        let https_authorizer = store.get_authorizer(https_token);
        let flows = FlowsClient::new(agent.clone(), &settings.flows_url, tokens);

        let collaborators = Collaborators {
            https_authorizer: Box::new(https_authorizer),
            packager: Box::new(BagItPackager),
            validator: Box::new(DataPackageValidator::new()?),
            locator: Box::new(GlobusConnectPersonal::new()),
            flows: Box::new(flows),
        };
        Self::new(&settings, agent, remote, service_instance, collaborators)
    }

    /// Fetch and gate the remote config, then assemble a context around `collaborators`.
    #[cfg(test)]
    pub(crate) fn connect(
        settings: &ClientSettings,
        agent: Agent,
        service_instance: &str,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let remote = fetch_checked_config(settings, &agent, service_instance)?;
        Self::new(settings, agent, remote, service_instance, collaborators)
    }

    fn new(
        settings: &ClientSettings,
        agent: Agent,
        remote: RemoteConfig,
        service_instance: &str,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let flow_info = remote.flow_info(service_instance)?.clone();
        let destination = flow_info.destination(&settings.destination);
        tracing::debug!(
            service_instance,
            flow_id = %flow_info.flow_id,
            destination = %destination.endpoint_id,
            "submission context ready"
        );
        Ok(Self {
            agent,
            service_instance: service_instance.to_string(),
            flow_info,
            catalogs: remote.catalogs,
            destination,
            collaborators,
            last_run: None,
        })
    }

    pub fn service_instance(&self) -> &str {
        &self.service_instance
    }

    #[cfg(test)]
    pub(crate) fn last_run(&self) -> Option<&FlowRun> {
        self.last_run.as_ref()
    }

    /// Resolve, validate, upload, and start the ingest flow.
    ///
    /// Input, packaging, validation, and upload problems come back as
    /// `Rejected`; access and compatibility failures are errors.
    pub fn submit(&mut self, request: &SubmissionRequest) -> Result<SubmissionOutcome> {
        let schema = match (&request.catalog, &request.schema) {
            (Some(catalog), Some(schema)) => {
                return Ok(rejected(
                    SubmitError::ConflictingSchema {
                        schema: schema.clone(),
                        catalog: catalog.clone(),
                    }
                    .into(),
                ))
            }
            (Some(catalog), None) => self.catalogs.get(catalog).cloned(),
            (None, schema) => schema.clone(),
        };

        let options = ResolveOptions {
            output_dir: request.output_dir.clone(),
            delete_dir: request.delete_dir,
            handle_git: request.handle_git,
            bag_options: request.bag_options.clone(),
        };
        let archive = match PathResolver::new(self.collaborators.packager.as_ref())
            .resolve(&request.data_path, &options)
        {
            Ok(archive) => archive,
            Err(err) => return Ok(rejected(err)),
        };
        tracing::debug!(
            archive = %archive.path().display(),
            deletes_working_dir = archive.deletes_working_dir(),
            "archive resolved"
        );

        let verdict = SchemaGate::new(
            self.collaborators.packager.as_ref(),
            self.collaborators.validator.as_ref(),
            &self.agent,
        )
        .validate(archive.path(), schema.as_deref());
        tracing::debug!(
            valid = verdict.is_valid,
            errors = verdict.errors.len(),
            "descriptor validated"
        );
        if !verdict.is_valid {
            return Ok(SubmissionOutcome::Rejected {
                error: format!(
                    "TableSchema invalid due to the following errors: \n{}\n",
                    verdict.summary
                ),
            });
        }

        if request.dry_run {
            tracing::info!(archive = %archive.path().display(), "dry run; stopping after validation");
            return Ok(SubmissionOutcome::DryRun {
                message: "Dry run validated successfully. No data was transferred.".to_string(),
            });
        }

        let plan = match TransportPlan::select(
            self.collaborators.locator.as_ref(),
            request.force_http,
            archive.path(),
            &self.destination,
        ) {
            Ok(plan) => plan,
            Err(err) => return Ok(rejected(err)),
        };
        let upload = Uploader::new(&self.agent).upload(
            &plan,
            archive.path(),
            self.collaborators.https_authorizer.as_mut(),
        );
        let delivered = match upload {
            Ok(UploadOutcome::Delivered {
                destination,
                status,
            }) => {
                tracing::debug!(transport = destination.label(), ?status, "archive delivered");
                destination
            }
            Ok(UploadOutcome::Failed { status, message }) => {
                tracing::debug!(status, "upload refused");
                return Ok(SubmissionOutcome::Rejected { error: message });
            }
            Err(err) if is_login_failure(&err) => return Err(err),
            Err(err) => return Ok(rejected(err)),
        };

        let params = FlowParams {
            author_email: &request.author_email,
            catalog_id: request.catalog.as_deref(),
            server: request.server.as_deref(),
            dataset_acls: request.dataset_acls.as_ref(),
        };
        let flow_run = FlowInvoker::new(self.collaborators.flows.as_ref()).start(
            &self.flow_info.flow_id,
            &delivered,
            &params,
        )?;
        let message = format!(
            "Started DERIVA ingest Flow\nFlow ID: {}\nFlow Instance ID: {}",
            flow_run.flow_id, flow_run.flow_instance_id
        );
        self.last_run = Some(flow_run.clone());
        Ok(SubmissionOutcome::Started { flow_run, message })
    }

    /// Status of `run`, or of the last run started by this context.
    pub fn check_status(&self, run: Option<&FlowRun>, raw: bool) -> Result<StatusView> {
        let run = run
            .or(self.last_run.as_ref())
            .ok_or(SubmitError::NoFlowRun)?;
        StatusTranslator::new(self.collaborators.flows.as_ref(), &self.flow_info).report(run, raw)
    }

    /// Confirm the flow is reachable with the current credentials.
    pub fn check(&self) -> Result<String> {
        let flow_id = &self.flow_info.flow_id;
        let definition = self
            .collaborators
            .flows
            .get_flow(flow_id)
            .map_err(|err| access_error(flow_id, err))?;
        Ok(format!(
            "Client is up to date and has access to flow {}",
            definition.title
        ))
    }
}

fn fetch_checked_config(
    settings: &ClientSettings,
    agent: &Agent,
    service_instance: &str,
) -> Result<RemoteConfig> {
    let url = settings.config_url(service_instance)?;
    let remote = fetch_remote_config(agent, url)?;
    remote.check_client_version(&settings.client_version)?;
    Ok(remote)
}

fn is_login_failure(err: &anyhow::Error) -> bool {
    matches!(find_submit_error(err), Some(SubmitError::NotLoggedIn { .. }))
}

fn rejected(err: anyhow::Error) -> SubmissionOutcome {
    let error = match find_submit_error(&err) {
        Some(named) => named.to_string(),
        None => format!("{err:#}"),
    };
    tracing::debug!(error = %error, "submission rejected");
    SubmissionOutcome::Rejected { error }
}

#[cfg(test)]
#[path = "submit_tests.rs"]
mod tests;
