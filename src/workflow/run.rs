//! The `cfde run <DATA_PATH>` command.
//!
//! Resolves the author email (flag, saved state, or prompt), loads the ACL
//! and bag-options files, runs one submission, and records the started flow
//! so `cfde status` can find it later.
use crate::auth::LoginOptions;
use crate::bag::BagOptions;
use crate::cli::RunArgs;
use crate::error::SubmitError;
use crate::settings::{ClientSettings, DEFAULT_SERVICE_INSTANCE};
use crate::state::{load_state, write_state, ClientState};
use crate::workflow::context::{SubmissionContext, SubmissionOutcome, SubmissionRequest};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Email to submit under, and whether to remember it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorEmail {
    pub address: String,
    pub save: bool,
}

/// Run one submission. `Ok(false)` means the submission was rejected.
pub fn run_run(args: &RunArgs) -> Result<bool> {
    if !args.data_path.exists() {
        return Err(SubmitError::SourceMissing(args.data_path.clone()).into());
    }
    let settings = ClientSettings::from_env()?;
    let state_file = args
        .client_state_file
        .clone()
        .unwrap_or_else(|| settings.state_file.clone());
    let state = match load_state(&state_file)? {
        Some(state) => {
            tracing::debug!(path = %state_file.display(), "loaded previous state");
            state
        }
        None => {
            tracing::debug!(path = %state_file.display(), "no previous state found");
            ClientState::default()
        }
    };

    let bag_options = args
        .bag_kwargs_file
        .as_deref()
        .map(BagOptions::load)
        .transpose()?
        .unwrap_or_default();
    let dataset_acls = args.acl_file.as_deref().map(load_json).transpose()?;

    let author = {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        resolve_author_email(
            args.author_email.as_deref(),
            state.author_email.as_deref(),
            &mut input,
            &mut output,
        )?
    };
    if author.save {
        tracing::debug!(
            email = %author.address,
            "email will be saved if the flow starts and this is not a dry run"
        );
    }

    let service_instance = args
        .service_instance
        .as_deref()
        .unwrap_or(DEFAULT_SERVICE_INSTANCE);
    let options = LoginOptions {
        no_browser: args.no_browser,
        refresh_tokens: true,
        force: args.force_login,
    };
    tracing::debug!(service_instance, "initializing flow");
    let mut context = SubmissionContext::login(settings, service_instance, options)?;

    let request = SubmissionRequest {
        data_path: args.data_path.clone(),
        author_email: author.address.clone(),
        catalog: args.catalog.clone(),
        schema: args.schema.clone(),
        server: args.server.clone(),
        dataset_acls,
        output_dir: args.output_dir.clone(),
        delete_dir: args.delete_dir(),
        handle_git: args.handle_git(),
        dry_run: args.dry_run,
        force_http: args.force_http,
        bag_options,
    };
    submit_and_record(&mut context, &request, &author, state, &state_file)
}

/// Submit, print the outcome, and persist the started run.
pub(crate) fn submit_and_record(
    context: &mut SubmissionContext,
    request: &SubmissionRequest,
    author: &AuthorEmail,
    mut state: ClientState,
    state_file: &Path,
) -> Result<bool> {
    match context.submit(request)? {
        SubmissionOutcome::Started { flow_run, message } => {
            if author.save {
                state.author_email = Some(author.address.clone());
            }
            state.service_instance = Some(context.service_instance().to_string());
            state.flow_id = Some(flow_run.flow_id);
            state.flow_instance_id = Some(flow_run.flow_instance_id);
            write_state(state_file, &state)?;
            tracing::debug!(path = %state_file.display(), "state saved");
            println!("{message}");
            Ok(true)
        }
        SubmissionOutcome::DryRun { message } => {
            println!("{message}");
            Ok(true)
        }
        SubmissionOutcome::Rejected { error } => {
            eprintln!("Error during Flow startup: {error}");
            Ok(false)
        }
    }
}

/// Decide which email to submit under, prompting when needed.
///
/// A supplied email always wins; the submitter is only asked about saving it
/// when it differs from a saved one. With no email at all, the submitter is
/// asked for one.
pub fn resolve_author_email(
    supplied: Option<&str>,
    saved: Option<&str>,
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> Result<AuthorEmail> {
    match (supplied, saved) {
        (Some(address), Some(saved)) if address != saved => {
            let save = confirm(
                &format!(
                    "Would you like to save '{address}' as your default email \
                     (instead of '{saved}')? y/n: "
                ),
                input,
                output,
            )?;
            Ok(AuthorEmail {
                address: address.to_string(),
                save,
            })
        }
        (Some(address), _) => Ok(AuthorEmail {
            address: address.to_string(),
            save: false,
        }),
        (None, Some(saved)) => {
            writeln!(output, "Using saved email '{saved}'")?;
            Ok(AuthorEmail {
                address: saved.to_string(),
                save: false,
            })
        }
        (None, None) => {
            let address = prompt(
                "Please enter your email address for curation and updates: ",
                input,
                output,
            )?;
            if address.is_empty() {
                return Err(anyhow!("an author email is required to submit"));
            }
            let save = confirm(
                &format!(
                    "Thank you. Would you like to save '{address}' for future submissions? y/n: "
                ),
                input,
                output,
            )?;
            Ok(AuthorEmail { address, save })
        }
    }
}

fn prompt(question: &str, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<String> {
    write!(output, "{question}")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line).context("read answer")?;
    Ok(line.trim().to_string())
}

fn confirm(question: &str, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<bool> {
    let answer = prompt(question, input, output)?.to_lowercase();
    Ok(matches!(answer.as_str(), "y" | "yes"))
}

fn load_json(path: &Path) -> Result<Value> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}
