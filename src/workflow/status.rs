//! The `cfde status` command.
use crate::auth::LoginOptions;
use crate::cli::StatusArgs;
use crate::error::SubmitError;
use crate::flows::FlowRun;
use crate::settings::{ClientSettings, DEFAULT_SERVICE_INSTANCE};
use crate::state::{load_state, ClientState};
use crate::status::{pretty_json, StatusView};
use crate::workflow::context::SubmissionContext;
use anyhow::Result;

pub fn run_status(args: &StatusArgs) -> Result<bool> {
    let settings = ClientSettings::from_env()?;
    let needs_state = args.flow_id.is_none()
        || args.flow_instance_id.is_none()
        || args.service_instance.is_none();
    let state = if needs_state {
        let path = args
            .client_state_file
            .clone()
            .unwrap_or_else(|| settings.state_file.clone());
        load_state(&path)?
    } else {
        None
    };

    let run = flow_run_for(
        args.flow_id.as_deref(),
        args.flow_instance_id.as_deref(),
        state.as_ref(),
    )
    .ok_or(SubmitError::NoFlowRun)?;
    let service_instance = args
        .service_instance
        .clone()
        .or_else(|| state.and_then(|state| state.service_instance))
        .unwrap_or_else(|| DEFAULT_SERVICE_INSTANCE.to_string());

    let options = LoginOptions {
        refresh_tokens: true,
        ..LoginOptions::default()
    };
    let context = SubmissionContext::login(settings, &service_instance, options)?;
    match context.check_status(Some(&run), args.raw)? {
        StatusView::Raw(document) => println!("{}", pretty_json(&document)),
        StatusView::Report(report) => println!("{}", report.message),
    }
    Ok(true)
}

/// Ids from flags, each falling back to the saved state.
fn flow_run_for(
    flow_id: Option<&str>,
    flow_instance_id: Option<&str>,
    state: Option<&ClientState>,
) -> Option<FlowRun> {
    let flow_id = flow_id
        .map(str::to_string)
        .or_else(|| state.and_then(|state| state.flow_id.clone()))
        .filter(|id| !id.is_empty())?;
    let flow_instance_id = flow_instance_id
        .map(str::to_string)
        .or_else(|| state.and_then(|state| state.flow_instance_id.clone()))
        .filter(|id| !id.is_empty())?;
    Some(FlowRun {
        flow_id,
        flow_instance_id,
    })
}
