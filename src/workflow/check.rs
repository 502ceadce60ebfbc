//! The `cfde check` command: log in, pass the version gate, reach the flow.
use crate::auth::LoginOptions;
use crate::cli::CheckArgs;
use crate::settings::{ClientSettings, DEFAULT_SERVICE_INSTANCE};
use crate::workflow::context::SubmissionContext;
use anyhow::Result;

pub fn run_check(args: &CheckArgs) -> Result<bool> {
    let settings = ClientSettings::from_env()?;
    let service_instance = args
        .service_instance
        .as_deref()
        .unwrap_or(DEFAULT_SERVICE_INSTANCE);
    let options = LoginOptions {
        refresh_tokens: true,
        ..LoginOptions::default()
    };
    let context = SubmissionContext::login(settings, service_instance, options)?;
    println!("{}", context.check()?);
    Ok(true)
}
