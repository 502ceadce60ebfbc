//! Translate workflow-engine status into something a submitter can read.
//!
//! The engine's status document is loosely structured and changes over time,
//! so every nested lookup here is optional. Translation is pure: the same
//! document always yields the same report.
//!
//! Phase mapping:
//! - `ACTIVE` -> Active
//! - `INACTIVE` -> Stalled (the engine stopped, not the ingest)
//! - `SUCCEEDED` -> Succeeded, with the outcome read from whichever of the
//!   success, failure, or error step outputs is present
//! - `FAILED` -> Failed, with the embedded cause pretty-printed when it parses
//!
//! A succeeded run only means the engine finished. The ingest outcome is in
//! the step output, and a run with none of the three steps is an anomaly.
use crate::error::FlowsError;
use crate::flows::{access_error, FlowRun, FlowsApi};
use crate::remote::FlowInfo;
use anyhow::{Context, Result};
use serde::ser::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Active,
    Stalled,
    Succeeded,
    Failed,
}

/// Which terminal step a succeeded run reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStep {
    Success,
    Failure,
    Error,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub phase: Phase,
    pub current_step: Option<String>,
    pub cause: Option<String>,
    pub final_step: Option<FinalStep>,
    /// Full human-readable status, ready to print.
    pub message: String,
}

/// Result of a status query: a report, or the raw document plus its rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusView {
    Report(StatusReport),
    Raw(Value),
}

pub struct StatusTranslator<'a> {
    api: &'a dyn FlowsApi,
    flow_info: &'a FlowInfo,
}

impl<'a> StatusTranslator<'a> {
    pub fn new(api: &'a dyn FlowsApi, flow_info: &'a FlowInfo) -> Self {
        Self { api, flow_info }
    }

    pub fn report(&self, run: &FlowRun, raw: bool) -> Result<StatusView> {
        let definition = self
            .api
            .get_flow(&run.flow_id)
            .map_err(|err| access_error(&run.flow_id, err))
            .with_context(|| format!("look up flow {}", run.flow_id))?;
        let document = self
            .api
            .flow_action_status(
                &run.flow_id,
                &definition.globus_auth_scope,
                &run.flow_instance_id,
            )
            .map_err(|err: FlowsError| access_error(&run.flow_id, err))
            .with_context(|| format!("query status of {}", run.flow_instance_id))?;

        let report = translate(
            &definition.title,
            &run.flow_instance_id,
            &document,
            self.flow_info,
        );
        tracing::debug!(
            flow_id = %run.flow_id,
            flow_instance_id = %run.flow_instance_id,
            phase = ?report.phase,
            current_step = ?report.current_step,
            final_step = ?report.final_step,
            has_cause = report.cause.is_some(),
            "status translated"
        );
        if raw {
            return Ok(StatusView::Raw(json!({
                "success": true,
                "status": document,
                "clean_status": report.message,
            })));
        }
        Ok(StatusView::Report(report))
    }
}

/// Derive a report from a raw status document.
pub fn translate(
    title: &str,
    flow_instance_id: &str,
    document: &Value,
    flow_info: &FlowInfo,
) -> StatusReport {
    let raw_status = document.get("status").and_then(Value::as_str).unwrap_or("");
    let inner = document.get("details").and_then(|d| d.get("details"));
    let current_step = inner
        .and_then(|d| d.get("state_name"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let cause = inner
        .and_then(|d| d.get("cause"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(pretty_cause);

    let mut message = format!("\nStatus of {title} (instance {flow_instance_id})\n");
    let phase = match raw_status {
        "ACTIVE" => {
            message.push_str("This Flow is still in progress.\n");
            Phase::Active
        }
        "INACTIVE" => {
            message.push_str("This Flow has stalled, and may need help to resume.\n");
            Phase::Stalled
        }
        "SUCCEEDED" => {
            message.push_str("This Flow has completed.\n");
            Phase::Succeeded
        }
        "FAILED" => {
            message.push_str("This Flow has failed.\n");
            Phase::Failed
        }
        other => {
            message.push_str(&format!(
                "This Flow reported an unrecognized status '{other}'.\n"
            ));
            Phase::Active
        }
    };
    if let Some(step) = &current_step {
        message.push_str(&format!("Current Flow Step: {step}\n"));
    }
    if let Some(cause) = &cause {
        message.push_str(&format!("Error: {cause}\n"));
    }

    let mut final_step = None;
    match phase {
        Phase::Succeeded => {
            let (step, text) = final_outcome(document, flow_info);
            final_step = Some(step);
            message.push_str(&text);
        }
        Phase::Failed => {
            if cause.is_some() {
                message.push_str("Submission Flow failed.");
            } else {
                let details = match document.get("details") {
                    Some(details) => pretty_json(details),
                    None => "No details available".to_string(),
                };
                message.push_str(&format!("Submission Flow failed: {details}"));
            }
        }
        Phase::Active | Phase::Stalled => {}
    }
    message.push('\n');

    StatusReport {
        phase,
        current_step,
        cause,
        final_step,
        message,
    }
}

fn final_outcome(document: &Value, flow_info: &FlowInfo) -> (FinalStep, String) {
    let output = document.get("details").and_then(|d| d.get("output"));
    let step_output = |name: &str| output.and_then(|o| o.get(name));

    let candidates = [
        (FinalStep::Success, &flow_info.success_step, "message"),
        (FinalStep::Failure, &flow_info.failure_step, "error"),
        (FinalStep::Error, &flow_info.error_step, "error"),
    ];
    for (step, name, field) in candidates {
        if let Some(entry) = step_output(name.as_str()) {
            let text = entry
                .get("details")
                .and_then(|d| d.get(field))
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => pretty_json(other),
                })
                .unwrap_or_else(|| pretty_json(entry));
            return (step, text);
        }
    }
    (
        FinalStep::Missing,
        "Submission errored: The Flow has finished, but no final details are available."
            .to_string(),
    )
}

/// Split `"<message> '{...}'"` and pretty-print the user state it carries.
///
/// Bookkeeping keys (`prevars`, `vars`) are dropped. Anything that does not
/// parse is returned unchanged.
pub fn pretty_cause(cause: &str) -> String {
    let Some((text, blob)) = cause.split_once(" '{") else {
        return cause.to_string();
    };
    let blob = format!("{{{}", blob.trim_matches('\''));
    let Ok(parsed) = serde_json::from_str::<Value>(&blob) else {
        return cause.to_string();
    };
    let Some(Value::Object(state)) = parsed.get("UserState") else {
        return cause.to_string();
    };
    let mut state = state.clone();
    state.remove("prevars");
    state.remove("vars");
    format!("{text}\n{}", pretty_json(&Value::Object(state)))
}

/// Four-space indented JSON with keys sorted at every level.
pub fn pretty_json(value: &Value) -> String {
    let sorted = sort_keys(value);
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    if sorted.serialize(&mut serializer).is_err() {
        return value.to_string();
    }
    String::from_utf8(out).unwrap_or_else(|_| value.to_string())
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sort_keys(v))).collect();
            let mut out = Map::new();
            for (key, value) in sorted {
                out.insert(key.clone(), value);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
