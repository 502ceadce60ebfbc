//! Workflow-engine boundary and flow start.
//!
//! The engine is reached over its REST API. Each flow declares its own auth
//! scope; runs and status queries use the token for that scope when the login
//! produced one and fall back to the manage-flows token otherwise.
use crate::auth::TokenSet;
use crate::error::{FlowsError, SubmitError};
use crate::http::{self, Headers, AUTHORIZATION};
use crate::settings::MANAGE_FLOWS_SCOPE;
use crate::transfer::TransportPlan;
use crate::util::now_unix_secs;
use anyhow::{Context, Result};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use ureq::Agent;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FlowDefinition {
    pub globus_auth_scope: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FlowAction {
    pub action_id: String,
}

/// The calls this client makes against the workflow engine.
pub trait FlowsApi {
    fn get_flow(&self, flow_id: &str) -> Result<FlowDefinition, FlowsError>;

    fn run_flow(&self, flow_id: &str, scope: &str, input: &Value)
        -> Result<FlowAction, FlowsError>;

    /// Raw status document: `{ status, details, ... }`.
    fn flow_action_status(
        &self,
        flow_id: &str,
        scope: &str,
        action_id: &str,
    ) -> Result<Value, FlowsError>;
}

pub struct FlowsClient {
    agent: Agent,
    base_url: String,
    tokens: TokenSet,
}

impl FlowsClient {
    pub fn new(agent: Agent, base_url: &str, tokens: TokenSet) -> Self {
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn headers_for(&self, scope: &str) -> Result<Headers, FlowsError> {
        let token = self
            .tokens
            .get(scope)
            .or_else(|| self.tokens.get(MANAGE_FLOWS_SCOPE))
            .ok_or_else(|| FlowsError::MissingToken(scope.to_string()))?;
        Ok(Headers::from([(
            AUTHORIZATION.to_string(),
            http::bearer(&token.access_token),
        )]))
    }

    fn read<T: DeserializeOwned>(
        method: &str,
        url: &str,
        mut response: ureq::http::Response<ureq::Body>,
    ) -> Result<T, FlowsError> {
        let status = response.status().as_u16();
        tracing::debug!(method, url, status, "flows request");
        if status >= 300 {
            return Err(FlowsError::Status {
                status,
                body: http::body_text(&mut response),
            });
        }
        response
            .body_mut()
            .read_json()
            .map_err(|err| FlowsError::Decode(err.to_string()))
    }
}

impl FlowsApi for FlowsClient {
    fn get_flow(&self, flow_id: &str) -> Result<FlowDefinition, FlowsError> {
        let url = format!("{}/flows/{flow_id}", self.base_url);
        let headers = self.headers_for(MANAGE_FLOWS_SCOPE)?;
        let response = http::with_headers(self.agent.get(&url), &headers).call()?;
        Self::read("GET", &url, response)
    }

    fn run_flow(
        &self,
        flow_id: &str,
        scope: &str,
        input: &Value,
    ) -> Result<FlowAction, FlowsError> {
        let url = format!("{}/flows/{flow_id}/run", self.base_url);
        let headers = self.headers_for(scope)?;
        let response = http::with_headers(self.agent.post(&url), &headers)
            .send_json(json!({ "body": input }))?;
        Self::read("POST", &url, response)
    }

    fn flow_action_status(
        &self,
        flow_id: &str,
        scope: &str,
        action_id: &str,
    ) -> Result<Value, FlowsError> {
        let url = format!("{}/flows/{flow_id}/{action_id}/status", self.base_url);
        let headers = self.headers_for(scope)?;
        let response = http::with_headers(self.agent.get(&url), &headers).call()?;
        Self::read("GET", &url, response)
    }
}

/// Identity of a started run; the only thing persisted between invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRun {
    pub flow_id: String,
    pub flow_instance_id: String,
}

/// Submission fields copied into every flow input.
#[derive(Debug, Clone, Default)]
pub struct FlowParams<'a> {
    pub author_email: &'a str,
    pub catalog_id: Option<&'a str>,
    pub server: Option<&'a str>,
    pub dataset_acls: Option<&'a Value>,
}

pub struct FlowInvoker<'a> {
    api: &'a dyn FlowsApi,
}

impl<'a> FlowInvoker<'a> {
    pub fn new(api: &'a dyn FlowsApi) -> Self {
        Self { api }
    }

    /// Look up the flow's scope and start a run for a delivered archive.
    pub fn start(
        &self,
        flow_id: &str,
        delivered: &TransportPlan,
        params: &FlowParams<'_>,
    ) -> Result<FlowRun> {
        let definition = self
            .api
            .get_flow(flow_id)
            .map_err(|err| access_error(flow_id, err))
            .with_context(|| format!("look up flow {flow_id}"))?;
        let input = flow_input(delivered, params, &task_id()?);
        tracing::debug!(flow_id, transport = delivered.label(), "starting flow");
        let action = self
            .api
            .run_flow(flow_id, &definition.globus_auth_scope, &input)
            .map_err(|err| access_error(flow_id, err))
            .with_context(|| format!("start flow {flow_id}"))?;
        tracing::info!(flow_id, flow_instance_id = %action.action_id, "flow started");
        Ok(FlowRun {
            flow_id: flow_id.to_string(),
            flow_instance_id: action.action_id,
        })
    }
}

/// Missing flows and missing group membership get the remediation message.
pub fn access_error(flow_id: &str, err: FlowsError) -> anyhow::Error {
    if err.is_access_denied() {
        SubmitError::AccessDenied {
            flow_id: flow_id.to_string(),
            detail: err.to_string(),
        }
        .into()
    } else {
        err.into()
    }
}

/// Flow input for a delivered archive. Shape depends on the transport.
pub fn flow_input(delivered: &TransportPlan, params: &FlowParams<'_>, task_id: &str) -> Value {
    let mut input = Map::new();
    match delivered {
        TransportPlan::ManagedTransfer {
            source_endpoint,
            source_path,
            destination_path,
        } => {
            input.insert("source_endpoint_id".into(), json!(source_endpoint));
            input.insert("source_path".into(), json!(source_path));
            input.insert("fair_re_path".into(), json!(destination_path));
            input.insert("is_directory".into(), json!(false));
        }
        TransportPlan::DirectUpload { destination_url } => {
            input.insert("source_endpoint_id".into(), json!(false));
            input.insert("data_url".into(), json!(destination_url));
        }
    }
    input.insert(
        "final_acls".into(),
        params.dataset_acls.cloned().unwrap_or(Value::Null),
    );
    input.insert("author_email".into(), json!(params.author_email));
    if let Some(catalog) = params.catalog_id.filter(|c| !c.is_empty()) {
        input.insert("catalog_id".into(), json!(catalog));
    }
    if let Some(server) = params.server.filter(|s| !s.is_empty()) {
        input.insert("server".into(), json!(server));
    }
    input.insert("task_id".into(), json!(task_id));
    Value::Object(input)
}

/// `<unix seconds>X<0..99>`: unlikely to repeat within a second, not unique.
pub fn task_id() -> Result<String> {
    let suffix: u32 = rand::rng().random_range(0..100);
    Ok(format!("{}X{suffix}", now_unix_secs()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Token;
    use httpmock::prelude::*;
    use std::cell::RefCell;

    /// In-memory engine: canned responses, records run inputs.
    #[derive(Default)]
    struct FakeFlows {
        get_status: Option<u16>,
        run_status: Option<u16>,
        runs: RefCell<Vec<(String, Value)>>,
    }

    impl FlowsApi for FakeFlows {
        fn get_flow(&self, _flow_id: &str) -> Result<FlowDefinition, FlowsError> {
            if let Some(status) = self.get_status {
                return Err(FlowsError::Status {
                    status,
                    body: String::new(),
                });
            }
            Ok(FlowDefinition {
                globus_auth_scope: "flow-scope".to_string(),
                title: "Ingest".to_string(),
            })
        }

        fn run_flow(
            &self,
            _flow_id: &str,
            scope: &str,
            input: &Value,
        ) -> Result<FlowAction, FlowsError> {
            if let Some(status) = self.run_status {
                return Err(FlowsError::Status {
                    status,
                    body: "denied".to_string(),
                });
            }
            self.runs
                .borrow_mut()
                .push((scope.to_string(), input.clone()));
            Ok(FlowAction {
                action_id: "action-1".to_string(),
            })
        }

        fn flow_action_status(
            &self,
            _flow_id: &str,
            _scope: &str,
            _action_id: &str,
        ) -> Result<Value, FlowsError> {
            Ok(json!({"status": "ACTIVE"}))
        }
    }

    fn direct() -> TransportPlan {
        TransportPlan::DirectUpload {
            destination_url: "https://ingest/data/dataset.zip".to_string(),
        }
    }

    #[test]
    fn managed_transfer_input_names_source_and_destination() {
        let plan = TransportPlan::ManagedTransfer {
            source_endpoint: "gcp-1".to_string(),
            source_path: "/home/u/dataset.zip".to_string(),
            destination_path: "/public/CFDE/metadata/dataset.zip".to_string(),
        };
        let params = FlowParams {
            author_email: "a@example.org",
            catalog_id: Some("1234"),
            ..FlowParams::default()
        };
        let input = flow_input(&plan, &params, "1X1");
        assert_eq!(
            input,
            json!({
                "source_endpoint_id": "gcp-1",
                "source_path": "/home/u/dataset.zip",
                "fair_re_path": "/public/CFDE/metadata/dataset.zip",
                "is_directory": false,
                "final_acls": null,
                "author_email": "a@example.org",
                "catalog_id": "1234",
                "task_id": "1X1"
            })
        );
    }

    #[test]
    fn direct_upload_input_carries_url_and_server() {
        let acls = json!({"owner": ["group-a"]});
        let params = FlowParams {
            author_email: "a@example.org",
            server: Some("demo.example.org"),
            dataset_acls: Some(&acls),
            ..FlowParams::default()
        };
        let input = flow_input(&direct(), &params, "1X1");
        assert_eq!(input["source_endpoint_id"], json!(false));
        assert_eq!(input["data_url"], "https://ingest/data/dataset.zip");
        assert_eq!(input["server"], "demo.example.org");
        assert_eq!(input["final_acls"], acls);
        assert!(input.get("catalog_id").is_none());
        assert!(input.get("source_path").is_none());
    }

    #[test]
    fn task_id_is_seconds_and_small_suffix() {
        let id = task_id().expect("task id");
        let (secs, suffix) = id.split_once('X').expect("separator");
        assert!(secs.parse::<u64>().expect("seconds") > 0);
        assert!(suffix.parse::<u32>().expect("suffix") < 100);
    }

    #[test]
    fn start_runs_with_the_flow_scope() {
        let api = FakeFlows::default();
        let run = FlowInvoker::new(&api)
            .start(
                "flow-1",
                &direct(),
                &FlowParams {
                    author_email: "a@example.org",
                    ..FlowParams::default()
                },
            )
            .expect("start");
        assert_eq!(
            run,
            FlowRun {
                flow_id: "flow-1".to_string(),
                flow_instance_id: "action-1".to_string()
            }
        );
        let runs = api.runs.borrow();
        assert_eq!(runs[0].0, "flow-scope");
        assert_eq!(runs[0].1["author_email"], "a@example.org");
    }

    #[test]
    fn missing_flow_is_access_denied_other_errors_propagate() {
        let params = FlowParams::default();
        for (api, denied) in [
            (
                FakeFlows {
                    get_status: Some(404),
                    ..FakeFlows::default()
                },
                true,
            ),
            (
                FakeFlows {
                    run_status: Some(403),
                    ..FakeFlows::default()
                },
                true,
            ),
            (
                FakeFlows {
                    run_status: Some(500),
                    ..FakeFlows::default()
                },
                false,
            ),
        ] {
            let err = FlowInvoker::new(&api)
                .start("flow-1", &direct(), &params)
                .expect_err("start fails");
            let access = matches!(
                crate::error::find_submit_error(&err),
                Some(SubmitError::AccessDenied { .. })
            );
            assert_eq!(access, denied, "{err:#}");
            if !denied {
                let cause = err
                    .chain()
                    .find_map(|cause| cause.downcast_ref::<FlowsError>());
                assert!(matches!(cause, Some(FlowsError::Status { status: 500, .. })));
            }
        }
    }

    #[test]
    fn client_speaks_the_flows_rest_api() {
        let server = MockServer::start();
        let get = server.mock(|when, then| {
            when.method(GET)
                .path("/flows/flow-1")
                .header("Authorization", "Bearer manage");
            then.status(200)
                .json_body(json!({"globus_auth_scope": "flow-scope", "title": "Ingest"}));
        });
        let run = server.mock(|when, then| {
            when.method(POST)
                .path("/flows/flow-1/run")
                .header("Authorization", "Bearer scoped")
                .json_body(json!({"body": {"author_email": "a@example.org"}}));
            then.status(201).json_body(json!({"action_id": "action-9"}));
        });
        let status = server.mock(|when, then| {
            when.method(GET)
                .path("/flows/flow-1/action-9/status")
                .header("Authorization", "Bearer scoped");
            then.status(200)
                .json_body(json!({"status": "ACTIVE", "details": {}}));
        });
        let token = |access: &str| Token {
            access_token: access.to_string(),
            refresh_token: None,
            expires_at_seconds: None,
        };
        let tokens = TokenSet::from([
            (MANAGE_FLOWS_SCOPE.to_string(), token("manage")),
            ("flow-scope".to_string(), token("scoped")),
        ]);
        let client = FlowsClient::new(http::agent(), &server.base_url(), tokens);

        let definition = client.get_flow("flow-1").expect("get flow");
        assert_eq!(definition.title, "Ingest");
        let action = client
            .run_flow(
                "flow-1",
                &definition.globus_auth_scope,
                &json!({"author_email": "a@example.org"}),
            )
            .expect("run flow");
        assert_eq!(action.action_id, "action-9");
        let raw = client
            .flow_action_status("flow-1", "flow-scope", "action-9")
            .expect("status");
        assert_eq!(raw["status"], "ACTIVE");
        get.assert();
        run.assert();
        status.assert();
    }

    #[test]
    fn client_reports_http_status_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/flows/flow-1");
            then.status(404).body("not found");
        });
        let tokens = TokenSet::from([(
            MANAGE_FLOWS_SCOPE.to_string(),
            Token {
                access_token: "manage".to_string(),
                refresh_token: None,
                expires_at_seconds: None,
            },
        )]);
        let client = FlowsClient::new(http::agent(), &server.base_url(), tokens);
        let err = client.get_flow("flow-1").expect_err("missing flow");
        assert!(err.is_access_denied());
    }
}
