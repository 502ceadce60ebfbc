//! Remote configuration published next to the ingest pipeline.
//!
//! The document is fetched once per process and treated as read-only. It names
//! the known catalogs, the flow to run for each deployment instance, and the
//! oldest client allowed to submit.
use crate::error::SubmitError;
use crate::http;
use crate::settings::Destination;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use ureq::Agent;

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Catalog key to schema reference.
    #[serde(rename = "CATALOGS", default)]
    pub catalogs: BTreeMap<String, String>,
    /// Deployment instance to flow definition.
    #[serde(rename = "FLOWS", default)]
    pub flows: BTreeMap<String, FlowInfo>,
    #[serde(rename = "MIN_VERSION")]
    pub min_version: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FlowInfo {
    pub flow_id: String,
    pub success_step: String,
    pub failure_step: String,
    pub error_step: String,
    #[serde(default)]
    pub cfde_ep_id: Option<String>,
    #[serde(default)]
    pub cfde_ep_path: Option<String>,
    #[serde(default)]
    pub cfde_ep_url: Option<String>,
}

impl FlowInfo {
    /// Destination for this instance, falling back to `default` per field.
    pub fn destination(&self, default: &Destination) -> Destination {
        Destination {
            endpoint_id: self
                .cfde_ep_id
                .clone()
                .unwrap_or_else(|| default.endpoint_id.clone()),
            path: self
                .cfde_ep_path
                .clone()
                .unwrap_or_else(|| default.path.clone()),
            url: self
                .cfde_ep_url
                .clone()
                .unwrap_or_else(|| default.url.clone()),
        }
    }
}

impl RemoteConfig {
    pub fn flow_info(&self, service_instance: &str) -> Result<&FlowInfo, SubmitError> {
        self.flows
            .get(service_instance)
            .ok_or_else(|| SubmitError::UnknownServiceInstance(service_instance.to_string()))
    }

    /// Fail unless `client_version` is at least the published minimum.
    pub fn check_client_version(&self, client_version: &str) -> Result<(), SubmitError> {
        if Version::parse(&self.min_version) > Version::parse(client_version) {
            return Err(SubmitError::OutdatedVersion {
                client: client_version.to_string(),
                required: self.min_version.clone(),
            });
        }
        Ok(())
    }
}

pub fn fetch_remote_config(agent: &Agent, url: &str) -> Result<RemoteConfig> {
    tracing::debug!(url, "fetching remote config");
    let mut response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch remote config from {url}"))?;
    let status = response.status().as_u16();
    if status >= 300 {
        return Err(SubmitError::ConfigUnavailable {
            status,
            body: http::body_text(&mut response),
        }
        .into());
    }
    let config: RemoteConfig = response
        .body_mut()
        .read_json()
        .context("parse remote config JSON")?;
    tracing::debug!(
        catalogs = config.catalogs.len(),
        flows = config.flows.len(),
        min_version = %config.min_version,
        "remote config loaded"
    );
    Ok(config)
}

/// Dot-separated version compared numerically by component.
///
/// Missing components count as zero. A component with anything after its
/// leading digits is a pre-release of that number, so `0.0.4rc1` sorts
/// above `0.0.3` but below `0.0.4`.
#[derive(Debug, Clone)]
pub struct Version(Vec<Component>);

/// Leading number, and whether the component is bare (no suffix).
type Component = (u64, bool);

impl Version {
    pub fn parse(text: &str) -> Self {
        let parts = text
            .trim()
            .trim_start_matches('v')
            .split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                let release = digits.len() == part.len();
                (digits.parse().unwrap_or(0), release)
            })
            .collect();
        Self(parts)
    }

    fn component(&self, index: usize) -> Component {
        self.0.get(index).copied().unwrap_or((0, true))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn config_with_min(min_version: &str) -> RemoteConfig {
        RemoteConfig {
            catalogs: BTreeMap::new(),
            flows: BTreeMap::new(),
            min_version: min_version.to_string(),
        }
    }

    #[test]
    fn versions_compare_by_component_not_by_string() {
        assert!(Version::parse("0.0.10") > Version::parse("0.0.9"));
        assert!(Version::parse("1.2") == Version::parse("1.2.0"));
        assert!(Version::parse("v2.0.0") > Version::parse("1.99.99"));
    }

    #[test]
    fn suffixed_component_sorts_before_its_release() {
        assert!(Version::parse("0.0.4rc1") < Version::parse("0.0.4"));
        assert!(Version::parse("0.0.4rc1") > Version::parse("0.0.3"));
        assert!(Version::parse("0.0.4rc1") < Version::parse("0.0.4.0"));

        let err = config_with_min("0.0.4")
            .check_client_version("0.0.4rc1")
            .expect_err("pre-release is below the release");
        assert!(matches!(err, SubmitError::OutdatedVersion { .. }));
        config_with_min("0.0.4rc1")
            .check_client_version("0.0.4")
            .expect("release meets a pre-release minimum");
    }

    #[test]
    fn outdated_client_is_rejected() {
        let config = config_with_min("0.0.4");
        let err = config
            .check_client_version("0.0.1")
            .expect_err("0.0.1 is below 0.0.4");
        assert!(matches!(err, SubmitError::OutdatedVersion { .. }));
        config
            .check_client_version("0.0.4")
            .expect("equal version is allowed");
        config
            .check_client_version("0.1.0")
            .expect("newer version is allowed");
    }

    #[test]
    fn flow_destination_overrides_defaults_per_field() {
        let info = FlowInfo {
            flow_id: "flow".to_string(),
            success_step: "SuccessState".to_string(),
            failure_step: "FailureState".to_string(),
            error_step: "ErrorState".to_string(),
            cfde_ep_id: Some("ep-dev".to_string()),
            cfde_ep_path: None,
            cfde_ep_url: None,
        };
        let default = Destination {
            endpoint_id: "ep-prod".to_string(),
            path: "/data/".to_string(),
            url: "https://prod".to_string(),
        };
        let dest = info.destination(&default);
        assert_eq!(dest.endpoint_id, "ep-dev");
        assert_eq!(dest.path, "/data/");
        assert_eq!(dest.url, "https://prod");
    }

    #[test]
    fn fetch_parses_config_and_selects_instance() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/config.json");
            then.status(200).json_body(json!({
                "CATALOGS": {"prod": "https://schemas/prod.json"},
                "FLOWS": {"prod": {
                    "flow_id": "flow-1",
                    "success_step": "SuccessState",
                    "failure_step": "FailureState",
                    "error_step": "ErrorState"
                }},
                "MIN_VERSION": "0.0.4"
            }));
        });

        let config = fetch_remote_config(&http::agent(), &server.url("/config.json"))
            .expect("fetch config");
        assert_eq!(config.flow_info("prod").expect("prod flow").flow_id, "flow-1");
        let err = config.flow_info("staging").expect_err("staging missing");
        assert!(matches!(err, SubmitError::UnknownServiceInstance(name) if name == "staging"));
    }

    #[test]
    fn fetch_surfaces_http_failures() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/config.json");
            then.status(503).body("maintenance");
        });

        let err = fetch_remote_config(&http::agent(), &server.url("/config.json"))
            .expect_err("503 is fatal");
        assert!(matches!(
            err.downcast_ref::<SubmitError>(),
            Some(SubmitError::ConfigUnavailable { status: 503, body }) if body == "maintenance"
        ));
    }
}
