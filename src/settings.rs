//! Compiled-in client settings.
//!
//! Everything that identifies the CFDE deployment lives here so the rest of
//! the pipeline only sees typed values. Each value resolves in priority order:
//! explicit flag, environment variable, compiled default.
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Native-app client registered with Globus Auth.
pub const CLIENT_ID: &str = "417301b1-5101-456a-8a27-423e71a2ae26";
pub const APP_NAME: &str = "CfdeClient";

pub const DEFAULT_SERVICE_INSTANCE: &str = "prod";

const PROD_CONFIG_URL: &str =
    "https://g-13bbb9.aa98d.08cc.data.globus.org/CFDE/cfde_client_config.json";
const FLOWS_BASE_URL: &str = "https://flows.automate.globus.org";
const AUTH_TOKEN_URL: &str = "https://auth.globus.org/v2/oauth2/token";

pub const HTTPS_SCOPE: &str =
    "https://auth.globus.org/scopes/0e57d793-f1ac-4eeb-a30f-643b082d68ec/https";
pub const MANAGE_FLOWS_SCOPE: &str =
    "https://auth.globus.org/scopes/eec9b274-0c81-4334-bdc2-54e90e689b9a/manage_flows";
pub const VIEW_FLOWS_SCOPE: &str =
    "https://auth.globus.org/scopes/eec9b274-0c81-4334-bdc2-54e90e689b9a/view_flows";
pub const RUN_STATUS_SCOPE: &str =
    "https://auth.globus.org/scopes/eec9b274-0c81-4334-bdc2-54e90e689b9a/run_status";

const DEFAULT_ENDPOINT_ID: &str = "0e57d793-f1ac-4eeb-a30f-643b082d68ec";
const DEFAULT_ENDPOINT_PATH: &str = "/public/CFDE/metadata/";
const DEFAULT_ENDPOINT_URL: &str = "https://317ec.36fe.dn.glob.us";

const STATE_FILE_NAME: &str = ".cfde_client.json";
const TOKEN_FILE_NAME: &str = ".cfde_client_tokens.json";

pub const ENV_CONFIG_URL: &str = "CFDE_CONFIG_URL";
pub const ENV_FLOWS_URL: &str = "CFDE_FLOWS_URL";
pub const ENV_TOKEN_FILE: &str = "CFDE_TOKEN_FILE";
pub const ENV_STATE_FILE: &str = "CFDE_STATE_FILE";

/// Where archives land on the ingest side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub endpoint_id: String,
    /// Directory on the endpoint, with a trailing slash.
    pub path: String,
    /// HTTPS base URL of the endpoint.
    pub url: String,
}

impl Destination {
    /// Path of an archive on the destination endpoint.
    pub fn path_for(&self, file_name: &str) -> String {
        format!("{}{}", self.path, file_name)
    }

    /// HTTPS URL of an archive on the destination endpoint.
    pub fn url_for(&self, file_name: &str) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), self.path_for(file_name))
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub client_version: String,
    pub config_urls: BTreeMap<String, String>,
    pub flows_url: String,
    pub token_url: String,
    pub token_file: PathBuf,
    pub state_file: PathBuf,
    pub destination: Destination,
}

impl ClientSettings {
    /// Compiled defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
        let mut config_urls = BTreeMap::from([
            ("prod".to_string(), PROD_CONFIG_URL.to_string()),
            ("staging".to_string(), String::new()),
            ("dev".to_string(), String::new()),
        ]);
        if let Some(url) = env_override(ENV_CONFIG_URL) {
            for value in config_urls.values_mut() {
                *value = url.clone();
            }
        }
        Ok(Self {
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            config_urls,
            flows_url: env_override(ENV_FLOWS_URL).unwrap_or_else(|| FLOWS_BASE_URL.to_string()),
            token_url: AUTH_TOKEN_URL.to_string(),
            token_file: env_override(ENV_TOKEN_FILE)
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(TOKEN_FILE_NAME)),
            state_file: env_override(ENV_STATE_FILE)
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(STATE_FILE_NAME)),
            destination: Destination {
                endpoint_id: DEFAULT_ENDPOINT_ID.to_string(),
                path: DEFAULT_ENDPOINT_PATH.to_string(),
                url: DEFAULT_ENDPOINT_URL.to_string(),
            },
        })
    }

    /// Remote-config URL for a service instance.
    pub fn config_url(&self, service_instance: &str) -> Result<&str> {
        match self.config_urls.get(service_instance).map(String::as_str) {
            Some(url) if !url.trim().is_empty() => Ok(url),
            Some(_) => Err(anyhow!(
                "no configuration URL is published for service instance '{service_instance}' \
                 (set {ENV_CONFIG_URL} to override)"
            )),
            None => Err(anyhow!("unknown service instance '{service_instance}'")),
        }
    }

    /// Scopes requested at login: the flows scopes plus the upload scope.
    pub fn login_scopes(&self) -> Vec<&'static str> {
        vec![
            MANAGE_FLOWS_SCOPE,
            VIEW_FLOWS_SCOPE,
            RUN_STATUS_SCOPE,
            HTTPS_SCOPE,
        ]
    }
}

#[cfg(test)]
impl ClientSettings {
    /// Settings pointing every remote at `base_url` and every file under `dir`.
    pub fn for_tests(base_url: &str, dir: &std::path::Path) -> Self {
        Self {
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            config_urls: BTreeMap::from([(
                DEFAULT_SERVICE_INSTANCE.to_string(),
                format!("{base_url}/config.json"),
            )]),
            flows_url: base_url.to_string(),
            token_url: format!("{base_url}/token"),
            token_file: dir.join("tokens.json"),
            state_file: dir.join("state.json"),
            destination: Destination {
                endpoint_id: "ingest-endpoint".to_string(),
                path: "/ingest/".to_string(),
                url: base_url.to_string(),
            },
        }
    }
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
