//! Shared blocking HTTP plumbing.
//!
//! Every remote call in the pipeline is synchronous and inspects status codes
//! itself, so the agent is configured to hand back non-2xx responses instead
//! of turning them into errors.
use crate::settings::APP_NAME;
use std::collections::BTreeMap;
use std::time::Duration;
use ureq::Agent;

/// Header map mutated by authorizers before each request.
pub type Headers = BTreeMap<String, String>;

pub const AUTHORIZATION: &str = "Authorization";

pub fn agent() -> Agent {
    Agent::config_builder()
        .http_status_as_error(false)
        .timeout_connect(Some(Duration::from_secs(30)))
        .user_agent(format!("{APP_NAME}/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .into()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Read a response body for diagnostics; an unreadable body is reported as empty.
pub fn body_text(response: &mut ureq::http::Response<ureq::Body>) -> String {
    response.body_mut().read_to_string().unwrap_or_default()
}

pub fn with_headers<B>(
    mut request: ureq::RequestBuilder<B>,
    headers: &Headers,
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}
