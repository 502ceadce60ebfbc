//! Authentication boundary.
//!
//! Interactive login happens outside this client; a login helper leaves tokens
//! in a JSON token store keyed by scope. This module loads them, refreshes
//! expired ones, and hands out authorizers that know how to stamp a request
//! and how to recover once from an expired token.
use crate::error::SubmitError;
use crate::http::{self, Headers, AUTHORIZATION};
use crate::settings::CLIENT_ID;
use crate::util::now_unix_secs;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use ureq::Agent;

/// Tokens close enough to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: u64 = 60;

/// Stamps requests with credentials.
pub trait Authorizer {
    fn set_authorization_header(&self, headers: &mut Headers);

    /// Force a refresh so the next `set_authorization_header` carries a new token.
    fn handle_missing_authorization(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_seconds: Option<u64>,
}

impl Token {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at_seconds
            .is_some_and(|expires| expires <= now + EXPIRY_MARGIN_SECS)
    }
}

/// Tokens keyed by the scope they were issued for.
pub type TokenSet = BTreeMap<String, Token>;

#[derive(Debug, Clone, Copy, Default)]
pub struct LoginOptions {
    pub no_browser: bool,
    pub refresh_tokens: bool,
    pub force: bool,
}

/// Token store written by the external login helper.
#[derive(Clone)]
pub struct TokenStore {
    path: PathBuf,
    token_url: String,
    agent: Agent,
}

impl TokenStore {
    pub fn new(path: PathBuf, token_url: String, agent: Agent) -> Self {
        Self {
            path,
            token_url,
            agent,
        }
    }

    /// Load tokens for every requested scope, refreshing expired ones.
    pub fn login(&self, scopes: &[&str], options: LoginOptions) -> Result<TokenSet> {
        if options.force {
            self.clear()?;
            return Err(SubmitError::NotLoggedIn {
                reason: "stored tokens were discarded by --force-login".to_string(),
            }
            .into());
        }
        if options.no_browser {
            tracing::debug!("no-browser requested; tokens are read from the store only");
        }
        let mut stored = self.load()?;
        let now = now_unix_secs()?;
        let mut refreshed_any = false;
        let mut tokens = TokenSet::new();
        for scope in scopes {
            let token = stored
                .get(*scope)
                .cloned()
                .ok_or_else(|| SubmitError::NotLoggedIn {
                    reason: format!("no token for scope {scope}"),
                })?;
            let token = if token.is_expired(now) {
                if !options.refresh_tokens || token.refresh_token.is_none() {
                    return Err(SubmitError::NotLoggedIn {
                        reason: format!("token for scope {scope} has expired"),
                    }
                    .into());
                }
                let fresh = refresh_token(&self.agent, &self.token_url, &token)?;
                stored.insert(scope.to_string(), fresh.clone());
                refreshed_any = true;
                fresh
            } else {
                token
            };
            tokens.insert(scope.to_string(), token);
        }
        if refreshed_any {
            self.save(&stored)?;
        }
        tracing::debug!(scopes = tokens.len(), "tokens loaded");
        Ok(tokens)
    }

    pub fn get_authorizer(&self, token: &Token) -> RefreshTokenAuthorizer {
        RefreshTokenAuthorizer {
            token: token.clone(),
            token_url: self.token_url.clone(),
            agent: self.agent.clone(),
        }
    }

    fn load(&self) -> Result<TokenSet> {
        if !self.path.is_file() {
            return Ok(TokenSet::new());
        }
        let bytes =
            fs::read(&self.path).with_context(|| format!("read {}", self.path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parse token store {}", self.path.display()))
    }

    fn save(&self, tokens: &TokenSet) -> Result<()> {
        write_private_json(&self.path, tokens)
    }

    fn clear(&self) -> Result<()> {
        if self.path.is_file() {
            fs::remove_file(&self.path)
                .with_context(|| format!("remove {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// Bearer authorizer that can refresh its token once asked to.
#[derive(Clone)]
pub struct RefreshTokenAuthorizer {
    token: Token,
    token_url: String,
    agent: Agent,
}

impl Authorizer for RefreshTokenAuthorizer {
    fn set_authorization_header(&self, headers: &mut Headers) {
        headers.insert(
            AUTHORIZATION.to_string(),
            http::bearer(&self.token.access_token),
        );
    }

    fn handle_missing_authorization(&mut self) -> Result<()> {
        if self.token.refresh_token.is_none() {
            return Err(SubmitError::NotLoggedIn {
                reason: "the upload token was rejected and cannot be refreshed".to_string(),
            }
            .into());
        }
        self.token = refresh_token(&self.agent, &self.token_url, &self.token)?;
        tracing::info!("upload authorization refreshed");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

fn refresh_token(agent: &Agent, token_url: &str, token: &Token) -> Result<Token> {
    let refresh = token
        .refresh_token
        .as_deref()
        .ok_or_else(|| SubmitError::NotLoggedIn {
            reason: "no refresh token available".to_string(),
        })?;
    let mut response = agent
        .post(token_url)
        .send_form([
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", CLIENT_ID),
        ])
        .with_context(|| format!("refresh token at {token_url}"))?;
    let status = response.status().as_u16();
    if status >= 300 {
        return Err(SubmitError::NotLoggedIn {
            reason: format!(
                "token refresh failed ({status}): {}",
                http::body_text(&mut response)
            ),
        }
        .into());
    }
    let body: TokenResponse = response
        .body_mut()
        .read_json()
        .context("parse token refresh response")?;
    let now = now_unix_secs()?;
    Ok(Token {
        access_token: body.access_token,
        refresh_token: body.refresh_token.or_else(|| token.refresh_token.clone()),
        expires_at_seconds: body.expires_in.map(|secs| now + secs),
    })
}

fn write_private_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(value).context("serialize token store")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restrict {}", path.display()))?;
    }
    Ok(())
}
