//! OAuth device-flow driver and token refresh against the TIDAL auth service.

use reqwest::Client;
use serde::Deserialize;

use crate::config::Config;
use crate::error::ToolError;
use crate::session::Session;

pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SCOPE: &str = "r_usr w_usr w_sub";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl Credentials {
    pub fn from_config(config: &Config) -> Result<Self, ToolError> {
        let client_id = config.client_id.clone().ok_or_else(|| {
            ToolError::validation(
                "TIDAL_CLIENT_ID is not set. Configure a TIDAL API client id to enable login.",
            )
        })?;
        Ok(Self {
            client_id,
            client_secret: config.client_secret.clone(),
        })
    }

    fn form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![("client_id", self.client_id.clone())];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        form
    }
}

/// A started device authorization the user has not completed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLogin {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_at: i64,
    pub interval: u64,
}

impl PendingLogin {
    pub fn login_url(&self) -> String {
        let url = self
            .verification_uri_complete
            .clone()
            .unwrap_or_else(|| format!("{}?code={}", self.verification_uri, self.user_code));
        if url.starts_with("http") {
            url
        } else {
            format!("https://{url}")
        }
    }
}

pub fn pending_login_remediation(pending: &PendingLogin, now: i64) -> String {
    let remaining = (pending.expires_at - now).max(0);
    format!(
        "Open {} in a browser and approve the login (code {}). \
         The link expires in {}m{:02}s. Call tidal_login again once approved.",
        pending.login_url(),
        pending.user_code,
        remaining / 60,
        remaining % 60,
    )
}

/// Where the login flow stands before any upstream call is made.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginState {
    /// A live session exists; nothing to do.
    Active(Session),
    /// A device authorization is outstanding; poll it.
    Waiting(PendingLogin),
    /// The outstanding authorization lapsed; clear it and start over.
    Expired,
    /// Nothing in flight; start a device authorization.
    Fresh,
}

pub fn resolve_login_state(
    session: Option<&Session>,
    pending: Option<&PendingLogin>,
    now: i64,
) -> LoginState {
    if let Some(session) = session
        && !session.is_expired(now)
    {
        return LoginState::Active(session.clone());
    }
    match pending {
        Some(p) if p.expires_at > now => LoginState::Waiting(p.clone()),
        Some(_) => LoginState::Expired,
        None => LoginState::Fresh,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Authorized(TokenGrant),
    Pending,
    Expired,
    Denied,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceAuthorizationResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    expires_in: i64,
    #[serde(default)]
    interval: Option<u64>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl From<TokenResponse> for TokenGrant {
    fn from(r: TokenResponse) -> Self {
        Self {
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            token_type: r.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: r.expires_in.unwrap_or(3600),
        }
    }
}

#[derive(Deserialize, Default)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    user_id: u64,
    country_code: String,
}

/// Classify a failed token-endpoint response by its OAuth `error` code.
fn classify_token_error(status: u16, body: &OAuthErrorBody) -> Result<PollOutcome, ToolError> {
    match body.error.as_deref() {
        Some("authorization_pending" | "slow_down") => Ok(PollOutcome::Pending),
        Some("expired_token") => Ok(PollOutcome::Expired),
        Some("access_denied") => Ok(PollOutcome::Denied),
        other => {
            let detail = body
                .error_description
                .clone()
                .or_else(|| other.map(String::from))
                .unwrap_or_else(|| format!("HTTP {status}"));
            Err(ToolError::UpstreamUnavailable(format!(
                "TIDAL token endpoint error: {detail}"
            )))
        }
    }
}

pub async fn start_device_authorization(
    http: &Client,
    config: &Config,
    creds: &Credentials,
    now: i64,
) -> Result<PendingLogin, ToolError> {
    let mut form = creds.form();
    form.push(("scope", SCOPE.to_string()));
    let resp = http
        .post(format!("{}/oauth2/device_authorization", config.auth_base))
        .form(&form)
        .send()
        .await
        .map_err(|e| ToolError::from_transport(&e, "device authorization"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ToolError::from_status(
            status.as_u16(),
            format!("device authorization failed: HTTP {status} {body}"),
        ));
    }

    let started: DeviceAuthorizationResponse = resp.json().await.map_err(|e| {
        ToolError::UpstreamUnavailable(format!("device authorization parse error: {e}"))
    })?;
    tracing::info!(user_code = %started.user_code, "device authorization started");

    Ok(PendingLogin {
        device_code: started.device_code,
        user_code: started.user_code,
        verification_uri: started.verification_uri,
        verification_uri_complete: started.verification_uri_complete,
        expires_at: now + started.expires_in,
        interval: started.interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
    })
}

async fn post_token(
    http: &Client,
    config: &Config,
    form: &[(&'static str, String)],
    context: &str,
) -> Result<Result<TokenGrant, (u16, OAuthErrorBody)>, ToolError> {
    let resp = http
        .post(format!("{}/oauth2/token", config.auth_base))
        .form(form)
        .send()
        .await
        .map_err(|e| ToolError::from_transport(&e, context))?;

    let status = resp.status();
    if status.is_success() {
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ToolError::UpstreamUnavailable(format!("{context} parse error: {e}")))?;
        return Ok(Ok(token.into()));
    }
    let body = resp.json::<OAuthErrorBody>().await.unwrap_or_default();
    Ok(Err((status.as_u16(), body)))
}

/// Poll the token endpoint once for an outstanding device authorization.
pub async fn poll_device_token(
    http: &Client,
    config: &Config,
    creds: &Credentials,
    pending: &PendingLogin,
) -> Result<PollOutcome, ToolError> {
    let mut form = creds.form();
    form.push(("device_code", pending.device_code.clone()));
    form.push(("grant_type", DEVICE_CODE_GRANT.to_string()));
    form.push(("scope", SCOPE.to_string()));

    match post_token(http, config, &form, "device token poll").await? {
        Ok(grant) => Ok(PollOutcome::Authorized(grant)),
        Err((status, body)) => classify_token_error(status, &body),
    }
}

/// Turn a fresh grant into a full session by asking who the token belongs to.
pub async fn finalize(
    http: &Client,
    config: &Config,
    grant: TokenGrant,
    now: i64,
) -> Result<Session, ToolError> {
    let resp = http
        .get(format!("{}/sessions", config.api_base))
        .header(
            reqwest::header::AUTHORIZATION,
            format!("{} {}", grant.token_type, grant.access_token),
        )
        .send()
        .await
        .map_err(|e| ToolError::from_transport(&e, "session lookup"))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ToolError::from_status(
            status.as_u16(),
            format!("session lookup failed: HTTP {status}"),
        ));
    }
    let info: SessionInfo = resp
        .json()
        .await
        .map_err(|e| ToolError::UpstreamUnavailable(format!("session lookup parse error: {e}")))?;

    Ok(Session {
        access_token: grant.access_token,
        refresh_token: grant.refresh_token,
        token_type: grant.token_type,
        expires_at: now + grant.expires_in,
        user_id: info.user_id,
        country_code: info.country_code,
    })
}

/// Exchange the refresh token for a new access token. The refresh token
/// itself is kept when the response does not rotate it.
pub async fn refresh_session(
    http: &Client,
    config: &Config,
    creds: &Credentials,
    session: &Session,
    now: i64,
) -> Result<Session, ToolError> {
    let refresh_token = session
        .refresh_token
        .clone()
        .ok_or_else(ToolError::auth_required)?;

    let mut form = creds.form();
    form.push(("refresh_token", refresh_token.clone()));
    form.push(("grant_type", "refresh_token".to_string()));
    form.push(("scope", SCOPE.to_string()));

    match post_token(http, config, &form, "token refresh").await? {
        Ok(grant) => Ok(Session {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(Some(refresh_token)),
            token_type: grant.token_type,
            expires_at: now + grant.expires_in,
            user_id: session.user_id,
            country_code: session.country_code.clone(),
        }),
        Err((status, body)) => {
            tracing::warn!(
                status,
                error = body.error.as_deref().unwrap_or(""),
                "token refresh rejected"
            );
            Err(ToolError::auth_required())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_session;

    fn pending(expires_at: i64) -> PendingLogin {
        PendingLogin {
            device_code: "dev-123".into(),
            user_code: "ABCDE".into(),
            verification_uri: "link.tidal.com".into(),
            verification_uri_complete: Some("link.tidal.com/ABCDE".into()),
            expires_at,
            interval: 2,
        }
    }

    #[test]
    fn live_session_short_circuits_login() {
        let session = test_session();
        let state = resolve_login_state(Some(&session), Some(&pending(2_000_000_000)), 1_000);
        assert!(matches!(state, LoginState::Active(_)));
    }

    #[test]
    fn expired_session_with_outstanding_flow_waits() {
        let mut session = test_session();
        session.expires_at = 500;
        let state = resolve_login_state(Some(&session), Some(&pending(2_000)), 1_000);
        assert_eq!(state, LoginState::Waiting(pending(2_000)));
    }

    #[test]
    fn lapsed_flow_is_expired_and_nothing_is_fresh() {
        assert_eq!(
            resolve_login_state(None, Some(&pending(900)), 1_000),
            LoginState::Expired
        );
        assert_eq!(resolve_login_state(None, None, 1_000), LoginState::Fresh);
    }

    #[test]
    fn token_errors_classify_by_oauth_code() {
        let body = |code: &str| OAuthErrorBody {
            error: Some(code.to_string()),
            error_description: None,
        };
        assert_eq!(
            classify_token_error(400, &body("authorization_pending")).unwrap(),
            PollOutcome::Pending
        );
        assert_eq!(
            classify_token_error(400, &body("expired_token")).unwrap(),
            PollOutcome::Expired
        );
        assert_eq!(
            classify_token_error(400, &body("access_denied")).unwrap(),
            PollOutcome::Denied
        );
        let err = classify_token_error(500, &OAuthErrorBody::default()).unwrap_err();
        assert_eq!(err.kind(), "UpstreamUnavailable");
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[test]
    fn remediation_includes_https_link_and_code() {
        let msg = pending_login_remediation(&pending(1_125), 1_000);
        assert!(msg.contains("https://link.tidal.com/ABCDE"));
        assert!(msg.contains("ABCDE"));
        assert!(msg.contains("2m05s"));
    }

    #[test]
    fn missing_client_id_is_a_validation_error() {
        let config = Config::default();
        let err = Credentials::from_config(&config).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert!(err.to_string().contains("TIDAL_CLIENT_ID"));
    }
}
