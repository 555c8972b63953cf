use super::*;
use crate::auth::{LoginState, PollOutcome};

fn logged_in(session: &Session, now: i64) -> serde_json::Value {
    serde_json::json!({
        "status": "logged_in",
        "user_id": session.user_id,
        "country_code": session.country_code,
        "expires_in_seconds": (session.expires_at - now).max(0),
    })
}

fn awaiting_approval(pending: &PendingLogin, now: i64) -> serde_json::Value {
    serde_json::json!({
        "status": "authorization_required",
        "login_url": pending.login_url(),
        "user_code": pending.user_code,
        "expires_in_seconds": (pending.expires_at - now).max(0),
        "message": auth::pending_login_remediation(pending, now),
    })
}

/// Start a fresh device authorization and remember it.
async fn start_new_login(
    server: &TidalServer,
    creds: &Credentials,
    now: i64,
) -> Result<serde_json::Value, ToolError> {
    let started =
        auth::start_device_authorization(&server.state.http, &server.state.config, creds, now)
            .await?;
    let payload = awaiting_approval(&started, now);
    *server.pending_login() = Some(started);
    Ok(payload)
}

/// Drive the device flow one step: report a live session, poll an
/// outstanding authorization, or start a new one.
pub(super) async fn login(server: &TidalServer) -> Result<serde_json::Value, ToolError> {
    let now = unix_now();

    if let Some(stale) = server.state.sessions.snapshot()
        && stale.is_expired(now)
        && stale.refresh_token.is_some()
    {
        match server.active_session().await {
            Ok(session) => return Ok(logged_in(&session, now)),
            Err(e) => tracing::info!(error = %e, "refresh failed, starting a new login"),
        }
    }

    let session = server.state.sessions.snapshot();
    let pending = server.pending_login().clone();

    match auth::resolve_login_state(session.as_ref(), pending.as_ref(), now) {
        LoginState::Active(session) => Ok(logged_in(&session, now)),
        LoginState::Waiting(pending) => {
            let creds = Credentials::from_config(&server.state.config)?;
            let outcome =
                auth::poll_device_token(&server.state.http, &server.state.config, &creds, &pending)
                    .await?;
            match outcome {
                PollOutcome::Authorized(grant) => {
                    let session =
                        auth::finalize(&server.state.http, &server.state.config, grant, now)
                            .await?;
                    server
                        .state
                        .sessions
                        .install(session.clone())
                        .map_err(|e| {
                            ToolError::UpstreamUnavailable(format!(
                                "logged in, but the session could not be saved to {}: {e}",
                                server.state.sessions.path().display()
                            ))
                        })?;
                    *server.pending_login() = None;
                    tracing::info!(user_id = session.user_id, "TIDAL login complete");
                    Ok(logged_in(&session, now))
                }
                PollOutcome::Pending => Ok(awaiting_approval(&pending, now)),
                PollOutcome::Expired => {
                    *server.pending_login() = None;
                    start_new_login(server, &creds, now).await
                }
                PollOutcome::Denied => {
                    *server.pending_login() = None;
                    Err(ToolError::AuthRequired(
                        "The TIDAL login was declined in the browser. Call tidal_login to start over."
                            .to_string(),
                    ))
                }
            }
        }
        LoginState::Expired => {
            *server.pending_login() = None;
            let creds = Credentials::from_config(&server.state.config)?;
            start_new_login(server, &creds, now).await
        }
        LoginState::Fresh => {
            let creds = Credentials::from_config(&server.state.config)?;
            start_new_login(server, &creds, now).await
        }
    }
}
