use std::sync::Arc;

use axum::Form;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{any, post};
use axum_extra::extract::PrivateCookieJar;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use super::config::AppConfig;
use super::cookies;
use super::error::{AppError, panic_response};
use super::extractor::RequestUrl;
use super::pages::Pages;
use super::state::AppState;
use crate::error::Error;
use crate::exchange::TokenExchange;
use crate::oidc::{AuthorizationResponse, AuthorizationResult, Correlation, OidcClient};
use crate::token::IdTokenValidator;
use crate::types::Session;

/// Local sign-out: clears the session and confirms.
pub const SIGN_OUT_PATH: &str = "/signout";
/// Federated sign-out: clears the session and leaves for the provider's end-session endpoint.
pub const REMOTE_SIGN_OUT_PATH: &str = "/signout-remote";
/// Where the provider sends the browser after federated sign-out.
pub const SIGNED_OUT_PATH: &str = "/signedout";

/// Return target recorded at challenge time.
const ROOT_PATH: &str = "/";

/// Create the demo router.
///
/// The three sign-out paths match first, for any method. A POST to the
/// callback path is the provider's authorization response. Every other
/// request gets the challenge when anonymous and the status page otherwise.
///
/// # Errors
///
/// Returns [`Error::Render`] if the page templates fail to compile.
pub fn app_routes<T, V>(config: AppConfig, oidc: OidcClient<V>, tokens: T) -> Result<Router, Error>
where
    T: TokenExchange,
    V: IdTokenValidator,
{
    let callback_path = config.callback_path().to_owned();

    let state = AppState {
        oidc: Arc::new(oidc),
        tokens: Arc::new(tokens),
        config: Arc::new(config),
        pages: Arc::new(Pages::new()?),
    };

    Ok(Router::new()
        .route(SIGN_OUT_PATH, any(sign_out::<T, V>))
        .route(REMOTE_SIGN_OUT_PATH, any(remote_sign_out::<T, V>))
        .route(SIGNED_OUT_PATH, any(signed_out::<T, V>))
        .route(
            &callback_path,
            post(callback::<T, V>).fallback(index::<T, V>),
        )
        .fallback(index::<T, V>)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response)))
}

// ── Challenge / status ─────────────────────────────────────────────

async fn index<T: TokenExchange, V: IdTokenValidator>(
    State(state): State<AppState<T, V>>,
    jar: PrivateCookieJar,
    request_url: RequestUrl,
) -> Result<Response, AppError> {
    match state.sessions().current(&jar) {
        Some(session) => Ok(Html(status_page(&state, &session).await?).into_response()),
        None => challenge(&state, jar, &request_url),
    }
}

fn challenge<T, V: IdTokenValidator>(
    state: &AppState<T, V>,
    jar: PrivateCookieJar,
    request_url: &RequestUrl,
) -> Result<Response, AppError> {
    let callback_path = state.config.callback_path();
    let redirect_uri = request_url.with_path(callback_path);
    let auth_req = state.oidc.challenge(&redirect_uri, ROOT_PATH);

    let cookie = cookies::correlation_cookie(
        &auth_req.correlation,
        state.config.settings.secure_cookies,
        callback_path,
    )?;

    tracing::debug!(redirect_uri = %redirect_uri, "Challenging anonymous request");
    Ok((jar.add(cookie), found(&auth_req.url)).into_response())
}

async fn status_page<T: TokenExchange, V>(
    state: &AppState<T, V>,
    session: &Session,
) -> Result<String, Error> {
    let acquired = state
        .tokens
        .acquire_silently(
            state.config.resource(),
            state.config.credential(),
            &session.object_id,
        )
        .await;

    let token = match &acquired {
        Ok(tokens) => Ok(tokens.access_token.as_str()),
        Err(e) => {
            tracing::warn!(error = %e, user = %session.object_id, "Silent token acquisition failed");
            Err(e.to_string())
        }
    };

    state.pages.status(session, token)
}

// ── Callback ───────────────────────────────────────────────────────

async fn callback<T: TokenExchange, V: IdTokenValidator>(
    State(state): State<AppState<T, V>>,
    jar: PrivateCookieJar,
    request_url: RequestUrl,
    Form(response): Form<AuthorizationResponse>,
) -> Response {
    // The correlation is single-use: it goes away whether sign-in succeeds or not.
    let correlation = cookies::get_correlation(&jar);
    let jar = jar.remove(cookies::clear_correlation_cookie(state.config.callback_path()));

    match complete_sign_in(&state, jar.clone(), correlation, response, &request_url).await {
        Ok(response) => response,
        Err(e) => (jar, AppError::from(e)).into_response(),
    }
}

async fn complete_sign_in<T: TokenExchange, V: IdTokenValidator>(
    state: &AppState<T, V>,
    jar: PrivateCookieJar,
    correlation: Option<Correlation>,
    response: AuthorizationResponse,
    request_url: &RequestUrl,
) -> Result<Response, Error> {
    let correlation = correlation
        .ok_or_else(|| Error::Protocol("correlation cookie missing or expired".into()))?;

    let mut result = state.oidc.handle_callback(response, &correlation).await?;
    on_code_received(state, &mut result, request_url).await?;

    let return_uri = result.return_uri().to_owned();
    let session = state.oidc.sign_in(result)?;
    let jar = state.sessions().establish(jar, &session)?;

    tracing::info!(user = %session.object_id, "Sign-in complete");
    Ok((jar, found(&return_uri)).into_response())
}

/// Redeem the code with the exact URL the provider posted to.
///
/// Runs only after `handle_callback` has validated state, nonce and the ID
/// token. Any failure here aborts the sign-in.
async fn on_code_received<T: TokenExchange, V>(
    state: &AppState<T, V>,
    result: &mut AuthorizationResult,
    request_url: &RequestUrl,
) -> Result<(), Error> {
    let tokens = state
        .tokens
        .exchange_code(
            result.code(),
            &request_url.0,
            state.config.credential(),
            state.config.resource(),
        )
        .await?;

    tracing::debug!(resource = %tokens.resource, "Authorization code redeemed");
    result.handle_code_redemption();
    Ok(())
}

// ── Sign-out ───────────────────────────────────────────────────────

async fn sign_out<T: TokenExchange, V: IdTokenValidator>(
    State(state): State<AppState<T, V>>,
    jar: PrivateCookieJar,
) -> Response {
    let (jar, session) = end_local_session(&state, jar).await;
    let page = state
        .pages
        .signing_out(session.as_ref().and_then(|s| s.name.as_deref()))
        .map(Html)
        .map_err(AppError::from);

    (jar, page).into_response()
}

async fn remote_sign_out<T: TokenExchange, V: IdTokenValidator>(
    State(state): State<AppState<T, V>>,
    jar: PrivateCookieJar,
    request_url: RequestUrl,
) -> Response {
    let (jar, _) = end_local_session(&state, jar).await;
    let redirect = state
        .oidc
        .end_session_url(&request_url.with_path(SIGNED_OUT_PATH))
        .map(|url| found(url.as_str()))
        .map_err(AppError::from);

    (jar, redirect).into_response()
}

async fn signed_out<T: TokenExchange, V: IdTokenValidator>(
    State(state): State<AppState<T, V>>,
) -> Result<Html<String>, AppError> {
    Ok(Html(state.pages.signed_out()?))
}

/// Clear the session cookie and the user's cached tokens. No-op when anonymous.
async fn end_local_session<T: TokenExchange, V>(
    state: &AppState<T, V>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Option<Session>) {
    let sessions = state.sessions();
    let session = sessions.current(&jar);
    if let Some(session) = &session {
        state.tokens.forget_user(&session.object_id).await;
        tracing::info!(user = %session.object_id, "Signed out");
    }
    (sessions.clear(jar), session)
}

// ── Helpers ────────────────────────────────────────────────────────

/// `302 Found`; `Redirect::to` would answer 303.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response()
}
