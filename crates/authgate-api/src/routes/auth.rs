use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::Deserialize;

use authgate_core::config::Config;
use authgate_core::error::Error;
use authgate_core::flow::refresh::RefreshRequest;
use authgate_core::flow::{callback, refresh, signin};
use authgate_core::state::StateGuard;

use crate::server::AppState;

const NO_STORE: HeaderValue = HeaderValue::from_static("no-store");

#[derive(Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/authentication/signin/{provider}", get(signin_redirect))
        .route("/authentication/callback/{provider}", get(signin_callback))
        .route("/authentication/refresh", post(refresh_tokens))
}

/// GET /authentication/signin/{provider}: redirect to the provider
async fn signin_redirect(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    jar: CookieJar,
) -> Result<(CookieJar, Response), Error> {
    let redirect = signin::handle(&state.gateway, &provider_id)?;

    let jar = if state.config.server.bind_state_cookie {
        jar.add(build_state_cookie(
            &state.cookie_names.state,
            &redirect.state,
            &state.config,
        ))
    } else {
        jar
    };

    Ok((jar, found(&redirect.location)))
}

/// GET /authentication/callback/{provider}: finish signin, redirect to the client
async fn signin_callback(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> (CookieJar, Response) {
    let saved_state = jar
        .get(&state.cookie_names.state)
        .map(|c| c.value().to_string());
    let jar = jar.remove(scoped_cookie(&state.cookie_names.state, "", &state.config));

    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        tracing::warn!(provider = %provider_id, "callback without code or state");
        return (jar, found(&callback::failure_location(&state.gateway)));
    };

    if state.config.server.bind_state_cookie {
        let bound = saved_state
            .as_deref()
            .is_some_and(|saved| StateGuard::matches(&oauth_state, saved).is_ok());
        if !bound {
            tracing::warn!(provider = %provider_id, "callback state does not match browser");
            return (jar, found(&callback::failure_location(&state.gateway)));
        }
    }

    let location = callback::respond(&state.gateway, &provider_id, &code, &oauth_state).await;
    (jar, found(&location))
}

/// POST /authentication/refresh: redeem a refresh token
async fn refresh_tokens(
    State(state): State<AppState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Response, Error> {
    let Json(body) = body.map_err(|e| Error::BadRequest(e.body_text()))?;
    let tokens = refresh::handle(&state.gateway, &body).await?;
    Ok(([(header::CACHE_CONTROL, NO_STORE)], Json(tokens)).into_response())
}

/// 302 Found with `Location`. Token-bearing URLs must not be cached.
fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (
            StatusCode::FOUND,
            [(header::LOCATION, value), (header::CACHE_CONTROL, NO_STORE)],
        )
            .into_response(),
        Err(_) => Error::Internal(anyhow::anyhow!("redirect location is not a valid header value"))
            .into_response(),
    }
}

fn build_state_cookie(name: &str, value: &str, config: &Config) -> Cookie<'static> {
    let mut cookie = scoped_cookie(name, value, config);
    cookie.set_http_only(true);
    cookie.set_secure(config.server.public_url.starts_with("https://"));
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(cookie::time::Duration::minutes(10));
    cookie
}

/// Path and domain shared by the state cookie and its removal. A browser
/// only drops a cookie when both match the ones it was set with.
fn scoped_cookie(name: &str, value: &str, config: &Config) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_string(), value.to_string());
    cookie.set_path("/");
    if let Some(ref domain) = config.server.cookie_domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}
