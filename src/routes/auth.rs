use axum::{
    extract::{Query, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::Redirect,
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use diesel::{
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        oauth::{self, OAuthError, STATE_COOKIE_NAME},
        password, AuthenticatedUser, SESSION_COOKIE_NAME,
    },
    error::{AppError, AppResult},
    models::{NewUser, User, AUTH_PROVIDER_CREDENTIALS, AUTH_PROVIDER_GOOGLE},
    schema::users::dsl,
    state::AppState,
};

const OAUTH_STATE_MAX_AGE_SECS: i64 = 600;

#[derive(Deserialize)]
pub struct SignupRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<Json<Value>> {
    let name = required_field(payload.name.as_deref(), "name")?;
    let email = required_field(payload.email.as_deref(), "email")?;
    let plain = payload
        .password
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::bad_request("password is required"))?;

    let password_hash = password::hash_password(plain)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        email: email.to_string(),
        name: Some(name.to_string()),
        password_hash: Some(password_hash),
        auth_provider: AUTH_PROVIDER_CREDENTIALS.to_string(),
    };

    let mut conn = state.db()?;
    match diesel::insert_into(dsl::users)
        .values(&new_user)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::conflict("email already registered"));
        }
        Err(err) => return Err(err.into()),
    }

    info!(user_id = %new_user.id, "user signed up");
    Ok(Json(json!({ "success": true })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let mut conn = state.db()?;

    let user: User = dsl::users
        .filter(dsl::email.eq(payload.email.trim()))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::unauthorized_with("USER_NOT_FOUND"))?;

    // OAuth-only accounts have no password to check against.
    let valid = match user.password_hash.as_deref() {
        Some(hash) => password::verify_password(&payload.password, hash)
            .map_err(|_| AppError::unauthorized_with("INVALID_PASSWORD"))?,
        None => false,
    };
    if !valid {
        return Err(AppError::unauthorized_with("INVALID_PASSWORD"));
    }

    let (headers, body) = issue_session(&state, &user)?;
    info!(user_id = %user.id, provider = %user.auth_provider, "user logged in");
    Ok((headers, Json(body)))
}

pub async fn logout(State(state): State<AppState>) -> AppResult<(HeaderMap, StatusCode)> {
    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        build_clear_cookie(&state, SESSION_COOKIE_NAME, "/")?,
    );
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

pub async fn google_login(State(state): State<AppState>) -> AppResult<(HeaderMap, Redirect)> {
    let config = state
        .config
        .google_oauth
        .as_ref()
        .ok_or_else(AppError::not_found)?;

    let oauth_state = oauth::generate_state();
    let url = oauth::authorization_url(config, &oauth_state).map_err(AppError::internal)?;

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_state_cookie(&state, &oauth_state)?);
    Ok((headers, Redirect::to(url.as_str())))
}

#[derive(Deserialize)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub async fn google_callback(
    State(state): State<AppState>,
    Query(params): Query<OAuthCallback>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, Redirect)> {
    let config = state
        .config
        .google_oauth
        .as_ref()
        .ok_or_else(AppError::not_found)?;

    if let Some(error) = params.error.as_deref() {
        warn!(error, "google sign-in was declined");
        return Err(AppError::unauthorized());
    }

    let expected = jar
        .as_ref()
        .and_then(|TypedHeader(cookies)| cookies.get(STATE_COOKIE_NAME));
    match (expected, params.state.as_deref()) {
        (Some(expected), Some(received)) if expected == received => {}
        _ => {
            warn!("oauth state mismatch");
            return Err(AppError::unauthorized());
        }
    }

    let code = params
        .code
        .as_deref()
        .ok_or_else(|| AppError::bad_request("code is required"))?;

    let profile = oauth::exchange_code(&state.http, config, code)
        .await
        .map_err(|err| match err {
            OAuthError::UnverifiedEmail => AppError::unauthorized(),
            other => AppError::upstream(other),
        })?;

    let user = {
        let mut conn = state.db()?;
        oauth::provision_user(
            &mut conn,
            profile.email.trim(),
            profile.name.as_deref(),
            AUTH_PROVIDER_GOOGLE,
        )?
    };

    let (mut headers, _) = issue_session(&state, &user)?;
    headers.append(
        SET_COOKIE,
        build_clear_cookie(&state, STATE_COOKIE_NAME, "/api/auth/google")?,
    );
    info!(user_id = %user.id, provider = %user.auth_provider, "user signed in with google");
    Ok((headers, Redirect::to(&state.config.oauth_success_redirect)))
}

fn required_field<'a>(value: Option<&'a str>, field: &str) -> AppResult<&'a str> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::bad_request(format!("{field} is required")))
}

fn issue_session(state: &AppState, user: &User) -> AppResult<(HeaderMap, LoginResponse)> {
    let access_token = state.jwt.generate_token(user.id, &user.email)?;

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_session_cookie(state, &access_token)?);

    Ok((
        headers,
        LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.jwt.expiry_seconds(),
        },
    ))
}

fn build_session_cookie(state: &AppState, token: &str) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{}={}", SESSION_COOKIE_NAME, token)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Lax".into());
    parts.push(format!("Max-Age={}", state.jwt.expiry_seconds()));
    push_cookie_scope(state, &mut parts);
    cookie_header(parts)
}

fn build_state_cookie(state: &AppState, value: &str) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{}={}", STATE_COOKIE_NAME, value)];
    parts.push("Path=/api/auth/google".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Lax".into());
    parts.push(format!("Max-Age={}", OAUTH_STATE_MAX_AGE_SECS));
    push_cookie_scope(state, &mut parts);
    cookie_header(parts)
}

fn build_clear_cookie(state: &AppState, name: &str, path: &str) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{}=", name)];
    parts.push(format!("Path={}", path));
    parts.push("HttpOnly".into());
    parts.push("SameSite=Lax".into());
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());
    push_cookie_scope(state, &mut parts);
    cookie_header(parts)
}

fn push_cookie_scope(state: &AppState, parts: &mut Vec<String>) {
    if state.config.session_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.session_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }
}

fn cookie_header(parts: Vec<String>) -> AppResult<HeaderValue> {
    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}
