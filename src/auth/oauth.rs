use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use diesel::{prelude::*, PgConnection};
use rand::{rngs::OsRng, RngCore};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::config::GoogleOAuthConfig;
use crate::models::{NewUser, User};
use crate::schema::users;

pub const STATE_COOKIE_NAME: &str = "oauth_state";
const GOOGLE_SCOPES: &str = "openid email profile";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid provider url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request to identity provider failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identity provider returned status {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("identity provider did not return a verified email")]
    UnverifiedEmail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    pub email: String,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn authorization_url(config: &GoogleOAuthConfig, state: &str) -> Result<Url, OAuthError> {
    let mut url = Url::parse(&config.auth_url)?;
    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_url)
        .append_pair("response_type", "code")
        .append_pair("scope", GOOGLE_SCOPES)
        .append_pair("state", state)
        .append_pair("prompt", "select_account");
    Ok(url)
}

/// Trades an authorization code for the signed-in account's profile.
pub async fn exchange_code(
    http: &Client,
    config: &GoogleOAuthConfig,
    code: &str,
) -> Result<GoogleProfile, OAuthError> {
    let response = http
        .post(&config.token_url)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", config.redirect_url.as_str()),
        ])
        .send()
        .await?;
    let token: TokenResponse = provider_json(response).await?;

    let response = http
        .get(&config.userinfo_url)
        .bearer_auth(&token.access_token)
        .send()
        .await?;
    let profile: GoogleProfile = provider_json(response).await?;

    if profile.email.trim().is_empty() || profile.email_verified == Some(false) {
        return Err(OAuthError::UnverifiedEmail);
    }
    Ok(profile)
}

async fn provider_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, OAuthError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OAuthError::Provider {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

/// Returns the user for `email`, creating it on first sign-in. An existing
/// account keeps its original provider tag.
pub fn provision_user(
    conn: &mut PgConnection,
    email: &str,
    name: Option<&str>,
    auth_provider: &str,
) -> QueryResult<User> {
    diesel::insert_into(users::table)
        .values(&NewUser {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.map(str::to_string),
            password_hash: None,
            auth_provider: auth_provider.to_string(),
        })
        .on_conflict(users::email)
        .do_nothing()
        .execute(conn)?;

    users::table.filter(users::email.eq(email)).first(conn)
}
