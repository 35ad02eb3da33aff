pub mod jwt;
pub mod oauth;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization, Cookie};
use axum_extra::TypedHeader;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{error::AppError, models::User, schema::users, state::AppState};

pub const SESSION_COOKIE_NAME: &str = "session_token";

/// The caller behind a request: a valid session token whose user row still exists.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    #[serde(rename = "id")]
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub auth_provider: String,
}

impl From<User> for AuthenticatedUser {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            email: user.email,
            name: user.name,
            auth_provider: user.auth_provider,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(parts, state)
            .await
            .ok_or_else(AppError::unauthorized)?;

        let claims = state
            .jwt
            .verify_token(&token)
            .map_err(|_| AppError::unauthorized())?;

        let mut conn = state.db()?;
        let user: User = users::table
            .find(claims.sub)
            .first(&mut conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;

        Ok(user.into())
    }
}

/// Bearer token if present, otherwise the session cookie.
async fn session_token(parts: &mut Parts, state: &AppState) -> Option<String> {
    if let Ok(TypedHeader(Authorization(bearer))) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await
    {
        return Some(bearer.token().to_owned());
    }

    let TypedHeader(cookies) = TypedHeader::<Cookie>::from_request_parts(parts, state)
        .await
        .ok()?;
    cookies.get(SESSION_COOKIE_NAME).map(str::to_owned)
}
