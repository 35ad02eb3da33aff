use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    chat,
    error::{AppError, AppResult},
    files,
    genai::FileData,
    models::ChatMessage,
    projects,
    state::AppState,
};

#[derive(Serialize)]
pub struct ChatMessageResponse {
    pub id: Uuid,
    pub role: String,
    pub content: String,
}

impl From<ChatMessage> for ChatMessageResponse {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub message: Option<String>,
    #[serde(default)]
    pub has_file: bool,
}

#[derive(Serialize)]
pub struct SendMessageResponse {
    pub reply: String,
}

/// Unauthenticated callers get a 401 with an empty list so clients can render
/// the history unconditionally. Other failures while resolving the caller
/// propagate unchanged.
pub async fn get_chat(
    State(state): State<AppState>,
    user: Result<AuthenticatedUser, AppError>,
    Path(project_id): Path<Uuid>,
) -> AppResult<Response> {
    let user = match user {
        Ok(user) => user,
        Err(err) if err.status() == StatusCode::UNAUTHORIZED => {
            return Ok((StatusCode::UNAUTHORIZED, Json(Vec::<Value>::new())).into_response());
        }
        Err(err) => return Err(err),
    };

    let mut conn = state.db()?;
    let history = chat::fetch_history(&mut conn, project_id, user.user_id)?;
    let body: Vec<ChatMessageResponse> = history.into_iter().map(Into::into).collect();
    Ok(Json(body).into_response())
}

pub async fn send_chat(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> AppResult<Json<SendMessageResponse>> {
    // Blank check only; the message is stored as sent.
    let message = payload
        .message
        .as_deref()
        .filter(|message| !message.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("message is required"))?;

    let attachment = if payload.has_file {
        let mut conn = state.db()?;
        let project = projects::find_owned_project(&mut conn, project_id, user.user_id)?;
        let latest = files::latest_reference(&mut conn, project.id)?;
        latest.as_ref().map(FileData::from)
    } else {
        None
    };

    let reply = chat::send_message(&state, project_id, user.user_id, message, attachment).await?;
    Ok(Json(SendMessageResponse { reply }))
}
