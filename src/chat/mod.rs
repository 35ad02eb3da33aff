use chrono::{Duration, NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::files::{self, FileReferenceDraft};
use crate::genai::{FileData, GenerativeModel, Turn};
use crate::models::{ChatMessage, ChatSession, NewChatMessage, NewChatSession};
use crate::projects;
use crate::schema::{chat_messages, chat_sessions};
use crate::state::AppState;

pub mod context;

use context::{assemble_context, ContextInput, HistoryEntry, HISTORY_WINDOW};

pub const FALLBACK_REPLY: &str = "Sorry, I couldn't generate a response.";
pub const DEFAULT_PROJECT_NAME: &str = "New Project";
const PROJECT_NAME_MAX_CHARS: usize = 50;
const PROJECT_NAME_STRIPPED: &[char] = &['"', '\'', '.', '*', '#'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// A file uploaded during the current request, waiting to be relayed.
pub struct PendingUpload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

/// Returns the session for the pair, creating it if absent. Concurrent callers
/// converge on one row through the `(project_id, user_id)` unique constraint.
pub fn ensure_session(
    conn: &mut PgConnection,
    project_id: Uuid,
    user_id: Uuid,
) -> QueryResult<ChatSession> {
    diesel::insert_into(chat_sessions::table)
        .values(&NewChatSession {
            id: Uuid::new_v4(),
            project_id,
            user_id,
        })
        .on_conflict((chat_sessions::project_id, chat_sessions::user_id))
        .do_nothing()
        .execute(conn)?;

    chat_sessions::table
        .filter(chat_sessions::project_id.eq(project_id))
        .filter(chat_sessions::user_id.eq(user_id))
        .first(conn)
}

/// The most recent `HISTORY_WINDOW` messages of a session, oldest first.
pub fn load_history_window(
    conn: &mut PgConnection,
    session_id: Uuid,
) -> QueryResult<Vec<ChatMessage>> {
    let mut recent: Vec<ChatMessage> = chat_messages::table
        .filter(chat_messages::chat_session_id.eq(session_id))
        .order(chat_messages::created_at.desc())
        .limit(HISTORY_WINDOW)
        .load(conn)?;
    recent.reverse();
    Ok(recent)
}

pub fn fetch_history(
    conn: &mut PgConnection,
    project_id: Uuid,
    user_id: Uuid,
) -> QueryResult<Vec<ChatMessage>> {
    chat_messages::table
        .inner_join(chat_sessions::table)
        .filter(chat_sessions::project_id.eq(project_id))
        .filter(chat_sessions::user_id.eq(user_id))
        .order(chat_messages::created_at.asc())
        .select(chat_messages::all_columns)
        .load(conn)
}

/// Writes both sides of an exchange in a single insert statement.
pub fn persist_exchange(
    conn: &mut PgConnection,
    session_id: Uuid,
    message: &str,
    sent_at: NaiveDateTime,
    reply: &str,
    replied_at: NaiveDateTime,
) -> QueryResult<usize> {
    let rows = vec![
        NewChatMessage {
            id: Uuid::new_v4(),
            chat_session_id: session_id,
            role: MessageRole::User.as_str().to_string(),
            content: message.to_string(),
            created_at: sent_at,
        },
        NewChatMessage {
            id: Uuid::new_v4(),
            chat_session_id: session_id,
            role: MessageRole::Assistant.as_str().to_string(),
            content: reply.to_string(),
            created_at: replied_at,
        },
    ];

    diesel::insert_into(chat_messages::table)
        .values(&rows)
        .execute(conn)
}

pub fn persist_user_message(
    conn: &mut PgConnection,
    session_id: Uuid,
    message: &str,
) -> QueryResult<ChatMessage> {
    diesel::insert_into(chat_messages::table)
        .values(&NewChatMessage {
            id: Uuid::new_v4(),
            chat_session_id: session_id,
            role: MessageRole::User.as_str().to_string(),
            content: message.to_string(),
            created_at: Utc::now().naive_utc(),
        })
        .get_result(conn)
}

/// Runs one exchange: resolves the project and session, assembles context,
/// calls the model and persists the user message together with the reply.
/// Nothing is written for the exchange when the model call fails.
pub async fn send_message(
    state: &AppState,
    project_id: Uuid,
    user_id: Uuid,
    message: &str,
    attachment: Option<FileData>,
) -> AppResult<String> {
    let sent_at = Utc::now().naive_utc();

    let (session, turns) = {
        let mut conn = state.db()?;
        let project = projects::find_owned_project(&mut conn, project_id, user_id)?;
        let session = ensure_session(&mut conn, project.id, user_id)?;

        let history: Vec<HistoryEntry> = load_history_window(&mut conn, session.id)?
            .into_iter()
            .filter_map(|row| match MessageRole::parse(&row.role) {
                Some(role) => Some(HistoryEntry {
                    role,
                    content: row.content,
                }),
                None => {
                    warn!(message_id = %row.id, role = %row.role, "skipping message with unknown role");
                    None
                }
            })
            .collect();
        let project_files: Vec<FileData> = files::list_references(&mut conn, project.id)?
            .iter()
            .map(FileData::from)
            .collect();

        let turns = assemble_context(ContextInput {
            system_prompt: &project.system_prompt,
            history: &history,
            project_files: &project_files,
            message,
            attachment: attachment.as_ref(),
        });
        (session, turns)
    };

    let reply = match state.model.generate_content(&turns).await {
        Ok(Some(text)) => text,
        Ok(None) => {
            warn!(%project_id, session_id = %session.id, "model returned no usable text");
            FALLBACK_REPLY.to_string()
        }
        Err(err) => {
            error!(%project_id, session_id = %session.id, error = %err, "model call failed");
            return Err(AppError::from(err));
        }
    };

    let replied_at = Utc::now()
        .naive_utc()
        .max(sent_at + Duration::microseconds(1));

    let mut conn = state.db()?;
    persist_exchange(&mut conn, session.id, message, sent_at, &reply, replied_at)?;

    info!(
        %project_id,
        session_id = %session.id,
        turns = turns.len(),
        with_attachment = attachment.is_some(),
        "chat exchange persisted"
    );
    Ok(reply)
}

/// Asks the model for a short project title; any failure yields `DEFAULT_PROJECT_NAME`.
pub async fn generate_project_name(model: &dyn GenerativeModel, message: &str) -> String {
    let prompt = format!(
        "Message: \"{message}\" \n\n Generate a 3-word title for a project based on the message above. Output ONLY the title text."
    );

    match model.generate_content(&[Turn::user_text(prompt)]).await {
        Ok(Some(raw)) => clean_project_name(&raw).unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string()),
        Ok(None) => DEFAULT_PROJECT_NAME.to_string(),
        Err(err) => {
            warn!(error = %err, "project naming failed, using default name");
            DEFAULT_PROJECT_NAME.to_string()
        }
    }
}

fn clean_project_name(raw: &str) -> Option<String> {
    let stripped: String = raw
        .chars()
        .filter(|ch| !PROJECT_NAME_STRIPPED.contains(ch))
        .collect();
    let name: String = stripped.trim().chars().take(PROJECT_NAME_MAX_CHARS).collect();
    let name = name.trim_end();
    (!name.is_empty()).then(|| name.to_string())
}

/// Creates a project from a first message. Naming and file relay failures are
/// absorbed; if the first exchange fails the session and the bare user message
/// are still written so the project always has a conversation.
pub async fn start_project(
    state: &AppState,
    user_id: Uuid,
    message: &str,
    upload: Option<PendingUpload>,
) -> AppResult<Uuid> {
    let name = generate_project_name(state.model.as_ref(), message).await;

    let project = {
        let mut conn = state.db()?;
        projects::create_project(&mut conn, user_id, &name, "")?
    };
    info!(project_id = %project.id, %user_id, name = %project.name, "project created from first message");

    let mut attachment: Option<FileData> = None;
    if let Some(upload) = upload {
        match relay_and_record(state, project.id, upload).await {
            Ok(draft) => attachment = Some(draft.file_data()),
            Err(err) => {
                warn!(project_id = %project.id, status = %err.status(), "first-message upload failed, continuing without file");
            }
        }
    }

    if let Err(err) = send_message(state, project.id, user_id, message, attachment).await {
        warn!(project_id = %project.id, status = %err.status(), "first exchange failed, keeping bare user message");
        let mut conn = state.db()?;
        let session = ensure_session(&mut conn, project.id, user_id)?;
        persist_user_message(&mut conn, session.id, message)?;
    }

    Ok(project.id)
}

/// Relays an upload to the file host and records the reference against the project.
pub async fn relay_and_record(
    state: &AppState,
    project_id: Uuid,
    upload: PendingUpload,
) -> AppResult<FileReferenceDraft> {
    let PendingUpload {
        bytes,
        filename,
        mime_type,
    } = upload;

    let draft = files::relay_upload(
        state.file_host.as_ref(),
        &state.config.upload_staging_dir,
        bytes,
        &mime_type,
        &filename,
    )
    .await?;

    let mut conn = state.db()?;
    files::record_reference(&mut conn, project_id, &draft)?;
    Ok(draft)
}
