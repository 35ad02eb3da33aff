use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

pub const AUTH_PROVIDER_CREDENTIALS: &str = "credentials";
pub const AUTH_PROVIDER_GOOGLE: &str = "google";

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub auth_provider: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub auth_provider: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = projects)]
#[diesel(belongs_to(User))]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = chat_sessions)]
#[diesel(belongs_to(Project))]
#[diesel(belongs_to(User))]
pub struct ChatSession {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_sessions)]
pub struct NewChatSession {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = chat_messages)]
#[diesel(belongs_to(ChatSession, foreign_key = chat_session_id))]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_session_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_messages)]
pub struct NewChatMessage {
    pub id: Uuid,
    pub chat_session_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = project_file_references)]
#[diesel(belongs_to(Project))]
pub struct ProjectFileReference {
    pub id: Uuid,
    pub project_id: Uuid,
    pub file_uri: String,
    pub original_filename: String,
    pub mime_type: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = project_file_references)]
pub struct NewProjectFileReference {
    pub id: Uuid,
    pub project_id: Uuid,
    pub file_uri: String,
    pub original_filename: String,
    pub mime_type: String,
}
