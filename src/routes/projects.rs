use axum::{
    extract::{Json, Multipart, Path, State},
    http::StatusCode,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::files::{read_upload_form, FileReferenceResponse};
use crate::{
    auth::AuthenticatedUser,
    chat,
    error::{AppError, AppResult},
    files,
    models::Project,
    projects::{self, ProjectChanges},
    state::AppState,
};

#[derive(Serialize)]
pub struct ProjectSummary {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetailResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub files: Vec<FileReferenceResponse>,
}

#[derive(Serialize)]
pub struct CreatedProject {
    pub id: Uuid,
    pub name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedProject {
    pub project_id: Uuid,
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
}

impl From<Project> for ProjectSummary {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            name: project.name,
            description: project.description,
        }
    }
}

pub async fn list_projects(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ProjectSummary>>> {
    let mut conn = state.db()?;
    let projects = projects::list_owned_projects(&mut conn, user.user_id)?;
    Ok(Json(projects.into_iter().map(Into::into).collect()))
}

pub async fn create_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateProjectRequest>,
) -> AppResult<Json<CreatedProject>> {
    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::bad_request("name is required"))?;
    let description = payload.description.as_deref().unwrap_or("").trim();

    let mut conn = state.db()?;
    let project = projects::create_project(&mut conn, user.user_id, name, description)?;
    info!(project_id = %project.id, user_id = %user.user_id, "project created");

    Ok(Json(CreatedProject {
        id: project.id,
        name: project.name,
    }))
}

/// Creates a project from a first message and optional file, then runs the
/// opening exchange.
pub async fn start_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<Json<StartedProject>> {
    let form = read_upload_form(multipart).await?;
    let message = form
        .message
        .filter(|message| !message.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("message is required"))?;

    let project_id = chat::start_project(&state, user.user_id, &message, form.upload).await?;
    Ok(Json(StartedProject { project_id }))
}

pub async fn get_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ProjectDetailResponse>> {
    let mut conn = state.db()?;
    let project = projects::find_owned_project(&mut conn, project_id, user.user_id)?;
    let references = files::list_references(&mut conn, project.id)?;

    Ok(Json(ProjectDetailResponse {
        id: project.id,
        name: project.name,
        description: project.description,
        system_prompt: project.system_prompt,
        created_at: project.created_at,
        updated_at: project.updated_at,
        files: references.into_iter().map(Into::into).collect(),
    }))
}

pub async fn update_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<UpdateProjectRequest>,
) -> AppResult<Json<ProjectSummary>> {
    let name = non_blank(payload.name.as_deref(), "name")?;
    let system_prompt = non_blank(payload.system_prompt.as_deref(), "systemPrompt")?;
    let changes = ProjectChanges {
        name,
        description: payload.description.as_deref().map(str::trim),
        system_prompt,
    };

    let mut conn = state.db()?;
    let project = if changes.is_empty() {
        projects::find_owned_project(&mut conn, project_id, user.user_id)?
    } else {
        projects::update_owned_project(&mut conn, project_id, user.user_id, &changes)?
    };

    info!(%project_id, "project updated");
    Ok(Json(project.into()))
}

pub async fn delete_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let removed = projects::delete_owned_project(&mut conn, project_id, user.user_id)?;
    if removed == 0 {
        return Err(AppError::not_found());
    }

    info!(%project_id, user_id = %user.user_id, "project deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// A present field must carry non-whitespace text.
fn non_blank<'a>(value: Option<&'a str>, field: &str) -> AppResult<Option<&'a str>> {
    match value.map(str::trim) {
        Some("") => Err(AppError::bad_request(format!("{field} must not be empty"))),
        other => Ok(other),
    }
}
