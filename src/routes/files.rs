use axum::extract::{Json, Multipart, Path, State};
use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    chat::{self, PendingUpload},
    error::{AppError, AppResult},
    files,
    models::ProjectFileReference,
    projects,
    state::AppState,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReferenceResponse {
    pub id: Uuid,
    pub file_uri: String,
    pub original_filename: String,
    pub mime_type: String,
    pub created_at: NaiveDateTime,
}

impl From<ProjectFileReference> for FileReferenceResponse {
    fn from(reference: ProjectFileReference) -> Self {
        Self {
            id: reference.id,
            file_uri: reference.file_uri,
            original_filename: reference.original_filename,
            mime_type: reference.mime_type,
            created_at: reference.created_at,
        }
    }
}

/// Fields collected from a multipart body: an optional `message` text part
/// and an optional non-empty `file` part.
#[derive(Default)]
pub struct UploadForm {
    pub message: Option<String>,
    pub upload: Option<PendingUpload>,
}

pub async fn read_upload_form(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| "upload".to_string());
                let declared = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                if data.is_empty() {
                    continue;
                }
                form.upload = Some(PendingUpload {
                    mime_type: files::resolve_mime_type(declared.as_deref(), &filename),
                    bytes: data.to_vec(),
                    filename,
                });
            }
            Some("message") => {
                let text = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid message field: {err}"))
                })?;
                form.message = Some(text);
            }
            _ => {}
        }
    }

    Ok(form)
}

pub async fn list_files(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<FileReferenceResponse>>> {
    let mut conn = state.db()?;
    let project = projects::find_owned_project(&mut conn, project_id, user.user_id)?;
    let references = files::list_references(&mut conn, project.id)?;
    Ok(Json(references.into_iter().map(Into::into).collect()))
}

pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    {
        let mut conn = state.db()?;
        projects::find_owned_project(&mut conn, project_id, user.user_id)?;
    }

    let upload = read_upload_form(multipart)
        .await?
        .upload
        .ok_or_else(|| AppError::bad_request("file field is required"))?;

    let draft = chat::relay_and_record(&state, project_id, upload).await?;
    info!(
        %project_id,
        file_uri = %draft.file_uri,
        mime_type = %draft.mime_type,
        "file attached to project"
    );
    Ok(Json(json!({ "success": true })))
}

pub async fn clear_files(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let project = projects::find_owned_project(&mut conn, project_id, user.user_id)?;
    let removed = files::clear_references(&mut conn, project.id)?;
    info!(%project_id, removed, "project file references cleared");
    Ok(Json(json!({ "success": true })))
}
