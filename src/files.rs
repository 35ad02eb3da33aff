use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use tempfile::NamedTempFile;
use tracing::{info, warn};
use uuid::Uuid;

use crate::genai::{FileData, FileHost, GenAiError};
use crate::models::{NewProjectFileReference, ProjectFileReference};
use crate::schema::project_file_references;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
const MAX_STAGED_NAME_CHARS: usize = 100;

/// A file that now lives on the external host, not yet recorded against a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReferenceDraft {
    pub file_uri: String,
    pub original_filename: String,
    pub mime_type: String,
}

impl FileReferenceDraft {
    pub fn file_data(&self) -> FileData {
        FileData {
            mime_type: self.mime_type.clone(),
            file_uri: self.file_uri.clone(),
        }
    }
}

impl From<&ProjectFileReference> for FileData {
    fn from(reference: &ProjectFileReference) -> Self {
        FileData {
            mime_type: reference.mime_type.clone(),
            file_uri: reference.file_uri.clone(),
        }
    }
}

/// Declared content type when it says something, otherwise a guess from the
/// file extension. A declared `application/octet-stream` counts as unknown.
pub fn resolve_mime_type(declared: Option<&str>, filename: &str) -> String {
    match declared
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != DEFAULT_MIME_TYPE)
    {
        Some(value) => value.to_string(),
        None => mime_guess::from_path(filename)
            .first_raw()
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string(),
    }
}

/// Stages `bytes` on local disk, hands the staged path to the file host and
/// removes the staged copy whatever the outcome.
pub async fn relay_upload(
    host: &dyn FileHost,
    staging_dir: &Path,
    bytes: Vec<u8>,
    mime_type: &str,
    filename: &str,
) -> Result<FileReferenceDraft, GenAiError> {
    let staged = stage_file(staging_dir.to_path_buf(), bytes, filename).await?;
    let staged_path = staged.path().to_path_buf();

    let outcome = host.upload_file(&staged_path, mime_type, filename).await;

    if let Err(err) = staged.close() {
        warn!(path = %staged_path.display(), error = %err, "failed to remove staged upload");
    }

    match outcome {
        Ok(file_uri) => {
            info!(%file_uri, filename, mime_type, "relayed upload to file host");
            Ok(FileReferenceDraft {
                file_uri,
                original_filename: filename.to_string(),
                mime_type: mime_type.to_string(),
            })
        }
        Err(err) => {
            warn!(filename, error = %err, "file host rejected upload");
            Err(err)
        }
    }
}

async fn stage_file(
    staging_dir: PathBuf,
    bytes: Vec<u8>,
    filename: &str,
) -> Result<NamedTempFile, GenAiError> {
    let prefix = format!("{}-", Utc::now().timestamp_millis());
    let suffix = format!("-{}", sanitize_filename(filename));

    let staged = tokio::task::spawn_blocking(move || -> io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .tempfile_in(&staging_dir)?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(io::Error::other)??;

    Ok(staged)
}

fn sanitize_filename(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    let sanitized: String = base
        .chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => ch,
            _ => '_',
        })
        .take(MAX_STAGED_NAME_CHARS)
        .collect();

    if sanitized.trim_matches(['.', '_']).is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}

pub fn record_reference(
    conn: &mut PgConnection,
    project_id: Uuid,
    draft: &FileReferenceDraft,
) -> QueryResult<ProjectFileReference> {
    let new_reference = NewProjectFileReference {
        id: Uuid::new_v4(),
        project_id,
        file_uri: draft.file_uri.clone(),
        original_filename: draft.original_filename.clone(),
        mime_type: draft.mime_type.clone(),
    };

    diesel::insert_into(project_file_references::table)
        .values(&new_reference)
        .get_result(conn)
}

pub fn list_references(
    conn: &mut PgConnection,
    project_id: Uuid,
) -> QueryResult<Vec<ProjectFileReference>> {
    project_file_references::table
        .filter(project_file_references::project_id.eq(project_id))
        .order(project_file_references::created_at.asc())
        .load(conn)
}

pub fn latest_reference(
    conn: &mut PgConnection,
    project_id: Uuid,
) -> QueryResult<Option<ProjectFileReference>> {
    project_file_references::table
        .filter(project_file_references::project_id.eq(project_id))
        .order(project_file_references::created_at.desc())
        .first(conn)
        .optional()
}

pub fn clear_references(conn: &mut PgConnection, project_id: Uuid) -> QueryResult<usize> {
    diesel::delete(
        project_file_references::table.filter(project_file_references::project_id.eq(project_id)),
    )
    .execute(conn)
}
