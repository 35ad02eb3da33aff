use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use uuid::Uuid;

use crate::models::{NewProject, Project};
use crate::schema::projects;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Field-level changes for a project; `None` leaves the column untouched.
#[derive(AsChangeset, Default)]
#[diesel(table_name = projects)]
pub struct ProjectChanges<'a> {
    pub name: Option<&'a str>,
    pub description: Option<&'a str>,
    pub system_prompt: Option<&'a str>,
}

impl ProjectChanges<'_> {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.system_prompt.is_none()
    }
}

pub fn create_project(
    conn: &mut PgConnection,
    user_id: Uuid,
    name: &str,
    description: &str,
) -> QueryResult<Project> {
    let new_project = NewProject {
        id: Uuid::new_v4(),
        user_id,
        name: name.to_string(),
        description: description.to_string(),
        system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
    };

    diesel::insert_into(projects::table)
        .values(&new_project)
        .get_result(conn)
}

/// Loads a project only if `user_id` owns it; anything else is `NotFound`.
pub fn find_owned_project(
    conn: &mut PgConnection,
    project_id: Uuid,
    user_id: Uuid,
) -> QueryResult<Project> {
    projects::table
        .filter(projects::id.eq(project_id))
        .filter(projects::user_id.eq(user_id))
        .first(conn)
}

pub fn list_owned_projects(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<Vec<Project>> {
    projects::table
        .filter(projects::user_id.eq(user_id))
        .order(projects::created_at.desc())
        .load(conn)
}

pub fn update_owned_project(
    conn: &mut PgConnection,
    project_id: Uuid,
    user_id: Uuid,
    changes: &ProjectChanges<'_>,
) -> QueryResult<Project> {
    diesel::update(
        projects::table
            .filter(projects::id.eq(project_id))
            .filter(projects::user_id.eq(user_id)),
    )
    .set((changes, projects::updated_at.eq(Utc::now().naive_utc())))
    .get_result(conn)
}

/// Returns the number of rows removed; chat sessions, messages and file
/// references go with the project through foreign-key cascades.
pub fn delete_owned_project(
    conn: &mut PgConnection,
    project_id: Uuid,
    user_id: Uuid,
) -> QueryResult<usize> {
    diesel::delete(
        projects::table
            .filter(projects::id.eq(project_id))
            .filter(projects::user_id.eq(user_id)),
    )
    .execute(conn)
}
