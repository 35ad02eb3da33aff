mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, read_json, TestApp};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
struct ProjectSummary {
    id: Uuid,
    name: String,
    description: String,
}

#[derive(Deserialize)]
struct CreatedProject {
    id: Uuid,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDetail {
    id: Uuid,
    name: String,
    system_prompt: String,
    files: Vec<serde_json::Value>,
}

#[tokio::test]
async fn create_list_and_fetch_projects() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.register("owner@x.com").await?;

    let response = app
        .post_json(
            "/api/projects",
            &json!({ "name": "Thesis", "description": "chapter drafts" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let created: CreatedProject = read_json(response).await?;
    assert_eq!(created.name, "Thesis");

    let second = app.create_project(&token, "Groceries").await?;

    let response = app.get("/api/projects", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let listed: Vec<ProjectSummary> = read_json(response).await?;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second, "newest project comes first");
    assert_eq!(listed[1].id, created.id);
    assert_eq!(listed[1].description, "chapter drafts");

    let response = app
        .get(&format!("/api/projects/{}", created.id), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let detail: ProjectDetail = read_json(response).await?;
    assert_eq!(detail.id, created.id);
    assert_eq!(detail.name, "Thesis");
    assert_eq!(detail.system_prompt, "You are a helpful assistant.");
    assert!(detail.files.is_empty());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn blank_project_name_is_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.register("owner@x.com").await?;

    let response = app
        .post_json("/api/projects", &json!({ "name": "   " }), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get("/api/projects", Some(&token)).await?;
    let listed: Vec<ProjectSummary> = read_json(response).await?;
    assert!(listed.is_empty());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rename_updates_fields_and_rejects_blank_values() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.register("owner@x.com").await?;
    let project_id = app.create_project(&token, "Draft").await?;
    let path = format!("/api/projects/{project_id}");

    let response = app
        .patch_json(
            &path,
            &json!({ "name": "Final", "systemPrompt": "Answer in French." }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .patch_json(&path, &json!({ "name": "  " }), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .patch_json(
            &path,
            &json!({ "name": "Other", "systemPrompt": "" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stored = app.find_project(project_id).await?.expect("project exists");
    assert_eq!(stored.name, "Final");
    assert_eq!(stored.system_prompt, "Answer in French.");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn projects_are_invisible_to_other_users() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let owner = app.register("owner@x.com").await?;
    let intruder = app.register("intruder@x.com").await?;
    let project_id = app.create_project(&owner, "Private").await?;
    let path = format!("/api/projects/{project_id}");

    let response = app.get(&path, Some(&intruder)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .patch_json(&path, &json!({ "name": "Mine now" }), Some(&intruder))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.delete(&path, Some(&intruder)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/api/projects", Some(&intruder)).await?;
    let listed: Vec<ProjectSummary> = read_json(response).await?;
    assert!(listed.is_empty());

    let stored = app.find_project(project_id).await?.expect("project survives");
    assert_eq!(stored.name, "Private");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deleting_a_project_removes_its_conversation() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.register("owner@x.com").await?;
    let project_id = app.create_project(&token, "Short lived").await?;

    let response = app
        .post_json(
            &format!("/api/projects/{project_id}/chat"),
            &json!({ "message": "hello", "hasFile": false }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.messages_for(project_id).await?.len(), 2);

    let response = app
        .delete(&format!("/api/projects/{project_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(app.find_project(project_id).await?.is_none());
    assert!(app.messages_for(project_id).await?.is_empty());
    assert_eq!(app.session_count(project_id).await?, 0);

    let response = app
        .delete(&format!("/api/projects/{project_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}
