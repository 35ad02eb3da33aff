use std::collections::VecDeque;
use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use project_chat::auth::jwt::JwtService;
use project_chat::config::AppConfig;
use project_chat::db::{self, PgPool};
use project_chat::genai::{FileHost, GenAiError, GenerativeModel, Turn};
use project_chat::models::{ChatMessage, Project, ProjectFileReference};
use project_chat::routes;
use project_chat::schema::{chat_messages, chat_sessions, project_file_references, projects};
use project_chat::state::AppState;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const DEFAULT_FAKE_REPLY: &str = "fake model reply";

/// Model double: replays scripted outcomes in order, then answers with
/// `DEFAULT_FAKE_REPLY`. Every prompt it receives is recorded.
#[derive(Default)]
pub struct FakeModel {
    script: Mutex<VecDeque<Result<Option<String>, GenAiError>>>,
    prompts: Mutex<Vec<Vec<Turn>>>,
}

#[async_trait]
impl GenerativeModel for FakeModel {
    async fn generate_content(&self, turns: &[Turn]) -> Result<Option<String>, GenAiError> {
        self.prompts.lock().await.push(turns.to_vec());
        match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => Ok(Some(DEFAULT_FAKE_REPLY.to_string())),
        }
    }
}

#[allow(dead_code)]
impl FakeModel {
    pub async fn push_reply(&self, reply: &str) {
        self.script.lock().await.push_back(Ok(Some(reply.to_string())));
    }

    pub async fn push_empty(&self) {
        self.script.lock().await.push_back(Ok(None));
    }

    pub async fn push_failure(&self) {
        self.script.lock().await.push_back(Err(GenAiError::Api {
            operation: "generateContent",
            status: 503,
            body: "model overloaded".to_string(),
        }));
    }

    pub async fn prompts(&self) -> Vec<Vec<Turn>> {
        self.prompts.lock().await.clone()
    }

    pub async fn last_prompt(&self) -> Option<Vec<Turn>> {
        self.prompts.lock().await.last().cloned()
    }
}

#[allow(dead_code)]
#[derive(Clone, Debug)]
pub struct HostedFile {
    pub uri: String,
    pub display_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct FakeFileHost {
    files: Mutex<Vec<HostedFile>>,
    fail: AtomicBool,
}

#[async_trait]
impl FileHost for FakeFileHost {
    async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<String, GenAiError> {
        let bytes = tokio::fs::read(path).await?;
        if self.fail.load(Ordering::SeqCst) {
            return Err(GenAiError::Api {
                operation: "upload",
                status: 500,
                body: "file host unavailable".to_string(),
            });
        }

        let mut files = self.files.lock().await;
        let uri = format!("https://files.test/v1beta/files/{}", files.len() + 1);
        files.push(HostedFile {
            uri: uri.clone(),
            display_name: display_name.to_string(),
            mime_type: mime_type.to_string(),
            bytes,
        });
        Ok(uri)
    }
}

#[allow(dead_code)]
impl FakeFileHost {
    pub fn fail_uploads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn files(&self) -> Vec<HostedFile> {
        self.files.lock().await.clone()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    model: Arc<FakeModel>,
    file_host: Arc<FakeFileHost>,
}

#[allow(dead_code)]
impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let staging_dir = env::temp_dir().join("project-chat-tests");
        tokio::fs::create_dir_all(&staging_dir).await?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            session_cookie_secure: false,
            session_cookie_domain: None,
            cors_allowed_origin: None,
            gemini_api_key: "test-key".to_string(),
            gemini_api_base: "http://gemini.invalid".to_string(),
            gemini_model: "test-model".to_string(),
            gemini_timeout_secs: 5,
            upload_staging_dir: staging_dir,
            max_upload_bytes: 1024 * 1024,
            google_oauth: None,
            oauth_success_redirect: "/".to_string(),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let model = Arc::new(FakeModel::default());
        let file_host = Arc::new(FakeFileHost::default());
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, model.clone(), file_host.clone(), jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            model,
            file_host,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(truncate_all).await
    }

    pub fn model(&self) -> Arc<FakeModel> {
        self.model.clone()
    }

    pub fn file_host(&self) -> Arc<FakeFileHost> {
        self.file_host.clone()
    }

    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<StatusCode> {
        let response = self
            .post_json(
                "/api/auth/signup",
                &json!({ "name": name, "email": email, "password": password }),
                None,
            )
            .await?;
        Ok(response.status())
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        let response = self
            .post_json(
                "/api/auth/login",
                &json!({ "email": email, "password": password }),
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        #[derive(Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = read_json(response).await?;
        Ok(parsed.access_token)
    }

    /// Signs up a fresh account and returns its bearer token.
    pub async fn register(&self, email: &str) -> Result<String> {
        let status = self.signup("Test User", email, "p4ssword").await?;
        ensure!(status == StatusCode::OK, "signup failed with status {status}");
        self.login_token(email, "p4ssword").await
    }

    pub async fn create_project(&self, token: &str, name: &str) -> Result<Uuid> {
        let response = self
            .post_json("/api/projects", &json!({ "name": name }), Some(token))
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "project creation failed with status {}",
            response.status()
        );

        #[derive(Deserialize)]
        struct Created {
            id: Uuid,
        }
        let created: Created = read_json(response).await?;
        Ok(created.id)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::GET, path, token).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::DELETE, path, token).await
    }

    /// Posts a multipart form with an optional `message` text field and an
    /// optional `file` part given as `(filename, content_type, bytes)`.
    pub async fn post_multipart(
        &self,
        path: &str,
        message: Option<&str>,
        file: Option<(&str, &str, &[u8])>,
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();

        if let Some(message) = message {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(b"Content-Disposition: form-data; name=\"message\"\r\n\r\n");
            body.extend(message.as_bytes());
            body.extend(b"\r\n");
        }

        if let Some((filename, content_type, data)) = file {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                    filename
                )
                .as_bytes(),
            );
            body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
            body.extend(data);
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        self.dispatch(request).await
    }

    /// Sends a GET through a router whose pool can never hand out a
    /// connection, sharing this app's config, fakes and signing keys.
    pub async fn get_with_unreachable_database(
        &self,
        path: &str,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let manager = ConnectionManager::<PgConnection>::new("postgres://nobody@127.0.0.1:1/none");
        let pool: PgPool = Pool::builder()
            .max_size(1)
            .connection_timeout(Duration::from_millis(500))
            .build_unchecked(manager);
        let state = AppState::new(
            pool,
            (*self.state.config).clone(),
            self.model.clone(),
            self.file_host.clone(),
            self.state.jwt.clone(),
        );

        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(routes::create_router(state)
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn messages_for(&self, project_id: Uuid) -> Result<Vec<ChatMessage>> {
        self.with_conn(move |conn| {
            chat_messages::table
                .inner_join(chat_sessions::table)
                .filter(chat_sessions::project_id.eq(project_id))
                .order(chat_messages::created_at.asc())
                .select(chat_messages::all_columns)
                .load(conn)
                .context("failed to load chat messages")
        })
        .await
    }

    pub async fn session_count(&self, project_id: Uuid) -> Result<i64> {
        self.with_conn(move |conn| {
            chat_sessions::table
                .filter(chat_sessions::project_id.eq(project_id))
                .count()
                .get_result(conn)
                .context("failed to count chat sessions")
        })
        .await
    }

    pub async fn file_references(&self, project_id: Uuid) -> Result<Vec<ProjectFileReference>> {
        self.with_conn(move |conn| {
            project_file_references::table
                .filter(project_file_references::project_id.eq(project_id))
                .order(project_file_references::created_at.asc())
                .load(conn)
                .context("failed to load file references")
        })
        .await
    }

    pub async fn find_project(&self, project_id: Uuid) -> Result<Option<Project>> {
        self.with_conn(move |conn| {
            projects::table
                .find(project_id)
                .first(conn)
                .optional()
                .context("failed to load project")
        })
        .await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.dispatch(builder.body(Body::from(body))?).await
    }

    async fn send_empty(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.dispatch(builder.body(Body::empty())?).await
    }

    async fn dispatch(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn read_json<T: serde::de::DeserializeOwned>(
    response: hyper::Response<Body>,
) -> Result<T> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).context("response body is not the expected JSON")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(db::MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE chat_messages, chat_sessions, project_file_references, projects, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
