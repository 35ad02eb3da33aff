use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    genai::{FileHost, GenerativeModel},
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub model: Arc<dyn GenerativeModel>,
    pub file_host: Arc<dyn FileHost>,
    pub jwt: JwtService,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        model: Arc<dyn GenerativeModel>,
        file_host: Arc<dyn FileHost>,
        jwt: JwtService,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            model,
            file_host,
            jwt,
            http: reqwest::Client::new(),
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
