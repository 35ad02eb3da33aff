pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod genai;
pub mod models;
pub mod projects;
pub mod routes;
pub mod schema;
pub mod state;
