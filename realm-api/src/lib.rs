//! `realm-api` exposes a small HTTP API guarded by Keycloak bearer tokens.
//! Token verification itself lives in `realm-auth`.

pub mod server;

pub use server::{ApiError, AppState, ServerConfig, app_router, run_server};
