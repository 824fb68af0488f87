use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{FromRef, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use realm_auth::{
    AuthConfig, AuthError, AuthenticatedUser, BearerToken, TokenVerifier, inspect_unverified,
    require_role,
};
use serde_json::{Value, json};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct AppState {
    pub verifier: Arc<TokenVerifier>,
    pub frontend_url: String,
    probe: reqwest::Client,
}

impl AppState {
    pub fn new(
        verifier: Arc<TokenVerifier>,
        frontend_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let probe = reqwest::Client::builder()
            .timeout(HEALTH_PROBE_TIMEOUT)
            .build()
            .context("failed to build health probe client")?;
        Ok(Self { verifier, frontend_url: frontend_url.into(), probe })
    }
}

impl FromRef<AppState> for Arc<TokenVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            frontend_url: "http://localhost:5173".to_string(),
        }
    }
}

impl ServerConfig {
    /// Read `API_HOST`, `API_PORT` and `FRONTEND_URL`, keeping defaults for unset ones.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("API_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("API_PORT") {
            config.port = port.parse().with_context(|| format!("invalid API_PORT '{port}'"))?;
        }
        if let Ok(url) = std::env::var("FRONTEND_URL") {
            config.frontend_url = url;
        }
        HeaderValue::from_str(&config.frontend_url)
            .with_context(|| format!("invalid FRONTEND_URL '{}'", config.frontend_url))?;
        Ok(config)
    }
}

/// Errors returned by route handlers.
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    Internal(&'static str),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(err) => err.into_response(),
            ApiError::Internal(detail) => {
                let body = Json(json!({ "detail": detail }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(HeaderValue::from_str(&state.frontend_url).ok()))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    let auth = Router::new()
        .route("/protected-endpoint", get(protected_endpoint))
        .route("/user-info", get(user_info))
        .route("/debug-token", get(debug_token))
        .route("/logout-simple", post(logout_simple));

    let admin = Router::new()
        .route("/admin-only", get(admin_only))
        .route("/refresh-keys", post(refresh_keys));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/auth", auth)
        .nest("/admin", admin)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(config: ServerConfig, auth: AuthConfig) -> anyhow::Result<()> {
    let verifier =
        TokenVerifier::new(auth).await.context("failed to initialise token verifier")?;
    let state = AppState::new(Arc::new(verifier), config.frontend_url.clone())?;
    let app = app_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| "invalid host/port for realm-api server")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("realm-api listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn root() -> impl IntoResponse {
    Json(json!({ "message": "Realm API with Keycloak authentication" }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let url = state.verifier.key_endpoint().to_string();
    let keycloak_status = match state.probe.get(&url).send().await {
        Ok(response) if response.status() == StatusCode::OK => "connected".to_string(),
        Ok(_) => "disconnected".to_string(),
        Err(e) => format!("error: {e}"),
    };

    Json(json!({
        "status": "healthy",
        "keycloak_status": keycloak_status,
        "keycloak_url": url,
        "cached_keys": state.verifier.key_store().len(),
    }))
}

async fn protected_endpoint(AuthenticatedUser(user): AuthenticatedUser) -> Json<Value> {
    Json(json!({
        "message": "This is a protected endpoint",
        "user": {
            "id": user.sub,
            "username": user.preferred_username,
            "email": user.email,
            "roles": user.realm_roles(),
        },
        "timestamp": user.iat,
    }))
}

async fn user_info(AuthenticatedUser(user): AuthenticatedUser) -> Json<Value> {
    Json(json!({
        "sub": user.sub,
        "preferred_username": user.preferred_username,
        "email": user.email,
        "name": user.name,
        "given_name": user.given_name,
        "family_name": user.family_name,
        "roles": user.realm_roles(),
        "groups": user.groups,
        "email_verified": user.email_verified,
        "token_issued_at": user.iat,
        "token_expires_at": user.exp,
    }))
}

async fn debug_token(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Json<Value> {
    let config = state.verifier.config();
    match inspect_unverified(&token) {
        Ok(parsed) => {
            let mut body = parsed.to_json();
            body["expected_issuer"] = json!(config.primary_issuer());
            body["expected_audience"] = json!(config.client_id);
            Json(body)
        }
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

async fn logout_simple(AuthenticatedUser(user): AuthenticatedUser) -> Json<Value> {
    info!(user = %user.username(), "User logged out");
    Json(json!({
        "message": "Logged out successfully",
        "user": user.preferred_username,
    }))
}

async fn admin_only(AuthenticatedUser(user): AuthenticatedUser) -> Result<Json<Value>, ApiError> {
    require_role(&user, "admin")?;
    Ok(Json(json!({
        "message": "This endpoint is only accessible to admins",
        "user": user.preferred_username,
        "admin_data": { "realm_roles": user.realm_roles() },
    })))
}

async fn refresh_keys(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    require_role(&user, "admin")?;
    state.verifier.refresh_keys().await.map_err(|e| {
        error!(user = %user.username(), error = %e, "Manual key refresh failed");
        ApiError::Internal("Failed to refresh public keys")
    })?;
    Ok(Json(json!({
        "message": "Public keys refreshed successfully",
        "key_count": state.verifier.key_store().len(),
    })))
}
