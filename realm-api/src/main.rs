use realm_api::{ServerConfig, run_server};
use realm_auth::AuthConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; real deployments set the environment directly.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let auth = AuthConfig::from_env()?;
    let server = ServerConfig::from_env()?;

    run_server(server, auth).await
}
