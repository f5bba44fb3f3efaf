use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use avalab_api::{AppState, AppStateInner};
use avalab_db::{AvatarStore, Database};
use avalab_gateway::Dispatcher;

/// Secrets that ship in docs and sample env files.
const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "secret", "dev-secret-change-me"];

struct Config {
    jwt_secret: String,
    db_path: PathBuf,
    avatar_dir: PathBuf,
    host: String,
    port: u16,
}

impl Config {
    fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = std::env::var("AVALAB_JWT_SECRET").unwrap_or_default();
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("AVALAB_JWT_SECRET must be set to a real secret");
        }

        let port = std::env::var("AVALAB_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .context("AVALAB_PORT is not a port number")?;

        Ok(Self {
            jwt_secret,
            db_path: std::env::var("AVALAB_DB_PATH")
                .unwrap_or_else(|_| "avalab.db".into())
                .into(),
            avatar_dir: std::env::var("AVALAB_AVATAR_DIR")
                .unwrap_or_else(|_| "./avatars".into())
                .into(),
            host: std::env::var("AVALAB_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avalab=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    let avatars = AvatarStore::new(config.avatar_dir.clone())
        .with_context(|| format!("creating avatar dir {}", config.avatar_dir.display()))?;

    let state: AppState = Arc::new(AppStateInner {
        db: Arc::new(db),
        dispatcher: Dispatcher::new(),
        jwt_secret: config.jwt_secret.into(),
        avatars,
    });

    let app = avalab_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Avalab server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
