use bulletin_common::model::auth::{NonPositiveLifetimeError, TokenLifetime};
use bulletin_db::client::{DbClient, DbError};
use serde::Deserialize;
use server::{ServerState, Settings};
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use time::Duration;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("MEDIA_URL must be an absolute path below the root, got {0:?}")]
    MediaUrl(String),
    #[error("Invalid AUTH_TOKEN_LIFETIME_SECONDS: {0}")]
    TokenLifetime(#[from] NonPositiveLifetimeError),
    #[error("Error setting up the database: {0}")]
    Database(#[from] DbError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    database_url: String,
    #[serde(default = "default_database_max_connections")]
    database_max_connections: u32,
    #[serde(default = "default_media_root")]
    media_root: PathBuf,
    #[serde(default = "default_media_url")]
    media_url: String,
    auth_token_lifetime_seconds: Option<i64>,
}

fn default_database_max_connections() -> u32 {
    5
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_media_url() -> String {
    "/media".to_owned()
}

impl Env {
    fn settings(&self) -> Result<Settings, InitError> {
        let media_url = self.media_url.trim_end_matches('/');
        if !media_url.starts_with('/') {
            return Err(InitError::MediaUrl(self.media_url.clone()));
        }

        let auth_token_lifetime = self
            .auth_token_lifetime_seconds
            .map(|seconds| TokenLifetime::new(Duration::seconds(seconds)))
            .transpose()?;

        Ok(Settings {
            media_root: self.media_root.clone(),
            media_url: media_url.to_owned(),
            auth_token_lifetime,
        })
    }
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bulletin_api=debug,bulletin_db=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

/// Completes on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(err) => {
                error!(%err, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                error!(%err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;
    let settings = env.settings()?;

    let db_client = DbClient::connect(&env.database_url, env.database_max_connections).await?;
    db_client.migrate().await?;
    info!("Database migrations applied");

    let media_service = ServeDir::new(&settings.media_root);
    let media_url = settings.media_url.clone();
    let state = ServerState {
        db_client: Arc::new(db_client),
        settings: Arc::new(settings),
    };

    let tracing_layer = TraceLayer::new_for_http();
    let app = server::routes()
        .nest_service(&media_url, media_service)
        .layer(tracing_layer)
        .with_state(state);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
