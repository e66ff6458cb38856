//! Party matching backend entrypoint wiring REST, WebSocket and record store layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use party_matching_back::{
    build_router,
    config::AppConfig,
    dao::record_store::MemoryRecordStore,
    services::identity::AuthMode,
    state::{AppState, SharedState},
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const STORE_BACKEND_ENV: &str = "STORE_BACKEND";
#[cfg(feature = "mongo-store")]
const DEFAULT_STORE_BACKEND: &str = "mongo";
#[cfg(not(feature = "mongo-store"))]
const DEFAULT_STORE_BACKEND: &str = "memory";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let auth = AuthMode::from_env().context("configuring authentication")?;
    let app_state = AppState::new(config, auth);

    install_record_store(&app_state).await?;
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Install the record store selected by `STORE_BACKEND`.
async fn install_record_store(state: &SharedState) -> anyhow::Result<()> {
    let backend = env::var(STORE_BACKEND_ENV).unwrap_or_else(|_| DEFAULT_STORE_BACKEND.into());

    match backend.trim().to_ascii_lowercase().as_str() {
        "memory" => {
            warn!("using the in-memory record store; teamspaces are lost on restart");
            state
                .set_record_store(Arc::new(MemoryRecordStore::new()))
                .await;
            Ok(())
        }
        #[cfg(feature = "mongo-store")]
        "mongo" | "mongodb" => {
            spawn_mongo_supervisor(state.clone());
            Ok(())
        }
        other => anyhow::bail!("unsupported {STORE_BACKEND_ENV} `{other}`"),
    }
}

/// Connect to MongoDB in the background, staying in degraded mode until it is reachable.
#[cfg(feature = "mongo-store")]
fn spawn_mongo_supervisor(state: SharedState) {
    use party_matching_back::{
        dao::{
            record_store::{
                RecordStore,
                mongodb::{MongoConfig, MongoRecordStore},
            },
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    tokio::spawn(storage_supervisor::run(state, || async {
        let config = MongoConfig::from_env().await?;
        let store = MongoRecordStore::connect(config).await?;
        Ok::<Arc<dyn RecordStore>, StorageError>(Arc::new(store))
    }));
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
