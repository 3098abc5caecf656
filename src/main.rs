//! Crowdtune Back binary entrypoint wiring REST, SSE, playback and the shared tree store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crowdtune_back::{
    config::{AppConfig, PlaybackBackend, StoreBackend},
    dao::tree::{TreeStore, memory::InMemoryTreeStore},
    playback::{
        PlaybackProvider, simulated::SimulatedPlaybackProvider, spotify::SpotifyPlaybackProvider,
    },
    routes,
    state::{AppState, SharedState},
};

/// Environment variable overriding the configured store backend (`memory` or `couch`).
const STORE_ENV: &str = "CROWDTUNE_STORE";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store_backend = match env::var(STORE_ENV).ok().as_deref() {
        Some("memory") => StoreBackend::Memory,
        Some("couch") => StoreBackend::Couch,
        _ => config.store,
    };

    let playback: Arc<dyn PlaybackProvider> = match config.playback {
        PlaybackBackend::Spotify => Arc::new(
            SpotifyPlaybackProvider::new(&config.spotify_api_base_url)
                .context("building streaming provider client")?,
        ),
        PlaybackBackend::Simulated => Arc::new(SimulatedPlaybackProvider::new(
            config.simulated_devices.clone(),
            config.simulated_track_duration,
        )),
    };

    let max_retries = config.transaction_max_retries;
    let app_state = AppState::new(config, playback);
    start_store(&app_state, store_backend, max_retries).await?;

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

/// Install the in-memory store, or hand the CouchDB connection to the storage supervisor.
async fn start_store(
    state: &SharedState,
    backend: StoreBackend,
    max_retries: usize,
) -> anyhow::Result<()> {
    match backend {
        StoreBackend::Memory => {
            info!("using in-memory tree store");
            let store: Arc<dyn TreeStore> = Arc::new(InMemoryTreeStore::new(max_retries));
            state.install_store(store).await;
            Ok(())
        }
        #[cfg(feature = "couch-store")]
        StoreBackend::Couch => {
            use crowdtune_back::{
                dao::{
                    storage::StorageError,
                    tree::couchdb::{CouchConfig, CouchTreeStore},
                },
                services::storage_supervisor,
            };

            let couch = CouchConfig::from_env()
                .context("reading CouchDB configuration")?
                .with_max_retries(max_retries);
            info!(database = %couch.database, "using CouchDB tree store");
            tokio::spawn(storage_supervisor::run(state.clone(), move || {
                let couch = couch.clone();
                async move {
                    let store = CouchTreeStore::connect(couch).await?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn TreeStore>)
                }
            }));
            Ok(())
        }
        #[cfg(not(feature = "couch-store"))]
        StoreBackend::Couch => anyhow::bail!("built without the `couch-store` feature"),
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
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

        let Ok(mut term) = signal(SignalKind::terminate()) else {
            let _ = tokio::signal::ctrl_c().await;
            return;
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
