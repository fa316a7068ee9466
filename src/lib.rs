pub mod config;
pub mod core;
pub mod history;
pub mod logging;
pub mod memory;
pub mod response;
pub mod routes;
pub mod scanner;
pub mod service;
pub mod state;
pub mod store;
pub mod types;
pub mod workers;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::{Config, Persistence};
use crate::core::EventBus;
use crate::history::{InMemoryHistory, ReviewHistory};
use crate::memory::{IntervalRecommender, OnlineEstimator};
use crate::service::ReviewService;
use crate::state::AppState;
use crate::store::{DecayParameterStore, InMemoryParameterStore, SqliteStore, StoreError};
use crate::workers::{WorkerError, WorkerManager};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("persistence init failed: {0}")]
    Store(#[from] StoreError),
    #[error("worker init failed: {0}")]
    Worker(#[from] WorkerError),
}

async fn open_persistence(
    config: &Config,
) -> Result<(Arc<dyn ReviewHistory>, Arc<dyn DecayParameterStore>), StoreError> {
    let default_lambda = config.estimator.default_lambda;
    let sqlite = match &config.persistence {
        Persistence::Memory => {
            info!("Using in-process stores");
            let history: Arc<dyn ReviewHistory> = Arc::new(InMemoryHistory::new());
            let store: Arc<dyn DecayParameterStore> =
                Arc::new(InMemoryParameterStore::new(default_lambda));
            return Ok((history, store));
        }
        Persistence::SqliteFile(path) => SqliteStore::open(path, default_lambda).await?,
        Persistence::SqliteUrl(url) => SqliteStore::connect(url, default_lambda).await?,
    };
    let sqlite = Arc::new(sqlite);
    let history: Arc<dyn ReviewHistory> = sqlite.clone();
    let store: Arc<dyn DecayParameterStore> = sqlite;
    Ok((history, store))
}

/// Wire stores, model components, bus and scanner workers from `config`.
/// Workers are created but not started.
pub async fn build_state(config: Config) -> Result<AppState, StartupError> {
    let (history, store) = open_persistence(&config).await?;
    let bus = Arc::new(EventBus::new());
    let recommender = Arc::new(IntervalRecommender::new(
        config.recommender.clone(),
        Arc::clone(&store),
    ));
    let service = Arc::new(ReviewService::new(
        Arc::clone(&history),
        store,
        OnlineEstimator::new(config.estimator.clone()),
        Arc::clone(&recommender),
        Arc::clone(&bus),
    ));

    let workers = if config.scan.enabled {
        Some(Arc::new(
            WorkerManager::new(history, recommender, bus, config.scan.clone()).await?,
        ))
    } else {
        None
    };

    Ok(AppState::new(service, workers, Arc::new(config)))
}

pub fn app(state: AppState) -> axum::Router {
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Router over in-process stores with workers started.
pub async fn create_app() -> Result<axum::Router, StartupError> {
    let state = build_state(Config::in_memory()).await?;
    if let Some(workers) = state.workers() {
        workers.start().await?;
    }
    Ok(app(state))
}
