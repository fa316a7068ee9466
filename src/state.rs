use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::config::Config;
use crate::service::ReviewService;
use crate::workers::WorkerManager;

#[derive(Clone)]
pub struct AppState {
    service: Arc<ReviewService>,
    workers: Option<Arc<WorkerManager>>,
    config: Arc<Config>,
    started_at: Instant,
    started_at_system: SystemTime,
}

impl AppState {
    pub fn new(
        service: Arc<ReviewService>,
        workers: Option<Arc<WorkerManager>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            service,
            workers,
            config,
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
        }
    }

    pub fn service(&self) -> &ReviewService {
        &self.service
    }

    pub fn workers(&self) -> Option<Arc<WorkerManager>> {
        self.workers.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }
}
