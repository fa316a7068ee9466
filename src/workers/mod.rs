use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::EventBus;
use crate::history::ReviewHistory;
use crate::memory::IntervalRecommender;
use crate::scanner::{ScanConfig, ScanSession, SessionSnapshot, TickOutcome};

struct ActiveSession {
    session: Arc<ScanSession>,
    job_id: Uuid,
}

type SessionMap = Arc<RwLock<HashMap<String, ActiveSession>>>;

/// Owns one repeated scheduler job per active user session.
pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    sessions: SessionMap,
    history: Arc<dyn ReviewHistory>,
    recommender: Arc<IntervalRecommender>,
    bus: Arc<EventBus>,
    config: ScanConfig,
}

impl WorkerManager {
    pub async fn new(
        history: Arc<dyn ReviewHistory>,
        recommender: Arc<IntervalRecommender>,
        bus: Arc<EventBus>,
        config: ScanConfig,
    ) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await.map_err(WorkerError::Scheduler)?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            history,
            recommender,
            bus,
            config,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Start the scheduler and the listener that closes due prompts when an
    /// outcome or dismissal arrives.
    pub async fn start(&self) -> Result<(), WorkerError> {
        if !self.config.enabled {
            info!("ENABLE_DUE_SCANNER is false, skipping scanner startup");
            return Ok(());
        }

        {
            let scheduler = self.scheduler.lock().await;
            scheduler.start().await.map_err(WorkerError::Scheduler)?;
        }

        let sessions = Arc::clone(&self.sessions);
        let mut events = self.bus.subscribe_global();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    received = events.recv() => match received {
                        Ok(envelope) => {
                            if !envelope.event.resolves_prompt() {
                                continue;
                            }
                            if let Some(item_id) = envelope.event.item_id() {
                                resolve_prompt(&sessions, envelope.event.user_id(), item_id);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "Outcome listener lagged behind event bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!("Outcome listener stopped");
        });

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            scan_timeout_secs = self.config.scan_timeout.as_secs(),
            "Due-item scanner started"
        );
        Ok(())
    }

    /// Start scanning for `user_id`. The session is registered first, then one
    /// tick runs right away. An already running session is returned as is.
    pub async fn start_session(&self, user_id: &str) -> Result<Arc<ScanSession>, WorkerError> {
        if !self.config.enabled {
            return Err(WorkerError::Disabled);
        }

        let scheduler = self.scheduler.lock().await;
        let existing = self.session(user_id);
        if let Some(session) = existing {
            return Ok(session);
        }

        let session = Arc::new(ScanSession::new(
            user_id,
            Arc::clone(&self.history),
            Arc::clone(&self.recommender),
            Arc::clone(&self.bus),
            self.config.clone(),
        ));

        let job_session = Arc::clone(&session);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let job = Job::new_repeated_async(self.config.poll_interval, move |_uuid, _lock| {
            let session = Arc::clone(&job_session);
            let mut rx = shutdown_rx.resubscribe();
            Box::pin(async move {
                tokio::select! {
                    _ = rx.recv() => {},
                    outcome = session.tick() => {
                        if outcome == TickOutcome::Failed {
                            error!(user_id = %session.user_id(), "Scheduled scan failed");
                        }
                    }
                }
            })
        })
        .map_err(WorkerError::Scheduler)?;
        let job_id = scheduler.add(job).await.map_err(WorkerError::Scheduler)?;

        self.sessions.write().insert(
            user_id.to_string(),
            ActiveSession {
                session: Arc::clone(&session),
                job_id,
            },
        );

        drop(scheduler);
        info!(user_id = %user_id, job_id = %job_id, "Scan session started");

        let first = session.tick().await;
        debug!(user_id = %user_id, outcome = ?first, "Initial scan finished");
        Ok(session)
    }

    /// Cancel the user's session. Returns false when none was running.
    pub async fn stop_session(&self, user_id: &str) -> Result<bool, WorkerError> {
        let scheduler = self.scheduler.lock().await;
        let removed = self.sessions.write().remove(user_id);
        let Some(active) = removed else {
            return Ok(false);
        };

        active.session.stop();
        scheduler
            .remove(&active.job_id)
            .await
            .map_err(WorkerError::Scheduler)?;

        info!(user_id = %user_id, "Scan session stopped");
        Ok(true)
    }

    pub fn session(&self, user_id: &str) -> Option<Arc<ScanSession>> {
        self.sessions
            .read()
            .get(user_id)
            .map(|active| Arc::clone(&active.session))
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> = self
            .sessions
            .read()
            .values()
            .map(|active| active.session.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        snapshots
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub async fn stop(&self) {
        info!("Stopping scan sessions...");
        let _ = self.shutdown_tx.send(());

        let drained: Vec<ActiveSession> = self.sessions.write().drain().map(|(_, a)| a).collect();
        for active in drained {
            active.session.stop();
        }

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "Error shutting down scheduler");
        }

        info!("Scan sessions stopped");
    }
}

fn resolve_prompt(sessions: &SessionMap, user_id: &str, item_id: &str) {
    let session = sessions
        .read()
        .get(user_id)
        .map(|active| Arc::clone(&active.session));
    if let Some(session) = session {
        session.resolve(item_id);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
    #[error("due-item scanner is disabled")]
    Disabled,
}
