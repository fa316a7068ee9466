//! Due-Item Scanner
//!
//! One [`ScanSession`] per active user. Each tick fetches the user's history,
//! walks items in ascending id order and stops at the first item whose elapsed
//! time since its last review has reached the recommended gap.
//!
//!   IDLE -> POLLING -> ITEM_DUE | IDLE
//!   ITEM_DUE -> IDLE   (on outcome or dismissal of the due item)
//!
//! An outcome that lands while POLLING is remembered; if the scan then picks
//! that same item from its older history snapshot, the tick ends in IDLE.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{EventBus, ItemDuePayload, SchedulerEvent};
use crate::history::{group_by_item, HistoryError, ReviewHistory};
use crate::memory::IntervalRecommender;
use crate::types::{DueItem, ReviewEvent};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub poll_interval: Duration,
    pub scan_timeout: Duration,
    pub enabled: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            scan_timeout: Duration::from_secs(DEFAULT_SCAN_TIMEOUT_SECS),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ScanState {
    Idle,
    Polling,
    ItemDue {
        #[serde(rename = "itemId")]
        item_id: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Due(DueItem),
    NothingDue,
    /// Dropped: another scan of this session was still in flight.
    Skipped,
    /// A due prompt is outstanding; nothing was scanned.
    AwaitingOutcome,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("history fetch failed: {0}")]
    History(#[from] HistoryError),
    #[error("scan exceeded {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Default)]
struct ScanCounters {
    ticks: AtomicU64,
    due_signals: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub ticks: u64,
    pub due_signals: u64,
    pub failures: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub user_id: String,
    #[serde(flatten)]
    pub state: ScanState,
    pub poll_interval_sec: u64,
    pub stopped: bool,
    pub stats: ScanStats,
}

#[derive(Debug)]
struct Machine {
    state: ScanState,
    resolved_while_polling: Vec<String>,
}

impl Machine {
    fn settle(&mut self, state: ScanState) {
        self.state = state;
        self.resolved_while_polling.clear();
    }
}

/// Clears the in-flight flag however the scan ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn elapsed_sec(now: DateTime<Utc>, last_review_at: DateTime<Utc>) -> f64 {
    ((now - last_review_at).num_milliseconds() as f64 / 1000.0).max(0.0)
}

/// Evaluate items in key order against their recommended gaps.
///
/// Per-item recommendation failures are logged and skipped. With
/// `first_only` evaluation stops at the first due item.
pub async fn evaluate_due_items(
    recommender: &IntervalRecommender,
    user_id: &str,
    by_item: &BTreeMap<String, Vec<ReviewEvent>>,
    now: DateTime<Utc>,
    first_only: bool,
) -> Vec<DueItem> {
    let mut due = Vec::new();

    for (item_id, events) in by_item {
        let Some(last) = events.last() else {
            continue;
        };
        let elapsed = elapsed_sec(now, last.timestamp);

        let recommendation = match recommender.recommend_for_item(user_id, events).await {
            Ok(r) => r,
            Err(e) => {
                warn!(user_id = %user_id, item_id = %item_id, error = %e, "Recommendation failed, skipping item");
                continue;
            }
        };

        if elapsed >= recommendation.interval_sec() as f64 {
            due.push(DueItem {
                item_id: item_id.clone(),
                last_review_at: last.timestamp,
                elapsed_sec: elapsed,
                recommended_interval_sec: recommendation.interval_sec(),
            });
            if first_only {
                break;
            }
        }
    }

    due
}

pub struct ScanSession {
    user_id: String,
    history: Arc<dyn ReviewHistory>,
    recommender: Arc<IntervalRecommender>,
    bus: Arc<EventBus>,
    config: ScanConfig,
    machine: Mutex<Machine>,
    in_flight: AtomicBool,
    stopped: AtomicBool,
    counters: ScanCounters,
}

impl ScanSession {
    pub fn new(
        user_id: impl Into<String>,
        history: Arc<dyn ReviewHistory>,
        recommender: Arc<IntervalRecommender>,
        bus: Arc<EventBus>,
        config: ScanConfig,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            history,
            recommender,
            bus,
            config,
            machine: Mutex::new(Machine {
                state: ScanState::Idle,
                resolved_while_polling: Vec::new(),
            }),
            in_flight: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            counters: ScanCounters::default(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn state(&self) -> ScanState {
        self.machine.lock().state.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Later ticks become no-ops; a tick already in flight runs to completion.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> ScanStats {
        ScanStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            due_signals: self.counters.due_signals.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user_id: self.user_id.clone(),
            state: self.state(),
            poll_interval_sec: self.config.poll_interval.as_secs(),
            stopped: self.is_stopped(),
            stats: self.stats(),
        }
    }

    /// Return to IDLE if `item_id` is the outstanding due item. While a scan
    /// is in flight the item is remembered so the scan cannot raise it again.
    pub fn resolve(&self, item_id: &str) -> bool {
        let mut machine = self.machine.lock();
        match &machine.state {
            ScanState::ItemDue { item_id: due } if due == item_id => {
                machine.settle(ScanState::Idle);
                debug!(user_id = %self.user_id, item_id = %item_id, "Due prompt resolved");
                true
            }
            ScanState::Polling => {
                machine.resolved_while_polling.push(item_id.to_string());
                debug!(user_id = %self.user_id, item_id = %item_id, "Outcome arrived mid-scan");
                true
            }
            _ => false,
        }
    }

    pub async fn tick(&self) -> TickOutcome {
        if self.is_stopped() {
            return TickOutcome::Skipped;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(user_id = %self.user_id, "Scan still in flight, tick dropped");
            return TickOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        {
            let mut machine = self.machine.lock();
            if matches!(machine.state, ScanState::ItemDue { .. }) {
                return TickOutcome::AwaitingOutcome;
            }
            machine.settle(ScanState::Polling);
        }
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let result = match tokio::time::timeout(self.config.scan_timeout, self.scan_at(Utc::now()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ScanError::Timeout(self.config.scan_timeout)),
        };

        match result {
            Ok(Some(due)) => {
                let stale = {
                    let mut machine = self.machine.lock();
                    let stale = machine.resolved_while_polling.contains(&due.item_id);
                    if stale {
                        machine.settle(ScanState::Idle);
                    } else {
                        machine.settle(ScanState::ItemDue {
                            item_id: due.item_id.clone(),
                        });
                    }
                    stale
                };
                if stale {
                    debug!(user_id = %self.user_id, item_id = %due.item_id, "Due item already reviewed during scan");
                    return TickOutcome::NothingDue;
                }
                self.counters.due_signals.fetch_add(1, Ordering::Relaxed);
                info!(
                    user_id = %self.user_id,
                    item_id = %due.item_id,
                    elapsed_sec = due.elapsed_sec,
                    recommended_interval_sec = due.recommended_interval_sec,
                    "Item due for review"
                );
                self.bus
                    .publish(SchedulerEvent::ItemDue(ItemDuePayload {
                        user_id: self.user_id.clone(),
                        item_id: due.item_id.clone(),
                        elapsed_sec: due.elapsed_sec,
                        recommended_interval_sec: due.recommended_interval_sec,
                        timestamp: Utc::now(),
                    }))
                    .await;
                TickOutcome::Due(due)
            }
            Ok(None) => {
                self.machine.lock().settle(ScanState::Idle);
                TickOutcome::NothingDue
            }
            Err(e) => {
                self.machine.lock().settle(ScanState::Idle);
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(user_id = %self.user_id, error = %e, "Scan tick failed, retrying next tick");
                TickOutcome::Failed
            }
        }
    }

    /// One scan pass against `now`, without touching session state.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> Result<Option<DueItem>, ScanError> {
        let events = self.history.events_for_user(&self.user_id).await?;
        let by_item = group_by_item(events);
        let mut due = evaluate_due_items(&self.recommender, &self.user_id, &by_item, now, true).await;
        Ok(due.pop())
    }
}
