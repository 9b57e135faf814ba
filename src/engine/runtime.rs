//! Async runtime for the session engine
//!
//! Wraps the synchronous state machine in a single `tokio::select!` loop:
//! readings drain from a single-consumer queue (which serializes all state
//! transitions), the settle-window deadline and the recovery-snapshot
//! interval are timer arms, and shutdown cancels both. Snapshot writes are
//! fire-and-forget blocking tasks so persistence never stalls ingestion.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval, sleep_until};

use crate::config::Config;
use crate::error::Result;
use crate::logging::get_logger;
use crate::reading::Reading;
use crate::recovery::RecoveryStore;
use crate::session::CompletedSession;
use crate::stats::SharedStats;

use super::{EngineState, SessionEngine, SessionView};

/// Receiver side of a completion event, for external automation and export
#[async_trait]
pub trait CompletionSink: Send + Sync {
    /// Called once per finalized, non-discarded session
    async fn on_session_completed(&self, session: Arc<CompletedSession>);
}

/// Handle for feeding and observing a running engine
#[derive(Clone)]
pub struct EngineHandle {
    readings_tx: mpsc::UnboundedSender<Reading>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    view_rx: watch::Receiver<Option<SessionView>>,
    completed_tx: broadcast::Sender<Arc<CompletedSession>>,
}

impl EngineHandle {
    /// Sender for the canonical reading stream
    pub fn readings(&self) -> mpsc::UnboundedSender<Reading> {
        self.readings_tx.clone()
    }

    /// Live view of the active session, refreshed on every reading
    pub fn view(&self) -> watch::Receiver<Option<SessionView>> {
        self.view_rx.clone()
    }

    /// Subscribe to completion events
    pub fn subscribe_completed(&self) -> broadcast::Receiver<Arc<CompletedSession>> {
        self.completed_tx.subscribe()
    }

    /// Request a graceful shutdown of the engine loop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Owns the engine and its timers; one instance per charger
pub struct EngineRuntime {
    engine: SessionEngine,
    store: RecoveryStore,
    stats: SharedStats,
    sinks: Vec<Arc<dyn CompletionSink>>,
    readings_rx: mpsc::UnboundedReceiver<Reading>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
    view_tx: watch::Sender<Option<SessionView>>,
    completed_tx: broadcast::Sender<Arc<CompletedSession>>,
    settle_deadline: Option<Instant>,
    settle_timeout: Duration,
    snapshot_interval: Duration,
    logger: crate::logging::StructuredLogger,
}

impl EngineRuntime {
    /// Create a runtime and its handle.
    ///
    /// Loads the recovery slot best-effort: a corrupt or unreadable
    /// snapshot degrades recovery, never startup.
    pub fn new(config: Config, stats: SharedStats) -> (Self, EngineHandle) {
        let logger = get_logger("runtime");
        let store = RecoveryStore::new(&config.recovery.path);
        let settle_timeout = Duration::from_secs(config.engine.settle_timeout_secs);
        let snapshot_interval = Duration::from_secs(config.recovery.interval_secs);

        let mut engine = SessionEngine::new(config);
        match store.load() {
            Ok(Some(snapshot)) => engine.adopt_recovery(snapshot),
            Ok(None) => {}
            Err(e) => logger.warn(&format!("Failed to load recovery snapshot: {}", e)),
        }

        let (readings_tx, readings_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(None);
        let (completed_tx, _) = broadcast::channel(64);

        let handle = EngineHandle {
            readings_tx,
            shutdown_tx,
            view_rx,
            completed_tx: completed_tx.clone(),
        };

        let runtime = Self {
            engine,
            store,
            stats,
            sinks: Vec::new(),
            readings_rx,
            shutdown_rx,
            view_tx,
            completed_tx,
            settle_deadline: None,
            settle_timeout,
            snapshot_interval,
            logger,
        };

        (runtime, handle)
    }

    /// Register an external completion sink
    pub fn add_sink(&mut self, sink: Arc<dyn CompletionSink>) {
        self.sinks.push(sink);
    }

    /// The underlying state machine
    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    /// Run the engine loop until shutdown or the reading channel closes
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting session engine loop");

        let mut snapshot_interval = interval(self.snapshot_interval);
        snapshot_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let settle_deadline = self.settle_deadline;
            tokio::select! {
                maybe_reading = self.readings_rx.recv() => {
                    match maybe_reading {
                        Some(reading) => self.on_reading(&reading),
                        None => {
                            self.logger.info("Reading channel closed, shutting down");
                            break;
                        }
                    }
                }
                _ = snapshot_interval.tick() => {
                    self.persist_snapshot();
                }
                () = sleep_until(settle_deadline.unwrap_or_else(Instant::now)),
                    if settle_deadline.is_some() =>
                {
                    self.on_settle_timeout();
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        // An in-flight settle window is abandoned, not finalized: write a
        // final snapshot so the session is picked back up on next startup.
        // Synchronous on purpose, the slot must be durable before we return.
        if let Some(snapshot) = self.engine.recovery_snapshot()
            && let Err(e) = self.store.save(&snapshot)
        {
            self.logger.warn(&format!("Final snapshot write failed: {}", e));
        }
        self.logger.info("Session engine loop stopped");
        Ok(())
    }

    fn on_reading(&mut self, reading: &Reading) {
        let was_active = self.engine.state() != EngineState::Idle;
        let completed = self.engine.process_reading(reading);
        self.after_transition(completed, was_active);
    }

    fn on_settle_timeout(&mut self) {
        let was_active = self.engine.state() != EngineState::Idle;
        let completed = self.engine.on_settle_timeout(Utc::now());
        self.after_transition(completed, was_active);
    }

    fn after_transition(&mut self, completed: Option<CompletedSession>, was_active: bool) {
        let _ = self.view_tx.send(self.engine.view());

        self.settle_deadline = if self.engine.state() == EngineState::Completing {
            // Keep an already-armed deadline; arm a new one on entry
            Some(
                self.settle_deadline
                    .unwrap_or_else(|| Instant::now() + self.settle_timeout),
            )
        } else {
            None
        };

        if let Some(completed) = completed {
            self.deliver(Arc::new(completed));
        }

        if was_active && self.engine.state() == EngineState::Idle {
            self.clear_snapshot();
        }
    }

    /// Forward a completion record to stats, broadcast, and sinks
    fn deliver(&self, completed: Arc<CompletedSession>) {
        match self.stats.write() {
            Ok(mut stats) => {
                stats.apply(&completed);
            }
            Err(_) => self.logger.error("Statistics lock poisoned, skipping update"),
        }

        let _ = self.completed_tx.send(Arc::clone(&completed));

        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let record = Arc::clone(&completed);
            tokio::spawn(async move {
                sink.on_session_completed(record).await;
            });
        }
    }

    fn persist_snapshot(&self) {
        let Some(snapshot) = self.engine.recovery_snapshot() else {
            return;
        };
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.save(&snapshot) {
                get_logger("recovery").warn(&format!("Snapshot write failed: {}", e));
            }
        });
    }

    fn clear_snapshot(&self) {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.clear() {
                get_logger("recovery").warn(&format!("Snapshot clear failed: {}", e));
            }
        });
    }
}
