use crate::bot::{BotStats, PollController, RunOutcome, SharedStats};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Errors returned by the start/stop operations
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Bot is already running")]
    AlreadyRunning,

    #[error("Bot is not running")]
    NotRunning,

    #[error("Failed to start bot: {0:#}")]
    Construction(anyhow::Error),

    #[error("Bot task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Running,
    Stopped,
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotStatus::Running => write!(f, "running"),
            BotStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Builds a fresh controller for each start
pub type ControllerFactory = Arc<dyn Fn() -> anyhow::Result<PollController> + Send + Sync>;

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<RunOutcome>,
}

/// Starts, stops and reports on the bot running in a background task.
///
/// The run word is `0` while stopped and holds the id of the active run
/// otherwise. A run that ends on its own clears the word only if it still
/// holds its id, so a late finisher never marks a newer run as stopped.
pub struct Supervisor {
    factory: ControllerFactory,
    run_word: Arc<AtomicU64>,
    next_id: AtomicU64,
    active: Mutex<Option<ActiveRun>>,
    stats: RwLock<Option<SharedStats>>,
    stop_grace: Duration,
}

impl Supervisor {
    pub fn new(factory: ControllerFactory, stop_grace: Duration) -> Self {
        Self {
            factory,
            run_word: Arc::new(AtomicU64::new(0)),
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
            stats: RwLock::new(None),
            stop_grace,
        }
    }

    /// Construct a controller and run it in the background. Returns the run id.
    pub async fn start(&self) -> Result<u64, ControlError> {
        let mut active = self.active.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self
            .run_word
            .compare_exchange(0, id, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ControlError::AlreadyRunning);
        }

        let mut controller = match (self.factory)() {
            Ok(controller) => controller,
            Err(e) => {
                self.run_word.store(0, Ordering::Release);
                error!("Failed to construct bot: {e:#}");
                return Err(ControlError::Construction(e));
            }
        };

        let cancel = controller.cancel_token();
        *self.stats.write().await = Some(controller.stats());

        let run_word = self.run_word.clone();
        let handle = tokio::spawn(async move {
            let outcome = controller.run().await;
            if run_word
                .compare_exchange(id, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                info!("Bot run {id} ended: {outcome:?}");
            }
            outcome
        });

        *active = Some(ActiveRun { id, cancel, handle });
        info!("Bot run {id} started");
        Ok(id)
    }

    /// Signal the bot to stop and wait up to the grace period for it to finish
    pub async fn stop(&self) -> Result<(), ControlError> {
        let mut active = self.active.lock().await;

        if self.run_word.load(Ordering::Acquire) == 0 {
            return Err(ControlError::NotRunning);
        }
        let Some(run) = active.take() else {
            return Err(ControlError::NotRunning);
        };

        run.cancel.cancel();
        let joined = time::timeout(self.stop_grace, run.handle).await;

        // Mark stopped whether or not the task finished in time
        let _ = self
            .run_word
            .compare_exchange(run.id, 0, Ordering::AcqRel, Ordering::Acquire);

        match joined {
            Ok(Ok(outcome)) => {
                info!("Bot run {id} stopped: {outcome:?}", id = run.id);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Bot run {id} task failed: {e}", id = run.id);
                Err(ControlError::Join(e.to_string()))
            }
            Err(_) => {
                warn!(
                    "Bot run {id} did not stop within {grace:?}, detaching it",
                    id = run.id,
                    grace = self.stop_grace
                );
                Ok(())
            }
        }
    }

    pub fn status(&self) -> BotStatus {
        if self.run_word.load(Ordering::Acquire) == 0 {
            BotStatus::Stopped
        } else {
            BotStatus::Running
        }
    }

    /// Counters of the current or most recent run
    pub async fn stats(&self) -> Option<BotStats> {
        let shared = self.stats.read().await.clone()?;
        let snapshot = shared.read().await.clone();
        Some(snapshot)
    }
}
