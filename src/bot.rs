use crate::config::{BotConfig, Credentials, DeferredPolicy};
use crate::datetime_utils::{format_for_display, now_utc};
use crate::dedup::Deduplicator;
use crate::instagram::InstagramClient;
use crate::llm::{CompletionModel, OpenAiClient};
use crate::rate_limit::RateLimiter;
use crate::responder::ResponseGenerator;
use crate::session::SessionStore;
use crate::social::{ClientError, DirectMessage, SocialClient, ThreadFilter};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters describing one run of the bot
#[derive(Clone, Debug, Serialize)]
pub struct BotStats {
    pub started_at: DateTime<Utc>,
    pub cycles: u64,
    pub failed_cycles: u64,
    pub responses_sent: u64,
    pub follow_requests_approved: u64,
    /// Rate-limit refusals; a message refused on several sweeps counts each time
    pub deferrals: u64,
    pub errors: u64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_response_at: Option<DateTime<Utc>>,
}

impl BotStats {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            cycles: 0,
            failed_cycles: 0,
            responses_sent: 0,
            follow_requests_approved: 0,
            deferrals: 0,
            errors: 0,
            last_message_at: None,
            last_response_at: None,
        }
    }
}

pub type SharedStats = Arc<RwLock<BotStats>>;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Cancelled from outside
    Stopped,
    /// Too many consecutive failed cycles
    RetriesExhausted,
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Drives login, health checks and the follow-request and message sweeps
pub struct PollController {
    client: Box<dyn SocialClient>,
    responder: ResponseGenerator,
    dedup: Deduplicator,
    limiter: RateLimiter,
    sessions: SessionStore,
    credentials: Credentials,
    config: BotConfig,
    stats: SharedStats,
    cancel: CancellationToken,
    clock: Clock,
    own_user_id: Option<String>,
    last_health_check: Option<Instant>,
    retry_count: u32,
}

/// Build a controller talking to Instagram and the OpenAI-compatible endpoint
pub fn build_controller(config: &BotConfig) -> Result<PollController> {
    let client = InstagramClient::new(config).context("Failed to create Instagram client")?;
    let model = OpenAiClient::new(config).context("Failed to create language model client")?;
    PollController::new(config.clone(), Box::new(client), Arc::new(model))
}

impl PollController {
    pub fn new(
        config: BotConfig,
        client: Box<dyn SocialClient>,
        model: Arc<dyn CompletionModel>,
    ) -> Result<Self> {
        let credentials = config
            .credentials
            .clone()
            .context("Instagram credentials are not configured")?;
        let now = now_utc();

        Ok(Self {
            client,
            responder: ResponseGenerator::new(model, &config),
            dedup: Deduplicator::new(config.staleness_window),
            limiter: RateLimiter::new(config.max_responses_per_hour, now),
            sessions: SessionStore::new(&config.session_file, config.save_session),
            credentials,
            stats: Arc::new(RwLock::new(BotStats::new(now))),
            cancel: CancellationToken::new(),
            clock: Box::new(now_utc),
            own_user_id: None,
            last_health_check: None,
            retry_count: 0,
            config,
        })
    }

    /// Replace the wall clock used for staleness and rate decisions
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        let now = clock();
        self.limiter = RateLimiter::new(self.config.max_responses_per_hour, now);
        self.clock = Box::new(clock);
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    pub fn deduplicator(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Reuse the saved session when it still works, otherwise log in with credentials
    pub async fn login(&mut self) -> Result<()> {
        if let Some(session) = self.sessions.load() {
            self.client.restore_session(session);
            match self.client.probe().await {
                Ok(()) => {
                    if let Some(user_id) = self.client.user_id() {
                        info!("Resumed saved session");
                        self.on_logged_in(user_id);
                        return Ok(());
                    }
                    warn!("Saved session has no account id, logging in with credentials");
                }
                Err(ClientError::LoginRequired { message }) => {
                    info!("Saved session expired ({message}), logging in with credentials");
                }
                Err(e) => warn!("Saved session check failed ({e}), logging in with credentials"),
            }
        }

        info!(
            "Logging in as {username}",
            username = self.credentials.username
        );
        let result = self
            .client
            .login(&self.credentials.username, &self.credentials.password)
            .await;

        match result {
            Ok(()) => {
                let Some(user_id) = self.client.user_id() else {
                    error!("Login did not report the account id");
                    pause(&self.cancel, self.config.login_failure_delay).await;
                    bail!("Instagram login did not report the account id");
                };
                info!("Login successful");
                if let Some(session) = self.client.session() {
                    self.sessions.save(&session);
                }
                self.on_logged_in(user_id);
                Ok(())
            }
            Err(e) => {
                error!("Login failed: {e}");
                pause(&self.cancel, self.config.login_failure_delay).await;
                Err(e).context("Instagram login failed")
            }
        }
    }

    fn on_logged_in(&mut self, user_id: String) {
        info!("Bot user ID: {user_id}");
        self.own_user_id = Some(user_id);
        self.last_health_check = Some(Instant::now());
    }

    /// Probe the session when the health-check interval has elapsed
    pub async fn health_check(&mut self) -> Result<(), ClientError> {
        if !self.config.enable_health_check {
            return Ok(());
        }
        if let Some(last) = self.last_health_check {
            if last.elapsed() < self.config.health_check_interval {
                return Ok(());
            }
        }

        match self.client.probe().await {
            Ok(()) => {
                info!("Health check passed");
                self.last_health_check = Some(Instant::now());
                Ok(())
            }
            Err(e) => {
                error!("Health check failed: {e}");
                Err(e)
            }
        }
    }

    /// Approve every pending follow request
    pub async fn sweep_follow_requests(&mut self) -> Result<(), ClientError> {
        info!("Checking for follow requests...");

        let pending = match self.client.pending_follow_requests().await {
            Ok(pending) => pending,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                error!("Error checking follow requests: {e}");
                self.stats.write().await.errors += 1;
                return Ok(());
            }
        };
        info!(
            "Found {count} pending follow requests",
            count = pending.len()
        );

        for request in pending {
            let user_id = request.user_id;
            match self.client.approve_follow_request(&user_id).await {
                Ok(()) => {
                    info!("Accepted follow request from user {user_id}");
                    self.stats.write().await.follow_requests_approved += 1;
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    error!("Error accepting follow request from user {user_id}: {e}");
                    self.stats.write().await.errors += 1;
                }
            }
        }

        Ok(())
    }

    /// Answer new messages in every listed thread
    pub async fn sweep_messages(&mut self) -> Result<(), ClientError> {
        info!("Checking for new messages...");
        let now = self.now();
        self.dedup.prune(now);

        let mut threads = match self.client.threads(ThreadFilter::All).await {
            Ok(threads) => threads,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                error!("Error checking messages: {e}");
                self.stats.write().await.errors += 1;
                return Ok(());
            }
        };
        info!("Found {count} message threads", count = threads.len());

        if self.config.process_hidden_messages {
            match self.client.threads(ThreadFilter::Unread).await {
                Ok(hidden) => {
                    info!("Found {count} hidden message threads", count = hidden.len());
                    threads.extend(hidden);
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    error!("Error listing hidden message threads: {e}");
                    self.stats.write().await.errors += 1;
                }
            }
        }

        let mut new_messages = 0;
        for thread in threads {
            if self.cancel.is_cancelled() {
                break;
            }

            let messages = match self.client.thread_messages(&thread.id).await {
                Ok(messages) => messages,
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    error!("Error processing thread {id}: {e}", id = thread.id);
                    self.stats.write().await.errors += 1;
                    continue;
                }
            };
            debug!(
                "Thread {id} has {count} messages",
                id = thread.id,
                count = messages.len()
            );

            for message in messages.iter().rev() {
                if self.cancel.is_cancelled() {
                    break;
                }
                if self.is_own(message) {
                    debug!("Skipping message {id} from the bot's own account", id = message.id);
                    continue;
                }
                if self.dedup.is_processed(&message.id) {
                    debug!("Message {id} already processed, skipping", id = message.id);
                    continue;
                }
                if !self.dedup.is_new(message, now) {
                    continue;
                }

                new_messages += 1;
                info!(
                    "Processing new message from user {sender}: {preview}...",
                    sender = message.sender_id,
                    preview = preview(&message.text)
                );
                self.stats.write().await.last_message_at = Some(now);
                self.dispatch(message).await;
            }
        }

        info!("Processed {new_messages} new messages");
        Ok(())
    }

    fn is_own(&self, message: &DirectMessage) -> bool {
        self.own_user_id.as_deref() == Some(message.sender_id.as_str())
    }

    /// Reply to one message, subject to the hourly cap
    async fn dispatch(&mut self, message: &DirectMessage) {
        let now = self.now();
        if !self.limiter.should_respond(now) {
            warn!(
                "Rate limit reached, skipping response to message {id}",
                id = message.id
            );
            self.stats.write().await.deferrals += 1;
            match self.config.deferred_policy {
                DeferredPolicy::Expire => {}
                DeferredPolicy::Hold => self.dedup.hold(&message.id, now),
                DeferredPolicy::Discard => {
                    self.dedup
                        .mark_processed_at(&message.id, message.sent_at.at());
                }
            }
            return;
        }

        if self.is_own(message) {
            warn!("Skipping response to our own message {id}", id = message.id);
            return;
        }

        if !pause(&self.cancel, self.response_delay()).await {
            return;
        }

        let reply = self.responder.generate(&message.text).await;

        match self.client.send_direct(&reply, &message.sender_id).await {
            Ok(()) => {
                self.dedup
                    .mark_processed_at(&message.id, message.sent_at.at());
                self.limiter.record_response();

                let mut stats = self.stats.write().await;
                stats.responses_sent += 1;
                stats.last_response_at = Some(self.now());
                drop(stats);

                info!(
                    "Responded to message from user {sender} with: {reply}",
                    sender = message.sender_id
                );
            }
            Err(e) => {
                error!("Error sending response to message {id}: {e}", id = message.id);
                self.stats.write().await.errors += 1;
            }
        }
    }

    fn response_delay(&self) -> Duration {
        let (min, max) = self.config.response_delay;
        if max <= min {
            return min;
        }
        let secs = rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Run until cancelled or until too many consecutive cycles fail
    pub async fn run(&mut self) -> RunOutcome {
        info!("Starting Instagram bot");
        self.stats.write().await.started_at = self.now();

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break RunOutcome::Stopped;
            }
            if self.retry_count >= self.config.max_retries {
                error!(
                    "Max retries reached ({max}), giving up",
                    max = self.config.max_retries
                );
                break RunOutcome::RetriesExhausted;
            }

            match self.run_session().await {
                Ok(()) => break RunOutcome::Stopped,
                Err(e) => {
                    error!("Error in main loop: {e:#}");
                    self.retry_count += 1;
                    self.stats.write().await.failed_cycles += 1;
                    if !pause(&self.cancel, self.config.retry_delay).await {
                        break RunOutcome::Stopped;
                    }
                }
            }
        };

        log_final_stats(&self.stats).await;
        outcome
    }

    /// One logged-in stretch. Returns `Ok` only when cancelled.
    async fn run_session(&mut self) -> Result<()> {
        self.login().await?;
        self.retry_count = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            self.health_check()
                .await
                .context("Session health check failed")?;
            self.sweep_follow_requests()
                .await
                .context("Follow request sweep aborted")?;
            self.sweep_messages()
                .await
                .context("Message sweep aborted")?;

            let cycles = {
                let mut stats = self.stats.write().await;
                stats.cycles += 1;
                stats.cycles
            };
            if cycles % 10 == 0 {
                log_stats(&self.stats, self.limiter.remaining()).await;
            }

            if !pause(&self.cancel, self.config.check_interval).await {
                return Ok(());
            }
        }
    }
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = time::sleep(duration) => true,
    }
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

async fn log_stats(stats: &SharedStats, remaining: u32) {
    let stats = stats.read().await;
    let uptime = now_utc() - stats.started_at;

    info!(
        "📊 Stats | Uptime: {hours}h{minutes}m | Cycles: {cycles} (✗{failed}) | Replies: {responses} | Deferred: {deferred} | Follows: {follows} | Quota left: {remaining}",
        hours = uptime.num_hours(),
        minutes = uptime.num_minutes() % 60,
        cycles = stats.cycles,
        failed = stats.failed_cycles,
        responses = stats.responses_sent,
        deferred = stats.deferrals,
        follows = stats.follow_requests_approved
    );
}

async fn log_final_stats(stats: &SharedStats) {
    let stats = stats.read().await;

    info!("=== Final Bot Statistics ===");
    info!(
        "Started: {started}",
        started = format_for_display(&stats.started_at)
    );
    info!("Cycles: {cycles}", cycles = stats.cycles);
    info!("Failed cycles: {failed}", failed = stats.failed_cycles);
    info!("Responses sent: {sent}", sent = stats.responses_sent);
    info!(
        "Follow requests approved: {approved}",
        approved = stats.follow_requests_approved
    );
    info!("============================");
}
