#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dmbot::bot::PollController;
use dmbot::config::{BotConfig, Credentials};
use dmbot::llm::{CompletionModel, LlmError};
use dmbot::session::Session;
use dmbot::social::{
    ClientError, DirectMessage, DirectThread, FollowRequest, MessageTime, SocialClient,
    ThreadFilter,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BOT_ID: &str = "100";

/// Observable state behind [`FakeClient`]
#[derive(Default)]
pub struct FakeState {
    pub threads: Vec<DirectThread>,
    pub unread_threads: Vec<DirectThread>,
    pub messages: HashMap<String, Vec<DirectMessage>>,
    pub pending: Vec<FollowRequest>,
    pub failing_threads: HashSet<String>,
    pub failing_approvals: HashSet<String>,
    pub expired_threads: HashSet<String>,
    pub session_valid: bool,
    pub login_fails: bool,
    pub login_without_id: bool,
    pub failing_session_checks: u32,
    pub login_calls: u32,
    pub probe_calls: u32,
    pub approved: Vec<String>,
    pub sent: Vec<(String, String)>,
}

pub type SharedState = Arc<Mutex<FakeState>>;

/// In-memory account driven by a [`FakeState`]
pub struct FakeClient {
    state: SharedState,
    session: Option<Session>,
}

impl FakeClient {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            session: None,
        }
    }
}

pub fn session_for(user_id: &str) -> Session {
    Session {
        authorization: Some("Bearer IGT:2:fake".to_string()),
        user_id: Some(user_id.to_string()),
        username: Some("doebcn".to_string()),
        device_id: "android-fake".to_string(),
        created_at: Utc::now(),
        ..Session::default()
    }
}

fn network(message: &str) -> ClientError {
    ClientError::Network {
        message: message.to_string(),
    }
}

#[async_trait]
impl SocialClient for FakeClient {
    fn restore_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    fn session(&self) -> Option<Session> {
        self.session.clone()
    }

    fn user_id(&self) -> Option<String> {
        self.session.as_ref().and_then(|s| s.user_id.clone())
    }

    async fn login(&mut self, _username: &str, _password: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.login_calls += 1;
        if state.login_fails {
            return Err(ClientError::ChallengeRequired {
                message: "challenge_required".to_string(),
            });
        }
        state.session_valid = true;
        let mut session = session_for(BOT_ID);
        if state.login_without_id {
            session.user_id = None;
        }
        self.session = Some(session);
        Ok(())
    }

    async fn probe(&mut self) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.probe_calls += 1;
        if state.failing_session_checks > 0 {
            state.failing_session_checks -= 1;
            return Err(ClientError::LoginRequired {
                message: "login_required".to_string(),
            });
        }
        if self.session.is_some() && state.session_valid {
            Ok(())
        } else {
            Err(ClientError::LoginRequired {
                message: "login_required".to_string(),
            })
        }
    }

    async fn pending_follow_requests(&mut self) -> Result<Vec<FollowRequest>, ClientError> {
        Ok(self.state.lock().unwrap().pending.clone())
    }

    async fn approve_follow_request(&mut self, user_id: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_approvals.contains(user_id) {
            return Err(network("connection reset"));
        }
        state.approved.push(user_id.to_string());
        Ok(())
    }

    async fn threads(&mut self, filter: ThreadFilter) -> Result<Vec<DirectThread>, ClientError> {
        let state = self.state.lock().unwrap();
        Ok(match filter {
            ThreadFilter::All => state.threads.clone(),
            ThreadFilter::Unread => state.unread_threads.clone(),
        })
    }

    async fn thread_messages(
        &mut self,
        thread_id: &str,
    ) -> Result<Vec<DirectMessage>, ClientError> {
        let state = self.state.lock().unwrap();
        if state.expired_threads.contains(thread_id) {
            return Err(ClientError::LoginRequired {
                message: "login_required".to_string(),
            });
        }
        if state.failing_threads.contains(thread_id) {
            return Err(network("thread listing timed out"));
        }
        Ok(state.messages.get(thread_id).cloned().unwrap_or_default())
    }

    async fn send_direct(&mut self, text: &str, recipient_id: &str) -> Result<(), ClientError> {
        self.state
            .lock()
            .unwrap()
            .sent
            .push((recipient_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Completion model that either answers with a fixed reply or times out
pub struct FakeModel {
    reply: Option<String>,
    pub calls: Mutex<u32>,
}

impl FakeModel {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            calls: Mutex::new(0),
        })
    }

    pub fn timing_out() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            calls: Mutex::new(0),
        })
    }
}

#[async_trait]
impl CompletionModel for FakeModel {
    async fn complete(&self, _system_prompt: &str, _user_message: &str) -> Result<String, LlmError> {
        *self.calls.lock().unwrap() += 1;
        self.reply
            .clone()
            .ok_or_else(|| LlmError::Network("operation timed out".to_string()))
    }
}

/// Settable clock shared with a controller
#[derive(Clone)]
pub struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl TestClock {
    pub fn new() -> Self {
        let start = DateTime::from_timestamp(1705764600, 0).unwrap();
        Self(Arc::new(Mutex::new(start)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }

    pub fn advance(&self, by: ChronoDuration) {
        *self.0.lock().unwrap() += by;
    }
}

/// Configuration with every delay zeroed and the session file under `dir`
pub fn test_config(dir: &Path) -> BotConfig {
    BotConfig {
        credentials: Some(Credentials {
            username: "doebcn".to_string(),
            password: "secret".to_string(),
        }),
        openai_api_key: Some("sk-test".to_string()),
        check_interval: Duration::from_millis(10),
        response_delay: (Duration::ZERO, Duration::ZERO),
        session_file: dir.join("session.json"),
        enable_health_check: false,
        retry_delay: Duration::ZERO,
        login_failure_delay: Duration::ZERO,
        stop_grace: Duration::from_secs(2),
        ..BotConfig::default()
    }
}

pub fn controller(
    config: BotConfig,
    state: &SharedState,
    model: Arc<FakeModel>,
    clock: &TestClock,
) -> PollController {
    let clock = clock.clone();
    PollController::new(config, Box::new(FakeClient::new(state.clone())), model)
        .unwrap()
        .with_clock(move || clock.now())
}

pub fn thread(id: &str) -> DirectThread {
    DirectThread {
        id: id.to_string(),
        title: None,
    }
}

pub fn message(id: &str, thread_id: &str, sender: &str, text: &str, at: DateTime<Utc>) -> DirectMessage {
    DirectMessage {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        sender_id: sender.to_string(),
        text: text.to_string(),
        sent_at: MessageTime::At(at),
    }
}
