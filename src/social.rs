use crate::datetime_utils::{from_epoch_auto, parse_rfc3339};
use crate::session::Session;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// Raw item fields that may carry the send time, in order of preference
pub const TIMESTAMP_FIELDS: &[&str] = &["taken_at", "timestamp", "created_at"];

/// Errors reported by a social-media client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Login required: {message}")]
    LoginRequired { message: String },

    #[error("Challenge required: {message}")]
    ChallengeRequired { message: String },

    #[error("Rate limited by the API (retry after: {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Failed to decode {what}: {message}")]
    Decode { what: String, message: String },
}

impl ClientError {
    /// Whether the error means the session is no longer usable
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ClientError::LoginRequired { .. } | ClientError::ChallengeRequired { .. }
        )
    }
}

/// When a message was sent, as far as the adapter could tell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTime {
    At(DateTime<Utc>),
    /// The item carried no timestamp field
    Missing,
    /// A timestamp field was present but could not be interpreted
    Unreadable(String),
}

impl MessageTime {
    /// Resolve the send time from the first present field of [`TIMESTAMP_FIELDS`]
    pub fn from_fields(fields: &serde_json::Map<String, Value>) -> Self {
        TIMESTAMP_FIELDS
            .iter()
            .find_map(|name| fields.get(*name).filter(|v| !v.is_null()))
            .map_or(MessageTime::Missing, MessageTime::from_value)
    }

    /// Interpret a single raw timestamp value
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => {
                let epoch = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64));
                match epoch.and_then(from_epoch_auto) {
                    Some(at) => MessageTime::At(at),
                    None => MessageTime::Unreadable(format!("epoch out of range: {n}")),
                }
            }
            Value::String(s) => {
                let trimmed = s.trim();
                let epoch = trimmed.parse::<i64>().ok().or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f as i64)
                });
                if let Some(epoch) = epoch {
                    return match from_epoch_auto(epoch) {
                        Some(at) => MessageTime::At(at),
                        None => MessageTime::Unreadable(format!("epoch out of range: {s}")),
                    };
                }
                match parse_rfc3339(trimmed) {
                    Ok(at) => MessageTime::At(at),
                    Err(e) => MessageTime::Unreadable(e.to_string()),
                }
            }
            other => MessageTime::Unreadable(format!("unexpected timestamp value: {other}")),
        }
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        match self {
            MessageTime::At(at) => Some(*at),
            MessageTime::Missing | MessageTime::Unreadable(_) => None,
        }
    }
}

/// A direct message normalized at the client boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    pub id: String,
    pub thread_id: String,
    pub sender_id: String,
    /// Empty for items that carry no text (media, likes, ...)
    pub text: String,
    pub sent_at: MessageTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectThread {
    pub id: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowRequest {
    pub user_id: String,
    pub username: Option<String>,
}

/// Which inbox listing to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadFilter {
    All,
    Unread,
}

/// Operations the bot needs from a social-media account
#[async_trait]
pub trait SocialClient: Send {
    /// Adopt previously saved authentication state
    fn restore_session(&mut self, session: Session);

    /// Current authentication state, if logged in
    fn session(&self) -> Option<Session>;

    /// Id of the logged-in account
    fn user_id(&self) -> Option<String>;

    /// Full credential login
    async fn login(&mut self, username: &str, password: &str) -> Result<(), ClientError>;

    /// Cheap authenticated call used to verify the session
    async fn probe(&mut self) -> Result<(), ClientError>;

    async fn pending_follow_requests(&mut self) -> Result<Vec<FollowRequest>, ClientError>;

    async fn approve_follow_request(&mut self, user_id: &str) -> Result<(), ClientError>;

    async fn threads(&mut self, filter: ThreadFilter) -> Result<Vec<DirectThread>, ClientError>;

    /// Messages of a thread in chronological order (oldest first)
    async fn thread_messages(&mut self, thread_id: &str)
        -> Result<Vec<DirectMessage>, ClientError>;

    async fn send_direct(&mut self, text: &str, recipient_id: &str) -> Result<(), ClientError>;
}
