use crate::config::BotConfig;
use crate::datetime_utils::now_utc;
use crate::error_utils::create_http_client_with_context;
use crate::session::Session;
use crate::social::{
    ClientError, DirectMessage, DirectThread, FollowRequest, MessageTime, SocialClient,
    ThreadFilter,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;
use uuid::Uuid;

const USER_AGENT: &str = "Instagram 269.0.0.18.75 Android (26/8.0.0; 480dpi; 1080x1920; OnePlus; 6T Dev; devitron; qcom; en_US; 314665256)";
const APP_ID: &str = "567067343352427";
const INBOX_PAGE_SIZE: &str = "20";

/// Instagram private API client for the direct inbox and follow requests
pub struct InstagramClient {
    http_client: Client,
    base_url: Url,
    session: Option<Session>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    logged_in_user: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    #[serde(deserialize_with = "id_as_string")]
    pk: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PendingResponse {
    #[serde(default)]
    users: Vec<RawUser>,
}

#[derive(Debug, Deserialize)]
struct InboxResponse {
    inbox: Inbox,
}

#[derive(Debug, Deserialize)]
struct Inbox {
    #[serde(default)]
    threads: Vec<RawThread>,
}

#[derive(Debug, Deserialize)]
struct RawThread {
    thread_id: String,
    #[serde(default)]
    thread_title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadResponse {
    thread: RawThreadItems,
}

#[derive(Debug, Deserialize)]
struct RawThreadItems {
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    item_id: String,
    #[serde(deserialize_with = "id_as_string")]
    user_id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Instagram ids show up both as JSON numbers and as strings
fn id_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

impl RawItem {
    fn into_message(self, thread_id: &str) -> DirectMessage {
        DirectMessage {
            sent_at: MessageTime::from_fields(&self.extra),
            id: self.item_id,
            thread_id: thread_id.to_string(),
            sender_id: self.user_id,
            text: self.text.unwrap_or_default(),
        }
    }
}

/// Map an unsuccessful response to the matching [`ClientError`]
fn classify_error(status: StatusCode, body: &str, retry_after: Option<u64>) -> ClientError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());

    if message.contains("login_required") || status == StatusCode::UNAUTHORIZED {
        ClientError::LoginRequired { message }
    } else if message.contains("challenge_required") || message.contains("checkpoint_required") {
        ClientError::ChallengeRequired { message }
    } else if status == StatusCode::TOO_MANY_REQUESTS || message.contains("Please wait a few minutes")
    {
        ClientError::RateLimited { retry_after }
    } else {
        ClientError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode {
        what: what.to_string(),
        message: e.to_string(),
    })
}

fn new_device_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("android-{suffix}", suffix = &hex[..16])
}

impl InstagramClient {
    pub fn new(config: &BotConfig) -> Result<Self> {
        let base_url = Url::parse(&config.instagram_base_url).with_context(|| {
            format!(
                "Invalid Instagram base URL: {url}",
                url = config.instagram_base_url
            )
        })?;

        Ok(Self {
            http_client: create_http_client_with_context(config.http_timeout)?,
            base_url,
            session: None,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Network {
                message: format!("invalid endpoint {path}: {e}"),
            })
    }

    fn require_session(&self) -> Result<&Session, ClientError> {
        self.session.as_ref().ok_or_else(|| ClientError::LoginRequired {
            message: "no session".to_string(),
        })
    }

    /// Attach the headers every private API call carries
    fn decorate(&self, builder: RequestBuilder) -> RequestBuilder {
        let mut builder = builder
            .header(header::USER_AGENT, USER_AGENT)
            .header("X-IG-App-ID", APP_ID);

        if let Some(session) = &self.session {
            builder = builder.header("X-IG-Device-ID", &session.device_id);
            if let Some(authorization) = &session.authorization {
                builder = builder.header(header::AUTHORIZATION, authorization);
            }
            if !session.cookies.is_empty() {
                let cookie = session
                    .cookies
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                builder = builder.header(header::COOKIE, cookie);
            }
        }

        builder
    }

    /// Pick up authentication state the server hands back on any response
    fn absorb_auth_headers(&mut self, headers: &header::HeaderMap) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        for value in headers.get_all(header::SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            let pair = raw.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                let (name, value) = (name.trim(), value.trim());
                if !name.is_empty() && !value.is_empty() {
                    session.cookies.insert(name.to_string(), value.to_string());
                }
            }
        }

        if let Some(authorization) = headers
            .get("ig-set-authorization")
            .and_then(|h| h.to_str().ok())
            .filter(|v| !v.is_empty() && !v.ends_with(':'))
        {
            session.authorization = Some(authorization.to_string());
        }

        if let Some(user_id) = headers
            .get("ig-set-ig-u-ds-user-id")
            .and_then(|h| h.to_str().ok())
            .filter(|v| !v.is_empty() && *v != "0")
        {
            session.user_id = Some(user_id.to_string());
        }
    }

    /// Send a request and return its JSON body, mapping failures to [`ClientError`]
    async fn send(&mut self, what: &str, builder: RequestBuilder) -> Result<Value, ClientError> {
        debug!("Making request to Instagram API for {what}");

        let response = self
            .decorate(builder)
            .send()
            .await
            .map_err(|e| ClientError::Network {
                message: e.to_string(),
            })?;

        self.absorb_auth_headers(response.headers());

        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let body = response.text().await.map_err(|e| ClientError::Network {
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(classify_error(status, &body, retry_after));
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| ClientError::Decode {
            what: what.to_string(),
            message: e.to_string(),
        })?;

        // Some failures arrive as 200 with a "fail" status
        if value.get("status").and_then(Value::as_str) == Some("fail") {
            return Err(classify_error(status, &body, retry_after));
        }

        Ok(value)
    }
}

#[async_trait]
impl SocialClient for InstagramClient {
    fn restore_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    fn session(&self) -> Option<Session> {
        self.session.clone()
    }

    fn user_id(&self) -> Option<String> {
        self.session.as_ref().and_then(|s| s.user_id.clone())
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<(), ClientError> {
        let device_id = self
            .session
            .as_ref()
            .map(|s| s.device_id.clone())
            .unwrap_or_else(new_device_id);

        // Start from a clean session so stale credentials are not sent
        self.session = Some(Session {
            device_id: device_id.clone(),
            created_at: now_utc(),
            ..Session::default()
        });

        let payload = json!({
            "username": username,
            "enc_password": format!("#PWD_INSTAGRAM:0:{ts}:{password}", ts = now_utc().timestamp()),
            "device_id": device_id,
            "guid": Uuid::new_v4().to_string(),
            "phone_id": Uuid::new_v4().to_string(),
            "login_attempt_count": "0",
        });
        let signed_body = format!("SIGNATURE.{payload}");

        let url = self.endpoint("api/v1/accounts/login/")?;
        let request = self
            .http_client
            .post(url)
            .form(&[("signed_body", signed_body.as_str())]);

        let result = self.send("login", request).await;
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                self.session = None;
                return Err(e);
            }
        };
        let login: LoginResponse = decode(value, "login response")?;

        if let Some(session) = self.session.as_mut() {
            session.user_id = Some(login.logged_in_user.pk);
            session.username = login
                .logged_in_user
                .username
                .or_else(|| Some(username.to_string()));
        }

        Ok(())
    }

    async fn probe(&mut self) -> Result<(), ClientError> {
        self.require_session()?;
        let url = self.endpoint("api/v1/feed/timeline/")?;
        let request = self
            .http_client
            .post(url)
            .form(&[("reason", "cold_start_fetch"), ("is_pull_to_refresh", "0")]);
        self.send("timeline feed", request).await.map(|_| ())
    }

    async fn pending_follow_requests(&mut self) -> Result<Vec<FollowRequest>, ClientError> {
        self.require_session()?;
        let url = self.endpoint("api/v1/friendships/pending/")?;
        let request = self.http_client.get(url);
        let value = self.send("pending follow requests", request).await?;
        let pending: PendingResponse = decode(value, "pending follow requests")?;

        Ok(pending
            .users
            .into_iter()
            .map(|user| FollowRequest {
                user_id: user.pk,
                username: user.username,
            })
            .collect())
    }

    async fn approve_follow_request(&mut self, user_id: &str) -> Result<(), ClientError> {
        self.require_session()?;
        let url = self.endpoint(&format!("api/v1/friendships/approve/{user_id}/"))?;
        let request = self
            .http_client
            .post(url)
            .form(&[("user_id", user_id), ("radio_type", "wifi-none")]);
        self.send("follow approval", request).await.map(|_| ())
    }

    async fn threads(&mut self, filter: ThreadFilter) -> Result<Vec<DirectThread>, ClientError> {
        self.require_session()?;
        let url = self.endpoint("api/v1/direct_v2/inbox/")?;
        let mut query = vec![
            ("visual_message_return_type", "unseen"),
            ("persistentBadging", "true"),
            ("limit", INBOX_PAGE_SIZE),
        ];
        if filter == ThreadFilter::Unread {
            query.push(("selected_filter", "unread"));
        }

        let request = self.http_client.get(url).query(&query);
        let value = self.send("direct inbox", request).await?;
        let inbox: InboxResponse = decode(value, "direct inbox")?;

        Ok(inbox
            .inbox
            .threads
            .into_iter()
            .map(|thread| DirectThread {
                id: thread.thread_id,
                title: thread.thread_title,
            })
            .collect())
    }

    async fn thread_messages(
        &mut self,
        thread_id: &str,
    ) -> Result<Vec<DirectMessage>, ClientError> {
        self.require_session()?;
        let url = self.endpoint(&format!("api/v1/direct_v2/threads/{thread_id}/"))?;
        let request = self
            .http_client
            .get(url)
            .query(&[("limit", INBOX_PAGE_SIZE)]);
        let value = self.send("direct thread", request).await?;
        let thread: ThreadResponse = decode(value, "direct thread")?;

        // The API lists items newest first
        Ok(thread
            .thread
            .items
            .into_iter()
            .rev()
            .map(|item| item.into_message(thread_id))
            .collect())
    }

    async fn send_direct(&mut self, text: &str, recipient_id: &str) -> Result<(), ClientError> {
        let device_id = self.require_session()?.device_id.clone();
        let url = self.endpoint("api/v1/direct_v2/threads/broadcast/text/")?;
        let recipients = format!("[[{recipient_id}]]");
        let client_context = Uuid::new_v4().to_string();

        let request = self.http_client.post(url).form(&[
            ("recipient_users", recipients.as_str()),
            ("action", "send_item"),
            ("text", text),
            ("client_context", client_context.as_str()),
            ("mutation_token", client_context.as_str()),
            ("_uuid", device_id.as_str()),
        ]);
        self.send("direct send", request).await.map(|_| ())
    }
}
