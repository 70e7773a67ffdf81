use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Informational text sent verbatim when a message mentions the club
pub const CLUB_INFO: &str = "📍 Address: General Prim 71 Hospitalet (Barcelona, Spain)

⏰ Opening times: everyday 10am - 11pm

🚪 Entering the club: Walk under the shutters and ring the doorbell (on the left)

🔒 30€ Membership: To become a member, you must arrive at DOE BCN with your ID, please.

💭 Any other information can be found at the club

We hope to see you soon 🫡💨

@DOEBCN 🇪🇸 @GrowWithDoe 🌱 @DankOfEngland 👑";

/// Substrings that route a message to [`CLUB_INFO`] instead of the language model
pub const CLUB_KEYWORDS: &[&str] = &[
    "join",
    "membership",
    "member",
    "club",
    "doe",
    "bcn",
    "barcelona",
    "social club",
    "how to join",
    "where",
    "address",
    "location",
    "opening",
    "hours",
    "time",
    "price",
    "cost",
    "fee",
    "id",
    "entrance",
    "enter",
    "door",
    "doorbell",
    "test",
];

/// Replies used whenever the language model cannot be used
pub const FALLBACK_GREETINGS: &[&str] = &[
    "Hey! Thanks for your message. I'll get back to you soon!",
    "Hi there! Thanks for reaching out. I'll respond shortly!",
];

pub const SYSTEM_PROMPT: &str = "You are a helpful Instagram assistant. Keep responses casual and friendly, but professional. Keep responses under 100 words.";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_INSTAGRAM_BASE_URL: &str = "https://i.instagram.com";

/// What happens to a qualifying message that the hourly cap refused to answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DeferredPolicy {
    /// Leave it unmarked; it is retried until it ages past the staleness window
    #[default]
    Expire,
    /// Remember it and keep retrying regardless of age until it is answered
    Hold,
    /// Mark it processed so it is never answered
    Discard,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Runtime configuration of the bot, independent of how it was sourced
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub credentials: Option<Credentials>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub instagram_base_url: String,
    pub http_timeout: Duration,
    pub check_interval: Duration,
    pub max_responses_per_hour: u32,
    pub response_delay: (Duration, Duration),
    pub process_hidden_messages: bool,
    pub min_message_length: usize,
    pub max_message_length: usize,
    pub session_file: PathBuf,
    pub save_session: bool,
    pub enable_health_check: bool,
    pub health_check_interval: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub login_failure_delay: Duration,
    pub staleness_window: Duration,
    pub deferred_policy: DeferredPolicy,
    pub keywords: Vec<String>,
    pub info_text: String,
    pub stop_grace: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            max_tokens: 100,
            temperature: 0.7,
            instagram_base_url: DEFAULT_INSTAGRAM_BASE_URL.to_string(),
            http_timeout: Duration::from_secs(30),
            check_interval: Duration::from_secs(30),
            max_responses_per_hour: 50,
            response_delay: (Duration::from_secs(2), Duration::from_secs(5)),
            process_hidden_messages: true,
            min_message_length: 10,
            max_message_length: 1000,
            session_file: PathBuf::from("instagram_session.json"),
            save_session: true,
            enable_health_check: true,
            health_check_interval: Duration::from_secs(3600),
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
            login_failure_delay: Duration::from_secs(30),
            staleness_window: Duration::from_secs(300),
            deferred_policy: DeferredPolicy::Expire,
            keywords: CLUB_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            info_text: CLUB_INFO.to_string(),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl BotConfig {
    /// Checks relationships between settings that clap cannot express
    pub fn validate(&self) -> Result<()> {
        if self.max_responses_per_hour == 0 {
            bail!("max responses per hour must be at least 1");
        }
        if self.response_delay.0 > self.response_delay.1 {
            bail!(
                "response delay minimum ({min:?}) exceeds maximum ({max:?})",
                min = self.response_delay.0,
                max = self.response_delay.1
            );
        }
        if self.min_message_length > self.max_message_length {
            bail!(
                "minimum message length ({min}) exceeds maximum ({max})",
                min = self.min_message_length,
                max = self.max_message_length
            );
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!(
                "temperature must be between 0.0 and 2.0, got {temperature}",
                temperature = self.temperature
            );
        }
        Ok(())
    }
}

/// Bot settings as command-line flags, each backed by an environment variable
#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
    /// Instagram account username
    #[arg(long, env = "INSTAGRAM_USERNAME", global = true)]
    pub instagram_username: Option<String>,

    /// Instagram account password
    #[arg(long, env = "INSTAGRAM_PASSWORD", global = true, hide_env_values = true)]
    pub instagram_password: Option<String>,

    /// API key for the chat-completion endpoint
    #[arg(long, env = "OPENAI_API_KEY", global = true, hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Chat-completion model
    #[arg(long, env = "DMBOT_OPENAI_MODEL", default_value = "gpt-4o-mini", global = true)]
    pub openai_model: String,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "DMBOT_OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL, global = true)]
    pub openai_base_url: String,

    /// Upper bound on completion length in tokens
    #[arg(long, env = "DMBOT_MAX_TOKENS", default_value_t = 100, global = true)]
    pub max_tokens: u32,

    /// Sampling temperature for completions
    #[arg(long, env = "DMBOT_TEMPERATURE", default_value_t = 0.7, global = true)]
    pub temperature: f32,

    /// Base URL of the Instagram private API
    #[arg(long, env = "DMBOT_INSTAGRAM_BASE_URL", default_value = DEFAULT_INSTAGRAM_BASE_URL, global = true)]
    pub instagram_base_url: String,

    /// Seconds between polling cycles
    #[arg(long, env = "DMBOT_CHECK_INTERVAL", default_value_t = 30, global = true)]
    pub check_interval: u64,

    /// Maximum responses sent per rolling hour
    #[arg(long, env = "DMBOT_MAX_RESPONSES_PER_HOUR", default_value_t = 50, global = true)]
    pub max_responses_per_hour: u32,

    /// Minimum seconds to wait before replying
    #[arg(long, env = "DMBOT_RESPONSE_DELAY_MIN", default_value_t = 2.0, global = true)]
    pub response_delay_min: f64,

    /// Maximum seconds to wait before replying
    #[arg(long, env = "DMBOT_RESPONSE_DELAY_MAX", default_value_t = 5.0, global = true)]
    pub response_delay_max: f64,

    /// Also scan unread-filtered threads
    #[arg(long, env = "DMBOT_PROCESS_HIDDEN_MESSAGES", default_value_t = true, action = clap::ArgAction::Set, global = true)]
    pub process_hidden_messages: bool,

    /// Messages shorter than this get a canned greeting instead of a model reply
    #[arg(long, env = "DMBOT_MIN_MESSAGE_LENGTH", default_value_t = 10, global = true)]
    pub min_message_length: usize,

    /// Messages longer than this are truncated before reaching the model
    #[arg(long, env = "DMBOT_MAX_MESSAGE_LENGTH", default_value_t = 1000, global = true)]
    pub max_message_length: usize,

    /// Where the login session is cached
    #[arg(long, env = "DMBOT_SESSION_FILE", default_value = "instagram_session.json", global = true)]
    pub session_file: PathBuf,

    /// Persist the login session between runs
    #[arg(long, env = "DMBOT_SAVE_SESSION", default_value_t = true, action = clap::ArgAction::Set, global = true)]
    pub save_session: bool,

    /// Periodically verify the session is still valid
    #[arg(long, env = "DMBOT_ENABLE_HEALTH_CHECK", default_value_t = true, action = clap::ArgAction::Set, global = true)]
    pub enable_health_check: bool,

    /// Seconds between health checks
    #[arg(long, env = "DMBOT_HEALTH_CHECK_INTERVAL", default_value_t = 3600, global = true)]
    pub health_check_interval: u64,

    /// Consecutive failed cycles before the run gives up
    #[arg(long, env = "DMBOT_MAX_RETRIES", default_value_t = 3, global = true)]
    pub max_retries: u32,

    /// Seconds to wait after a failed cycle
    #[arg(long, env = "DMBOT_RETRY_DELAY", default_value_t = 60, global = true)]
    pub retry_delay: u64,

    /// Seconds to wait after a failed login
    #[arg(long, env = "DMBOT_LOGIN_FAILURE_DELAY", default_value_t = 30, global = true)]
    pub login_failure_delay: u64,

    /// Messages older than this many seconds are not answered
    #[arg(long, env = "DMBOT_STALENESS_WINDOW", default_value_t = 300, global = true)]
    pub staleness_window: u64,

    /// Handling of messages refused by the hourly cap
    #[arg(long, env = "DMBOT_DEFERRED_POLICY", value_enum, default_value_t = DeferredPolicy::Expire, global = true)]
    pub deferred_policy: DeferredPolicy,

    /// Keywords that trigger the info text (comma-separated)
    #[arg(long, env = "DMBOT_KEYWORDS", value_delimiter = ',', global = true)]
    pub keywords: Vec<String>,

    /// File whose contents replace the built-in info text
    #[arg(long, env = "DMBOT_INFO_FILE", global = true)]
    pub info_file: Option<PathBuf>,

    /// Seconds `stop` waits for the bot to wind down
    #[arg(long, env = "DMBOT_STOP_GRACE", default_value_t = 5, global = true)]
    pub stop_grace: u64,
}

impl SettingsArgs {
    /// Resolve the flags into a validated [`BotConfig`]
    pub fn into_config(self) -> Result<BotConfig> {
        let credentials = match (self.instagram_username, self.instagram_password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        };

        let keywords: Vec<String> = self
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let info_text = match &self.info_file {
            Some(path) => load_info_text(path)?,
            None => CLUB_INFO.to_string(),
        };

        let config = BotConfig {
            credentials,
            openai_api_key: self.openai_api_key,
            openai_model: self.openai_model,
            openai_base_url: self.openai_base_url,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            instagram_base_url: self.instagram_base_url,
            check_interval: Duration::from_secs(self.check_interval),
            max_responses_per_hour: self.max_responses_per_hour,
            response_delay: (
                seconds_f64(self.response_delay_min, "response delay minimum")?,
                seconds_f64(self.response_delay_max, "response delay maximum")?,
            ),
            process_hidden_messages: self.process_hidden_messages,
            min_message_length: self.min_message_length,
            max_message_length: self.max_message_length,
            session_file: self.session_file,
            save_session: self.save_session,
            enable_health_check: self.enable_health_check,
            health_check_interval: Duration::from_secs(self.health_check_interval),
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay),
            login_failure_delay: Duration::from_secs(self.login_failure_delay),
            staleness_window: Duration::from_secs(self.staleness_window),
            deferred_policy: self.deferred_policy,
            keywords: if keywords.is_empty() {
                BotConfig::default().keywords
            } else {
                keywords
            },
            info_text,
            stop_grace: Duration::from_secs(self.stop_grace),
            ..BotConfig::default()
        };

        config.validate()?;
        Ok(config)
    }
}

fn seconds_f64(value: f64, setting_desc: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("Invalid {setting_desc}: {value} seconds"))
}

fn load_info_text(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read info file {path}", path = path.display()))?;
    let text = text.trim_end().to_string();
    if text.is_empty() {
        bail!("Info file {path} is empty", path = path.display());
    }
    debug!("Loaded info text from {path}", path = path.display());
    Ok(text)
}
