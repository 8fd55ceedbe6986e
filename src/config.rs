//! Runtime settings for the streak keeper
//!
//! Settings come from three layers, later layers winning:
//! built-in defaults, an optional `streak.yml`, and environment variables
//! (a `.env` file is loaded first). YAML values of the form `${VAR}` are
//! resolved from the environment.

use chrono::NaiveTime;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::Level;

use crate::error::{Error, Result};

/// Default constants (fallback if neither YAML nor env provide a value)
pub const CONFIG_FILE: &str = "streak.yml";
pub const DEFAULT_MESSAGE: &str = "🔥 Streak Reminder 🔥";
pub const DEFAULT_SCHEDULE_TIME: &str = "07:00";
pub const COOKIES_FILE: &str = "cookies.json";
pub const CONTACTS_FILE: &str = "contacts.json";
pub const LOCK_FILE: &str = "streak_run.lock";
pub const BASE_URL: &str = "https://www.tiktok.com";
pub const MESSAGES_URL: &str = "https://www.tiktok.com/messages";
pub const DEFAULT_API_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const LOG_DIR: &str = "logs";

/// How a stored contact name is compared with a name shown on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Byte-for-byte equality
    Exact,
    /// Equality ignoring case
    #[default]
    CaseInsensitive,
    /// Displayed name contains the stored name, ignoring case
    Contains,
}

impl MatchMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "exact" => Some(MatchMode::Exact),
            "case_insensitive" | "insensitive" | "ci" => Some(MatchMode::CaseInsensitive),
            "contains" => Some(MatchMode::Contains),
            _ => None,
        }
    }

    /// Does the name displayed in the conversation list refer to `target`?
    pub fn matches(&self, displayed: &str, target: &str) -> bool {
        let displayed = displayed.trim();
        let target = target.trim();
        if target.is_empty() {
            return false;
        }
        match self {
            MatchMode::Exact => displayed == target,
            MatchMode::CaseInsensitive => displayed.to_lowercase() == target.to_lowercase(),
            MatchMode::Contains => displayed.to_lowercase().contains(&target.to_lowercase()),
        }
    }

    /// Are two stored contact names the same contact?
    ///
    /// `Contains` only relaxes page matching; identity in the store stays
    /// case-insensitive equality.
    pub fn same_name(&self, a: &str, b: &str) -> bool {
        match self {
            MatchMode::Exact => a.trim() == b.trim(),
            MatchMode::CaseInsensitive | MatchMode::Contains => {
                a.trim().to_lowercase() == b.trim().to_lowercase()
            }
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchMode::Exact => "exact",
            MatchMode::CaseInsensitive => "case_insensitive",
            MatchMode::Contains => "contains",
        };
        f.write_str(name)
    }
}

/// A secret value that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    message: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    schedule_time: Option<String>,
    browser: Option<BrowserConfig>,
    delivery: Option<DeliveryConfig>,
    files: Option<FilesConfig>,
    telegram: Option<TelegramConfig>,
    api: Option<ApiConfig>,
    app: Option<AppConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct BrowserConfig {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    headless: Option<String>,
    chrome_path: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    page_load_wait: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    element_wait: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeliveryConfig {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    send_delay: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    retry_count: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    retry_backoff: Option<String>,
    contact_match: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FilesConfig {
    cookies: Option<String>,
    contacts: Option<String>,
    lock: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramConfig {
    bot_token: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    chat_id: Option<String>,
    #[serde(default)]
    allowed_users: Vec<i64>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    enabled: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    log_enabled: Option<String>,
    log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingConfig {
    dir: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    to_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiConfig {
    key: Option<String>,
    addr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AppConfig {
    name: Option<String>,
    env: Option<String>,
}

/// Deserialize a scalar that can be a string, a number or a bool
fn deserialize_scalar<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string, number or bool, got {:?}",
            other
        ))),
    }
}

/// Telegram bot and notification settings.
#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub bot_token: Option<Secret>,
    pub chat_id: Option<i64>,
    /// Users allowed to drive the bot; the notification chat is always included
    pub allowed_users: Vec<i64>,
    pub enabled: bool,
    /// Forward log records to the notification chat
    pub log_enabled: bool,
    /// Least severe level that is forwarded
    pub log_level: Level,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            allowed_users: Vec::new(),
            enabled: false,
            log_enabled: false,
            log_level: Level::WARN,
        }
    }
}

impl TelegramSettings {
    pub fn is_configured(&self) -> bool {
        self.enabled && self.bot_token.is_some() && self.chat_id.is_some()
    }

    pub fn forwards_logs(&self) -> bool {
        self.log_enabled && self.is_configured()
    }

    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.allowed_users.contains(&user_id)
    }
}

/// Process-wide settings, immutable after startup.
///
/// The streak message here is only the startup value; the controller owns
/// the runtime-mutable copy.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub app_env: String,
    pub message: String,
    pub schedule_time: NaiveTime,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub page_load_wait: Duration,
    pub element_wait: Duration,
    pub send_delay: Duration,
    pub retry_count: u32,
    pub retry_backoff: Duration,
    pub contact_match: MatchMode,
    pub cookies_file: PathBuf,
    pub contacts_file: PathBuf,
    pub lock_file: PathBuf,
    pub base_url: String,
    pub messages_url: String,
    pub telegram: TelegramSettings,
    pub api_key: Option<Secret>,
    pub api_addr: SocketAddr,
    /// Directory of the daily log files
    pub log_dir: PathBuf,
    pub log_to_file: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "TikTok Streak Keeper".to_string(),
            app_env: "production".to_string(),
            message: DEFAULT_MESSAGE.to_string(),
            schedule_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
            headless: false,
            chrome_path: None,
            page_load_wait: Duration::from_secs(5),
            element_wait: Duration::from_secs(3),
            send_delay: Duration::from_secs(2),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff: Duration::from_secs(2),
            contact_match: MatchMode::default(),
            cookies_file: PathBuf::from(COOKIES_FILE),
            contacts_file: PathBuf::from(CONTACTS_FILE),
            lock_file: PathBuf::from(LOCK_FILE),
            base_url: BASE_URL.to_string(),
            messages_url: MESSAGES_URL.to_string(),
            telegram: TelegramSettings {
                enabled: true,
                ..Default::default()
            },
            api_key: None,
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            log_dir: PathBuf::from(LOG_DIR),
            log_to_file: true,
        }
    }
}

impl Settings {
    /// Load `.env`, then `STREAK_CONFIG` (or `streak.yml`) if present, then
    /// apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_dotenv();
        let path = std::env::var("STREAK_CONFIG").unwrap_or_else(|_| CONFIG_FILE.to_string());
        if Path::new(&path).exists() {
            Self::load_from_file(&path)
        } else {
            Self::from_yaml(YamlConfig::default())
        }
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific YAML file (env still overrides).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let yaml: YamlConfig = serde_yaml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;
        Self::from_yaml(yaml)
    }

    /// Resolve a value: `${VAR}` placeholders and explicit env keys win over
    /// literal YAML values. An unresolved placeholder counts as unset.
    fn resolve(value: Option<String>, env_key: &str) -> Option<String> {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    return Some(env_val);
                }
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            if !env_val.trim().is_empty() {
                return Some(env_val);
            }
        }
        value.filter(|v| !(v.starts_with("${") && v.ends_with('}')))
    }

    fn parse_bool(value: Option<String>, key: &str, default: bool) -> Result<bool> {
        match value.map(|v| v.trim().to_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(Error::ConfigError(format!("{} must be a boolean, got '{}'", key, v))),
            },
        }
    }

    fn parse_secs(value: Option<String>, key: &str, default: Duration) -> Result<Duration> {
        match value {
            None => Ok(default),
            Some(v) => v
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| {
                    Error::ConfigError(format!("{} must be a number of seconds, got '{}'", key, v))
                }),
        }
    }

    /// Parse a log level name; `warning` and `critical` are accepted too.
    pub fn parse_log_level(value: &str) -> Result<Level> {
        match value.trim().to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" | "warning" => Ok(Level::WARN),
            "error" | "critical" => Ok(Level::ERROR),
            _ => Err(Error::ConfigError(format!(
                "TELEGRAM_LOG_LEVEL must be a log level name, got '{}'",
                value
            ))),
        }
    }

    /// Parse `HH:MM` (24-hour).
    pub fn parse_schedule_time(value: &str) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| {
            Error::ConfigError(format!("SCHEDULE_TIME must be HH:MM (24h), got '{}'", value))
        })
    }

    fn from_yaml(yaml: YamlConfig) -> Result<Self> {
        let defaults = Settings::default();
        let browser = yaml.browser.unwrap_or_default();
        let delivery = yaml.delivery.unwrap_or_default();
        let files = yaml.files.unwrap_or_default();
        let telegram = yaml.telegram.unwrap_or_default();
        let api = yaml.api.unwrap_or_default();
        let app = yaml.app.unwrap_or_default();
        let logging = yaml.logging.unwrap_or_default();

        let message = Self::resolve(yaml.message, "STREAK_MESSAGE")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(defaults.message);

        let schedule_time = match Self::resolve(yaml.schedule_time, "SCHEDULE_TIME") {
            Some(v) => Self::parse_schedule_time(&v)?,
            None => defaults.schedule_time,
        };

        let retry_count = match Self::resolve(delivery.retry_count, "RETRY_COUNT") {
            Some(v) => v
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| {
                    Error::ConfigError(format!("RETRY_COUNT must be a positive integer, got '{}'", v))
                })?,
            None => defaults.retry_count,
        };

        let contact_match = match Self::resolve(delivery.contact_match, "CONTACT_MATCH") {
            Some(v) => MatchMode::parse(&v).ok_or_else(|| {
                Error::ConfigError(format!(
                    "CONTACT_MATCH must be exact, case_insensitive or contains, got '{}'",
                    v
                ))
            })?,
            None => defaults.contact_match,
        };

        let chat_id = match Self::resolve(telegram.chat_id, "TELEGRAM_CHAT_ID") {
            Some(v) => Some(v.trim().parse::<i64>().map_err(|_| {
                Error::ConfigError(format!("TELEGRAM_CHAT_ID must be an integer, got '{}'", v))
            })?),
            None => None,
        };

        let mut allowed_users = telegram.allowed_users;
        if let Ok(env_users) = std::env::var("TELEGRAM_ALLOWED_USERS") {
            for part in env_users.split(',') {
                if let Ok(id) = part.trim().parse::<i64>() {
                    if !allowed_users.contains(&id) {
                        allowed_users.push(id);
                    }
                }
            }
        }
        if let Some(id) = chat_id {
            if !allowed_users.contains(&id) {
                allowed_users.push(id);
            }
        }

        let log_level = match Self::resolve(telegram.log_level, "TELEGRAM_LOG_LEVEL") {
            Some(v) => Self::parse_log_level(&v)?,
            None => Level::WARN,
        };

        let api_addr = match Self::resolve(api.addr, "API_ADDR") {
            Some(v) => v.trim().parse::<SocketAddr>().map_err(|_| {
                Error::ConfigError(format!("API_ADDR must be host:port, got '{}'", v))
            })?,
            None => defaults.api_addr,
        };

        Ok(Self {
            app_name: Self::resolve(app.name, "APP_NAME").unwrap_or(defaults.app_name),
            app_env: Self::resolve(app.env, "APP_ENV").unwrap_or(defaults.app_env),
            message,
            schedule_time,
            headless: Self::parse_bool(
                Self::resolve(browser.headless, "HEADLESS_MODE"),
                "HEADLESS_MODE",
                defaults.headless,
            )?,
            chrome_path: Self::resolve(browser.chrome_path, "CHROME_PATH").map(PathBuf::from),
            page_load_wait: Self::parse_secs(
                Self::resolve(browser.page_load_wait, "PAGE_LOAD_WAIT"),
                "PAGE_LOAD_WAIT",
                defaults.page_load_wait,
            )?,
            element_wait: Self::parse_secs(
                Self::resolve(browser.element_wait, "ELEMENT_WAIT"),
                "ELEMENT_WAIT",
                defaults.element_wait,
            )?,
            send_delay: Self::parse_secs(
                Self::resolve(delivery.send_delay, "MESSAGE_SEND_DELAY"),
                "MESSAGE_SEND_DELAY",
                defaults.send_delay,
            )?,
            retry_count,
            retry_backoff: Self::parse_secs(
                Self::resolve(delivery.retry_backoff, "RETRY_BACKOFF"),
                "RETRY_BACKOFF",
                defaults.retry_backoff,
            )?,
            contact_match,
            cookies_file: Self::resolve(files.cookies, "COOKIES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.cookies_file),
            contacts_file: Self::resolve(files.contacts, "CONTACTS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.contacts_file),
            lock_file: Self::resolve(files.lock, "STREAK_LOCK_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.lock_file),
            base_url: defaults.base_url,
            messages_url: defaults.messages_url,
            telegram: TelegramSettings {
                bot_token: Self::resolve(telegram.bot_token, "TELEGRAM_BOT_TOKEN").map(Secret::new),
                chat_id,
                allowed_users,
                enabled: Self::parse_bool(
                    Self::resolve(telegram.enabled, "TELEGRAM_ENABLED"),
                    "TELEGRAM_ENABLED",
                    true,
                )?,
                log_enabled: Self::parse_bool(
                    Self::resolve(telegram.log_enabled, "TELEGRAM_LOG_ENABLED"),
                    "TELEGRAM_LOG_ENABLED",
                    false,
                )?,
                log_level,
            },
            api_key: Self::resolve(api.key, "API_KEY").map(Secret::new),
            api_addr,
            log_dir: Self::resolve(logging.dir, "LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            log_to_file: Self::parse_bool(
                Self::resolve(logging.to_file, "LOG_TO_FILE"),
                "LOG_TO_FILE",
                defaults.log_to_file,
            )?,
        })
    }

    /// Schedule time formatted the way it is configured.
    pub fn schedule_label(&self) -> String {
        self.schedule_time.format("%H:%M").to_string()
    }
}
