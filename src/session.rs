//! Automated browser session seam and cookie bootstrap
//!
//! Provides:
//! - The `Session` trait the workflow drives (real Chrome or a test fake)
//! - Cookie file loading with normalisation of browser-export fields
//! - Authentication check after cookies are applied

use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How an element is looked up on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: &str) -> Self {
        Locator::Css(selector.to_string())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Locator::XPath(expr.into())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css:{}", s),
            Locator::XPath(s) => write!(f, "xpath:{}", s),
        }
    }
}

/// Capabilities the messaging workflow needs from an automated browser.
///
/// `find` returns `Ok(None)` when nothing matches; `Err` is reserved for
/// automation failures (dead browser, navigation timeout, ...).
pub trait Session {
    type Element<'a>
    where
        Self: 'a;

    fn open(&self, url: &str) -> Result<()>;
    fn current_url(&self) -> String;
    fn apply_cookies(&self, cookies: &[Cookie]) -> Result<usize>;
    fn find(&self, locator: &Locator) -> Result<Option<Self::Element<'_>>>;
    fn find_all(&self, locator: &Locator) -> Result<Vec<Self::Element<'_>>>;
    fn text(&self, element: &Self::Element<'_>) -> Result<String>;
    fn click(&self, element: &Self::Element<'_>) -> Result<()>;
    fn type_text(&self, element: &Self::Element<'_>, text: &str) -> Result<()>;
    fn press_enter(&self) -> Result<()>;
    fn refresh(&self) -> Result<()>;
    fn scroll(&self, pixels: i64) -> Result<()>;
}

/// One exported cookie. Unknown fields are kept in `extra` and ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default)]
    pub http_only: Option<bool>,
    #[serde(default)]
    pub same_site: Option<String>,
    #[serde(default, alias = "expires")]
    pub expiration_date: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Cookie {
    /// `sameSite` in DevTools spelling, or `None` when the export says
    /// "unspecified" or something unknown.
    pub fn devtools_same_site(&self) -> Option<&'static str> {
        match self.same_site.as_deref().map(|s| s.to_lowercase()) {
            Some(s) if s == "strict" => Some("Strict"),
            Some(s) if s == "lax" => Some("Lax"),
            Some(s) if s == "none" || s == "no_restriction" => Some("None"),
            _ => None,
        }
    }

    /// Session cookies are exported with `expires: -1` or no expiry at all.
    pub fn devtools_expires(&self) -> Option<f64> {
        self.expiration_date.filter(|e| *e > 0.0)
    }

    /// Cookie as a DevTools `Network.CookieParam` JSON object.
    pub fn to_devtools_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("name".into(), Value::String(self.name.clone()));
        obj.insert("value".into(), Value::String(self.value.clone()));
        obj.insert("domain".into(), Value::String(self.domain.clone()));
        obj.insert(
            "path".into(),
            Value::String(self.path.clone().unwrap_or_else(|| "/".to_string())),
        );
        if let Some(secure) = self.secure {
            obj.insert("secure".into(), Value::Bool(secure));
        }
        if let Some(http_only) = self.http_only {
            obj.insert("httpOnly".into(), Value::Bool(http_only));
        }
        if let Some(same_site) = self.devtools_same_site() {
            obj.insert("sameSite".into(), Value::String(same_site.to_string()));
        }
        if let Some(expires) = self.devtools_expires() {
            obj.insert("expires".into(), serde_json::json!(expires));
        }
        Value::Object(obj)
    }
}

/// Read the exported cookie list.
pub fn load_cookies(path: &Path) -> Result<Vec<Cookie>> {
    if !path.exists() {
        warn!(path = %path.display(), "Cookies file not found; export your session cookies first");
        return Err(Error::CookiesNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    let cookies: Vec<Cookie> = serde_json::from_str(&content)?;
    info!(count = cookies.len(), "Loaded cookies");
    Ok(cookies)
}

/// Where to go and how long to wait while bootstrapping a session.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    pub base_url: String,
    pub messages_url: String,
    pub page_load_wait: Duration,
}

impl BootstrapPlan {
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            messages_url: settings.messages_url.clone(),
            page_load_wait: settings.page_load_wait,
        }
    }
}

const PASSKEY_MODAL: &str = "div[class*=\"TUXModal\"]";
const DIALOG: &str = "div[role=\"dialog\"]";
const MAYBE_LATER_XPATH: &str = "//button[contains(., \"Maybe later\")]";
const SECONDARY_BUTTON: &str = "button[class*=\"TUXButton\"][class*=\"secondary\"]";

/// Apply cookies and confirm the session lands on the messages page.
///
/// A redirect to a login page means the exported session has expired;
/// that is fatal for the run and never retried here.
pub fn authenticate<S: Session>(session: &S, cookies: &[Cookie], plan: &BootstrapPlan) -> Result<()> {
    // Cookies need a document on the target domain first
    session.open(&plan.base_url)?;
    let applied = session.apply_cookies(cookies)?;
    debug!(applied, total = cookies.len(), "Cookies applied");

    session.open(&plan.messages_url)?;
    thread::sleep(plan.page_load_wait);

    let url = session.current_url();
    if url.contains("login") {
        warn!(%url, "Not logged in - redirected to login page");
        return Err(Error::Authentication(
            "redirected to login page; refresh the exported cookies".to_string(),
        ));
    }
    if !url.contains("messages") {
        warn!(%url, "Unexpected URL after opening messages");
        return Err(Error::Authentication(format!(
            "expected the messages page, landed on {}",
            url
        )));
    }

    info!("Login verified - on messages page");
    dismiss_passkey_prompt(session);
    Ok(())
}

/// Best effort: close the "create a passkey" modal if it shows up.
fn dismiss_passkey_prompt<S: Session>(session: &S) {
    let modal = match session.find(&Locator::css(PASSKEY_MODAL)) {
        Ok(Some(_)) => true,
        _ => match session.find(&Locator::css(DIALOG)) {
            Ok(Some(dialog)) => session
                .text(&dialog)
                .map(|t| t.to_lowercase().contains("passkey"))
                .unwrap_or(false),
            _ => false,
        },
    };
    if !modal {
        return;
    }

    info!("Passkey prompt detected");
    for locator in [Locator::xpath(MAYBE_LATER_XPATH), Locator::css(SECONDARY_BUTTON)] {
        if let Ok(Some(button)) = session.find(&locator) {
            match session.click(&button) {
                Ok(()) => {
                    info!("Passkey prompt dismissed");
                    return;
                }
                Err(e) => debug!(%locator, "Dismiss click failed: {}", e),
            }
        }
    }
    warn!("Passkey prompt detected but no dismiss button found");
}
