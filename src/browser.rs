//! Chrome-backed `Session` built on `headless_chrome`
//!
//! All calls here block; async callers run them on `spawn_blocking`.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::protocol::cdp::Network::CookieParam;
use headless_chrome::{Browser, Element as PageElement, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::session::{authenticate, load_cookies, BootstrapPlan, Cookie, Locator, Session};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--no-first-run",
    "--disable-default-apps",
    "--disable-extensions",
    "--disable-sync",
    "--window-size=1280,900",
];

fn automation(e: impl std::fmt::Display) -> Error {
    Error::Automation(e.to_string())
}

/// A live Chrome process with one tab.
pub struct ChromeSession {
    // Dropping the browser kills the Chrome process
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeSession {
    /// Launch Chrome with the browser settings and open a blank tab.
    pub fn launch(settings: &Settings) -> Result<Self> {
        let ua_arg = format!("--user-agent={}", USER_AGENT);
        let mut args: Vec<&OsStr> = LAUNCH_ARGS.iter().map(OsStr::new).collect();
        args.push(OsStr::new(&ua_arg));

        let mut builder = LaunchOptions::default_builder();
        builder
            .headless(settings.headless)
            .sandbox(false)
            .window_size(Some((1280, 900)))
            .idle_browser_timeout(Duration::from_secs(600))
            .args(args);
        if let Some(path) = &settings.chrome_path {
            builder.path(Some(path.clone()));
        }
        let options = builder.build().map_err(automation)?;

        info!(headless = settings.headless, "Launching Chrome");
        let browser = Browser::new(options).map_err(|e| {
            Error::Automation(format!(
                "Failed to launch Chrome/Chromium: {}. Make sure Chrome or Chromium is installed.",
                e
            ))
        })?;
        let tab = browser.new_tab().map_err(automation)?;
        tab.set_default_timeout(settings.element_wait);
        if let Err(e) = tab.evaluate(
            "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})",
            false,
        ) {
            debug!("webdriver flag override failed: {}", e);
        }

        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

/// Load cookies, launch Chrome and land on the messages page logged in.
pub fn open_session(settings: &Settings) -> Result<ChromeSession> {
    let cookies = load_cookies(&settings.cookies_file)?;
    let session = ChromeSession::launch(settings)?;
    authenticate(&session, &cookies, &BootstrapPlan::from_settings(settings))?;
    Ok(session)
}

impl Session for ChromeSession {
    type Element<'a> = PageElement<'a>;

    fn open(&self, url: &str) -> Result<()> {
        debug!(%url, "Navigating");
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(automation)?;
        Ok(())
    }

    fn current_url(&self) -> String {
        self.tab.get_url()
    }

    fn apply_cookies(&self, cookies: &[Cookie]) -> Result<usize> {
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            match serde_json::from_value::<CookieParam>(cookie.to_devtools_json()) {
                Ok(param) => params.push(param),
                Err(e) => warn!(cookie = %cookie.name, "Skipping cookie: {}", e),
            }
        }
        let applied = params.len();
        self.tab.set_cookies(params).map_err(automation)?;
        Ok(applied)
    }

    fn find(&self, locator: &Locator) -> Result<Option<PageElement<'_>>> {
        let found = match locator {
            Locator::Css(css) => self.tab.find_element(css),
            Locator::XPath(xpath) => self.tab.find_element_by_xpath(xpath),
        };
        Ok(found.ok())
    }

    fn find_all(&self, locator: &Locator) -> Result<Vec<PageElement<'_>>> {
        let found = match locator {
            Locator::Css(css) => self.tab.find_elements(css),
            Locator::XPath(xpath) => self.tab.find_elements_by_xpath(xpath),
        };
        Ok(found.unwrap_or_default())
    }

    fn text(&self, element: &PageElement<'_>) -> Result<String> {
        element.get_inner_text().map_err(automation)
    }

    fn click(&self, element: &PageElement<'_>) -> Result<()> {
        element.click().map_err(automation)?;
        Ok(())
    }

    fn type_text(&self, element: &PageElement<'_>, text: &str) -> Result<()> {
        element.type_into(text).map_err(automation)?;
        Ok(())
    }

    fn press_enter(&self) -> Result<()> {
        self.tab.press_key("Enter").map_err(automation)?;
        Ok(())
    }

    fn refresh(&self) -> Result<()> {
        self.tab
            .reload(false, None)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(automation)?;
        Ok(())
    }

    fn scroll(&self, pixels: i64) -> Result<()> {
        self.tab
            .evaluate(&format!("window.scrollBy(0, {})", pixels), false)
            .map_err(automation)?;
        Ok(())
    }
}
