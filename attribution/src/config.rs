use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::rewrite::RewriteMode;

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Bytes that cannot appear raw in a cookie value.
const COOKIE_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b',')
    .add(b';')
    .add(b'\\')
    .add(b'%');

/// Attributes applied to every cookie written by the store. The in-memory
/// jar only cares about expiry; a host bridging the jar onto a real
/// document applies the rest via [`CookieConfig::set_cookie_header`].
#[derive(Clone, Debug)]
pub struct CookieConfig {
    /// Prefix for every cookie name, e.g. `trk_utm_source`.
    pub prefix: String,
    /// Explicit cookie domain, `None` for host-only cookies.
    pub domain: Option<String>,
    pub path: String,
    pub same_site_lax: bool,
    pub secure: bool,
}

impl CookieConfig {
    /// Serializes one cookie write as a `Set-Cookie`-style string
    /// carrying the configured attributes.
    pub fn set_cookie_header(&self, name: &str, value: &str, max_age: Duration) -> String {
        let mut header = format!(
            "{}={}; Max-Age={}",
            name,
            utf8_percent_encode(value, COOKIE_VALUE),
            max_age.as_secs()
        );
        if let Some(domain) = &self.domain {
            header.push_str("; Domain=");
            header.push_str(domain);
        }
        header.push_str("; Path=");
        header.push_str(&self.path);
        if self.same_site_lax {
            header.push_str("; SameSite=Lax");
        }
        if self.secure {
            header.push_str("; Secure");
        }
        header
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        CookieConfig {
            prefix: String::from("trk_"),
            domain: None,
            path: String::from("/"),
            same_site_lax: true,
            secure: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub cookie: CookieConfig,
    pub rewrite_mode: RewriteMode,
    /// Lifetime of first-touch cookies and the aggregated state cookie.
    pub first_touch_expiry: Duration,
    /// Lifetime of current-touch cookies.
    pub current_touch_expiry: Duration,
    /// Storage key holding the aggregated attribution state blob.
    pub state_key: String,
    /// Touch history entries kept after truncation.
    pub max_touch_entries: usize,
    /// Serialized state blobs larger than this are not written.
    pub max_state_bytes: usize,
    /// Minimum interval between a completed run and a navigation-triggered
    /// re-run; navigations inside the window are held back until it passes.
    pub navigation_debounce_millis: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cookie: CookieConfig::default(),
            rewrite_mode: RewriteMode::Composite,
            first_touch_expiry: 365 * DAY,
            current_touch_expiry: DAY,
            state_key: String::from("attribution_state"),
            max_touch_entries: 50,
            max_state_bytes: 2 * 1024 * 1024,
            navigation_debounce_millis: 100,
        }
    }
}
