//! Hand-off to full-page navigation when the session cannot be saved.

use reqwest::Url;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::NavigationConfig;

/// Performs a full navigation to `location`. Called at most once per session
/// lifetime by the renewal coordinator.
pub trait Navigator: Send + Sync {
    fn navigate(&self, location: &str);
}

/// Builds the login location carrying `message` as a query parameter.
///
/// A relative `login_path` stays relative (`/login?error=...`); an absolute
/// URL is kept absolute.
pub fn login_location(config: &NavigationConfig, message: &str) -> String {
    if let Ok(mut absolute) = Url::parse(&config.login_path) {
        absolute
            .query_pairs_mut()
            .append_pair(&config.error_param, message);
        return absolute.to_string();
    }

    // any base works; only path and query are kept
    match Url::parse("http://localhost/").and_then(|base| base.join(&config.login_path)) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair(&config.error_param, message);
            match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            }
        }
        Err(e) => {
            warn!("Invalid navigation.login_path '{}': {}", config.login_path, e);
            "/".to_string()
        }
    }
}

/// Forwards navigations to whoever holds the receiver (the embedding app).
#[derive(Clone)]
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelNavigator { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn navigate(&self, location: &str) {
        if self.tx.send(location.to_string()).is_err() {
            warn!("Navigation to '{}' dropped: no receiver", location);
        }
    }
}

/// Logs the navigation. Used by the CLI, which has no page to leave.
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, location: &str) {
        info!(location, "Sign-in required");
    }
}
