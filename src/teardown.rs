use std::sync::Arc;

use reqwest::cookie::Jar;
use reqwest::Url;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::credential::CredentialStore;
use crate::session::AuthState;

const EPOCH: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// The refresh-session cookie as it lives in the client's cookie jar.
#[derive(Clone)]
pub struct SessionCookie {
    jar: Arc<Jar>,
    url: Url,
    name: String,
    path: String,
    domain: Option<String>,
}

impl SessionCookie {
    pub fn new(jar: Arc<Jar>, url: Url, name: impl Into<String>) -> Self {
        SessionCookie {
            jar,
            url,
            name: name.into(),
            path: "/".to_string(),
            domain: None,
        }
    }

    /// Matches the `Path` and `Domain` the backend set the cookie with; the jar
    /// keys cookies on both, so eviction only hits a cookie with the same scope.
    pub fn with_scope(mut self, path: impl Into<String>, domain: Option<String>) -> Self {
        self.path = path.into();
        self.domain = domain;
        self
    }

    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    /// Overwrites the cookie with an empty value that expired at the epoch,
    /// which evicts it from the jar.
    pub fn expire(&self) {
        let mut expired = format!(
            "{}=; Expires={}; Max-Age=0; Path={}",
            self.name, EPOCH, self.path
        );
        if let Some(domain) = &self.domain {
            expired.push_str(&format!("; Domain={}", domain));
        }
        self.jar.add_cookie_str(&expired, &self.scoped_url());
    }

    fn scoped_url(&self) -> Url {
        let mut url = self.url.clone();
        url.set_path(&self.path);
        url
    }

    /// Whether the jar would currently send the cookie to the API origin.
    pub fn is_present(&self) -> bool {
        use reqwest::cookie::CookieStore;

        let prefix = format!("{}=", self.name);
        self.jar
            .cookies(&self.scoped_url())
            .and_then(|header| header.to_str().ok().map(str::to_string))
            .map(|header| {
                header
                    .split(';')
                    .map(str::trim)
                    .any(|pair| pair.starts_with(&prefix) && pair.len() > prefix.len())
            })
            .unwrap_or(false)
    }
}

/// Puts the client into the signed-out state.
///
/// Safe to call any number of times: every step overwrites rather than toggles.
pub struct SessionTeardown {
    credentials: Arc<CredentialStore>,
    cookie: SessionCookie,
    auth_state: Arc<watch::Sender<AuthState>>,
}

impl SessionTeardown {
    pub fn new(
        credentials: Arc<CredentialStore>,
        cookie: SessionCookie,
        auth_state: Arc<watch::Sender<AuthState>>,
    ) -> Self {
        SessionTeardown {
            credentials,
            cookie,
            auth_state,
        }
    }

    pub fn teardown(&self) {
        let was_signed_in = self.credentials.is_present();
        self.credentials.clear();
        self.cookie.expire();
        // also drops the cached user profile
        self.auth_state.send_replace(AuthState::signed_out());

        if was_signed_in {
            info!("Session torn down");
        } else {
            debug!("Session teardown on an already signed-out session");
        }
    }

    pub fn cookie(&self) -> &SessionCookie {
        &self.cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::MemoryStorage;
    use crate::session::UserProfile;

    fn api_url() -> Url {
        Url::parse("https://api.example.test/").unwrap()
    }

    fn setup() -> (SessionTeardown, Arc<CredentialStore>, watch::Receiver<AuthState>) {
        let credentials = Arc::new(CredentialStore::new(
            Arc::new(MemoryStorage::new()),
            "access_token",
        ));
        let jar = Arc::new(Jar::default());
        jar.add_cookie_str("refresh_session=r-123; Path=/", &api_url());
        let cookie = SessionCookie::new(jar, api_url(), "refresh_session");
        let (tx, rx) = watch::channel(AuthState::signed_in(Some(UserProfile::named("ada"))));
        (
            SessionTeardown::new(credentials.clone(), cookie, Arc::new(tx)),
            credentials,
            rx,
        )
    }

    #[test]
    fn test_teardown_clears_everything() {
        let (teardown, credentials, rx) = setup();
        credentials.set("tok");
        assert!(teardown.cookie().is_present());

        teardown.teardown();

        assert_eq!(credentials.get(), None);
        assert!(!teardown.cookie().is_present());
        assert_eq!(*rx.borrow(), AuthState::signed_out());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let (teardown, credentials, rx) = setup();
        credentials.set("tok");

        teardown.teardown();
        let after_once = (credentials.get(), teardown.cookie().is_present(), rx.borrow().clone());
        teardown.teardown();
        let after_twice = (credentials.get(), teardown.cookie().is_present(), rx.borrow().clone());

        assert_eq!(after_once, after_twice);
    }

    #[test]
    fn test_expire_matches_cookie_path() {
        let jar = Arc::new(Jar::default());
        let scoped = Url::parse("https://api.example.test/auth/refresh").unwrap();
        jar.add_cookie_str("refresh_session=r-123; Path=/auth", &scoped);

        let root_only = SessionCookie::new(jar.clone(), api_url(), "refresh_session");
        let cookie = root_only.clone().with_scope("/auth", None);
        assert!(cookie.is_present());

        // a root-scoped eviction leaves the /auth cookie in place
        root_only.expire();
        assert!(cookie.is_present());

        cookie.expire();
        assert!(!cookie.is_present());
    }

    #[test]
    fn test_expire_leaves_other_cookies() {
        let (teardown, _credentials, _rx) = setup();
        teardown
            .cookie()
            .jar()
            .add_cookie_str("theme=dark; Path=/", &api_url());
        teardown.teardown();

        use reqwest::cookie::CookieStore;
        let header = teardown.cookie().jar().cookies(&api_url()).unwrap();
        assert_eq!(header.to_str().unwrap(), "theme=dark");
    }
}
