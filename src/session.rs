//! The per-page session object injected into the request layer.
//!
//! A [`Session`] owns the credential, the renewal state machine and the
//! auth-state signal. Build a new one per page load (and per test); nothing
//! here is process-global.

use std::sync::Arc;

use reqwest::cookie::Jar;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::config::ConfigV1;
use crate::credential::{CredentialStore, SessionStorage};
use crate::dispatcher::Dispatcher;
use crate::navigation::Navigator;
use crate::renewal::{RenewalCoordinator, RenewalPhase};
use crate::teardown::{SessionCookie, SessionTeardown};
use crate::transport::Transport;

/// The signed-in user, as the application state store sees it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserProfile {
    pub fn named(username: impl Into<String>) -> Self {
        UserProfile {
            username: username.into(),
            ..Default::default()
        }
    }
}

/// What the application's state store consumes: `isAuthenticated` and `user`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthState {
    pub is_authenticated: bool,
    pub user: Option<UserProfile>,
}

impl AuthState {
    pub fn signed_in(user: Option<UserProfile>) -> Self {
        AuthState {
            is_authenticated: true,
            user,
        }
    }

    pub fn signed_out() -> Self {
        AuthState::default()
    }
}

/// Everything a session needs from the outside world.
pub struct SessionParts {
    pub transport: Arc<dyn Transport>,
    pub storage: Arc<dyn SessionStorage>,
    pub jar: Arc<Jar>,
    pub cookie_url: Url,
    pub navigator: Arc<dyn Navigator>,
}

pub struct Session {
    credentials: Arc<CredentialStore>,
    dispatcher: Dispatcher,
    coordinator: RenewalCoordinator,
    teardown: Arc<SessionTeardown>,
    auth_state: Arc<watch::Sender<AuthState>>,
}

impl Session {
    /// Wires the components together and restores a credential persisted by
    /// an earlier page in the same browsing session.
    pub fn new(config: &ConfigV1, parts: SessionParts) -> Self {
        let credentials = Arc::new(CredentialStore::new(
            parts.storage,
            config.session.storage_key.clone(),
        ));
        let restored = credentials.restore();

        let initial = if restored {
            AuthState::signed_in(None)
        } else {
            AuthState::signed_out()
        };
        let (tx, _rx) = watch::channel(initial);
        let auth_state = Arc::new(tx);

        let cookie = SessionCookie::new(
            parts.jar,
            parts.cookie_url,
            config.session.cookie_name.clone(),
        )
        .with_scope(
            config.session.cookie_path.clone(),
            config.session.cookie_domain.clone(),
        );
        let teardown = Arc::new(SessionTeardown::new(
            credentials.clone(),
            cookie,
            auth_state.clone(),
        ));
        let dispatcher = Dispatcher::new(parts.transport, credentials.clone());
        let coordinator = RenewalCoordinator::new(
            dispatcher.clone(),
            credentials.clone(),
            teardown.clone(),
            parts.navigator,
            config.renewal.clone(),
            config.navigation.clone(),
        );

        Session {
            credentials,
            dispatcher,
            coordinator,
            teardown,
            auth_state,
        }
    }

    /// Installs the credential from a successful login and re-arms renewal
    /// and redirects.
    pub fn login(&self, token: impl Into<String>, user: Option<UserProfile>) {
        self.credentials.set(token);
        self.coordinator.reset();
        if let Some(user) = &user {
            info!("Signed in as '{}'", user.username);
        } else {
            info!("Signed in");
        }
        self.auth_state.send_replace(AuthState::signed_in(user));
    }

    /// Updates the cached profile without touching the credential.
    pub fn set_user(&self, user: UserProfile) {
        self.auth_state.send_modify(|state| state.user = Some(user));
    }

    /// Signs out locally. No navigation; the caller decides where to go.
    pub fn logout(&self) {
        self.teardown.teardown();
        info!("Signed out");
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_state.borrow().is_authenticated
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.auth_state.borrow().user.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.auth_state.subscribe()
    }

    pub fn renewal_phase(&self) -> RenewalPhase {
        self.coordinator.phase()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn coordinator(&self) -> &RenewalCoordinator {
        &self.coordinator
    }

    pub fn cookie(&self) -> &SessionCookie {
        self.teardown.cookie()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::MemoryStorage;
    use crate::navigation::ChannelNavigator;
    use crate::request::PendingRequest;
    use crate::transport::{RawResponse, TransportError};
    use async_trait::async_trait;
    use http::{HeaderMap, StatusCode};

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn send(
            &self,
            _request: &PendingRequest,
            _headers: HeaderMap,
        ) -> Result<RawResponse, TransportError> {
            Ok(RawResponse::new(StatusCode::OK, ""))
        }
    }

    fn session_with(storage: Arc<MemoryStorage>) -> Session {
        let config = ConfigV1::for_base_url("https://api.example.test");
        let (navigator, _rx) = ChannelNavigator::new();
        Session::new(
            &config,
            SessionParts {
                transport: Arc::new(NoopTransport),
                storage,
                jar: Arc::new(Jar::default()),
                cookie_url: Url::parse("https://api.example.test").unwrap(),
                navigator: Arc::new(navigator),
            },
        )
    }

    #[test]
    fn test_new_session_restores_persisted_credential() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item("access_token", "persisted").unwrap();

        let session = session_with(storage);

        assert!(session.is_authenticated());
        assert_eq!(session.credentials().get().as_deref(), Some("persisted"));
    }

    #[test]
    fn test_login_and_logout_publish_state() {
        let session = session_with(Arc::new(MemoryStorage::new()));
        let rx = session.subscribe();
        assert!(!session.is_authenticated());

        session.login("tok", Some(UserProfile::named("ada")));
        assert!(rx.borrow().is_authenticated);
        assert_eq!(session.user().unwrap().username, "ada");

        session.logout();
        assert_eq!(*rx.borrow(), AuthState::signed_out());
        assert_eq!(session.credentials().get(), None);
    }

    #[test]
    fn test_set_user_keeps_credential() {
        let session = session_with(Arc::new(MemoryStorage::new()));
        session.login("tok", None);
        session.set_user(UserProfile::named("grace"));
        assert_eq!(session.user().unwrap().username, "grace");
        assert_eq!(session.credentials().get().as_deref(), Some("tok"));
    }

    #[test]
    fn test_user_profile_deserializes_with_defaults() {
        let user: UserProfile = serde_json::from_str(r#"{"username": "ada"}"#).unwrap();
        assert_eq!(user, UserProfile::named("ada"));
    }
}
