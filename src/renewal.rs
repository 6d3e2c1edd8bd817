//! Single-flight credential renewal.
//!
//! Every request that comes back 401 ends up in [`RenewalCoordinator::renew`].
//! The first one starts the renewal call; everyone arriving while it is in
//! flight awaits the same shared outcome. On success each caller replays its
//! own request once; on failure the session is torn down and the user is sent
//! to the login page exactly once.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! `.await`, so reading and updating the phase is one indivisible step.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};

use crate::classify::{classify, Failure};
use crate::config::{NavigationConfig, RenewalConfig};
use crate::credential::CredentialStore;
use crate::dispatcher::Dispatcher;
use crate::error::{ClassifiedError, SESSION_EXPIRED_MESSAGE};
use crate::navigation::{login_location, Navigator};
use crate::request::PendingRequest;
use crate::teardown::SessionTeardown;
use crate::transport::RawResponse;
use crate::utils::LogThrottle;

type RenewalOutcome = Result<(), String>;
type SharedRenewal = Shared<BoxFuture<'static, RenewalOutcome>>;

const REJECTION_LOG_WINDOW: Duration = Duration::from_secs(30);

enum RenewalState {
    Idle,
    Refreshing(SharedRenewal),
    Redirecting,
}

/// Observable phase of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalPhase {
    Idle,
    Refreshing,
    Redirecting,
}

struct StateCell {
    state: RenewalState,
    // bumped on every renewal start and on login; a renewal only applies its
    // result while its generation is still current
    generation: u64,
}

struct Inner {
    cell: Mutex<StateCell>,
    dispatcher: Dispatcher,
    credentials: Arc<CredentialStore>,
    teardown: Arc<SessionTeardown>,
    navigator: Arc<dyn Navigator>,
    renewal: RenewalConfig,
    navigation: NavigationConfig,
    throttle: LogThrottle,
    renewals_started: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, StateCell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_renewal(self: Arc<Self>, generation: u64) -> RenewalOutcome {
        let request = PendingRequest::post(self.renewal.path.clone());
        let limit = Duration::from_millis(self.renewal.timeout_in_ms);

        let token = match timeout(limit, self.dispatcher.send_unauthenticated(&request)).await {
            Err(_) => Err(format!(
                "renewal call timed out after {} ms",
                self.renewal.timeout_in_ms
            )),
            Ok(Err(e)) => Err(format!("renewal call failed: {}", e)),
            Ok(Ok(response)) => self.extract_token(&response),
        };

        match token {
            Ok(token) => self.succeed(generation, token),
            Err(reason) => {
                error!("Credential renewal failed: {}", reason);
                self.fail_outcome(generation)
            }
        }
    }

    fn extract_token(&self, response: &RawResponse) -> Result<String, String> {
        if !response.is_success() {
            let classified = classify(&Failure::Status(response.clone()));
            return Err(format!(
                "renewal endpoint answered {} ({})",
                response.status,
                classified.message()
            ));
        }
        let body: Value = serde_json::from_slice(&response.body)
            .map_err(|e| format!("renewal response is not JSON: {}", e))?;
        match body.get(&self.renewal.token_field).and_then(Value::as_str) {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => Err(format!(
                "renewal response has no '{}' field",
                self.renewal.token_field
            )),
        }
    }

    fn succeed(&self, generation: u64, token: String) -> RenewalOutcome {
        let mut cell = self.lock();
        if cell.generation != generation {
            // a login replaced the session while we were renewing; its credential wins
            debug!("Discarding renewed credential from a superseded renewal");
            return Ok(());
        }
        self.credentials.set(token);
        cell.state = RenewalState::Idle;
        info!("Credential renewed");
        Ok(())
    }

    /// Waiters of a superseded renewal replay with the credential the login installed.
    fn fail_outcome(&self, generation: u64) -> RenewalOutcome {
        if self.fail(generation) {
            Err(SESSION_EXPIRED_MESSAGE.to_string())
        } else {
            Ok(())
        }
    }

    /// Tears down and redirects. Returns false if a login superseded this renewal.
    fn fail(&self, generation: u64) -> bool {
        {
            let mut cell = self.lock();
            if cell.generation != generation {
                debug!("Ignoring failure of a superseded renewal");
                return false;
            }
            cell.state = RenewalState::Redirecting;
        }
        // teardown strictly before the navigation is handed off
        self.teardown.teardown();
        let location = login_location(&self.navigation, SESSION_EXPIRED_MESSAGE);
        info!(location = %location, "Redirecting to sign-in");
        self.navigator.navigate(&location);
        true
    }
}

/// Coordinates renewal for one session. Cheap to clone.
#[derive(Clone)]
pub struct RenewalCoordinator {
    inner: Arc<Inner>,
}

impl RenewalCoordinator {
    pub fn new(
        dispatcher: Dispatcher,
        credentials: Arc<CredentialStore>,
        teardown: Arc<SessionTeardown>,
        navigator: Arc<dyn Navigator>,
        renewal: RenewalConfig,
        navigation: NavigationConfig,
    ) -> Self {
        RenewalCoordinator {
            inner: Arc::new(Inner {
                cell: Mutex::new(StateCell {
                    state: RenewalState::Idle,
                    generation: 0,
                }),
                dispatcher,
                credentials,
                teardown,
                navigator,
                renewal,
                navigation,
                throttle: LogThrottle::new(REJECTION_LOG_WINDOW),
                renewals_started: AtomicU64::new(0),
            }),
        }
    }

    pub fn phase(&self) -> RenewalPhase {
        match self.inner.lock().state {
            RenewalState::Idle => RenewalPhase::Idle,
            RenewalState::Refreshing(_) => RenewalPhase::Refreshing,
            RenewalState::Redirecting => RenewalPhase::Redirecting,
        }
    }

    /// Number of renewal calls started over the coordinator's lifetime.
    pub fn renewals_started(&self) -> u64 {
        self.inner.renewals_started.load(Ordering::Relaxed)
    }

    /// Waits until a usable credential is in place after an auth failure.
    ///
    /// `sent_with` is the credential the failed request carried. If the store
    /// already holds a different one, a renewal finished after that request
    /// left and the caller can replay straight away.
    pub async fn renew(&self, sent_with: Option<&str>) -> Result<(), ClassifiedError> {
        let shared = {
            let mut cell = self.inner.lock();
            let joined = match &cell.state {
                RenewalState::Redirecting => {
                    if let Some(suppressed) = self.inner.throttle.should_emit("renewal.rejected") {
                        warn!(
                            suppressed,
                            "Auth failure while redirecting to sign-in; rejecting without renewal"
                        );
                    }
                    return Err(ClassifiedError::session_expired());
                }
                RenewalState::Refreshing(shared) => Some(shared.clone()),
                RenewalState::Idle => None,
            };

            match joined {
                Some(shared) => {
                    debug!("Joining in-flight renewal");
                    shared
                }
                None => {
                    let current = self.inner.credentials.get();
                    if current.is_some() && current.as_deref() != sent_with {
                        debug!("Credential changed since the request was sent; replaying");
                        return Ok(());
                    }
                    cell.generation += 1;
                    let shared = self.start(cell.generation);
                    cell.state = RenewalState::Refreshing(shared.clone());
                    shared
                }
            }
        };

        shared
            .await
            .map_err(|message| ClassifiedError::AuthExpired { message })
    }

    /// Spawns the renewal so it runs to completion even if every waiter goes away.
    fn start(&self, generation: u64) -> SharedRenewal {
        let started = self.inner.renewals_started.fetch_add(1, Ordering::Relaxed) + 1;
        info!(renewal = started, "Starting credential renewal");

        let inner = self.inner.clone();
        let span = tracing::info_span!("renewal", generation);
        let handle = tokio::spawn(inner.clone().run_renewal(generation).instrument(span));

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Renewal task aborted: {}", e);
                    inner.fail_outcome(generation)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Returns to `Idle` after a successful login, re-arming renewal and
    /// redirects. Any renewal still in flight no longer affects the session.
    pub fn reset(&self) {
        let mut cell = self.inner.lock();
        cell.generation += 1;
        cell.state = RenewalState::Idle;
        debug!("Renewal coordinator reset");
    }
}

/// Sends `request`, and on an auth failure renews and replays it once.
///
/// A request that fails auth again after its replay is not replayed a second
/// time; that failure is returned to the caller as-is.
pub async fn with_auth_retry(
    dispatcher: &Dispatcher,
    coordinator: &RenewalCoordinator,
    mut request: PendingRequest,
) -> Result<RawResponse, ClassifiedError> {
    let span = tracing::debug_span!(
        "request",
        request_id = %request.id,
        method = %request.method,
        path = %request.path
    );

    async move {
        let first = dispatcher.send(&request).await;
        let classified = match Failure::from_result(first.result) {
            Ok(response) => return Ok(response),
            Err(failure) => classify(&failure),
        };

        if !classified.is_auth_expired() || request.is_replayed() {
            return Err(classified);
        }

        coordinator.renew(first.sent_with.as_deref()).await?;

        request.mark_replayed();
        let replay = dispatcher.send(&request).await;
        match Failure::from_result(replay.result) {
            Ok(response) => {
                debug!("Replay succeeded");
                Ok(response)
            }
            Err(failure) => {
                let classified = classify(&failure);
                if classified.is_auth_expired() {
                    warn!("Request rejected again after renewal; not retrying");
                }
                Err(classified)
            }
        }
    }
    .instrument(span)
    .await
}
