//! Single shared entry point for entitlement reads.
//!
//! Resolution order: test override, the one-shot post-purchase fast path,
//! the in-flight guard, the debounced cache, and finally one call to the
//! server's verify endpoint. Callers that arrive while a call is in flight get
//! [`UiStatus::Loading`] back immediately and are expected to ask again on
//! their next render.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    api::{EntitlementApi, Session},
    config::ClientConfig,
    errors::{ApiContext, EntitlementError, ErrorCode, classify_api_error},
    status::UiStatus,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Skip the in-flight guard and the cache.
    pub force_refresh: bool,
}

impl ResolveOptions {
    pub fn force_refresh() -> Self {
        Self {
            force_refresh: true,
        }
    }
}

/// A purchase already held by the store account, replayed by restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPurchase {
    pub purchase_token: String,
    pub product_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Flight {
    #[default]
    Idle,
    InFlight {
        started_at: Instant,
        outstanding: usize,
    },
}

impl Flight {
    fn begin(self, now: Instant) -> Self {
        match self {
            Flight::Idle => Flight::InFlight {
                started_at: now,
                outstanding: 1,
            },
            Flight::InFlight {
                started_at,
                outstanding,
            } => Flight::InFlight {
                started_at,
                outstanding: outstanding + 1,
            },
        }
    }

    fn finish(self) -> Self {
        match self {
            Flight::InFlight {
                started_at,
                outstanding,
            } if outstanding > 1 => Flight::InFlight {
                started_at,
                outstanding: outstanding - 1,
            },
            _ => Flight::Idle,
        }
    }

    fn is_in_flight(&self) -> bool {
        matches!(self, Flight::InFlight { .. })
    }
}

/// Releases one in-flight slot unless disarmed. Covers resolves whose future
/// is dropped before the verify call returns.
struct FlightGuard<'a> {
    state: &'a Mutex<OrchestratorState>,
    epoch: u64,
    armed: bool,
}

impl FlightGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.epoch == self.epoch {
            debug!("entitlement_client: releasing guard of a cancelled resolve");
            state.flight = state.flight.finish();
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedStatus {
    status: UiStatus,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
struct OrchestratorState {
    session: Option<Session>,
    cached: Option<CachedStatus>,
    purchase_just_completed: bool,
    flight: Flight,
    /// Bumped whenever the session or the whole state is replaced. A response
    /// that lands under an older epoch is dropped.
    epoch: u64,
    test_override: Option<UiStatus>,
}

pub struct EntitlementOrchestrator<A>
where
    A: EntitlementApi + 'static,
{
    api: Arc<A>,
    config: ClientConfig,
    state: Mutex<OrchestratorState>,
}

impl<A> EntitlementOrchestrator<A>
where
    A: EntitlementApi + 'static,
{
    pub fn new(api: Arc<A>, config: ClientConfig) -> Self {
        Self {
            api,
            config,
            state: Mutex::new(OrchestratorState::default()),
        }
    }

    // The guard is only ever held between awaits, so a poisoned lock still
    // holds consistent state.
    fn state(&self) -> MutexGuard<'_, OrchestratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sign_in(&self, session: Session) {
        let mut state = self.state();
        info!(user_id = %session.user_id, "entitlement_client: signed in");
        let epoch = state.epoch + 1;
        *state = OrchestratorState {
            session: Some(session),
            epoch,
            test_override: state.test_override,
            ..OrchestratorState::default()
        };
    }

    /// Wipes the session, the cache and every flag.
    pub fn sign_out(&self) {
        let mut state = self.state();
        info!("entitlement_client: signed out");
        let epoch = state.epoch + 1;
        *state = OrchestratorState {
            epoch,
            ..OrchestratorState::default()
        };
    }

    pub async fn resolve_subscription_status(
        &self,
        options: ResolveOptions,
    ) -> Result<UiStatus, EntitlementError> {
        let (session, epoch) = {
            let mut state = self.state();

            if let Some(status) = state.test_override {
                return Ok(status);
            }
            if state.purchase_just_completed {
                state.purchase_just_completed = false;
                debug!("entitlement_client: serving post-purchase fast path");
                return Ok(UiStatus::Active);
            }
            if state.flight.is_in_flight() && !options.force_refresh {
                return Ok(UiStatus::Loading);
            }

            let now = Instant::now();
            if !options.force_refresh {
                if let Some(cached) = state.cached {
                    if now.duration_since(cached.fetched_at) < self.config.debounce {
                        return Ok(cached.status);
                    }
                }
            }

            let session = require_session(&state)?;
            state.flight = state.flight.begin(now);
            (session, state.epoch)
        };

        let guard = FlightGuard {
            state: &self.state,
            epoch,
            armed: true,
        };
        let result = self.api.verify_subscription(&session).await;
        guard.disarm();

        let mut state = self.state();
        if state.epoch != epoch {
            warn!(
                user_id = %session.user_id,
                "entitlement_client: discarding verify response from a previous session"
            );
            return Err(EntitlementError::new(
                ErrorCode::InvalidStateTransition,
                "session changed while status was being resolved",
            ));
        }
        state.flight = state.flight.finish();

        match result {
            Ok(verification) => {
                let status = UiStatus::from_verification(&verification);
                state.cached = Some(CachedStatus {
                    status,
                    fetched_at: Instant::now(),
                });
                info!(
                    user_id = %session.user_id,
                    %status,
                    server_status = %verification.status,
                    "entitlement_client: status resolved"
                );
                Ok(status)
            }
            Err(err) => {
                let err = classify_api_error(err, ApiContext::Verification);
                warn!(
                    user_id = %session.user_id,
                    code = %err.code,
                    retryable = err.is_retryable(),
                    "entitlement_client: status resolution failed"
                );
                Err(err)
            }
        }
    }

    /// Called from the store's purchase callback, before the server has seen
    /// the purchase. The next resolve returns `Active` without a network call.
    pub fn handle_purchase_complete(&self) {
        let mut state = self.state();
        state.purchase_just_completed = true;
        state.cached = Some(CachedStatus {
            status: UiStatus::Active,
            fetched_at: Instant::now(),
        });
    }

    /// Drops the cached status. The in-flight guard is left alone.
    pub fn invalidate_cache(&self) {
        self.state().cached = None;
    }

    pub fn get_cached_status(&self) -> Option<UiStatus> {
        self.state().cached.map(|cached| cached.status)
    }

    /// Submits a store purchase for authoritative verification.
    pub async fn confirm_purchase(
        &self,
        purchase_token: &str,
        product_id: &str,
    ) -> Result<UiStatus, EntitlementError> {
        let (session, epoch) = self.session_and_epoch()?;

        let result = self
            .api
            .verify_purchase(&session, purchase_token, product_id)
            .await
            .map_err(|err| classify_api_error(err, ApiContext::Purchase))?;

        if !result.is_active {
            warn!(
                user_id = %session.user_id,
                product_id,
                "entitlement_client: purchase verified but not active"
            );
            return Err(EntitlementError::new(
                ErrorCode::PurchasePending,
                "purchase is not active yet",
            ));
        }

        self.cache_if_current(epoch, UiStatus::Active);
        info!(
            user_id = %session.user_id,
            product_id,
            order_id = ?result.order_id,
            "entitlement_client: purchase confirmed"
        );
        Ok(UiStatus::Active)
    }

    /// Re-verifies purchases the store account already holds. The first active
    /// one wins.
    pub async fn restore_purchases(
        &self,
        purchases: &[StoredPurchase],
    ) -> Result<UiStatus, EntitlementError> {
        if purchases.is_empty() {
            return Err(EntitlementError::new(
                ErrorCode::NothingToRestore,
                "no purchases to restore",
            ));
        }
        let (session, epoch) = self.session_and_epoch()?;

        let mut last_failure: Option<EntitlementError> = None;
        for purchase in purchases {
            match self
                .api
                .verify_purchase(&session, &purchase.purchase_token, &purchase.product_id)
                .await
            {
                Ok(result) if result.is_active => {
                    self.cache_if_current(epoch, UiStatus::Active);
                    info!(
                        user_id = %session.user_id,
                        product_id = %purchase.product_id,
                        "entitlement_client: purchase restored"
                    );
                    return Ok(UiStatus::Active);
                }
                Ok(_) => {
                    debug!(
                        product_id = %purchase.product_id,
                        "entitlement_client: restored purchase is inactive"
                    );
                }
                Err(err) => {
                    last_failure = Some(classify_api_error(err, ApiContext::Restore));
                }
            }
        }

        // A failed check means we cannot say there is nothing to restore.
        match last_failure {
            Some(err) => {
                let code = match err.code {
                    ErrorCode::RestoreTimeout => ErrorCode::RestoreTimeout,
                    _ => ErrorCode::RestoreFailed,
                };
                let retryable = err.is_retryable();
                let restored = EntitlementError::new(code, err.message.clone()).with_source(err);
                Err(if retryable { restored.retryable() } else { restored })
            }
            None => Err(EntitlementError::new(
                ErrorCode::NothingToRestore,
                "no active purchase among stored purchases",
            )),
        }
    }

    pub async fn start_trial(&self, device_id: Option<String>) -> Result<UiStatus, EntitlementError> {
        let (session, epoch) = self.session_and_epoch()?;

        let started = self
            .api
            .start_trial(&session, device_id)
            .await
            .map_err(|err| classify_api_error(err, ApiContext::Trial))?;

        self.cache_if_current(epoch, UiStatus::Trial);
        info!(
            user_id = %session.user_id,
            trial_ends_at = %started.trial_ends_at,
            "entitlement_client: trial started"
        );
        Ok(UiStatus::Trial)
    }

    /// Forces every resolve to return `status` without touching the network.
    pub fn enable_test_mode(&self, status: UiStatus) {
        self.state().test_override = Some(status);
    }

    pub fn clear_test_mode(&self) {
        self.state().test_override = None;
    }

    /// Back to a freshly constructed orchestrator with the same api and config.
    pub fn reset_for_testing(&self) {
        let mut state = self.state();
        let epoch = state.epoch + 1;
        *state = OrchestratorState {
            epoch,
            ..OrchestratorState::default()
        };
    }

    fn session_and_epoch(&self) -> Result<(Session, u64), EntitlementError> {
        let state = self.state();
        Ok((require_session(&state)?, state.epoch))
    }

    fn cache_if_current(&self, epoch: u64, status: UiStatus) {
        let mut state = self.state();
        if state.epoch == epoch {
            state.cached = Some(CachedStatus {
                status,
                fetched_at: Instant::now(),
            });
        }
    }
}

fn require_session(state: &OrchestratorState) -> Result<Session, EntitlementError> {
    state.session.clone().ok_or_else(|| {
        EntitlementError::new(ErrorCode::MissingUserId, "no signed-in session")
    })
}
