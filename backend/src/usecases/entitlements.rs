use std::sync::Arc;

use chrono::{DateTime, Utc};
use crates::{
    domain::{
        entities::{
            purchase_verifications::InsertPurchaseVerificationEntity,
            subscriptions::SubscriptionEntity, trials::InsertTrialEntity,
        },
        repositories::entitlements::EntitlementRepository,
        value_objects::{
            entitlements::{
                ResetDto, ServerTimeDto, StartTrialRequest, SubscriptionSnapshotDto, SyncAckDto,
                SyncSubscriptionRequest, TrialStartedDto, TrialStatusDto,
                VERIFICATION_SOURCE_SERVER, VerificationResultDto, VerifyPurchaseDto,
                VerifyPurchaseRequest,
            },
            enums::subscription_statuses::SubscriptionStatus,
            subscription_patches::{SubscriptionActivation, SubscriptionSyncPatch, TrialStartOutcome},
            trials::TrialPolicy,
        },
    },
    purchases::verifier::PurchaseVerifier,
};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("userId is required")]
    MissingUserId,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("userId does not match the authenticated user")]
    Forbidden,
    #[error("trial already used")]
    TrialAlreadyUsed { trial_started_at: DateTime<Utc> },
    #[error("purchase verification failed: {0}")]
    VerificationFailed(String),
    #[error("not found")]
    ResetDisabled,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EntitlementError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            EntitlementError::MissingUserId
            | EntitlementError::InvalidRequest(_)
            | EntitlementError::VerificationFailed(_) => StatusCode::BAD_REQUEST,
            EntitlementError::Forbidden => StatusCode::FORBIDDEN,
            EntitlementError::TrialAlreadyUsed { .. } => StatusCode::CONFLICT,
            EntitlementError::ResetDisabled => StatusCode::NOT_FOUND,
            EntitlementError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code carried in every error body.
    pub fn code(&self) -> &'static str {
        match self {
            EntitlementError::MissingUserId | EntitlementError::InvalidRequest(_) => {
                "INVALID_REQUEST"
            }
            EntitlementError::Forbidden => "FORBIDDEN",
            EntitlementError::TrialAlreadyUsed { .. } => "ALREADY_USED",
            EntitlementError::VerificationFailed(_) => "VERIFICATION_FAILED",
            EntitlementError::ResetDisabled => "NOT_FOUND",
            EntitlementError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, EntitlementError>;

/// Checks that `user_id` is present and names the authenticated caller.
/// Returns the trimmed id.
pub fn authorize_user(caller_id: &str, user_id: &str) -> UseCaseResult<String> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(EntitlementError::MissingUserId);
    }
    if user_id != caller_id {
        warn!(
            caller_id,
            user_id,
            status = axum::http::StatusCode::FORBIDDEN.as_u16(),
            "entitlements: userId does not match token subject"
        );
        return Err(EntitlementError::Forbidden);
    }
    Ok(user_id.to_string())
}

/// Short, non-reversible label for a purchase token in logs.
pub fn token_fingerprint(purchase_token: &str) -> String {
    let prefix: String = purchase_token.chars().take(8).collect();
    format!("{prefix}…({})", purchase_token.chars().count())
}

pub struct EntitlementUseCase<R, V>
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    entitlement_repository: Arc<R>,
    purchase_verifier: Arc<V>,
    trial_policy: TrialPolicy,
    reset_enabled: bool,
}

impl<R, V> EntitlementUseCase<R, V>
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    pub fn new(
        entitlement_repository: Arc<R>,
        purchase_verifier: Arc<V>,
        trial_policy: TrialPolicy,
        reset_enabled: bool,
    ) -> Self {
        Self {
            entitlement_repository,
            purchase_verifier,
            trial_policy,
            reset_enabled,
        }
    }

    pub fn server_time(&self) -> ServerTimeDto {
        let now = Utc::now();
        ServerTimeDto {
            server_time: now,
            timestamp: now.timestamp_millis(),
        }
    }

    pub async fn get_trial_status(&self, user_id: &str) -> UseCaseResult<TrialStatusDto> {
        let trial = self
            .entitlement_repository
            .find_trial(user_id)
            .await
            .map_err(|err| internal(user_id, "failed to load trial", err))?;
        let now = Utc::now();

        let trial_started_at = trial.map(|trial| trial.trial_started_at);

        Ok(TrialStatusDto {
            user_id: user_id.to_string(),
            has_used_trial: trial_started_at.is_some(),
            trial_started_at,
            trial_ends_at: trial_started_at.map(|started| self.trial_policy.ends_at(started)),
            trial_active: trial_started_at
                .is_some_and(|started| self.trial_policy.is_active(started, now)),
            server_time: now,
        })
    }

    pub async fn start_trial(&self, request: StartTrialRequest) -> UseCaseResult<TrialStartedDto> {
        let now = Utc::now();
        info!(user_id = %request.user_id, "entitlements: trial start requested");

        let insert_trial_entity =
            InsertTrialEntity::new(&request.user_id, request.device_id.clone(), now);

        let outcome = self
            .entitlement_repository
            .start_trial(insert_trial_entity)
            .await
            .map_err(|err| internal(&request.user_id, "failed to start trial", err))?;

        match outcome {
            TrialStartOutcome::Started(trial) => {
                info!(
                    user_id = %trial.user_id,
                    trial_started_at = %trial.trial_started_at,
                    "entitlements: trial started"
                );
                Ok(TrialStartedDto {
                    user_id: trial.user_id,
                    trial_started_at: trial.trial_started_at,
                    trial_ends_at: self.trial_policy.ends_at(trial.trial_started_at),
                    server_time: Utc::now(),
                })
            }
            TrialStartOutcome::AlreadyUsed(trial) => {
                warn!(
                    user_id = %trial.user_id,
                    trial_started_at = %trial.trial_started_at,
                    status = axum::http::StatusCode::CONFLICT.as_u16(),
                    "entitlements: trial already used"
                );
                Err(EntitlementError::TrialAlreadyUsed {
                    trial_started_at: trial.trial_started_at,
                })
            }
        }
    }

    pub async fn get_subscription_status(
        &self,
        user_id: &str,
    ) -> UseCaseResult<SubscriptionSnapshotDto> {
        let (trial_started_at, subscription) = self.load_state(user_id).await?;
        let now = Utc::now();

        Ok(SubscriptionSnapshotDto {
            user_id: user_id.to_string(),
            status: subscription.status(),
            has_used_trial: trial_started_at.is_some(),
            trial_started_at,
            trial_ends_at: trial_started_at.map(|started| self.trial_policy.ends_at(started)),
            trial_active: trial_started_at
                .is_some_and(|started| self.trial_policy.is_active(started, now)),
            subscription_started_at: subscription.subscription_started_at,
            subscription_expires_at: subscription.subscription_expires_at,
            product_id: subscription.product_id.clone(),
            order_id: subscription.order_id.clone(),
            last_verified_at: subscription.last_verified_at,
            has_purchase_history: subscription.has_purchase_history(),
            server_time: now,
        })
    }

    pub async fn sync_subscription(
        &self,
        request: SyncSubscriptionRequest,
    ) -> UseCaseResult<SyncAckDto> {
        let patch = SubscriptionSyncPatch::from_client_report(
            request.status,
            request.product_id,
            request.expires_at,
            request.purchase_token,
        );

        if let Some(ignored) = patch.ignored_status() {
            warn!(
                user_id = %request.user_id,
                reported_status = %ignored,
                "entitlements: client-reported status ignored by sync"
            );
        }

        let subscription = self
            .entitlement_repository
            .sync_subscription(&request.user_id, patch)
            .await
            .map_err(|err| internal(&request.user_id, "failed to sync subscription", err))?;

        info!(
            user_id = %request.user_id,
            status = %subscription.status(),
            "entitlements: subscription synced"
        );

        Ok(SyncAckDto {
            user_id: subscription.user_id.clone(),
            status: subscription.status(),
            server_time: Utc::now(),
        })
    }

    pub async fn verify_subscription(&self, user_id: &str) -> UseCaseResult<VerificationResultDto> {
        let (trial_started_at, subscription) = self.load_state(user_id).await?;
        let now = Utc::now();
        let status = subscription.status();

        let result = VerificationResultDto {
            user_id: user_id.to_string(),
            status,
            entitlement_active: status == SubscriptionStatus::Subscribed,
            expires_date: subscription.subscription_expires_at,
            product_id: subscription.product_id.clone(),
            has_used_trial: trial_started_at.is_some(),
            trial_active: trial_started_at
                .is_some_and(|started| self.trial_policy.is_active(started, now)),
            trial_ends_at: trial_started_at.map(|started| self.trial_policy.ends_at(started)),
            has_purchase_history: subscription.has_purchase_history(),
            server_time: now,
            source: VERIFICATION_SOURCE_SERVER.to_string(),
        };

        info!(
            %user_id,
            status = %result.status,
            entitlement_active = result.entitlement_active,
            "entitlements: subscription verified"
        );

        Ok(result)
    }

    pub async fn verify_purchase(
        &self,
        request: VerifyPurchaseRequest,
    ) -> UseCaseResult<VerifyPurchaseDto> {
        let purchase_token = request.purchase_token.trim();
        let product_id = request.product_id.trim();
        if purchase_token.is_empty() || product_id.is_empty() {
            return Err(EntitlementError::InvalidRequest(
                "purchaseToken and productId are required".to_string(),
            ));
        }

        let fingerprint = token_fingerprint(purchase_token);
        info!(
            user_id = %request.user_id,
            product_id,
            token = %fingerprint,
            "entitlements: purchase verification requested"
        );

        let outcome = self
            .purchase_verifier
            .verify(purchase_token, product_id)
            .await
            .map_err(|err| {
                warn!(
                    user_id = %request.user_id,
                    product_id,
                    token = %fingerprint,
                    error = %err,
                    status = axum::http::StatusCode::BAD_REQUEST.as_u16(),
                    "entitlements: purchase verification failed"
                );
                EntitlementError::VerificationFailed(err.to_string())
            })?;

        let verified_at = Utc::now();
        let audit = InsertPurchaseVerificationEntity {
            id: Uuid::new_v4(),
            user_id: request.user_id.clone(),
            purchase_token: purchase_token.to_string(),
            order_id: outcome.order_id.clone(),
            product_id: product_id.to_string(),
            raw_response: outcome.raw.clone(),
            verified_at,
        };
        let activation = outcome.is_active.then(|| SubscriptionActivation {
            product_id: product_id.to_string(),
            purchase_token: purchase_token.to_string(),
            order_id: outcome.order_id.clone(),
            expires_at: outcome.expires_at,
            verified_at,
        });

        self.entitlement_repository
            .record_verification(audit, activation)
            .await
            .map_err(|err| internal(&request.user_id, "failed to record verification", err))?;

        info!(
            user_id = %request.user_id,
            product_id,
            is_active = outcome.is_active,
            order_id = ?outcome.order_id,
            "entitlements: purchase verified"
        );

        Ok(VerifyPurchaseDto {
            is_active: outcome.is_active,
            expires_at: outcome.expires_at,
            auto_renewing: outcome.auto_renewing,
            order_id: outcome.order_id,
            server_time: verified_at,
        })
    }

    pub async fn reset_user(&self, user_id: &str) -> UseCaseResult<ResetDto> {
        if !self.reset_enabled {
            warn!(%user_id, "entitlements: reset requested while disabled");
            return Err(EntitlementError::ResetDisabled);
        }

        self.entitlement_repository
            .reset_user(user_id)
            .await
            .map_err(|err| internal(user_id, "failed to reset user", err))?;

        warn!(%user_id, "entitlements: user entitlement state reset");

        Ok(ResetDto {
            user_id: user_id.to_string(),
            reset: true,
            server_time: Utc::now(),
        })
    }

    async fn load_state(
        &self,
        user_id: &str,
    ) -> UseCaseResult<(Option<DateTime<Utc>>, SubscriptionEntity)> {
        let trial = self
            .entitlement_repository
            .find_trial(user_id)
            .await
            .map_err(|err| internal(user_id, "failed to load trial", err))?;
        let subscription = self
            .entitlement_repository
            .find_subscription(user_id)
            .await
            .map_err(|err| internal(user_id, "failed to load subscription", err))?
            .unwrap_or_else(|| SubscriptionEntity::blank(user_id, Utc::now()));

        // The trial table is the permanent record; the subscription copy may be reset.
        let trial_started_at = trial
            .map(|trial| trial.trial_started_at)
            .or(subscription.trial_started_at);

        Ok((trial_started_at, subscription))
    }
}

fn internal(user_id: &str, context: &'static str, err: anyhow::Error) -> EntitlementError {
    error!(%user_id, db_error = ?err, "entitlements: {context}");
    EntitlementError::Internal(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::{Duration, TimeZone};
    use crates::{
        domain::{
            entities::trials::TrialEntity,
            repositories::entitlements::MockEntitlementRepository,
        },
        purchases::verifier::{MockPurchaseVerifier, VerificationOutcome, VerifierError},
    };
    use serde_json::json;

    fn usecase(
        repository: MockEntitlementRepository,
        verifier: MockPurchaseVerifier,
    ) -> EntitlementUseCase<MockEntitlementRepository, MockPurchaseVerifier> {
        EntitlementUseCase::new(
            Arc::new(repository),
            Arc::new(verifier),
            TrialPolicy::from_days(7),
            false,
        )
    }

    fn trial(user_id: &str, started_at: DateTime<Utc>) -> TrialEntity {
        TrialEntity {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            trial_started_at: started_at,
            device_id: Some("d1".to_string()),
            created_at: started_at,
        }
    }

    fn active_outcome() -> VerificationOutcome {
        VerificationOutcome {
            is_active: true,
            expires_at: Utc.timestamp_millis_opt(1_999_999_999_000).single(),
            order_id: Some("o1".to_string()),
            auto_renewing: true,
            payment_state: Some(1),
            raw: json!({ "expiryTimeMillis": "1999999999000", "orderId": "o1" }),
        }
    }

    #[test]
    fn authorize_user_rejects_blank_and_foreign_ids() {
        assert!(matches!(
            authorize_user("u1", "  "),
            Err(EntitlementError::MissingUserId)
        ));
        assert!(matches!(
            authorize_user("u1", "u2"),
            Err(EntitlementError::Forbidden)
        ));
        assert_eq!(authorize_user("u1", " u1 ").unwrap(), "u1");
    }

    #[test]
    fn fingerprint_hides_the_token() {
        let fingerprint = token_fingerprint("abcdefghijklmnopqrstuvwxyz");

        assert!(fingerprint.starts_with("abcdefgh"));
        assert!(fingerprint.ends_with("(26)"));
        assert!(!fingerprint.contains("ijkl"));
    }

    #[tokio::test]
    async fn new_user_has_no_trial() {
        let mut repository = MockEntitlementRepository::new();
        repository
            .expect_find_trial()
            .withf(|user_id| user_id == "u1")
            .returning(|_| Ok(None));

        let status = usecase(repository, MockPurchaseVerifier::new())
            .get_trial_status("u1")
            .await
            .unwrap();

        assert!(!status.has_used_trial);
        assert!(status.trial_started_at.is_none());
        assert!(!status.trial_active);
    }

    #[tokio::test]
    async fn expired_trial_is_used_but_inactive() {
        let started_at = Utc::now() - Duration::days(10);
        let mut repository = MockEntitlementRepository::new();
        repository
            .expect_find_trial()
            .returning(move |_| Ok(Some(trial("u1", started_at))));

        let status = usecase(repository, MockPurchaseVerifier::new())
            .get_trial_status("u1")
            .await
            .unwrap();

        assert!(status.has_used_trial);
        assert!(!status.trial_active);
        assert_eq!(status.trial_ends_at, Some(started_at + Duration::days(7)));
    }

    #[tokio::test]
    async fn second_trial_start_conflicts_with_original_timestamp() {
        let started_at = Utc::now() - Duration::days(1);
        let mut repository = MockEntitlementRepository::new();
        repository
            .expect_start_trial()
            .times(1)
            .returning(move |_| Ok(TrialStartOutcome::AlreadyUsed(trial("u1", started_at))));

        let err = usecase(repository, MockPurchaseVerifier::new())
            .start_trial(StartTrialRequest {
                user_id: "u1".to_string(),
                device_id: Some("d2".to_string()),
            })
            .await
            .unwrap_err();

        match err {
            EntitlementError::TrialAlreadyUsed { trial_started_at } => {
                assert_eq!(trial_started_at, started_at)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verifier_failure_writes_nothing() {
        let mut repository = MockEntitlementRepository::new();
        repository.expect_record_verification().never();

        let mut verifier = MockPurchaseVerifier::new();
        verifier
            .expect_verify()
            .returning(|_, _| Err(VerifierError::Rejected("token not found".to_string())));

        let err = usecase(repository, verifier)
            .verify_purchase(VerifyPurchaseRequest {
                user_id: "u1".to_string(),
                purchase_token: "tok".to_string(),
                product_id: "p1".to_string(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), "VERIFICATION_FAILED");
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn active_purchase_records_audit_and_activation() {
        let mut repository = MockEntitlementRepository::new();
        repository
            .expect_record_verification()
            .withf(|audit, activation| {
                audit.order_id.as_deref() == Some("o1")
                    && audit.raw_response["orderId"] == "o1"
                    && activation
                        .as_ref()
                        .is_some_and(|a| a.product_id == "p1" && a.purchase_token == "tok")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut verifier = MockPurchaseVerifier::new();
        verifier
            .expect_verify()
            .withf(|token, product_id| token == "tok" && product_id == "p1")
            .returning(|_, _| Ok(active_outcome()));

        let result = usecase(repository, verifier)
            .verify_purchase(VerifyPurchaseRequest {
                user_id: "u1".to_string(),
                purchase_token: "tok".to_string(),
                product_id: "p1".to_string(),
            })
            .await
            .unwrap();

        assert!(result.is_active);
        assert_eq!(result.order_id.as_deref(), Some("o1"));
        assert_eq!(
            result.expires_at.map(|at| at.timestamp_millis()),
            Some(1_999_999_999_000)
        );
    }

    #[tokio::test]
    async fn inactive_purchase_is_audited_without_activation() {
        let mut repository = MockEntitlementRepository::new();
        repository
            .expect_record_verification()
            .withf(|_, activation| activation.is_none())
            .times(1)
            .returning(|_, _| Ok(()));

        let mut verifier = MockPurchaseVerifier::new();
        verifier.expect_verify().returning(|_, _| {
            Ok(VerificationOutcome {
                is_active: false,
                ..active_outcome()
            })
        });

        let result = usecase(repository, verifier)
            .verify_purchase(VerifyPurchaseRequest {
                user_id: "u1".to_string(),
                purchase_token: "tok".to_string(),
                product_id: "p1".to_string(),
            })
            .await
            .unwrap();

        assert!(!result.is_active);
    }

    #[tokio::test]
    async fn blank_purchase_token_never_reaches_the_verifier() {
        let mut verifier = MockPurchaseVerifier::new();
        verifier.expect_verify().never();

        let err = usecase(MockEntitlementRepository::new(), verifier)
            .verify_purchase(VerifyPurchaseRequest {
                user_id: "u1".to_string(),
                purchase_token: " ".to_string(),
                product_id: "p1".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EntitlementError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn verify_reports_entitlement_only_for_subscribed() {
        let mut repository = MockEntitlementRepository::new();
        let now = Utc::now();
        repository
            .expect_find_trial()
            .returning(move |_| Ok(Some(trial("u1", now))));
        repository.expect_find_subscription().returning(move |_| {
            let mut subscription = SubscriptionEntity::blank("u1", now);
            subscription.apply_trial_start(now, now);
            Ok(Some(subscription))
        });

        let result = usecase(repository, MockPurchaseVerifier::new())
            .verify_subscription("u1")
            .await
            .unwrap();

        assert_eq!(result.status, SubscriptionStatus::Trial);
        assert!(!result.entitlement_active);
        assert!(result.trial_active);
        assert!(result.has_used_trial);
        assert!(!result.has_purchase_history);
        assert_eq!(result.source, "server");
    }

    #[tokio::test]
    async fn unknown_user_snapshot_is_blocked_defaults() {
        let mut repository = MockEntitlementRepository::new();
        repository.expect_find_trial().returning(|_| Ok(None));
        repository.expect_find_subscription().returning(|_| Ok(None));

        let snapshot = usecase(repository, MockPurchaseVerifier::new())
            .get_subscription_status("u9")
            .await
            .unwrap();

        assert_eq!(snapshot.status, SubscriptionStatus::Blocked);
        assert!(!snapshot.has_used_trial);
        assert!(!snapshot.has_purchase_history);
        assert!(snapshot.product_id.is_none());
    }

    #[tokio::test]
    async fn sync_passes_a_patch_without_the_promotion() {
        let mut repository = MockEntitlementRepository::new();
        repository
            .expect_sync_subscription()
            .withf(|user_id, patch| user_id == "u1" && patch.status().is_none())
            .returning(|user_id, _| Ok(SubscriptionEntity::blank(user_id, Utc::now())));

        let ack = usecase(repository, MockPurchaseVerifier::new())
            .sync_subscription(SyncSubscriptionRequest {
                user_id: "u1".to_string(),
                status: Some(SubscriptionStatus::Subscribed),
                product_id: Some("p1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(ack.status, SubscriptionStatus::Blocked);
    }

    #[tokio::test]
    async fn database_failure_is_internal() {
        let mut repository = MockEntitlementRepository::new();
        repository
            .expect_find_trial()
            .returning(|_| Err(anyhow!("connection refused")));

        let err = usecase(repository, MockPurchaseVerifier::new())
            .get_trial_status("u1")
            .await
            .unwrap_err();

        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(
            err.status_code(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn reset_is_refused_when_disabled() {
        let mut repository = MockEntitlementRepository::new();
        repository.expect_reset_user().never();

        let err = usecase(repository, MockPurchaseVerifier::new())
            .reset_user("u1")
            .await
            .unwrap_err();

        assert!(matches!(err, EntitlementError::ResetDisabled));
    }
}
