use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRef, Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use crates::{
    domain::{
        repositories::entitlements::EntitlementRepository,
        value_objects::entitlements::{
            StartTrialRequest, SyncSubscriptionRequest, VerifyPurchaseRequest,
            VerifySubscriptionRequest,
        },
    },
    purchases::verifier::PurchaseVerifier,
};

use crate::{
    auth::{AuthUser, JwtAuthenticator},
    usecases::entitlements::{EntitlementError, EntitlementUseCase, authorize_user},
};

pub struct AppState<R, V>
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    pub entitlement_usecase: Arc<EntitlementUseCase<R, V>>,
    pub authenticator: JwtAuthenticator,
}

impl<R, V> Clone for AppState<R, V>
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            entitlement_usecase: Arc::clone(&self.entitlement_usecase),
            authenticator: self.authenticator.clone(),
        }
    }
}

impl<R, V> FromRef<AppState<R, V>> for JwtAuthenticator
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    fn from_ref(state: &AppState<R, V>) -> Self {
        state.authenticator.clone()
    }
}

pub fn routes<R, V>(
    entitlement_usecase: Arc<EntitlementUseCase<R, V>>,
    authenticator: JwtAuthenticator,
) -> Router
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    Router::new()
        .route("/server-time", get(server_time::<R, V>))
        .route("/trial-status/:user_id", get(trial_status::<R, V>))
        .route("/trial-start", post(start_trial::<R, V>))
        .route("/status/:user_id", get(subscription_status::<R, V>))
        .route("/sync", post(sync_subscription::<R, V>))
        .route("/verify", post(verify_subscription::<R, V>))
        .route("/verify-purchase", post(verify_purchase::<R, V>))
        .route("/reset/:user_id", delete(reset_user::<R, V>))
        .with_state(AppState {
            entitlement_usecase,
            authenticator,
        })
}

pub async fn server_time<R, V>(State(state): State<AppState<R, V>>) -> impl IntoResponse
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    (StatusCode::OK, Json(state.entitlement_usecase.server_time()))
}

pub async fn trial_status<R, V>(
    State(state): State<AppState<R, V>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, EntitlementError>
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    let user_id = authorize_user(&auth.user_id, &user_id)?;
    let status = state.entitlement_usecase.get_trial_status(&user_id).await?;

    Ok((StatusCode::OK, Json(status)))
}

pub async fn start_trial<R, V>(
    State(state): State<AppState<R, V>>,
    auth: AuthUser,
    body: Result<Json<StartTrialRequest>, JsonRejection>,
) -> Result<impl IntoResponse, EntitlementError>
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    let Json(mut request) = body?;
    request.user_id = authorize_user(&auth.user_id, &request.user_id)?;

    let started = state.entitlement_usecase.start_trial(request).await?;

    Ok((StatusCode::CREATED, Json(started)))
}

pub async fn subscription_status<R, V>(
    State(state): State<AppState<R, V>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, EntitlementError>
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    let user_id = authorize_user(&auth.user_id, &user_id)?;
    let snapshot = state
        .entitlement_usecase
        .get_subscription_status(&user_id)
        .await?;

    Ok((StatusCode::OK, Json(snapshot)))
}

pub async fn sync_subscription<R, V>(
    State(state): State<AppState<R, V>>,
    auth: AuthUser,
    body: Result<Json<SyncSubscriptionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, EntitlementError>
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    let Json(mut request) = body?;
    request.user_id = authorize_user(&auth.user_id, &request.user_id)?;

    let ack = state.entitlement_usecase.sync_subscription(request).await?;

    Ok((StatusCode::OK, Json(ack)))
}

pub async fn verify_subscription<R, V>(
    State(state): State<AppState<R, V>>,
    auth: AuthUser,
    body: Result<Json<VerifySubscriptionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, EntitlementError>
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    let Json(request) = body?;
    let user_id = authorize_user(&auth.user_id, &request.user_id)?;

    let result = state
        .entitlement_usecase
        .verify_subscription(&user_id)
        .await?;

    Ok((StatusCode::OK, Json(result)))
}

pub async fn verify_purchase<R, V>(
    State(state): State<AppState<R, V>>,
    auth: AuthUser,
    body: Result<Json<VerifyPurchaseRequest>, JsonRejection>,
) -> Result<impl IntoResponse, EntitlementError>
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    let Json(mut request) = body?;
    request.user_id = authorize_user(&auth.user_id, &request.user_id)?;

    let result = state.entitlement_usecase.verify_purchase(request).await?;

    Ok((StatusCode::OK, Json(result)))
}

pub async fn reset_user<R, V>(
    State(state): State<AppState<R, V>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, EntitlementError>
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    let user_id = authorize_user(&auth.user_id, &user_id)?;
    let reset = state.entitlement_usecase.reset_user(&user_id).await?;

    Ok((StatusCode::OK, Json(reset)))
}
