use axum::{
    Json,
    extract::rejection::JsonRejection,
    response::{IntoResponse, Response},
};
use crates::domain::value_objects::entitlements::ErrorBodyDto;
use tracing::warn;

use crate::usecases::entitlements::EntitlementError;

impl IntoResponse for EntitlementError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            EntitlementError::TrialAlreadyUsed { trial_started_at } => ErrorBodyDto {
                code: self.code().to_string(),
                message: self.to_string(),
                has_used_trial: Some(true),
                trial_started_at: Some(*trial_started_at),
            },
            // Detail stays in the server log.
            EntitlementError::Internal(_) => ErrorBodyDto {
                code: self.code().to_string(),
                message: "Internal server error".to_string(),
                has_used_trial: None,
                trial_started_at: None,
            },
            _ => ErrorBodyDto {
                code: self.code().to_string(),
                message: self.to_string(),
                has_used_trial: None,
                trial_started_at: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for EntitlementError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(
            reason = %rejection.body_text(),
            status = rejection.status().as_u16(),
            "entitlements: request body rejected"
        );
        EntitlementError::InvalidRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, http::StatusCode};
    use chrono::Utc;

    async fn body_of(err: EntitlementError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn conflict_body_carries_trial_fields() {
        let started = Utc::now();
        let (status, body) = body_of(EntitlementError::TrialAlreadyUsed {
            trial_started_at: started,
        })
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "ALREADY_USED");
        assert_eq!(body["hasUsedTrial"], true);
        assert!(body["trialStartedAt"].is_string());
    }

    #[tokio::test]
    async fn internal_errors_hide_their_cause() {
        let (status, body) =
            body_of(EntitlementError::Internal(anyhow::anyhow!("password=hunter2"))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert_eq!(body["message"], "Internal server error");
    }
}
