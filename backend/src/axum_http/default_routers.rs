use axum::{Json, http::StatusCode, response::IntoResponse};
use crates::domain::value_objects::entitlements::ErrorBodyDto;

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK").into_response()
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBodyDto {
            code: "NOT_FOUND".to_string(),
            message: "Not found".to_string(),
            has_used_trial: None,
            trial_started_at: None,
        }),
    )
        .into_response()
}
