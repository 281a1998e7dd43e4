use axum::{
    Json, async_trait,
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use crates::domain::value_objects::entitlements::ErrorBodyDto;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::config_model::Auth;

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub exp: usize,
}

/// Caller identity taken from a validated bearer token. `user_id` is the
/// token subject, an opaque id issued by the login provider.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

/// HS256 validator shared by every authenticated route.
#[derive(Clone)]
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(auth: &Auth) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&auth.audiences);

        Self {
            decoding_key: DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let token_data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| AuthError(format!("JWT validation failed: {err}")))?;

        if token_data.claims.sub.trim().is_empty() {
            return Err(AuthError("token subject is empty".to_string()));
        }

        Ok(token_data.claims)
    }
}

#[derive(Debug)]
pub struct AuthError(pub String);

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = ErrorBodyDto {
            code: "UNAUTHORIZED".to_string(),
            message: format!("Unauthorized: {}", self.0),
            has_used_trial: None,
            trial_started_at: None,
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    JwtAuthenticator: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|rejection| {
                    debug!(reason = %rejection, "auth: bearer header rejected");
                    AuthError("missing or malformed Authorization header".to_string())
                })?;

        let claims = JwtAuthenticator::from_ref(state).validate(bearer.token())?;

        Ok(AuthUser {
            user_id: claims.sub,
        })
    }
}
