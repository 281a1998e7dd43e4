use std::time::Duration;

use async_trait::async_trait;
use crates::domain::value_objects::entitlements::{
    ErrorBodyDto, ServerTimeDto, StartTrialRequest, SubscriptionSnapshotDto, SyncAckDto,
    SyncSubscriptionRequest, TrialStartedDto, TrialStatusDto, VerificationResultDto,
    VerifyPurchaseDto, VerifyPurchaseRequest, VerifySubscriptionRequest,
};
use mockall::automock;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;

const API_PREFIX: [&str; 3] = ["api", "v1", "subscription"];

/// Signed-in identity: the opaque user id and the bearer token proving it.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,
    #[error("server unreachable: {0}")]
    Unreachable(String),
    #[error("server returned {status} {code}: {message}")]
    Http {
        status: u16,
        code: String,
        message: String,
    },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Timeout | ApiError::Unreachable(_) => true,
            ApiError::Http { status, .. } => *status >= 500,
            ApiError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Unreachable(err.without_url().to_string())
        }
    }
}

/// Client side of the reconciliation protocol.
#[automock]
#[async_trait]
pub trait EntitlementApi: Send + Sync {
    async fn server_time(&self) -> Result<ServerTimeDto, ApiError>;

    async fn trial_status(&self, session: &Session) -> Result<TrialStatusDto, ApiError>;

    async fn start_trial(
        &self,
        session: &Session,
        device_id: Option<String>,
    ) -> Result<TrialStartedDto, ApiError>;

    async fn subscription_status(
        &self,
        session: &Session,
    ) -> Result<SubscriptionSnapshotDto, ApiError>;

    async fn sync_subscription(
        &self,
        session: &Session,
        request: SyncSubscriptionRequest,
    ) -> Result<SyncAckDto, ApiError>;

    async fn verify_subscription(&self, session: &Session)
    -> Result<VerificationResultDto, ApiError>;

    async fn verify_purchase(
        &self,
        session: &Session,
        purchase_token: &str,
        product_id: &str,
    ) -> Result<VerifyPurchaseDto, ApiError>;
}

pub struct HttpEntitlementApi {
    http: Client,
    base_url: Url,
}

impl HttpEntitlementApi {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("entitlement api base url cannot be a base: {}", config.base_url);
        }
        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Unreachable("base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(API_PREFIX)
            .extend(segments);
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
        session: Option<&Session>,
    ) -> Result<RequestBuilder, ApiError> {
        let builder = self.http.request(method, self.endpoint(segments)?);
        Ok(match session {
            Some(session) => builder.bearer_auth(&session.access_token),
            None => builder,
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let error = serde_json::from_str::<ErrorBodyDto>(&body).ok();
    let (code, message) = match error {
        Some(error) => (error.code, error.message),
        None => ("HTTP_ERROR".to_string(), status.to_string()),
    };

    warn!(status = status.as_u16(), %code, "entitlement_api: request rejected");
    Err(ApiError::Http {
        status: status.as_u16(),
        code,
        message,
    })
}

#[async_trait]
impl EntitlementApi for HttpEntitlementApi {
    async fn server_time(&self) -> Result<ServerTimeDto, ApiError> {
        let response = self.request(Method::GET, &["server-time"], None)?.send().await?;
        decode(response).await
    }

    async fn trial_status(&self, session: &Session) -> Result<TrialStatusDto, ApiError> {
        let response = self
            .request(Method::GET, &["trial-status", session.user_id.as_str()], Some(session))?
            .send()
            .await?;
        decode(response).await
    }

    async fn start_trial(
        &self,
        session: &Session,
        device_id: Option<String>,
    ) -> Result<TrialStartedDto, ApiError> {
        let body = StartTrialRequest {
            user_id: session.user_id.clone(),
            device_id,
        };
        let response = self
            .request(Method::POST, &["trial-start"], Some(session))?
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    async fn subscription_status(
        &self,
        session: &Session,
    ) -> Result<SubscriptionSnapshotDto, ApiError> {
        let response = self
            .request(Method::GET, &["status", session.user_id.as_str()], Some(session))?
            .send()
            .await?;
        decode(response).await
    }

    async fn sync_subscription(
        &self,
        session: &Session,
        mut request: SyncSubscriptionRequest,
    ) -> Result<SyncAckDto, ApiError> {
        request.user_id = session.user_id.clone();
        let response = self
            .request(Method::POST, &["sync"], Some(session))?
            .json(&request)
            .send()
            .await?;
        decode(response).await
    }

    async fn verify_subscription(
        &self,
        session: &Session,
    ) -> Result<VerificationResultDto, ApiError> {
        debug!(user_id = %session.user_id, "entitlement_api: verify");
        let body = VerifySubscriptionRequest {
            user_id: session.user_id.clone(),
        };
        let response = self
            .request(Method::POST, &["verify"], Some(session))?
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    async fn verify_purchase(
        &self,
        session: &Session,
        purchase_token: &str,
        product_id: &str,
    ) -> Result<VerifyPurchaseDto, ApiError> {
        let body = VerifyPurchaseRequest {
            user_id: session.user_id.clone(),
            purchase_token: purchase_token.to_string(),
            product_id: product_id.to_string(),
        };
        let response = self
            .request(Method::POST, &["verify-purchase"], Some(session))?
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base_url: &str) -> HttpEntitlementApi {
        HttpEntitlementApi::new(&ClientConfig {
            base_url: base_url.to_string(),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn endpoints_are_nested_under_the_subscription_prefix() {
        let url = api("https://api.example.com/").endpoint(&["verify"]).unwrap();

        assert_eq!(url.as_str(), "https://api.example.com/api/v1/subscription/verify");
    }

    #[test]
    fn user_ids_are_escaped_as_one_segment() {
        let url = api("https://api.example.com")
            .endpoint(&["status", "google/1234"])
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/v1/subscription/status/google%2F1234"
        );
    }

    #[test]
    fn session_debug_hides_the_token() {
        let session = Session {
            user_id: "u1".to_string(),
            access_token: "eyJhbGciOi".to_string(),
        };

        let rendered = format!("{session:?}");
        assert!(rendered.contains("u1"));
        assert!(!rendered.contains("eyJhbGciOi"));
    }

    #[test]
    fn only_network_and_server_failures_are_transient() {
        assert!(ApiError::Timeout.is_transient());
        assert!(
            ApiError::Http {
                status: 502,
                code: "HTTP_ERROR".to_string(),
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !ApiError::Http {
                status: 409,
                code: "ALREADY_USED".to_string(),
                message: String::new()
            }
            .is_transient()
        );
    }
}
