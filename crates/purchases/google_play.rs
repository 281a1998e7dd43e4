use std::{path::Path, time::Duration as StdDuration};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::{StatusCode, header::AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use url::Url;

use super::verifier::{PurchaseVerifier, VerificationOutcome, VerifierError};

const ANDROID_PUBLISHER_SCOPE: &str = "https://www.googleapis.com/auth/androidpublisher";
const ANDROID_PUBLISHER_BASE_URL: &str = "https://androidpublisher.googleapis.com/";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const PAYMENT_STATE_PENDING: i32 = 0;
// Must stay below the backend request timeout.
const STORE_REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedAccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// `purchases.subscriptions` resource of the Play Developer API (fields we read).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionPurchase {
    expiry_time_millis: Option<String>,
    order_id: Option<String>,
    #[serde(default)]
    auto_renewing: bool,
    payment_state: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorDetails,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetails {
    message: Option<String>,
    status: Option<String>,
}

/// Verifies Android subscription tokens with a service account.
pub struct GooglePlayVerifier {
    http: reqwest::Client,
    api_base_url: String,
    package_name: String,
    client_email: String,
    token_uri: String,
    signing_key: EncodingKey,
    access_token: Mutex<Option<CachedAccessToken>>,
}

impl GooglePlayVerifier {
    pub fn from_service_account_file(path: &Path, package_name: String) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read service account key {}", path.display()))?;
        let key: ServiceAccountKey =
            serde_json::from_str(&raw).context("service account key is not valid JSON")?;
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("service account private key is not a valid RSA PEM")?;

        let http = reqwest::Client::builder()
            .timeout(STORE_REQUEST_TIMEOUT)
            .build()
            .context("failed to build google play http client")?;

        Ok(Self {
            http,
            api_base_url: ANDROID_PUBLISHER_BASE_URL.to_string(),
            package_name,
            client_email: key.client_email,
            token_uri: key.token_uri,
            signing_key,
            access_token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, VerifierError> {
        let mut cached = self.access_token.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now {
                return Ok(token.token.clone());
            }
        }

        debug!("google_play: minting new access token");
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: ANDROID_PUBLISHER_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|err| VerifierError::Unavailable(anyhow!("failed to sign assertion: {err}")))?;

        let resp = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|err| VerifierError::Unavailable(err.into()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            error!(status = %status, "google_play: access token exchange failed");
            return Err(VerifierError::Unavailable(anyhow!(
                "token endpoint returned {status}"
            )));
        }

        let parsed: AccessTokenResponse = resp
            .json()
            .await
            .map_err(|err| VerifierError::Malformed(format!("token response: {err}")))?;

        let token = parsed.access_token.clone();
        *cached = Some(CachedAccessToken {
            token: parsed.access_token,
            expires_at: now + Duration::seconds(parsed.expires_in),
        });

        Ok(token)
    }

    fn subscription_url(&self, purchase_token: &str, product_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.api_base_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("android publisher base url cannot be a base"))?
            .pop_if_empty()
            .extend([
                "androidpublisher",
                "v3",
                "applications",
                self.package_name.as_str(),
                "purchases",
                "subscriptions",
                product_id,
                "tokens",
                purchase_token,
            ]);
        Ok(url)
    }
}

#[async_trait]
impl PurchaseVerifier for GooglePlayVerifier {
    async fn verify(
        &self,
        purchase_token: &str,
        product_id: &str,
    ) -> Result<VerificationOutcome, VerifierError> {
        let url = self
            .subscription_url(purchase_token, product_id)
            .map_err(VerifierError::Unavailable)?;
        let access_token = self.access_token().await?;

        let resp = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .send()
            .await
            .map_err(|err| VerifierError::Unavailable(err.into()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| VerifierError::Unavailable(err.into()))?;

        if !status.is_success() {
            return Err(classify_failure(status, &body, product_id));
        }

        let raw: serde_json::Value = serde_json::from_str(&body)
            .map_err(|err| VerifierError::Malformed(format!("subscription purchase: {err}")))?;

        outcome_from_purchase(raw, Utc::now())
    }
}

fn classify_failure(status: StatusCode, body: &str, product_id: &str) -> VerifierError {
    let details = serde_json::from_str::<GoogleErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);
    let message = details
        .as_ref()
        .and_then(|d| d.message.clone())
        .unwrap_or_else(|| format!("store returned {status}"));

    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::GONE => {
            warn!(
                status = %status,
                product_id,
                google_status = ?details.as_ref().and_then(|d| d.status.clone()),
                "google_play: purchase rejected"
            );
            VerifierError::Rejected(message)
        }
        _ => {
            error!(status = %status, product_id, "google_play: verification request failed");
            VerifierError::Unavailable(anyhow!("{message}"))
        }
    }
}

/// Active means paid (or free-trial) and not yet expired at `now`.
fn outcome_from_purchase(
    raw: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<VerificationOutcome, VerifierError> {
    let purchase: SubscriptionPurchase = serde_json::from_value(raw.clone())
        .map_err(|err| VerifierError::Malformed(format!("subscription purchase: {err}")))?;

    let expires_at = match purchase.expiry_time_millis.as_deref() {
        Some(millis) => {
            let millis = millis.parse::<i64>().map_err(|_| {
                VerifierError::Malformed(format!("expiryTimeMillis is not a number: {millis}"))
            })?;
            Utc.timestamp_millis_opt(millis).single()
        }
        None => None,
    };

    let pending = purchase.payment_state == Some(PAYMENT_STATE_PENDING);
    let is_active = !pending && expires_at.is_some_and(|expires_at| expires_at > now);

    Ok(VerificationOutcome {
        is_active,
        expires_at,
        order_id: purchase.order_id,
        auto_renewing: purchase.auto_renewing,
        payment_state: purchase.payment_state,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn future_expiry_is_active() {
        let raw = json!({
            "expiryTimeMillis": "1999999999000",
            "orderId": "o1",
            "autoRenewing": true,
            "paymentState": 1
        });

        let outcome = outcome_from_purchase(raw.clone(), Utc::now()).unwrap();

        assert!(outcome.is_active);
        assert_eq!(outcome.order_id.as_deref(), Some("o1"));
        assert!(outcome.auto_renewing);
        assert_eq!(outcome.expires_at.unwrap().timestamp_millis(), 1_999_999_999_000);
        assert_eq!(outcome.raw, raw);
    }

    #[test]
    fn past_expiry_is_inactive() {
        let raw = json!({ "expiryTimeMillis": "1000", "orderId": "o1" });

        let outcome = outcome_from_purchase(raw, Utc::now()).unwrap();

        assert!(!outcome.is_active);
        assert!(!outcome.auto_renewing);
    }

    #[test]
    fn pending_payment_is_inactive() {
        let raw = json!({ "expiryTimeMillis": "1999999999000", "paymentState": 0 });

        let outcome = outcome_from_purchase(raw, Utc::now()).unwrap();

        assert!(!outcome.is_active);
    }

    #[test]
    fn garbage_expiry_is_malformed() {
        let raw = json!({ "expiryTimeMillis": "soon" });

        let result = outcome_from_purchase(raw, Utc::now());

        assert!(matches!(result, Err(VerifierError::Malformed(_))));
    }

    #[test]
    fn not_found_is_a_rejection() {
        let body = r#"{"error":{"code":404,"message":"The purchase token was not found.","status":"NOT_FOUND"}}"#;

        let err = classify_failure(StatusCode::NOT_FOUND, body, "p1");

        match err {
            VerifierError::Rejected(message) => {
                assert_eq!(message, "The purchase token was not found.")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    fn verifier(http: reqwest::Client, api_base_url: &str) -> GooglePlayVerifier {
        GooglePlayVerifier {
            http,
            api_base_url: api_base_url.to_string(),
            package_name: "com.example.app".to_string(),
            client_email: "svc@example.iam.gserviceaccount.com".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            signing_key: EncodingKey::from_secret(b"unused"),
            access_token: Mutex::new(None),
        }
    }

    #[test]
    fn subscription_url_escapes_path_segments() {
        let verifier = verifier(reqwest::Client::new(), ANDROID_PUBLISHER_BASE_URL);

        let url = verifier.subscription_url("abc/def", "premium_monthly").unwrap();

        assert_eq!(
            url.as_str(),
            "https://androidpublisher.googleapis.com/androidpublisher/v3/applications/com.example.app/purchases/subscriptions/premium_monthly/tokens/abc%2Fdef"
        );
    }

    #[tokio::test]
    async fn stalled_store_call_times_out_as_unavailable() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/", listener.local_addr().unwrap());
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_millis(100))
            .build()
            .unwrap();
        let verifier = verifier(http, &base_url);
        *verifier.access_token.lock().await = Some(CachedAccessToken {
            token: "cached".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        });

        let started = std::time::Instant::now();
        let result = verifier.verify("tok", "premium_monthly").await;

        assert!(matches!(result, Err(VerifierError::Unavailable(_))));
        assert!(started.elapsed() < StdDuration::from_secs(5));
        drop(listener);
    }

    #[test]
    fn server_error_is_unavailable() {
        let err = classify_failure(StatusCode::SERVICE_UNAVAILABLE, "", "p1");

        assert!(matches!(err, VerifierError::Unavailable(_)));
    }
}
