use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use thiserror::Error;

/// What the store reported about one purchase token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub order_id: Option<String>,
    pub auto_renewing: bool,
    pub payment_state: Option<i32>,
    /// Store response as received, kept for the audit log.
    pub raw: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum VerifierError {
    /// The store answered and refused the token or product.
    #[error("purchase rejected by store: {0}")]
    Rejected(String),
    #[error("store verification unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
    #[error("unexpected store response: {0}")]
    Malformed(String),
}

/// Authoritative purchase check against the app store.
#[automock]
#[async_trait]
pub trait PurchaseVerifier: Send + Sync {
    async fn verify(
        &self,
        purchase_token: &str,
        product_id: &str,
    ) -> Result<VerificationOutcome, VerifierError>;
}
