//! JSON bodies of the reconciliation protocol, shared by the backend and the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;

pub const VERIFICATION_SOURCE_SERVER: &str = "server";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimeDto {
    pub server_time: DateTime<Utc>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialStatusDto {
    pub user_id: String,
    pub has_used_trial: bool,
    pub trial_started_at: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub trial_active: bool,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTrialRequest {
    pub user_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialStartedDto {
    pub user_id: String,
    pub trial_started_at: DateTime<Utc>,
    pub trial_ends_at: DateTime<Utc>,
    pub server_time: DateTime<Utc>,
}

/// Read-only projection of both tables for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSnapshotDto {
    pub user_id: String,
    pub status: SubscriptionStatus,
    pub has_used_trial: bool,
    pub trial_started_at: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub trial_active: bool,
    pub subscription_started_at: Option<DateTime<Utc>>,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub product_id: Option<String>,
    pub order_id: Option<String>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub has_purchase_history: bool,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSubscriptionRequest {
    pub user_id: String,
    #[serde(default)]
    pub status: Option<SubscriptionStatus>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub purchase_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAckDto {
    pub user_id: String,
    /// Status as stored after the merge, not as reported.
    pub status: SubscriptionStatus,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySubscriptionRequest {
    pub user_id: String,
}

/// Canonical answer the client trusts for UI decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResultDto {
    pub user_id: String,
    pub status: SubscriptionStatus,
    pub entitlement_active: bool,
    pub expires_date: Option<DateTime<Utc>>,
    pub product_id: Option<String>,
    pub has_used_trial: bool,
    pub trial_active: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub has_purchase_history: bool,
    pub server_time: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPurchaseRequest {
    pub user_id: String,
    pub purchase_token: String,
    pub product_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPurchaseDto {
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub auto_renewing: bool,
    pub order_id: Option<String>,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetDto {
    pub user_id: String,
    pub reset: bool,
    pub server_time: DateTime<Utc>,
}

/// Error body of every non-2xx protocol response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBodyDto {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_used_trial: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_started_at: Option<DateTime<Utc>>,
}
