use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::purchase_verifications;

/// Append-only audit row for a verify-purchase call. Never read for live decisions.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = purchase_verifications)]
pub struct PurchaseVerificationEntity {
    pub id: Uuid,
    pub user_id: String,
    pub purchase_token: String,
    pub order_id: Option<String>,
    pub product_id: String,
    pub raw_response: serde_json::Value,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = purchase_verifications)]
pub struct InsertPurchaseVerificationEntity {
    pub id: Uuid,
    pub user_id: String,
    pub purchase_token: String,
    pub order_id: Option<String>,
    pub product_id: String,
    pub raw_response: serde_json::Value,
    pub verified_at: DateTime<Utc>,
}

impl From<InsertPurchaseVerificationEntity> for PurchaseVerificationEntity {
    fn from(value: InsertPurchaseVerificationEntity) -> Self {
        Self {
            id: value.id,
            user_id: value.user_id,
            purchase_token: value.purchase_token,
            order_id: value.order_id,
            product_id: value.product_id,
            raw_response: value.raw_response,
            verified_at: value.verified_at,
        }
    }
}
