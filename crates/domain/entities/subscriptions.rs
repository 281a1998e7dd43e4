use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::{
        enums::subscription_statuses::SubscriptionStatus,
        subscription_patches::{SubscriptionActivation, SubscriptionSyncPatch},
    },
    infra::db::postgres::schema::user_subscriptions,
};

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = user_subscriptions)]
pub struct SubscriptionEntity {
    pub id: Uuid,
    pub user_id: String,
    pub status: String,
    pub trial_started_at: Option<DateTime<Utc>>,
    /// First ever activation. Set once, never moved.
    pub subscription_started_at: Option<DateTime<Utc>>,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub product_id: Option<String>,
    pub purchase_token: Option<String>,
    pub order_id: Option<String>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionEntity {
    /// Row state of a user the store has never seen.
    pub fn blank(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            status: SubscriptionStatus::Blocked.to_string(),
            trial_started_at: None,
            subscription_started_at: None,
            subscription_expires_at: None,
            product_id: None,
            purchase_token: None,
            order_id: None,
            last_verified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_str(&self.status)
    }

    pub fn has_purchase_history(&self) -> bool {
        self.subscription_started_at.is_some()
    }

    // The three `apply_*` methods are the merge rules. The Postgres repository
    // expresses the same rules in its ON CONFLICT clauses.

    pub fn apply_trial_start(&mut self, trial_started_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = SubscriptionStatus::Trial.to_string();
        self.trial_started_at = Some(trial_started_at);
        self.updated_at = now;
    }

    pub fn apply_sync(&mut self, patch: &SubscriptionSyncPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status() {
            self.status = status.to_string();
        }
        if let Some(product_id) = &patch.product_id {
            self.product_id = Some(product_id.clone());
        }
        if let Some(expires_at) = patch.expires_at {
            self.subscription_expires_at = Some(expires_at);
        }
        if let Some(purchase_token) = &patch.purchase_token {
            self.purchase_token = Some(purchase_token.clone());
        }
        self.updated_at = now;
    }

    pub fn apply_activation(&mut self, activation: &SubscriptionActivation) {
        self.status = SubscriptionStatus::Subscribed.to_string();
        self.subscription_started_at = self
            .subscription_started_at
            .or(Some(activation.verified_at));
        self.subscription_expires_at = activation.expires_at;
        self.product_id = Some(activation.product_id.clone());
        self.purchase_token = Some(activation.purchase_token.clone());
        self.order_id = activation.order_id.clone();
        self.last_verified_at = Some(activation.verified_at);
        self.updated_at = activation.verified_at;
    }
}

/// Insert half of the trial-start upsert.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_subscriptions)]
pub struct TrialSubscriptionRow {
    pub id: Uuid,
    pub user_id: String,
    pub status: String,
    pub trial_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrialSubscriptionRow {
    pub fn new(user_id: &str, trial_started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            status: SubscriptionStatus::Trial.to_string(),
            trial_started_at: Some(trial_started_at),
            created_at: trial_started_at,
            updated_at: trial_started_at,
        }
    }
}

/// Insert half of the sync upsert. `None` fields fall back to column defaults.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_subscriptions)]
pub struct SyncSubscriptionRow {
    pub id: Uuid,
    pub user_id: String,
    pub status: Option<String>,
    pub product_id: Option<String>,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub purchase_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Update half of the sync upsert. Diesel skips `None` fields, so absent
/// values keep whatever the row already holds.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = user_subscriptions)]
pub struct SyncSubscriptionChangeset {
    pub status: Option<String>,
    pub product_id: Option<String>,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub purchase_token: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SyncSubscriptionRow {
    pub fn from_patch(user_id: &str, patch: &SubscriptionSyncPatch, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            status: patch.status().map(|status| status.to_string()),
            product_id: patch.product_id.clone(),
            subscription_expires_at: patch.expires_at,
            purchase_token: patch.purchase_token.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn changeset(&self) -> SyncSubscriptionChangeset {
        SyncSubscriptionChangeset {
            status: self.status.clone(),
            product_id: self.product_id.clone(),
            subscription_expires_at: self.subscription_expires_at,
            purchase_token: self.purchase_token.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Insert half of the verified-activation upsert.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_subscriptions)]
pub struct ActivatedSubscriptionRow {
    pub id: Uuid,
    pub user_id: String,
    pub status: String,
    pub subscription_started_at: Option<DateTime<Utc>>,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub product_id: Option<String>,
    pub purchase_token: Option<String>,
    pub order_id: Option<String>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivatedSubscriptionRow {
    pub fn from_activation(user_id: &str, activation: &SubscriptionActivation) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            status: SubscriptionStatus::Subscribed.to_string(),
            subscription_started_at: Some(activation.verified_at),
            subscription_expires_at: activation.expires_at,
            product_id: Some(activation.product_id.clone()),
            purchase_token: Some(activation.purchase_token.clone()),
            order_id: activation.order_id.clone(),
            last_verified_at: Some(activation.verified_at),
            created_at: activation.verified_at,
            updated_at: activation.verified_at,
        }
    }
}
