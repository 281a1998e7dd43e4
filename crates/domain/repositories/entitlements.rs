use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::{
    entities::{
        purchase_verifications::InsertPurchaseVerificationEntity,
        subscriptions::SubscriptionEntity,
        trials::{InsertTrialEntity, TrialEntity},
    },
    value_objects::subscription_patches::{
        SubscriptionActivation, SubscriptionSyncPatch, TrialStartOutcome,
    },
};

/// Durable source of truth for trial and subscription state.
///
/// Every write is keyed on `user_id` and is a single upsert (or one transaction
/// of upserts), so concurrent writers for one user never create a second row.
#[automock]
#[async_trait]
pub trait EntitlementRepository: Send + Sync {
    async fn find_trial(&self, user_id: &str) -> Result<Option<TrialEntity>>;

    async fn find_subscription(&self, user_id: &str) -> Result<Option<SubscriptionEntity>>;

    /// Inserts the trial row and moves the subscription row to `trial` in one
    /// transaction. An existing trial row is returned untouched as `AlreadyUsed`.
    async fn start_trial(&self, insert_trial_entity: InsertTrialEntity) -> Result<TrialStartOutcome>;

    async fn sync_subscription(
        &self,
        user_id: &str,
        patch: SubscriptionSyncPatch,
    ) -> Result<SubscriptionEntity>;

    /// Appends the audit row and, when `activation` is present, upserts the
    /// subscription to `subscribed` in the same transaction.
    async fn record_verification(
        &self,
        audit: InsertPurchaseVerificationEntity,
        activation: Option<SubscriptionActivation>,
    ) -> Result<()>;

    /// Ops-only wipe of the trial and subscription rows. Audit rows are kept.
    async fn reset_user(&self, user_id: &str) -> Result<()>;
}
