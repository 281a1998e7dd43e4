use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::{
    entities::{
        purchase_verifications::{InsertPurchaseVerificationEntity, PurchaseVerificationEntity},
        subscriptions::SubscriptionEntity,
        trials::{InsertTrialEntity, TrialEntity},
    },
    repositories::entitlements::EntitlementRepository,
    value_objects::subscription_patches::{
        SubscriptionActivation, SubscriptionSyncPatch, TrialStartOutcome,
    },
};

#[derive(Default)]
struct Tables {
    trials: HashMap<String, TrialEntity>,
    subscriptions: HashMap<String, SubscriptionEntity>,
    verifications: Vec<PurchaseVerificationEntity>,
}

/// Process-local store with the same merge rules as the Postgres repository.
/// One lock guards all three tables, which gives each write the atomicity of
/// the SQL transaction it mirrors.
#[derive(Default)]
pub struct EntitlementInMemory {
    tables: Mutex<Tables>,
}

impl EntitlementInMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn verification_log(&self, user_id: &str) -> Vec<PurchaseVerificationEntity> {
        let tables = self.tables.lock().await;
        tables
            .verifications
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn trial_count(&self, user_id: &str) -> usize {
        let tables = self.tables.lock().await;
        usize::from(tables.trials.contains_key(user_id))
    }
}

#[async_trait]
impl EntitlementRepository for EntitlementInMemory {
    async fn find_trial(&self, user_id: &str) -> Result<Option<TrialEntity>> {
        let tables = self.tables.lock().await;
        Ok(tables.trials.get(user_id).cloned())
    }

    async fn find_subscription(&self, user_id: &str) -> Result<Option<SubscriptionEntity>> {
        let tables = self.tables.lock().await;
        Ok(tables.subscriptions.get(user_id).cloned())
    }

    async fn start_trial(&self, insert_trial_entity: InsertTrialEntity) -> Result<TrialStartOutcome> {
        let mut tables = self.tables.lock().await;

        if let Some(existing) = tables.trials.get(&insert_trial_entity.user_id) {
            return Ok(TrialStartOutcome::AlreadyUsed(existing.clone()));
        }

        let trial = TrialEntity::from(insert_trial_entity);
        let now = trial.trial_started_at;
        tables
            .subscriptions
            .entry(trial.user_id.clone())
            .or_insert_with(|| SubscriptionEntity::blank(&trial.user_id, now))
            .apply_trial_start(trial.trial_started_at, now);
        tables.trials.insert(trial.user_id.clone(), trial.clone());

        Ok(TrialStartOutcome::Started(trial))
    }

    async fn sync_subscription(
        &self,
        user_id: &str,
        patch: SubscriptionSyncPatch,
    ) -> Result<SubscriptionEntity> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let subscription = tables
            .subscriptions
            .entry(user_id.to_string())
            .or_insert_with(|| SubscriptionEntity::blank(user_id, now));
        subscription.apply_sync(&patch, now);

        Ok(subscription.clone())
    }

    async fn record_verification(
        &self,
        audit: InsertPurchaseVerificationEntity,
        activation: Option<SubscriptionActivation>,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;

        if let Some(activation) = activation {
            tables
                .subscriptions
                .entry(audit.user_id.clone())
                .or_insert_with(|| SubscriptionEntity::blank(&audit.user_id, activation.verified_at))
                .apply_activation(&activation);
        }
        tables
            .verifications
            .push(PurchaseVerificationEntity::from(audit));

        Ok(())
    }

    async fn reset_user(&self, user_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.trials.remove(user_id);
        tables.subscriptions.remove(user_id);
        Ok(())
    }
}
