use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diesel::{
    Connection, OptionalExtension, RunQueryDsl, delete, insert_into, prelude::*,
    sql_types::{Nullable, Timestamptz},
    upsert::excluded,
};
use std::sync::Arc;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::{PgPoolSquad, with_connection},
        schema::{purchase_verifications, user_subscriptions, user_trials},
    },
};
use domain::{
    entities::{
        purchase_verifications::InsertPurchaseVerificationEntity,
        subscriptions::{
            ActivatedSubscriptionRow, SubscriptionEntity, SyncSubscriptionRow,
            TrialSubscriptionRow,
        },
        trials::{InsertTrialEntity, TrialEntity},
    },
    repositories::entitlements::EntitlementRepository,
    value_objects::subscription_patches::{
        SubscriptionActivation, SubscriptionSyncPatch, TrialStartOutcome,
    },
};

diesel::define_sql_function! {
    fn coalesce(x: Nullable<Timestamptz>, y: Nullable<Timestamptz>) -> Nullable<Timestamptz>;
}

pub struct EntitlementPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl EntitlementPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl EntitlementRepository for EntitlementPostgres {
    async fn find_trial(&self, user_id: &str) -> Result<Option<TrialEntity>> {
        let user_id = user_id.to_string();

        with_connection(&self.db_pool, move |conn| {
            let trial = user_trials::table
                .filter(user_trials::user_id.eq(&user_id))
                .select(TrialEntity::as_select())
                .first::<TrialEntity>(conn)
                .optional()?;
            Ok(trial)
        })
        .await
    }

    async fn find_subscription(&self, user_id: &str) -> Result<Option<SubscriptionEntity>> {
        let user_id = user_id.to_string();

        with_connection(&self.db_pool, move |conn| {
            let subscription = user_subscriptions::table
                .filter(user_subscriptions::user_id.eq(&user_id))
                .select(SubscriptionEntity::as_select())
                .first::<SubscriptionEntity>(conn)
                .optional()?;
            Ok(subscription)
        })
        .await
    }

    async fn start_trial(&self, insert_trial_entity: InsertTrialEntity) -> Result<TrialStartOutcome> {
        with_connection(&self.db_pool, move |conn| {
            conn.transaction::<TrialStartOutcome, anyhow::Error, _>(|tx| {
                let inserted = insert_into(user_trials::table)
                    .values(&insert_trial_entity)
                    .on_conflict(user_trials::user_id)
                    .do_nothing()
                    .returning(TrialEntity::as_returning())
                    .get_result::<TrialEntity>(tx)
                    .optional()?;

                let Some(trial) = inserted else {
                    let existing = user_trials::table
                        .filter(user_trials::user_id.eq(&insert_trial_entity.user_id))
                        .select(TrialEntity::as_select())
                        .first::<TrialEntity>(tx)?;
                    return Ok(TrialStartOutcome::AlreadyUsed(existing));
                };

                let subscription_row =
                    TrialSubscriptionRow::new(&trial.user_id, trial.trial_started_at);

                insert_into(user_subscriptions::table)
                    .values(&subscription_row)
                    .on_conflict(user_subscriptions::user_id)
                    .do_update()
                    .set((
                        user_subscriptions::status.eq(excluded(user_subscriptions::status)),
                        user_subscriptions::trial_started_at
                            .eq(excluded(user_subscriptions::trial_started_at)),
                        user_subscriptions::updated_at.eq(excluded(user_subscriptions::updated_at)),
                    ))
                    .execute(tx)?;

                Ok(TrialStartOutcome::Started(trial))
            })
        })
        .await
    }

    async fn sync_subscription(
        &self,
        user_id: &str,
        patch: SubscriptionSyncPatch,
    ) -> Result<SubscriptionEntity> {
        let row = SyncSubscriptionRow::from_patch(user_id, &patch, Utc::now());

        with_connection(&self.db_pool, move |conn| {
            let changeset = row.changeset();

            let subscription = insert_into(user_subscriptions::table)
                .values(&row)
                .on_conflict(user_subscriptions::user_id)
                .do_update()
                .set(&changeset)
                .returning(SubscriptionEntity::as_returning())
                .get_result::<SubscriptionEntity>(conn)?;

            Ok(subscription)
        })
        .await
    }

    async fn record_verification(
        &self,
        audit: InsertPurchaseVerificationEntity,
        activation: Option<SubscriptionActivation>,
    ) -> Result<()> {
        with_connection(&self.db_pool, move |conn| {
            conn.transaction::<(), anyhow::Error, _>(|tx| {
                insert_into(purchase_verifications::table)
                    .values(&audit)
                    .execute(tx)?;

                let Some(activation) = activation else {
                    return Ok(());
                };

                let row = ActivatedSubscriptionRow::from_activation(&audit.user_id, &activation);

                insert_into(user_subscriptions::table)
                    .values(&row)
                    .on_conflict(user_subscriptions::user_id)
                    .do_update()
                    .set((
                        user_subscriptions::status.eq(excluded(user_subscriptions::status)),
                        // Keep the first activation if one is already stored.
                        user_subscriptions::subscription_started_at.eq(coalesce(
                            user_subscriptions::subscription_started_at,
                            excluded(user_subscriptions::subscription_started_at),
                        )),
                        user_subscriptions::subscription_expires_at
                            .eq(excluded(user_subscriptions::subscription_expires_at)),
                        user_subscriptions::product_id.eq(excluded(user_subscriptions::product_id)),
                        user_subscriptions::purchase_token
                            .eq(excluded(user_subscriptions::purchase_token)),
                        user_subscriptions::order_id.eq(excluded(user_subscriptions::order_id)),
                        user_subscriptions::last_verified_at
                            .eq(excluded(user_subscriptions::last_verified_at)),
                        user_subscriptions::updated_at.eq(excluded(user_subscriptions::updated_at)),
                    ))
                    .execute(tx)?;

                Ok(())
            })
        })
        .await
    }

    async fn reset_user(&self, user_id: &str) -> Result<()> {
        let user_id = user_id.to_string();

        with_connection(&self.db_pool, move |conn| {
            conn.transaction::<(), anyhow::Error, _>(|tx| {
                delete(user_trials::table.filter(user_trials::user_id.eq(&user_id))).execute(tx)?;
                delete(user_subscriptions::table.filter(user_subscriptions::user_id.eq(&user_id)))
                    .execute(tx)?;
                Ok(())
            })
        })
        .await
    }
}
