use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::user_trials;

/// Permanent record that a user consumed their trial. Never updated or deleted
/// outside of the ops reset path.
#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = user_trials)]
pub struct TrialEntity {
    pub id: Uuid,
    pub user_id: String,
    pub trial_started_at: DateTime<Utc>,
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_trials)]
pub struct InsertTrialEntity {
    pub id: Uuid,
    pub user_id: String,
    pub trial_started_at: DateTime<Utc>,
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InsertTrialEntity {
    pub fn new(user_id: &str, device_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            trial_started_at: now,
            device_id,
            created_at: now,
        }
    }
}

impl From<InsertTrialEntity> for TrialEntity {
    fn from(value: InsertTrialEntity) -> Self {
        Self {
            id: value.id,
            user_id: value.user_id,
            trial_started_at: value.trial_started_at,
            device_id: value.device_id,
            created_at: value.created_at,
        }
    }
}
