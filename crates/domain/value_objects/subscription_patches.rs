use chrono::{DateTime, Utc};

use crate::domain::{
    entities::trials::TrialEntity, value_objects::enums::subscription_statuses::SubscriptionStatus,
};

/// Partial update reported by a client through `sync`.
///
/// Each `Some` field overwrites the stored value and each `None` keeps it. The
/// only status this patch can carry is a demotion to `blocked`: `trial` is written
/// by trial start alone and `subscribed` by a verified purchase alone, so a
/// client-asserted upgrade is kept aside in `ignored_status` and never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSyncPatch {
    demote_to_blocked: bool,
    ignored_status: Option<SubscriptionStatus>,
    pub product_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub purchase_token: Option<String>,
}

impl SubscriptionSyncPatch {
    pub fn from_client_report(
        reported_status: Option<SubscriptionStatus>,
        product_id: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        purchase_token: Option<String>,
    ) -> Self {
        let (demote_to_blocked, ignored_status) = match reported_status {
            Some(SubscriptionStatus::Blocked) => (true, None),
            Some(other) => (false, Some(other)),
            None => (false, None),
        };

        Self {
            demote_to_blocked,
            ignored_status,
            product_id,
            expires_at,
            purchase_token,
        }
    }

    /// Status to write, if any. Always `None` or `Some(Blocked)`.
    pub fn status(&self) -> Option<SubscriptionStatus> {
        self.demote_to_blocked.then_some(SubscriptionStatus::Blocked)
    }

    pub fn ignored_status(&self) -> Option<SubscriptionStatus> {
        self.ignored_status
    }

    pub fn is_empty(&self) -> bool {
        !self.demote_to_blocked
            && self.product_id.is_none()
            && self.expires_at.is_none()
            && self.purchase_token.is_none()
    }
}

/// Authoritative activation produced by a successful, active purchase verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionActivation {
    pub product_id: String,
    pub purchase_token: String,
    pub order_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrialStartOutcome {
    Started(TrialEntity),
    /// A trial row already existed; carries the original, untouched row.
    AlreadyUsed(TrialEntity),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_cannot_report_itself_subscribed() {
        let patch = SubscriptionSyncPatch::from_client_report(
            Some(SubscriptionStatus::Subscribed),
            Some("premium_monthly".to_string()),
            None,
            None,
        );

        assert_eq!(patch.status(), None);
        assert_eq!(patch.ignored_status(), Some(SubscriptionStatus::Subscribed));
        assert_eq!(patch.product_id.as_deref(), Some("premium_monthly"));
    }

    #[test]
    fn trial_report_is_ignored_too() {
        let patch =
            SubscriptionSyncPatch::from_client_report(Some(SubscriptionStatus::Trial), None, None, None);

        assert_eq!(patch.status(), None);
        assert!(patch.is_empty());
    }

    #[test]
    fn blocked_report_is_a_demotion() {
        let patch =
            SubscriptionSyncPatch::from_client_report(Some(SubscriptionStatus::Blocked), None, None, None);

        assert_eq!(patch.status(), Some(SubscriptionStatus::Blocked));
        assert!(!patch.is_empty());
    }
}
