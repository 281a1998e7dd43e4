use std::fmt;

use crates::domain::value_objects::entitlements::VerificationResultDto;

/// Entitlement state as the UI renders it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiStatus {
    Trial,
    Active,
    Blocked,
    /// Another resolution is in flight; re-render and ask again.
    Loading,
    /// Paid before, not entitled now.
    Expired,
}

impl UiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UiStatus::Trial => "trial",
            UiStatus::Active => "active",
            UiStatus::Blocked => "blocked",
            UiStatus::Loading => "loading",
            UiStatus::Expired => "expired",
        }
    }

    pub fn has_access(&self) -> bool {
        matches!(self, UiStatus::Trial | UiStatus::Active)
    }

    pub fn from_verification(result: &VerificationResultDto) -> Self {
        if result.entitlement_active {
            UiStatus::Active
        } else if result.trial_active {
            UiStatus::Trial
        } else if result.has_purchase_history {
            UiStatus::Expired
        } else {
            UiStatus::Blocked
        }
    }
}

impl fmt::Display for UiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crates::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;

    fn result(entitlement_active: bool, trial_active: bool, history: bool) -> VerificationResultDto {
        VerificationResultDto {
            user_id: "u1".to_string(),
            status: SubscriptionStatus::Blocked,
            entitlement_active,
            expires_date: None,
            product_id: None,
            has_used_trial: trial_active,
            trial_active,
            trial_ends_at: None,
            has_purchase_history: history,
            server_time: Utc::now(),
            source: "server".to_string(),
        }
    }

    #[test]
    fn entitlement_wins_over_everything() {
        assert_eq!(UiStatus::from_verification(&result(true, true, true)), UiStatus::Active);
    }

    #[test]
    fn lapsed_payer_is_expired_not_blocked() {
        assert_eq!(UiStatus::from_verification(&result(false, false, true)), UiStatus::Expired);
        assert_eq!(UiStatus::from_verification(&result(false, false, false)), UiStatus::Blocked);
        assert_eq!(UiStatus::from_verification(&result(false, true, false)), UiStatus::Trial);
    }
}
