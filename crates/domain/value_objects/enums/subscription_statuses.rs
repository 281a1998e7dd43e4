use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Server-side entitlement state stored in `user_subscriptions.status`.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    Blocked,
    Trial,
    Subscribed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Blocked => "blocked",
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Subscribed => "subscribed",
        }
    }

    /// Unknown values read from storage fall back to `Blocked`.
    pub fn from_str(value: &str) -> Self {
        match value {
            "trial" => SubscriptionStatus::Trial,
            "subscribed" => SubscriptionStatus::Subscribed,
            _ => SubscriptionStatus::Blocked,
        }
    }
}

impl Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_storage_value_reads_as_blocked() {
        assert_eq!(SubscriptionStatus::from_str("active"), SubscriptionStatus::Blocked);
        assert_eq!(SubscriptionStatus::from_str("subscribed"), SubscriptionStatus::Subscribed);
    }

    #[test]
    fn wire_format_is_lowercase() {
        let json = serde_json::to_string(&SubscriptionStatus::Trial).unwrap();
        assert_eq!(json, "\"trial\"");
        let parsed: SubscriptionStatus = serde_json::from_str("\"subscribed\"").unwrap();
        assert_eq!(parsed, SubscriptionStatus::Subscribed);
    }
}
