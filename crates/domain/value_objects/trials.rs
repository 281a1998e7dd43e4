use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_TRIAL_DURATION_DAYS: i64 = 7;

/// Trial length evaluated against server time only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialPolicy {
    duration: Duration,
}

impl TrialPolicy {
    pub fn from_days(days: i64) -> Self {
        Self {
            duration: Duration::days(days),
        }
    }

    pub fn ends_at(&self, started_at: DateTime<Utc>) -> DateTime<Utc> {
        started_at + self.duration
    }

    pub fn is_active(&self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now < self.ends_at(started_at)
    }
}

impl Default for TrialPolicy {
    fn default() -> Self {
        Self::from_days(DEFAULT_TRIAL_DURATION_DAYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_ends_after_configured_days() {
        let policy = TrialPolicy::from_days(3);
        let started = Utc::now() - Duration::days(2);

        assert!(policy.is_active(started, Utc::now()));
        assert!(!policy.is_active(started, started + Duration::days(3)));
        assert_eq!(policy.ends_at(started), started + Duration::days(3));
    }
}
