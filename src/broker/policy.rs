use chrono::Duration;

use super::models::{PlanTier, SubscriptionVariant};

/// Days a free-tier user waits between reader changes.
pub const FREE_TIER_COOLDOWN_DAYS: i64 = 30;

/// key: broker-tier-policy -> all access posture per tier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllAccessPolicy {
    Denied,
    OptIn,
    Forced,
}

/// key: broker-tier-policy -> resolved rules for one tier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TierPolicy {
    pub default_variant: SubscriptionVariant,
    pub cooldown: Option<Duration>,
    pub all_access: AllAccessPolicy,
}

impl TierPolicy {
    pub fn for_tier(tier: PlanTier) -> Self {
        Self {
            default_variant: default_variant(tier),
            cooldown: cooldown_duration(tier),
            all_access: all_access(tier),
        }
    }

    pub fn allows_all_access(&self) -> bool {
        !matches!(self.all_access, AllAccessPolicy::Denied)
    }
}

// Guest shares the free-tier rules.
pub fn default_variant(tier: PlanTier) -> SubscriptionVariant {
    match tier {
        PlanTier::Guest | PlanTier::Free => SubscriptionVariant::Favorite,
        PlanTier::Premium => SubscriptionVariant::Individual,
        PlanTier::Professional => SubscriptionVariant::AllAccess,
    }
}

pub fn cooldown_duration(tier: PlanTier) -> Option<Duration> {
    match tier {
        PlanTier::Guest | PlanTier::Free => Some(Duration::days(FREE_TIER_COOLDOWN_DAYS)),
        PlanTier::Premium | PlanTier::Professional => None,
    }
}

pub fn all_access(tier: PlanTier) -> AllAccessPolicy {
    match tier {
        PlanTier::Guest | PlanTier::Free => AllAccessPolicy::Denied,
        PlanTier::Premium => AllAccessPolicy::OptIn,
        PlanTier::Professional => AllAccessPolicy::Forced,
    }
}
