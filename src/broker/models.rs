use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BrokerError, BrokerResult};

/// key: broker-plan-tier -> ranked guest < free < premium < professional
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Guest,
    Free,
    Premium,
    Professional,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Guest => "guest",
            PlanTier::Free => "free",
            PlanTier::Premium => "premium",
            PlanTier::Professional => "professional",
        }
    }

    /// Unknown values collapse to the least privileged tier.
    pub fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => PlanTier::Free,
            "premium" => PlanTier::Premium,
            "professional" => PlanTier::Professional,
            _ => PlanTier::Guest,
        }
    }
}

/// key: broker-subscription-variant -> reader selection mode
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionVariant {
    Favorite,
    Individual,
    AllAccess,
}

impl SubscriptionVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionVariant::Favorite => "favorite",
            SubscriptionVariant::Individual => "individual",
            SubscriptionVariant::AllAccess => "all_access",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "favorite" => Some(SubscriptionVariant::Favorite),
            "individual" => Some(SubscriptionVariant::Individual),
            "all_access" => Some(SubscriptionVariant::AllAccess),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "active" => SubscriptionStatus::Active,
            "cancelled" => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Expired,
        }
    }
}

/// key: broker-user-profile -> identity collaborator projection
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: i32,
    pub plan_tier: PlanTier,
}

/// key: broker-reader-profile -> reader collaborator projection
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReaderProfile {
    pub id: i32,
    pub is_active: bool,
    pub commission_percentage: CommissionRate,
}

/// Commission percentage as accepted from admin tooling: two decimals, within [0, 100].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct CommissionRate(Decimal);

impl CommissionRate {
    pub fn new(raw: Decimal) -> BrokerResult<Self> {
        let rounded = round_cents(raw);
        if rounded < Decimal::ZERO || rounded > dec!(100) {
            return Err(BrokerError::InvalidArgument(format!(
                "commission percentage {raw} outside [0, 100]"
            )));
        }
        Ok(Self(rounded))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for CommissionRate {
    type Error = BrokerError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        CommissionRate::new(value)
    }
}

impl From<CommissionRate> for Decimal {
    fn from(rate: CommissionRate) -> Self {
        rate.0
    }
}

/// key: broker-subscription-model -> one active row per user
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: i32,
    pub reader_id: Option<i32>,
    pub variant: SubscriptionVariant,
    pub status: SubscriptionStatus,
    pub started_at: DateTime<Utc>,
    pub can_change_at: Option<DateTime<Utc>>,
    pub change_count: i32,
    pub last_reader_id: Option<i32>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Inclusive at the boundary: a change is allowed once `now` reaches `can_change_at`.
    pub fn can_change(&self, now: DateTime<Utc>) -> bool {
        match self.can_change_at {
            None => true,
            Some(at) => at <= now,
        }
    }
}

/// key: broker-subscription-info -> read-only projection
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub subscription_id: Uuid,
    pub user_id: i32,
    pub reader_id: Option<i32>,
    pub variant: SubscriptionVariant,
    pub status: SubscriptionStatus,
    pub started_at: DateTime<Utc>,
    pub can_change_at: Option<DateTime<Utc>>,
    pub change_count: i32,
    pub can_change: bool,
    pub days_until_change: i64,
}

/// key: broker-revenue-split -> reader/platform division of one gross amount
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevenueSplit {
    pub reader_share: Decimal,
    pub platform_fee: Decimal,
    pub gross_amount: Decimal,
    pub commission_percentage: Decimal,
}

/// key: broker-revenue-metric -> immutable audit fact
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevenueMetric {
    pub id: Uuid,
    pub reader_id: i32,
    pub user_id: i32,
    pub work_unit_id: Option<Uuid>,
    pub variant: SubscriptionVariant,
    pub reader_share: Decimal,
    pub platform_fee: Decimal,
    pub gross_amount: Decimal,
    pub commission_percentage: Decimal,
    pub calculated_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Half away from zero at two decimals.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
