use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{ReaderProfile, RevenueMetric, Subscription, UserProfile};

/// key: broker-identity-directory -> user lookups owned by the identity service
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find_user(&self, user_id: i32) -> sqlx::Result<Option<UserProfile>>;
}

/// key: broker-reader-directory -> reader lookups owned by admin tooling
#[async_trait]
pub trait ReaderDirectory: Send + Sync {
    async fn find_reader(&self, reader_id: i32) -> sqlx::Result<Option<ReaderProfile>>;
    async fn list_active_readers(&self) -> sqlx::Result<Vec<ReaderProfile>>;
}

/// key: broker-subscription-store -> versioned subscription rows
///
/// Writes are conditional. `insert_subscription` returns `false` when the user already
/// holds an active subscription and `update_subscription` returns `false` when the
/// stored `version` no longer equals `expected_version`. A successful update stores
/// `expected_version + 1`.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn active_subscription(&self, user_id: i32) -> sqlx::Result<Option<Subscription>>;
    async fn insert_subscription(&self, subscription: &Subscription) -> sqlx::Result<bool>;
    async fn update_subscription(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> sqlx::Result<bool>;
}

/// key: broker-revenue-ledger -> append-only metric rows
#[async_trait]
pub trait RevenueLedger: Send + Sync {
    async fn append_metric(&self, metric: &RevenueMetric) -> sqlx::Result<()>;
    /// Rows with `calculated_at` inside `[start, end]`, optionally scoped to one reader.
    async fn metrics_between(
        &self,
        reader_id: Option<i32>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> sqlx::Result<Vec<RevenueMetric>>;
}
