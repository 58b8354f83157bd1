use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::models::{
    CommissionRate, PlanTier, ReaderProfile, RevenueMetric, Subscription, SubscriptionStatus, UserProfile,
};
use super::store::{IdentityDirectory, ReaderDirectory, RevenueLedger, SubscriptionStore};

/// key: broker-memory-store -> process-local store for tests and `BROKER_STORE=memory`
///
/// Subscriptions are kept per user, history included, so the dashmap shard lock on the
/// user's entry serializes conditional writes the same way a row lock would.
#[derive(Default)]
pub struct MemoryBrokerStore {
    users: DashMap<i32, UserProfile>,
    readers: DashMap<i32, ReaderProfile>,
    subscriptions: DashMap<i32, Vec<Subscription>>,
    metrics: DashMap<Uuid, RevenueMetric>,
    subscription_writes: AtomicU64,
}

impl MemoryBrokerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_user(&self, user_id: i32, plan_tier: PlanTier) {
        self.users.insert(
            user_id,
            UserProfile {
                id: user_id,
                plan_tier,
            },
        );
    }

    pub fn put_reader(
        &self,
        reader_id: i32,
        is_active: bool,
        commission_percentage: CommissionRate,
    ) {
        self.readers.insert(
            reader_id,
            ReaderProfile {
                id: reader_id,
                is_active,
                commission_percentage,
            },
        );
    }

    pub fn set_reader_active(&self, reader_id: i32, is_active: bool) {
        if let Some(mut reader) = self.readers.get_mut(&reader_id) {
            reader.is_active = is_active;
        }
    }

    /// Replaces the user's active row (or adds one) without version checks.
    pub fn seed_subscription(&self, subscription: Subscription) {
        let mut history = self.subscriptions.entry(subscription.user_id).or_default();
        history.retain(|existing| existing.id != subscription.id && !existing.is_active());
        history.push(subscription);
    }

    pub fn subscription_history(&self, user_id: i32) -> Vec<Subscription> {
        self.subscriptions
            .get(&user_id)
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    pub fn subscription_writes(&self) -> u64 {
        self.subscription_writes.load(Ordering::SeqCst)
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }
}

#[async_trait]
impl IdentityDirectory for MemoryBrokerStore {
    async fn find_user(&self, user_id: i32) -> sqlx::Result<Option<UserProfile>> {
        Ok(self.users.get(&user_id).map(|user| user.clone()))
    }
}

#[async_trait]
impl ReaderDirectory for MemoryBrokerStore {
    async fn find_reader(&self, reader_id: i32) -> sqlx::Result<Option<ReaderProfile>> {
        Ok(self.readers.get(&reader_id).map(|reader| reader.clone()))
    }

    async fn list_active_readers(&self) -> sqlx::Result<Vec<ReaderProfile>> {
        let mut readers: Vec<ReaderProfile> = self
            .readers
            .iter()
            .filter(|reader| reader.is_active)
            .map(|reader| reader.clone())
            .collect();
        readers.sort_by_key(|reader| reader.id);
        Ok(readers)
    }
}

#[async_trait]
impl SubscriptionStore for MemoryBrokerStore {
    async fn active_subscription(&self, user_id: i32) -> sqlx::Result<Option<Subscription>> {
        Ok(self.subscriptions.get(&user_id).and_then(|history| {
            history
                .iter()
                .rev()
                .find(|subscription| subscription.status == SubscriptionStatus::Active)
                .cloned()
        }))
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> sqlx::Result<bool> {
        let mut history = self.subscriptions.entry(subscription.user_id).or_default();
        if subscription.is_active() && history.iter().any(Subscription::is_active) {
            return Ok(false);
        }
        history.push(subscription.clone());
        self.subscription_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn update_subscription(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> sqlx::Result<bool> {
        let Some(mut history) = self.subscriptions.get_mut(&subscription.user_id) else {
            return Ok(false);
        };
        let Some(stored) = history
            .iter_mut()
            .find(|existing| existing.id == subscription.id)
        else {
            return Ok(false);
        };
        if stored.version != expected_version {
            return Ok(false);
        }
        *stored = Subscription {
            version: expected_version + 1,
            ..subscription.clone()
        };
        self.subscription_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[async_trait]
impl RevenueLedger for MemoryBrokerStore {
    async fn append_metric(&self, metric: &RevenueMetric) -> sqlx::Result<()> {
        self.metrics.insert(metric.id, metric.clone());
        Ok(())
    }

    async fn metrics_between(
        &self,
        reader_id: Option<i32>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> sqlx::Result<Vec<RevenueMetric>> {
        let mut rows: Vec<RevenueMetric> = self
            .metrics
            .iter()
            .filter(|metric| metric.calculated_at >= start && metric.calculated_at <= end)
            .filter(|metric| reader_id.map_or(true, |id| metric.reader_id == id))
            .map(|metric| metric.clone())
            .collect();
        rows.sort_by_key(|metric| metric.calculated_at);
        Ok(rows)
    }
}
