//! Reader brokering: subscription lifecycle, per-request reader assignment and revenue
//! allocation with windowed metrics.

pub mod api;
pub mod assignment;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod postgres;
pub mod revenue;
pub mod store;
pub mod subscriptions;

use std::sync::Arc;

pub use assignment::{AssignmentResolver, AssignmentSource, ReaderAssignment, ResolverConfig};
pub use memory::MemoryBrokerStore;
pub use metrics::{
    MetricsAggregator, MetricsPeriod, PlatformMetrics, ReaderMetrics, ReaderRanking,
    RevenueTotals,
};
pub use models::{
    CommissionRate, PlanTier, ReaderProfile, RevenueMetric, RevenueSplit, Subscription,
    SubscriptionInfo, SubscriptionStatus, SubscriptionVariant, UserProfile,
};
pub use policy::{AllAccessPolicy, TierPolicy};
pub use postgres::PgBrokerStore;
pub use revenue::RevenueAllocator;
pub use store::{IdentityDirectory, ReaderDirectory, RevenueLedger, SubscriptionStore};
pub use subscriptions::SubscriptionManager;

/// key: broker-services -> components wired over one backing store
#[derive(Clone)]
pub struct BrokerServices {
    pub subscriptions: SubscriptionManager,
    pub resolver: AssignmentResolver,
    pub revenue: RevenueAllocator,
    pub metrics: MetricsAggregator,
}

impl BrokerServices {
    pub fn new<S>(store: Arc<S>, resolver_config: ResolverConfig) -> Self
    where
        S: IdentityDirectory + ReaderDirectory + SubscriptionStore + RevenueLedger + 'static,
    {
        let users: Arc<dyn IdentityDirectory> = store.clone();
        let readers: Arc<dyn ReaderDirectory> = store.clone();
        let subscriptions: Arc<dyn SubscriptionStore> = store.clone();
        let ledger: Arc<dyn RevenueLedger> = store;

        Self {
            subscriptions: SubscriptionManager::new(
                users.clone(),
                readers.clone(),
                subscriptions.clone(),
            ),
            resolver: AssignmentResolver::new(readers.clone(), subscriptions, resolver_config),
            revenue: RevenueAllocator::new(users, readers, ledger.clone()),
            metrics: MetricsAggregator::new(ledger),
        }
    }
}
