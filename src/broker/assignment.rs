use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config;
use crate::error::{BrokerError, BrokerResult};

use super::models::{ReaderProfile, SubscriptionVariant};
use super::store::{ReaderDirectory, SubscriptionStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolverConfig {
    pub platform_default_reader_id: i32,
}

impl ResolverConfig {
    pub fn from_env() -> Self {
        Self {
            platform_default_reader_id: *config::PLATFORM_DEFAULT_READER_ID,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    PlatformDefault,
    BoundReader,
    AllAccessPool,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct ReaderAssignment {
    pub reader_id: i32,
    pub source: AssignmentSource,
}

/// key: broker-assignment-resolver -> read-only reader selection per unit of work
///
/// Missing or stale bindings degrade to the platform default reader instead of failing;
/// only an empty all-access pool is an error.
#[derive(Clone)]
pub struct AssignmentResolver {
    readers: Arc<dyn ReaderDirectory>,
    subscriptions: Arc<dyn SubscriptionStore>,
    config: ResolverConfig,
}

impl AssignmentResolver {
    pub fn new(
        readers: Arc<dyn ReaderDirectory>,
        subscriptions: Arc<dyn SubscriptionStore>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            readers,
            subscriptions,
            config,
        }
    }

    pub async fn resolve_reader_for_work(&self, user_id: i32) -> BrokerResult<i32> {
        self.resolve_assignment(user_id)
            .await
            .map(|assignment| assignment.reader_id)
    }

    pub async fn resolve_assignment(&self, user_id: i32) -> BrokerResult<ReaderAssignment> {
        let Some(subscription) = self.subscriptions.active_subscription(user_id).await? else {
            debug!(user_id, "no active subscription; using platform default reader");
            return Ok(self.platform_default());
        };

        match (subscription.variant, subscription.reader_id) {
            (SubscriptionVariant::AllAccess, _) => {
                let pool = self.readers.list_active_readers().await?;
                let reader_id = pick_from_pool(&pool, subscription.last_reader_id)
                    .ok_or_else(|| {
                        BrokerError::InvalidState("no active readers available".to_string())
                    })?;
                debug!(
                    user_id,
                    reader_id,
                    pool_size = pool.len(),
                    "assigned reader from all access pool"
                );
                Ok(ReaderAssignment {
                    reader_id,
                    source: AssignmentSource::AllAccessPool,
                })
            }
            (SubscriptionVariant::Favorite | SubscriptionVariant::Individual, Some(reader_id)) => {
                match self.readers.find_reader(reader_id).await? {
                    Some(reader) if reader.is_active => Ok(ReaderAssignment {
                        reader_id,
                        source: AssignmentSource::BoundReader,
                    }),
                    _ => {
                        warn!(
                            user_id,
                            reader_id, "bound reader unavailable; using platform default reader"
                        );
                        Ok(self.platform_default())
                    }
                }
            }
            (SubscriptionVariant::Favorite | SubscriptionVariant::Individual, None) => {
                warn!(
                    user_id,
                    subscription = %subscription.id,
                    "subscription has no bound reader; using platform default reader"
                );
                Ok(self.platform_default())
            }
        }
    }

    fn platform_default(&self) -> ReaderAssignment {
        ReaderAssignment {
            reader_id: self.config.platform_default_reader_id,
            source: AssignmentSource::PlatformDefault,
        }
    }
}

/// Uniform pick that skips `last_reader_id` whenever another reader is available.
fn pick_from_pool(pool: &[ReaderProfile], last_reader_id: Option<i32>) -> Option<i32> {
    let fresh: Vec<&ReaderProfile> = pool
        .iter()
        .filter(|reader| Some(reader.id) != last_reader_id)
        .collect();
    let mut rng = rand::thread_rng();
    if fresh.is_empty() {
        pool.choose(&mut rng).map(|reader| reader.id)
    } else {
        fresh.choose(&mut rng).map(|reader| reader.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::models::CommissionRate;
    use rust_decimal_macros::dec;

    fn reader(id: i32) -> ReaderProfile {
        ReaderProfile {
            id,
            is_active: true,
            commission_percentage: CommissionRate::new(dec!(30)).unwrap(),
        }
    }

    #[test]
    fn pool_pick_avoids_last_reader() {
        let pool = vec![reader(1), reader(2), reader(3)];
        for _ in 0..200 {
            let picked = pick_from_pool(&pool, Some(2)).unwrap();
            assert_ne!(picked, 2);
        }
    }

    #[test]
    fn pool_pick_repeats_when_single_reader() {
        let pool = vec![reader(5)];
        assert_eq!(pick_from_pool(&pool, Some(5)), Some(5));
    }

    #[test]
    fn empty_pool_yields_nothing() {
        assert_eq!(pick_from_pool(&[], None), None);
    }
}
