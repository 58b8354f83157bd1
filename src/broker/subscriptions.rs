use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BrokerError, BrokerResult};

use super::models::{
    Subscription, SubscriptionInfo, SubscriptionStatus, SubscriptionVariant, UserProfile,
};
use super::policy::TierPolicy;
use super::store::{IdentityDirectory, ReaderDirectory, SubscriptionStore};

/// Attempts at a conditional write before a concurrent writer is reported as a conflict.
const MAX_WRITE_ATTEMPTS: usize = 3;

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Outcome of evaluating a request against the freshly loaded active subscription.
enum WritePlan {
    Unchanged(Subscription),
    Update {
        next: Subscription,
        expected_version: i64,
    },
    Create(Subscription),
}

/// key: broker-subscription-manager -> reader binding state machine
#[derive(Clone)]
pub struct SubscriptionManager {
    users: Arc<dyn IdentityDirectory>,
    readers: Arc<dyn ReaderDirectory>,
    subscriptions: Arc<dyn SubscriptionStore>,
}

impl SubscriptionManager {
    pub fn new(
        users: Arc<dyn IdentityDirectory>,
        readers: Arc<dyn ReaderDirectory>,
        subscriptions: Arc<dyn SubscriptionStore>,
    ) -> Self {
        Self {
            users,
            readers,
            subscriptions,
        }
    }

    pub async fn set_favorite_reader(
        &self,
        user_id: i32,
        reader_id: i32,
    ) -> BrokerResult<Subscription> {
        self.set_favorite_reader_at(user_id, reader_id, Utc::now())
            .await
    }

    /// Binds `reader_id` to the user's subscription, creating it on first selection.
    ///
    /// The reader is validated before any cooldown is considered, so an unknown or
    /// inactive reader is rejected even while the user is locked.
    pub async fn set_favorite_reader_at(
        &self,
        user_id: i32,
        reader_id: i32,
        now: DateTime<Utc>,
    ) -> BrokerResult<Subscription> {
        let user = self.require_user(user_id).await?;
        let reader = self
            .readers
            .find_reader(reader_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("reader", reader_id))?;
        if !reader.is_active {
            return Err(BrokerError::InvalidState(format!(
                "reader {reader_id} is not active"
            )));
        }

        let policy = TierPolicy::for_tier(user.plan_tier);
        self.commit(user_id, |current| match current {
            Some(existing) if already_bound(&existing, &policy, reader_id) => {
                Ok(WritePlan::Unchanged(existing))
            }
            Some(existing) => {
                if policy.cooldown.is_some() {
                    ensure_cooldown_elapsed(&existing, now)?;
                }
                let expected_version = existing.version;
                Ok(WritePlan::Update {
                    next: rebind(existing, &policy, reader_id, now),
                    expected_version,
                })
            }
            None => Ok(WritePlan::Create(first_selection(
                user_id, &policy, reader_id, now,
            ))),
        })
        .await
    }

    pub async fn enable_all_access(&self, user_id: i32) -> BrokerResult<Subscription> {
        self.enable_all_access_at(user_id, Utc::now()).await
    }

    pub async fn enable_all_access_at(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> BrokerResult<Subscription> {
        let user = self.require_user(user_id).await?;
        if !TierPolicy::for_tier(user.plan_tier).allows_all_access() {
            return Err(BrokerError::Forbidden(format!(
                "{} tier cannot enable all access",
                user.plan_tier.as_str()
            )));
        }

        self.commit(user_id, |current| {
            let existing =
                current.ok_or_else(|| BrokerError::not_found("subscription", user_id))?;
            if existing.variant == SubscriptionVariant::AllAccess && existing.reader_id.is_none() {
                return Ok(WritePlan::Unchanged(existing));
            }
            let expected_version = existing.version;
            Ok(WritePlan::Update {
                next: Subscription {
                    variant: SubscriptionVariant::AllAccess,
                    reader_id: None,
                    can_change_at: None,
                    updated_at: now,
                    ..existing
                },
                expected_version,
            })
        })
        .await
    }

    pub async fn get_subscription_info(
        &self,
        user_id: i32,
    ) -> BrokerResult<Option<SubscriptionInfo>> {
        self.get_subscription_info_at(user_id, Utc::now()).await
    }

    pub async fn get_subscription_info_at(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> BrokerResult<Option<SubscriptionInfo>> {
        let subscription = self.subscriptions.active_subscription(user_id).await?;
        Ok(subscription.map(|subscription| {
            let days_until_change = subscription
                .can_change_at
                .map(|at| days_until(at, now))
                .unwrap_or(0);
            SubscriptionInfo {
                subscription_id: subscription.id,
                user_id: subscription.user_id,
                reader_id: subscription.reader_id,
                variant: subscription.variant,
                status: subscription.status,
                started_at: subscription.started_at,
                can_change_at: subscription.can_change_at,
                change_count: subscription.change_count,
                can_change: subscription.can_change(now),
                days_until_change,
            }
        }))
    }

    pub async fn cancel_subscription(&self, user_id: i32) -> BrokerResult<Subscription> {
        self.cancel_subscription_at(user_id, Utc::now()).await
    }

    /// Retires the active subscription; the row stays for audit.
    pub async fn cancel_subscription_at(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> BrokerResult<Subscription> {
        self.commit(user_id, |current| {
            let existing =
                current.ok_or_else(|| BrokerError::not_found("subscription", user_id))?;
            let expected_version = existing.version;
            Ok(WritePlan::Update {
                next: Subscription {
                    status: SubscriptionStatus::Cancelled,
                    updated_at: now,
                    ..existing
                },
                expected_version,
            })
        })
        .await
    }

    pub async fn record_assignment(
        &self,
        user_id: i32,
        reader_id: i32,
    ) -> BrokerResult<Option<Subscription>> {
        self.record_assignment_at(user_id, reader_id, Utc::now())
            .await
    }

    /// Remembers the reader that served the user's latest unit of work.
    ///
    /// Returns `None` when the user has no active subscription.
    pub async fn record_assignment_at(
        &self,
        user_id: i32,
        reader_id: i32,
        now: DateTime<Utc>,
    ) -> BrokerResult<Option<Subscription>> {
        let outcome = self
            .commit(user_id, |current| {
                let existing =
                    current.ok_or_else(|| BrokerError::not_found("subscription", user_id))?;
                if existing.last_reader_id == Some(reader_id) {
                    return Ok(WritePlan::Unchanged(existing));
                }
                let expected_version = existing.version;
                Ok(WritePlan::Update {
                    next: Subscription {
                        last_reader_id: Some(reader_id),
                        updated_at: now,
                        ..existing
                    },
                    expected_version,
                })
            })
            .await;
        match outcome {
            Ok(subscription) => Ok(Some(subscription)),
            Err(BrokerError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn require_user(&self, user_id: i32) -> BrokerResult<UserProfile> {
        self.users
            .find_user(user_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("user", user_id))
    }

    /// Loads the active subscription, lets `plan` decide, and applies the decision with a
    /// version check. A lost race reloads and decides again.
    async fn commit<F>(&self, user_id: i32, mut plan: F) -> BrokerResult<Subscription>
    where
        F: FnMut(Option<Subscription>) -> BrokerResult<WritePlan> + Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.subscriptions.active_subscription(user_id).await?;
            match plan(current)? {
                WritePlan::Unchanged(subscription) => {
                    debug!(
                        user_id,
                        subscription = %subscription.id,
                        "subscription already in requested state"
                    );
                    return Ok(subscription);
                }
                WritePlan::Update {
                    next,
                    expected_version,
                } => {
                    if self
                        .subscriptions
                        .update_subscription(&next, expected_version)
                        .await?
                    {
                        info!(
                            user_id,
                            subscription = %next.id,
                            reader_id = ?next.reader_id,
                            variant = next.variant.as_str(),
                            status = next.status.as_str(),
                            change_count = next.change_count,
                            "subscription updated"
                        );
                        return Ok(Subscription {
                            version: expected_version + 1,
                            ..next
                        });
                    }
                }
                WritePlan::Create(created) => {
                    if self.subscriptions.insert_subscription(&created).await? {
                        info!(
                            user_id,
                            subscription = %created.id,
                            reader_id = ?created.reader_id,
                            variant = created.variant.as_str(),
                            "subscription created"
                        );
                        return Ok(created);
                    }
                }
            }
            warn!(user_id, attempt, "subscription changed concurrently; re-evaluating");
        }
        Err(BrokerError::Conflict { user_id })
    }
}

fn ensure_cooldown_elapsed(subscription: &Subscription, now: DateTime<Utc>) -> BrokerResult<()> {
    match subscription.can_change_at {
        Some(can_change_at) if can_change_at > now => Err(BrokerError::CooldownActive {
            days_remaining: days_until(can_change_at, now),
            can_change_at,
        }),
        _ => Ok(()),
    }
}

fn bound_reader(variant: SubscriptionVariant, requested: i32) -> Option<i32> {
    match variant {
        SubscriptionVariant::Favorite | SubscriptionVariant::Individual => Some(requested),
        SubscriptionVariant::AllAccess => None,
    }
}

/// True when rebinding would store the same reader the row already holds.
///
/// A null binding only matches when the variant matches as well, so a premium user
/// leaving all access for a reader is still a change.
fn already_bound(existing: &Subscription, policy: &TierPolicy, requested: i32) -> bool {
    let next = bound_reader(policy.default_variant, requested);
    existing.reader_id == next && (next.is_some() || existing.variant == policy.default_variant)
}

fn first_selection(
    user_id: i32,
    policy: &TierPolicy,
    reader_id: i32,
    now: DateTime<Utc>,
) -> Subscription {
    Subscription {
        id: Uuid::new_v4(),
        user_id,
        reader_id: bound_reader(policy.default_variant, reader_id),
        variant: policy.default_variant,
        status: SubscriptionStatus::Active,
        started_at: now,
        can_change_at: policy.cooldown.map(|cooldown| now + cooldown),
        change_count: 0,
        last_reader_id: None,
        version: 0,
        updated_at: now,
    }
}

fn rebind(
    existing: Subscription,
    policy: &TierPolicy,
    reader_id: i32,
    now: DateTime<Utc>,
) -> Subscription {
    Subscription {
        reader_id: bound_reader(policy.default_variant, reader_id),
        variant: policy.default_variant,
        can_change_at: policy.cooldown.map(|cooldown| now + cooldown),
        change_count: existing.change_count + 1,
        updated_at: now,
        ..existing
    }
}

/// Whole days until `target`, rounded up; zero once `target` has been reached.
pub(crate) fn days_until(target: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let remaining = target - now;
    if remaining <= Duration::zero() {
        return 0;
    }
    let micros = remaining.num_microseconds().unwrap_or(i64::MAX);
    micros / MICROS_PER_DAY + i64::from(micros % MICROS_PER_DAY != 0)
}
