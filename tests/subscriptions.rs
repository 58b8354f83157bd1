use std::sync::Arc;

use chrono::{Duration, Utc};
use reader_broker::broker::{
    CommissionRate, PlanTier, Subscription, SubscriptionManager, SubscriptionStatus, SubscriptionVariant,
};
use reader_broker::{BrokerError, MemoryBrokerStore};
use rust_decimal_macros::dec;
use uuid::Uuid;

fn manager(store: &Arc<MemoryBrokerStore>) -> SubscriptionManager {
    SubscriptionManager::new(store.clone(), store.clone(), store.clone())
}

fn seeded_store() -> Arc<MemoryBrokerStore> {
    let store = Arc::new(MemoryBrokerStore::new());
    store.put_user(42, PlanTier::Free);
    store.put_user(43, PlanTier::Premium);
    store.put_user(44, PlanTier::Professional);
    store.put_user(45, PlanTier::Guest);
    for reader_id in [3, 7, 9] {
        store.put_reader(reader_id, true, CommissionRate::new(dec!(30)).unwrap());
    }
    store.put_reader(11, false, CommissionRate::new(dec!(30)).unwrap());
    store
}

fn active_subscription(user_id: i32, reader_id: i32) -> Subscription {
    let now = Utc::now();
    Subscription {
        id: Uuid::new_v4(),
        user_id,
        reader_id: Some(reader_id),
        variant: SubscriptionVariant::Favorite,
        status: SubscriptionStatus::Active,
        started_at: now - Duration::days(40),
        can_change_at: None,
        change_count: 2,
        last_reader_id: None,
        version: 4,
        updated_at: now - Duration::days(40),
    }
}

// key: subscription-tests -> tier rules, cooldown, idempotence
#[tokio::test]
async fn free_user_first_selection_starts_cooldown() {
    let store = seeded_store();
    let manager = manager(&store);
    let now = Utc::now();

    let subscription = manager.set_favorite_reader_at(42, 7, now).await.unwrap();

    assert_eq!(subscription.variant, SubscriptionVariant::Favorite);
    assert_eq!(subscription.reader_id, Some(7));
    assert_eq!(subscription.change_count, 0);
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(subscription.can_change_at, Some(now + Duration::days(30)));
}

#[tokio::test]
async fn free_user_immediate_change_hits_cooldown() {
    let store = seeded_store();
    let manager = manager(&store);
    let now = Utc::now();
    manager.set_favorite_reader_at(42, 7, now).await.unwrap();

    let err = manager
        .set_favorite_reader_at(42, 9, now + Duration::seconds(1))
        .await
        .unwrap_err();

    match err {
        BrokerError::CooldownActive {
            days_remaining,
            can_change_at,
        } => {
            assert_eq!(days_remaining, 30);
            assert_eq!(can_change_at, now + Duration::days(30));
        }
        other => panic!("expected cooldown, got {other:?}"),
    }
    let current = store.subscription_history(42);
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].reader_id, Some(7));
}

#[tokio::test]
async fn repeated_selection_is_idempotent() {
    let store = seeded_store();
    let manager = manager(&store);
    let now = Utc::now();

    let first = manager.set_favorite_reader_at(42, 7, now).await.unwrap();
    let writes = store.subscription_writes();
    let second = manager
        .set_favorite_reader_at(42, 7, now + Duration::hours(2))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(store.subscription_writes(), writes);
    assert_eq!(second.change_count, 0);
}

#[tokio::test]
async fn cooldown_boundary_is_inclusive() {
    let store = seeded_store();
    let manager = manager(&store);
    let now = Utc::now();

    let mut locked = active_subscription(42, 7);
    locked.can_change_at = Some(now + Duration::microseconds(1));
    store.seed_subscription(locked.clone());
    let err = manager.set_favorite_reader_at(42, 9, now).await.unwrap_err();
    assert!(matches!(
        err,
        BrokerError::CooldownActive {
            days_remaining: 1,
            ..
        }
    ));

    let mut open = locked;
    open.can_change_at = Some(now);
    store.seed_subscription(open.clone());
    let changed = manager.set_favorite_reader_at(42, 9, now).await.unwrap();
    assert_eq!(changed.id, open.id);
    assert_eq!(changed.reader_id, Some(9));
    assert_eq!(changed.change_count, open.change_count + 1);
    assert_eq!(changed.version, open.version + 1);
    assert_eq!(changed.can_change_at, Some(now + Duration::days(30)));
}

#[tokio::test]
async fn invalid_reader_is_rejected_before_cooldown() {
    let store = seeded_store();
    let manager = manager(&store);
    let now = Utc::now();
    manager.set_favorite_reader_at(42, 7, now).await.unwrap();

    let inactive = manager.set_favorite_reader_at(42, 11, now).await.unwrap_err();
    assert!(matches!(inactive, BrokerError::InvalidState(_)));

    let missing = manager.set_favorite_reader_at(42, 999, now).await.unwrap_err();
    assert!(matches!(
        missing,
        BrokerError::NotFound {
            entity: "reader",
            ..
        }
    ));

    let unknown_user = manager.set_favorite_reader_at(4242, 7, now).await.unwrap_err();
    assert!(matches!(
        unknown_user,
        BrokerError::NotFound { entity: "user", .. }
    ));
}

#[tokio::test]
async fn guest_user_follows_free_tier_rules() {
    let store = seeded_store();
    let manager = manager(&store);
    let now = Utc::now();

    let subscription = manager.set_favorite_reader_at(45, 3, now).await.unwrap();
    assert_eq!(subscription.variant, SubscriptionVariant::Favorite);
    assert_eq!(subscription.can_change_at, Some(now + Duration::days(30)));
}

#[tokio::test]
async fn premium_user_changes_reader_without_cooldown() {
    let store = seeded_store();
    let manager = manager(&store);
    let now = Utc::now();

    let first = manager.set_favorite_reader_at(43, 3, now).await.unwrap();
    assert_eq!(first.variant, SubscriptionVariant::Individual);
    assert_eq!(first.can_change_at, None);

    let second = manager
        .set_favorite_reader_at(43, 9, now + Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.reader_id, Some(9));
    assert_eq!(second.change_count, 1);
    assert_eq!(second.can_change_at, None);
}

#[tokio::test]
async fn upgraded_user_is_not_held_by_old_cooldown() {
    let store = seeded_store();
    let manager = manager(&store);
    let now = Utc::now();

    let mut locked = active_subscription(43, 7);
    locked.can_change_at = Some(now + Duration::days(12));
    store.seed_subscription(locked);

    let changed = manager.set_favorite_reader_at(43, 9, now).await.unwrap();
    assert_eq!(changed.variant, SubscriptionVariant::Individual);
    assert_eq!(changed.reader_id, Some(9));
    assert_eq!(changed.can_change_at, None);
}

#[tokio::test]
async fn professional_user_is_forced_into_all_access() {
    let store = seeded_store();
    let manager = manager(&store);

    let subscription = manager.set_favorite_reader(44, 7).await.unwrap();
    assert_eq!(subscription.variant, SubscriptionVariant::AllAccess);
    assert_eq!(subscription.reader_id, None);
    assert_eq!(subscription.can_change_at, None);
}

#[tokio::test]
async fn professional_reselection_is_idempotent() {
    let store = seeded_store();
    let manager = manager(&store);

    let first = manager.set_favorite_reader(44, 7).await.unwrap();
    let writes = store.subscription_writes();

    let second = manager.set_favorite_reader(44, 7).await.unwrap();
    let other = manager.set_favorite_reader(44, 9).await.unwrap();
    assert_eq!(store.subscription_writes(), writes);
    assert_eq!(second.change_count, first.change_count);
    assert_eq!(second.version, first.version);
    assert_eq!(other.change_count, 0);
    assert_eq!(other.reader_id, None);
}

#[tokio::test]
async fn premium_user_enables_all_access() {
    let store = seeded_store();
    let manager = manager(&store);
    let mut individual = active_subscription(43, 3);
    individual.variant = SubscriptionVariant::Individual;
    store.seed_subscription(individual.clone());

    let subscription = manager.enable_all_access(43).await.unwrap();
    assert_eq!(subscription.id, individual.id);
    assert_eq!(subscription.variant, SubscriptionVariant::AllAccess);
    assert_eq!(subscription.reader_id, None);

    let writes = store.subscription_writes();
    let again = manager.enable_all_access(43).await.unwrap();
    assert_eq!(again, subscription);
    assert_eq!(store.subscription_writes(), writes);
}

#[tokio::test]
async fn all_access_requires_tier_and_subscription() {
    let store = seeded_store();
    let manager = manager(&store);
    manager.set_favorite_reader(42, 7).await.unwrap();

    let forbidden = manager.enable_all_access(42).await.unwrap_err();
    assert!(matches!(forbidden, BrokerError::Forbidden(_)));

    let missing = manager.enable_all_access(43).await.unwrap_err();
    assert!(matches!(
        missing,
        BrokerError::NotFound {
            entity: "subscription",
            ..
        }
    ));
}

#[tokio::test]
async fn subscription_info_reports_change_window() {
    let store = seeded_store();
    let manager = manager(&store);
    let now = Utc::now();

    assert!(manager.get_subscription_info_at(42, now).await.unwrap().is_none());

    manager.set_favorite_reader_at(42, 7, now).await.unwrap();
    let info = manager
        .get_subscription_info_at(42, now + Duration::days(1))
        .await
        .unwrap()
        .unwrap();
    assert!(!info.can_change);
    assert_eq!(info.days_until_change, 29);
    assert_eq!(info.reader_id, Some(7));

    let later = manager
        .get_subscription_info_at(42, now + Duration::days(30))
        .await
        .unwrap()
        .unwrap();
    assert!(later.can_change);
    assert_eq!(later.days_until_change, 0);

    manager.set_favorite_reader_at(43, 3, now).await.unwrap();
    let premium = manager
        .get_subscription_info_at(43, now)
        .await
        .unwrap()
        .unwrap();
    assert!(premium.can_change);
    assert_eq!(premium.can_change_at, None);
}

#[tokio::test]
async fn cancelled_subscription_is_kept_and_replaced() {
    let store = seeded_store();
    let manager = manager(&store);

    let original = manager.set_favorite_reader(43, 3).await.unwrap();
    let cancelled = manager.cancel_subscription(43).await.unwrap();
    assert_eq!(cancelled.id, original.id);
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert!(manager.get_subscription_info(43).await.unwrap().is_none());

    let fresh = manager.set_favorite_reader(43, 9).await.unwrap();
    assert_ne!(fresh.id, original.id);
    assert_eq!(fresh.change_count, 0);

    let history = store.subscription_history(43);
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|s| s.is_active()).count(), 1);

    let err = manager.cancel_subscription(42).await.unwrap_err();
    assert!(matches!(err, BrokerError::NotFound { .. }));
}

#[tokio::test]
async fn record_assignment_tracks_last_reader_only() {
    let store = seeded_store();
    let manager = manager(&store);

    assert!(manager.record_assignment(44, 7).await.unwrap().is_none());

    let subscription = manager.set_favorite_reader(44, 7).await.unwrap();
    let updated = manager.record_assignment(44, 9).await.unwrap().unwrap();
    assert_eq!(updated.last_reader_id, Some(9));
    assert_eq!(updated.change_count, subscription.change_count);
    assert_eq!(updated.can_change_at, subscription.can_change_at);

    let writes = store.subscription_writes();
    manager.record_assignment(44, 9).await.unwrap();
    assert_eq!(store.subscription_writes(), writes);
}

#[tokio::test]
async fn concurrent_changes_leave_one_active_subscription() {
    let store = seeded_store();
    let manager = manager(&store);
    let now = Utc::now();

    let mut handles = Vec::new();
    for reader_id in [3, 7, 9, 3, 7, 9] {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.set_favorite_reader_at(42, reader_id, now).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(BrokerError::CooldownActive { .. }) | Err(BrokerError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert!(successes >= 1);

    let history = store.subscription_history(42);
    assert_eq!(history.iter().filter(|s| s.is_active()).count(), 1);
    assert_eq!(history[0].change_count, 0);
}
