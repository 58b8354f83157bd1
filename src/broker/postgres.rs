use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::models::{
    CommissionRate, PlanTier, ReaderProfile, RevenueMetric, Subscription, SubscriptionStatus,
    SubscriptionVariant, UserProfile,
};
use super::store::{IdentityDirectory, ReaderDirectory, RevenueLedger, SubscriptionStore};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, reader_id, variant, status, started_at, can_change_at, change_count, last_reader_id, version, updated_at";

const METRIC_COLUMNS: &str = "id, reader_id, user_id, work_unit_id, variant, reader_share, platform_fee, gross_amount, commission_percentage, calculated_at, period_start, period_end";

/// key: broker-postgres-store -> sqlx backed collaborators
#[derive(Clone)]
pub struct PgBrokerStore {
    pool: PgPool,
}

impl PgBrokerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityDirectory for PgBrokerStore {
    async fn find_user(&self, user_id: i32) -> sqlx::Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, plan_tier FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(UserProfile::from))
    }
}

#[async_trait]
impl ReaderDirectory for PgBrokerStore {
    async fn find_reader(&self, reader_id: i32) -> sqlx::Result<Option<ReaderProfile>> {
        sqlx::query_as::<_, ReaderRow>(
            "SELECT id, is_active, commission_percentage FROM readers WHERE id = $1",
        )
        .bind(reader_id)
        .fetch_optional(&self.pool)
        .await?
        .map(ReaderProfile::try_from)
        .transpose()
    }

    async fn list_active_readers(&self) -> sqlx::Result<Vec<ReaderProfile>> {
        let rows = sqlx::query_as::<_, ReaderRow>(
            "SELECT id, is_active, commission_percentage FROM readers WHERE is_active = TRUE ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ReaderProfile::try_from).collect()
    }
}

#[async_trait]
impl SubscriptionStore for PgBrokerStore {
    async fn active_subscription(&self, user_id: i32) -> sqlx::Result<Option<Subscription>> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM reader_subscriptions WHERE user_id = $1 AND status = 'active'"
        );
        let row = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Subscription::from))
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> sqlx::Result<bool> {
        // The partial unique index on active rows turns a racing insert into a no-op.
        let result = sqlx::query(
            r#"
            INSERT INTO reader_subscriptions (
                id,
                user_id,
                reader_id,
                variant,
                status,
                started_at,
                can_change_at,
                change_count,
                last_reader_id,
                version,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(subscription.reader_id)
        .bind(subscription.variant.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.started_at)
        .bind(subscription.can_change_at)
        .bind(subscription.change_count)
        .bind(subscription.last_reader_id)
        .bind(subscription.version)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_subscription(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reader_subscriptions SET
                reader_id = $1,
                variant = $2,
                status = $3,
                can_change_at = $4,
                change_count = $5,
                last_reader_id = $6,
                updated_at = $7,
                version = version + 1
            WHERE id = $8 AND user_id = $9 AND version = $10
            "#,
        )
        .bind(subscription.reader_id)
        .bind(subscription.variant.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.can_change_at)
        .bind(subscription.change_count)
        .bind(subscription.last_reader_id)
        .bind(subscription.updated_at)
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl RevenueLedger for PgBrokerStore {
    async fn append_metric(&self, metric: &RevenueMetric) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO revenue_metrics(id, reader_id, user_id, work_unit_id, variant, reader_share, platform_fee, gross_amount, commission_percentage, calculated_at, period_start, period_end) VALUES($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
        )
        .bind(metric.id)
        .bind(metric.reader_id)
        .bind(metric.user_id)
        .bind(metric.work_unit_id)
        .bind(metric.variant.as_str())
        .bind(metric.reader_share)
        .bind(metric.platform_fee)
        .bind(metric.gross_amount)
        .bind(metric.commission_percentage)
        .bind(metric.calculated_at)
        .bind(metric.period_start)
        .bind(metric.period_end)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn metrics_between(
        &self,
        reader_id: Option<i32>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> sqlx::Result<Vec<RevenueMetric>> {
        let query = format!(
            r#"
            SELECT {METRIC_COLUMNS} FROM revenue_metrics
            WHERE calculated_at >= $1
              AND calculated_at <= $2
              AND ($3::INTEGER IS NULL OR reader_id = $3)
            ORDER BY calculated_at ASC
            "#
        );
        let rows = sqlx::query_as::<_, MetricRow>(&query)
            .bind(start)
            .bind(end)
            .bind(reader_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(RevenueMetric::try_from).collect()
    }
}

#[derive(FromRow)]
struct UserRow {
    id: i32,
    plan_tier: String,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            plan_tier: PlanTier::from_str(&row.plan_tier),
        }
    }
}

#[derive(FromRow)]
struct ReaderRow {
    id: i32,
    is_active: bool,
    commission_percentage: Decimal,
}

impl TryFrom<ReaderRow> for ReaderProfile {
    type Error = sqlx::Error;

    fn try_from(row: ReaderRow) -> Result<Self, Self::Error> {
        let commission_percentage = CommissionRate::new(row.commission_percentage)
            .map_err(|error| sqlx::Error::Decode(error.to_string().into()))?;
        Ok(Self {
            id: row.id,
            is_active: row.is_active,
            commission_percentage,
        })
    }
}

#[derive(FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: i32,
    reader_id: Option<i32>,
    variant: String,
    status: String,
    started_at: DateTime<Utc>,
    can_change_at: Option<DateTime<Utc>>,
    change_count: i32,
    last_reader_id: Option<i32>,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        // A row without a bound reader can only be all access.
        let variant = SubscriptionVariant::parse(&row.variant).unwrap_or(
            if row.reader_id.is_some() {
                SubscriptionVariant::Individual
            } else {
                SubscriptionVariant::AllAccess
            },
        );
        Self {
            id: row.id,
            user_id: row.user_id,
            reader_id: row.reader_id,
            variant,
            status: SubscriptionStatus::from_str(&row.status),
            started_at: row.started_at,
            can_change_at: row.can_change_at,
            change_count: row.change_count,
            last_reader_id: row.last_reader_id,
            version: row.version,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct MetricRow {
    id: Uuid,
    reader_id: i32,
    user_id: i32,
    work_unit_id: Option<Uuid>,
    variant: String,
    reader_share: Decimal,
    platform_fee: Decimal,
    gross_amount: Decimal,
    commission_percentage: Decimal,
    calculated_at: DateTime<Utc>,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
}

impl TryFrom<MetricRow> for RevenueMetric {
    type Error = sqlx::Error;

    fn try_from(row: MetricRow) -> Result<Self, Self::Error> {
        let variant = SubscriptionVariant::parse(&row.variant).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown subscription variant `{}`", row.variant).into())
        })?;
        Ok(Self {
            id: row.id,
            reader_id: row.reader_id,
            user_id: row.user_id,
            work_unit_id: row.work_unit_id,
            variant,
            reader_share: row.reader_share,
            platform_fee: row.platform_fee,
            gross_amount: row.gross_amount,
            commission_percentage: row.commission_percentage,
            calculated_at: row.calculated_at,
            period_start: row.period_start,
            period_end: row.period_end,
        })
    }
}
