use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BrokerResult;

use super::{
    BrokerServices, PlatformMetrics, ReaderAssignment, ReaderMetrics, MetricsPeriod,
    RevenueMetric, RevenueSplit, Subscription, SubscriptionInfo, SubscriptionVariant,
};

/// key: broker-api -> rest endpoints
pub async fn get_subscription(
    Extension(services): Extension<BrokerServices>,
    Path(user_id): Path<i32>,
) -> BrokerResult<Json<Option<SubscriptionInfo>>> {
    let info = services
        .subscriptions
        .get_subscription_info(user_id)
        .await?;
    Ok(Json(info))
}

pub async fn set_reader(
    Extension(services): Extension<BrokerServices>,
    Path(user_id): Path<i32>,
    Json(payload): Json<SetReaderRequest>,
) -> BrokerResult<Json<Subscription>> {
    let subscription = services
        .subscriptions
        .set_favorite_reader(user_id, payload.reader_id)
        .await?;
    Ok(Json(subscription))
}

pub async fn enable_all_access(
    Extension(services): Extension<BrokerServices>,
    Path(user_id): Path<i32>,
) -> BrokerResult<Json<Subscription>> {
    let subscription = services.subscriptions.enable_all_access(user_id).await?;
    Ok(Json(subscription))
}

pub async fn cancel_subscription(
    Extension(services): Extension<BrokerServices>,
    Path(user_id): Path<i32>,
) -> BrokerResult<Json<Subscription>> {
    let subscription = services.subscriptions.cancel_subscription(user_id).await?;
    Ok(Json(subscription))
}

pub async fn resolve_assignment(
    Extension(services): Extension<BrokerServices>,
    Path(user_id): Path<i32>,
) -> BrokerResult<Json<ReaderAssignment>> {
    let assignment = services.resolver.resolve_assignment(user_id).await?;
    Ok(Json(assignment))
}

pub async fn record_assignment(
    Extension(services): Extension<BrokerServices>,
    Path(user_id): Path<i32>,
    Json(payload): Json<SetReaderRequest>,
) -> BrokerResult<StatusCode> {
    let updated = services
        .subscriptions
        .record_assignment(user_id, payload.reader_id)
        .await?;
    Ok(if updated.is_some() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::ACCEPTED
    })
}

pub async fn calculate_split(
    Extension(services): Extension<BrokerServices>,
    Path(reader_id): Path<i32>,
    Query(query): Query<SplitQuery>,
) -> BrokerResult<Json<RevenueSplit>> {
    let split = services
        .revenue
        .calculate_split(reader_id, query.gross_amount)
        .await?;
    Ok(Json(split))
}

pub async fn record_revenue(
    Extension(services): Extension<BrokerServices>,
    Json(payload): Json<RecordRevenueRequest>,
) -> BrokerResult<(StatusCode, Json<RevenueMetric>)> {
    let metric = services
        .revenue
        .record_revenue(
            payload.reader_id,
            payload.user_id,
            payload.variant,
            payload.gross_amount,
            payload.work_unit_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(metric)))
}

pub async fn reader_metrics(
    Extension(services): Extension<BrokerServices>,
    Path(reader_id): Path<i32>,
    Query(query): Query<MetricsQuery>,
) -> BrokerResult<Json<ReaderMetrics>> {
    let metrics = services
        .metrics
        .reader_metrics(reader_id, query.period()?)
        .await?;
    Ok(Json(metrics))
}

pub async fn platform_metrics(
    Extension(services): Extension<BrokerServices>,
    Query(query): Query<MetricsQuery>,
) -> BrokerResult<Json<PlatformMetrics>> {
    let metrics = services.metrics.platform_metrics(query.period()?).await?;
    Ok(Json(metrics))
}

#[derive(Debug, Deserialize)]
pub struct SetReaderRequest {
    pub reader_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct SplitQuery {
    pub gross_amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct RecordRevenueRequest {
    pub reader_id: i32,
    pub user_id: i32,
    pub variant: SubscriptionVariant,
    pub gross_amount: Decimal,
    #[serde(default)]
    pub work_unit_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MetricsQuery {
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl MetricsQuery {
    /// Defaults to the current calendar month.
    pub fn period(&self) -> BrokerResult<MetricsPeriod> {
        MetricsPeriod::parse(
            self.period.as_deref().unwrap_or("month"),
            self.start,
            self.end,
        )
    }
}
