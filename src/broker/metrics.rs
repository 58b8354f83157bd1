use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{BrokerError, BrokerResult};

use super::models::RevenueMetric;
use super::revenue::month_bounds;
use super::store::RevenueLedger;

/// Readers listed in the platform leaderboard.
pub const TOP_READER_LIMIT: usize = 5;

/// key: broker-metrics-period -> window anchored to the call time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsPeriod {
    Day,
    Week,
    Month,
    Year,
    Custom {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

impl MetricsPeriod {
    pub fn parse(
        kind: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> BrokerResult<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(MetricsPeriod::Day),
            "week" => Ok(MetricsPeriod::Week),
            "month" => Ok(MetricsPeriod::Month),
            "year" => Ok(MetricsPeriod::Year),
            "custom" => Ok(MetricsPeriod::Custom { start, end }),
            other => Err(BrokerError::InvalidArgument(format!(
                "unknown metrics period `{other}`"
            ))),
        }
    }

    /// Inclusive `[start, end]` bounds; `end` is the last millisecond of the window.
    pub fn resolve(&self, now: DateTime<Utc>) -> BrokerResult<(DateTime<Utc>, DateTime<Utc>)> {
        let last_millisecond = Duration::milliseconds(1);
        match *self {
            MetricsPeriod::Day => {
                let start = midnight(now);
                Ok((start, start + Duration::days(1) - last_millisecond))
            }
            MetricsPeriod::Week => {
                let today = midnight(now);
                Ok((
                    today - Duration::days(6),
                    today + Duration::days(1) - last_millisecond,
                ))
            }
            MetricsPeriod::Month => Ok(month_bounds(now)),
            MetricsPeriod::Year => {
                let start = start_of_year(now.year()).unwrap_or(now);
                let end = start_of_year(now.year() + 1)
                    .map(|next| next - last_millisecond)
                    .unwrap_or(now);
                Ok((start, end))
            }
            MetricsPeriod::Custom { start, end } => match (start, end) {
                (Some(start), Some(end)) if start <= end => Ok((start, end)),
                (Some(start), Some(end)) => Err(BrokerError::InvalidArgument(format!(
                    "custom period start {start} is after end {end}"
                ))),
                _ => Err(BrokerError::InvalidArgument(
                    "custom period requires both start and end".to_string(),
                )),
            },
        }
    }
}

fn midnight(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(at)
}

fn start_of_year(year: i32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevenueTotals {
    pub work_units: i64,
    pub total_reader_share: Decimal,
    pub total_platform_fee: Decimal,
    pub total_gross: Decimal,
}

/// key: broker-reader-metrics -> one reader's window summary
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReaderMetrics {
    pub reader_id: i32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    #[serde(flatten)]
    pub totals: RevenueTotals,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReaderRanking {
    pub reader_id: i32,
    #[serde(flatten)]
    pub totals: RevenueTotals,
}

/// key: broker-platform-metrics -> platform window summary with leaderboard
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformMetrics {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    #[serde(flatten)]
    pub totals: RevenueTotals,
    pub active_readers: i64,
    pub active_users: i64,
    pub top_readers: Vec<ReaderRanking>,
}

/// key: broker-metrics-aggregator -> read-only summaries over the revenue ledger
#[derive(Clone)]
pub struct MetricsAggregator {
    ledger: Arc<dyn RevenueLedger>,
}

impl MetricsAggregator {
    pub fn new(ledger: Arc<dyn RevenueLedger>) -> Self {
        Self { ledger }
    }

    pub async fn reader_metrics(
        &self,
        reader_id: i32,
        period: MetricsPeriod,
    ) -> BrokerResult<ReaderMetrics> {
        self.reader_metrics_at(reader_id, period, Utc::now()).await
    }

    pub async fn reader_metrics_at(
        &self,
        reader_id: i32,
        period: MetricsPeriod,
        now: DateTime<Utc>,
    ) -> BrokerResult<ReaderMetrics> {
        let (period_start, period_end) = period.resolve(now)?;
        let rows = self
            .ledger
            .metrics_between(Some(reader_id), period_start, period_end)
            .await?;
        debug!(reader_id, rows = rows.len(), %period_start, %period_end, "reader metrics window loaded");
        Ok(ReaderMetrics {
            reader_id,
            period_start,
            period_end,
            totals: totals(rows.iter()),
        })
    }

    pub async fn platform_metrics(&self, period: MetricsPeriod) -> BrokerResult<PlatformMetrics> {
        self.platform_metrics_at(period, Utc::now()).await
    }

    pub async fn platform_metrics_at(
        &self,
        period: MetricsPeriod,
        now: DateTime<Utc>,
    ) -> BrokerResult<PlatformMetrics> {
        let (period_start, period_end) = period.resolve(now)?;
        let rows = self
            .ledger
            .metrics_between(None, period_start, period_end)
            .await?;
        debug!(rows = rows.len(), %period_start, %period_end, "platform metrics window loaded");

        let mut by_reader: BTreeMap<i32, Vec<&RevenueMetric>> = BTreeMap::new();
        for row in &rows {
            by_reader.entry(row.reader_id).or_default().push(row);
        }
        let active_users = rows
            .iter()
            .map(|row| row.user_id)
            .collect::<HashSet<_>>()
            .len();

        Ok(PlatformMetrics {
            period_start,
            period_end,
            totals: totals(rows.iter()),
            active_readers: by_reader.len() as i64,
            active_users: active_users as i64,
            top_readers: rank_readers(&by_reader),
        })
    }
}

fn totals<'a>(rows: impl Iterator<Item = &'a RevenueMetric>) -> RevenueTotals {
    let mut work_units: HashSet<Uuid> = HashSet::new();
    let mut summary = RevenueTotals::default();
    for row in rows {
        if let Some(work_unit_id) = row.work_unit_id {
            work_units.insert(work_unit_id);
        }
        summary.total_reader_share += row.reader_share;
        summary.total_platform_fee += row.platform_fee;
        summary.total_gross += row.gross_amount;
    }
    summary.work_units = work_units.len() as i64;
    summary
}

// BTreeMap iteration plus a stable sort keeps equal shares in ascending reader order.
fn rank_readers(by_reader: &BTreeMap<i32, Vec<&RevenueMetric>>) -> Vec<ReaderRanking> {
    let mut ranking: Vec<ReaderRanking> = by_reader
        .iter()
        .map(|(reader_id, rows)| ReaderRanking {
            reader_id: *reader_id,
            totals: totals(rows.iter().copied()),
        })
        .collect();
    ranking.sort_by(|a, b| b.totals.total_reader_share.cmp(&a.totals.total_reader_share));
    ranking.truncate(TOP_READER_LIMIT);
    ranking
}
