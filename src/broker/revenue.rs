use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;
use uuid::Uuid;

use crate::error::{BrokerError, BrokerResult};

use super::models::{round_cents, RevenueMetric, RevenueSplit, SubscriptionVariant};
use super::store::{IdentityDirectory, ReaderDirectory, RevenueLedger};

/// key: broker-revenue-allocator -> commission split and ledger append
#[derive(Clone)]
pub struct RevenueAllocator {
    users: Arc<dyn IdentityDirectory>,
    readers: Arc<dyn ReaderDirectory>,
    ledger: Arc<dyn RevenueLedger>,
}

impl RevenueAllocator {
    pub fn new(
        users: Arc<dyn IdentityDirectory>,
        readers: Arc<dyn ReaderDirectory>,
        ledger: Arc<dyn RevenueLedger>,
    ) -> Self {
        Self {
            users,
            readers,
            ledger,
        }
    }

    pub async fn calculate_split(
        &self,
        reader_id: i32,
        gross_amount: Decimal,
    ) -> BrokerResult<RevenueSplit> {
        let reader = self
            .readers
            .find_reader(reader_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("reader", reader_id))?;
        split_amount(gross_amount, reader.commission_percentage.value())
    }

    pub async fn record_revenue(
        &self,
        reader_id: i32,
        user_id: i32,
        variant: SubscriptionVariant,
        gross_amount: Decimal,
        work_unit_id: Option<Uuid>,
    ) -> BrokerResult<RevenueMetric> {
        self.record_revenue_at(
            reader_id,
            user_id,
            variant,
            gross_amount,
            work_unit_id,
            Utc::now(),
        )
        .await
    }

    pub async fn record_revenue_at(
        &self,
        reader_id: i32,
        user_id: i32,
        variant: SubscriptionVariant,
        gross_amount: Decimal,
        work_unit_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> BrokerResult<RevenueMetric> {
        if self.users.find_user(user_id).await?.is_none() {
            return Err(BrokerError::not_found("user", user_id));
        }
        let split = self.calculate_split(reader_id, gross_amount).await?;
        let (period_start, period_end) = month_bounds(now);

        let metric = RevenueMetric {
            id: Uuid::new_v4(),
            reader_id,
            user_id,
            work_unit_id,
            variant,
            reader_share: split.reader_share,
            platform_fee: split.platform_fee,
            gross_amount: split.gross_amount,
            commission_percentage: split.commission_percentage,
            calculated_at: now,
            period_start,
            period_end,
        };
        self.ledger.append_metric(&metric).await?;

        info!(
            metric = %metric.id,
            reader_id,
            user_id,
            work_unit = ?metric.work_unit_id,
            variant = variant.as_str(),
            gross = %metric.gross_amount,
            reader_share = %metric.reader_share,
            platform_fee = %metric.platform_fee,
            "revenue recorded"
        );
        Ok(metric)
    }
}

/// Largest amount the ledger's `NUMERIC(14, 2)` money columns can hold.
pub const MAX_GROSS_AMOUNT: Decimal = dec!(999999999999.99);

/// Splits `gross_amount` so that the two halves always add back up to the cent.
///
/// The fee is rounded once and the reader share is derived from it by subtraction.
pub fn split_amount(
    gross_amount: Decimal,
    commission_percentage: Decimal,
) -> BrokerResult<RevenueSplit> {
    if gross_amount.is_sign_negative() && !gross_amount.is_zero() {
        return Err(BrokerError::InvalidArgument(format!(
            "gross amount {gross_amount} must not be negative"
        )));
    }
    if gross_amount > MAX_GROSS_AMOUNT {
        return Err(BrokerError::InvalidArgument(format!(
            "gross amount {gross_amount} exceeds {MAX_GROSS_AMOUNT}"
        )));
    }
    if commission_percentage < Decimal::ZERO || commission_percentage > dec!(100) {
        return Err(BrokerError::InvalidState(format!(
            "commission percentage {commission_percentage} outside [0, 100]"
        )));
    }

    let gross_amount = round_cents(gross_amount);
    let platform_fee = gross_amount
        .checked_mul(commission_percentage)
        .and_then(|scaled| scaled.checked_div(dec!(100)))
        .map(round_cents)
        .ok_or_else(|| {
            BrokerError::InvalidArgument(format!(
                "gross amount {gross_amount} overflows at {commission_percentage}%"
            ))
        })?;
    let reader_share = round_cents(gross_amount - platform_fee);
    Ok(RevenueSplit {
        reader_share,
        platform_fee,
        gross_amount,
        commission_percentage,
    })
}

/// Calendar month containing `at`: first instant through 23:59:59.999 of the last day.
pub fn month_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let first_day = NaiveDate::from_ymd_opt(at.year(), at.month(), 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(at);
    let next_month = first_day
        .checked_add_months(Months::new(1))
        .unwrap_or(first_day);
    (first_day, next_month - Duration::milliseconds(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_rounds_fee_and_derives_share() {
        let split = split_amount(dec!(33.33), dec!(30.0)).unwrap();
        assert_eq!(split.platform_fee, dec!(10.00));
        assert_eq!(split.reader_share, dec!(23.33));
        assert_eq!(split.reader_share + split.platform_fee, dec!(33.33));
    }

    #[test]
    fn split_sums_to_gross_for_awkward_rates() {
        let rates = [
            dec!(0),
            dec!(0.01),
            dec!(12.5),
            dec!(33.33),
            dec!(49.99),
            dec!(66.67),
            dec!(99.99),
            dec!(100),
        ];
        let grosses = [
            dec!(0),
            dec!(0.01),
            dec!(0.05),
            dec!(1.15),
            dec!(9.99),
            dec!(33.33),
            dec!(100.01),
            dec!(12345.67),
        ];
        for rate in rates {
            for gross in grosses {
                let split = split_amount(gross, rate).unwrap();
                assert_eq!(
                    split.reader_share + split.platform_fee,
                    gross,
                    "gross {gross} at {rate}%"
                );
            }
        }
    }

    #[test]
    fn split_uses_half_away_from_zero() {
        // 0.05 * 50% = 0.025 -> 0.03
        let split = split_amount(dec!(0.05), dec!(50)).unwrap();
        assert_eq!(split.platform_fee, dec!(0.03));
        assert_eq!(split.reader_share, dec!(0.02));
    }

    #[test]
    fn split_normalizes_gross_to_cents() {
        let split = split_amount(dec!(10.005), dec!(10)).unwrap();
        assert_eq!(split.gross_amount, dec!(10.01));
        assert_eq!(split.reader_share + split.platform_fee, dec!(10.01));
    }

    #[test]
    fn split_rejects_negative_gross() {
        assert!(matches!(
            split_amount(dec!(-1), dec!(30)),
            Err(BrokerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn split_rejects_amounts_beyond_ledger_precision() {
        assert!(matches!(
            split_amount(Decimal::MAX, dec!(30)),
            Err(BrokerError::InvalidArgument(_))
        ));
        assert!(matches!(
            split_amount(MAX_GROSS_AMOUNT + dec!(0.01), dec!(100)),
            Err(BrokerError::InvalidArgument(_))
        ));

        let split = split_amount(MAX_GROSS_AMOUNT, dec!(100)).unwrap();
        assert_eq!(split.platform_fee, MAX_GROSS_AMOUNT);
        assert_eq!(split.reader_share, dec!(0));
    }

    #[test]
    fn month_bounds_cover_calendar_month() {
        let at = Utc.with_ymd_and_hms(2024, 2, 17, 13, 45, 0).unwrap();
        let (start, end) = month_bounds(at);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(
            end,
            Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap() + Duration::milliseconds(999)
        );
    }

    #[test]
    fn month_bounds_roll_over_year_end() {
        let at = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let (start, end) = month_bounds(at);
        assert_eq!(start, Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(
            end,
            Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap() + Duration::milliseconds(999)
        );
    }
}
