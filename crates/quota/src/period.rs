use chrono::{DateTime, Datelike, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

/// Length of a quota billing cycle.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    /// Calendar month, landing on an anchor day clamped to the month's length.
    #[default]
    Monthly,
    /// Fixed number of days; zero is treated as one.
    Days(u32),
}

impl BillingPeriod {
    /// `from` moved forward by one period, anchored on `from`'s own day.
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        self.advance_anchored(from, from.day())
    }

    /// `from` moved forward by exactly one period. Monthly steps land on
    /// `anchor_day` of the following month (or its last day when shorter),
    /// so a clamped February does not pull later boundaries earlier.
    pub fn advance_anchored(&self, from: DateTime<Utc>, anchor_day: u32) -> DateTime<Utc> {
        match self {
            BillingPeriod::Monthly => next_month_on(from, anchor_day).unwrap_or(from + Duration::days(30)),
            BillingPeriod::Days(n) => from + Duration::days(i64::from((*n).max(1))),
        }
    }
}

fn next_month_on(from: DateTime<Utc>, anchor_day: u32) -> Option<DateTime<Utc>> {
    let first = from.with_day(1)?.checked_add_months(Months::new(1))?;
    let after = first.checked_add_months(Months::new(1))?;
    let month_len = u32::try_from((after.date_naive() - first.date_naive()).num_days()).ok()?;
    first.with_day(anchor_day.clamp(1, month_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn monthly_advances_calendar_month() {
        assert_eq!(BillingPeriod::Monthly.advance(at(2026, 1, 15)), at(2026, 2, 15));
        assert_eq!(BillingPeriod::Monthly.advance(at(2026, 1, 31)), at(2026, 2, 28));
        assert_eq!(BillingPeriod::Monthly.advance(at(2026, 12, 10)), at(2027, 1, 10));
    }

    #[test]
    fn monthly_keeps_anchor_day_through_short_months() {
        let p = BillingPeriod::Monthly;
        let feb = p.advance_anchored(at(2026, 1, 31), 31);
        let mar = p.advance_anchored(feb, 31);
        let apr = p.advance_anchored(mar, 31);
        assert_eq!((feb, mar, apr), (at(2026, 2, 28), at(2026, 3, 31), at(2026, 4, 30)));
        assert_eq!(p.advance_anchored(at(2028, 1, 30), 30), at(2028, 2, 29));
    }

    #[test]
    fn monthly_keeps_time_of_day() {
        let from = Utc.with_ymd_and_hms(2026, 5, 20, 13, 45, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 6, 20, 13, 45, 0).unwrap();
        assert_eq!(BillingPeriod::Monthly.advance(from), expected);
    }

    #[test]
    fn days_period() {
        assert_eq!(BillingPeriod::Days(7).advance(at(2026, 3, 1)), at(2026, 3, 8));
        assert_eq!(BillingPeriod::Days(0).advance(at(2026, 3, 1)), at(2026, 3, 2));
        assert_eq!(BillingPeriod::Days(10).advance_anchored(at(2026, 1, 1), 31), at(2026, 1, 11));
    }
}
