use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

const SIGNATURE_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// 区间粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    Day,
    Month,
    Year,
    All,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "DAY",
            Granularity::Month => "MONTH",
            Granularity::Year => "YEAR",
            Granularity::All => "ALL",
        }
    }
}

impl FromStr for Granularity {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DAY" => Ok(Granularity::Day),
            "MONTH" => Ok(Granularity::Month),
            "YEAR" => Ok(Granularity::Year),
            "ALL" => Ok(Granularity::All),
            _ => Err(SyncError::Configuration(format!("Invalid granularity: {s}"))),
        }
    }
}

/// 增量拉取的时间区间
///
/// `lower` 包含，`upper` 不包含。区间的签名用于判断是否需要重新拉取。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub granularity: Granularity,
    pub lower: DateTime<Utc>,
    pub upper: DateTime<Utc>,
}

fn start_of(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl TimeInterval {
    /// 包含时间点 `t` 的区间
    pub fn new(granularity: Granularity, t: DateTime<Utc>) -> Self {
        let (lower, upper) = match granularity {
            Granularity::Day => {
                let lower = start_of(t.year(), t.month(), t.day());
                (lower, lower + Duration::days(1))
            }
            Granularity::Month => {
                let lower = start_of(t.year(), t.month(), 1);
                let upper = if t.month() == 12 {
                    start_of(t.year() + 1, 1, 1)
                } else {
                    start_of(t.year(), t.month() + 1, 1)
                };
                (lower, upper)
            }
            Granularity::Year => (start_of(t.year(), 1, 1), start_of(t.year() + 1, 1, 1)),
            Granularity::All => (DateTime::<Utc>::UNIX_EPOCH, start_of(9999, 12, 31)),
        };
        Self {
            granularity,
            lower,
            upper,
        }
    }

    pub fn all() -> Self {
        Self::new(Granularity::All, Utc::now())
    }

    /// 在签名存储中使用的键
    pub fn key(&self) -> String {
        match self.granularity {
            Granularity::Day => format!("DAY:{}", self.lower.format("%Y-%m-%d")),
            Granularity::Month => format!("MONTH:{}", self.lower.format("%Y-%m")),
            Granularity::Year => format!("YEAR:{}", self.lower.format("%Y")),
            Granularity::All => "ALL".to_string(),
        }
    }

    /// 已经关闭且落在刷新窗口之外的区间签名固定为上界，
    /// 否则签名随当前时间变化，保证每次都会重新拉取。
    pub fn calculate_signature_from(&self, now: DateTime<Utc>, refresh_window: Duration) -> String {
        if self.upper < now - refresh_window {
            self.upper.format(SIGNATURE_LAYOUT).to_string()
        } else {
            now.format(SIGNATURE_LAYOUT).to_string()
        }
    }

    pub fn lower_bound_string(&self) -> String {
        self.lower.format(SIGNATURE_LAYOUT).to_string()
    }

    pub fn upper_bound_string(&self) -> String {
        self.upper.format(SIGNATURE_LAYOUT).to_string()
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_interval_bounds() {
        let t = Utc.with_ymd_and_hms(2024, 3, 15, 13, 45, 0).unwrap();
        let interval = TimeInterval::new(Granularity::Day, t);
        assert_eq!(interval.lower, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());
        assert_eq!(interval.upper, Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap());
        assert_eq!(interval.key(), "DAY:2024-03-15");
    }

    #[test]
    fn test_month_interval_wraps_year() {
        let t = Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap();
        let interval = TimeInterval::new(Granularity::Month, t);
        assert_eq!(interval.upper, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(interval.key(), "MONTH:2023-12");
    }

    #[test]
    fn test_closed_interval_has_stable_signature() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let interval = TimeInterval::new(Granularity::Day, t);
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let first = interval.calculate_signature_from(now, Duration::days(1));
        let later = interval.calculate_signature_from(now + Duration::hours(5), Duration::days(1));
        assert_eq!(first, later);
    }

    #[test]
    fn test_open_interval_signature_follows_now() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let interval = TimeInterval::new(Granularity::Day, now);

        let first = interval.calculate_signature_from(now, Duration::days(1));
        let later =
            interval.calculate_signature_from(now + Duration::minutes(1), Duration::days(1));
        assert_ne!(first, later);
    }

    #[test]
    fn test_all_interval_key() {
        assert_eq!(TimeInterval::all().key(), "ALL");
        assert_eq!("all".parse::<Granularity>().unwrap(), Granularity::All);
    }
}
