//! Follower statistics over long date ranges.
//!
//! The platform answers statistics queries for short spans only, so a long
//! range is cut into contiguous windows and the answers are stitched back
//! together.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

use crate::types::{UserCumulate, UserSummary};

/// The platform closes statistics days on China Standard Time.
const PLATFORM_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Longest span, in days, a single follower statistics query may cover.
pub const USER_STATS_SPLIT_DAYS: i64 = 7;

/// Longest span, in days, a caller may request in one go.
pub const USER_STATS_MAX_DAYS: i64 = 35;

/// Half-open date window `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub begin: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Last day inside the window; the platform takes inclusive end dates.
    pub fn last_day(&self) -> NaiveDate {
        self.end.pred_opt().unwrap_or(self.end).max(self.begin)
    }
}

/// The current date on the platform's calendar.
pub fn platform_today(now: DateTime<Utc>) -> NaiveDate {
    match FixedOffset::east_opt(PLATFORM_UTC_OFFSET_SECS) {
        Some(offset) => now.with_timezone(&offset).date_naive(),
        None => now.date_naive(),
    }
}

/// Cut `[begin, end)` into windows of at most `split`.
///
/// Bounds may be given in either order. `end` is clamped to yesterday, the
/// range is widened to at least one day and narrowed to at most `max`
/// (moving `end`, never `begin`). The last window may be shorter.
pub fn split_date_range(
    begin: NaiveDate,
    end: NaiveDate,
    split: Duration,
    max: Duration,
    today: NaiveDate,
) -> Vec<DateRange> {
    let (mut begin, mut end) = if begin > end { (end, begin) } else { (begin, end) };

    let yesterday = today - Duration::days(1);
    if end > yesterday {
        end = yesterday;
    }
    if end - begin < Duration::days(1) {
        begin = end - Duration::days(1);
    }
    if end - begin > max {
        end = begin + max;
    }

    let split = if split < Duration::days(1) {
        Duration::days(1)
    } else {
        split
    };

    let mut windows = Vec::new();
    while begin < end {
        let next = if end - begin > split { begin + split } else { end };
        windows.push(DateRange { begin, end: next });
        begin = next;
    }
    windows
}

/// Follower totals over a range, with per-day detail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserStatistics {
    /// Total followers on the latest day of the range.
    pub cumulate_user: i64,
    pub new_user: i64,
    pub cancel_user: i64,
    pub days: Vec<DailyStatistics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyStatistics {
    pub ref_date: String,
    pub cumulate_user: i64,
    pub new_user: i64,
    pub cancel_user: i64,
    /// Per-channel detail of the day.
    pub summaries: Vec<UserSummary>,
}

impl UserStatistics {
    /// Fold per-channel summaries into the daily cumulative counts.
    pub fn aggregate(summaries: &[UserSummary], cumulates: &[UserCumulate]) -> Self {
        let mut stats = Self::default();

        for cumulate in cumulates {
            let day_summaries: Vec<UserSummary> = summaries
                .iter()
                .filter(|s| s.ref_date == cumulate.ref_date)
                .cloned()
                .collect();
            let day = DailyStatistics {
                ref_date: cumulate.ref_date.clone(),
                cumulate_user: cumulate.cumulate_user,
                new_user: day_summaries.iter().map(|s| s.new_user).sum(),
                cancel_user: day_summaries.iter().map(|s| s.cancel_user).sum(),
                summaries: day_summaries,
            };
            stats.new_user += day.new_user;
            stats.cancel_user += day.cancel_user;
            stats.days.push(day);
        }

        stats.cumulate_user = stats
            .days
            .iter()
            .max_by(|a, b| a.ref_date.cmp(&b.ref_date))
            .map(|d| d.cumulate_user)
            .unwrap_or_default();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_five_weekly_windows() {
        let windows = split_date_range(
            date(2020, 11, 1),
            date(2021, 1, 1),
            Duration::days(7),
            Duration::days(35),
            date(2021, 11, 1),
        );

        let expected = [
            (date(2020, 11, 1), date(2020, 11, 8)),
            (date(2020, 11, 8), date(2020, 11, 15)),
            (date(2020, 11, 15), date(2020, 11, 22)),
            (date(2020, 11, 22), date(2020, 11, 29)),
            (date(2020, 11, 29), date(2020, 12, 6)),
        ];
        assert_eq!(windows.len(), 5);
        for (window, (begin, end)) in windows.iter().zip(expected) {
            assert_eq!(window.begin, begin);
            assert_eq!(window.end, end);
        }
        assert_eq!(windows[0].last_day(), date(2020, 11, 7));
    }

    #[test]
    fn test_reversed_bounds_and_short_tail() {
        let windows = split_date_range(
            date(2021, 3, 10),
            date(2021, 3, 1),
            Duration::days(7),
            Duration::days(35),
            date(2021, 11, 1),
        );
        assert_eq!(
            windows,
            vec![
                DateRange {
                    begin: date(2021, 3, 1),
                    end: date(2021, 3, 8)
                },
                DateRange {
                    begin: date(2021, 3, 8),
                    end: date(2021, 3, 10)
                },
            ]
        );
    }

    #[test]
    fn test_end_clamped_to_yesterday() {
        let windows = split_date_range(
            date(2021, 10, 28),
            date(2021, 12, 31),
            Duration::days(7),
            Duration::days(35),
            date(2021, 11, 1),
        );
        assert_eq!(
            windows,
            vec![DateRange {
                begin: date(2021, 10, 28),
                end: date(2021, 10, 31)
            }]
        );
    }

    #[test]
    fn test_minimum_one_day() {
        let windows = split_date_range(
            date(2021, 11, 5),
            date(2021, 11, 9),
            Duration::days(7),
            Duration::days(35),
            date(2021, 11, 1),
        );
        // Both bounds are in the future: end drops to yesterday and begin
        // is moved one day before it.
        assert_eq!(
            windows,
            vec![DateRange {
                begin: date(2021, 10, 30),
                end: date(2021, 10, 31)
            }]
        );
    }

    #[test]
    fn test_platform_today_uses_platform_calendar() {
        // 17:00 UTC is already the next day on the platform's calendar.
        let now = Utc.with_ymd_and_hms(2021, 10, 31, 17, 0, 0).unwrap();
        assert_eq!(platform_today(now), date(2021, 11, 1));
    }

    #[test]
    fn test_aggregate_statistics() {
        let summaries = vec![
            UserSummary {
                ref_date: "2021-03-01".into(),
                user_source: 0,
                new_user: 3,
                cancel_user: 1,
            },
            UserSummary {
                ref_date: "2021-03-01".into(),
                user_source: 30,
                new_user: 2,
                cancel_user: 0,
            },
            UserSummary {
                ref_date: "2021-03-02".into(),
                user_source: 0,
                new_user: 1,
                cancel_user: 4,
            },
        ];
        let cumulates = vec![
            UserCumulate {
                ref_date: "2021-03-02".into(),
                cumulate_user: 101,
            },
            UserCumulate {
                ref_date: "2021-03-01".into(),
                cumulate_user: 104,
            },
        ];

        let stats = UserStatistics::aggregate(&summaries, &cumulates);
        assert_eq!(stats.new_user, 6);
        assert_eq!(stats.cancel_user, 5);
        assert_eq!(stats.cumulate_user, 101);
        assert_eq!(stats.days[1].new_user, 5);
        assert_eq!(stats.days[1].summaries.len(), 2);
    }
}
