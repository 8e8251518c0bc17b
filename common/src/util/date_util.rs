use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// 当前时间（毫秒）
pub fn now() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// 生日在 today 之后（含当天）的下一次日期；2 月 29 日在非闰年落到 3 月 1 日
pub fn next_anniversary(date: NaiveDate, today: NaiveDate) -> NaiveDate {
    let in_year = |year: i32| {
        NaiveDate::from_ymd_opt(year, date.month(), date.day())
            .or_else(|| NaiveDate::from_ymd_opt(year, 3, 1))
            .unwrap_or(today)
    };
    let this_year = in_year(today.year());
    if this_year < today { in_year(today.year() + 1) } else { this_year }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn anniversary_rolls_to_next_year_once_passed() {
        assert_eq!(next_anniversary(d(1990, 3, 10), d(2026, 3, 1)), d(2026, 3, 10));
        assert_eq!(next_anniversary(d(1990, 3, 10), d(2026, 3, 10)), d(2026, 3, 10));
        assert_eq!(next_anniversary(d(1990, 1, 5), d(2026, 3, 1)), d(2027, 1, 5));
    }

    #[test]
    fn leap_day_falls_back_to_march_first() {
        assert_eq!(next_anniversary(d(2000, 2, 29), d(2026, 2, 1)), d(2026, 3, 1));
        assert_eq!(next_anniversary(d(2000, 2, 29), d(2027, 12, 1)), d(2028, 2, 29));
    }

    #[test]
    fn millis_round_trip() {
        let ts = now();
        assert_eq!(from_millis(ts).unwrap().timestamp_millis(), ts);
    }
}
