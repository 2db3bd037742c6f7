//! Period-key computation shared by every time operator (spec.md §4.5
//! preamble): stamp each event with a canonical `day`/`week`/`month` key
//! derived from its occurrence timestamp, UTC.

use chrono::{DateTime, Datelike, IsoWeek, Utc};

use super::tree::PeriodType;

pub fn period_key(period_type: PeriodType, at: DateTime<Utc>) -> String {
    match period_type {
        PeriodType::Day => at.format("%Y-%m-%d").to_string(),
        PeriodType::Week => {
            let week: IsoWeek = at.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        PeriodType::Month => at.format("%Y-%m").to_string(),
    }
}

pub fn is_weekend(at: DateTime<Utc>) -> bool {
    matches!(at.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_key_format() {
        let t = Utc.with_ymd_and_hms(2023, 12, 15, 8, 30, 0).unwrap();
        assert_eq!(period_key(PeriodType::Day, t), "2023-12-15");
    }

    #[test]
    fn week_key_is_monday_first_iso() {
        // 2023-12-15 is a Friday, ISO week 50
        let t = Utc.with_ymd_and_hms(2023, 12, 15, 8, 30, 0).unwrap();
        assert_eq!(period_key(PeriodType::Week, t), "2023-W50");
    }

    #[test]
    fn month_key_format() {
        let t = Utc.with_ymd_and_hms(2023, 12, 15, 8, 30, 0).unwrap();
        assert_eq!(period_key(PeriodType::Month, t), "2023-12");
    }

    #[test]
    fn weekend_detection() {
        let sat = Utc.with_ymd_and_hms(2023, 12, 16, 0, 0, 0).unwrap();
        let mon = Utc.with_ymd_and_hms(2023, 12, 18, 0, 0, 0).unwrap();
        assert!(is_weekend(sat));
        assert!(!is_weekend(mon));
    }
}
