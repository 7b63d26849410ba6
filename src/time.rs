use chrono::{NaiveDate, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Today's calendar date as an ISO `YYYY-MM-DD` string.
///
/// Settlement stamps the generated expense with this; everything else takes
/// the date from the caller.
pub fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Parse a calendar date, rejecting anything that is not a real ISO date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_reasonable() {
        let a = now_ms();
        assert!(a > 1_500_000_000_000); // after 2017
        assert!(a < 4_100_000_000_000); // before year ~2100
    }

    #[test]
    fn today_is_iso_shaped() {
        let d = today();
        assert!(parse_date(&d).is_some());
    }

    #[test]
    fn parse_date_rejects_impossible_days() {
        assert!(parse_date("2024-02-30").is_none());
        assert!(parse_date("2024-13-01").is_none());
        assert!(parse_date("15/03/2024").is_none());
        assert!(parse_date("2024-03-15").is_some());
    }
}
