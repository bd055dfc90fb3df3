use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Attribute holding the timestamp of a point.
pub const TIME_ATTRIBUTE: &str = "Time";

/// Date column value for records without a usable timestamp.
pub const UNKNOWN_DATE: &str = "unknown";

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in NAIVE_FORMATS {
                if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(Utc.from_utc_datetime(&ndt));
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|ndt| Utc.from_utc_datetime(&ndt))
        }
        Value::Number(n) => match n.as_i64() {
            Some(secs) => Utc.timestamp_opt(secs, 0).single(),
            None => n.as_f64().and_then(from_fractional_secs),
        },
        _ => None,
    }
}

/// Epoch seconds with a fraction, rounded down to the nanosecond.
fn from_fractional_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs.abs() > i64::MAX as f64 {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}

/// UTC calendar date of a timestamp attribute, as `YYYY-MM-DD`, or
/// [`UNKNOWN_DATE`].
pub fn utc_date(value: Option<&Value>) -> String {
    value
        .and_then(parse_timestamp)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| UNKNOWN_DATE.to_string())
}

#[cfg(test)]
mod tests {
    use super::{utc_date, UNKNOWN_DATE};
    use serde_json::json;

    #[test]
    fn dates_are_normalized_to_utc() {
        assert_eq!(utc_date(Some(&json!("2021-06-30T23:30:00-02:00"))), "2021-07-01");
        assert_eq!(utc_date(Some(&json!("2021-06-30T23:30:00Z"))), "2021-06-30");
        assert_eq!(utc_date(Some(&json!("2021-06-30 08:15:00"))), "2021-06-30");
        assert_eq!(utc_date(Some(&json!("2021-06-30"))), "2021-06-30");
        assert_eq!(utc_date(Some(&json!(86400))), "1970-01-02");
        assert_eq!(utc_date(Some(&json!(1625140800.5))), "2021-07-01");
        assert_eq!(utc_date(Some(&json!(86399.999))), "1970-01-01");
        assert_eq!(utc_date(Some(&json!(-0.5))), "1969-12-31");
    }

    #[test]
    fn unusable_timestamps_are_unknown() {
        assert_eq!(utc_date(None), UNKNOWN_DATE);
        assert_eq!(utc_date(Some(&json!(null))), UNKNOWN_DATE);
        assert_eq!(utc_date(Some(&json!("yesterday"))), UNKNOWN_DATE);
        assert_eq!(utc_date(Some(&json!(["2021-06-30"]))), UNKNOWN_DATE);
    }
}
