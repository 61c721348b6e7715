use chrono::{DateTime, Utc};

/// Two modification times are equivalent iff their UTC representations
/// differ by strictly less than one second. Missing times on either side
/// imply non-equivalence (spec §5, "Time equivalence").
pub fn times_equivalent(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let diff = (a - b).num_milliseconds().abs();
            diff < 1000
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_999ms_equivalent() {
        assert!(times_equivalent(Some(t(0)), Some(t(999))));
    }

    #[test]
    fn test_1001ms_not_equivalent() {
        assert!(!times_equivalent(Some(t(0)), Some(t(1001))));
    }

    #[test]
    fn test_missing_time_not_equivalent() {
        assert!(!times_equivalent(None, Some(t(0))));
        assert!(!times_equivalent(Some(t(0)), None));
        assert!(!times_equivalent(None, None));
    }
}
