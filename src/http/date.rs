//! HTTP-date handling (RFC 9110 §5.6.7) on top of [`httpdate`].
//!
//! HTTP dates carry whole seconds, so every comparison against a stored
//! timestamp truncates the stored value first.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Formats `time` as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

/// Parses any of the three HTTP-date formats. Returns `None` when malformed.
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value.trim()).ok()
}

/// Drops the sub-second part of `time`.
pub fn truncate_to_secs(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => UNIX_EPOCH + Duration::from_secs(since.as_secs()),
        Err(_) => time,
    }
}

/// Returns `true` when an `If-Modified-Since` value shows the client already
/// holds a representation at least as new as `last_modified`.
///
/// A missing or unparseable header never validates.
pub fn not_modified_since(if_modified_since: Option<&str>, last_modified: SystemTime) -> bool {
    let Some(since) = if_modified_since.and_then(parse_http_date) else {
        return false;
    };
    since >= truncate_to_secs(last_modified)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn formats_rfc1123() {
        assert_eq!(format_http_date(at(784111777)), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_http_date("yesterday"), None);
        assert_eq!(
            parse_http_date(" Sun, 06 Nov 1994 08:49:37 GMT "),
            Some(at(784111777))
        );
    }

    #[test]
    fn equal_or_later_header_is_fresh() {
        let stored = at(784111777) + Duration::from_millis(450);
        assert!(not_modified_since(Some("Sun, 06 Nov 1994 08:49:37 GMT"), stored));
        assert!(not_modified_since(Some("Sun, 06 Nov 1994 08:50:00 GMT"), stored));
        assert!(!not_modified_since(Some("Sun, 06 Nov 1994 08:49:36 GMT"), stored));
    }

    #[test]
    fn missing_header_is_stale() {
        assert!(!not_modified_since(None, at(0)));
        assert!(!not_modified_since(Some("not a date"), at(0)));
    }
}
