//! Compost operations: the external activity an observation belongs to.

use jiff::{Timestamp, civil, tz::TimeZone};

/// A compost pile's operation on the activity log and its active window.
///
/// Window bounds are kept as the strings the activity log returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationWindow {
    pub operation_id: String,
    pub pile_name: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl OperationWindow {
    /// The window start as an instant, if present and parseable.
    pub fn starts_at(&self) -> Option<Timestamp> {
        self.start.as_deref().and_then(parse_bound)
    }

    /// The window end as an instant, if present and parseable.
    pub fn ends_at(&self) -> Option<Timestamp> {
        self.end.as_deref().and_then(parse_bound)
    }
}

/// Parses a window bound. Bounds without an offset are taken as UTC.
fn parse_bound(s: &str) -> Option<Timestamp> {
    if let Ok(ts) = s.parse::<Timestamp>() {
        return Some(ts);
    }
    if let Ok(dt) = s.parse::<civil::DateTime>() {
        return dt.to_zoned(TimeZone::UTC).ok().map(|z| z.timestamp());
    }
    s.parse::<civil::Date>()
        .ok()
        .and_then(|d| d.to_zoned(TimeZone::UTC).ok())
        .map(|z| z.timestamp())
}
