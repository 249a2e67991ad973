//! Targeting rule definitions.
//!
//! Every dimension is optional and independent. Rules arrive as JSON from
//! the management layer; a dimension whose JSON does not fit its shape is
//! dropped on load (logged, counted) instead of failing the whole rule, so a
//! bad dimension can never hide an otherwise eligible advertisement.

use chrono::{NaiveDate, Weekday};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetingRule {
    #[serde(default, deserialize_with = "lenient")]
    pub devices: Option<DeviceTargeting>,
    #[serde(default, deserialize_with = "lenient")]
    pub audience: Option<AudienceTargeting>,
    #[serde(default, deserialize_with = "lenient")]
    pub browsers: Option<ListFilter>,
    #[serde(default, deserialize_with = "lenient")]
    pub operating_systems: Option<ListFilter>,
    /// Substring patterns matched against the referrer.
    #[serde(default, deserialize_with = "lenient")]
    pub referrers: Option<ListFilter>,
    #[serde(default, deserialize_with = "lenient")]
    pub apps: Option<ListFilter>,
    /// Glob patterns (`*`, `?`) matched against the current URL.
    #[serde(default, deserialize_with = "lenient")]
    pub urls: Option<ListFilter>,
    #[serde(default, deserialize_with = "lenient")]
    pub weekdays: Option<Vec<Weekday>>,
    #[serde(default, deserialize_with = "lenient")]
    pub hours: Option<HourWindow>,
    #[serde(default, deserialize_with = "lenient")]
    pub dates: Option<DateWindow>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceTargeting {
    #[serde(default = "default_true")]
    pub desktop: bool,
    #[serde(default = "default_true")]
    pub mobile: bool,
    #[serde(default = "default_true")]
    pub tablet: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudienceTargeting {
    #[serde(default = "default_true")]
    pub authenticated: bool,
    #[serde(default = "default_true")]
    pub anonymous: bool,
}

/// Include/exclude pair for one dimension. An empty side is no restriction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl ListFilter {
    pub fn include(values: &[&str]) -> Self {
        Self {
            include: values.iter().map(|v| v.to_string()).collect(),
            exclude: Vec::new(),
        }
    }

    pub fn exclude(values: &[&str]) -> Self {
        Self {
            include: Vec::new(),
            exclude: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.include.iter().all(|v| v.trim().is_empty())
            && self.exclude.iter().all(|v| v.trim().is_empty())
    }
}

/// Inclusive hour-of-day window in local time. `start > end` wraps past
/// midnight (22..=3 covers late evening and early morning).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn is_valid(&self) -> bool {
        self.start <= 23 && self.end <= 23
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            (self.start..=self.end).contains(&hour)
        } else {
            hour >= self.start || hour <= self.end
        }
    }
}

/// Inclusive absolute date window in local time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateWindow {
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn is_valid(&self) -> bool {
        match (self.start, self.end) {
            (Some(start), Some(end)) => start <= end,
            _ => true,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| s <= date) && self.end.map_or(true, |e| date <= e)
    }
}

fn default_true() -> bool {
    true
}

/// Decode an optional value, turning a value of the wrong shape into `None`
/// with a warning instead of an error.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value::<T>(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            metrics::counter!("targeting.malformed_dimension").increment(1);
            warn!(
                dimension = std::any::type_name::<T>(),
                error = %e,
                "Dropping malformed targeting dimension"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_dimension_is_dropped() {
        let rule: TargetingRule = serde_json::from_value(serde_json::json!({
            "browsers": { "include": ["chrome"] },
            "hours": "nine to five",
            "weekdays": [1, 2, 3],
            "apps": null
        }))
        .unwrap();

        assert_eq!(rule.browsers, Some(ListFilter::include(&["chrome"])));
        assert!(rule.hours.is_none());
        assert!(rule.weekdays.is_none());
        assert!(rule.apps.is_none());
    }

    #[test]
    fn test_weekday_names() {
        let rule: TargetingRule = serde_json::from_value(serde_json::json!({
            "weekdays": ["Mon", "saturday"]
        }))
        .unwrap();
        assert_eq!(rule.weekdays, Some(vec![Weekday::Mon, Weekday::Sat]));
    }

    #[test]
    fn test_hour_window_wraps() {
        let day = HourWindow { start: 9, end: 17 };
        assert!(day.contains(9) && day.contains(17));
        assert!(!day.contains(18));

        let night = HourWindow { start: 22, end: 3 };
        assert!(night.contains(23) && night.contains(0) && night.contains(3));
        assert!(!night.contains(12));

        assert!(!HourWindow { start: 9, end: 24 }.is_valid());
    }

    #[test]
    fn test_date_window() {
        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        let window = DateWindow {
            start: Some(d("2026-06-01")),
            end: Some(d("2026-06-30")),
        };
        assert!(window.is_valid());
        assert!(window.contains(d("2026-06-30")));
        assert!(!window.contains(d("2026-07-01")));

        let inverted = DateWindow {
            start: Some(d("2026-07-01")),
            end: Some(d("2026-06-01")),
        };
        assert!(!inverted.is_valid());
    }

    #[test]
    fn test_empty_list_filter() {
        assert!(ListFilter::default().is_empty());
        assert!(ListFilter::include(&["  "]).is_empty());
        assert!(!ListFilter::exclude(&["windows"]).is_empty());
    }
}
