//! Eligibility filter chain.
//!
//! Each stage is a pure predicate over one targeting dimension and the
//! request context. Stages are independent, so their order never changes
//! the outcome. An absent dimension passes; within a dimension an exclude
//! match always beats an include match. Data that cannot be evaluated is
//! reported as [`Verdict::Malformed`] and treated as no restriction.

use crate::catalog::Candidate;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike};
use loomads_core::targeting::{
    AudienceTargeting, DateWindow, DeviceTargeting, HourWindow, ListFilter, TargetingRule,
};
use loomads_core::types::{Advertisement, DeviceClass, RequestContext};
use tracing::{debug, warn};

/// The request as seen by the filters, with the local clock resolved once.
pub struct EvalContext<'a> {
    pub request: &'a RequestContext,
    pub local_time: DateTime<FixedOffset>,
}

impl<'a> EvalContext<'a> {
    pub fn new(request: &'a RequestContext, offset: FixedOffset) -> Self {
        Self {
            request,
            local_time: request.timestamp.with_timezone(&offset),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject,
    Malformed(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStage {
    Device,
    Audience,
    Browser,
    OperatingSystem,
    Referrer,
    Weekday,
    HourOfDay,
    DateRange,
    App,
    Url,
}

impl FilterStage {
    pub const ALL: [FilterStage; 10] = [
        FilterStage::Device,
        FilterStage::Audience,
        FilterStage::Browser,
        FilterStage::OperatingSystem,
        FilterStage::Referrer,
        FilterStage::Weekday,
        FilterStage::HourOfDay,
        FilterStage::DateRange,
        FilterStage::App,
        FilterStage::Url,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterStage::Device => "device",
            FilterStage::Audience => "audience",
            FilterStage::Browser => "browser",
            FilterStage::OperatingSystem => "os",
            FilterStage::Referrer => "referrer",
            FilterStage::Weekday => "weekday",
            FilterStage::HourOfDay => "hour",
            FilterStage::DateRange => "date",
            FilterStage::App => "app",
            FilterStage::Url => "url",
        }
    }

    pub fn check(&self, rule: &TargetingRule, ctx: &EvalContext<'_>) -> Verdict {
        let req = ctx.request;
        match self {
            FilterStage::Device => check_device(rule.devices.as_ref(), req.device),
            FilterStage::Audience => check_audience(rule.audience.as_ref(), req.authenticated),
            FilterStage::Browser => {
                check_list(rule.browsers.as_ref(), req.browser.as_deref(), equals_ignore_case)
            }
            FilterStage::OperatingSystem => {
                check_list(rule.operating_systems.as_ref(), req.os.as_deref(), equals_ignore_case)
            }
            FilterStage::Referrer => {
                check_list(rule.referrers.as_ref(), req.referrer.as_deref(), contains_ignore_case)
            }
            FilterStage::Weekday => check_weekday(rule.weekdays.as_deref(), ctx.local_time.weekday()),
            FilterStage::HourOfDay => check_hours(rule.hours.as_ref(), ctx.local_time.hour()),
            FilterStage::DateRange => check_dates(rule.dates.as_ref(), ctx.local_time.date_naive()),
            FilterStage::App => check_list(rule.apps.as_ref(), req.app.as_deref(), equals_ignore_case),
            FilterStage::Url => check_list(rule.urls.as_ref(), req.url.as_deref(), url_matches),
        }
    }
}

pub struct FilterChain {
    stages: Vec<FilterStage>,
}

impl FilterChain {
    pub fn standard() -> Self {
        Self {
            stages: FilterStage::ALL.to_vec(),
        }
    }

    /// Whether `ad` may be shown for this request. Ads without a targeting
    /// rule always pass.
    pub fn admits(&self, ad: &Advertisement, ctx: &EvalContext<'_>) -> bool {
        let Some(rule) = ad.targeting.as_ref() else {
            return true;
        };

        for stage in &self.stages {
            match stage.check(rule, ctx) {
                Verdict::Pass => {}
                Verdict::Reject => {
                    debug!(ad_id = %ad.id, stage = stage.name(), "Candidate rejected by targeting");
                    return false;
                }
                Verdict::Malformed(reason) => {
                    metrics::counter!("targeting.malformed_dimension").increment(1);
                    warn!(
                        ad_id = %ad.id,
                        stage = stage.name(),
                        reason = reason,
                        "Malformed targeting dimension treated as non-restrictive"
                    );
                }
            }
        }
        true
    }

    /// Keep the candidates every stage admits, preserving order.
    pub fn apply(&self, candidates: Vec<Candidate>, ctx: &EvalContext<'_>) -> Vec<Candidate> {
        candidates
            .into_iter()
            .filter(|c| self.admits(&c.ad, ctx))
            .collect()
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::standard()
    }
}

// ─── Stage predicates ───────────────────────────────────────────────────

fn check_device(rule: Option<&DeviceTargeting>, device: Option<DeviceClass>) -> Verdict {
    let (Some(rule), Some(device)) = (rule, device) else {
        return Verdict::Pass;
    };
    let allowed = match device {
        DeviceClass::Desktop => rule.desktop,
        DeviceClass::Mobile => rule.mobile,
        DeviceClass::Tablet => rule.tablet,
    };
    if allowed {
        Verdict::Pass
    } else {
        Verdict::Reject
    }
}

fn check_audience(rule: Option<&AudienceTargeting>, authenticated: bool) -> Verdict {
    let Some(rule) = rule else {
        return Verdict::Pass;
    };
    let allowed = if authenticated {
        rule.authenticated
    } else {
        rule.anonymous
    };
    if allowed {
        Verdict::Pass
    } else {
        Verdict::Reject
    }
}

/// Include/exclude evaluation shared by every list dimension. Exclusion is
/// checked first; a configured include list requires a known value.
fn check_list(filter: Option<&ListFilter>, value: Option<&str>, matches: fn(&str, &str) -> bool) -> Verdict {
    let Some(filter) = filter else {
        return Verdict::Pass;
    };
    let include: Vec<&str> = non_blank(&filter.include);
    let exclude: Vec<&str> = non_blank(&filter.exclude);

    if let Some(value) = value {
        if exclude.iter().any(|pattern| matches(pattern, value)) {
            return Verdict::Reject;
        }
    }
    if include.is_empty() {
        return Verdict::Pass;
    }
    match value {
        Some(value) if include.iter().any(|pattern| matches(pattern, value)) => Verdict::Pass,
        _ => Verdict::Reject,
    }
}

fn non_blank(values: &[String]) -> Vec<&str> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect()
}

fn check_weekday(days: Option<&[chrono::Weekday]>, today: chrono::Weekday) -> Verdict {
    match days {
        None | Some([]) => Verdict::Pass,
        Some(days) if days.contains(&today) => Verdict::Pass,
        Some(_) => Verdict::Reject,
    }
}

fn check_hours(window: Option<&HourWindow>, hour: u32) -> Verdict {
    let Some(window) = window else {
        return Verdict::Pass;
    };
    if !window.is_valid() {
        return Verdict::Malformed("hour outside 0-23");
    }
    if window.contains(hour) {
        Verdict::Pass
    } else {
        Verdict::Reject
    }
}

fn check_dates(window: Option<&DateWindow>, today: NaiveDate) -> Verdict {
    let Some(window) = window else {
        return Verdict::Pass;
    };
    if !window.is_valid() {
        return Verdict::Malformed("date window starts after it ends");
    }
    if window.contains(today) {
        Verdict::Pass
    } else {
        Verdict::Reject
    }
}

// ─── Matchers ───────────────────────────────────────────────────────────

fn equals_ignore_case(pattern: &str, value: &str) -> bool {
    pattern.eq_ignore_ascii_case(value.trim())
}

fn contains_ignore_case(pattern: &str, value: &str) -> bool {
    value.to_ascii_lowercase().contains(&pattern.to_ascii_lowercase())
}

/// A URL pattern matches either the full URL or just its path, so both
/// `https://shop.example.com/*` and `/blog/*` work.
fn url_matches(pattern: &str, value: &str) -> bool {
    if glob_match(pattern, value) {
        return true;
    }
    url::Url::parse(value)
        .map(|parsed| glob_match(pattern, parsed.path()))
        .unwrap_or(false)
}

/// Shell-style wildcard match: `*` is any run of characters, `?` exactly one.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            resume = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ti = resume;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use loomads_core::types::RequestContext;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    // 2026-10-19 is a Monday.
    fn request() -> RequestContext {
        RequestContext {
            device: Some(DeviceClass::Desktop),
            browser: Some("firefox".to_string()),
            os: Some("windows".to_string()),
            referrer: Some("https://news.example.org/story".to_string()),
            url: Some("https://shop.example.com/deals/today?ref=1".to_string()),
            app: Some("shop".to_string()),
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 14, 30, 0).unwrap(),
            ..Default::default()
        }
    }

    fn admits(rule: TargetingRule, req: &RequestContext) -> bool {
        let ad = loomads_core::types::Advertisement {
            targeting: Some(rule),
            ..crate::fixtures::ad(uuid::Uuid::new_v4(), &["z"])
        };
        FilterChain::standard().admits(&ad, &EvalContext::new(req, utc()))
    }

    #[test]
    fn test_no_rule_passes() {
        let ad = crate::fixtures::ad(uuid::Uuid::new_v4(), &["z"]);
        let req = request();
        assert!(FilterChain::standard().admits(&ad, &EvalContext::new(&req, utc())));
        assert!(admits(TargetingRule::default(), &req));
    }

    #[test]
    fn test_browser_include() {
        let rule = TargetingRule {
            browsers: Some(ListFilter::include(&["chrome"])),
            ..Default::default()
        };
        assert!(!admits(rule, &request()));

        let empty = TargetingRule {
            browsers: Some(ListFilter::default()),
            ..Default::default()
        };
        assert!(admits(empty, &request()));

        let mut chrome = request();
        chrome.browser = Some("Chrome".to_string());
        let rule = TargetingRule {
            browsers: Some(ListFilter::include(&["chrome"])),
            ..Default::default()
        };
        assert!(admits(rule, &chrome));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let rule = TargetingRule {
            operating_systems: Some(ListFilter {
                include: vec!["windows".to_string()],
                exclude: vec!["windows".to_string()],
            }),
            ..Default::default()
        };
        assert!(!admits(rule.clone(), &request()));

        let mut mac = request();
        mac.os = Some("macos".to_string());
        // Include list still applies to everyone else.
        assert!(!admits(rule, &mac));
    }

    #[test]
    fn test_include_requires_known_value() {
        let mut unknown = request();
        unknown.browser = None;
        let rule = TargetingRule {
            browsers: Some(ListFilter::include(&["firefox"])),
            ..Default::default()
        };
        assert!(!admits(rule, &unknown));

        let exclude_only = TargetingRule {
            browsers: Some(ListFilter::exclude(&["firefox"])),
            ..Default::default()
        };
        assert!(admits(exclude_only, &unknown));
    }

    #[test]
    fn test_device_and_audience_flags() {
        let mobile_only = TargetingRule {
            devices: Some(DeviceTargeting {
                desktop: false,
                mobile: true,
                tablet: true,
            }),
            ..Default::default()
        };
        assert!(!admits(mobile_only.clone(), &request()));

        let mut unknown_device = request();
        unknown_device.device = None;
        assert!(admits(mobile_only, &unknown_device));

        let members_only = TargetingRule {
            audience: Some(AudienceTargeting {
                authenticated: true,
                anonymous: false,
            }),
            ..Default::default()
        };
        assert!(!admits(members_only.clone(), &request()));
        let mut member = request();
        member.authenticated = true;
        assert!(admits(members_only, &member));
    }

    #[test]
    fn test_referrer_patterns() {
        let rule = TargetingRule {
            referrers: Some(ListFilter::include(&["NEWS.example.org"])),
            ..Default::default()
        };
        assert!(admits(rule, &request()));

        let rule = TargetingRule {
            referrers: Some(ListFilter::exclude(&["example.org"])),
            ..Default::default()
        };
        assert!(!admits(rule, &request()));
    }

    #[test]
    fn test_app_allow_deny() {
        let allow = TargetingRule {
            apps: Some(ListFilter::include(&["blog", "shop"])),
            ..Default::default()
        };
        assert!(admits(allow, &request()));

        let deny = TargetingRule {
            apps: Some(ListFilter::exclude(&["shop"])),
            ..Default::default()
        };
        assert!(!admits(deny, &request()));
    }

    #[test]
    fn test_url_globs() {
        let full = TargetingRule {
            urls: Some(ListFilter::include(&["https://shop.example.com/*"])),
            ..Default::default()
        };
        assert!(admits(full, &request()));

        let path = TargetingRule {
            urls: Some(ListFilter::include(&["/deals/*"])),
            ..Default::default()
        };
        assert!(admits(path, &request()));

        let excluded = TargetingRule {
            urls: Some(ListFilter {
                include: vec!["*".to_string()],
                exclude: vec!["/deals/t?day".to_string()],
            }),
            ..Default::default()
        };
        assert!(!admits(excluded, &request()));
    }

    #[test]
    fn test_time_dimensions() {
        use chrono::Weekday;

        let weekdays = TargetingRule {
            weekdays: Some(vec![Weekday::Sat, Weekday::Sun]),
            ..Default::default()
        };
        assert!(!admits(weekdays, &request()));

        let monday = TargetingRule {
            weekdays: Some(vec![Weekday::Mon]),
            ..Default::default()
        };
        assert!(admits(monday, &request()));

        let afternoon = TargetingRule {
            hours: Some(HourWindow { start: 9, end: 14 }),
            ..Default::default()
        };
        assert!(admits(afternoon, &request()));

        let morning = TargetingRule {
            hours: Some(HourWindow { start: 6, end: 11 }),
            ..Default::default()
        };
        assert!(!admits(morning, &request()));

        let october = TargetingRule {
            dates: Some(DateWindow {
                start: NaiveDate::from_ymd_opt(2026, 10, 1),
                end: NaiveDate::from_ymd_opt(2026, 10, 19),
            }),
            ..Default::default()
        };
        assert!(admits(october, &request()));

        let later = TargetingRule {
            dates: Some(DateWindow {
                start: NaiveDate::from_ymd_opt(2026, 11, 1),
                end: None,
            }),
            ..Default::default()
        };
        assert!(!admits(later, &request()));
    }

    #[test]
    fn test_local_clock_offset() {
        // 14:30 UTC is 23:30 at UTC+9.
        let req = request();
        let rule = TargetingRule {
            hours: Some(HourWindow { start: 22, end: 23 }),
            ..Default::default()
        };
        let ad = loomads_core::types::Advertisement {
            targeting: Some(rule),
            ..crate::fixtures::ad(uuid::Uuid::new_v4(), &["z"])
        };
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        assert!(FilterChain::standard().admits(&ad, &EvalContext::new(&req, tokyo)));
        assert!(!FilterChain::standard().admits(&ad, &EvalContext::new(&req, utc())));
    }

    #[test]
    fn test_malformed_dimensions_never_exclude() {
        let rule = TargetingRule {
            hours: Some(HourWindow { start: 8, end: 99 }),
            dates: Some(DateWindow {
                start: NaiveDate::from_ymd_opt(2027, 1, 1),
                end: NaiveDate::from_ymd_opt(2026, 1, 1),
            }),
            ..Default::default()
        };
        assert!(admits(rule, &request()));

        // Still rejected by a well-formed dimension alongside the bad one.
        let mixed = TargetingRule {
            hours: Some(HourWindow { start: 8, end: 99 }),
            browsers: Some(ListFilter::include(&["chrome"])),
            ..Default::default()
        };
        assert!(!admits(mixed, &request()));
    }

    #[test]
    fn test_stage_order_does_not_matter() {
        let rule = TargetingRule {
            browsers: Some(ListFilter::include(&["firefox"])),
            operating_systems: Some(ListFilter::exclude(&["linux"])),
            hours: Some(HourWindow { start: 12, end: 18 }),
            ..Default::default()
        };
        let req = request();
        let ctx = EvalContext::new(&req, utc());
        let forward = FilterStage::ALL.iter().all(|s| s.check(&rule, &ctx) != Verdict::Reject);
        let backward = FilterStage::ALL.iter().rev().all(|s| s.check(&rule, &ctx) != Verdict::Reject);
        assert!(forward && backward);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", ""));
        assert!(glob_match("/blog/*", "/blog/2026/post"));
        assert!(glob_match("/a?c", "/abc"));
        assert!(!glob_match("/a?c", "/ac"));
        assert!(glob_match("*sale*", "/summer-sale/shoes"));
        assert!(!glob_match("/blog/*", "/shop/blog/x"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
