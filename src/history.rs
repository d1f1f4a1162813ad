// Browsing history relay
// Allow-list filtering, selection and submission to the local companion service

use anyhow::Context;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};

/// Default address of the local companion service
pub const DEFAULT_COMPANION_URL: &str = "http://localhost:8765";

/// Domains worth relaying; matched as plain substrings of the URL
pub const ALLOWED_DOMAINS: &[&str] = &[
    // Developer tools & documentation
    "getsavvy.so",
    "github",
    "stackoverflow",
    "gitlab",
    "bitbucket",
    // Error monitoring & logging
    "rollbar",
    "splunk",
    "datadog",
    "sentry",
    "bugsnag",
    "raygun",
    // Cloud platforms
    "aws.",
    "amazon",
    "console.aws",
    "cloud.google",
    "gcp",
    "azure",
    // Monitoring & APM
    "grafana",
    "newrelic",
    "prometheus",
    "kibana",
    "elasticsearch",
    "elk",
    // CI/CD
    "jenkins",
    "circleci",
    "travis",
    "teamcity",
    // Common internal domains
    "monitoring",
    "logs",
    "metrics",
    "debug",
    "trace",
    "apm",
    "observability",
    "ops",
    "devops",
];

/// Selectable look-back window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub label: &'static str,
    pub hours: f64,
}

pub const TIME_RANGES: &[TimeRange] = &[
    TimeRange { label: "30 mins", hours: 0.5 },
    TimeRange { label: "1 hour", hours: 1.0 },
    TimeRange { label: "2 hours", hours: 2.0 },
    TimeRange { label: "3 hours", hours: 3.0 },
    TimeRange { label: "5 hours", hours: 5.0 },
    TimeRange { label: "8 hours", hours: 8.0 },
    TimeRange { label: "12 hours", hours: 12.0 },
    TimeRange { label: "16 hours", hours: 16.0 },
    TimeRange { label: "20 hours", hours: 20.0 },
    TimeRange { label: "24 hours", hours: 24.0 },
    TimeRange { label: "48 hours", hours: 48.0 },
    TimeRange { label: "72 hours", hours: 72.0 },
    TimeRange { label: "96 hours", hours: 96.0 },
    TimeRange { label: "120 hours", hours: 120.0 },
];

pub const DEFAULT_HOURS: f64 = 1.0;

/// Longest look-back window accepted: one year
pub const MAX_HOURS: f64 = 24.0 * 366.0;

/// Look up a range by its hour count
pub fn time_range(hours: f64) -> Option<TimeRange> {
    TIME_RANGES.iter().copied().find(|r| r.hours == hours)
}

/// Browser history entry as exported by the history API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Milliseconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_visit_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typed_count: Option<u32>,
    #[serde(default)]
    pub is_selected: bool,
}

impl HistoryItem {
    pub fn last_visit(&self) -> Option<DateTime<Utc>> {
        let ms = self.last_visit_time?;
        Utc.timestamp_millis_opt(ms as i64).single()
    }

    /// Title, or the hostname when the page had none
    pub fn display_title(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => hostname(self.url.as_deref().unwrap_or_default()),
        }
    }
}

/// Host part of a URL, or the input itself when it does not parse
pub fn hostname(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

/// Whether the URL mentions any allowed domain
pub fn is_allowed(url: &str, allowed: &[&str]) -> bool {
    allowed.iter().any(|domain| url.contains(domain))
}

/// Start of a look-back window of `hours` ending at `now`
///
/// `None` unless `hours` is a finite value in `(0, MAX_HOURS]`.
pub fn since(now: DateTime<Utc>, hours: f64) -> Option<DateTime<Utc>> {
    if !hours.is_finite() || hours <= 0.0 || hours > MAX_HOURS {
        return None;
    }
    now.checked_sub_signed(Duration::milliseconds((hours * 60.0 * 60.0 * 1000.0) as i64))
}

/// clap value parser for a look-back window in hours
pub fn parse_hours(value: &str) -> std::result::Result<f64, String> {
    let hours: f64 = value
        .parse()
        .map_err(|_| format!("`{}` is not a number", value))?;
    if !hours.is_finite() || hours <= 0.0 || hours > MAX_HOURS {
        return Err(format!("hours must be greater than 0 and at most {}", MAX_HOURS));
    }
    Ok(hours)
}

/// Allowed items visited at or after `start`
pub fn filter_history(
    items: Vec<HistoryItem>,
    start: DateTime<Utc>,
    allowed: &[&str],
) -> Vec<HistoryItem> {
    let total = items.len();
    let kept: Vec<HistoryItem> = items
        .into_iter()
        .filter(|item| item.url.as_deref().is_some_and(|url| is_allowed(url, allowed)))
        .filter(|item| item.last_visit().is_some_and(|visited| visited >= start))
        .collect();

    tracing::debug!(total, kept = kept.len(), "Filtered history");
    kept
}

/// Checkbox state over a filtered history list
#[derive(Debug, Clone, Default)]
pub struct HistorySelection {
    items: Vec<HistoryItem>,
}

impl HistorySelection {
    pub fn new(items: Vec<HistoryItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Flip one entry; out-of-range indexes are ignored
    pub fn toggle(&mut self, index: usize) {
        if let Some(item) = self.items.get_mut(index) {
            item.is_selected = !item.is_selected;
        }
    }

    pub fn select_all(&mut self, checked: bool) {
        for item in &mut self.items {
            item.is_selected = checked;
        }
    }

    /// "Select all" is only offered for two or more entries
    pub fn offers_select_all(&self) -> bool {
        self.items.len() >= 2
    }

    pub fn all_selected(&self) -> bool {
        self.items.iter().all(|item| item.is_selected)
    }

    pub fn any_selected(&self) -> bool {
        self.items.iter().any(|item| item.is_selected)
    }

    pub fn selected(&self) -> Vec<HistoryItem> {
        self.items.iter().filter(|i| i.is_selected).cloned().collect()
    }
}

/// Client for the local companion service
pub struct CompanionClient {
    client: Client,
    endpoint: Url,
}

impl CompanionClient {
    pub fn new(base_url: &Url, request_timeout: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let endpoint = crate::http_client::join_path(base_url, "/history")?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST the items as a JSON array
    pub async fn submit(&self, items: &[HistoryItem]) -> Result<()> {
        tracing::info!(count = items.len(), endpoint = %self.endpoint, "Saving history");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(items)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Error saving history");
                ApiError::transport(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut err = ApiError::from_response(response).await;
            err.message = "Failed to save history".to_string();
            tracing::error!(status = status.as_u16(), "Error saving history");
            return Err(err);
        }

        tracing::info!("History saved successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn item(id: &str, url: &str, title: &str, visited: DateTime<Utc>) -> HistoryItem {
        HistoryItem {
            id: id.to_string(),
            url: Some(url.to_string()),
            title: Some(title.to_string()),
            last_visit_time: Some(visited.timestamp_millis() as f64),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_allowed() {
        assert!(is_allowed("https://github.com/org/repo", ALLOWED_DOMAINS));
        assert!(is_allowed("https://sentry.internal/issues/1", ALLOWED_DOMAINS));
        assert!(is_allowed("https://aws.amazon.com/console", ALLOWED_DOMAINS));
        assert!(!is_allowed("https://news.example.com/", ALLOWED_DOMAINS));
    }

    #[test]
    fn test_filter_history_by_domain_and_window() {
        let now = Utc::now();
        let start = since(now, 1.0).unwrap();
        let items = vec![
            item("1", "https://github.com/a", "Repo", now - Duration::minutes(10)),
            item("2", "https://github.com/b", "Old repo", now - Duration::hours(3)),
            item("3", "https://example.com", "Elsewhere", now - Duration::minutes(5)),
            HistoryItem {
                id: "4".to_string(),
                url: None,
                ..Default::default()
            },
        ];

        let kept = filter_history(items, start, ALLOWED_DOMAINS);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "1");
    }

    #[test]
    fn test_since_half_hour() {
        let now = Utc.timestamp_millis_opt(10_000_000).unwrap();
        assert_eq!(since(now, 0.5).unwrap().timestamp_millis(), 10_000_000 - 1_800_000);
    }

    #[test]
    fn test_since_rejects_unusable_windows() {
        let now = Utc::now();
        assert!(since(now, 1e12).is_none());
        assert!(since(now, MAX_HOURS + 1.0).is_none());
        assert!(since(now, -1.0).is_none());
        assert!(since(now, 0.0).is_none());
        assert!(since(now, f64::NAN).is_none());
        assert!(since(now, f64::INFINITY).is_none());
        assert!(since(now, MAX_HOURS).is_some());
    }

    #[test]
    fn test_parse_hours() {
        assert_eq!(parse_hours("0.5"), Ok(0.5));
        assert_eq!(parse_hours("120"), Ok(120.0));
        assert!(parse_hours("-1").is_err());
        assert!(parse_hours("NaN").is_err());
        assert!(parse_hours("inf").is_err());
        assert!(parse_hours("1e12").is_err());
        assert!(parse_hours("soon").is_err());
    }

    #[test]
    fn test_time_range_lookup() {
        assert_eq!(time_range(0.5).map(|r| r.label), Some("30 mins"));
        assert_eq!(time_range(DEFAULT_HOURS).map(|r| r.label), Some("1 hour"));
        assert!(time_range(7.0).is_none());
    }

    #[test]
    fn test_display_title_falls_back_to_hostname() {
        let now = Utc::now();
        let mut entry = item("1", "https://grafana.internal/d/abc", "", now);
        assert_eq!(entry.display_title(), "grafana.internal");

        entry.title = Some("Dashboard".to_string());
        assert_eq!(entry.display_title(), "Dashboard");

        assert_eq!(hostname("not a url"), "not a url");
    }

    #[test]
    fn test_selection() {
        let now = Utc::now();
        let mut selection = HistorySelection::new(vec![
            item("1", "https://github.com/a", "A", now),
            item("2", "https://gitlab.com/b", "B", now),
        ]);

        assert!(selection.offers_select_all());
        assert!(!selection.any_selected());

        selection.toggle(1);
        selection.toggle(9);
        assert!(selection.any_selected());
        assert!(!selection.all_selected());
        assert_eq!(selection.selected()[0].id, "2");

        selection.select_all(true);
        assert!(selection.all_selected());
        assert_eq!(selection.selected().len(), 2);

        selection.select_all(false);
        assert!(!selection.any_selected());
    }

    #[test]
    fn test_history_item_wire_format() {
        let json = r#"{"id":"42","url":"https://github.com","title":"GitHub","lastVisitTime":1700000000000.5,"visitCount":3,"typedCount":1}"#;
        let parsed: HistoryItem = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.visit_count, Some(3));
        assert!(!parsed.is_selected);

        let out = serde_json::to_value(&parsed).unwrap();
        assert_eq!(out["lastVisitTime"], serde_json::json!(1700000000000.5));
        assert_eq!(out["isSelected"], serde_json::json!(false));
    }

    proptest! {
        #[test]
        fn filtered_items_are_always_allowed(urls in proptest::collection::vec("[a-z./:]{0,30}", 0..20)) {
            let now = Utc::now();
            let items: Vec<HistoryItem> = urls
                .iter()
                .enumerate()
                .map(|(i, url)| item(&i.to_string(), url, "", now))
                .collect();
            let expected = urls.iter().filter(|u| is_allowed(u, ALLOWED_DOMAINS)).count();

            let kept = filter_history(items, since(now, DEFAULT_HOURS).unwrap(), ALLOWED_DOMAINS);
            prop_assert_eq!(kept.len(), expected);
            for entry in kept {
                prop_assert!(is_allowed(entry.url.as_deref().unwrap(), ALLOWED_DOMAINS));
            }
        }
    }
}
