//! CISA Known Exploited Vulnerabilities (KEV) catalog source.
//!
//! The KEV catalog lists vulnerabilities confirmed to be actively exploited
//! in the wild, so every record is tagged `critical` by definition. The feed
//! carries date-only granularity: window comparisons truncate time-of-day to
//! midnight.
//!
//! # Data Source
//!
//! - URL: <https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json>
//! - License: Public domain

use super::{FeedSource, FetchParams, http_client, sort_and_truncate};
use crate::dates::parse_ymd;
use crate::error::{FeedError, Result};
use crate::models::{Severity, SourceTag, Vulnerability};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

/// URL for the CISA KEV JSON feed.
const KEV_URL: &str =
    "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json";

/// How many most-recent entries to return when the window filter comes up
/// empty (flagged `fallback`).
const FALLBACK_COUNT: usize = 10;

/// CISA KEV data source.
pub struct CisaSource {
    client: reqwest::Client,
    api_url: Option<String>,
}

impl CisaSource {
    pub fn new() -> Self {
        Self {
            client: http_client(),
            api_url: None,
        }
    }

    /// Override the feed URL (useful for mock servers in tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    async fn fetch_catalog(&self) -> Result<KevCatalog> {
        let url = self.api_url.as_deref().unwrap_or(KEV_URL);
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::source_fetch(
                "CISA",
                format!("HTTP {}", response.status()),
            ));
        }

        Ok(response.json().await?)
    }
}

impl Default for CisaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedSource for CisaSource {
    async fn fetch(&self, params: &FetchParams) -> Result<Vec<Vulnerability>> {
        // Every KEV record is critical, so a filter excluding critical can
        // never match: return before touching the network.
        if params.excludes_severity(Severity::Critical) {
            debug!("severity filter excludes critical, skipping KEV fetch");
            return Ok(vec![]);
        }

        let catalog = self.fetch_catalog().await?;
        debug!(count = catalog.vulnerabilities.len(), "fetched KEV catalog");

        // The feed has no time-of-day, so compare calendar dates: window
        // start truncated to midnight.
        let start = params
            .date_range
            .start()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or_else(|| params.date_range.start());

        let mut dated: Vec<(DateTime<Utc>, KevEntry)> = Vec::new();
        for entry in catalog.vulnerabilities {
            match parse_ymd(&entry.date_added) {
                Ok(added) => dated.push((added, entry)),
                Err(e) => warn!(error = %e, cve = %entry.cve_id, "skipping KEV record"),
            }
        }

        let mut vulns: Vec<Vulnerability> = dated
            .iter()
            .filter(|(added, _)| *added >= start)
            .map(|(added, entry)| map_entry(entry, *added, false))
            .collect();

        // Nothing inside the window: surface the most recent additions so
        // the source is not silently empty, flagged as out-of-window.
        if vulns.is_empty() && !dated.is_empty() {
            dated.sort_by(|a, b| b.0.cmp(&a.0));
            vulns = dated
                .iter()
                .take(FALLBACK_COUNT)
                .map(|(added, entry)| map_entry(entry, *added, true))
                .collect();
        }

        sort_and_truncate(&mut vulns, params.limit);
        Ok(vulns)
    }

    fn tag(&self) -> SourceTag {
        SourceTag::Cisa
    }

    fn name(&self) -> &str {
        "CISA"
    }
}

fn map_entry(entry: &KevEntry, added: DateTime<Utc>, fallback: bool) -> Vulnerability {
    Vulnerability {
        id: entry.cve_id.clone(),
        source: SourceTag::Cisa,
        // Exploited in the wild by definition.
        severity: Severity::Critical,
        cvss_score: None,
        title: entry.vulnerability_name.clone(),
        description: entry.short_description.clone(),
        affected_products: vec![format!("{} {}", entry.vendor_project, entry.product)],
        published_at: added,
        url: format!("https://nvd.nist.gov/vuln/detail/{}", entry.cve_id),
        fallback,
    }
}

// ----- KEV feed wire types -----

#[derive(Deserialize)]
struct KevCatalog {
    #[serde(default)]
    vulnerabilities: Vec<KevEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KevEntry {
    #[serde(rename = "cveID")]
    cve_id: String,
    vendor_project: String,
    product: String,
    vulnerability_name: String,
    date_added: String,
    short_description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kev_fixture(cve: &str, date_added: &str) -> serde_json::Value {
        json!({
            "cveID": cve,
            "vendorProject": "Acme",
            "product": "Router",
            "vulnerabilityName": format!("{cve} exploited in the wild"),
            "dateAdded": date_added,
            "shortDescription": "Remote code execution via crafted packet.",
            "requiredAction": "Apply updates.",
            "dueDate": "2099-01-01",
            "knownRansomwareCampaignUse": "Unknown",
            "notes": ""
        })
    }

    async fn mount_catalog(server: &MockServer, entries: Vec<serde_json::Value>) {
        let body = json!({
            "title": "CISA Catalog of Known Exploited Vulnerabilities",
            "catalogVersion": "2024.06.30",
            "count": entries.len(),
            "vulnerabilities": entries
        });
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn maps_kev_entry_as_critical() {
        let mock_server = MockServer::start().await;
        let today = Utc::now().format("%Y-%m-%d").to_string();
        mount_catalog(&mock_server, vec![kev_fixture("CVE-2024-0001", &today)]).await;

        let source = CisaSource::new().with_api_url(mock_server.uri());
        let vulns = source.fetch(&FetchParams::default()).await.unwrap();

        assert_eq!(vulns.len(), 1);
        let v = &vulns[0];
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(v.cvss_score, None);
        assert_eq!(v.affected_products, vec!["Acme Router".to_string()]);
        assert_eq!(v.url, "https://nvd.nist.gov/vuln/detail/CVE-2024-0001");
        assert!(!v.fallback);
    }

    #[tokio::test]
    async fn severity_filter_short_circuits_without_fetching() {
        let mock_server = MockServer::start().await;
        mount_catalog(&mock_server, vec![kev_fixture("CVE-2024-0001", "2024-06-30")]).await;

        let source = CisaSource::new().with_api_url(mock_server.uri());
        let params = FetchParams {
            severity: Some(vec![Severity::High]),
            ..FetchParams::default()
        };
        let vulns = source.fetch(&params).await.unwrap();
        assert!(vulns.is_empty());
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filter_including_critical_fetches() {
        let mock_server = MockServer::start().await;
        let today = Utc::now().format("%Y-%m-%d").to_string();
        mount_catalog(&mock_server, vec![kev_fixture("CVE-2024-0001", &today)]).await;

        let source = CisaSource::new().with_api_url(mock_server.uri());
        let params = FetchParams {
            severity: Some(vec![Severity::Critical, Severity::High]),
            ..FetchParams::default()
        };
        let vulns = source.fetch(&params).await.unwrap();
        assert_eq!(vulns.len(), 1);
    }

    #[tokio::test]
    async fn old_entries_excluded_by_midnight_comparison() {
        let mock_server = MockServer::start().await;
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let old = (Utc::now() - Duration::days(90)).format("%Y-%m-%d").to_string();
        mount_catalog(
            &mock_server,
            vec![
                kev_fixture("CVE-2024-NEW", &today),
                kev_fixture("CVE-2023-OLD", &old),
            ],
        )
        .await;

        let source = CisaSource::new().with_api_url(mock_server.uri());
        let vulns = source.fetch(&FetchParams::default()).await.unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].id, "CVE-2024-NEW");
    }

    #[tokio::test]
    async fn empty_window_falls_back_to_recent_entries() {
        let mock_server = MockServer::start().await;
        let old_1 = (Utc::now() - Duration::days(90)).format("%Y-%m-%d").to_string();
        let old_2 = (Utc::now() - Duration::days(120)).format("%Y-%m-%d").to_string();
        mount_catalog(
            &mock_server,
            vec![
                kev_fixture("CVE-2023-B", &old_2),
                kev_fixture("CVE-2023-A", &old_1),
            ],
        )
        .await;

        let source = CisaSource::new().with_api_url(mock_server.uri());
        let vulns = source.fetch(&FetchParams::default()).await.unwrap();
        assert_eq!(vulns.len(), 2);
        assert!(vulns.iter().all(|v| v.fallback));
        // Newest addition first.
        assert_eq!(vulns[0].id, "CVE-2023-A");
    }
}
