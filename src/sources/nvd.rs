use super::{FeedSource, FetchParams, http_client, sort_and_truncate};
use crate::error::{FeedError, Result};
use crate::models::{MAX_AFFECTED_PRODUCTS, Severity, SourceTag, Vulnerability};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

const NVD_API_BASE: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";

/// NVD caps `resultsPerPage` at 2000; we never need more than 100 per page.
const MAX_PAGE_SIZE: usize = 100;

/// Parse the NVD datetime format (e.g., "2024-01-15T10:30:00.000").
///
/// Tried in order: fractional seconds, whole seconds, RFC 3339.
fn parse_nvd_datetime(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.3f") {
        return Ok(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    Err(FeedError::date_parse(s, "unrecognized NVD datetime"))
}

/// NIST National Vulnerability Database source.
///
/// Pages through `/rest/json/cves/2.0` filtered by publication window.
pub struct NvdSource {
    client: reqwest::Client,
    api_url: Option<String>,
}

impl NvdSource {
    pub fn new() -> Self {
        Self {
            client: http_client(),
            api_url: None,
        }
    }

    /// Override the API base URL (useful for mock servers in tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    async fn fetch_page(
        &self,
        base_url: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page_size: usize,
        start_index: usize,
    ) -> Result<NvdResponse> {
        let response = self
            .client
            .get(base_url)
            .query(&[
                (
                    "pubStartDate",
                    start.to_rfc3339_opts(SecondsFormat::Millis, true),
                ),
                (
                    "pubEndDate",
                    end.to_rfc3339_opts(SecondsFormat::Millis, true),
                ),
                ("resultsPerPage", page_size.to_string()),
                ("startIndex", start_index.to_string()),
            ])
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::source_fetch(
                "NVD",
                format!("HTTP {}", response.status()),
            ));
        }

        Ok(response.json().await?)
    }
}

impl Default for NvdSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedSource for NvdSource {
    async fn fetch(&self, params: &FetchParams) -> Result<Vec<Vulnerability>> {
        let base_url = self.api_url.as_deref().unwrap_or(NVD_API_BASE);
        let start = params.date_range.start();
        let end = Utc::now();
        let page_size = params.limit.clamp(1, MAX_PAGE_SIZE);

        let mut raw = Vec::new();
        let mut start_index = 0usize;
        loop {
            let page = self
                .fetch_page(base_url, start, end, page_size, start_index)
                .await?;
            let fetched = page.vulnerabilities.len();
            raw.extend(page.vulnerabilities);

            start_index += fetched;
            if fetched == 0 || raw.len() >= params.limit || start_index >= page.total_results {
                break;
            }
        }
        debug!(count = raw.len(), "fetched NVD CVEs");

        let mut vulns: Vec<Vulnerability> = raw
            .into_iter()
            .filter_map(|wrapper| match map_cve(wrapper.cve) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, "skipping NVD record");
                    None
                }
            })
            .collect();

        params.filter_severity(&mut vulns);
        sort_and_truncate(&mut vulns, params.limit);
        Ok(vulns)
    }

    fn tag(&self) -> SourceTag {
        SourceTag::Nvd
    }

    fn name(&self) -> &str {
        "NVD"
    }
}

/// Map one CVE entry onto the canonical record.
///
/// Records whose publication date fails to parse are dropped individually.
fn map_cve(cve: Cve) -> Result<Vulnerability> {
    let published_at = parse_nvd_datetime(&cve.published)?;
    let cvss_score = extract_cvss_score(&cve);
    let description = extract_description(&cve);
    let affected_products = extract_affected_products(&cve);

    let title = if description.chars().count() > 100 {
        let truncated: String = description.chars().take(100).collect();
        format!("{}: {}...", cve.id, truncated)
    } else {
        format!("{}: {}", cve.id, description)
    };

    Ok(Vulnerability {
        url: format!("https://nvd.nist.gov/vuln/detail/{}", cve.id),
        id: cve.id,
        source: SourceTag::Nvd,
        severity: Severity::from_cvss_score(cvss_score),
        cvss_score,
        title,
        description,
        affected_products,
        published_at,
        fallback: false,
    })
}

/// CVSS base score with the v3.1 -> v3.0 -> v2 fallback chain.
fn extract_cvss_score(cve: &Cve) -> Option<f64> {
    let metrics = cve.metrics.as_ref()?;
    for chain in [
        &metrics.cvss_metric_v31,
        &metrics.cvss_metric_v30,
        &metrics.cvss_metric_v2,
    ] {
        if let Some(metric) = chain.first() {
            return Some(metric.cvss_data.base_score);
        }
    }
    None
}

/// English description preferred, otherwise the first one present.
fn extract_description(cve: &Cve) -> String {
    cve.descriptions
        .iter()
        .find(|d| d.lang == "en")
        .or_else(|| cve.descriptions.first())
        .map(|d| d.value.clone())
        .unwrap_or_else(|| "No description available".to_string())
}

/// `vendor:product` pairs from vulnerable CPE match criteria, deduped in
/// order of appearance, capped at [`MAX_AFFECTED_PRODUCTS`].
fn extract_affected_products(cve: &Cve) -> Vec<String> {
    let mut products = Vec::new();
    for config in cve.configurations.iter().flatten() {
        for node in &config.nodes {
            for cpe in &node.cpe_match {
                if !cpe.vulnerable {
                    continue;
                }
                // CPE 2.3 format: cpe:2.3:a:vendor:product:version:...
                let parts: Vec<&str> = cpe.criteria.split(':').collect();
                if parts.len() >= 5 {
                    let product = format!("{}:{}", parts[3], parts[4]);
                    if !products.contains(&product) {
                        products.push(product);
                    }
                }
            }
        }
    }
    products.truncate(MAX_AFFECTED_PRODUCTS);
    products
}

// ----- NVD API 2.0 wire types -----

#[derive(Deserialize)]
struct NvdResponse {
    #[serde(rename = "totalResults", default)]
    total_results: usize,
    #[serde(default)]
    vulnerabilities: Vec<CveWrapper>,
}

#[derive(Deserialize)]
struct CveWrapper {
    cve: Cve,
}

#[derive(Deserialize)]
struct Cve {
    id: String,
    published: String,
    #[serde(default)]
    descriptions: Vec<Description>,
    metrics: Option<Metrics>,
    configurations: Option<Vec<Configuration>>,
}

#[derive(Deserialize)]
struct Description {
    #[serde(default)]
    lang: String,
    value: String,
}

#[derive(Deserialize, Default)]
struct Metrics {
    #[serde(rename = "cvssMetricV31", default)]
    cvss_metric_v31: Vec<CvssMetric>,
    #[serde(rename = "cvssMetricV30", default)]
    cvss_metric_v30: Vec<CvssMetric>,
    #[serde(rename = "cvssMetricV2", default)]
    cvss_metric_v2: Vec<CvssMetric>,
}

#[derive(Deserialize)]
struct CvssMetric {
    #[serde(rename = "cvssData")]
    cvss_data: CvssData,
}

#[derive(Deserialize)]
struct CvssData {
    #[serde(rename = "baseScore")]
    base_score: f64,
}

#[derive(Deserialize)]
struct Configuration {
    #[serde(default)]
    nodes: Vec<Node>,
}

#[derive(Deserialize)]
struct Node {
    #[serde(rename = "cpeMatch", default)]
    cpe_match: Vec<CpeMatch>,
}

#[derive(Deserialize)]
struct CpeMatch {
    #[serde(default)]
    vulnerable: bool,
    criteria: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cve_fixture(id: &str, score: f64) -> serde_json::Value {
        json!({
            "cve": {
                "id": id,
                "published": "2024-06-30T12:00:00.000",
                "descriptions": [
                    { "lang": "en", "value": "A heap overflow in the example parser" }
                ],
                "metrics": {
                    "cvssMetricV31": [
                        { "cvssData": { "version": "3.1", "baseScore": score } }
                    ]
                },
                "configurations": [
                    {
                        "nodes": [
                            {
                                "cpeMatch": [
                                    { "vulnerable": true, "criteria": "cpe:2.3:a:acme:parser:1.0:*:*:*:*:*:*:*" },
                                    { "vulnerable": true, "criteria": "cpe:2.3:a:acme:parser:1.1:*:*:*:*:*:*:*" },
                                    { "vulnerable": false, "criteria": "cpe:2.3:a:other:thing:*:*:*:*:*:*:*:*" }
                                ]
                            }
                        ]
                    }
                ]
            }
        })
    }

    #[tokio::test]
    async fn maps_cve_to_canonical_record() {
        let mock_server = MockServer::start().await;
        let body =
            json!({ "totalResults": 1, "vulnerabilities": [cve_fixture("CVE-2024-12345", 9.8)] });
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&mock_server)
            .await;

        let source = NvdSource::new().with_api_url(mock_server.uri());
        let vulns = source.fetch(&FetchParams::default()).await.unwrap();

        assert_eq!(vulns.len(), 1);
        let v = &vulns[0];
        assert_eq!(v.id, "CVE-2024-12345");
        assert_eq!(v.source, SourceTag::Nvd);
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(v.cvss_score, Some(9.8));
        assert!(v.title.starts_with("CVE-2024-12345: A heap overflow"));
        // vendor:product deduped across versions
        assert_eq!(v.affected_products, vec!["acme:parser".to_string()]);
        assert_eq!(v.url, "https://nvd.nist.gov/vuln/detail/CVE-2024-12345");
    }

    #[tokio::test]
    async fn severity_filter_uses_own_derivation() {
        let mock_server = MockServer::start().await;
        let body = json!({
            "totalResults": 2,
            "vulnerabilities": [cve_fixture("CVE-2024-1", 9.8), cve_fixture("CVE-2024-2", 5.0)]
        });
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&mock_server)
            .await;

        let source = NvdSource::new().with_api_url(mock_server.uri());
        let params = FetchParams {
            severity: Some(vec![Severity::Critical]),
            ..FetchParams::default()
        };
        let vulns = source.fetch(&params).await.unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].id, "CVE-2024-1");
    }

    #[tokio::test]
    async fn unparsable_published_date_drops_only_that_record() {
        let mock_server = MockServer::start().await;
        let mut bad = cve_fixture("CVE-2024-BAD", 5.0);
        bad["cve"]["published"] = json!("yesterday");
        let body = json!({
            "totalResults": 2,
            "vulnerabilities": [bad, cve_fixture("CVE-2024-GOOD", 5.0)]
        });
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&mock_server)
            .await;

        let source = NvdSource::new().with_api_url(mock_server.uri());
        let vulns = source.fetch(&FetchParams::default()).await.unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].id, "CVE-2024-GOOD");
    }

    #[tokio::test]
    async fn upstream_failure_is_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let source = NvdSource::new().with_api_url(mock_server.uri());
        let result = source.fetch(&FetchParams::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn long_description_truncated_into_title() {
        let mock_server = MockServer::start().await;
        let mut fixture = cve_fixture("CVE-2024-5", 5.0);
        fixture["cve"]["descriptions"][0]["value"] = json!("x".repeat(150));
        let body = json!({ "totalResults": 1, "vulnerabilities": [fixture] });
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&mock_server)
            .await;

        let source = NvdSource::new().with_api_url(mock_server.uri());
        let vulns = source.fetch(&FetchParams::default()).await.unwrap();
        let title = &vulns[0].title;
        assert!(title.ends_with("..."));
        assert_eq!(title.len(), "CVE-2024-5: ".len() + 100 + 3);
        assert_eq!(vulns[0].description.len(), 150);
    }

    #[test]
    fn datetime_formats() {
        assert!(parse_nvd_datetime("2024-01-15T10:30:00.000").is_ok());
        assert!(parse_nvd_datetime("2024-01-15T10:30:00").is_ok());
        assert!(parse_nvd_datetime("2024-01-15T10:30:00+00:00").is_ok());
        assert!(parse_nvd_datetime("January 15th").is_err());
    }
}
