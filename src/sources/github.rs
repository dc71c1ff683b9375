//! GitHub Security Advisories source.
//!
//! Fetches the global advisory listing from the REST API. Unauthenticated
//! requests work but are tightly rate limited; a bearer token raises the
//! limit.

use super::{FeedSource, FetchParams, http_client, sort_and_truncate};
use crate::error::{FeedError, Result};
use crate::models::{MAX_AFFECTED_PRODUCTS, Severity, SourceTag, Vulnerability};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

const GITHUB_API_URL: &str = "https://api.github.com/advisories";

const PER_PAGE: usize = 100;

/// GitHub Security Advisories source.
pub struct GithubSource {
    client: reqwest::Client,
    token: Option<String>,
    api_url: Option<String>,
}

impl GithubSource {
    pub fn new(token: Option<String>) -> Self {
        Self {
            client: http_client(),
            token,
            api_url: None,
        }
    }

    /// Override the API URL (useful for mock servers in tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }
}

#[async_trait]
impl FeedSource for GithubSource {
    async fn fetch(&self, params: &FetchParams) -> Result<Vec<Vulnerability>> {
        let url = self.api_url.as_deref().unwrap_or(GITHUB_API_URL);
        let start = params.date_range.start();

        let mut request = self
            .client
            .get(url)
            .query(&[("per_page", PER_PAGE.to_string())])
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(FeedError::source_fetch(
                "GitHub",
                format!("HTTP {}", response.status()),
            ));
        }

        let advisories: Vec<GithubAdvisory> = response.json().await?;
        debug!(count = advisories.len(), "fetched GitHub advisories");

        let mut vulns: Vec<Vulnerability> = advisories
            .into_iter()
            .filter_map(|advisory| match map_advisory(advisory) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, "skipping GitHub advisory");
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
        SourceTag::Github
    }

    fn name(&self) -> &str {
        "GitHub"
    }
}

/// GitHub's severity enum onto the ordinal scale. `moderate` is GitHub's
/// name for medium.
fn map_severity(severity: &str) -> Severity {
    match severity.to_ascii_lowercase().as_str() {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "medium" | "moderate" => Severity::Medium,
        "low" => Severity::Low,
        _ => Severity::Unknown,
    }
}

fn map_advisory(advisory: GithubAdvisory) -> Result<Vulnerability> {
    let published_at = DateTime::parse_from_rfc3339(&advisory.published_at)
        .map_err(|e| FeedError::date_parse(&advisory.published_at, e.to_string()))?
        .with_timezone(&Utc);

    let affected_products: Vec<String> = advisory
        .vulnerabilities
        .iter()
        .map(|v| format!("{}/{}", v.package.ecosystem, v.package.name))
        .take(MAX_AFFECTED_PRODUCTS)
        .collect();

    let description = if advisory.description.is_empty() {
        advisory.summary.clone()
    } else {
        advisory.description
    };

    Ok(Vulnerability {
        id: advisory.ghsa_id,
        source: SourceTag::Github,
        severity: map_severity(&advisory.severity),
        cvss_score: advisory.cvss.and_then(|c| c.score),
        title: advisory.summary,
        description,
        affected_products,
        published_at,
        url: advisory.html_url,
        fallback: false,
    })
}

// ----- GitHub advisory wire types -----

#[derive(Deserialize)]
struct GithubAdvisory {
    ghsa_id: String,
    #[serde(default)]
    severity: String,
    summary: String,
    #[serde(default)]
    description: String,
    published_at: String,
    html_url: String,
    cvss: Option<Cvss>,
    #[serde(default)]
    vulnerabilities: Vec<AdvisoryVulnerability>,
}

#[derive(Deserialize)]
struct Cvss {
    score: Option<f64>,
}

#[derive(Deserialize)]
struct AdvisoryVulnerability {
    package: AdvisoryPackage,
}

#[derive(Deserialize)]
struct AdvisoryPackage {
    ecosystem: String,
    name: String,
}
