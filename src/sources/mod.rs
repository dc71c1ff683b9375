//! Vulnerability data sources.
//!
//! This module contains implementations for fetching advisories from various
//! upstream feeds. Each source implements the [`FeedSource`] trait.
//!
//! # Available Sources
//!
//! - [`nvd::NvdSource`] - NIST National Vulnerability Database
//! - [`cisa::CisaSource`] - CISA Known Exploited Vulnerabilities catalog
//! - [`github::GithubSource`] - GitHub Security Advisories
//! - [`osv::OsvSource`] - OSV package queries (PyPI and Maven variants)
//! - [`kisa::KisaSource`] - KISA security notice RSS feed

pub mod cisa;
pub mod github;
pub mod kisa;
pub mod nvd;
pub mod osv;

use crate::error::Result;
use crate::models::{DateRange, Severity, SourceTag, Vulnerability};
use async_trait::async_trait;
use std::time::Duration;

/// Parameters passed to every source fetch.
#[derive(Debug, Clone)]
pub struct FetchParams {
    pub date_range: DateRange,
    /// `None` means no severity filter.
    pub severity: Option<Vec<Severity>>,
    /// Per-source result cap; each adapter truncates its own sorted output.
    pub limit: usize,
}

impl FetchParams {
    /// True when the filter is present and does not admit `severity`.
    pub fn excludes_severity(&self, severity: Severity) -> bool {
        match &self.severity {
            Some(filter) if !filter.is_empty() => !filter.contains(&severity),
            _ => false,
        }
    }

    /// Apply the severity filter in place, using the records' own derivation.
    pub fn filter_severity(&self, vulns: &mut Vec<Vulnerability>) {
        if let Some(filter) = &self.severity {
            if !filter.is_empty() {
                vulns.retain(|v| filter.contains(&v.severity));
            }
        }
    }
}

impl Default for FetchParams {
    fn default() -> Self {
        Self {
            date_range: DateRange::default(),
            severity: None,
            limit: 50,
        }
    }
}

/// Trait for vulnerability feed sources.
///
/// Implement this trait to add support for a new upstream feed. The
/// aggregator depends only on this interface, never on concrete adapter
/// types, so tests can substitute fakes.
///
/// Errors returned here are soft failures: the aggregator logs them and
/// treats the source as having contributed nothing.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the source's records for the requested window, filtered by the
    /// requested severity set, sorted newest-first and truncated to `limit`.
    async fn fetch(&self, params: &FetchParams) -> Result<Vec<Vulnerability>>;

    /// The tag this source contributes records under.
    fn tag(&self) -> SourceTag;

    /// Source name used for logging.
    fn name(&self) -> &str {
        self.tag().as_str()
    }
}

/// Sort newest-first and truncate to `limit`. Stable, so records sharing a
/// timestamp keep their input order.
pub(crate) fn sort_and_truncate(vulns: &mut Vec<Vulnerability>, limit: usize) {
    vulns.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    vulns.truncate(limit);
}

/// Shared HTTP client for upstream fetches. No retries: rate-limit and
/// transient failures are surfaced as soft failures, not retried.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("Mozilla/5.0 (compatible; VulnDigest/1.0)")
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, day: u32) -> Vulnerability {
        Vulnerability {
            id: id.to_string(),
            source: SourceTag::Nvd,
            severity: Severity::High,
            cvss_score: Some(7.5),
            title: id.to_string(),
            description: String::new(),
            affected_products: vec![],
            published_at: Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap(),
            url: String::new(),
            fallback: false,
        }
    }

    #[test]
    fn sort_and_truncate_is_newest_first() {
        let mut vulns = vec![record("a", 1), record("b", 3), record("c", 2)];
        sort_and_truncate(&mut vulns, 2);
        assert_eq!(vulns.len(), 2);
        assert_eq!(vulns[0].id, "b");
        assert_eq!(vulns[1].id, "c");
    }

    #[test]
    fn excludes_severity_only_when_filter_present() {
        let mut params = FetchParams::default();
        assert!(!params.excludes_severity(Severity::Critical));

        params.severity = Some(vec![Severity::High]);
        assert!(params.excludes_severity(Severity::Critical));
        assert!(!params.excludes_severity(Severity::High));

        // An empty filter admits everything.
        params.severity = Some(vec![]);
        assert!(!params.excludes_severity(Severity::Critical));
    }
}
