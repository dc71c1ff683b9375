//! Core data models for the aggregation pipeline.
//!
//! This module defines the canonical [`Vulnerability`] record that every
//! source adapter maps its native payload into, plus the query/response
//! envelope types used by the HTTP layer. Wire names are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of affected products carried per record.
pub const MAX_AFFECTED_PRODUCTS: usize = 10;

/// Hard cap on the number of records a query may request.
pub const MAX_LIMIT: usize = 200;

/// Default number of records returned when the caller does not ask.
pub const DEFAULT_LIMIT: usize = 100;

/// Upstream feeds known to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Nvd,
    Cisa,
    Github,
    Pypi,
    Maven,
    Kisa,
}

impl SourceTag {
    /// All tags, in display order.
    pub const ALL: [SourceTag; 6] = [
        SourceTag::Nvd,
        SourceTag::Cisa,
        SourceTag::Github,
        SourceTag::Pypi,
        SourceTag::Maven,
        SourceTag::Kisa,
    ];

    /// Parse a tag from its wire name. Unknown names yield `None` so callers
    /// can silently drop them.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "nvd" => Some(Self::Nvd),
            "cisa" => Some(Self::Cisa),
            "github" => Some(Self::Github),
            "pypi" => Some(Self::Pypi),
            "maven" => Some(Self::Maven),
            "kisa" => Some(Self::Kisa),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nvd => "nvd",
            Self::Cisa => "cisa",
            Self::Github => "github",
            Self::Pypi => "pypi",
            Self::Maven => "maven",
            Self::Kisa => "kisa",
        }
    }
}

/// Ordinal severity scale shared by all sources.
///
/// Per-source derivations differ (CVSS bucketing, upstream enums, fixed
/// values), so magnitudes are only comparable on this scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    /// All severities, most severe first.
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Unknown,
    ];

    /// Bucket a CVSS score (0.0-10.0) onto the ordinal scale.
    ///
    /// A missing score or one below 0.1 is `Unknown`.
    pub fn from_cvss_score(score: Option<f64>) -> Self {
        match score {
            Some(s) if s >= 9.0 => Self::Critical,
            Some(s) if s >= 7.0 => Self::High,
            Some(s) if s >= 4.0 => Self::Medium,
            Some(s) if s >= 0.1 => Self::Low,
            _ => Self::Unknown,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Unknown => "unknown",
        }
    }
}

/// Symbolic lookback window for a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateRange {
    #[default]
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "month")]
    Month,
}

impl DateRange {
    /// Lenient parse: anything unrecognized falls back to the 24h window.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "week" => Self::Week,
            "month" => Self::Month,
            _ => Self::Day,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "24h",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

/// Briefing style requested from the LLM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    #[default]
    Summary,
    Detailed,
}

impl ReportType {
    /// Lenient parse: anything unrecognized falls back to `Summary`.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "detailed" => Self::Detailed,
            _ => Self::Summary,
        }
    }
}

/// The canonical vulnerability record all sources normalize into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    /// Source-native identifier (CVE-YYYY-NNNN, GHSA-xxxx, KISA-<nttId>, OSV id).
    /// Not globally unique across sources.
    pub id: String,
    pub source: SourceTag,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f64>,
    pub title: String,
    pub description: String,
    /// At most [`MAX_AFFECTED_PRODUCTS`] entries.
    pub affected_products: Vec<String>,
    pub published_at: DateTime<Utc>,
    /// Canonical link to the original advisory.
    pub url: String,
    /// Set when the record falls outside the requested window but was kept
    /// because the source would otherwise have returned nothing.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

/// Parameters for one aggregated query.
#[derive(Debug, Clone)]
pub struct VulnQueryParams {
    pub sources: Vec<SourceTag>,
    pub date_range: DateRange,
    /// `None` means no severity filter.
    pub severity: Option<Vec<Severity>>,
    pub limit: usize,
}

impl Default for VulnQueryParams {
    fn default() -> Self {
        Self {
            sources: SourceTag::ALL.to_vec(),
            date_range: DateRange::default(),
            severity: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// Display statistics over the returned (post-truncation) set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnMeta {
    pub total: usize,
    pub sources: std::collections::BTreeMap<SourceTag, usize>,
    pub severities: std::collections::BTreeMap<Severity, usize>,
    pub fetched_at: DateTime<Utc>,
}

/// Response envelope for the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnResponse {
    pub data: Vec<Vulnerability>,
    pub meta: VulnMeta,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn severity_bucket_boundaries() {
        assert_eq!(Severity::from_cvss_score(Some(10.0)), Severity::Critical);
        assert_eq!(Severity::from_cvss_score(Some(9.0)), Severity::Critical);
        assert_eq!(Severity::from_cvss_score(Some(8.9)), Severity::High);
        assert_eq!(Severity::from_cvss_score(Some(7.0)), Severity::High);
        assert_eq!(Severity::from_cvss_score(Some(6.9)), Severity::Medium);
        assert_eq!(Severity::from_cvss_score(Some(4.0)), Severity::Medium);
        assert_eq!(Severity::from_cvss_score(Some(3.9)), Severity::Low);
        assert_eq!(Severity::from_cvss_score(Some(0.1)), Severity::Low);
        assert_eq!(Severity::from_cvss_score(Some(0.0)), Severity::Unknown);
        assert_eq!(Severity::from_cvss_score(None), Severity::Unknown);
    }

    #[test]
    fn source_tag_parse_rejects_unknown() {
        assert_eq!(SourceTag::parse("nvd"), Some(SourceTag::Nvd));
        assert_eq!(SourceTag::parse(" kisa "), Some(SourceTag::Kisa));
        assert_eq!(SourceTag::parse("npm"), None);
        assert_eq!(SourceTag::parse(""), None);
    }

    #[test]
    fn date_range_parse_is_lenient() {
        assert_eq!(DateRange::parse("week"), DateRange::Week);
        assert_eq!(DateRange::parse("month"), DateRange::Month);
        assert_eq!(DateRange::parse("24h"), DateRange::Day);
        assert_eq!(DateRange::parse("fortnight"), DateRange::Day);
    }

    #[test]
    fn vulnerability_serializes_camel_case() {
        let vuln = Vulnerability {
            id: "CVE-2024-0001".into(),
            source: SourceTag::Nvd,
            severity: Severity::Critical,
            cvss_score: Some(9.8),
            title: "CVE-2024-0001: test".into(),
            description: "test".into(),
            affected_products: vec!["vendor:product".into()],
            published_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            url: "https://nvd.nist.gov/vuln/detail/CVE-2024-0001".into(),
            fallback: false,
        };
        let json = serde_json::to_value(&vuln).unwrap();
        assert_eq!(json["cvssScore"], 9.8);
        assert_eq!(json["source"], "nvd");
        assert_eq!(json["affectedProducts"][0], "vendor:product");
        // fallback=false is omitted from the wire form
        assert!(json.get("fallback").is_none());
    }

    #[test]
    fn fallback_flag_survives_round_trip() {
        let vuln = Vulnerability {
            id: "CVE-2023-9999".into(),
            source: SourceTag::Cisa,
            severity: Severity::Critical,
            cvss_score: None,
            title: "old".into(),
            description: "old".into(),
            affected_products: vec![],
            published_at: Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap(),
            url: "https://example.com".into(),
            fallback: true,
        };
        let json = serde_json::to_value(&vuln).unwrap();
        assert_eq!(json["fallback"], true);
        let back: Vulnerability = serde_json::from_value(json).unwrap();
        assert!(back.fallback);
    }
}
