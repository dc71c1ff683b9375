//! Fan-out aggregation and cross-source deduplication.
//!
//! The aggregator owns the source registry, invokes the requested adapters
//! concurrently, merges their results with the precedence rules, and
//! computes the display statistics for the returned set.

use crate::config::Config;
use crate::models::{
    Severity, SourceTag, VulnMeta, VulnQueryParams, VulnResponse, Vulnerability,
};
use crate::sources::{
    FeedSource, FetchParams, cisa::CisaSource, github::GithubSource, kisa::KisaSource,
    nvd::NvdSource, osv::OsvSource,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry of feed sources plus the merge logic over their output.
///
/// Built once at startup and shared by reference; tests construct one from
/// fake sources.
pub struct Aggregator {
    sources: Vec<Arc<dyn FeedSource>>,
}

impl Aggregator {
    /// Aggregator over an explicit source list.
    pub fn new(sources: Vec<Arc<dyn FeedSource>>) -> Self {
        Self { sources }
    }

    /// Aggregator over all six production adapters.
    pub fn from_config(config: &Config) -> Self {
        Self::new(vec![
            Arc::new(NvdSource::new()),
            Arc::new(CisaSource::new()),
            Arc::new(GithubSource::new(config.github_token.clone())),
            Arc::new(OsvSource::pypi()),
            Arc::new(OsvSource::maven()),
            Arc::new(KisaSource::new(config.kisa_detail_scrape)),
        ])
    }

    fn source_for(&self, tag: SourceTag) -> Option<Arc<dyn FeedSource>> {
        self.sources.iter().find(|s| s.tag() == tag).cloned()
    }

    /// Fetch from every requested source concurrently and merge.
    ///
    /// A source that fails (error or panic) contributes nothing; the batch
    /// never aborts on a partial failure.
    pub async fn fetch_all(&self, params: &VulnQueryParams) -> VulnResponse {
        // Requested tags without a registered adapter are silently dropped.
        let selected: Vec<Arc<dyn FeedSource>> = params
            .sources
            .iter()
            .filter_map(|tag| self.source_for(*tag))
            .collect();

        let fetch_params = FetchParams {
            date_range: params.date_range,
            severity: params.severity.clone(),
            limit: params.limit,
        };

        let mut handles = Vec::with_capacity(selected.len());
        for source in selected {
            let fetch_params = fetch_params.clone();
            handles.push(tokio::spawn(async move {
                let name = source.name().to_string();
                (name, source.fetch(&fetch_params).await)
            }));
        }

        let mut merged: Vec<Vulnerability> = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((name, Ok(vulns))) => {
                    debug!(source = %name, count = vulns.len(), "source fetched");
                    merged.extend(vulns);
                }
                Ok((name, Err(e))) => {
                    warn!(source = %name, error = %e, "source fetch failed");
                }
                Err(e) => {
                    warn!(error = %e, "source task panicked");
                }
            }
        }

        let mut data = dedupe(merged);
        // Stable sort keeps input order among records published at the same
        // instant.
        data.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        data.truncate(params.limit);

        let meta = VulnMeta {
            total: data.len(),
            sources: count_by_source(&data),
            severities: count_by_severity(&data),
            fetched_at: Utc::now(),
        };

        VulnResponse { data, meta }
    }
}

/// Deduplicate by `id`, preserving first-seen position.
///
/// First-seen wins, with one directional override: an `nvd` record replaces
/// a previously seen `cisa` record under the same id, in place, because NVD
/// carries richer metadata for the same CVE.
fn dedupe(vulns: Vec<Vulnerability>) -> Vec<Vulnerability> {
    let mut kept: Vec<Vulnerability> = Vec::with_capacity(vulns.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for vuln in vulns {
        match index.get(&vuln.id) {
            None => {
                index.insert(vuln.id.clone(), kept.len());
                kept.push(vuln);
            }
            Some(&at) => {
                if kept[at].source == SourceTag::Cisa && vuln.source == SourceTag::Nvd {
                    kept[at] = vuln;
                }
            }
        }
    }
    kept
}

/// Per-source counts over the returned set, every tag present.
fn count_by_source(vulns: &[Vulnerability]) -> BTreeMap<SourceTag, usize> {
    let mut counts: BTreeMap<SourceTag, usize> =
        SourceTag::ALL.iter().map(|tag| (*tag, 0)).collect();
    for vuln in vulns {
        *counts.entry(vuln.source).or_default() += 1;
    }
    counts
}

/// Per-severity counts over the returned set, every level present.
fn count_by_severity(vulns: &[Vulnerability]) -> BTreeMap<Severity, usize> {
    let mut counts: BTreeMap<Severity, usize> =
        Severity::ALL.iter().map(|sev| (*sev, 0)).collect();
    for vuln in vulns {
        *counts.entry(vuln.severity).or_default() += 1;
    }
    counts
}
