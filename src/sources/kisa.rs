//! KISA (Korea Internet & Security Agency) security notice RSS source.
//!
//! The feed is RSS 2.0 with date-only `pubDate` values and no severity
//! information, so every record is `unknown`. Identifiers are synthesized
//! from the `nttId` query parameter of each item's link.
//!
//! When detail scraping is enabled, each item's advisory page is fetched and
//! the overview section extracted by marker matching. The markers are an
//! unversioned contract with an external site: any failure degrades to using
//! the title as the description.

use super::{FeedSource, FetchParams, http_client, sort_and_truncate};
use crate::dates::parse_ymd;
use crate::error::{FeedError, Result};
use crate::models::{Severity, SourceTag, Vulnerability};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

const KISA_RSS_URL: &str = "https://www.boho.or.kr/kr/rss.do?bbsId=B0000133";

/// Detail pages fetched at most this many at a time.
const DETAIL_CONCURRENCY: usize = 5;

/// Maximum extracted description length, in characters.
const MAX_DETAIL_CHARS: usize = 500;

static NTT_ID_REGEX: Lazy<std::result::Result<Regex, regex_lite::Error>> =
    Lazy::new(|| Regex::new(r"nttId=(\d+)"));

// Overview section: from the "개요" heading to the first trailing heading.
static DETAIL_REGEX: Lazy<std::result::Result<Regex, regex_lite::Error>> =
    Lazy::new(|| Regex::new(r"□\s*개요([\s\S]*?)(?:□\s*참고사이트|□\s*문의사항|□\s*기타)"));

static TAG_REGEX: Lazy<std::result::Result<Regex, regex_lite::Error>> =
    Lazy::new(|| Regex::new(r"<[^>]+>"));

static WHITESPACE_REGEX: Lazy<std::result::Result<Regex, regex_lite::Error>> =
    Lazy::new(|| Regex::new(r"\s+"));

/// KISA security notice RSS source.
pub struct KisaSource {
    client: reqwest::Client,
    detail_scrape: bool,
    api_url: Option<String>,
}

impl KisaSource {
    pub fn new(detail_scrape: bool) -> Self {
        Self {
            client: http_client(),
            detail_scrape,
            api_url: None,
        }
    }

    /// Override the RSS URL (useful for mock servers in tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    async fn fetch_feed(&self) -> Result<Vec<RssItem>> {
        let url = self.api_url.as_deref().unwrap_or(KISA_RSS_URL);
        let response = self
            .client
            .get(url)
            .header("Accept", "application/rss+xml, application/xml, text/xml")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::source_fetch(
                "KISA",
                format!("HTTP {}", response.status()),
            ));
        }

        let xml = response.text().await?;
        let rss: Rss = quick_xml::de::from_str(&xml)?;
        Ok(rss.channel.items)
    }

    /// Best-effort overview extraction from an advisory detail page.
    /// Returns `None` on any failure so the caller falls back to the title.
    async fn fetch_detail(&self, url: &str) -> Option<String> {
        let response = self
            .client
            .get(url)
            .header("Accept", "text/html")
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let html = response.text().await.ok()?;
        extract_overview(&html)
    }
}

#[async_trait]
impl FeedSource for KisaSource {
    async fn fetch(&self, params: &FetchParams) -> Result<Vec<Vulnerability>> {
        // The feed carries no severity data, so every record is unknown; a
        // filter excluding unknown can never match.
        if params.excludes_severity(Severity::Unknown) {
            debug!("severity filter excludes unknown, skipping KISA fetch");
            return Ok(vec![]);
        }

        let items = self.fetch_feed().await?;
        debug!(count = items.len(), "fetched KISA RSS items");
        let start = params.date_range.start();

        let mut dated: Vec<(DateTime<Utc>, String, RssItem)> = Vec::new();
        for item in items {
            let Some(link) = item.link.as_deref() else {
                continue;
            };
            let Some(ntt_id) = extract_ntt_id(link) else {
                warn!(link, "KISA item without nttId, skipping");
                continue;
            };
            let Some(pub_date) = item.pub_date.as_deref() else {
                continue;
            };
            match parse_kisa_date(pub_date) {
                Ok(published) if published >= start => {
                    dated.push((published, ntt_id, item));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping KISA item"),
            }
        }
        dated.truncate(params.limit);

        // Detail pages are scraped with bounded concurrency; order is
        // irrelevant because the final sort restores it.
        let mut vulns: Vec<Vulnerability> = futures::stream::iter(dated)
            .map(|(published, ntt_id, item)| async move {
                let title = item.title.clone().unwrap_or_default();
                let link = item.link.clone().unwrap_or_default();
                let description = if self.detail_scrape {
                    self.fetch_detail(&link).await.unwrap_or_else(|| title.clone())
                } else {
                    title.clone()
                };
                Vulnerability {
                    id: format!("KISA-{ntt_id}"),
                    source: SourceTag::Kisa,
                    severity: Severity::Unknown,
                    cvss_score: None,
                    title,
                    description,
                    affected_products: vec![],
                    published_at: published,
                    url: link,
                    fallback: false,
                }
            })
            .buffer_unordered(DETAIL_CONCURRENCY)
            .collect()
            .await;

        sort_and_truncate(&mut vulns, params.limit);
        Ok(vulns)
    }

    fn tag(&self) -> SourceTag {
        SourceTag::Kisa
    }

    fn name(&self) -> &str {
        "KISA"
    }
}

/// KISA pubDate is a local calendar date (`YYYY-MM-DD`) at midnight; some
/// feeds carry an RFC 2822 date instead.
fn parse_kisa_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = parse_ymd(value) {
        return Ok(dt);
    }
    DateTime::parse_from_rfc2822(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FeedError::date_parse(value, e.to_string()))
}

fn extract_ntt_id(link: &str) -> Option<String> {
    let regex = NTT_ID_REGEX.as_ref().ok()?;
    regex.captures(link).map(|caps| caps[1].to_string())
}

/// Marker-based overview extraction: text between the 개요 heading and the
/// next trailing heading, tags stripped, entities decoded, whitespace
/// collapsed, capped at [`MAX_DETAIL_CHARS`] characters.
fn extract_overview(html: &str) -> Option<String> {
    let regex = DETAIL_REGEX.as_ref().ok()?;
    let section = regex.captures(html)?.get(1)?.as_str();

    let without_tags = TAG_REGEX
        .as_ref()
        .map(|re| re.replace_all(section, " ").into_owned())
        .unwrap_or_else(|_| section.to_string());
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    let collapsed = WHITESPACE_REGEX
        .as_ref()
        .map(|re| re.replace_all(&decoded, " ").into_owned())
        .unwrap_or(decoded);

    let trimmed: String = collapsed.trim().chars().take(MAX_DETAIL_CHARS).collect();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

// ----- RSS 2.0 wire types -----

#[derive(Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Deserialize, Clone)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}
