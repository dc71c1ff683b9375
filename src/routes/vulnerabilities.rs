//! Vulnerability listing endpoint.

use axum::{
    Json,
    extract::{Query, State},
    http::header,
    response::IntoResponse,
};
use serde::Deserialize;

use super::AppState;
use crate::models::{DateRange, MAX_LIMIT, Severity, SourceTag, VulnQueryParams, VulnResponse};

/// Responses are shared-cacheable for 5 minutes with a 60s
/// stale-while-revalidate window.
const CACHE_CONTROL: &str = "public, s-maxage=300, stale-while-revalidate=60";

/// Raw query string shape; everything is optional and lenient.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Comma-separated source tags; unknown tags are silently dropped.
    pub sources: Option<String>,
    /// Comma-separated severities; invalid values are silently dropped.
    pub severity: Option<String>,
    pub date_range: Option<String>,
    pub limit: Option<String>,
}

/// Resolve the raw query into validated parameters.
pub fn parse_query(query: ListQuery) -> VulnQueryParams {
    let sources = match query.sources {
        Some(raw) => raw.split(',').filter_map(SourceTag::parse).collect(),
        None => SourceTag::ALL.to_vec(),
    };

    let severity = query.severity.and_then(|raw| {
        let parsed: Vec<Severity> = raw.split(',').filter_map(Severity::parse).collect();
        if parsed.is_empty() { None } else { Some(parsed) }
    });

    let date_range = query
        .date_range
        .map(|raw| DateRange::parse(&raw))
        .unwrap_or_default();

    let limit = query
        .limit
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .map(|n| n.min(MAX_LIMIT))
        .unwrap_or(crate::models::DEFAULT_LIMIT);

    VulnQueryParams {
        sources,
        date_range,
        severity,
        limit,
    }
}

/// `GET /api/vulnerabilities`
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let params = parse_query(query);
    let response: VulnResponse = state.aggregator.fetch_all(&params).await;
    ([(header::CACHE_CONTROL, CACHE_CONTROL)], Json(response))
}
