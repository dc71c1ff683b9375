//! AI report generation endpoint.
//!
//! Aggregates recent vulnerabilities, builds a Korean-language briefing
//! prompt, and relays the provider's token stream to the client as
//! server-sent events terminated by a `[DONE]` sentinel.

use std::convert::Infallible;

use axum::{
    extract::{Json, State},
    http::header,
    response::{
        IntoResponse,
        sse::{Event, Sse},
    },
};
use futures::stream::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::AppState;
use crate::error::AppError;
use crate::llm::{LlmProvider, LlmRequest, StreamEvent};
use crate::models::{DateRange, ReportType, SourceTag, VulnQueryParams};
use crate::report::{REPORT_MAX_TOKENS, REPORT_VULN_LIMIT, build_prompt};

/// Sources a report may draw from. The listing endpoint covers all feeds;
/// reports stick to the ones with prose worth summarizing.
const ALLOWED_SOURCES: [SourceTag; 3] = [SourceTag::Nvd, SourceTag::Kisa, SourceTag::Github];

const DEFAULT_SOURCES: [SourceTag; 2] = [SourceTag::Nvd, SourceTag::Kisa];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportBody {
    pub llm: Option<LlmBody>,
    pub sources: Option<Vec<String>>,
    pub date_range: Option<String>,
    pub report_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmBody {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

struct ValidatedLlm {
    provider: LlmProvider,
    api_key: String,
    model: Option<String>,
}

fn validate_llm(llm: Option<LlmBody>) -> Result<ValidatedLlm, AppError> {
    let llm = llm.ok_or_else(|| AppError::Validation("LLM 설정이 필요합니다".into()))?;

    let provider = llm
        .provider
        .as_deref()
        .and_then(LlmProvider::parse)
        .ok_or_else(|| AppError::Validation("지원하지 않는 LLM입니다".into()))?;

    let api_key = match llm.api_key {
        Some(key) if key.len() >= 10 => key,
        _ => return Err(AppError::Validation("유효한 API 키가 필요합니다".into())),
    };

    Ok(ValidatedLlm {
        provider,
        api_key,
        model: llm.model,
    })
}

fn resolve_sources(requested: Option<Vec<String>>) -> Vec<SourceTag> {
    let resolved: Vec<SourceTag> = match requested {
        Some(raw) => raw
            .iter()
            .filter_map(|s| SourceTag::parse(s))
            .filter(|tag| ALLOWED_SOURCES.contains(tag))
            .collect(),
        None => Vec::new(),
    };
    if resolved.is_empty() {
        DEFAULT_SOURCES.to_vec()
    } else {
        resolved
    }
}

/// `POST /api/report/generate`
pub async fn generate(
    State(state): State<AppState>,
    Json(body): Json<ReportBody>,
) -> Result<impl IntoResponse, AppError> {
    let llm = validate_llm(body.llm)?;

    let params = VulnQueryParams {
        sources: resolve_sources(body.sources),
        date_range: body
            .date_range
            .map(|raw| DateRange::parse(&raw))
            .unwrap_or_default(),
        severity: None,
        limit: REPORT_VULN_LIMIT,
    };

    let report_type = body
        .report_type
        .map(|raw| ReportType::parse(&raw))
        .unwrap_or_default();

    let response = state.aggregator.fetch_all(&params).await;
    tracing::info!(
        provider = ?llm.provider,
        vulnerabilities = response.data.len(),
        "generating report"
    );
    let prompt = build_prompt(&response.data, report_type, params.date_range);

    let rx = state.gateway.stream(LlmRequest {
        provider: llm.provider,
        api_key: llm.api_key,
        prompt,
        max_tokens: REPORT_MAX_TOKENS,
        model: llm.model,
    });

    Ok((
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(relay(rx)),
    ))
}

enum RelayState {
    Open(mpsc::Receiver<StreamEvent>),
    Sentinel,
    Closed,
}

/// Turn gateway events into SSE frames. Every stream, clean or failed, ends
/// with a `[DONE]` sentinel so clients have a single termination signal.
fn relay(rx: mpsc::Receiver<StreamEvent>) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(RelayState::Open(rx), |state| async move {
        match state {
            RelayState::Open(mut rx) => match rx.recv().await {
                Some(StreamEvent::Content(text)) => {
                    let payload = serde_json::json!({ "content": text }).to_string();
                    Some((Ok(Event::default().data(payload)), RelayState::Open(rx)))
                }
                Some(StreamEvent::Error(message)) => {
                    let payload = serde_json::json!({ "error": message }).to_string();
                    Some((Ok(Event::default().data(payload)), RelayState::Sentinel))
                }
                Some(StreamEvent::Done) | None => {
                    Some((Ok(Event::default().data("[DONE]")), RelayState::Closed))
                }
            },
            RelayState::Sentinel => Some((Ok(Event::default().data("[DONE]")), RelayState::Closed)),
            RelayState::Closed => None,
        }
    })
}
