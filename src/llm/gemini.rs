//! Google Gemini streaming via `streamGenerateContent?alt=sse`.
//!
//! Each frame carries a `candidates` array whose first entry holds
//! `content.parts` with text fragments.

use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::{Frame, LlmRequest, StreamEvent, check_status, relay_sse};

pub(super) async fn run(
    client: &reqwest::Client,
    base_url: &str,
    request: &LlmRequest,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), String> {
    let url = format!(
        "{}/models/{}:streamGenerateContent?alt=sse",
        base_url.trim_end_matches('/'),
        request.model()
    );
    let body = json!({
        "contents": [
            { "parts": [ { "text": request.prompt } ] }
        ],
        "generationConfig": { "maxOutputTokens": request.max_tokens }
    });

    let response = client
        .post(&url)
        .header("x-goog-api-key", &request.api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let response = check_status(response).await?;

    relay_sse(response, tx, decode_frame).await
}

fn decode_frame(frame: &str) -> Frame {
    let Ok(chunk) = serde_json::from_str::<Value>(frame) else {
        return Frame::Skip;
    };
    let Some(parts) = chunk
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
    else {
        return Frame::Skip;
    };
    let deltas: Vec<String> = parts
        .iter()
        .filter_map(|part| part.get("text"))
        .filter_map(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .collect();
    if deltas.is_empty() {
        Frame::Skip
    } else {
        Frame::Text(deltas)
    }
}
