//! OpenAI chat-completions streaming.
//!
//! Chunks carry a `choices` array with a `delta.content` string; a literal
//! `[DONE]` frame ends the stream.

use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::{Frame, LlmRequest, StreamEvent, check_status, relay_sse};

pub(super) async fn run(
    client: &reqwest::Client,
    url: &str,
    request: &LlmRequest,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), String> {
    let body = json!({
        "model": request.model(),
        "max_tokens": request.max_tokens,
        "stream": true,
        "messages": [
            { "role": "user", "content": request.prompt }
        ]
    });

    let response = client
        .post(url)
        .bearer_auth(&request.api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let response = check_status(response).await?;

    relay_sse(response, tx, decode_frame).await
}

fn decode_frame(frame: &str) -> Frame {
    if frame.trim() == "[DONE]" {
        return Frame::Done;
    }
    let Ok(chunk) = serde_json::from_str::<Value>(frame) else {
        return Frame::Skip;
    };
    let Some(choices) = chunk.get("choices").and_then(Value::as_array) else {
        return Frame::Skip;
    };
    let deltas: Vec<String> = choices
        .iter()
        .filter_map(|choice| choice.pointer("/delta/content"))
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
