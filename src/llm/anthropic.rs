//! Anthropic Messages API streaming.
//!
//! Events arrive as typed SSE frames; only `content_block_delta` frames with
//! a nested `text_delta` carry text.

use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::{Frame, LlmRequest, StreamEvent, check_status, relay_sse};

const ANTHROPIC_VERSION: &str = "2023-06-01";

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
        .header("x-api-key", &request.api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&body)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let response = check_status(response).await?;

    relay_sse(response, tx, decode_frame).await
}

fn decode_frame(frame: &str) -> Frame {
    let Ok(event) = serde_json::from_str::<Value>(frame) else {
        return Frame::Skip;
    };
    if event.get("type").and_then(Value::as_str) == Some("content_block_delta")
        && event
            .pointer("/delta/type")
            .and_then(Value::as_str)
            == Some("text_delta")
    {
        if let Some(text) = event.pointer("/delta/text").and_then(Value::as_str) {
            return Frame::Text(vec![text.to_string()]);
        }
    }
    Frame::Skip
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmGateway, LlmProvider};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> LlmRequest {
        LlmRequest {
            provider: LlmProvider::Claude,
            api_key: "sk-ant-test-12345".into(),
            prompt: "briefing please".into(),
            max_tokens: 256,
            model: None,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn content_deltas_then_done() {
        let mock_server = MockServer::start().await;
        let sse = "event: message_start\n\
                   data: {\"type\":\"message_start\"}\n\n\
                   data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n\
                   data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n\
                   data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"!\"}}\n\n\
                   data: {\"type\":\"message_stop\"}\n\n";
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-api-key", "sk-ant-test-12345"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let gateway = LlmGateway::new().with_anthropic_url(mock_server.uri());
        let events = collect(gateway.stream(request())).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("Hel".into()),
                StreamEvent::Content("lo".into()),
                StreamEvent::Content("!".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn auth_failure_is_one_error_and_no_done() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_raw(r#"{"error":{"type":"authentication_error"}}"#, "application/json"),
            )
            .mount(&mock_server)
            .await;

        let gateway = LlmGateway::new().with_anthropic_url(mock_server.uri());
        let events = collect(gateway.stream(request())).await;
        assert_eq!(
            events,
            vec![StreamEvent::Error("API 키가 유효하지 않습니다".into())]
        );
    }

    #[tokio::test]
    async fn rate_limit_is_classified() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let gateway = LlmGateway::new().with_anthropic_url(mock_server.uri());
        let events = collect(gateway.stream(request())).await;
        assert_eq!(
            events,
            vec![StreamEvent::Error(
                "요청이 너무 많습니다. 잠시 후 다시 시도해주세요".into()
            )]
        );
    }

    #[test]
    fn non_text_frames_skip() {
        assert!(matches!(decode_frame(r#"{"type":"ping"}"#), Frame::Skip));
        assert!(matches!(decode_frame("not json"), Frame::Skip));
        assert!(matches!(
            decode_frame(
                r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}"#
            ),
            Frame::Skip
        ));
    }
}
