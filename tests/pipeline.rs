//! Integration tests for the in-memory stream pipeline: framing, decoding,
//! and accumulation over chunked response bodies, without HTTP.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use chatwire::error::RunError;
use chatwire::message::{ContentPart, MessageSnapshot, MessageStatus, ToolCallState};
use chatwire::protocol::{FinishReason, StreamEvent};
use chatwire::stream::{event_stream, line_stream, snapshot_stream};

fn chunk_stream(chunks: &[&str]) -> impl Stream<Item = Result<Bytes, RunError>> + Send {
    let owned: Vec<Result<Bytes, RunError>> = chunks
        .iter()
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk.as_bytes())))
        .collect();
    futures_util::stream::iter(owned)
}

async fn decode_chunks(chunks: &[&str]) -> Vec<StreamEvent> {
    event_stream(line_stream(chunk_stream(chunks), CancellationToken::new()))
        .map(|item| item.expect("event"))
        .collect()
        .await
}

async fn accumulate_chunks(chunks: &[&str]) -> Vec<MessageSnapshot> {
    snapshot_stream(
        event_stream(line_stream(chunk_stream(chunks), CancellationToken::new())),
        "msg-test".to_string(),
    )
    .map(|item| item.expect("snapshot"))
    .collect()
    .await
}

#[tokio::test]
async fn chunk_boundary_invariance() {
    let input = "{\"type\":\"0\",\"value\":\"Hi\"}\n{\"type\":\"0\",\"value\":\" there\"}\n{\"type\":\"d\",\"value\":{\"finishReason\":\"stop\"}}\n";
    let expected = decode_chunks(&[input]).await;
    assert_eq!(expected.len(), 3);

    for split in 1..input.len() {
        let events = decode_chunks(&[&input[..split], &input[split..]]).await;
        assert_eq!(events, expected, "split at byte {split}");
    }
}

#[tokio::test]
async fn malformed_lines_are_skipped_without_failing_the_run() {
    let events = decode_chunks(&[
        "{\"type\":\"0\",\"value\":\"A\"}\n not-json\n{\"type\":\"0\",\"value\":\"B\"}\n",
    ])
    .await;
    assert_eq!(
        events,
        vec![
            StreamEvent::TextDelta("A".to_string()),
            StreamEvent::TextDelta("B".to_string()),
        ]
    );
}

#[tokio::test]
async fn unknown_event_codes_are_skipped_without_loss() {
    let events = decode_chunks(&[
        "{\"type\":\"0\",\"value\":\"keep\"}\n{\"type\":\"zz\",\"value\":{\"future\":true}}\n{\"type\":\"d\",\"value\":{\"finishReason\":\"stop\"}}\n",
    ])
    .await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], StreamEvent::TextDelta("keep".to_string()));
}

#[tokio::test]
async fn envelope_values_roundtrip_deep_equal() {
    let events = decode_chunks(&[
        "{\"type\":\"a\",\"value\":{\"toolCallId\":\"c1\",\"result\":{\"nested\":[1,null,\"x\"],\"ok\":true}}}\n",
    ])
    .await;
    assert_eq!(
        events,
        vec![StreamEvent::ToolResult {
            call_id: "c1".to_string(),
            result: serde_json::json!({"nested": [1, null, "x"], "ok": true}),
            is_error: false,
        }]
    );
}

#[tokio::test]
async fn final_line_without_newline_is_still_decoded() {
    let events = decode_chunks(&[
        "{\"type\":\"0\",\"value\":\"body\"}\n{\"type\":\"d\",\"value\":{\"finishReason\":\"stop\"}}",
    ])
    .await;
    assert_eq!(events.len(), 2);
    assert!(matches!(events[1], StreamEvent::Finish { .. }));
}

#[tokio::test]
async fn utf8_split_across_chunks_reassembles() {
    let line = "{\"type\":\"0\",\"value\":\"na\u{ef}ve \u{1f980}\"}\n";
    let bytes = line.as_bytes();
    // Split inside the crab emoji's 4-byte sequence.
    let split = bytes.len() - 5;
    let chunks: Vec<Result<Bytes, RunError>> = vec![
        Ok(Bytes::copy_from_slice(&bytes[..split])),
        Ok(Bytes::copy_from_slice(&bytes[split..])),
    ];
    let events: Vec<_> = event_stream(line_stream(
        futures_util::stream::iter(chunks),
        CancellationToken::new(),
    ))
    .map(|item| item.expect("event"))
    .collect()
    .await;
    assert_eq!(
        events,
        vec![StreamEvent::TextDelta("na\u{ef}ve \u{1f980}".to_string())]
    );
}

#[tokio::test]
async fn end_to_end_hi_there_scenario() {
    let snapshots = accumulate_chunks(&[
        "{\"type\":\"0\",\"value\":\"Hi\"}\n{\"type\":\"0\",\"value\":\" there\"}\n{\"type\":\"d\",\"value\":{\"finishReason\":\"stop\"}}\n",
    ])
    .await;

    let last = snapshots.last().expect("final snapshot");
    assert_eq!(last.parts.len(), 1);
    assert!(matches!(&last.parts[0], ContentPart::Text(t) if t == "Hi there"));
    assert!(matches!(
        last.status,
        MessageStatus::Complete {
            reason: FinishReason::Stop
        }
    ));
}

#[tokio::test]
async fn snapshots_grow_monotonically() {
    let snapshots = accumulate_chunks(&[
        "{\"type\":\"0\",\"value\":\"a\"}\n",
        "{\"type\":\"0\",\"value\":\"b\"}\n{\"type\":\"b\",\"value\":{\"toolCallId\":\"c1\",\"toolName\":\"lookup\"}}\n",
        "{\"type\":\"c\",\"value\":{\"toolCallId\":\"c1\",\"argsTextDelta\":\"{}\"}}\n",
        "{\"type\":\"9\",\"value\":{\"toolCallId\":\"c1\",\"toolName\":\"lookup\",\"args\":{}}}\n",
        "{\"type\":\"0\",\"value\":\"c\"}\n{\"type\":\"d\",\"value\":{\"finishReason\":\"tool-calls\"}}\n",
    ])
    .await;

    for pair in snapshots.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        assert!(next.parts.len() >= prev.parts.len());
        for (index, part) in prev.parts.iter().enumerate() {
            match (part, &next.parts[index]) {
                (ContentPart::Text(a), ContentPart::Text(b)) => {
                    assert!(b.starts_with(a.as_str()), "text part shrank");
                }
                (ContentPart::ToolCall(a), ContentPart::ToolCall(b)) => {
                    assert!(b.args_text.starts_with(a.args_text.as_str()));
                    assert!(
                        !(a.state.is_terminal() && !b.state.is_terminal()),
                        "tool call reverted from terminal state"
                    );
                }
                (a, b) => assert_eq!(std::mem::discriminant(a), std::mem::discriminant(b)),
            }
        }
    }

    let last = snapshots.last().expect("final snapshot");
    assert!(last.status.is_terminal());
    let call = last.tool_calls().next().expect("tool call part");
    assert_eq!(call.state, ToolCallState::Complete);
}

#[tokio::test]
async fn in_band_error_keeps_partial_progress() {
    let snapshots = accumulate_chunks(&[
        "{\"type\":\"0\",\"value\":\"so far\"}\n{\"type\":\"3\",\"value\":\"model overloaded\"}\n",
    ])
    .await;
    let last = snapshots.last().expect("final snapshot");
    assert_eq!(last.text(), "so far");
    assert!(matches!(
        &last.status,
        MessageStatus::Errored { message } if message == "model overloaded"
    ));
}
