//! End-to-end streaming orchestration scenarios driven by a scripted adapter.

mod common;

use std::sync::Arc;

use common::{collect_frames, done, event_types, make_turn, text_request, ScriptedAdapter};
use response_gateway::{
    data_connector::{
        MemoryResponseStorage, ResponseId, ResponseStorage, SharedResponseStorage,
    },
    protocols::responses::{ResponseOutputItem, ResponseStatus},
    providers::{AdapterError, ProviderAdapter, ProviderEvent, StopReason},
    routers::responses::streaming::run_streaming_turn,
};
use tokio::sync::mpsc;

fn memory_storage() -> SharedResponseStorage {
    Arc::new(MemoryResponseStorage::new())
}

fn text_delta(s: &str) -> Result<ProviderEvent, AdapterError> {
    Ok(ProviderEvent::TextDelta {
        delta: s.to_string(),
    })
}

async fn drive(
    request: response_gateway::protocols::responses::ResponsesRequest,
    script: Vec<Result<ProviderEvent, AdapterError>>,
    storage: &SharedResponseStorage,
) -> (Vec<common::Frame>, String) {
    let adapter = ScriptedAdapter::streaming(script);
    let turn = make_turn(request, storage).await;
    let response_id = turn.response_id.clone();

    // The create handler writes the in_progress row before the first event
    if turn.request.store {
        let initial = turn.base_response(ResponseStatus::InProgress);
        storage
            .upsert_response(turn.to_stored(&initial))
            .await
            .expect("initial upsert");
    }

    let events = adapter
        .chat_stream(turn.provider_request.clone())
        .await
        .expect("stream opens");
    let (tx, rx) = mpsc::unbounded_channel();
    run_streaming_turn(turn, events, storage.clone(), tx).await;
    (collect_frames(rx).await, response_id)
}

// Plain text stream, no persistence
#[tokio::test]
async fn text_stream_emits_full_event_sequence() {
    let storage = memory_storage();
    let mut request = text_request("claude-sonnet-4-responses", "Hi");
    request.stream = true;
    request.store = false;

    let script = vec![
        text_delta("Hello"),
        text_delta(" world"),
        Ok(done(StopReason::EndTurn, 10, 5)),
    ];
    let (frames, _) = drive(request, script, &storage).await;

    assert_eq!(
        event_types(&frames),
        vec![
            "response.in_progress",
            "response.output_item.added",
            "response.content_part.added",
            "response.output_text.delta",
            "response.output_text.delta",
            "response.output_text.done",
            "response.content_part.done",
            "response.output_item.done",
            "response.completed",
            "[DONE]",
        ]
    );

    let completed = frames[frames.len() - 2].json();
    let usage = &completed["response"]["usage"];
    assert_eq!(usage["input_tokens"], 10);
    assert_eq!(usage["output_tokens"], 5);
    assert_eq!(usage["total_tokens"], 15);
    assert_eq!(
        completed["response"]["output"][0]["content"][0]["text"],
        "Hello world"
    );
}

// A tool-only turn never opens a message item
#[tokio::test]
async fn pure_tool_call_opens_no_message() {
    let storage = memory_storage();
    let mut request = text_request("claude-sonnet-4-responses", "weather?");
    request.stream = true;
    request.store = false;

    let script = vec![
        Ok(ProviderEvent::ToolCallStart {
            call_id: "call_abc".to_string(),
            name: "get_weather".to_string(),
            output_index: 0,
        }),
        Ok(ProviderEvent::ToolCallDelta {
            call_id: "call_abc".to_string(),
            arguments_delta: "{\"city\":\"NYC\"}".to_string(),
        }),
        Ok(ProviderEvent::ToolCallDone {
            call_id: "call_abc".to_string(),
            arguments: "{\"city\":\"NYC\"}".to_string(),
            output_index: 0,
        }),
        Ok(done(StopReason::ToolUse, 12, 7)),
    ];
    let (frames, _) = drive(request, script, &storage).await;

    assert_eq!(
        event_types(&frames),
        vec![
            "response.in_progress",
            "response.output_item.added",
            "response.output_item.done",
            "response.completed",
            "[DONE]",
        ]
    );

    let added = frames[1].json();
    assert_eq!(added["output_index"], 0);
    assert_eq!(added["item"]["type"], "function_call");
    assert_eq!(added["item"]["call_id"], "call_abc");
    assert_eq!(added["item"]["arguments"], "");

    let item_done = frames[2].json();
    assert_eq!(item_done["item"]["status"], "completed");
    assert_eq!(item_done["item"]["arguments"], "{\"city\":\"NYC\"}");
}

// Mixed output: message at index 0, function call at index 1
#[tokio::test]
async fn mixed_output_assigns_indices_by_first_appearance() {
    let storage = memory_storage();
    let mut request = text_request("claude-sonnet-4-responses", "Hi");
    request.stream = true;
    request.store = false;

    let script = vec![
        text_delta("Let me check."),
        Ok(ProviderEvent::ToolCallStart {
            call_id: "call_1".to_string(),
            name: "lookup".to_string(),
            output_index: 0,
        }),
        Ok(ProviderEvent::ToolCallDone {
            call_id: "call_1".to_string(),
            arguments: "{}".to_string(),
            output_index: 0,
        }),
        Ok(done(StopReason::ToolUse, 8, 4)),
    ];
    let (frames, _) = drive(request, script, &storage).await;

    let message_added = frames[1].json();
    assert_eq!(message_added["item"]["type"], "message");
    assert_eq!(message_added["output_index"], 0);

    let call_added = frames
        .iter()
        .map(|f| f.json())
        .find(|j| {
            j["type"] == "response.output_item.added" && j["item"]["type"] == "function_call"
        })
        .expect("function_call added");
    assert_eq!(call_added["output_index"], 1);

    let completed = frames[frames.len() - 2].json();
    assert_eq!(completed["response"]["output"].as_array().unwrap().len(), 2);
}

// A mid-stream abort persists an incomplete row and emits only [DONE]
#[tokio::test]
async fn abort_persists_incomplete() {
    let storage = memory_storage();
    let mut request = text_request("claude-sonnet-4-responses", "Hi");
    request.stream = true;
    request.store = true;

    let script = vec![
        text_delta("Hello"),
        text_delta(" partial"),
        Err(AdapterError::Aborted),
    ];
    let (frames, response_id) = drive(request, script, &storage).await;

    let types = event_types(&frames);
    assert!(!types.contains(&"response.completed".to_string()));
    assert!(!types.contains(&"response.failed".to_string()));
    assert_eq!(types.last().map(String::as_str), Some("[DONE]"));

    let row = storage
        .get_response(&ResponseId::from(response_id.as_str()))
        .await
        .unwrap()
        .expect("row persisted");
    assert_eq!(row.status, ResponseStatus::Incomplete);
    assert_eq!(row.incomplete_details.as_ref().unwrap()["reason"], "interrupted");
    match &row.output[0] {
        ResponseOutputItem::Message { content, status, .. } => {
            assert_eq!(status, "incomplete");
            match &content[0] {
                response_gateway::protocols::responses::ResponseContentPart::OutputText {
                    text,
                    ..
                } => assert_eq!(text, "Hello partial"),
                other => panic!("unexpected content part: {:?}", other),
            }
        }
        other => panic!("unexpected output item: {:?}", other),
    }
}

// Non-abort upstream error: error event, response.failed, [DONE], failed row
#[tokio::test]
async fn upstream_error_emits_failed_and_persists() {
    let storage = memory_storage();
    let mut request = text_request("claude-sonnet-4-responses", "Hi");
    request.stream = true;
    request.store = true;

    let script = vec![
        text_delta("Hel"),
        Err(AdapterError::Upstream("backend exploded".to_string())),
    ];
    let (frames, response_id) = drive(request, script, &storage).await;

    let types = event_types(&frames);
    assert!(types.contains(&"error".to_string()));
    assert!(types.contains(&"response.failed".to_string()));
    assert_eq!(types.last().map(String::as_str), Some("[DONE]"));

    let error_frame = frames
        .iter()
        .find(|f| f.event.as_deref() == Some("error"))
        .unwrap()
        .json();
    assert_eq!(error_frame["error"]["type"], "server_error");
    assert!(error_frame["error"]["message"]
        .as_str()
        .unwrap()
        .contains("backend exploded"));

    let row = storage
        .get_response(&ResponseId::from(response_id.as_str()))
        .await
        .unwrap()
        .expect("row persisted");
    assert_eq!(row.status, ResponseStatus::Failed);
    assert!(row.output.is_empty());
    assert!(row.error.is_some());
}

// A mid-stream rate limit keeps its error type in the events and the row
#[tokio::test]
async fn rate_limit_error_keeps_its_type() {
    let storage = memory_storage();
    let mut request = text_request("claude-sonnet-4-responses", "Hi");
    request.stream = true;
    request.store = true;

    let script = vec![Err(AdapterError::RateLimited("slow down".to_string()))];
    let (frames, response_id) = drive(request, script, &storage).await;

    let error_frame = frames
        .iter()
        .find(|f| f.event.as_deref() == Some("error"))
        .unwrap()
        .json();
    assert_eq!(error_frame["error"]["type"], "rate_limit_error");

    let failed_frame = frames
        .iter()
        .find(|f| f.event.as_deref() == Some("response.failed"))
        .unwrap()
        .json();
    assert_eq!(
        failed_frame["response"]["error"]["type"],
        "rate_limit_error"
    );

    let row = storage
        .get_response(&ResponseId::from(response_id.as_str()))
        .await
        .unwrap()
        .expect("row persisted");
    assert_eq!(row.status, ResponseStatus::Failed);
    assert_eq!(row.error.as_ref().unwrap()["type"], "rate_limit_error");
}

// Sequencing, event-name/type equality, and id stability across a stream
#[tokio::test]
async fn stream_invariants_hold() {
    let storage = memory_storage();
    let mut request = text_request("claude-sonnet-4-responses", "Hi");
    request.stream = true;
    request.store = false;

    let script = vec![
        text_delta("a"),
        Ok(ProviderEvent::ToolCallStart {
            call_id: "c1".to_string(),
            name: "f".to_string(),
            output_index: 0,
        }),
        Ok(ProviderEvent::ToolCallDone {
            call_id: "c1".to_string(),
            arguments: "{}".to_string(),
            output_index: 0,
        }),
        Ok(done(StopReason::EndTurn, 1, 1)),
    ];
    let (frames, _) = drive(request, script, &storage).await;

    // Exactly one [DONE], last
    let done_count = frames.iter().filter(|f| f.is_done_marker()).count();
    assert_eq!(done_count, 1);
    assert!(frames.last().unwrap().is_done_marker());

    let mut last_sequence = 0u64;
    let mut response_ids = Vec::new();
    let mut message_item_ids = Vec::new();

    for frame in frames.iter().filter(|f| !f.is_done_marker()) {
        let payload = frame.json();
        let payload_type = payload["type"].as_str().unwrap();

        // event: line mirrors the payload type
        assert_eq!(frame.event.as_deref(), Some(payload_type));

        if payload_type == "error" {
            continue;
        }

        // strictly increasing sequence, starting at 1
        let sequence = payload["sequence_number"].as_u64().unwrap();
        assert!(sequence > last_sequence, "sequence must increase");
        if last_sequence == 0 {
            assert_eq!(sequence, 1, "first sequence number is 1");
        }
        last_sequence = sequence;

        if let Some(response) = payload.get("response") {
            response_ids.push(response["id"].as_str().unwrap().to_string());
        }
        if let Some(item_id) = payload.get("item_id").and_then(|v| v.as_str()) {
            message_item_ids.push(item_id.to_string());
        }
    }

    response_ids.dedup();
    assert_eq!(response_ids.len(), 1, "one response id across the stream");
    message_item_ids.dedup();
    assert!(
        message_item_ids.len() <= 1,
        "text events share one message item id"
    );
}

// Empty-delta stream: opened message still closes with empty text
#[tokio::test]
async fn opened_message_closes_with_empty_text() {
    let storage = memory_storage();
    let mut request = text_request("claude-sonnet-4-responses", "Hi");
    request.stream = true;
    request.store = false;

    let script = vec![text_delta(""), Ok(done(StopReason::EndTurn, 1, 0))];
    let (frames, _) = drive(request, script, &storage).await;

    let text_done = frames
        .iter()
        .find(|f| f.event.as_deref() == Some("response.output_text.done"))
        .expect("output_text.done emitted")
        .json();
    assert_eq!(text_done["text"], "");
}

// Thinking surfaces as a reasoning item heading the final output
#[tokio::test]
async fn thinking_heads_final_output() {
    let storage = memory_storage();
    let mut request = text_request("claude-sonnet-4-responses", "Hi");
    request.stream = true;
    request.store = false;

    let script = vec![
        Ok(ProviderEvent::ThinkingDelta {
            delta: "pondering".to_string(),
        }),
        Ok(ProviderEvent::ThinkingDone {
            text: "pondering deeply".to_string(),
        }),
        text_delta("Answer"),
        Ok(done(StopReason::EndTurn, 2, 2)),
    ];
    let (frames, _) = drive(request, script, &storage).await;

    // No mid-stream wire events for thinking
    for frame in frames.iter().filter(|f| !f.is_done_marker()) {
        let t = frame.json()["type"].as_str().unwrap().to_string();
        assert!(!t.contains("reasoning"));
    }

    let completed = frames[frames.len() - 2].json();
    let output = completed["response"]["output"].as_array().unwrap().clone();
    assert_eq!(output.len(), 2);
    assert_eq!(output[0]["type"], "reasoning");
    assert_eq!(output[0]["summary"][0]["text"], "pondering deeply");
    assert_eq!(output[1]["type"], "message");
}

// Checkpoint: debounced partial write lands while the stream is idle
#[tokio::test(start_paused = true)]
async fn checkpoint_writes_partial_output_mid_stream() {
    let storage = memory_storage();
    let mut request = text_request("claude-sonnet-4-responses", "Hi");
    request.stream = true;
    request.store = true;

    let turn = make_turn(request, &storage).await;
    let response_id = ResponseId::from(turn.response_id.as_str());
    let initial = turn.base_response(ResponseStatus::InProgress);
    storage
        .upsert_response(turn.to_stored(&initial))
        .await
        .unwrap();

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let events: response_gateway::providers::EventStream = Box::pin(
        tokio_stream::wrappers::UnboundedReceiverStream::new(event_rx),
    );
    let (tx, rx) = mpsc::unbounded_channel();
    let driver = tokio::spawn(run_streaming_turn(turn, events, storage.clone(), tx));

    event_tx
        .send(Ok(ProviderEvent::TextDelta {
            delta: "partial".to_string(),
        }))
        .unwrap();

    // Paused time auto-advances past the 1s coalescing window once idle
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let row = storage.get_response(&response_id).await.unwrap().unwrap();
        if !row.output.is_empty() {
            assert_eq!(row.status, ResponseStatus::InProgress);
            match &row.output[0] {
                ResponseOutputItem::Message { status, .. } => {
                    assert_eq!(status, "in_progress")
                }
                other => panic!("unexpected checkpoint item: {:?}", other),
            }
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "checkpoint never landed"
        );
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    event_tx.send(Ok(done(StopReason::EndTurn, 3, 1))).unwrap();
    drop(event_tx);
    driver.await.unwrap();
    drop(collect_frames(rx).await);

    let row = storage.get_response(&response_id).await.unwrap().unwrap();
    assert_eq!(row.status, ResponseStatus::Completed);
}
