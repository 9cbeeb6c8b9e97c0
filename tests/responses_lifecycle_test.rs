//! Synchronous, background, and continuation scenarios.

mod common;

use std::sync::Arc;

use common::{done, make_turn, text_request, ScriptedAdapter};
use response_gateway::{
    data_connector::{MemoryResponseStorage, ResponseId, ResponseStorage, SharedResponseStorage},
    protocols::responses::{
        ResponseContentPart, ResponseOutputItem, ResponseStatus,
    },
    providers::{
        AdapterError, ChatResult, ProviderContentPart, ProviderEvent, ProviderUsage, StopReason,
    },
    routers::responses::{
        conversation::assemble_conversation,
        non_streaming::{project_chat_result, run_sync_turn, start_background_turn},
        streaming::run_streaming_turn,
    },
};
use serde_json::json;
use tokio::sync::mpsc;

fn memory_storage() -> SharedResponseStorage {
    Arc::new(MemoryResponseStorage::new())
}

fn text_result(text: &str, input: u32, output: u32) -> ChatResult {
    ChatResult {
        content: vec![ProviderContentPart::Text {
            text: text.to_string(),
        }],
        stop_reason: StopReason::EndTurn,
        usage: ProviderUsage {
            input_tokens: input,
            output_tokens: output,
            cached_input_tokens: None,
        },
    }
}

#[tokio::test]
async fn sync_turn_completes_and_persists() {
    let storage = memory_storage();
    let adapter = ScriptedAdapter::one_shot(text_result("Hello there", 10, 5));
    let turn = make_turn(text_request("claude-sonnet-4-responses", "Hi"), &storage).await;
    let response_id = turn.response_id.clone();

    let response = run_sync_turn(&turn, adapter.as_ref(), &storage)
        .await
        .expect("sync turn succeeds");

    assert_eq!(response.status, ResponseStatus::Completed);
    let usage = response.usage.as_ref().unwrap();
    assert_eq!(usage.total_tokens, 15);

    // The stored row reproduces the response on read-back
    let row = storage
        .get_response(&ResponseId::from(response_id.as_str()))
        .await
        .unwrap()
        .expect("stored");
    let fetched = row.to_response();
    assert_eq!(fetched.id, response.id);
    assert_eq!(fetched.model, response.model);
    assert_eq!(fetched.status, response.status);
    assert_eq!(fetched.usage.as_ref().unwrap().total_tokens, 15);
    assert_eq!(
        serde_json::to_value(&fetched.output).unwrap(),
        serde_json::to_value(&response.output).unwrap()
    );
    assert!(row.completed_at.is_some());
}

#[tokio::test]
async fn sync_turn_with_store_false_writes_nothing() {
    let storage = memory_storage();
    let adapter = ScriptedAdapter::one_shot(text_result("ok", 1, 1));
    let mut request = text_request("claude-sonnet-4-responses", "Hi");
    request.store = false;
    let turn = make_turn(request, &storage).await;
    let response_id = turn.response_id.clone();

    run_sync_turn(&turn, adapter.as_ref(), &storage)
        .await
        .expect("sync turn succeeds");

    let row = storage
        .get_response(&ResponseId::from(response_id.as_str()))
        .await
        .unwrap();
    assert!(row.is_none());
}

#[test]
fn projection_moves_reasoning_to_head() {
    let result = ChatResult {
        content: vec![
            ProviderContentPart::Text {
                text: "answer".to_string(),
            },
            ProviderContentPart::ToolUse {
                call_id: "call_9".to_string(),
                name: "probe".to_string(),
                input: json!({"q": 1}),
            },
            ProviderContentPart::Thinking {
                text: "hmm".to_string(),
            },
        ],
        stop_reason: StopReason::ToolUse,
        usage: ProviderUsage {
            input_tokens: 4,
            output_tokens: 2,
            cached_input_tokens: Some(3),
        },
    };

    let (output, usage) = project_chat_result(&result);
    assert_eq!(output.len(), 3);
    assert!(matches!(output[0], ResponseOutputItem::Reasoning { .. }));
    assert!(matches!(output[1], ResponseOutputItem::Message { .. }));
    assert!(matches!(
        &output[2],
        ResponseOutputItem::FunctionToolCall { call_id, .. } if call_id == "call_9"
    ));
    assert_eq!(usage.total_tokens, 6);
    assert_eq!(usage.input_tokens_details.as_ref().unwrap().cached_tokens, 3);
}

// Background mode answers in_progress and finishes later
#[tokio::test]
async fn background_completes_after_response() {
    let storage = memory_storage();
    let adapter = ScriptedAdapter::one_shot(text_result("Done in background", 9, 6));
    let mut request = text_request("claude-sonnet-4-responses", "work");
    request.background = true;
    request.store = true;
    let turn = make_turn(request, &storage).await;
    let response_id = ResponseId::from(turn.response_id.as_str());

    let immediate = start_background_turn(turn, adapter, storage.clone())
        .await
        .expect("background start");
    assert_eq!(immediate.status, ResponseStatus::InProgress);
    assert!(immediate.output.is_empty());

    // Deferred task finishes; poll the row like a client would
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let row = storage.get_response(&response_id).await.unwrap().unwrap();
        if row.status == ResponseStatus::Completed {
            assert_eq!(row.usage.as_ref().unwrap().total_tokens, 15);
            match &row.output[0] {
                ResponseOutputItem::Message { content, .. } => match &content[0] {
                    ResponseContentPart::OutputText { text, .. } => {
                        assert_eq!(text, "Done in background")
                    }
                    other => panic!("unexpected part: {:?}", other),
                },
                other => panic!("unexpected item: {:?}", other),
            }
            break;
        }
        assert!(std::time::Instant::now() < deadline, "background never finished");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn background_failure_is_persisted() {
    let storage = memory_storage();
    // No scripted chat result: the deferred call fails
    let adapter = ScriptedAdapter::streaming(Vec::new());
    let mut request = text_request("claude-sonnet-4-responses", "work");
    request.background = true;
    request.store = true;
    let turn = make_turn(request, &storage).await;
    let response_id = ResponseId::from(turn.response_id.as_str());

    start_background_turn(turn, adapter, storage.clone())
        .await
        .expect("background start");

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let row = storage.get_response(&response_id).await.unwrap().unwrap();
        if row.status == ResponseStatus::Failed {
            assert!(row.error.is_some());
            break;
        }
        assert!(std::time::Instant::now() < deadline, "failure never persisted");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn background_rate_limit_keeps_its_error_type() {
    let storage = memory_storage();
    let adapter = ScriptedAdapter::failing_chat(AdapterError::RateLimited(
        "try again later".to_string(),
    ));
    let mut request = text_request("claude-sonnet-4-responses", "work");
    request.background = true;
    request.store = true;
    let turn = make_turn(request, &storage).await;
    let response_id = ResponseId::from(turn.response_id.as_str());

    start_background_turn(turn, adapter, storage.clone())
        .await
        .expect("background start");

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let row = storage.get_response(&response_id).await.unwrap().unwrap();
        if row.status == ResponseStatus::Failed {
            let error = row.error.as_ref().unwrap();
            assert_eq!(error["type"], "rate_limit_error");
            assert!(error["message"]
                .as_str()
                .unwrap()
                .contains("try again later"));
            break;
        }
        assert!(std::time::Instant::now() < deadline, "failure never persisted");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

// Continuation from an incomplete response succeeds and replays history
#[tokio::test]
async fn continuation_from_incomplete_response() {
    let storage = memory_storage();

    // First turn: aborted mid-stream, leaving an incomplete row behind
    let mut first = text_request("claude-sonnet-4-responses", "Hi");
    first.stream = true;
    first.store = true;
    let turn = make_turn(first, &storage).await;
    let first_id = turn.response_id.clone();
    let initial = turn.base_response(ResponseStatus::InProgress);
    storage.upsert_response(turn.to_stored(&initial)).await.unwrap();

    let adapter = ScriptedAdapter::streaming(vec![
        Ok(ProviderEvent::TextDelta {
            delta: "Hello partial".to_string(),
        }),
        Err(AdapterError::Aborted),
    ]);
    let events = {
        use response_gateway::providers::ProviderAdapter;
        adapter.chat_stream(turn.provider_request.clone()).await.unwrap()
    };
    let (tx, _rx) = mpsc::unbounded_channel();
    run_streaming_turn(turn, events, storage.clone(), tx).await;

    let row = storage
        .get_response(&ResponseId::from(first_id.as_str()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, ResponseStatus::Incomplete);

    // Second turn chains onto the incomplete response: not 404, not 400
    let mut second = text_request("claude-sonnet-4-responses", "please continue");
    second.previous_response_id = Some(first_id);
    let assembled = assemble_conversation(&second, &storage)
        .await
        .expect("continuation assembly succeeds");

    // Prior input, prior partial output, and the new instruction all present
    assert_eq!(assembled.messages.len(), 3);
    let texts: Vec<String> = assembled
        .messages
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|p| match p {
            ProviderContentPart::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["Hi", "Hello partial", "please continue"]);
}

#[tokio::test]
async fn continuation_of_unknown_response_is_not_found() {
    let storage = memory_storage();
    let mut request = text_request("claude-sonnet-4-responses", "continue");
    request.previous_response_id = Some("resp_missing".to_string());

    let err = assemble_conversation(&request, &storage).await.unwrap_err();
    assert!(matches!(
        err,
        response_gateway::routers::responses::conversation::ConversationError::PreviousNotFound(_)
    ));
}

#[tokio::test]
async fn streaming_completion_includes_tool_calls_in_stored_output() {
    let storage = memory_storage();
    let mut request = text_request("claude-sonnet-4-responses", "Hi");
    request.stream = true;
    request.store = true;
    let turn = make_turn(request, &storage).await;
    let response_id = ResponseId::from(turn.response_id.as_str());
    let initial = turn.base_response(ResponseStatus::InProgress);
    storage.upsert_response(turn.to_stored(&initial)).await.unwrap();

    let adapter = ScriptedAdapter::streaming(vec![
        Ok(ProviderEvent::ToolCallStart {
            call_id: "call_z".to_string(),
            name: "zap".to_string(),
            output_index: 0,
        }),
        Ok(ProviderEvent::ToolCallDone {
            call_id: "call_z".to_string(),
            arguments: "{\"level\":3}".to_string(),
            output_index: 0,
        }),
        Ok(done(StopReason::ToolUse, 5, 2)),
    ]);
    let events = {
        use response_gateway::providers::ProviderAdapter;
        adapter.chat_stream(turn.provider_request.clone()).await.unwrap()
    };
    let (tx, _rx) = mpsc::unbounded_channel();
    run_streaming_turn(turn, events, storage.clone(), tx).await;

    let row = storage.get_response(&response_id).await.unwrap().unwrap();
    assert_eq!(row.status, ResponseStatus::Completed);
    assert_eq!(row.output.len(), 1);
    assert!(matches!(
        &row.output[0],
        ResponseOutputItem::FunctionToolCall { arguments, status, .. }
            if arguments == "{\"level\":3}" && status == "completed"
    ));
}
