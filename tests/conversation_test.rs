//! Conversation assembly and normalization tests.

mod common;

use std::sync::Arc;

use common::{items_request, text_request};
use response_gateway::{
    data_connector::{MemoryResponseStorage, SharedResponseStorage},
    protocols::responses::ReasoningEffort,
    providers::{
        ProviderContentPart, ProviderImageSource, ProviderRole, ProviderToolChoice,
    },
    routers::responses::conversation::{assemble_conversation, build_provider_request},
};
use serde_json::json;

fn memory_storage() -> SharedResponseStorage {
    Arc::new(MemoryResponseStorage::new())
}

#[tokio::test]
async fn string_input_becomes_single_user_message() {
    let storage = memory_storage();
    let request = text_request("claude-sonnet-4-responses", "Hi there");
    let assembled = assemble_conversation(&request, &storage).await.unwrap();

    assert_eq!(assembled.messages.len(), 1);
    assert_eq!(assembled.messages[0].role, ProviderRole::User);
    assert!(matches!(
        &assembled.messages[0].content[0],
        ProviderContentPart::Text { text } if text == "Hi there"
    ));
    assert!(assembled.system.is_none());
    // The normalized item list carries the message for persistence
    assert_eq!(assembled.items.len(), 1);
}

#[tokio::test]
async fn system_and_developer_messages_hoist_with_instructions_first() {
    let storage = memory_storage();
    let mut request = items_request(
        "claude-sonnet-4-responses",
        json!([
            {"role": "system", "content": "Be terse."},
            {"role": "developer", "content": "Prefer bullet lists."},
            {"role": "user", "content": "Hi"},
        ]),
    );
    request.instructions = Some("You are a helpful assistant.".to_string());

    let assembled = assemble_conversation(&request, &storage).await.unwrap();

    assert_eq!(
        assembled.system.as_deref(),
        Some("You are a helpful assistant.\nBe terse.\nPrefer bullet lists.")
    );
    // System text never rides in the message list
    assert_eq!(assembled.messages.len(), 1);
    assert_eq!(assembled.messages[0].role, ProviderRole::User);
}

#[tokio::test]
async fn function_call_folds_onto_trailing_assistant_message() {
    let storage = memory_storage();
    let request = items_request(
        "claude-sonnet-4-responses",
        json!([
            {"role": "user", "content": "weather?"},
            {"role": "assistant", "content": "Checking."},
            {"type": "function_call", "id": "fc_1", "call_id": "call_1",
             "name": "get_weather", "arguments": "{\"city\":\"NYC\"}"},
            {"type": "function_call_output", "call_id": "call_1", "output": "{\"temp\":70}"},
        ]),
    );

    let assembled = assemble_conversation(&request, &storage).await.unwrap();

    assert_eq!(assembled.messages.len(), 3);
    let assistant = &assembled.messages[1];
    assert_eq!(assistant.role, ProviderRole::Assistant);
    assert_eq!(assistant.content.len(), 2);
    assert!(matches!(
        &assistant.content[1],
        ProviderContentPart::ToolUse { call_id, name, input }
            if call_id == "call_1" && name == "get_weather" && input["city"] == "NYC"
    ));

    let tool_result = &assembled.messages[2];
    assert_eq!(tool_result.role, ProviderRole::User);
    assert!(matches!(
        &tool_result.content[0],
        ProviderContentPart::ToolResult { call_id, content }
            if call_id == "call_1" && content == "{\"temp\":70}"
    ));
}

#[tokio::test]
async fn bare_function_call_starts_new_assistant_message() {
    let storage = memory_storage();
    let request = items_request(
        "claude-sonnet-4-responses",
        json!([
            {"role": "user", "content": "go"},
            {"type": "function_call", "id": "fc_1", "call_id": "call_1",
             "name": "run", "arguments": "not json"},
        ]),
    );

    let assembled = assemble_conversation(&request, &storage).await.unwrap();
    assert_eq!(assembled.messages.len(), 2);
    let assistant = &assembled.messages[1];
    assert_eq!(assistant.role, ProviderRole::Assistant);
    // Unparseable arguments are kept as the raw string
    assert!(matches!(
        &assistant.content[0],
        ProviderContentPart::ToolUse { input, .. } if input == &json!("not json")
    ));
}

#[tokio::test]
async fn consecutive_tool_results_share_one_user_message() {
    let storage = memory_storage();
    let request = items_request(
        "claude-sonnet-4-responses",
        json!([
            {"role": "user", "content": "go"},
            {"type": "function_call", "id": "fc_1", "call_id": "c1", "name": "a", "arguments": "{}"},
            {"type": "function_call", "id": "fc_2", "call_id": "c2", "name": "b", "arguments": "{}"},
            {"type": "function_call_output", "call_id": "c1", "output": "r1"},
            {"type": "function_call_output", "call_id": "c2", "output": "r2"},
        ]),
    );

    let assembled = assemble_conversation(&request, &storage).await.unwrap();
    // user, assistant (two tool_use parts), user (two tool_result parts)
    assert_eq!(assembled.messages.len(), 3);
    assert_eq!(assembled.messages[1].content.len(), 2);
    assert_eq!(assembled.messages[2].content.len(), 2);
}

#[tokio::test]
async fn item_references_are_silently_dropped() {
    let storage = memory_storage();
    let request = items_request(
        "claude-sonnet-4-responses",
        json!([
            {"role": "user", "content": "Hi"},
            {"type": "item_reference", "id": "msg_nonexistent"},
        ]),
    );

    let assembled = assemble_conversation(&request, &storage).await.unwrap();
    assert_eq!(assembled.messages.len(), 1);
    assert_eq!(assembled.items.len(), 1);
}

#[tokio::test]
async fn images_translate_urls_and_data_uris() {
    let storage = memory_storage();
    let request = items_request(
        "claude-sonnet-4-responses",
        json!([
            {"role": "user", "content": [
                {"type": "input_text", "text": "what is this?"},
                {"type": "input_image", "image_url": "https://example.com/cat.png"},
                {"type": "input_image", "image_url": "data:image/png;base64,aGVsbG8="},
                {"type": "input_image"},
            ]},
        ]),
    );

    let assembled = assemble_conversation(&request, &storage).await.unwrap();
    let content = &assembled.messages[0].content;
    // The url-less image is dropped
    assert_eq!(content.len(), 3);
    assert!(matches!(
        &content[1],
        ProviderContentPart::Image { source: ProviderImageSource::Url(url) }
            if url == "https://example.com/cat.png"
    ));
    assert!(matches!(
        &content[2],
        ProviderContentPart::Image { source: ProviderImageSource::Base64 { media_type, data } }
            if media_type == "image/png" && data == "aGVsbG8="
    ));
}

#[tokio::test]
async fn provider_request_maps_tools_effort_and_choice() {
    let storage = memory_storage();
    let request: response_gateway::protocols::responses::ResponsesRequest =
        serde_json::from_value(json!({
            "model": "claude-sonnet-4-responses",
            "input": "Hi",
            "tools": [
                {"type": "function", "name": "get_weather",
                 "description": "Weather lookup",
                 "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}},
            ],
            "tool_choice": {"type": "function", "name": "get_weather"},
            "reasoning": {"effort": "medium"},
            "temperature": 0.5,
            "top_p": 0.9,
            "max_output_tokens": 512,
        }))
        .unwrap();

    let assembled = assemble_conversation(&request, &storage).await.unwrap();
    let provider_request = build_provider_request(&request, "claude-sonnet-4-20250514", &assembled);

    assert_eq!(provider_request.model, "claude-sonnet-4-20250514");
    assert_eq!(provider_request.tools.len(), 1);
    assert_eq!(provider_request.tools[0].name, "get_weather");
    assert!(matches!(
        provider_request.tool_choice,
        Some(ProviderToolChoice::Function(ref name)) if name == "get_weather"
    ));
    assert_eq!(provider_request.thinking_budget, Some(8192));
    assert_eq!(provider_request.temperature, Some(0.5));
    assert_eq!(provider_request.top_p, Some(0.9));
    assert_eq!(provider_request.max_output_tokens, Some(512));
}

#[test]
fn effort_budgets_are_fixed() {
    assert_eq!(ReasoningEffort::Low.token_budget(), 1024);
    assert_eq!(ReasoningEffort::Medium.token_budget(), 8192);
    assert_eq!(ReasoningEffort::High.token_budget(), 32768);
}
