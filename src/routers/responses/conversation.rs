//! Conversation assembly
//!
//! Builds the normalized conversation an adapter consumes: the stored history
//! referenced by `previous_response_id` (input items then output items, in
//! that order), followed by the current request's input, translated into
//! [`ProviderMessage`]s with system text hoisted out.

use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{
    data_connector::{ResponseId, ResponseStorageError, SharedResponseStorage},
    protocols::responses::{
        normalize_input_item, ResponseContentPart, ResponseInput, ResponseInputOutputItem,
        ResponseOutputItem, ResponsesRequest, TextFormat, ToolChoice, ToolChoiceMode,
    },
    providers::{
        ProviderContentPart, ProviderImageSource, ProviderMessage, ProviderRequest, ProviderRole,
        ProviderTool, ProviderToolChoice,
    },
};

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("Previous response '{0}' not found.")]
    PreviousNotFound(String),

    #[error("Previous response '{0}' was not stored and cannot be continued.")]
    PreviousNotStored(String),

    #[error(transparent)]
    Storage(#[from] ResponseStorageError),
}

#[derive(Debug)]
pub struct AssembledConversation {
    pub messages: Vec<ProviderMessage>,
    pub system: Option<String>,
    /// Full normalized item list (history seed + current input); persisted as
    /// the response's input so chaining stays transitive.
    pub items: Vec<ResponseInputOutputItem>,
}

/// Load history (when chained) and normalize the request input into one item
/// list, then translate it into provider messages.
///
/// Incomplete and cancelled prior responses are deliberately allowed; that is
/// what makes mid-stream injection continuation work.
pub async fn assemble_conversation(
    request: &ResponsesRequest,
    storage: &SharedResponseStorage,
) -> Result<AssembledConversation, ConversationError> {
    let mut items: Vec<ResponseInputOutputItem> = Vec::new();

    if let Some(previous_id) = &request.previous_response_id {
        let row = storage
            .get_response(&ResponseId::from(previous_id.as_str()))
            .await?
            .ok_or_else(|| ConversationError::PreviousNotFound(previous_id.clone()))?;
        if !row.store {
            return Err(ConversationError::PreviousNotStored(previous_id.clone()));
        }
        items.extend(row.input.iter().cloned());
        items.extend(row.output.iter().map(output_item_as_input));
    }

    append_request_input(&mut items, &request.input);

    let (messages, system) = translate_items(&items, request.instructions.as_deref());

    Ok(AssembledConversation {
        messages,
        system,
        items,
    })
}

/// Stored output items re-enter the item list in their input-side shape.
fn output_item_as_input(item: &ResponseOutputItem) -> ResponseInputOutputItem {
    match item {
        ResponseOutputItem::Message {
            id,
            role,
            content,
            status,
        } => ResponseInputOutputItem::Message {
            id: id.clone(),
            role: role.clone(),
            content: content.clone(),
            status: Some(status.clone()),
        },
        ResponseOutputItem::Reasoning {
            id,
            summary,
            status,
            ..
        } => ResponseInputOutputItem::Reasoning {
            id: id.clone(),
            summary: summary.clone(),
            status: Some(status.clone()),
        },
        ResponseOutputItem::FunctionToolCall {
            id,
            call_id,
            name,
            arguments,
            status,
        } => ResponseInputOutputItem::FunctionToolCall {
            id: id.clone(),
            call_id: call_id.clone(),
            name: name.clone(),
            arguments: arguments.clone(),
            status: Some(status.clone()),
        },
    }
}

fn append_request_input(items: &mut Vec<ResponseInputOutputItem>, input: &ResponseInput) {
    match input {
        ResponseInput::Text(text) => {
            items.push(normalize_input_item(
                &ResponseInputOutputItem::SimpleInputMessage {
                    content: crate::protocols::responses::StringOrContentParts::String(
                        text.clone(),
                    ),
                    role: "user".to_string(),
                    r#type: None,
                },
            ));
        }
        ResponseInput::Items(new_items) => {
            let seed_ids: HashSet<String> = items
                .iter()
                .filter_map(|item| item.id().map(str::to_string))
                .collect();
            for item in new_items {
                match item {
                    // Dedup markers: the referenced item is either already in
                    // the resolved context or unknown; dropped either way.
                    ResponseInputOutputItem::ItemReference { id } => {
                        if !seed_ids.contains(id) {
                            debug!(item_id = %id, "dropping item_reference to unknown item");
                        }
                    }
                    other => items.push(normalize_input_item(other)),
                }
            }
        }
    }
}

/// Translate normalized items into provider messages, hoisting system text.
fn translate_items(
    items: &[ResponseInputOutputItem],
    instructions: Option<&str>,
) -> (Vec<ProviderMessage>, Option<String>) {
    let mut messages: Vec<ProviderMessage> = Vec::new();
    let mut system_parts: Vec<String> = Vec::new();

    if let Some(instructions) = instructions {
        if !instructions.is_empty() {
            system_parts.push(instructions.to_string());
        }
    }

    for item in items {
        match item {
            ResponseInputOutputItem::Message { role, content, .. } => {
                match role.as_str() {
                    "system" | "developer" => {
                        let text = collect_text(content);
                        if !text.is_empty() {
                            system_parts.push(text);
                        }
                    }
                    role_str => {
                        let provider_role = if role_str == "assistant" {
                            ProviderRole::Assistant
                        } else {
                            ProviderRole::User
                        };
                        let parts: Vec<ProviderContentPart> =
                            content.iter().filter_map(translate_part).collect();
                        if !parts.is_empty() {
                            messages.push(ProviderMessage {
                                role: provider_role,
                                content: parts,
                            });
                        }
                    }
                }
            }
            ResponseInputOutputItem::FunctionToolCall {
                call_id,
                name,
                arguments,
                ..
            } => {
                let input = serde_json::from_str(arguments)
                    .unwrap_or_else(|_| Value::String(arguments.clone()));
                let part = ProviderContentPart::ToolUse {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    input,
                };
                match messages.last_mut() {
                    Some(last) if last.role == ProviderRole::Assistant => {
                        last.content.push(part)
                    }
                    _ => messages.push(ProviderMessage {
                        role: ProviderRole::Assistant,
                        content: vec![part],
                    }),
                }
            }
            ResponseInputOutputItem::FunctionCallOutput { call_id, output, .. } => {
                let part = ProviderContentPart::ToolResult {
                    call_id: call_id.clone(),
                    content: output.clone(),
                };
                let fold = matches!(messages.last(), Some(last) if last.role == ProviderRole::User
                    && last
                        .content
                        .iter()
                        .any(|p| matches!(p, ProviderContentPart::ToolResult { .. })));
                if let (true, Some(last)) = (fold, messages.last_mut()) {
                    last.content.push(part);
                } else {
                    messages.push(ProviderMessage {
                        role: ProviderRole::User,
                        content: vec![part],
                    });
                }
            }
            // Thinking from prior turns is not replayed to providers
            ResponseInputOutputItem::Reasoning { .. } => {}
            // Dropped during normalization
            ResponseInputOutputItem::ItemReference { .. } => {}
            // Normalized away before translation
            ResponseInputOutputItem::SimpleInputMessage { .. } => {}
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    (messages, system)
}

fn collect_text(content: &[ResponseContentPart]) -> String {
    content
        .iter()
        .filter_map(|part| match part {
            ResponseContentPart::OutputText { text, .. }
            | ResponseContentPart::InputText { text }
            | ResponseContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn translate_part(part: &ResponseContentPart) -> Option<ProviderContentPart> {
    match part {
        ResponseContentPart::OutputText { text, .. }
        | ResponseContentPart::InputText { text }
        | ResponseContentPart::Text { text } => Some(ProviderContentPart::Text {
            text: text.clone(),
        }),
        ResponseContentPart::InputImage { image_url } => {
            let url = image_url.as_ref()?;
            match parse_data_uri(url) {
                Some((media_type, data)) => Some(ProviderContentPart::Image {
                    source: ProviderImageSource::Base64 { media_type, data },
                }),
                None => Some(ProviderContentPart::Image {
                    source: ProviderImageSource::Url(url.clone()),
                }),
            }
        }
        ResponseContentPart::Unknown => None,
    }
}

/// `data:<media>;base64,<payload>`
fn parse_data_uri(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let media_type = meta.strip_suffix(";base64")?;
    Some((media_type.to_string(), data.to_string()))
}

// ============================================================================
// Provider request construction
// ============================================================================

/// Combine the assembled conversation with request parameters into the
/// backend-agnostic provider request.
pub fn build_provider_request(
    request: &ResponsesRequest,
    upstream_model: &str,
    assembled: &AssembledConversation,
) -> ProviderRequest {
    // Only function-typed tools reach the adapter; built-in tool types are
    // rejected upstream of the orchestrator.
    let tools: Vec<ProviderTool> = request
        .tools
        .iter()
        .flatten()
        .filter_map(|tool| tool.function.as_ref())
        .map(|function| ProviderTool {
            name: function.name.clone(),
            description: function.description.clone(),
            parameters: function
                .parameters
                .clone()
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
        })
        .collect();

    let tool_choice = request.tool_choice.as_ref().map(|choice| match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => ProviderToolChoice::Auto,
        ToolChoice::Mode(ToolChoiceMode::Required) => ProviderToolChoice::Required,
        ToolChoice::Mode(ToolChoiceMode::None) => ProviderToolChoice::None,
        ToolChoice::Function(func) => ProviderToolChoice::Function(func.name.clone()),
    });

    let text_format: Option<TextFormat> =
        request.text.as_ref().and_then(|config| config.format.clone());

    ProviderRequest {
        model: upstream_model.to_string(),
        messages: assembled.messages.clone(),
        system: assembled.system.clone(),
        tools,
        tool_choice,
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_output_tokens,
        thinking_budget: request
            .reasoning
            .as_ref()
            .and_then(|r| r.effort)
            .map(|effort| effort.token_budget()),
        text_format,
    }
}
