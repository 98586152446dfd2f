//! Shared OpenAI-wire <-> canonical schema conversions (spec §6: "the
//! canonical Response schema is structurally a superset of OpenAI's
//! chat/completions schema"). Used by both the chat/completions endpoint and
//! the `/responses` endpoint, which share the same message shape.

use polygate_protocol::openai::create_chat_completions::request::{CreateChatCompletionRequestBody, StopConfiguration};
use polygate_protocol::openai::create_chat_completions::types::{
    ChatCompletionAssistantContent, ChatCompletionAssistantContentPart, ChatCompletionFinishReason,
    ChatCompletionInputAudioFormat, ChatCompletionMessageToolCall,
    ChatCompletionMessageToolCallFunction, ChatCompletionRequestMessage,
    ChatCompletionResponseMessage, ChatCompletionResponseRole, ChatCompletionTextContent,
    ChatCompletionTextContentPart, ChatCompletionToolDefinition, ChatCompletionUserContent,
    ChatCompletionUserContentPart,
};
use polygate_protocol::{
    Block, Content, FinishReason, Message, Parameters, Role, ToolCall, ToolCallFunction,
    ToolDefinition, ToolFunctionDef,
};

pub fn wire_message_to_canonical(message: ChatCompletionRequestMessage) -> Message {
    match message {
        ChatCompletionRequestMessage::Developer(m) => Message {
            role: Role::System,
            content: Some(text_content_to_canonical(m.content)),
            name: m.name,
            tool_calls: None,
            tool_call_id: None,
        },
        ChatCompletionRequestMessage::System(m) => Message {
            role: Role::System,
            content: Some(text_content_to_canonical(m.content)),
            name: m.name,
            tool_calls: None,
            tool_call_id: None,
        },
        ChatCompletionRequestMessage::User(m) => Message {
            role: Role::User,
            content: Some(user_content_to_canonical(m.content)),
            name: m.name,
            tool_calls: None,
            tool_call_id: None,
        },
        ChatCompletionRequestMessage::Assistant(m) => Message {
            role: Role::Assistant,
            content: m.content.map(assistant_content_to_canonical).or(m.refusal.map(Content::Text)),
            name: m.name,
            tool_calls: m.tool_calls.map(|calls| calls.into_iter().map(tool_call_to_canonical).collect()),
            tool_call_id: None,
        },
        ChatCompletionRequestMessage::Tool(m) => Message {
            role: Role::Tool,
            content: Some(text_content_to_canonical(m.content)),
            name: None,
            tool_calls: None,
            tool_call_id: Some(m.tool_call_id),
        },
        // Deprecated legacy role; modeled as a named tool-shaped message since
        // the canonical schema has no separate `function` role.
        ChatCompletionRequestMessage::Function(m) => Message {
            role: Role::Tool,
            content: m.content.map(Content::Text),
            name: Some(m.name),
            tool_calls: None,
            tool_call_id: None,
        },
    }
}

fn text_content_to_canonical(content: ChatCompletionTextContent) -> Content {
    match content {
        ChatCompletionTextContent::Text(text) => Content::Text(text),
        ChatCompletionTextContent::Parts(parts) => {
            Content::Blocks(parts.into_iter().map(|p| match p {
                ChatCompletionTextContentPart::Text { text } => Block::Text { text },
            }).collect())
        }
    }
}

fn user_content_to_canonical(content: ChatCompletionUserContent) -> Content {
    match content {
        ChatCompletionUserContent::Text(text) => Content::Text(text),
        ChatCompletionUserContent::Parts(parts) => Content::Blocks(
            parts
                .into_iter()
                .filter_map(|part| match part {
                    ChatCompletionUserContentPart::Text { text } => Some(Block::Text { text }),
                    ChatCompletionUserContentPart::ImageUrl { image_url } => {
                        Some(Block::ImageUrl { url: image_url.url })
                    }
                    ChatCompletionUserContentPart::InputAudio { input_audio } => {
                        use base64::Engine;
                        let data = base64::engine::general_purpose::STANDARD
                            .decode(input_audio.data.as_bytes())
                            .unwrap_or_default();
                        let mime_type = match input_audio.format {
                            ChatCompletionInputAudioFormat::Wav => "audio/wav",
                            ChatCompletionInputAudioFormat::Mp3 => "audio/mpeg",
                        };
                        Some(Block::Audio { data, mime_type: mime_type.to_string() })
                    }
                    // File parts have no canonical representation; dropped rather
                    // than guessed at.
                    ChatCompletionUserContentPart::File { .. } => None,
                })
                .collect(),
        ),
    }
}

fn assistant_content_to_canonical(content: ChatCompletionAssistantContent) -> Content {
    match content {
        ChatCompletionAssistantContent::Text(text) => Content::Text(text),
        ChatCompletionAssistantContent::Parts(parts) => Content::Blocks(
            parts
                .into_iter()
                .map(|part| match part {
                    ChatCompletionAssistantContentPart::Text { text } => Block::Text { text },
                    ChatCompletionAssistantContentPart::Refusal { refusal } => Block::Text { text: refusal },
                })
                .collect(),
        ),
    }
}

fn tool_call_to_canonical(call: ChatCompletionMessageToolCall) -> ToolCall {
    match call {
        ChatCompletionMessageToolCall::Function { id, function } => ToolCall {
            id,
            function: ToolCallFunction { name: function.name, arguments: function.arguments },
        },
        ChatCompletionMessageToolCall::Custom { id, custom } => {
            ToolCall { id, function: ToolCallFunction { name: custom.name, arguments: custom.input } }
        }
    }
}

pub fn canonical_message_to_wire(message: &Message) -> ChatCompletionResponseMessage {
    let content = message.content.as_ref().and_then(|c| match c {
        Content::Text(text) => Some(text.clone()),
        Content::Blocks(blocks) => {
            let joined: String = blocks
                .iter()
                .filter_map(|b| match b {
                    Block::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("");
            if joined.is_empty() { None } else { Some(joined) }
        }
    });

    ChatCompletionResponseMessage {
        role: ChatCompletionResponseRole::Assistant,
        content,
        refusal: None,
        tool_calls: message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|call| ChatCompletionMessageToolCall::Function {
                    id: call.id.clone(),
                    function: ChatCompletionMessageToolCallFunction {
                        name: call.function.name.clone(),
                        arguments: call.function.arguments.clone(),
                    },
                })
                .collect()
        }),
        annotations: None,
        function_call: None,
        audio: None,
    }
}

/// Lossy by one case: OpenAI's wire schema has no `cancelled` finish reason.
pub fn finish_reason_to_wire(reason: &FinishReason) -> ChatCompletionFinishReason {
    match reason {
        FinishReason::Stop => ChatCompletionFinishReason::Stop,
        FinishReason::Length => ChatCompletionFinishReason::Length,
        FinishReason::ToolCalls => ChatCompletionFinishReason::ToolCalls,
        FinishReason::ContentFilter => ChatCompletionFinishReason::ContentFilter,
        FinishReason::Cancelled => ChatCompletionFinishReason::Stop,
    }
}

fn stop_to_canonical(stop: StopConfiguration) -> Vec<String> {
    match stop {
        StopConfiguration::Single(s) => vec![s],
        StopConfiguration::Many(v) => v,
    }
}

fn tool_to_canonical(tool: ChatCompletionToolDefinition) -> Option<ToolDefinition> {
    match tool {
        ChatCompletionToolDefinition::Function { function } => Some(ToolDefinition {
            kind: "function".to_string(),
            function: ToolFunctionDef {
                name: function.name,
                description: function.description,
                parameters: function.parameters.and_then(|p| serde_json::to_value(p).ok()),
            },
        }),
        // Custom (freeform-grammar) tools have no canonical function shape;
        // dropped rather than guessed at, same policy as `File` content parts.
        ChatCompletionToolDefinition::Custom { .. } => None,
    }
}

/// Extracts the provider-agnostic `Parameters` (spec §3) from a wire body,
/// dropping the OpenAI-specific knobs (`service_tier`, `seed`, ...) the
/// canonical schema has no slot for.
pub fn wire_params_to_canonical(body: &CreateChatCompletionRequestBody) -> Parameters {
    Parameters {
        temperature: body.temperature,
        max_tokens: body
            .max_completion_tokens
            .or(body.max_tokens)
            .and_then(|v| u32::try_from(v).ok()),
        top_p: body.top_p,
        tools: body.tools.clone().map(|tools| {
            tools.into_iter().filter_map(tool_to_canonical).collect()
        }),
        tool_choice: body.tool_choice.as_ref().and_then(|c| serde_json::to_value(c).ok()),
        stop: body.stop.clone().map(stop_to_canonical),
        frequency_penalty: body.frequency_penalty,
        presence_penalty: body.presence_penalty,
        response_format: body.response_format.as_ref().and_then(|f| serde_json::to_value(f).ok()),
    }
}

/// Splits a `provider/model` wire model string (spec §6: one Request per
/// call names both `provider` and `model`; OpenAI's wire schema has only
/// one `model` field, so the provider tag is carried as a prefix).
pub fn split_provider_model(model: &str) -> Option<(String, String)> {
    let (provider, model) = model.split_once('/')?;
    let provider = provider.trim();
    let model = model.trim();
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider.to_string(), model.to_string()))
}
