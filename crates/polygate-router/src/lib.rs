//! HTTP front door (spec §6): JSON framing and route mounting for the
//! OpenAI-compatible chat/completions surface, translating at the edge into
//! the canonical `Request`/`Response` schema and delegating everything else
//! to the `Orchestrator` façade (spec §1: "the HTTP front door... [is]
//! external"; this crate is the thin translation layer where the core
//! actually touches it, grounded on the teacher's `gproxy-router::proxy`
//! route-mounting idiom with the CLI-proxy auth middleware and admin routes
//! dropped).

pub mod error;
pub mod state;
pub mod translate;

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event as AxumSseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use polygate_core::{Orchestrator, StreamEvent};
use polygate_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody;
use polygate_protocol::openai::create_chat_completions::response::{
    ChatCompletionChoice, ChatCompletionObjectType, CreateChatCompletionResponse,
};
use polygate_protocol::openai::create_chat_completions::stream::{
    ChatCompletionChunkObjectType, ChatCompletionStreamChoice, CreateChatCompletionStreamResponse,
};
use polygate_protocol::openai::create_chat_completions::types::{
    ChatCompletionMessageToolCallChunk, ChatCompletionMessageToolCallChunkFunction,
    ChatCompletionRole, ChatCompletionStreamResponseDelta, ChatCompletionToolCallChunkType,
    CompletionUsage,
};
use polygate_protocol::{
    ChunkEvent, Choice, ErrorKind, GatewayError, Input, Message, Output, Request, RequestType,
    Response as CanonicalResponse, Role, Usage,
};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::state::GatewayState;
use crate::translate::{
    canonical_message_to_wire, finish_reason_to_wire, split_provider_model,
    wire_message_to_canonical, wire_params_to_canonical,
};

/// Mounts the gateway's public HTTP surface atop a shared `Orchestrator`
/// (spec §4.9, §6). One route per wire-compat operation this crate
/// translates; operations with no OpenAI-wire analogue (speech, rerank,
/// ...) are reached only through the typed `Orchestrator` API directly.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = GatewayState { orchestrator };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn chat_completions(State(state): State<GatewayState>, Json(body): Json<CreateChatCompletionRequestBody>) -> Response {
    let wants_stream = body.stream.unwrap_or(false);
    let request = match build_chat_request(body, wants_stream) {
        Ok(request) => request,
        Err(error) => return ApiError::from(error).into_response(),
    };

    if wants_stream {
        stream_chat_completions(state, request).await.into_response()
    } else {
        // Cancels `cancel` the moment this handler future is dropped, which
        // is exactly what happens when the client disconnects before the
        // response is ready (spec §5, §8 scenario 6); a normal return drops
        // the guard after the dispatch has already finished, so it's a
        // no-op there.
        let cancel = CancellationToken::new();
        let _drop_guard = cancel.clone().drop_guard();
        match state.orchestrator.dispatch_with_context(request, cancel).await {
            Ok(response) => Json(response_to_wire(response)).into_response(),
            Err(error) => ApiError::from(error).into_response(),
        }
    }
}

async fn list_models(State(state): State<GatewayState>) -> Response {
    let request = Request::new(RequestType::ListModels, "", "", Input::ListModels);
    match state.orchestrator.dispatch(request).await {
        Ok(response) => match response.output {
            Output::ListModels { models } => {
                let data: Vec<_> = models
                    .into_iter()
                    .map(|id| serde_json::json!({"id": id, "object": "model"}))
                    .collect();
                Json(serde_json::json!({"object": "list", "data": data})).into_response()
            }
            _ => ApiError::from(GatewayError::new(ErrorKind::Internal, "unexpected_output_shape", "list_models returned a non-list-models output")).into_response(),
        },
        Err(error) => ApiError::from(error).into_response(),
    }
}

/// Builds the canonical `Request` (spec §3) from an OpenAI-wire chat body.
/// The provider tag is carried as a `provider/model` prefix on the wire
/// `model` field since OpenAI's schema has no separate provider slot — this
/// gateway fronts many providers behind one endpoint, unlike the upstream
/// it is wire-compatible with.
fn build_chat_request(body: CreateChatCompletionRequestBody, wants_stream: bool) -> Result<Request, GatewayError> {
    let Some((provider, model)) = split_provider_model(&body.model) else {
        return Err(GatewayError::new(
            ErrorKind::BadRequest,
            "missing_provider_prefix",
            format!("model '{}' must be prefixed with a provider tag, e.g. 'openai/{}'", body.model, body.model),
        ));
    };

    let parameters = wire_params_to_canonical(&body);
    let messages: Vec<Message> = body.messages.into_iter().map(wire_message_to_canonical).collect();
    let request_type = if wants_stream { RequestType::ChatStream } else { RequestType::Chat };

    let mut request = Request::new(request_type, provider, model, Input::Chat { messages });
    request.parameters = parameters;
    Ok(request)
}

fn response_to_wire(response: CanonicalResponse) -> CreateChatCompletionResponse {
    let choices = match response.output {
        Output::Chat { choices } | Output::TextCompletion { choices } | Output::Responses { choices } => choices,
        _ => Vec::new(),
    };

    CreateChatCompletionResponse {
        id: response.id,
        object: ChatCompletionObjectType::ChatCompletion,
        created: response.created,
        model: response.model,
        choices: choices.into_iter().map(choice_to_wire).collect(),
        usage: response.usage.as_ref().map(usage_to_wire),
        service_tier: None,
        system_fingerprint: None,
    }
}

fn choice_to_wire(choice: Choice) -> ChatCompletionChoice {
    ChatCompletionChoice {
        index: choice.index as i64,
        message: canonical_message_to_wire(&choice.message),
        finish_reason: choice.finish_reason.as_ref().map(finish_reason_to_wire).unwrap_or(polygate_protocol::openai::create_chat_completions::types::ChatCompletionFinishReason::Stop),
        logprobs: None,
    }
}

fn usage_to_wire(usage: &Usage) -> CompletionUsage {
    match usage {
        Usage::Tokens { prompt_tokens, completion_tokens, total_tokens } => CompletionUsage {
            prompt_tokens: *prompt_tokens as i64,
            completion_tokens: *completion_tokens as i64,
            total_tokens: *total_tokens as i64,
            completion_tokens_details: None,
            prompt_tokens_details: None,
        },
        Usage::Audio { input_tokens, output_tokens, total_tokens } => CompletionUsage {
            prompt_tokens: *input_tokens as i64,
            completion_tokens: *output_tokens as i64,
            total_tokens: *total_tokens as i64,
            completion_tokens_details: None,
            prompt_tokens_details: None,
        },
    }
}

/// Drives a `ChatStream` (spec §4.7, §4.9 rule 3) into an SSE response
/// framed exactly like OpenAI's `chat.completion.chunk` stream, terminated
/// by a literal `[DONE]` event. Every live delta is forwarded as its own
/// chunk; the accumulator's synthesized final response is not re-emitted
/// to the wire (the caller already saw it, piece by piece) but its error,
/// if any, surfaces as the stream's terminal event.
async fn stream_chat_completions(state: GatewayState, request: Request) -> Sse<impl Stream<Item = Result<AxumSseEvent, Infallible>>> {
    let id = request.request_id.to_string();
    let model = request.model.clone();
    let cancel = CancellationToken::new();
    let mut chat_stream = state.orchestrator.dispatch_stream_with_context(request, cancel.clone()).await;
    // Held in the unfold state, not here: the handler returns as soon as the
    // `Sse` response is built, well before the body is actually streamed, so
    // a guard dropped at the end of this function would cancel the stream
    // before it starts. Dropping it with the stream state instead ties
    // cancellation to the client actually going away mid-stream (spec §5,
    // §8 scenario 6); a normal end-of-stream drop is a no-op by then.
    let guard = cancel.drop_guard();

    let events = stream::unfold((chat_stream, id, model, false, guard), |(mut chat_stream, id, model, done, guard)| async move {
        if done {
            return None;
        }
        match chat_stream.next().await {
            Some(StreamEvent::Delta(chunk)) => {
                let wire = chunk_to_wire(&id, &model, &chunk);
                let data = serde_json::to_string(&wire).unwrap_or_default();
                Some((Ok(AxumSseEvent::default().data(data)), (chat_stream, id, model, false, guard)))
            }
            Some(StreamEvent::Final(_)) => Some((Ok(AxumSseEvent::default().data("[DONE]")), (chat_stream, id, model, true, guard))),
            Some(StreamEvent::Error(error)) => {
                let body = serde_json::json!({"error": {"message": error.message, "type": error.kind, "code": error.code}});
                let data = serde_json::to_string(&body).unwrap_or_default();
                Some((Ok(AxumSseEvent::default().event("error").data(data)), (chat_stream, id, model, true, guard)))
            }
            None => None,
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn chunk_to_wire(id: &str, model: &str, chunk: &ChunkEvent) -> CreateChatCompletionStreamResponse {
    let delta = ChatCompletionStreamResponseDelta {
        content: chunk.text_delta.clone(),
        reasoning_content: None,
        function_call: None,
        tool_calls: if chunk.tool_call_deltas.is_empty() {
            None
        } else {
            Some(
                chunk
                    .tool_call_deltas
                    .iter()
                    .enumerate()
                    .map(|(index, delta)| ChatCompletionMessageToolCallChunk {
                        index: index as i64,
                        id: Some(delta.id.clone()),
                        r#type: Some(ChatCompletionToolCallChunkType::Function),
                        function: Some(ChatCompletionMessageToolCallChunkFunction {
                            name: delta.name.clone(),
                            arguments: delta.arguments_delta.clone(),
                        }),
                    })
                    .collect(),
            )
        },
        role: chunk.role.map(role_to_wire),
        refusal: chunk.refusal_delta.clone(),
        obfuscation: None,
    };

    CreateChatCompletionStreamResponse {
        id: id.to_string(),
        object: ChatCompletionChunkObjectType::ChatCompletionChunk,
        created: unix_now(),
        model: model.to_string(),
        choices: vec![ChatCompletionStreamChoice {
            index: 0,
            delta,
            logprobs: None,
            finish_reason: chunk.finish_reason.as_ref().map(finish_reason_to_wire),
        }],
        usage: chunk.usage.as_ref().map(usage_to_wire),
        service_tier: None,
        system_fingerprint: None,
    }
}

fn role_to_wire(role: Role) -> ChatCompletionRole {
    match role {
        Role::System => ChatCompletionRole::System,
        Role::User => ChatCompletionRole::User,
        Role::Assistant => ChatCompletionRole::Assistant,
        Role::Tool => ChatCompletionRole::Tool,
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polygate_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody;
    use polygate_protocol::openai::create_chat_completions::types::{ChatCompletionRequestMessage, ChatCompletionRequestUserMessage, ChatCompletionUserContent};

    fn minimal_body(model: &str) -> CreateChatCompletionRequestBody {
        CreateChatCompletionRequestBody {
            messages: vec![ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionUserContent::Text("hi".to_string()),
                name: None,
            })],
            model: model.to_string(),
            modalities: None,
            verbosity: None,
            reasoning_effort: None,
            max_completion_tokens: None,
            frequency_penalty: None,
            presence_penalty: None,
            web_search_options: None,
            top_logprobs: None,
            response_format: None,
            audio: None,
            store: None,
            stream: None,
            stop: None,
            logit_bias: None,
            logprobs: None,
            max_tokens: None,
            n: None,
            prediction: None,
            seed: None,
            stream_options: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            function_call: None,
            functions: None,
            metadata: None,
            extra_body: None,
            temperature: None,
            top_p: None,
            user: None,
            safety_identifier: None,
            prompt_cache_key: None,
            service_tier: None,
            prompt_cache_retention: None,
        }
    }

    #[test]
    fn rejects_model_without_provider_prefix() {
        let err = build_chat_request(minimal_body("gpt-4o-mini"), false).unwrap_err();
        assert_eq!(err.code, "missing_provider_prefix");
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn splits_provider_prefixed_model() {
        let request = build_chat_request(minimal_body("openai/gpt-4o-mini"), false).unwrap();
        assert_eq!(request.provider, "openai");
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.request_type, RequestType::Chat);
    }

    #[test]
    fn stream_flag_selects_chat_stream_type() {
        let request = build_chat_request(minimal_body("openai/gpt-4o-mini"), true).unwrap();
        assert_eq!(request.request_type, RequestType::ChatStream);
    }
}
