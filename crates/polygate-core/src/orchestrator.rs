//! The public façade (C9, spec §4.9): one operation per `RequestType`, all
//! funneled through the same `PluginChain.pre → FallbackCoordinator →
//! PluginChain.post` pipeline. Streaming operations return a finite,
//! not-restartable sequence of [`StreamEvent`]s instead of a single
//! `Response` (spec §4.9 rule 3).

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use polygate_protocol::{ChunkEvent, GatewayError, Request, RequestType, Response, StreamDecodeOutcome};
use polygate_provider_core::{StreamFraming, UpstreamBody, UpstreamCtx};
use polygate_transform::AccumulatorRegistry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::fallback::{EstablishedStream, FallbackCoordinator};
use crate::plugin::{PluginChain, PreChainResult};

/// One event in a streaming operation's caller-facing sequence (spec §4.9
/// rule 3, §4.7): every delta is handed through live, and the sequence
/// ends with exactly one of `Final` or `Error`.
#[derive(Debug)]
pub enum StreamEvent {
    Delta(ChunkEvent),
    Final(Response),
    Error(GatewayError),
}

/// A finite, not-restartable sequence of [`StreamEvent`]s (spec §4.9 rule
/// 3). Consume it either with `.next().await` or as a [`Stream`].
pub struct ChatStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl ChatStream {
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Stream for ChatStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Public façade wiring the plugin chain, the fallback coordinator and the
/// stream accumulator registry together (spec §4.9, C9). One instance is
/// built at process init and shared for the process lifetime; `teardown`
/// drains it at shutdown.
#[derive(Clone)]
pub struct Orchestrator {
    plugins: Arc<PluginChain>,
    fallback: Arc<FallbackCoordinator>,
    accumulators: Arc<AccumulatorRegistry>,
}

impl Orchestrator {
    pub fn new(plugins: Arc<PluginChain>, fallback: Arc<FallbackCoordinator>, accumulators: Arc<AccumulatorRegistry>) -> Self {
        Self { plugins, fallback, accumulators }
    }

    fn last_index(&self) -> usize {
        self.plugins.len().saturating_sub(1)
    }

    /// Runs a non-streaming request end to end (spec §4.9 steps 1-2): stamps
    /// the request id, then pre-hooks → fallback dispatch → post-hooks. Uses
    /// a cancellation token nothing outside this call can ever signal; call
    /// [`Self::dispatch_with_context`] when the caller needs to cancel it,
    /// e.g. in response to a dropped client connection.
    pub async fn dispatch(&self, request: Request) -> Result<Response, GatewayError> {
        self.dispatch_with_context(request, CancellationToken::new()).await
    }

    /// Same as [`Self::dispatch`], but threads a caller-supplied
    /// [`CancellationToken`] through the request context so the fallback
    /// coordinator and retry engine observe it on every attempt (spec §5,
    /// §8 scenario 6).
    pub async fn dispatch_with_context(&self, request: Request, cancel: CancellationToken) -> Result<Response, GatewayError> {
        let mut ctx = RequestContext::new(request.request_id).with_cancellation(cancel);

        match self.plugins.run_pre(&mut ctx, request).await {
            PreChainResult::Continue(request) => {
                let result = self.fallback.dispatch(&mut ctx, &request).await;
                self.plugins.run_post(&mut ctx, self.last_index(), result).await
            }
            PreChainResult::ShortCircuited { response, from_index } => {
                self.plugins.run_post(&mut ctx, from_index, Ok(response)).await
            }
            PreChainResult::Errored { error, from_index } => {
                self.plugins.run_post(&mut ctx, from_index, Err(error)).await
            }
        }
    }

    /// Runs a streaming request (spec §4.7, §4.9 rule 3). The returned
    /// stream carries live per-chunk deltas; the post-hook chain fires
    /// exactly once, at stream end, against the accumulator's synthesized
    /// response (spec §4.7: "the post-hook fires exactly once"). Uses a
    /// cancellation token nothing outside this call can ever signal; call
    /// [`Self::dispatch_stream_with_context`] when the caller needs to
    /// cancel it, e.g. in response to a dropped client connection.
    pub async fn dispatch_stream(&self, request: Request) -> ChatStream {
        self.dispatch_stream_with_context(request, CancellationToken::new()).await
    }

    /// Same as [`Self::dispatch_stream`], but threads a caller-supplied
    /// [`CancellationToken`] through the request context so `run_stream`'s
    /// per-frame cancellation check (spec §5, §8 scenario 6) actually has
    /// something capable of firing.
    pub async fn dispatch_stream_with_context(&self, request: Request, cancel: CancellationToken) -> ChatStream {
        let mut ctx = RequestContext::new(request.request_id).with_cancellation(cancel);
        let request_id = request.request_id;
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        match self.plugins.run_pre(&mut ctx, request).await {
            PreChainResult::Continue(request) => match self.fallback.dispatch_stream(&mut ctx, &request).await {
                Ok(established) => {
                    let plugins = self.plugins.clone();
                    let accumulators = self.accumulators.clone();
                    let last_index = self.last_index();
                    tokio::spawn(async move {
                        run_stream(ctx, established, request_id, accumulators, plugins, last_index, tx).await;
                    });
                }
                Err(error) => {
                    let last_index = self.last_index();
                    let plugins = self.plugins.clone();
                    tokio::spawn(async move {
                        let result = plugins.run_post(&mut ctx, last_index, Err(error)).await;
                        let _ = tx.send(terminal_event(result)).await;
                    });
                }
            },
            PreChainResult::ShortCircuited { response, from_index } => {
                let plugins = self.plugins.clone();
                tokio::spawn(async move {
                    let result = plugins.run_post(&mut ctx, from_index, Ok(response)).await;
                    let _ = tx.send(terminal_event(result)).await;
                });
            }
            PreChainResult::Errored { error, from_index } => {
                let plugins = self.plugins.clone();
                tokio::spawn(async move {
                    let result = plugins.run_post(&mut ctx, from_index, Err(error)).await;
                    let _ = tx.send(terminal_event(result)).await;
                });
            }
        }

        ChatStream { rx }
    }

    /// Shuts every plugin down in reverse registration order (spec §4.9:
    /// "teardown... calls cleanup() on every plugin in reverse order").
    /// Draining the background writers themselves is the hosting process's
    /// responsibility (it owns their join handles); this only tears down
    /// the plugin chain.
    pub async fn teardown(&self) {
        self.plugins.cleanup_all().await;
    }

    // -- one thin operation per RequestType (spec §4.9) --------------------

    pub async fn chat(&self, request: Request) -> Result<Response, GatewayError> {
        self.dispatch(require_type(request, RequestType::Chat)?).await
    }

    pub async fn chat_stream(&self, request: Request) -> Result<ChatStream, GatewayError> {
        Ok(self.dispatch_stream(require_type(request, RequestType::ChatStream)?).await)
    }

    pub async fn text_completion(&self, request: Request) -> Result<Response, GatewayError> {
        self.dispatch(require_type(request, RequestType::TextCompletion)?).await
    }

    pub async fn embedding(&self, request: Request) -> Result<Response, GatewayError> {
        self.dispatch(require_type(request, RequestType::Embedding)?).await
    }

    pub async fn speech(&self, request: Request) -> Result<Response, GatewayError> {
        self.dispatch(require_type(request, RequestType::Speech)?).await
    }

    pub async fn speech_stream(&self, request: Request) -> Result<ChatStream, GatewayError> {
        Ok(self.dispatch_stream(require_type(request, RequestType::SpeechStream)?).await)
    }

    pub async fn transcription(&self, request: Request) -> Result<Response, GatewayError> {
        self.dispatch(require_type(request, RequestType::Transcription)?).await
    }

    pub async fn transcription_stream(&self, request: Request) -> Result<ChatStream, GatewayError> {
        Ok(self.dispatch_stream(require_type(request, RequestType::TranscriptionStream)?).await)
    }

    pub async fn responses(&self, request: Request) -> Result<Response, GatewayError> {
        self.dispatch(require_type(request, RequestType::Responses)?).await
    }

    pub async fn responses_stream(&self, request: Request) -> Result<ChatStream, GatewayError> {
        Ok(self.dispatch_stream(require_type(request, RequestType::ResponsesStream)?).await)
    }

    pub async fn image(&self, request: Request) -> Result<Response, GatewayError> {
        self.dispatch(require_type(request, RequestType::Image)?).await
    }

    pub async fn rerank(&self, request: Request) -> Result<Response, GatewayError> {
        self.dispatch(require_type(request, RequestType::Rerank)?).await
    }

    pub async fn list_models(&self, request: Request) -> Result<Response, GatewayError> {
        self.dispatch(require_type(request, RequestType::ListModels)?).await
    }
}

fn require_type(request: Request, expected: RequestType) -> Result<Request, GatewayError> {
    if request.request_type == expected {
        Ok(request)
    } else {
        Err(GatewayError::new(
            polygate_protocol::ErrorKind::BadRequest,
            "request_type_mismatch",
            format!("expected request_type {expected:?}, got {:?}", request.request_type),
        ))
    }
}

fn terminal_event(result: Result<Response, GatewayError>) -> StreamEvent {
    match result {
        Ok(response) => StreamEvent::Final(response),
        Err(error) => StreamEvent::Error(error),
    }
}

/// Drives one established stream to completion: frames the upstream body
/// per the adapter's [`StreamFraming`], decodes each frame, feeds it to the
/// per-request accumulator, forwards every delta live, and fires the
/// post-hook chain exactly once with the synthesized final response
/// (spec §4.7).
async fn run_stream(
    mut ctx: RequestContext,
    established: EstablishedStream,
    request_id: Uuid,
    accumulators: Arc<AccumulatorRegistry>,
    plugins: Arc<PluginChain>,
    last_index: usize,
    tx: mpsc::Sender<StreamEvent>,
) {
    let accumulator = accumulators.create(request_id, established.request.model.clone()).await;
    let upstream_ctx = UpstreamCtx {
        trace_id: ctx.trace_id.clone(),
        provider: established.adapter.name().to_string(),
        credential_id: ctx.selected_key_id,
        attempt_no: 1,
    };

    let mut final_response: Option<Response> = None;
    let mut frames = frame_stream(established.response.body, established.adapter.stream_framing());

    while let Some(frame) = frames.next_frame().await {
        if ctx.is_cancelled() {
            let mut guard = accumulator.lock().await;
            let response = guard
                .push(ChunkEvent { error: Some(GatewayError::cancelled()), ..Default::default() })
                .unwrap_or_else(|| guard.force_timeout());
            final_response = Some(response);
            break;
        }

        let outcome = established.adapter.decode_stream_chunk(&upstream_ctx, &established.request, &frame);
        match outcome {
            StreamDecodeOutcome::Chunk(chunk) => {
                let _ = tx.send(StreamEvent::Delta(chunk.clone())).await;
                let mut guard = accumulator.lock().await;
                if let Some(response) = guard.push(chunk) {
                    final_response = Some(response);
                    break;
                }
            }
            StreamDecodeOutcome::EndOfStream => {
                let mut guard = accumulator.lock().await;
                if let Some(response) = guard.finalize_if_incomplete() {
                    final_response = Some(response);
                }
                break;
            }
            StreamDecodeOutcome::Error(error) => {
                let mut guard = accumulator.lock().await;
                if let Some(response) = guard.push(ChunkEvent { error: Some(error), ..Default::default() }) {
                    final_response = Some(response);
                }
                break;
            }
        }
    }

    let response = match final_response {
        Some(response) => response,
        None => {
            let mut guard = accumulator.lock().await;
            guard.finalize_if_incomplete().unwrap_or_else(|| guard.force_timeout())
        }
    };

    accumulators.destroy(request_id).await;

    let mut response = response;
    response.extra_fields.fallback_index = established.fallback_index;
    response.extra_fields.provider = Some(established.adapter.name().to_string());

    let had_error = response
        .extra_fields
        .raw_response
        .as_ref()
        .and_then(|v| v.get("error"))
        .is_some();

    let result = if had_error {
        let error = GatewayError::new(
            polygate_protocol::ErrorKind::Internal,
            "stream_terminated_with_error",
            "stream ended with an error chunk",
        );
        plugins.run_post(&mut ctx, last_index, Err(error)).await
    } else {
        plugins.run_post(&mut ctx, last_index, Ok(response)).await
    };

    let _ = tx.send(terminal_event(result)).await;
}

enum FrameSource {
    Sse { body: mpsc::Receiver<Bytes>, parser: polygate_protocol::sse::SseParser, pending: std::collections::VecDeque<Bytes> },
    Raw { body: mpsc::Receiver<Bytes> },
    Buffered { frames: std::collections::VecDeque<Bytes> },
}

impl FrameSource {
    async fn next_frame(&mut self) -> Option<Bytes> {
        match self {
            FrameSource::Sse { body, parser, pending } => loop {
                if let Some(frame) = pending.pop_front() {
                    return Some(frame);
                }
                match body.recv().await {
                    Some(chunk) => {
                        for event in parser.push_bytes(&chunk) {
                            pending.push_back(Bytes::from(event.data));
                        }
                    }
                    None => {
                        for event in parser.finish() {
                            pending.push_back(Bytes::from(event.data));
                        }
                        if pending.is_empty() {
                            return None;
                        }
                    }
                }
            },
            FrameSource::Raw { body } => body.recv().await,
            FrameSource::Buffered { frames } => frames.pop_front(),
        }
    }
}

fn frame_stream(body: UpstreamBody, framing: StreamFraming) -> FrameSource {
    match body {
        UpstreamBody::Stream(rx) => match framing {
            StreamFraming::Sse => FrameSource::Sse {
                body: rx,
                parser: polygate_protocol::sse::SseParser::new(),
                pending: std::collections::VecDeque::new(),
            },
            StreamFraming::Raw => FrameSource::Raw { body: rx },
        },
        UpstreamBody::Bytes(bytes) => match framing {
            StreamFraming::Sse => {
                let mut parser = polygate_protocol::sse::SseParser::new();
                let mut frames: std::collections::VecDeque<Bytes> =
                    parser.push_bytes(&bytes).into_iter().map(|e| Bytes::from(e.data)).collect();
                frames.extend(parser.finish().into_iter().map(|e| Bytes::from(e.data)));
                FrameSource::Buffered { frames }
            }
            StreamFraming::Raw => FrameSource::Buffered { frames: std::collections::VecDeque::from([bytes]) },
        },
    }
}
