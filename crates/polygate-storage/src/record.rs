//! Domain shapes for the log record (spec §3, §4.8, C8) plus the
//! object-pooled message types `LoggerPlugin` allocates from on the hot
//! path: `LogMessage` (pre-hook payload), `UpdateData` (post-hook payload),
//! and `StreamChunk` (per-chunk raw-bytes capture for streaming requests).
//!
//! Grounded on the teacher's `storage/bus.rs` upsert-struct shapes,
//! collapsed from its multi-table traffic/usage/user schema down to the
//! single `log_records` table this spec's `LogStore` collaborator needs.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Processing,
    Success,
    Error,
    /// Terminal marker applied by the stuck-record sweep (spec §4.8): a
    /// `processing` row untouched for more than 30 minutes is assumed to
    /// belong to an orphaned request and is retired rather than left to
    /// violate the "no record stays in processing forever" invariant.
    Expired,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStatus::Processing => "processing",
            LogStatus::Success => "success",
            LogStatus::Error => "error",
            LogStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "success" => LogStatus::Success,
            "error" => LogStatus::Error,
            "expired" => LogStatus::Expired,
            _ => LogStatus::Processing,
        }
    }
}

/// The pre-hook's "create" payload (spec §4.8): allocated from a pool,
/// populated, dispatched async, returned to the pool once the dispatch is
/// acknowledged by the writer task.
#[derive(Debug, Clone, Default)]
pub struct LogMessage {
    pub id: String,
    pub timestamp: i64,
    pub request_type: String,
    pub provider: String,
    pub model: String,
    pub input_history: Option<Json>,
    pub params: Option<Json>,
    pub tools: Option<Json>,
    pub metadata: Option<Json>,
    pub stream: bool,
}

impl LogMessage {
    /// Clears every field before the value is returned to its pool, so a
    /// future request can never observe a prior request's content
    /// (spec §9: "put MUST clear pointer fields to prevent unintended
    /// retention").
    pub fn reset(&mut self) {
        self.id.clear();
        self.timestamp = 0;
        self.request_type.clear();
        self.provider.clear();
        self.model.clear();
        self.input_history = None;
        self.params = None;
        self.tools = None;
        self.metadata = None;
        self.stream = false;
    }
}

/// The post-hook's "update" payload (spec §4.8).
#[derive(Debug, Clone, Default)]
pub struct UpdateData {
    pub status: Option<LogStatus>,
    pub latency_ms: Option<i64>,
    pub usage: Option<Json>,
    pub output_message: Option<Json>,
    pub tool_calls: Option<Json>,
    pub cost: Option<f64>,
    pub error_details: Option<Json>,
    pub raw_request: Option<Json>,
    pub raw_response: Option<Json>,
    pub fallback_index: Option<i32>,
}

impl UpdateData {
    pub fn reset(&mut self) {
        *self = UpdateData::default();
    }
}

/// Pooled scratch buffer used while a streaming request's raw bytes are
/// captured for diagnostics (`extra_fields.raw`/log `error_details`)
/// without allocating a fresh `Vec` per chunk.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub bytes: Vec<u8>,
}

impl StreamChunk {
    pub fn reset(&mut self) {
        self.bytes.clear();
    }
}

/// The fully durable record (spec §3): what a `LogStore::Create` +
/// `Update` pair produces when read back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub timestamp: i64,
    pub request_type: String,
    pub provider: String,
    pub model: String,
    pub input_history: Option<Json>,
    pub params: Option<Json>,
    pub tools: Option<Json>,
    pub status: String,
    pub latency_ms: Option<i64>,
    pub usage: Option<Json>,
    pub output_message: Option<Json>,
    pub tool_calls: Option<Json>,
    pub cost: Option<f64>,
    pub error_details: Option<Json>,
    pub stream: bool,
    pub metadata: Option<Json>,
    pub fallback_index: Option<i32>,
}
