//! Background writer for log records (spec §4.8, C8): an mpsc channel plus
//! a spawned task that performs the actual database writes off the request
//! path, batched on a ticker. Grounded on the teacher's `storage/bus.rs`
//! mpsc-channel + spawned-writer-task + `tokio::select!` ticker-batched
//! flush, repointed from its multi-table traffic/usage schema at the single
//! `log_records` table this spec's `LogStore` contract needs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, DatabaseConnection, EntityTrait, QueryFilter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self as tokio_time, MissedTickBehavior};

use crate::entities::log_record;
use crate::pool::Pool;
use crate::record::{LogMessage, LogRecord, LogStatus, UpdateData};

#[derive(Clone)]
struct Pools {
    log_messages: Pool<LogMessage>,
    update_data: Pool<UpdateData>,
}

const UPDATE_NOT_FOUND_RETRIES: u32 = 3;
const UPDATE_NOT_FOUND_DELAY: Duration = Duration::from_secs(1);
const STUCK_PROCESSING_AGE_SECS: i64 = 30 * 60;

#[derive(Debug)]
enum Op {
    Create(LogMessage),
    Update { id: String, data: UpdateData, attempt: u32 },
    Flush { before_ts: i64 },
}

#[derive(Clone)]
pub struct StorageBusConfig {
    pub batch_interval: Duration,
    pub sweep_interval: Duration,
    pub channel_capacity: usize,
}

impl Default for StorageBusConfig {
    fn default() -> Self {
        Self {
            batch_interval: Duration::from_millis(200),
            sweep_interval: Duration::from_secs(5 * 60),
            channel_capacity: 4096,
        }
    }
}

/// Non-blocking façade over the log store: `LoggerPlugin` calls
/// `dispatch_create`/`dispatch_update` and returns immediately; the actual
/// writes happen on the background task started by [`StorageBus::spawn`].
#[derive(Clone)]
pub struct StorageBus {
    tx: mpsc::Sender<Op>,
    pub log_messages: Pool<LogMessage>,
    pub update_data: Pool<UpdateData>,
}

impl StorageBus {
    /// Spawns the background writer and sweeper tasks. `db` is the
    /// connection the writer uses; the caller owns its lifetime via the
    /// returned join handles.
    pub fn spawn(db: DatabaseConnection, config: StorageBusConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let pools = Pools { log_messages: Pool::new(256), update_data: Pool::new(256) };
        let handle = tokio::spawn(run_writer(db, rx, config, pools.clone()));
        (
            Self {
                tx,
                log_messages: pools.log_messages,
                update_data: pools.update_data,
            },
            handle,
        )
    }

    /// Pre-hook dispatch (spec §4.8): never blocks the request path. Drops
    /// the event on a full channel rather than applying backpressure to the
    /// caller — persistence is best-effort relative to the request path.
    pub fn dispatch_create(&self, msg: LogMessage) {
        let _ = self.tx.try_send(Op::Create(msg));
    }

    pub fn dispatch_update(&self, id: impl Into<String>, data: UpdateData) {
        let _ = self.tx.try_send(Op::Update { id: id.into(), data, attempt: 0 });
    }

    pub fn dispatch_flush(&self, before_ts: i64) {
        let _ = self.tx.try_send(Op::Flush { before_ts });
    }
}

async fn run_writer(db: DatabaseConnection, mut rx: mpsc::Receiver<Op>, config: StorageBusConfig, pools: Pools) {
    let mut batch_ticker = tokio_time::interval(config.batch_interval);
    batch_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweep_ticker = tokio_time::interval(config.sweep_interval);
    sweep_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending_creates: Vec<LogMessage> = Vec::new();
    let mut pending_updates: Vec<(String, UpdateData, u32)> = Vec::new();

    loop {
        tokio::select! {
            maybe_op = rx.recv() => {
                match maybe_op {
                    Some(Op::Create(msg)) => pending_creates.push(msg),
                    Some(Op::Update { id, data, attempt }) => pending_updates.push((id, data, attempt)),
                    Some(Op::Flush { before_ts }) => {
                        flush_batch(&db, &mut pending_creates, &mut pending_updates, &pools).await;
                        let _ = delete_before(&db, before_ts).await;
                    }
                    None => {
                        flush_batch(&db, &mut pending_creates, &mut pending_updates, &pools).await;
                        return;
                    }
                }
            }
            _ = batch_ticker.tick() => {
                flush_batch(&db, &mut pending_creates, &mut pending_updates, &pools).await;
            }
            _ = sweep_ticker.tick() => {
                let _ = sweep_stuck_processing(&db).await;
            }
        }
    }
}

async fn flush_batch(
    db: &DatabaseConnection,
    creates: &mut Vec<LogMessage>,
    updates: &mut Vec<(String, UpdateData, u32)>,
    pools: &Pools,
) {
    if !creates.is_empty() {
        let batch = dedupe_creates(std::mem::take(creates));
        if let Err(err) = insert_batch(db, &batch).await {
            tracing::warn!(error = %err, count = batch.len(), "log record batch insert failed");
        }
        for msg in batch {
            pools.log_messages.put(msg, LogMessage::reset);
        }
    }
    if !updates.is_empty() {
        let batch = std::mem::take(updates);
        apply_updates(db, batch, pools).await;
    }
}

async fn insert_batch(db: &DatabaseConnection, batch: &[LogMessage]) -> Result<(), sea_orm::DbErr> {
    if batch.is_empty() {
        return Ok(());
    }
    let models: Vec<log_record::ActiveModel> = batch.iter().map(message_to_active).collect();
    log_record::Entity::insert_many(models)
        .on_conflict(
            sea_orm::sea_query::OnConflict::column(log_record::Column::Id)
                .do_nothing()
                .to_owned(),
        )
        .exec(db)
        .await?;
    Ok(())
}

fn message_to_active(msg: &LogMessage) -> log_record::ActiveModel {
    log_record::ActiveModel {
        id: ActiveValue::Set(msg.id.clone()),
        timestamp: ActiveValue::Set(msg.timestamp),
        request_type: ActiveValue::Set(msg.request_type.clone()),
        provider: ActiveValue::Set(msg.provider.clone()),
        model: ActiveValue::Set(msg.model.clone()),
        input_history: ActiveValue::Set(msg.input_history.clone()),
        params: ActiveValue::Set(msg.params.clone()),
        tools: ActiveValue::Set(msg.tools.clone()),
        status: ActiveValue::Set(LogStatus::Processing.as_str().to_string()),
        latency_ms: ActiveValue::Set(None),
        usage: ActiveValue::Set(None),
        output_message: ActiveValue::Set(None),
        tool_calls: ActiveValue::Set(None),
        cost: ActiveValue::Set(None),
        error_details: ActiveValue::Set(None),
        stream: ActiveValue::Set(msg.stream),
        metadata: ActiveValue::Set(msg.metadata.clone()),
        fallback_index: ActiveValue::Set(None),
    }
}

async fn apply_updates(db: &DatabaseConnection, updates: Vec<(String, UpdateData, u32)>, pools: &Pools) {
    for (id, data, attempt) in updates {
        match update_one(db, &id, &data).await {
            Ok(true) => {
                pools.update_data.put(data, UpdateData::reset);
            }
            Ok(false) => {
                // Race with a slow create: the row doesn't exist yet.
                // Retry up to 3 times with a 1s delay, then drop
                // (spec §4.8).
                if attempt < UPDATE_NOT_FOUND_RETRIES {
                    let db = db.clone();
                    let pools = pools.clone();
                    tokio::spawn(async move {
                        tokio_time::sleep(UPDATE_NOT_FOUND_DELAY).await;
                        retry_update(db, id, data, attempt + 1, pools).await;
                    });
                } else {
                    tracing::warn!(id = %id, "dropping log update after exhausting not-found retries");
                    pools.update_data.put(data, UpdateData::reset);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, id = %id, "log record update failed");
                pools.update_data.put(data, UpdateData::reset);
            }
        }
    }
}

fn retry_update(
    db: DatabaseConnection,
    id: String,
    data: UpdateData,
    attempt: u32,
    pools: Pools,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        match update_one(&db, &id, &data).await {
            Ok(true) => {
                pools.update_data.put(data, UpdateData::reset);
            }
            Ok(false) if attempt < UPDATE_NOT_FOUND_RETRIES => {
                tokio_time::sleep(UPDATE_NOT_FOUND_DELAY).await;
                retry_update(db, id, data, attempt + 1, pools).await;
            }
            _ => {
                tracing::warn!(id = %id, "dropping log update after exhausting not-found retries");
                pools.update_data.put(data, UpdateData::reset);
            }
        }
    })
}

async fn update_one(db: &DatabaseConnection, id: &str, data: &UpdateData) -> Result<bool, sea_orm::DbErr> {
    let existing = log_record::Entity::find_by_id(id.to_string()).one(db).await?;
    let Some(existing) = existing else {
        return Ok(false);
    };
    let mut active: log_record::ActiveModel = existing.into();
    if let Some(status) = data.status {
        active.status = ActiveValue::Set(status.as_str().to_string());
    }
    if data.latency_ms.is_some() {
        active.latency_ms = ActiveValue::Set(data.latency_ms);
    }
    if data.usage.is_some() {
        active.usage = ActiveValue::Set(data.usage.clone());
    }
    if data.output_message.is_some() {
        active.output_message = ActiveValue::Set(data.output_message.clone());
    }
    if data.tool_calls.is_some() {
        active.tool_calls = ActiveValue::Set(data.tool_calls.clone());
    }
    if data.cost.is_some() {
        active.cost = ActiveValue::Set(data.cost);
    }
    if data.error_details.is_some() {
        active.error_details = ActiveValue::Set(data.error_details.clone());
    }
    if data.fallback_index.is_some() {
        active.fallback_index = ActiveValue::Set(data.fallback_index);
    }
    log_record::Entity::update(active).exec(db).await?;
    Ok(true)
}

async fn delete_before(db: &DatabaseConnection, before_ts: i64) -> Result<(), sea_orm::DbErr> {
    log_record::Entity::delete_many()
        .filter(log_record::Column::Timestamp.lt(before_ts))
        .exec(db)
        .await?;
    Ok(())
}

/// Marks `processing` rows older than 30 minutes as `expired` (spec §4.8:
/// "a separate ticker sweeps stuck processing records... they represent
/// orphaned requests"). Exposed standalone so it can also be driven from a
/// dedicated ticker in the hosting process, not only the writer's own loop.
pub async fn sweep_stuck_processing(db: &DatabaseConnection) -> Result<u64, sea_orm::DbErr> {
    let cutoff = now_unix() - STUCK_PROCESSING_AGE_SECS;
    let stuck = log_record::Entity::find()
        .filter(log_record::Column::Status.eq(LogStatus::Processing.as_str()))
        .filter(log_record::Column::Timestamp.lt(cutoff))
        .all(db)
        .await?;
    let count = stuck.len() as u64;
    for row in stuck {
        let mut active: log_record::ActiveModel = row.into();
        active.status = ActiveValue::Set(LogStatus::Expired.as_str().to_string());
        let _ = log_record::Entity::update(active).exec(db).await;
    }
    Ok(count)
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Synchronous read-side helper used by tests and diagnostics; the hot
/// path never reads back through this.
pub async fn fetch(db: &DatabaseConnection, id: &str) -> Result<Option<LogRecord>, sea_orm::DbErr> {
    let row = log_record::Entity::find_by_id(id.to_string()).one(db).await?;
    Ok(row.map(model_to_record))
}

fn model_to_record(m: log_record::Model) -> LogRecord {
    LogRecord {
        id: m.id,
        timestamp: m.timestamp,
        request_type: m.request_type,
        provider: m.provider,
        model: m.model,
        input_history: m.input_history,
        params: m.params,
        tools: m.tools,
        status: m.status,
        latency_ms: m.latency_ms,
        usage: m.usage,
        output_message: m.output_message,
        tool_calls: m.tool_calls,
        cost: m.cost,
        error_details: m.error_details,
        stream: m.stream,
        metadata: m.metadata,
        fallback_index: m.fallback_index,
    }
}

/// Shared handle type alias used by callers that only need to pass the bus
/// around without naming its internals.
pub type SharedBus = Arc<StorageBus>;

/// Cross-request dedup helper kept for the writer's own in-flight batching
/// window: if two creates for the same id arrive within one batch tick,
/// only the latest is issued.
pub(crate) fn dedupe_creates(creates: Vec<LogMessage>) -> Vec<LogMessage> {
    let mut seen = HashMap::new();
    for (idx, msg) in creates.iter().enumerate() {
        seen.insert(msg.id.clone(), idx);
    }
    let mut out: Vec<LogMessage> = Vec::with_capacity(seen.len());
    let mut indices: Vec<usize> = seen.into_values().collect();
    indices.sort_unstable();
    for idx in indices {
        out.push(creates[idx].clone());
    }
    out
}
