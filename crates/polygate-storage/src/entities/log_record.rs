//! sea-orm entity for the `log_records` table: the durable side of the
//! [`crate::LogRecord`] (spec §3, §4.8). One row per request; created by
//! `LoggerPlugin::pre_hook` with `status="processing"`, mutated exactly once
//! by `post_hook` to `success` or `error`.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "log_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub timestamp: i64,
    pub request_type: String,
    pub provider: String,
    pub model: String,
    /// JSON-encoded history; `None` when content logging is disabled.
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

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
