use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use polygate_protocol::GatewayError;
use serde::Serialize;

/// HTTP-facing wrapper around [`GatewayError`] (spec §6 error envelope):
/// `{ error: { type, code, message, param? }, status_code, event_id }`.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        ApiError(error)
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
    status_code: u16,
    event_id: uuid::Uuid,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    param: Option<String>,
}

fn kind_tag(error: &GatewayError) -> String {
    serde_json::to_value(error.kind)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| "internal".to_string())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status_code = error.http_status.unwrap_or_else(|| error.kind.http_status());
        let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorEnvelope {
            error: ErrorDetail {
                kind: kind_tag(&error),
                code: error.code,
                message: error.message,
                param: error.param,
            },
            status_code,
            event_id: error.event_id,
        };
        (status, Json(body)).into_response()
    }
}
