//! Logstash JSON 인코딩
//!
//! ```json
//! {
//!   "message": "Exception: boom\n  at Foo.bar",
//!   "time": "2024-01-15T12:00:00.000Z",
//!   "id": "5f0c...",
//!   "kind": "java-exception",
//!   "line_count": 2,
//!   "messageInfo": { ... },
//!   "docker": { "name": "web", "id": "c0ffee", "image": "app:1.2", "hostname": "node-1" }
//! }
//! ```
//!
//! `messageInfo`는 첫 라인이 JSON 객체였을 때만 포함됩니다.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use stackfold_core::error::DeliveryError;
use stackfold_core::types::{LogicalMessage, SourceMetadata, StructuredFields};

#[derive(Serialize)]
struct WireMessage<'a> {
    message: &'a str,
    time: String,
    id: &'a str,
    kind: &'a str,
    line_count: usize,
    #[serde(rename = "messageInfo", skip_serializing_if = "Option::is_none")]
    message_info: Option<&'a StructuredFields>,
    docker: &'a SourceMetadata,
}

/// 메시지를 개행 없는 JSON 한 줄로 인코딩합니다.
pub fn encode_json(message: &LogicalMessage) -> Result<Vec<u8>, DeliveryError> {
    let time = DateTime::<Utc>::from(message.first_timestamp)
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    let wire = WireMessage {
        message: &message.merged_text,
        time,
        id: &message.id,
        kind: message.kind.as_str(),
        line_count: message.line_count,
        message_info: message.structured_fields.as_ref(),
        docker: &message.metadata,
    };

    serde_json::to_vec(&wire).map_err(|e| DeliveryError::Encode(e.to_string()))
}
