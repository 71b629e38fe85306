//! Wire frames exchanged with the backend over the persistent connection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ClientError;
use crate::messages::SourceInfo;

/// Client → server frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum OutboundFrame {
    Query(QueryPayload),
    Ping,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub collection_name: String,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub file_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_reasoning: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_planning: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_deep_search: Option<bool>,
}

impl OutboundFrame {
    pub fn to_json(&self) -> Result<String, ClientError> {
        serde_json::to_string(self).map_err(|e| ClientError::InvalidQuery(e.to_string()))
    }
}

/// Server → client frame, discriminated by `type`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Progress(ProgressFrame),
    Batch(BatchFrame),
    Status(StatusFrame),
    Response(ResponseFrame),
    Complete {},
    Error(ErrorFrame),
    Pong {},
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProgressFrame {
    pub step: Option<String>,
    pub message: Option<String>,
}

impl ProgressFrame {
    /// The status line, preferring `step` over `message`.
    pub fn text(&self) -> Option<&str> {
        self.step
            .as_deref()
            .or(self.message.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatchFrame {
    pub items: Vec<BatchItem>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchItem {
    StepStart {
        step_number: u32,
        total_steps: u32,
        #[serde(default)]
        description: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatusFrame {
    pub message: Option<String>,
    pub sources: Option<BTreeMap<String, SourceInfo>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResponseFrame {
    /// Text delta, appended to the cumulative buffer by the receiver.
    pub response: String,
    pub sources: Option<BTreeMap<String, SourceInfo>>,
    pub thread_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ErrorFrame {
    pub error: Option<String>,
    pub message: Option<String>,
    /// Set when the frame was synthesized locally for a socket failure.
    #[serde(skip)]
    pub connection_lost: bool,
}

impl ErrorFrame {
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            message: None,
            connection_lost: true,
        }
    }

    pub fn text(&self) -> &str {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("Unknown error")
    }

    pub fn to_client_error(&self) -> ClientError {
        if self.connection_lost {
            ClientError::ConnectionLost(self.text().to_string())
        } else {
            ClientError::Server(self.text().to_string())
        }
    }
}

impl InboundFrame {
    /// Decode one text frame. An object without `type` but with an `error`
    /// key is accepted as an error frame.
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let value: Value = serde_json::from_str(raw)?;
        if value.get("type").is_none() {
            if let Some(err) = value.get("error") {
                let text = match err {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                return Ok(Self::Error(ErrorFrame {
                    error: Some(text),
                    ..Default::default()
                }));
            }
            return Err(ClientError::MalformedFrame("missing frame type".into()));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::Progress(_) => "progress",
            Self::Batch(_) => "batch",
            Self::Status(_) => "status",
            Self::Response(_) => "response",
            Self::Complete {} => "complete",
            Self::Error(_) => "error",
            Self::Pong {} => "pong",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete {} | Self::Error(_))
    }

    /// Keep-alive and unrecognised frames carry nothing for a query stream.
    pub fn is_noise(&self) -> bool {
        matches!(self, Self::Pong {} | Self::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_frame_wire_shape() {
        let frame = OutboundFrame::Query(QueryPayload {
            collection_name: "contracts".into(),
            query: "What is the termination clause?".into(),
            thread_id: None,
            file_keys: vec!["lease.pdf".into()],
            use_reasoning: Some(true),
            ..Default::default()
        });
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "query",
                "data": {
                    "collection_name": "contracts",
                    "query": "What is the termination clause?",
                    "file_keys": ["lease.pdf"],
                    "use_reasoning": true
                }
            })
        );
    }

    #[test]
    fn ping_frame_has_no_data() {
        let value: Value = serde_json::from_str(&OutboundFrame::Ping.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"action": "ping"}));
    }

    #[test]
    fn parse_response_frame() {
        let frame = InboundFrame::parse(
            r#"{"type":"response","response":"<think>1. a","thread_id":"t-1","sources":{"a.pdf":{"page":2}}}"#,
        )
        .unwrap();
        let InboundFrame::Response(resp) = frame else {
            panic!("expected response frame");
        };
        assert_eq!(resp.response, "<think>1. a");
        assert_eq!(resp.thread_id.as_deref(), Some("t-1"));
        assert_eq!(resp.sources.unwrap()["a.pdf"].page, Some(2));
    }

    #[test]
    fn parse_status_frame_with_null_fields() {
        let frame = InboundFrame::parse(
            r#"{"type":"status","message":"Reading","sources":{"a.pdf":{"page":null,"is_secondary":null,"chunk_title":"Intro","kg_properties":null}}}"#,
        )
        .unwrap();
        let InboundFrame::Status(status) = frame else {
            panic!("expected status frame");
        };
        let sources = status.sources.unwrap();
        let info = &sources["a.pdf"];
        assert_eq!(info.chunk_title.as_deref(), Some("Intro"));
        assert_eq!(info.is_secondary, None);
        assert_eq!(info.page, None);
    }

    #[test]
    fn parse_batch_frame_ignores_unknown_items() {
        let frame = InboundFrame::parse(
            r#"{"type":"batch","items":[
                {"type":"step_start","step_number":1,"total_steps":3,"description":"Search"},
                {"type":"step_progress","pct":40}
            ]}"#,
        )
        .unwrap();
        let InboundFrame::Batch(batch) = frame else {
            panic!("expected batch frame");
        };
        assert_eq!(batch.items.len(), 2);
        assert_eq!(
            batch.items[0],
            BatchItem::StepStart {
                step_number: 1,
                total_steps: 3,
                description: "Search".into()
            }
        );
        assert_eq!(batch.items[1], BatchItem::Other);
    }

    #[test]
    fn parse_progress_prefers_step() {
        let frame = InboundFrame::parse(r#"{"type":"progress","step":"Searching","message":"ignored"}"#).unwrap();
        let InboundFrame::Progress(p) = frame else {
            panic!("expected progress frame");
        };
        assert_eq!(p.text(), Some("Searching"));

        let blank = ProgressFrame {
            message: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(blank.text(), None);
    }

    #[test]
    fn parse_untyped_error_object() {
        let frame = InboundFrame::parse(r#"{"error":"rate limited"}"#).unwrap();
        let InboundFrame::Error(err) = frame else {
            panic!("expected error frame");
        };
        assert_eq!(err.text(), "rate limited");
        assert!(matches!(err.to_client_error(), ClientError::Server(_)));
    }

    #[test]
    fn parse_typed_error_with_message() {
        let frame = InboundFrame::parse(r#"{"type":"error","message":"boom"}"#).unwrap();
        assert!(frame.is_terminal());
        let InboundFrame::Error(err) = frame else {
            panic!("expected error frame");
        };
        assert_eq!(err.text(), "boom");
    }

    #[test]
    fn parse_complete_pong_and_unknown() {
        assert_eq!(InboundFrame::parse(r#"{"type":"complete"}"#).unwrap(), InboundFrame::Complete {});
        assert!(InboundFrame::parse(r#"{"type":"pong"}"#).unwrap().is_noise());
        assert_eq!(
            InboundFrame::parse(r#"{"type":"telemetry","x":1}"#).unwrap(),
            InboundFrame::Unknown
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(InboundFrame::parse("not json").is_err());
        assert!(InboundFrame::parse(r#"{"hello":"world"}"#).is_err());
    }

    #[test]
    fn synthesized_connection_error() {
        let err = ErrorFrame::connection_lost("socket reset");
        assert!(matches!(err.to_client_error(), ClientError::ConnectionLost(ref r) if r == "socket reset"));
    }
}
