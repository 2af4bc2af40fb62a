//! Decoding of inbound `{key, value}` frames.
//!
//! The wire tells data from completion only by shape (an array versus an
//! object carrying `key: "done"`). That inference happens once, here; the
//! rest of the crate works with [`InboundFrame`].

use serde::Deserialize;
use serde_json::Value;

use crate::correlation::{decode_key, BatchShape, KeyKind};
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Rows of the sample descriptor.
    Sample {
        generation: Option<u64>,
        rows: Vec<Value>,
    },
    /// Data or completion for one of the three batch shapes.
    Batch {
        shape: BatchShape,
        generation: Option<u64>,
        payload: BatchPayload,
    },
    /// Live dataset-wide count.
    TotalCount(u64),
    /// Error reported by the backend, free-form.
    BackendError(Value),
    /// Top-level completion marker not tied to a batch.
    Done,
    /// A key this client never issued.
    Unknown { key: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchPayload {
    /// Components in the order the batch was sent.
    Data(Vec<Value>),
    /// Every component has been delivered.
    Done,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    key: String,
    #[serde(default)]
    value: Value,
}

impl InboundFrame {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Self::from_parts(raw.key, raw.value)
    }

    pub fn from_parts(key: String, value: Value) -> Result<Self> {
        match key.as_str() {
            "totalCount" => return total_count(&value).map(InboundFrame::TotalCount),
            "error" => return Ok(InboundFrame::BackendError(value)),
            "done" => return Ok(InboundFrame::Done),
            _ => {}
        }

        let Some((kind, generation)) = decode_key(&key) else {
            return Ok(InboundFrame::Unknown { key });
        };

        match kind {
            KeyKind::Sample => Ok(InboundFrame::Sample {
                generation,
                rows: sample_rows(&key, value)?,
            }),
            KeyKind::Batch(shape) => Ok(InboundFrame::Batch {
                shape,
                generation,
                payload: batch_payload(&key, value)?,
            }),
        }
    }
}

fn batch_payload(key: &str, value: Value) -> Result<BatchPayload> {
    match value {
        Value::Array(components) => Ok(BatchPayload::Data(components)),
        Value::Object(ref map) if map.get("key").and_then(Value::as_str) == Some("done") => {
            Ok(BatchPayload::Done)
        }
        other => Err(ClientError::Protocol(format!(
            "batch {key} carried neither data nor completion: {other}"
        ))),
    }
}

/// The sample payload is an array whose first element holds the rows.
fn sample_rows(key: &str, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(mut parts) if !parts.is_empty() => match parts.swap_remove(0) {
            Value::Array(rows) => Ok(rows),
            other => Err(ClientError::Protocol(format!("{key} rows are not an array: {other}"))),
        },
        Value::Array(_) => Ok(Vec::new()),
        other => Err(ClientError::Protocol(format!("{key} payload is not an array: {other}"))),
    }
}

/// Count lives at `value[0][0].count`.
fn total_count(value: &Value) -> Result<u64> {
    value
        .get(0)
        .and_then(|rows| rows.get(0))
        .and_then(|row| row.get("count"))
        .and_then(|count| count.as_u64().or_else(|| count.as_f64().map(|f| f.max(0.0) as u64)))
        .ok_or_else(|| ClientError::Protocol(format!("totalCount payload without a count: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_and_done_are_distinguished() {
        let data = InboundFrame::decode(r#"{"key":"full:2","value":[[],[],[]]}"#).unwrap();
        assert_eq!(
            data,
            InboundFrame::Batch {
                shape: BatchShape::Full,
                generation: Some(2),
                payload: BatchPayload::Data(vec![json!([]), json!([]), json!([])]),
            }
        );

        let done = InboundFrame::decode(r#"{"key":"full:2","value":{"key":"done"}}"#).unwrap();
        assert!(matches!(
            done,
            InboundFrame::Batch {
                payload: BatchPayload::Done,
                ..
            }
        ));
    }

    #[test]
    fn batch_object_without_done_is_a_violation() {
        let err = InboundFrame::decode(r#"{"key":"partial:1","value":{"key":"progress"}}"#).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn total_count_is_extracted_from_nested_rows() {
        let frame = InboundFrame::decode(r#"{"key":"totalCount","value":[[{"count":987654321}]]}"#).unwrap();
        assert_eq!(frame, InboundFrame::TotalCount(987_654_321));
        assert!(InboundFrame::decode(r#"{"key":"totalCount","value":[]}"#).is_err());
    }

    #[test]
    fn sample_takes_first_component() {
        let frame = InboundFrame::decode(
            r#"{"key":"sample:4","value":[[{"id":744251484291153920,"create_at":"2016-06-18T20:00:00.000Z"}]]}"#,
        )
        .unwrap();
        let InboundFrame::Sample { generation, rows } = frame else {
            panic!("expected sample frame");
        };
        assert_eq!(generation, Some(4));
        assert_eq!(rows[0]["id"].as_u64(), Some(744_251_484_291_153_920));
    }

    #[test]
    fn error_and_unknown_keys() {
        let err = InboundFrame::decode(r#"{"key":"error","value":"query timed out"}"#).unwrap();
        assert_eq!(err, InboundFrame::BackendError(json!("query timed out")));

        let unknown = InboundFrame::decode(r#"{"key":"batchWithGeoRequest","value":[]}"#).unwrap();
        assert_eq!(
            unknown,
            InboundFrame::Unknown {
                key: "batchWithGeoRequest".to_string()
            }
        );

        assert_eq!(InboundFrame::decode(r#"{"key":"done"}"#).unwrap(), InboundFrame::Done);
    }

    #[test]
    fn non_json_is_a_parse_error() {
        assert!(matches!(InboundFrame::decode("not json"), Err(ClientError::Parse(_))));
    }
}
