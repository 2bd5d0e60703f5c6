//! JSON text headers sent ahead of binary payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CodecError, Result};

const START_MARKER: &str = "start";

/// Sent once per viewer when a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartHeader {
    pub scan_name: String,
    pub store_url: String,
}

/// Sent immediately before each frame payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub frame_number: u64,
    pub shot_num: i64,
    #[serde(default)]
    pub store_url: Option<String>,
    #[serde(default)]
    pub scan_name: Option<String>,
}

/// A parsed text message from the live channel.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderMessage {
    Start(StartHeader),
    Frame(FrameHeader),
}

#[derive(Serialize)]
struct TaggedStart<'a> {
    msg_type: &'static str,
    #[serde(flatten)]
    start: &'a StartHeader,
}

impl HeaderMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(match self {
            HeaderMessage::Start(start) => serde_json::to_string(&TaggedStart {
                msg_type: START_MARKER,
                start,
            })?,
            HeaderMessage::Frame(frame) => serde_json::to_string(frame)?,
        })
    }

    /// Classify and parse a text message.
    ///
    /// `msg_type == "start"` marks a start header; anything carrying a
    /// `frame_number` is a frame header. Missing start fields default to
    /// empty strings.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = &value else {
            return Err(CodecError::unknown_header(text));
        };

        if map.get("msg_type").and_then(Value::as_str) == Some(START_MARKER) {
            let field = |key: &str| {
                map.get(key)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            return Ok(HeaderMessage::Start(StartHeader {
                scan_name: field("scan_name"),
                store_url: field("store_url"),
            }));
        }

        if map.contains_key("frame_number") {
            return Ok(HeaderMessage::Frame(serde_json::from_value(value)?));
        }

        Err(CodecError::unknown_header(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_header_json() {
        let header = HeaderMessage::Start(StartHeader {
            scan_name: "scan-1".into(),
            store_url: "http://store:8000".into(),
        });
        let json = header.to_json().unwrap();
        assert!(json.contains("\"msg_type\":\"start\""));
        assert!(json.contains("\"scan_name\":\"scan-1\""));
        assert_eq!(HeaderMessage::parse(&json).unwrap(), header);
    }

    #[test]
    fn test_frame_header_json() {
        let header = HeaderMessage::Frame(FrameHeader {
            frame_number: 1,
            shot_num: 11,
            store_url: Some("http://store:8000".into()),
            scan_name: None,
        });
        let json = header.to_json().unwrap();
        assert!(json.contains("\"frame_number\":1"));
        assert!(json.contains("\"scan_name\":null"));
        assert_eq!(HeaderMessage::parse(&json).unwrap(), header);
    }

    #[test]
    fn test_start_with_missing_fields() {
        let parsed = HeaderMessage::parse(r#"{"msg_type":"start"}"#).unwrap();
        assert_eq!(
            parsed,
            HeaderMessage::Start(StartHeader {
                scan_name: String::new(),
                store_url: String::new()
            })
        );
    }

    #[test]
    fn test_unknown_shapes() {
        assert!(matches!(
            HeaderMessage::parse(r#"{"hello":"world"}"#),
            Err(CodecError::UnknownHeader(_))
        ));
        assert!(matches!(
            HeaderMessage::parse("[1,2,3]"),
            Err(CodecError::UnknownHeader(_))
        ));
        assert!(matches!(
            HeaderMessage::parse("not json"),
            Err(CodecError::Json(_))
        ));
    }
}
