// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON frame shapes for the gateway protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error detail on a `res` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The three gateway frame shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Req {
        id: String,
        method: String,
        params: Value,
    },
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ResError>,
    },
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

impl Frame {
    /// Parse a text frame. Unparseable frames yield `None`; the caller
    /// stays silent about them.
    pub fn parse(text: &str) -> Option<Frame> {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn req_frame_roundtrips() {
        let frame = Frame::Req {
            id: "r-1".to_string(),
            method: "agent".to_string(),
            params: json!({"message": "hi"}),
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert_eq!(Frame::parse(&text), Some(frame));
    }

    #[test]
    fn res_frame_parses_with_and_without_error() {
        let ok = Frame::parse(r#"{"type":"res","id":"r-1","ok":true,"payload":{"x":1}}"#).unwrap();
        assert!(matches!(ok, Frame::Res { ok: true, .. }));

        let err =
            Frame::parse(r#"{"type":"res","id":"r-2","ok":false,"error":{"message":"no"}}"#)
                .unwrap();
        match err {
            Frame::Res { ok, error, .. } => {
                assert!(!ok);
                assert_eq!(error.unwrap().message.as_deref(), Some("no"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn event_frame_parses() {
        let ev = Frame::parse(r#"{"type":"event","event":"connect.challenge","payload":{"nonce":"n1"}}"#)
            .unwrap();
        match ev {
            Frame::Event { event, payload } => {
                assert_eq!(event, "connect.challenge");
                assert_eq!(payload.unwrap()["nonce"], "n1");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn garbage_is_silently_none() {
        assert_eq!(Frame::parse("not json"), None);
        assert_eq!(Frame::parse(r#"{"type":"mystery"}"#), None);
    }
}
