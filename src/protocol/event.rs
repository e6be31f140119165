use serde_json::Value;

use super::request::RpcId;
use super::response::{JsonRpcError, JsonRpcResponse};

/// SSE event name the server uses to announce the message endpoint.
pub const ENDPOINT_EVENT: &str = "endpoint";

const SESSION_ID_PARAM: &str = "session_id=";

/// One blank-line-delimited SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder fed one line at a time.
///
/// Only `event:` and `data:` fields are kept; comments (`:`) and unknown
/// fields are dropped. Multiple `data:` lines of one event are joined with
/// `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a single line (with or without its trailing newline).
    ///
    /// Returns a complete event when `line` is the blank terminator.
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.trim_end_matches(&['\n', '\r'][..]);

        if line.is_empty() {
            return self.take();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            _ => {}
        }
        None
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.take()
    }

    fn take(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() {
            self.event = None;
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(SseEvent {
            event: self.event.take(),
            data,
        })
    }
}

/// A decoded unit from the event stream, consumed as soon as it is parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Handshake {
        session_id: String,
    },
    Reply {
        id: RpcId,
        outcome: Result<Value, JsonRpcError>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Malformed {
        raw: String,
        reason: String,
    },
}

impl InboundEvent {
    pub fn classify(event: SseEvent) -> Self {
        let data = event.data.trim();

        if data.starts_with('{') {
            return classify_json(data);
        }

        let is_endpoint = event.event.as_deref() == Some(ENDPOINT_EVENT);
        if is_endpoint || data.contains(SESSION_ID_PARAM) {
            return match extract_session_id(data) {
                Some(session_id) => Self::Handshake { session_id },
                None => Self::Malformed {
                    raw: event.data,
                    reason: "handshake without session_id".into(),
                },
            };
        }

        Self::Malformed {
            raw: event.data,
            reason: "unrecognized event payload".into(),
        }
    }
}

fn classify_json(data: &str) -> InboundEvent {
    let malformed = |reason: String| InboundEvent::Malformed {
        raw: data.to_string(),
        reason,
    };

    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return malformed(format!("invalid json: {e}")),
    };

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let is_reply = value.get("result").is_some() || value.get("error").is_some();

    if has_id && is_reply {
        return match serde_json::from_value::<JsonRpcResponse>(value) {
            Ok(resp) => InboundEvent::Reply {
                id: resp.id.clone(),
                outcome: resp.into_outcome(),
            },
            Err(e) => malformed(format!("invalid json-rpc response: {e}")),
        };
    }

    if let Some(method) = value.get("method").and_then(Value::as_str) {
        return InboundEvent::Notification {
            method: method.to_string(),
            params: value.get("params").cloned(),
        };
    }

    malformed("json-rpc message is neither reply nor notification".into())
}

/// Pull the session token out of an endpoint URL such as
/// `/messages/?session_id=abc123&x=1`.
pub fn extract_session_id(data: &str) -> Option<String> {
    let (_, rest) = data.split_once(SESSION_ID_PARAM)?;
    let id: String = rest
        .chars()
        .take_while(|c| *c != '&' && !c.is_whitespace())
        .collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &str) -> Vec<SseEvent> {
        let mut decoder = SseDecoder::new();
        let mut out: Vec<SseEvent> = input.lines().filter_map(|l| decoder.push_line(l)).collect();
        out.extend(decoder.finish());
        out
    }

    #[test]
    fn decodes_endpoint_event() {
        let ev = decode_all("event: endpoint\ndata: /messages/?session_id=abc123\n\n");
        assert_eq!(
            ev,
            vec![SseEvent {
                event: Some("endpoint".into()),
                data: "/messages/?session_id=abc123".into(),
            }]
        );
    }

    #[test]
    fn joins_multiline_data_and_skips_comments() {
        let ev = decode_all(": ping\ndata: a\ndata: b\n\n");
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].data, "a\nb");
        assert_eq!(ev[0].event, None);
    }

    #[test]
    fn blank_lines_without_data_produce_nothing() {
        assert!(decode_all("\n\nevent: message\n\n").is_empty());
    }

    #[test]
    fn trailing_event_is_flushed() {
        let ev = decode_all("data: {\"x\":1}");
        assert_eq!(ev[0].data, "{\"x\":1}");
    }

    #[test]
    fn classifies_handshake() {
        let ev = SseEvent {
            event: Some("endpoint".into()),
            data: "/messages/?session_id=abc123&foo=bar".into(),
        };
        assert_eq!(
            InboundEvent::classify(ev),
            InboundEvent::Handshake {
                session_id: "abc123".into()
            }
        );
    }

    #[test]
    fn endpoint_without_session_id_is_malformed() {
        let ev = SseEvent {
            event: Some("endpoint".into()),
            data: "/messages/".into(),
        };
        assert!(matches!(
            InboundEvent::classify(ev),
            InboundEvent::Malformed { .. }
        ));
    }

    #[test]
    fn classifies_success_and_error_replies() {
        let ok = SseEvent {
            event: Some("message".into()),
            data: r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#.into(),
        };
        assert_eq!(
            InboundEvent::classify(ok),
            InboundEvent::Reply {
                id: RpcId::Number(1),
                outcome: Ok(serde_json::json!({"ok": true})),
            }
        );

        let err = SseEvent {
            event: None,
            data: r#"{"jsonrpc":"2.0","id":2,"error":{"code":400,"message":"duplicate name"}}"#
                .into(),
        };
        assert_eq!(
            InboundEvent::classify(err),
            InboundEvent::Reply {
                id: RpcId::Number(2),
                outcome: Err(JsonRpcError::new(400, "duplicate name")),
            }
        );
    }

    #[test]
    fn replies_without_version_member_are_accepted() {
        let ok = SseEvent {
            event: Some("message".into()),
            data: r#"{"id":1,"result":{"employees":[1,2,3,4,5]}}"#.into(),
        };
        assert_eq!(
            InboundEvent::classify(ok),
            InboundEvent::Reply {
                id: RpcId::Number(1),
                outcome: Ok(serde_json::json!({"employees": [1, 2, 3, 4, 5]})),
            }
        );

        let err = SseEvent {
            event: Some("message".into()),
            data: r#"{"id":2,"error":{"code":400,"message":"duplicate name"}}"#.into(),
        };
        assert_eq!(
            InboundEvent::classify(err),
            InboundEvent::Reply {
                id: RpcId::Number(2),
                outcome: Err(JsonRpcError::new(400, "duplicate name")),
            }
        );
    }

    #[test]
    fn reply_text_mentioning_session_id_is_not_a_handshake() {
        let ev = SseEvent {
            event: None,
            data: r#"{"jsonrpc":"2.0","id":3,"result":{"text":"session_id=zzz"}}"#.into(),
        };
        assert!(matches!(
            InboundEvent::classify(ev),
            InboundEvent::Reply { .. }
        ));
    }

    #[test]
    fn classifies_notification() {
        let ev = SseEvent {
            event: None,
            data: r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"p":1}}"#.into(),
        };
        assert_eq!(
            InboundEvent::classify(ev),
            InboundEvent::Notification {
                method: "notifications/progress".into(),
                params: Some(serde_json::json!({"p": 1})),
            }
        );
    }

    #[test]
    fn garbage_is_malformed() {
        for data in ["{not json", "hello", r#"{"jsonrpc":"2.0"}"#] {
            let ev = SseEvent {
                event: None,
                data: data.into(),
            };
            assert!(
                matches!(InboundEvent::classify(ev), InboundEvent::Malformed { .. }),
                "{data} should be malformed"
            );
        }
    }
}
