//! Event-stream framing: the reconnect preamble and `data:` events.

use serde::{Deserialize, Serialize};

/// Reconnect interval advertised to clients in the preamble, in milliseconds.
pub const RETRY_MS: u64 = 1000;

/// Text of the informational event sent right after the preamble.
pub const READY_MSG: &str = "Ticker spreman — čekanje dešavanja...";

/// Payload of every data event on the live stream: `{ "msg": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub msg: String,
}

impl Message {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }

    /// The informational event written once when a stream opens.
    pub fn ready() -> Self {
        Self::new(READY_MSG)
    }

    /// Heartbeat number `n` (1-based).
    pub fn heartbeat(n: u64) -> Self {
        Self::new(format!("Heartbeat {}", n))
    }
}

/// `retry: <ms>\n`. Sent exactly once, before any data event.
pub fn retry_directive(ms: u64) -> String {
    format!("retry: {}\n", ms)
}

/// `data: <json>\n\n` for a single-line payload.
pub fn data_event(json: &str) -> String {
    format!("data: {}\n\n", json)
}

/// Serialize `msg` and frame it as one data event.
pub fn message_event(msg: &Message) -> String {
    let json = serde_json::to_string(msg)
        .unwrap_or_else(|_| r#"{"msg":""}"#.to_string());
    data_event(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_is_retry_1000() {
        assert_eq!(retry_directive(RETRY_MS), "retry: 1000\n");
    }

    #[test]
    fn heartbeat_event_framing() {
        assert_eq!(
            message_event(&Message::heartbeat(3)),
            "data: {\"msg\":\"Heartbeat 3\"}\n\n"
        );
    }

    #[test]
    fn ready_event_keeps_utf8_unescaped() {
        let frame = message_event(&Message::ready());
        assert!(frame.starts_with("data: {\"msg\":\"Ticker spreman — "));
        assert!(frame.ends_with("\"}\n\n"));
        assert_eq!(frame.matches('\n').count(), 2);
    }
}
