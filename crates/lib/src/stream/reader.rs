//! Client side of the event-stream format.
//!
//! [`EventReader`] is fed raw body chunks as they arrive (split anywhere,
//! including inside a line or a UTF-8 sequence) and returns what completed.

use super::frame::Message;

const BOM: &[u8] = "\u{FEFF}".as_bytes();

/// One dispatched event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEvent {
    /// `event:` field, if the server named the event.
    pub event: Option<String>,
    /// Last `id:` seen on the stream.
    pub id: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

impl StreamEvent {
    /// Decode the data as a `{ "msg": ... }` payload.
    pub fn message(&self) -> Result<Message, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Reconnect interval in milliseconds.
    Retry(u64),
    Event(StreamEvent),
}

#[derive(Debug, Default)]
pub struct EventReader {
    line: Vec<u8>,
    after_cr: bool,
    /// Set once the start of the stream has been checked for a byte order mark.
    bom_checked: bool,
    data: Option<String>,
    event: Option<String>,
    last_id: Option<String>,
}

impl EventReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk; returns the directives and events it completed, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Incoming> {
        let mut out = Vec::new();
        for &b in chunk {
            if std::mem::take(&mut self.after_cr) && b == b'\n' {
                continue;
            }
            match b {
                b'\n' => self.end_line(&mut out),
                b'\r' => {
                    self.after_cr = true;
                    self.end_line(&mut out);
                }
                _ => {
                    self.line.push(b);
                    if !self.bom_checked && self.line.len() == BOM.len() {
                        self.bom_checked = true;
                        if self.line == BOM {
                            self.line.clear();
                        }
                    }
                }
            }
        }
        out
    }

    fn end_line(&mut self, out: &mut Vec<Incoming>) {
        self.bom_checked = true;
        let raw = std::mem::take(&mut self.line);
        let line = String::from_utf8_lossy(&raw);
        if line.is_empty() {
            if let Some(event) = self.dispatch() {
                out.push(Incoming::Event(event));
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (&*line, ""),
        };
        match field {
            "data" => match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if !value.is_empty() && value.bytes().all(|c| c.is_ascii_digit()) {
                    if let Ok(ms) = value.parse() {
                        out.push(Incoming::Retry(ms));
                    }
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<StreamEvent> {
        let event = self.event.take();
        let data = self.data.take()?;
        Some(StreamEvent {
            event,
            id: self.last_id.clone(),
            data,
        })
    }
}
