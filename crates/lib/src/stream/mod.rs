//! Live event stream: per-connection sessions, framing, and the client-side reader.
//!
//! A [`Session`] owns one client's stream. The server hands it a
//! [`ChannelTransport`] and returns [`live_body`] as the response body.

pub mod frame;
mod reader;
mod session;
mod transport;

pub use frame::Message;
pub use reader::{EventReader, Incoming, StreamEvent};
pub use session::{Session, SessionState, Transport, TransportClosed, HEARTBEAT_PERIOD};
pub use transport::{channel, live_body, ChannelTransport, QUEUE_CAPACITY};
