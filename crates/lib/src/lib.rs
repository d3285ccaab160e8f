//! Ticker core library — live event-stream sessions, wire framing, and the
//! HTTP server that hosts them. Used by the `ticker` CLI.

pub mod config;
pub mod init;
pub mod server;
pub mod stream;
