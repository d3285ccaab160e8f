//! Server-side transport: a bounded frame queue feeding the HTTP response body.

use std::convert::Infallible;

use axum::body::Bytes;
use futures_util::stream::{self, Stream};
use tokio::sync::{mpsc, watch};

use super::session::{Session, Transport, TransportClosed};

/// Frames a session may have queued before the client is considered stuck.
pub const QUEUE_CAPACITY: usize = 32;

/// [`Transport`] over the sending half of a frame queue.
///
/// A write fails once the body (receiving half) is dropped or the queue is
/// full. Closing drops the sender so the body ends after draining.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Option<mpsc::Sender<Bytes>>,
}

/// Create a transport and the receiver its frames arrive on.
pub fn channel(capacity: usize) -> (ChannelTransport, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelTransport { tx: Some(tx) }, rx)
}

impl Transport for ChannelTransport {
    fn write(&mut self, frame: &str) -> Result<(), TransportClosed> {
        let tx = self.tx.as_ref().ok_or(TransportClosed)?;
        tx.try_send(Bytes::from(frame.to_owned()))
            .map_err(|_| TransportClosed)
    }

    fn close(&mut self) -> Result<(), TransportClosed> {
        self.tx.take().map(drop).ok_or(TransportClosed)
    }
}

/// Cancels the session when the body holding it goes away.
struct CancelOnDrop(Session<ChannelTransport>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.0.cancel() {
            log::debug!("live session {}: response body dropped", self.0.id());
        }
    }
}

struct BodyState {
    frames: mpsc::Receiver<Bytes>,
    shutdown: Option<watch::Receiver<bool>>,
    _session: CancelOnDrop,
}

/// Response body for one live session.
///
/// Yields queued frames in order. Ends when the session closes its transport
/// or `shutdown` is (or already was) set to true; dropping it (client
/// disconnect) cancels the session.
pub fn live_body(
    session: Session<ChannelTransport>,
    frames: mpsc::Receiver<Bytes>,
    shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let state = BodyState {
        frames,
        shutdown: Some(shutdown),
        _session: CancelOnDrop(session),
    };
    stream::unfold(state, |mut state| async move {
        let frame = next_frame(&mut state.frames, &mut state.shutdown).await?;
        Some((Ok(frame), state))
    })
}

async fn next_frame(
    frames: &mut mpsc::Receiver<Bytes>,
    shutdown: &mut Option<watch::Receiver<bool>>,
) -> Option<Bytes> {
    loop {
        let Some(signal) = shutdown.as_mut() else {
            return frames.recv().await;
        };
        // Shutdown wins over queued frames, including when it fired before this body existed.
        let stopping = tokio::select! {
            biased;
            stopping = async { signal.wait_for(|stopping| *stopping).await.is_ok() } => stopping,
            frame = frames.recv() => return frame,
        };
        if stopping {
            return None;
        }
        // Nobody left to signal shutdown; keep streaming.
        *shutdown = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn text(frame: &Bytes) -> &str {
        std::str::from_utf8(frame).unwrap()
    }

    #[test]
    fn write_fails_after_receiver_dropped() {
        let (mut transport, rx) = channel(4);
        assert!(transport.write("retry: 1000\n").is_ok());
        drop(rx);
        assert_eq!(transport.write("data: {}\n\n"), Err(TransportClosed));
    }

    #[test]
    fn write_fails_when_queue_is_full() {
        let (mut transport, _rx) = channel(1);
        assert!(transport.write("a").is_ok());
        assert_eq!(transport.write("b"), Err(TransportClosed));
    }

    #[test]
    fn second_close_is_rejected() {
        let (mut transport, _rx) = channel(1);
        assert!(transport.close().is_ok());
        assert_eq!(transport.close(), Err(TransportClosed));
        assert_eq!(transport.write("a"), Err(TransportClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn body_yields_opening_frames_then_heartbeat() {
        let (transport, rx) = channel(QUEUE_CAPACITY);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = Session::open(transport);
        let mut body = Box::pin(live_body(session.clone(), rx, shutdown_rx));

        let first = body.next().await.unwrap().unwrap();
        assert_eq!(text(&first), "retry: 1000\n");
        let second = body.next().await.unwrap().unwrap();
        assert!(text(&second).starts_with("data: {\"msg\":"));
        let third = body.next().await.unwrap().unwrap();
        assert_eq!(text(&third), "data: {\"msg\":\"Heartbeat 1\"}\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_body_cancels_session() {
        let (transport, rx) = channel(QUEUE_CAPACITY);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = Session::open(transport);
        let body = live_body(session.clone(), rx, shutdown_rx);

        drop(body);
        assert!(session.is_closed());
        assert!(!session.has_timer());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(session.sequence(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_signal_ends_body() {
        let (transport, rx) = channel(QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = Session::open(transport);
        let mut body = Box::pin(live_body(session.clone(), rx, shutdown_rx));

        body.next().await.unwrap().unwrap();
        body.next().await.unwrap().unwrap();
        shutdown_tx.send_replace(true);

        assert!(body.next().await.is_none());
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_shutdown_sender_keeps_streaming() {
        let (transport, rx) = channel(QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);
        let session = Session::open(transport);
        let mut body = Box::pin(live_body(session.clone(), rx, shutdown_rx));

        for _ in 0..3 {
            assert!(body.next().await.is_some());
        }
        assert_eq!(session.sequence(), 1);
        assert!(!session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn body_created_after_shutdown_ends_at_once() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send_replace(true);

        let (transport, rx) = channel(QUEUE_CAPACITY);
        let session = Session::open(transport);
        let mut body = Box::pin(live_body(session.clone(), rx, shutdown_rx));

        assert!(body.next().await.is_none());
        assert!(session.is_closed());
        assert!(!session.has_timer());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(session.sequence(), 0);
    }
}
