//! WebSocket telemetry link.
//!
//! [`WsTelemetryLink`] connects to the relay as a client and exchanges JSON
//! envelopes (`{"event": ..., "data": ...}`):
//!
//! * **Outbound** – [`OutboundEvent`]s are encoded and queued to a writer
//!   task that owns the sink half of the socket, so any loop may send
//!   without holding a lock across the network write.
//! * **Inbound** – a reader task decodes `command` and `heartbeat` frames and
//!   fans them out to every [`inbound_stream`][TelemetryLink::inbound_stream].
//!   When the socket closes the reader marks the link disconnected and emits
//!   [`InboundEvent::Disconnected`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use mower_types::{InboundEvent, MowerError, OutboundEvent};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::link::{TelemetryLink, broadcast_stream, decode_inbound, encode_outbound};

/// Frames queued for the writer task before `send` starts waiting.
const OUTBOUND_QUEUE: usize = 64;
const INBOUND_CAPACITY: usize = 128;
/// Upper bound on TCP connect plus the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

struct Session {
    outbound: mpsc::Sender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Client side of the robot ↔ relay WebSocket.
pub struct WsTelemetryLink {
    url: String,
    inbound: broadcast::Sender<InboundEvent>,
    connected: Arc<AtomicBool>,
    session: Mutex<Option<Session>>,
}

impl WsTelemetryLink {
    /// Create a link that will connect to `url` (e.g. `"ws://relay:5000/ws"`).
    pub fn new(url: impl Into<String>) -> Self {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Self {
            url: url.into(),
            inbound,
            connected: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TelemetryLink for WsTelemetryLink {
    async fn connect(&self) -> Result<(), MowerError> {
        if self.is_connected() {
            return Ok(());
        }

        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| MowerError::Link(format!("connect to {}: handshake timed out", self.url)))?
            .map_err(|e| MowerError::Link(format!("connect to {}: {e}", self.url)))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

        // Announce the connection before the reader can observe a close.
        self.connected.store(true, Ordering::Release);
        info!(url = %self.url, "telemetry link connected");
        let _ = self.inbound.send(InboundEvent::Connected);

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let closing = matches!(frame, Message::Close(_));
                if ws_tx.send(frame).await.is_err() || closing {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let inbound = self.inbound.clone();
        let connected = Arc::clone(&self.connected);
        let url = self.url.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = decode_inbound(text.as_str()) {
                            let _ = inbound.send(event);
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(url = %url, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            if connected.swap(false, Ordering::AcqRel) {
                info!(url = %url, "telemetry link closed by peer");
                let _ = inbound.send(InboundEvent::Disconnected);
            }
        });

        let previous = self.session().replace(Session {
            outbound: out_tx,
            reader,
            writer,
        });
        if let Some(stale) = previous {
            stale.reader.abort();
            stale.writer.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MowerError> {
        let taken = self.session().take();
        let Some(session) = taken else {
            return Ok(());
        };
        let was_connected = self.connected.swap(false, Ordering::AcqRel);

        // Let the writer flush a close frame, then stop reading.
        let _ = session.outbound.try_send(Message::Close(None));
        drop(session.outbound);
        session.reader.abort();
        let _ = session.writer.await;

        if was_connected {
            info!(url = %self.url, "telemetry link disconnected");
            let _ = self.inbound.send(InboundEvent::Disconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn send(&self, event: OutboundEvent) -> Result<(), MowerError> {
        if !self.is_connected() {
            return Err(MowerError::Link("not connected".to_string()));
        }
        let name = event.name();
        let text = encode_outbound(event)?;
        let outbound = self
            .session()
            .as_ref()
            .map(|s| s.outbound.clone())
            .ok_or_else(|| MowerError::Link("not connected".to_string()))?;
        outbound
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| MowerError::Link(format!("{name}: writer closed")))?;
        debug!(event = name, "queued outbound event");
        Ok(())
    }

    fn inbound_stream(&self) -> BoxStream<'static, InboundEvent> {
        broadcast_stream(self.inbound.subscribe())
    }
}

impl Drop for WsTelemetryLink {
    fn drop(&mut self) {
        if let Some(session) = self.session().take() {
            session.reader.abort();
            session.writer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mower_types::SafetySnapshot;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn local_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn next_event(
        stream: &mut BoxStream<'static, InboundEvent>,
    ) -> Option<InboundEvent> {
        tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn send_and_receive_envelopes() {
        let (listener, url) = local_server().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text(
                r#"{"event":"command","data":{"autonomous":true}}"#.into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(r#"{"event":"heartbeat","data":{}}"#.into()))
                .await
                .unwrap();
            first.into_text().unwrap().as_str().to_owned()
        });

        let link = WsTelemetryLink::new(url);
        let mut inbound = link.inbound_stream();
        link.connect().await.unwrap();
        assert!(link.is_connected());
        assert_eq!(next_event(&mut inbound).await, Some(InboundEvent::Connected));

        link.send(OutboundEvent::MowerStatus(SafetySnapshot::default()))
            .await
            .unwrap();

        match next_event(&mut inbound).await {
            Some(InboundEvent::Command(v)) => assert_eq!(v["autonomous"], true),
            other => panic!("expected command, got {other:?}"),
        }
        assert_eq!(next_event(&mut inbound).await, Some(InboundEvent::Heartbeat));

        let sent = server.await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(json["event"], "mower_status");

        link.disconnect().await.unwrap();
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn peer_close_reports_disconnected() {
        let (listener, url) = local_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let link = WsTelemetryLink::new(url);
        let mut inbound = link.inbound_stream();
        link.connect().await.unwrap();
        assert_eq!(next_event(&mut inbound).await, Some(InboundEvent::Connected));
        assert_eq!(
            next_event(&mut inbound).await,
            Some(InboundEvent::Disconnected)
        );
        assert!(!link.is_connected());
        assert!(matches!(
            link.send(OutboundEvent::MowerStatus(SafetySnapshot::default()))
                .await,
            Err(MowerError::Link(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_handshake_times_out() {
        let (listener, url) = local_server().await;
        // Accept the TCP connection but never answer the upgrade request.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
            drop(stream);
        });

        let link = WsTelemetryLink::new(url);
        let started = tokio::time::Instant::now();
        match link.connect().await {
            Err(MowerError::Link(msg)) => assert!(msg.contains("timed out"), "{msg}"),
            other => panic!("expected handshake timeout, got {other:?}"),
        }
        assert!(started.elapsed() >= CONNECT_TIMEOUT);
        assert!(!link.is_connected());
        server.abort();
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let (listener, url) = local_server().await;
        drop(listener);
        let link = WsTelemetryLink::new(url);
        assert!(matches!(link.connect().await, Err(MowerError::Link(_))));
        assert!(!link.is_connected());
        // Disconnecting a never-connected link is harmless.
        link.disconnect().await.unwrap();
    }
}
