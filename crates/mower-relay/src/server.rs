//! [`RelayServer`] – WebSocket fan-out between robots and viewers.
//!
//! Listens on `0.0.0.0:5000` (configurable via [`RelayServer::with_port`]).
//!
//! * WebSocket upgrades → one session per connection, bridged to the
//!   [`EventBus`] global channel.
//! * `GET /api/status` → the [`SessionRegistry`] table as JSON.
//! * Any other HTTP request → 404.
//!
//! Upstream envelopes are rewritten before fan-out:
//!
//! | Received | Broadcast to every connection |
//! |---|---|
//! | `mower_status` | `mower_status_update {mower_id, status, time}` |
//! | `video_frame` | `video_update` |
//! | `obstacle_detected` | `obstacle_alert {distance, time}` |
//! | `command` | `command` (unchanged) |
//! | `heartbeat` | `heartbeat {time}` |
//!
//! Telemetry rewrites (`mower_status_update`, `video_update`,
//! `obstacle_alert`) are not echoed back to the connection that sent them.
//!
//! A background ticker broadcasts `heartbeat` every 5 s and sweeps robot
//! sessions idle for more than 30 s.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{Sink, SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use mower_middleware::EventBus;
use mower_types::{Event, MowerError, WireMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::SessionRegistry;

/// Default TCP port for the relay.
pub const DEFAULT_PORT: u16 = 5000;

const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Inbound envelopes per second a single connection may send.  Ten video
/// frames plus one status per second fit comfortably.
const DEFAULT_MESSAGES_PER_SEC: u32 = 50;

/// Largest request head inspected when telling WebSocket from HTTP.
const REQUEST_HEAD_LIMIT: usize = 4096;
/// How long a client may take to deliver its request head.
const REQUEST_HEAD_TIMEOUT: Duration = Duration::from_secs(2);
const PEEK_RETRY: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// RelayServer
// ---------------------------------------------------------------------------

/// Shared state handed to every connection task.
struct RelayContext {
    bus: Arc<EventBus>,
    registry: Arc<SessionRegistry>,
    messages_per_sec: NonZeroU32,
}

pub struct RelayServer {
    bus: Arc<EventBus>,
    registry: Arc<SessionRegistry>,
    port: u16,
    heartbeat_period: Duration,
    idle_timeout: Duration,
    messages_per_sec: NonZeroU32,
}

impl RelayServer {
    /// Create a relay fanning out over `bus` and tracking robots in
    /// `registry`, on the [`DEFAULT_PORT`].
    pub fn new(bus: Arc<EventBus>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            bus,
            registry,
            port: DEFAULT_PORT,
            heartbeat_period: DEFAULT_HEARTBEAT_PERIOD,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            messages_per_sec: NonZeroU32::new(DEFAULT_MESSAGES_PER_SEC).unwrap_or(NonZeroU32::MIN),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_heartbeat_period(mut self, period: Duration) -> Self {
        self.heartbeat_period = period;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Per-connection inbound message budget.  Zero is treated as one.
    pub fn with_rate_limit(mut self, messages_per_sec: u32) -> Self {
        self.messages_per_sec = NonZeroU32::new(messages_per_sec).unwrap_or(NonZeroU32::MIN);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind `0.0.0.0:<port>` and serve forever.
    ///
    /// # Errors
    ///
    /// [`MowerError::Link`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), MowerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MowerError::Link(format!("relay bind error on {addr}: {e}")))?;
        self.serve(listener).await;
        Ok(())
    }

    /// Serve connections from an already-bound `listener`.  The heartbeat
    /// ticker lives as long as this future.
    pub async fn serve(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "relay listening");
        }
        let _ticker = AbortOnDrop(tokio::spawn(heartbeat_ticker(
            Arc::clone(&self.bus),
            Arc::clone(&self.registry),
            self.heartbeat_period,
            self.idle_timeout,
        )));

        let ctx = Arc::new(RelayContext {
            bus: self.bus,
            registry: self.registry,
            messages_per_sec: self.messages_per_sec,
        });
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, ctx).await {
                            warn!(%peer, error = %e, "relay client error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "relay accept error"),
            }
        }
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ---------------------------------------------------------------------------
// Heartbeat + idle sweep
// ---------------------------------------------------------------------------

/// One ticker pass: broadcast a heartbeat and drop idle robot sessions.
pub(crate) fn heartbeat_tick(bus: &EventBus, registry: &SessionRegistry, idle_timeout: Duration) {
    let now = Utc::now();
    let beat = Event::new("mower-relay::heartbeat", WireMessage::Heartbeat { time: Some(now) });
    if bus.publish(beat).is_err() {
        debug!("heartbeat had no listeners");
    }
    for id in registry.sweep_idle(now, idle_timeout) {
        warn!(mower_id = %id, "removing silent robot session");
    }
}

async fn heartbeat_ticker(
    bus: Arc<EventBus>,
    registry: Arc<SessionRegistry>,
    period: Duration,
    idle_timeout: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        heartbeat_tick(&bus, &registry, idle_timeout);
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<RelayContext>,
) -> Result<(), MowerError> {
    // `peek` leaves the request in place for tungstenite's handshake.
    let mut buf = vec![0u8; REQUEST_HEAD_LIMIT];
    let n = peek_request_head(&stream, &mut buf)
        .await
        .map_err(|e| MowerError::Link(format!("peek error from {peer}: {e}")))?;
    let head = String::from_utf8_lossy(&buf[..n]);

    let is_ws_upgrade = head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });

    if is_ws_upgrade {
        handle_ws(stream, peer, ctx).await
    } else {
        let path = request_path(&head).map(str::to_owned);
        serve_http(stream, n, path.as_deref(), &ctx.registry).await
    }
}

/// Peek until the blank line ending the request head, the buffer is full,
/// the peer stops sending, or [`REQUEST_HEAD_TIMEOUT`] passes.  Returns the
/// number of bytes available in `buf`.
async fn peek_request_head(stream: &TcpStream, buf: &mut [u8]) -> std::io::Result<usize> {
    let deadline = tokio::time::Instant::now() + REQUEST_HEAD_TIMEOUT;
    let mut seen = 0;
    loop {
        let n = stream.peek(buf).await?;
        if n == 0
            || n == buf.len()
            || head_complete(&buf[..n])
            || tokio::time::Instant::now() >= deadline
        {
            return Ok(n);
        }
        if n == seen {
            // Nothing new yet; `peek` would return the same bytes at once.
            tokio::time::sleep(PEEK_RETRY).await;
        }
        seen = n;
    }
}

pub(crate) fn head_complete(bytes: &[u8]) -> bool {
    bytes.windows(4).any(|w| w == b"\r\n\r\n")
}

/// Path of the request line, e.g. `"/api/status"`.
pub(crate) fn request_path(head: &str) -> Option<&str> {
    let mut parts = head.lines().next()?.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(path)) => Some(path),
        _ => None,
    }
}

async fn serve_http(
    mut stream: TcpStream,
    peeked: usize,
    path: Option<&str>,
    registry: &SessionRegistry,
) -> Result<(), MowerError> {
    // Consume what was peeked so closing the socket does not reset it.
    let mut request = vec![0u8; peeked];
    stream
        .read_exact(&mut request)
        .await
        .map_err(|e| MowerError::Link(format!("HTTP read error: {e}")))?;

    let (status_line, content_type, body) = match path {
        Some("/api/status") => (
            "200 OK",
            "application/json",
            registry.to_json().to_string(),
        ),
        _ => ("404 Not Found", "text/plain; charset=utf-8", "not found\n".to_string()),
    };
    let response = format!(
        "HTTP/1.1 {status_line}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| MowerError::Link(format!("HTTP write error: {e}")))?;
    let _ = stream.shutdown().await;
    Ok(())
}

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<RelayContext>,
) -> Result<(), MowerError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| MowerError::Link(format!("WS handshake from {peer}: {e}")))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let conn_id = Uuid::new_v4();
    let source = format!("mower-relay::session/{conn_id}");
    let mut bus_rx = ctx.bus.subscribe();
    let mut gate = FloodGate::new(ctx.messages_per_sec);
    info!(%peer, %conn_id, "client connected");

    let hello = WireMessage::ServerStatus {
        status: "connected".to_string(),
        time: Utc::now(),
    };
    send_envelope(&mut ws_tx, &hello).await?;

    loop {
        tokio::select! {
            // ── Downstream: bus → client ────────────────────────────────────
            result = bus_rx.recv() => match result {
                Ok(event) => {
                    if !is_own_telemetry(&event, &source) {
                        send_envelope(&mut ws_tx, &event.payload).await?;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(%conn_id, lagged_by = n, "client fell behind"),
                Err(RecvError::Closed) => break,
            },
            // ── Upstream: client → bus ──────────────────────────────────────
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if !gate.admit() {
                        continue;
                    }
                    let envelope = match serde_json::from_str::<WireMessage>(text.as_str()) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!(%conn_id, error = %e, "dropping malformed envelope");
                            continue;
                        }
                    };
                    if let Some(out) = route_upstream(conn_id, envelope, &ctx.registry) {
                        let _ = ctx.bus.publish(Event::new(source.as_str(), out));
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(%conn_id, error = %e, "websocket read error");
                    break;
                }
                _ => {}
            },
        }
    }

    // The session (if any) stays until the idle sweep removes it.
    info!(%peer, %conn_id, "client disconnected");
    Ok(())
}

async fn send_envelope<S>(sink: &mut S, envelope: &WireMessage) -> Result<(), MowerError>
where
    S: Sink<Message> + Unpin,
{
    let json = serde_json::to_string(envelope).map_err(|e| MowerError::Protocol(e.to_string()))?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|_| MowerError::Link("client went away".to_string()))
}

/// `event` is a telemetry rewrite of something connection `source` sent.
pub(crate) fn is_own_telemetry(event: &Event, source: &str) -> bool {
    event.source == source
        && matches!(
            event.payload,
            WireMessage::MowerStatusUpdate { .. }
                | WireMessage::VideoUpdate(_)
                | WireMessage::ObstacleAlert { .. }
        )
}

// ---------------------------------------------------------------------------
// Upstream routing
// ---------------------------------------------------------------------------

/// Rewrite an envelope received from connection `conn_id` into what the
/// relay broadcasts, updating the registry on the way.  Relay-to-viewer
/// envelopes sent upstream are dropped.
pub(crate) fn route_upstream(
    conn_id: Uuid,
    envelope: WireMessage,
    registry: &SessionRegistry,
) -> Option<WireMessage> {
    let now = Utc::now();
    match envelope {
        WireMessage::MowerStatus(status) => {
            if registry.record_status(conn_id, status.clone(), now) {
                info!(mower_id = %conn_id, "robot session registered");
            }
            Some(WireMessage::MowerStatusUpdate {
                mower_id: conn_id,
                status,
                time: now,
            })
        }
        WireMessage::VideoFrame(frame) => Some(WireMessage::VideoUpdate(frame)),
        WireMessage::ObstacleDetected(report) => {
            warn!(mower_id = %conn_id, distance = report.distance, "robot reported obstacle");
            Some(WireMessage::ObstacleAlert {
                distance: report.distance,
                time: now,
            })
        }
        WireMessage::Command(payload) => {
            info!(from = %conn_id, %payload, "forwarding command");
            Some(WireMessage::Command(payload))
        }
        WireMessage::Heartbeat { .. } => Some(WireMessage::Heartbeat { time: Some(now) }),
        other => {
            debug!(from = %conn_id, ?other, "ignoring relay-only envelope from client");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Per-connection inbound rate limiter.  Logs once when a flood starts.
pub(crate) struct FloodGate {
    limiter: DefaultDirectRateLimiter,
    flooding: bool,
    dropped: u64,
}

impl FloodGate {
    pub(crate) fn new(per_second: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            flooding: false,
            dropped: 0,
        }
    }

    pub(crate) fn admit(&mut self) -> bool {
        if self.limiter.check().is_ok() {
            if self.flooding {
                warn!(dropped = self.dropped, "client flood ended");
                self.flooding = false;
                self.dropped = 0;
            }
            return true;
        }
        if !self.flooding {
            warn!("client exceeded message rate; dropping");
            self.flooding = true;
        }
        self.dropped += 1;
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mower_types::{Direction, ObstacleReport, SafetySnapshot, VideoFrame};
    use serde_json::json;
    use tokio_tungstenite::connect_async;

    fn make_server() -> (RelayServer, Arc<EventBus>, Arc<SessionRegistry>) {
        let bus = Arc::new(EventBus::default());
        let registry = Arc::new(SessionRegistry::new());
        let server = RelayServer::new(Arc::clone(&bus), Arc::clone(&registry));
        (server, bus, registry)
    }

    // ── Builder ─────────────────────────────────────────────────────────────

    #[test]
    fn default_port_is_5000() {
        let (server, _, _) = make_server();
        assert_eq!(server.port(), DEFAULT_PORT);
        assert_eq!(server.with_port(9100).port(), 9100);
    }

    // ── Routing ─────────────────────────────────────────────────────────────

    #[test]
    fn status_registers_robot_and_becomes_update() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let status = SafetySnapshot {
            moving: true,
            direction: Direction::Left,
            ..SafetySnapshot::default()
        };

        let out = route_upstream(id, WireMessage::MowerStatus(status.clone()), &registry);
        match out {
            Some(WireMessage::MowerStatusUpdate {
                mower_id,
                status: forwarded,
                ..
            }) => {
                assert_eq!(mower_id, id);
                assert_eq!(forwarded, status);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(registry.get(&id).unwrap().status, status);
    }

    #[test]
    fn obstacle_becomes_alert_with_distance() {
        let registry = SessionRegistry::new();
        let out = route_upstream(
            Uuid::new_v4(),
            WireMessage::ObstacleDetected(ObstacleReport {
                distance: 22.5,
                timestamp: Utc::now(),
            }),
            &registry,
        );
        assert!(matches!(out, Some(WireMessage::ObstacleAlert { distance, .. }) if distance == 22.5));
        assert!(registry.is_empty());
    }

    #[test]
    fn command_is_forwarded_unchanged() {
        let payload = json!({"movement": {"direction": "forward", "speed": 60}});
        let out = route_upstream(
            Uuid::new_v4(),
            WireMessage::Command(payload.clone()),
            &SessionRegistry::new(),
        );
        assert_eq!(out, Some(WireMessage::Command(payload)));
    }

    #[test]
    fn viewer_heartbeat_is_restamped() {
        let out = route_upstream(
            Uuid::new_v4(),
            WireMessage::Heartbeat { time: None },
            &SessionRegistry::new(),
        );
        assert!(matches!(out, Some(WireMessage::Heartbeat { time: Some(_) })));
    }

    #[test]
    fn video_frame_becomes_video_update() {
        let frame = VideoFrame {
            frame: vec![1, 2, 3],
            objects: vec![],
            timestamp: Utc::now(),
        };
        let out = route_upstream(
            Uuid::new_v4(),
            WireMessage::VideoFrame(frame.clone()),
            &SessionRegistry::new(),
        );
        assert_eq!(out, Some(WireMessage::VideoUpdate(frame)));
    }

    #[test]
    fn relay_only_envelopes_are_dropped() {
        let out = route_upstream(
            Uuid::new_v4(),
            WireMessage::ServerStatus {
                status: "connected".to_string(),
                time: Utc::now(),
            },
            &SessionRegistry::new(),
        );
        assert_eq!(out, None);
    }

    // ── Heartbeat ticker ────────────────────────────────────────────────────

    #[tokio::test]
    async fn heartbeat_tick_broadcasts_and_sweeps() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let registry = SessionRegistry::new();
        let stale = Uuid::new_v4();
        registry.record_status(
            stale,
            SafetySnapshot::default(),
            Utc::now() - chrono::TimeDelta::seconds(45),
        );

        heartbeat_tick(&bus, &registry, DEFAULT_IDLE_TIMEOUT);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.payload, WireMessage::Heartbeat { time: Some(_) }));
        assert!(registry.is_empty());
    }

    // ── Rate limiting ───────────────────────────────────────────────────────

    #[test]
    fn flood_gate_drops_beyond_quota() {
        let mut gate = FloodGate::new(NonZeroU32::new(3).unwrap());
        let admitted = (0..10).filter(|_| gate.admit()).count();
        assert_eq!(admitted, 3);
        assert_eq!(gate.dropped, 7);
    }

    // ── HTTP ────────────────────────────────────────────────────────────────

    #[test]
    fn request_head_needs_blank_line() {
        assert!(!head_complete(b"GET / HTTP/1.1\r\nHost: x\r\n"));
        assert!(head_complete(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(!head_complete(b""));
    }

    #[test]
    fn own_telemetry_is_not_echoed() {
        let source = "mower-relay::session/a";
        let update = WireMessage::ObstacleAlert {
            distance: 12.0,
            time: Utc::now(),
        };
        assert!(is_own_telemetry(&Event::new(source, update.clone()), source));
        assert!(!is_own_telemetry(
            &Event::new("mower-relay::session/b", update),
            source
        ));

        // Commands and heartbeats still go back to their sender.
        let command = WireMessage::Command(json!({"autonomous": true}));
        assert!(!is_own_telemetry(&Event::new(source, command), source));
        let beat = WireMessage::Heartbeat { time: Some(Utc::now()) };
        assert!(!is_own_telemetry(&Event::new(source, beat), source));
    }

    #[test]
    fn request_path_parsing() {
        assert_eq!(request_path("GET /api/status HTTP/1.1\r\nHost: x\r\n"), Some("/api/status"));
        assert_eq!(request_path("POST /api/status HTTP/1.1\r\n"), None);
        assert_eq!(request_path(""), None);
    }

    async fn spawn_relay() -> (SocketAddr, Arc<SessionRegistry>, JoinHandle<()>) {
        let (server, _bus, registry) = make_server();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(server.serve(listener));
        (addr, registry, handle)
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn next_envelope<S>(ws: &mut S) -> WireMessage
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = ws.next().await.unwrap().unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn robot_status_fans_out_and_shows_in_api() {
        let (addr, registry, relay) = spawn_relay().await;
        let url = format!("ws://{addr}");

        let (mut robot, _) = connect_async(url.as_str()).await.unwrap();
        let (mut viewer, _) = connect_async(url.as_str()).await.unwrap();
        assert!(matches!(
            next_envelope(&mut robot).await,
            WireMessage::ServerStatus { .. }
        ));
        assert!(matches!(
            next_envelope(&mut viewer).await,
            WireMessage::ServerStatus { .. }
        ));

        let status = WireMessage::MowerStatus(SafetySnapshot::default());
        robot
            .send(Message::Text(serde_json::to_string(&status).unwrap().into()))
            .await
            .unwrap();

        // Skip ticker heartbeats until the update arrives.
        let mower_id = loop {
            if let WireMessage::MowerStatusUpdate { mower_id, .. } = next_envelope(&mut viewer).await {
                break mower_id;
            }
        };
        assert_eq!(registry.len(), 1);

        let response = http_get(addr, "/api/status").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains(&mower_id.to_string()));

        assert!(http_get(addr, "/").await.starts_with("HTTP/1.1 404"));
        relay.abort();
    }

    #[tokio::test]
    async fn split_upgrade_request_is_still_a_websocket() {
        let (addr, _registry, relay) = spawn_relay().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream
            .write_all(
                b"Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                  Sec-WebSocket-Version: 13\r\n\r\n",
            )
            .await
            .unwrap();

        let mut response = vec![0u8; 512];
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut response))
            .await
            .expect("handshake response")
            .unwrap();
        let response = String::from_utf8_lossy(&response[..n]);
        assert!(response.starts_with("HTTP/1.1 101"), "{response}");
        relay.abort();
    }

    #[tokio::test]
    async fn robot_does_not_receive_its_own_video() {
        let (addr, _registry, relay) = spawn_relay().await;
        let url = format!("ws://{addr}");
        let (mut robot, _) = connect_async(url.as_str()).await.unwrap();
        let (mut viewer, _) = connect_async(url.as_str()).await.unwrap();
        next_envelope(&mut robot).await;
        next_envelope(&mut viewer).await;

        let frame = WireMessage::VideoFrame(VideoFrame {
            frame: vec![0xff, 0xd8, 0xff],
            objects: Vec::new(),
            timestamp: Utc::now(),
        });
        robot
            .send(Message::Text(serde_json::to_string(&frame).unwrap().into()))
            .await
            .unwrap();
        loop {
            if let WireMessage::VideoUpdate(_) = next_envelope(&mut viewer).await {
                break;
            }
        }

        let command = WireMessage::Command(json!({"autonomous": false}));
        viewer
            .send(Message::Text(serde_json::to_string(&command).unwrap().into()))
            .await
            .unwrap();
        loop {
            match next_envelope(&mut robot).await {
                WireMessage::Command(_) => break,
                WireMessage::VideoUpdate(_) => panic!("video echoed back to its sender"),
                _ => {}
            }
        }
        relay.abort();
    }

    #[tokio::test]
    async fn viewer_command_reaches_robot() {
        let (addr, _registry, relay) = spawn_relay().await;
        let url = format!("ws://{addr}");
        let (mut robot, _) = connect_async(url.as_str()).await.unwrap();
        let (mut viewer, _) = connect_async(url.as_str()).await.unwrap();
        next_envelope(&mut robot).await;
        next_envelope(&mut viewer).await;

        let payload = json!({"blade": {"active": true}});
        let command = WireMessage::Command(payload.clone());
        viewer
            .send(Message::Text(serde_json::to_string(&command).unwrap().into()))
            .await
            .unwrap();

        let received = loop {
            if let WireMessage::Command(p) = next_envelope(&mut robot).await {
                break p;
            }
        };
        assert_eq!(received, payload);
        relay.abort();
    }
}
