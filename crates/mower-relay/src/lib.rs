//! `mower-relay` – store-and-forward hub between mowers and viewers.
//!
//! Boots a small HTTP + WebSocket server (default port `5000`) that:
//!
//! 1. **Fans out** every envelope a client sends to every connected client,
//!    rewriting robot telemetry into viewer events (`mower_status` →
//!    `mower_status_update`, `obstacle_detected` → `obstacle_alert`, ...).
//! 2. **Tracks** robots in a [`SessionRegistry`]: a connection that reports
//!    `mower_status` becomes a session, swept after 30 s of silence.
//! 3. **Keeps robots supervised** with a `heartbeat` broadcast every 5 s.
//! 4. **Serves** `GET /api/status` with the session table as JSON.
//!
//! Commands are broadcast to every connection; robots ignore everything
//! but `command` and `heartbeat`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mower_middleware::EventBus;
//! use mower_relay::{RelayServer, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mower_types::MowerError> {
//!     let bus = Arc::new(EventBus::default());
//!     let registry = Arc::new(SessionRegistry::new());
//!     RelayServer::new(bus, registry).with_port(5000).run().await
//! }
//! ```

pub mod registry;
pub mod server;

pub use registry::{RobotSession, SessionRegistry};
pub use server::{DEFAULT_PORT, RelayServer};
