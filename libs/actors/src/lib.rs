//! Actor Mailboxes and Location-Routed RPC
//!
//! Per-actor FIFO mailboxes with single-consumer dispatch, request/response
//! correlation with deadlines, and per-destination proxies that follow
//! migrating actors through a location directory.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────── sender process ────────────┐      ┌──────── receiver process ────────┐
//! │                                        │      │                                  │
//! │  ActorProxy ──▶ LocationClient         │      │  InboundRouter                   │
//! │   (ordered       (entity → actor →     │      │    │                             │
//! │    queue,         address)             │ frame│    ├─▶ MailboxHandle (FIFO)      │
//! │    bounded   ──▶ Transport ────────────┼─────▶│    │     └─▶ Dispatcher ─▶ handler│
//! │    retry)                              │      │    │                             │
//! │  PendingCallTable ◀────────────────────┼──────┼────┘  response / NotFoundActor   │
//! └────────────────────────────────────────┘      └──────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - a mailbox runs at most one handler at a time, in enqueue order
//! - a proxy delivers its queue in order; a relocated destination is retried
//!   at most `max_failures` times before the proxy gives up
//! - every call completes exactly once: response, timeout, or teardown
//!
//! # Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use messaging_actors::{
//!     kinds, Dispatcher, LoopbackNetwork, MessagingSystem, NodeIdentity, StaticLocationDirectory,
//! };
//! use messaging_config::MessagingConfig;
//! use std::sync::Arc;
//! use types::{Envelope, ProcessId};
//!
//! # async fn run() -> messaging_actors::Result<()> {
//! let network = LoopbackNetwork::new();
//! let directory = Arc::new(StaticLocationDirectory::new());
//! directory.bind_process(ProcessId::new(1), "node-1".into());
//!
//! let dispatcher = Dispatcher::builder()
//!     .on_opcode(1, |_, envelope: Envelope| async move { Ok(Some(envelope.into_payload())) })?
//!     .build();
//!
//! let node = NodeIdentity::new(ProcessId::new(1), "node-1");
//! let system = MessagingSystem::new(
//!     node,
//!     MessagingConfig::default(),
//!     dispatcher,
//!     network.transport_for("node-1".into()),
//!     directory,
//! );
//! network.attach("node-1".into(), &system.router());
//! system.start();
//!
//! let echo = system.spawn_actor(kinds::GENERIC_DISPATCH)?;
//! let proxy = system.proxy_for_actor(echo.actor_id());
//! let response = proxy
//!     .call(Envelope::request(echo.actor_id(), 1, Bytes::from_static(b"ping")))
//!     .await?;
//! assert_eq!(response.payload().as_ref(), b"ping");
//!
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod error;
pub mod location;
pub mod mailbox;
pub mod metrics;
pub mod pending;
pub mod proxy;
pub mod registry;
pub mod router;
pub mod system;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use dispatcher::{
    handler_fn, kinds, ActorContext, DispatchKey, Dispatcher, DispatcherBuilder, MessageHandler,
};
pub use error::{MessagingError, Result};
pub use location::{LocationClient, StaticLocationDirectory};
pub use mailbox::{MailboxHandle, MailboxState};
pub use metrics::{MessagingMetrics, MetricsSnapshot};
pub use pending::{CallHandle, PendingCallTable};
pub use proxy::{ActorProxy, ProxyDeps, ProxySettings, ProxyTarget};
pub use registry::ProxyRegistry;
pub use router::InboundRouter;
pub use system::{MessagingSystem, NodeIdentity};
pub use transport::{LoopbackNetwork, LoopbackTransport, Transport};
