//! Actor Mailbox
//!
//! One FIFO queue per actor, drained by a single tokio task. Envelopes are
//! handled strictly in enqueue order and never concurrently for the same
//! actor, even when the handler awaits. Producers never block: enqueueing is
//! a push onto an unbounded channel.
//!
//! ## Lifecycle
//!
//! ```text
//!   enqueue           handler done, queue empty
//! Idle ──────▶ Draining ─────────────────────────▶ Idle
//!   │              │
//!   └── close() ───┴──▶ Closed (drain task exits)
//! ```
//!
//! Envelopes queued before `close()` are still handled. Envelopes that land
//! after the close sentinel are not dispatched; RPCs among them are answered
//! with `NotFoundActor` so the sender can re-resolve.

use crate::dispatcher::{ActorContext, Dispatcher};
use crate::metrics::MessagingMetrics;
use crate::transport::Transport;
use crate::{MessagingError, Result};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use types::{ActorId, Address, Envelope, ErrorCode};

/// Observable mailbox state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxState {
    /// Waiting for envelopes
    Idle,
    /// A handler is running or envelopes are queued behind it
    Draining,
    /// No longer accepting envelopes
    Closed,
}

impl MailboxState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => MailboxState::Idle,
            1 => MailboxState::Draining,
            _ => MailboxState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            MailboxState::Idle => 0,
            MailboxState::Draining => 1,
            MailboxState::Closed => 2,
        }
    }
}

struct Delivery {
    envelope: Envelope,
    reply_to: Option<Address>,
}

enum MailboxItem {
    Deliver(Delivery),
    Close,
}

struct MailboxShared {
    actor_id: ActorId,
    kind: Arc<str>,
    state: AtomicU8,
    closing: AtomicBool,
    backlog: AtomicUsize,
    terminated: watch::Sender<bool>,
}

impl MailboxShared {
    fn set_state(&self, state: MailboxState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

/// Producer handle to a running mailbox
#[derive(Clone)]
pub struct MailboxHandle {
    shared: Arc<MailboxShared>,
    queue: mpsc::UnboundedSender<MailboxItem>,
}

impl std::fmt::Debug for MailboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxHandle")
            .field("actor_id", &self.shared.actor_id)
            .field("kind", &self.shared.kind)
            .field("state", &self.state())
            .field("backlog", &self.backlog())
            .finish()
    }
}

impl MailboxHandle {
    /// Start the drain task for `actor_id`
    ///
    /// Responses to RPCs are encoded and sent through `responder` to the
    /// reply address recorded at enqueue time.
    pub fn spawn(
        actor_id: ActorId,
        kind: impl Into<Arc<str>>,
        dispatcher: Arc<Dispatcher>,
        responder: Arc<dyn Transport>,
        metrics: Arc<MessagingMetrics>,
    ) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let (terminated, _) = watch::channel(false);
        let shared = Arc::new(MailboxShared {
            actor_id,
            kind: kind.into(),
            state: AtomicU8::new(MailboxState::Idle.as_u8()),
            closing: AtomicBool::new(false),
            backlog: AtomicUsize::new(0),
            terminated,
        });

        let worker = MailboxWorker {
            shared: Arc::clone(&shared),
            receiver,
            dispatcher,
            responder,
            metrics,
        };
        tokio::spawn(worker.run());

        Self { shared, queue }
    }

    pub fn actor_id(&self) -> ActorId {
        self.shared.actor_id
    }

    pub fn kind(&self) -> &str {
        &self.shared.kind
    }

    pub fn state(&self) -> MailboxState {
        MailboxState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Envelopes accepted but not yet handed to a handler
    pub fn backlog(&self) -> usize {
        self.shared.backlog.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    /// Append `envelope`; responses go to `reply_to` when it is an RPC
    pub fn enqueue(&self, envelope: Envelope, reply_to: Option<Address>) -> Result<()> {
        if self.is_closed() {
            return Err(MessagingError::MailboxClosed {
                actor_id: self.shared.actor_id,
            });
        }

        self.shared.backlog.fetch_add(1, Ordering::AcqRel);
        self.queue
            .send(MailboxItem::Deliver(Delivery { envelope, reply_to }))
            .map_err(|_| {
                self.shared.backlog.fetch_sub(1, Ordering::AcqRel);
                MessagingError::MailboxClosed {
                    actor_id: self.shared.actor_id,
                }
            })
    }

    /// Stop accepting envelopes; already queued ones are still handled
    pub fn close(&self) {
        if !self.shared.closing.swap(true, Ordering::AcqRel) {
            debug!(actor_id = %self.shared.actor_id, "Mailbox close requested");
            let _ = self.queue.send(MailboxItem::Close);
        }
    }

    /// Wait until the drain task has exited
    pub async fn closed(&self) {
        let mut terminated = self.shared.terminated.subscribe();
        let _ = terminated.wait_for(|done| *done).await;
    }
}

struct MailboxWorker {
    shared: Arc<MailboxShared>,
    receiver: mpsc::UnboundedReceiver<MailboxItem>,
    dispatcher: Arc<Dispatcher>,
    responder: Arc<dyn Transport>,
    metrics: Arc<MessagingMetrics>,
}

impl MailboxWorker {
    async fn run(mut self) {
        let actor_id = self.shared.actor_id;
        info!(actor_id = %actor_id, kind = %self.shared.kind, "Mailbox started");

        while let Some(item) = self.receiver.recv().await {
            match item {
                MailboxItem::Close => break,
                MailboxItem::Deliver(delivery) => {
                    self.shared.set_state(MailboxState::Draining);
                    self.shared.backlog.fetch_sub(1, Ordering::AcqRel);
                    self.process(delivery).await;
                    if self.shared.backlog.load(Ordering::Acquire) == 0 {
                        self.shared.set_state(MailboxState::Idle);
                    }
                }
            }
        }

        self.shared.closing.store(true, Ordering::Release);
        self.shared.set_state(MailboxState::Closed);
        self.receiver.close();

        let mut rejected = 0usize;
        while let Some(item) = self.receiver.recv().await {
            let MailboxItem::Deliver(Delivery { envelope, reply_to }) = item else {
                continue;
            };
            self.shared.backlog.fetch_sub(1, Ordering::AcqRel);
            MessagingMetrics::incr(&self.metrics.backlog_rejected);
            rejected += 1;
            if envelope.is_rpc() {
                let response = Envelope::error_response(
                    &envelope,
                    ErrorCode::NOT_FOUND_ACTOR,
                    format!("mailbox {} closed", actor_id),
                );
                self.reply(reply_to.as_ref(), response).await;
            }
        }

        info!(actor_id = %actor_id, rejected, "Mailbox closed");
        self.shared.terminated.send_replace(true);
    }

    async fn process(&self, delivery: Delivery) {
        let Delivery { envelope, reply_to } = delivery;
        let ctx = ActorContext::new(self.shared.actor_id, Arc::clone(&self.shared.kind))
            .with_reply_to(reply_to.clone());

        let started = Instant::now();
        let outcome = self.dispatcher.dispatch(ctx, envelope.clone()).await;
        self.metrics.record_envelope_handled(started.elapsed());

        let response = match outcome {
            Ok(payload) if envelope.is_rpc() => Some(Envelope::response_to(
                &envelope,
                payload.unwrap_or_default(),
            )),
            Ok(payload) => {
                if payload.is_some() {
                    debug!(
                        actor_id = %self.shared.actor_id,
                        opcode = envelope.opcode(),
                        "Handler returned a payload for a one-way envelope, dropped"
                    );
                }
                None
            }
            Err(err) => {
                if matches!(err, MessagingError::DispatchMissing { .. }) {
                    MessagingMetrics::incr(&self.metrics.dispatch_missing);
                } else {
                    MessagingMetrics::incr(&self.metrics.handler_failures);
                }
                error!(
                    actor_id = %self.shared.actor_id,
                    kind = %self.shared.kind,
                    opcode = envelope.opcode(),
                    correlation_id = envelope.correlation_id(),
                    error = %err,
                    "Envelope handling failed"
                );
                envelope.is_rpc().then(|| err.to_response(&envelope))
            }
        };

        if let Some(response) = response {
            self.reply(reply_to.as_ref(), response).await;
        }
    }

    async fn reply(&self, reply_to: Option<&Address>, response: Envelope) {
        let Some(address) = reply_to else {
            warn!(
                actor_id = %self.shared.actor_id,
                correlation_id = response.correlation_id(),
                "Response has no reply route, dropped"
            );
            return;
        };

        let frame = match response.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!(correlation_id = response.correlation_id(), error = %e, "Failed to encode response");
                return;
            }
        };

        if let Err(e) = self.responder.send(address, frame).await {
            warn!(
                actor_id = %self.shared.actor_id,
                correlation_id = response.correlation_id(),
                %address,
                error = %e,
                "Failed to deliver response"
            );
        }
    }
}
