//! Message Dispatch
//!
//! Handlers are registered once, before any mailbox starts, under either a
//! mailbox kind or an opcode:
//!
//! 1. a handler registered for the mailbox's kind wins
//! 2. otherwise the handler registered for the envelope's opcode runs
//! 3. otherwise the envelope fails with [`MessagingError::DispatchMissing`]
//!
//! [`DispatcherBuilder::build`] freezes the table. The resulting
//! [`Dispatcher`] is shared read-only by every mailbox.
//!
//! A panicking handler is contained: the panic becomes a
//! [`MessagingError::HandlerError`] and the mailbox moves on.

use crate::{MessagingError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use types::{ActorId, Address, Envelope};

/// Well-known mailbox kinds
pub mod kinds {
    /// Plain actor mailbox, dispatched by opcode
    pub const GENERIC_DISPATCH: &str = "generic-dispatch";
    /// Gate mailbox relaying envelopes to a connected client session
    pub const FORWARD_TO_CLIENT: &str = "forward-to-client";
}

/// What the dispatcher saw about the envelope being handled
#[derive(Debug, Clone)]
pub struct ActorContext {
    actor_id: ActorId,
    kind: Arc<str>,
    reply_to: Option<Address>,
}

impl ActorContext {
    pub fn new(actor_id: ActorId, kind: impl Into<Arc<str>>) -> Self {
        Self {
            actor_id,
            kind: kind.into(),
            reply_to: None,
        }
    }

    pub(crate) fn with_reply_to(self, reply_to: Option<Address>) -> Self {
        Self { reply_to, ..self }
    }

    /// Mailbox the envelope was delivered to
    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Address the response will be sent to, if any
    pub fn reply_to(&self) -> Option<&Address> {
        self.reply_to.as_ref()
    }
}

/// Registration key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DispatchKey {
    Kind(String),
    Opcode(u16),
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchKey::Kind(kind) => write!(f, "kind {}", kind),
            DispatchKey::Opcode(opcode) => write!(f, "opcode {}", opcode),
        }
    }
}

/// Application logic bound to a kind or opcode
///
/// `Ok(Some(payload))` answers an RPC with that payload, `Ok(None)` with an
/// empty one. Errors are turned into error responses via
/// [`MessagingError::error_code`].
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: ActorContext, envelope: Envelope) -> Result<Option<Bytes>>;
}

/// Closure adapter returned by [`handler_fn`]
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(ActorContext, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Bytes>>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(ActorContext, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Bytes>>> + Send + 'static,
{
    async fn handle(&self, ctx: ActorContext, envelope: Envelope) -> Result<Option<Bytes>> {
        (self.0)(ctx, envelope).await
    }
}

/// Collects handlers before the dispatcher is frozen
#[derive(Default)]
pub struct DispatcherBuilder {
    by_kind: HashMap<String, Arc<dyn MessageHandler>>,
    by_opcode: HashMap<u16, Arc<dyn MessageHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`; a key can only be claimed once
    pub fn register(mut self, key: DispatchKey, handler: impl MessageHandler) -> Result<Self> {
        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        let taken = match &key {
            DispatchKey::Kind(kind) => self.by_kind.insert(kind.clone(), handler).is_some(),
            DispatchKey::Opcode(opcode) => self.by_opcode.insert(*opcode, handler).is_some(),
        };
        if taken {
            return Err(MessagingError::configuration(
                format!("duplicate handler for {}", key),
                Some("dispatcher"),
            ));
        }
        Ok(self)
    }

    pub fn on_opcode<F, Fut>(self, opcode: u16, f: F) -> Result<Self>
    where
        F: Fn(ActorContext, Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Bytes>>> + Send + 'static,
    {
        self.register(DispatchKey::Opcode(opcode), handler_fn(f))
    }

    pub fn on_kind<F, Fut>(self, kind: impl Into<String>, f: F) -> Result<Self>
    where
        F: Fn(ActorContext, Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Bytes>>> + Send + 'static,
    {
        self.register(DispatchKey::Kind(kind.into()), handler_fn(f))
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            by_kind: self.by_kind,
            by_opcode: self.by_opcode,
        }
    }
}

/// Frozen handler table
pub struct Dispatcher {
    by_kind: HashMap<String, Arc<dyn MessageHandler>>,
    by_opcode: HashMap<u16, Arc<dyn MessageHandler>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kinds", &self.by_kind.keys().collect::<Vec<_>>())
            .field("opcodes", &self.by_opcode.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Handler that would run for `kind` / `opcode`
    pub fn resolve(&self, kind: &str, opcode: u16) -> Option<&Arc<dyn MessageHandler>> {
        self.by_kind
            .get(kind)
            .or_else(|| self.by_opcode.get(&opcode))
    }

    /// Run the matching handler for `envelope`
    pub async fn dispatch(&self, ctx: ActorContext, envelope: Envelope) -> Result<Option<Bytes>> {
        let Some(handler) = self.resolve(ctx.kind(), envelope.opcode()) else {
            return Err(MessagingError::DispatchMissing {
                key: format!("kind {} / opcode {}", ctx.kind(), envelope.opcode()),
            });
        };

        match AssertUnwindSafe(handler.handle(ctx, envelope))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(MessagingError::handler(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
