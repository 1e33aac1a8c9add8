//! Scripted collaborators for unit tests

use crate::location::LocationClient;
use crate::pending::PendingCallTable;
use crate::transport::Transport;
use crate::{MessagingError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use types::{ActorId, Address, EntityId, Envelope, ErrorCode};

/// Transport that decodes and records every frame it is handed
pub struct RecordingTransport {
    sent_tx: mpsc::UnboundedSender<(Address, Envelope)>,
    sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Address, Envelope)>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent_tx,
            sent_rx: tokio::sync::Mutex::new(sent_rx),
        })
    }

    /// Next recorded frame, panicking after `wait`
    pub async fn next_sent(&self, wait: Duration) -> (Address, Envelope) {
        let mut sent = self.sent_rx.lock().await;
        tokio::time::timeout(wait, sent.recv())
            .await
            .expect("no frame sent in time")
            .expect("recording channel closed")
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, address: &Address, frame: Bytes) -> Result<()> {
        let envelope = Envelope::decode(&frame)?;
        let _ = self.sent_tx.send((address.clone(), envelope));
        Ok(())
    }
}

/// Remote behavior for one frame handed to a [`ScriptedTransport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Accepted; calls are answered by echoing the payload
    Ack,
    /// Destination not hosted there
    NotFound,
    /// Calls are answered with this error code
    Respond(ErrorCode),
    /// Accepted, never answered
    Silent,
    /// Hand-over failed
    Fail,
}

type Script = Box<dyn Fn(&Address, &Envelope) -> Reply + Send + Sync>;

/// Transport that plays the remote side from a script
///
/// One-way frames report `NotFound` as a send error; calls receive a
/// `NotFoundActor` response, the way a remote router answers.
pub struct ScriptedTransport {
    pending: Arc<PendingCallTable>,
    script: Script,
    sent: Mutex<Vec<(Address, Envelope)>>,
}

impl ScriptedTransport {
    pub fn new(
        pending: Arc<PendingCallTable>,
        script: impl Fn(&Address, &Envelope) -> Reply + Send + Sync + 'static,
    ) -> Self {
        Self {
            pending,
            script: Box::new(script),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|(address, _)| address.as_str().to_string())
            .collect()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .map(|(_, envelope)| envelope.payload().to_vec())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, address: &Address, frame: Bytes) -> Result<()> {
        let envelope = Envelope::decode(&frame)?;
        let reply = (self.script)(address, &envelope);
        self.sent.lock().push((address.clone(), envelope.clone()));

        match reply {
            Reply::Fail => Err(MessagingError::transport("connection reset")),
            Reply::NotFound if !envelope.is_rpc() => Err(MessagingError::not_found(
                envelope.actor_id(),
                format!("not hosted at {}", address),
            )),
            Reply::NotFound => {
                self.pending.resolve(Envelope::error_response(
                    &envelope,
                    ErrorCode::NOT_FOUND_ACTOR,
                    format!("not hosted at {}", address),
                ));
                Ok(())
            }
            Reply::Respond(code) if envelope.is_rpc() => {
                self.pending
                    .resolve(Envelope::error_response(&envelope, code, "scripted failure"));
                Ok(())
            }
            Reply::Ack if envelope.is_rpc() => {
                self.pending
                    .resolve(Envelope::response_to(&envelope, envelope.payload().clone()));
                Ok(())
            }
            Reply::Ack | Reply::Respond(_) | Reply::Silent => Ok(()),
        }
    }
}

/// Location directory answering entity lookups from a script
///
/// Entity lookups pop the next scripted actor and keep returning the last
/// one. Addresses are derived from the process: `node-<process>`.
#[derive(Default)]
pub struct ScriptedLocation {
    entity_answers: Mutex<VecDeque<ActorId>>,
    last_answer: Mutex<Option<ActorId>>,
    actor_lookups: AtomicUsize,
    address_lookups: AtomicUsize,
    invalidations: AtomicUsize,
}

impl ScriptedLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_entity(&self, answers: impl IntoIterator<Item = ActorId>) {
        self.entity_answers.lock().extend(answers);
    }

    pub fn actor_lookups(&self) -> usize {
        self.actor_lookups.load(Ordering::SeqCst)
    }

    pub fn address_lookups(&self) -> usize {
        self.address_lookups.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationClient for ScriptedLocation {
    async fn resolve_actor(&self, entity_id: EntityId) -> Result<ActorId> {
        self.actor_lookups.fetch_add(1, Ordering::SeqCst);
        let next = self.entity_answers.lock().pop_front();
        let mut last = self.last_answer.lock();
        if let Some(actor_id) = next {
            *last = Some(actor_id);
        }
        last.ok_or_else(|| MessagingError::not_found(ActorId::NONE, format!("{} unknown", entity_id)))
    }

    async fn resolve_address(&self, actor_id: ActorId) -> Result<Address> {
        self.address_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(Address::new(format!("node-{}", actor_id.process().inner())))
    }

    fn invalidate(&self, _actor_id: ActorId) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}
