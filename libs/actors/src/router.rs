//! Inbound Router
//!
//! Entry point for frames arriving from the transport:
//!
//! - responses complete the matching pending call
//! - requests and one-way envelopes go to the destination mailbox
//!
//! When the destination mailbox is not hosted here (never registered,
//! unregistered, or closed), RPCs are answered with `NotFoundActor` so the
//! sender's proxy re-resolves, and one-way envelopes are rejected back to the
//! transport with the same error.

use crate::mailbox::MailboxHandle;
use crate::metrics::MessagingMetrics;
use crate::pending::PendingCallTable;
use crate::transport::Transport;
use crate::{MessagingError, Result};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use types::{ActorId, Address, Envelope, EnvelopeKind, ErrorCode};

/// Routes decoded envelopes to mailboxes or the pending-call table
pub struct InboundRouter {
    mailboxes: DashMap<ActorId, MailboxHandle>,
    pending: Arc<PendingCallTable>,
    transport: Arc<dyn Transport>,
    metrics: Arc<MessagingMetrics>,
}

impl InboundRouter {
    pub fn new(
        pending: Arc<PendingCallTable>,
        transport: Arc<dyn Transport>,
        metrics: Arc<MessagingMetrics>,
    ) -> Self {
        Self {
            mailboxes: DashMap::new(),
            pending,
            transport,
            metrics,
        }
    }

    /// Make `mailbox` reachable; fails if its actor id is already hosted
    pub fn attach(&self, mailbox: MailboxHandle) -> Result<()> {
        let actor_id = mailbox.actor_id();
        match self.mailboxes.entry(actor_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(MessagingError::configuration(
                format!("{} already has a mailbox", actor_id),
                Some("actor_id"),
            )),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(mailbox);
                Ok(())
            }
        }
    }

    pub fn detach(&self, actor_id: ActorId) -> Option<MailboxHandle> {
        self.mailboxes.remove(&actor_id).map(|(_, mailbox)| mailbox)
    }

    pub fn mailbox(&self, actor_id: ActorId) -> Option<MailboxHandle> {
        self.mailboxes.get(&actor_id).map(|entry| entry.value().clone())
    }

    pub fn mailbox_count(&self) -> usize {
        self.mailboxes.len()
    }

    /// Detach every mailbox, e.g. at shutdown
    pub fn detach_all(&self) -> Vec<MailboxHandle> {
        let ids: Vec<ActorId> = self.mailboxes.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.detach(id)).collect()
    }

    /// Decode and route one frame received from `from`
    pub async fn on_receive(&self, from: &Address, frame: Bytes) -> Result<()> {
        let envelope = match Envelope::decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                MessagingMetrics::incr(&self.metrics.undecodable_frames);
                warn!(%from, len = frame.len(), error = %e, "Dropping undecodable frame");
                return Err(e.into());
            }
        };
        self.route(from, envelope).await
    }

    /// Route an already decoded envelope
    pub async fn route(&self, from: &Address, envelope: Envelope) -> Result<()> {
        if envelope.kind() == EnvelopeKind::Response {
            self.pending.resolve(envelope);
            return Ok(());
        }

        let actor_id = envelope.actor_id();
        let is_rpc = envelope.is_rpc();
        let (correlation_id, opcode) = (envelope.correlation_id(), envelope.opcode());

        let delivered = match self.mailbox(actor_id) {
            Some(mailbox) => mailbox.enqueue(envelope, Some(from.clone())),
            None => Err(MessagingError::not_found(actor_id, "no mailbox on this process")),
        };

        let Err(err) = delivered else {
            MessagingMetrics::incr(&self.metrics.envelopes_enqueued);
            return Ok(());
        };

        MessagingMetrics::incr(&self.metrics.undeliverable);
        if !is_rpc {
            warn!(actor_id = %actor_id, opcode, %from, error = %err, "One-way envelope rejected");
            return Err(MessagingError::not_found(actor_id, err.to_string()));
        }

        debug!(actor_id = %actor_id, correlation_id, %from, "Answering request for missing actor");
        let nack = Envelope::error_for(
            correlation_id,
            actor_id,
            opcode,
            ErrorCode::NOT_FOUND_ACTOR,
            err.to_string(),
        );
        let frame = nack.encode()?;
        if let Err(e) = self.transport.send(from, frame).await {
            warn!(actor_id = %actor_id, correlation_id, %from, error = %e, "Failed to send NotFoundActor");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{kinds, Dispatcher};
    use crate::test_support::RecordingTransport;
    use std::time::Duration;
    use tokio::time::Instant;
    use types::ProcessId;

    const WAIT: Duration = Duration::from_secs(5);

    fn actor() -> ActorId {
        ActorId::new(ProcessId::new(2), 40)
    }

    fn router(transport: Arc<RecordingTransport>) -> (InboundRouter, Arc<PendingCallTable>) {
        let metrics = Arc::new(MessagingMetrics::default());
        let pending = Arc::new(PendingCallTable::new(Arc::clone(&metrics)));
        (
            InboundRouter::new(Arc::clone(&pending), transport, metrics),
            pending,
        )
    }

    #[tokio::test]
    async fn test_response_completes_pending_call() {
        let (router, pending) = router(RecordingTransport::new());
        let handle = pending
            .register(12, actor(), 3, Instant::now() + WAIT)
            .unwrap();

        let request = Envelope::request(actor(), 3, Bytes::new()).with_correlation_id(12);
        let frame = Envelope::response_to(&request, Bytes::from_static(b"done"))
            .encode()
            .unwrap();
        router.on_receive(&Address::new("peer"), frame).await.unwrap();

        assert_eq!(handle.wait().await.payload().as_ref(), b"done");
    }

    #[tokio::test]
    async fn test_request_for_missing_actor_is_answered_not_found() {
        let transport = RecordingTransport::new();
        let (router, _) = router(Arc::clone(&transport));

        let request = Envelope::request(actor(), 3, Bytes::new()).with_correlation_id(44);
        router
            .on_receive(&Address::new("peer"), request.encode().unwrap())
            .await
            .unwrap();

        let (address, nack) = transport.next_sent(WAIT).await;
        assert_eq!(address, Address::new("peer"));
        assert_eq!(nack.error(), ErrorCode::NOT_FOUND_ACTOR);
        assert_eq!(nack.correlation_id(), 44);
    }

    #[tokio::test]
    async fn test_one_way_for_missing_actor_is_rejected() {
        let (router, _) = router(RecordingTransport::new());
        let envelope = Envelope::one_way(actor(), 3, Bytes::new());

        let err = router
            .on_receive(&Address::new("peer"), envelope.encode().unwrap())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_request_routed_to_mailbox_and_answered() {
        let transport = RecordingTransport::new();
        let (router, _) = router(Arc::clone(&transport));
        let dispatcher = Dispatcher::builder()
            .on_opcode(3, |ctx, _| async move {
                Ok(Some(Bytes::from(ctx.actor_id().to_string())))
            })
            .unwrap()
            .build();
        let mailbox = MailboxHandle::spawn(
            actor(),
            kinds::GENERIC_DISPATCH,
            Arc::new(dispatcher),
            transport.clone(),
            Arc::new(MessagingMetrics::default()),
        );
        router.attach(mailbox.clone()).unwrap();
        assert!(router.attach(mailbox).is_err());

        let request = Envelope::request(actor(), 3, Bytes::new()).with_correlation_id(2);
        router
            .on_receive(&Address::new("peer"), request.encode().unwrap())
            .await
            .unwrap();

        let (_, response) = transport.next_sent(WAIT).await;
        assert_eq!(response.payload().as_ref(), actor().to_string().as_bytes());
    }

    #[tokio::test]
    async fn test_closed_mailbox_treated_as_missing() {
        let transport = RecordingTransport::new();
        let (router, _) = router(Arc::clone(&transport));
        let mailbox = MailboxHandle::spawn(
            actor(),
            kinds::GENERIC_DISPATCH,
            Arc::new(Dispatcher::builder().build()),
            transport.clone(),
            Arc::new(MessagingMetrics::default()),
        );
        router.attach(mailbox.clone()).unwrap();
        mailbox.close();

        let request = Envelope::request(actor(), 3, Bytes::new()).with_correlation_id(9);
        router
            .on_receive(&Address::new("peer"), request.encode().unwrap())
            .await
            .unwrap();

        let (_, nack) = transport.next_sent(WAIT).await;
        assert_eq!(nack.error(), ErrorCode::NOT_FOUND_ACTOR);
    }

    #[tokio::test]
    async fn test_garbage_frame_is_codec_error() {
        let (router, _) = router(RecordingTransport::new());
        let err = router
            .on_receive(&Address::new("peer"), Bytes::from_static(&[0xff, 0x00]))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "codec");
    }
}
