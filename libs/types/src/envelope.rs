//! Envelope
//!
//! The immutable unit exchanged between proxies, the transport and
//! mailboxes. Builders return new values instead of mutating in place, so an
//! envelope captured in a retry queue can never be changed behind the
//! sender's back.
//!
//! ## Correlation
//!
//! - `correlation_id == 0` means fire-and-forget
//! - a [`EnvelopeKind::Request`] with a non-zero id MUST be answered by exactly
//!   one [`EnvelopeKind::Response`] carrying the same id (or a locally
//!   synthesized timeout)

use crate::{ActorId, ErrorCode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Direction of an envelope, used by the inbound router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// Delivered to a mailbox, no reply expected
    OneWay,
    /// Delivered to a mailbox, answered by a response
    Request,
    /// Routed to the sender's pending-call table
    Response,
}

/// Message unit carrying correlation, destination, status and payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    kind: EnvelopeKind,
    correlation_id: i32,
    actor_id: ActorId,
    opcode: u16,
    error: ErrorCode,
    error_message: Option<String>,
    payload: Bytes,
}

impl Envelope {
    /// Fire-and-forget message for `actor_id`
    pub fn one_way(actor_id: ActorId, opcode: u16, payload: Bytes) -> Self {
        Self {
            kind: EnvelopeKind::OneWay,
            correlation_id: 0,
            actor_id,
            opcode,
            error: ErrorCode::SUCCESS,
            error_message: None,
            payload,
        }
    }

    /// Request for `actor_id`; the correlation id is stamped by the sender
    pub fn request(actor_id: ActorId, opcode: u16, payload: Bytes) -> Self {
        Self {
            kind: EnvelopeKind::Request,
            ..Self::one_way(actor_id, opcode, payload)
        }
    }

    /// Successful response to `request`
    pub fn response_to(request: &Envelope, payload: Bytes) -> Self {
        Self {
            kind: EnvelopeKind::Response,
            correlation_id: request.correlation_id,
            actor_id: request.actor_id,
            opcode: request.opcode,
            error: ErrorCode::SUCCESS,
            error_message: None,
            payload,
        }
    }

    /// Failed response to `request`
    pub fn error_response(request: &Envelope, error: ErrorCode, message: impl Into<String>) -> Self {
        Self::error_for(request.correlation_id, request.actor_id, request.opcode, error, message)
    }

    /// Failed response built from bare correlation data, used when the
    /// original request is no longer at hand (timeouts, teardown)
    pub fn error_for(
        correlation_id: i32,
        actor_id: ActorId,
        opcode: u16,
        error: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Response,
            correlation_id,
            actor_id,
            opcode,
            error,
            error_message: Some(message.into()),
            payload: Bytes::new(),
        }
    }

    pub fn with_correlation_id(self, correlation_id: i32) -> Self {
        Self {
            correlation_id,
            ..self
        }
    }

    /// Re-address the envelope, used when a proxy learns the actor moved
    pub fn with_actor_id(self, actor_id: ActorId) -> Self {
        Self { actor_id, ..self }
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    pub fn correlation_id(&self) -> i32 {
        self.correlation_id
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn error(&self) -> ErrorCode {
        self.error
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Request that expects a correlated response
    pub fn is_rpc(&self) -> bool {
        self.kind == EnvelopeKind::Request && self.correlation_id != 0
    }

    pub fn is_response(&self) -> bool {
        self.kind == EnvelopeKind::Response
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProcessId;

    fn target() -> ActorId {
        ActorId::new(ProcessId::new(1), 10)
    }

    #[test]
    fn test_one_way_is_not_rpc() {
        let envelope = Envelope::one_way(target(), 5, Bytes::from_static(b"x"));
        assert_eq!(envelope.correlation_id(), 0);
        assert!(!envelope.is_rpc());
        assert!(!envelope.is_response());
    }

    #[test]
    fn test_request_becomes_rpc_once_stamped() {
        let request = Envelope::request(target(), 5, Bytes::new());
        assert!(!request.is_rpc());
        let stamped = request.with_correlation_id(12);
        assert!(stamped.is_rpc());
        assert_eq!(stamped.kind(), EnvelopeKind::Request);
    }

    #[test]
    fn test_response_copies_correlation_fields() {
        let request = Envelope::request(target(), 77, Bytes::new()).with_correlation_id(3);
        let response = Envelope::response_to(&request, Bytes::from_static(b"ok"));
        assert!(response.is_response());
        assert_eq!(response.correlation_id(), 3);
        assert_eq!(response.actor_id(), target());
        assert_eq!(response.opcode(), 77);
        assert!(!response.is_error());
        assert_eq!(response.payload().as_ref(), b"ok");
    }

    #[test]
    fn test_error_response_carries_code_and_message() {
        let request = Envelope::request(target(), 1, Bytes::from_static(b"body")).with_correlation_id(9);
        let response = Envelope::error_response(&request, ErrorCode::HANDLER_ERROR, "boom");
        assert!(response.is_error());
        assert_eq!(response.error(), ErrorCode::HANDLER_ERROR);
        assert_eq!(response.error_message(), Some("boom"));
        assert!(response.payload().is_empty());
    }

    #[test]
    fn test_with_actor_id_readdresses() {
        let moved = ActorId::new(ProcessId::new(4), 10);
        let envelope = Envelope::request(target(), 1, Bytes::new()).with_actor_id(moved);
        assert_eq!(envelope.actor_id(), moved);
    }
}
