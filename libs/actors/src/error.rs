//! Messaging Error Types
//!
//! Every failure that can reach a caller maps onto an [`ErrorCode`] so it can
//! travel back inside a response envelope, and every error response can be
//! turned back into a [`MessagingError`] on the calling side.

use thiserror::Error;
use types::{ActorId, Envelope, ErrorCode, WireError};

/// Errors surfaced by mailboxes, proxies, the pending-call table and transports
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    /// Destination mailbox is not hosted at the resolved address
    #[error("Actor not found: {actor_id}: {message}")]
    NotFoundActor { actor_id: ActorId, message: String },

    /// No response arrived before the call deadline
    #[error("Call {correlation_id} to {actor_id} timed out")]
    ActorTimeout { actor_id: ActorId, correlation_id: i32 },

    /// Call was abandoned because its owner shut down
    #[error("Actor removed: {actor_id}")]
    ActorRemoved { actor_id: ActorId },

    /// Handler returned an error or panicked
    #[error("Handler error: {message}")]
    HandlerError { message: String },

    /// No handler registered for the envelope's kind or opcode
    #[error("No handler registered for {key}")]
    DispatchMissing { key: String },

    /// Mailbox no longer accepts envelopes
    #[error("Mailbox closed: {actor_id}")]
    MailboxClosed { actor_id: ActorId },

    /// Proxy was disposed before the envelope could be queued
    #[error("Proxy disposed: {target}")]
    ProxyDisposed { target: String },

    /// Transport could not hand the frame over
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Location directory failed for a reason other than a missing entry
    #[error("Location error: {message}")]
    Location { message: String },

    /// Envelope could not be encoded or decoded
    #[error("Codec error: {message}")]
    Codec { message: String },

    /// Invalid setup (duplicate registration, bad settings)
    #[error("Configuration error: {message}")]
    Configuration { message: String, field: Option<String> },

    /// Error response carrying a code without a local variant
    #[error("Remote error {code}: {message}")]
    Remote { code: ErrorCode, message: String },
}

impl MessagingError {
    /// Create a not-found error
    pub fn not_found(actor_id: ActorId, message: impl Into<String>) -> Self {
        Self::NotFoundActor {
            actor_id,
            message: message.into(),
        }
    }

    /// Create a handler error
    pub fn handler(message: impl Into<String>) -> Self {
        Self::HandlerError {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a location error
    pub fn location(message: impl Into<String>) -> Self {
        Self::Location {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    /// Application-level failure answered with `code`
    pub fn remote(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// Status code written into the error response for this failure
    pub fn error_code(&self) -> ErrorCode {
        match self {
            MessagingError::NotFoundActor { .. } => ErrorCode::NOT_FOUND_ACTOR,
            MessagingError::MailboxClosed { .. } => ErrorCode::NOT_FOUND_ACTOR,
            MessagingError::ProxyDisposed { .. } => ErrorCode::NOT_FOUND_ACTOR,
            MessagingError::ActorTimeout { .. } => ErrorCode::ACTOR_TIMEOUT,
            MessagingError::ActorRemoved { .. } => ErrorCode::ACTOR_REMOVED,
            MessagingError::HandlerError { .. } => ErrorCode::HANDLER_ERROR,
            MessagingError::Codec { .. } => ErrorCode::HANDLER_ERROR,
            MessagingError::Configuration { .. } => ErrorCode::HANDLER_ERROR,
            MessagingError::DispatchMissing { .. } => ErrorCode::DISPATCH_MISSING,
            MessagingError::Transport { .. } => ErrorCode::TRANSPORT_FAILED,
            MessagingError::Location { .. } => ErrorCode::TRANSPORT_FAILED,
            MessagingError::Remote { code, .. } => *code,
        }
    }

    /// Relocation signal: the proxy should re-resolve and retry
    pub fn is_not_found(&self) -> bool {
        self.error_code() == ErrorCode::NOT_FOUND_ACTOR
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            MessagingError::NotFoundActor { .. } => "not_found_actor",
            MessagingError::ActorTimeout { .. } => "timeout",
            MessagingError::ActorRemoved { .. } => "actor_removed",
            MessagingError::HandlerError { .. } => "handler",
            MessagingError::DispatchMissing { .. } => "dispatch_missing",
            MessagingError::MailboxClosed { .. } => "mailbox_closed",
            MessagingError::ProxyDisposed { .. } => "proxy_disposed",
            MessagingError::Transport { .. } => "transport",
            MessagingError::Location { .. } => "location",
            MessagingError::Codec { .. } => "codec",
            MessagingError::Configuration { .. } => "configuration",
            MessagingError::Remote { .. } => "remote",
        }
    }

    /// Rebuild the caller-side error from an error response, `None` on success
    pub fn from_response(response: &Envelope) -> Option<Self> {
        let code = response.error();
        if code.is_success() {
            return None;
        }
        let message = response.error_message().unwrap_or_default().to_string();
        let actor_id = response.actor_id();

        Some(match code {
            ErrorCode::NOT_FOUND_ACTOR => Self::NotFoundActor { actor_id, message },
            ErrorCode::ACTOR_TIMEOUT => Self::ActorTimeout {
                actor_id,
                correlation_id: response.correlation_id(),
            },
            ErrorCode::ACTOR_REMOVED => Self::ActorRemoved { actor_id },
            ErrorCode::HANDLER_ERROR => Self::HandlerError { message },
            ErrorCode::DISPATCH_MISSING => Self::DispatchMissing { key: message },
            ErrorCode::TRANSPORT_FAILED => Self::Transport { message },
            code => Self::Remote { code, message },
        })
    }

    /// Error response answering `request` with this failure
    pub fn to_response(&self, request: &Envelope) -> Envelope {
        Envelope::error_response(request, self.error_code(), self.to_string())
    }
}

impl From<WireError> for MessagingError {
    fn from(err: WireError) -> Self {
        Self::Codec {
            message: err.to_string(),
        }
    }
}

/// Result type for messaging operations
pub type Result<T> = std::result::Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use types::ProcessId;

    fn request() -> Envelope {
        Envelope::request(ActorId::new(ProcessId::new(2), 8), 40, Bytes::new()).with_correlation_id(5)
    }

    #[test]
    fn test_success_response_is_not_an_error() {
        let response = Envelope::response_to(&request(), Bytes::from_static(b"ok"));
        assert!(MessagingError::from_response(&response).is_none());
    }

    #[test]
    fn test_core_codes_map_back_to_variants() {
        let req = request();
        let timeout = Envelope::error_response(&req, ErrorCode::ACTOR_TIMEOUT, "late");
        assert_eq!(
            MessagingError::from_response(&timeout),
            Some(MessagingError::ActorTimeout {
                actor_id: req.actor_id(),
                correlation_id: 5
            })
        );

        let missing = MessagingError::DispatchMissing { key: "opcode 40".into() };
        let response = missing.to_response(&req);
        assert_eq!(response.error(), ErrorCode::DISPATCH_MISSING);
        assert_eq!(response.correlation_id(), 5);
    }

    #[test]
    fn test_application_codes_round_trip_as_remote() {
        let code = ErrorCode::new(ErrorCode::APPLICATION_BASE.code() + 17);
        let err = MessagingError::remote(code, "insufficient gold");
        let response = err.to_response(&request());

        let back = MessagingError::from_response(&response).unwrap();
        assert_eq!(back.error_code(), code);
        assert_eq!(back.category(), "remote");
    }

    #[test]
    fn test_closed_mailbox_signals_relocation() {
        let err = MessagingError::MailboxClosed {
            actor_id: ActorId::from_raw(3),
        };
        assert!(err.is_not_found());
        assert!(!MessagingError::transport("reset").is_not_found());
    }
}
