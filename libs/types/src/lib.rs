//! # Actor Messaging Types
//!
//! Shared vocabulary for the actor mailbox and location-routed RPC layer.
//!
//! ## Contents
//!
//! - **Identifiers**: [`ActorId`] (process-tagged 64-bit id), [`EntityId`],
//!   [`ProcessId`] and the opaque network [`Address`]
//! - **Error codes**: [`ErrorCode`], the 32-bit status carried by every envelope
//! - **Envelope**: [`Envelope`], the immutable unit that crosses mailboxes,
//!   proxies and the transport
//! - **Wire codec**: [`Envelope::encode`] / [`Envelope::decode`]
//!
//! ## Wire Contract
//!
//! Only three scalar fields are load-bearing for correlation and must survive
//! the transport unchanged:
//!
//! ```text
//! ┌────────────────┬──────────────┬────────────┬─────────────────────────┐
//! │ correlation_id │ actor_id     │ error      │ payload (opaque bytes)  │
//! │ i32            │ i64          │ i32        │                         │
//! └────────────────┴──────────────┴────────────┴─────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use types::{ActorId, Envelope, ErrorCode, ProcessId};
//! use bytes::Bytes;
//!
//! let target = ActorId::new(ProcessId::new(3), 42);
//! let request = Envelope::request(target, 1001, Bytes::from_static(b"ping"))
//!     .with_correlation_id(7);
//!
//! let frame = request.encode().unwrap();
//! let decoded = Envelope::decode(&frame).unwrap();
//! assert_eq!(decoded.correlation_id(), 7);
//! assert_eq!(decoded.error(), ErrorCode::SUCCESS);
//! ```

pub mod envelope;
pub mod error_code;
pub mod errors;
pub mod identifiers;
pub mod wire;

pub use envelope::{Envelope, EnvelopeKind};
pub use error_code::ErrorCode;
pub use errors::WireError;
pub use identifiers::{ActorId, Address, EntityId, ProcessId};
pub use wire::WIRE_VERSION;
