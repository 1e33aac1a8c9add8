//! # Typed Identifiers
//!
//! Zero-cost wrappers that keep actor ids, entity ids and process ids from
//! being mixed up at call sites.
//!
//! ## ActorId Layout
//!
//! An [`ActorId`] names one mailbox on one process. The owning process is
//! packed into the high bits so a sender can route without a directory
//! lookup once the id is known:
//!
//! ```text
//! 63            46 45                                            0
//! ┌───────────────┬───────────────────────────────────────────────┐
//! │ process (18b) │ instance (46b)                                │
//! └───────────────┴───────────────────────────────────────────────┘
//! ```
//!
//! The layout is owned by the id-generation side; the messaging core treats
//! it as opaque apart from [`ActorId::process`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of low bits holding the per-process instance counter
pub const INSTANCE_BITS: u32 = 46;

/// Largest process number that fits the high bits of an [`ActorId`]
pub const MAX_PROCESS: u32 = (1 << (64 - INSTANCE_BITS)) - 1;

const INSTANCE_MASK: u64 = (1 << INSTANCE_BITS) - 1;

/// Generates a signed 64-bit typed id with the common conversions
macro_rules! define_typed_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Default,
            Serialize,
            Deserialize
        )]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// The "no id" value
            pub const NONE: Self = Self(0);

            /// Wrap a raw id
            #[inline(always)]
            pub const fn from_raw(id: i64) -> Self {
                Self(id)
            }

            /// Extract the raw id
            #[inline(always)]
            pub const fn raw(&self) -> i64 {
                self.0
            }

            /// True for the zero id
            #[inline(always)]
            pub const fn is_none(&self) -> bool {
                self.0 == 0
            }
        }

        impl From<i64> for $name {
            #[inline(always)]
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            #[inline(always)]
            fn from(id: $name) -> i64 {
                id.0
            }
        }
    };
}

define_typed_id! {
    /// Logical destination of an envelope: one mailbox on one process
    ActorId
}

define_typed_id! {
    /// Location-independent identity of a game entity; resolved to an
    /// [`ActorId`] through the location directory
    EntityId
}

impl ActorId {
    /// Pack a process number and an instance counter into an actor id
    ///
    /// Instance bits above [`INSTANCE_BITS`] and process bits above
    /// [`MAX_PROCESS`] are discarded.
    pub const fn new(process: ProcessId, instance: u64) -> Self {
        let packed = ((process.0 as u64 & MAX_PROCESS as u64) << INSTANCE_BITS)
            | (instance & INSTANCE_MASK);
        Self(packed as i64)
    }

    /// Process that owned this actor when the id was minted
    pub const fn process(&self) -> ProcessId {
        ProcessId(((self.0 as u64) >> INSTANCE_BITS) as u32)
    }

    /// Per-process instance counter
    pub const fn instance(&self) -> u64 {
        self.0 as u64 & INSTANCE_MASK
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}:{}", self.process().0, self.instance())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity-{}", self.0)
    }
}

/// Process number embedded in the high bits of an [`ActorId`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl ProcessId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn inner(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process-{}", self.0)
    }
}

/// Opaque network address understood by the transport
///
/// The messaging core never parses it; it is handed back verbatim to
/// `Transport::send` and used as the reply route for inbound requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for Address {
    fn from(address: String) -> Self {
        Self(address)
    }
}
