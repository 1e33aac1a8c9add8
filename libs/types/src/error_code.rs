//! Envelope Status Codes
//!
//! `0` is success. The messaging core reserves the `100_000..110_000` band;
//! application handlers are free to answer with anything at or above
//! [`ErrorCode::APPLICATION_BASE`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-bit status carried in every envelope
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const SUCCESS: Self = Self(0);

    /// Destination actor is not hosted where the sender believed it to be
    pub const NOT_FOUND_ACTOR: Self = Self(100_002);
    /// Destination actor was removed while the call was outstanding
    pub const ACTOR_REMOVED: Self = Self(100_004);
    /// No response arrived before the call deadline
    pub const ACTOR_TIMEOUT: Self = Self(100_005);
    /// Handler failed (error or panic) while processing the request
    pub const HANDLER_ERROR: Self = Self(100_006);
    /// No handler registered for the envelope's dispatch key
    pub const DISPATCH_MISSING: Self = Self(100_007);
    /// Transport refused or failed to deliver the frame
    pub const TRANSPORT_FAILED: Self = Self(100_008);

    /// First code available to application handlers
    pub const APPLICATION_BASE: Self = Self(110_000);

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(&self) -> i32 {
        self.0
    }

    pub const fn is_success(&self) -> bool {
        self.0 == 0
    }

    /// True for codes owned by the messaging core rather than by handlers
    pub const fn is_core(&self) -> bool {
        self.0 >= 100_000 && self.0 < Self::APPLICATION_BASE.0
    }

    /// Symbolic name for core codes
    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::SUCCESS => "Success",
            Self::NOT_FOUND_ACTOR => "NotFoundActor",
            Self::ACTOR_REMOVED => "ActorRemoved",
            Self::ACTOR_TIMEOUT => "ActorTimeout",
            Self::HANDLER_ERROR => "HandlerError",
            Self::DISPATCH_MISSING => "DispatchMissing",
            Self::TRANSPORT_FAILED => "TransportFailed",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", name, self.0),
            None => write!(f, "ErrorCode({})", self.0),
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}
