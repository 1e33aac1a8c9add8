//! Transport Abstraction
//!
//! The messaging core hands encoded frames to a [`Transport`] together with
//! an opaque [`Address`]. How the bytes travel (sockets, shared memory,
//! in-process) is the transport's business; the only contract is:
//!
//! - `Ok(())` once the frame was handed over
//! - `Err(MessagingError::NotFoundActor { .. })` when the peer reports the
//!   destination actor is not hosted there, which makes proxies re-resolve
//! - any other error is a plain transport failure and is not retried
//!
//! Inbound frames are fed to [`crate::InboundRouter::on_receive`] by whatever
//! owns the receiving end.
//!
//! [`LoopbackNetwork`] connects several routers inside one process and is
//! used by the demo binary and the integration tests.

use crate::router::InboundRouter;
use crate::{MessagingError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};
use types::Address;

/// Outbound half of the network seen by proxies and mailboxes
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand `frame` to the peer at `address`
    async fn send(&self, address: &Address, frame: Bytes) -> Result<()>;
}

/// In-process network joining the routers of several messaging systems
#[derive(Default)]
pub struct LoopbackNetwork {
    routes: DashMap<Address, Weak<InboundRouter>>,
    frames_delivered: AtomicU64,
    frames_unroutable: AtomicU64,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `router` reachable at `address`
    pub fn attach(&self, address: Address, router: &Arc<InboundRouter>) {
        debug!(%address, "Attaching router to loopback network");
        self.routes.insert(address, Arc::downgrade(router));
    }

    /// Remove the route for `address`; later sends to it fail
    pub fn detach(&self, address: &Address) {
        self.routes.remove(address);
    }

    /// Transport whose inbound frames report `local` as their origin
    pub fn transport_for(self: &Arc<Self>, local: Address) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport {
            network: Arc::clone(self),
            local,
        })
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn frames_unroutable(&self) -> u64 {
        self.frames_unroutable.load(Ordering::Relaxed)
    }

    fn route(&self, address: &Address) -> Option<Arc<InboundRouter>> {
        self.routes.get(address).and_then(|entry| entry.value().upgrade())
    }
}

/// One node's view of a [`LoopbackNetwork`]
pub struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
    local: Address,
}

impl LoopbackTransport {
    pub fn local_address(&self) -> &Address {
        &self.local
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, address: &Address, frame: Bytes) -> Result<()> {
        let Some(router) = self.network.route(address) else {
            self.network.frames_unroutable.fetch_add(1, Ordering::Relaxed);
            return Err(MessagingError::transport(format!("no route to {}", address)));
        };

        trace!(from = %self.local, to = %address, len = frame.len(), "Loopback frame");
        self.network.frames_delivered.fetch_add(1, Ordering::Relaxed);
        router.on_receive(&self.local, frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_address_is_transport_failure() {
        let network = LoopbackNetwork::new();
        let transport = network.transport_for(Address::new("node-a"));

        let err = transport
            .send(&Address::new("node-b"), Bytes::from_static(b"frame"))
            .await
            .unwrap_err();

        assert_eq!(err.category(), "transport");
        assert!(!err.is_not_found());
        assert_eq!(network.frames_unroutable(), 1);
        assert_eq!(transport.local_address().as_str(), "node-a");
    }
}
