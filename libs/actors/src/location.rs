//! Location Lookup
//!
//! Proxies never cache a location across a relocation: after a
//! `NotFoundActor` they call [`LocationClient::invalidate`] and resolve
//! again. [`StaticLocationDirectory`] is an in-memory directory suitable for
//! single-host deployments and tests.

use crate::{MessagingError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use types::{ActorId, Address, EntityId, ProcessId};

/// Directory answering "where does this actor live right now"
#[async_trait]
pub trait LocationClient: Send + Sync {
    /// Current actor hosting `entity_id`
    async fn resolve_actor(&self, entity_id: EntityId) -> Result<ActorId>;

    /// Network address of the process hosting `actor_id`
    async fn resolve_address(&self, actor_id: ActorId) -> Result<Address>;

    /// Drop any cached answer for `actor_id`
    fn invalidate(&self, _actor_id: ActorId) {}
}

/// In-memory directory keyed by entity and by process
#[derive(Debug, Default)]
pub struct StaticLocationDirectory {
    entities: DashMap<EntityId, ActorId>,
    processes: DashMap<ProcessId, Address>,
}

impl StaticLocationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `process` is reachable at `address`
    pub fn bind_process(&self, process: ProcessId, address: Address) {
        debug!(%process, %address, "Process bound");
        self.processes.insert(process, address);
    }

    /// Point `entity_id` at `actor_id`, returning the previous host
    pub fn bind_entity(&self, entity_id: EntityId, actor_id: ActorId) -> Option<ActorId> {
        debug!(entity_id = %entity_id, actor_id = %actor_id, "Entity bound");
        self.entities.insert(entity_id, actor_id)
    }

    pub fn unbind_entity(&self, entity_id: EntityId) -> Option<ActorId> {
        self.entities.remove(&entity_id).map(|(_, actor_id)| actor_id)
    }
}

#[async_trait]
impl LocationClient for StaticLocationDirectory {
    async fn resolve_actor(&self, entity_id: EntityId) -> Result<ActorId> {
        self.entities
            .get(&entity_id)
            .map(|entry| *entry.value())
            .ok_or_else(|| {
                MessagingError::not_found(ActorId::NONE, format!("{} has no location", entity_id))
            })
    }

    async fn resolve_address(&self, actor_id: ActorId) -> Result<Address> {
        self.processes
            .get(&actor_id.process())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                MessagingError::not_found(
                    actor_id,
                    format!("{} is not bound to an address", actor_id.process()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_entity_then_address() {
        let directory = StaticLocationDirectory::new();
        let actor = ActorId::new(ProcessId::new(4), 12);
        directory.bind_process(ProcessId::new(4), Address::new("node-4"));
        directory.bind_entity(EntityId::from_raw(900), actor);

        let resolved = directory.resolve_actor(EntityId::from_raw(900)).await.unwrap();
        assert_eq!(resolved, actor);
        assert_eq!(
            directory.resolve_address(resolved).await.unwrap(),
            Address::new("node-4")
        );
    }

    #[tokio::test]
    async fn test_missing_entries_are_not_found() {
        let directory = StaticLocationDirectory::new();
        let err = directory
            .resolve_actor(EntityId::from_raw(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = directory
            .resolve_address(ActorId::new(ProcessId::new(9), 1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rebinding_returns_previous_host() {
        let directory = StaticLocationDirectory::new();
        let first = ActorId::new(ProcessId::new(1), 1);
        let second = ActorId::new(ProcessId::new(2), 1);

        assert_eq!(directory.bind_entity(EntityId::from_raw(5), first), None);
        assert_eq!(directory.bind_entity(EntityId::from_raw(5), second), Some(first));
        assert_eq!(directory.unbind_entity(EntityId::from_raw(5)), Some(second));
    }
}
