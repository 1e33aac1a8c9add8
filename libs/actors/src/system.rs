//! Messaging System
//!
//! Composition root for one process: owns the dispatcher, the pending-call
//! table, the inbound router with its mailboxes, the proxy registry and the
//! background sweeps.
//!
//! ```text
//!            ┌────────────────────── MessagingSystem ───────────────────────┐
//!  caller ──▶│ ProxyRegistry ─▶ ActorProxy ─┐                                │
//!            │                              ├─▶ Transport ──▶ remote router │
//!            │ PendingCallTable ◀── Response┘                                │
//!  frames ──▶│ InboundRouter ─▶ MailboxHandle ─▶ Dispatcher ─▶ handler      │
//!            └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Shutdown Order
//!
//! 1. stop the sweeps
//! 2. dispose every proxy (queued units fail with `NotFoundActor`)
//! 3. close every mailbox and wait for the drain tasks
//! 4. answer calls still pending with `ActorRemoved`

use crate::dispatcher::Dispatcher;
use crate::location::LocationClient;
use crate::mailbox::MailboxHandle;
use crate::metrics::{MessagingMetrics, MetricsSnapshot};
use crate::pending::PendingCallTable;
use crate::proxy::{ActorProxy, ProxyDeps, ProxyTarget};
use crate::registry::ProxyRegistry;
use crate::router::InboundRouter;
use crate::transport::Transport;
use crate::{MessagingError, Result};
use bytes::Bytes;
use messaging_config::MessagingConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use types::{ActorId, Address, EntityId, ErrorCode, ProcessId};
use uuid::Uuid;

/// Identity of the local process on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub process: ProcessId,
    pub address: Address,
}

impl NodeIdentity {
    pub fn new(process: ProcessId, address: impl Into<Address>) -> Self {
        Self {
            process,
            address: address.into(),
        }
    }
}

/// Per-process messaging runtime
pub struct MessagingSystem {
    node: NodeIdentity,
    config: MessagingConfig,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn Transport>,
    pending: Arc<PendingCallTable>,
    router: Arc<InboundRouter>,
    proxies: Arc<ProxyRegistry>,
    metrics: Arc<MessagingMetrics>,
    next_instance: AtomicU64,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    system_id: String,
}

impl MessagingSystem {
    pub fn new(
        node: NodeIdentity,
        config: MessagingConfig,
        dispatcher: Dispatcher,
        transport: Arc<dyn Transport>,
        location: Arc<dyn LocationClient>,
    ) -> Self {
        let metrics = Arc::new(MessagingMetrics::default());
        let pending = Arc::new(PendingCallTable::new(Arc::clone(&metrics)));
        let router = Arc::new(InboundRouter::new(
            Arc::clone(&pending),
            Arc::clone(&transport),
            Arc::clone(&metrics),
        ));
        let proxies = Arc::new(ProxyRegistry::new(
            config.clone(),
            ProxyDeps {
                location,
                transport: Arc::clone(&transport),
                pending: Arc::clone(&pending),
                metrics: Arc::clone(&metrics),
            },
        ));
        let (shutdown, _) = watch::channel(false);
        let system_id = format!("system-{}", Uuid::new_v4());

        info!(
            system_id = %system_id,
            process = %node.process,
            address = %node.address,
            "Messaging system created"
        );

        Self {
            node,
            config,
            dispatcher: Arc::new(dispatcher),
            transport,
            pending,
            router,
            proxies,
            metrics,
            next_instance: AtomicU64::new(1),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            system_id,
        }
    }

    /// Start the pending-call timeout sweep and the proxy idle sweep
    pub fn start(&self) {
        let timeout_sweeper = self
            .pending
            .spawn_sweeper(self.config.sweep_interval(), self.shutdown.subscribe());
        let idle_sweeper = self.proxies.spawn_idle_sweeper(self.shutdown.subscribe());
        self.tasks.lock().extend([timeout_sweeper, idle_sweeper]);
        info!(system_id = %self.system_id, "Messaging system started");
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn node(&self) -> &NodeIdentity {
        &self.node
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    /// Router to hand to the receiving side of the transport
    pub fn router(&self) -> Arc<InboundRouter> {
        Arc::clone(&self.router)
    }

    /// Mint a new actor id on this process and start its mailbox
    pub fn spawn_actor(&self, kind: &str) -> Result<MailboxHandle> {
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        self.register_actor(ActorId::new(self.node.process, instance), kind)
    }

    /// Start a mailbox for `actor_id`
    pub fn register_actor(&self, actor_id: ActorId, kind: &str) -> Result<MailboxHandle> {
        if actor_id.process() != self.node.process {
            return Err(MessagingError::configuration(
                format!("{} does not belong to {}", actor_id, self.node.process),
                Some("actor_id"),
            ));
        }

        let mailbox = MailboxHandle::spawn(
            actor_id,
            kind,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.transport),
            Arc::clone(&self.metrics),
        );
        if let Err(e) = self.router.attach(mailbox.clone()) {
            mailbox.close();
            return Err(e);
        }

        debug!(system_id = %self.system_id, actor_id = %actor_id, kind, "Actor registered");
        Ok(mailbox)
    }

    /// Close the mailbox of `actor_id` once its queue is drained
    pub async fn unregister_actor(&self, actor_id: ActorId) -> Result<()> {
        let mailbox = self.router.detach(actor_id).ok_or_else(|| {
            MessagingError::not_found(actor_id, "no mailbox on this process")
        })?;
        mailbox.close();
        mailbox.closed().await;
        debug!(system_id = %self.system_id, actor_id = %actor_id, "Actor unregistered");
        Ok(())
    }

    /// Proxy for a specific actor; fails fast when the actor is gone
    pub fn proxy_for_actor(&self, actor_id: ActorId) -> ActorProxy {
        self.proxies.get_or_create(ProxyTarget::Actor(actor_id))
    }

    /// Proxy for a migratable entity; follows it across relocations
    pub fn proxy_for_entity(&self, entity_id: EntityId) -> ActorProxy {
        self.proxies.get_or_create(ProxyTarget::Entity(entity_id))
    }

    pub fn proxies(&self) -> &ProxyRegistry {
        &self.proxies
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Feed a frame received from `from`
    pub async fn on_receive(&self, from: &Address, frame: Bytes) -> Result<()> {
        self.router.on_receive(from, frame).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop sweeps, proxies and mailboxes, then fail what is still pending
    pub async fn shutdown(&self) {
        info!(system_id = %self.system_id, "Shutting down messaging system");
        self.shutdown.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(system_id = %self.system_id, error = %e, "Sweeper task failed");
            }
        }

        self.proxies.dispose_all().await;

        let mailboxes = self.router.detach_all();
        for mailbox in &mailboxes {
            mailbox.close();
        }
        for mailbox in &mailboxes {
            mailbox.closed().await;
        }

        let abandoned = self
            .pending
            .fail_all(ErrorCode::ACTOR_REMOVED, "messaging system shut down");
        info!(
            system_id = %self.system_id,
            mailboxes = mailboxes.len(),
            abandoned,
            "Messaging system stopped"
        );
    }
}
