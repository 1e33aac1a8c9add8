//! Proxy Registry
//!
//! One live [`ActorProxy`] per destination. Proxies that exhaust their
//! relocation retries remove themselves through the eviction hook; proxies
//! nobody used for `proxy_idle_timeout` are disposed by the idle sweep.
//! A later lookup for the same destination starts a fresh proxy.

use crate::metrics::MessagingMetrics;
use crate::proxy::{ActorProxy, EvictHook, ProxyDeps, ProxySettings, ProxyTarget};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use messaging_config::MessagingConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Live proxies keyed by destination
pub struct ProxyRegistry {
    proxies: Arc<DashMap<ProxyTarget, ActorProxy>>,
    config: MessagingConfig,
    deps: ProxyDeps,
}

impl ProxyRegistry {
    pub fn new(config: MessagingConfig, deps: ProxyDeps) -> Self {
        Self {
            proxies: Arc::new(DashMap::new()),
            config,
            deps,
        }
    }

    /// Live proxy for `target`, started on first use
    pub fn get_or_create(&self, target: ProxyTarget) -> ActorProxy {
        match self.proxies.entry(target) {
            Entry::Occupied(entry) if !entry.get().is_disposed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                let proxy = self.spawn(target);
                entry.insert(proxy.clone());
                proxy
            }
            Entry::Vacant(entry) => {
                let proxy = self.spawn(target);
                entry.insert(proxy.clone());
                proxy
            }
        }
    }

    pub fn get(&self, target: ProxyTarget) -> Option<ActorProxy> {
        self.proxies.get(&target).map(|entry| entry.value().clone())
    }

    /// Dispose and forget the proxy for `target`
    pub fn remove(&self, target: ProxyTarget) -> bool {
        match self.proxies.remove(&target) {
            Some((_, proxy)) => {
                proxy.dispose();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Dispose proxies idle for at least `idle_timeout` as of `now`
    pub fn sweep_idle(&self, now: Instant, idle_timeout: Duration) -> usize {
        let idle: Vec<ProxyTarget> = self
            .proxies
            .iter()
            .filter(|entry| entry.value().is_idle(now, idle_timeout))
            .map(|entry| *entry.key())
            .collect();

        let mut removed = 0;
        for target in idle {
            if let Some((_, proxy)) = self
                .proxies
                .remove_if(&target, |_, proxy| proxy.is_idle(now, idle_timeout))
            {
                proxy.dispose();
                MessagingMetrics::incr(&self.deps.metrics.proxies_idle_disposed);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Idle proxies disposed");
        }
        removed
    }

    /// Run [`Self::sweep_idle`] on the configured cadence until `shutdown` flips
    pub fn spawn_idle_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = self.config.proxy_idle_check();
        let idle_timeout = self.config.proxy_idle_timeout();
        tokio::spawn(async move {
            info!(
                interval_ms = interval.as_millis() as u64,
                idle_timeout_ms = idle_timeout.as_millis() as u64,
                "Proxy idle sweeper started"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    _ = ticker.tick() => {
                        registry.sweep_idle(Instant::now(), idle_timeout);
                    }
                }
            }
            debug!("Proxy idle sweeper stopped");
        })
    }

    /// Dispose every proxy and wait for their drain tasks
    pub async fn dispose_all(&self) {
        let proxies: Vec<ActorProxy> = self
            .proxies
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.proxies.clear();
        for proxy in &proxies {
            proxy.dispose();
        }
        for proxy in proxies {
            proxy.closed().await;
        }
    }

    fn spawn(&self, target: ProxyTarget) -> ActorProxy {
        let settings = ProxySettings::for_target(&self.config, target);
        let proxy = ActorProxy::spawn(target, settings, self.deps.clone());

        let proxies = Arc::downgrade(&self.proxies);
        let hook: EvictHook = Arc::new(move |target, proxy_id| {
            if let Some(proxies) = proxies.upgrade() {
                proxies.remove_if(&target, |_, proxy| proxy.id() == proxy_id);
            }
        });
        proxy.set_evict_hook(hook);

        debug!(destination = %target, proxy_id = proxy.id(), "Proxy created");
        proxy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingCallTable;
    use crate::test_support::{Reply, ScriptedLocation, ScriptedTransport};
    use bytes::Bytes;
    use types::{ActorId, EntityId, Envelope, ErrorCode, ProcessId};

    fn registry(reply: Reply) -> ProxyRegistry {
        let metrics = Arc::new(MessagingMetrics::default());
        let pending = Arc::new(PendingCallTable::new(Arc::clone(&metrics)));
        let location = Arc::new(ScriptedLocation::new());
        location.script_entity([ActorId::new(ProcessId::new(1), 1)]);
        let deps = ProxyDeps {
            location,
            transport: Arc::new(ScriptedTransport::new(Arc::clone(&pending), move |_, _| reply)),
            pending,
            metrics,
        };
        let config = MessagingConfig {
            retry_backoff_ms: 5,
            max_failures: 1,
            ..MessagingConfig::default()
        };
        ProxyRegistry::new(config, deps)
    }

    fn request() -> Envelope {
        Envelope::request(ActorId::NONE, 1, Bytes::new())
    }

    #[tokio::test]
    async fn test_same_target_shares_one_proxy() {
        let registry = registry(Reply::Ack);
        let target = ProxyTarget::Entity(EntityId::from_raw(8));

        let a = registry.get_or_create(target);
        let b = registry.get_or_create(target);

        assert_eq!(a.id(), b.id());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_proxy_evicts_itself() {
        let registry = registry(Reply::NotFound);
        let target = ProxyTarget::Entity(EntityId::from_raw(8));
        let proxy = registry.get_or_create(target);

        let response = proxy.call_unchecked(request()).await;
        assert_eq!(response.error(), ErrorCode::NOT_FOUND_ACTOR);
        proxy.closed().await;

        assert!(registry.get(target).is_none());
        let fresh = registry.get_or_create(target);
        assert_ne!(fresh.id(), proxy.id());
        assert!(!fresh.is_disposed());
    }

    #[tokio::test]
    async fn test_disposed_entry_is_replaced() {
        let registry = registry(Reply::Ack);
        let target = ProxyTarget::Actor(ActorId::new(ProcessId::new(1), 3));
        let first = registry.get_or_create(target);
        first.dispose();

        let second = registry.get_or_create(target);
        assert_ne!(first.id(), second.id());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_sweep_disposes_unused_proxies() {
        let registry = registry(Reply::Ack);
        let target = ProxyTarget::Actor(ActorId::new(ProcessId::new(1), 4));
        let proxy = registry.get_or_create(target);
        let idle_timeout = Duration::from_secs(60);

        assert_eq!(registry.sweep_idle(Instant::now(), idle_timeout), 0);
        assert_eq!(registry.sweep_idle(Instant::now() + idle_timeout, idle_timeout), 1);

        assert!(registry.is_empty());
        assert!(proxy.is_disposed());
        assert!(!registry.remove(target));
    }

    #[tokio::test]
    async fn test_dispose_all_stops_every_proxy() {
        let registry = registry(Reply::Ack);
        let a = registry.get_or_create(ProxyTarget::Actor(ActorId::new(ProcessId::new(1), 5)));
        let b = registry.get_or_create(ProxyTarget::Entity(EntityId::from_raw(9)));

        registry.dispose_all().await;

        assert!(a.is_disposed() && b.is_disposed());
        assert!(registry.is_empty());
    }
}
