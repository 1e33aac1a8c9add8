//! Location-Routed Actor Proxy
//!
//! An [`ActorProxy`] is the sending side for one logical destination. It owns
//! an ordered outbound queue drained by a single task, so envelopes leave in
//! the order they were handed in, one at a time.
//!
//! For each queued unit the drain task:
//!
//! 1. resolves the destination (entity → actor → address) through the
//!    [`LocationClient`], reusing the cached answer when it has one
//! 2. stamps the resolved actor id and hands the frame to the [`Transport`]
//! 3. for calls, registers the correlation id in the [`PendingCallTable`]
//!    and waits for the response
//!
//! A `NotFoundActor` answer (from the transport, a response, or the
//! directory) means the actor moved. The proxy waits the retry backoff,
//! drops its cached location, re-resolves and retries the same unit; units
//! behind it stay queued. Once more than `max_failures` consecutive attempts
//! fail this way, the current unit and everything queued behind it fail with
//! `NotFoundActor` and the proxy tears itself down.
//!
//! Timeouts, transport failures and handler errors are surfaced to the
//! caller as-is and never retried.

use crate::location::LocationClient;
use crate::metrics::MessagingMetrics;
use crate::pending::PendingCallTable;
use crate::transport::Transport;
use crate::{MessagingError, Result};
use bytes::Bytes;
use messaging_config::MessagingConfig;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use types::{ActorId, Address, EntityId, Envelope, EnvelopeKind, ErrorCode};

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

/// Logical destination of a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyTarget {
    /// A specific actor; not found means gone
    Actor(ActorId),
    /// A migratable entity, re-resolved after every relocation
    Entity(EntityId),
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyTarget::Actor(actor_id) => write!(f, "{}", actor_id),
            ProxyTarget::Entity(entity_id) => write!(f, "{}", entity_id),
        }
    }
}

/// Retry and deadline settings for one proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxySettings {
    /// Relocation retries before giving up; attempts are capped at this + 1
    pub max_failures: u32,
    pub retry_backoff: Duration,
    pub call_timeout: Duration,
}

impl ProxySettings {
    /// Settings for `target`: actor-addressed proxies never retry
    pub fn for_target(config: &MessagingConfig, target: ProxyTarget) -> Self {
        let max_failures = match target {
            ProxyTarget::Actor(_) => 0,
            ProxyTarget::Entity(_) => config.max_failures,
        };
        Self {
            max_failures,
            retry_backoff: config.retry_backoff(),
            call_timeout: config.call_timeout(),
        }
    }
}

/// Collaborators shared by every proxy of a messaging system
#[derive(Clone)]
pub struct ProxyDeps {
    pub location: Arc<dyn LocationClient>,
    pub transport: Arc<dyn Transport>,
    pub pending: Arc<PendingCallTable>,
    pub metrics: Arc<MessagingMetrics>,
}

/// Called once when a proxy tears itself down after exhausting its retries
pub type EvictHook = Arc<dyn Fn(ProxyTarget, u64) + Send + Sync>;

struct OutboundUnit {
    envelope: Envelope,
    completion: Option<oneshot::Sender<Envelope>>,
}

struct ProxyShared {
    id: u64,
    target: ProxyTarget,
    disposed: AtomicBool,
    failure_count: AtomicU32,
    attempts: AtomicU64,
    queued: AtomicUsize,
    resolved_actor: AtomicI64,
    last_activity: Mutex<Instant>,
    last_success: Mutex<Option<Instant>>,
    shutdown: watch::Sender<bool>,
    terminated: watch::Sender<bool>,
    evict_hook: Mutex<Option<EvictHook>>,
}

/// Sending handle for one destination; clones share the same queue
#[derive(Clone)]
pub struct ActorProxy {
    shared: Arc<ProxyShared>,
    queue: mpsc::UnboundedSender<OutboundUnit>,
    pending: Arc<PendingCallTable>,
}

impl fmt::Debug for ActorProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorProxy")
            .field("id", &self.shared.id)
            .field("target", &self.shared.target)
            .field("disposed", &self.is_disposed())
            .field("failure_count", &self.failure_count())
            .field("queued", &self.queued())
            .finish()
    }
}

impl ActorProxy {
    /// Start the drain task for `target`
    pub fn spawn(target: ProxyTarget, settings: ProxySettings, deps: ProxyDeps) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (terminated, _) = watch::channel(false);

        let initial_actor = match target {
            ProxyTarget::Actor(actor_id) => actor_id,
            ProxyTarget::Entity(_) => ActorId::NONE,
        };

        let shared = Arc::new(ProxyShared {
            id: NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed),
            target,
            disposed: AtomicBool::new(false),
            failure_count: AtomicU32::new(0),
            attempts: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            resolved_actor: AtomicI64::new(initial_actor.raw()),
            last_activity: Mutex::new(Instant::now()),
            last_success: Mutex::new(None),
            shutdown,
            terminated,
            evict_hook: Mutex::new(None),
        });

        let pending = Arc::clone(&deps.pending);
        let worker = ProxyWorker {
            shared: Arc::clone(&shared),
            settings,
            deps,
            actor_id: initial_actor,
            address: None,
            failures: 0,
        };
        tokio::spawn(worker.run(receiver, shutdown_rx));

        Self {
            shared,
            queue,
            pending,
        }
    }

    /// Unique id of this proxy instance
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn target(&self) -> ProxyTarget {
        self.shared.target
    }

    /// Queue a fire-and-forget envelope
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.push(OutboundUnit {
            envelope,
            completion: None,
        })
    }

    /// Queue a request and wait for its response
    ///
    /// Error responses are returned as `Err`; see [`Self::call_unchecked`]
    /// to inspect them as envelopes.
    pub async fn call(&self, request: Envelope) -> Result<Envelope> {
        let response = self.call_unchecked(request).await;
        match MessagingError::from_response(&response) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    /// Queue a request and return whatever response completes it
    pub async fn call_unchecked(&self, request: Envelope) -> Envelope {
        let request = match request.kind() {
            EnvelopeKind::Request => request,
            _ => Envelope::request(request.actor_id(), request.opcode(), request.payload().clone()),
        };
        let correlation_id = self.pending.next_correlation_id();
        let request = request.with_correlation_id(correlation_id);
        let (actor_id, opcode) = (request.actor_id(), request.opcode());

        let (completion, response) = oneshot::channel();
        if let Err(err) = self.push(OutboundUnit {
            envelope: request,
            completion: Some(completion),
        }) {
            return Envelope::error_for(correlation_id, actor_id, opcode, err.error_code(), err.to_string());
        }

        response.await.unwrap_or_else(|_| {
            Envelope::error_for(
                correlation_id,
                actor_id,
                opcode,
                ErrorCode::NOT_FOUND_ACTOR,
                "proxy stopped before answering",
            )
        })
    }

    /// Tear the proxy down; queued units fail with `NotFoundActor`
    pub fn dispose(&self) {
        if !self.shared.disposed.swap(true, Ordering::AcqRel) {
            debug!(destination = %self.shared.target, proxy_id = self.shared.id, "Proxy disposed");
        }
        self.shared.shutdown.send_replace(true);
    }

    /// Wait until the drain task has exited
    pub async fn closed(&self) {
        let mut terminated = self.shared.terminated.subscribe();
        let _ = terminated.wait_for(|done| *done).await;
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Consecutive relocation failures of the unit currently at the head
    pub fn failure_count(&self) -> u32 {
        self.shared.failure_count.load(Ordering::Acquire)
    }

    /// Delivery attempts made so far, retries included
    pub fn attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::Acquire)
    }

    /// Units queued or in flight
    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    /// Actor the proxy last resolved its target to
    pub fn resolved_actor(&self) -> ActorId {
        ActorId::from_raw(self.shared.resolved_actor.load(Ordering::Acquire))
    }

    pub fn last_activity(&self) -> Instant {
        *self.shared.last_activity.lock()
    }

    pub fn last_success(&self) -> Option<Instant> {
        *self.shared.last_success.lock()
    }

    /// Nothing queued and untouched for at least `idle_timeout`
    pub fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        self.queued() == 0 && now.saturating_duration_since(self.last_activity()) >= idle_timeout
    }

    pub(crate) fn set_evict_hook(&self, hook: EvictHook) {
        *self.shared.evict_hook.lock() = Some(hook);
    }

    fn push(&self, unit: OutboundUnit) -> Result<()> {
        let disposed = || MessagingError::ProxyDisposed {
            target: self.shared.target.to_string(),
        };
        if self.is_disposed() {
            return Err(disposed());
        }

        *self.shared.last_activity.lock() = Instant::now();
        self.shared.queued.fetch_add(1, Ordering::AcqRel);
        self.queue.send(unit).map_err(|_| {
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
            disposed()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Disposed,
    Evicted,
    Dropped,
}

enum Attempt {
    /// Frame handed over; carries the response for calls
    Delivered(Option<Envelope>),
    /// Destination not hosted where the proxy looked
    Relocated(String),
    /// Finished with a failure that is not retried
    Failed(Envelope),
}

struct ProxyWorker {
    shared: Arc<ProxyShared>,
    settings: ProxySettings,
    deps: ProxyDeps,
    actor_id: ActorId,
    address: Option<Address>,
    failures: u32,
}

impl ProxyWorker {
    async fn run(
        mut self,
        mut queue: mpsc::UnboundedReceiver<OutboundUnit>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(destination = %self.shared.target, proxy_id = self.shared.id, "Proxy started");

        let reason = loop {
            let unit = tokio::select! {
                biased;
                _ = shutdown.wait_for(|disposed| *disposed) => break StopReason::Disposed,
                unit = queue.recv() => match unit {
                    Some(unit) => unit,
                    None => break StopReason::Dropped,
                },
            };

            let outcome = self.deliver(unit, &mut shutdown).await;
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
            if let Err(reason) = outcome {
                break reason;
            }
        };

        self.teardown(queue, reason).await;
    }

    async fn deliver(
        &mut self,
        unit: OutboundUnit,
        shutdown: &mut watch::Receiver<bool>,
    ) -> std::result::Result<(), StopReason> {
        // Relocation failures are counted per head unit
        self.failures = 0;
        self.shared.failure_count.store(0, Ordering::Release);

        loop {
            self.shared.attempts.fetch_add(1, Ordering::AcqRel);

            let attempt = tokio::select! {
                biased;
                _ = shutdown.wait_for(|disposed| *disposed) => None,
                attempt = self.attempt(&unit.envelope) => Some(attempt),
            };

            let Some(attempt) = attempt else {
                if unit.envelope.is_rpc() {
                    self.deps.pending.cancel(unit.envelope.correlation_id());
                }
                self.fail(unit, "proxy disposed");
                return Err(StopReason::Disposed);
            };

            match attempt {
                Attempt::Delivered(response) => {
                    self.record_success();
                    self.complete(unit, response);
                    return Ok(());
                }
                Attempt::Failed(response) => {
                    self.complete(unit, Some(response));
                    return Ok(());
                }
                Attempt::Relocated(reason) => {
                    self.failures += 1;
                    self.shared.failure_count.store(self.failures, Ordering::Release);

                    if self.failures > self.settings.max_failures {
                        warn!(
                            destination = %self.shared.target,
                            failures = self.failures,
                            reason = %reason,
                            "Destination not found, giving up"
                        );
                        self.fail(unit, &reason);
                        return Err(StopReason::Evicted);
                    }

                    MessagingMetrics::incr(&self.deps.metrics.relocation_retries);
                    warn!(
                        destination = %self.shared.target,
                        failures = self.failures,
                        backoff_ms = self.settings.retry_backoff.as_millis() as u64,
                        reason = %reason,
                        "Destination moved, re-resolving"
                    );

                    let disposed = tokio::select! {
                        biased;
                        _ = shutdown.wait_for(|disposed| *disposed) => true,
                        _ = tokio::time::sleep(self.settings.retry_backoff) => false,
                    };
                    if disposed {
                        self.fail(unit, "proxy disposed");
                        return Err(StopReason::Disposed);
                    }
                    self.invalidate();
                }
            }
        }
    }

    async fn attempt(&mut self, envelope: &Envelope) -> Attempt {
        let (actor_id, address) = match self.resolve().await {
            Ok(route) => route,
            Err(err) if err.is_not_found() => return Attempt::Relocated(err.to_string()),
            Err(err) => return Attempt::Failed(failure_for(envelope, &err)),
        };

        let envelope = envelope.clone().with_actor_id(actor_id);
        let frame = match envelope.encode() {
            Ok(frame) => frame,
            Err(err) => return Attempt::Failed(failure_for(&envelope, &MessagingError::from(err))),
        };

        if !envelope.is_rpc() {
            return match self.deps.transport.send(&address, frame).await {
                Ok(()) => Attempt::Delivered(None),
                Err(err) => self.send_failed(&envelope, &address, err),
            };
        }

        let correlation_id = envelope.correlation_id();
        let deadline = Instant::now() + self.settings.call_timeout;
        let handle = match self
            .deps
            .pending
            .register(correlation_id, actor_id, envelope.opcode(), deadline)
        {
            Ok(handle) => handle,
            Err(err) => return Attempt::Failed(failure_for(&envelope, &err)),
        };

        if let Err(err) = self.deps.transport.send(&address, frame).await {
            self.deps.pending.cancel(correlation_id);
            return self.send_failed(&envelope, &address, err);
        }

        let response = handle.wait().await;
        match response.error() {
            ErrorCode::NOT_FOUND_ACTOR => Attempt::Relocated(
                response
                    .error_message()
                    .unwrap_or("actor not found")
                    .to_string(),
            ),
            ErrorCode::ACTOR_TIMEOUT | ErrorCode::ACTOR_REMOVED => Attempt::Failed(response),
            _ => Attempt::Delivered(Some(response)),
        }
    }

    fn send_failed(&self, envelope: &Envelope, address: &Address, err: MessagingError) -> Attempt {
        if err.is_not_found() {
            return Attempt::Relocated(err.to_string());
        }
        MessagingMetrics::incr(&self.deps.metrics.transport_failures);
        warn!(
            destination = %self.shared.target,
            %address,
            error = %err,
            "Transport rejected frame"
        );
        Attempt::Failed(failure_for(envelope, &err))
    }

    async fn resolve(&mut self) -> Result<(ActorId, Address)> {
        if self.actor_id.is_none() {
            if let ProxyTarget::Entity(entity_id) = self.shared.target {
                let actor_id = self.deps.location.resolve_actor(entity_id).await?;
                if actor_id.is_none() {
                    return Err(MessagingError::not_found(
                        actor_id,
                        format!("{} resolved to no actor", entity_id),
                    ));
                }
                debug!(entity_id = %entity_id, actor_id = %actor_id, "Entity resolved");
                self.actor_id = actor_id;
                self.shared
                    .resolved_actor
                    .store(actor_id.raw(), Ordering::Release);
            }
        }

        let address = match &self.address {
            Some(address) => address.clone(),
            None => {
                let address = self.deps.location.resolve_address(self.actor_id).await?;
                self.address = Some(address.clone());
                address
            }
        };
        Ok((self.actor_id, address))
    }

    fn invalidate(&mut self) {
        self.address = None;
        if !self.actor_id.is_none() {
            self.deps.location.invalidate(self.actor_id);
        }
        if let ProxyTarget::Entity(_) = self.shared.target {
            self.actor_id = ActorId::NONE;
        }
    }

    fn record_success(&mut self) {
        self.failures = 0;
        self.shared.failure_count.store(0, Ordering::Release);
        *self.shared.last_success.lock() = Some(Instant::now());
    }

    fn complete(&self, unit: OutboundUnit, response: Option<Envelope>) {
        match (unit.completion, response) {
            (Some(completion), Some(response)) => {
                let _ = completion.send(response);
            }
            (Some(completion), None) => {
                let _ = completion.send(Envelope::response_to(&unit.envelope, Bytes::new()));
            }
            (None, Some(response)) if response.is_error() => {
                warn!(
                    destination = %self.shared.target,
                    opcode = unit.envelope.opcode(),
                    error = %response.error(),
                    "One-way envelope dropped"
                );
            }
            (None, _) => {}
        }
    }

    fn fail(&self, unit: OutboundUnit, reason: &str) {
        let envelope = &unit.envelope;
        let response = Envelope::error_for(
            envelope.correlation_id(),
            envelope.actor_id(),
            envelope.opcode(),
            ErrorCode::NOT_FOUND_ACTOR,
            reason,
        );
        self.complete(unit, Some(response));
    }

    async fn teardown(self, mut queue: mpsc::UnboundedReceiver<OutboundUnit>, reason: StopReason) {
        self.shared.disposed.store(true, Ordering::Release);
        queue.close();

        let mut failed = 0usize;
        while let Some(unit) = queue.recv().await {
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
            self.fail(unit, "proxy torn down");
            failed += 1;
        }

        if reason == StopReason::Evicted {
            MessagingMetrics::incr(&self.deps.metrics.proxies_evicted);
            let hook = self.shared.evict_hook.lock().clone();
            if let Some(hook) = hook {
                hook(self.shared.target, self.shared.id);
            }
        }

        info!(
            destination = %self.shared.target,
            proxy_id = self.shared.id,
            ?reason,
            failed,
            "Proxy stopped"
        );
        self.shared.terminated.send_replace(true);
    }
}

fn failure_for(envelope: &Envelope, err: &MessagingError) -> Envelope {
    Envelope::error_for(
        envelope.correlation_id(),
        envelope.actor_id(),
        envelope.opcode(),
        err.error_code(),
        err.to_string(),
    )
}
