//! Pending Call Table
//!
//! Maps a correlation id to the waiter of an in-flight RPC. Every registered
//! call completes exactly once: by its response, by the timeout sweep, or by
//! [`PendingCallTable::fail_all`] at shutdown. Whichever comes first removes
//! the entry, so a response arriving after a timeout is discarded.
//!
//! Correlation ids are 32-bit and wrap around; zero is reserved for
//! fire-and-forget envelopes and ids still pending are skipped.

use crate::metrics::MessagingMetrics;
use crate::{MessagingError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use types::{ActorId, Envelope, ErrorCode};

struct PendingCall {
    actor_id: ActorId,
    opcode: u16,
    deadline: Instant,
    completion: oneshot::Sender<Envelope>,
}

/// Waiter for one registered call
#[derive(Debug)]
pub struct CallHandle {
    correlation_id: i32,
    actor_id: ActorId,
    opcode: u16,
    receiver: oneshot::Receiver<Envelope>,
}

impl CallHandle {
    pub fn correlation_id(&self) -> i32 {
        self.correlation_id
    }

    /// Wait for the response, timeout or shutdown answer
    pub async fn wait(self) -> Envelope {
        match self.receiver.await {
            Ok(response) => response,
            Err(_) => Envelope::error_for(
                self.correlation_id,
                self.actor_id,
                self.opcode,
                ErrorCode::ACTOR_REMOVED,
                "pending call table dropped",
            ),
        }
    }
}

/// Correlation table shared by every proxy of a messaging system
pub struct PendingCallTable {
    next_id: AtomicI32,
    entries: Mutex<HashMap<i32, PendingCall>>,
    metrics: Arc<MessagingMetrics>,
}

impl PendingCallTable {
    pub fn new(metrics: Arc<MessagingMetrics>) -> Self {
        Self::starting_at(1, metrics)
    }

    /// Table whose first correlation id is `first_id`
    pub fn starting_at(first_id: i32, metrics: Arc<MessagingMetrics>) -> Self {
        Self {
            next_id: AtomicI32::new(first_id),
            entries: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Next free correlation id, never zero and never one still pending
    pub fn next_correlation_id(&self) -> i32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !self.entries.lock().contains_key(&id) {
                return id;
            }
        }
    }

    /// Track a call to `actor_id` until `deadline`
    pub fn register(
        &self,
        correlation_id: i32,
        actor_id: ActorId,
        opcode: u16,
        deadline: Instant,
    ) -> Result<CallHandle> {
        if correlation_id == 0 {
            return Err(MessagingError::configuration(
                "correlation id 0 is reserved for one-way envelopes",
                Some("correlation_id"),
            ));
        }

        let (completion, receiver) = oneshot::channel();
        {
            let mut entries = self.entries.lock();
            if entries.contains_key(&correlation_id) {
                return Err(MessagingError::configuration(
                    format!("correlation id {} already pending", correlation_id),
                    Some("correlation_id"),
                ));
            }
            entries.insert(
                correlation_id,
                PendingCall {
                    actor_id,
                    opcode,
                    deadline,
                    completion,
                },
            );
        }
        MessagingMetrics::incr(&self.metrics.calls_started);

        Ok(CallHandle {
            correlation_id,
            actor_id,
            opcode,
            receiver,
        })
    }

    /// Complete the matching call with `response`
    ///
    /// Returns false for unknown ids: late responses after a timeout, or
    /// duplicates. Those are discarded.
    pub fn resolve(&self, response: Envelope) -> bool {
        let correlation_id = response.correlation_id();
        let Some(call) = self.entries.lock().remove(&correlation_id) else {
            MessagingMetrics::incr(&self.metrics.late_responses);
            warn!(
                correlation_id,
                actor_id = %response.actor_id(),
                error = %response.error(),
                "Response without pending call, discarded"
            );
            return false;
        };

        MessagingMetrics::incr(&self.metrics.calls_completed);
        if call.completion.send(response).is_err() {
            debug!(correlation_id, "Caller went away before the response arrived");
        }
        true
    }

    /// Drop a call without answering it; the caller already gave up
    pub fn cancel(&self, correlation_id: i32) -> bool {
        self.entries.lock().remove(&correlation_id).is_some()
    }

    /// Answer every call whose deadline is at or before `now` with `ActorTimeout`
    pub fn sweep_timeouts(&self, now: Instant) -> usize {
        let expired: Vec<(i32, PendingCall)> = {
            let mut entries = self.entries.lock();
            let ids: Vec<i32> = entries
                .iter()
                .filter(|(_, call)| call.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|call| (id, call)))
                .collect()
        };

        let count = expired.len();
        for (correlation_id, call) in expired {
            debug!(correlation_id, actor_id = %call.actor_id, "Call timed out");
            MessagingMetrics::incr(&self.metrics.calls_timed_out);
            let _ = call.completion.send(Envelope::error_for(
                correlation_id,
                call.actor_id,
                call.opcode,
                ErrorCode::ACTOR_TIMEOUT,
                format!("no response from {} before deadline", call.actor_id),
            ));
        }
        if count > 0 {
            warn!(count, "Pending calls timed out");
        }
        count
    }

    /// Answer every pending call with `code`, used at shutdown
    pub fn fail_all(&self, code: ErrorCode, message: &str) -> usize {
        let drained: Vec<(i32, PendingCall)> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (correlation_id, call) in drained {
            let _ = call.completion.send(Envelope::error_for(
                correlation_id,
                call.actor_id,
                call.opcode,
                code,
                message,
            ));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`Self::sweep_timeouts`] every `interval` until `shutdown` flips
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let table = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Pending call sweeper started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    _ = ticker.tick() => {
                        table.sweep_timeouts(Instant::now());
                    }
                }
            }
            debug!("Pending call sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use types::ProcessId;

    fn table() -> PendingCallTable {
        PendingCallTable::new(Arc::new(MessagingMetrics::default()))
    }

    fn actor() -> ActorId {
        ActorId::new(ProcessId::new(3), 5)
    }

    fn later(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn test_response_completes_call() {
        let table = table();
        let id = table.next_correlation_id();
        let handle = table.register(id, actor(), 10, later(10_000)).unwrap();

        let request = Envelope::request(actor(), 10, Bytes::new()).with_correlation_id(id);
        assert!(table.resolve(Envelope::response_to(&request, Bytes::from_static(b"pong"))));

        let response = handle.wait().await;
        assert_eq!(response.payload().as_ref(), b"pong");
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_discarded() {
        let table = table();
        let handle = table.register(7, actor(), 10, later(50)).unwrap();

        assert_eq!(table.sweep_timeouts(Instant::now()), 0);
        assert_eq!(table.sweep_timeouts(later(100)), 1);

        let response = handle.wait().await;
        assert_eq!(response.error(), ErrorCode::ACTOR_TIMEOUT);
        assert_eq!(response.correlation_id(), 7);

        let request = Envelope::request(actor(), 10, Bytes::new()).with_correlation_id(7);
        assert!(!table.resolve(Envelope::response_to(&request, Bytes::new())));
        assert_eq!(table.metrics.snapshot().late_responses, 1);
        assert_eq!(table.metrics.snapshot().calls_timed_out, 1);
    }

    #[tokio::test]
    async fn test_sweep_only_touches_expired_calls() {
        let table = table();
        let soon = table.register(1, actor(), 1, later(10)).unwrap();
        let _far = table.register(2, actor(), 1, later(60_000)).unwrap();

        assert_eq!(table.sweep_timeouts(later(20)), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(soon.wait().await.error(), ErrorCode::ACTOR_TIMEOUT);
    }

    #[test]
    fn test_duplicate_and_zero_ids_rejected() {
        let table = table();
        table.register(4, actor(), 1, later(1000)).unwrap();
        assert!(table.register(4, actor(), 1, later(1000)).is_err());
        assert!(table.register(0, actor(), 1, later(1000)).is_err());
    }

    #[test]
    fn test_ids_wrap_skipping_zero_and_pending() {
        let table = PendingCallTable::starting_at(i32::MAX, Arc::new(MessagingMetrics::default()));
        table.register(i32::MIN + 1, actor(), 1, later(1000)).unwrap();

        assert_eq!(table.next_correlation_id(), i32::MAX);
        // i32::MIN is free, i32::MIN + 1 is pending
        assert_eq!(table.next_correlation_id(), i32::MIN);
        assert_eq!(table.next_correlation_id(), i32::MIN + 2);

        let table = PendingCallTable::starting_at(-1, Arc::new(MessagingMetrics::default()));
        assert_eq!(table.next_correlation_id(), -1);
        assert_eq!(table.next_correlation_id(), 1);
    }

    #[tokio::test]
    async fn test_fail_all_answers_everyone() {
        let table = table();
        let a = table.register(1, actor(), 1, later(1000)).unwrap();
        let b = table.register(2, actor(), 1, later(1000)).unwrap();

        assert_eq!(table.fail_all(ErrorCode::ACTOR_REMOVED, "shutting down"), 2);
        assert_eq!(a.wait().await.error(), ErrorCode::ACTOR_REMOVED);
        assert_eq!(b.wait().await.error(), ErrorCode::ACTOR_REMOVED);
    }

    #[tokio::test]
    async fn test_sweeper_task_times_out_calls() {
        let table = Arc::new(table());
        let (stop_tx, stop_rx) = watch::channel(false);
        let sweeper = table.spawn_sweeper(Duration::from_millis(10), stop_rx);

        let handle = table.register(11, actor(), 2, later(20)).unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap();
        assert_eq!(response.error(), ErrorCode::ACTOR_TIMEOUT);

        stop_tx.send_replace(true);
        sweeper.await.unwrap();
    }

    proptest! {
        #[test]
        fn prop_outstanding_ids_are_unique(start in any::<i32>(), count in 1usize..200) {
            let table = PendingCallTable::starting_at(start, Arc::new(MessagingMetrics::default()));
            let deadline = later(60_000);
            let mut seen = HashSet::new();
            for _ in 0..count {
                let id = table.next_correlation_id();
                prop_assert_ne!(id, 0);
                prop_assert!(seen.insert(id));
                table.register(id, actor(), 1, deadline).unwrap();
            }
        }
    }
}
