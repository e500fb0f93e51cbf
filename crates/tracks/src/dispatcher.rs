//! Background dispatcher that batches and sends queued events.
//!
//! One task per client owns the pending queue. Producers talk to it through an
//! unbounded channel, so enqueueing never blocks. The task sends once the
//! queue grows past the batch threshold (or on an explicit flush) and the
//! network is reachable. A send clears the queue up front; failed batches come
//! back through the in-flight set and still-valid events are re-appended.

use crate::env::{Clock, Connectivity, DeviceInfoProvider};
use crate::error::FailureKind;
use crate::message::build_record_payload;
use crate::queue::{EventQueue, RetryPolicy};
use crate::transport::Transport;
use crate::types::{Event, Properties};
use crate::Error;
use parking_lot::RwLock;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Client state read by the dispatcher at send time.
#[derive(Debug)]
pub(crate) struct SharedState {
    pub(crate) user_agent: RwLock<String>,
    pub(crate) user_properties: RwLock<Option<Properties>>,
}

impl SharedState {
    pub(crate) fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: RwLock::new(user_agent.into()),
            user_properties: RwLock::new(None),
        }
    }
}

#[derive(Debug)]
enum Command {
    Enqueue(Event),
    Flush,
    Pending(oneshot::Sender<usize>),
    WaitIdle(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Result of one batch send, handed back to the dispatcher.
struct SendOutcome {
    batch: Vec<Event>,
    result: Result<(), Error>,
}

/// Everything the dispatcher needs besides its channel.
pub(crate) struct DispatcherParts {
    pub(crate) batch_threshold: usize,
    pub(crate) policy: RetryPolicy,
    pub(crate) connectivity: Arc<dyn Connectivity>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) device_info: Arc<dyn DeviceInfoProvider>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) shared: Arc<SharedState>,
}

/// Producer side of the dispatcher.
#[derive(Debug, Clone)]
pub(crate) struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl DispatcherHandle {
    /// Append an event and let the dispatcher decide whether to send.
    pub(crate) fn enqueue(&self, event: Event) -> Result<(), Error> {
        self.tx
            .send(Command::Enqueue(event))
            .map_err(|_| Error::Shutdown)
    }

    /// Ask for an immediate send of everything queued.
    pub(crate) fn flush(&self) -> Result<(), Error> {
        self.tx.send(Command::Flush).map_err(|_| Error::Shutdown)
    }

    /// Number of events waiting in the queue.
    pub(crate) async fn pending(&self) -> Result<usize, Error> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(Command::Pending(ack))
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Resolve once no send is in flight.
    pub(crate) async fn wait_idle(&self) -> Result<(), Error> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(Command::WaitIdle(ack))
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Send what is left, wait for in-flight sends and stop the task.
    pub(crate) async fn shutdown(&self) -> Result<(), Error> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(ack))
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }
}

pub(crate) struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Command>,
    queue: EventQueue,
    in_flight: JoinSet<SendOutcome>,
    idle_waiters: Vec<oneshot::Sender<()>>,
    parts: DispatcherParts,
}

impl Dispatcher {
    /// Spawn the dispatcher on the current tokio runtime.
    pub(crate) fn spawn(parts: DispatcherParts) -> (DispatcherHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            rx,
            queue: EventQueue::new(),
            in_flight: JoinSet::new(),
            idle_waiters: Vec::new(),
            parts,
        };
        let handle = tokio::spawn(dispatcher.run());
        (DispatcherHandle { tx }, handle)
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => {
                        if let ControlFlow::Break(ack) = self.handle(command) {
                            self.shutdown().await;
                            let _ = ack.send(());
                            break;
                        }
                    }
                    None => {
                        // every handle dropped
                        self.shutdown().await;
                        break;
                    }
                },
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.on_send_complete(joined);
                }
            }

            if self.in_flight.is_empty() {
                for waiter in self.idle_waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
        }
        debug!("dispatcher stopped");
    }

    /// Apply one command. Breaks with the acknowledgement on shutdown.
    fn handle(&mut self, command: Command) -> ControlFlow<oneshot::Sender<()>> {
        match command {
            Command::Enqueue(event) => {
                self.queue.enqueue(event);
                self.maybe_transmit();
            }
            Command::Flush => {
                if self.parts.connectivity.is_available() {
                    self.transmit();
                } else {
                    debug!(pending = self.queue.len(), "network unavailable, skipping flush");
                }
            }
            Command::Pending(ack) => {
                let _ = ack.send(self.queue.len());
            }
            Command::WaitIdle(ack) => self.idle_waiters.push(ack),
            Command::Shutdown(ack) => return ControlFlow::Break(ack),
        }
        ControlFlow::Continue(())
    }

    fn maybe_transmit(&mut self) {
        if self.queue.exceeds(self.parts.batch_threshold) && self.parts.connectivity.is_available()
        {
            self.transmit();
        }
    }

    /// Snapshot the queue, clear it and send the batch in the background.
    fn transmit(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        let events = self.queue.drain();
        let user_properties = self.parts.shared.user_properties.read().clone();
        let (payload, batch) = build_record_payload(
            events,
            self.parts.device_info.as_ref(),
            user_properties.as_ref(),
        );
        if batch.is_empty() {
            return;
        }

        info!(event_count = batch.len(), "sending batch");

        let transport = self.parts.transport.clone();
        let user_agent = self.parts.shared.user_agent.read().clone();
        self.in_flight.spawn(async move {
            let result = transport.send(&payload, &user_agent).await;
            SendOutcome { batch, result }
        });
    }

    fn on_send_complete(&mut self, joined: Result<SendOutcome, JoinError>) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "send task failed, batch lost");
                return;
            }
        };

        let error = match outcome.result {
            Ok(()) => {
                debug!(event_count = outcome.batch.len(), "batch delivered");
                return;
            }
            Err(error) => error,
        };

        match error.failure_kind() {
            FailureKind::Timeout => warn!(error = %error, "batch send timed out"),
            FailureKind::Server => warn!(error = %error, "server rejected batch"),
            FailureKind::Network => warn!(error = %error, "network error sending batch"),
            FailureKind::Other => warn!(error = %error, "batch send failed"),
        }

        let now = self.parts.clock.now_ms();
        let (keep, dropped) = self.parts.policy.reconcile(outcome.batch, now);
        if dropped > 0 {
            debug!(dropped, "dropping events past their retry budget");
        }
        if keep.is_empty() {
            return;
        }

        debug!(requeued = keep.len(), "requeuing events");
        self.queue.requeue(keep);
        self.maybe_transmit();
    }

    async fn shutdown(&mut self) {
        if self.parts.connectivity.is_available() {
            self.transmit();
        } else if !self.queue.is_empty() {
            warn!(pending = self.queue.len(), "network unavailable at shutdown, events lost");
        }

        while let Some(joined) = self.in_flight.join_next().await {
            match joined {
                Ok(SendOutcome { result: Ok(()), .. }) => {}
                Ok(SendOutcome {
                    batch,
                    result: Err(e),
                }) => {
                    warn!(error = %e, event_count = batch.len(), "final send failed, events lost");
                }
                Err(e) => error!(error = %e, "send task failed during shutdown"),
            }
        }

        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::StaticDeviceInfo;
    use crate::types::{IdentityKind, RecordPayload};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    const NOW: i64 = 1706400000000;

    /// Records every batch; fails while `fail` is set. When `gated`, each
    /// send waits for a permit on `gate`.
    #[derive(Clone)]
    struct FakeTransport {
        batches: Arc<Mutex<Vec<RecordPayload>>>,
        fail: Arc<AtomicBool>,
        gate: Arc<Semaphore>,
        gated: bool,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                batches: Arc::new(Mutex::new(Vec::new())),
                fail: Arc::new(AtomicBool::new(false)),
                gate: Arc::new(Semaphore::new(0)),
                gated: false,
            }
        }

        fn gated() -> Self {
            Self {
                gated: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> usize {
            self.batches.lock().len()
        }

        fn names(&self, call: usize) -> Vec<String> {
            self.batches.lock()[call]
                .events
                .iter()
                .map(|e| e["_en"].clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, payload: &RecordPayload, _user_agent: &str) -> Result<(), Error> {
            self.batches.lock().push(payload.clone());
            if self.gated {
                if let Ok(permit) = self.gate.acquire().await {
                    permit.forget();
                }
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(())
        }
    }

    struct FixedClock;

    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            NOW
        }
    }

    fn spawn(transport: &FakeTransport, online: Arc<AtomicBool>) -> DispatcherHandle {
        let parts = DispatcherParts {
            batch_threshold: 5,
            policy: RetryPolicy::new(2, Duration::from_secs(3600)),
            connectivity: Arc::new(move || online.load(Ordering::SeqCst)),
            clock: Arc::new(FixedClock),
            device_info: Arc::new(StaticDeviceInfo::new().immutable("os", "android")),
            transport: Arc::new(transport.clone()),
            shared: Arc::new(SharedState::new("ua")),
        };
        Dispatcher::spawn(parts).0
    }

    fn event(name: &str) -> Event {
        Event::new(name, "alice", IdentityKind::Authenticated, "ua", NOW)
    }

    #[tokio::test]
    async fn test_no_send_at_or_below_threshold() {
        let transport = FakeTransport::new();
        let handle = spawn(&transport, Arc::new(AtomicBool::new(true)));

        for i in 0..5 {
            handle.enqueue(event(&format!("e{}", i))).unwrap();
        }
        handle.wait_idle().await.unwrap();

        assert_eq!(transport.calls(), 0);
        assert_eq!(handle.pending().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_threshold_sends_snapshot_once() {
        let transport = FakeTransport::new();
        let handle = spawn(&transport, Arc::new(AtomicBool::new(true)));

        for i in 0..6 {
            handle.enqueue(event(&format!("e{}", i))).unwrap();
        }
        assert_eq!(handle.pending().await.unwrap(), 0);

        handle.enqueue(event("late")).unwrap();
        handle.wait_idle().await.unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(transport.names(0).len(), 6);
        assert_eq!(handle.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_threshold_waits_for_network() {
        let transport = FakeTransport::new();
        let online = Arc::new(AtomicBool::new(false));
        let handle = spawn(&transport, online.clone());

        for i in 0..6 {
            handle.enqueue(event(&format!("e{}", i))).unwrap();
        }
        handle.wait_idle().await.unwrap();
        assert_eq!(transport.calls(), 0);

        online.store(true, Ordering::SeqCst);
        handle.enqueue(event("e6")).unwrap();
        handle.wait_idle().await.unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(transport.names(0).len(), 7);
    }

    #[tokio::test]
    async fn test_flush_ignores_threshold() {
        let transport = FakeTransport::new();
        let handle = spawn(&transport, Arc::new(AtomicBool::new(true)));

        handle.enqueue(event("only")).unwrap();
        handle.flush().unwrap();
        handle.wait_idle().await.unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(transport.names(0), ["only"]);
    }

    #[tokio::test]
    async fn test_flush_empty_or_offline_is_noop() {
        let transport = FakeTransport::new();
        let online = Arc::new(AtomicBool::new(true));
        let handle = spawn(&transport, online.clone());

        handle.flush().unwrap();
        handle.wait_idle().await.unwrap();
        assert_eq!(transport.calls(), 0);

        online.store(false, Ordering::SeqCst);
        handle.enqueue(event("queued")).unwrap();
        handle.flush().unwrap();
        handle.wait_idle().await.unwrap();

        assert_eq!(transport.calls(), 0);
        assert_eq!(handle.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_requeues_in_order_after_concurrent_enqueues() {
        let transport = FakeTransport::gated();
        transport.fail.store(true, Ordering::SeqCst);
        let handle = spawn(&transport, Arc::new(AtomicBool::new(true)));

        handle.enqueue(event("a")).unwrap();
        handle.enqueue(event("b")).unwrap();
        handle.flush().unwrap();
        assert_eq!(handle.pending().await.unwrap(), 0);

        // arrives while the failing batch is in flight
        handle.enqueue(event("c")).unwrap();
        assert_eq!(handle.pending().await.unwrap(), 1);

        transport.gate.add_permits(1);
        handle.wait_idle().await.unwrap();
        assert_eq!(handle.pending().await.unwrap(), 3);

        transport.fail.store(false, Ordering::SeqCst);
        transport.gate.add_permits(1);
        handle.flush().unwrap();
        handle.wait_idle().await.unwrap();

        assert_eq!(transport.calls(), 2);
        assert_eq!(transport.names(1), ["c", "a", "b"]);
        assert_eq!(handle.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_events_dropped_after_retry_budget() {
        let transport = FakeTransport::new();
        transport.fail.store(true, Ordering::SeqCst);
        let handle = spawn(&transport, Arc::new(AtomicBool::new(true)));

        handle.enqueue(event("doomed")).unwrap();

        // max_retries = 2: the first attempt plus two resends
        for expected_pending in [1, 1, 0] {
            handle.flush().unwrap();
            handle.wait_idle().await.unwrap();
            assert_eq!(handle.pending().await.unwrap(), expected_pending);
        }

        handle.flush().unwrap();
        handle.wait_idle().await.unwrap();
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_sends_remaining() {
        let transport = FakeTransport::new();
        let handle = spawn(&transport, Arc::new(AtomicBool::new(true)));

        handle.enqueue(event("last")).unwrap();
        handle.shutdown().await.unwrap();

        assert_eq!(transport.calls(), 1);
        assert!(matches!(handle.enqueue(event("late")), Err(Error::Shutdown)));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_and_sends_rest() {
        let transport = FakeTransport::gated();
        let handle = spawn(&transport, Arc::new(AtomicBool::new(true)));

        handle.enqueue(event("first")).unwrap();
        handle.flush().unwrap();
        handle.enqueue(event("second")).unwrap();
        assert_eq!(handle.pending().await.unwrap(), 1);

        transport.gate.add_permits(2);
        handle.shutdown().await.unwrap();

        assert_eq!(transport.calls(), 2);
        assert_eq!(transport.names(0), ["first"]);
        assert_eq!(transport.names(1), ["second"]);
        assert!(matches!(handle.pending().await, Err(Error::Shutdown)));
    }

    #[tokio::test]
    async fn test_common_props_use_current_user_properties() {
        let transport = FakeTransport::new();
        let online = Arc::new(AtomicBool::new(true));
        let shared = Arc::new(SharedState::new("custom-agent"));
        let parts = DispatcherParts {
            batch_threshold: 5,
            policy: RetryPolicy::new(2, Duration::from_secs(3600)),
            connectivity: Arc::new(move || online.load(Ordering::SeqCst)),
            clock: Arc::new(FixedClock),
            device_info: Arc::new(StaticDeviceInfo::new()),
            transport: Arc::new(transport.clone()),
            shared: shared.clone(),
        };
        let (handle, _) = Dispatcher::spawn(parts);

        *shared.user_properties.write() =
            Some(Properties::from([("plan".into(), "pro".into())]));
        handle.enqueue(event("e")).unwrap();
        handle.flush().unwrap();
        handle.wait_idle().await.unwrap();

        let batches = transport.batches.lock();
        assert_eq!(batches[0].common_props.get("user_info_plan").unwrap(), "pro");
    }
}
