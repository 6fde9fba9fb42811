//! Lifecycle-aware event routing.
//!
//! Every [`DispatchEnvelope`] is routed exactly once:
//!
//! - **Live**: the application can receive events now. The envelope is
//!   emitted on the [`EventBus`] synchronously, fire-and-forget.
//! - **Suspended**: the envelope is flattened into a [`DeferredRecord`] and
//!   queued for the deferral worker, which submits it to the
//!   [`DeferredSink`] with retry and backoff until it is accepted.
//!
//! The route decision and the enqueue happen under one lock. A region that
//! still has records waiting on the sink keeps routing into the deferred
//! path, so a live event never overtakes an earlier deferred event of the
//! same region.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::error::BeaconError;
use crate::types::{BusEvent, DeferredRecord, DispatchEnvelope};

// =============================================================================
// Capabilities
// =============================================================================

/// Reports whether the host application is currently suspended.
///
/// Queried on every dispatch; implementations must be cheap and non-blocking.
pub trait LifecycleSource: Send + Sync {
    /// Returns `true` while the application cannot receive live events.
    fn is_suspended(&self) -> bool;
}

/// Live event channel into the running application.
pub trait EventBus: Send + Sync {
    /// Emits `event`. Delivery is best-effort and never reported back.
    fn emit(&self, event: BusEvent);
}

/// Failure reported by a [`DeferredSink`].
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    /// Worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Will never succeed; the record is abandoned.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Backoff schedule for deferred submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Give up after this many attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Deferred-delivery collaborator with an at-least-once contract.
///
/// Whatever sits behind it (a job queue, a spool directory, a remote
/// endpoint) must eventually hand each accepted record to the application,
/// even if the process is restarted in between.
#[async_trait]
pub trait DeferredSink: Send + Sync {
    /// Accepts `record` for later delivery.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Transient`] to be retried, or
    /// [`SubmitError::Rejected`] to abandon the record.
    async fn submit(&self, record: &DeferredRecord) -> Result<(), SubmitError>;

    /// Backoff schedule used for this sink.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Called once for a record that will never be delivered.
    fn on_abandoned(&self, _record: &DeferredRecord, _error: &BeaconError) {}
}

/// How envelopes are routed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Emit live while the application is live, defer while suspended.
    #[default]
    LiveOrDeferred,
    /// Defer everything. For headless hosts without a live bus consumer.
    DeferredOnly,
}

// =============================================================================
// Stock capabilities
// =============================================================================

/// A [`LifecycleSource`] backed by a flag the host flips.
#[derive(Debug, Default)]
pub struct LifecycleFlag {
    suspended: AtomicBool,
}

impl LifecycleFlag {
    /// Creates a flag with the given initial state.
    #[must_use]
    pub const fn new(suspended: bool) -> Self {
        Self {
            suspended: AtomicBool::new(suspended),
        }
    }

    /// Marks the application suspended or live.
    pub fn set_suspended(&self, suspended: bool) {
        let previous = self.suspended.swap(suspended, Ordering::SeqCst);
        if previous != suspended {
            info!(suspended, "Application lifecycle changed");
        }
    }
}

impl LifecycleSource for LifecycleFlag {
    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }
}

/// An [`EventBus`] over a tokio broadcast channel.
///
/// Also a [`LifecycleSource`]: with no subscriber attached nobody can
/// receive live events, which counts as suspended.
#[derive(Debug)]
pub struct BroadcastBus {
    sender: broadcast::Sender<BusEvent>,
}

impl BroadcastBus {
    /// Creates a bus buffering up to `capacity` events per slow subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Attaches a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventBus for BroadcastBus {
    fn emit(&self, event: BusEvent) {
        let name = event.event.clone();
        if self.sender.send(event).is_err() {
            debug!(event = %name, "No live subscriber for event");
        }
    }
}

impl LifecycleSource for BroadcastBus {
    fn is_suspended(&self) -> bool {
        self.subscriber_count() == 0
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// How long [`Dispatcher::flush`] and [`Dispatcher::shutdown`] wait for the
/// deferred queue to drain by default.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

const SHUTDOWN_ABANDON_MESSAGE: &str = "dispatcher shut down before the record was accepted";

enum DeferralCommand {
    Submit(DeferredRecord),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

struct Routing {
    /// Records per region identifier not yet accepted or abandoned.
    pending: HashMap<String, usize>,
    commands: Option<mpsc::UnboundedSender<DeferralCommand>>,
}

enum Route {
    Live(DispatchEnvelope),
    Deferred,
    Fallback(DeferredRecord),
}

/// Routes envelopes to the live bus or the deferred sink.
pub struct Dispatcher {
    policy: DeliveryPolicy,
    lifecycle: Arc<dyn LifecycleSource>,
    bus: Arc<dyn EventBus>,
    sink: Arc<dyn DeferredSink>,
    routing: Arc<Mutex<Routing>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<DeferralCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: watch::Sender<bool>,
    drain_timeout: Duration,
    persistent_scanning: AtomicBool,
}

impl Dispatcher {
    /// Creates a dispatcher. Deferred records queue up until [`start`](Self::start).
    #[must_use]
    pub fn new(
        policy: DeliveryPolicy,
        lifecycle: Arc<dyn LifecycleSource>,
        bus: Arc<dyn EventBus>,
        sink: Arc<dyn DeferredSink>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (cancel, _) = watch::channel(false);
        Self {
            policy,
            lifecycle,
            bus,
            sink,
            routing: Arc::new(Mutex::new(Routing {
                pending: HashMap::new(),
                commands: Some(sender),
            })),
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
            cancel,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            persistent_scanning: AtomicBool::new(false),
        }
    }

    /// Bounds how long flush and shutdown wait for the deferred queue.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Spawns the deferral worker on the current tokio runtime.
    ///
    /// Calling it again is a no-op.
    pub fn start(&self) {
        let Some(receiver) = self.receiver.lock().take() else {
            return;
        };
        let handle = tokio::spawn(run_worker(
            receiver,
            Arc::clone(&self.sink),
            Arc::clone(&self.routing),
            self.cancel.subscribe(),
        ));
        *self.worker.lock() = Some(handle);
        debug!(policy = ?self.policy, "Deferral worker started");
    }

    /// Active delivery policy.
    #[must_use]
    pub const fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    /// Routes one envelope.
    pub fn dispatch(&self, envelope: DispatchEnvelope) {
        let tag = envelope.tag();
        let identifier = envelope.region().identifier.clone();

        let route = {
            let mut routing = self.routing.lock();
            let backlog = routing.pending.get(&identifier).copied().unwrap_or(0);
            let defer = self.policy == DeliveryPolicy::DeferredOnly
                || backlog > 0
                || self.lifecycle.is_suspended();

            if defer {
                let command = DeferralCommand::Submit(envelope.into_deferred_record());
                let sent = match &routing.commands {
                    Some(commands) => commands.send(command).map_err(|e| e.0),
                    None => Err(command),
                };
                match sent {
                    Ok(()) => {
                        *routing.pending.entry(identifier.clone()).or_insert(0) += 1;
                        Route::Deferred
                    }
                    Err(command) => {
                        routing.commands = None;
                        match command {
                            DeferralCommand::Submit(record) => Route::Fallback(record),
                            DeferralCommand::Flush(_) | DeferralCommand::Shutdown(_) => {
                                Route::Deferred
                            }
                        }
                    }
                }
            } else {
                Route::Live(envelope)
            }
        };

        match route {
            Route::Live(envelope) => {
                debug!(region = %identifier, event = %tag, "Emitting live");
                self.bus.emit(envelope.into_bus_event());
            }
            Route::Deferred => {
                debug!(
                    region = %identifier,
                    event = %tag,
                    persistent_scanning = self.persistent_scanning(),
                    "Deferred event"
                );
            }
            Route::Fallback(record) => {
                error!(
                    region = %identifier,
                    event = %tag,
                    "Deferral worker unavailable, emitting live instead"
                );
                self.bus.emit(record.into_bus_event());
            }
        }
    }

    /// Emits a notice on the live bus regardless of lifecycle.
    pub fn announce(&self, event: BusEvent) {
        debug!(event = %event.event, "Announcing");
        self.bus.emit(event);
    }

    /// Records not yet accepted or abandoned, across all regions.
    #[must_use]
    pub fn pending_deferrals(&self) -> usize {
        self.routing.lock().pending.values().sum()
    }

    /// Sets the persistent-scanning hint. Routing is unaffected.
    pub fn set_persistent_scanning(&self, enabled: bool) {
        self.persistent_scanning.store(enabled, Ordering::SeqCst);
    }

    /// Current persistent-scanning hint.
    #[must_use]
    pub fn persistent_scanning(&self) -> bool {
        self.persistent_scanning.load(Ordering::SeqCst)
    }

    /// Waits until every record deferred before this call has been accepted
    /// or abandoned, for at most the drain timeout.
    ///
    /// Returns `false` if records were still pending when the wait ended.
    pub async fn flush(&self) -> bool {
        if self.worker.lock().is_none() {
            warn!("Flush requested while the deferral worker is not running");
            return self.pending_deferrals() == 0;
        }
        let (ack, done) = oneshot::channel();
        let sent = self
            .routing
            .lock()
            .commands
            .as_ref()
            .is_some_and(|commands| commands.send(DeferralCommand::Flush(ack)).is_ok());
        if !sent {
            return self.pending_deferrals() == 0;
        }
        match tokio::time::timeout(self.drain_timeout, done).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => self.pending_deferrals() == 0,
            Err(_) => {
                warn!(
                    timeout_ms = millis(self.drain_timeout),
                    pending = self.pending_deferrals(),
                    "Flush timed out with deferred records still pending"
                );
                false
            }
        }
    }

    /// Drains the queue, then stops the worker.
    ///
    /// Records still unaccepted when the drain timeout expires are abandoned
    /// through [`DeferredSink::on_abandoned`]. Envelopes dispatched afterwards
    /// fall back to live emission.
    pub async fn shutdown(&self) {
        let commands = self.routing.lock().commands.take();
        let Some(commands) = commands else {
            return;
        };
        let (ack, done) = oneshot::channel();
        let sent = commands.send(DeferralCommand::Shutdown(ack)).is_ok();
        drop(commands);

        let handle = self.worker.lock().take();
        let Some(mut handle) = handle else {
            self.abandon_queued();
            info!("Dispatcher shut down");
            return;
        };

        if sent && tokio::time::timeout(self.drain_timeout, done).await.is_err() {
            error!(
                timeout_ms = millis(self.drain_timeout),
                pending = self.pending_deferrals(),
                "Deferred queue did not drain in time, abandoning remaining records"
            );
            self.cancel.send_replace(true);
        }
        match tokio::time::timeout(self.drain_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Deferral worker panicked"),
            Err(_) => {
                error!(
                    pending = self.pending_deferrals(),
                    "Deferral worker did not stop, aborting it"
                );
                handle.abort();
            }
        }
        info!("Dispatcher shut down");
    }

    /// Abandons records queued for a worker that never started.
    fn abandon_queued(&self) {
        let Some(mut receiver) = self.receiver.lock().take() else {
            return;
        };
        while let Ok(command) = receiver.try_recv() {
            if let DeferralCommand::Submit(record) = command {
                abandon(
                    self.sink.as_ref(),
                    &record,
                    0,
                    SHUTDOWN_ABANDON_MESSAGE.to_string(),
                );
                release(&self.routing, &record.identifier);
            }
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<DeferralCommand>,
    sink: Arc<dyn DeferredSink>,
    routing: Arc<Mutex<Routing>>,
    mut cancel: watch::Receiver<bool>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            DeferralCommand::Submit(record) => {
                deliver(sink.as_ref(), &record, &mut cancel).await;
                release(&routing, &record.identifier);
            }
            DeferralCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            DeferralCommand::Shutdown(ack) => {
                let _ = ack.send(());
                break;
            }
        }
    }
    debug!("Deferral worker stopped");
}

/// Cancelled once shutdown gives up on draining, or the dispatcher is gone.
fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow() || cancel.has_changed().is_err()
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

async fn deliver(
    sink: &dyn DeferredSink,
    record: &DeferredRecord,
    cancel: &mut watch::Receiver<bool>,
) {
    let policy = sink.retry_policy();
    let mut attempt = 0u32;
    loop {
        if is_cancelled(cancel) {
            abandon(sink, record, attempt, SHUTDOWN_ABANDON_MESSAGE.to_string());
            return;
        }
        attempt += 1;
        let result = tokio::select! {
            result = sink.submit(record) => result,
            () = cancelled(cancel) => {
                abandon(sink, record, attempt, SHUTDOWN_ABANDON_MESSAGE.to_string());
                return;
            }
        };
        match result {
            Ok(()) => {
                debug!(
                    id = %record.id,
                    region = %record.identifier,
                    event = record.event.as_str(),
                    attempt,
                    "Deferred record accepted"
                );
                return;
            }
            Err(SubmitError::Rejected(message)) => {
                abandon(sink, record, attempt, message);
                return;
            }
            Err(SubmitError::Transient(message)) => {
                if policy.max_attempts.is_some_and(|max| attempt >= max) {
                    abandon(sink, record, attempt, message);
                    return;
                }
                let delay = policy.backoff(attempt);
                warn!(
                    id = %record.id,
                    region = %record.identifier,
                    attempt,
                    delay_ms = millis(delay),
                    error = %message,
                    "Deferred submission failed, retrying"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancelled(cancel) => {}
                }
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn abandon(sink: &dyn DeferredSink, record: &DeferredRecord, attempts: u32, message: String) {
    let error = BeaconError::SubmissionFailed { attempts, message };
    error!(
        id = %record.id,
        region = %record.identifier,
        event = record.event.as_str(),
        error = %error,
        "Abandoning deferred record"
    );
    sink.on_abandoned(record, &error);
}

fn release(routing: &Mutex<Routing>, identifier: &str) {
    let mut routing = routing.lock();
    if let Some(count) = routing.pending.get_mut(identifier) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            routing.pending.remove(identifier);
        }
    }
}
