//! Ordered pub/sub keyed by event name.
//!
//! Every component that needs lifecycle notification owns an [`EventBus`]:
//! the scheduler, each job, and each segment. Handlers are plain closures
//! that run synchronously, in registration order, and return a
//! [`HookResult`]. Most events ignore those results; the vetoable ones
//! (see [`crate::veto`]) read them as a continuation vote.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use segload_transfer::BoxFuture;
use serde_json::Value;
use tracing::trace;

use crate::job::TransferJob;
use crate::status::JobStatus;

/// Names of every event the uploader emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventName {
    Select,
    CountExceed,
    SizeExceed,
    BeforeRemove,
    Remove,
    BeforeChunk,
    AfterChunk,
    BeforeHash,
    AfterHash,
    StatusChange,
    Progress,
    Success,
    Error,
    BeforeUpload,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::CountExceed => "countExceed",
            Self::SizeExceed => "sizeExceed",
            Self::BeforeRemove => "beforeRemove",
            Self::Remove => "remove",
            Self::BeforeChunk => "beforeChunk",
            Self::AfterChunk => "afterChunk",
            Self::BeforeHash => "beforeHash",
            Self::AfterHash => "afterHash",
            Self::StatusChange => "statusChange",
            Self::Progress => "progress",
            Self::Success => "success",
            Self::Error => "error",
            Self::BeforeUpload => "beforeUpload",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value returned by an event handler.
///
/// `Unset` is what a handler returning `()` produces. It is distinct from
/// `Value(Value::Null)`: only the latter is a halting vote.
pub enum HookResult {
    Unset,
    Value(Value),
    /// A result that is not ready yet. The bus never awaits it; vetoable
    /// callers resolve it before voting.
    Pending(BoxFuture<'static, HookResult>),
}

impl HookResult {
    /// Wraps a future whose output becomes the handler result.
    pub fn pending<F, R>(fut: F) -> Self
    where
        F: Future<Output = R> + Send + 'static,
        R: Into<HookResult>,
    {
        Self::Pending(Box::pin(async move { fut.await.into() }))
    }

    /// Awaits nested pending results down to a ready value.
    pub async fn resolve(self) -> HookResult {
        let mut result = self;
        while let HookResult::Pending(fut) = result {
            result = fut.await;
        }
        result
    }
}

impl fmt::Debug for HookResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("Unset"),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

impl From<()> for HookResult {
    fn from(_: ()) -> Self {
        Self::Unset
    }
}

impl From<Value> for HookResult {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<bool> for HookResult {
    fn from(v: bool) -> Self {
        Self::Value(Value::Bool(v))
    }
}

impl From<i64> for HookResult {
    fn from(v: i64) -> Self {
        Self::Value(Value::from(v))
    }
}

impl From<&str> for HookResult {
    fn from(v: &str) -> Self {
        Self::Value(Value::from(v))
    }
}

impl From<String> for HookResult {
    fn from(v: String) -> Self {
        Self::Value(Value::from(v))
    }
}

/// An event payload that knows which name it is dispatched under.
pub trait BusEvent: Send + Sync + 'static {
    fn name(&self) -> EventName;
}

type Handler<E> = Arc<dyn Fn(&E) -> HookResult + Send + Sync>;

/// Ordered-map-backed event dispatcher.
///
/// Cloning yields another handle to the same registry.
pub struct EventBus<E: BusEvent> {
    handlers: Arc<Mutex<BTreeMap<EventName, Vec<Handler<E>>>>>,
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
        }
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> EventBus<E> {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Appends `handler` to the list for `name`.
    ///
    /// Registrations are not deduplicated: registering the same closure
    /// twice makes it fire twice.
    pub fn on<F, R>(&self, name: EventName, handler: F)
    where
        F: Fn(&E) -> R + Send + Sync + 'static,
        R: Into<HookResult>,
    {
        let handler: Handler<E> = Arc::new(move |event: &E| -> HookResult { handler(event).into() });
        self.registry().entry(name).or_default().push(handler);
    }

    /// Invokes every handler registered under `event.name()` in order and
    /// returns their results in the same order.
    ///
    /// Handlers run from a snapshot of the list, so one may register more
    /// handlers; those fire from the next trigger on. A panicking handler
    /// unwinds through this call and the remaining handlers do not run.
    pub fn trigger(&self, event: &E) -> Vec<HookResult> {
        let name = event.name();
        let snapshot: Vec<Handler<E>> = match self.registry().get(&name) {
            Some(list) => list.clone(),
            None => return Vec::new(),
        };
        trace!(event = %name, handlers = snapshot.len(), "trigger");
        snapshot.iter().map(|handler| handler(event)).collect()
    }

    /// Returns `true` if at least one handler is registered for `name`.
    pub fn has_handlers(&self, name: EventName) -> bool {
        self.registry().get(&name).is_some_and(|list| !list.is_empty())
    }

    /// Number of handlers registered for `name`.
    pub fn handler_count(&self, name: EventName) -> usize {
        self.registry().get(&name).map_or(0, Vec::len)
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, BTreeMap<EventName, Vec<Handler<E>>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Name and size of a candidate file, as shown to admission hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
}

/// Events emitted by jobs and the scheduler.
///
/// Job events are forwarded unchanged onto the scheduler's bus, so one
/// subscription on the scheduler observes every job.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// A batch of files was offered. Vetoable.
    Select { files: Vec<FileInfo> },
    /// The batch would overflow the queue limit.
    CountExceed {
        total: usize,
        max_count: usize,
        files: Vec<FileInfo>,
    },
    /// Some files in the batch exceed the size limit.
    SizeExceed {
        oversized: Vec<FileInfo>,
        max_size: u64,
        files: Vec<FileInfo>,
    },
    /// A job is about to be removed. Vetoable.
    BeforeRemove { index: usize, job: TransferJob },
    Remove { index: usize, job: TransferJob },
    BeforeChunk { job: TransferJob },
    AfterChunk { job: TransferJob },
    BeforeHash { job: TransferJob },
    AfterHash { job: TransferJob, hash: String },
    StatusChange { job: TransferJob, status: JobStatus },
    Progress {
        job: TransferJob,
        segment: usize,
        loaded: u64,
        total: u64,
    },
    Success {
        job: TransferJob,
        segment: usize,
        response: Value,
    },
    Error {
        job: TransferJob,
        segment: usize,
        response: Value,
    },
    /// The queue is about to be transferred. Vetoable.
    BeforeUpload { jobs: Vec<TransferJob> },
}

impl UploadEvent {
    /// The job this event concerns, if any.
    pub fn job(&self) -> Option<&TransferJob> {
        match self {
            Self::BeforeRemove { job, .. }
            | Self::Remove { job, .. }
            | Self::BeforeChunk { job }
            | Self::AfterChunk { job }
            | Self::BeforeHash { job }
            | Self::AfterHash { job, .. }
            | Self::StatusChange { job, .. }
            | Self::Progress { job, .. }
            | Self::Success { job, .. }
            | Self::Error { job, .. } => Some(job),
            Self::Select { .. }
            | Self::CountExceed { .. }
            | Self::SizeExceed { .. }
            | Self::BeforeUpload { .. } => None,
        }
    }
}

impl BusEvent for UploadEvent {
    fn name(&self) -> EventName {
        match self {
            Self::Select { .. } => EventName::Select,
            Self::CountExceed { .. } => EventName::CountExceed,
            Self::SizeExceed { .. } => EventName::SizeExceed,
            Self::BeforeRemove { .. } => EventName::BeforeRemove,
            Self::Remove { .. } => EventName::Remove,
            Self::BeforeChunk { .. } => EventName::BeforeChunk,
            Self::AfterChunk { .. } => EventName::AfterChunk,
            Self::BeforeHash { .. } => EventName::BeforeHash,
            Self::AfterHash { .. } => EventName::AfterHash,
            Self::StatusChange { .. } => EventName::StatusChange,
            Self::Progress { .. } => EventName::Progress,
            Self::Success { .. } => EventName::Success,
            Self::Error { .. } => EventName::Error,
            Self::BeforeUpload { .. } => EventName::BeforeUpload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select() -> UploadEvent {
        UploadEvent::Select { files: Vec::new() }
    }

    #[test]
    fn no_handlers_returns_empty() {
        let bus: EventBus<UploadEvent> = EventBus::new();
        assert!(bus.trigger(&select()).is_empty());
        assert!(!bus.has_handlers(EventName::Select));
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus: EventBus<UploadEvent> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3i64 {
            let seen = Arc::clone(&seen);
            bus.on(EventName::Select, move |_| {
                seen.lock().unwrap().push(i);
                i
            });
        }

        let results = bus.trigger(&select());
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        let values: Vec<_> = results
            .into_iter()
            .map(|r| match r {
                HookResult::Value(v) => v,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![Value::from(0), Value::from(1), Value::from(2)]);
    }

    #[test]
    fn duplicate_registration_fires_twice() {
        let bus: EventBus<UploadEvent> = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let handler = {
            let count = Arc::clone(&count);
            move |_: &UploadEvent| *count.lock().unwrap() += 1
        };
        bus.on(EventName::Select, handler.clone());
        bus.on(EventName::Select, handler);
        bus.trigger(&select());
        assert_eq!(*count.lock().unwrap(), 2);
        assert_eq!(bus.handler_count(EventName::Select), 2);
    }

    #[test]
    fn handlers_keyed_by_name() {
        let bus: EventBus<UploadEvent> = EventBus::new();
        bus.on(EventName::BeforeUpload, |_| false);
        assert!(bus.trigger(&select()).is_empty());
        let results = bus.trigger(&UploadEvent::BeforeUpload { jobs: Vec::new() });
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn unit_handler_is_unset() {
        let bus: EventBus<UploadEvent> = EventBus::new();
        bus.on(EventName::Select, |_| {});
        let results = bus.trigger(&select());
        assert!(matches!(results[0], HookResult::Unset));
    }

    #[test]
    fn handler_may_register_during_trigger() {
        let bus: EventBus<UploadEvent> = EventBus::new();
        let inner = bus.clone();
        bus.on(EventName::Select, move |_| {
            inner.on(EventName::Select, |_| {});
        });
        assert_eq!(bus.trigger(&select()).len(), 1);
        assert_eq!(bus.trigger(&select()).len(), 2);
    }

    #[tokio::test]
    async fn pending_results_resolve() {
        let pending = HookResult::pending(async { HookResult::pending(async { false }) });
        assert!(matches!(
            pending.resolve().await,
            HookResult::Value(Value::Bool(false))
        ));
    }

    #[test]
    fn names_match_wire_spelling() {
        assert_eq!(EventName::CountExceed.to_string(), "countExceed");
        assert_eq!(EventName::BeforeUpload.as_str(), "beforeUpload");
    }
}
