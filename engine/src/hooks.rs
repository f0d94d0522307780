//! Lifecycle hooks and payload/response modifiers.
//!
//! Hooks for an event run one after another in the order the config layers
//! were merged (global, module, call site). A hook may replace the payload by
//! returning `Some`, and may call [`EventContext::abort`] to stop the
//! dispatcher from starting further stores. The runner never inspects the
//! abort flag itself; the dispatcher does.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use serde_json::Value;

use crate::{ActionName, ActionResult, DocMetadata, PluginError, PluginModuleConfig, StoreName};

/// Lifecycle events hooks can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Before,
    Success,
    Error,
    Revert,
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventName::Before => "before",
            EventName::Success => "success",
            EventName::Error => "error",
            EventName::Revert => "revert",
        })
    }
}

/// Shared cancellation flag for one dispatch.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a hook sees about the store call it surrounds.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub event: EventName,
    pub payload: Value,
    pub action: ActionName,
    pub store: StoreName,
    pub collection_path: String,
    pub doc_id: Option<String>,
    pub plugin_config: PluginModuleConfig,
    /// The store's result, on `success` and `revert`.
    pub result: Option<ActionResult>,
    /// The store's error, on `error` and `revert`.
    pub error: Option<PluginError>,
    abort: Option<AbortSignal>,
}

impl EventContext {
    pub(crate) fn new(
        event: EventName,
        payload: Value,
        action: ActionName,
        store: &str,
        collection_path: &str,
        doc_id: Option<&str>,
        plugin_config: PluginModuleConfig,
    ) -> Self {
        Self {
            event,
            payload,
            action,
            store: store.to_string(),
            collection_path: collection_path.to_string(),
            doc_id: doc_id.map(str::to_string),
            plugin_config,
            result: None,
            error: None,
            abort: None,
        }
    }

    pub(crate) fn with_abort(mut self, signal: &AbortSignal) -> Self {
        self.abort = Some(signal.clone());
        self
    }

    pub(crate) fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub(crate) fn with_doc_id(mut self, doc_id: Option<&str>) -> Self {
        self.doc_id = doc_id.map(str::to_string);
        self
    }

    pub(crate) fn with_result(mut self, result: ActionResult) -> Self {
        self.result = Some(result);
        self
    }

    pub(crate) fn with_error(mut self, error: PluginError) -> Self {
        self.error = Some(error);
        self
    }

    pub(crate) fn for_event(&self, event: EventName) -> Self {
        let mut ctx = self.clone();
        ctx.event = event;
        ctx
    }

    /// Stop the dispatcher from starting any further store.
    ///
    /// Returns `false` when the current dispatch cannot be aborted (streams).
    pub fn abort(&self) -> bool {
        match &self.abort {
            Some(signal) => {
                signal.abort();
                true
            }
            None => {
                tracing::debug!(event = %self.event, action = %self.action, "abort is not available here");
                false
            }
        }
    }
}

/// Future returned by a hook. `Some` replaces the payload.
pub type HookFuture = BoxFuture<'static, Option<Value>>;

/// A lifecycle hook.
#[derive(Clone)]
pub struct EventHook(Arc<dyn Fn(EventContext) -> HookFuture + Send + Sync>);

impl EventHook {
    /// Wrap a synchronous hook.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&EventContext) -> Option<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(move |ctx| Box::pin(future::ready(f(&ctx)))))
    }

    /// Wrap an async hook.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Value>> + Send + 'static,
    {
        Self(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    pub fn call(&self, ctx: EventContext) -> HookFuture {
        (self.0)(ctx)
    }
}

impl fmt::Debug for EventHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventHook")
    }
}

/// Hooks per lifecycle event.
#[derive(Debug, Clone, Default)]
pub struct EventHooks {
    pub before: Vec<EventHook>,
    pub success: Vec<EventHook>,
    pub error: Vec<EventHook>,
    pub revert: Vec<EventHook>,
}

impl EventHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook for an event.
    pub fn on(mut self, event: EventName, hook: EventHook) -> Self {
        self.get_mut(event).push(hook);
        self
    }

    pub fn get(&self, event: EventName) -> &[EventHook] {
        match event {
            EventName::Before => &self.before,
            EventName::Success => &self.success,
            EventName::Error => &self.error,
            EventName::Revert => &self.revert,
        }
    }

    fn get_mut(&mut self, event: EventName) -> &mut Vec<EventHook> {
        match event {
            EventName::Before => &mut self.before,
            EventName::Success => &mut self.success,
            EventName::Error => &mut self.error,
            EventName::Revert => &mut self.revert,
        }
    }

    /// Append another map's hooks after this one's.
    pub fn extend(&mut self, other: &EventHooks) {
        self.before.extend(other.before.iter().cloned());
        self.success.extend(other.success.iter().cloned());
        self.error.extend(other.error.iter().cloned());
        self.revert.extend(other.revert.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
            && self.success.is_empty()
            && self.error.is_empty()
            && self.revert.is_empty()
    }
}

/// Run hooks in order, threading the payload through them.
///
/// Returns the final payload.
pub async fn run_sequential(hooks: &[EventHook], mut ctx: EventContext) -> Value {
    for hook in hooks {
        if let Some(payload) = hook.call(ctx.clone()).await {
            ctx.payload = payload;
        }
    }
    ctx.payload
}

/// Rewrites an action's payload before any store sees it.
#[derive(Clone)]
pub struct PayloadModifier(Arc<dyn Fn(Value) -> BoxFuture<'static, Value> + Send + Sync>);

impl PayloadModifier {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(move |payload| Box::pin(future::ready(f(payload)))))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        Self(Arc::new(move |payload| Box::pin(f(payload))))
    }
}

impl fmt::Debug for PayloadModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PayloadModifier")
    }
}

/// Payload modifiers keyed by action.
pub type PayloadModifiers = BTreeMap<ActionName, Vec<PayloadModifier>>;

/// Each modifier fully replaces the payload with its output.
pub async fn apply_payload_modifiers(modifiers: &[PayloadModifier], payload: Value) -> Value {
    let mut payload = payload;
    for modifier in modifiers {
        payload = (modifier.0)(payload).await;
    }
    payload
}

/// Kind of change a read response reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocChange {
    Added,
    Modified,
    Removed,
}

/// Rewrites a document read from a store. `None` drops the document.
#[derive(Clone)]
pub struct ResponseModifier(Arc<dyn Fn(Value, &DocMetadata) -> Option<Value> + Send + Sync>);

impl ResponseModifier {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value, &DocMetadata) -> Option<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for ResponseModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseModifier")
    }
}

/// Read-response modifiers per change kind.
#[derive(Debug, Clone, Default)]
pub struct ReadResponseModifiers {
    pub added: Vec<ResponseModifier>,
    pub modified: Vec<ResponseModifier>,
    pub removed: Vec<ResponseModifier>,
}

impl ReadResponseModifiers {
    pub fn on(mut self, change: DocChange, modifier: ResponseModifier) -> Self {
        match change {
            DocChange::Added => self.added.push(modifier),
            DocChange::Modified => self.modified.push(modifier),
            DocChange::Removed => self.removed.push(modifier),
        }
        self
    }

    pub fn get(&self, change: DocChange) -> &[ResponseModifier] {
        match change {
            DocChange::Added => &self.added,
            DocChange::Modified => &self.modified,
            DocChange::Removed => &self.removed,
        }
    }

    pub fn extend(&mut self, other: &ReadResponseModifiers) {
        self.added.extend(other.added.iter().cloned());
        self.modified.extend(other.modified.iter().cloned());
        self.removed.extend(other.removed.iter().cloned());
    }
}

/// Run a document through modifiers; stops early once one drops it.
pub fn apply_response_modifiers(
    modifiers: &[ResponseModifier],
    payload: Value,
    metadata: &DocMetadata,
) -> Option<Value> {
    modifiers
        .iter()
        .try_fold(payload, |payload, modifier| (modifier.0)(payload, metadata))
}
