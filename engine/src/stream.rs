//! Stream dispatcher and open-stream bookkeeping.
//!
//! Unlike the action dispatcher there is no abort: every store in the order is
//! asked to stream. Authoritative stores return a running subscription; local
//! stores register handlers that the subscriptions feed through
//! [`MustExecuteOnRead`]. The combined handle finishes once every subscription
//! has finished, or as soon as it is unsubscribed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use dashmap::DashMap;
use futures::future::{self, AbortHandle, Abortable, BoxFuture, FutureExt, Shared};
use serde_json::Value;

use crate::config::{EffectiveConfig, GlobalConfig, ModuleConfig};
use crate::hooks::{
    apply_payload_modifiers, apply_response_modifiers, run_sequential, DocChange, EventContext,
    EventName, ReadResponseModifiers,
};
use crate::{
    ActionName, ActionResult, DocCallback, DocMetadata, DoOnStream, Error, MustExecuteOnRead,
    Result, StopFn, StreamOutcome, StreamRequest,
};

/// Key identifying an open stream within a module: the payload's JSON form.
pub type StreamKey = String;

/// Key for a stream payload.
pub fn stream_key(payload: &Value) -> StreamKey {
    serde_json::to_string(payload).unwrap_or_default()
}

/// Stops a running stream. Calling it more than once is harmless.
#[derive(Clone)]
pub struct Unsubscribe(Arc<dyn Fn() + Send + Sync>);

impl Unsubscribe {
    fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Unsubscribe")
    }
}

type Streaming = Shared<BoxFuture<'static, Result<()>>>;

#[derive(Clone)]
struct OpenStream {
    id: u64,
    unsubscribe: Unsubscribe,
    streaming: Streaming,
}

/// Streams currently open on one module, keyed by payload.
#[derive(Default)]
pub struct OpenStreams {
    streams: DashMap<StreamKey, OpenStream>,
    next_id: AtomicU64,
}

impl OpenStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the entry for `key` if it is still the stream numbered `id`.
    fn release(&self, key: &str, id: u64) {
        self.streams.remove_if(key, |_, open| open.id == id);
    }

    /// The unsubscribe function for the stream opened with `payload`.
    pub fn get(&self, payload: &Value) -> Option<Unsubscribe> {
        self.streams
            .get(&stream_key(payload))
            .map(|entry| entry.unsubscribe.clone())
    }

    pub fn contains(&self, payload: &Value) -> bool {
        self.streams.contains_key(&stream_key(payload))
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Stop every open stream.
    pub fn close_all(&self) {
        let open: Vec<Unsubscribe> = self
            .streams
            .iter()
            .map(|entry| entry.unsubscribe.clone())
            .collect();
        for unsubscribe in open {
            unsubscribe.call();
        }
    }

    /// Handle to the stream opened with `payload`.
    ///
    /// Streams only make progress while a handle's [`finished`](StreamHandle::finished)
    /// future is polled. A stream that ends is released from this map then.
    pub fn handle(&self, payload: &Value) -> Option<StreamHandle> {
        self.handle_for_key(&stream_key(payload))
    }

    fn handle_for_key(&self, key: &str) -> Option<StreamHandle> {
        self.streams.get(key).map(|entry| StreamHandle {
            key: key.to_string(),
            streaming: entry.streaming.clone(),
            unsubscribe: entry.unsubscribe.clone(),
        })
    }
}

impl fmt::Debug for OpenStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenStreams")
            .field("len", &self.streams.len())
            .finish()
    }
}

/// Handle to a running stream.
#[derive(Clone)]
pub struct StreamHandle {
    key: StreamKey,
    streaming: Streaming,
    unsubscribe: Unsubscribe,
}

impl StreamHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stop every store's subscription. The handle then finishes with `Ok`.
    pub fn unsubscribe(&self) {
        self.unsubscribe.call()
    }

    pub fn unsubscriber(&self) -> Unsubscribe {
        self.unsubscribe.clone()
    }

    /// Wait until every subscription has ended.
    pub async fn finished(&self) -> Result<()> {
        self.streaming.clone().await
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle").field("key", &self.key).finish()
    }
}

/// One call of `stream` against a module.
pub(crate) struct StreamInvocation<'a> {
    pub global: &'a GlobalConfig,
    pub module: &'a ModuleConfig,
    pub collection_path: String,
    pub doc_id: Option<String>,
    pub payload: Value,
    pub config: EffectiveConfig,
    pub open_streams: &'a Arc<OpenStreams>,
}

/// Handlers local stores registered, plus the gate that silences them on stop.
#[derive(Default)]
struct Registrations {
    handlers: RwLock<Vec<DoOnStream>>,
    stopped: AtomicBool,
}

impl Registrations {
    fn has_handlers(&self) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.iter().any(DoOnStream::has_handlers))
            .unwrap_or(false)
    }

    fn push(&self, handlers: DoOnStream) {
        if let Ok(mut registered) = self.handlers.write() {
            registered.push(handlers);
        }
    }
}

/// Build the change callback for one kind of change.
fn change_callback(
    registrations: &Arc<Registrations>,
    change: DocChange,
    modifiers: &ReadResponseModifiers,
) -> DocCallback {
    let registrations = Arc::clone(registrations);
    let modifiers = modifiers.get(change).to_vec();
    Arc::new(move |payload: Value, metadata: &DocMetadata| {
        if registrations.stopped.load(Ordering::SeqCst) {
            return;
        }
        let Some(payload) = apply_response_modifiers(&modifiers, payload, metadata) else {
            return;
        };
        let Ok(handlers) = registrations.handlers.read() else {
            return;
        };
        for registered in handlers.iter() {
            let handler = match change {
                DocChange::Added => &registered.added,
                DocChange::Modified => &registered.modified,
                DocChange::Removed => &registered.removed,
            };
            if let Some(handler) = handler {
                handler(payload.clone(), metadata);
            }
        }
    })
}

/// Open a stream across the configured stores.
pub(crate) async fn open_stream(inv: StreamInvocation<'_>) -> Result<StreamHandle> {
    let StreamInvocation {
        global,
        module,
        collection_path,
        doc_id,
        payload,
        config,
        open_streams,
    } = inv;

    let key = stream_key(&payload);
    if let Some(existing) = open_streams.handle_for_key(&key) {
        tracing::debug!(path = %collection_path, key = %key, "stream already open, reusing");
        return Ok(existing);
    }

    let mut stores = Vec::new();
    for name in &config.execution_order {
        let plugin = global.store(name)?;
        if plugin.actions().contains(ActionName::Stream) {
            stores.push((name, plugin));
        }
    }
    if stores.is_empty() {
        return Err(Error::NoStreamStores);
    }

    let registrations = Arc::new(Registrations::default());
    let must_execute_on_read = MustExecuteOnRead::new(
        change_callback(&registrations, DocChange::Added, &config.modify_read_response),
        change_callback(&registrations, DocChange::Modified, &config.modify_read_response),
        change_callback(&registrations, DocChange::Removed, &config.modify_read_response),
    );

    let mut payload = apply_payload_modifiers(&config.modify_payload, payload).await;
    let mut streamings = Vec::new();
    let mut stops: Vec<StopFn> = Vec::new();

    for (store_name, plugin) in stores {
        let plugin_config = module.plugin_config(store_name);
        let ctx = EventContext::new(
            EventName::Before,
            payload.clone(),
            ActionName::Stream,
            store_name,
            &collection_path,
            doc_id.as_deref(),
            plugin_config.clone(),
        );
        payload = run_sequential(&config.on.before, ctx.clone()).await;

        tracing::debug!(store = %store_name, path = %collection_path, "opening stream");
        let request = StreamRequest {
            payload: payload.clone(),
            collection_path: collection_path.clone(),
            doc_id: doc_id.clone(),
            plugin_config,
            must_execute_on_read: must_execute_on_read.clone(),
        };

        match plugin.stream(request).await {
            Ok(StreamOutcome::Opened(response)) => {
                streamings.push(response.streaming);
                stops.push(response.stop);
                let success = ctx
                    .for_event(EventName::Success)
                    .with_payload(payload.clone())
                    .with_result(ActionResult::StreamOpened);
                run_sequential(&config.on.success, success).await;
            }
            Ok(StreamOutcome::Register(handlers)) => {
                registrations.push(handlers);
                let success = ctx
                    .for_event(EventName::Success)
                    .with_payload(payload.clone())
                    .with_result(ActionResult::StreamRegistered);
                run_sequential(&config.on.success, success).await;
            }
            Err(err) => {
                let err = if err.store().is_none() {
                    err.for_store(store_name.clone())
                } else {
                    err
                };
                let failed = ctx
                    .for_event(EventName::Error)
                    .with_payload(payload.clone())
                    .with_error(err.clone());
                run_sequential(&config.on.error, failed).await;

                tracing::warn!(store = %store_name, error = %err, "stream failed to open, stopping opened streams");
                stop_all(&registrations, stops);
                return Err(Error::Plugin(err));
            }
        }
    }

    if !registrations.has_handlers() {
        stop_all(&registrations, stops);
        return Err(Error::NoStreamHandler);
    }

    let id = open_streams.next_id.fetch_add(1, Ordering::Relaxed);
    let (abort_handle, abort_registration) = AbortHandle::new_pair();
    let pending_stops = Arc::new(Mutex::new(stops));

    let unsubscribe = {
        let registrations = Arc::clone(&registrations);
        let pending_stops = Arc::clone(&pending_stops);
        let open_streams: Weak<OpenStreams> = Arc::downgrade(open_streams);
        let key = key.clone();
        Unsubscribe::new(move || {
            registrations.stopped.store(true, Ordering::SeqCst);
            let stops = pending_stops
                .lock()
                .map(|mut stops| std::mem::take(&mut *stops))
                .unwrap_or_default();
            for stop in stops {
                stop();
            }
            abort_handle.abort();
            if let Some(open_streams) = open_streams.upgrade() {
                open_streams.release(&key, id);
            }
        })
    };

    let streaming: BoxFuture<'static, Result<()>> = {
        let all = Abortable::new(future::try_join_all(streamings), abort_registration);
        let open_streams = Arc::downgrade(open_streams);
        let key = key.clone();
        async move {
            let outcome = match all.await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(err)) => Err(Error::Plugin(err)),
                // unsubscribed
                Err(_) => Ok(()),
            };
            if let Some(open_streams) = open_streams.upgrade() {
                open_streams.release(&key, id);
            }
            outcome
        }
        .boxed()
    };
    let streaming = streaming.shared();

    open_streams.streams.insert(
        key.clone(),
        OpenStream {
            id,
            unsubscribe: unsubscribe.clone(),
            streaming: streaming.clone(),
        },
    );
    tracing::debug!(path = %collection_path, key = %key, "stream open");

    Ok(StreamHandle {
        key,
        streaming,
        unsubscribe,
    })
}

fn stop_all(registrations: &Registrations, stops: Vec<StopFn>) {
    registrations.stopped.store(true, Ordering::SeqCst);
    for stop in stops {
        stop();
    }
}
