//! Instrumented store used by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::oneshot;
use futures::FutureExt;
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use tandem_engine::{
    ActionName, ActionRequest, ActionSet, DoOnFetch, DoOnStream, DocMetadata, FetchOutcome,
    FetchResponse, FetchedDoc, ModuleData, ModuleRef, PluginError, RevertRequest, StorePlugin,
    StreamOutcome, StreamRequest, StreamResponse,
};

/// Route engine logs to the test output. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared, ordered record of every call made to any mock store.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// How a mock answers `fetch` and `stream`.
#[derive(Clone)]
pub enum ReadMode {
    /// Authoritative: answer with these docs.
    Remote(Vec<(String, Value)>),
    /// Local: register handlers and keep what they receive.
    Local,
}

/// A configurable store that logs every call as `name:action`.
pub struct MockStore {
    name: String,
    log: CallLog,
    actions: ActionSet,
    fail_on: Vec<ActionName>,
    fail_revert: bool,
    fail_stream_after_open: bool,
    end_stream_after_emit: bool,
    insert_id: Option<String>,
    read: ReadMode,
    /// Payloads received, in order.
    pub payloads: Arc<Mutex<Vec<Value>>>,
    /// Docs delivered to this store's fetch or stream handlers, as `change:id`.
    pub mirrored: Arc<Mutex<Vec<(String, Value)>>>,
    /// Stop functions the store has seen called.
    pub stopped: Arc<Mutex<usize>>,
}

impl MockStore {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            actions: ActionSet::all(),
            fail_on: Vec::new(),
            fail_revert: false,
            fail_stream_after_open: false,
            end_stream_after_emit: false,
            insert_id: None,
            read: ReadMode::Local,
            payloads: Arc::default(),
            mirrored: Arc::default(),
            stopped: Arc::default(),
        }
    }

    pub fn with_actions(mut self, actions: ActionSet) -> Self {
        self.actions = actions;
        self
    }

    pub fn failing_on(mut self, action: ActionName) -> Self {
        self.fail_on.push(action);
        self
    }

    pub fn failing_revert(mut self) -> Self {
        self.fail_revert = true;
        self
    }

    pub fn failing_stream_after_open(mut self) -> Self {
        self.fail_stream_after_open = true;
        self
    }

    /// The remote's stream ends on its own once its docs are delivered.
    pub fn ending_stream(mut self) -> Self {
        self.end_stream_after_emit = true;
        self
    }

    pub fn with_insert_id(mut self, id: &str) -> Self {
        self.insert_id = Some(id.to_string());
        self
    }

    pub fn remote(mut self, docs: Vec<(&str, Value)>) -> Self {
        self.read = ReadMode::Remote(
            docs.into_iter()
                .map(|(id, data)| (id.to_string(), data))
                .collect(),
        );
        self
    }

    pub fn into_arc(self) -> Arc<dyn StorePlugin> {
        Arc::new(self)
    }

    fn call(&self, action: ActionName, payload: &Value) -> Result<(), PluginError> {
        self.log.push(format!("{}:{}", self.name, action));
        self.payloads.lock().unwrap().push(payload.clone());
        if self.fail_on.contains(&action) {
            return Err(PluginError::new(format!("{} failed on {}", self.name, action)));
        }
        Ok(())
    }

    fn mirror(&self, change: &'static str) -> tandem_engine::DocCallback {
        let mirrored = Arc::clone(&self.mirrored);
        Arc::new(move |data: Value, metadata: &DocMetadata| {
            mirrored
                .lock()
                .unwrap()
                .push((format!("{change}:{}", metadata.id), data));
        })
    }
}

#[async_trait]
impl StorePlugin for MockStore {
    fn actions(&self) -> ActionSet {
        self.actions
    }

    async fn insert(&self, req: ActionRequest) -> Result<String, PluginError> {
        self.call(ActionName::Insert, &req.payload)?;
        Ok(req
            .doc_id
            .or_else(|| self.insert_id.clone())
            .unwrap_or_else(|| format!("{}-id", self.name)))
    }

    async fn merge(&self, req: ActionRequest) -> Result<(), PluginError> {
        self.call(ActionName::Merge, &req.payload)
    }

    async fn assign(&self, req: ActionRequest) -> Result<(), PluginError> {
        self.call(ActionName::Assign, &req.payload)
    }

    async fn replace(&self, req: ActionRequest) -> Result<(), PluginError> {
        self.call(ActionName::Replace, &req.payload)
    }

    async fn delete_prop(&self, req: ActionRequest) -> Result<(), PluginError> {
        self.call(ActionName::DeleteProp, &req.payload)
    }

    async fn delete(&self, req: ActionRequest) -> Result<(), PluginError> {
        self.call(ActionName::Delete, &req.payload)
    }

    async fn fetch(&self, req: ActionRequest) -> Result<FetchOutcome, PluginError> {
        self.call(ActionName::Fetch, &req.payload)?;
        match &self.read {
            ReadMode::Remote(docs) => Ok(FetchOutcome::Response(FetchResponse {
                docs: docs
                    .iter()
                    .map(|(id, data)| FetchedDoc {
                        data: data.clone(),
                        metadata: DocMetadata::existing(id.clone()),
                    })
                    .collect(),
            })),
            ReadMode::Local => Ok(FetchOutcome::Register(DoOnFetch(self.mirror("fetched")))),
        }
    }

    async fn stream(&self, req: StreamRequest) -> Result<StreamOutcome, PluginError> {
        self.call(ActionName::Stream, &req.payload)?;
        let docs = match &self.read {
            ReadMode::Local => {
                return Ok(StreamOutcome::Register(DoOnStream {
                    added: Some(self.mirror("added")),
                    modified: Some(self.mirror("modified")),
                    removed: Some(self.mirror("removed")),
                }))
            }
            ReadMode::Remote(docs) => docs.clone(),
        };

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let must_execute_on_read = req.must_execute_on_read;
        let fail = self.fail_stream_after_open;
        let end = self.end_stream_after_emit;
        let name = self.name.clone();
        let streaming = async move {
            for (id, data) in docs {
                must_execute_on_read.added(data, &DocMetadata::existing(id));
            }
            if fail {
                return Err(PluginError::new(format!("{name} lost its connection")));
            }
            if end {
                return Ok(());
            }
            let _ = stop_rx.await;
            Ok(())
        }
        .boxed();

        let stopped = Arc::clone(&self.stopped);
        Ok(StreamOutcome::Opened(StreamResponse {
            streaming,
            stop: Box::new(move || {
                *stopped.lock().unwrap() += 1;
                let _ = stop_tx.send(());
            }),
        }))
    }

    async fn revert(&self, req: RevertRequest) -> Result<(), PluginError> {
        self.log.push(format!("{}:revert:{}", self.name, req.action));
        if self.fail_revert {
            return Err(PluginError::new(format!("{} cannot revert", self.name)));
        }
        Ok(())
    }

    fn setup_module(&self, module: &ModuleRef) {
        self.log.push(format!(
            "{}:setup:{}",
            self.name,
            match &module.doc_id {
                Some(id) => format!("{}/{}", module.collection_path, id),
                None => module.collection_path.clone(),
            }
        ));
    }

    fn module_data(&self, module: &ModuleRef) -> Option<ModuleData> {
        Some(ModuleData::Doc(Some(Value::String(format!(
            "{} data for {}",
            self.name, module.collection_path
        )))))
    }
}
