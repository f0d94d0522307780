//! # Tandem Simple Store
//!
//! An in-memory [`StorePlugin`] meant to sit first in the write order as the
//! local cache, and to mirror what remote stores fetch and stream.
//!
//! - Documents live in a [`DashMap`] of collections.
//! - `insert` without a doc id generates a UUID v4.
//! - Every write records the prior state of the documents it touches, so a
//!   later `revert` can restore them.
//! - `fetch` and `stream` register handlers instead of answering.
//! - `setup_module` seeds `initialData` from the module's store config once.

mod ops;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tandem_engine::{
    ActionName, ActionRequest, ActionSet, DoOnFetch, DoOnStream, DocCallback,
    DocMetadata, FetchOutcome, ModuleData, ModuleRef, PluginError, RevertRequest, StorePlugin,
    StreamOutcome, StreamRequest,
};

pub use ops::{deep_merge, delete_path, matches_clause, shallow_assign, sort_docs};

/// Recorded write snapshots kept for reverts.
const MAX_HISTORY: usize = 1024;

/// Prior state of the documents one write touched.
#[derive(Debug)]
struct Snapshot {
    collection_path: String,
    action: ActionName,
    docs: Vec<(String, Option<Value>)>,
}

impl Snapshot {
    /// True if this snapshot was taken for exactly `ids` under `action`.
    fn covers(&self, collection_path: &str, action: ActionName, ids: &[String]) -> bool {
        self.collection_path == collection_path
            && self.action == action
            && self.docs.len() == ids.len()
            && self.docs.iter().zip(ids).all(|((id, _), wanted)| id == wanted)
    }
}

#[derive(Debug, Default)]
struct State {
    collections: DashMap<String, BTreeMap<String, Value>>,
    history: Mutex<Vec<Snapshot>>,
}

impl State {
    fn doc(&self, collection_path: &str, id: &str) -> Option<Value> {
        self.collections
            .get(collection_path)
            .and_then(|docs| docs.get(id).cloned())
    }

    fn put(&self, collection_path: &str, id: &str, data: Value) {
        self.collections
            .entry(collection_path.to_string())
            .or_default()
            .insert(id.to_string(), data);
    }

    fn remove(&self, collection_path: &str, id: &str) {
        if let Some(mut docs) = self.collections.get_mut(collection_path) {
            docs.remove(id);
        }
    }

    fn restore(&self, collection_path: &str, id: &str, data: Option<Value>) {
        match data {
            Some(data) => self.put(collection_path, id, data),
            None => self.remove(collection_path, id),
        }
    }

    /// Remember the current state of `ids` before `action` changes them.
    fn record(&self, collection_path: &str, action: ActionName, ids: &[String]) {
        let docs = ids
            .iter()
            .map(|id| (id.clone(), self.doc(collection_path, id)))
            .collect();
        let Ok(mut history) = self.history.lock() else {
            tracing::warn!(path = %collection_path, "history lock poisoned, write will not be revertible");
            return;
        };
        if history.len() >= MAX_HISTORY {
            history.remove(0);
        }
        history.push(Snapshot {
            collection_path: collection_path.to_string(),
            action,
            docs,
        });
    }

    /// Take the newest snapshot of `ids` for this collection and action.
    fn take_snapshot(
        &self,
        collection_path: &str,
        action: ActionName,
        ids: &[String],
    ) -> Option<Snapshot> {
        let mut history = self.history.lock().ok()?;
        let index = history
            .iter()
            .rposition(|snapshot| snapshot.covers(collection_path, action, ids))?;
        Some(history.remove(index))
    }

    /// Change callback writing into one collection.
    fn writer(self: Arc<Self>, collection_path: String) -> DocCallback {
        Arc::new(move |data: Value, metadata: &DocMetadata| {
            if metadata.exists {
                self.put(&collection_path, &metadata.id, data);
            } else {
                self.remove(&collection_path, &metadata.id);
            }
        })
    }

    /// Change callback deleting from one collection.
    fn remover(self: Arc<Self>, collection_path: String) -> DocCallback {
        Arc::new(move |_: Value, metadata: &DocMetadata| {
            self.remove(&collection_path, &metadata.id);
        })
    }
}

/// In-memory local store.
#[derive(Debug, Clone, Default)]
pub struct SimpleStore {
    state: Arc<State>,
}

impl SimpleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A document by collection path and id.
    pub fn get(&self, collection_path: &str, id: &str) -> Option<Value> {
        self.state.doc(collection_path, id)
    }

    /// Every document in a collection, keyed by id.
    pub fn collection(&self, collection_path: &str) -> BTreeMap<String, Value> {
        self.state
            .collections
            .get(collection_path)
            .map(|docs| docs.value().clone())
            .unwrap_or_default()
    }

    /// Number of writes that can still be reverted.
    pub fn revertible_writes(&self) -> usize {
        self.state
            .history
            .lock()
            .map(|history| history.len())
            .unwrap_or(0)
    }

    /// Apply `f` to the request's document, recording its prior state.
    fn update<F>(&self, req: &ActionRequest, action: ActionName, f: F) -> Result<(), PluginError>
    where
        F: FnOnce(&mut Value) -> Result<(), PluginError>,
    {
        let id = doc_id(req, action)?;
        let mut doc = self
            .state
            .doc(&req.collection_path, id)
            .unwrap_or_else(ops::empty_doc);
        f(&mut doc)?;

        self.state
            .record(&req.collection_path, action, &[id.to_string()]);
        self.state.put(&req.collection_path, id, doc);
        tracing::debug!(action = %action, path = %req.collection_path, doc_id = %id, "document updated");
        Ok(())
    }
}

fn doc_id(req: &ActionRequest, action: ActionName) -> Result<&str, PluginError> {
    req.doc_id.as_deref().ok_or_else(|| {
        PluginError::new(format!(
            "'{action}' needs a document, got collection '{}'",
            req.collection_path
        ))
    })
}

#[async_trait]
impl StorePlugin for SimpleStore {
    fn actions(&self) -> ActionSet {
        ActionSet::all()
    }

    async fn insert(&self, req: ActionRequest) -> Result<String, PluginError> {
        let id = req
            .doc_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.state
            .record(&req.collection_path, ActionName::Insert, &[id.clone()]);
        self.state.put(&req.collection_path, &id, req.payload);
        tracing::debug!(path = %req.collection_path, doc_id = %id, "document inserted");
        Ok(id)
    }

    async fn merge(&self, req: ActionRequest) -> Result<(), PluginError> {
        let payload = req.payload.clone();
        self.update(&req, ActionName::Merge, |doc| {
            deep_merge(doc, payload);
            Ok(())
        })
    }

    async fn assign(&self, req: ActionRequest) -> Result<(), PluginError> {
        let payload = req.payload.clone();
        self.update(&req, ActionName::Assign, |doc| {
            shallow_assign(doc, payload);
            Ok(())
        })
    }

    async fn replace(&self, req: ActionRequest) -> Result<(), PluginError> {
        let payload = req.payload.clone();
        self.update(&req, ActionName::Replace, |doc| {
            *doc = payload;
            Ok(())
        })
    }

    async fn delete_prop(&self, req: ActionRequest) -> Result<(), PluginError> {
        let props = ops::string_list(&req.payload)?;
        self.update(&req, ActionName::DeleteProp, |doc| {
            for prop in &props {
                delete_path(doc, prop);
            }
            Ok(())
        })
    }

    async fn delete(&self, req: ActionRequest) -> Result<(), PluginError> {
        let ids = match &req.doc_id {
            Some(id) => vec![id.clone()],
            None => ops::string_list(&req.payload)?,
        };

        self.state
            .record(&req.collection_path, ActionName::Delete, &ids);
        for id in &ids {
            self.state.remove(&req.collection_path, id);
        }
        tracing::debug!(path = %req.collection_path, count = ids.len(), "documents deleted");
        Ok(())
    }

    async fn fetch(&self, req: ActionRequest) -> Result<FetchOutcome, PluginError> {
        let writer = Arc::clone(&self.state).writer(req.collection_path);
        Ok(FetchOutcome::Register(DoOnFetch(writer)))
    }

    async fn stream(&self, req: StreamRequest) -> Result<StreamOutcome, PluginError> {
        let writer = Arc::clone(&self.state).writer(req.collection_path.clone());
        let remover = Arc::clone(&self.state).remover(req.collection_path);
        Ok(StreamOutcome::Register(DoOnStream {
            added: Some(writer.clone()),
            modified: Some(writer),
            removed: Some(remover),
        }))
    }

    async fn revert(&self, req: RevertRequest) -> Result<(), PluginError> {
        // Collection deletes carry their ids in the payload.
        let ids = match &req.doc_id {
            Some(id) => vec![id.clone()],
            None => ops::string_list(&req.payload)?,
        };
        let snapshot = self
            .state
            .take_snapshot(&req.collection_path, req.action, &ids)
            .ok_or_else(|| {
                PluginError::new(format!(
                    "nothing to revert for '{}' on '{}' ({})",
                    req.action,
                    req.collection_path,
                    ids.join(", ")
                ))
            })?;

        for (id, data) in snapshot.docs {
            self.state.restore(&req.collection_path, &id, data);
        }
        tracing::debug!(action = %req.action, path = %req.collection_path, "write reverted");
        Ok(())
    }

    fn setup_module(&self, module: &ModuleRef) {
        let Some(initial) = module.plugin_config.get("initialData") else {
            return;
        };
        let path = &module.collection_path;

        match (&module.doc_id, initial) {
            (Some(id), data) => {
                if self.state.doc(path, id).is_none() {
                    self.state.put(path, id, data.clone());
                }
            }
            (None, Value::Object(docs)) => {
                for (id, data) in docs {
                    if self.state.doc(path, id).is_none() {
                        self.state.put(path, id, data.clone());
                    }
                }
            }
            (None, Value::Array(entries)) => {
                for entry in entries {
                    if let Some([Value::String(id), data]) = entry.as_array().map(Vec::as_slice) {
                        if self.state.doc(path, id).is_none() {
                            self.state.put(path, id, data.clone());
                        }
                    }
                }
            }
            (None, other) => {
                tracing::warn!(path = %path, initial = %other, "ignoring initialData that is not an object or entry list");
                return;
            }
        }
        tracing::debug!(path = %path, "initial data seeded");
    }

    fn module_data(&self, module: &ModuleRef) -> Option<ModuleData> {
        let path = &module.collection_path;
        if let Some(id) = &module.doc_id {
            return Some(ModuleData::Doc(self.state.doc(path, id)));
        }

        let clauses = module.plugin_config.clauses().unwrap_or_default();
        let mut docs: Vec<(String, Value)> = self
            .collection(path)
            .into_iter()
            .filter(|(_, doc)| {
                clauses
                    .where_clauses
                    .iter()
                    .all(|clause| matches_clause(doc, clause))
            })
            .collect();
        sort_docs(&mut docs, &clauses.order_by);
        docs.truncate(clauses.limit.unwrap_or(usize::MAX));
        Some(ModuleData::Collection(docs.into_iter().collect()))
    }
}
