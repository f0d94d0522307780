//! Collection and document façades.
//!
//! A module binds the dispatchers to one path and one module config. Query
//! builders (`where_clause`, `order_by`, `limit`) never touch the receiver;
//! they return another module carrying the extended clause set.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::config::{ActionConfig, EffectiveConfig, ModuleConfig};
use crate::dispatch::{dispatch, ActionInvocation, DispatchOutcome, DispatchState};
use crate::path::{ModuleKind, ModulePath};
use crate::stream::{open_stream, OpenStreams, StreamHandle, StreamInvocation};
use crate::{
    ActionName, Error, ModuleData, ModuleRef, OrderByClause, OrderDirection, Result, Tandem,
    WhereClause, WhereFilterOp,
};

/// Shared state behind every handle to one module.
pub(crate) struct ModuleState {
    pub(crate) tandem: Tandem,
    pub(crate) path: ModulePath,
    pub(crate) config: ModuleConfig,
    pub(crate) open_streams: Arc<OpenStreams>,
}

impl ModuleState {
    fn module_ref(&self, store: &str) -> ModuleRef {
        ModuleRef {
            collection_path: self.path.collection_path().to_string(),
            doc_id: self.path.doc_id().map(str::to_string),
            plugin_config: self.config.plugin_config(store),
        }
    }

    async fn dispatch(
        &self,
        action: ActionName,
        payload: Value,
        call: &ActionConfig,
    ) -> Result<DispatchOutcome> {
        let global = self.tandem.global();
        let config = EffectiveConfig::resolve(action, &global.layer, &self.config.layer, call)?;

        let outcome = dispatch(ActionInvocation {
            global,
            module: &self.config,
            collection_path: self.path.collection_path().to_string(),
            doc_id: self.path.doc_id().map(str::to_string),
            action,
            payload,
            config,
        })
        .await?;

        if outcome.state == DispatchState::Aborted {
            tracing::debug!(action = %action, path = %self.path, "dispatch ended early by abort");
        }
        Ok(outcome)
    }

    async fn stream(&self, payload: Value, call: &ActionConfig) -> Result<StreamHandle> {
        let global = self.tandem.global();
        let config = match EffectiveConfig::resolve(
            ActionName::Stream,
            &global.layer,
            &self.config.layer,
            call,
        ) {
            Err(Error::NoExecutionOrder(_)) => return Err(Error::NoStreamStores),
            other => other?,
        };

        open_stream(StreamInvocation {
            global,
            module: &self.config,
            collection_path: self.path.collection_path().to_string(),
            doc_id: self.path.doc_id().map(str::to_string),
            payload,
            config,
            open_streams: &self.open_streams,
        })
        .await
    }

    /// Ask the data store for this module's current data.
    fn data(&self) -> Result<Option<ModuleData>> {
        let global = self.tandem.global();
        let name = self
            .config
            .data_store_name
            .as_ref()
            .or(global.data_store_name.as_ref())
            .or(global.local_store_name.as_ref())
            .ok_or(Error::NoDataStoreName)?;
        let store = global.store(name)?;
        Ok(store.module_data(&self.module_ref(name)))
    }
}

/// Pick the module a finished action resolves to.
///
/// A collection insert that produced an id resolves to the new document,
/// with a fresh module config. Actions on documents resolve to the same
/// document. Everything else resolves to the collection itself.
fn resolve_instance(
    state: &Arc<ModuleState>,
    action: ActionName,
    outcome: &DispatchOutcome,
) -> ModuleInstance {
    match (state.path.kind(), outcome.doc_id.as_deref()) {
        (ModuleKind::Doc, _) => ModuleInstance::Doc(DocModule {
            state: Arc::clone(state),
        }),
        (ModuleKind::Collection, Some(doc_id)) => {
            tracing::trace!(action = %action, doc_id = %doc_id, "resolved to new document");
            let path = ModulePath::doc(state.path.collection_path(), doc_id);
            ModuleInstance::Doc(DocModule {
                state: state.tandem.module_state(path, ModuleConfig::default()),
            })
        }
        (ModuleKind::Collection, None) => ModuleInstance::Collection(CollectionModule {
            state: Arc::clone(state),
        }),
    }
}

fn child_segment(parent: &ModulePath, id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') {
        return Err(Error::InvalidPath {
            path: format!("{parent}/{id}"),
            reason: "child id must be a single non-empty segment".to_string(),
        });
    }
    Ok(())
}

/// A module bound to a collection.
#[derive(Clone)]
pub struct CollectionModule {
    pub(crate) state: Arc<ModuleState>,
}

impl CollectionModule {
    pub fn path(&self) -> &str {
        self.state.path.collection_path()
    }

    /// The last path segment.
    pub fn id(&self) -> &str {
        self.state.path.id()
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.state.config
    }

    /// True if both handles point at the same cached module.
    pub fn ptr_eq(&self, other: &CollectionModule) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// A document in this collection.
    pub fn doc(&self, id: &str) -> Result<DocModule> {
        self.doc_with(id, ModuleConfig::default())
    }

    pub fn doc_with(&self, id: &str, config: ModuleConfig) -> Result<DocModule> {
        child_segment(&self.state.path, id)?;
        let path = ModulePath::doc(self.path(), id);
        Ok(DocModule {
            state: self.state.tandem.module_state(path, config),
        })
    }

    /// A new module with a where clause appended.
    pub fn where_clause(&self, field: impl Into<String>, op: WhereFilterOp, value: Value) -> Self {
        let mut config = self.state.config.clone();
        config
            .clauses
            .where_clauses
            .push(WhereClause(field.into(), op, value));
        self.with_config(config)
    }

    /// A new module with an order-by clause appended.
    pub fn order_by(&self, field: impl Into<String>, direction: OrderDirection) -> Self {
        let mut config = self.state.config.clone();
        config
            .clauses
            .order_by
            .push(OrderByClause(field.into(), direction));
        self.with_config(config)
    }

    /// A new module with the limit set.
    pub fn limit(&self, limit: usize) -> Self {
        let mut config = self.state.config.clone();
        config.clauses.limit = Some(limit);
        self.with_config(config)
    }

    fn with_config(&self, config: ModuleConfig) -> Self {
        Self {
            state: self
                .state
                .tandem
                .module_state(self.state.path.clone(), config),
        }
    }

    /// Current documents from the data store, keyed by id.
    pub fn data(&self) -> Result<BTreeMap<String, Value>> {
        match self.state.data()? {
            Some(ModuleData::Collection(docs)) => Ok(docs),
            _ => Ok(BTreeMap::new()),
        }
    }

    pub fn open_streams(&self) -> &OpenStreams {
        &self.state.open_streams
    }

    /// Insert a document. Resolves to the new document when a store assigned an id.
    pub async fn insert(&self, payload: Value) -> Result<ModuleInstance> {
        self.execute(ActionName::Insert, payload, &ActionConfig::default())
            .await
    }

    /// Delete one id (a string) or several (an array of strings).
    pub async fn delete(&self, ids: Value) -> Result<ModuleInstance> {
        self.execute(ActionName::Delete, ids, &ActionConfig::default())
            .await
    }

    pub async fn fetch(&self) -> Result<ModuleInstance> {
        self.execute(
            ActionName::Fetch,
            Value::Object(Default::default()),
            &ActionConfig::default(),
        )
        .await
    }

    pub async fn stream(&self, payload: Value) -> Result<StreamHandle> {
        self.stream_with(payload, &ActionConfig::default()).await
    }

    pub async fn stream_with(&self, payload: Value, config: &ActionConfig) -> Result<StreamHandle> {
        self.state.stream(payload, config).await
    }

    /// Run any action with a call-site config.
    ///
    /// `Stream` opens the stream and resolves to this module. Nothing is
    /// delivered until the stream is driven: await the handle from
    /// `open_streams().handle(&payload)`, or use [`stream_with`](Self::stream_with).
    pub async fn execute(
        &self,
        action: ActionName,
        payload: Value,
        config: &ActionConfig,
    ) -> Result<ModuleInstance> {
        if action == ActionName::Stream {
            self.state.stream(payload, config).await?;
            return Ok(ModuleInstance::Collection(self.clone()));
        }
        let outcome = self.state.dispatch(action, payload, config).await?;
        Ok(resolve_instance(&self.state, action, &outcome))
    }
}

impl fmt::Debug for CollectionModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionModule")
            .field("path", &self.path())
            .field("clauses", &self.state.config.clauses)
            .finish()
    }
}

/// A module bound to a document.
#[derive(Clone)]
pub struct DocModule {
    pub(crate) state: Arc<ModuleState>,
}

impl DocModule {
    /// Full path, `collection_path/id`.
    pub fn path(&self) -> String {
        self.state.path.to_string()
    }

    pub fn id(&self) -> &str {
        self.state.path.id()
    }

    pub fn collection_path(&self) -> &str {
        self.state.path.collection_path()
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.state.config
    }

    pub fn ptr_eq(&self, other: &DocModule) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// A sub-collection under this document.
    pub fn collection(&self, id: &str) -> Result<CollectionModule> {
        self.collection_with(id, ModuleConfig::default())
    }

    pub fn collection_with(&self, id: &str, config: ModuleConfig) -> Result<CollectionModule> {
        child_segment(&self.state.path, id)?;
        let path = ModulePath::collection(format!("{}/{}", self.path(), id));
        Ok(CollectionModule {
            state: self.state.tandem.module_state(path, config),
        })
    }

    /// Current document data from the data store.
    pub fn data(&self) -> Result<Option<Value>> {
        match self.state.data()? {
            Some(ModuleData::Doc(doc)) => Ok(doc),
            _ => Ok(None),
        }
    }

    pub fn open_streams(&self) -> &OpenStreams {
        &self.state.open_streams
    }

    pub async fn insert(&self, payload: Value) -> Result<DocModule> {
        self.execute(ActionName::Insert, payload, &ActionConfig::default())
            .await
    }

    /// Deep-merge the payload into the document.
    pub async fn merge(&self, payload: Value) -> Result<DocModule> {
        self.execute(ActionName::Merge, payload, &ActionConfig::default())
            .await
    }

    /// Overwrite the payload's top-level keys.
    pub async fn assign(&self, payload: Value) -> Result<DocModule> {
        self.execute(ActionName::Assign, payload, &ActionConfig::default())
            .await
    }

    /// Replace the whole document.
    pub async fn replace(&self, payload: Value) -> Result<DocModule> {
        self.execute(ActionName::Replace, payload, &ActionConfig::default())
            .await
    }

    /// Remove properties by dot-separated path.
    pub async fn delete_prop<I, S>(&self, props: I) -> Result<DocModule>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let props = props
            .into_iter()
            .map(|prop| Value::String(prop.into()))
            .collect();
        self.execute(
            ActionName::DeleteProp,
            Value::Array(props),
            &ActionConfig::default(),
        )
        .await
    }

    pub async fn delete(&self) -> Result<DocModule> {
        self.execute(ActionName::Delete, Value::Null, &ActionConfig::default())
            .await
    }

    pub async fn fetch(&self) -> Result<DocModule> {
        self.execute(
            ActionName::Fetch,
            Value::Object(Default::default()),
            &ActionConfig::default(),
        )
        .await
    }

    pub async fn stream(&self, payload: Value) -> Result<StreamHandle> {
        self.stream_with(payload, &ActionConfig::default()).await
    }

    pub async fn stream_with(&self, payload: Value, config: &ActionConfig) -> Result<StreamHandle> {
        self.state.stream(payload, config).await
    }

    /// Run any action with a call-site config. Always resolves to this document.
    ///
    /// As on collections, a stream opened here must be driven through
    /// `open_streams().handle(&payload)`.
    pub async fn execute(
        &self,
        action: ActionName,
        payload: Value,
        config: &ActionConfig,
    ) -> Result<DocModule> {
        if action == ActionName::Stream {
            self.state.stream(payload, config).await?;
        } else {
            self.state.dispatch(action, payload, config).await?;
        }
        Ok(self.clone())
    }
}

impl fmt::Debug for DocModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocModule")
            .field("path", &self.path())
            .finish()
    }
}

/// The module an action resolved to.
#[derive(Debug, Clone)]
pub enum ModuleInstance {
    Collection(CollectionModule),
    Doc(DocModule),
}

impl ModuleInstance {
    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleInstance::Collection(_) => ModuleKind::Collection,
            ModuleInstance::Doc(_) => ModuleKind::Doc,
        }
    }

    pub fn path(&self) -> String {
        match self {
            ModuleInstance::Collection(module) => module.path().to_string(),
            ModuleInstance::Doc(module) => module.path(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ModuleInstance::Collection(module) => module.id(),
            ModuleInstance::Doc(module) => module.id(),
        }
    }

    pub fn into_doc(self) -> Option<DocModule> {
        match self {
            ModuleInstance::Doc(module) => Some(module),
            ModuleInstance::Collection(_) => None,
        }
    }

    pub fn into_collection(self) -> Option<CollectionModule> {
        match self {
            ModuleInstance::Collection(module) => Some(module),
            ModuleInstance::Doc(_) => None,
        }
    }
}
