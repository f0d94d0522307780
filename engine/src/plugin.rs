//! The contract every store plugin implements.
//!
//! A store declares the actions it supports through [`StorePlugin::actions`].
//! The dispatcher never calls a method for an action outside that set; such a
//! store is skipped and the previous store's result is carried forward.
//!
//! Reads come in two shapes. An authoritative store (a remote database)
//! answers with documents ([`FetchOutcome::Response`], [`StreamOutcome::Opened`]).
//! A local mirror instead registers callbacks ([`FetchOutcome::Register`],
//! [`StreamOutcome::Register`]) that the dispatcher feeds with whatever the
//! authoritative stores produce.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ActionName, ActionSet, PluginError, PluginModuleConfig};

/// The module a plugin call is about.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRef {
    pub collection_path: String,
    pub doc_id: Option<String>,
    pub plugin_config: PluginModuleConfig,
}

/// Arguments for insert/merge/assign/replace/deleteProp/delete/fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub payload: Value,
    pub collection_path: String,
    pub doc_id: Option<String>,
    pub plugin_config: PluginModuleConfig,
}

/// Arguments for a compensating revert.
#[derive(Debug, Clone)]
pub struct RevertRequest {
    pub payload: Value,
    pub collection_path: String,
    pub doc_id: Option<String>,
    pub plugin_config: PluginModuleConfig,
    /// The action being undone.
    pub action: ActionName,
    /// The error that triggered the rollback.
    pub error: PluginError,
}

/// Arguments for opening a stream.
#[derive(Clone)]
pub struct StreamRequest {
    pub payload: Value,
    pub collection_path: String,
    pub doc_id: Option<String>,
    pub plugin_config: PluginModuleConfig,
    /// Callbacks an authoritative store must call for every change it observes.
    pub must_execute_on_read: MustExecuteOnRead,
}

impl fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRequest")
            .field("payload", &self.payload)
            .field("collection_path", &self.collection_path)
            .field("doc_id", &self.doc_id)
            .finish_non_exhaustive()
    }
}

/// Metadata accompanying a document read from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocMetadata {
    pub id: String,
    pub exists: bool,
}

impl DocMetadata {
    pub fn existing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            exists: true,
        }
    }

    pub fn missing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            exists: false,
        }
    }
}

/// One document in a fetch response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedDoc {
    pub data: Value,
    pub metadata: DocMetadata,
}

/// Documents returned by an authoritative fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub docs: Vec<FetchedDoc>,
}

/// Callback receiving one document and its metadata.
pub type DocCallback = Arc<dyn Fn(Value, &DocMetadata) + Send + Sync>;

/// A local store's request to receive every fetched document.
#[derive(Clone)]
pub struct DoOnFetch(pub DocCallback);

impl DoOnFetch {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value, &DocMetadata) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, data: Value, metadata: &DocMetadata) {
        (self.0)(data, metadata)
    }
}

impl fmt::Debug for DoOnFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DoOnFetch")
    }
}

/// A local store's handlers for streamed changes. Any subset may be set.
#[derive(Clone, Default)]
pub struct DoOnStream {
    pub added: Option<DocCallback>,
    pub modified: Option<DocCallback>,
    pub removed: Option<DocCallback>,
}

impl DoOnStream {
    /// True if at least one handler is registered.
    pub fn has_handlers(&self) -> bool {
        self.added.is_some() || self.modified.is_some() || self.removed.is_some()
    }
}

impl fmt::Debug for DoOnStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DoOnStream")
            .field("added", &self.added.is_some())
            .field("modified", &self.modified.is_some())
            .field("removed", &self.removed.is_some())
            .finish()
    }
}

/// What a store returned from `fetch`.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The store is authoritative and answered with documents.
    Response(FetchResponse),
    /// The store mirrors documents fetched by other stores.
    Register(DoOnFetch),
}

/// Tears down one store's subscription.
pub type StopFn = Box<dyn FnOnce() + Send>;

/// A running subscription opened by an authoritative store.
pub struct StreamResponse {
    /// Resolves once the subscription ends.
    pub streaming: BoxFuture<'static, Result<(), PluginError>>,
    /// Ends the subscription.
    pub stop: StopFn,
}

impl fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamResponse")
    }
}

/// What a store returned from `stream`.
#[derive(Debug)]
pub enum StreamOutcome {
    Opened(StreamResponse),
    Register(DoOnStream),
}

/// Change callbacks handed to every streaming store.
///
/// Each call runs the read-response modifiers for that change kind and then
/// every handler local stores registered for it.
#[derive(Clone)]
pub struct MustExecuteOnRead {
    pub(crate) added: DocCallback,
    pub(crate) modified: DocCallback,
    pub(crate) removed: DocCallback,
}

impl MustExecuteOnRead {
    pub fn new(added: DocCallback, modified: DocCallback, removed: DocCallback) -> Self {
        Self {
            added,
            modified,
            removed,
        }
    }

    pub fn added(&self, data: Value, metadata: &DocMetadata) {
        (self.added)(data, metadata)
    }

    pub fn modified(&self, data: Value, metadata: &DocMetadata) {
        (self.modified)(data, metadata)
    }

    pub fn removed(&self, data: Value, metadata: &DocMetadata) {
        (self.removed)(data, metadata)
    }
}

/// Data a store exposes for a module.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleData {
    Doc(Option<Value>),
    Collection(BTreeMap<String, Value>),
}

/// Result of one store's run, carried between stores and handed to hooks.
#[derive(Debug, Clone)]
pub enum ActionResult {
    /// Nothing to report.
    Done,
    /// The id a store assigned on insert.
    DocId(String),
    /// Documents an authoritative store fetched.
    Fetched(FetchResponse),
    /// A local store registered to mirror fetched documents.
    FetchRegistered,
    /// An authoritative store opened a subscription.
    StreamOpened,
    /// A local store registered stream handlers.
    StreamRegistered,
}

/// A storage backend the engine can dispatch actions to.
///
/// Every action method has a default that fails with
/// [`PluginError::unsupported`]; stores override the ones listed in
/// [`actions`](StorePlugin::actions).
#[async_trait]
pub trait StorePlugin: Send + Sync {
    /// Actions this store implements.
    fn actions(&self) -> ActionSet;

    /// Insert a document. Returns the document id, generating one when the
    /// request has no `doc_id`.
    async fn insert(&self, req: ActionRequest) -> Result<String, PluginError> {
        let _ = req;
        Err(PluginError::unsupported(ActionName::Insert))
    }

    async fn merge(&self, req: ActionRequest) -> Result<(), PluginError> {
        let _ = req;
        Err(PluginError::unsupported(ActionName::Merge))
    }

    async fn assign(&self, req: ActionRequest) -> Result<(), PluginError> {
        let _ = req;
        Err(PluginError::unsupported(ActionName::Assign))
    }

    async fn replace(&self, req: ActionRequest) -> Result<(), PluginError> {
        let _ = req;
        Err(PluginError::unsupported(ActionName::Replace))
    }

    /// Remove properties. The payload is a string or an array of strings.
    async fn delete_prop(&self, req: ActionRequest) -> Result<(), PluginError> {
        let _ = req;
        Err(PluginError::unsupported(ActionName::DeleteProp))
    }

    /// Delete the document, or on a collection the id(s) in the payload.
    async fn delete(&self, req: ActionRequest) -> Result<(), PluginError> {
        let _ = req;
        Err(PluginError::unsupported(ActionName::Delete))
    }

    async fn fetch(&self, req: ActionRequest) -> Result<FetchOutcome, PluginError> {
        let _ = req;
        Err(PluginError::unsupported(ActionName::Fetch))
    }

    async fn stream(&self, req: StreamRequest) -> Result<StreamOutcome, PluginError> {
        let _ = req;
        Err(PluginError::unsupported(ActionName::Stream))
    }

    /// Undo a previously successful action after a later store failed.
    async fn revert(&self, req: RevertRequest) -> Result<(), PluginError> {
        Err(PluginError::new(format!(
            "revert of '{}' is not implemented by this store",
            req.action
        )))
    }

    /// Allocate local state for a module. Called once per path; must be idempotent.
    fn setup_module(&self, module: &ModuleRef) {
        let _ = module;
    }

    /// Current data for a module, for stores acting as the data store.
    fn module_data(&self, module: &ModuleRef) -> Option<ModuleData> {
        let _ = module;
        None
    }
}

/// Run one non-stream action against a store.
pub(crate) async fn invoke(
    plugin: &dyn StorePlugin,
    action: ActionName,
    req: ActionRequest,
) -> Result<InvokeOutcome, PluginError> {
    let done = InvokeOutcome::Result(ActionResult::Done);
    let outcome = match action {
        ActionName::Insert => InvokeOutcome::Result(ActionResult::DocId(plugin.insert(req).await?)),
        ActionName::Merge => plugin.merge(req).await.map(|_| done)?,
        ActionName::Assign => plugin.assign(req).await.map(|_| done)?,
        ActionName::Replace => plugin.replace(req).await.map(|_| done)?,
        ActionName::DeleteProp => plugin.delete_prop(req).await.map(|_| done)?,
        ActionName::Delete => plugin.delete(req).await.map(|_| done)?,
        ActionName::Fetch => match plugin.fetch(req).await? {
            FetchOutcome::Response(response) => InvokeOutcome::Fetched(response),
            FetchOutcome::Register(register) => InvokeOutcome::FetchRegister(register),
        },
        ActionName::Stream => return Err(PluginError::unsupported(ActionName::Stream)),
    };
    Ok(outcome)
}

/// Raw outcome of [`invoke`] before the dispatcher folds it into an [`ActionResult`].
pub(crate) enum InvokeOutcome {
    Result(ActionResult),
    Fetched(FetchResponse),
    FetchRegister(DoOnFetch),
}
