//! # Tandem Engine
//!
//! Orchestrates data actions across several pluggable stores, typically a
//! fast local cache plus one or more remote sources of truth.
//!
//! Every write, delete, fetch or stream issued against a collection or a
//! document is fanned out to the configured stores in a fixed order. Hooks
//! observe and reshape the payload around each store call, and an error
//! policy decides what happens when a store fails.
//!
//! ## Core Concepts
//!
//! ### Stores
//!
//! A store implements [`StorePlugin`] and declares which actions it offers
//! through [`StorePlugin::actions`]. Stores that do not offer an action are
//! skipped for it.
//!
//! ### Modules
//!
//! [`Tandem::collection`] and [`Tandem::doc`] hand out cached
//! [`CollectionModule`] and [`DocModule`] façades. An odd number of path
//! segments names a collection, an even number a document.
//!
//! ### Configuration
//!
//! Config lives in three layers: [`GlobalConfig`], [`ModuleConfig`] and a
//! per-call [`ActionConfig`]. The execution order is looked up by action
//! name, then by [`ActionType`], most specific layer first. Hooks from all
//! layers run in global, module, call order.
//!
//! ### Error Policies
//!
//! - [`OnError::Stop`] - fail immediately
//! - [`OnError::Continue`] - log and carry on (default)
//! - [`OnError::Revert`] - roll back every store that already ran, newest first
//!
//! ### Streams
//!
//! Remote stores open subscriptions, local stores register handlers, and
//! the engine wires them together through [`MustExecuteOnRead`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tandem_engine::{ActionType, ExecutionOrder, GlobalConfig, OnError, StorePlugin, Tandem};
//!
//! # async fn run(local: Arc<dyn StorePlugin>, remote: Arc<dyn StorePlugin>) -> tandem_engine::Result<()> {
//! let tandem = Tandem::new(
//!     GlobalConfig::new()
//!         .with_store("local", local)
//!         .with_store("remote", remote)
//!         .with_local_store("local")
//!         .with_on_error(OnError::Revert)
//!         .with_execution_order(
//!             ExecutionOrder::new()
//!                 .action_type(ActionType::Write, ["local", "remote"])
//!                 .action_type(ActionType::Read, ["remote", "local"]),
//!         ),
//! );
//!
//! let pokedex = tandem.collection("pokedex")?;
//! let bulbasaur = pokedex.doc("001")?;
//! bulbasaur.insert(json!({ "name": "Bulbasaur" })).await?;
//! bulbasaur.merge(json!({ "type": "grass" })).await?;
//! assert_eq!(bulbasaur.data()?, Some(json!({ "name": "Bulbasaur", "type": "grass" })));
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod config;
mod dispatch;
pub mod error;
pub mod hooks;
pub mod module;
pub mod path;
pub mod plugin;
pub mod query;
pub mod registry;
pub mod stream;

// Re-export main types at crate root
pub use action::{ActionName, ActionSet, ActionType};
pub use config::{
    resolve_execution_order, resolve_on_error, resolve_plugin_config, ActionConfig, ConfigLayer,
    EffectiveConfig, ExecutionOrder, GlobalConfig, ModuleConfig, OnError,
};
pub use error::{Error, ErrorSource, PluginError, Result};
pub use hooks::{
    AbortSignal, DocChange, EventContext, EventHook, EventHooks, EventName, HookFuture,
    PayloadModifier, PayloadModifiers, ReadResponseModifiers, ResponseModifier,
};
pub use module::{CollectionModule, DocModule, ModuleInstance};
pub use path::{ModuleKind, ModulePath};
pub use plugin::{
    ActionRequest, ActionResult, DoOnFetch, DoOnStream, DocCallback, DocMetadata, FetchOutcome,
    FetchResponse, FetchedDoc, ModuleData, ModuleRef, MustExecuteOnRead, RevertRequest, StopFn,
    StorePlugin, StreamOutcome, StreamRequest, StreamResponse,
};
pub use query::{
    OrderByClause, OrderDirection, PluginModuleConfig, QueryClauses, WhereClause, WhereFilterOp,
};
pub use registry::Tandem;
pub use stream::{OpenStreams, StreamHandle, StreamKey, Unsubscribe};

/// Store plugins implement [`StorePlugin`] with this attribute.
pub use async_trait::async_trait;

/// Name a store is registered under.
pub type StoreName = String;
