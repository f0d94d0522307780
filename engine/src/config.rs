//! Layered configuration.
//!
//! Every invocation merges three layers: the global config, the module's
//! config and the call-site config. Hooks and modifiers are concatenated in
//! that order; scalar settings use the most specific layer that sets them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::hooks::{
    DocChange, EventHook, EventHooks, EventName, PayloadModifier, PayloadModifiers,
    ReadResponseModifiers, ResponseModifier,
};
use crate::{
    ActionName, ActionType, Error, PluginModuleConfig, QueryClauses, Result, StoreName,
    StorePlugin,
};

/// What to do when a store fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Halt and return the error. Stores that already ran keep their changes.
    Stop,
    /// Log the error and move on to the next store.
    #[default]
    Continue,
    /// Revert every store that already ran, in reverse order, then return the error.
    Revert,
}

/// Store order per action name or action type.
///
/// Keys are action names (`"merge"`) or action types (`"write"`); `"delete"`
/// is both, which is why keys stay plain strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionOrder(BTreeMap<String, Vec<StoreName>>);

impl ExecutionOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the order for one action.
    pub fn action<I, S>(mut self, action: ActionName, stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StoreName>,
    {
        self.0.insert(
            action.as_str().to_string(),
            stores.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Set the order for every action of a type.
    pub fn action_type<I, S>(mut self, action_type: ActionType, stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StoreName>,
    {
        self.0.insert(
            action_type.to_string(),
            stores.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// The non-empty order registered under `key`.
    pub fn get(&self, key: &str) -> Option<&[StoreName]> {
        self.0
            .get(key)
            .map(Vec::as_slice)
            .filter(|stores| !stores.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Settings shared by all three config layers.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayer {
    pub execution_order: ExecutionOrder,
    pub on_error: Option<OnError>,
    pub on: EventHooks,
    pub modify_payload_on: PayloadModifiers,
    pub modify_read_response_on: ReadResponseModifiers,
}

impl ConfigLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution_order(mut self, order: ExecutionOrder) -> Self {
        self.execution_order = order;
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = Some(on_error);
        self
    }

    /// Register a lifecycle hook.
    pub fn on(mut self, event: EventName, hook: EventHook) -> Self {
        self.on = self.on.on(event, hook);
        self
    }

    /// Register a payload modifier for an action.
    pub fn modify_payload_on(mut self, action: ActionName, modifier: PayloadModifier) -> Self {
        self.modify_payload_on
            .entry(action)
            .or_default()
            .push(modifier);
        self
    }

    /// Register a read-response modifier.
    pub fn modify_read_response_on(mut self, change: DocChange, modifier: ResponseModifier) -> Self {
        self.modify_read_response_on = self.modify_read_response_on.on(change, modifier);
        self
    }
}

/// Config applied to a single action call.
pub type ActionConfig = ConfigLayer;

/// Process-wide configuration: the registered stores and the base layer.
#[derive(Clone, Default)]
pub struct GlobalConfig {
    pub stores: BTreeMap<StoreName, Arc<dyn StorePlugin>>,
    /// The store that keeps local state. Used as the data store when none is set.
    pub local_store_name: Option<StoreName>,
    /// The store `data()` reads from.
    pub data_store_name: Option<StoreName>,
    pub layer: ConfigLayer,
}

impl GlobalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under a name.
    pub fn with_store(mut self, name: impl Into<StoreName>, store: Arc<dyn StorePlugin>) -> Self {
        self.stores.insert(name.into(), store);
        self
    }

    pub fn with_local_store(mut self, name: impl Into<StoreName>) -> Self {
        self.local_store_name = Some(name.into());
        self
    }

    pub fn with_data_store(mut self, name: impl Into<StoreName>) -> Self {
        self.data_store_name = Some(name.into());
        self
    }

    pub fn with_layer(mut self, layer: ConfigLayer) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_execution_order(mut self, order: ExecutionOrder) -> Self {
        self.layer.execution_order = order;
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.layer.on_error = Some(on_error);
        self
    }

    pub fn on(mut self, event: EventName, hook: EventHook) -> Self {
        self.layer = self.layer.on(event, hook);
        self
    }

    pub(crate) fn store(&self, name: &str) -> Result<&Arc<dyn StorePlugin>> {
        self.stores
            .get(name)
            .ok_or_else(|| Error::UnknownStore(name.to_string()))
    }
}

impl fmt::Debug for GlobalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalConfig")
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .field("local_store_name", &self.local_store_name)
            .field("data_store_name", &self.data_store_name)
            .field("layer", &self.layer)
            .finish()
    }
}

/// Per-module configuration.
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    pub layer: ConfigLayer,
    /// Extra settings handed to one store only, e.g. `initialData`.
    pub config_per_store: BTreeMap<StoreName, Map<String, Value>>,
    pub clauses: QueryClauses,
    /// Overrides the global data store for this module.
    pub data_store_name: Option<StoreName>,
}

impl ModuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: ConfigLayer) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_execution_order(mut self, order: ExecutionOrder) -> Self {
        self.layer.execution_order = order;
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.layer.on_error = Some(on_error);
        self
    }

    pub fn on(mut self, event: EventName, hook: EventHook) -> Self {
        self.layer = self.layer.on(event, hook);
        self
    }

    /// Set config for a single store. Must be a JSON object; anything else is ignored.
    pub fn with_store_config(mut self, store: impl Into<StoreName>, config: Value) -> Self {
        if let Value::Object(map) = config {
            self.config_per_store.insert(store.into(), map);
        }
        self
    }

    pub fn with_clauses(mut self, clauses: QueryClauses) -> Self {
        self.clauses = clauses;
        self
    }

    pub fn with_data_store(mut self, name: impl Into<StoreName>) -> Self {
        self.data_store_name = Some(name.into());
        self
    }

    /// The module config as seen by `store`.
    pub fn plugin_config(&self, store: &str) -> PluginModuleConfig {
        resolve_plugin_config(self, store)
    }
}

/// Merge a module's clauses with one store's overrides; the store wins.
pub fn resolve_plugin_config(module: &ModuleConfig, store: &str) -> PluginModuleConfig {
    PluginModuleConfig::resolve(&module.clauses, module.config_per_store.get(store))
}

/// Pick the store order for an action.
///
/// Preference: call site by action name, module by action name, module by
/// action type, global by action name, global by action type.
pub fn resolve_execution_order(
    action: ActionName,
    global: &ConfigLayer,
    module: &ConfigLayer,
    call: &ConfigLayer,
) -> Result<Vec<StoreName>> {
    let name = action.as_str();
    let action_type = action.action_type().to_string();

    [
        call.execution_order.get(name),
        module.execution_order.get(name),
        module.execution_order.get(&action_type),
        global.execution_order.get(name),
        global.execution_order.get(&action_type),
    ]
    .into_iter()
    .flatten()
    .next()
    .map(<[StoreName]>::to_vec)
    .ok_or(Error::NoExecutionOrder(action))
}

/// Concatenate hook maps, preserving layer order.
pub fn merge_hook_maps<'a>(layers: impl IntoIterator<Item = &'a EventHooks>) -> EventHooks {
    let mut merged = EventHooks::new();
    for layer in layers {
        merged.extend(layer);
    }
    merged
}

/// Most specific `on_error` wins; `Continue` when nobody sets one.
pub fn resolve_on_error(global: &ConfigLayer, module: &ConfigLayer, call: &ConfigLayer) -> OnError {
    call.on_error
        .or(module.on_error)
        .or(global.on_error)
        .unwrap_or_default()
}

/// The merged configuration for one invocation.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub execution_order: Vec<StoreName>,
    pub on_error: OnError,
    pub on: EventHooks,
    /// Payload modifiers for this action, in layer order.
    pub modify_payload: Vec<PayloadModifier>,
    pub modify_read_response: ReadResponseModifiers,
}

impl EffectiveConfig {
    pub fn resolve(
        action: ActionName,
        global: &ConfigLayer,
        module: &ConfigLayer,
        call: &ConfigLayer,
    ) -> Result<Self> {
        let execution_order = resolve_execution_order(action, global, module, call)?;
        let layers = [global, module, call];

        let modify_payload = layers
            .iter()
            .filter_map(|layer| layer.modify_payload_on.get(&action))
            .flatten()
            .cloned()
            .collect();

        let mut modify_read_response = ReadResponseModifiers::default();
        for layer in &layers {
            modify_read_response.extend(&layer.modify_read_response_on);
        }

        Ok(Self {
            execution_order,
            on_error: resolve_on_error(global, module, call),
            on: merge_hook_maps(layers.iter().map(|layer| &layer.on)),
            modify_payload,
            modify_read_response,
        })
    }
}
