//! Action dispatcher for insert, merge, assign, replace, deleteProp, delete and fetch.
//!
//! Stores run strictly one after another in execution order:
//!
//! ```text
//! for store in order:
//!     aborted?            -> stop iterating
//!     action not offered? -> skip
//!     before hooks        -> aborted? stop iterating
//!     store action
//!         ok  -> success hooks, remember the store as executed
//!         err -> error hooks, then by policy:
//!                  stop     -> return the error now
//!                  revert   -> leave the loop and roll back
//!                  continue -> log and go on to the next store
//! rollback: revert executed stores in reverse, then return the error
//! ```

use serde_json::Value;

use crate::config::{EffectiveConfig, GlobalConfig, ModuleConfig, OnError};
use crate::hooks::{
    apply_payload_modifiers, apply_response_modifiers, run_sequential, AbortSignal, EventContext,
    EventName,
};
use crate::plugin::{invoke, InvokeOutcome};
use crate::{
    ActionName, ActionRequest, ActionResult, DoOnFetch, Error, FetchResponse, PluginError, Result,
    RevertRequest, StoreName,
};

/// One call of an action against a module.
pub(crate) struct ActionInvocation<'a> {
    pub global: &'a GlobalConfig,
    pub module: &'a ModuleConfig,
    pub collection_path: String,
    pub doc_id: Option<String>,
    pub action: ActionName,
    pub payload: Value,
    pub config: EffectiveConfig,
}

/// How a dispatch ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchState {
    Success,
    Aborted,
}

/// What a successful dispatch hands back to the module factory.
#[derive(Debug, Clone)]
pub(crate) struct DispatchOutcome {
    pub doc_id: Option<String>,
    pub state: DispatchState,
}

/// Mutable state scoped to one invocation.
struct StoreExecutionState {
    abort: AbortSignal,
    revert_with: Option<PluginError>,
    executed: Vec<ExecutedStore>,
    fetch_registrations: Vec<DoOnFetch>,
}

/// A store that completed its action, with the payload it received.
struct ExecutedStore {
    name: StoreName,
    payload: Value,
    result: ActionResult,
}

impl StoreExecutionState {
    fn new() -> Self {
        Self {
            abort: AbortSignal::new(),
            revert_with: None,
            executed: Vec::new(),
            fetch_registrations: Vec::new(),
        }
    }
}

/// Run an action across the configured stores.
pub(crate) async fn dispatch(inv: ActionInvocation<'_>) -> Result<DispatchOutcome> {
    let ActionInvocation {
        global,
        module,
        collection_path,
        mut doc_id,
        action,
        payload,
        config,
    } = inv;

    // Every named store must exist before anything runs.
    for name in &config.execution_order {
        global.store(name)?;
    }

    let mut payload = apply_payload_modifiers(&config.modify_payload, payload).await;
    let mut state = StoreExecutionState::new();

    for store_name in &config.execution_order {
        if state.abort.is_aborted() {
            tracing::debug!(action = %action, store = %store_name, "execution aborted, skipping remaining stores");
            break;
        }

        let plugin = global.store(store_name)?;
        if !plugin.actions().contains(action) {
            tracing::trace!(action = %action, store = %store_name, "store does not implement action");
            continue;
        }

        let plugin_config = module.plugin_config(store_name);
        let ctx = EventContext::new(
            EventName::Before,
            payload.clone(),
            action,
            store_name,
            &collection_path,
            doc_id.as_deref(),
            plugin_config.clone(),
        )
        .with_abort(&state.abort);

        payload = run_sequential(&config.on.before, ctx.clone()).await;
        if state.abort.is_aborted() {
            tracing::debug!(action = %action, store = %store_name, "aborted by before hook");
            break;
        }

        tracing::debug!(action = %action, store = %store_name, path = %collection_path, doc_id = ?doc_id, "running store action");

        let request = ActionRequest {
            payload: payload.clone(),
            collection_path: collection_path.clone(),
            doc_id: doc_id.clone(),
            plugin_config,
        };

        match invoke(plugin.as_ref(), action, request).await {
            Ok(outcome) => {
                let result = match outcome {
                    InvokeOutcome::Result(ActionResult::DocId(id)) => {
                        if doc_id.is_none() {
                            tracing::debug!(store = %store_name, doc_id = %id, "adopting generated doc id");
                            doc_id = Some(id.clone());
                        }
                        ActionResult::DocId(id)
                    }
                    InvokeOutcome::Result(result) => result,
                    InvokeOutcome::FetchRegister(register) => {
                        state.fetch_registrations.push(register);
                        ActionResult::FetchRegistered
                    }
                    InvokeOutcome::Fetched(response) => {
                        ActionResult::Fetched(feed_fetched_docs(&config, &state, response))
                    }
                };

                let success = ctx
                    .for_event(EventName::Success)
                    .with_payload(payload.clone())
                    .with_doc_id(doc_id.as_deref())
                    .with_result(result.clone());
                run_sequential(&config.on.success, success).await;

                state.executed.push(ExecutedStore {
                    name: store_name.clone(),
                    payload: payload.clone(),
                    result,
                });
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

                match config.on_error {
                    OnError::Stop => {
                        state.abort.abort();
                        tracing::debug!(action = %action, store = %store_name, error = %err, "store failed, stopping");
                        return Err(Error::Plugin(err));
                    }
                    OnError::Revert => {
                        tracing::debug!(action = %action, store = %store_name, error = %err, "store failed, reverting");
                        state.revert_with = Some(err);
                        break;
                    }
                    OnError::Continue => {
                        tracing::warn!(action = %action, store = %store_name, error = %err, "store failed, continuing");
                    }
                }
            }
        }
    }

    if let Some(err) = state.revert_with.take() {
        revert_executed(
            global,
            module,
            &config,
            &collection_path,
            doc_id.as_deref(),
            action,
            &state,
            &err,
        )
        .await;
        return Err(Error::Plugin(err));
    }

    let dispatch_state = if state.abort.is_aborted() {
        DispatchState::Aborted
    } else {
        DispatchState::Success
    };

    Ok(DispatchOutcome {
        doc_id,
        state: dispatch_state,
    })
}

/// Pass fetched docs through `added` modifiers and into every local registration.
fn feed_fetched_docs(
    config: &EffectiveConfig,
    state: &StoreExecutionState,
    response: FetchResponse,
) -> FetchResponse {
    let mut docs = Vec::with_capacity(response.docs.len());
    for mut doc in response.docs {
        let Some(data) =
            apply_response_modifiers(&config.modify_read_response.added, doc.data, &doc.metadata)
        else {
            continue;
        };
        for register in &state.fetch_registrations {
            register.call(data.clone(), &doc.metadata);
        }
        doc.data = data;
        docs.push(doc);
    }
    FetchResponse { docs }
}

/// Undo every executed store, newest first.
///
/// A failing revert is logged and skipped; the rollback carries on.
#[allow(clippy::too_many_arguments)]
async fn revert_executed(
    global: &GlobalConfig,
    module: &ModuleConfig,
    config: &EffectiveConfig,
    collection_path: &str,
    doc_id: Option<&str>,
    action: ActionName,
    state: &StoreExecutionState,
    error: &PluginError,
) {
    for executed in state.executed.iter().rev() {
        let Ok(plugin) = global.store(&executed.name) else {
            continue;
        };
        let plugin_config = module.plugin_config(&executed.name);

        tracing::debug!(action = %action, store = %executed.name, "reverting store");
        let request = RevertRequest {
            payload: executed.payload.clone(),
            collection_path: collection_path.to_string(),
            doc_id: doc_id.map(str::to_string),
            plugin_config: plugin_config.clone(),
            action,
            error: error.clone(),
        };

        if let Err(revert_err) = plugin.revert(request).await {
            tracing::error!(
                action = %action,
                store = %executed.name,
                error = %revert_err,
                "revert failed, continuing rollback"
            );
            continue;
        }

        let ctx = EventContext::new(
            EventName::Revert,
            executed.payload.clone(),
            action,
            &executed.name,
            collection_path,
            doc_id,
            plugin_config,
        )
        .with_result(executed.result.clone())
        .with_error(error.clone());
        run_sequential(&config.on.revert, ctx).await;
    }
}
