//! Action dispatch tests for tandem-engine
//!
//! Ordering, error policies, hooks and the module each action resolves to.

mod common;

use std::sync::{Arc, Mutex};

use common::{init_tracing, CallLog, MockStore};
use serde_json::{json, Value};
use tandem_engine::{
    ActionConfig, ActionName, ActionSet, ActionType, DocChange, Error, EventHook, EventName,
    ExecutionOrder, GlobalConfig, ModuleConfig, ModuleKind, OnError, PayloadModifier,
    ResponseModifier, StorePlugin, Tandem,
};

fn write_order(stores: &[&str]) -> ExecutionOrder {
    ExecutionOrder::new()
        .action_type(ActionType::Write, stores.iter().copied())
        .action_type(ActionType::Delete, stores.iter().copied())
        .action_type(ActionType::Read, stores.iter().copied())
}

fn tandem(
    stores: Vec<(&str, Arc<dyn StorePlugin>)>,
    order: ExecutionOrder,
    on_error: OnError,
) -> Tandem {
    init_tracing();
    let mut global = GlobalConfig::new()
        .with_execution_order(order)
        .with_on_error(on_error);
    for (name, store) in stores {
        global = global.with_store(name, store);
    }
    Tandem::new(global)
}

/// Hook that logs `event:store` into a shared list.
fn recording_hook(seen: &Arc<Mutex<Vec<String>>>) -> EventHook {
    let seen = Arc::clone(seen);
    EventHook::new(move |ctx| {
        seen.lock()
            .unwrap()
            .push(format!("{}:{}", ctx.event, ctx.store));
        None
    })
}

// ============================================================================
// Execution Order
// ============================================================================

#[tokio::test]
async fn stores_run_in_execution_order() {
    let log = CallLog::default();
    let tandem = tandem(
        vec![
            ("local", MockStore::new("local", &log).into_arc()),
            ("remote", MockStore::new("remote", &log).into_arc()),
        ],
        write_order(&["remote", "local"]),
        OnError::Stop,
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    log.clear();
    doc.merge(json!({ "name": "Bulbasaur" })).await.unwrap();

    assert_eq!(log.entries(), vec!["remote:merge", "local:merge"]);
}

#[tokio::test]
async fn action_order_beats_type_order() {
    let log = CallLog::default();
    let tandem = tandem(
        vec![
            ("local", MockStore::new("local", &log).into_arc()),
            ("remote", MockStore::new("remote", &log).into_arc()),
        ],
        write_order(&["local", "remote"]),
        OnError::Stop,
    );

    let doc = tandem
        .doc_with(
            "pokedex/001",
            ModuleConfig::new()
                .with_execution_order(ExecutionOrder::new().action(ActionName::Merge, ["remote"])),
        )
        .unwrap();
    log.clear();

    doc.merge(json!({})).await.unwrap();
    assert_eq!(log.entries(), vec!["remote:merge"]);

    log.clear();
    doc.assign(json!({})).await.unwrap();
    assert_eq!(log.entries(), vec!["local:assign", "remote:assign"]);

    log.clear();
    let call = ActionConfig::new()
        .with_execution_order(ExecutionOrder::new().action(ActionName::Assign, ["local"]));
    doc.execute(ActionName::Assign, json!({}), &call).await.unwrap();
    assert_eq!(log.entries(), vec!["local:assign"]);
}

#[tokio::test]
async fn missing_execution_order_fails() {
    let log = CallLog::default();
    let tandem = tandem(
        vec![("local", MockStore::new("local", &log).into_arc())],
        ExecutionOrder::new().action_type(ActionType::Write, ["local"]),
        OnError::Stop,
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    let err = doc.delete().await.unwrap_err();
    assert!(matches!(err, Error::NoExecutionOrder(ActionName::Delete)));
}

#[tokio::test]
async fn unknown_store_fails_before_any_store_runs() {
    let log = CallLog::default();
    let tandem = tandem(
        vec![("local", MockStore::new("local", &log).into_arc())],
        write_order(&["local", "nowhere"]),
        OnError::Stop,
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    log.clear();
    let err = doc.merge(json!({})).await.unwrap_err();

    assert!(matches!(err, Error::UnknownStore(ref name) if name == "nowhere"));
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn stores_without_the_action_are_skipped() {
    let log = CallLog::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let read_only = ActionSet::empty().with(ActionName::Fetch);
    let tandem = Tandem::new(
        GlobalConfig::new()
            .with_store("local", MockStore::new("local", &log).into_arc())
            .with_store(
                "cache",
                MockStore::new("cache", &log)
                    .with_actions(read_only)
                    .into_arc(),
            )
            .with_execution_order(write_order(&["local", "cache"]))
            .on(EventName::Before, recording_hook(&seen)),
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    log.clear();
    doc.merge(json!({})).await.unwrap();

    assert_eq!(log.entries(), vec!["local:merge"]);
    assert_eq!(*seen.lock().unwrap(), vec!["before:local"]);
}

// ============================================================================
// Error Policies
// ============================================================================

#[tokio::test]
async fn stop_policy_fails_fast() {
    let log = CallLog::default();
    let tandem = tandem(
        vec![
            ("a", MockStore::new("a", &log).into_arc()),
            (
                "b",
                MockStore::new("b", &log)
                    .failing_on(ActionName::Merge)
                    .into_arc(),
            ),
            ("c", MockStore::new("c", &log).into_arc()),
        ],
        write_order(&["a", "b", "c"]),
        OnError::Stop,
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    log.clear();
    let err = doc.merge(json!({})).await.unwrap_err();

    assert_eq!(log.entries(), vec!["a:merge", "b:merge"]);
    let plugin_err = err.as_plugin().unwrap();
    assert_eq!(plugin_err.store(), Some("b"));
    assert_eq!(plugin_err.message(), "b failed on merge");
}

#[tokio::test]
async fn continue_policy_runs_every_store() {
    let log = CallLog::default();
    let tandem = tandem(
        vec![
            (
                "a",
                MockStore::new("a", &log)
                    .failing_on(ActionName::Merge)
                    .into_arc(),
            ),
            ("b", MockStore::new("b", &log).into_arc()),
        ],
        write_order(&["a", "b"]),
        OnError::Continue,
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    log.clear();
    let result = doc.merge(json!({})).await;

    assert!(result.is_ok());
    assert_eq!(log.entries(), vec!["a:merge", "b:merge"]);
}

#[tokio::test]
async fn continue_is_the_default_policy() {
    let log = CallLog::default();
    let tandem = Tandem::new(
        GlobalConfig::new()
            .with_store(
                "a",
                MockStore::new("a", &log)
                    .failing_on(ActionName::Replace)
                    .into_arc(),
            )
            .with_store("b", MockStore::new("b", &log).into_arc())
            .with_execution_order(write_order(&["a", "b"])),
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    assert!(doc.replace(json!({})).await.is_ok());
}

#[tokio::test]
async fn revert_policy_rolls_back_in_reverse() {
    let log = CallLog::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let tandem = Tandem::new(
        GlobalConfig::new()
            .with_store("a", MockStore::new("a", &log).into_arc())
            .with_store("b", MockStore::new("b", &log).into_arc())
            .with_store(
                "c",
                MockStore::new("c", &log)
                    .failing_on(ActionName::Insert)
                    .into_arc(),
            )
            .with_execution_order(write_order(&["a", "b", "c"]))
            .with_on_error(OnError::Revert)
            .on(EventName::Revert, recording_hook(&seen))
            .on(EventName::Error, recording_hook(&seen)),
    );

    let pokedex = tandem.collection("pokedex").unwrap();
    log.clear();
    let err = pokedex.insert(json!({ "name": "Squirtle" })).await.unwrap_err();

    assert_eq!(
        log.entries(),
        vec![
            "a:insert",
            "b:insert",
            "c:insert",
            "b:revert:insert",
            "a:revert:insert"
        ]
    );
    assert_eq!(err.as_plugin().unwrap().store(), Some("c"));
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["error:c", "revert:b", "revert:a"]
    );
}

#[tokio::test]
async fn failing_revert_is_logged_and_skipped() {
    let log = CallLog::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let tandem = Tandem::new(
        GlobalConfig::new()
            .with_store("a", MockStore::new("a", &log).into_arc())
            .with_store("b", MockStore::new("b", &log).failing_revert().into_arc())
            .with_store(
                "c",
                MockStore::new("c", &log)
                    .failing_on(ActionName::Merge)
                    .into_arc(),
            )
            .with_execution_order(write_order(&["a", "b", "c"]))
            .with_on_error(OnError::Revert)
            .on(EventName::Revert, recording_hook(&seen)),
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    log.clear();
    let err = doc.merge(json!({})).await.unwrap_err();

    assert_eq!(
        log.entries(),
        vec!["a:merge", "b:merge", "c:merge", "b:revert:merge", "a:revert:merge"]
    );
    assert_eq!(err.as_plugin().unwrap().message(), "c failed on merge");
    assert_eq!(*seen.lock().unwrap(), vec!["revert:a"]);
}

// ============================================================================
// Hooks
// ============================================================================

#[tokio::test]
async fn before_hook_payload_flows_to_later_stores() {
    let log = CallLog::default();
    let a = MockStore::new("a", &log);
    let b = MockStore::new("b", &log);
    let (a_payloads, b_payloads) = (Arc::clone(&a.payloads), Arc::clone(&b.payloads));

    let tandem = Tandem::new(
        GlobalConfig::new()
            .with_store("a", a.into_arc())
            .with_store("b", b.into_arc())
            .with_execution_order(write_order(&["a", "b"]))
            .on(
                EventName::Before,
                EventHook::new(|ctx| {
                    let mut payload = ctx.payload.clone();
                    let count = payload["count"].as_u64().unwrap_or(0);
                    payload["count"] = json!(count + 1);
                    payload["seenBy"] = json!(ctx.store);
                    Some(payload)
                }),
            ),
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    doc.merge(json!({ "count": 0 })).await.unwrap();

    assert_eq!(
        a_payloads.lock().unwrap()[0],
        json!({ "count": 1, "seenBy": "a" })
    );
    assert_eq!(
        b_payloads.lock().unwrap()[0],
        json!({ "count": 2, "seenBy": "b" })
    );
}

#[tokio::test]
async fn async_hooks_and_layer_order() {
    let log = CallLog::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let layer_hook = |label: &'static str| {
        let seen = Arc::clone(&seen);
        EventHook::from_async(move |_ctx| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(label.to_string());
                None
            }
        })
    };

    let tandem = Tandem::new(
        GlobalConfig::new()
            .with_store("a", MockStore::new("a", &log).into_arc())
            .with_execution_order(write_order(&["a"]))
            .on(EventName::Success, layer_hook("global")),
    );
    let doc = tandem
        .doc_with(
            "pokedex/001",
            ModuleConfig::new().on(EventName::Success, layer_hook("module")),
        )
        .unwrap();
    let call = ActionConfig::new().on(EventName::Success, layer_hook("call"));

    doc.execute(ActionName::Merge, json!({}), &call).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["global", "module", "call"]);
}

#[tokio::test]
async fn abort_in_before_hook_skips_remaining_stores() {
    let log = CallLog::default();
    let tandem = Tandem::new(
        GlobalConfig::new()
            .with_store("a", MockStore::new("a", &log).into_arc())
            .with_store("b", MockStore::new("b", &log).into_arc())
            .with_store("c", MockStore::new("c", &log).into_arc())
            .with_execution_order(write_order(&["a", "b", "c"]))
            .on(
                EventName::Before,
                EventHook::new(|ctx| {
                    if ctx.store == "b" {
                        ctx.abort();
                    }
                    None
                }),
            ),
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    log.clear();
    let result = doc.merge(json!({})).await;

    assert!(result.is_ok());
    assert_eq!(log.entries(), vec!["a:merge"]);
}

#[tokio::test]
async fn error_hook_sees_the_error() {
    let log = CallLog::default();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&errors);
    let tandem = Tandem::new(
        GlobalConfig::new()
            .with_store(
                "a",
                MockStore::new("a", &log)
                    .failing_on(ActionName::DeleteProp)
                    .into_arc(),
            )
            .with_execution_order(write_order(&["a"]))
            .on(
                EventName::Error,
                EventHook::new(move |ctx| {
                    if let Some(err) = &ctx.error {
                        captured.lock().unwrap().push(err.message().to_string());
                    }
                    None
                }),
            ),
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    doc.delete_prop(["stats.hp"]).await.unwrap();

    assert_eq!(*errors.lock().unwrap(), vec!["a failed on deleteProp"]);
}

#[tokio::test]
async fn payload_modifiers_run_once_per_action() {
    let log = CallLog::default();
    let a = MockStore::new("a", &log);
    let b = MockStore::new("b", &log);
    let (a_payloads, b_payloads) = (Arc::clone(&a.payloads), Arc::clone(&b.payloads));
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);

    let tandem = Tandem::new(
        GlobalConfig::new()
            .with_store("a", a.into_arc())
            .with_store("b", b.into_arc())
            .with_execution_order(write_order(&["a", "b"])),
    );
    let doc = tandem
        .doc_with(
            "pokedex/001",
            ModuleConfig::new().with_layer(tandem_engine::ConfigLayer::new().modify_payload_on(
                ActionName::Merge,
                PayloadModifier::new(move |mut payload: Value| {
                    *counter.lock().unwrap() += 1;
                    payload["stamped"] = json!(true);
                    payload
                }),
            )),
        )
        .unwrap();

    doc.merge(json!({ "level": 5 })).await.unwrap();
    doc.assign(json!({ "level": 6 })).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), 1);
    assert_eq!(
        a_payloads.lock().unwrap()[0],
        json!({ "level": 5, "stamped": true })
    );
    assert_eq!(
        b_payloads.lock().unwrap()[0],
        json!({ "level": 5, "stamped": true })
    );
    assert_eq!(a_payloads.lock().unwrap()[1], json!({ "level": 6 }));
}

// ============================================================================
// Return Shapes
// ============================================================================

#[tokio::test]
async fn collection_insert_resolves_to_new_doc() {
    let log = CallLog::default();
    let remote = MockStore::new("remote", &log);
    let remote_payloads = Arc::clone(&remote.payloads);
    let tandem = tandem(
        vec![
            (
                "local",
                MockStore::new("local", &log)
                    .with_insert_id("abc")
                    .into_arc(),
            ),
            ("remote", remote.into_arc()),
        ],
        write_order(&["local", "remote"]),
        OnError::Stop,
    );

    let pokedex = tandem.collection("pokedex").unwrap();
    let created = pokedex.insert(json!({ "name": "Mew" })).await.unwrap();

    assert_eq!(created.kind(), ModuleKind::Doc);
    assert_eq!(created.path(), "pokedex/abc");
    let doc = created.into_doc().unwrap();
    assert!(doc.ptr_eq(&tandem.doc("pokedex/abc").unwrap()));
    assert_eq!(remote_payloads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn generated_id_survives_a_store_without_insert() {
    let log = CallLog::default();
    let tandem = tandem(
        vec![
            (
                "local",
                MockStore::new("local", &log)
                    .with_insert_id("gen-7")
                    .into_arc(),
            ),
            (
                "remote",
                MockStore::new("remote", &log)
                    .with_actions(ActionSet::all().without(ActionName::Insert))
                    .into_arc(),
            ),
        ],
        write_order(&["local", "remote"]),
        OnError::Stop,
    );

    let pokedex = tandem.collection("pokedex").unwrap();
    let created = pokedex.insert(json!({ "name": "Ditto" })).await.unwrap();

    assert!(created.path().ends_with("/gen-7"));
    assert_eq!(created.id(), "gen-7");
}

#[tokio::test]
async fn doc_actions_resolve_to_same_doc() {
    let log = CallLog::default();
    let tandem = tandem(
        vec![("local", MockStore::new("local", &log).into_arc())],
        write_order(&["local"]),
        OnError::Stop,
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    let after_insert = doc.insert(json!({})).await.unwrap();
    let after_delete = doc.delete().await.unwrap();

    assert!(after_insert.ptr_eq(&doc));
    assert!(after_delete.ptr_eq(&doc));
}

#[tokio::test]
async fn collection_delete_resolves_to_collection() {
    let log = CallLog::default();
    let tandem = tandem(
        vec![("local", MockStore::new("local", &log).into_arc())],
        write_order(&["local"]),
        OnError::Stop,
    );

    let pokedex = tandem.collection("pokedex").unwrap();
    let result = pokedex.delete(json!(["001", "002"])).await.unwrap();

    assert!(result.into_collection().unwrap().ptr_eq(&pokedex));
}

// ============================================================================
// Fetch
// ============================================================================

#[tokio::test]
async fn fetch_feeds_local_registrations() {
    let log = CallLog::default();
    let local = MockStore::new("local", &log);
    let mirrored = Arc::clone(&local.mirrored);
    let remote = MockStore::new("remote", &log).remote(vec![
        ("001", json!({ "name": "Bulbasaur" })),
        ("150", json!({ "name": "Mewtwo", "legendary": true })),
    ]);

    let tandem = Tandem::new(
        GlobalConfig::new()
            .with_store("local", local.into_arc())
            .with_store("remote", remote.into_arc())
            .with_layer(
                tandem_engine::ConfigLayer::new()
                    .with_execution_order(write_order(&["local", "remote"]))
                    .modify_read_response_on(
                        DocChange::Added,
                        ResponseModifier::new(|data, _| {
                            if data["legendary"] == json!(true) {
                                None
                            } else {
                                Some(data)
                            }
                        }),
                    ),
            ),
    );

    let pokedex = tandem.collection("pokedex").unwrap();
    pokedex.fetch().await.unwrap();

    assert_eq!(
        *mirrored.lock().unwrap(),
        vec![("fetched:001".to_string(), json!({ "name": "Bulbasaur" }))]
    );
}

// ============================================================================
// Module Data
// ============================================================================

#[tokio::test]
async fn data_comes_from_the_data_store() {
    let log = CallLog::default();
    let tandem = Tandem::new(
        GlobalConfig::new()
            .with_store("local", MockStore::new("local", &log).into_arc())
            .with_store("remote", MockStore::new("remote", &log).into_arc())
            .with_local_store("local"),
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    assert_eq!(doc.data().unwrap(), Some(json!("local data for pokedex")));

    let pinned = tandem
        .doc_with("pokedex/002", ModuleConfig::new().with_data_store("remote"))
        .unwrap();
    assert_eq!(pinned.data().unwrap(), Some(json!("remote data for pokedex")));
}

#[tokio::test]
async fn data_without_a_data_store_fails() {
    let log = CallLog::default();
    let tandem = Tandem::new(
        GlobalConfig::new().with_store("remote", MockStore::new("remote", &log).into_arc()),
    );

    let doc = tandem.doc("pokedex/001").unwrap();
    assert!(matches!(doc.data(), Err(Error::NoDataStoreName)));
}

#[tokio::test]
async fn setup_runs_once_per_path() {
    let log = CallLog::default();
    let tandem = Tandem::new(
        GlobalConfig::new()
            .with_store("local", MockStore::new("local", &log).into_arc())
            .with_store("remote", MockStore::new("remote", &log).into_arc()),
    );

    let pokedex = tandem.collection("pokedex").unwrap();
    let _filtered = pokedex.limit(3);
    tandem.clear_module_cache();
    let _again = tandem.collection("pokedex").unwrap();

    assert_eq!(
        log.entries(),
        vec!["local:setup:pokedex", "remote:setup:pokedex"]
    );
}
