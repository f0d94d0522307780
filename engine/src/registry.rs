//! Top-level instance and module cache.

use std::sync::{Arc, Weak};

use dashmap::{DashMap, DashSet};

use crate::config::{GlobalConfig, ModuleConfig};
use crate::module::{CollectionModule, DocModule, ModuleState};
use crate::path::{ModuleKind, ModulePath};
use crate::stream::OpenStreams;
use crate::{ModuleRef, Result};

struct Inner {
    global: GlobalConfig,
    /// Live modules by path and clause set.
    modules: DashMap<String, Weak<ModuleState>>,
    /// Paths every store has already been told about.
    set_up: DashSet<String>,
    /// Open streams outlive module handles.
    open_streams: DashMap<String, Arc<OpenStreams>>,
}

/// Entry point: holds the global config and hands out modules.
///
/// Cloning is cheap and every clone shares the same cache.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use tandem_engine::{ExecutionOrder, GlobalConfig, StorePlugin, Tandem};
/// # fn stores() -> (Arc<dyn StorePlugin>, Arc<dyn StorePlugin>) { unimplemented!() }
/// let (local, remote) = stores();
/// let tandem = Tandem::new(
///     GlobalConfig::new()
///         .with_store("local", local)
///         .with_store("remote", remote)
///         .with_local_store("local"),
/// );
/// let pokedex = tandem.collection("pokedex")?;
/// let pikachu = pokedex.doc("025")?;
/// # Ok::<(), tandem_engine::Error>(())
/// ```
#[derive(Clone)]
pub struct Tandem {
    inner: Arc<Inner>,
}

impl Tandem {
    pub fn new(global: GlobalConfig) -> Self {
        tracing::info!(stores = global.stores.len(), "tandem instance created");
        Self {
            inner: Arc::new(Inner {
                global,
                modules: DashMap::new(),
                set_up: DashSet::new(),
                open_streams: DashMap::new(),
            }),
        }
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.inner.global
    }

    /// The collection module at `path` with a default config.
    pub fn collection(&self, path: &str) -> Result<CollectionModule> {
        self.collection_with(path, ModuleConfig::default())
    }

    /// The collection module at `path`.
    ///
    /// If a module with the same path and clauses is still alive it is
    /// returned as is, and `config` is ignored.
    pub fn collection_with(&self, path: &str, config: ModuleConfig) -> Result<CollectionModule> {
        let path = ModulePath::validated(path, ModuleKind::Collection)?;
        Ok(CollectionModule {
            state: self.module_state(path, config),
        })
    }

    pub fn doc(&self, path: &str) -> Result<DocModule> {
        self.doc_with(path, ModuleConfig::default())
    }

    /// The document module at `path`. Caching works as for collections.
    pub fn doc_with(&self, path: &str, config: ModuleConfig) -> Result<DocModule> {
        let path = ModulePath::validated(path, ModuleKind::Doc)?;
        Ok(DocModule {
            state: self.module_state(path, config),
        })
    }

    /// Forget cached modules. Handles already given out keep working.
    pub fn clear_module_cache(&self) {
        self.inner.modules.clear();
        tracing::debug!("module cache cleared");
    }

    pub(crate) fn module_state(&self, path: ModulePath, config: ModuleConfig) -> Arc<ModuleState> {
        let key = module_key(&path, &config);
        if let Some(existing) = self.inner.modules.get(&key).and_then(|entry| entry.upgrade()) {
            return existing;
        }

        self.setup_module(&path, &config);

        let open_streams = self
            .inner
            .open_streams
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OpenStreams::new()))
            .clone();
        let state = Arc::new(ModuleState {
            tandem: self.clone(),
            path,
            config,
            open_streams,
        });
        self.inner.modules.insert(key, Arc::downgrade(&state));
        state
    }

    /// Let every store prepare for a path, once per path.
    fn setup_module(&self, path: &ModulePath, config: &ModuleConfig) {
        if !self.inner.set_up.insert(path.to_string()) {
            return;
        }
        for (name, store) in &self.inner.global.stores {
            store.setup_module(&ModuleRef {
                collection_path: path.collection_path().to_string(),
                doc_id: path.doc_id().map(str::to_string),
                plugin_config: config.plugin_config(name),
            });
        }
        tracing::info!(path = %path, kind = %path.kind(), "module set up");
    }
}

impl std::fmt::Debug for Tandem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tandem")
            .field("global", &self.inner.global)
            .field("modules", &self.inner.modules.len())
            .finish()
    }
}

fn module_key(path: &ModulePath, config: &ModuleConfig) -> String {
    let clauses = config.clauses.identifier();
    if clauses.is_empty() {
        path.to_string()
    } else {
        format!("{path}{clauses}")
    }
}
