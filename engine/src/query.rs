//! Query clauses and the per-store module config handed to plugins.
//!
//! The engine only carries clauses; evaluating them is up to each store.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Comparison used by a where clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WhereFilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
}

/// A single `field op value` filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause(pub String, pub WhereFilterOp, pub Value);

/// Sort direction for an order-by clause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// A `field direction` sort clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByClause(pub String, pub OrderDirection);

/// The clause set attached to a collection module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryClauses {
    #[serde(rename = "where", default, skip_serializing_if = "Vec::is_empty")]
    pub where_clauses: Vec<WhereClause>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderByClause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl QueryClauses {
    pub fn is_empty(&self) -> bool {
        self.where_clauses.is_empty() && self.order_by.is_empty() && self.limit.is_none()
    }

    /// Stable textual form used to key cached modules.
    pub fn identifier(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        serde_json::to_string(self).unwrap_or_default()
    }

    fn into_map(self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Module config as seen by one store: the common clauses overlaid with
/// that store's own `config_per_store` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginModuleConfig(Map<String, Value>);

impl PluginModuleConfig {
    /// Merge clauses with store-specific overrides. Store keys win.
    pub fn resolve(clauses: &QueryClauses, store_overrides: Option<&Map<String, Value>>) -> Self {
        let mut map = clauses.clone().into_map();
        if let Some(overrides) = store_overrides {
            for (key, value) in overrides {
                map.insert(key.clone(), value.clone());
            }
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Read back the clause set a store should apply.
    pub fn clauses(&self) -> Result<QueryClauses> {
        let mut subset = Map::new();
        for key in ["where", "orderBy", "limit"] {
            if let Some(value) = self.0.get(key) {
                subset.insert(key.to_string(), value.clone());
            }
        }
        serde_json::from_value(Value::Object(subset)).map_err(|e| Error::InvalidClauses(e.to_string()))
    }
}

impl From<Map<String, Value>> for PluginModuleConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
