//! Action names, action types and capability sets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named operation a module can run against its stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionName {
    Insert,
    Merge,
    Assign,
    Replace,
    DeleteProp,
    Delete,
    #[serde(alias = "get")]
    Fetch,
    Stream,
}

impl ActionName {
    /// Every action, in declaration order.
    pub const ALL: [ActionName; 8] = [
        ActionName::Insert,
        ActionName::Merge,
        ActionName::Assign,
        ActionName::Replace,
        ActionName::DeleteProp,
        ActionName::Delete,
        ActionName::Fetch,
        ActionName::Stream,
    ];

    /// The broad category this action belongs to.
    pub fn action_type(self) -> ActionType {
        match self {
            ActionName::Fetch | ActionName::Stream => ActionType::Read,
            ActionName::Insert | ActionName::Merge | ActionName::Assign | ActionName::Replace => {
                ActionType::Write
            }
            ActionName::DeleteProp | ActionName::Delete => ActionType::Delete,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionName::Insert => "insert",
            ActionName::Merge => "merge",
            ActionName::Assign => "assign",
            ActionName::Replace => "replace",
            ActionName::DeleteProp => "deleteProp",
            ActionName::Delete => "delete",
            ActionName::Fetch => "fetch",
            ActionName::Stream => "stream",
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(ActionName::Insert),
            "merge" => Ok(ActionName::Merge),
            "assign" => Ok(ActionName::Assign),
            "replace" => Ok(ActionName::Replace),
            "deleteProp" => Ok(ActionName::DeleteProp),
            "delete" => Ok(ActionName::Delete),
            "fetch" | "get" => Ok(ActionName::Fetch),
            "stream" => Ok(ActionName::Stream),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// Category of an action, used as a fallback key in execution orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Read,
    Write,
    Delete,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionType::Read => "read",
            ActionType::Write => "write",
            ActionType::Delete => "delete",
        })
    }
}

/// The set of actions a store implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ActionSet(u16);

impl ActionSet {
    /// No actions.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every action.
    pub fn all() -> Self {
        ActionName::ALL.into_iter().collect()
    }

    /// Add an action to the set.
    pub fn with(mut self, action: ActionName) -> Self {
        self.0 |= action.bit();
        self
    }

    /// Remove an action from the set.
    pub fn without(mut self, action: ActionName) -> Self {
        self.0 &= !action.bit();
        self
    }

    pub fn contains(&self, action: ActionName) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate the actions in the set.
    pub fn iter(&self) -> impl Iterator<Item = ActionName> + '_ {
        ActionName::ALL.into_iter().filter(|a| self.contains(*a))
    }
}

impl FromIterator<ActionName> for ActionSet {
    fn from_iter<I: IntoIterator<Item = ActionName>>(iter: I) -> Self {
        iter.into_iter().fold(ActionSet::empty(), ActionSet::with)
    }
}
