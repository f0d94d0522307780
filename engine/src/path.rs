//! Module path parsing.
//!
//! A path is a slash-delimited list of non-empty segments. An odd segment
//! count names a collection, an even count names a document inside the
//! collection formed by all but the last segment.

use crate::{Error, Result};
use std::fmt;

/// Whether a path names a collection or a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Collection,
    Doc,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModuleKind::Collection => "collection",
            ModuleKind::Doc => "doc",
        })
    }
}

/// A parsed module path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModulePath {
    collection_path: String,
    doc_id: Option<String>,
}

impl ModulePath {
    /// Split a path into its collection path and optional doc id.
    pub fn parse(path: &str) -> Self {
        let (collection_path, doc_id) = parse_module_path(path);
        Self {
            collection_path: collection_path.to_string(),
            doc_id: doc_id.map(str::to_string),
        }
    }

    /// Parse and check that the path names the expected kind of module.
    pub fn validated(path: &str, expected: ModuleKind) -> Result<Self> {
        validate(path, expected)?;
        Ok(Self::parse(path))
    }

    /// Build a document path from its parts.
    pub fn doc(collection_path: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            collection_path: collection_path.into(),
            doc_id: Some(doc_id.into()),
        }
    }

    /// Build a collection path.
    pub fn collection(collection_path: impl Into<String>) -> Self {
        Self {
            collection_path: collection_path.into(),
            doc_id: None,
        }
    }

    pub fn collection_path(&self) -> &str {
        &self.collection_path
    }

    pub fn doc_id(&self) -> Option<&str> {
        self.doc_id.as_deref()
    }

    pub fn kind(&self) -> ModuleKind {
        if self.doc_id.is_some() {
            ModuleKind::Doc
        } else {
            ModuleKind::Collection
        }
    }

    /// The last segment: the doc id for documents, the collection id otherwise.
    pub fn id(&self) -> &str {
        match &self.doc_id {
            Some(id) => id,
            None => self
                .collection_path
                .rsplit('/')
                .next()
                .unwrap_or(&self.collection_path),
        }
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.doc_id {
            Some(id) => write!(f, "{}/{}", self.collection_path, id),
            None => f.write_str(&self.collection_path),
        }
    }
}

/// Split a path into `(collection_path, doc_id)` by segment parity.
pub fn parse_module_path(path: &str) -> (&str, Option<&str>) {
    let segments = path.split('/').count();
    if segments % 2 == 1 {
        return (path, None);
    }
    match path.rsplit_once('/') {
        Some((collection_path, doc_id)) => (collection_path, Some(doc_id)),
        None => (path, None),
    }
}

/// Check that `path` is well formed and names a module of the expected kind.
pub fn validate(path: &str, expected: ModuleKind) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("path is empty"));
    }
    if path.split('/').any(str::is_empty) {
        return Err(invalid("path contains an empty segment"));
    }

    let even = path.split('/').count() % 2 == 0;
    match expected {
        ModuleKind::Collection if even => Err(invalid(
            "a collection path must have an odd number of segments",
        )),
        ModuleKind::Doc if !even => Err(invalid(
            "a document path must have an even number of segments",
        )),
        _ => Ok(()),
    }
}
