//! Remote store abstraction
//!
//! The engine talks to a store only through [`RemoteStore`]. Adapters such as
//! `dc-drive` implement it; tests use in-memory fakes.

use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Maximum page size accepted by list calls
pub const MAX_PAGE_SIZE: u32 = 1000;

/// What a node is, as far as replication cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    Object,
    Shortcut,
}

/// Metadata snapshot of a node returned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteNode {
    /// Opaque store identifier
    pub id: String,

    /// Display name
    pub name: String,

    pub kind: NodeKind,

    /// Parent identifiers; a node may live in several folders
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,

    /// Size in bytes when the store reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<Timestamp>,
}

impl RemoteNode {
    /// Create a folder node
    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::Folder,
            parents: Vec::new(),
            size: None,
            modified: None,
        }
    }

    /// Create a leaf object node
    pub fn object(id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::Object,
            parents: Vec::new(),
            size: Some(size),
            modified: None,
        }
    }

    /// Attach a parent identifier
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }
}

/// Options for a single list call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    /// Continuation token from the previous page
    pub page_token: Option<String>,

    /// Page size ceiling, at most [`MAX_PAGE_SIZE`]
    pub page_size: u32,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page_token: None,
            page_size: MAX_PAGE_SIZE,
        }
    }
}

/// One page of list results
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<RemoteNode>,

    /// Token for the next page; `None` or empty on the last page
    pub next_page_token: Option<String>,
}

impl ListPage {
    /// Continuation token, with empty tokens treated as absent
    pub fn continuation(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Operations the replication engine needs from a hierarchical store
///
/// Implementations return structured [`crate::Error`] variants; the engine
/// decides whether to retry, skip or abort based on [`crate::Error::kind`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List one page of nodes matching `query`
    async fn list_children(&self, query: &str, options: ListOptions) -> Result<ListPage>;

    /// Fetch metadata for a node
    async fn get_node(&self, id: &str) -> Result<RemoteNode>;

    /// Copy a leaf node into `destination_parent_id` under `name`
    async fn copy_node(
        &self,
        id: &str,
        destination_parent_id: &str,
        name: &str,
    ) -> Result<RemoteNode>;

    /// Create a folder named `name` inside `destination_parent_id`
    async fn create_folder(&self, name: &str, destination_parent_id: &str) -> Result<RemoteNode>;

    /// Hand ownership of a node to another account
    async fn transfer_ownership(&self, id: &str, new_owner: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_constructors() {
        let folder = RemoteNode::folder("f1", "Reports").with_parent("root");
        assert!(folder.is_folder());
        assert_eq!(folder.parents, vec!["root".to_string()]);

        let file = RemoteNode::object("o1", "q1.pdf", 2048);
        assert!(!file.is_folder());
        assert_eq!(file.size, Some(2048));
    }

    #[test]
    fn test_empty_token_ends_pagination() {
        let page = ListPage {
            items: vec![],
            next_page_token: Some(String::new()),
        };
        assert_eq!(page.continuation(), None);

        let page = ListPage {
            items: vec![],
            next_page_token: Some("abc".to_string()),
        };
        assert_eq!(page.continuation(), Some("abc"));
    }

    #[test]
    fn test_node_kind_serialization() {
        let json = serde_json::to_string(&NodeKind::Shortcut).unwrap();
        assert_eq!(json, "\"shortcut\"");
    }
}
