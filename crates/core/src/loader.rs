//! Backend-neutral catalog loading contract.
//!
//! Both drivers implement [`CatalogLoader`] with identical signatures. Table
//! addressing is recovered from dot-joined node paths, and rows are mutated
//! through an opaque [`RowIdentity`] rather than a display index.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::tree::{CatalogTree, NodeId, NodeKind, TreeNode};
use crate::value::{Row, RowSet, Value};

/// Columns carrying backend row-identity tokens. Selected alongside table
/// data and never shown in the grid.
pub const HIDDEN_COLUMNS: [&str; 2] = ["__ctid", "__rowid"];

#[must_use]
pub fn is_hidden_column(name: &str) -> bool {
    HIDDEN_COLUMNS
        .iter()
        .any(|hidden| hidden.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoaderError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("row identity is not available for the selected row")]
    MissingRowIdentity,
    #[error("insert requires at least one column=value pair")]
    EmptyInsert,
}

impl LoaderError {
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableTarget {
    pub database: String,
    pub schema: String,
    pub table: String,
}

impl TableTarget {
    #[must_use]
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Takes the last three segments of a dot-joined path as
    /// `(database, schema, table)`.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let segments = split_path(path);
        if segments.len() < 3 {
            return None;
        }
        let tail = &segments[segments.len() - 3..];
        Some(Self::new(tail[0], tail[1], tail[2]))
    }

    /// Resolves the table enclosing `node` (the node itself when it is a
    /// table, otherwise its nearest table ancestor).
    #[must_use]
    pub fn for_node(tree: &CatalogTree, node: NodeId) -> Option<Self> {
        let table = tree.ancestor_of_kind(node, NodeKind::Table)?;
        Self::from_path(&tree.ancestry_path(table))
    }
}

impl fmt::Display for TableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.table)
    }
}

/// Backend token addressing one physical row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowIdentity(String);

impl RowIdentity {
    pub fn new(token: impl Into<String>) -> Result<Self, LoaderError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(LoaderError::MissingRowIdentity);
        }
        Ok(Self(token))
    }

    /// Reads the first non-null hidden identity column of `row`.
    pub fn from_row(row: &Row) -> Result<Self, LoaderError> {
        HIDDEN_COLUMNS
            .iter()
            .find_map(|column| match row.get(column) {
                Some(Value::Null) | None => None,
                Some(value) => Some(value.to_string()),
            })
            .map_or(Err(LoaderError::MissingRowIdentity), Self::new)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single level a `load_children` call fetches for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildLevel {
    Schemas {
        database: String,
    },
    Tables {
        database: String,
        schema: String,
    },
    Columns {
        database: String,
        schema: String,
        table: String,
    },
}

impl ChildLevel {
    /// `None` means "nothing to do": the node is already loaded, is a leaf
    /// or server, or its path is too short for its kind.
    #[must_use]
    pub fn for_node(node: &TreeNode) -> Option<Self> {
        if node.has_children() {
            return None;
        }
        let segments = split_path(&node.path);
        match node.kind {
            NodeKind::Database if !segments.is_empty() => Some(Self::Schemas {
                database: segments[0].to_string(),
            }),
            NodeKind::Schema if segments.len() >= 2 => Some(Self::Tables {
                database: segments[0].to_string(),
                schema: segments[1].to_string(),
            }),
            NodeKind::Table if segments.len() >= 3 => Some(Self::Columns {
                database: segments[0].to_string(),
                schema: segments[1].to_string(),
                table: segments[2].to_string(),
            }),
            _ => None,
        }
    }

    #[must_use]
    pub fn child_kind(&self) -> NodeKind {
        match self {
            Self::Schemas { .. } => NodeKind::Schema,
            Self::Tables { .. } => NodeKind::Table,
            Self::Columns { .. } => NodeKind::Column,
        }
    }

    #[must_use]
    pub fn database(&self) -> &str {
        match self {
            Self::Schemas { database }
            | Self::Tables { database, .. }
            | Self::Columns { database, .. } => database,
        }
    }
}

/// Splits a dot-joined path into at most three non-empty segments.
#[must_use]
pub fn split_path(path: &str) -> Vec<&str> {
    path.splitn(3, '.')
        .filter(|segment| !segment.is_empty())
        .collect()
}

#[async_trait]
pub trait CatalogLoader: Send + Sync {
    /// Builds root, server and the eagerly populated database level.
    async fn load_tree(&self, server_label: &str) -> Result<CatalogTree, LoaderError>;

    /// Attaches exactly one level below `node`. No-op when children already
    /// exist or the node cannot be addressed.
    async fn load_children(&self, tree: &mut CatalogTree, node: NodeId)
        -> Result<(), LoaderError>;

    async fn get_table_data(
        &self,
        target: &TableTarget,
        limit: usize,
        offset: usize,
    ) -> Result<RowSet, LoaderError>;

    async fn update_cell(
        &self,
        target: &TableTarget,
        column: &str,
        identity: &RowIdentity,
        value: &Value,
    ) -> Result<(), LoaderError>;

    async fn insert_row(
        &self,
        target: &TableTarget,
        values: &BTreeMap<String, Value>,
    ) -> Result<(), LoaderError>;

    async fn delete_row(
        &self,
        target: &TableTarget,
        identity: &RowIdentity,
    ) -> Result<(), LoaderError>;

    /// Runs trimmed `sql`; blank input succeeds with no rows.
    async fn execute_query(&self, sql: &str) -> Result<RowSet, LoaderError>;
}

pub type SharedLoader = Arc<dyn CatalogLoader>;

#[cfg(test)]
mod tests {
    use super::{
        is_hidden_column, split_path, ChildLevel, LoaderError, RowIdentity, TableTarget,
    };
    use crate::tree::{CatalogTree, NodeKind, NodeSeed};
    use crate::value::{Row, Value};

    fn column_tree() -> (CatalogTree, crate::tree::NodeId, crate::tree::NodeId) {
        let mut tree = CatalogTree::new("PostgreSQL Servers", "local");
        let server = tree.server();
        let db = tree.attach_children(server, vec![NodeSeed::new("db_db1", "db1", NodeKind::Database)])[0];
        let schema = tree.attach_children(
            db,
            vec![NodeSeed::new("schema_db1_public", "public", NodeKind::Schema)],
        )[0];
        let table = tree.attach_children(
            schema,
            vec![NodeSeed::new("table_db1_public_users", "users", NodeKind::Table)],
        )[0];
        let column = tree.attach_children(
            table,
            vec![NodeSeed::new("col_db1_public_users_email", "email", NodeKind::Column)],
        )[0];
        (tree, table, column)
    }

    #[test]
    fn hidden_columns_match_case_insensitively() {
        assert!(is_hidden_column("__ctid"));
        assert!(is_hidden_column("__ROWID"));
        assert!(!is_hidden_column("id"));
    }

    #[test]
    fn table_target_takes_last_three_segments() {
        let target = TableTarget::from_path("local.db1.public.users").expect("target");
        assert_eq!(target, TableTarget::new("db1", "public", "users"));
        assert!(TableTarget::from_path("db1.public").is_none());
    }

    #[test]
    fn table_target_resolves_from_table_and_column_nodes() {
        let (tree, table, column) = column_tree();
        let expected = TableTarget::new("db1", "public", "users");

        assert_eq!(tree.node(column).path, "db1.public.users.email");
        assert_eq!(TableTarget::for_node(&tree, table), Some(expected.clone()));
        assert_eq!(TableTarget::for_node(&tree, column), Some(expected));
        assert_eq!(TableTarget::for_node(&tree, tree.server()), None);
    }

    #[test]
    fn split_path_caps_segments_at_three() {
        assert_eq!(split_path("db1.public.users.email"), vec!["db1", "public", "users.email"]);
        assert!(split_path("").is_empty());
    }

    #[test]
    fn child_level_dispatches_on_kind_and_path_depth() {
        let (tree, table, column) = column_tree();
        let server = tree.server();
        let db = tree.children(server)[0];

        let mut fresh = CatalogTree::new("PostgreSQL Servers", "local");
        let fresh_server = fresh.server();
        let fresh_db = fresh.attach_children(
            fresh_server,
            vec![NodeSeed::new("db_db1", "db1", NodeKind::Database)],
        )[0];

        assert_eq!(
            ChildLevel::for_node(fresh.node(fresh_db)),
            Some(ChildLevel::Schemas {
                database: "db1".to_string()
            })
        );
        assert_eq!(ChildLevel::for_node(tree.node(db)), None, "already loaded");
        assert_eq!(ChildLevel::for_node(tree.node(column)), None);
        assert_eq!(ChildLevel::for_node(tree.node(server)), None);
        assert_eq!(ChildLevel::for_node(tree.node(table)), None);
    }

    #[test]
    fn short_paths_are_skipped() {
        let mut tree = CatalogTree::new("root", "local");
        let server = tree.server();
        let table = tree.attach_children(server, vec![NodeSeed::new("t", "orphan", NodeKind::Table)])[0];

        assert_eq!(ChildLevel::for_node(tree.node(table)), None);
    }

    #[test]
    fn row_identity_requires_a_token() {
        assert_eq!(RowIdentity::new("  "), Err(LoaderError::MissingRowIdentity));

        let row: Row = [("__ctid", Value::Text("(0,1)".into())), ("id", Value::Int(1))]
            .into_iter()
            .collect();
        assert_eq!(RowIdentity::from_row(&row).expect("identity").as_str(), "(0,1)");

        let row: Row = [("__rowid", Value::Int(7))].into_iter().collect();
        assert_eq!(RowIdentity::from_row(&row).expect("identity").as_str(), "7");

        let row: Row = [("id", Value::Int(1))].into_iter().collect();
        assert_eq!(RowIdentity::from_row(&row), Err(LoaderError::MissingRowIdentity));
    }
}
