//! In-memory catalog hierarchy.
//!
//! Nodes live in an arena owned by [`CatalogTree`] and are addressed by
//! [`NodeId`]. Child lists hold ids in display order and parent links are kept
//! in a side table, so the tree never forms ownership cycles.

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Server,
    Database,
    Schema,
    Table,
    Column,
}

impl NodeKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Server => "Server",
            Self::Database => "Database",
            Self::Schema => "Schema",
            Self::Table => "Table",
            Self::Column => "Column",
        }
    }

    #[must_use]
    pub fn child_kind(self) -> Option<Self> {
        match self {
            Self::Server => Some(Self::Database),
            Self::Database => Some(Self::Schema),
            Self::Schema => Some(Self::Table),
            Self::Table => Some(Self::Column),
            Self::Column => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMetadata {
    pub size: Option<String>,
    pub row_estimate: Option<i64>,
    pub child_count: Option<usize>,
    pub data_type: Option<String>,
    pub nullable: Option<bool>,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub path: String,
    pub level: i32,
    pub expanded: bool,
    pub metadata: NodeMetadata,
    children: Vec<NodeId>,
}

impl TreeNode {
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// One-line label used by list and tree renderers.
    #[must_use]
    pub fn display_label(&self) -> String {
        let detail = match self.kind {
            NodeKind::Server => self
                .metadata
                .child_count
                .map(|count| format!("({count} databases)")),
            NodeKind::Database => self.metadata.size.as_ref().map(|size| format!("[{size}]")),
            NodeKind::Schema => self
                .metadata
                .child_count
                .map(|count| format!("({count} tables)")),
            NodeKind::Table => self.metadata.size.clone(),
            NodeKind::Column => self.metadata.data_type.as_ref().map(|data_type| {
                if self.metadata.primary_key {
                    format!("{data_type} PK")
                } else {
                    data_type.clone()
                }
            }),
        };

        match detail {
            Some(detail) if !detail.is_empty() => format!("{} {detail}", self.name),
            _ => self.name.clone(),
        }
    }
}

/// A node produced by a loader before it is attached to the tree. Path and
/// level are derived from the parent at attach time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSeed {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub metadata: NodeMetadata,
}

impl NodeSeed {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            metadata: NodeMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTree {
    nodes: Vec<TreeNode>,
    parents: Vec<Option<NodeId>>,
    root: NodeId,
    server: NodeId,
    selected: Option<NodeId>,
}

impl CatalogTree {
    /// Builds the synthetic root (level -1) and the single server node.
    #[must_use]
    pub fn new(root_label: impl Into<String>, server_label: impl Into<String>) -> Self {
        let server_label = server_label.into();
        let root = TreeNode {
            id: "root".to_string(),
            name: root_label.into(),
            kind: NodeKind::Server,
            path: String::new(),
            level: -1,
            expanded: true,
            metadata: NodeMetadata::default(),
            children: vec![NodeId(1)],
        };
        let server = TreeNode {
            id: server_label.clone(),
            name: server_label.clone(),
            kind: NodeKind::Server,
            path: server_label,
            level: 0,
            expanded: false,
            metadata: NodeMetadata::default(),
            children: Vec::new(),
        };

        Self {
            nodes: vec![root, server],
            parents: vec![None, Some(NodeId(0))],
            root: NodeId(0),
            server: NodeId(1),
            selected: None,
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn server(&self) -> NodeId {
        self.server
    }

    /// # Panics
    ///
    /// Panics if `id` was not issued by this tree.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.0)
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(id.0).copied().flatten()
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.get(id) {
            Some(node) => &node.children,
            None => &[],
        }
    }

    #[must_use]
    pub fn selected(&self) -> Option<NodeId> {
        self.selected
    }

    /// Nodes reachable from the root through expanded ancestors, depth first.
    /// The synthetic root is always treated as expanded and never returned.
    #[must_use]
    pub fn all_visible_nodes(&self) -> Vec<NodeId> {
        let mut visible = Vec::new();
        let mut stack: Vec<NodeId> = self.node(self.root).children.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            visible.push(id);
            let node = self.node(id);
            if node.expanded {
                stack.extend(node.children.iter().rev().copied());
            }
        }

        visible
    }

    /// Selects `id` and expands every ancestor so it shows up in the next
    /// flatten.
    pub fn set_selected(&mut self, id: NodeId) {
        if self.get(id).is_none() {
            return;
        }
        self.selected = Some(id);

        let mut current = self.parent(id);
        while let Some(ancestor) = current {
            self.nodes[ancestor.0].expanded = true;
            current = self.parent(ancestor);
        }
    }

    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<NodeId> {
        let mut stack = vec![self.root];
        while let Some(current) = stack.pop() {
            let node = self.node(current);
            if node.id == id {
                return Some(current);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    pub fn expand(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            if node.has_children() {
                node.expanded = true;
            }
        }
    }

    pub fn collapse(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            if node.has_children() {
                node.expanded = false;
            }
        }
    }

    pub fn toggle(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            if node.has_children() {
                node.expanded = !node.expanded;
            }
        }
    }

    /// Attaches one freshly loaded level below `parent`.
    ///
    /// Children are attached at most once: when `parent` already has children
    /// the seeds are discarded and nothing changes. Use
    /// [`CatalogTree::clear_children`] to refresh a level.
    pub fn attach_children(&mut self, parent: NodeId, seeds: Vec<NodeSeed>) -> Vec<NodeId> {
        let Some(parent_node) = self.get(parent) else {
            return Vec::new();
        };
        if parent_node.has_children() {
            warn!(path = %parent_node.path, "children already attached, ignoring reload");
            return Vec::new();
        }

        let parent_level = parent_node.level;
        let parent_path = match parent_node.kind {
            NodeKind::Server => None,
            _ => Some(parent_node.path.clone()),
        };

        let mut attached = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let id = NodeId(self.nodes.len());
            let path = match &parent_path {
                Some(prefix) => format!("{prefix}.{}", seed.name),
                None => seed.name.clone(),
            };
            self.nodes.push(TreeNode {
                id: seed.id,
                name: seed.name,
                kind: seed.kind,
                path,
                level: parent_level + 1,
                expanded: false,
                metadata: seed.metadata,
                children: Vec::new(),
            });
            self.parents.push(Some(parent));
            attached.push(id);
        }

        let parent_node = &mut self.nodes[parent.0];
        parent_node.children.clone_from(&attached);
        parent_node.metadata.child_count = Some(attached.len());
        attached
    }

    /// Detaches the whole child list of `id` so the next load fetches it
    /// again.
    ///
    /// The arena only grows: detached nodes keep their slots, so a stale
    /// [`NodeId`] never aliases a newer node, but they are unreachable from
    /// the root and [`CatalogTree::node_count`] stops counting them. A full
    /// catalog reload builds a fresh tree and drops them.
    pub fn clear_children(&mut self, id: NodeId) {
        if id == self.root || self.get(id).is_none() {
            return;
        }

        if let Some(selected) = self.selected {
            if self.is_descendant(selected, id) {
                self.selected = Some(id);
            }
        }

        let node = &mut self.nodes[id.0];
        node.children.clear();
        node.expanded = false;
    }

    /// Dot-joined names from the first real level down to `id`.
    #[must_use]
    pub fn ancestry_path(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == self.root {
                break;
            }
            names.push(self.node(node_id).name.as_str());
            current = self.parent(node_id);
        }
        names.reverse();
        names.join(".")
    }

    /// Nearest node of `kind` among `id` and its ancestors.
    #[must_use]
    pub fn ancestor_of_kind(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == self.root {
                return None;
            }
            if self.node(node_id).kind == kind {
                return Some(node_id);
            }
            current = self.parent(node_id);
        }
        None
    }

    /// Nodes reachable from the root, the root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            count += 1;
            stack.extend(self.node(id).children.iter().copied());
        }
        count
    }

    fn is_descendant(&self, candidate: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.parent(candidate);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::{CatalogTree, NodeId, NodeKind, NodeMetadata, NodeSeed};

    fn sample_tree() -> (CatalogTree, NodeId, NodeId, NodeId, NodeId) {
        let mut tree = CatalogTree::new("PostgreSQL Servers", "local");
        let server = tree.server();
        let db = tree.attach_children(
            server,
            vec![
                NodeSeed::new("db_db1", "db1", NodeKind::Database),
                NodeSeed::new("db_db2", "db2", NodeKind::Database),
            ],
        )[0];
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
            vec![NodeSeed::new("col_email", "email", NodeKind::Column)],
        )[0];
        (tree, db, schema, table, column)
    }

    #[test]
    fn attach_derives_path_and_level_from_parent() {
        let (tree, db, schema, table, column) = sample_tree();

        assert_eq!(tree.node(tree.server()).level, 0);
        assert_eq!(tree.node(db).path, "db1");
        assert_eq!(tree.node(db).level, 1);
        assert_eq!(tree.node(schema).path, "db1.public");
        assert_eq!(tree.node(table).path, "db1.public.users");
        assert_eq!(tree.node(column).path, "db1.public.users.email");
        assert_eq!(tree.node(column).level, 4);
        assert_eq!(tree.parent(column), Some(table));
    }

    #[test]
    fn ancestry_path_excludes_synthetic_root() {
        let (tree, _, _, _, column) = sample_tree();
        assert_eq!(tree.ancestry_path(column), "local.db1.public.users.email");
        assert_eq!(tree.ancestry_path(tree.server()), "local");
    }

    #[test]
    fn visible_nodes_skip_collapsed_subtrees() {
        let (mut tree, db, schema, table, column) = sample_tree();

        assert_eq!(tree.all_visible_nodes(), vec![tree.server()]);

        tree.expand(tree.server());
        tree.expand(db);
        let visible = tree.all_visible_nodes();
        assert_eq!(visible.len(), 4);
        assert!(visible.contains(&schema));
        assert!(!visible.contains(&table));

        tree.expand(schema);
        tree.expand(table);
        assert!(tree.all_visible_nodes().contains(&column));

        tree.collapse(db);
        let visible = tree.all_visible_nodes();
        for hidden in [schema, table, column] {
            assert!(!visible.contains(&hidden));
        }
    }

    #[test]
    fn visible_nodes_never_include_node_under_collapsed_ancestor() {
        let (mut tree, db, schema, table, _) = sample_tree();
        for id in [tree.server(), db, schema, table] {
            tree.expand(id);
        }
        tree.collapse(schema);

        for id in tree.all_visible_nodes() {
            let mut ancestor = tree.parent(id);
            while let Some(parent) = ancestor {
                if parent != tree.root() {
                    assert!(tree.node(parent).expanded, "{} hidden", tree.node(id).name);
                }
                ancestor = tree.parent(parent);
            }
        }
    }

    #[test]
    fn set_selected_expands_every_ancestor() {
        let (mut tree, db, schema, table, column) = sample_tree();

        tree.set_selected(column);

        assert_eq!(tree.selected(), Some(column));
        for id in [tree.server(), db, schema, table] {
            assert!(tree.node(id).expanded);
        }
        assert!(tree.all_visible_nodes().contains(&column));
    }

    #[test]
    fn find_by_id_reports_missing_nodes() {
        let (tree, _, _, table, _) = sample_tree();
        assert_eq!(tree.find_by_id("table_db1_public_users"), Some(table));
        assert_eq!(tree.find_by_id("nope"), None);
    }

    #[test]
    fn expand_collapse_and_toggle_ignore_leaves() {
        let (mut tree, db, _, _, column) = sample_tree();

        tree.expand(column);
        assert!(!tree.node(column).expanded);
        tree.toggle(column);
        assert!(!tree.node(column).expanded);

        tree.toggle(db);
        assert!(tree.node(db).expanded);
        tree.toggle(db);
        assert!(!tree.node(db).expanded);
    }

    #[test]
    fn attach_is_ignored_once_children_exist() {
        let (mut tree, db, schema, _, _) = sample_tree();

        let attached = tree.attach_children(
            db,
            vec![NodeSeed::new("schema_db1_other", "other", NodeKind::Schema)],
        );

        assert!(attached.is_empty());
        assert_eq!(tree.children(db), &[schema]);
    }

    #[test]
    fn clear_children_allows_a_fresh_load() {
        let (mut tree, db, schema, _, column) = sample_tree();
        tree.set_selected(column);

        tree.clear_children(db);
        assert!(tree.children(db).is_empty());
        assert_eq!(tree.selected(), Some(db));
        assert_eq!(tree.find_by_id("col_email"), None);

        let reloaded = tree.attach_children(
            db,
            vec![NodeSeed::new("schema_db1_public", "public", NodeKind::Schema)],
        );
        assert_eq!(reloaded.len(), 1);
        assert_ne!(reloaded[0], schema);
        assert!(tree.get(schema).is_some(), "detached slots are never reused");
        assert_eq!(tree.node_count(), 5);
    }

    #[test]
    fn ancestor_of_kind_walks_up_to_table() {
        let (tree, db, _, table, column) = sample_tree();
        assert_eq!(tree.ancestor_of_kind(column, NodeKind::Table), Some(table));
        assert_eq!(tree.ancestor_of_kind(table, NodeKind::Table), Some(table));
        assert_eq!(tree.ancestor_of_kind(db, NodeKind::Table), None);
    }

    #[test]
    fn display_label_includes_kind_metadata() {
        let mut tree = CatalogTree::new("root", "local");
        let server = tree.server();
        let database = tree.attach_children(
            server,
            vec![NodeSeed::new("db", "app", NodeKind::Database).with_metadata(NodeMetadata {
                size: Some("8 MB".to_string()),
                ..NodeMetadata::default()
            })],
        )[0];
        assert_eq!(tree.node(database).display_label(), "app [8 MB]");
        assert_eq!(tree.node(server).display_label(), "local (1 databases)");
        assert_eq!(tree.node_count(), 3);
    }
}
