use crate::tree::{CatalogTree, NodeId, NodeKind};

pub const DEFAULT_VIEWPORT_HEIGHT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaneKind {
    Databases,
    Schemas,
    Tables,
    Data,
}

impl PaneKind {
    pub const ALL: [Self; 4] = [Self::Databases, Self::Schemas, Self::Tables, Self::Data];

    #[must_use]
    pub fn ordinal(self) -> usize {
        match self {
            Self::Databases => 0,
            Self::Schemas => 1,
            Self::Tables => 2,
            Self::Data => 3,
        }
    }

    #[must_use]
    pub fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::ALL.get(ordinal).copied()
    }

    /// The pane to the right, stopping at `Data`.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::from_ordinal(self.ordinal() + 1)
    }

    /// The pane to the left, stopping at `Databases`.
    #[must_use]
    pub fn previous(self) -> Option<Self> {
        self.ordinal().checked_sub(1).and_then(Self::from_ordinal)
    }

    /// Tab order: wraps from `Data` back to `Databases`.
    #[must_use]
    pub fn cycle(self) -> Self {
        Self::ALL[(self.ordinal() + 1) % Self::ALL.len()]
    }

    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Databases => "Databases",
            Self::Schemas => "Schemas",
            Self::Tables => "Tables",
            Self::Data => "Data",
        }
    }

    /// Node kind listed by structural panes; `Data` lists rows instead.
    #[must_use]
    pub fn node_kind(self) -> Option<NodeKind> {
        match self {
            Self::Databases => Some(NodeKind::Database),
            Self::Schemas => Some(NodeKind::Schema),
            Self::Tables => Some(NodeKind::Table),
            Self::Data => None,
        }
    }
}

/// List cursor over one level of the catalog.
///
/// Whenever `nodes` is non-empty, `selected < nodes.len()` and
/// `offset <= selected < offset + viewport_height` hold after every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneState {
    kind: PaneKind,
    nodes: Vec<NodeId>,
    selected: usize,
    offset: usize,
    parent: Option<NodeId>,
    viewport_height: usize,
}

impl PaneState {
    #[must_use]
    pub fn new(kind: PaneKind) -> Self {
        Self {
            kind,
            nodes: Vec::new(),
            selected: 0,
            offset: 0,
            parent: None,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }

    #[must_use]
    pub fn kind(&self) -> PaneKind {
        self.kind
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    #[must_use]
    pub fn selected_index(&self) -> usize {
        self.selected
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub fn viewport_height(&self) -> usize {
        self.viewport_height
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Replaces the list wholesale and resets the cursor to the top.
    pub fn set_nodes(&mut self, parent: Option<NodeId>, nodes: Vec<NodeId>) {
        self.parent = parent;
        self.nodes = nodes;
        self.selected = 0;
        self.offset = 0;
    }

    pub fn clear(&mut self) {
        self.set_nodes(None, Vec::new());
    }

    #[must_use]
    pub fn selected_node(&self) -> Option<NodeId> {
        self.nodes.get(self.selected).copied()
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.nodes.is_empty() {
            return;
        }
        let last = self.nodes.len() - 1;
        let target = self.selected.saturating_add_signed(delta).min(last);
        self.selected = target;
        self.follow_selection();
    }

    /// Moves the cursor onto `node` when it is in the list.
    pub fn select(&mut self, node: NodeId) -> bool {
        let Some(index) = self.nodes.iter().position(|candidate| *candidate == node) else {
            return false;
        };
        self.selected = index;
        self.follow_selection();
        true
    }

    pub fn page_up(&mut self) {
        self.move_selection(-signed(self.viewport_height));
    }

    pub fn page_down(&mut self) {
        self.move_selection(signed(self.viewport_height));
    }

    pub fn home(&mut self) {
        if self.nodes.is_empty() {
            return;
        }
        self.selected = 0;
        self.follow_selection();
    }

    pub fn end(&mut self) {
        if self.nodes.is_empty() {
            return;
        }
        self.selected = self.nodes.len() - 1;
        self.follow_selection();
    }

    /// Resizes the window (minimum one row) and re-pins it to the cursor.
    pub fn set_viewport_height(&mut self, height: usize) {
        self.viewport_height = height.max(1);
        self.follow_selection();
    }

    /// Nodes inside the current scroll window.
    #[must_use]
    pub fn visible_window(&self) -> &[NodeId] {
        let start = self.offset.min(self.nodes.len());
        let end = (start + self.viewport_height).min(self.nodes.len());
        &self.nodes[start..end]
    }

    fn follow_selection(&mut self) {
        if self.nodes.is_empty() {
            self.selected = 0;
            self.offset = 0;
            return;
        }
        self.selected = self.selected.min(self.nodes.len() - 1);
        if self.selected < self.offset {
            self.offset = self.selected;
        } else if self.selected >= self.offset + self.viewport_height {
            self.offset = self.selected + 1 - self.viewport_height;
        }
    }
}

fn signed(value: usize) -> isize {
    isize::try_from(value).unwrap_or(isize::MAX)
}

/// The four panes plus the focus pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneSet {
    panes: [PaneState; 4],
    focus: PaneKind,
}

impl Default for PaneSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PaneSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            panes: PaneKind::ALL.map(PaneState::new),
            focus: PaneKind::Databases,
        }
    }

    #[must_use]
    pub fn focus(&self) -> PaneKind {
        self.focus
    }

    pub fn set_focus(&mut self, focus: PaneKind) {
        self.focus = focus;
    }

    #[must_use]
    pub fn pane(&self, kind: PaneKind) -> &PaneState {
        &self.panes[kind.ordinal()]
    }

    pub fn pane_mut(&mut self, kind: PaneKind) -> &mut PaneState {
        &mut self.panes[kind.ordinal()]
    }

    #[must_use]
    pub fn focused(&self) -> &PaneState {
        self.pane(self.focus)
    }

    pub fn focused_mut(&mut self) -> &mut PaneState {
        let focus = self.focus;
        self.pane_mut(focus)
    }

    /// Lists the server's databases in the first pane, clears the rest and
    /// focuses `Databases`.
    pub fn seed_from_tree(&mut self, tree: &CatalogTree) {
        let server = tree.server();
        self.panes[0].set_nodes(Some(server), tree.children(server).to_vec());
        for pane in &mut self.panes[1..] {
            pane.clear();
        }
        self.focus = PaneKind::Databases;
    }

    /// Seeds `kind` with the children of `parent` and clears every structural
    /// pane to its right.
    pub fn seed(&mut self, kind: PaneKind, tree: &CatalogTree, parent: NodeId) {
        self.pane_mut(kind)
            .set_nodes(Some(parent), tree.children(parent).to_vec());
        let mut next = kind.next();
        while let Some(pane) = next {
            if pane == PaneKind::Data {
                break;
            }
            self.pane_mut(pane).clear();
            next = pane.next();
        }
    }

    /// Checks the structural panes top-down against `tree` and re-lists the
    /// first one that drifted, keeping its cursor on the same name when that
    /// node survived. Panes to its right are cleared and focus is pulled
    /// back onto it. Returns whether anything changed.
    pub fn resync(&mut self, tree: &CatalogTree) -> bool {
        let mut expected_parent = Some(tree.server());
        for kind in [PaneKind::Databases, PaneKind::Schemas, PaneKind::Tables] {
            let pane = self.pane(kind);
            if pane.parent().is_none() && pane.is_empty() {
                return false;
            }
            let in_sync = pane.parent() == expected_parent
                && expected_parent.is_some_and(|parent| tree.children(parent) == pane.nodes());
            if !in_sync {
                self.relist(kind, tree, expected_parent);
                return true;
            }
            expected_parent = pane.selected_node();
        }
        false
    }

    fn relist(&mut self, kind: PaneKind, tree: &CatalogTree, parent: Option<NodeId>) {
        let remembered = self
            .pane(kind)
            .selected_node()
            .and_then(|node| tree.get(node))
            .map(|node| node.name.clone());
        match parent {
            Some(parent) => self.seed(kind, tree, parent),
            None => {
                let mut next = Some(kind);
                while let Some(pane) = next.filter(|pane| *pane != PaneKind::Data) {
                    self.pane_mut(pane).clear();
                    next = pane.next();
                }
            }
        }
        if let Some(name) = remembered {
            let pane = self.pane_mut(kind);
            let survivor = pane
                .nodes()
                .iter()
                .copied()
                .find(|node| tree.node(*node).name == name);
            if let Some(node) = survivor {
                pane.select(node);
            }
        }
        if self.focus != PaneKind::Data && self.focus.ordinal() > kind.ordinal() {
            self.focus = kind;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PaneKind, PaneSet, PaneState, DEFAULT_VIEWPORT_HEIGHT};
    use crate::tree::{CatalogTree, NodeKind, NodeSeed};

    fn pane_with(count: usize) -> PaneState {
        let mut tree = CatalogTree::new("root", "local");
        let server = tree.server();
        let ids = tree.attach_children(
            server,
            (0..count)
                .map(|index| NodeSeed::new(format!("db_{index}"), format!("db{index}"), NodeKind::Database))
                .collect(),
        );
        let mut pane = PaneState::new(PaneKind::Databases);
        pane.set_nodes(Some(server), ids);
        pane
    }

    fn assert_window_invariant(pane: &PaneState) {
        if pane.is_empty() {
            return;
        }
        assert!(pane.selected_index() < pane.nodes().len());
        assert!(pane.offset() <= pane.selected_index());
        assert!(pane.selected_index() < pane.offset() + pane.viewport_height());
    }

    #[test]
    fn pane_kind_ordering_and_cycle() {
        assert_eq!(PaneKind::Databases.next(), Some(PaneKind::Schemas));
        assert_eq!(PaneKind::Data.next(), None);
        assert_eq!(PaneKind::Databases.previous(), None);
        assert_eq!(PaneKind::Data.cycle(), PaneKind::Databases);
        assert_eq!(PaneKind::Tables.node_kind(), Some(NodeKind::Table));
    }

    #[test]
    fn move_selection_clamps_and_scroll_follows() {
        let mut pane = pane_with(25);
        assert_eq!(pane.viewport_height(), DEFAULT_VIEWPORT_HEIGHT);

        for delta in [1, 5, 7, -3, 100, -1, -100, 12, 9, -2] {
            pane.move_selection(delta);
            assert_window_invariant(&pane);
        }

        pane.move_selection(100);
        assert_eq!(pane.selected_index(), 24);
        assert_eq!(pane.offset(), 15);

        pane.move_selection(-100);
        assert_eq!(pane.selected_index(), 0);
        assert_eq!(pane.offset(), 0);
    }

    #[test]
    fn paging_and_home_end_keep_the_window_valid() {
        let mut pane = pane_with(30);
        pane.set_viewport_height(4);

        pane.page_down();
        assert_eq!(pane.selected_index(), 4);
        assert_window_invariant(&pane);

        pane.end();
        assert_eq!(pane.selected_index(), 29);
        assert_eq!(pane.visible_window().len(), 4);
        assert_window_invariant(&pane);

        pane.page_up();
        assert_eq!(pane.selected_index(), 25);
        assert_window_invariant(&pane);

        pane.home();
        assert_eq!((pane.selected_index(), pane.offset()), (0, 0));
    }

    #[test]
    fn shrinking_viewport_repins_offset() {
        let mut pane = pane_with(20);
        pane.move_selection(9);
        pane.set_viewport_height(0);

        assert_eq!(pane.viewport_height(), 1);
        assert_eq!(pane.offset(), 9);
        assert_window_invariant(&pane);
    }

    #[test]
    fn empty_pane_ignores_movement() {
        let mut pane = PaneState::new(PaneKind::Schemas);
        pane.move_selection(3);
        pane.end();

        assert_eq!(pane.selected_node(), None);
        assert_eq!(pane.selected_index(), 0);
        assert!(pane.visible_window().is_empty());
    }

    #[test]
    fn seed_from_tree_lists_databases_and_resets_focus() {
        let mut tree = CatalogTree::new("root", "local");
        let server = tree.server();
        let dbs = tree.attach_children(
            server,
            vec![
                NodeSeed::new("db_a", "a", NodeKind::Database),
                NodeSeed::new("db_b", "b", NodeKind::Database),
            ],
        );
        let schemas = tree.attach_children(dbs[0], vec![NodeSeed::new("s", "public", NodeKind::Schema)]);

        let mut panes = PaneSet::new();
        panes.seed(PaneKind::Schemas, &tree, dbs[0]);
        panes.set_focus(PaneKind::Schemas);
        assert_eq!(panes.pane(PaneKind::Schemas).nodes(), schemas.as_slice());

        panes.seed_from_tree(&tree);
        assert_eq!(panes.focus(), PaneKind::Databases);
        assert_eq!(panes.pane(PaneKind::Databases).nodes(), dbs.as_slice());
        assert_eq!(panes.pane(PaneKind::Databases).parent(), Some(server));
        assert!(panes.pane(PaneKind::Schemas).is_empty());
    }

    #[test]
    fn select_moves_cursor_to_known_nodes_only() {
        let mut pane = pane_with(15);
        let target = pane.nodes()[12];

        assert!(pane.select(target));
        assert_eq!(pane.selected_index(), 12);
        assert_window_invariant(&pane);

        let mut other = pane_with(1);
        assert!(!other.select(target));
    }

    #[test]
    fn resync_relists_panes_after_a_level_is_reloaded() {
        let mut tree = CatalogTree::new("root", "local");
        let server = tree.server();
        let dbs = tree.attach_children(server, vec![NodeSeed::new("db_app", "app", NodeKind::Database)]);
        let schemas = tree.attach_children(
            dbs[0],
            vec![
                NodeSeed::new("s_audit", "audit", NodeKind::Schema),
                NodeSeed::new("s_public", "public", NodeKind::Schema),
            ],
        );
        let tables = tree.attach_children(schemas[1], vec![NodeSeed::new("t", "users", NodeKind::Table)]);

        let mut panes = PaneSet::new();
        panes.seed_from_tree(&tree);
        panes.seed(PaneKind::Schemas, &tree, dbs[0]);
        panes.pane_mut(PaneKind::Schemas).select(schemas[1]);
        panes.seed(PaneKind::Tables, &tree, schemas[1]);
        panes.set_focus(PaneKind::Tables);
        assert!(!panes.resync(&tree), "untouched panes are already in sync");
        assert_eq!(panes.pane(PaneKind::Tables).nodes(), tables.as_slice());

        tree.clear_children(dbs[0]);
        let reloaded = tree.attach_children(
            dbs[0],
            vec![
                NodeSeed::new("s_audit", "audit", NodeKind::Schema),
                NodeSeed::new("s_public", "public", NodeKind::Schema),
            ],
        );

        assert!(panes.resync(&tree));
        let schemas_pane = panes.pane(PaneKind::Schemas);
        assert_eq!(schemas_pane.nodes(), reloaded.as_slice());
        assert_eq!(schemas_pane.selected_node(), Some(reloaded[1]));
        assert!(panes.pane(PaneKind::Tables).is_empty());
        assert_eq!(panes.focus(), PaneKind::Schemas);
        assert!(!panes.resync(&tree));
    }
}
