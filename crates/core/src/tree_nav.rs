//! Single-tree browsing: the whole catalog as one indented, scrollable list.

use crate::loader::TableTarget;
use crate::navigator::{ChildrenLoader, NavOutcome};
use crate::panes::DEFAULT_VIEWPORT_HEIGHT;
use crate::tree::{CatalogTree, NodeId, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeAction {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Back,
    Home,
    End,
    PageUp,
    PageDown,
    ViewTable,
    OpenQuery,
    Refresh,
    StartSearch,
    SearchInput(char),
    SearchBackspace,
    SearchSubmit,
    Escape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNavigator {
    offset: usize,
    height: usize,
    search: Option<String>,
}

impl Default for TreeNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeNavigator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            offset: 0,
            height: DEFAULT_VIEWPORT_HEIGHT,
            search: None,
        }
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn set_height(&mut self, height: usize) {
        self.height = height.max(1);
    }

    #[must_use]
    pub fn is_searching(&self) -> bool {
        self.search.is_some()
    }

    #[must_use]
    pub fn search_query(&self) -> Option<&str> {
        self.search.as_deref()
    }

    /// Index of the selection among the visible nodes.
    #[must_use]
    pub fn position(&self, tree: &CatalogTree, visible: &[NodeId]) -> Option<usize> {
        let selected = tree.selected()?;
        visible.iter().position(|node| *node == selected)
    }

    pub fn handle(
        &mut self,
        tree: &mut CatalogTree,
        children: &dyn ChildrenLoader,
        action: TreeAction,
    ) -> NavOutcome {
        if tree.selected().is_none() {
            tree.set_selected(tree.server());
        }

        match action {
            TreeAction::Up => self.step(tree, -1),
            TreeAction::Down => self.step(tree, 1),
            TreeAction::PageUp => self.step(tree, -signed(self.height)),
            TreeAction::PageDown => self.step(tree, signed(self.height)),
            TreeAction::Home => {
                if let Some(first) = tree.all_visible_nodes().first().copied() {
                    self.select(tree, first);
                }
            }
            TreeAction::End => {
                if let Some(last) = tree.all_visible_nodes().last().copied() {
                    self.select(tree, last);
                }
            }
            TreeAction::Left => self.collapse_or_parent(tree),
            TreeAction::Right => return self.expand(tree, children, false),
            TreeAction::Enter => return self.expand(tree, children, true),
            TreeAction::Back => self.select_parent(tree),
            TreeAction::ViewTable => return view_table(tree),
            TreeAction::OpenQuery => return NavOutcome::OpenQueryEditor,
            TreeAction::Refresh => return self.refresh(tree, children),
            TreeAction::StartSearch => self.search = Some(String::new()),
            TreeAction::SearchInput(ch) => {
                if let Some(query) = &mut self.search {
                    query.push(ch);
                    self.jump_to_match(tree, false);
                }
            }
            TreeAction::SearchBackspace => {
                if let Some(query) = &mut self.search {
                    query.pop();
                    self.jump_to_match(tree, false);
                }
            }
            TreeAction::SearchSubmit => self.jump_to_match(tree, true),
            TreeAction::Escape => {
                if self.search.take().is_none() {
                    return NavOutcome::LeaveView;
                }
            }
        }
        NavOutcome::Handled
    }

    /// Selects `node` and scrolls so it sits inside the window.
    pub fn select(&mut self, tree: &mut CatalogTree, node: NodeId) {
        tree.set_selected(node);
        let visible = tree.all_visible_nodes();
        if let Some(index) = visible.iter().position(|candidate| *candidate == node) {
            if index < self.offset {
                self.offset = index;
            } else if index >= self.offset + self.height {
                self.offset = index + 1 - self.height;
            }
        }
    }

    fn step(&mut self, tree: &mut CatalogTree, delta: isize) {
        let visible = tree.all_visible_nodes();
        if visible.is_empty() {
            return;
        }
        let current = self.position(tree, &visible).unwrap_or(0);
        let target = current.saturating_add_signed(delta).min(visible.len() - 1);
        self.select(tree, visible[target]);
    }

    fn collapse_or_parent(&mut self, tree: &mut CatalogTree) {
        let Some(selected) = tree.selected() else {
            return;
        };
        let node = tree.node(selected);
        if node.has_children() && node.expanded {
            tree.collapse(selected);
        } else {
            self.select_parent(tree);
        }
    }

    fn select_parent(&mut self, tree: &mut CatalogTree) {
        let Some(selected) = tree.selected() else {
            return;
        };
        if let Some(parent) = tree.parent(selected) {
            if parent != tree.root() {
                self.select(tree, parent);
            }
        }
    }

    /// Loads children on first use, then expands. With `descend` the first
    /// child becomes the selection.
    fn expand(
        &mut self,
        tree: &mut CatalogTree,
        children: &dyn ChildrenLoader,
        descend: bool,
    ) -> NavOutcome {
        let Some(selected) = tree.selected() else {
            return NavOutcome::Handled;
        };
        if !tree.node(selected).has_children() {
            if let Err(err) = children.load_children(tree, selected) {
                return NavOutcome::Failed(err);
            }
        }
        tree.expand(selected);
        if descend {
            if let Some(first) = tree.children(selected).first().copied() {
                self.select(tree, first);
            }
        }
        NavOutcome::Handled
    }

    fn refresh(&mut self, tree: &mut CatalogTree, children: &dyn ChildrenLoader) -> NavOutcome {
        let Some(selected) = tree.selected() else {
            return NavOutcome::Handled;
        };
        if tree.node(selected).kind == NodeKind::Server {
            return NavOutcome::ReloadTree;
        }
        let was_expanded = tree.node(selected).expanded;
        tree.clear_children(selected);
        if let Err(err) = children.load_children(tree, selected) {
            return NavOutcome::Failed(err);
        }
        if was_expanded {
            tree.expand(selected);
        }
        NavOutcome::Handled
    }

    /// Case-insensitive substring match over visible names and paths. With
    /// `skip_current` the search starts after the selection and wraps.
    fn jump_to_match(&mut self, tree: &mut CatalogTree, skip_current: bool) {
        let Some(query) = self.search.as_deref().map(str::to_lowercase) else {
            return;
        };
        if query.is_empty() {
            return;
        }
        let visible = tree.all_visible_nodes();
        let start = match self.position(tree, &visible) {
            Some(index) if skip_current => index + 1,
            Some(index) => index,
            None => 0,
        };

        let found = (0..visible.len())
            .map(|step| visible[(start + step) % visible.len()])
            .find(|node| {
                let node = tree.node(*node);
                node.name.to_lowercase().contains(&query)
                    || node.path.to_lowercase().contains(&query)
            });
        if let Some(node) = found {
            self.select(tree, node);
        }
    }
}

fn view_table(tree: &CatalogTree) -> NavOutcome {
    let Some(selected) = tree.selected() else {
        return NavOutcome::Handled;
    };
    if tree.node(selected).kind != NodeKind::Table {
        return NavOutcome::Handled;
    }
    TableTarget::for_node(tree, selected).map_or(NavOutcome::Handled, NavOutcome::LoadTable)
}

fn signed(value: usize) -> isize {
    isize::try_from(value).unwrap_or(isize::MAX)
}
