//! Drill-down state machine over the four panes.
//!
//! Child loads issued while drilling run to completion before the pane
//! advances; table data, by contrast, is only requested through
//! [`NavOutcome::LoadTable`] and fetched asynchronously by the caller.

use tracing::debug;

use crate::loader::{LoaderError, TableTarget};
use crate::panes::{PaneKind, PaneSet};
use crate::tree::{CatalogTree, NodeId, NodeKind};

/// Blocking children fetch used from inside a key handler.
pub trait ChildrenLoader {
    fn load_children(&self, tree: &mut CatalogTree, node: NodeId) -> Result<(), LoaderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavAction {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Escape,
    Tab,
    PageUp,
    PageDown,
    Home,
    End,
    Refresh,
    OpenQuery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavOutcome {
    Handled,
    LoadTable(TableTarget),
    OpenQueryEditor,
    ReloadTree,
    /// The single-tree view was dismissed.
    LeaveView,
    Quit,
    Failed(LoaderError),
}

pub struct PaneNavigator<'a> {
    panes: &'a mut PaneSet,
    tree: &'a mut CatalogTree,
    children: &'a dyn ChildrenLoader,
}

impl<'a> PaneNavigator<'a> {
    pub fn new(
        panes: &'a mut PaneSet,
        tree: &'a mut CatalogTree,
        children: &'a dyn ChildrenLoader,
    ) -> Self {
        Self {
            panes,
            tree,
            children,
        }
    }

    pub fn handle(&mut self, action: NavAction) -> NavOutcome {
        match action {
            NavAction::Up => self.move_selection(-1),
            NavAction::Down => self.move_selection(1),
            NavAction::PageUp => {
                self.panes.focused_mut().page_up();
                self.sync_tree_selection();
                NavOutcome::Handled
            }
            NavAction::PageDown => {
                self.panes.focused_mut().page_down();
                self.sync_tree_selection();
                NavOutcome::Handled
            }
            NavAction::Home => {
                self.panes.focused_mut().home();
                self.sync_tree_selection();
                NavOutcome::Handled
            }
            NavAction::End => {
                self.panes.focused_mut().end();
                self.sync_tree_selection();
                NavOutcome::Handled
            }
            NavAction::Right | NavAction::Enter => self.drill_right(),
            NavAction::Left => {
                self.drill_left();
                NavOutcome::Handled
            }
            NavAction::Escape => {
                if self.panes.focus() == PaneKind::Databases {
                    return NavOutcome::Quit;
                }
                self.drill_left();
                NavOutcome::Handled
            }
            NavAction::Tab => {
                let next = self.panes.focus().cycle();
                self.panes.set_focus(next);
                NavOutcome::Handled
            }
            NavAction::Refresh => self.refresh(),
            NavAction::OpenQuery => NavOutcome::OpenQueryEditor,
        }
    }

    fn move_selection(&mut self, delta: isize) -> NavOutcome {
        self.panes.focused_mut().move_selection(delta);
        self.sync_tree_selection();
        NavOutcome::Handled
    }

    fn sync_tree_selection(&mut self) {
        if let Some(node) = self.panes.focused().selected_node() {
            self.tree.set_selected(node);
        }
    }

    fn drill_left(&mut self) {
        if let Some(previous) = self.panes.focus().previous() {
            self.panes.set_focus(previous);
            self.sync_tree_selection();
        }
    }

    fn drill_right(&mut self) -> NavOutcome {
        let focus = self.panes.focus();
        let Some(node) = self.panes.focused().selected_node() else {
            return NavOutcome::Handled;
        };
        self.tree.set_selected(node);

        if focus == PaneKind::Tables && self.tree.node(node).kind == NodeKind::Table {
            return match TableTarget::for_node(self.tree, node) {
                Some(target) => NavOutcome::LoadTable(target),
                None => NavOutcome::Handled,
            };
        }

        if !self.tree.node(node).has_children() {
            if let Err(err) = self.children.load_children(self.tree, node) {
                return NavOutcome::Failed(err);
            }
        }

        if !self.tree.node(node).has_children() {
            debug!(path = %self.tree.node(node).path, "nothing to drill into");
            return NavOutcome::Handled;
        }

        match focus.next() {
            Some(next) if next != PaneKind::Data => {
                self.panes.seed(next, self.tree, node);
                self.panes.set_focus(next);
            }
            _ => {}
        }
        NavOutcome::Handled
    }

    /// Reloads the focused pane's level. On the first pane this means the
    /// whole tree, which the caller fetches asynchronously.
    fn refresh(&mut self) -> NavOutcome {
        let focus = self.panes.focus();
        match focus {
            PaneKind::Databases => return NavOutcome::ReloadTree,
            PaneKind::Data => return NavOutcome::Handled,
            PaneKind::Schemas | PaneKind::Tables => {}
        }
        let Some(parent) = self.panes.focused().parent() else {
            return NavOutcome::Handled;
        };

        self.tree.clear_children(parent);
        let loaded = self.children.load_children(self.tree, parent);
        self.panes.seed(focus, self.tree, parent);
        match loaded {
            Ok(()) => NavOutcome::Handled,
            Err(err) => NavOutcome::Failed(err),
        }
    }
}
