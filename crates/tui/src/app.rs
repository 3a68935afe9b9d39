//! Application state and message routing.
//!
//! [`App::handle`] turns one key message into state changes plus, where
//! needed, [`Command`]s for the worker. Worker results come back through
//! [`App::handle_worker_event`]; stale ones are dropped by ticket.

use std::fmt;
use std::time::Duration;

use tetra_core::connection_manager::ConnectionStatus;
use tetra_core::connections::{ConnectionInfo, ConnectionStore};
use tetra_core::dispatch::{LoadReply, LoadRequest, RequestSlot, RequestTracker, Ticket};
use tetra_core::grid::{CellPosition, DataGrid};
use tetra_core::loader::{LoaderError, SharedLoader, TableTarget};
use tetra_core::navigator::{ChildrenLoader, NavAction, NavOutcome, PaneNavigator};
use tetra_core::panes::{PaneKind, PaneSet};
use tetra_core::settings::Settings;
use tetra_core::text_input::TextInput;
use tetra_core::tree::CatalogTree;
use tetra_core::tree_nav::{TreeAction, TreeNavigator};
use tracing::{debug, info, warn};

use crate::forms::{ConnectionForm, ConnectionPicker, PickerChoice};
use crate::keymap::{KeyContext, Msg};
use crate::view::Viewports;
use crate::worker::WorkerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Picker,
    Form,
    Connecting,
    Panes,
    Tree,
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub title: String,
    pub message: String,
    /// Dismissing returns to the connection picker and drops the session.
    pub back_to_picker: bool,
}

pub struct Session {
    info: ConnectionInfo,
    latency: Duration,
    loader: SharedLoader,
    status: Option<ConnectionStatus>,
}

impl Session {
    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Round trip of the latest health check, or the connect latency before
    /// the first one.
    #[must_use]
    pub fn ping(&self) -> Duration {
        self.status
            .as_ref()
            .and_then(|status| status.last_latency)
            .unwrap_or(self.latency)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("info", &self.info.name)
            .field("latency", &self.latency)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Work the event loop hands to the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect { ticket: Ticket, info: ConnectionInfo },
    Load { ticket: Ticket, request: LoadRequest },
    HealthCheck { ticket: Ticket },
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub store: ConnectionStore,
    pub settings: Settings,
    /// Saved connection to open right away instead of showing the picker.
    pub auto_connect: Option<String>,
}

#[derive(Debug)]
pub struct App {
    mode: Mode,
    layout: Mode,
    store: ConnectionStore,
    settings: Settings,
    picker: ConnectionPicker,
    form: ConnectionForm,
    session: Option<Session>,
    tree: Option<CatalogTree>,
    panes: PaneSet,
    tree_nav: TreeNavigator,
    grid: DataGrid,
    query: TextInput,
    tracker: RequestTracker,
    /// Grid sequence current when the latest mutation was sent.
    grid_seq_at_mutation: u64,
    viewports: Option<Viewports>,
    overlay: Option<Overlay>,
    status: String,
    busy: Option<String>,
    ticks: usize,
    /// Tick at which the session was last pinged.
    pinged_at_tick: usize,
    commands: Vec<Command>,
    should_quit: bool,
}

impl App {
    #[must_use]
    pub fn new(mut store: ConnectionStore, settings: Settings) -> Self {
        if store.ensure_default() {
            debug!("no saved connections; offering the local default");
        }
        Self {
            mode: Mode::Picker,
            layout: Mode::Panes,
            store,
            settings,
            picker: ConnectionPicker::default(),
            form: ConnectionForm::default(),
            session: None,
            tree: None,
            panes: PaneSet::new(),
            tree_nav: TreeNavigator::new(),
            grid: DataGrid::new(),
            query: TextInput::multiline().with_placeholder("SELECT * FROM ..."),
            tracker: RequestTracker::new(),
            grid_seq_at_mutation: 0,
            viewports: None,
            overlay: None,
            status: "Choose a connection".to_string(),
            busy: None,
            ticks: 0,
            pinged_at_tick: 0,
            commands: Vec::new(),
            should_quit: false,
        }
    }

    #[must_use]
    pub fn from_options(options: LaunchOptions) -> Self {
        let mut app = Self::new(options.store, options.settings);
        if let Some(name) = options.auto_connect {
            app.connect_saved(&name);
        }
        app
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn store(&self) -> &ConnectionStore {
        &self.store
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn picker(&self) -> &ConnectionPicker {
        &self.picker
    }

    #[must_use]
    pub fn form(&self) -> &ConnectionForm {
        &self.form
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Loader of the live session, if any.
    #[must_use]
    pub fn loader(&self) -> Option<SharedLoader> {
        self.session.as_ref().map(|session| session.loader.clone())
    }

    #[must_use]
    pub fn tree(&self) -> Option<&CatalogTree> {
        self.tree.as_ref()
    }

    #[must_use]
    pub fn panes(&self) -> &PaneSet {
        &self.panes
    }

    #[must_use]
    pub fn tree_nav(&self) -> &TreeNavigator {
        &self.tree_nav
    }

    #[must_use]
    pub fn grid(&self) -> &DataGrid {
        &self.grid
    }

    #[must_use]
    pub fn query(&self) -> &TextInput {
        &self.query
    }

    #[must_use]
    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    #[must_use]
    pub fn busy(&self) -> Option<&str> {
        self.busy.as_deref()
    }

    #[must_use]
    pub fn ticks(&self) -> usize {
        self.ticks
    }

    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    #[must_use]
    pub fn key_context(&self) -> KeyContext {
        if self.overlay.is_some() {
            return KeyContext::Navigation;
        }
        let text_entry = match self.mode {
            Mode::Form => self.form.is_editing_text(),
            Mode::Query => true,
            Mode::Panes => self.panes.focus() == PaneKind::Data && self.grid.is_editing(),
            Mode::Tree => self.tree_nav.is_searching(),
            Mode::Picker | Mode::Connecting => false,
        };
        if text_entry {
            KeyContext::TextEntry
        } else {
            KeyContext::Navigation
        }
    }

    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Sizes every scrolling widget to the current terminal area.
    pub fn apply_viewports(&mut self, viewports: Viewports) {
        self.viewports = Some(viewports);
        for kind in [PaneKind::Databases, PaneKind::Schemas, PaneKind::Tables] {
            self.panes
                .pane_mut(kind)
                .set_viewport_height(viewports.pane_rows);
        }
        self.grid
            .set_viewport(viewports.grid_rows, viewports.grid_width);
        self.tree_nav.set_height(viewports.tree_rows);
    }

    /// Opens the saved connection `name`, or explains that it is missing.
    pub fn connect_saved(&mut self, name: &str) {
        match self.store.connection(name).cloned() {
            Some(info) => {
                self.picker.select_connection(&self.store, name);
                self.connect(info);
            }
            None => self.show_overlay(
                "Unknown connection",
                format!("no saved connection named `{name}`"),
                false,
            ),
        }
    }

    pub fn handle(&mut self, msg: Msg, children: &dyn ChildrenLoader) {
        match msg {
            Msg::Tick => {
                self.ticks = self.ticks.wrapping_add(1);
                self.schedule_health_check();
                return;
            }
            Msg::Quit => {
                self.should_quit = true;
                return;
            }
            _ => {}
        }

        if self.overlay.is_some() {
            if matches!(msg, Msg::Submit | Msg::Cancel) {
                self.dismiss_overlay();
            }
            return;
        }

        match self.mode {
            Mode::Picker => self.handle_picker(msg),
            Mode::Form => self.handle_form(msg),
            Mode::Connecting => {
                if msg == Msg::Cancel {
                    self.tracker.invalidate_all();
                    self.busy = None;
                    self.mode = Mode::Picker;
                    self.status = "Connection cancelled".to_string();
                }
            }
            Mode::Panes if self.panes.focus() == PaneKind::Data => self.handle_grid(msg),
            Mode::Panes => self.handle_panes(msg, children),
            Mode::Tree => self.handle_tree(msg, children),
            Mode::Query => self.handle_query(msg),
        }
    }

    pub fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Connected {
                ticket,
                info,
                latency,
                loader,
            } => {
                if !self.tracker.accept(ticket) {
                    debug!(connection = %info.name, "dropping superseded session");
                    return;
                }
                info!(connection = %info.name, latency_ms = latency.as_millis(), "connected");
                self.status = format!("Connected to {} in {} ms", info.name, latency.as_millis());
                let server_label = info.name.clone();
                self.session = Some(Session {
                    info,
                    latency,
                    loader,
                    status: None,
                });
                self.pinged_at_tick = self.ticks;
                self.request(LoadRequest::Tree { server_label });
            }
            WorkerEvent::ConnectFailed { ticket, message } => {
                if !self.tracker.accept(ticket) {
                    return;
                }
                self.busy = None;
                self.mode = Mode::Picker;
                self.show_overlay("Connection failed", message, true);
            }
            WorkerEvent::Loaded { ticket, result } => {
                if !self.tracker.accept(ticket) {
                    debug!(?ticket, "dropping stale result");
                    return;
                }
                self.busy = None;
                match result {
                    Ok(reply) => self.apply_reply(reply),
                    Err(err) => self.fail(&err),
                }
            }
            WorkerEvent::Health {
                ticket,
                status,
                outcome,
            } => {
                if !self.tracker.accept(ticket) {
                    return;
                }
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.status = Some(status);
                if let Err(message) = outcome {
                    self.show_overlay("Connection lost", message, true);
                }
            }
        }
    }

    /// Pings the session once `health_check_secs` worth of ticks has passed
    /// while no other work is in flight.
    fn schedule_health_check(&mut self) {
        let Some(interval) = self.settings.health_check_interval() else {
            return;
        };
        if self.session.is_none() || self.busy.is_some() || self.overlay.is_some() {
            return;
        }
        let tick_ms = self.settings.tick_rate().as_millis().max(1);
        let every = usize::try_from(interval.as_millis() / tick_ms)
            .unwrap_or(usize::MAX)
            .max(1);
        if self.ticks.wrapping_sub(self.pinged_at_tick) < every {
            return;
        }
        self.pinged_at_tick = self.ticks;
        let ticket = self.tracker.issue(RequestSlot::Health);
        self.commands.push(Command::HealthCheck { ticket });
    }

    fn connect(&mut self, info: ConnectionInfo) {
        self.tracker.invalidate_all();
        let ticket = self.tracker.issue(RequestSlot::Session);
        self.session = None;
        self.tree = None;
        self.reset_browsers();
        self.mode = Mode::Connecting;
        self.busy = Some(format!("Connecting to {}", info.name));
        self.commands.push(Command::Connect { ticket, info });
    }

    fn request(&mut self, request: LoadRequest) {
        if request.slot() == RequestSlot::Mutation {
            self.grid_seq_at_mutation = self.tracker.latest(RequestSlot::Grid);
        }
        let ticket = self.tracker.issue(request.slot());
        self.busy = Some(request.describe());
        self.commands.push(Command::Load { ticket, request });
    }

    fn load_table(&mut self, target: TableTarget, restore: CellPosition) {
        self.request(LoadRequest::TableData {
            target,
            limit: self.settings.page_size,
            offset: 0,
            restore,
        });
    }

    fn reset_browsers(&mut self) {
        self.panes = PaneSet::new();
        self.tree_nav = TreeNavigator::new();
        self.grid = DataGrid::new();
        if let Some(viewports) = self.viewports {
            self.apply_viewports(viewports);
        }
    }

    fn apply_reply(&mut self, reply: LoadReply) {
        match reply {
            LoadReply::TreeLoaded(tree) => {
                self.reset_browsers();
                self.panes.seed_from_tree(&tree);
                self.status = format!("{} databases", tree.children(tree.server()).len());
                self.tree = Some(tree);
                self.mode = self.layout;
            }
            LoadReply::TableLoaded {
                target,
                rows,
                restore,
            } => {
                self.status = format!("{} rows from {target}", rows.len());
                self.grid.set_results(rows);
                self.grid.set_context(Some(target));
                self.grid.set_selection(restore);
                self.show_data();
            }
            LoadReply::QueryExecuted { rows } => {
                self.status = format!("Query returned {} rows", rows.len());
                self.grid.set_results(rows);
                self.grid.set_context(None);
                self.show_data();
            }
            LoadReply::Mutated {
                target,
                restore,
                kind,
            } => {
                self.status = kind.past_tense().to_string();
                if self.tracker.latest(RequestSlot::Grid) == self.grid_seq_at_mutation {
                    self.load_table(target, restore);
                } else {
                    debug!(table = %target, "newer grid request pending; skipping reload");
                }
            }
        }
    }

    fn show_data(&mut self) {
        self.mode = Mode::Panes;
        self.panes.set_focus(PaneKind::Data);
    }

    fn fail(&mut self, err: &LoaderError) {
        warn!(error = %err, "request failed");
        let back_to_picker = err.is_connectivity() || self.tree.is_none();
        self.show_overlay("Error", err.to_string(), back_to_picker);
    }

    fn show_overlay(&mut self, title: &str, message: String, back_to_picker: bool) {
        self.overlay = Some(Overlay {
            title: title.to_string(),
            message,
            back_to_picker,
        });
    }

    fn dismiss_overlay(&mut self) {
        let Some(overlay) = self.overlay.take() else {
            return;
        };
        if overlay.back_to_picker {
            self.tracker.invalidate_all();
            self.session = None;
            self.tree = None;
            self.busy = None;
            self.reset_browsers();
            self.mode = Mode::Picker;
            self.status = "Choose a connection".to_string();
        }
    }

    fn handle_picker(&mut self, msg: Msg) {
        match msg {
            Msg::Up => self.picker.move_selection(-1, &self.store),
            Msg::Down => self.picker.move_selection(1, &self.store),
            Msg::Home => self.picker = ConnectionPicker::default(),
            Msg::NewItem => self.open_form(),
            Msg::Submit => match self.picker.choice(&self.store) {
                PickerChoice::NewConnection => self.open_form(),
                PickerChoice::Saved(info) => self.connect(info),
            },
            Msg::Cancel => self.should_quit = true,
            _ => {}
        }
    }

    fn open_form(&mut self) {
        self.form = ConnectionForm::default();
        self.mode = Mode::Form;
        self.status = "New connection".to_string();
    }

    fn handle_form(&mut self, msg: Msg) {
        match msg {
            Msg::Tab | Msg::Down => self.form.next_field(),
            Msg::BackTab | Msg::Up => self.form.previous_field(),
            Msg::Left => self.form.move_left(),
            Msg::Right => self.form.move_right(),
            Msg::Home => self.form.move_home(),
            Msg::End => self.form.move_end(),
            Msg::Input(ch) => self.form.insert(ch),
            Msg::Backspace => self.form.backspace(),
            Msg::Delete => self.form.delete(),
            Msg::Cancel => {
                self.mode = Mode::Picker;
                self.status = "Choose a connection".to_string();
            }
            Msg::Submit => match self.form.to_connection_info() {
                Ok(info) => {
                    self.store.upsert(info.clone());
                    if let Err(err) = self.store.persist() {
                        warn!(error = %err, "could not save connections");
                        self.status = format!("Connection not saved: {err}");
                    }
                    self.picker.select_connection(&self.store, &info.name);
                    self.connect(info);
                }
                Err(err) => self.status = err.to_string(),
            },
            _ => {}
        }
    }

    fn handle_panes(&mut self, msg: Msg, children: &dyn ChildrenLoader) {
        let action = match msg {
            Msg::Up => NavAction::Up,
            Msg::Down => NavAction::Down,
            Msg::Left => NavAction::Left,
            Msg::Right => NavAction::Right,
            Msg::Submit => NavAction::Enter,
            Msg::Cancel => NavAction::Escape,
            Msg::Tab => NavAction::Tab,
            Msg::PageUp => NavAction::PageUp,
            Msg::PageDown => NavAction::PageDown,
            Msg::Home => NavAction::Home,
            Msg::End => NavAction::End,
            Msg::Refresh => NavAction::Refresh,
            Msg::OpenQuery => NavAction::OpenQuery,
            Msg::ToggleLayout => {
                self.show_tree();
                return;
            }
            _ => return,
        };
        let Some(tree) = self.tree.as_mut() else {
            return;
        };
        let outcome = PaneNavigator::new(&mut self.panes, tree, children).handle(action);
        self.apply_outcome(outcome);
    }

    fn handle_grid(&mut self, msg: Msg) {
        if self.grid.is_editing() {
            self.handle_grid_edit(msg);
            return;
        }
        match msg {
            Msg::Up => self.grid.move_selection(-1, 0),
            Msg::Down => self.grid.move_selection(1, 0),
            Msg::Left => self.grid.move_selection(0, -1),
            Msg::Right => self.grid.move_selection(0, 1),
            Msg::PageUp => self.grid.page_up(),
            Msg::PageDown => self.grid.page_down(),
            Msg::Home => self.grid.first_column(),
            Msg::End => self.grid.last_column(),
            Msg::Submit => {
                if let Err(err) = self.grid.begin_update_cell() {
                    self.status = err.to_string();
                }
            }
            Msg::NewItem => match self.grid.begin_insert_row() {
                Ok(()) => self.status = "Insert: column=value, ...".to_string(),
                Err(err) => self.status = err.to_string(),
            },
            Msg::DeleteItem => match self.grid.request_delete() {
                Ok(command) => self.request(command.into()),
                Err(err) => self.status = err.to_string(),
            },
            Msg::Reload | Msg::Refresh => match self.grid.context().cloned() {
                Some(target) => {
                    let restore = self.grid.selection();
                    self.load_table(target, restore);
                }
                None => self.status = "Query results cannot be reloaded".to_string(),
            },
            Msg::Cancel => self.panes.set_focus(PaneKind::Tables),
            Msg::Tab => self.panes.set_focus(PaneKind::Data.cycle()),
            Msg::OpenQuery => self.open_query(),
            Msg::ToggleLayout => self.show_tree(),
            _ => {}
        }
    }

    fn handle_grid_edit(&mut self, msg: Msg) {
        match msg {
            Msg::Submit => match self.grid.commit_edit() {
                Ok(Some(command)) => self.request(command.into()),
                Ok(None) => self.status = "Enter at least one column=value pair".to_string(),
                Err(err) => self.status = err.to_string(),
            },
            Msg::Cancel => {
                self.grid.cancel_edit();
                self.status = "Edit cancelled".to_string();
            }
            _ => {
                let Some(input) = self.grid.edit_input_mut() else {
                    return;
                };
                match msg {
                    Msg::Input(ch) => input.insert(ch),
                    Msg::Backspace => input.backspace(),
                    Msg::Delete => input.delete(),
                    Msg::Left => input.move_left(),
                    Msg::Right => input.move_right(),
                    Msg::Home => input.move_home(),
                    Msg::End => input.move_end(),
                    _ => {}
                }
            }
        }
    }

    fn handle_tree(&mut self, msg: Msg, children: &dyn ChildrenLoader) {
        let searching = self.tree_nav.is_searching();
        let action = match msg {
            Msg::Up => TreeAction::Up,
            Msg::Down => TreeAction::Down,
            Msg::Left => TreeAction::Left,
            Msg::Right => TreeAction::Right,
            Msg::Home => TreeAction::Home,
            Msg::End => TreeAction::End,
            Msg::PageUp => TreeAction::PageUp,
            Msg::PageDown => TreeAction::PageDown,
            Msg::Submit if searching => TreeAction::SearchSubmit,
            Msg::Submit => TreeAction::Enter,
            Msg::Backspace if searching => TreeAction::SearchBackspace,
            Msg::Backspace => TreeAction::Back,
            Msg::Input(ch) if searching => TreeAction::SearchInput(ch),
            Msg::DeleteItem | Msg::Input(' ') => TreeAction::ViewTable,
            Msg::StartSearch => TreeAction::StartSearch,
            Msg::OpenQuery => TreeAction::OpenQuery,
            Msg::Refresh => TreeAction::Refresh,
            Msg::Cancel => TreeAction::Escape,
            Msg::ToggleLayout => {
                self.show_panes();
                return;
            }
            _ => return,
        };
        let Some(tree) = self.tree.as_mut() else {
            return;
        };
        let outcome = self.tree_nav.handle(tree, children, action);
        self.apply_outcome(outcome);
    }

    fn handle_query(&mut self, msg: Msg) {
        match msg {
            Msg::Input(ch) => self.query.insert(ch),
            Msg::Newline => self.query.newline(),
            Msg::Backspace => self.query.backspace(),
            Msg::Delete => self.query.delete(),
            Msg::Left => self.query.move_left(),
            Msg::Right => self.query.move_right(),
            Msg::Up => self.query.move_up(),
            Msg::Down => self.query.move_down(),
            Msg::Home => self.query.move_home(),
            Msg::End => self.query.move_end(),
            Msg::Submit => {
                let sql = self.query.value().trim().to_string();
                if sql.is_empty() {
                    self.status = "Query is empty".to_string();
                } else {
                    self.request(LoadRequest::Query { sql });
                }
            }
            Msg::Cancel => {
                self.mode = self.layout;
                self.status = "Query editor closed".to_string();
            }
            _ => {}
        }
    }

    fn apply_outcome(&mut self, outcome: NavOutcome) {
        match outcome {
            NavOutcome::Handled => {}
            NavOutcome::LoadTable(target) => self.load_table(target, CellPosition::default()),
            NavOutcome::OpenQueryEditor => self.open_query(),
            NavOutcome::ReloadTree => {
                let server_label = self.session.as_ref().map(|session| session.info.name.clone());
                if let Some(server_label) = server_label {
                    self.request(LoadRequest::Tree { server_label });
                }
            }
            NavOutcome::LeaveView => self.show_panes(),
            NavOutcome::Quit => self.should_quit = true,
            NavOutcome::Failed(err) => self.fail(&err),
        }
    }

    fn open_query(&mut self) {
        self.mode = Mode::Query;
        self.status = "Enter runs the query, Ctrl+J adds a line, Esc closes".to_string();
    }

    fn show_tree(&mut self) {
        self.layout = Mode::Tree;
        self.mode = Mode::Tree;
        if let Some(tree) = self.tree.as_mut() {
            let node = tree.selected().unwrap_or_else(|| tree.server());
            self.tree_nav.select(tree, node);
        }
    }

    fn show_panes(&mut self) {
        self.layout = Mode::Panes;
        self.mode = Mode::Panes;
        if let Some(tree) = self.tree.as_ref() {
            if self.panes.resync(tree) {
                debug!("panes re-listed after tree changes");
            }
        }
        if self.panes.focus() == PaneKind::Data && self.grid.is_empty() {
            self.panes.set_focus(PaneKind::Databases);
        }
    }
}
