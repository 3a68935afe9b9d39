//! Connection picker and the add-connection form.

use tetra_adapters::sqlite::is_sqlite_path;
use tetra_core::connections::{ConnectionInfo, ConnectionStore, DriverKind};
use tetra_core::text_input::TextInput;
use thiserror::Error;

pub const NEW_CONNECTION_LABEL: &str = "+ New connection";

/// What the picker's highlighted row stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerChoice {
    NewConnection,
    Saved(ConnectionInfo),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionPicker {
    selected: usize,
}

impl ConnectionPicker {
    #[must_use]
    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Row labels: the "new" entry followed by every saved connection.
    #[must_use]
    pub fn entries(store: &ConnectionStore) -> Vec<String> {
        std::iter::once(NEW_CONNECTION_LABEL.to_string())
            .chain(store.connections().iter().map(ConnectionInfo::summary))
            .collect()
    }

    pub fn move_selection(&mut self, delta: isize, store: &ConnectionStore) {
        let last = store.connections().len();
        self.selected = self.selected.saturating_add_signed(delta).min(last);
    }

    pub fn select_connection(&mut self, store: &ConnectionStore, name: &str) {
        if let Some(index) = store
            .connections()
            .iter()
            .position(|connection| connection.name == name)
        {
            self.selected = index + 1;
        }
    }

    #[must_use]
    pub fn choice(&self, store: &ConnectionStore) -> PickerChoice {
        match self.selected.checked_sub(1) {
            None => PickerChoice::NewConnection,
            Some(index) => store
                .connections()
                .get(index)
                .cloned()
                .map_or(PickerChoice::NewConnection, PickerChoice::Saved),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Driver,
    Name,
    Path,
    Host,
    Port,
    User,
    Password,
    Database,
    SslMode,
}

impl FormField {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Driver => "Driver",
            Self::Name => "Name",
            Self::Path => "File",
            Self::Host => "Host",
            Self::Port => "Port",
            Self::User => "User",
            Self::Password => "Password",
            Self::Database => "Database",
            Self::SslMode => "SSL mode",
        }
    }
}

const POSTGRES_FIELDS: [FormField; 8] = [
    FormField::Driver,
    FormField::Name,
    FormField::Host,
    FormField::Port,
    FormField::User,
    FormField::Password,
    FormField::Database,
    FormField::SslMode,
];

const SQLITE_FIELDS: [FormField; 3] = [FormField::Driver, FormField::Name, FormField::Path];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("connection name is required")]
    NameRequired,
    #[error("port `{0}` is not a valid port number")]
    InvalidPort(String),
    #[error("sqlite connections need a database file path")]
    PathRequired,
}

#[derive(Debug, Clone)]
pub struct ConnectionForm {
    driver: DriverKind,
    focus: FormField,
    name: TextInput,
    path: TextInput,
    host: TextInput,
    port: TextInput,
    user: TextInput,
    password: TextInput,
    database: TextInput,
    sslmode: TextInput,
}

impl Default for ConnectionForm {
    fn default() -> Self {
        Self {
            driver: DriverKind::Postgres,
            focus: FormField::Name,
            name: TextInput::single_line().with_placeholder("my-database"),
            path: TextInput::single_line().with_placeholder("/path/to/file.db"),
            host: TextInput::single_line().with_value("localhost"),
            port: TextInput::single_line().with_value("5432"),
            user: TextInput::single_line().with_value("postgres"),
            password: TextInput::single_line(),
            database: TextInput::single_line().with_value("postgres"),
            sslmode: TextInput::single_line().with_value("disable"),
        }
    }
}

impl ConnectionForm {
    #[must_use]
    pub fn driver(&self) -> DriverKind {
        self.driver
    }

    #[must_use]
    pub fn focus(&self) -> FormField {
        self.focus
    }

    /// Fields shown for the current driver, in tab order.
    #[must_use]
    pub fn fields(&self) -> &'static [FormField] {
        match self.driver {
            DriverKind::Postgres => &POSTGRES_FIELDS,
            DriverKind::Sqlite => &SQLITE_FIELDS,
        }
    }

    #[must_use]
    pub fn input(&self, field: FormField) -> Option<&TextInput> {
        match field {
            FormField::Driver => None,
            FormField::Name => Some(&self.name),
            FormField::Path => Some(&self.path),
            FormField::Host => Some(&self.host),
            FormField::Port => Some(&self.port),
            FormField::User => Some(&self.user),
            FormField::Password => Some(&self.password),
            FormField::Database => Some(&self.database),
            FormField::SslMode => Some(&self.sslmode),
        }
    }

    fn input_mut(&mut self, field: FormField) -> Option<&mut TextInput> {
        match field {
            FormField::Driver => None,
            FormField::Name => Some(&mut self.name),
            FormField::Path => Some(&mut self.path),
            FormField::Host => Some(&mut self.host),
            FormField::Port => Some(&mut self.port),
            FormField::User => Some(&mut self.user),
            FormField::Password => Some(&mut self.password),
            FormField::Database => Some(&mut self.database),
            FormField::SslMode => Some(&mut self.sslmode),
        }
    }

    /// Rendered value; the password is masked.
    #[must_use]
    pub fn display_value(&self, field: FormField) -> String {
        match field {
            FormField::Driver => self.driver.label().to_string(),
            FormField::Password => "*".repeat(self.password.value().chars().count()),
            other => self
                .input(other)
                .map(TextInput::value)
                .unwrap_or_default(),
        }
    }

    pub fn next_field(&mut self) {
        self.step_field(1);
    }

    pub fn previous_field(&mut self) {
        self.step_field(-1);
    }

    fn step_field(&mut self, delta: isize) {
        let fields = self.fields();
        let current = fields
            .iter()
            .position(|field| *field == self.focus)
            .unwrap_or(0);
        let len = fields.len();
        let next = (current + len).saturating_add_signed(delta) % len;
        self.focus = fields[next];
    }

    pub fn toggle_driver(&mut self) {
        self.driver = self.driver.toggled();
        if !self.fields().contains(&self.focus) {
            self.focus = FormField::Driver;
        }
    }

    /// The driver row reads keys as toggles rather than text.
    #[must_use]
    pub fn is_editing_text(&self) -> bool {
        self.focus != FormField::Driver
    }

    pub fn insert(&mut self, ch: char) {
        match self.focus {
            FormField::Driver => {
                if ch == ' ' {
                    self.toggle_driver();
                }
            }
            FormField::Port if !ch.is_ascii_digit() => {}
            field => {
                if let Some(input) = self.input_mut(field) {
                    input.insert(ch);
                }
            }
        }
    }

    pub fn backspace(&mut self) {
        if let Some(input) = self.input_mut(self.focus) {
            input.backspace();
        }
    }

    pub fn delete(&mut self) {
        if let Some(input) = self.input_mut(self.focus) {
            input.delete();
        }
    }

    pub fn move_left(&mut self) {
        match self.input_mut(self.focus) {
            Some(input) => input.move_left(),
            None => self.toggle_driver(),
        }
    }

    pub fn move_right(&mut self) {
        match self.input_mut(self.focus) {
            Some(input) => input.move_right(),
            None => self.toggle_driver(),
        }
    }

    pub fn move_home(&mut self) {
        if let Some(input) = self.input_mut(self.focus) {
            input.move_home();
        }
    }

    pub fn move_end(&mut self) {
        if let Some(input) = self.input_mut(self.focus) {
            input.move_end();
        }
    }

    pub fn to_connection_info(&self) -> Result<ConnectionInfo, FormError> {
        let name = self.name.value().trim().to_string();
        if name.is_empty() {
            return Err(FormError::NameRequired);
        }

        match self.driver {
            DriverKind::Sqlite => {
                let path = self.path.value().trim().to_string();
                if !is_sqlite_path(&path) {
                    return Err(FormError::PathRequired);
                }
                Ok(ConnectionInfo::sqlite(name, path))
            }
            DriverKind::Postgres => {
                let raw_port = self.port.value();
                let port = raw_port
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| FormError::InvalidPort(raw_port.clone()))?;
                let mut info = ConnectionInfo::postgres(
                    name,
                    self.host.value().trim(),
                    port,
                    self.user.value().trim(),
                    self.database.value().trim(),
                );
                info.password = self.password.value();
                let sslmode = self.sslmode.value().trim().to_string();
                if !sslmode.is_empty() {
                    info.sslmode = sslmode;
                }
                Ok(info)
            }
        }
    }
}
