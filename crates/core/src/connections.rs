use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONNECTIONS_FILE_NAME: &str = "connections.json";
pub const PASSWORD_ENV_VAR: &str = "TETRA_DB_PASSWORD";
const CONFIG_DIR_ENV_VAR: &str = "TETRA_CONFIG_DIR";
const APP_DIR_NAME: &str = "tetra";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Postgres,
    Sqlite,
}

impl DriverKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Title of the synthetic tree root for this driver.
    #[must_use]
    pub fn root_label(self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL Servers",
            Self::Sqlite => "SQLite Connections",
        }
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Postgres => Self::Sqlite,
            Self::Sqlite => Self::Postgres,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConnectionInfo {
    pub name: String,
    #[serde(rename = "type", default)]
    pub driver: DriverKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub database: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sslmode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl ConnectionInfo {
    #[must_use]
    pub fn postgres(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            driver: DriverKind::Postgres,
            host: host.into(),
            port: Some(port),
            user: user.into(),
            database: database.into(),
            sslmode: "disable".to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sqlite(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: DriverKind::Sqlite,
            path: path.into(),
            ..Self::default()
        }
    }

    /// Offered when nothing has been saved yet.
    #[must_use]
    pub fn default_local() -> Self {
        Self::postgres("localhost", "localhost", 5432, "postgres", "postgres")
    }

    /// `name (host:port)` for servers, `name (path)` for files.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.driver {
            DriverKind::Postgres => format!(
                "{} ({}:{})",
                self.name,
                self.host,
                self.port.unwrap_or(5432)
            ),
            DriverKind::Sqlite => format!("{} ({})", self.name, self.path),
        }
    }

    /// Saved password, or `TETRA_DB_PASSWORD` when none was saved.
    #[must_use]
    pub fn effective_password(&self) -> Option<String> {
        if !self.password.is_empty() {
            return Some(self.password.clone());
        }
        env::var(PASSWORD_ENV_VAR)
            .ok()
            .filter(|password| !password.is_empty())
    }

    /// Label of the single database node a SQLite connection exposes.
    ///
    /// Catalog paths are dot-joined, so the label is the file stem with any
    /// remaining dots replaced.
    #[must_use]
    pub fn sqlite_label(&self) -> String {
        let label = if self.database.is_empty() {
            Path::new(&self.path)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .filter(|stem| !stem.is_empty())
                .unwrap_or_else(|| self.name.clone())
        } else {
            self.database.clone()
        };
        label.replace('.', "_")
    }
}

#[derive(Debug, Error)]
pub enum ConnectionsError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read connections file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse connections file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize connections: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write connections file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Saved connections backed by one JSON array on disk. Names are unique and
/// kept in case-insensitive order.
#[derive(Debug, Clone)]
pub struct ConnectionStore {
    path: PathBuf,
    connections: Vec<ConnectionInfo>,
}

impl ConnectionStore {
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ConnectionsError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                connections: Vec::new(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| ConnectionsError::Read {
            path: path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                connections: Vec::new(),
            });
        }

        let saved: Vec<ConnectionInfo> =
            serde_json::from_str(&raw).map_err(|source| ConnectionsError::Parse {
                path: path.clone(),
                source,
            })?;

        let mut store = Self {
            path,
            connections: Vec::with_capacity(saved.len()),
        };
        for connection in saved {
            store.upsert(connection);
        }
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn connections(&self) -> &[ConnectionInfo] {
        &self.connections
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    #[must_use]
    pub fn connection(&self, name: &str) -> Option<&ConnectionInfo> {
        self.connections
            .iter()
            .find(|connection| connection.name == name)
    }

    pub fn upsert(&mut self, connection: ConnectionInfo) {
        if let Some(existing) = self
            .connections
            .iter_mut()
            .find(|existing| existing.name == connection.name)
        {
            *existing = connection;
        } else {
            self.connections.push(connection);
            self.connections
                .sort_by_cached_key(|connection| connection.name.to_lowercase());
        }
    }

    #[must_use]
    pub fn delete(&mut self, name: &str) -> bool {
        let original_len = self.connections.len();
        self.connections
            .retain(|connection| connection.name != name);
        self.connections.len() != original_len
    }

    /// Seeds the local default when the store is empty. Returns whether it
    /// was added; nothing is written to disk.
    pub fn ensure_default(&mut self) -> bool {
        if !self.connections.is_empty() {
            return false;
        }
        self.connections.push(ConnectionInfo::default_local());
        true
    }

    pub fn persist(&self) -> Result<(), ConnectionsError> {
        if let Some(parent_dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent_dir).map_err(|source| ConnectionsError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered = serde_json::to_string_pretty(&self.connections)
            .map_err(|source| ConnectionsError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| ConnectionsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// `<config>/tetra`, where `<config>` is `TETRA_CONFIG_DIR`, `%APPDATA%`,
/// `XDG_CONFIG_HOME` or `~/.config`, in that order.
pub fn config_base_dir() -> Result<PathBuf, ConnectionsError> {
    let base_dir = if let Some(custom) = env::var_os(CONFIG_DIR_ENV_VAR) {
        PathBuf::from(custom)
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConnectionsError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConnectionsError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join(APP_DIR_NAME))
}

/// A `connections.json` in the working directory wins over the one in the
/// config directory.
#[must_use]
pub fn resolve_connections_path(working_dir: &Path, config_dir: &Path) -> PathBuf {
    let local = working_dir.join(CONNECTIONS_FILE_NAME);
    if local.is_file() {
        local
    } else {
        config_dir.join(CONNECTIONS_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::{
        resolve_connections_path, ConnectionInfo, ConnectionStore, ConnectionsError, DriverKind,
    };

    fn temp_connections_path(temp_dir: &TempDir) -> PathBuf {
        temp_dir.path().join("nested").join("connections.json")
    }

    #[test]
    fn missing_or_blank_file_loads_empty_store() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_connections_path(&temp_dir);

        let store = ConnectionStore::load_from_path(&path).expect("failed to load store");
        assert!(store.is_empty());

        let blank = temp_dir.path().join("blank.json");
        fs::write(&blank, "  \n").expect("failed to write blank file");
        let store = ConnectionStore::load_from_path(blank).expect("failed to load blank store");
        assert!(store.connections().is_empty());
    }

    #[test]
    fn upsert_persist_reload_and_delete_connection() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_connections_path(&temp_dir);

        let mut store = ConnectionStore::load_from_path(&path).expect("failed to load store");
        let local = ConnectionInfo::postgres("local", "127.0.0.1", 5433, "app", "app_dev");
        store.upsert(local.clone());
        store.upsert(ConnectionInfo::sqlite("Cache", "/tmp/cache.db"));
        store.persist().expect("failed to persist store");

        let mut reloaded = ConnectionStore::load_from_path(&path).expect("failed to reload");
        let names: Vec<&str> = reloaded
            .connections()
            .iter()
            .map(|connection| connection.name.as_str())
            .collect();
        assert_eq!(names, vec!["Cache", "local"]);
        assert_eq!(reloaded.connection("local"), Some(&local));

        let mut updated = local.clone();
        updated.database = "app_test".to_string();
        reloaded.upsert(updated);
        assert!(reloaded.delete("Cache"));
        assert!(!reloaded.delete("Cache"));
        reloaded.persist().expect("failed to persist changes");

        let reloaded = ConnectionStore::load_from_path(path).expect("failed final reload");
        assert_eq!(reloaded.connections().len(), 1);
        assert_eq!(
            reloaded.connection("local").map(|c| c.database.as_str()),
            Some("app_test")
        );
    }

    #[test]
    fn json_uses_type_field_and_omits_empty_values() {
        let rendered = serde_json::to_string(&ConnectionInfo::sqlite("cache", "data.db"))
            .expect("failed to serialize");
        assert_eq!(
            rendered,
            r#"{"name":"cache","type":"sqlite","database":"","path":"data.db"}"#
        );

        let parsed: Vec<ConnectionInfo> = serde_json::from_str(
            r#"[{"name":"a","type":"postgres","host":"db","port":5432,"user":"u","database":"d"},
                {"name":"a","type":"sqlite","path":"dup.db","database":""}]"#,
        )
        .expect("failed to parse");
        assert_eq!(parsed[0].driver, DriverKind::Postgres);
        assert_eq!(parsed[0].port, Some(5432));
    }

    #[test]
    fn duplicate_names_collapse_on_load() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("connections.json");
        fs::write(
            &path,
            r#"[{"name":"a","type":"postgres","host":"one","database":"d"},
                {"name":"a","type":"postgres","host":"two","database":"d"}]"#,
        )
        .expect("failed to write file");

        let store = ConnectionStore::load_from_path(&path).expect("failed to load store");
        assert_eq!(store.connections().len(), 1);
        assert_eq!(store.connections()[0].host, "two");
    }

    #[test]
    fn malformed_file_reports_path() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("connections.json");
        fs::write(&path, "{not json").expect("failed to write file");

        let err = ConnectionStore::load_from_path(&path).expect_err("parse should fail");
        assert!(matches!(err, ConnectionsError::Parse { .. }));
        assert!(err.to_string().contains("connections.json"));
    }

    #[test]
    fn default_connection_only_fills_an_empty_store() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let mut store = ConnectionStore::load_from_path(temp_connections_path(&temp_dir))
            .expect("failed to load store");

        assert!(store.ensure_default());
        assert!(!store.ensure_default());
        let local = &store.connections()[0];
        assert_eq!(local.summary(), "localhost (localhost:5432)");
        assert_eq!(local.sslmode, "disable");
    }

    #[test]
    fn sqlite_label_prefers_database_then_file_name() {
        let mut info = ConnectionInfo::sqlite("cache", "/var/data/app.v2.sqlite");
        assert_eq!(info.sqlite_label(), "app_v2");

        info.database = "main_db".to_string();
        assert_eq!(info.sqlite_label(), "main_db");

        let bare = ConnectionInfo::sqlite("fallback", "");
        assert_eq!(bare.sqlite_label(), "fallback");
    }

    #[test]
    fn working_directory_file_takes_precedence() {
        let work = TempDir::new().expect("failed to create temp directory");
        let config = TempDir::new().expect("failed to create temp directory");

        assert_eq!(
            resolve_connections_path(work.path(), config.path()),
            config.path().join("connections.json")
        );

        fs::write(work.path().join("connections.json"), "[]").expect("failed to write file");
        assert_eq!(
            resolve_connections_path(work.path(), config.path()),
            work.path().join("connections.json")
        );
    }
}
