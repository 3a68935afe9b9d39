use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tetra_core::connections::{ConnectionInfo, DriverKind};
use tetra_core::loader::{CatalogLoader, ChildLevel, LoaderError, RowIdentity, TableTarget};
use tetra_core::sql::{
    delete_row_sql, insert_row_sql, quote_identifier, table_page_sql, update_cell_sql,
    IdentityStyle, SqlTarget,
};
use tetra_core::tree::{CatalogTree, NodeId, NodeKind, NodeMetadata, NodeSeed};
use tetra_core::value::{Row, RowSet, Value};
use tokio_rusqlite::rusqlite;
use tokio_rusqlite::rusqlite::fallible_iterator::FallibleIterator;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// SQLite files expose exactly one schema.
pub const SQLITE_SCHEMA: &str = "main";

const TABLES_SQL: &str = "SELECT name FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
     ORDER BY name";

/// Catalog loader over a single SQLite file.
///
/// The file shows up as one database node (labelled after the file) holding
/// the `main` schema.
pub struct SqliteLoader {
    info: ConnectionInfo,
    label: String,
    connection: Connection,
}

impl fmt::Debug for SqliteLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteLoader")
            .field("connection", &self.info.name)
            .field("path", &self.info.path)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl SqliteLoader {
    pub async fn open(info: &ConnectionInfo) -> Result<Self, LoaderError> {
        let path = info.path.trim();
        if path.is_empty() {
            return Err(LoaderError::Connection(
                "sqlite connection requires a file path".to_string(),
            ));
        }

        let connection = Connection::open(path)
            .await
            .map_err(|err| LoaderError::Connection(format!("failed to open {path}: {err}")))?;
        let label = info.sqlite_label();
        info!(connection = %info.name, path, label = %label, "sqlite file opened");

        Ok(Self {
            info: info.clone(),
            label,
            connection,
        })
    }

    pub async fn ping(&self) -> Result<(), LoaderError> {
        self.connection
            .call(|conn| conn.query_row("SELECT 1", [], |_| Ok(())))
            .await
            .map_err(|err: tokio_rusqlite::Error| LoaderError::Connection(err.to_string()))
    }

    pub async fn close(self) -> Result<(), LoaderError> {
        self.connection
            .close()
            .await
            .map_err(|err| LoaderError::Connection(err.to_string()))
    }

    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    fn check_database(&self, database: &str) -> Result<(), LoaderError> {
        if database == self.label {
            Ok(())
        } else {
            Err(LoaderError::Query(format!(
                "unknown sqlite database `{database}` (this file is `{}`)",
                self.label
            )))
        }
    }

    fn database_seed(&self) -> NodeSeed {
        let size = std::fs::metadata(&self.info.path)
            .ok()
            .map(|metadata| pretty_size(metadata.len()));
        NodeSeed::new(
            format!("sqlite_db_{}", self.label),
            self.label.clone(),
            NodeKind::Database,
        )
        .with_metadata(NodeMetadata {
            size,
            child_count: Some(1),
            ..NodeMetadata::default()
        })
    }

    async fn tables(&self, database: &str) -> Result<Vec<NodeSeed>, LoaderError> {
        let names = self
            .connection
            .call(|conn| {
                let mut statement = conn.prepare(TABLES_SQL)?;
                let names = statement
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(query_error)?;

        Ok(names
            .into_iter()
            .map(|name| {
                NodeSeed::new(
                    format!("sqlite_table_{database}_{name}"),
                    name,
                    NodeKind::Table,
                )
            })
            .collect())
    }

    async fn columns(&self, database: &str, table: &str) -> Result<Vec<NodeSeed>, LoaderError> {
        let pragma = format!("PRAGMA table_info({})", quote_identifier(table));
        let columns = self
            .connection
            .call(move |conn| {
                let mut statement = conn.prepare(&pragma)?;
                let columns = statement
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, i64>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(columns)
            })
            .await
            .map_err(query_error)?;

        Ok(columns
            .into_iter()
            .map(|(name, data_type, not_null, default_value, pk)| {
                NodeSeed::new(
                    format!("sqlite_col_{database}_{table}_{name}"),
                    name,
                    NodeKind::Column,
                )
                .with_metadata(NodeMetadata {
                    data_type: Some(data_type),
                    nullable: Some(not_null == 0),
                    default_value,
                    primary_key: pk > 0,
                    ..NodeMetadata::default()
                })
            })
            .collect())
    }

    async fn fetch(&self, sql: String) -> Result<RowSet, LoaderError> {
        self.connection
            .call(move |conn| Ok(read_rows(conn, &sql)?))
            .await
            .map_err(query_error)
    }

    async fn execute_statement(
        &self,
        sql: String,
        identity: Option<&RowIdentity>,
    ) -> Result<(), LoaderError> {
        debug!(sql = %sql, "executing statement");
        let affected = self
            .connection
            .call(move |conn| Ok(conn.execute(&sql, [])?))
            .await
            .map_err(query_error)?;
        if affected == 0 {
            if let Some(identity) = identity {
                return Err(LoaderError::Query(format!(
                    "row {identity} no longer exists; reload the table"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogLoader for SqliteLoader {
    async fn load_tree(&self, server_label: &str) -> Result<CatalogTree, LoaderError> {
        let mut tree = CatalogTree::new(DriverKind::Sqlite.root_label(), server_label);
        let server = tree.server();
        tree.attach_children(server, vec![self.database_seed()]);
        tree.expand(server);
        Ok(tree)
    }

    async fn load_children(&self, tree: &mut CatalogTree, node: NodeId) -> Result<(), LoaderError> {
        let Some(level) = ChildLevel::for_node(tree.node(node)) else {
            return Ok(());
        };
        self.check_database(level.database())?;

        let seeds = match &level {
            ChildLevel::Schemas { database } => vec![NodeSeed::new(
                format!("sqlite_schema_{database}_{SQLITE_SCHEMA}"),
                SQLITE_SCHEMA,
                NodeKind::Schema,
            )],
            ChildLevel::Tables { database, .. } => self.tables(database).await?,
            ChildLevel::Columns {
                database, table, ..
            } => self.columns(database, table).await?,
        };
        debug!(
            path = %tree.node(node).path,
            kind = level.child_kind().label(),
            count = seeds.len(),
            "children loaded"
        );
        tree.attach_children(node, seeds);
        Ok(())
    }

    async fn get_table_data(
        &self,
        target: &TableTarget,
        limit: usize,
        offset: usize,
    ) -> Result<RowSet, LoaderError> {
        self.check_database(&target.database)?;
        let sql_target = SqlTarget::new(None, &target.table)?;
        self.fetch(table_page_sql(
            &sql_target,
            IdentityStyle::Rowid,
            limit,
            offset,
        ))
        .await
    }

    async fn update_cell(
        &self,
        target: &TableTarget,
        column: &str,
        identity: &RowIdentity,
        value: &Value,
    ) -> Result<(), LoaderError> {
        self.check_database(&target.database)?;
        let sql_target = SqlTarget::new(None, &target.table)?;
        let sql = update_cell_sql(&sql_target, IdentityStyle::Rowid, column, identity, value)?;
        self.execute_statement(sql, Some(identity)).await
    }

    async fn insert_row(
        &self,
        target: &TableTarget,
        values: &BTreeMap<String, Value>,
    ) -> Result<(), LoaderError> {
        self.check_database(&target.database)?;
        let sql_target = SqlTarget::new(None, &target.table)?;
        let sql = insert_row_sql(&sql_target, values)?;
        self.execute_statement(sql, None).await
    }

    async fn delete_row(
        &self,
        target: &TableTarget,
        identity: &RowIdentity,
    ) -> Result<(), LoaderError> {
        self.check_database(&target.database)?;
        let sql_target = SqlTarget::new(None, &target.table)?;
        let sql = delete_row_sql(&sql_target, IdentityStyle::Rowid, identity)?;
        self.execute_statement(sql, Some(identity)).await
    }

    async fn execute_query(&self, sql: &str) -> Result<RowSet, LoaderError> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Ok(RowSet::new());
        }
        self.fetch(sql.to_string()).await
    }
}

/// Runs every statement of `sql` in order, preparing each one only after
/// the previous has executed. Rows of the last statement that has columns
/// are returned; DDL and DML contribute none.
fn read_rows(conn: &rusqlite::Connection, sql: &str) -> rusqlite::Result<RowSet> {
    let mut batch = rusqlite::Batch::new(conn, sql);
    let mut records = RowSet::new();
    while let Some(mut statement) = batch.next()? {
        if statement.column_count() == 0 {
            statement.execute([])?;
        } else {
            records = collect_rows(&mut statement)?;
        }
    }
    Ok(records)
}

fn collect_rows(statement: &mut rusqlite::Statement<'_>) -> rusqlite::Result<RowSet> {
    let names: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut rows = statement.query([])?;
    let mut records = RowSet::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (index, name) in names.iter().enumerate() {
            record.push(name.clone(), value_from_ref(row.get_ref(index)?));
        }
        records.push(record);
    }
    Ok(records)
}

fn value_from_ref(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;

    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Int(value),
        ValueRef::Real(value) if value.is_finite() => Value::Float(value),
        ValueRef::Real(value) => Value::Text(value.to_string()),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(format!("<blob {} bytes>", bytes.len())),
    }
}

#[allow(clippy::cast_precision_loss)]
fn pretty_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["kB", "MB", "GB", "TB"];
    if bytes < 10 * 1024 {
        return format!("{bytes} bytes");
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 10.0 * 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.0} {}", UNITS[unit])
}

#[allow(clippy::needless_pass_by_value)]
fn query_error(err: tokio_rusqlite::Error) -> LoaderError {
    match err {
        tokio_rusqlite::Error::ConnectionClosed => {
            LoaderError::Connection("sqlite connection is closed".to_string())
        }
        other => LoaderError::Query(other.to_string()),
    }
}

/// Whether `path` looks like something `SqliteLoader::open` can use.
#[must_use]
pub fn is_sqlite_path(path: &str) -> bool {
    let trimmed = path.trim();
    !trimmed.is_empty() && !Path::new(trimmed).is_dir()
}

#[cfg(test)]
mod tests {
    use tetra_core::value::Value;
    use tokio_rusqlite::rusqlite::types::ValueRef;

    use super::{is_sqlite_path, pretty_size, value_from_ref};

    #[test]
    fn maps_sqlite_values() {
        assert_eq!(value_from_ref(ValueRef::Null), Value::Null);
        assert_eq!(value_from_ref(ValueRef::Integer(7)), Value::Int(7));
        assert_eq!(value_from_ref(ValueRef::Real(0.5)), Value::Float(0.5));
        assert_eq!(
            value_from_ref(ValueRef::Text(b"hi")),
            Value::Text("hi".to_string())
        );
        assert_eq!(
            value_from_ref(ValueRef::Blob(&[1, 2, 3])),
            Value::Text("<blob 3 bytes>".to_string())
        );
    }

    #[test]
    fn formats_file_sizes() {
        assert_eq!(pretty_size(512), "512 bytes");
        assert_eq!(pretty_size(64 * 1024), "64 kB");
        assert_eq!(pretty_size(20 * 1024 * 1024), "20 MB");
    }

    #[test]
    fn directories_are_not_sqlite_paths() {
        let temp_dir = tempfile::TempDir::new().expect("failed to create temp directory");
        assert!(!is_sqlite_path(""));
        assert!(!is_sqlite_path(&temp_dir.path().to_string_lossy()));
        assert!(is_sqlite_path(
            &temp_dir.path().join("app.db").to_string_lossy()
        ));
    }
}
