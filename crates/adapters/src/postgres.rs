use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tetra_core::connections::{ConnectionInfo, DriverKind};
use tetra_core::loader::{CatalogLoader, ChildLevel, LoaderError, RowIdentity, TableTarget};
use tetra_core::sql::{
    delete_row_sql, insert_row_sql, table_page_sql, update_cell_sql, IdentityStyle, SqlTarget,
};
use tetra_core::tree::{CatalogTree, NodeId, NodeKind, NodeMetadata, NodeSeed};
use tetra_core::value::{Row, RowSet, Value};
use tokio::sync::Mutex;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, info, warn};

const DEFAULT_PORT: u16 = 5432;
const FALLBACK_DATABASE: &str = "postgres";

const DATABASES_SQL: &str = "SELECT datname::text, \
     pg_size_pretty(pg_database_size(oid))::text, \
     pg_stat_get_db_tuples_returned(oid)::bigint \
     FROM pg_database \
     WHERE datistemplate = false \
     ORDER BY datname";

const SCHEMAS_SQL: &str = "SELECT s.schema_name::text, COALESCE(t.table_count, 0)::bigint \
     FROM information_schema.schemata s \
     LEFT JOIN ( \
         SELECT table_schema, COUNT(*) AS table_count \
         FROM information_schema.tables \
         WHERE table_type = 'BASE TABLE' \
         GROUP BY table_schema \
     ) t ON t.table_schema = s.schema_name \
     WHERE s.schema_name NOT IN ('pg_catalog', 'information_schema') \
       AND s.schema_name NOT LIKE 'pg_toast%' \
       AND s.schema_name NOT LIKE 'pg_temp%' \
     ORDER BY s.schema_name";

const TABLES_SQL: &str = "SELECT c.relname::text, \
     pg_size_pretty(pg_total_relation_size(c.oid))::text, \
     pg_stat_get_tuples_returned(c.oid)::bigint \
     FROM pg_class c \
     JOIN pg_namespace n ON n.oid = c.relnamespace \
     WHERE n.nspname = $1::text AND c.relkind IN ('r', 'p') \
     ORDER BY c.relname";

const COLUMNS_SQL: &str = "SELECT c.column_name::text, c.data_type::text, c.is_nullable::text, \
     c.column_default::text, \
     EXISTS ( \
         SELECT 1 \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON kcu.constraint_name = tc.constraint_name \
          AND kcu.table_schema = tc.table_schema \
          AND kcu.table_name = tc.table_name \
         WHERE tc.constraint_type = 'PRIMARY KEY' \
           AND tc.table_schema = $1::text \
           AND tc.table_name = $2::text \
           AND kcu.column_name = c.column_name \
     ) AS is_primary_key \
     FROM information_schema.columns c \
     WHERE c.table_schema = $1::text AND c.table_name = $2::text \
     ORDER BY c.ordinal_position";

/// Catalog loader backed by a PostgreSQL server.
///
/// PostgreSQL sessions are bound to one database, so schema and table lookups
/// for any other database go through a lazily opened secondary client that is
/// kept for the life of the loader.
pub struct PostgresLoader {
    info: ConnectionInfo,
    primary: Arc<Client>,
    by_database: Mutex<HashMap<String, Arc<Client>>>,
}

impl fmt::Debug for PostgresLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresLoader")
            .field("connection", &self.info.name)
            .field("database", &self.primary_database())
            .finish_non_exhaustive()
    }
}

impl PostgresLoader {
    pub async fn connect(info: &ConnectionInfo) -> Result<Self, LoaderError> {
        if info.host.trim().is_empty() {
            return Err(LoaderError::Connection(
                "postgres connection requires a host".to_string(),
            ));
        }
        if info.user.trim().is_empty() {
            return Err(LoaderError::Connection(
                "postgres connection requires a user".to_string(),
            ));
        }

        let database = database_or_default(&info.database);
        let client = open_client(info, database).await?;
        info!(
            connection = %info.name,
            host = %info.host,
            database,
            "postgres session opened"
        );

        Ok(Self {
            info: info.clone(),
            primary: Arc::new(client),
            by_database: Mutex::new(HashMap::new()),
        })
    }

    pub async fn ping(&self) -> Result<(), LoaderError> {
        self.primary
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(connection_error)
    }

    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn primary_database(&self) -> &str {
        database_or_default(&self.info.database)
    }

    async fn client_for(&self, database: &str) -> Result<Arc<Client>, LoaderError> {
        if database.is_empty() || database == self.primary_database() {
            return Ok(Arc::clone(&self.primary));
        }

        let mut cache = self.by_database.lock().await;
        if let Some(client) = cache.get(database) {
            if !client.is_closed() {
                return Ok(Arc::clone(client));
            }
            debug!(database, "dropping closed secondary client");
            cache.remove(database);
        }

        let client = Arc::new(open_client(&self.info, database).await?);
        debug!(database, "secondary client opened");
        cache.insert(database.to_string(), Arc::clone(&client));
        Ok(client)
    }

    async fn databases(&self) -> Result<Vec<NodeSeed>, LoaderError> {
        let rows = self
            .primary
            .query(DATABASES_SQL, &[])
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get(0).map_err(query_error)?;
                let size: Option<String> = row.try_get(1).map_err(query_error)?;
                let returned: Option<i64> = row.try_get(2).map_err(query_error)?;
                Ok(
                    NodeSeed::new(format!("db_{name}"), name, NodeKind::Database).with_metadata(
                        NodeMetadata {
                            size,
                            row_estimate: returned,
                            ..NodeMetadata::default()
                        },
                    ),
                )
            })
            .collect()
    }

    async fn schemas(&self, database: &str) -> Result<Vec<NodeSeed>, LoaderError> {
        let client = self.client_for(database).await?;
        let rows = client.query(SCHEMAS_SQL, &[]).await.map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get(0).map_err(query_error)?;
                let tables: i64 = row.try_get(1).map_err(query_error)?;
                Ok(NodeSeed::new(
                    format!("schema_{database}_{name}"),
                    name,
                    NodeKind::Schema,
                )
                .with_metadata(NodeMetadata {
                    child_count: usize::try_from(tables).ok(),
                    ..NodeMetadata::default()
                }))
            })
            .collect()
    }

    async fn tables(&self, database: &str, schema: &str) -> Result<Vec<NodeSeed>, LoaderError> {
        let client = self.client_for(database).await?;
        let rows = client
            .query(TABLES_SQL, &[&schema])
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get(0).map_err(query_error)?;
                let size: Option<String> = row.try_get(1).map_err(query_error)?;
                let returned: Option<i64> = row.try_get(2).map_err(query_error)?;
                Ok(NodeSeed::new(
                    format!("table_{database}_{schema}_{name}"),
                    name,
                    NodeKind::Table,
                )
                .with_metadata(NodeMetadata {
                    size,
                    row_estimate: returned,
                    ..NodeMetadata::default()
                }))
            })
            .collect()
    }

    async fn columns(
        &self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<NodeSeed>, LoaderError> {
        let client = self.client_for(database).await?;
        let rows = client
            .query(COLUMNS_SQL, &[&schema, &table])
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get(0).map_err(query_error)?;
                let data_type: String = row.try_get(1).map_err(query_error)?;
                let nullable: String = row.try_get(2).map_err(query_error)?;
                let default_value: Option<String> = row.try_get(3).map_err(query_error)?;
                let primary_key: bool = row.try_get(4).map_err(query_error)?;
                Ok(NodeSeed::new(
                    format!("col_{database}_{schema}_{table}_{name}"),
                    name,
                    NodeKind::Column,
                )
                .with_metadata(NodeMetadata {
                    data_type: Some(data_type),
                    nullable: Some(nullable.eq_ignore_ascii_case("YES")),
                    default_value,
                    primary_key,
                    ..NodeMetadata::default()
                }))
            })
            .collect()
    }

    async fn execute_statement(
        &self,
        database: &str,
        sql: &str,
        identity: Option<&RowIdentity>,
    ) -> Result<(), LoaderError> {
        let client = self.client_for(database).await?;
        debug!(database, sql, "executing statement");
        let affected = client.execute(sql, &[]).await.map_err(query_error)?;
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
impl CatalogLoader for PostgresLoader {
    async fn load_tree(&self, server_label: &str) -> Result<CatalogTree, LoaderError> {
        let databases = self.databases().await?;
        let mut tree = CatalogTree::new(DriverKind::Postgres.root_label(), server_label);
        let server = tree.server();
        let count = tree.attach_children(server, databases).len();
        tree.expand(server);
        debug!(server = server_label, databases = count, "catalog tree loaded");
        Ok(tree)
    }

    async fn load_children(&self, tree: &mut CatalogTree, node: NodeId) -> Result<(), LoaderError> {
        let Some(level) = ChildLevel::for_node(tree.node(node)) else {
            return Ok(());
        };

        let seeds = match &level {
            ChildLevel::Schemas { database } => self.schemas(database).await?,
            ChildLevel::Tables { database, schema } => self.tables(database, schema).await?,
            ChildLevel::Columns {
                database,
                schema,
                table,
            } => self.columns(database, schema, table).await?,
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
        let client = self.client_for(&target.database).await?;
        let sql_target = SqlTarget::new(Some(&target.schema), &target.table)?;
        let sql = table_page_sql(&sql_target, IdentityStyle::Ctid, limit, offset);
        fetch_rows(&client, &sql).await
    }

    async fn update_cell(
        &self,
        target: &TableTarget,
        column: &str,
        identity: &RowIdentity,
        value: &Value,
    ) -> Result<(), LoaderError> {
        let sql_target = SqlTarget::new(Some(&target.schema), &target.table)?;
        let sql = update_cell_sql(&sql_target, IdentityStyle::Ctid, column, identity, value)?;
        self.execute_statement(&target.database, &sql, Some(identity))
            .await
    }

    async fn insert_row(
        &self,
        target: &TableTarget,
        values: &BTreeMap<String, Value>,
    ) -> Result<(), LoaderError> {
        let sql_target = SqlTarget::new(Some(&target.schema), &target.table)?;
        let sql = insert_row_sql(&sql_target, values)?;
        self.execute_statement(&target.database, &sql, None).await
    }

    async fn delete_row(
        &self,
        target: &TableTarget,
        identity: &RowIdentity,
    ) -> Result<(), LoaderError> {
        let sql_target = SqlTarget::new(Some(&target.schema), &target.table)?;
        let sql = delete_row_sql(&sql_target, IdentityStyle::Ctid, identity)?;
        self.execute_statement(&target.database, &sql, Some(identity))
            .await
    }

    async fn execute_query(&self, sql: &str) -> Result<RowSet, LoaderError> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Ok(RowSet::new());
        }
        fetch_rows(&self.primary, sql).await
    }
}

async fn open_client(info: &ConnectionInfo, database: &str) -> Result<Client, LoaderError> {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&info.host)
        .port(info.port.unwrap_or(DEFAULT_PORT))
        .user(&info.user)
        .dbname(database)
        .application_name("tetra")
        .ssl_mode(ssl_mode(&info.sslmode));
    if let Some(password) = info.effective_password() {
        config.password(password);
    }

    let (client, connection) = config.connect(NoTls).await.map_err(connection_error)?;
    let database = database.to_string();
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            warn!(database = %database, error = %err, "postgres connection closed with error");
        }
    });

    Ok(client)
}

/// Runs `sql` through the simple protocol and decodes each text cell using
/// the column types reported by a prepare of the same statement. Statements
/// that cannot be prepared (several statements in one string) fall back to
/// plain text cells.
async fn fetch_rows(client: &Client, sql: &str) -> Result<RowSet, LoaderError> {
    let types: Vec<Type> = match client.prepare(sql).await {
        Ok(statement) => statement
            .columns()
            .iter()
            .map(|column| column.type_().clone())
            .collect(),
        Err(err) => {
            debug!(error = %err, "prepare failed; decoding result as text");
            Vec::new()
        }
    };

    let messages = client.simple_query(sql).await.map_err(query_error)?;
    let mut rows = RowSet::new();
    for message in messages {
        if let SimpleQueryMessage::Row(simple_row) = message {
            let mut row = Row::new();
            for (index, column) in simple_row.columns().iter().enumerate() {
                let value = simple_row
                    .get(index)
                    .map_or(Value::Null, |text| decode_text(types.get(index), text));
                row.push(column.name(), value);
            }
            rows.push(row);
        }
    }

    Ok(rows)
}

fn decode_text(column_type: Option<&Type>, text: &str) -> Value {
    let Some(column_type) = column_type else {
        return Value::Text(text.to_string());
    };

    let decoded = match *column_type {
        Type::BOOL => match text {
            "t" | "true" => Some(Value::Bool(true)),
            "f" | "false" => Some(Value::Bool(false)),
            _ => None,
        },
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => text.parse().ok().map(Value::Int),
        Type::FLOAT4 | Type::FLOAT8 => text
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(Value::Float),
        Type::TIMESTAMP => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|naive| Value::Timestamp(naive.and_utc())),
        Type::TIMESTAMPTZ => DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
            .ok()
            .map(|stamp| Value::Timestamp(stamp.with_timezone(&Utc))),
        _ => None,
    };

    decoded.unwrap_or_else(|| Value::Text(text.to_string()))
}

fn database_or_default(database: &str) -> &str {
    let trimmed = database.trim();
    if trimmed.is_empty() {
        FALLBACK_DATABASE
    } else {
        trimmed
    }
}

/// TLS is not negotiated, so modes that insist on it degrade to `Prefer`
/// and fail at connect time when the server requires encryption.
fn ssl_mode(mode: &str) -> SslMode {
    match mode.trim().to_ascii_lowercase().as_str() {
        "" | "disable" => SslMode::Disable,
        _ => SslMode::Prefer,
    }
}

fn format_pg_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut message = format!("{}: {}", db_error.severity(), db_error.message());
    let mut extras = Vec::new();
    if let Some(detail) = db_error.detail().filter(|detail| !detail.trim().is_empty()) {
        extras.push(format!("detail: {detail}"));
    }
    if let Some(hint) = db_error.hint().filter(|hint| !hint.trim().is_empty()) {
        extras.push(format!("hint: {hint}"));
    }
    if !extras.is_empty() {
        message.push_str(" (");
        message.push_str(&extras.join(", "));
        message.push(')');
    }
    message
}

#[allow(clippy::needless_pass_by_value)]
fn connection_error(error: tokio_postgres::Error) -> LoaderError {
    LoaderError::Connection(format_pg_error(&error))
}

#[allow(clippy::needless_pass_by_value)]
fn query_error(error: tokio_postgres::Error) -> LoaderError {
    if error.is_closed() {
        return LoaderError::Connection(format_pg_error(&error));
    }
    LoaderError::Query(format_pg_error(&error))
}
