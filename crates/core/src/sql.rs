use std::collections::BTreeMap;

use chrono::SecondsFormat;
use thiserror::Error;

use crate::loader::{LoaderError, RowIdentity};
use crate::value::Value;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SqlGenerationError {
    #[error("schema name cannot be empty")]
    EmptySchemaName,
    #[error("table name cannot be empty")]
    EmptyTableName,
    #[error("column name cannot be empty")]
    EmptyColumnName,
    #[error("insert requires at least one column")]
    NoValues,
    #[error("row identity `{0}` is not valid for this backend")]
    InvalidRowIdentity(String),
}

impl From<SqlGenerationError> for LoaderError {
    fn from(err: SqlGenerationError) -> Self {
        match err {
            SqlGenerationError::NoValues => Self::EmptyInsert,
            other => Self::Query(other.to_string()),
        }
    }
}

/// How a backend addresses a physical row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStyle {
    /// PostgreSQL tuple id, compared as `tid`.
    Ctid,
    /// SQLite integer rowid.
    Rowid,
}

impl IdentityStyle {
    #[must_use]
    pub fn alias(self) -> &'static str {
        match self {
            Self::Ctid => "__ctid",
            Self::Rowid => "__rowid",
        }
    }

    fn select_expr(self) -> &'static str {
        match self {
            Self::Ctid => "ctid::text",
            Self::Rowid => "rowid",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Ctid => "ctid",
            Self::Rowid => "rowid",
        }
    }

    fn predicate(self, identity: &RowIdentity) -> Result<String, SqlGenerationError> {
        match self {
            Self::Ctid => Ok(format!(
                "ctid = {}::tid",
                quote_sql_string(identity.as_str())
            )),
            Self::Rowid => {
                let rowid = identity
                    .as_str()
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| SqlGenerationError::InvalidRowIdentity(identity.to_string()))?;
                Ok(format!("rowid = {rowid}"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTarget<'a> {
    pub schema: Option<&'a str>,
    pub table: &'a str,
}

impl<'a> SqlTarget<'a> {
    pub fn new(schema: Option<&'a str>, table: &'a str) -> Result<Self, SqlGenerationError> {
        if table.trim().is_empty() {
            return Err(SqlGenerationError::EmptyTableName);
        }
        if let Some(schema_name) = schema {
            if schema_name.trim().is_empty() {
                return Err(SqlGenerationError::EmptySchemaName);
            }
        }
        Ok(Self { schema, table })
    }
}

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[must_use]
pub fn quote_sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Renders a typed value as an SQL literal understood by both backends.
#[must_use]
pub fn value_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Text(text) => quote_sql_string(text),
        // RFC 3339 in UTC keeps the offset and sub-second digits.
        Value::Timestamp(stamp) => {
            quote_sql_string(&stamp.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
    }
}

fn qualified_table_sql(target: &SqlTarget<'_>) -> String {
    match target.schema {
        Some(schema) => format!(
            "{}.{}",
            quote_identifier(schema),
            quote_identifier(target.table)
        ),
        None => quote_identifier(target.table),
    }
}

fn require_column(column: &str) -> Result<(), SqlGenerationError> {
    if column.trim().is_empty() {
        return Err(SqlGenerationError::EmptyColumnName);
    }
    Ok(())
}

/// One window of table rows, ordered by physical row identity and carrying
/// the identity as a hidden leading column.
#[must_use]
pub fn table_page_sql(
    target: &SqlTarget<'_>,
    identity: IdentityStyle,
    limit: usize,
    offset: usize,
) -> String {
    format!(
        "SELECT {} AS {}, * FROM {} ORDER BY {} LIMIT {} OFFSET {}",
        identity.select_expr(),
        quote_identifier(identity.alias()),
        qualified_table_sql(target),
        identity.column(),
        limit,
        offset
    )
}

pub fn update_cell_sql(
    target: &SqlTarget<'_>,
    identity_style: IdentityStyle,
    column: &str,
    identity: &RowIdentity,
    value: &Value,
) -> Result<String, SqlGenerationError> {
    require_column(column)?;
    Ok(format!(
        "UPDATE {} SET {} = {} WHERE {}",
        qualified_table_sql(target),
        quote_identifier(column),
        value_literal(value),
        identity_style.predicate(identity)?
    ))
}

/// Columns are emitted in key order.
pub fn insert_row_sql(
    target: &SqlTarget<'_>,
    values: &BTreeMap<String, Value>,
) -> Result<String, SqlGenerationError> {
    if values.is_empty() {
        return Err(SqlGenerationError::NoValues);
    }
    let mut columns = Vec::with_capacity(values.len());
    let mut literals = Vec::with_capacity(values.len());
    for (column, value) in values {
        require_column(column)?;
        columns.push(quote_identifier(column));
        literals.push(value_literal(value));
    }

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified_table_sql(target),
        columns.join(", "),
        literals.join(", ")
    ))
}

pub fn delete_row_sql(
    target: &SqlTarget<'_>,
    identity_style: IdentityStyle,
    identity: &RowIdentity,
) -> Result<String, SqlGenerationError> {
    Ok(format!(
        "DELETE FROM {} WHERE {}",
        qualified_table_sql(target),
        identity_style.predicate(identity)?
    ))
}
