//! Database drivers behind the core loader and connection traits.

pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use tetra_core::connection_manager::{BackendError, ConnectionBackend};
use tetra_core::connections::{ConnectionInfo, DriverKind};
use tetra_core::loader::{LoaderError, SharedLoader};
use tracing::debug;

use crate::postgres::PostgresLoader;
use crate::sqlite::SqliteLoader;

/// A live session for either driver.
#[derive(Debug, Clone)]
pub enum DriverConnection {
    Postgres(Arc<PostgresLoader>),
    Sqlite(Arc<SqliteLoader>),
}

impl DriverConnection {
    pub async fn open(info: &ConnectionInfo) -> Result<Self, LoaderError> {
        match info.driver {
            DriverKind::Postgres => Ok(Self::Postgres(Arc::new(
                PostgresLoader::connect(info).await?,
            ))),
            DriverKind::Sqlite => Ok(Self::Sqlite(Arc::new(SqliteLoader::open(info).await?))),
        }
    }

    #[must_use]
    pub fn driver(&self) -> DriverKind {
        match self {
            Self::Postgres(_) => DriverKind::Postgres,
            Self::Sqlite(_) => DriverKind::Sqlite,
        }
    }

    /// Shared handle handed to background loads.
    #[must_use]
    pub fn loader(&self) -> SharedLoader {
        match self {
            Self::Postgres(loader) => Arc::clone(loader) as SharedLoader,
            Self::Sqlite(loader) => Arc::clone(loader) as SharedLoader,
        }
    }

    pub async fn ping(&self) -> Result<(), LoaderError> {
        match self {
            Self::Postgres(loader) => loader.ping().await,
            Self::Sqlite(loader) => loader.ping().await,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DriverBackend;

#[async_trait]
impl ConnectionBackend for DriverBackend {
    type Connection = DriverConnection;

    async fn connect(&self, info: &ConnectionInfo) -> Result<Self::Connection, BackendError> {
        DriverConnection::open(info).await.map_err(to_backend_error)
    }

    async fn ping(&self, connection: &mut Self::Connection) -> Result<(), BackendError> {
        connection.ping().await.map_err(to_backend_error)
    }

    async fn disconnect(&self, connection: Self::Connection) -> Result<(), BackendError> {
        match connection {
            // Postgres clients close when the last handle drops.
            DriverConnection::Postgres(_) => Ok(()),
            DriverConnection::Sqlite(loader) => match Arc::try_unwrap(loader) {
                Ok(loader) => loader.close().await.map_err(to_backend_error),
                Err(_) => {
                    debug!("sqlite handle still shared; closing on last drop");
                    Ok(())
                }
            },
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn to_backend_error(error: LoaderError) -> BackendError {
    BackendError::new(error.to_string())
}

#[cfg(test)]
mod tests {
    use tetra_core::connection_manager::ConnectionBackend;
    use tetra_core::connections::{ConnectionInfo, DriverKind};
    use tempfile::TempDir;

    use super::{DriverBackend, DriverConnection};

    #[tokio::test]
    async fn backend_opens_pings_and_closes_sqlite() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("app.db");
        let info = ConnectionInfo::sqlite("local", path.to_string_lossy());

        let backend = DriverBackend;
        let mut connection = backend.connect(&info).await.expect("open should succeed");
        assert_eq!(connection.driver(), DriverKind::Sqlite);
        backend
            .ping(&mut connection)
            .await
            .expect("ping should succeed");
        backend
            .disconnect(connection)
            .await
            .expect("close should succeed");
    }

    #[tokio::test]
    async fn missing_sqlite_path_is_a_backend_error() {
        let err = DriverConnection::open(&ConnectionInfo::sqlite("broken", " "))
            .await
            .expect_err("empty path should fail");
        assert!(err.to_string().contains("requires a file path"));

        let err = DriverBackend
            .connect(&ConnectionInfo::sqlite("broken", ""))
            .await
            .expect_err("empty path should fail");
        assert!(err.to_string().contains("requires a file path"));
    }
}
