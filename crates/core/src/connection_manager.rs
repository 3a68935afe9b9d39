//! Session lifecycle for a single active database connection.
//!
//! At most one session is live. Opening a session means connect plus a
//! ping; a handle that fails its first ping is closed again and never
//! becomes active.

use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::connections::ConnectionInfo;

/// Driver-level failure text, already formatted for the status line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BackendError(String);

impl BackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[async_trait]
pub trait ConnectionBackend {
    type Connection: Send;

    async fn connect(&self, info: &ConnectionInfo) -> Result<Self::Connection, BackendError>;
    async fn ping(&self, connection: &mut Self::Connection) -> Result<(), BackendError>;
    async fn disconnect(&self, connection: Self::Connection) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connection_name: Option<String>,
    pub is_connected: bool,
    pub last_latency: Option<Duration>,
    pub last_health_check_at: Option<SystemTime>,
}

impl ConnectionStatus {
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            connection_name: None,
            is_connected: false,
            last_latency: None,
            last_health_check_at: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionManagerError {
    #[error("already connected to `{active}`")]
    AlreadyConnected { active: String },
    #[error("no active connection")]
    NotConnected,
    #[error("{0}")]
    Backend(#[source] BackendError),
}

/// Round-trip time of the latest successful ping and when it finished.
#[derive(Debug, Clone, Copy)]
struct Probe {
    latency: Duration,
    at: SystemTime,
}

impl Probe {
    fn since(started: Instant) -> Self {
        Self {
            latency: started.elapsed(),
            at: SystemTime::now(),
        }
    }
}

#[derive(Debug)]
struct Session<C> {
    info: ConnectionInfo,
    handle: C,
    probe: Probe,
}

#[derive(Debug)]
pub struct ConnectionManager<B: ConnectionBackend> {
    backend: B,
    session: Option<Session<B::Connection>>,
}

impl<B: ConnectionBackend> ConnectionManager<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            session: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        match &self.session {
            Some(session) => ConnectionStatus {
                connection_name: Some(session.info.name.clone()),
                is_connected: true,
                last_latency: Some(session.probe.latency),
                last_health_check_at: Some(session.probe.at),
            },
            None => ConnectionStatus::disconnected(),
        }
    }

    /// Backend handle of the live session.
    #[must_use]
    pub fn active_connection(&self) -> Option<&B::Connection> {
        self.session.as_ref().map(|session| &session.handle)
    }

    /// Opens and pings `info`; the returned latency covers both steps.
    pub async fn connect(
        &mut self,
        info: ConnectionInfo,
    ) -> Result<Duration, ConnectionManagerError> {
        if let Some(session) = &self.session {
            return Err(ConnectionManagerError::AlreadyConnected {
                active: session.info.name.clone(),
            });
        }

        let started = Instant::now();
        let mut handle = self
            .backend
            .connect(&info)
            .await
            .map_err(ConnectionManagerError::Backend)?;
        if let Err(err) = self.backend.ping(&mut handle).await {
            debug!(connection = %info.name, "first ping failed; closing handle");
            if let Err(close_err) = self.backend.disconnect(handle).await {
                warn!(error = %close_err, "closing unpinged handle failed");
            }
            return Err(ConnectionManagerError::Backend(err));
        }

        let probe = Probe::since(started);
        info!(
            connection = %info.name,
            driver = info.driver.label(),
            latency_ms = probe.latency.as_millis(),
            "session opened"
        );
        self.session = Some(Session {
            info,
            handle,
            probe,
        });
        Ok(probe.latency)
    }

    /// Closes whatever is open, then connects to `info`.
    pub async fn switch_to(
        &mut self,
        info: ConnectionInfo,
    ) -> Result<Duration, ConnectionManagerError> {
        if let Err(err) = self.disconnect().await {
            warn!(error = %err, "previous session did not close cleanly");
        }
        self.connect(info).await
    }

    /// Pings the live session and records the round trip.
    pub async fn health_check(&mut self) -> Result<Duration, ConnectionManagerError> {
        let session = self
            .session
            .as_mut()
            .ok_or(ConnectionManagerError::NotConnected)?;

        let started = Instant::now();
        self.backend
            .ping(&mut session.handle)
            .await
            .map_err(ConnectionManagerError::Backend)?;
        session.probe = Probe::since(started);
        Ok(session.probe.latency)
    }

    /// No-op when nothing is open.
    pub async fn disconnect(&mut self) -> Result<(), ConnectionManagerError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        info!(connection = %session.info.name, "session closed");
        self.backend
            .disconnect(session.handle)
            .await
            .map_err(ConnectionManagerError::Backend)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::{
        BackendError, ConnectionBackend, ConnectionManager, ConnectionManagerError,
        ConnectionStatus,
    };
    use crate::connections::ConnectionInfo;

    /// Hands out numbered handles and counts lifecycle calls.
    #[derive(Debug, Default)]
    struct CountingBackend {
        opened: AtomicUsize,
        pings: AtomicUsize,
        closed: AtomicUsize,
        refuse: AtomicBool,
        drop_next_ping: AtomicBool,
    }

    #[async_trait]
    impl ConnectionBackend for CountingBackend {
        type Connection = (String, usize);

        async fn connect(&self, info: &ConnectionInfo) -> Result<Self::Connection, BackendError> {
            if self.refuse.load(Ordering::Relaxed) {
                return Err(BackendError::new(format!("{} refused", info.name)));
            }
            let serial = self.opened.fetch_add(1, Ordering::Relaxed);
            Ok((info.name.clone(), serial))
        }

        async fn ping(&self, _connection: &mut Self::Connection) -> Result<(), BackendError> {
            self.pings.fetch_add(1, Ordering::Relaxed);
            if self.drop_next_ping.swap(false, Ordering::Relaxed) {
                return Err(BackendError::new("timeout"));
            }
            Ok(())
        }

        async fn disconnect(&self, _connection: Self::Connection) -> Result<(), BackendError> {
            self.closed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn warehouse() -> ConnectionInfo {
        ConnectionInfo::postgres("warehouse", "10.0.0.5", 5432, "etl", "dw")
    }

    #[tokio::test]
    async fn open_session_is_reported_in_status() {
        let mut manager = ConnectionManager::new(CountingBackend::default());

        manager
            .connect(warehouse())
            .await
            .expect("connect should succeed");

        let status = manager.status();
        assert!(status.is_connected);
        assert_eq!(status.connection_name.as_deref(), Some("warehouse"));
        assert!(status.last_latency.is_some());
        assert!(status.last_health_check_at.is_some());
        assert_eq!(
            manager.active_connection(),
            Some(&("warehouse".to_string(), 0))
        );
    }

    #[tokio::test]
    async fn second_connect_is_rejected_until_switch() {
        let mut manager = ConnectionManager::new(CountingBackend::default());
        manager
            .connect(warehouse())
            .await
            .expect("connect should succeed");

        let err = manager
            .connect(ConnectionInfo::sqlite("scratch", "/tmp/scratch.db"))
            .await
            .expect_err("a session is already open");
        assert!(
            matches!(err, ConnectionManagerError::AlreadyConnected { ref active } if active == "warehouse")
        );

        manager
            .switch_to(ConnectionInfo::sqlite("scratch", "/tmp/scratch.db"))
            .await
            .expect("switch should succeed");
        assert_eq!(manager.backend.closed.load(Ordering::Relaxed), 1);
        assert_eq!(
            manager.status().connection_name.as_deref(),
            Some("scratch")
        );
    }

    #[tokio::test]
    async fn handle_failing_first_ping_is_closed() {
        let backend = CountingBackend::default();
        backend.drop_next_ping.store(true, Ordering::Relaxed);
        let mut manager = ConnectionManager::new(backend);

        let err = manager
            .connect(warehouse())
            .await
            .expect_err("ping should fail");
        assert_eq!(err.to_string(), "timeout");
        assert!(!manager.status().is_connected);
        assert_eq!(manager.backend.closed.load(Ordering::Relaxed), 1);

        manager.connect(warehouse()).await.expect("retry should succeed");
        assert_eq!(manager.backend.opened.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn refused_connect_leaves_manager_idle() {
        let backend = CountingBackend::default();
        backend.refuse.store(true, Ordering::Relaxed);
        let mut manager = ConnectionManager::new(backend);

        let err = manager
            .connect(warehouse())
            .await
            .expect_err("backend refuses");
        assert_eq!(err.to_string(), "warehouse refused");
        assert_eq!(manager.status(), ConnectionStatus::disconnected());
        assert_eq!(manager.backend.pings.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn health_check_pings_only_a_live_session() {
        let mut manager = ConnectionManager::new(CountingBackend::default());
        assert!(matches!(
            manager.health_check().await,
            Err(ConnectionManagerError::NotConnected)
        ));

        manager
            .connect(warehouse())
            .await
            .expect("connect should succeed");
        manager
            .health_check()
            .await
            .expect("health check should succeed");
        assert_eq!(manager.backend.pings.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn closing_twice_touches_the_backend_once() {
        let mut manager = ConnectionManager::new(CountingBackend::default());
        manager
            .connect(warehouse())
            .await
            .expect("connect should succeed");

        manager.disconnect().await.expect("disconnect should succeed");
        manager
            .disconnect()
            .await
            .expect("second disconnect is a no-op");

        assert_eq!(manager.status(), ConnectionStatus::disconnected());
        assert_eq!(manager.backend.closed.load(Ordering::Relaxed), 1);
    }
}
