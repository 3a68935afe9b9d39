//! Background runtime that owns the database session.
//!
//! The event loop stays synchronous: work is spawned onto a small tokio
//! runtime and the results come back through an unbounded channel that the
//! loop drains once per iteration. Children loads are the one exception and
//! block the caller through [`BlockingChildren`].

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tetra_adapters::DriverBackend;
use tetra_core::connection_manager::{ConnectionManager, ConnectionStatus};
use tetra_core::connections::ConnectionInfo;
use tetra_core::dispatch::{run_request, LoadReply, LoadRequest, Ticket};
use tetra_core::loader::{LoaderError, SharedLoader};
use tetra_core::navigator::ChildrenLoader;
use tetra_core::tree::{CatalogTree, NodeId};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

pub enum WorkerEvent {
    Connected {
        ticket: Ticket,
        info: ConnectionInfo,
        latency: Duration,
        loader: SharedLoader,
    },
    ConnectFailed {
        ticket: Ticket,
        message: String,
    },
    Loaded {
        ticket: Ticket,
        result: Result<LoadReply, LoaderError>,
    },
    /// Outcome of a session ping plus the manager's status afterwards.
    Health {
        ticket: Ticket,
        status: ConnectionStatus,
        outcome: Result<Duration, String>,
    },
}

pub struct Worker {
    runtime: Runtime,
    manager: Arc<Mutex<ConnectionManager<DriverBackend>>>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl Worker {
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tetra-worker")
            .enable_all()
            .build()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            runtime,
            manager: Arc::new(Mutex::new(ConnectionManager::new(DriverBackend))),
            events_tx,
            events_rx,
        })
    }

    /// Replaces the active session with one opened from `info`.
    pub fn connect(&self, ticket: Ticket, info: ConnectionInfo) {
        let manager = Arc::clone(&self.manager);
        let events = self.events_tx.clone();
        self.runtime.spawn(async move {
            let mut manager = manager.lock().await;
            let event = match manager.switch_to(info.clone()).await {
                Ok(latency) => match manager.active_connection() {
                    Some(connection) => WorkerEvent::Connected {
                        ticket,
                        info,
                        latency,
                        loader: connection.loader(),
                    },
                    None => WorkerEvent::ConnectFailed {
                        ticket,
                        message: "session closed before it could be used".to_string(),
                    },
                },
                Err(err) => {
                    warn!(connection = %info.name, error = %err, "connect failed");
                    WorkerEvent::ConnectFailed {
                        ticket,
                        message: err.to_string(),
                    }
                }
            };
            drop(manager);
            if events.send(event).is_err() {
                debug!("event loop gone; connect result dropped");
            }
        });
    }

    pub fn submit(&self, ticket: Ticket, loader: SharedLoader, request: LoadRequest) {
        let events = self.events_tx.clone();
        self.runtime.spawn(async move {
            let result = run_request(loader.as_ref(), request).await;
            if let Err(err) = &result {
                debug!(error = %err, "request failed");
            }
            if events.send(WorkerEvent::Loaded { ticket, result }).is_err() {
                debug!("event loop gone; load result dropped");
            }
        });
    }

    /// Pings the active session without blocking the event loop.
    pub fn health_check(&self, ticket: Ticket) {
        let manager = Arc::clone(&self.manager);
        let events = self.events_tx.clone();
        self.runtime.spawn(async move {
            let mut manager = manager.lock().await;
            let outcome = manager.health_check().await.map_err(|err| err.to_string());
            let status = manager.status();
            drop(manager);
            if let Err(message) = &outcome {
                warn!(error = %message, "health check failed");
            }
            let event = WorkerEvent::Health {
                ticket,
                status,
                outcome,
            };
            if events.send(event).is_err() {
                debug!("event loop gone; health result dropped");
            }
        });
    }

    pub fn try_next(&mut self) -> Option<WorkerEvent> {
        self.events_rx.try_recv().ok()
    }

    #[must_use]
    pub fn children(&self, loader: Option<SharedLoader>) -> BlockingChildren<'_> {
        BlockingChildren {
            runtime: &self.runtime,
            loader,
        }
    }

    /// Closes the session and stops the runtime.
    pub fn shutdown(self) {
        let manager = Arc::clone(&self.manager);
        self.runtime.block_on(async move {
            if let Err(err) = manager.lock().await.disconnect().await {
                warn!(error = %err, "disconnect on shutdown failed");
            }
        });
        self.runtime.shutdown_timeout(SHUTDOWN_GRACE);
    }
}

/// Runs a children load to completion on the worker runtime.
pub struct BlockingChildren<'a> {
    runtime: &'a Runtime,
    loader: Option<SharedLoader>,
}

impl ChildrenLoader for BlockingChildren<'_> {
    fn load_children(&self, tree: &mut CatalogTree, node: NodeId) -> Result<(), LoaderError> {
        let Some(loader) = &self.loader else {
            return Err(LoaderError::Connection("not connected".to_string()));
        };
        self.runtime.block_on(loader.load_children(tree, node))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use tempfile::TempDir;
    use tetra_core::connections::ConnectionInfo;
    use tetra_core::dispatch::{LoadReply, LoadRequest, RequestSlot, RequestTracker};
    use tetra_core::navigator::ChildrenLoader;

    use super::{Worker, WorkerEvent};

    fn wait_for_event(worker: &mut Worker) -> WorkerEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(event) = worker.try_next() {
                return event;
            }
            assert!(Instant::now() < deadline, "timed out waiting for worker");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn connects_loads_tree_and_children_against_sqlite() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("shop.db");
        let mut worker = Worker::new().expect("runtime should start");
        let mut tracker = RequestTracker::new();

        let ticket = tracker.issue(RequestSlot::Session);
        worker.connect(ticket, ConnectionInfo::sqlite("shop", path.to_string_lossy()));
        let WorkerEvent::Connected {
            ticket: connected,
            loader,
            ..
        } = wait_for_event(&mut worker)
        else {
            panic!("expected a connected event");
        };
        assert_eq!(connected, ticket);

        let ticket = tracker.issue(RequestSlot::Tree);
        worker.submit(
            ticket,
            loader.clone(),
            LoadRequest::Tree {
                server_label: "shop".to_string(),
            },
        );
        let WorkerEvent::Loaded {
            result: Ok(LoadReply::TreeLoaded(mut tree)),
            ..
        } = wait_for_event(&mut worker)
        else {
            panic!("expected a loaded tree");
        };

        let database = tree.children(tree.server())[0];
        worker
            .children(Some(loader))
            .load_children(&mut tree, database)
            .expect("children should load");
        assert_eq!(tree.children(database).len(), 1);

        worker.shutdown();
    }

    #[test]
    fn children_without_session_report_connection_error() {
        let worker = Worker::new().expect("runtime should start");
        let mut tree = tetra_core::tree::CatalogTree::new("root", "local");
        let server = tree.server();

        let err = worker
            .children(None)
            .load_children(&mut tree, server)
            .expect_err("no session");
        assert!(err.is_connectivity());
        worker.shutdown();
    }

    #[test]
    fn failed_connect_reports_message() {
        let mut worker = Worker::new().expect("runtime should start");
        let mut tracker = RequestTracker::new();

        let ticket = tracker.issue(RequestSlot::Session);
        worker.connect(ticket, ConnectionInfo::sqlite("broken", ""));
        match wait_for_event(&mut worker) {
            WorkerEvent::ConnectFailed { message, .. } => {
                assert!(message.contains("requires a file path"));
            }
            _ => panic!("expected a connect failure"),
        }
        worker.shutdown();
    }

    #[test]
    fn health_check_reports_status_of_the_session() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let mut worker = Worker::new().expect("runtime should start");
        let mut tracker = RequestTracker::new();

        let ticket = tracker.issue(RequestSlot::Health);
        worker.health_check(ticket);
        let WorkerEvent::Health { status, outcome, .. } = wait_for_event(&mut worker) else {
            panic!("expected a health event");
        };
        assert!(!status.is_connected);
        assert_eq!(outcome, Err("no active connection".to_string()));

        let ticket = tracker.issue(RequestSlot::Session);
        let path = temp_dir.path().join("health.db");
        worker.connect(ticket, ConnectionInfo::sqlite("health", path.to_string_lossy()));
        assert!(matches!(
            wait_for_event(&mut worker),
            WorkerEvent::Connected { .. }
        ));

        let ticket = tracker.issue(RequestSlot::Health);
        worker.health_check(ticket);
        let WorkerEvent::Health {
            ticket: answered,
            status,
            outcome,
        } = wait_for_event(&mut worker)
        else {
            panic!("expected a health event");
        };
        assert_eq!(answered, ticket);
        assert!(outcome.is_ok());
        assert_eq!(status.connection_name.as_deref(), Some("health"));
        assert!(status.last_health_check_at.is_some());
        worker.shutdown();
    }
}
