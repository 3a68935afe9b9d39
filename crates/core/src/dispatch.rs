//! Asynchronous load requests and stale-result filtering.
//!
//! Every request is tagged with a [`Ticket`]: a slot plus a sequence number
//! that grows per slot. Only the newest ticket of a slot is accepted when
//! its reply comes back.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::grid::{CellPosition, GridCommand};
use crate::loader::{CatalogLoader, LoaderError, RowIdentity, TableTarget};
use crate::tree::CatalogTree;
use crate::value::{RowSet, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestSlot {
    Session,
    Tree,
    Grid,
    Mutation,
    Health,
}

impl RequestSlot {
    const COUNT: usize = 5;

    fn index(self) -> usize {
        match self {
            Self::Session => 0,
            Self::Tree => 1,
            Self::Grid => 2,
            Self::Mutation => 3,
            Self::Health => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub slot: RequestSlot,
    pub seq: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestTracker {
    latest: [u64; RequestSlot::COUNT],
}

impl RequestTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a ticket that supersedes every earlier ticket of `slot`.
    pub fn issue(&mut self, slot: RequestSlot) -> Ticket {
        let seq = &mut self.latest[slot.index()];
        *seq += 1;
        Ticket { slot, seq: *seq }
    }

    /// Sequence number of the newest ticket issued for `slot`.
    #[must_use]
    pub fn latest(&self, slot: RequestSlot) -> u64 {
        self.latest[slot.index()]
    }

    #[must_use]
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.latest[ticket.slot.index()] == ticket.seq
    }

    /// Accepts `ticket` when it is still the newest of its slot.
    pub fn accept(&self, ticket: Ticket) -> bool {
        let current = self.is_current(ticket);
        if !current {
            debug!(
                slot = ?ticket.slot,
                seq = ticket.seq,
                latest = self.latest[ticket.slot.index()],
                "dropping stale result"
            );
        }
        current
    }

    /// Makes every outstanding ticket of `slot` stale.
    pub fn invalidate(&mut self, slot: RequestSlot) {
        self.latest[slot.index()] += 1;
    }

    pub fn invalidate_all(&mut self) {
        for seq in &mut self.latest {
            *seq += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Update,
    Insert,
    Delete,
}

impl MutationKind {
    #[must_use]
    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Update => "Cell updated",
            Self::Insert => "Row inserted",
            Self::Delete => "Row deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadRequest {
    Tree {
        server_label: String,
    },
    TableData {
        target: TableTarget,
        limit: usize,
        offset: usize,
        restore: CellPosition,
    },
    Query {
        sql: String,
    },
    UpdateCell {
        target: TableTarget,
        column: String,
        identity: RowIdentity,
        value: Value,
        restore: CellPosition,
    },
    InsertRow {
        target: TableTarget,
        values: BTreeMap<String, Value>,
        restore: CellPosition,
    },
    DeleteRow {
        target: TableTarget,
        identity: RowIdentity,
        restore: CellPosition,
    },
}

impl LoadRequest {
    #[must_use]
    pub fn slot(&self) -> RequestSlot {
        match self {
            Self::Tree { .. } => RequestSlot::Tree,
            Self::TableData { .. } | Self::Query { .. } => RequestSlot::Grid,
            Self::UpdateCell { .. } | Self::InsertRow { .. } | Self::DeleteRow { .. } => {
                RequestSlot::Mutation
            }
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Tree { server_label } => format!("Loading catalog for {server_label}"),
            Self::TableData { target, .. } => format!("Loading {target}"),
            Self::Query { .. } => "Running query".to_string(),
            Self::UpdateCell { target, column, .. } => format!("Updating {target}.{column}"),
            Self::InsertRow { target, .. } => format!("Inserting into {target}"),
            Self::DeleteRow { target, .. } => format!("Deleting from {target}"),
        }
    }
}

impl From<GridCommand> for LoadRequest {
    fn from(command: GridCommand) -> Self {
        match command {
            GridCommand::UpdateCell {
                target,
                column,
                identity,
                value,
                restore,
            } => Self::UpdateCell {
                target,
                column,
                identity,
                value,
                restore,
            },
            GridCommand::InsertRow {
                target,
                values,
                restore,
            } => Self::InsertRow {
                target,
                values,
                restore,
            },
            GridCommand::DeleteRow {
                target,
                identity,
                restore,
            } => Self::DeleteRow {
                target,
                identity,
                restore,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadReply {
    TreeLoaded(CatalogTree),
    TableLoaded {
        target: TableTarget,
        rows: RowSet,
        restore: CellPosition,
    },
    QueryExecuted {
        rows: RowSet,
    },
    /// A mutation finished; the same table window should be fetched again.
    Mutated {
        target: TableTarget,
        restore: CellPosition,
        kind: MutationKind,
    },
}

/// Runs one request against `loader`. Called off the input loop.
pub async fn run_request(
    loader: &dyn CatalogLoader,
    request: LoadRequest,
) -> Result<LoadReply, LoaderError> {
    match request {
        LoadRequest::Tree { server_label } => {
            let tree = loader.load_tree(&server_label).await?;
            info!(server = %server_label, databases = tree.children(tree.server()).len(), "catalog loaded");
            Ok(LoadReply::TreeLoaded(tree))
        }
        LoadRequest::TableData {
            target,
            limit,
            offset,
            restore,
        } => {
            let rows = loader.get_table_data(&target, limit, offset).await?;
            info!(table = %target, rows = rows.len(), offset, "table window loaded");
            Ok(LoadReply::TableLoaded {
                target,
                rows,
                restore,
            })
        }
        LoadRequest::Query { sql } => {
            let rows = loader.execute_query(&sql).await?;
            info!(rows = rows.len(), "query executed");
            Ok(LoadReply::QueryExecuted { rows })
        }
        LoadRequest::UpdateCell {
            target,
            column,
            identity,
            value,
            restore,
        } => {
            loader
                .update_cell(&target, &column, &identity, &value)
                .await?;
            info!(table = %target, column = %column, "cell updated");
            Ok(LoadReply::Mutated {
                target,
                restore,
                kind: MutationKind::Update,
            })
        }
        LoadRequest::InsertRow {
            target,
            values,
            restore,
        } => {
            if values.is_empty() {
                return Err(LoaderError::EmptyInsert);
            }
            loader.insert_row(&target, &values).await?;
            info!(table = %target, columns = values.len(), "row inserted");
            Ok(LoadReply::Mutated {
                target,
                restore,
                kind: MutationKind::Insert,
            })
        }
        LoadRequest::DeleteRow {
            target,
            identity,
            restore,
        } => {
            loader.delete_row(&target, &identity).await?;
            info!(table = %target, "row deleted");
            Ok(LoadReply::Mutated {
                target,
                restore,
                kind: MutationKind::Delete,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::{run_request, LoadReply, LoadRequest, MutationKind, RequestSlot, RequestTracker};
    use crate::grid::{CellPosition, GridCommand};
    use crate::loader::{CatalogLoader, LoaderError, RowIdentity, TableTarget};
    use crate::tree::{CatalogTree, NodeId, NodeKind, NodeSeed};
    use crate::value::{Row, RowSet, Value};

    #[derive(Debug, Default)]
    struct FakeLoader {
        table_calls: AtomicUsize,
        mutation_calls: AtomicUsize,
    }

    #[async_trait]
    impl CatalogLoader for FakeLoader {
        async fn load_tree(&self, server_label: &str) -> Result<CatalogTree, LoaderError> {
            let mut tree = CatalogTree::new("PostgreSQL Servers", server_label);
            let server = tree.server();
            tree.attach_children(server, vec![NodeSeed::new("db_app", "app", NodeKind::Database)]);
            Ok(tree)
        }

        async fn load_children(
            &self,
            _tree: &mut CatalogTree,
            _node: NodeId,
        ) -> Result<(), LoaderError> {
            Ok(())
        }

        async fn get_table_data(
            &self,
            _target: &TableTarget,
            limit: usize,
            offset: usize,
        ) -> Result<RowSet, LoaderError> {
            self.table_calls.fetch_add(1, Ordering::Relaxed);
            Ok((offset..offset + limit.min(2))
                .map(|index| {
                    [("id", Value::Int(i64::try_from(index).expect("small index")))]
                        .into_iter()
                        .collect::<Row>()
                })
                .collect())
        }

        async fn update_cell(
            &self,
            _target: &TableTarget,
            _column: &str,
            _identity: &RowIdentity,
            _value: &Value,
        ) -> Result<(), LoaderError> {
            self.mutation_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn insert_row(
            &self,
            _target: &TableTarget,
            _values: &BTreeMap<String, Value>,
        ) -> Result<(), LoaderError> {
            self.mutation_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn delete_row(
            &self,
            _target: &TableTarget,
            _identity: &RowIdentity,
        ) -> Result<(), LoaderError> {
            Err(LoaderError::Query("row is locked".to_string()))
        }

        async fn execute_query(&self, sql: &str) -> Result<RowSet, LoaderError> {
            if sql.trim().is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![[("one", Value::Int(1))].into_iter().collect()])
        }
    }

    fn users() -> TableTarget {
        TableTarget::new("app", "public", "users")
    }

    #[test]
    fn newer_tickets_supersede_older_ones_per_slot() {
        let mut tracker = RequestTracker::new();
        let first = tracker.issue(RequestSlot::Grid);
        let tree = tracker.issue(RequestSlot::Tree);
        let second = tracker.issue(RequestSlot::Grid);

        assert!(!tracker.accept(first));
        assert!(tracker.accept(second));
        assert!(tracker.accept(tree), "other slots are unaffected");
        assert_eq!(tracker.latest(RequestSlot::Grid), second.seq);
        assert_eq!(tracker.latest(RequestSlot::Mutation), 0);

        tracker.invalidate(RequestSlot::Tree);
        assert!(!tracker.accept(tree));

        tracker.invalidate_all();
        assert!(!tracker.accept(second));
    }

    #[test]
    fn requests_map_to_slots() {
        let query = LoadRequest::Query {
            sql: "select 1".to_string(),
        };
        assert_eq!(query.slot(), RequestSlot::Grid);

        let delete: LoadRequest = GridCommand::DeleteRow {
            target: users(),
            identity: RowIdentity::new("(0,1)").expect("identity"),
            restore: CellPosition::default(),
        }
        .into();
        assert_eq!(delete.slot(), RequestSlot::Mutation);
        assert_eq!(delete.describe(), "Deleting from app.public.users");
    }

    #[tokio::test]
    async fn table_requests_carry_restore_position() {
        let loader = FakeLoader::default();
        let reply = run_request(
            &loader,
            LoadRequest::TableData {
                target: users(),
                limit: 100,
                offset: 0,
                restore: CellPosition::new(1, 2),
            },
        )
        .await
        .expect("table load");

        match reply {
            LoadReply::TableLoaded {
                target,
                rows,
                restore,
            } => {
                assert_eq!(target, users());
                assert_eq!(rows.len(), 2);
                assert_eq!(restore, CellPosition::new(1, 2));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert_eq!(loader.table_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn mutations_reply_with_reload_context() {
        let loader = FakeLoader::default();
        let reply = run_request(
            &loader,
            LoadRequest::UpdateCell {
                target: users(),
                column: "email".to_string(),
                identity: RowIdentity::new("(0,3)").expect("identity"),
                value: Value::Text("a@b".to_string()),
                restore: CellPosition::new(2, 1),
            },
        )
        .await
        .expect("update");

        assert_eq!(
            reply,
            LoadReply::Mutated {
                target: users(),
                restore: CellPosition::new(2, 1),
                kind: MutationKind::Update,
            }
        );
    }

    #[tokio::test]
    async fn empty_insert_is_rejected_before_the_backend() {
        let loader = FakeLoader::default();
        let err = run_request(
            &loader,
            LoadRequest::InsertRow {
                target: users(),
                values: BTreeMap::new(),
                restore: CellPosition::default(),
            },
        )
        .await
        .expect_err("empty insert");

        assert_eq!(err, LoaderError::EmptyInsert);
        assert_eq!(loader.mutation_calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn backend_errors_propagate() {
        let loader = FakeLoader::default();
        let err = run_request(
            &loader,
            LoadRequest::DeleteRow {
                target: users(),
                identity: RowIdentity::new("(0,1)").expect("identity"),
                restore: CellPosition::default(),
            },
        )
        .await
        .expect_err("delete fails");

        assert_eq!(err, LoaderError::Query("row is locked".to_string()));
    }

    #[tokio::test]
    async fn tree_and_query_requests() {
        let loader = FakeLoader::default();
        let reply = run_request(
            &loader,
            LoadRequest::Tree {
                server_label: "local".to_string(),
            },
        )
        .await
        .expect("tree");
        let LoadReply::TreeLoaded(tree) = reply else {
            panic!("expected a tree");
        };
        assert_eq!(tree.children(tree.server()).len(), 1);

        let reply = run_request(
            &loader,
            LoadRequest::Query {
                sql: "   ".to_string(),
            },
        )
        .await
        .expect("blank query");
        assert_eq!(reply, LoadReply::QueryExecuted { rows: Vec::new() });
    }
}
