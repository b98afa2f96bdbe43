//! Mutation intents and their per-intent results.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::schema::PartialRow;
use crate::table::{SeqNum, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Update,
    Upsert,
    Delete,
}

/// One pending mutation: what to do, to which table, with which row.
#[derive(Clone)]
pub struct MutationIntent {
    kind: OperationKind,
    table: Arc<Table>,
    row: PartialRow,
}

impl MutationIntent {
    /// An intent with an empty row, to be filled through `row_mut`.
    pub fn new(kind: OperationKind, table: &Arc<Table>) -> Self {
        Self::with_row(kind, table, table.new_row())
    }

    pub fn with_row(kind: OperationKind, table: &Arc<Table>, row: PartialRow) -> Self {
        Self {
            kind,
            table: Arc::clone(table),
            row,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn row(&self) -> &PartialRow {
        &self.row
    }

    pub fn row_mut(&mut self) -> &mut PartialRow {
        &mut self.row
    }

    pub(crate) fn apply(&self, deadline: Option<Instant>) -> Result<SeqNum> {
        self.table.apply(self.kind, &self.row, deadline)
    }
}

impl fmt::Debug for MutationIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationIntent")
            .field("kind", &self.kind)
            .field("table", &self.table.name())
            .field("key", &self.row.key_string())
            .finish()
    }
}

impl Table {
    pub fn new_insert(self: &Arc<Self>) -> MutationIntent {
        MutationIntent::new(OperationKind::Insert, self)
    }

    pub fn new_update(self: &Arc<Self>) -> MutationIntent {
        MutationIntent::new(OperationKind::Update, self)
    }

    pub fn new_upsert(self: &Arc<Self>) -> MutationIntent {
        MutationIntent::new(OperationKind::Upsert, self)
    }

    pub fn new_delete(self: &Arc<Self>) -> MutationIntent {
        MutationIntent::new(OperationKind::Delete, self)
    }
}

/// Outcome of applying one intent. Carries the intent so failed ones can be
/// resubmitted.
#[derive(Debug, Clone)]
pub struct OperationResponse {
    intent: MutationIntent,
    result: Result<SeqNum>,
}

impl OperationResponse {
    pub(crate) fn new(intent: MutationIntent, result: Result<SeqNum>) -> Self {
        Self { intent, result }
    }

    pub fn intent(&self) -> &MutationIntent {
        &self.intent
    }

    pub fn result(&self) -> &Result<SeqNum> {
        &self.result
    }

    pub fn is_error(&self) -> bool {
        self.result.is_err()
    }

    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    pub fn seq_num(&self) -> Option<SeqNum> {
        self.result.as_ref().ok().copied()
    }

    pub fn into_intent(self) -> MutationIntent {
        self.intent
    }
}
