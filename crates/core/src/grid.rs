//! Tabular result view: 2-D cursor, row/column viewport and the cell edit
//! lifecycle.

use std::collections::BTreeMap;
use std::ops::Range;

use thiserror::Error;

use crate::loader::{is_hidden_column, RowIdentity, TableTarget};
use crate::text_input::TextInput;
use crate::value::{parse_key_values, Row, RowSet, Value};

pub const MIN_COLUMN_WIDTH: usize = 8;
pub const MAX_COLUMN_WIDTH: usize = 30;
pub const COLUMN_SEPARATOR_WIDTH: usize = 1;
pub const MIN_VIEWPORT_WIDTH: usize = 20;
pub const INSERT_PLACEHOLDER: &str = "column=value, other=value2";

const DEFAULT_VIEWPORT_ROWS: usize = 10;
const DEFAULT_VIEWPORT_WIDTH: usize = 80;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CellPosition {
    pub row: usize,
    pub column: usize,
}

impl CellPosition {
    #[must_use]
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

/// One rendered column: index into [`DataGrid::columns`] and its width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSlot {
    pub index: usize,
    pub width: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    UpdateCell,
    InsertRow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub mode: EditMode,
    pub row: usize,
    pub column: Option<String>,
    pub input: TextInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("no table context: results came from a free-form query")]
    NoTableContext,
    #[error("no row selected")]
    NoSelection,
    #[error("row identity is not available for the selected row")]
    MissingRowIdentity,
}

/// Mutation produced by a committed edit, with the cell to restore after the
/// follow-up reload.
#[derive(Debug, Clone, PartialEq)]
pub enum GridCommand {
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

impl GridCommand {
    #[must_use]
    pub fn target(&self) -> &TableTarget {
        match self {
            Self::UpdateCell { target, .. }
            | Self::InsertRow { target, .. }
            | Self::DeleteRow { target, .. } => target,
        }
    }

    #[must_use]
    pub fn restore(&self) -> CellPosition {
        match self {
            Self::UpdateCell { restore, .. }
            | Self::InsertRow { restore, .. }
            | Self::DeleteRow { restore, .. } => *restore,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataGrid {
    rows: RowSet,
    columns: Vec<String>,
    selected: CellPosition,
    row_offset: usize,
    column_offset: usize,
    viewport_rows: usize,
    viewport_width: usize,
    edit: Option<EditSession>,
    context: Option<TableTarget>,
}

impl Default for DataGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl DataGrid {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            columns: Vec::new(),
            selected: CellPosition::default(),
            row_offset: 0,
            column_offset: 0,
            viewport_rows: DEFAULT_VIEWPORT_ROWS,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            edit: None,
            context: None,
        }
    }

    /// Replaces the row set and returns the cursor to the origin. Columns
    /// come from the first row, sorted, without hidden identity columns.
    pub fn set_results(&mut self, rows: RowSet) {
        self.columns = rows.first().map_or_else(Vec::new, |row| {
            let mut columns: Vec<String> = row
                .columns()
                .filter(|name| !is_hidden_column(name))
                .map(str::to_string)
                .collect();
            columns.sort();
            columns.dedup();
            columns
        });
        self.rows = rows;
        self.selected = CellPosition::default();
        self.row_offset = 0;
        self.column_offset = 0;
        self.edit = None;
    }

    /// `None` marks query results, which cannot be edited.
    pub fn set_context(&mut self, context: Option<TableTarget>) {
        self.context = context;
    }

    #[must_use]
    pub fn context(&self) -> Option<&TableTarget> {
        self.context.as_ref()
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    #[must_use]
    pub fn selection(&self) -> CellPosition {
        self.selected
    }

    #[must_use]
    pub fn row_offset(&self) -> usize {
        self.row_offset
    }

    #[must_use]
    pub fn column_offset(&self) -> usize {
        self.column_offset
    }

    #[must_use]
    pub fn viewport_rows(&self) -> usize {
        self.viewport_rows
    }

    #[must_use]
    pub fn viewport_width(&self) -> usize {
        self.viewport_width
    }

    pub fn set_viewport(&mut self, rows: usize, width: usize) {
        self.viewport_rows = rows.max(1);
        self.viewport_width = width.max(MIN_VIEWPORT_WIDTH);
        self.reconcile_viewport();
    }

    /// Row indices inside the vertical window.
    #[must_use]
    pub fn visible_rows(&self) -> Range<usize> {
        let start = self.row_offset.min(self.rows.len());
        let end = (start + self.viewport_rows).min(self.rows.len());
        start..end
    }

    /// Moves the cursor to `position`, clamped into the current bounds.
    pub fn set_selection(&mut self, position: CellPosition) {
        if self.is_empty() {
            self.selected = CellPosition::default();
            return;
        }
        self.selected = CellPosition {
            row: position.row.min(self.rows.len() - 1),
            column: position.column.min(self.columns.len() - 1),
        };
        self.reconcile_viewport();
    }

    pub fn move_selection(&mut self, row_delta: isize, column_delta: isize) {
        if self.is_empty() {
            return;
        }
        let row = self.selected.row.saturating_add_signed(row_delta);
        let column = self.selected.column.saturating_add_signed(column_delta);
        self.set_selection(CellPosition::new(row, column));
    }

    pub fn page_up(&mut self) {
        self.move_selection(-signed(self.viewport_rows), 0);
    }

    pub fn page_down(&mut self) {
        self.move_selection(signed(self.viewport_rows), 0);
    }

    pub fn first_column(&mut self) {
        self.set_selection(CellPosition::new(self.selected.row, 0));
    }

    pub fn last_column(&mut self) {
        self.set_selection(CellPosition::new(self.selected.row, usize::MAX));
    }

    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        let name = self.columns.get(column)?;
        self.rows.get(row)?.get(name)
    }

    #[must_use]
    pub fn selected_cell(&self) -> Option<&Value> {
        self.cell(self.selected.row, self.selected.column)
    }

    #[must_use]
    pub fn selected_column(&self) -> Option<&str> {
        self.columns.get(self.selected.column).map(String::as_str)
    }

    pub fn row_identity(&self, row: usize) -> Result<RowIdentity, GridError> {
        let row = self.rows.get(row).ok_or(GridError::NoSelection)?;
        RowIdentity::from_row(row).map_err(|_| GridError::MissingRowIdentity)
    }

    /// Columns that fit in the viewport width, starting at the column
    /// offset. Never empty while there is data to show.
    #[must_use]
    pub fn visible_columns(&self) -> Vec<ColumnSlot> {
        let mut slots = Vec::new();
        if self.is_empty() {
            return slots;
        }

        let mut used = 0;
        for index in self.column_offset..self.columns.len() {
            let width = self.column_width(index);
            let needed = if slots.is_empty() {
                width
            } else {
                used + COLUMN_SEPARATOR_WIDTH + width
            };
            if needed > self.viewport_width {
                break;
            }
            used = needed;
            slots.push(ColumnSlot { index, width });
        }

        if slots.is_empty() {
            let index = self.column_offset.min(self.columns.len() - 1);
            slots.push(ColumnSlot {
                index,
                width: self.column_width(index).min(self.viewport_width),
            });
        }
        slots
    }

    /// Rendered width of a column within the current row window, clamped to
    /// `[MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH]`.
    #[must_use]
    pub fn column_width(&self, index: usize) -> usize {
        let Some(name) = self.columns.get(index) else {
            return MIN_COLUMN_WIDTH;
        };
        let widest_value = self.rows[self.visible_rows()]
            .iter()
            .filter_map(|row| row.get(name))
            .map(|value| value.to_string().chars().count())
            .max()
            .unwrap_or(0);
        name.chars()
            .count()
            .max(widest_value)
            .clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH)
    }

    #[must_use]
    pub fn edit(&self) -> Option<&EditSession> {
        self.edit.as_ref()
    }

    #[must_use]
    pub fn is_editing(&self) -> bool {
        self.edit.is_some()
    }

    pub fn edit_input_mut(&mut self) -> Option<&mut TextInput> {
        self.edit.as_mut().map(|session| &mut session.input)
    }

    /// Opens an editor seeded with the selected cell's current value.
    pub fn begin_update_cell(&mut self) -> Result<(), GridError> {
        if self.context.is_none() {
            return Err(GridError::NoTableContext);
        }
        let column = self
            .selected_column()
            .map(str::to_string)
            .ok_or(GridError::NoSelection)?;
        let value = self.selected_cell().ok_or(GridError::NoSelection)?;

        self.edit = Some(EditSession {
            mode: EditMode::UpdateCell,
            row: self.selected.row,
            input: TextInput::single_line().with_value(&value.edit_text()),
            column: Some(column),
        });
        Ok(())
    }

    pub fn begin_insert_row(&mut self) -> Result<(), GridError> {
        if self.context.is_none() {
            return Err(GridError::NoTableContext);
        }
        self.edit = Some(EditSession {
            mode: EditMode::InsertRow,
            row: self.selected.row,
            column: None,
            input: TextInput::single_line().with_placeholder(INSERT_PLACEHOLDER),
        });
        Ok(())
    }

    pub fn cancel_edit(&mut self) {
        self.edit = None;
    }

    /// Closes the edit session and turns it into a mutation.
    ///
    /// The session is gone before the backend sees the command, so a failed
    /// mutation does not reopen the editor. An insert buffer without any
    /// valid `key=value` pair is a no-op that keeps the editor open.
    pub fn commit_edit(&mut self) -> Result<Option<GridCommand>, GridError> {
        let Some(session) = self.edit.take() else {
            return Ok(None);
        };
        let target = self.context.clone().ok_or(GridError::NoTableContext)?;

        match session.mode {
            EditMode::UpdateCell => {
                let column = session.column.ok_or(GridError::NoSelection)?;
                let identity = self.row_identity(session.row)?;
                let column_index = self
                    .columns
                    .iter()
                    .position(|name| *name == column)
                    .unwrap_or(self.selected.column);
                Ok(Some(GridCommand::UpdateCell {
                    target,
                    value: Value::infer(&session.input.value()),
                    restore: CellPosition::new(session.row, column_index),
                    column,
                    identity,
                }))
            }
            EditMode::InsertRow => {
                let values = parse_key_values(&session.input.value());
                if values.is_empty() {
                    self.edit = Some(session);
                    return Ok(None);
                }
                Ok(Some(GridCommand::InsertRow {
                    target,
                    values,
                    restore: CellPosition::new(session.row, 0),
                }))
            }
        }
    }

    /// Deletes the selected row; the reload lands one row up.
    pub fn request_delete(&mut self) -> Result<GridCommand, GridError> {
        let target = self.context.clone().ok_or(GridError::NoTableContext)?;
        if self.rows.is_empty() {
            return Err(GridError::NoSelection);
        }
        let identity = self.row_identity(self.selected.row)?;
        Ok(GridCommand::DeleteRow {
            target,
            identity,
            restore: CellPosition::new(self.selected.row.saturating_sub(1), self.selected.column),
        })
    }

    fn reconcile_viewport(&mut self) {
        if self.is_empty() {
            self.row_offset = 0;
            self.column_offset = 0;
            return;
        }

        let row = self.selected.row;
        if row < self.row_offset {
            self.row_offset = row;
        } else if row >= self.row_offset + self.viewport_rows {
            self.row_offset = row + 1 - self.viewport_rows;
        }

        // Widths depend on the row window, so columns are reconciled second.
        let column = self.selected.column;
        if column < self.column_offset {
            self.column_offset = column;
        } else if column >= self.column_offset + self.visible_columns().len() {
            self.column_offset = self.first_column_ending_at(column);
        }
    }

    /// Smallest offset whose window still ends with `column` visible.
    fn first_column_ending_at(&self, column: usize) -> usize {
        let mut start = column;
        let mut used = self.column_width(column);
        while start > 0 {
            let needed = used + COLUMN_SEPARATOR_WIDTH + self.column_width(start - 1);
            if needed > self.viewport_width {
                break;
            }
            used = needed;
            start -= 1;
        }
        start
    }
}

fn signed(value: usize) -> isize {
    isize::try_from(value).unwrap_or(isize::MAX)
}
