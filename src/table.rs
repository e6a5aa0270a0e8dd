//! Table model: the loaded entries plus everything the user layers on top of
//! them (columns, filter, sort, marks, cursor) and the projection built from
//! those.

use std::collections::BTreeSet;

use log::debug;
use serde_json::Value;

use crate::layout::{allocate_widths, ideal_widths};
use crate::mutation::{self, MutationError};
use crate::projection::{discover_columns, project, Projection, SortSpec};
use crate::query::{line_vars, Query};
use crate::store::{self, Entry};

/// Shown in the mark column for marked rows.
pub const MARK_SYMBOL: &str = "●";

/// Rows moved by page up/down before the table has been drawn once.
const DEFAULT_PAGE_ROWS: usize = 10;

/// Filter that keeps only the given line ids.
pub fn marked_only_filter(lines: &BTreeSet<usize>) -> String {
    let ids: Vec<String> = lines.iter().map(|line| line.to_string()).collect();
    format!("$line | IN({})", ids.join(", "))
}

#[derive(Debug, Clone)]
pub struct TableModel {
    entries: Vec<Entry>,
    columns: Vec<String>,
    filter: String,
    /// Filter to restore when the marked-only view is switched off.
    filter_before_marked_only: Option<String>,
    sort: SortSpec,
    marked: BTreeSet<usize>,
    cursor: usize,
    page_rows: usize,
    projection: Projection,
}

impl Default for TableModel {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            columns: Vec::new(),
            filter: String::new(),
            filter_before_marked_only: None,
            sort: SortSpec::default(),
            marked: BTreeSet::new(),
            cursor: 0,
            page_rows: DEFAULT_PAGE_ROWS,
            projection: Projection::default(),
        }
    }
}

impl TableModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the loaded entries. Columns are discovered from the first
    /// entry when none have been configured.
    pub fn set_entries(&mut self, entries: Vec<Entry>) {
        self.entries = entries;
        self.marked.clear();
        if self.columns.is_empty() {
            self.columns = discover_columns(&self.entries);
            debug!("Auto-discovered columns: {:?}", self.columns);
        } else {
            debug!("Using pre-configured columns: {:?}", self.columns);
        }
        self.cursor = 0;
        self.rebuild();
    }

    /// Replace the column queries. An empty list falls back to discovery.
    pub fn set_columns(&mut self, columns: Vec<String>) {
        debug!("Set column queries: {:?}", columns);
        self.columns = if columns.is_empty() {
            discover_columns(&self.entries)
        } else {
            columns
        };
        if self.sort.column.is_some_and(|col| col >= self.columns.len()) {
            self.sort = SortSpec::default();
        }
        self.rebuild();
    }

    /// Set the filter typed by the user. This leaves the marked-only view.
    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter_before_marked_only = None;
        self.filter = filter.into();
        self.rebuild();
    }

    /// Sort by `column`: the same column again flips the direction, a new one
    /// starts ascending. Returns false for a column that does not exist.
    pub fn sort_by(&mut self, column: usize) -> bool {
        if column >= self.columns.len() {
            return false;
        }
        if self.sort.column == Some(column) {
            self.sort.ascending = !self.sort.ascending;
        } else {
            self.sort = SortSpec {
                column: Some(column),
                ascending: true,
            };
        }
        self.rebuild();
        true
    }

    pub fn toggle_mark_selected_and_move_down(&mut self) {
        let Some(line) = self.selected_line() else {
            return;
        };
        if !self.marked.remove(&line) {
            self.marked.insert(line);
        }
        self.move_down(1);
    }

    /// Mark every row in the current view. Returns how many were not marked
    /// before.
    pub fn mark_all_visible(&mut self) -> usize {
        let lines: Vec<usize> = self
            .projection
            .indexes
            .iter()
            .map(|&idx| self.entries[idx].line)
            .collect();
        lines
            .into_iter()
            .filter(|&line| self.marked.insert(line))
            .count()
    }

    /// Returns false when nothing was marked.
    pub fn clear_marks(&mut self) -> bool {
        if self.marked.is_empty() {
            return false;
        }
        self.marked.clear();
        true
    }

    pub fn is_marked_only_active(&self) -> bool {
        self.filter_before_marked_only.is_some()
    }

    /// Switch between the marked-only view and the filter that was active
    /// before it. Returns false when there is nothing to show.
    pub fn toggle_marked_only(&mut self) -> bool {
        if let Some(previous) = self.filter_before_marked_only.take() {
            self.filter = previous;
        } else if self.marked.is_empty() {
            return false;
        } else {
            let previous = std::mem::replace(&mut self.filter, marked_only_filter(&self.marked));
            self.filter_before_marked_only = Some(previous);
        }
        self.rebuild();
        true
    }

    /// Delete the marked entries, or the selected one when nothing is
    /// marked. Remaining entries are renumbered and marks are cleared.
    /// Returns how many entries were removed.
    pub fn delete_marked_or_selected(&mut self) -> usize {
        let lines: BTreeSet<usize> = if self.marked.is_empty() {
            self.selected_line().into_iter().collect()
        } else {
            std::mem::take(&mut self.marked)
        };
        if lines.is_empty() {
            return 0;
        }

        let removed = store::delete_lines(&mut self.entries, &lines);
        self.marked.clear();
        if let Some(previous) = self.filter_before_marked_only.take() {
            self.filter = previous;
        }

        let previous_cursor = self.cursor;
        self.projection = project(&self.entries, &self.columns, &self.filter, self.sort);
        self.cursor = previous_cursor;
        self.clamp_cursor();
        debug!("Deleted {} entries", removed);
        removed
    }

    /// Lines an edit applies to and whether it is a single-entry edit: the
    /// marked lines if any, else the selected one.
    pub fn edit_targets(&self) -> Option<(Vec<usize>, bool)> {
        if !self.marked.is_empty() {
            return Some((self.marked_lines(), false));
        }
        self.selected_line().map(|line| (vec![line], true))
    }

    pub fn apply_edits(
        &mut self,
        targets: &[usize],
        values: &[(String, String)],
        single_mode: bool,
    ) -> Result<usize, MutationError> {
        let updated = mutation::apply_edits(&mut self.entries, targets, values, single_mode)?;
        self.rebuild();
        Ok(updated)
    }

    /// Text to prefill an edit field with: the column's first value, objects
    /// and arrays as compact JSON, nothing for null or failures.
    pub fn column_value_for_edit(entry: &Entry, column: &str) -> String {
        let Ok(query) = Query::compile(column) else {
            return String::new();
        };
        match query.first_with(&entry.data, &line_vars(entry.line)) {
            Ok(Some(Value::String(text))) => text,
            Ok(Some(Value::Null)) | Ok(None) | Err(_) => String::new(),
            Ok(Some(other)) => other.to_string(),
        }
    }

    pub fn selected_entry(&self) -> Option<&Entry> {
        self.projection
            .indexes
            .get(self.cursor)
            .map(|&idx| &self.entries[idx])
    }

    pub fn selected_line(&self) -> Option<usize> {
        self.selected_entry().map(|entry| entry.line)
    }

    pub fn first_entry(&self) -> Option<&Entry> {
        self.entries.first()
    }

    pub fn move_down(&mut self, rows: usize) {
        self.cursor = self.cursor.saturating_add(rows);
        self.clamp_cursor();
    }

    pub fn move_up(&mut self, rows: usize) {
        self.cursor = self.cursor.saturating_sub(rows);
    }

    pub fn page_down(&mut self) {
        self.move_down(self.page_rows);
    }

    pub fn page_up(&mut self) {
        self.move_up(self.page_rows);
    }

    pub fn move_to_top(&mut self) {
        self.cursor = 0;
    }

    pub fn move_to_bottom(&mut self) {
        self.cursor = self.visible_count().saturating_sub(1);
    }

    /// Rows that fit on screen, used for paging.
    pub fn set_page_rows(&mut self, rows: usize) {
        self.page_rows = rows.max(1);
    }

    pub fn has_marker(&self) -> bool {
        !self.marked.is_empty()
    }

    /// Column titles, with the sort direction on the sorted column and the
    /// mark column first while anything is marked.
    pub fn headers(&self) -> Vec<String> {
        let marker = self.has_marker().then(|| MARK_SYMBOL.to_string());
        let titles = self.columns.iter().enumerate().map(|(idx, column)| {
            match (self.sort.column == Some(idx), self.sort.ascending) {
                (true, true) => format!("{column} ↑"),
                (true, false) => format!("{column} ↓"),
                (false, _) => column.clone(),
            }
        });
        marker.into_iter().chain(titles).collect()
    }

    /// Cell text of every visible row, led by the mark cell while anything
    /// is marked.
    pub fn display_rows(&self) -> Vec<Vec<String>> {
        let marker = self.has_marker();
        self.projection
            .indexes
            .iter()
            .zip(&self.projection.rows)
            .map(|(&idx, cells)| {
                let mut row = Vec::with_capacity(cells.len() + 1);
                if marker {
                    let line = self.entries[idx].line;
                    let symbol = if self.marked.contains(&line) {
                        MARK_SYMBOL
                    } else {
                        ""
                    };
                    row.push(symbol.to_string());
                }
                row.extend(cells.iter().cloned());
                row
            })
            .collect()
    }

    pub fn is_marked(&self, line: usize) -> bool {
        self.marked.contains(&line)
    }

    /// Line id of the row at view position `row`.
    pub fn line_at(&self, row: usize) -> Option<usize> {
        self.projection
            .indexes
            .get(row)
            .map(|&idx| self.entries[idx].line)
    }

    pub fn column_widths(&self, available: usize) -> Vec<usize> {
        let ideal = ideal_widths(&self.headers(), &self.display_rows());
        allocate_widths(&ideal, available, self.has_marker())
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    pub fn filter_error(&self) -> Option<&str> {
        self.projection.filter_error.as_deref()
    }

    pub fn marked_lines(&self) -> Vec<usize> {
        self.marked.iter().copied().collect()
    }

    pub fn marked_count(&self) -> usize {
        self.marked.len()
    }

    pub fn total_count(&self) -> usize {
        self.entries.len()
    }

    pub fn visible_count(&self) -> usize {
        self.projection.indexes.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 1-based position of the selected row in the view, 0 when empty.
    pub fn selected_position(&self) -> usize {
        if self.visible_count() == 0 {
            0
        } else {
            self.cursor + 1
        }
    }

    fn rebuild(&mut self) {
        let selected = self.selected_line();
        self.projection = project(&self.entries, &self.columns, &self.filter, self.sort);
        if let Some(line) = selected {
            if let Some(pos) = (0..self.visible_count()).find(|&row| self.line_at(row) == Some(line)) {
                self.cursor = pos;
            }
        }
        self.clamp_cursor();
    }

    fn clamp_cursor(&mut self) {
        self.cursor = self.cursor.min(self.visible_count().saturating_sub(1));
    }
}
