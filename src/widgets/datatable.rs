use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Cell, Padding, Paragraph, Row, StatefulWidget, Table, TableState, Widget},
};

use crate::config::Theme;
use crate::table::TableModel;

/// Gap between two columns.
const COLUMN_SPACING: u16 = 1;

/// Scroll position of the record table between frames.
#[derive(Debug, Default)]
pub struct DataTableState {
    pub table_state: TableState,
    /// First view row drawn.
    pub offset: usize,
    /// Body rows that fit, known after the first render.
    pub visible_rows: usize,
}

impl DataTableState {
    /// Move the window so that `cursor` is inside it.
    pub fn follow(&mut self, cursor: usize, total: usize) {
        if self.visible_rows == 0 {
            return;
        }
        if cursor < self.offset {
            self.offset = cursor;
        } else if cursor >= self.offset + self.visible_rows {
            self.offset = cursor + 1 - self.visible_rows;
        }
        let max_offset = total.saturating_sub(self.visible_rows);
        self.offset = self.offset.min(max_offset);
        self.table_state
            .select((total > 0).then(|| cursor - self.offset));
    }
}

pub struct DataTable<'a> {
    model: &'a TableModel,
    header_fg: Color,
    border: Color,
    marked_fg: Color,
    selected: Style,
    empty_text: &'a str,
}

impl<'a> DataTable<'a> {
    pub fn new(model: &'a TableModel, theme: &Theme) -> Self {
        let selected = match theme.get_optional("table_selected") {
            Some(Color::Reset) | None => Style::default().add_modifier(Modifier::REVERSED),
            Some(color) => Style::default().bg(color).fg(theme.get("text_inverse")),
        };
        Self {
            model,
            header_fg: theme.get("table_header"),
            border: theme.get("table_border"),
            marked_fg: theme.get("marked_row"),
            selected,
            empty_text: "No entries",
        }
    }

    pub fn with_empty_text(mut self, text: &'a str) -> Self {
        self.empty_text = text;
        self
    }
}

impl StatefulWidget for DataTable<'_> {
    type State = DataTableState;

    fn render(self, area: Rect, buf: &mut Buffer, state: &mut Self::State) {
        let block = Block::default()
            .borders(Borders::TOP)
            .border_style(Style::default().fg(self.border));
        let inner = block.inner(area);
        block.render(area, buf);

        // one line for the header
        state.visible_rows = inner.height.saturating_sub(1) as usize;

        if self.model.visible_count() == 0 {
            Paragraph::new(self.empty_text)
                .centered()
                .style(Style::default().fg(Color::DarkGray))
                .block(Block::default().padding(Padding::top(inner.height / 2)))
                .render(inner, buf);
            return;
        }

        state.follow(self.model.cursor(), self.model.visible_count());

        let headers = self.model.headers();
        let spacing = COLUMN_SPACING as usize * headers.len().saturating_sub(1);
        let available = (inner.width as usize).saturating_sub(spacing);
        let widths: Vec<Constraint> = self
            .model
            .column_widths(available)
            .into_iter()
            .map(|w| Constraint::Length(w.min(u16::MAX as usize) as u16))
            .collect();

        let header = Row::new(headers.into_iter().map(|title| Cell::from(Line::from(title))))
            .style(
                Style::default()
                    .fg(self.header_fg)
                    .add_modifier(Modifier::BOLD),
            );

        let rows: Vec<Row> = self
            .model
            .display_rows()
            .into_iter()
            .enumerate()
            .skip(state.offset)
            .take(state.visible_rows)
            .map(|(pos, cells)| {
                let marked = self
                    .model
                    .line_at(pos)
                    .is_some_and(|line| self.model.is_marked(line));
                let style = if marked {
                    Style::default().fg(self.marked_fg)
                } else {
                    Style::default()
                };
                Row::new(cells.into_iter().map(Cell::from)).style(style)
            })
            .collect();

        StatefulWidget::render(
            Table::new(rows, widths)
                .column_spacing(COLUMN_SPACING)
                .header(header)
                .row_highlight_style(self.selected),
            inner,
            buf,
            &mut state.table_state,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follow_keeps_cursor_in_window() {
        let mut state = DataTableState {
            visible_rows: 5,
            ..Default::default()
        };
        state.follow(7, 20);
        assert_eq!(state.offset, 3);
        assert_eq!(state.table_state.selected(), Some(4));
        state.follow(2, 20);
        assert_eq!(state.offset, 2);
        assert_eq!(state.table_state.selected(), Some(0));
        state.follow(3, 4);
        assert_eq!(state.offset, 0);
        assert_eq!(state.table_state.selected(), Some(3));
    }
}
