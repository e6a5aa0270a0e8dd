//! Detail panel: the selected record as pretty-printed JSON.

use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Padding, Paragraph, Widget};

use crate::state::Movement;
use crate::store::Entry;

/// Scroll position of the detail text. The position is reset whenever a
/// different line is shown.
#[derive(Debug, Default, Clone)]
pub struct DetailState {
    pub scroll: usize,
    pub line: Option<usize>,
    /// Body rows that fit, known after the first render.
    pub page_rows: usize,
    content_rows: usize,
}

impl DetailState {
    /// Point the panel at `entry`, back to the top if it is a different one.
    pub fn show(&mut self, entry: Option<&Entry>) {
        let line = entry.map(|e| e.line);
        if line != self.line {
            self.scroll = 0;
        }
        self.line = line;
        self.content_rows = entry.map(|e| render_json(e).lines().count()).unwrap_or(0);
    }

    pub fn scroll(&mut self, movement: Movement) {
        let page = self.page_rows.max(1);
        let max = self.content_rows.saturating_sub(page);
        self.scroll = match movement {
            Movement::Up => self.scroll.saturating_sub(1),
            Movement::Down => self.scroll + 1,
            Movement::PageUp => self.scroll.saturating_sub(page),
            Movement::PageDown => self.scroll + page,
            Movement::Top => 0,
            Movement::Bottom => max,
        }
        .min(max);
    }
}

/// Entry data with two-space indentation.
pub fn render_json(entry: &Entry) -> String {
    serde_json::to_string_pretty(&entry.data)
        .unwrap_or_else(|e| format!("Error formatting entry: {e}"))
}

pub struct Detail<'a> {
    pub entry: Option<&'a Entry>,
    pub border: Color,
    pub label: Color,
}

impl Detail<'_> {
    pub fn render_stateful(self, area: Rect, buf: &mut Buffer, state: &mut DetailState) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.border))
            .padding(Padding::horizontal(1));
        let inner = block.inner(area);
        block.render(area, buf);

        let Some(entry) = self.entry else {
            Paragraph::new("No entry selected.").render(inner, buf);
            return;
        };

        // label plus a blank line
        state.page_rows = inner.height.saturating_sub(2) as usize;
        state.show(Some(entry));

        let mut lines = vec![
            Line::from(Span::styled(
                format!("Line {}  (d or Esc to return to the table)", entry.line),
                Style::default().fg(self.label).add_modifier(Modifier::ITALIC),
            )),
            Line::default(),
        ];
        lines.extend(
            render_json(entry)
                .lines()
                .skip(state.scroll)
                .map(|line| Line::from(line.to_string())),
        );
        Paragraph::new(lines).render(inner, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scroll_is_bounded_and_resets() {
        let first = Entry::new(json!({"a": 1, "b": 2, "c": 3, "d": 4}), 1);
        let mut state = DetailState {
            page_rows: 3,
            ..Default::default()
        };
        state.show(Some(&first));
        // six lines of pretty JSON, three visible
        state.scroll(Movement::Bottom);
        assert_eq!(state.scroll, 3);
        state.scroll(Movement::Down);
        assert_eq!(state.scroll, 3);
        state.scroll(Movement::PageUp);
        assert_eq!(state.scroll, 0);
        state.scroll(Movement::Down);
        state.show(Some(&first));
        assert_eq!(state.scroll, 1);

        let second = Entry::new(json!({}), 2);
        state.show(Some(&second));
        assert_eq!(state.scroll, 0);
    }
}
