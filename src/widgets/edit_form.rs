//! Form with one input per column, used to edit one entry or many at once.

use crossterm::event::KeyEvent;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Padding, Paragraph, Widget};

use super::text_input::TextInput;
use crate::config::Theme;
use crate::state::sanitize_edit_value;

/// Rows one field takes: label, input, gap.
const FIELD_ROWS: u16 = 3;

pub struct EditForm {
    pub targets: Vec<usize>,
    pub single_mode: bool,
    columns: Vec<String>,
    inputs: Vec<TextInput>,
    focus: usize,
}

impl EditForm {
    /// One field per column, prefilled with `prefill` when given.
    pub fn new(
        columns: &[String],
        prefill: Option<Vec<String>>,
        targets: Vec<usize>,
        single_mode: bool,
        theme: &Theme,
    ) -> Self {
        let mut prefill = prefill.unwrap_or_default().into_iter();
        let inputs = columns
            .iter()
            .map(|column| {
                let mut input = TextInput::new()
                    .with_placeholder(format!("Enter value for {column}"))
                    .with_theme(theme);
                if let Some(value) = prefill.next() {
                    input.set_value(value);
                }
                input
            })
            .collect();

        let mut form = Self {
            targets,
            single_mode,
            columns: columns.to_vec(),
            inputs,
            focus: 0,
        };
        form.refocus();
        form
    }

    fn refocus(&mut self) {
        for (idx, input) in self.inputs.iter_mut().enumerate() {
            input.set_focused(idx == self.focus);
        }
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn focus_next(&mut self) {
        if !self.inputs.is_empty() {
            self.focus = (self.focus + 1) % self.inputs.len();
            self.refocus();
        }
    }

    pub fn focus_prev(&mut self) {
        if !self.inputs.is_empty() {
            self.focus = (self.focus + self.inputs.len() - 1) % self.inputs.len();
            self.refocus();
        }
    }

    pub fn handle_key(&mut self, key: &KeyEvent) {
        if let Some(input) = self.inputs.get_mut(self.focus) {
            input.handle_key(key);
        }
    }

    /// Column paths with their trimmed values, in column order.
    pub fn values(&self) -> Vec<(String, String)> {
        self.columns
            .iter()
            .zip(&self.inputs)
            .map(|(column, input)| (column.clone(), sanitize_edit_value(input.value())))
            .collect()
    }

    pub fn title(&self) -> String {
        match (self.single_mode, self.targets.as_slice()) {
            (true, [line]) => format!("Edit Single Entry (Line {line})"),
            _ => format!("Edit Multiple Entries ({} lines)", self.targets.len()),
        }
    }
}

pub struct EditFormView<'a> {
    pub form: &'a EditForm,
    pub border: Color,
    pub label: Color,
}

impl Widget for EditFormView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(self.form.title())
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.border))
            .padding(Padding::horizontal(1));
        let inner = block.inner(area);
        block.render(area, buf);

        // keep the focused field on screen
        let per_page = (inner.height / FIELD_ROWS).max(1) as usize;
        let first = self.form.focus.saturating_sub(per_page - 1);

        let constraints: Vec<Constraint> = (0..per_page)
            .map(|_| Constraint::Length(FIELD_ROWS))
            .collect();
        let slots = Layout::new(Direction::Vertical, constraints).split(inner);

        let fields = self
            .form
            .columns
            .iter()
            .zip(&self.form.inputs)
            .skip(first)
            .zip(slots.iter());
        for ((column, input), slot) in fields {
            let [label_area, input_area, _] = Layout::new(
                Direction::Vertical,
                [Constraint::Length(1), Constraint::Length(1), Constraint::Fill(1)],
            )
            .areas(*slot);
            let label_style = if input.is_focused() {
                Style::default().fg(self.label).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(self.label)
            };
            Paragraph::new(Line::styled(format!("{column}:"), label_style))
                .render(label_area, buf);
            input.render(input_area, buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode, KeyModifiers};

    fn cols() -> Vec<String> {
        vec![".a".to_string(), ".b".to_string()]
    }

    #[test]
    fn test_prefill_and_values() {
        let form = EditForm::new(
            &cols(),
            Some(vec!["  1 ".to_string(), String::new()]),
            vec![4],
            true,
            &Theme::default(),
        );
        assert_eq!(form.title(), "Edit Single Entry (Line 4)");
        assert_eq!(
            form.values(),
            vec![
                (".a".to_string(), "1".to_string()),
                (".b".to_string(), String::new())
            ]
        );
    }

    #[test]
    fn test_focus_wraps_and_typing_goes_to_focused_field() {
        let mut form = EditForm::new(&cols(), None, vec![1, 2], false, &Theme::default());
        assert_eq!(form.title(), "Edit Multiple Entries (2 lines)");
        form.focus_prev();
        assert_eq!(form.focus(), 1);
        form.handle_key(&KeyEvent::new(KeyCode::Char('z'), KeyModifiers::NONE));
        form.focus_next();
        assert_eq!(form.focus(), 0);
        assert_eq!(form.values()[1].1, "z");
        assert_eq!(form.values()[0].1, "");
    }
}
