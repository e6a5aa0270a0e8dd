use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget},
};

/// Key hints on the table screen.
pub const TABLE_CONTROLS: [(&str, &str); 11] = [
    ("d", "Details"),
    ("f", "Filter"),
    ("c", "Columns"),
    ("e", "Edit"),
    ("Space", "Mark"),
    ("m", "Marked only"),
    ("Ctrl+A", "Mark all"),
    ("x", "Delete"),
    ("w", "Write"),
    ("1-9", "Sort"),
    ("q", "Quit"),
];

pub const DETAIL_CONTROLS: [(&str, &str); 6] = [
    ("Esc", "Back"),
    ("e", "Edit"),
    ("Space", "Mark"),
    ("x", "Delete"),
    ("w", "Write"),
    ("q", "Quit"),
];

pub const INPUT_CONTROLS: [(&str, &str); 2] = [("Enter", "Apply"), ("Esc", "Cancel")];

pub const EDIT_CONTROLS: [(&str, &str); 4] = [
    ("Enter", "Save"),
    ("Esc", "Cancel"),
    ("Tab", "Next"),
    ("Shift+Tab", "Previous"),
];

/// Bottom bar: key hints on the left, the position in the view on the right.
pub struct Controls<'a> {
    pub controls: &'a [(&'a str, &'a str)],
    /// Shown after the other hints when the assistant is configured.
    pub assistant: bool,
    pub marked: usize,
    pub position: usize,
    pub visible: usize,
    pub total: usize,
    pub dimmed: bool,
    pub key_color: Color,
    pub bar_color: Color,
}

impl<'a> Controls<'a> {
    pub fn new(controls: &'a [(&'a str, &'a str)]) -> Self {
        Self {
            controls,
            assistant: false,
            marked: 0,
            position: 0,
            visible: 0,
            total: 0,
            dimmed: false,
            key_color: Color::Cyan,
            bar_color: Color::Indexed(236),
        }
    }

    pub fn with_counts(mut self, position: usize, visible: usize, total: usize) -> Self {
        self.position = position;
        self.visible = visible;
        self.total = total;
        self
    }

    pub fn with_marked(mut self, marked: usize) -> Self {
        self.marked = marked;
        self
    }

    pub fn with_assistant(mut self, assistant: bool) -> Self {
        self.assistant = assistant;
        self
    }

    pub fn with_dimmed(mut self, dimmed: bool) -> Self {
        self.dimmed = dimmed;
        self
    }

    pub fn with_colors(mut self, key_color: Color, bar_color: Color) -> Self {
        self.key_color = key_color;
        self.bar_color = bar_color;
        self
    }

    /// `3 / 40 (120 total)`, with `–` for the position of an empty view.
    pub fn position_text(&self) -> String {
        let current = if self.position > 0 {
            self.position.to_string()
        } else {
            "–".to_string()
        };
        format!("{} / {} ({} total)", current, self.visible, self.total)
    }

    fn hint_spans(&self) -> Vec<Span<'a>> {
        let key_style = if self.dimmed {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
                .fg(self.key_color)
                .add_modifier(Modifier::BOLD)
        };
        let label_style = if self.dimmed {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };

        let mut hints: Vec<(String, String)> = self
            .controls
            .iter()
            .map(|(key, action)| (key.to_string(), action.to_string()))
            .collect();
        if self.assistant {
            hints.push(("p".to_string(), "Ask assistant".to_string()));
        }
        if self.marked > 0 {
            hints.push((
                "Esc".to_string(),
                format!("Clear selection of {} lines", self.marked),
            ));
        }

        hints
            .into_iter()
            .flat_map(|(key, action)| {
                [
                    Span::styled(format!(" {key} "), key_style),
                    Span::styled(format!("{action} "), label_style),
                ]
            })
            .collect()
    }
}

impl Widget for &Controls<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let position = self.position_text();
        let layout = Layout::new(
            Direction::Horizontal,
            [
                Constraint::Fill(1),
                Constraint::Length(position.chars().count() as u16 + 2),
            ],
        )
        .split(area);

        let base_style = Style::default().bg(self.bar_color);
        Paragraph::new(Line::from(self.hint_spans()))
            .style(base_style)
            .render(layout[0], buf);
        Paragraph::new(position)
            .style(base_style.fg(if self.dimmed {
                Color::DarkGray
            } else {
                Color::White
            }))
            .right_aligned()
            .render(layout[1], buf);
    }
}
