use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    widgets::Widget,
};
use tui_textarea::{CursorMove, Input, Key, TextArea};

use crate::config::Theme;

/// What a key did to a [`TextInput`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextInputEvent {
    None,
    Changed,
}

/// Single-line text input wrapping tui-textarea. Enter and Esc are left to
/// the caller; every other key edits the text.
pub struct TextInput {
    textarea: TextArea<'static>,
    placeholder: String,
    text_color: Option<Color>,
    placeholder_color: Option<Color>,
    focused: bool,
}

impl TextInput {
    pub fn new() -> Self {
        let mut widget = Self {
            textarea: TextArea::default(),
            placeholder: String::new(),
            text_color: None,
            placeholder_color: None,
            focused: false,
        };
        widget.apply_style();
        widget
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self.apply_style();
        self
    }

    pub fn with_theme(mut self, theme: &Theme) -> Self {
        self.text_color = Some(theme.get("text_primary"));
        self.placeholder_color = Some(theme.get("dimmed"));
        self.apply_style();
        self
    }

    /// Style has to be reapplied whenever the textarea is recreated.
    fn apply_style(&mut self) {
        let mut style = Style::default();
        if let Some(color) = self.text_color {
            style = style.fg(color);
        }
        self.textarea.set_style(style);
        self.textarea.set_cursor_line_style(Style::default());
        self.textarea.set_placeholder_text(self.placeholder.clone());
        if let Some(color) = self.placeholder_color {
            self.textarea
                .set_placeholder_style(Style::default().fg(color));
        }
        self.apply_cursor_style();
    }

    fn apply_cursor_style(&mut self) {
        if self.focused {
            self.textarea
                .set_cursor_style(Style::default().add_modifier(Modifier::REVERSED));
        } else {
            // same style as the text hides the cursor
            let style = self.textarea.style();
            self.textarea.set_cursor_style(style);
        }
    }

    pub fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
        self.apply_cursor_style();
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn value(&self) -> &str {
        self.textarea
            .lines()
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Replace the text and put the cursor at its end
    pub fn set_value(&mut self, value: impl Into<String>) {
        let single_line = value.into().replace(['\n', '\r'], " ");
        self.textarea = TextArea::new(vec![single_line]);
        self.apply_style();
        self.textarea.move_cursor(CursorMove::End);
    }

    pub fn clear(&mut self) {
        self.set_value("");
    }

    pub fn is_empty(&self) -> bool {
        self.value().is_empty()
    }

    pub fn handle_key(&mut self, event: &KeyEvent) -> TextInputEvent {
        if matches!(event.code, KeyCode::Enter | KeyCode::Esc) {
            return TextInputEvent::None;
        }
        let input = key_event_to_input(event);
        if input.key == Key::Null {
            return TextInputEvent::None;
        }
        if self.textarea.input(input) {
            TextInputEvent::Changed
        } else {
            TextInputEvent::None
        }
    }
}

fn key_event_to_input(event: &KeyEvent) -> Input {
    let key = match event.code {
        KeyCode::Char(c) => Key::Char(c),
        KeyCode::Backspace => Key::Backspace,
        KeyCode::Delete => Key::Delete,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        KeyCode::Home => Key::Home,
        KeyCode::End => Key::End,
        // single line: vertical movement and tabs do nothing
        _ => Key::Null,
    };

    Input {
        key,
        ctrl: event.modifiers.contains(KeyModifiers::CONTROL),
        alt: event.modifiers.contains(KeyModifiers::ALT),
        shift: event.modifiers.contains(KeyModifiers::SHIFT),
    }
}

impl Default for TextInput {
    fn default() -> Self {
        Self::new()
    }
}

impl Widget for &TextInput {
    fn render(self, area: Rect, buf: &mut ratatui::buffer::Buffer) {
        self.textarea.render(area, buf);

        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                let cell = &mut buf[(x, y)];
                let style = cell.style().remove_modifier(Modifier::UNDERLINED);
                cell.set_style(style);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_str(input: &mut TextInput, text: &str) {
        for c in text.chars() {
            input.handle_key(&KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
        }
    }

    #[test]
    fn test_typing_and_backspace() {
        let mut input = TextInput::new();
        assert!(input.is_empty());
        type_str(&mut input, ".abc");
        assert_eq!(input.value(), ".abc");
        input.handle_key(&KeyEvent::new(KeyCode::Backspace, KeyModifiers::NONE));
        assert_eq!(input.value(), ".ab");
    }

    #[test]
    fn test_set_value_appends_at_end() {
        let mut input = TextInput::new();
        input.set_value(".a,\n.b");
        assert_eq!(input.value(), ".a, .b");
        type_str(&mut input, "c");
        assert_eq!(input.value(), ".a, .bc");
        input.clear();
        assert!(input.is_empty());
    }

    #[test]
    fn test_enter_does_not_insert_newline() {
        let mut input = TextInput::new();
        type_str(&mut input, "x");
        assert_eq!(
            input.handle_key(&KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE)),
            TextInputEvent::None
        );
        assert_eq!(input.value(), "x");
    }
}
