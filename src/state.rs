//! Which screen is active and what each key does on it.
//!
//! [`dispatch`] maps a key to a [`Command`] for the current [`ViewState`];
//! the app executes the command and then moves to
//! [`ViewState::after`] if the command was carried out.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewState {
    #[default]
    Table,
    EditColumns,
    EditFilter,
    Prompt,
    Detail,
    EditFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    Up,
    Down,
    PageUp,
    PageDown,
    Top,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    None,
    Quit,
    OpenColumns,
    OpenFilter,
    OpenPrompt,
    OpenDetail,
    CloseDetail,
    OpenEdit,
    ToggleMark,
    ToggleMarkedOnly,
    Delete,
    RequestWrite,
    ClearMarks,
    MarkAllVisible,
    /// Zero-based column index
    Sort(usize),
    ShowVersion,
    Move(Movement),
    /// Scroll the detail text
    Scroll(Movement),
    Submit,
    Cancel,
    NextField,
    PrevField,
    /// Handed to the focused text input
    Input(KeyEvent),
}

/// Answer to the write confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirm,
    Cancel,
}

impl ViewState {
    /// State after `command` was carried out in this state.
    pub fn after(self, command: &Command) -> ViewState {
        use ViewState::*;
        match (self, command) {
            (Table, Command::OpenColumns) => EditColumns,
            (Table, Command::OpenFilter) => EditFilter,
            (Table, Command::OpenPrompt) => Prompt,
            (Table, Command::OpenDetail) => Detail,
            (Table | Detail, Command::OpenEdit) => EditFields,
            (Detail, Command::CloseDetail) => Table,
            // the prompt stays open until the assistant answers
            (Prompt, Command::Cancel) => Table,
            (EditColumns | EditFilter | EditFields, Command::Submit | Command::Cancel) => Table,
            (state, _) => state,
        }
    }

    pub fn is_text_input(self) -> bool {
        matches!(
            self,
            ViewState::EditColumns
                | ViewState::EditFilter
                | ViewState::Prompt
                | ViewState::EditFields
        )
    }
}

fn is_ctrl(key: &KeyEvent, c: char) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(c)
}

fn sort_digit(code: KeyCode) -> Option<usize> {
    match code {
        KeyCode::Char(c @ '1'..='9') => c.to_digit(10).map(|d| d as usize - 1),
        _ => None,
    }
}

fn movement(code: KeyCode) -> Option<Movement> {
    match code {
        KeyCode::Up | KeyCode::Char('k') => Some(Movement::Up),
        KeyCode::Down | KeyCode::Char('j') => Some(Movement::Down),
        KeyCode::PageUp => Some(Movement::PageUp),
        KeyCode::PageDown => Some(Movement::PageDown),
        KeyCode::Home => Some(Movement::Top),
        KeyCode::End => Some(Movement::Bottom),
        _ => None,
    }
}

/// Keys shared by the table and the detail view.
fn record_command(key: &KeyEvent) -> Option<Command> {
    if is_ctrl(key, 'a') {
        return Some(Command::MarkAllVisible);
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return None;
    }
    let command = match key.code {
        KeyCode::Char('e' | 'E') => Command::OpenEdit,
        KeyCode::Char(' ') => Command::ToggleMark,
        KeyCode::Char('m' | 'M') => Command::ToggleMarkedOnly,
        KeyCode::Char('x' | 'X') => Command::Delete,
        KeyCode::Char('w' | 'W') => Command::RequestWrite,
        KeyCode::Char('v' | 'V') => Command::ShowVersion,
        KeyCode::Char('q') => Command::Quit,
        code => Command::Sort(sort_digit(code)?),
    };
    Some(command)
}

/// The command `key` stands for in `state`.
pub fn dispatch(state: ViewState, key: &KeyEvent) -> Command {
    if is_ctrl(key, 'c') {
        return Command::Quit;
    }

    match state {
        ViewState::Table => {
            if let Some(command) = record_command(key) {
                return command;
            }
            if let Some(m) = movement(key.code) {
                return Command::Move(m);
            }
            match key.code {
                KeyCode::Char('c') => Command::OpenColumns,
                KeyCode::Char('f') => Command::OpenFilter,
                KeyCode::Char('p' | 'P') => Command::OpenPrompt,
                KeyCode::Char('d' | 'D') => Command::OpenDetail,
                KeyCode::Esc => Command::ClearMarks,
                _ => Command::None,
            }
        }
        ViewState::Detail => match key.code {
            KeyCode::Esc | KeyCode::Char('d' | 'D') => Command::CloseDetail,
            code => record_command(key)
                .or_else(|| movement(code).map(Command::Scroll))
                .unwrap_or(Command::None),
        },
        ViewState::EditFields => match key.code {
            KeyCode::Enter => Command::Submit,
            KeyCode::Esc => Command::Cancel,
            KeyCode::Tab => Command::NextField,
            KeyCode::BackTab => Command::PrevField,
            _ => Command::Input(*key),
        },
        ViewState::EditColumns | ViewState::EditFilter | ViewState::Prompt => match key.code {
            KeyCode::Enter => Command::Submit,
            KeyCode::Esc => Command::Cancel,
            _ => Command::Input(*key),
        },
    }
}

/// Reading of a key while a write is waiting for confirmation. Other keys
/// are ignored.
pub fn dispatch_confirmation(key: &KeyEvent) -> Option<Confirmation> {
    match key.code {
        KeyCode::Char('y' | 'Y') | KeyCode::Enter => Some(Confirmation::Confirm),
        KeyCode::Char('n' | 'N') | KeyCode::Esc => Some(Confirmation::Cancel),
        _ => None,
    }
}

const NBSP: char = '\u{a0}';

/// Filter text as typed: non-breaking spaces become spaces and single
/// quotes become double quotes.
pub fn sanitize_filter(raw: &str) -> String {
    raw.replace(NBSP, " ").replace('\'', "\"")
}

/// Column list as typed: comma separated, trimmed, empty parts dropped.
pub fn parse_columns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|column| !column.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn sanitize_prompt(raw: &str) -> String {
    raw.replace(NBSP, " ").trim().to_string()
}

pub fn sanitize_edit_value(raw: &str) -> String {
    raw.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn test_table_keys() {
        let t = ViewState::Table;
        assert_eq!(dispatch(t, &key(KeyCode::Char('c'))), Command::OpenColumns);
        assert_eq!(dispatch(t, &key(KeyCode::Char('f'))), Command::OpenFilter);
        assert_eq!(dispatch(t, &key(KeyCode::Char('P'))), Command::OpenPrompt);
        assert_eq!(dispatch(t, &key(KeyCode::Char('d'))), Command::OpenDetail);
        assert_eq!(dispatch(t, &key(KeyCode::Char(' '))), Command::ToggleMark);
        assert_eq!(dispatch(t, &key(KeyCode::Esc)), Command::ClearMarks);
        assert_eq!(dispatch(t, &ctrl('a')), Command::MarkAllVisible);
        assert_eq!(dispatch(t, &key(KeyCode::Char('1'))), Command::Sort(0));
        assert_eq!(dispatch(t, &key(KeyCode::Char('9'))), Command::Sort(8));
        assert_eq!(dispatch(t, &key(KeyCode::Char('0'))), Command::None);
        assert_eq!(dispatch(t, &key(KeyCode::Char('j'))), Command::Move(Movement::Down));
        assert_eq!(dispatch(t, &key(KeyCode::End)), Command::Move(Movement::Bottom));
        assert_eq!(dispatch(t, &key(KeyCode::Char('q'))), Command::Quit);
        assert_eq!(dispatch(t, &ctrl('c')), Command::Quit);
    }

    #[test]
    fn test_detail_keys() {
        let d = ViewState::Detail;
        assert_eq!(dispatch(d, &key(KeyCode::Esc)), Command::CloseDetail);
        assert_eq!(dispatch(d, &key(KeyCode::Char('D'))), Command::CloseDetail);
        assert_eq!(dispatch(d, &key(KeyCode::Char('x'))), Command::Delete);
        assert_eq!(dispatch(d, &key(KeyCode::Char('3'))), Command::Sort(2));
        assert_eq!(dispatch(d, &key(KeyCode::Down)), Command::Scroll(Movement::Down));
        assert_eq!(dispatch(d, &key(KeyCode::Char('c'))), Command::None);
    }

    #[test]
    fn test_input_states_forward_keys() {
        for state in [ViewState::EditColumns, ViewState::EditFilter, ViewState::Prompt] {
            assert_eq!(dispatch(state, &key(KeyCode::Enter)), Command::Submit);
            assert_eq!(dispatch(state, &key(KeyCode::Esc)), Command::Cancel);
            let q = key(KeyCode::Char('q'));
            assert_eq!(dispatch(state, &q), Command::Input(q));
        }
        let e = ViewState::EditFields;
        assert_eq!(dispatch(e, &key(KeyCode::Tab)), Command::NextField);
        assert_eq!(dispatch(e, &key(KeyCode::BackTab)), Command::PrevField);
        assert_eq!(dispatch(e, &ctrl('c')), Command::Quit);
    }

    #[test]
    fn test_transitions() {
        use ViewState::*;
        assert_eq!(Table.after(&Command::OpenFilter), EditFilter);
        assert_eq!(EditFilter.after(&Command::Submit), Table);
        assert_eq!(Prompt.after(&Command::Submit), Prompt);
        assert_eq!(Prompt.after(&Command::Cancel), Table);
        assert_eq!(Detail.after(&Command::OpenEdit), EditFields);
        assert_eq!(Detail.after(&Command::CloseDetail), Table);
        assert_eq!(Detail.after(&Command::Delete), Detail);
        assert_eq!(Table.after(&Command::CloseDetail), Table);
        assert_eq!(EditFields.after(&Command::Cancel), Table);
    }

    #[test]
    fn test_confirmation_keys() {
        assert_eq!(dispatch_confirmation(&key(KeyCode::Char('Y'))), Some(Confirmation::Confirm));
        assert_eq!(dispatch_confirmation(&key(KeyCode::Enter)), Some(Confirmation::Confirm));
        assert_eq!(dispatch_confirmation(&key(KeyCode::Char('n'))), Some(Confirmation::Cancel));
        assert_eq!(dispatch_confirmation(&key(KeyCode::Esc)), Some(Confirmation::Cancel));
        assert_eq!(dispatch_confirmation(&key(KeyCode::Char('x'))), None);
    }

    #[test]
    fn test_sanitizers() {
        assert_eq!(sanitize_filter(".a ==\u{a0}'x'"), ".a == \"x\"");
        assert_eq!(parse_columns(" .a , .b.c ,, "), vec![".a", ".b.c"]);
        assert!(parse_columns("  ").is_empty());
        assert_eq!(sanitize_prompt("\u{a0} only french\u{a0}"), "only french");
        assert_eq!(sanitize_edit_value("  42 "), "42");
    }
}
