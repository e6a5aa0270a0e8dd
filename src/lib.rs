use crossterm::event::KeyEvent;
use log::{debug, info, warn};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Padding, Paragraph, StatefulWidget};
use ratatui::{buffer::Buffer, layout::Rect, widgets::Widget};
use std::path::{Path, PathBuf};
use std::sync::{mpsc::Sender, Arc};

pub mod assistant;
pub mod config;
pub mod layout;
pub mod logging;
pub mod mutation;
pub mod projection;
pub mod query;
pub mod state;
pub mod store;
pub mod table;
pub mod widgets;

pub use assistant::{Assistant, AssistantError, CompletionProvider, FilterRequest};
pub use config::{AppConfig, ColorParser, ColumnStore, ConfigManager, Theme};
pub use cutl_cli::Args;
pub use state::ViewState;
pub use table::TableModel;

use assistant::anonymized_sample;
use state::{dispatch, dispatch_confirmation, Command, Confirmation, Movement};
use widgets::controls::{
    Controls, DETAIL_CONTROLS, EDIT_CONTROLS, INPUT_CONTROLS, TABLE_CONTROLS,
};
use widgets::datatable::{DataTable, DataTableState};
use widgets::detail::{Detail, DetailState};
use widgets::edit_form::{EditForm, EditFormView};
use widgets::text_input::TextInput;

/// Application name used for the config directory.
pub const APP_NAME: &str = "cutl";

#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Open(PathBuf),
    DoLoad(PathBuf), // Internal event to actually perform loading after UI update
    DoWrite,         // Internal event to write after the UI shows "Saving…"
    /// Reply of the assistant worker for request `generation`.
    AssistantReply {
        generation: u64,
        result: Result<String, AssistantError>,
    },
    Exit,
    Crash(String),
    Resize(u16, u16), // resized (width, height)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Ok,
    Error,
    Neutral,
}

/// One line of feedback under the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub text: String,
    pub kind: StatusKind,
    /// Cleared by the next key press.
    pub transient: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum LoadingState {
    #[default]
    Idle,
    Loading {
        file_path: PathBuf,
    },
}

impl LoadingState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadingState::Loading { .. })
    }
}

pub struct App {
    events: Sender<AppEvent>,
    path: Option<PathBuf>,
    table: TableModel,
    view: ViewState,
    table_state: DataTableState,
    detail_state: DetailState,
    input: TextInput,
    edit_form: Option<EditForm>,
    confirm_write: bool,
    status: Option<Status>,
    loading_state: LoadingState,
    assistant: Option<Arc<Assistant>>,
    /// Id of the latest assistant request; replies with another id are stale.
    generation: u64,
    waiting_for: Option<u64>,
    last_prompt: String,
    column_store: Option<ColumnStore>,
    theme: Theme,
}

impl App {
    /// An app with the default theme, no assistant and no column store.
    pub fn new(events: Sender<AppEvent>) -> App {
        Self::new_with_config(events, Theme::default(), None, None)
    }

    pub fn new_with_config(
        events: Sender<AppEvent>,
        theme: Theme,
        assistant: Option<Assistant>,
        column_store: Option<ColumnStore>,
    ) -> App {
        let input = TextInput::new().with_theme(&theme);
        App {
            events,
            path: None,
            table: TableModel::new(),
            view: ViewState::Table,
            table_state: DataTableState::default(),
            detail_state: DetailState::default(),
            input,
            edit_form: None,
            confirm_write: false,
            status: None,
            loading_state: LoadingState::Idle,
            assistant: assistant.map(Arc::new),
            generation: 0,
            waiting_for: None,
            last_prompt: String::new(),
            column_store,
            theme,
        }
    }

    pub fn table(&self) -> &TableModel {
        &self.table
    }

    pub fn view(&self) -> ViewState {
        self.view
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn input_value(&self) -> &str {
        self.input.value()
    }

    pub fn edit_form(&self) -> Option<&EditForm> {
        self.edit_form.as_ref()
    }

    pub fn is_confirming_write(&self) -> bool {
        self.confirm_write
    }

    pub fn is_waiting_for_assistant(&self) -> bool {
        self.waiting_for.is_some()
    }

    pub fn loading_state(&self) -> &LoadingState {
        &self.loading_state
    }

    fn set_status(&mut self, text: impl Into<String>, kind: StatusKind, transient: bool) {
        self.status = Some(Status {
            text: text.into(),
            kind,
            transient,
        });
    }

    fn file_name(&self) -> String {
        self.path
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn event(&mut self, event: &AppEvent) -> Option<AppEvent> {
        match event {
            AppEvent::Key(key) => self.key(key),
            AppEvent::Open(path) => {
                self.loading_state = LoadingState::Loading {
                    file_path: path.clone(),
                };
                Some(AppEvent::DoLoad(path.clone()))
            }
            AppEvent::DoLoad(path) => {
                self.load(path);
                None
            }
            AppEvent::DoWrite => {
                self.write();
                None
            }
            AppEvent::AssistantReply { generation, result } => {
                self.assistant_reply(*generation, result);
                None
            }
            _ => None,
        }
    }

    fn load(&mut self, path: &Path) {
        self.loading_state = LoadingState::Idle;
        let entries = match store::load_jsonl(path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to load {}: {}", path.display(), e);
                self.set_status(format!("Load failed: {e}"), StatusKind::Error, false);
                return;
            }
        };
        info!("Loaded {} entries from {}", entries.len(), path.display());
        self.path = Some(path.to_path_buf());

        let saved = match &self.column_store {
            Some(column_store) => column_store.columns_for(path).unwrap_or_else(|e| {
                warn!("Could not read saved columns: {}", e);
                None
            }),
            None => None,
        };
        self.table.set_entries(entries);
        if let Some(columns) = saved {
            debug!("Restoring saved columns {:?}", columns);
            self.table.set_columns(columns);
        }
        let name = self.file_name();
        self.set_status(name, StatusKind::Neutral, false);
    }

    fn write(&mut self) {
        let Some(path) = self.path.clone() else {
            return;
        };
        match store::write_jsonl(&path, self.table.entries()) {
            Ok(()) => {
                info!("Wrote {} entries to {}", self.table.total_count(), path.display());
                let name = self.file_name();
                self.set_status(format!("Saved: {name}"), StatusKind::Ok, true);
            }
            Err(e) => {
                warn!("Failed to write {}: {}", path.display(), e);
                self.set_status(format!("Save failed: {e}"), StatusKind::Error, true);
            }
        }
    }

    fn key(&mut self, key: &KeyEvent) -> Option<AppEvent> {
        if self.confirm_write {
            return match dispatch_confirmation(key)? {
                Confirmation::Confirm => {
                    self.confirm_write = false;
                    self.set_status("Saving…", StatusKind::Neutral, false);
                    Some(AppEvent::DoWrite)
                }
                Confirmation::Cancel => {
                    self.confirm_write = false;
                    self.set_status("Save cancelled", StatusKind::Neutral, true);
                    None
                }
            };
        }

        if self.status.as_ref().is_some_and(|status| status.transient) {
            self.status = None;
        }

        let command = dispatch(self.view, key);
        if self.loading_state.is_loading() && command != Command::Quit {
            return None;
        }

        let (accepted, event) = self.execute(&command);
        if accepted {
            let next = self.view.after(&command);
            if next != self.view {
                debug!("{:?} -> {:?}", self.view, next);
            }
            self.view = next;
            self.input.set_focused(self.view.is_text_input());
        }
        event
    }

    /// Carry out `command`. Returns whether the view may move on and an
    /// event to send.
    fn execute(&mut self, command: &Command) -> (bool, Option<AppEvent>) {
        match command {
            Command::None => (false, None),
            Command::Quit => (false, Some(AppEvent::Exit)),
            Command::OpenColumns => {
                self.open_input(self.table.columns().join(", "), "e.g. .id, .title, .tags[0]");
                (true, None)
            }
            Command::OpenFilter => {
                self.open_input(self.table.filter().to_string(), "e.g. .lang == \"fr\" and .score > 3");
                (true, None)
            }
            Command::OpenPrompt => {
                if self.assistant.is_none() {
                    self.set_status(
                        "AI filter unavailable (set OPENAI_API_KEY)",
                        StatusKind::Error,
                        true,
                    );
                    return (false, None);
                }
                self.open_input(self.last_prompt.clone(), "Describe the entries to keep");
                (true, None)
            }
            Command::OpenDetail => {
                let entry = self.table.selected_entry();
                if entry.is_none() {
                    return (false, None);
                }
                self.detail_state.show(entry);
                (true, None)
            }
            Command::CloseDetail => (true, None),
            Command::OpenEdit => (self.open_edit(), None),
            Command::ToggleMark => {
                self.table.toggle_mark_selected_and_move_down();
                self.follow_detail();
                (true, None)
            }
            Command::ToggleMarkedOnly => {
                self.table.toggle_marked_only();
                self.follow_detail();
                (true, None)
            }
            Command::Delete => {
                let removed = self.table.delete_marked_or_selected();
                debug!("Deleted {} entries", removed);
                if self.view == ViewState::Detail && self.table.visible_count() == 0 {
                    self.view = ViewState::Table;
                }
                self.follow_detail();
                (true, None)
            }
            Command::RequestWrite => {
                if self.path.is_none() {
                    return (false, None);
                }
                self.confirm_write = true;
                let name = self.file_name();
                self.set_status(
                    format!("Write changes to {name}? (y/N)"),
                    StatusKind::Neutral,
                    false,
                );
                (true, None)
            }
            Command::ClearMarks => (self.table.clear_marks(), None),
            Command::MarkAllVisible => {
                let added = self.table.mark_all_visible();
                if added > 0 {
                    self.set_status(
                        format!("Marked {added} visible entries"),
                        StatusKind::Ok,
                        true,
                    );
                } else {
                    self.set_status("All visible entries already marked", StatusKind::Neutral, true);
                }
                (true, None)
            }
            Command::Sort(column) => (self.table.sort_by(*column), None),
            Command::ShowVersion => {
                self.set_status(
                    format!("v{}", env!("CARGO_PKG_VERSION")),
                    StatusKind::Neutral,
                    true,
                );
                (true, None)
            }
            Command::Move(movement) => {
                self.move_cursor(*movement);
                (true, None)
            }
            Command::Scroll(movement) => {
                self.detail_state.scroll(*movement);
                (true, None)
            }
            Command::Submit => (self.submit(), None),
            Command::Cancel => {
                self.cancel();
                (true, None)
            }
            Command::NextField => {
                if let Some(form) = self.edit_form.as_mut() {
                    form.focus_next();
                }
                (true, None)
            }
            Command::PrevField => {
                if let Some(form) = self.edit_form.as_mut() {
                    form.focus_prev();
                }
                (true, None)
            }
            Command::Input(key) => {
                if self.view == ViewState::EditFields {
                    if let Some(form) = self.edit_form.as_mut() {
                        form.handle_key(key);
                    }
                } else if self.waiting_for.is_none() {
                    self.input.handle_key(key);
                }
                (true, None)
            }
        }
    }

    fn open_input(&mut self, value: String, placeholder: &str) {
        self.input = TextInput::new()
            .with_placeholder(placeholder)
            .with_theme(&self.theme);
        self.input.set_value(value);
    }

    fn open_edit(&mut self) -> bool {
        if self.table.columns().is_empty() {
            return false;
        }
        let Some((targets, single_mode)) = self.table.edit_targets() else {
            return false;
        };
        let prefill = if single_mode {
            self.table.selected_entry().map(|entry| {
                self.table
                    .columns()
                    .iter()
                    .map(|column| TableModel::column_value_for_edit(entry, column))
                    .collect()
            })
        } else {
            None
        };
        self.edit_form = Some(EditForm::new(
            self.table.columns(),
            prefill,
            targets,
            single_mode,
            &self.theme,
        ));
        true
    }

    fn move_cursor(&mut self, movement: Movement) {
        match movement {
            Movement::Up => self.table.move_up(1),
            Movement::Down => self.table.move_down(1),
            Movement::PageUp => self.table.page_up(),
            Movement::PageDown => self.table.page_down(),
            Movement::Top => self.table.move_to_top(),
            Movement::Bottom => self.table.move_to_bottom(),
        }
    }

    fn follow_detail(&mut self) {
        if self.view == ViewState::Detail {
            self.detail_state.show(self.table.selected_entry());
        }
    }

    fn submit(&mut self) -> bool {
        match self.view {
            ViewState::EditColumns => {
                let columns = state::parse_columns(self.input.value());
                self.table.set_columns(columns);
                self.save_columns();
                true
            }
            ViewState::EditFilter => {
                let filter = state::sanitize_filter(self.input.value());
                debug!("Applying filter {:?}", filter);
                self.table.set_filter(filter);
                if let Some(error) = self.table.filter_error().map(str::to_string) {
                    self.set_status(format!("Filter error: {error}"), StatusKind::Error, true);
                }
                true
            }
            ViewState::Prompt => self.submit_prompt(),
            ViewState::EditFields => {
                if let Some(form) = self.edit_form.take() {
                    self.apply_form(&form);
                }
                true
            }
            ViewState::Table | ViewState::Detail => false,
        }
    }

    fn save_columns(&mut self) {
        let (Some(column_store), Some(path)) = (&self.column_store, &self.path) else {
            return;
        };
        if let Err(e) = column_store.save_columns(path, self.table.columns()) {
            warn!("Failed to save columns for {}: {}", path.display(), e);
        }
    }

    fn apply_form(&mut self, form: &EditForm) {
        let values = form.values();
        match self
            .table
            .apply_edits(&form.targets, &values, form.single_mode)
        {
            Ok(updated) => {
                let text = if form.single_mode && form.targets.len() == 1 {
                    "Entry updated".to_string()
                } else {
                    format!("Updated {updated} entries")
                };
                self.set_status(text, StatusKind::Ok, true);
            }
            Err(e) => {
                warn!("Edit failed: {}", e);
                self.set_status(format!("Edit failed: {e}"), StatusKind::Error, true);
            }
        }
    }

    fn cancel(&mut self) {
        self.edit_form = None;
        if self.view == ViewState::Prompt {
            self.last_prompt = state::sanitize_prompt(self.input.value());
            if let Some(generation) = self.waiting_for.take() {
                debug!("Abandoned assistant request {}", generation);
            }
        }
    }

    fn submit_prompt(&mut self) -> bool {
        if self.waiting_for.is_some() {
            return false;
        }
        let prompt = state::sanitize_prompt(self.input.value());
        self.last_prompt = prompt.clone();
        if prompt.is_empty() {
            self.set_status("Prompt cannot be empty", StatusKind::Error, true);
            return false;
        }
        let Some(assistant) = self.assistant.clone() else {
            return false;
        };
        let Some(sample) = self
            .table
            .selected_entry()
            .or_else(|| self.table.first_entry())
        else {
            self.set_status(
                "No entries available for the assistant context",
                StatusKind::Error,
                true,
            );
            return false;
        };

        let request = FilterRequest {
            prompt,
            sample_json: anonymized_sample(&sample.data),
            column_hints: self.table.columns().to_vec(),
        };
        self.generation += 1;
        let generation = self.generation;
        self.waiting_for = Some(generation);
        self.input.set_focused(false);

        let events = self.events.clone();
        std::thread::spawn(move || {
            let result = assistant.generate_filter_query(&request);
            if events
                .send(AppEvent::AssistantReply { generation, result })
                .is_err()
            {
                debug!("Assistant reply {} dropped, app has exited", generation);
            }
        });
        true
    }

    fn assistant_reply(&mut self, generation: u64, result: &Result<String, AssistantError>) {
        if self.waiting_for != Some(generation) {
            debug!("Ignoring stale assistant reply {}", generation);
            return;
        }
        self.waiting_for = None;
        if self.view == ViewState::Prompt {
            self.view = ViewState::Table;
            self.input.set_focused(false);
        }

        match result {
            Err(e) => {
                warn!("Assistant failed: {}", e);
                self.set_status(format!("Assistant failed: {e}"), StatusKind::Error, true);
            }
            Ok(query) if query.trim().is_empty() => {
                self.set_status("Assistant returned an empty query", StatusKind::Error, true);
            }
            Ok(query) => {
                info!("Assistant filter: {}", query);
                self.table.set_filter(query.trim());
                match self.table.filter_error().map(str::to_string) {
                    Some(error) => {
                        self.set_status(format!("Filter error: {error}"), StatusKind::Error, true);
                    }
                    None => self.set_status("Assistant filter applied", StatusKind::Ok, true),
                }
            }
        }
    }

    fn color(&self, name: &str) -> Color {
        self.theme.get(name)
    }

    fn render_loading(&self, area: Rect, buf: &mut Buffer) {
        let LoadingState::Loading { file_path } = &self.loading_state else {
            return;
        };
        let [_, center, _] = Layout::new(
            Direction::Vertical,
            [Constraint::Fill(1), Constraint::Length(3), Constraint::Fill(1)],
        )
        .areas(area);
        Paragraph::new(format!("Loading {}…", file_path.display()))
            .centered()
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.color("modal_border")))
                    .title("Loading"),
            )
            .render(center, buf);
    }

    fn input_title(&self) -> &'static str {
        match self.view {
            ViewState::EditColumns => "Columns (comma separated queries)",
            ViewState::EditFilter => "Filter",
            _ => "Ask the assistant for a filter",
        }
    }

    fn render_input(&self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(self.input_title())
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.color("modal_border_active")))
            .padding(Padding::horizontal(1));
        let inner = block.inner(area);
        block.render(area, buf);
        if self.waiting_for.is_some() {
            Paragraph::new(Span::styled(
                "Asking assistant...",
                Style::default()
                    .fg(self.color("dimmed"))
                    .add_modifier(Modifier::ITALIC),
            ))
            .render(inner, buf);
        } else {
            (&self.input).render(inner, buf);
        }
    }

    fn render_status(&self, area: Rect, buf: &mut Buffer) {
        let Some(status) = &self.status else {
            return;
        };
        let color = match status.kind {
            StatusKind::Ok => self.color("success"),
            StatusKind::Error => self.color("error"),
            StatusKind::Neutral => self.color("dimmed"),
        };
        Paragraph::new(Line::from(Span::styled(
            format!(" {}", status.text),
            Style::default().fg(color),
        )))
        .render(area, buf);
    }

    fn render_controls(&self, area: Rect, buf: &mut Buffer) {
        let hints: &[(&str, &str)] = match self.view {
            ViewState::Table => &TABLE_CONTROLS,
            ViewState::Detail => &DETAIL_CONTROLS,
            ViewState::EditFields => &EDIT_CONTROLS,
            _ => &INPUT_CONTROLS,
        };
        let controls = Controls::new(hints)
            .with_counts(
                self.table.selected_position(),
                self.table.visible_count(),
                self.table.total_count(),
            )
            .with_marked(self.table.marked_count())
            .with_assistant(self.assistant.is_some() && self.view == ViewState::Table)
            .with_dimmed(self.confirm_write || self.loading_state.is_loading())
            .with_colors(self.color("primary"), self.color("controls_bg"));
        (&controls).render(area, buf);
    }
}

impl Widget for &mut App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let mut constraints = vec![Constraint::Fill(1)];
        let has_input = matches!(
            self.view,
            ViewState::EditColumns | ViewState::EditFilter | ViewState::Prompt
        );
        if has_input {
            constraints.push(Constraint::Length(3));
        }
        constraints.push(Constraint::Length(1)); // Status
        constraints.push(Constraint::Length(1)); // Controls
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(area);

        let main_area = layout[0];
        if self.loading_state.is_loading() {
            self.render_loading(main_area, buf);
        } else {
            match self.view {
                ViewState::Detail => Detail {
                    entry: self.table.selected_entry(),
                    border: self.color("table_border"),
                    label: self.color("dimmed"),
                }
                .render_stateful(main_area, buf, &mut self.detail_state),
                ViewState::EditFields => {
                    if let Some(form) = &self.edit_form {
                        EditFormView {
                            form,
                            border: self.color("modal_border_active"),
                            label: self.color("text_primary"),
                        }
                        .render(main_area, buf);
                    }
                }
                _ => {
                    let empty_text = if self.table.total_count() == 0 {
                        "No entries"
                    } else {
                        "No entries match the filter"
                    };
                    StatefulWidget::render(
                        DataTable::new(&self.table, &self.theme).with_empty_text(empty_text),
                        main_area,
                        buf,
                        &mut self.table_state,
                    );
                    self.table.set_page_rows(self.table_state.visible_rows);
                }
            }
        }

        let mut next = 1;
        if has_input {
            self.render_input(layout[next], buf);
            next += 1;
        }
        self.render_status(layout[next], buf);
        self.render_controls(layout[next + 1], buf);
    }
}
