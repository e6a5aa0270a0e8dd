use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use cutl::config::{ColumnStore, ConfigManager};
use cutl::{App, AppEvent, Theme, ViewState};
use std::fs;
use std::path::Path;
use std::sync::mpsc::channel;
use tempfile::TempDir;

fn press(app: &mut App, code: KeyCode) {
    let mut next = Some(AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE)));
    while let Some(event) = next.take() {
        next = app.event(&event);
    }
}

fn type_text(app: &mut App, text: &str) {
    for c in text.chars() {
        press(app, KeyCode::Char(c));
    }
}

fn open_app(path: &Path, manager: &ConfigManager) -> App {
    let (tx, _rx) = channel();
    let mut app = App::new_with_config(tx, Theme::default(), None, Some(ColumnStore::new(manager)));
    let mut next = Some(AppEvent::Open(path.to_path_buf()));
    while let Some(event) = next.take() {
        next = app.event(&event);
    }
    app
}

fn fixture() -> (TempDir, std::path::PathBuf, ConfigManager) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("records.jsonl");
    fs::write(
        &path,
        "{\"id\":3,\"title\":\"gamma\",\"meta\":{\"lang\":\"de\"}}\n\
         {\"id\":1,\"title\":\"alpha\",\"meta\":{\"lang\":\"en\"}}\n\
         {\"id\":2,\"title\":\"beta\",\"meta\":{\"lang\":\"de\"}}\n",
    )
    .unwrap();
    let manager = ConfigManager::with_dir(dir.path().join("config"));
    (dir, path, manager)
}

#[test]
fn test_columns_are_remembered_per_file() {
    let (_dir, path, manager) = fixture();

    let mut app = open_app(&path, &manager);
    assert_eq!(app.table().columns(), &[".id", ".title", ".meta"]);
    press(&mut app, KeyCode::Char('c'));
    for _ in 0..app.input_value().chars().count() {
        press(&mut app, KeyCode::Backspace);
    }
    type_text(&mut app, ".title, .meta.lang");
    press(&mut app, KeyCode::Enter);
    assert_eq!(app.table().columns(), &[".title", ".meta.lang"]);

    let reopened = open_app(&path, &manager);
    assert_eq!(reopened.table().columns(), &[".title", ".meta.lang"]);
}

#[test]
fn test_sort_keys_follow_selection() {
    let (_dir, path, manager) = fixture();
    let mut app = open_app(&path, &manager);

    // selection is on line 1 (id 3) and stays on it after sorting
    press(&mut app, KeyCode::Char('1'));
    let ids: Vec<String> = app.table().display_rows().into_iter().map(|r| r[0].clone()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(app.table().selected_line(), Some(1));
    assert_eq!(app.table().selected_position(), 3);

    press(&mut app, KeyCode::Char('1'));
    assert_eq!(app.table().headers()[0], ".id ↓");
}

#[test]
fn test_marked_only_view_and_bulk_delete() {
    let (_dir, path, manager) = fixture();
    let mut app = open_app(&path, &manager);

    press(&mut app, KeyCode::Char(' '));
    press(&mut app, KeyCode::Down);
    press(&mut app, KeyCode::Char(' '));
    press(&mut app, KeyCode::Char('m'));
    assert!(app.table().is_marked_only_active());
    assert_eq!(app.table().visible_count(), 2);
    assert_eq!(app.table().filter(), "$line | IN(1, 3)");

    press(&mut app, KeyCode::Char('x'));
    assert_eq!(app.table().total_count(), 1);
    assert!(!app.table().is_marked_only_active());
    assert_eq!(app.table().filter(), "");
    assert_eq!(app.table().entries()[0].data["title"], "alpha");
}

#[test]
fn test_edit_nested_path_and_write() {
    let (_dir, path, manager) = fixture();
    let mut app = open_app(&path, &manager);

    press(&mut app, KeyCode::Char('c'));
    for _ in 0..app.input_value().chars().count() {
        press(&mut app, KeyCode::Backspace);
    }
    type_text(&mut app, ".meta.lang, .meta.score");
    press(&mut app, KeyCode::Enter);

    press(&mut app, KeyCode::Char('e'));
    assert_eq!(app.view(), ViewState::EditFields);
    press(&mut app, KeyCode::Tab);
    type_text(&mut app, "4.5");
    press(&mut app, KeyCode::Enter);
    assert_eq!(app.status().unwrap().text, "Entry updated");

    press(&mut app, KeyCode::Char('w'));
    press(&mut app, KeyCode::Enter);
    let first_line = fs::read_to_string(&path).unwrap().lines().next().unwrap().to_string();
    assert_eq!(
        first_line,
        "{\"id\":3,\"title\":\"gamma\",\"meta\":{\"lang\":\"de\",\"score\":4.5}}"
    );
}

#[test]
fn test_detail_view_round_trip() {
    let (_dir, path, manager) = fixture();
    let mut app = open_app(&path, &manager);
    press(&mut app, KeyCode::Char('d'));
    assert_eq!(app.view(), ViewState::Detail);
    press(&mut app, KeyCode::Down);
    assert_eq!(app.table().selected_line(), Some(1));
    press(&mut app, KeyCode::Esc);
    assert_eq!(app.view(), ViewState::Table);
    press(&mut app, KeyCode::Char('v'));
    assert_eq!(
        app.status().unwrap().text,
        format!("v{}", env!("CARGO_PKG_VERSION"))
    );
}
