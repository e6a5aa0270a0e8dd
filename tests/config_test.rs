use cutl::config::{AppConfig, ColorParser, ColumnStore, ConfigManager, Theme, CONFIG_FILE};
use ratatui::style::Color;
use std::fs;
use tempfile::TempDir;

// Helper to create a temporary config directory for testing
fn setup_test_config_dir() -> (TempDir, ConfigManager) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_manager = ConfigManager::with_dir(temp_dir.path().join("cutl"));
    (temp_dir, config_manager)
}

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert_eq!(config.version, "0.1");
    assert_eq!(config.performance.event_poll_interval_ms, 25);
    assert_eq!(config.assistant.base_url, None);
    assert_eq!(config.theme.colors.table_selected, "reversed");
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_config_file_gives_defaults() {
    let (_dir, manager) = setup_test_config_dir();
    let config = AppConfig::load_from(&manager).unwrap();
    assert_eq!(config.performance.event_poll_interval_ms, 25);
}

#[test]
fn test_generated_config_parses_to_defaults() {
    let (_dir, manager) = setup_test_config_dir();
    let path = manager.write_default_config(false).unwrap();
    assert!(path.ends_with(CONFIG_FILE));

    let config = AppConfig::load_from(&manager).unwrap();
    let defaults = AppConfig::default();
    assert_eq!(config.version, defaults.version);
    assert_eq!(config.assistant, defaults.assistant);
    assert_eq!(config.theme.colors.marked_row, defaults.theme.colors.marked_row);
}

#[test]
fn test_generate_refuses_to_overwrite_without_force() {
    let (_dir, manager) = setup_test_config_dir();
    manager.write_default_config(false).unwrap();
    fs::write(manager.config_path(CONFIG_FILE), "version = \"0.1\"\n").unwrap();

    assert!(manager.write_default_config(false).is_err());
    manager.write_default_config(true).unwrap();
    let content = fs::read_to_string(manager.config_path(CONFIG_FILE)).unwrap();
    assert!(content.contains("[theme.colors]"));
}

#[test]
fn test_partial_user_config_is_merged() {
    let (_dir, manager) = setup_test_config_dir();
    manager.ensure_config_dir().unwrap();
    fs::write(
        manager.config_path(CONFIG_FILE),
        r##"
[performance]
event_poll_interval_ms = 50

[assistant]
model = "local-model"

[theme.colors]
marked_row = "#00ff00"
"##,
    )
    .unwrap();

    let config = AppConfig::load_from(&manager).unwrap();
    assert_eq!(config.performance.event_poll_interval_ms, 50);
    assert_eq!(config.assistant.model.as_deref(), Some("local-model"));
    assert_eq!(config.theme.colors.marked_row, "#00ff00");
    assert_eq!(config.theme.colors.primary, "cyan");
}

#[test]
fn test_invalid_configs_are_rejected() {
    let cases = [
        "version = \"9.0\"\n",
        "[performance]\nevent_poll_interval_ms = 0\n",
        "[assistant]\nbase_url = \"ftp://example.com\"\n",
        "this is not toml",
    ];
    for case in cases {
        let (_dir, manager) = setup_test_config_dir();
        manager.ensure_config_dir().unwrap();
        fs::write(manager.config_path(CONFIG_FILE), case).unwrap();
        assert!(AppConfig::load_from(&manager).is_err(), "accepted: {case}");
    }
}

#[test]
fn test_color_names() {
    let parser = ColorParser::with_capabilities(true, true);
    assert_eq!(parser.parse("red").unwrap(), Color::Red);
    assert_eq!(parser.parse(" Bright_Blue ").unwrap(), Color::Indexed(12));
    assert_eq!(parser.parse("dark grey").unwrap(), Color::Indexed(8));
    assert_eq!(parser.parse("reversed").unwrap(), Color::Reset);
    assert!(parser.parse("chartreuse").is_err());
}

#[test]
fn test_theme_from_config() {
    let mut config = AppConfig::default();
    config.theme.colors.error = "#102030".to_string();
    let parser = ColorParser::with_capabilities(true, true);
    let theme = Theme::with_parser(&config.theme, &parser).unwrap();
    assert_eq!(theme.get("error"), Color::Rgb(0x10, 0x20, 0x30));
    assert_eq!(theme.get("controls_bg"), Color::Indexed(236));
    assert_eq!(theme.get_optional("no_such_color"), None);
    assert_eq!(theme.get("no_such_color"), Color::Reset);
}

#[test]
fn test_column_store_keeps_files_apart() {
    let (dir, manager) = setup_test_config_dir();
    let store = ColumnStore::new(&manager);
    let first = dir.path().join("first.jsonl");
    let second = dir.path().join("second.jsonl");
    fs::write(&first, "{}\n").unwrap();
    fs::write(&second, "{}\n").unwrap();

    assert_eq!(store.columns_for(&first).unwrap(), None);
    store
        .save_columns(&first, &[".id".to_string(), ".title".to_string()])
        .unwrap();
    store.save_columns(&second, &[".x".to_string()]).unwrap();
    store.save_columns(&first, &[".id".to_string()]).unwrap();

    assert_eq!(store.columns_for(&first).unwrap(), Some(vec![".id".to_string()]));
    assert_eq!(store.columns_for(&second).unwrap(), Some(vec![".x".to_string()]));
    assert_eq!(store.load_all().unwrap().len(), 2);

    // an empty list counts as nothing saved
    store.save_columns(&second, &[]).unwrap();
    assert_eq!(store.columns_for(&second).unwrap(), None);
}

#[test]
fn test_column_store_keys_are_absolute() {
    let (dir, _manager) = setup_test_config_dir();
    let file = dir.path().join("data.jsonl");
    fs::write(&file, "{}\n").unwrap();
    let key = ColumnStore::key_for(&file);
    assert!(std::path::Path::new(&key).is_absolute());
    assert!(key.ends_with("data.jsonl"));
}
