use clap::Parser;
use color_eyre::Result;
use cutl::{AppConfig, Args, Assistant, ColumnStore, ConfigManager, Theme, APP_NAME};
use cutl::{App, AppEvent};
use log::{info, warn};
use ratatui::DefaultTerminal;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Duration;

fn render(terminal: &mut DefaultTerminal, app: &mut App) -> Result<()> {
    terminal.draw(|frame| frame.render_widget(app, frame.area()))?;
    Ok(())
}

fn load_config() -> (AppConfig, Option<ConfigManager>) {
    let manager = match ConfigManager::new(APP_NAME) {
        Ok(manager) => manager,
        Err(e) => {
            warn!("No config directory, using defaults: {}", e);
            return (AppConfig::default(), None);
        }
    };
    let config = AppConfig::load_from(&manager).unwrap_or_else(|e| {
        warn!("Invalid configuration, using defaults: {}", e);
        AppConfig::default()
    });
    (config, Some(manager))
}

fn run(mut terminal: DefaultTerminal, path: PathBuf) -> Result<()> {
    let (config, manager) = load_config();
    let theme = Theme::from_config(&config.theme).unwrap_or_else(|e| {
        warn!("Invalid theme, using defaults: {}", e);
        Theme::default()
    });
    let assistant = Assistant::from_config(&config.assistant);
    if assistant.is_none() {
        info!("Assistant disabled");
    }
    let column_store = manager.as_ref().map(ColumnStore::new);
    let poll_interval = Duration::from_millis(config.performance.event_poll_interval_ms);

    let (tx, rx) = channel::<AppEvent>();
    let mut app = App::new_with_config(tx.clone(), theme, assistant, column_store);
    render(&mut terminal, &mut app)?;
    tx.send(AppEvent::Open(path))?;

    loop {
        if crossterm::event::poll(poll_interval)? {
            match crossterm::event::read()? {
                crossterm::event::Event::Key(key)
                    if key.kind == crossterm::event::KeyEventKind::Press =>
                {
                    tx.send(AppEvent::Key(key))?
                }
                crossterm::event::Event::Resize(cols, rows) => {
                    tx.send(AppEvent::Resize(cols, rows))?
                }
                _ => {}
            }
        }

        let updated = match rx.recv_timeout(Duration::from_millis(0)) {
            Ok(event) => {
                match event {
                    AppEvent::Exit => break,
                    AppEvent::Crash(msg) => {
                        return Err(color_eyre::eyre::eyre!(msg));
                    }
                    event => {
                        if let Some(event) = app.event(&event) {
                            tx.send(event)?;
                        }
                    }
                }
                true
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => false,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        };

        if updated {
            render(&mut terminal, &mut app)?;
        }
    }
    Ok(())
}

fn handle_early_exit_flags(args: &Args) -> Result<Option<()>> {
    if args.generate_config {
        let manager = ConfigManager::new(APP_NAME)?;
        match manager.write_default_config(args.force) {
            Ok(path) => {
                println!("Configuration file written to {}", path.display());
                return Ok(Some(()));
            }
            Err(e) => {
                eprintln!("Error generating config: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(None)
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(()) = handle_early_exit_flags(&args)? {
        return Ok(());
    }
    let Some(path) = args.input.clone() else {
        eprintln!("Error: an input file is required (-i PATH)");
        std::process::exit(2);
    };

    // kept alive until exit so the file stays open
    let _logger = if args.debug {
        Some(cutl::logging::init_debug_log(Path::new("."))?)
    } else {
        None
    };
    if !cutl_cli::is_jsonl_path(&path) {
        warn!("{} does not look like a JSONL file, opening anyway", path.display());
    }

    color_eyre::install()?;
    let terminal = ratatui::init();
    let result = run(terminal, path);
    ratatui::restore();
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
