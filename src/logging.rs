//! File logging for `--debug` runs.
//!
//! The terminal is in raw mode while cutl runs, so log output only ever goes
//! to `debug.log` in the working directory and only after [`init_debug_log`]
//! was called. Without it the `log` macros are no-ops.

use color_eyre::eyre::eyre;
use color_eyre::Result;
use flexi_logger::{FileSpec, Logger, LoggerHandle, WriteMode};
use log::info;
use std::path::Path;

pub const LOG_FILE_BASENAME: &str = "debug";
pub const LOG_LEVEL: &str = "debug";

/// Start appending to `<dir>/debug.log`. The returned handle must be kept
/// alive for as long as logging should happen.
pub fn init_debug_log(dir: &Path) -> Result<LoggerHandle> {
    let handle = Logger::try_with_str(LOG_LEVEL)
        .map_err(|e| eyre!("invalid log level `{}`: {}", LOG_LEVEL, e))?
        .log_to_file(
            FileSpec::default()
                .directory(dir)
                .basename(LOG_FILE_BASENAME)
                .suppress_timestamp()
                .suffix("log"),
        )
        .write_mode(WriteMode::Direct)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|e| eyre!("failed to start logger in {}: {}", dir.display(), e))?;

    info!(
        "cutl {} started, logging to {}",
        env!("CARGO_PKG_VERSION"),
        dir.join(format!("{LOG_FILE_BASENAME}.log")).display()
    );
    Ok(handle)
}
