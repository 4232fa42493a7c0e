//! Logging configuration for DiscBurner
//!
//! Logs are written to both the terminal and a file at:
//! `~/Library/Logs/DiscBurner/disc-burner.log` on macOS, and under the local
//! data directory elsewhere.

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

const LOG_FILE: &str = "disc-burner.log";
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Get the log directory path
/// On macOS: ~/Library/Logs/DiscBurner/
pub fn get_log_directory() -> Option<PathBuf> {
    if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Logs").join("DiscBurner"))
    } else {
        dirs::data_local_dir().map(|d| d.join("DiscBurner").join("logs"))
    }
}

/// Get the current log file path
pub fn get_log_file_path() -> Option<PathBuf> {
    get_log_directory().map(|d| d.join(LOG_FILE))
}

/// Move the log aside once it grows past the size limit
fn rotate_if_large(log_path: &Path) {
    if let Ok(metadata) = fs::metadata(log_path)
        && metadata.len() > MAX_LOG_BYTES
    {
        let _ = fs::rename(log_path, log_path.with_extension("log.old"));
    }
}

fn log_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build()
}

/// Initialize the logging system
///
/// The terminal shows info and above (debug with `verbose`); the file always
/// captures debug and above. Returns the path to the log file on success.
pub fn init_logging(verbose: bool) -> Option<PathBuf> {
    let term_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let log_dir = match get_log_directory() {
        Some(d) => d,
        None => {
            eprintln!("Warning: Could not determine log directory");
            init_terminal_only(term_level);
            return None;
        }
    };

    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        init_terminal_only(term_level);
        return None;
    }

    let log_path = log_dir.join(LOG_FILE);
    rotate_if_large(&log_path);

    let log_file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            init_terminal_only(term_level);
            return None;
        }
    };

    let loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(term_level, log_config(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Debug, log_config(), log_file),
    ];

    if CombinedLogger::init(loggers).is_err() {
        eprintln!("Warning: Logger already initialized");
    }

    log::info!("=== DiscBurner session started ===");
    log::debug!("Log file: {}", log_path.display());

    Some(log_path)
}

/// Initialize terminal-only logging (fallback if file logging fails)
fn init_terminal_only(level: LevelFilter) {
    let term_logger = TermLogger::new(level, log_config(), TerminalMode::Mixed, ColorChoice::Auto);
    let _ = CombinedLogger::init(vec![term_logger]);
}
