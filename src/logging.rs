//! Logger setup.
//!
//! Log records go to rotated files under `logs/`. CLI commands also copy
//! warnings to stderr; the TUI owns the terminal, so nothing is duplicated
//! there.

use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};

use crate::error::AppError;

pub const LOG_DIRECTORY: &str = "logs";

/// Where log records are copied besides the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Cli,
    Tui,
}

/// Level spec: explicit flag, then `RUST_LOG`, then `info`.
pub fn level_spec(flag: Option<&str>) -> String {
    resolve_level(flag, std::env::var("RUST_LOG").ok())
}

fn resolve_level(flag: Option<&str>, env: Option<String>) -> String {
    let non_blank = |s: &String| !s.trim().is_empty();
    flag.map(str::to_string)
        .filter(non_blank)
        .or_else(|| env.filter(non_blank))
        .unwrap_or_else(|| "info".to_string())
}

/// Start the logger. The returned handle must stay alive for the whole run.
pub fn setup_logging(level: &str, target: LogTarget) -> Result<LoggerHandle, AppError> {
    let duplicate = match target {
        LogTarget::Cli => Duplicate::Warn,
        LogTarget::Tui => Duplicate::None,
    };
    Logger::try_with_str(level)
        .map_err(|e| AppError::new(2, format!("Invalid log level '{level}': {e}")))?
        .log_to_file(FileSpec::default().directory(LOG_DIRECTORY).basename("seam"))
        .duplicate_to_stderr(duplicate)
        .rotate(
            Criterion::Size(1024 * 1024), //1MB
            Naming::Timestamps,
            Cleanup::KeepLogFiles(5),
        )
        .start()
        .map_err(|e| AppError::new(4, format!("Logger initialization failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_level_wins() {
        assert_eq!(level_spec(Some("debug")), "debug");
    }

    #[test]
    fn blank_flag_falls_through_to_env() {
        assert_eq!(resolve_level(Some("  "), Some("tile_seam=trace".to_string())), "tile_seam=trace");
        assert_eq!(resolve_level(None, Some("warn".to_string())), "warn");
    }

    #[test]
    fn blank_everything_means_info() {
        assert_eq!(resolve_level(Some(""), Some(" ".to_string())), "info");
        assert_eq!(resolve_level(None, None), "info");
    }
}
