use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

/// Environment variable holding the log filter, e.g. `debug` or `tmail=trace`.
pub const FILTER_ENV: &str = "TMAIL_LOG";

/// Location of the log file: `$XDG_STATE_HOME/tmail/tmail.log`, falling back
/// to `~/.local/state/tmail/tmail.log`.
pub fn log_path() -> PathBuf {
    let base = if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        PathBuf::from(xdg)
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local").join("state")
    } else {
        PathBuf::from(".")
    };
    base.join("tmail").join("tmail.log")
}

/// Truncate the log file if it exists.
pub fn clear() -> Result<(), String> {
    let path = log_path();
    if !path.exists() {
        return Ok(());
    }
    fs::write(&path, b"").map_err(|e| format!("failed to clear {}: {}", path.display(), e))
}

/// Route the `log` facade into the log file. Logging must never take the
/// terminal, so when the file cannot be opened records are discarded.
pub fn init() {
    let target: Box<dyn Write + Send> = match open_log_file() {
        Ok(file) => Box::new(file),
        Err(_) => Box::new(io::sink()),
    };

    let _ = env_logger::Builder::new()
        .parse_filters(&std::env::var(FILTER_ENV).unwrap_or_else(|_| "info".to_string()))
        .target(env_logger::Target::Pipe(target))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.args()
            )
        })
        .try_init();
}

fn open_log_file() -> io::Result<fs::File> {
    let path = log_path();
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
