use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use climan_platform::AppPaths;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};

/// Appends to the debug log, reopening it if it was deleted underneath us.
struct ReopeningFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl ReopeningFile {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if guard.is_none() || !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            *guard = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?,
            );
        }

        match guard.as_mut() {
            Some(file) => f(file),
            None => Err(io::Error::other("log file not available")),
        }
    }
}

impl Write for ReopeningFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(Write::flush)
    }
}

/// Keep the newer half of an oversized log, cut at a line boundary.
fn trim_oversized(log_path: &Path, max_log_size: u64) {
    if let Ok(metadata) = std::fs::metadata(log_path)
        && metadata.len() > max_log_size
        && let Ok(contents) = std::fs::read(log_path)
    {
        let half = contents.len() / 2;
        let keep_from = contents[half..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(half, |pos| half + pos + 1);
        let _ = std::fs::write(log_path, &contents[keep_from..]);
    }
}

/// Log warnings to stderr and everything from the climan crates to
/// `<data-dir>/debug.log`. With `debug_enabled`, stderr shows debug output too.
///
/// Does nothing when the data directory cannot be resolved or a logger is
/// already installed.
pub fn init_logging(debug_enabled: bool, max_log_size: u64) {
    let log_path = AppPaths::new().ok().and_then(|paths| {
        paths.ensure_dirs().ok()?;
        Some(paths.log_file())
    });
    init_logging_at(log_path.as_deref(), debug_enabled, max_log_size);
}

pub fn init_logging_at(log_path: Option<&Path>, debug_enabled: bool, max_log_size: u64) {
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("climan")
        .build();

    let term_level = if debug_enabled {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        term_level,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];

    if let Some(log_path) = log_path {
        trim_oversized(log_path, max_log_size);
        match ReopeningFile::open(log_path.to_path_buf()) {
            Ok(writer) => loggers.push(WriteLogger::new(LevelFilter::Debug, config, writer)),
            Err(e) => eprintln!("climan: cannot open {}: {e}", log_path.display()),
        }
    }

    if CombinedLogger::init(loggers).is_err() {
        return;
    }
    set_debug_logging(debug_enabled);

    if let Some(log_path) = log_path {
        log::debug!("Logging to {}", log_path.display());
    }
}

/// Raise or lower the global level at runtime.
pub fn set_debug_logging(enabled: bool) {
    if enabled {
        log::set_max_level(log::LevelFilter::Debug);
    } else {
        log::set_max_level(log::LevelFilter::Info);
    }
}
