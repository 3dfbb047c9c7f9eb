use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::paths::rrconf_log_dir;

static SESSION_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);

fn level_char(level: Level) -> char {
    match level {
        Level::Error => 'E',
        Level::Warn => 'W',
        Level::Info => 'I',
        Level::Debug => 'D',
        Level::Trace => 'T',
    }
}

/// Parses the `[log] level` setting. Unknown names fall back to `Debug`.
pub fn parse_level(name: &str) -> LevelFilter {
    match name.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Debug,
    }
}

/// Session logger. Debug and trace records go to `rrconf.dbg.log`, the rest
/// to `rrconf.log`; everything is mirrored to stderr.
pub struct FileLogger {
    main_file: Mutex<File>,
    debug_file: Mutex<File>,
    level: LevelFilter,
}

impl FileLogger {
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        Self::init_with_level(LevelFilter::Debug)
    }

    pub fn init_with_level(level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
        let log_dir = rrconf_log_dir();
        fs::create_dir_all(&log_dir)?;

        let session_num = Self::get_next_session_number(&log_dir);
        let session_dir = log_dir.join(format!("session-{}", session_num));
        fs::create_dir_all(&session_dir)?;

        if let Ok(mut guard) = SESSION_DIR.lock() {
            *guard = Some(session_dir.clone());
        }

        let main_file = Self::open_log_file(&session_dir, "rrconf.log")?;
        let debug_file = Self::open_log_file(&session_dir, "rrconf.dbg.log")?;

        let logger = FileLogger {
            main_file: Mutex::new(main_file),
            debug_file: Mutex::new(debug_file),
            level,
        };

        log::set_max_level(level);
        log::set_logger(Box::leak(Box::new(logger)))
            .map_err(|e| format!("Failed to set logger: {}", e))?;

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        log::info!("=== rrconf session {} ===", session_num);
        log::info!("Log directory: {}", session_dir.display());
        log::info!("Started at: {}", timestamp);

        Ok(())
    }

    fn open_log_file(dir: &Path, name: &str) -> Result<File, Box<dyn std::error::Error>> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(file)
    }

    fn get_next_session_number(log_dir: &Path) -> u32 {
        let mut max_num = 0u32;

        if let Ok(entries) = fs::read_dir(log_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name_str = name.to_string_lossy();

                if let Some(rest) = name_str.strip_prefix("session-") {
                    if let Ok(num) = rest.parse::<u32>() {
                        max_num = max_num.max(num);
                    }
                }
            }
        }

        max_num + 1
    }
}

impl log::Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now().format("%H:%M:%S%.3f");
        let log_line = format!("{} {} {}\n", timestamp, record.target(), record.args());

        let file_mutex = if record.level() >= Level::Debug {
            &self.debug_file
        } else {
            &self.main_file
        };

        if let Ok(mut file) = file_mutex.lock() {
            let _ = file.write_all(log_line.as_bytes());
            let _ = file.flush();
        }

        eprint!("{} {} {}", timestamp, level_char(record.level()), log_line);
    }

    fn flush(&self) {
        let _ = self.main_file.lock().map(|mut f| f.flush());
        let _ = self.debug_file.lock().map(|mut f| f.flush());
    }
}

pub fn current_session_dir() -> Option<PathBuf> {
    SESSION_DIR.lock().ok()?.clone()
}

/// Fallback used when the log directory can't be created (read-only home,
/// startup from a display manager script).
pub struct StderrLogger {
    level: LevelFilter,
}

impl StderrLogger {
    pub fn init(level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
        log::set_max_level(level);
        log::set_logger(Box::leak(Box::new(StderrLogger { level })))
            .map_err(|e| format!("Failed to set logger: {}", e))?;
        Ok(())
    }
}

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = Local::now().format("%H:%M:%S%.3f");
        eprintln!(
            "{} {} {} {}",
            timestamp,
            level_char(record.level()),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Installs the session file logger, or the stderr logger if that fails.
pub fn init_with_level(level: LevelFilter) {
    if let Err(e) = FileLogger::init_with_level(level) {
        let _ = StderrLogger::init(level);
        log::warn!("File logging unavailable ({}), logging to stderr", e);
    }
}
