//! Unified logging module for DLC services
//!
//! Console plus a daily rolling log file per service, with background
//! compression of old files.

use std::fs::{self, File, OpenOptions};
#[allow(unused_imports)] // Used in Write trait impl for DailyRollingWriter
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        self,
        format::Writer,
        FmtContext, FormatEvent, FormatFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2026-08-30T00:50:44.809Z [INFO] Service started`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        // Format timestamp
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        // Format level with brackets and color
        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        // Format the event message and fields
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Global guards for keeping loggers alive
static GUARDS: OnceLock<Arc<Mutex<Vec<WorkerGuard>>>> = OnceLock::new();

/// Global log root directory (initialized once from config or env)
/// Priority: DLC_LOG_DIR env > config_dir > default "logs"
static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Initialize log root directory from config or environment
///
/// This should be called early during service bootstrap, before any logging
/// functions that write to files are invoked.
pub fn init_log_root(config_dir: Option<&str>) {
    LOG_ROOT.get_or_init(|| {
        std::env::var("DLC_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                config_dir
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("logs"))
            })
    });
}

/// Get log root directory
///
/// When running under `cargo test`, defaults to the system temp directory to
/// avoid polluting the project directory.
pub fn get_log_root() -> PathBuf {
    LOG_ROOT.get().cloned().unwrap_or_else(|| {
        std::env::var("DLC_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                if is_test_environment() {
                    std::env::temp_dir().join("dlc-test-logs")
                } else {
                    PathBuf::from("logs")
                }
            })
    })
}

/// Detect if we're running in a test environment
fn is_test_environment() -> bool {
    if std::env::var("CARGO_TARGET_TMPDIR").is_ok() {
        return true;
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(path_str) = exe.to_str() {
            if path_str.contains("target/debug/deps") || path_str.contains("target/release/deps") {
                return true;
            }
        }
    }

    false
}

/// Default max file size: 100MB
const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

// Custom daily rolling file writer with naming format: {YYYYMMDD}_{service}.log
// Also supports size-based rotation within a day
struct DailyRollingWriter {
    service_name: String,
    log_dir: PathBuf,
    current_date: Arc<Mutex<String>>,
    current_file: Arc<Mutex<Option<File>>>,
    /// Current file size in bytes (tracked for size-based rotation)
    current_size: Arc<AtomicU64>,
    /// Max file size before rotation (default 100MB)
    max_file_size: u64,
    /// Rotation counter within the same day (e.g., .1, .2, .3)
    rotation_count: Arc<AtomicU32>,
}

impl DailyRollingWriter {
    fn new(service_name: String, log_dir: PathBuf) -> std::io::Result<Self> {
        let current_date = chrono::Local::now().format("%Y%m%d").to_string();
        let file_path = log_dir.join(format!("{}_{}.log", current_date, service_name));

        // Create log directory if it doesn't exist
        fs::create_dir_all(&log_dir)?;

        // Open or create the log file and get its current size
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;
        let initial_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            service_name,
            log_dir,
            current_date: Arc::new(Mutex::new(current_date)),
            current_file: Arc::new(Mutex::new(Some(file))),
            current_size: Arc::new(AtomicU64::new(initial_size)),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            rotation_count: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Rotate the log file due to size limit
    fn rotate_by_size(&self) -> std::io::Result<()> {
        let current_date = self
            .current_date
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;

        // Increment rotation counter
        let count = self.rotation_count.fetch_add(1, Ordering::SeqCst) + 1;

        // New file path: YYYYMMDD_service.N.log
        let new_file_path = self.log_dir.join(format!(
            "{}_{}.{}.log",
            *current_date, self.service_name, count
        ));

        let new_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&new_file_path)?;

        // Reset size counter
        self.current_size.store(0, Ordering::SeqCst);

        // Update current file
        let mut current_file = self
            .current_file
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;
        *current_file = Some(new_file);

        Ok(())
    }

    fn get_writer(&self) -> std::io::Result<std::sync::MutexGuard<'_, Option<File>>> {
        // Check if date has changed
        let today = chrono::Local::now().format("%Y%m%d").to_string();
        let mut current_date = self
            .current_date
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;

        // Build current file path
        let current_file_path = self
            .log_dir
            .join(format!("{}_{}.log", *current_date, self.service_name));

        // Check if date changed OR file was deleted
        let file_deleted = !current_file_path.exists();

        if *current_date != today || file_deleted {
            // Date changed or file deleted, rotate to new file and reset rotation counter
            let new_date = if *current_date != today {
                today.clone()
            } else {
                current_date.clone()
            };
            let new_file_path = self
                .log_dir
                .join(format!("{}_{}.log", new_date, self.service_name));

            // Ensure directory exists (in case it was also deleted)
            fs::create_dir_all(&self.log_dir)?;

            let new_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&new_file_path)?;
            let initial_size = new_file.metadata().map(|m| m.len()).unwrap_or(0);

            // Update current date, file, and reset counters
            if *current_date != today {
                *current_date = today;
                self.rotation_count.store(0, Ordering::SeqCst);
            }
            self.current_size.store(initial_size, Ordering::SeqCst);

            let mut current_file = self
                .current_file
                .lock()
                .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;
            *current_file = Some(new_file);
        }

        self.current_file
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))
    }
}

impl std::io::Write for DailyRollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // Check if we need to rotate due to size limit
        let current_size = self.current_size.load(Ordering::Relaxed);
        if current_size + buf.len() as u64 > self.max_file_size {
            self.rotate_by_size()?;
        }

        if let Some(ref mut file) = *self.get_writer()? {
            let written = file.write(buf)?;
            // Update size counter
            self.current_size
                .fetch_add(written as u64, Ordering::Relaxed);
            Ok(written)
        } else {
            Ok(0)
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(ref mut file) = *self.get_writer()? {
            file.flush()
        } else {
            Ok(())
        }
    }
}

impl Clone for DailyRollingWriter {
    fn clone(&self) -> Self {
        Self {
            service_name: self.service_name.clone(),
            log_dir: self.log_dir.clone(),
            current_date: Arc::clone(&self.current_date),
            current_file: Arc::clone(&self.current_file),
            current_size: Arc::clone(&self.current_size),
            max_file_size: self.max_file_size,
            rotation_count: Arc::clone(&self.rotation_count),
        }
    }
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "dlcsrv")
    pub service_name: String,
    /// Base directory for logs
    pub log_dir: PathBuf,
    /// Console log level
    pub console_level: Level,
    /// File log level
    pub file_level: Level,
    /// Maximum number of log files to keep (for compression/cleanup)
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: get_log_root(),
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            max_log_files: 30,
        }
    }
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Create log directory if it doesn't exist
    fs::create_dir_all(&config.log_dir)?;

    // Create custom daily rolling file writer with format: {YYYYMMDD}_{service}.log
    let custom_writer =
        DailyRollingWriter::new(config.service_name.clone(), config.log_dir.clone())?;

    let (non_blocking, guard) = tracing_appender::non_blocking(custom_writer);

    // Store guard to prevent dropping
    let guards = GUARDS.get_or_init(|| Arc::new(Mutex::new(Vec::new())));
    match guards.lock() {
        Ok(mut guards) => guards.push(guard),
        Err(poisoned) => {
            eprintln!("Warning: GUARDS lock was poisoned, recovering...");
            poisoned.into_inner().push(guard);
        },
    }

    // Respect RUST_LOG environment variable when present
    let env_filter = if let Ok(env_str) = std::env::var("RUST_LOG") {
        EnvFilter::new(env_str)
    } else {
        EnvFilter::new(format!("info,{}=debug", config.service_name))
    };

    // Console layer - custom format: 2026-08-30T00:50:44.809Z [INFO] message
    let console_layer = fmt::layer()
        .with_ansi(true)
        .event_format(BracketedLevelFormat)
        .boxed();

    // File layer - same bracketed format, no ANSI
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(BracketedLevelFormat)
        .boxed();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);

    // Start background compression task after logging the initialization
    start_log_compression_task(config.log_dir, config.service_name);

    Ok(())
}

/// Legacy init function for simple setups
pub fn init(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = LogConfig {
        console_level: level.parse().unwrap_or(Level::INFO),
        file_level: level.parse().unwrap_or(Level::DEBUG),
        ..Default::default()
    };
    init_with_config(config)
}

// ==================== Log Compression Support ====================

use tokio::time::{interval, Duration};

/// Start background log compression task
pub fn start_log_compression_task(log_dir: PathBuf, service_name: String) {
    tokio::spawn(async move {
        // Initial delay of 1 minute to let service fully start
        tokio::time::sleep(Duration::from_secs(60)).await;

        // Then run compression task every 24 hours
        let mut interval = interval(Duration::from_secs(86400));

        loop {
            interval.tick().await;
            if let Err(e) = compress_old_logs(&log_dir, &service_name).await {
                tracing::error!("Log compression error for {}: {}", service_name, e);
            }
        }
    });
}

/// Compress log files older than 7 days, delete compressed logs older than 365 days
async fn compress_old_logs(
    log_dir: &Path,
    service_name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    use std::time::{Duration, SystemTime};

    let mut entries = tokio::fs::read_dir(log_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => continue,
        };

        // Skip files that belong to another service
        let is_service_log = file_name.contains(&format!("_{}.log", service_name));
        if !is_service_log && !file_name.ends_with(".log.gz") {
            continue;
        }

        let metadata = tokio::fs::metadata(&path).await?;
        let modified = metadata.modified()?;
        let age = SystemTime::now().duration_since(modified)?;

        if !file_name.ends_with(".gz") {
            // Compress logs older than 7 days
            if age > Duration::from_secs(7 * 86400) {
                compress_file(&path).await?;
                tokio::fs::remove_file(&path).await?;
                tracing::debug!("Compressed: {}", file_name);
            }
        } else {
            // Delete compressed logs older than 365 days
            if age > Duration::from_secs(365 * 86400) {
                tokio::fs::remove_file(&path).await?;
                tracing::debug!("Deleted: {}", file_name);
            }
        }
    }

    Ok(())
}

/// Compress a single file
async fn compress_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    use std::io::Write;
    use tokio::io::AsyncReadExt;

    // Read original file
    let mut input = tokio::fs::File::open(path).await?;
    let mut buffer = Vec::new();
    input.read_to_end(&mut buffer).await?;

    // Compress to new file
    let output_path = format!("{}.gz", path.display());
    let output = std::fs::File::create(&output_path)?;
    let mut encoder = GzEncoder::new(output, Compression::best());
    encoder.write_all(&buffer)?;
    encoder.finish()?;

    Ok(())
}
