//! Logging setup with indicatif integration

use indicatif::MultiProgress;

/// Dependencies that are chatty at `info`/`debug` (every SQL statement, every
/// connection) are held at `warn` unless RUST_LOG says otherwise.
const QUIET_DEPENDENCIES: &str = "sqlx=warn,hyper=warn,hyper_util=warn,reqwest=warn";

/// Five-column level tag, optionally wrapped in the level's ANSI color.
struct LevelTag {
    level: log::Level,
    color: bool,
}

impl std::fmt::Display for LevelTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (name, ansi) = match self.level {
            log::Level::Error => ("ERROR", 31),
            log::Level::Warn => ("WARN", 33),
            log::Level::Info => ("INFO", 32),
            log::Level::Debug => ("DEBUG", 36),
            log::Level::Trace => ("TRACE", 35),
        };
        if self.color {
            write!(f, "\x1b[{ansi}m{name:<5}\x1b[0m")
        } else {
            write!(f, "{name:<5}")
        }
    }
}

/// Logger that prints through indicatif MultiProgress so log lines do not
/// tear the crawl status spinner.
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            let tag = LevelTag {
                level: record.level(),
                color: true,
            };
            let line = format!("[{tag}] {}", record.args());
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn default_filter(quiet: bool, debug: bool) -> String {
    let level = if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    format!("{level},{QUIET_DEPENDENCIES}")
}

/// Initialize logging. With `multi`, lines go through the progress display
/// (TTY); without it, plain timestamped lines for log collectors.
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    use std::io::Write;

    let env = env_logger::Env::default().default_filter_or(default_filter(quiet, debug));

    if let Some(multi) = multi {
        let logger = env_logger::Builder::from_env(env).build();
        let max_level = logger.filter();

        if log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone()))).is_ok() {
            log::set_max_level(max_level);
        }
    } else {
        let _ = env_logger::Builder::from_env(env)
            .format(|buf, record| {
                let tag = LevelTag {
                    level: record.level(),
                    color: false,
                };
                writeln!(buf, "{} [{tag}] {}", buf.timestamp_millis(), record.args())
            })
            .try_init();
    }
}
