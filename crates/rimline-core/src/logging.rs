//! Log setup: `env_logger` filtering, routed through indicatif in a terminal

use indicatif::MultiProgress;

/// Crate prefix dropped from log targets (`rimline_openalex::client` → `openalex`).
const TARGET_PREFIX: &str = "rimline_";

fn level_label(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    }
}

fn level_color(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    }
}

/// Short component name for a log target.
fn component(target: &str) -> &str {
    let krate = target.split("::").next().unwrap_or(target);
    krate.strip_prefix(TARGET_PREFIX).unwrap_or(krate)
}

fn format_line(record: &log::Record, color: bool) -> String {
    let label = level_label(record.level());
    let comp = component(record.target());
    if color {
        let pre = level_color(record.level());
        format!("[{pre}{label}\x1b[0m] \x1b[2m{comp}\x1b[0m {}", record.args())
    } else {
        format!("[{label}] {comp} {}", record.args())
    }
}

/// Writes log lines above the progress bars of a `MultiProgress`.
pub struct IndicatifLogger {
    filter: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(filter: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { filter, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.filter.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.filter.matches(record) {
            return;
        }
        let line = format_line(record, true);
        self.multi.suspend(|| eprintln!("{line}"));
    }

    fn flush(&self) {
        self.filter.flush();
    }
}

/// Install the global logger.
///
/// `RUST_LOG` overrides the level picked from `quiet`/`debug`. With `multi`
/// set, output is colored and interleaved with progress bars; otherwise plain
/// lines for log collection. Calling this twice is an error.
pub fn init_logging(
    quiet: bool,
    debug: bool,
    multi: Option<&MultiProgress>,
) -> Result<(), log::SetLoggerError> {
    use std::io::Write;

    let level = match (debug, quiet) {
        (true, _) => "debug",
        (false, true) => "warn",
        (false, false) => "info",
    };
    let env = env_logger::Env::default().default_filter_or(level);

    match multi {
        Some(multi) => {
            let filter = env_logger::Builder::from_env(env).build();
            let max_level = filter.filter();
            log::set_boxed_logger(Box::new(IndicatifLogger::new(filter, multi.clone())))?;
            log::set_max_level(max_level);
            Ok(())
        }
        None => env_logger::Builder::from_env(env)
            .format(|buf, record| writeln!(buf, "{}", format_line(record, false)))
            .try_init(),
    }
}
