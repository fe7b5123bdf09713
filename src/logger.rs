use core::{fmt::Arguments, str::FromStr};

use log::{LevelFilter, SetLoggerError};
use static_cell::StaticCell;

use crate::clock::TickClock;

const LOG_TARGETS: Option<&'static str> = option_env!("AIRSPOT_LOGTARGETS");

/// Where formatted lines go, usually RTT or a UART owned by the board.
pub type Sink = fn(Arguments<'_>);

pub fn init_logger_from_env(clock: &'static TickClock, sink: Sink) -> Result<(), SetLoggerError> {
    static LOGGER: StaticCell<AirspotLogger> = StaticCell::new();

    let Some(logger) = LOGGER.try_init(AirspotLogger { clock, sink }) else {
        return Ok(());
    };

    unsafe {
        log::set_logger_racy(logger)?;
    }

    const LEVEL: Option<&'static str> = option_env!("AIRSPOT_LOGLEVEL");

    let level = match LEVEL {
        Some(lvl) => LevelFilter::from_str(lvl).unwrap_or(LevelFilter::Off),
        None => LevelFilter::Info,
    };
    unsafe { log::set_max_level_racy(level) };

    Ok(())
}

fn target_enabled(targets: Option<&str>, target: &str) -> bool {
    match targets {
        Some(targets) => targets.split(',').any(|v| target.starts_with(v)),
        None => true,
    }
}

struct AirspotLogger {
    clock: &'static TickClock,
    sink: Sink,
}

impl log::Log for AirspotLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        target_enabled(LOG_TARGETS, metadata.target())
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        const RESET: &str = "\u{001B}[0m";
        const BOLD: &str = "\u{001B}[1m";
        const DIMMED: &str = "\u{001B}[2m";
        const RED: &str = "\u{001B}[31m";
        const GREEN: &str = "\u{001B}[32m";
        const YELLOW: &str = "\u{001B}[33m";
        const BLUE: &str = "\u{001B}[34m";
        const CYAN: &str = "\u{001B}[35m";

        let color = match record.level() {
            log::Level::Error => RED,
            log::Level::Warn => YELLOW,
            log::Level::Info => GREEN,
            log::Level::Debug => BLUE,
            log::Level::Trace => CYAN,
        };

        let now_ms = self.clock.uptime_ms();

        (self.sink)(format_args!(
            "{}{:3}.{:03} [{}{}{}{} {}{}{}{}]{} {}\n",
            DIMMED,
            now_ms / 1000,
            now_ms % 1000,
            RESET,
            color,
            record.level(),
            RESET,
            BOLD,
            record.target(),
            RESET,
            DIMMED,
            RESET,
            record.args(),
        ));
    }

    fn flush(&self) {}
}
