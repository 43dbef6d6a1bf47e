//! Console logger configuration.
//!
//! Structured single-line output with aligned level and source columns:
//!
//! ```text
//! Mar 15 24 10:30:00 AM | [INFO ] | main.rs:42          | listening on 0.0.0.0:5900
//! ```
//!
//! Colors are applied per level and disabled when `NO_COLOR` is set.
//! `RUST_LOG` overrides the default `info` filter.

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

const FILE_LINE_WIDTH: usize = 20;

fn level_color(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[34m",
        log::Level::Trace => "\x1b[35m",
    }
}

/// Configures the process-wide logger. Call once at startup.
pub fn configure_logger() {
    let no_color = env::var("NO_COLOR").is_ok();

    let mut builder = Builder::new();
    builder
        .format(move |buf, record| {
            let level = record.level();
            let level_tag = format!("[{:5}]", level);
            let colored_level = if no_color {
                level_tag
            } else {
                format!("{}{}\x1b[0m", level_color(level), level_tag)
            };

            let file_line = format!(
                "{}:{}",
                record
                    .file()
                    .map(|f| f.rsplit('/').next().unwrap_or(f))
                    .unwrap_or("unknown"),
                record.line().unwrap_or(0)
            );

            writeln!(
                buf,
                "{} | {} | {:width$} | {}",
                Local::now().format("%b %d %y %I:%M:%S %p"),
                colored_level,
                file_line,
                record.args(),
                width = FILE_LINE_WIDTH,
            )
        })
        .filter_level(LevelFilter::Info);

    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder.init();
}
