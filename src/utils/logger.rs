use std::path::Path;

use anyhow::{Result, anyhow};
use chrono::Local;
use log::{LevelFilter, Metadata, Record};
use once_cell::sync::Lazy;

use crate::datasource::file_path::LOG_LEVEL_PATH;

// 控制台日志，过滤交给 log 的 max_level
struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let thread = std::thread::current();
        println!(
            "[{}][{}][{}]: {}",
            timestamp,
            record.level(),
            thread.name().unwrap_or("-"),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: Lazy<ConsoleLogger> = Lazy::new(|| ConsoleLogger);

pub fn init_logger() -> Result<()> {
    let log_level = read_log_level_config(LOG_LEVEL_PATH);

    log::set_logger(&*LOGGER)
        .map(|()| log::set_max_level(log_level))
        .map_err(|e| anyhow!("Failed to set logger: {e}"))?;

    log::info!("Logger initialized with level: {log_level}");
    log::info!("Log level config path: {LOG_LEVEL_PATH}");
    Ok(())
}

/// 读取日志等级配置，文件缺失或内容无法识别时为 Info
pub fn read_log_level_config<P: AsRef<Path>>(path: P) -> LevelFilter {
    let default_level = LevelFilter::Info;

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return default_level,
    };

    parse_level(&content).unwrap_or(default_level)
}

pub fn parse_level(content: &str) -> Option<LevelFilter> {
    match content.trim().to_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warn" => Some(LevelFilter::Warn),
        "error" => Some(LevelFilter::Error),
        "off" => Some(LevelFilter::Off),
        _ => None,
    }
}

pub fn update_log_level() {
    let new_level = read_log_level_config(LOG_LEVEL_PATH);
    log::set_max_level(new_level);
    log::info!("Log level updated to: {new_level}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(parse_level("debug\n"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("  WARN "), Some(LevelFilter::Warn));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn second_init_reports_error() {
        let _ = init_logger();
        let err = init_logger().unwrap_err();
        assert!(err.to_string().starts_with("Failed to set logger"));
    }

    #[test]
    fn missing_file_defaults_to_info() {
        assert_eq!(
            read_log_level_config("/nonexistent/cpugovernor/log_level"),
            LevelFilter::Info
        );
    }
}
