use crate::config::{LogFormat, LogLevel, LogOutputType, LogTarget, LoggingConfig};
use crate::error::ProxyError;
use chrono::Utc;
use log::Record;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::Mutex;

/// Initialize logging for the process.
///
/// A configuration with explicit targets installs the multi-target
/// logger; otherwise env_logger takes over with the configured (or
/// default `info`) level, still overridable through `RUST_LOG`.
pub fn init(config: Option<&LoggingConfig>) -> Result<(), ProxyError> {
    match config {
        Some(cfg) if cfg.targets.as_ref().is_some_and(|t| !t.is_empty()) => {
            MultiTargetLogger::install(cfg.clone())
        }
        Some(cfg) => {
            let level = cfg.level.unwrap_or_default();
            env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or(level.to_string()),
            )
            .init();
            Ok(())
        }
        None => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .init();
            Ok(())
        }
    }
}

fn severity(level: log::Level) -> LogLevel {
    match level {
        log::Level::Trace => LogLevel::Trace,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Info => LogLevel::Info,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Error => LogLevel::Error,
    }
}

fn target_allows(target: &LogTarget, floor: LogLevel, level: log::Level) -> bool {
    severity(level) >= target.level.unwrap_or(floor)
}

/// Writes each record to every configured target whose level admits it.
pub struct MultiTargetLogger {
    targets: Vec<LogTarget>,
    floor: LogLevel,
    format: LogFormat,
    writers: Vec<Mutex<BufWriter<Box<dyn Write + Send>>>>,
}

impl MultiTargetLogger {
    pub fn new(config: LoggingConfig) -> Result<Self, ProxyError> {
        let format = config.format.unwrap_or_default();
        let floor = config.level.unwrap_or_default();
        let targets = config.targets.unwrap_or_default();

        let mut writers = Vec::new();
        for target in &targets {
            let writer: Box<dyn Write + Send> = match target.output_type {
                LogOutputType::Stdout => Box::new(std::io::stdout()),
                LogOutputType::File => {
                    let path = target.path.as_ref().ok_or_else(|| {
                        ProxyError::Config("file log target requires a path".to_string())
                    })?;
                    let file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .map_err(|e| {
                            ProxyError::Config(format!(
                                "failed to open log file {}: {}",
                                path.display(),
                                e
                            ))
                        })?;
                    Box::new(file)
                }
            };
            writers.push(Mutex::new(BufWriter::new(writer)));
        }

        Ok(Self {
            targets,
            floor,
            format,
            writers,
        })
    }

    pub fn install(config: LoggingConfig) -> Result<(), ProxyError> {
        let logger = Self::new(config)?;
        log::set_boxed_logger(Box::new(logger))
            .map_err(|e| ProxyError::Config(format!("logger already installed: {}", e)))?;
        // Per-target filtering happens in log(); the global gate stays open.
        log::set_max_level(log::LevelFilter::Trace);
        Ok(())
    }

    fn format_record(&self, record: &Record) -> String {
        match self.format {
            LogFormat::Text => format!(
                "{} [{}] [{}] {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level().to_string().to_uppercase(),
                record.target(),
                record.args()
            ),
            LogFormat::Json => json!({
                "timestamp": Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
                "level": record.level().to_string().to_lowercase(),
                "target": record.target(),
                "module": record.module_path().unwrap_or("unknown"),
                "file": record.file().unwrap_or("unknown"),
                "line": record.line().unwrap_or(0),
                "message": record.args().to_string(),
            })
            .to_string(),
        }
    }
}

impl log::Log for MultiTargetLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.targets
            .iter()
            .any(|target| target_allows(target, self.floor, metadata.level()))
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = self.format_record(record);
        for (target, writer) in self.targets.iter().zip(&self.writers) {
            if target_allows(target, self.floor, record.level()) {
                if let Ok(mut writer) = writer.lock() {
                    let _ = writeln!(writer, "{}", message);
                    let _ = writer.flush();
                }
            }
        }
    }

    fn flush(&self) {
        for writer in &self.writers {
            if let Ok(mut w) = writer.lock() {
                let _ = w.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogOutputType;

    fn target(level: Option<LogLevel>) -> LogTarget {
        LogTarget {
            output_type: LogOutputType::Stdout,
            path: None,
            level,
        }
    }

    #[test]
    fn test_target_level_overrides_floor() {
        let t = target(Some(LogLevel::Warn));
        assert!(!target_allows(&t, LogLevel::Trace, log::Level::Info));
        assert!(target_allows(&t, LogLevel::Trace, log::Level::Warn));
        assert!(target_allows(&t, LogLevel::Trace, log::Level::Error));
    }

    #[test]
    fn test_floor_applies_without_target_level() {
        let t = target(None);
        assert!(!target_allows(&t, LogLevel::Info, log::Level::Debug));
        assert!(target_allows(&t, LogLevel::Info, log::Level::Info));
        assert!(target_allows(&t, LogLevel::Debug, log::Level::Debug));
    }

    #[test]
    fn test_file_target_without_path_is_rejected() {
        let config = LoggingConfig {
            level: None,
            format: None,
            targets: Some(vec![LogTarget {
                output_type: LogOutputType::File,
                path: None,
                level: None,
            }]),
        };
        assert!(MultiTargetLogger::new(config).is_err());
    }

    #[test]
    fn test_json_format_carries_message() {
        let logger = MultiTargetLogger::new(LoggingConfig {
            level: None,
            format: Some(LogFormat::Json),
            targets: Some(vec![target(None)]),
        })
        .unwrap();

        let line = logger.format_record(
            &log::Record::builder()
                .args(format_args!("hello"))
                .level(log::Level::Info)
                .target("veil_proxy::test")
                .build(),
        );
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["message"], "hello");
        assert_eq!(parsed["level"], "info");
    }
}
