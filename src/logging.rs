use chrono::{SecondsFormat, Utc};
use hostname::get;
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::{Map, Value};
use std::env;
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    fn from_str(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

/// One JSON object per line: fixed envelope fields plus the event's context
/// object merged in at the top level. Scan events are named `stage.action`
/// (`scan.cycle_complete`, `storage.station_row_skipped`).
#[derive(Clone)]
pub struct Logger {
    service: Arc<str>,
    environment: Arc<str>,
    host: Arc<str>,
    min_level: LogLevel,
}

static LOGGER: OnceCell<Logger> = OnceCell::new();

pub fn init_logger(service: &'static str) -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(service))
}

pub fn logger() -> &'static Logger {
    LOGGER.get().expect("logger not initialized")
}

impl Logger {
    fn new(service: &'static str) -> Self {
        let environment = env::var("APP_ENV")
            .or_else(|_| env::var("RUST_ENV"))
            .unwrap_or_else(|_| "development".to_string());
        let host = get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .or_else(|| env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "unknown".to_string());
        let min_level = env::var("LOG_LEVEL")
            .ok()
            .map(|value| LogLevel::from_str(&value))
            .unwrap_or(LogLevel::Info);

        Self {
            service: Arc::from(service),
            environment: Arc::from(environment),
            host: Arc::from(host),
            min_level,
        }
    }

    /// Builds the line without printing it; `None` when filtered by level.
    fn render<T: Serialize>(&self, level: LogLevel, event: &str, context: T) -> Option<String> {
        if level > self.min_level {
            return None;
        }

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let serialized = serde_json::to_value(context).unwrap_or(Value::Null);
        let mut payload = Map::new();
        payload.insert("timestamp".into(), Value::String(timestamp));
        payload.insert("service".into(), Value::String(self.service.to_string()));
        payload.insert("env".into(), Value::String(self.environment.to_string()));
        payload.insert("host".into(), Value::String(self.host.to_string()));
        payload.insert("level".into(), Value::String(level.as_str().to_string()));
        payload.insert("event".into(), Value::String(event.to_string()));

        match serialized {
            Value::Object(map) => {
                for (key, value) in map {
                    payload.insert(key, value);
                }
            }
            Value::Null => {}
            other => {
                payload.insert("context".into(), other);
            }
        }

        Some(Value::Object(payload).to_string())
    }

    fn emit<T: Serialize>(&self, level: LogLevel, event: &str, context: T) {
        if let Some(line) = self.render(level, event, context) {
            match level {
                LogLevel::Error | LogLevel::Warn => eprintln!("{}", line),
                _ => println!("{}", line),
            }
        }
    }

    pub fn debug<T: Serialize>(&self, event: &str, context: T) {
        self.emit(LogLevel::Debug, event, context);
    }

    pub fn info<T: Serialize>(&self, event: &str, context: T) {
        self.emit(LogLevel::Info, event, context);
    }

    pub fn warn<T: Serialize>(&self, event: &str, context: T) {
        self.emit(LogLevel::Warn, event, context);
    }

    pub fn error<T: Serialize>(&self, event: &str, context: T) {
        self.emit(LogLevel::Error, event, context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_logger(min_level: LogLevel) -> Logger {
        Logger {
            service: Arc::from("nowplaying-service-rs"),
            environment: Arc::from("test"),
            host: Arc::from("host"),
            min_level,
        }
    }

    #[test]
    fn render_merges_context_into_the_envelope() {
        let line = test_logger(LogLevel::Info)
            .render(
                LogLevel::Info,
                "scan.cycle_complete",
                json!({ "scanned": 3, "detected": 2 }),
            )
            .unwrap();

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "scan.cycle_complete");
        assert_eq!(value["service"], "nowplaying-service-rs");
        assert_eq!(value["level"], "info");
        assert_eq!(value["scanned"], 3);
        assert_eq!(value["detected"], 2);
    }

    #[test]
    fn levels_below_the_threshold_are_dropped() {
        let logger = test_logger(LogLevel::Info);
        assert!(logger
            .render(LogLevel::Debug, "scan.cycle_start", Value::Null)
            .is_none());
        assert!(logger
            .render(LogLevel::Error, "scan.insert_play_failed", Value::Null)
            .is_some());
    }

    #[test]
    fn non_object_context_lands_under_a_context_key() {
        let line = test_logger(LogLevel::Info)
            .render(LogLevel::Info, "scanner.initialized", json!(42))
            .unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["context"], 42);
    }
}
