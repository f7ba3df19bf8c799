use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Strings longer than this are replaced by their length in request logs.
const MAX_LOGGED_STRING: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub rotation_mb: u64,
}

impl LogConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            path: path.into(),
            rotation_mb: 50,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
            rotation_mb: 50,
        }
    }
}

/// Appends one JSON line per tool call, starting a new file once the current
/// one passes `rotation_mb`.
#[derive(Debug)]
pub struct RequestLogger {
    config: Mutex<LogConfig>,
    file: Mutex<Option<File>>,
    file_path: Mutex<Option<PathBuf>>,
}

impl RequestLogger {
    pub fn new(config: LogConfig) -> Self {
        Self {
            config: Mutex::new(config),
            file: Mutex::new(None),
            file_path: Mutex::new(None),
        }
    }

    pub fn config(&self) -> LogConfig {
        self.config.lock().clone()
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.file_path.lock().clone()
    }

    pub fn log_tool_call(&self, record: &LogRecord) -> Result<()> {
        let config = self.config.lock().clone();
        if !config.enabled {
            return Ok(());
        }

        fs::create_dir_all(&config.path)?;
        self.rotate_if_needed(&config);

        let mut file_guard = self.file.lock();
        if file_guard.is_none() {
            let file_path = config
                .path
                .join(format!("requests-{}.jsonl", Utc::now().format("%Y%m%d-%H%M%S%.3f")));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_path)?;
            *file_guard = Some(file);
            *self.file_path.lock() = Some(file_path);
        }

        if let Some(file) = file_guard.as_mut() {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    fn rotate_if_needed(&self, config: &LogConfig) {
        let current = self.file_path.lock().clone();
        if let Some(path) = current {
            if let Ok(metadata) = fs::metadata(&path) {
                if metadata.len() / (1024 * 1024) >= config.rotation_mb {
                    *self.file.lock() = None;
                    *self.file_path.lock() = None;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub ts: String,
    pub request_id: String,
    pub tool: String,
    pub input: Value,
    pub output: Value,
    pub duration_ms: u128,
    pub success: bool,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Mask credential-looking fields and elide large blobs (program buffers,
/// source text) before a value is written to the request log.
pub fn redact_sensitive(value: &Value) -> Value {
    fn redact_value(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut new_map = serde_json::Map::new();
                for (k, v) in map {
                    let key_l = k.to_lowercase();
                    if key_l.contains("secret")
                        || key_l.contains("token")
                        || key_l.contains("password")
                        || key_l.contains("keypair")
                        || key_l.contains("private")
                    {
                        new_map.insert(k.clone(), Value::String("***redacted***".to_string()));
                    } else {
                        new_map.insert(k.clone(), redact_value(v));
                    }
                }
                Value::Object(new_map)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(redact_value).collect()),
            Value::String(s) if s.len() > MAX_LOGGED_STRING => {
                Value::String(format!("<{} bytes elided>", s.len()))
            }
            _ => value.clone(),
        }
    }

    redact_value(value)
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins over
/// `default_directive`. MCP servers must log to stderr since stdout carries
/// the protocol.
pub fn init_tracing(default_directive: &str, to_stderr: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(default_directive.parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if to_stderr {
        builder.with_writer(std::io::stderr).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
