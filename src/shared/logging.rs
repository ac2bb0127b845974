use super::now_secs;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn automation_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/automation.log")
}

/// Appends one JSON object per line: `timestamp`, `event`, then `fields`.
pub fn append_automation_event(
    path: &Path,
    event: &str,
    fields: &[(&str, Value)],
) -> Result<(), std::io::Error> {
    let mut payload = Map::new();
    payload.insert("timestamp".to_string(), Value::from(now_secs()));
    payload.insert("event".to_string(), Value::String(event.to_string()));
    for (key, value) in fields {
        payload.insert((*key).to_string(), value.clone());
    }

    let line = serde_json::to_string(&payload)
        .map_err(|source| std::io::Error::other(source.to_string()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}

/// Event sink handed to components that log but must never fail because of it.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    path: Option<PathBuf>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn emit(&self, event: &str, fields: &[(&str, Value)]) {
        if let Some(path) = &self.path {
            let _ = append_automation_event(path, event, fields);
        }
    }
}
