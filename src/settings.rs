// src/settings.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use url::Url;

/// Runner settings, read from an optional YAML file and overridden by flags.
#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Settings {
    /// Syslog server; unset disables mirroring to the device log.
    pub syslog: Option<String>,
    /// Where the JSON dataset is served.
    pub data_url: Option<Url>,
    /// Where status snapshots are uploaded.
    pub log_url: Option<Url>,
    /// Records placed in front of the downloaded dataset.
    pub data: Vec<serde_json::Value>,
    /// Seconds per HTTP request.
    pub http_timeout: u64,
    pub device: DeviceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            syslog: None,
            data_url: None,
            log_url: None,
            data: Vec::new(),
            http_timeout: 30,
            device: DeviceSettings::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DeviceSettings {
    pub shell: String, // default: "bash -c"
    /// Exec template, `{{ command }}` is the escaped command.
    pub exec: String,
    /// Configure template, `{{ joined }}` is the escaped
    /// `configure terminal ; ... ; end` line, `{{ block }}` the raw lines.
    pub configure: String,
    /// Seconds per device call.
    pub timeout: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            shell: "bash -c".into(),
            exec: "dohost {{ command }}".into(),
            configure: "dohost {{ joined }}".into(),
            timeout: 300,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read settings {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parse settings {}", path.display()))
    }
}
