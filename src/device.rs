// src/device.rs
use crate::settings::DeviceSettings;
use crate::template::Renderer;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

static ERROR_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*%\s*(?:Invalid input|Incomplete command|Ambiguous command|Unknown command|Error)\b.*$",
    )
    .expect("valid error marker regex")
});

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },
    #[error("{} configuration line(s) rejected", .failed_lines.len())]
    Configuration { failed_lines: Vec<String> },
    #[error("device helper could not be started: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("command `{command}` did not finish within {seconds}s")]
    Timeout { command: String, seconds: u64 },
    #[error("device command template: {0:#}")]
    Template(anyhow::Error),
}

/// Command-execution runtime of the device being provisioned.
///
/// Calls are awaited one at a time; the next call is only issued once the
/// previous one has returned.
#[allow(async_fn_in_trait)]
pub trait Device {
    /// Runs an exec-mode command and returns its output.
    async fn execute(&self, command: &str) -> Result<String, DeviceError>;
    /// Applies a multi-line configuration block.
    async fn configure(&self, block: &str) -> Result<(), DeviceError>;
}

/// Lines of device output that carry an IOS error marker.
pub fn error_lines(output: &str) -> Vec<String> {
    ERROR_MARKER
        .find_iter(output)
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/// Talks to the device through a host helper program (`dohost` in guestshell).
pub struct ShellDevice {
    renderer: Renderer,
    settings: DeviceSettings,
}

impl ShellDevice {
    pub fn new(settings: DeviceSettings) -> Self {
        Self {
            renderer: Renderer::new(),
            settings,
        }
    }

    async fn run(&self, template: &str, ctx: &tera::Context, label: &str) -> Result<String, DeviceError> {
        let line = self
            .renderer
            .render_str(template, ctx)
            .map_err(DeviceError::Template)?;
        let parts = self
            .settings
            .shell
            .split_whitespace()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        let Some((prg, args)) = parts.split_first() else {
            return Err(DeviceError::Spawn(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty shell setting",
            )));
        };
        debug!(command = %label, helper = %line, "device call");

        let child = Command::new(prg)
            .args(args)
            .arg(&line)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .output();
        let seconds = self.settings.timeout;
        let output = tokio::time::timeout(Duration::from_secs(seconds), child)
            .await
            .map_err(|_| DeviceError::Timeout {
                command: label.to_string(),
                seconds,
            })?
            .map_err(DeviceError::Spawn)?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = match stderr.trim() {
                "" => format!("helper exited with {}", output.status),
                text => text.to_string(),
            };
            return Err(DeviceError::Command {
                command: label.to_string(),
                message,
            });
        }
        Ok(stdout)
    }
}

impl Device for ShellDevice {
    async fn execute(&self, command: &str) -> Result<String, DeviceError> {
        let mut ctx = tera::Context::new();
        ctx.insert("command", &shell_escape::escape(command.into()));
        let output = self.run(&self.settings.exec, &ctx, command).await?;
        match error_lines(&output).into_iter().next() {
            Some(message) => Err(DeviceError::Command {
                command: command.to_string(),
                message,
            }),
            None => Ok(output),
        }
    }

    async fn configure(&self, block: &str) -> Result<(), DeviceError> {
        let lines = block
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .collect::<Vec<_>>();
        let joined = format!("configure terminal ; {} ; end", lines.join(" ; "));
        let mut ctx = tera::Context::new();
        ctx.insert("block", &shell_escape::escape(lines.join("\n").into()));
        ctx.insert("joined", &shell_escape::escape(joined.into()));

        let output = match self.run(&self.settings.configure, &ctx, "configure").await {
            Ok(output) => output,
            Err(DeviceError::Command { message, .. }) => {
                return Err(DeviceError::Configuration {
                    failed_lines: message.lines().map(String::from).collect(),
                });
            }
            Err(e) => return Err(e),
        };
        let failed_lines = error_lines(&output);
        if failed_lines.is_empty() {
            Ok(())
        } else {
            Err(DeviceError::Configuration { failed_lines })
        }
    }
}
