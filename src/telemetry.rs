// src/telemetry.rs
use crate::device::Device;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Wait after enabling the discriminator before it captures messages.
const SYSLOG_SETTLE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error = 3,
    Warning = 4,
    Info = 6,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Upgrading,
    Renumbered,
    Finished,
    Failed,
}

/// Values collected while the workflow runs.
#[derive(Debug, Default)]
pub struct RunState {
    pub version: Option<String>,
    pub serial: Option<String>,
    pub logbuf: String,
    /// Final command line -> output or error text.
    pub cli: BTreeMap<String, String>,
    pub last_output: Option<String>,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    version: &'a Option<String>,
    serial: &'a Option<String>,
    status: Status,
    logbuf: &'a str,
    cli: &'a BTreeMap<String, String>,
}

/// Uploads status snapshots as JSON.
pub struct Uploader {
    url: Option<Url>,
    client: reqwest::Client,
}

impl Uploader {
    pub fn new(url: Option<Url>, client: reqwest::Client) -> Self {
        Self { url, client }
    }

    async fn put(&self, body: &Snapshot<'_>) -> Result<bool, reqwest::Error> {
        let Some(url) = &self.url else {
            return Ok(false);
        };
        self.client
            .put(url.clone())
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(true)
    }
}

/// Provisioning log: tracing, log buffer, device syslog and uploads.
pub struct Telemetry {
    syslog: Option<String>,
    attached: bool,
    uploader: Uploader,
    pub state: RunState,
}

impl Telemetry {
    pub fn new(syslog: Option<String>, uploader: Uploader) -> Self {
        Self {
            syslog,
            attached: false,
            uploader,
            state: RunState::default(),
        }
    }

    pub async fn log<D: Device>(&mut self, device: &D, severity: Severity, message: impl Display) {
        let message = message.to_string();
        match severity {
            Severity::Error => error!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Info => info!("{message}"),
        }
        self.state.logbuf.push_str(&message);
        self.state.logbuf.push('\n');
        if !self.attached {
            return;
        }
        for line in message.lines() {
            let command = format!("send log {} \"{}\"", severity as u8, line.replace('"', "'"));
            if let Err(e) = device.execute(&command).await {
                debug!(error = %e, "syslog mirror failed");
            }
        }
    }

    /// Routes our messages and EEM output to the syslog server.
    pub async fn attach_syslog<D: Device>(&mut self, device: &D) {
        let Some(host) = self.syslog.clone() else {
            return;
        };
        let block = format!(
            "logging discriminator ztp msg-body includes Message from|HA_EM|INSTALL\n\
             logging host {host} discriminator ztp"
        );
        match device.configure(&block).await {
            Ok(()) => {
                self.attached = true;
                tokio::time::sleep(SYSLOG_SETTLE).await;
            }
            Err(e) => warn!(error = %e, "syslog setup failed"),
        }
    }

    pub async fn detach_syslog<D: Device>(&mut self, device: &D) {
        let Some(host) = self.syslog.clone() else {
            return;
        };
        if !self.attached {
            return;
        }
        self.attached = false;
        let block = format!("no logging host {host}\nno logging discriminator ztp");
        if let Err(e) = device.configure(&block).await {
            warn!(error = %e, "syslog teardown failed");
        }
    }

    /// Best-effort upload of the current state.
    pub async fn upload<D: Device>(&mut self, device: &D, status: Status) {
        let snapshot = Snapshot {
            version: &self.state.version,
            serial: &self.state.serial,
            status,
            logbuf: &self.state.logbuf,
            cli: &self.state.cli,
        };
        let result = self.uploader.put(&snapshot).await;
        match result {
            Ok(true) => debug!(?status, "status uploaded"),
            Ok(false) => {}
            Err(e) => {
                self.log(device, Severity::Warning, format!("Status upload failed: {e}"))
                    .await
            }
        }
    }
}
