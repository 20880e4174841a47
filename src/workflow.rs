// src/workflow.rs
use crate::dataset::DatasetSource;
use crate::device::{Device, DeviceError};
use crate::error::ZtpError;
use crate::files::{self, Download};
use crate::hostexpr;
use crate::probe::{DeviceVersionInfo, SwitchInventory, probe};
use crate::schema;
use crate::stack::{parse_members, priority_plan, renumber_plan};
use crate::target::{Target, resolve};
use crate::telemetry::{Severity, Status, Telemetry};
use crate::template::{strip_end, substitute};
use regex::Regex;
use std::fmt::Display;
use std::process::ExitCode;
use std::sync::LazyLock;
use tracing::debug;

static IMAGE_SIGNATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"IFS|NOVA|IOSXE_PACKAGE").expect("valid signature regex"));

/// Runtime budget the device grants a scheduled applet, in seconds.
const APPLET_MAXRUN: u32 = 600;

/// How a run ended. Exactly one per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No stack record matches this device.
    NotFound,
    /// Software install or autoupgrade handed to the device.
    Upgrading,
    /// Members renumbered, reload handed to the device.
    Renumbered,
    Finished,
    Failed,
}

impl Outcome {
    pub fn status(self) -> Status {
        match self {
            Outcome::Upgrading => Status::Upgrading,
            Outcome::Renumbered => Status::Renumbered,
            Outcome::Finished => Status::Finished,
            Outcome::NotFound | Outcome::Failed => Status::Failed,
        }
    }

    pub fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Failed => ExitCode::FAILURE,
            _ => ExitCode::SUCCESS,
        }
    }
}

pub struct Workflow<D: Device> {
    device: D,
    dataset: DatasetSource,
    telemetry: Telemetry,
}

impl<D: Device> Workflow<D> {
    pub fn new(device: D, dataset: DatasetSource, telemetry: Telemetry) -> Self {
        Self {
            device,
            dataset,
            telemetry,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &crate::telemetry::RunState {
        &self.telemetry.state
    }

    /// Provisions the device once and reports the outcome.
    pub async fn run(&mut self) -> Outcome {
        self.telemetry.attach_syslog(&self.device).await;
        self.log(Severity::Info, format!("*** Running {} ***", env!("CARGO_PKG_NAME")))
            .await;

        let (outcome, save) = match self.provision().await {
            Ok(done) => done,
            Err(e) => {
                self.log(Severity::Error, &e).await;
                if let Some(output) = &self.telemetry.state.last_output {
                    debug!(%output, "last device output");
                }
                (Outcome::Failed, false)
            }
        };

        match outcome {
            // syslog stays attached so the scheduled action is still reported
            Outcome::Upgrading | Outcome::Renumbered => {
                self.telemetry.upload(&self.device, outcome.status()).await;
                outcome
            }
            _ => self.shutdown(outcome, save).await,
        }
    }

    async fn log(&mut self, severity: Severity, message: impl Display) {
        self.telemetry.log(&self.device, severity, message).await;
    }

    async fn provision(&mut self) -> Result<(Outcome, bool), ZtpError> {
        let (inventory, version) = probe(&self.device).await?;
        self.telemetry.state.serial = inventory.primary_serial().map(String::from);
        self.telemetry.state.version = Some(version.to_string());
        let serials = inventory.serials().collect::<Vec<_>>().join(", ");
        self.log(Severity::Info, format!("Platform serial number(s): {serials}"))
            .await;
        self.log(Severity::Info, format!("Platform software version: {version}"))
            .await;
        self.telemetry.upload(&self.device, Status::Running).await;

        let loaded = self.dataset.load().await?;
        if let Some(warning) = loaded.warning {
            self.log(Severity::Warning, warning).await;
        }
        let records = schema::parse(&loaded.records)?;

        let Some(target) = resolve(&records, &inventory) else {
            self.log(Severity::Error, "% Stack not found in dataset").await;
            self.beacon(&inventory).await;
            return Ok((Outcome::NotFound, false));
        };

        let missing = target.missing(&inventory);
        if !missing.is_empty() {
            self.log(Severity::Warning, format!("Missing switch(es): {}", missing.join(", ")))
                .await;
        }
        let extra = target.extra(&inventory);
        if !extra.is_empty() {
            self.log(Severity::Warning, format!("Extra switch(es): {}", extra.join(", ")))
                .await;
        }
        if !missing.is_empty() || !extra.is_empty() {
            self.beacon(&inventory).await;
        }

        if self.check_upgrade(&target, &version, &inventory).await? {
            self.log(Severity::Info, "Software upgrade starting asynchronously...")
                .await;
            return Ok((Outcome::Upgrading, false));
        }
        if !inventory.is_chassis() && self.check_autoupgrade().await? {
            self.log(Severity::Info, "V-Mismatch detected, upgrade starting asynchronously...")
                .await;
            return Ok((Outcome::Upgrading, false));
        }
        self.log(Severity::Info, "No software upgrade required").await;

        if !inventory.is_chassis() && self.check_renumber(&target, &inventory).await? {
            self.log(Severity::Info, "Stack renumbered, reloading stack...")
                .await;
            return Ok((Outcome::Renumbered, false));
        }
        self.log(Severity::Info, "No need to renumber stack").await;

        if self.apply_config(&target).await? {
            self.log(Severity::Info, "Configuration template applied successfully")
                .await;
        }
        if self.final_commands(&target).await {
            self.log(Severity::Info, "Final command(s) executed successfully")
                .await;
        }
        self.log(Severity::Info, "End of workflow reached").await;
        Ok((Outcome::Finished, target.save.unwrap_or(false)))
    }

    /// Best-effort blue beacon on every local unit.
    async fn beacon(&self, inventory: &SwitchInventory) {
        for unit in inventory.units().keys() {
            // up to 16.8
            if let Err(e) = self
                .device
                .configure(&format!("hw-module beacon on switch {unit}"))
                .await
            {
                debug!(unit, error = %e, "beacon (config mode) unsupported");
            }
            if let Err(e) = self
                .device
                .execute(&format!("hw-module beacon slot {unit} on"))
                .await
            {
                debug!(unit, error = %e, "beacon (exec mode) unsupported");
            }
        }
    }

    /// Schedules an install of the target image when the versions differ.
    async fn check_upgrade(
        &mut self,
        target: &Target,
        version: &DeviceVersionInfo,
        inventory: &SwitchInventory,
    ) -> Result<bool, ZtpError> {
        let (Some(required), Some(install)) = (&target.version, &target.install) else {
            return Ok(false);
        };
        if version.satisfies(required) {
            return Ok(false);
        }

        let url = target.resolve_url(install)?;
        self.log(Severity::Info, format!("Checking {url}...")).await;
        let info = self
            .device
            .execute(&format!("show file information {url}"))
            .await?;
        let image = IMAGE_SIGNATURE.is_match(&info);
        self.telemetry.state.last_output = Some(info);
        if !image {
            return Err(ZtpError::NotAnImage(url));
        }

        if version.bundle {
            // must be saved before the install applet runs
            let fs = if inventory.is_chassis() { "bootflash:" } else { "flash:" };
            self.log(Severity::Info, "Converting from bundle to install mode")
                .await;
            self.device
                .configure(&format!("no boot system\nboot system {fs}packages.conf"))
                .await?;
            self.device.execute("write memory").await?;
        }

        self.schedule(
            "upgrade",
            &[
                ("1.0", "cli command \"enable\"".to_string()),
                (
                    "2.0",
                    format!(
                        "cli command \"install add file {url} activate commit\" pattern \"re-enter the command\""
                    ),
                ),
                ("2.1", "cli command \"n\" pattern \"you want to proceed\"".to_string()),
                ("2.2", "cli command \"y\"".to_string()),
            ],
        )
        .await?;
        Ok(true)
    }

    /// Schedules a platform autoupgrade when a member is in V-Mismatch.
    async fn check_autoupgrade(&mut self) -> Result<bool, ZtpError> {
        let output = match self.device.execute("show switch").await {
            Ok(output) => output,
            Err(e) => {
                debug!(error = %e, "show switch unavailable");
                return Ok(false);
            }
        };
        let mismatch = output.contains("V-Mismatch");
        self.telemetry.state.last_output = Some(output);
        if !mismatch {
            return Ok(false);
        }

        self.schedule(
            "upgrade",
            &[
                ("1.0", "cli command \"enable\"".to_string()),
                (
                    "2.0",
                    "cli command \"request platform software package install autoupgrade\"".to_string(),
                ),
                ("3.0", "syslog msg \"Reloading stack...\"".to_string()),
                ("4.0", "reload".to_string()),
            ],
        )
        .await?;
        Ok(true)
    }

    /// Renumbers members and adjusts priorities, then schedules a reload.
    async fn check_renumber(&mut self, target: &Target, inventory: &SwitchInventory) -> Result<bool, ZtpError> {
        let renumber = renumber_plan(target, inventory);
        for (old, new) in &renumber {
            self.device
                .execute(&format!("switch {old} renumber {new}"))
                .await?;
            self.log(Severity::Info, format!("Renumbered switch {old} to {new}"))
                .await;
        }

        let members = match self.device.execute("show switch").await {
            Ok(output) => parse_members(&output),
            Err(e) => {
                self.log(Severity::Warning, format!("Stack members unknown: {e}"))
                    .await;
                Vec::new()
            }
        };
        for member in members.iter().filter(|m| m.active) {
            debug!(unit = member.unit, role = %member.role, priority = member.priority, "active member");
        }
        let priorities = priority_plan(target, inventory, &members);
        for (unit, priority) in &priorities {
            self.device
                .execute(&format!("switch {unit} priority {priority}"))
                .await?;
            self.log(Severity::Info, format!("Set priority of switch {unit} to {priority}"))
                .await;
        }

        if renumber.is_empty() && priorities.is_empty() {
            return Ok(false);
        }

        // a stale backup config would be restored after the reload
        for unit in inventory.units().keys() {
            if let Err(e) = self
                .device
                .execute(&format!("delete /force flash-{unit}:nvram_config*"))
                .await
            {
                self.log(Severity::Warning, format!("Could not purge backup config of switch {unit}: {e}"))
                    .await;
            }
        }
        self.schedule("reload", &[("1.0", "reload".to_string())])
            .await?;
        Ok(true)
    }

    /// Downloads, merges, substitutes and applies the configuration.
    async fn apply_config(&mut self, target: &Target) -> Result<bool, ZtpError> {
        let mut conf = String::new();
        if let Some(config) = &target.config {
            let url = target.resolve_url(config)?;
            self.log(Severity::Info, format!("Downloading {url}...")).await;
            match files::download(&self.device, &url).await {
                Download::Content(text) => conf = strip_end(&text),
                Download::Failed(message) => {
                    return Err(ZtpError::Download { url, message });
                }
            }
        }
        if let Some(template) = &target.template {
            if !conf.is_empty() {
                conf.push('\n');
            }
            conf.push_str(template);
        }
        if conf.trim().is_empty() {
            return Ok(false);
        }
        if let Some(subst) = &target.subst {
            conf = substitute(&conf, subst);
        }

        let applied = self.device.configure(&conf).await;
        match applied {
            Ok(()) => Ok(true),
            Err(DeviceError::Configuration { failed_lines }) => {
                self.log(Severity::Error, "Failed configurations:").await;
                for line in &failed_lines {
                    self.log(Severity::Error, line).await;
                }
                Err(DeviceError::Configuration { failed_lines }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs every final command line; true only if all of them succeeded.
    async fn final_commands(&mut self, target: &Target) -> bool {
        let Some(cli) = &target.cli else {
            return false;
        };
        let mut ok = true;
        for line in cli.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(expr) = line.strip_prefix('%') {
                match hostexpr::eval(expr) {
                    Ok(evaluation) => {
                        if !evaluation.delay.is_zero() {
                            tokio::time::sleep(evaluation.delay).await;
                        }
                        self.telemetry
                            .state
                            .cli
                            .insert(line.to_string(), evaluation.value.to_string());
                    }
                    Err(e) => {
                        self.log(Severity::Error, format!("{line}: {e}")).await;
                        self.telemetry.state.cli.insert(line.to_string(), e.to_string());
                        ok = false;
                    }
                }
                continue;
            }
            match self.device.execute(line).await {
                Ok(output) => {
                    self.telemetry.state.cli.insert(line.to_string(), output.clone());
                    self.telemetry.state.last_output = Some(output);
                }
                Err(e) => {
                    self.log(Severity::Error, &e).await;
                    self.telemetry.state.cli.insert(line.to_string(), e.to_string());
                    ok = false;
                }
            }
        }
        ok
    }

    /// Configures an EEM applet and starts it; the device runs it on its own.
    async fn schedule(&self, name: &str, actions: &[(&str, String)]) -> Result<(), ZtpError> {
        let mut applet = format!("event manager applet {name}\n event none maxrun {APPLET_MAXRUN}");
        for (label, action) in actions {
            applet.push_str(&format!("\n action {label} {action}"));
        }
        self.device.configure(&applet).await?;
        self.device
            .execute(&format!("event manager run {name}"))
            .await?;
        Ok(())
    }

    async fn shutdown(&mut self, mut outcome: Outcome, save: bool) -> Outcome {
        if save {
            self.log(Severity::Info, "Saving configuration upon script termination")
                .await;
            if let Err(e) = self
                .device
                .execute("copy running-config startup-config")
                .await
            {
                self.log(Severity::Error, &e).await;
                outcome = Outcome::Failed;
            }
        }
        self.telemetry.upload(&self.device, outcome.status()).await;
        self.telemetry.detach_syslog(&self.device).await;
        outcome
    }
}
