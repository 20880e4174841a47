// src/target.rs
use crate::error::ZtpError;
use crate::probe::SwitchInventory;
use crate::schema::{ProvisioningRecord, is_relative};
use std::collections::BTreeMap;
use url::Url;

/// Effective configuration for this run: the matched stack record, with
/// unset fields taken from the defaults record.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub stack: BTreeMap<u32, String>,
    pub version: Option<String>,
    pub base_url: Option<String>,
    pub install: Option<String>,
    pub config: Option<String>,
    pub subst: Option<BTreeMap<String, String>>,
    pub cli: Option<String>,
    pub save: Option<bool>,
    pub template: Option<String>,
}

/// Picks the first stack record sharing a serial with the inventory and
/// merges it over the defaults record.
pub fn resolve(records: &[ProvisioningRecord], inventory: &SwitchInventory) -> Option<Target> {
    let empty = ProvisioningRecord::default();
    let defaults = records.iter().find(|r| r.is_defaults()).unwrap_or(&empty);
    let (my, stack) = records.iter().find_map(|r| {
        let stack = r.stack.as_ref()?;
        stack
            .values()
            .any(|serial| inventory.contains_serial(serial))
            .then_some((r, stack))
    })?;

    fn pick<T: Clone>(mine: &Option<T>, fallback: &Option<T>) -> Option<T> {
        mine.as_ref().or(fallback.as_ref()).cloned()
    }

    Some(Target {
        stack: stack.clone(),
        version: pick(&my.version, &defaults.version),
        base_url: pick(&my.base_url, &defaults.base_url),
        install: pick(&my.install, &defaults.install),
        config: pick(&my.config, &defaults.config),
        subst: pick(&my.subst, &defaults.subst),
        cli: pick(&my.cli, &defaults.cli),
        save: pick(&my.save, &defaults.save),
        template: pick(&my.template, &defaults.template),
    })
}

impl Target {
    /// Serials listed for this stack but not found on the device.
    pub fn missing<'a>(&'a self, inventory: &SwitchInventory) -> Vec<&'a str> {
        self.stack
            .values()
            .filter(|s| !inventory.contains_serial(s))
            .map(String::as_str)
            .collect()
    }

    /// Serials found on the device but not listed for this stack.
    pub fn extra<'a>(&self, inventory: &'a SwitchInventory) -> Vec<&'a str> {
        inventory
            .serials()
            .filter(|s| !self.stack.values().any(|v| v == s))
            .collect()
    }

    /// Target unit number for a serial.
    pub fn unit_of(&self, serial: &str) -> Option<u32> {
        self.stack
            .iter()
            .find_map(|(unit, s)| (s == serial).then_some(*unit))
    }

    /// Joins a relative `install`/`config` value onto `base_url`.
    pub fn resolve_url(&self, path: &str) -> Result<String, ZtpError> {
        if !is_relative(path) {
            return Ok(path.to_string());
        }
        let base = self.base_url.as_deref().unwrap_or_default();
        Url::parse(base)
            .and_then(|base| base.join(path))
            .map(String::from)
            .map_err(|source| ZtpError::Url {
                path: path.to_string(),
                source,
            })
    }
}
