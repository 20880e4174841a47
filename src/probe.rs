// src/probe.rs
use crate::device::Device;
use crate::error::ProbeError;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

static INVENTORY_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"NAME:\s*"([^"]*)"(?s:.*?)SN:[ \t]*([^\s,]*)"#).expect("valid inventory regex")
});
static SWITCH_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Switch ([0-9]+)$").expect("valid switch regex"));
static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Version ([A-Za-z0-9.:()]+)").expect("valid version regex"));
static LEADING_ZEROS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b0+(\d)").expect("valid zeros regex"));
static SYSTEM_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"System image file is "([^"]+)""#).expect("valid image regex")
});

/// Probed unit number -> serial number. Unit 0 is a non-stackable chassis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchInventory(BTreeMap<u32, String>);

impl SwitchInventory {
    pub fn units(&self) -> &BTreeMap<u32, String> {
        &self.0
    }

    pub fn serials(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }

    pub fn contains_serial(&self, serial: &str) -> bool {
        self.serials().any(|s| s == serial)
    }

    pub fn is_chassis(&self) -> bool {
        self.0.contains_key(&0)
    }

    /// Serial of the lowest-numbered unit.
    pub fn primary_serial(&self) -> Option<&str> {
        self.0.values().next().map(String::as_str)
    }
}

impl FromIterator<(u32, String)> for SwitchInventory {
    fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceVersionInfo {
    /// Version with zero padding removed from numeric components.
    pub version: String,
    /// Running an unpacked `.bin` image instead of `packages.conf`.
    pub bundle: bool,
}

impl DeviceVersionInfo {
    /// True when `required` names the running software in installed mode.
    pub fn satisfies(&self, required: &str) -> bool {
        self.to_string() == normalize_version(required.trim())
    }
}

impl fmt::Display for DeviceVersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bundle {
            write!(f, "{} bundle", self.version)
        } else {
            f.write_str(&self.version)
        }
    }
}

/// `03.07.01` -> `3.7.1`.
pub fn normalize_version(version: &str) -> String {
    LEADING_ZEROS.replace_all(version, "$1").into_owned()
}

pub fn parse_inventory(output: &str) -> SwitchInventory {
    INVENTORY_ENTRY
        .captures_iter(output)
        .filter_map(|caps| {
            let name = caps[1].trim();
            let serial = caps[2].trim();
            if serial.is_empty() {
                return None;
            }
            let unit: u32 = if name == "Chassis" {
                0
            } else {
                SWITCH_NAME.captures(name)?[1].parse().ok()?
            };
            Some((unit, serial.to_string()))
        })
        .collect()
}

pub fn parse_version(output: &str) -> Option<DeviceVersionInfo> {
    let version = VERSION.captures(output)?;
    let bundle = SYSTEM_IMAGE
        .captures(output)
        .is_some_and(|caps| caps[1].to_ascii_lowercase().ends_with(".bin"));
    Some(DeviceVersionInfo {
        version: normalize_version(&version[1]),
        bundle,
    })
}

/// Reads unit serials and the running software version.
pub async fn probe<D: Device>(device: &D) -> Result<(SwitchInventory, DeviceVersionInfo), ProbeError> {
    let inventory = device
        .execute("show inventory")
        .await
        .map_err(ProbeError::Inventory)?;
    let inventory = parse_inventory(&inventory);
    if inventory.units().is_empty() {
        return Err(ProbeError::NoSerials);
    }

    let version = device
        .execute("show version")
        .await
        .map_err(ProbeError::Version)?;
    let version = parse_version(&version).ok_or(ProbeError::NoVersion)?;
    Ok((inventory, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::ScriptedDevice;

    const STACK_INVENTORY: &str = r#"NAME: "c38xx Stack", DESCR: "c38xx Stack"
PID: WS-C3850-24P-E    , VID: V02  , SN: FOC1111X0AA

NAME: "Switch 1", DESCR: "WS-C3850-24P-E"
PID: WS-C3850-24P-E    , VID: V02  , SN: FOC1111X0AA

NAME: "Switch 1 - Power Supply A", DESCR: "Switch 1 - Power Supply A"
PID: PWR-C1-715WAC     , VID: V02  , SN: LIT2222ABCD

NAME: "Switch 2", DESCR: "WS-C3850-24P-E"
PID: WS-C3850-24P-E    , VID: V02  , SN: FOC3333X0CC
"#;

    const VERSION_OUTPUT: &str = r#"Cisco IOS Software [Fuji], Catalyst L3 Switch Software (CAT9K_IOSXE), Version 16.09.01, RELEASE SOFTWARE (fc2)
Technical Support: http://www.cisco.com/techsupport
System image file is "flash:packages.conf"
"#;

    #[test]
    fn parses_stack_members() {
        let inv = parse_inventory(STACK_INVENTORY);
        let units = inv.units();
        assert_eq!(units.len(), 2);
        assert_eq!(units[&1], "FOC1111X0AA");
        assert_eq!(units[&2], "FOC3333X0CC");
        assert!(!inv.is_chassis());
        assert_eq!(inv.primary_serial(), Some("FOC1111X0AA"));
    }

    #[test]
    fn parses_chassis_as_unit_zero() {
        let inv = parse_inventory(
            "NAME: \"Chassis\", DESCR: \"Cisco ISR4331 Chassis\"\nPID: ISR4331/K9        , VID: V04  , SN: FDO2020A0ZZ\n",
        );
        assert_eq!(inv.units()[&0], "FDO2020A0ZZ");
        assert!(inv.is_chassis());
    }

    #[test]
    fn strips_zero_padding() {
        assert_eq!(normalize_version("03.07.01"), "3.7.1");
        assert_eq!(normalize_version("3.07.1"), normalize_version("3.7.1"));
        assert_eq!(normalize_version("16.10.1a"), "16.10.1a");
        assert_eq!(normalize_version("15.2(07)E0"), "15.2(7)E0");
    }

    #[test]
    fn version_and_boot_mode() {
        let info = parse_version(VERSION_OUTPUT).unwrap();
        assert_eq!(info.version, "16.9.1");
        assert!(!info.bundle);
        assert!(info.satisfies("16.09.01"));

        let bundle = VERSION_OUTPUT.replace("packages.conf", "cat9k_iosxe.16.09.01.SPA.bin");
        let info = parse_version(&bundle).unwrap();
        assert!(info.bundle);
        assert_eq!(info.to_string(), "16.9.1 bundle");
        assert!(!info.satisfies("16.9.1"));
    }

    #[tokio::test]
    async fn probe_reads_both() {
        let dev = ScriptedDevice::new()
            .on("show inventory", STACK_INVENTORY)
            .on("show version", VERSION_OUTPUT);
        let (inv, version) = probe(&dev).await.unwrap();
        assert_eq!(inv.units().len(), 2);
        assert_eq!(version.version, "16.9.1");
    }

    #[tokio::test]
    async fn probe_failures_are_errors() {
        let dev = ScriptedDevice::new().fail("show inventory", "% Invalid input");
        assert!(matches!(probe(&dev).await, Err(ProbeError::Inventory(_))));

        let dev = ScriptedDevice::new().on("show inventory", "");
        assert!(matches!(probe(&dev).await, Err(ProbeError::NoSerials)));

        let dev = ScriptedDevice::new()
            .on("show inventory", STACK_INVENTORY)
            .on("show version", "garbage");
        assert!(matches!(probe(&dev).await, Err(ProbeError::NoVersion)));
    }
}
