// src/schema.rs
use crate::error::SchemaError;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use url::Url;

/// One entry of the provisioning dataset. A record without `stack` holds
/// the defaults for every other record.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProvisioningRecord {
    /// Target unit number -> serial number.
    #[serde(default)]
    pub stack: Option<BTreeMap<u32, String>>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub install: Option<String>,
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub subst: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub cli: Option<String>,
    #[serde(default)]
    pub save: Option<bool>,
    #[serde(default)]
    pub template: Option<String>,
}

impl ProvisioningRecord {
    pub fn is_defaults(&self) -> bool {
        self.stack.is_none()
    }
}

/// Checks the raw dataset and returns it unchanged when it is valid.
pub fn validate(data: &Value) -> Result<&[Value], SchemaError> {
    let records = data
        .as_array()
        .ok_or_else(|| SchemaError::new("expecting JSON array of objects"))?;
    let empty = Map::new();
    let defaults = records
        .iter()
        .filter_map(Value::as_object)
        .find(|r| !r.contains_key("stack"))
        .unwrap_or(&empty);

    let mut num_defaults = 0;
    let mut stack_values = HashSet::new();
    for (index, record) in records.iter().enumerate() {
        let my = record
            .as_object()
            .ok_or_else(|| SchemaError::at(index, "expecting JSON array of objects"))?;
        let err = |message: &str| SchemaError::at(index, message);

        if let Some(stack) = my.get("stack") {
            let stack = stack
                .as_object()
                .ok_or_else(|| err("'stack' must be JSON object"))?;
            if !stack.keys().all(|k| !k.is_empty() && k.bytes().all(|b| b.is_ascii_digit())) {
                return Err(err("'stack' object name must be a number"));
            }
            for value in stack.values() {
                let serial = value
                    .as_str()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| err("empty 'stack' object value not allowed"))?;
                // cumulative across records, in dataset order
                if !stack_values.insert(serial) {
                    return Err(err("'stack' object values must be unique"));
                }
            }
        } else {
            num_defaults += 1;
            if num_defaults > 1 {
                return Err(err("only one defaults record allowed"));
            }
        }

        let merged = |key: &str| my.get(key).or_else(|| defaults.get(key));
        if merged("version").is_some() != merged("install").is_some() {
            return Err(err("'version' and 'install' must be specified together"));
        }

        if let Some(subst) = my.get("subst") {
            let subst = subst
                .as_object()
                .ok_or_else(|| err("'subst' must be JSON object"))?;
            if subst.keys().any(|k| k.starts_with('$')) {
                return Err(err("'subst' object name must not start with '$'"));
            }
        }

        if let Some(base_url) = my.get("base_url") {
            let ok = base_url
                .as_str()
                .and_then(|s| Url::parse(s).ok())
                .is_some_and(|u| u.scheme() == "http" && u.path() == "/file/");
            if !ok {
                return Err(err("'base_url' must be an http URL with path /file/"));
            }
        }

        for key in ["install", "config"] {
            let Some(value) = my.get(key) else { continue };
            let value = value
                .as_str()
                .ok_or_else(|| SchemaError::at(index, format!("'{key}' must be a string")))?;
            if is_relative(value) && merged("base_url").is_none() {
                return Err(err("base_url required for relative paths"));
            }
        }

        if my.values().any(|v| v.as_object().is_some_and(Map::is_empty)) {
            return Err(err("empty JSON object not allowed"));
        }
        if my.keys().any(|k| k.trim().is_empty()) {
            return Err(err("empty JSON object name not allowed"));
        }
    }
    Ok(records.as_slice())
}

/// Validates and converts the raw dataset into typed records.
pub fn parse(data: &Value) -> Result<Vec<ProvisioningRecord>, SchemaError> {
    validate(data)?
        .iter()
        .enumerate()
        .map(|(index, record)| {
            ProvisioningRecord::deserialize(record).map_err(|e| SchemaError::at(index, e.to_string()))
        })
        .collect()
}

/// A value without URL scheme is a path relative to `base_url`.
pub fn is_relative(value: &str) -> bool {
    matches!(Url::parse(value), Err(url::ParseError::RelativeUrlWithoutBase))
}
