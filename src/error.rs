// src/error.rs
use crate::device::DeviceError;
use thiserror::Error;

/// Dataset shape violation, optionally pinned to a record index.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}{}", .index.map(|i| format!("record {}: ", i + 1)).unwrap_or_default(), .message)]
pub struct SchemaError {
    pub index: Option<usize>,
    pub message: String,
}

impl SchemaError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            index: None,
            message: message.into(),
        }
    }

    pub fn at(index: usize, message: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("inventory unreadable: {0}")]
    Inventory(#[source] DeviceError),
    #[error("version unreadable: {0}")]
    Version(#[source] DeviceError),
    #[error("no serial numbers found in inventory")]
    NoSerials,
    #[error("no version string found in show version output")]
    NoVersion,
}

/// Everything that aborts a run and leads to an abnormal shutdown.
#[derive(Debug, Error)]
pub enum ZtpError {
    #[error("invalid dataset: {0}")]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },
    #[error("{0} is not an installable image")]
    NotAnImage(String),
    #[error("cannot resolve {path} against base_url: {source}")]
    Url {
        path: String,
        #[source]
        source: url::ParseError,
    },
}
