// src/files.rs
use crate::device::Device;
use regex::Regex;
use std::sync::LazyLock;

static HEX_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\S{8}: +(\S{8} +\S{8} +\S{8} +\S{8})").expect("valid hex row regex")
});

/// Result of a `more <url>` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    Content(String),
    Failed(String),
}

/// Fetches a file through the device; failures are reported, not raised.
pub async fn download<D: Device>(device: &D, url: &str) -> Download {
    match device.execute(&format!("more {url}")).await {
        Ok(output) => parse_more(url, &output),
        Err(e) => Download::Failed(e.to_string()),
    }
}

/// Extracts the file body from `more <url>` output.
pub fn parse_more(url: &str, output: &str) -> Download {
    if let Some(error) = output
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("%Error"))
    {
        return Download::Failed(error.to_string());
    }
    let marker = format!("Loading {url} ");
    let body = match output.find(&marker) {
        Some(pos) => &output[pos + marker.len()..],
        None => return Download::Content(String::new()),
    };
    Download::Content(decode_hex_dump(body))
}

/// Decodes the hex/text layout `more` uses for non-text files and returns
/// anything else unchanged. `X` marks padding in the last row.
pub fn decode_hex_dump(text: &str) -> String {
    let mut bytes = Vec::new();
    let mut rows = 0;
    for caps in HEX_ROW.captures_iter(text) {
        rows += 1;
        let digits = caps[1]
            .chars()
            .filter(|c| *c != ' ' && *c != 'X')
            .collect::<String>();
        match hex::decode(&digits) {
            Ok(row) => bytes.extend(row),
            Err(_) => return text.to_string(),
        }
    }
    if rows == 0 {
        return text.to_string();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
