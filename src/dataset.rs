// src/dataset.rs
use crate::error::SchemaError;
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

/// Where provisioning records come from: inline settings, then the
/// JSON array served at `url`.
pub struct DatasetSource {
    inline: Vec<Value>,
    url: Option<Url>,
    client: reqwest::Client,
}

/// Raw records plus a note when the remote part could not be fetched.
#[derive(Debug)]
pub struct Loaded {
    pub records: Value,
    pub warning: Option<String>,
}

impl DatasetSource {
    pub fn new(inline: Vec<Value>, url: Option<Url>, client: reqwest::Client) -> Self {
        Self {
            inline,
            url,
            client,
        }
    }

    /// Unreachable or empty sources yield no records; a body that is not a
    /// JSON array is a schema error.
    pub async fn load(&self) -> Result<Loaded, SchemaError> {
        let mut records = self.inline.clone();
        let mut warning = None;
        if let Some(url) = &self.url {
            match self.fetch(url).await {
                Ok(body) if body.trim().is_empty() => {}
                Ok(body) => match serde_json::from_str::<Value>(&body) {
                    Ok(Value::Array(remote)) => records.extend(remote),
                    Ok(_) => return Err(SchemaError::new("expecting JSON array of objects")),
                    Err(e) => return Err(SchemaError::new(format!("malformed dataset: {e}"))),
                },
                Err(e) => warning = Some(format!("Dataset {url} unavailable: {e}")),
            }
        }
        Ok(Loaded {
            records: Value::Array(records),
            warning,
        })
    }

    async fn fetch(&self, url: &Url) -> Result<String, reqwest::Error> {
        let response = self.client.get(url.clone()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(String::new());
        }
        response.error_for_status()?.text().await
    }
}
