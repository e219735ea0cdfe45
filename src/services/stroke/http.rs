use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use url::Url;

use crate::core::error::StrokeError;
use crate::core::hanzi::Hanzi;
use crate::services::stroke::{StrokeGeometry, StrokeSource};

/// Fetches `GET {base}/data/{character}.json`.
pub struct HttpStrokeSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpStrokeSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).with_context(|| format!("Invalid data base URL: {}", base_url))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    pub fn url_for(&self, character: Hanzi) -> Result<Url> {
        Ok(self.base_url.join(&format!("data/{}.json", character))?)
    }
}

#[async_trait]
impl StrokeSource for HttpStrokeSource {
    async fn fetch(&self, character: Hanzi) -> Result<StrokeGeometry, StrokeError> {
        let url = self
            .url_for(character)
            .map_err(|e| StrokeError::transfer(character, e))?;
        debug!("GET {}", url);

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StrokeError::transfer(character, e))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StrokeError::NotFound(character));
        }
        if !status.is_success() {
            return Err(StrokeError::transfer(character, format!("HTTP {}", status)));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| StrokeError::transfer(character, e))?;
        StrokeGeometry::from_json(&body)
            .map_err(|reason| StrokeError::transfer(character, format!("malformed payload: {}", reason)))
    }
}
