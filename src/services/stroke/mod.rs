use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::error::StrokeError;
use crate::core::hanzi::Hanzi;
use crate::core::io::{CacheNamespace, Storage};

pub mod http;

pub use http::HttpStrokeSource;

/// Stroke paths and medians an animation engine needs to draw one character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeGeometry {
    pub strokes: Vec<String>,
    pub medians: Vec<Vec<[f64; 2]>>,
    #[serde(rename = "radStrokes", default, skip_serializing_if = "Option::is_none")]
    pub rad_strokes: Option<Vec<usize>>,
}

impl StrokeGeometry {
    pub fn stroke_count(&self) -> usize {
        self.strokes.len()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.strokes.is_empty() {
            return Err("no strokes".to_string());
        }
        if self.medians.len() != self.strokes.len() {
            return Err(format!(
                "{} strokes but {} medians",
                self.strokes.len(),
                self.medians.len()
            ));
        }
        if let Some(i) = self.medians.iter().position(|m| m.is_empty()) {
            return Err(format!("median {} is empty", i));
        }
        if let Some(rad) = &self.rad_strokes {
            if let Some(bad) = rad.iter().find(|i| **i >= self.strokes.len()) {
                return Err(format!("radical stroke index {} out of range", bad));
            }
        }
        Ok(())
    }

    /// Parses and validates a JSON payload.
    pub fn from_json(payload: &str) -> Result<Self, String> {
        let geometry: StrokeGeometry = serde_json::from_str(payload).map_err(|e| e.to_string())?;
        geometry.validate()?;
        Ok(geometry)
    }
}

/// Where a geometry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Network,
}

/// Source of truth for stroke data.
#[async_trait]
pub trait StrokeSource: Send + Sync {
    async fn fetch(&self, character: Hanzi) -> Result<StrokeGeometry, StrokeError>;
}

/// The `charDataLoader` contract the animation engine is fed through.
#[async_trait]
pub trait CharDataLoader: Send + Sync {
    async fn load_char_data(&self, character: Hanzi) -> Result<StrokeGeometry, StrokeError>;
}

/// Cache-aside accessor over a persistent [`Storage`] and a [`StrokeSource`].
///
/// Concurrent calls for one character are not merged: each races the cache
/// and the network independently, and the last write wins.
pub struct StrokeStore {
    storage: Arc<dyn Storage>,
    source: Arc<dyn StrokeSource>,
}

impl StrokeStore {
    pub fn new(storage: Arc<dyn Storage>, source: Arc<dyn StrokeSource>) -> Self {
        Self { storage, source }
    }

    pub async fn get(&self, character: Hanzi) -> Result<StrokeGeometry, StrokeError> {
        self.lookup(character).await.map(|(geometry, _)| geometry)
    }

    pub async fn lookup(&self, character: Hanzi) -> Result<(StrokeGeometry, Origin), StrokeError> {
        if let Some(geometry) = self.cached(character).await {
            debug!("Stroke data for {} served from cache", character);
            return Ok((geometry, Origin::Cache));
        }

        info!("Fetching stroke data for {}", character);
        let geometry = self.source.fetch(character).await?;
        self.write_back(character, &geometry).await;
        Ok((geometry, Origin::Network))
    }

    /// Reads the cache entry for `character`. Unreadable or invalid entries are
    /// removed and reported as a miss.
    pub async fn cached(&self, character: Hanzi) -> Option<StrokeGeometry> {
        let key = CacheNamespace::StrokeData.key(character);
        let raw = match self.storage.read(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Stroke cache read failed for {}: {}", key, e);
                return None;
            }
        };

        match StrokeGeometry::from_json(&raw) {
            Ok(geometry) => Some(geometry),
            Err(reason) => {
                warn!("Evicting corrupt stroke cache entry {}: {}", key, reason);
                if let Err(e) = self.storage.delete(&key).await {
                    warn!("Failed to evict {}: {}", key, e);
                }
                None
            }
        }
    }

    pub async fn evict(&self, character: Hanzi) -> Result<()> {
        self.storage
            .delete(&CacheNamespace::StrokeData.key(character))
            .await
    }

    async fn write_back(&self, character: Hanzi, geometry: &StrokeGeometry) {
        let key = CacheNamespace::StrokeData.key(character);
        let result = match serde_json::to_string(geometry) {
            Ok(json) => self.storage.write(&key, &json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("Skipping stroke data cache for {}: {}", character, e);
        }
    }
}

#[async_trait]
impl CharDataLoader for StrokeStore {
    async fn load_char_data(&self, character: Hanzi) -> Result<StrokeGeometry, StrokeError> {
        self.get(character).await
    }
}
