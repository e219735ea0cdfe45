use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::hanzi::Hanzi;
use crate::services::stroke::CharDataLoader;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PrefetchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    600
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Warms the stroke store while the user is still typing.
///
/// Every `schedule` call supersedes the previous one; only a character that
/// survives a full quiet window is fetched.
pub struct PrefetchScheduler {
    loader: Arc<dyn CharDataLoader>,
    debounce: Duration,
    latest: Arc<AtomicU64>,
}

impl PrefetchScheduler {
    pub fn new(loader: Arc<dyn CharDataLoader>, config: &PrefetchConfig) -> Self {
        Self {
            loader,
            debounce: Duration::from_millis(config.debounce_ms),
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns immediately. Any input restarts the quiet window; input that is
    /// not a single ideograph schedules nothing.
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, input: &str) {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let Ok(character) = Hanzi::parse(input) else {
            return;
        };

        let latest = self.latest.clone();
        let loader = self.loader.clone();
        let debounce = self.debounce;

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if latest.load(Ordering::SeqCst) != ticket {
                return;
            }
            debug!("Prefetching data for: {}", character);
            if let Err(e) = loader.load_char_data(character).await {
                debug!("Prefetch for {} failed: {}", character, e);
            }
        });
    }

    /// Drops whatever is waiting for its quiet window.
    pub fn cancel(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }
}
