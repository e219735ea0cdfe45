use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use futures_util::stream::{self, StreamExt};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use hanzi_flow::core::config::Config;
use hanzi_flow::core::hanzi::extract_ideographs;
use hanzi_flow::core::io::{CacheNamespace, NativeStorage, Storage};
use hanzi_flow::services::speech::{CommandSpeech, SpeechBackend, SpeechSequencer, VoiceCatalog};
use hanzi_flow::services::stroke::{HttpStrokeSource, Origin, StrokeStore};

#[derive(Parser)]
#[command(name = "hanzi-flow", about = "Stroke-order data cache and narration tools")]
struct Cli {
    /// Path to the YAML configuration
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch stroke data for every character in TEXT into the cache
    Warm {
        text: String,
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Drop cached stroke data for every character in TEXT
    Evict { text: String },
    /// Narrate TEXT through the configured speech command
    Speak {
        text: String,
        #[arg(short = 'n', long, default_value_t = 1)]
        repetitions: u32,
    },
    /// Show how much the cache holds
    Usage,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        warn!("{} not found, using defaults", cli.config.display());
        Config::default()
    };

    let storage: Arc<dyn Storage> =
        Arc::new(NativeStorage::new(&config.cache_dir).with_quota(config.cache_quota_bytes));

    match cli.command {
        Commands::Warm { text, concurrency } => {
            let characters = extract_ideographs(&text);
            if characters.is_empty() {
                bail!("No Chinese characters in '{}'", text);
            }
            let source = Arc::new(HttpStrokeSource::new(&config.data_base_url)?);
            let store = StrokeStore::new(storage.clone(), source);

            let results: Vec<_> = stream::iter(characters)
                .map(|c| {
                    let store = &store;
                    async move { (c, store.lookup(c).await) }
                })
                .buffered(concurrency.max(1))
                .collect()
                .await;

            let mut failed = 0;
            for (c, result) in results {
                match result {
                    Ok((geometry, origin)) => {
                        let origin = match origin {
                            Origin::Cache => "cache",
                            Origin::Network => "network",
                        };
                        println!("{}  {:>2} strokes  ({})", c, geometry.stroke_count(), origin);
                    }
                    Err(e) => {
                        failed += 1;
                        println!("{}  {}", c, e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} character(s) could not be loaded", failed);
            }
        }
        Commands::Evict { text } => {
            for c in extract_ideographs(&text) {
                storage.delete(&CacheNamespace::StrokeData.key(c)).await?;
                println!("Evicted {}", c);
            }
        }
        Commands::Speak { text, repetitions } => {
            let Some(backend) = CommandSpeech::from_config(&config.speech) else {
                bail!("No speech command configured (speech.command in {})", cli.config.display());
            };
            let backend: Arc<dyn SpeechBackend> = Arc::new(backend);
            let speech = SpeechSequencer::new(Some(backend), config.speech.clone(), VoiceCatalog::shared());
            speech.attach();
            speech.speak(&text, repetitions);
            speech.join().await;
            speech.detach();
        }
        Commands::Usage => {
            let keys = storage.list(CacheNamespace::StrokeData.prefix()).await?;
            let bytes = storage.usage().await?;
            info!("Cache dir: {}", config.cache_dir);
            println!("{} characters cached, {} KB", keys.len(), bytes / 1024);
        }
    }

    Ok(())
}
