use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

pub mod command;

pub use command::CommandSpeech;

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpeechConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_rate")]
    pub rate: f32,
    /// Repetitions used when a character finishes loading.
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    #[serde(default = "default_utterance_gap_ms")]
    pub utterance_gap_ms: u64,
    #[serde(default = "default_native_gap_ms")]
    pub native_gap_ms: u64,
    /// External synthesizer program, e.g. `espeak-ng`.
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub voices: Vec<Voice>,
}

fn default_language() -> String {
    "zh-CN".to_string()
}
fn default_rate() -> f32 {
    0.8
}
fn default_repetitions() -> u32 {
    2
}
fn default_utterance_gap_ms() -> u64 {
    600
}
fn default_native_gap_ms() -> u64 {
    1500 + 600
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            rate: default_rate(),
            repetitions: default_repetitions(),
            utterance_gap_ms: default_utterance_gap_ms(),
            native_gap_ms: default_native_gap_ms(),
            command: None,
            args: Vec::new(),
            voices: Vec::new(),
        }
    }
}

impl SpeechConfig {
    /// Pause before the next utterance. A native bridge never reports the end
    /// of an utterance, so its gap is measured from dispatch and has to cover
    /// the utterance itself.
    pub fn gap_for(&self, kind: BackendKind) -> Duration {
        match kind {
            BackendKind::Synthesizer => Duration::from_millis(self.utterance_gap_ms),
            BackendKind::NativeBridge => Duration::from_millis(self.native_gap_ms),
        }
    }
}

// --- Backend ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub lang: String,
    pub voice: Option<String>,
    pub rate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Software voice engine; `speak` resolves when the utterance ends.
    Synthesizer,
    /// Device bridge with no completion signal; `speak` resolves on dispatch
    /// and ordering is paced by timer only.
    NativeBridge,
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    fn kind(&self) -> BackendKind;
    /// May legitimately be empty while the host is still enumerating voices.
    async fn list_voices(&self) -> Result<Vec<Voice>>;
    async fn speak(&self, utterance: &Utterance) -> Result<()>;
    fn cancel(&self);
}

fn normalize_locale(locale: &str) -> String {
    locale.replace('_', "-").to_ascii_lowercase()
}

/// Exact regional match first, then any voice of the same language family.
pub fn select_voice<'a>(voices: &'a [Voice], language: &str) -> Option<&'a Voice> {
    let wanted = normalize_locale(language);
    let family = wanted.split('-').next().unwrap_or_default().to_string();

    voices
        .iter()
        .find(|v| normalize_locale(&v.locale) == wanted)
        .or_else(|| {
            voices.iter().find(|v| {
                let locale = normalize_locale(&v.locale);
                locale == family || locale.starts_with(&format!("{}-", family))
            })
        })
}

pub fn build_utterance(text: &str, voices: &[Voice], config: &SpeechConfig) -> Utterance {
    match select_voice(voices, &config.language) {
        Some(voice) => Utterance {
            text: text.to_string(),
            lang: voice.locale.clone(),
            voice: Some(voice.name.clone()),
            rate: config.rate,
        },
        None => Utterance {
            text: text.to_string(),
            lang: config.language.clone(),
            voice: None,
            rate: config.rate,
        },
    }
}

// --- Voice catalog ---

/// Voice list shared by every sequencer in the process. Loaded on the first
/// narration, dropped again once no playback session holds it.
#[derive(Default)]
pub struct VoiceCatalog {
    voices: RwLock<Option<Vec<Voice>>>,
    holders: Mutex<usize>,
}

impl VoiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<VoiceCatalog> {
        static SHARED: OnceLock<Arc<VoiceCatalog>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(VoiceCatalog::new())).clone()
    }

    pub fn acquire(&self) {
        let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
        *holders += 1;
    }

    pub fn release(&self) {
        let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
        *holders = holders.saturating_sub(1);
        if *holders == 0 {
            debug!("No playback session left, releasing voice list");
            *self.voices.write().unwrap_or_else(|e| e.into_inner()) = None;
        }
    }

    pub fn holders(&self) -> usize {
        *self.holders.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_loaded(&self) -> bool {
        self.voices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn voices(&self) -> Vec<Voice> {
        self.voices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_default()
    }

    /// Returns the voice list, asking the backend when none is held. The
    /// result is only kept while some session holds the catalog, and an empty
    /// result is never kept, so a later call picks up voices the host
    /// enumerated in the meantime.
    pub async fn ensure_loaded(&self, backend: &dyn SpeechBackend) -> Vec<Voice> {
        let cached = self.voices.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(voices) = cached {
            return voices;
        }
        match backend.list_voices().await {
            Ok(voices) if !voices.is_empty() => {
                let holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
                if *holders > 0 {
                    info!("Loaded {} voices", voices.len());
                    *self.voices.write().unwrap_or_else(|e| e.into_inner()) = Some(voices.clone());
                } else {
                    debug!("Voice list loaded with no session left, not keeping it");
                }
                voices
            }
            Ok(voices) => {
                debug!("Voice list not available yet");
                voices
            }
            Err(e) => {
                warn!("Failed to list voices: {}", e);
                Vec::new()
            }
        }
    }
}

// --- Sequencer ---

/// Plays at most one narration sequence at a time.
pub struct SpeechSequencer {
    backend: Option<Arc<dyn SpeechBackend>>,
    catalog: Arc<VoiceCatalog>,
    config: SpeechConfig,
    sequence: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechSequencer {
    pub fn new(
        backend: Option<Arc<dyn SpeechBackend>>,
        config: SpeechConfig,
        catalog: Arc<VoiceCatalog>,
    ) -> Self {
        Self {
            backend,
            catalog,
            config,
            sequence: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// A sequencer with no speech capability; every call is a no-op.
    pub fn silent() -> Self {
        Self::new(None, SpeechConfig::default(), Arc::new(VoiceCatalog::new()))
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn config(&self) -> &SpeechConfig {
        &self.config
    }

    pub fn attach(&self) {
        self.catalog.acquire();
    }

    pub fn detach(&self) {
        self.catalog.release();
    }

    /// Replaces any running sequence with `repetitions` utterances of `text`.
    /// Must be called from within a tokio runtime.
    pub fn speak(&self, text: &str, repetitions: u32) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        self.cancel();
        if repetitions == 0 {
            return;
        }

        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let sequence = self.sequence.clone();
        let catalog = self.catalog.clone();
        let config = self.config.clone();
        let text = text.to_string();
        let gap = config.gap_for(backend.kind());

        let handle = tokio::spawn(async move {
            let voices = catalog.ensure_loaded(backend.as_ref()).await;
            for n in 0..repetitions {
                if n > 0 {
                    tokio::time::sleep(gap).await;
                }
                if sequence.load(Ordering::SeqCst) != id {
                    return;
                }
                let utterance = build_utterance(&text, &voices, &config);
                debug!("Speaking {} ({}/{})", text, n + 1, repetitions);
                if let Err(e) = backend.speak(&utterance).await {
                    warn!("TTS playback error: {}", e);
                    return;
                }
            }
        });

        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Waits for the running sequence to finish or be cancelled.
    pub async fn join(&self) {
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Stops the running sequence, if any. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if !handle.is_finished() {
                handle.abort();
                if let Some(backend) = &self.backend {
                    backend.cancel();
                }
            }
        }
    }
}

impl Drop for SpeechSequencer {
    fn drop(&mut self) {
        self.cancel();
    }
}
