use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::playback::{EngineOptions, PlaybackConfig};
use crate::services::prefetch::PrefetchConfig;
use crate::services::speech::SpeechConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_data_base_url")]
    pub data_base_url: String,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    #[serde(default)]
    pub cache_quota_bytes: Option<u64>,

    #[serde(default)]
    pub prefetch: PrefetchConfig,

    #[serde(default)]
    pub speech: SpeechConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub engine: EngineOptions,
}

fn default_data_base_url() -> String {
    "http://127.0.0.1:8080/".to_string()
}
fn default_cache_dir() -> String {
    "cache".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_base_url: default_data_base_url(),
            cache_dir: default_cache_dir(),
            cache_quota_bytes: None,
            prefetch: PrefetchConfig::default(),
            speech: SpeechConfig::default(),
            playback: PlaybackConfig::default(),
            engine: EngineOptions::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::speech::BackendKind;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.data_base_url, "http://127.0.0.1:8080/");
        assert_eq!(config.cache_dir, "cache");
        assert_eq!(config.prefetch.debounce_ms, 600);
        assert_eq!(config.speech.language, "zh-CN");
        assert_eq!(config.speech.utterance_gap_ms, 600);
        assert_eq!(config.speech.native_gap_ms, 2100);
        assert_eq!(config.speech.gap_for(BackendKind::NativeBridge).as_millis(), 2100);
        assert!(!config.playback.resume_quiz_after_reload);
        assert_eq!(config.playback.mistake_threshold, 5);
        assert_eq!(config.engine.width, 300);
        assert_eq!(config.engine.radical_color, "#e11d48");
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
data_base_url: "https://example.org/hanzi/"
prefetch:
  debounce_ms: 250
speech:
  command: espeak-ng
  args: ["-v", "cmn"]
playback:
  resume_quiz_after_reload: true
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.data_base_url, "https://example.org/hanzi/");
        assert_eq!(config.prefetch.debounce_ms, 250);
        assert_eq!(config.speech.command.as_deref(), Some("espeak-ng"));
        assert_eq!(config.speech.args, vec!["-v", "cmn"]);
        assert_eq!(config.speech.rate, 0.8);
        assert!(config.playback.resume_quiz_after_reload);
    }

    #[test]
    fn test_load_and_save() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        assert!(Config::load(&path).is_err());

        let mut config = Config::default();
        config.cache_quota_bytes = Some(5 * 1024 * 1024);
        config.save(&path)?;

        let loaded = Config::load(&path)?;
        assert_eq!(loaded.cache_quota_bytes, Some(5 * 1024 * 1024));
        assert_eq!(loaded.engine.delay_between_strokes_ms, 200);
        Ok(())
    }
}
