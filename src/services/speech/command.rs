use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Notify;

use crate::services::speech::{BackendKind, SpeechBackend, SpeechConfig, Utterance, Voice};

/// Runs an external synthesizer (e.g. `espeak-ng`) once per utterance. The
/// utterance ends when the process exits.
///
/// Arguments may contain `{text}`, `{lang}`, `{voice}` and `{rate}`
/// placeholders. Without a `{text}` placeholder the text is appended as the
/// last argument.
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
    voices: Vec<Voice>,
    cancelled: Notify,
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>, args: Vec<String>, voices: Vec<Voice>) -> Self {
        Self {
            program: program.into(),
            args,
            voices,
            cancelled: Notify::new(),
        }
    }

    pub fn from_config(config: &SpeechConfig) -> Option<Self> {
        let program = config.command.as_ref()?;
        info!("Using speech command: {}", program);
        Some(Self::new(
            program.clone(),
            config.args.clone(),
            config.voices.clone(),
        ))
    }

    pub fn render_args(&self, utterance: &Utterance) -> Vec<String> {
        let voice = utterance.voice.as_deref().unwrap_or(&utterance.lang);
        let rate = format!("{}", utterance.rate);
        let mut has_text = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains("{text}") {
                    has_text = true;
                }
                arg.replace("{text}", &utterance.text)
                    .replace("{lang}", &utterance.lang)
                    .replace("{voice}", voice)
                    .replace("{rate}", &rate)
            })
            .collect();
        if !has_text {
            args.push(utterance.text.clone());
        }
        args
    }
}

#[async_trait]
impl SpeechBackend for CommandSpeech {
    fn kind(&self) -> BackendKind {
        BackendKind::Synthesizer
    }

    async fn list_voices(&self) -> Result<Vec<Voice>> {
        Ok(self.voices.clone())
    }

    async fn speak(&self, utterance: &Utterance) -> Result<()> {
        let args = self.render_args(utterance);
        debug!("{} {:?}", self.program, args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run {}", self.program))?;

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if !status.success() {
                    return Err(anyhow!("{} exited with {}", self.program, status));
                }
                Ok(())
            }
            _ = self.cancelled.notified() => {
                debug!("Speech cancelled, stopping {}", self.program);
                child.kill().await.ok();
                Ok(())
            }
        }
    }

    fn cancel(&self) {
        self.cancelled.notify_waiters();
    }
}
