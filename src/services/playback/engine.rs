use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::core::hanzi::Hanzi;
use crate::services::stroke::StrokeGeometry;

/// Result of one finished quiz attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizOutcome {
    pub total_mistakes: u32,
}

pub type QuizCallback = Box<dyn FnOnce(QuizOutcome) + Send>;

/// The stroke animation engine. Rendering is entirely its business; the
/// controller only drives it.
///
/// Callbacks handed to the engine may be invoked from inside any engine call.
pub trait AnimationEngine: Send {
    /// Receives the data requested through the controller's loader.
    fn load_char_data(&mut self, geometry: &StrokeGeometry);
    fn animate_character(&mut self);
    fn loop_character_animation(&mut self);
    fn show_character(&mut self);
    fn quiz(&mut self, on_complete: QuizCallback);
    fn cancel_quiz(&mut self);
}

pub trait EngineFactory: Send + Sync {
    /// Fails when the engine cannot be constructed, e.g. for an invalid
    /// container.
    fn create(&self, character: Hanzi, options: &EngineOptions) -> Result<Box<dyn AnimationEngine>>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineOptions {
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_size")]
    pub width: u32,
    #[serde(default = "default_size")]
    pub height: u32,
    #[serde(default = "default_padding")]
    pub padding: u32,
    #[serde(default = "default_true")]
    pub show_outline: bool,
    #[serde(default = "default_animation_speed")]
    pub stroke_animation_speed: f32,
    #[serde(default = "default_delay_between_strokes_ms")]
    pub delay_between_strokes_ms: u64,
    #[serde(default = "default_radical_color")]
    pub radical_color: String,
    #[serde(default = "default_stroke_color")]
    pub stroke_color: String,
    #[serde(default = "default_outline_color")]
    pub outline_color: String,
}

fn default_container() -> String {
    "hanzi-player".to_string()
}
fn default_size() -> u32 {
    300
}
fn default_padding() -> u32 {
    20
}
fn default_true() -> bool {
    true
}
fn default_animation_speed() -> f32 {
    1.0
}
fn default_delay_between_strokes_ms() -> u64 {
    200
}
fn default_radical_color() -> String {
    "#e11d48".to_string()
}
fn default_stroke_color() -> String {
    "#1a1a1a".to_string()
}
fn default_outline_color() -> String {
    "#e5e7eb".to_string()
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            container: default_container(),
            width: default_size(),
            height: default_size(),
            padding: default_padding(),
            show_outline: default_true(),
            stroke_animation_speed: default_animation_speed(),
            delay_between_strokes_ms: default_delay_between_strokes_ms(),
            radical_color: default_radical_color(),
            stroke_color: default_stroke_color(),
            outline_color: default_outline_color(),
        }
    }
}
