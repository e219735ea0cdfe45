use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::error::{CommandError, PlaybackError, StrokeError};
use crate::core::hanzi::Hanzi;
use crate::services::speech::SpeechSequencer;
use crate::services::stroke::{CharDataLoader, StrokeGeometry};

pub mod engine;

pub use engine::{AnimationEngine, EngineFactory, EngineOptions, QuizCallback, QuizOutcome};

pub const QUIZ_PROMPT: &str = "请跟随笔画书写！";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlaybackConfig {
    /// Whether a reload requested by the quiz-retry flow goes straight back
    /// into a quiz. When false every load ends in the demonstration view.
    #[serde(default)]
    pub resume_quiz_after_reload: bool,
    /// Highest mistake count that still earns the congratulatory message.
    #[serde(default = "default_mistake_threshold")]
    pub mistake_threshold: u32,
}

fn default_mistake_threshold() -> u32 {
    5
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            resume_quiz_after_reload: false,
            mistake_threshold: default_mistake_threshold(),
        }
    }
}

pub fn quiz_feedback(outcome: QuizOutcome, threshold: u32) -> String {
    if outcome.total_mistakes > threshold {
        format!("继续加油！错误数: {}", outcome.total_mistakes)
    } else {
        format!("太棒了！错误数: {}", outcome.total_mistakes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Loading,
    Error,
    Viewing { looping: bool },
    Quizzing,
}

/// What the caller renders.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub character: Option<Hanzi>,
    pub mode: Mode,
    pub error: Option<PlaybackError>,
    pub message: Option<String>,
    pub generation: u64,
}

struct Session {
    character: Hanzi,
    mode: Mode,
    engine: Option<Box<dyn AnimationEngine>>,
    error: Option<PlaybackError>,
    quiz_message: Option<String>,
    quiz_attempt: u64,
    resume_quiz: bool,
}

impl Session {
    fn ready_engine(&mut self) -> Result<&mut Box<dyn AnimationEngine>, CommandError> {
        match self.mode {
            Mode::Loading | Mode::Error => Err(CommandError::NotReady),
            _ => self.engine.as_mut().ok_or(CommandError::NotReady),
        }
    }
}

struct State {
    generation: u64,
    session: Option<Session>,
}

enum Event {
    QuizCompleted {
        generation: u64,
        attempt: u64,
        outcome: QuizOutcome,
    },
}

struct Shared {
    state: Mutex<State>,
    loader: Arc<dyn CharDataLoader>,
    factory: Arc<dyn EngineFactory>,
    speech: Arc<SpeechSequencer>,
    config: PlaybackConfig,
    options: EngineOptions,
    events: mpsc::UnboundedSender<Event>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Invalidates the current session and stops everything it started.
    fn teardown(&self, state: &mut State) {
        state.generation += 1;
        if let Some(mut session) = state.session.take() {
            debug!("Disposing playback session for {}", session.character);
            if session.mode == Mode::Quizzing {
                if let Some(engine) = session.engine.as_mut() {
                    engine.cancel_quiz();
                }
            }
            self.speech.cancel();
            self.speech.detach();
        }
    }

    fn finish_load(&self, generation: u64, result: Result<StrokeGeometry, StrokeError>) {
        let mut state = self.lock();
        if state.generation != generation {
            debug!("Discarding load result from superseded session {}", generation);
            return;
        }
        let Some(session) = state.session.as_mut() else {
            return;
        };

        let geometry = match result {
            Ok(geometry) => geometry,
            Err(e) => {
                error!("Stroke data load error for {}: {}", session.character, e);
                session.mode = Mode::Error;
                session.error = Some(e.into());
                return;
            }
        };

        let Some(engine) = session.engine.as_mut() else {
            return;
        };
        engine.load_char_data(&geometry);

        if session.resume_quiz {
            info!("Resuming quiz for {}", session.character);
            self.start_quiz(session, generation);
        } else {
            session.mode = Mode::Viewing { looping: false };
            engine.animate_character();
            let text = session.character.to_string();
            self.speech.speak(&text, self.speech.config().repetitions);
        }
    }

    fn start_quiz(&self, session: &mut Session, generation: u64) {
        let Some(engine) = session.engine.as_mut() else {
            return;
        };
        if session.mode == Mode::Quizzing {
            engine.cancel_quiz();
        }
        session.quiz_attempt += 1;
        session.mode = Mode::Quizzing;
        session.quiz_message = Some(QUIZ_PROMPT.to_string());

        let attempt = session.quiz_attempt;
        let events = self.events.clone();
        engine.quiz(Box::new(move |outcome| {
            // The controller may already be gone.
            let _ = events.send(Event::QuizCompleted {
                generation,
                attempt,
                outcome,
            });
        }));
    }

    fn apply(&self, event: Event) {
        match event {
            Event::QuizCompleted {
                generation,
                attempt,
                outcome,
            } => {
                let mut state = self.lock();
                if state.generation != generation {
                    return;
                }
                let Some(session) = state.session.as_mut() else {
                    return;
                };
                if session.mode != Mode::Quizzing || session.quiz_attempt != attempt {
                    debug!("Ignoring outcome of an abandoned quiz attempt");
                    return;
                }
                info!(
                    "Quiz on {} finished with {} mistakes",
                    session.character, outcome.total_mistakes
                );
                session.quiz_message = Some(quiz_feedback(outcome, self.config.mistake_threshold));
            }
        }
    }
}

/// Owns one animation engine per character and drives it through load,
/// demonstration, looping and quiz, together with narration.
///
/// Every asynchronous completion carries the generation it was started in and
/// is dropped when the controller has moved on since.
pub struct PlaybackController {
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
}

impl PlaybackController {
    /// Must be called from within a tokio runtime.
    pub fn new(
        loader: Arc<dyn CharDataLoader>,
        factory: Arc<dyn EngineFactory>,
        speech: Arc<SpeechSequencer>,
        config: PlaybackConfig,
        options: EngineOptions,
    ) -> Self {
        let (events, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                generation: 0,
                session: None,
            }),
            loader,
            factory,
            speech,
            config,
            options,
            events,
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.apply(event);
            }
        });

        Self { shared, pump }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let state = self.shared.lock();
        match &state.session {
            Some(session) => PlaybackSnapshot {
                character: Some(session.character),
                mode: session.mode,
                error: session.error.clone(),
                message: session.quiz_message.clone(),
                generation: state.generation,
            },
            None => PlaybackSnapshot {
                character: None,
                mode: Mode::Loading,
                error: None,
                message: None,
                generation: state.generation,
            },
        }
    }

    pub fn set_character(&self, character: Hanzi) {
        self.change_character(character, false);
    }

    /// Reloads `character` and, when `resume_quiz_after_reload` is set, goes
    /// straight back into a quiz once the data is in.
    pub fn reload_into_quiz(&self, character: Hanzi) {
        self.change_character(character, self.shared.config.resume_quiz_after_reload);
    }

    fn change_character(&self, character: Hanzi, resume_quiz: bool) {
        let shared = &self.shared;
        // Taken before the old session lets go, so the voice list survives
        // the swap.
        shared.speech.attach();

        let generation = {
            let mut state = shared.lock();
            shared.teardown(&mut state);
            let generation = state.generation;

            let engine = match shared.factory.create(character, &shared.options) {
                Ok(engine) => engine,
                Err(e) => {
                    error!("Animation engine init error for {}: {:#}", character, e);
                    state.session = Some(Session {
                        character,
                        mode: Mode::Error,
                        engine: None,
                        error: Some(PlaybackError::InitError(e.to_string())),
                        quiz_message: None,
                        quiz_attempt: 0,
                        resume_quiz: false,
                    });
                    return;
                }
            };

            state.session = Some(Session {
                character,
                mode: Mode::Loading,
                engine: Some(engine),
                error: None,
                quiz_message: None,
                quiz_attempt: 0,
                resume_quiz,
            });
            generation
        };

        let weak = Arc::downgrade(shared);
        let loader = shared.loader.clone();
        tokio::spawn(async move {
            let result = loader.load_char_data(character).await;
            if let Some(shared) = weak.upgrade() {
                shared.finish_load(generation, result);
            }
        });
    }

    /// Restarts the demonstration from the first stroke.
    pub fn replay(&self) -> Result<(), CommandError> {
        let mut state = self.shared.lock();
        let session = state.session.as_mut().ok_or(CommandError::NotReady)?;
        let was_quizzing = session.mode == Mode::Quizzing;
        let engine = session.ready_engine()?;
        if was_quizzing {
            engine.cancel_quiz();
        }
        engine.show_character();
        engine.animate_character();
        session.mode = Mode::Viewing { looping: false };
        session.quiz_message = None;
        Ok(())
    }

    pub fn loop_animation(&self) -> Result<(), CommandError> {
        let mut state = self.shared.lock();
        let session = state.session.as_mut().ok_or(CommandError::NotReady)?;
        let was_quizzing = session.mode == Mode::Quizzing;
        let engine = session.ready_engine()?;
        if was_quizzing {
            engine.cancel_quiz();
        }
        engine.show_character();
        engine.loop_character_animation();
        session.mode = Mode::Viewing { looping: true };
        session.quiz_message = None;
        Ok(())
    }

    pub fn quiz(&self) -> Result<(), CommandError> {
        let mut state = self.shared.lock();
        let generation = state.generation;
        let session = state.session.as_mut().ok_or(CommandError::NotReady)?;
        session.ready_engine()?;
        self.shared.start_quiz(session, generation);
        Ok(())
    }

    /// Speaks the current character once, whatever the mode.
    pub fn narrate(&self) -> Result<(), CommandError> {
        let state = self.shared.lock();
        let session = state.session.as_ref().ok_or(CommandError::NotReady)?;
        self.shared.speech.speak(&session.character.to_string(), 1);
        Ok(())
    }

    /// Tears the current session down. Later load or quiz completions from it
    /// are ignored.
    pub fn dispose(&self) {
        let mut state = self.shared.lock();
        self.shared.teardown(&mut state);
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.dispose();
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::MemoryStorage;
    use crate::services::speech::tests::MockSpeech;
    use crate::services::speech::{BackendKind, SpeechConfig, VoiceCatalog};
    use crate::services::stroke::tests::{hz, sample_geometry, MockSource};
    use crate::services::stroke::StrokeStore;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::oneshot;

    type Log = Arc<Mutex<Vec<String>>>;
    type QuizSlot = Arc<Mutex<Vec<QuizCallback>>>;

    struct MockEngine {
        character: Hanzi,
        log: Log,
        quizzes: QuizSlot,
    }

    impl MockEngine {
        fn record(&self, what: &str) {
            self.log.lock().unwrap().push(format!("{} {}", what, self.character));
        }
    }

    impl AnimationEngine for MockEngine {
        fn load_char_data(&mut self, geometry: &StrokeGeometry) {
            self.record(&format!("load{}", geometry.stroke_count()));
        }
        fn animate_character(&mut self) {
            self.record("animate");
        }
        fn loop_character_animation(&mut self) {
            self.record("loop");
        }
        fn show_character(&mut self) {
            self.record("show");
        }
        fn quiz(&mut self, on_complete: QuizCallback) {
            self.record("quiz");
            self.quizzes.lock().unwrap().push(on_complete);
        }
        fn cancel_quiz(&mut self) {
            self.record("cancel_quiz");
        }
    }

    #[derive(Default)]
    struct MockFactory {
        log: Log,
        quizzes: QuizSlot,
        fail: bool,
    }

    impl EngineFactory for MockFactory {
        fn create(&self, character: Hanzi, options: &EngineOptions) -> Result<Box<dyn AnimationEngine>> {
            if self.fail || options.container.is_empty() {
                return Err(anyhow!("invalid container"));
            }
            self.log.lock().unwrap().push(format!("create {}", character));
            Ok(Box::new(MockEngine {
                character,
                log: self.log.clone(),
                quizzes: self.quizzes.clone(),
            }))
        }
    }

    /// Loader whose results the test releases one at a time.
    #[derive(Default)]
    struct GatedLoader {
        gates: Mutex<HashMap<Hanzi, oneshot::Receiver<Result<StrokeGeometry, StrokeError>>>>,
    }

    impl GatedLoader {
        fn gate(&self, character: Hanzi) -> oneshot::Sender<Result<StrokeGeometry, StrokeError>> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().insert(character, rx);
            tx
        }
    }

    #[async_trait]
    impl CharDataLoader for GatedLoader {
        async fn load_char_data(&self, character: Hanzi) -> Result<StrokeGeometry, StrokeError> {
            let gate = self.gates.lock().unwrap().remove(&character);
            match gate {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(StrokeError::transfer(character, "gate dropped"))),
                None => Err(StrokeError::transfer(character, "no gate")),
            }
        }
    }

    struct Harness {
        controller: PlaybackController,
        factory: Arc<MockFactory>,
        speech: Arc<MockSpeech>,
        catalog: Arc<VoiceCatalog>,
    }

    impl Harness {
        fn new(loader: Arc<dyn CharDataLoader>, factory: MockFactory, config: PlaybackConfig) -> Self {
            let factory = Arc::new(factory);
            let speech = Arc::new(MockSpeech::new(BackendKind::Synthesizer, vec![]));
            let catalog = Arc::new(VoiceCatalog::new());
            let sequencer = Arc::new(SpeechSequencer::new(
                Some(speech.clone()),
                SpeechConfig::default(),
                catalog.clone(),
            ));
            let controller = PlaybackController::new(
                loader,
                factory.clone(),
                sequencer,
                config,
                EngineOptions::default(),
            );
            Self {
                controller,
                factory,
                speech,
                catalog,
            }
        }

        fn with_store(entries: &[(&str, usize)]) -> (Self, Arc<MockSource>) {
            let source = Arc::new(MockSource::with(entries));
            let store = Arc::new(StrokeStore::new(Arc::new(MemoryStorage::new()), source.clone()));
            (
                Self::new(store, MockFactory::default(), PlaybackConfig::default()),
                source,
            )
        }

        fn mode(&self) -> Mode {
            self.controller.snapshot().mode
        }

        fn log(&self) -> Vec<String> {
            self.factory.log.lock().unwrap().clone()
        }

        fn complete_quiz(&self, index: usize, mistakes: u32) {
            let callback = self.factory.quizzes.lock().unwrap().remove(index);
            callback(QuizOutcome {
                total_mistakes: mistakes,
            });
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        settle().await;
    }

    #[test]
    fn test_quiz_feedback_threshold() {
        let msg = |n| quiz_feedback(QuizOutcome { total_mistakes: n }, 5);
        assert_eq!(msg(0), "太棒了！错误数: 0");
        assert_eq!(msg(3), "太棒了！错误数: 3");
        assert_eq!(msg(5), "太棒了！错误数: 5");
        assert_eq!(msg(6), "继续加油！错误数: 6");
        assert_eq!(msg(7), "继续加油！错误数: 7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_load_animates_and_narrates_twice() {
        let (h, _) = Harness::with_store(&[("汉", 5)]);
        h.controller.set_character(hz("汉"));
        assert_eq!(h.mode(), Mode::Loading);

        settle().await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.character, Some(hz("汉")));
        assert_eq!(snapshot.mode, Mode::Viewing { looping: false });
        assert_eq!(snapshot.error, None);
        assert_eq!(h.log(), vec!["create 汉", "load5 汉", "animate 汉"]);

        advance(5000).await;
        assert_eq!(h.speech.texts(), vec!["汉", "汉"]);
    }

    #[tokio::test]
    async fn test_not_found_enters_error() {
        let (h, _) = Harness::with_store(&[]);
        h.controller.set_character(hz("字"));
        settle().await;

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.mode, Mode::Error);
        assert_eq!(snapshot.error, Some(PlaybackError::LoadNotFound(hz("字"))));
        assert_eq!(
            snapshot.error.unwrap().user_message(),
            "无法加载汉字数据。可能该字未收录或不是有效的汉字。"
        );
        assert_eq!(h.controller.replay(), Err(CommandError::NotReady));
        assert_eq!(h.controller.loop_animation(), Err(CommandError::NotReady));
        assert_eq!(h.controller.quiz(), Err(CommandError::NotReady));
        assert_eq!(h.log(), vec!["create 字"]);
    }

    #[tokio::test]
    async fn test_transfer_failure_enters_error() {
        let source = Arc::new(MockSource::failing());
        let store = Arc::new(StrokeStore::new(Arc::new(MemoryStorage::new()), source));
        let h = Harness::new(store, MockFactory::default(), PlaybackConfig::default());

        h.controller.set_character(hz("汉"));
        settle().await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.mode, Mode::Error);
        assert!(matches!(snapshot.error, Some(PlaybackError::LoadTransferError(_))));
    }

    #[tokio::test]
    async fn test_engine_init_failure_skips_load() {
        let source = Arc::new(MockSource::with(&[("汉", 5)]));
        let store = Arc::new(StrokeStore::new(Arc::new(MemoryStorage::new()), source.clone()));
        let factory = MockFactory {
            fail: true,
            ..MockFactory::default()
        };
        let h = Harness::new(store, factory, PlaybackConfig::default());

        h.controller.set_character(hz("汉"));
        settle().await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.mode, Mode::Error);
        assert!(matches!(snapshot.error, Some(PlaybackError::InitError(_))));
        assert_eq!(source.call_count(), 0);
        assert_eq!(h.controller.replay(), Err(CommandError::NotReady));
    }

    #[tokio::test]
    async fn test_stale_load_failure_does_not_touch_new_session() {
        let loader = Arc::new(GatedLoader::default());
        let old = loader.gate(hz("汉"));
        let new = loader.gate(hz("语"));
        let h = Harness::new(loader.clone(), MockFactory::default(), PlaybackConfig::default());

        h.controller.set_character(hz("汉"));
        settle().await;
        h.controller.set_character(hz("语"));
        settle().await;

        new.send(Ok(sample_geometry(9))).unwrap();
        settle().await;
        assert_eq!(h.mode(), Mode::Viewing { looping: false });

        old.send(Err(StrokeError::NotFound(hz("汉")))).unwrap();
        settle().await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.character, Some(hz("语")));
        assert_eq!(snapshot.mode, Mode::Viewing { looping: false });
        assert_eq!(snapshot.error, None);
    }

    #[tokio::test]
    async fn test_stale_load_success_does_not_end_loading() {
        let loader = Arc::new(GatedLoader::default());
        let old = loader.gate(hz("汉"));
        let new = loader.gate(hz("语"));
        let h = Harness::new(loader.clone(), MockFactory::default(), PlaybackConfig::default());

        h.controller.set_character(hz("汉"));
        h.controller.set_character(hz("语"));
        settle().await;

        old.send(Ok(sample_geometry(5))).unwrap();
        settle().await;
        assert_eq!(h.mode(), Mode::Loading);
        assert!(!h.log().iter().any(|l| l.starts_with("load")));

        new.send(Err(StrokeError::transfer(hz("语"), "timeout"))).unwrap();
        settle().await;
        assert_eq!(h.mode(), Mode::Error);
    }

    #[tokio::test]
    async fn test_commands_while_loading_are_rejected() {
        let loader = Arc::new(GatedLoader::default());
        let _gate = loader.gate(hz("汉"));
        let h = Harness::new(loader.clone(), MockFactory::default(), PlaybackConfig::default());

        assert_eq!(h.controller.replay(), Err(CommandError::NotReady));
        assert_eq!(h.controller.narrate(), Err(CommandError::NotReady));

        h.controller.set_character(hz("汉"));
        settle().await;
        assert_eq!(h.controller.replay(), Err(CommandError::NotReady));
        assert_eq!(h.controller.quiz(), Err(CommandError::NotReady));
        assert_eq!(h.mode(), Mode::Loading);
        // Narration does not depend on the mode.
        assert_eq!(h.controller.narrate(), Ok(()));
    }

    #[tokio::test]
    async fn test_replay_loop_and_quiz_transitions() {
        let (h, _) = Harness::with_store(&[("汉", 5)]);
        h.controller.set_character(hz("汉"));
        settle().await;

        h.controller.loop_animation().unwrap();
        assert_eq!(h.mode(), Mode::Viewing { looping: true });

        h.controller.quiz().unwrap();
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.mode, Mode::Quizzing);
        assert_eq!(snapshot.message.as_deref(), Some(QUIZ_PROMPT));

        h.controller.replay().unwrap();
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.mode, Mode::Viewing { looping: false });
        assert_eq!(snapshot.message, None);

        assert_eq!(
            h.log(),
            vec![
                "create 汉",
                "load5 汉",
                "animate 汉",
                "show 汉",
                "loop 汉",
                "quiz 汉",
                "cancel_quiz 汉",
                "show 汉",
                "animate 汉",
            ]
        );
    }

    #[tokio::test]
    async fn test_quiz_completion_messages() {
        let (h, _) = Harness::with_store(&[("汉", 5)]);
        h.controller.set_character(hz("汉"));
        settle().await;

        h.controller.quiz().unwrap();
        h.complete_quiz(0, 3);
        settle().await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.mode, Mode::Quizzing);
        assert_eq!(snapshot.message.as_deref(), Some("太棒了！错误数: 3"));

        h.controller.quiz().unwrap();
        h.complete_quiz(0, 7);
        settle().await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.mode, Mode::Quizzing);
        assert_eq!(snapshot.message.as_deref(), Some("继续加油！错误数: 7"));
    }

    #[tokio::test]
    async fn test_abandoned_quiz_outcome_is_ignored() {
        let (h, _) = Harness::with_store(&[("汉", 5), ("语", 9)]);
        h.controller.set_character(hz("汉"));
        settle().await;

        h.controller.quiz().unwrap();
        h.controller.replay().unwrap();
        h.complete_quiz(0, 2);
        settle().await;
        assert_eq!(h.controller.snapshot().message, None);

        h.controller.quiz().unwrap();
        h.controller.set_character(hz("语"));
        settle().await;
        h.complete_quiz(0, 1);
        settle().await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.character, Some(hz("语")));
        assert_eq!(snapshot.mode, Mode::Viewing { looping: false });
        assert_eq!(snapshot.message, None);
    }

    #[tokio::test]
    async fn test_reload_into_quiz_respects_flag() {
        let source = Arc::new(MockSource::with(&[("汉", 5)]));
        let store = Arc::new(StrokeStore::new(Arc::new(MemoryStorage::new()), source));
        let resume = PlaybackConfig {
            resume_quiz_after_reload: true,
            ..PlaybackConfig::default()
        };
        let h = Harness::new(store.clone(), MockFactory::default(), resume);

        h.controller.reload_into_quiz(hz("汉"));
        settle().await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.mode, Mode::Quizzing);
        assert_eq!(snapshot.message.as_deref(), Some(QUIZ_PROMPT));
        assert_eq!(h.log(), vec!["create 汉", "load5 汉", "quiz 汉"]);

        let h = Harness::new(store, MockFactory::default(), PlaybackConfig::default());
        h.controller.reload_into_quiz(hz("汉"));
        settle().await;
        assert_eq!(h.mode(), Mode::Viewing { looping: false });
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_mid_narration_silences_the_rest() {
        let (h, _) = Harness::with_store(&[("汉", 5)]);
        h.controller.set_character(hz("汉"));
        settle().await;
        assert_eq!(h.speech.texts(), vec!["汉"]);

        advance(1200).await;
        h.controller.dispose();
        advance(10_000).await;

        assert_eq!(h.speech.texts(), vec!["汉"]);
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.character, None);
        assert_eq!(h.catalog.holders(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_narrate_supersedes_auto_narration() {
        let (h, _) = Harness::with_store(&[("汉", 5)]);
        h.controller.set_character(hz("汉"));
        settle().await;

        advance(1200).await;
        h.controller.narrate().unwrap();
        advance(10_000).await;
        assert_eq!(h.speech.texts(), vec!["汉", "汉"]);
        assert_eq!(h.speech.offsets_ms()[1], 1200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_character_change_cancels_speech_and_keeps_voice_hold() {
        let (h, _) = Harness::with_store(&[("汉", 5), ("语", 9)]);
        h.controller.set_character(hz("汉"));
        settle().await;
        h.controller.set_character(hz("语"));
        settle().await;
        assert_eq!(h.catalog.holders(), 1);

        advance(10_000).await;
        assert_eq!(h.speech.texts(), vec!["汉", "语", "语"]);

        drop(h.controller);
        assert_eq!(h.catalog.holders(), 0);
    }
}
