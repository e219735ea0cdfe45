use crate::core::hanzi::Hanzi;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HanziError {
    #[error("input is empty")]
    Empty,
    #[error("'{0}' is not a CJK unified ideograph")]
    NotIdeograph(char),
    #[error("expected a single character, got '{0}'")]
    NotSingle(String),
    #[error("'{0}' is not one of the offered characters")]
    NotOffered(char),
}

/// Failures of the stroke data store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrokeError {
    #[error("no stroke data for '{0}'")]
    NotFound(Hanzi),
    #[error("failed to load stroke data for '{character}': {reason}")]
    Transfer { character: Hanzi, reason: String },
}

impl StrokeError {
    pub fn transfer(character: Hanzi, reason: impl ToString) -> Self {
        Self::Transfer {
            character,
            reason: reason.to_string(),
        }
    }
}

/// Errors the playback controller surfaces for a session. All of them end the
/// session until the next character change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("character '{0}' has no stroke data")]
    LoadNotFound(Hanzi),
    #[error("stroke data transfer failed: {0}")]
    LoadTransferError(String),
    #[error("animation engine failed to initialise: {0}")]
    InitError(String),
}

impl PlaybackError {
    /// Message shown to the user in place of the diagram.
    pub fn user_message(&self) -> &'static str {
        match self {
            PlaybackError::LoadNotFound(_) => "无法加载汉字数据。可能该字未收录或不是有效的汉字。",
            PlaybackError::LoadTransferError(_) => "笔画数据加载失败，请检查网络后重试。",
            PlaybackError::InitError(_) => "初始化失败。",
        }
    }
}

impl From<StrokeError> for PlaybackError {
    fn from(value: StrokeError) -> Self {
        match value {
            StrokeError::NotFound(c) => PlaybackError::LoadNotFound(c),
            StrokeError::Transfer { reason, .. } => PlaybackError::LoadTransferError(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("no character is ready for playback")]
    NotReady,
}
