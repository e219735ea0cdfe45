use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::HanziError;

const IDEOGRAPH_FIRST: char = '\u{4E00}';
const IDEOGRAPH_LAST: char = '\u{9FFF}';

/// A single CJK unified ideograph. This is the key for caching, prefetching
/// and playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hanzi(char);

impl Hanzi {
    pub fn is_ideograph(c: char) -> bool {
        (IDEOGRAPH_FIRST..=IDEOGRAPH_LAST).contains(&c)
    }

    /// Parses trimmed input that must be exactly one ideograph.
    pub fn parse(input: &str) -> Result<Self, HanziError> {
        let trimmed = input.trim();
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (None, _) => Err(HanziError::Empty),
            (Some(c), None) => Self::from_char(c),
            (Some(_), Some(_)) => Err(HanziError::NotSingle(trimmed.to_string())),
        }
    }

    pub fn from_char(c: char) -> Result<Self, HanziError> {
        if Self::is_ideograph(c) {
            Ok(Self(c))
        } else {
            Err(HanziError::NotIdeograph(c))
        }
    }

    pub fn as_char(&self) -> char {
        self.0
    }
}

impl fmt::Display for Hanzi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Hanzi {
    type Error = HanziError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Hanzi> for String {
    fn from(value: Hanzi) -> Self {
        value.0.to_string()
    }
}

/// Every ideograph in `input`, in order of first appearance.
pub fn extract_ideographs(input: &str) -> Vec<Hanzi> {
    let mut found: Vec<Hanzi> = Vec::new();
    for c in input.chars().filter(|c| Hanzi::is_ideograph(*c)) {
        let hanzi = Hanzi(c);
        if !found.contains(&hanzi) {
            found.push(hanzi);
        }
    }
    found
}

/// Characters offered for selection after a batch input, plus the one the
/// user is currently looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    candidates: Vec<Hanzi>,
    active: usize,
}

impl Selection {
    /// Returns `None` when the input holds no ideograph at all.
    pub fn from_input(input: &str) -> Option<Self> {
        let candidates = extract_ideographs(input);
        if candidates.is_empty() {
            return None;
        }
        Some(Self {
            candidates,
            active: 0,
        })
    }

    pub fn candidates(&self) -> &[Hanzi] {
        &self.candidates
    }

    pub fn active(&self) -> Hanzi {
        self.candidates[self.active]
    }

    pub fn select(&mut self, hanzi: Hanzi) -> Result<(), HanziError> {
        let index = self
            .candidates
            .iter()
            .position(|c| *c == hanzi)
            .ok_or(HanziError::NotOffered(hanzi.as_char()))?;
        self.active = index;
        Ok(())
    }
}
