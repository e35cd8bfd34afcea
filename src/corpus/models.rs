//! Canonical corpus entities produced by the normalizer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// Event type used when a record carries none.
pub const DEFAULT_EVENT_TYPE: &str = "other";

/// Emotion score on the 1..=5 scale. Zero and anything outside the scale mean "unset"
/// and are represented as `Option::None` by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct EmotionScore(u8);

impl EmotionScore {
    /// Neutral midpoint of the scale.
    pub const NEUTRAL: u8 = 3;

    /// Build a score, returning `None` for 0 and out-of-range values.
    pub fn new(value: i64) -> Option<Self> {
        if (1..=5).contains(&value) {
            Some(Self(value as u8))
        } else {
            None
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Human-readable label (1 = very negative ... 5 = very positive).
    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "very negative",
            2 => "negative",
            3 => "neutral",
            4 => "positive",
            _ => "very positive",
        }
    }

    /// Distance from the neutral midpoint.
    pub fn intensity(self) -> u8 {
        self.0.abs_diff(Self::NEUTRAL)
    }

    pub fn is_positive(self) -> bool {
        self.0 >= 4
    }

    pub fn is_negative(self) -> bool {
        self.0 <= 2
    }
}

impl TryFrom<u8> for EmotionScore {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value as i64).ok_or_else(|| format!("emotion score out of range: {value}"))
    }
}

impl From<EmotionScore> for u8 {
    fn from(score: EmotionScore) -> Self {
        score.0
    }
}

impl fmt::Display for EmotionScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Calendar-derived event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stable id (source id or content-derived)
    pub id: String,
    pub title: String,
    pub start: DateTime<FixedOffset>,
    pub end: Option<DateTime<FixedOffset>>,
    /// Type tag, lowercase-insensitive, defaults to "other"
    pub event_type: String,
    pub emotion: Option<EmotionScore>,
    /// Recurrence rule or marker, when the source event repeats
    pub recurrence: Option<String>,
    /// Remaining string fields of the source record
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Event {
    /// Day the event starts on, in its own offset.
    pub fn date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    pub fn emotion_label(&self) -> Option<&'static str> {
        self.emotion.map(EmotionScore::label)
    }
}

/// Reference from a conversation turn to the event it talks about.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventRef {
    pub id: Option<String>,
    pub title: Option<String>,
    pub start: Option<DateTime<FixedOffset>>,
}

/// Emotion attached to a conversation turn.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EmotionAnnotation {
    pub score: Option<EmotionScore>,
    pub label: Option<String>,
}

impl EmotionAnnotation {
    /// Explicit label if recorded, otherwise the label derived from the score.
    pub fn display_label(&self) -> Option<String> {
        self.label
            .clone()
            .filter(|l| !l.trim().is_empty())
            .or_else(|| self.score.map(|s| s.label().to_string()))
    }
}

/// One recorded bot question / user answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub bot_question: String,
    pub user_answer: String,
    pub event: Option<EventRef>,
    pub emotion: Option<EmotionAnnotation>,
    pub timestamp: Option<DateTime<FixedOffset>>,
}

impl ConversationTurn {
    /// Start of the linked event, falling back to when the turn was recorded.
    pub fn reference_time(&self) -> Option<DateTime<FixedOffset>> {
        self.event
            .as_ref()
            .and_then(|e| e.start)
            .or(self.timestamp)
    }

    pub fn linked_event_id(&self) -> Option<&str> {
        self.event
            .as_ref()
            .and_then(|e| e.id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn emotion_label(&self) -> Option<String> {
        self.emotion.as_ref().and_then(EmotionAnnotation::display_label)
    }
}

/// Normalized per-user corpus for one retrieval session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    pub user_id: String,
    pub events: Vec<Event>,
    pub conversations: Vec<ConversationTurn>,
}

impl Corpus {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.conversations.is_empty()
    }

    pub fn event(&self, id: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Event a turn talks about: by id, falling back to a case-insensitive title match.
    pub fn linked_event(&self, turn: &ConversationTurn) -> Option<&Event> {
        let reference = turn.event.as_ref()?;
        if let Some(event) = turn.linked_event_id().and_then(|id| self.event(id)) {
            return Some(event);
        }
        let title = reference.title.as_deref()?.trim().to_lowercase();
        self.events
            .iter()
            .find(|event| event.title.to_lowercase() == title)
    }
}
