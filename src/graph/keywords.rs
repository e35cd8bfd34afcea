//! Keyword tokenizer, synonym table and query lexicons.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::corpus::{ConversationTurn, Event, DEFAULT_EVENT_TYPE};
use crate::error::{Error, Result};

/// Feeling-related query terms that trigger the emotion stage.
pub const EMOTION_TERMS: &[&str] = &[
    "feel", "feeling", "feelings", "felt", "emotion", "emotions", "emotional", "mood", "happy",
    "happiness", "sad", "sadness", "angry", "anger", "upset", "stress", "stressed", "stressful",
    "anxious", "anxiety", "good", "great", "bad", "terrible", "awful", "enjoy", "enjoyed",
    "enjoyable", "fun", "love", "loved", "hate", "hated", "tired", "excited", "exciting",
    "relaxed", "calm", "joy", "joyful", "pleasant", "unpleasant", "satisfied", "frustrated",
    "worried", "nice", "best", "worst", "기분", "감정", "행복", "슬픔", "스트레스",
];

pub const POSITIVE_TERMS: &[&str] = &[
    "happy", "happiness", "good", "great", "enjoy", "enjoyed", "enjoyable", "fun", "love",
    "loved", "excited", "exciting", "relaxed", "calm", "joy", "joyful", "pleasant", "satisfied",
    "nice", "best", "행복",
];

pub const NEGATIVE_TERMS: &[&str] = &[
    "sad", "sadness", "angry", "anger", "upset", "stress", "stressed", "stressful", "anxious",
    "anxiety", "bad", "terrible", "awful", "hate", "hated", "tired", "unpleasant", "frustrated",
    "worried", "worst", "슬픔", "스트레스",
];

/// Relationship / pattern query terms.
pub const RELATION_TERMS: &[&str] = &[
    "relation", "relations", "relationship", "relationships", "related", "pattern", "patterns",
    "together", "connection", "connected", "between", "correlation", "link", "linked", "관계",
    "패턴",
];

/// Time-oriented query terms.
pub const TIME_TERMS: &[&str] = &[
    "when", "time", "morning", "afternoon", "evening", "night", "today", "yesterday", "week",
    "weekend", "day", "date", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday",
    "sunday", "recent", "recently", "early", "late", "언제", "아침", "저녁",
];

/// Activity-type query terms.
pub const TYPE_TERMS: &[&str] = &[
    "type", "types", "kind", "category", "activity", "activities", "work", "meeting", "exercise",
    "health", "social", "meal", "study", "travel", "hobby",
];

/// Filler words left out of keyword statistics.
pub const STOPWORDS: &[&str] = &[
    "the", "and", "or", "but", "a", "an", "of", "in", "on", "at", "for", "to", "with", "was",
    "were", "is", "are", "it", "that", "this", "my", "me", "so", "very", "really", "just",
];

/// Split text on whitespace, strip edge punctuation, lowercase, keep tokens longer than
/// one character. Order of first occurrence is preserved; duplicates are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split_whitespace()
        .map(|raw| raw.trim_matches(|c: char| !c.is_alphanumeric()))
        .map(str::to_lowercase)
        .filter(|token| token.chars().count() > 1)
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

/// Keywords of an event: title tokens followed by the lowercased type tag.
pub fn event_keywords(event: &Event) -> Vec<String> {
    let mut keywords = tokenize(&event.title);
    let event_type = event.event_type.trim().to_lowercase();
    if event_type.chars().count() > 1
        && event_type != DEFAULT_EVENT_TYPE
        && !keywords.contains(&event_type)
    {
        keywords.push(event_type);
    }
    keywords
}

/// Keywords of a conversation turn: answer tokens plus any emotion terms the
/// answer contains.
pub fn conversation_keywords(turn: &ConversationTurn) -> Vec<String> {
    let mut keywords = tokenize(&turn.user_answer);
    for term in emotion_terms_in(&turn.user_answer) {
        if !keywords.iter().any(|k| k == term) {
            keywords.push(term.to_string());
        }
    }
    keywords
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Emotion lexicon terms contained anywhere in `text` (case-insensitive).
pub fn emotion_terms_in(text: &str) -> Vec<&'static str> {
    let lowered = text.to_lowercase();
    EMOTION_TERMS
        .iter()
        .copied()
        .filter(|term| lowered.contains(term))
        .collect()
}

/// Sentiment direction of the emotion terms in a tokenized query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
    Mixed,
}

/// `None` when the tokens carry no polar emotion terms at all.
pub fn polarity(tokens: &[String]) -> Option<Polarity> {
    let positive = tokens.iter().any(|t| POSITIVE_TERMS.contains(&t.as_str()));
    let negative = tokens.iter().any(|t| NEGATIVE_TERMS.contains(&t.as_str()));
    match (positive, negative) {
        (true, false) => Some(Polarity::Positive),
        (false, true) => Some(Polarity::Negative),
        (true, true) => Some(Polarity::Mixed),
        (false, false) => None,
    }
}

/// Keyword synonym groups. A keyword maps to the other members of the first group
/// containing it.
#[derive(Debug, Clone, PartialEq)]
pub struct SynonymTable {
    groups: Vec<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SynonymFile {
    Groups(Vec<Vec<String>>),
    Named(std::collections::BTreeMap<String, Vec<String>>),
}

impl Default for SynonymTable {
    fn default() -> Self {
        Self::from_groups(vec![
            vec!["work", "task", "job", "todo"],
            vec!["meeting", "conference", "appointment", "gathering"],
            vec!["travel", "trip", "journey"],
            vec!["exercise", "workout", "fitness", "training", "gym"],
            vec!["meal", "food", "lunch", "dinner", "breakfast", "brunch", "diet"],
        ])
    }
}

impl SynonymTable {
    pub fn from_groups<S: AsRef<str>>(groups: Vec<Vec<S>>) -> Self {
        let groups = groups
            .into_iter()
            .map(|group| {
                let mut seen = HashSet::new();
                group
                    .iter()
                    .map(|term| term.as_ref().trim().to_lowercase())
                    .filter(|term| !term.is_empty() && seen.insert(term.clone()))
                    .collect::<Vec<_>>()
            })
            .filter(|group| group.len() > 1)
            .collect();
        Self { groups }
    }

    /// Table without any synonyms.
    pub fn empty() -> Self {
        Self { groups: Vec::new() }
    }

    /// Parse a YAML list of groups, or a map of named groups. A named group
    /// includes its name as a member.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: SynonymFile = serde_yaml::from_str(content)?;
        let groups = match file {
            SynonymFile::Groups(groups) => groups,
            SynonymFile::Named(named) => named
                .into_iter()
                .map(|(name, mut members)| {
                    members.insert(0, name);
                    members
                })
                .collect(),
        };
        Ok(Self::from_groups(groups))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read synonym table {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Other members of the first group containing `keyword`.
    pub fn related(&self, keyword: &str) -> Vec<&str> {
        self.groups
            .iter()
            .find(|group| group.iter().any(|term| term == keyword))
            .map(|group| {
                group
                    .iter()
                    .filter(|term| *term != keyword)
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
