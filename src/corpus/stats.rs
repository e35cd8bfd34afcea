//! Corpus statistics: emotion summary, activity patterns, conversation topics.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, FixedOffset, Timelike};
use serde::Serialize;

use super::models::{ConversationTurn, Corpus, Event};
use crate::graph::keywords::{is_stopword, tokenize};

/// Part of day an event starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSlot {
    /// 06:00 - 09:00
    Morning,
    /// 09:00 - 12:00
    LateMorning,
    /// 12:00 - 18:00
    Afternoon,
    /// 18:00 - 22:00
    Evening,
    /// 22:00 - 06:00
    Night,
}

impl TimeSlot {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=8 => TimeSlot::Morning,
            9..=11 => TimeSlot::LateMorning,
            12..=17 => TimeSlot::Afternoon,
            18..=21 => TimeSlot::Evening,
            _ => TimeSlot::Night,
        }
    }

    pub fn of(time: &DateTime<FixedOffset>) -> Self {
        Self::from_hour(time.hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSlot::Morning => "morning",
            TimeSlot::LateMorning => "late_morning",
            TimeSlot::Afternoon => "afternoon",
            TimeSlot::Evening => "evening",
            TimeSlot::Night => "night",
        }
    }
}

/// Titled score used for highest / lowest entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTitle {
    pub title: String,
    pub score: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmotionSummary {
    /// Mean over events with a set score
    pub average: Option<f64>,
    /// Count per score value (1..=5)
    pub distribution: BTreeMap<u8, usize>,
    pub highest: Option<ScoredTitle>,
    pub lowest: Option<ScoredTitle>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivityPatterns {
    pub by_type: BTreeMap<String, usize>,
    pub by_time_slot: BTreeMap<TimeSlot, usize>,
    pub by_weekday: BTreeMap<String, usize>,
    pub recurring: usize,
    pub top_keywords: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatSummary {
    pub message_count: usize,
    pub top_keywords: Vec<(String, usize)>,
    /// Topics whose indicator words appear in any answer, in table order
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorpusStats {
    pub user_id: String,
    pub events: usize,
    pub conversations: usize,
    pub emotion: EmotionSummary,
    pub activity: ActivityPatterns,
    pub chat: ChatSummary,
}

const TOPIC_INDICATORS: &[(&str, &[&str])] = &[
    ("work", &["work", "meeting", "project", "office", "deadline", "task"]),
    ("health", &["exercise", "run", "gym", "sleep", "health", "walk", "workout"]),
    ("leisure", &["movie", "game", "relax", "rest", "music", "book"]),
    ("creative", &["write", "draw", "paint", "design", "create", "idea"]),
    ("social", &["friend", "friends", "family", "dinner", "party", "together"]),
];

impl CorpusStats {
    pub fn compute(corpus: &Corpus) -> Self {
        Self {
            user_id: corpus.user_id.clone(),
            events: corpus.events.len(),
            conversations: corpus.conversations.len(),
            emotion: emotion_summary(&corpus.events),
            activity: activity_patterns(&corpus.events),
            chat: chat_summary(&corpus.conversations),
        }
    }
}

pub fn emotion_summary(events: &[Event]) -> EmotionSummary {
    let scored: Vec<(&Event, u8)> = events
        .iter()
        .filter_map(|e| e.emotion.map(|s| (e, s.value())))
        .collect();

    let mut summary = EmotionSummary::default();
    if scored.is_empty() {
        return summary;
    }

    let total: u32 = scored.iter().map(|(_, s)| *s as u32).sum();
    summary.average = Some(total as f64 / scored.len() as f64);
    for (_, score) in &scored {
        *summary.distribution.entry(*score).or_default() += 1;
    }

    // First occurrence wins on ties.
    let mut highest = scored[0];
    let mut lowest = scored[0];
    for &(event, score) in &scored[1..] {
        if score > highest.1 {
            highest = (event, score);
        }
        if score < lowest.1 {
            lowest = (event, score);
        }
    }
    summary.highest = Some(ScoredTitle {
        title: highest.0.title.clone(),
        score: highest.1,
    });
    summary.lowest = Some(ScoredTitle {
        title: lowest.0.title.clone(),
        score: lowest.1,
    });
    summary
}

pub fn activity_patterns(events: &[Event]) -> ActivityPatterns {
    let mut patterns = ActivityPatterns::default();
    let mut keyword_counts: HashMap<String, usize> = HashMap::new();

    for event in events {
        *patterns
            .by_type
            .entry(event.event_type.to_lowercase())
            .or_default() += 1;
        *patterns
            .by_time_slot
            .entry(TimeSlot::of(&event.start))
            .or_default() += 1;
        *patterns
            .by_weekday
            .entry(event.start.format("%A").to_string())
            .or_default() += 1;
        if event.is_recurring() {
            patterns.recurring += 1;
        }
        for token in tokenize(&event.title) {
            if !is_stopword(&token) {
                *keyword_counts.entry(token).or_default() += 1;
            }
        }
    }

    patterns.top_keywords = top_n(keyword_counts, 5);
    patterns
}

pub fn chat_summary(conversations: &[ConversationTurn]) -> ChatSummary {
    let mut keyword_counts: HashMap<String, usize> = HashMap::new();
    let mut answer_tokens = Vec::new();

    for turn in conversations {
        let tokens = tokenize(&turn.user_answer);
        for token in &tokens {
            if !is_stopword(token) {
                *keyword_counts.entry(token.clone()).or_default() += 1;
            }
        }
        answer_tokens.extend(tokens);
    }

    let topics = TOPIC_INDICATORS
        .iter()
        .filter(|(_, indicators)| {
            answer_tokens
                .iter()
                .any(|token| indicators.contains(&token.as_str()))
        })
        .map(|(topic, _)| topic.to_string())
        .collect();

    ChatSummary {
        message_count: conversations.len(),
        top_keywords: top_n(keyword_counts, 10),
        topics,
    }
}

/// Highest counts first, ties broken alphabetically.
fn top_n(counts: HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}
