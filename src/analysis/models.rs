//! Data models shared by the vector and graph retrieval paths

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::corpus::normalizer::stable_id;
use crate::corpus::{ConversationTurn, Event};
use crate::graph::keywords::{conversation_keywords, event_keywords};

/// Retrieval path that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Vector,
    Graph,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::Vector => "vector",
            ResultSource::Graph => "graph",
        }
    }
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Event,
    Conversation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Event => "event",
            EntityKind::Conversation => "conversation",
        }
    }
}

/// Reference back to the corpus entity behind a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    /// Source entity id (may be empty for ad-hoc entities)
    pub id: String,
    /// Event title, or the linked event / question for a conversation
    pub title: String,
    /// Event start, or the conversation's reference time
    pub start: Option<DateTime<FixedOffset>>,
    /// Event type tag (events only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Short content excerpt (conversation answer)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

impl EntityRef {
    pub fn from_event(event: &Event) -> Self {
        Self {
            kind: EntityKind::Event,
            id: event.id.clone(),
            title: event.title.clone(),
            start: Some(event.start),
            event_type: Some(event.event_type.clone()),
            excerpt: None,
        }
    }

    pub fn from_conversation(turn: &ConversationTurn, linked: Option<&Event>) -> Self {
        let title = linked
            .map(|e| e.title.clone())
            .or_else(|| turn.event.as_ref().and_then(|e| e.title.clone()))
            .unwrap_or_else(|| turn.bot_question.clone());
        Self {
            kind: EntityKind::Conversation,
            id: turn.id.clone(),
            title,
            start: turn.reference_time(),
            event_type: None,
            excerpt: Some(turn.user_answer.clone()),
        }
    }

    /// Stable dedup key: `<kind>:<id>`, or a content-derived key when the id is empty.
    pub fn identity(&self) -> String {
        if !self.id.is_empty() {
            return format!("{}:{}", self.kind.as_str(), self.id);
        }
        let start = self.start.map(|s| s.to_rfc3339()).unwrap_or_default();
        let excerpt = self.excerpt.as_deref().unwrap_or_default();
        format!(
            "{}:{}",
            self.kind.as_str(),
            stable_id(&[&self.title, &start, excerpt])
        )
    }
}

/// Ranked retrieval result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub entity: EntityRef,
    /// Relevance score (source-specific before merge, combined after)
    pub score: f64,
    /// Source with the strongest contribution
    pub source: ResultSource,
    /// Present in both vector and graph results
    #[serde(default)]
    pub corroborated: bool,
    #[serde(default)]
    pub matched_keywords: Vec<String>,
    pub emotion_label: Option<String>,
    pub emotion_score: Option<u8>,
}

impl SearchResult {
    pub fn new(entity: EntityRef, score: f64, source: ResultSource) -> Self {
        Self {
            entity,
            score,
            source,
            corroborated: false,
            matched_keywords: Vec::new(),
            emotion_label: None,
            emotion_score: None,
        }
    }

    pub fn identity(&self) -> String {
        self.entity.identity()
    }
}

/// Text representation of one corpus entity for embedding
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDocument {
    pub entity: EntityRef,
    pub text: String,
    pub keywords: Vec<String>,
    pub emotion_label: Option<String>,
    pub emotion_score: Option<u8>,
}

impl VectorDocument {
    /// Title, type, emotion sentence and keyword list.
    pub fn from_event(event: &Event) -> Self {
        let keywords = event_keywords(event);
        let mut text = format!("{}. Type: {}.", event.title, event.event_type);
        if let Some(score) = event.emotion {
            text.push_str(&format!(
                " The user felt {} about it ({}/5).",
                score.label(),
                score.value()
            ));
        }
        if !keywords.is_empty() {
            text.push_str(&format!(" Keywords: {}.", keywords.join(", ")));
        }

        Self {
            entity: EntityRef::from_event(event),
            text,
            keywords,
            emotion_label: event.emotion_label().map(str::to_string),
            emotion_score: event.emotion.map(|s| s.value()),
        }
    }

    /// Question, answer, linked event, emotion and keyword list.
    pub fn from_conversation(turn: &ConversationTurn, linked: Option<&Event>) -> Self {
        let keywords = conversation_keywords(turn);
        let mut lines = vec![
            format!("Question: {}", turn.bot_question),
            format!("Answer: {}", turn.user_answer),
        ];
        if let Some(event) = linked {
            lines.push(format!("Event: {} ({})", event.title, event.event_type));
        }
        let emotion_label = turn.emotion_label();
        if let Some(label) = &emotion_label {
            lines.push(format!("Emotion: {}", label));
        }
        if !keywords.is_empty() {
            lines.push(format!("Keywords: {}", keywords.join(", ")));
        }

        Self {
            entity: EntityRef::from_conversation(turn, linked),
            text: lines.join("\n"),
            keywords,
            emotion_label,
            emotion_score: turn
                .emotion
                .as_ref()
                .and_then(|e| e.score)
                .map(|s| s.value()),
        }
    }

    /// Documents for every entity of a corpus, events first.
    pub fn from_corpus(corpus: &crate::corpus::Corpus) -> Vec<Self> {
        let events = corpus.events.iter().map(Self::from_event);
        let conversations = corpus.conversations.iter().map(|turn| {
            Self::from_conversation(turn, corpus.linked_event(turn))
        });
        events.chain(conversations).collect()
    }

    /// Result stub carrying this document's metadata.
    pub fn to_result(&self, score: f64) -> SearchResult {
        let mut result = SearchResult::new(self.entity.clone(), score, ResultSource::Vector);
        result.emotion_label = self.emotion_label.clone();
        result.emotion_score = self.emotion_score;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{normalize_conversation, normalize_event, Corpus};
    use serde_json::json;

    fn run() -> Event {
        normalize_event(&json!({
            "id": "e2", "title": "Morning Run", "start": "2025-02-18T07:00:00+09:00",
            "type": "Health", "emotion_score": 5
        }))
        .unwrap()
    }

    #[test]
    fn result_source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ResultSource::Graph).unwrap(), "\"graph\"");
        assert_eq!(ResultSource::Vector.to_string(), "vector");
    }

    #[test]
    fn identity_prefers_entity_id() {
        let entity = EntityRef::from_event(&run());
        assert_eq!(entity.identity(), "event:e2");
    }

    #[test]
    fn identity_falls_back_to_content_key() {
        let mut entity = EntityRef::from_event(&run());
        entity.id.clear();
        let first = entity.identity();
        assert!(first.starts_with("event:"));
        assert_eq!(first, entity.clone().identity());

        entity.title = "Evening Run".into();
        assert_ne!(first, entity.identity());
    }

    #[test]
    fn event_document_text_includes_emotion_and_keywords() {
        let doc = VectorDocument::from_event(&run());
        assert!(doc.text.starts_with("Morning Run. Type: Health."));
        assert!(doc.text.contains("very positive"));
        assert!(doc.text.contains("Keywords: morning, run, health"));
        assert_eq!(doc.emotion_score, Some(5));
    }

    #[test]
    fn conversation_document_links_event() {
        let mut corpus = Corpus::new("u");
        corpus.events.push(run());
        corpus.conversations.push(
            normalize_conversation(&json!({
                "id": "c1",
                "bot_question": "How was the run?",
                "user_answer": "Refreshing",
                "event_info": {"id": "e2"},
                "emotion": {"score": 4}
            }))
            .unwrap(),
        );

        let docs = VectorDocument::from_corpus(&corpus);
        assert_eq!(docs.len(), 2);
        let conversation = &docs[1];
        assert_eq!(conversation.entity.kind, EntityKind::Conversation);
        assert_eq!(conversation.entity.title, "Morning Run");
        assert!(conversation.text.contains("Event: Morning Run (Health)"));
        assert_eq!(conversation.emotion_label.as_deref(), Some("positive"));
        assert_eq!(conversation.entity.identity(), "conversation:c1");
    }

    #[test]
    fn conversation_document_links_event_by_title() {
        let mut corpus = Corpus::new("u");
        corpus.events.push(run());
        corpus.conversations.push(
            normalize_conversation(&json!({
                "id": "c1",
                "bot_question": "How was it?",
                "user_answer": "Legs tired",
                "event_title": "morning run"
            }))
            .unwrap(),
        );

        let docs = VectorDocument::from_corpus(&corpus);
        assert_eq!(docs[1].entity.title, "Morning Run");
        assert!(docs[1].text.contains("Event: Morning Run (Health)"));
    }
}
