//! Raw record normalization.
//!
//! Stores hand over records either as JSON objects or as flattened
//! `key: value` text blocks. Both shapes are folded into the canonical
//! [`Event`] / [`ConversationTurn`] model here. A record whose start time
//! cannot be parsed is rejected individually and counted in the
//! [`NormalizeReport`]; it never fails the whole batch.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::models::{
    ConversationTurn, Corpus, EmotionAnnotation, EmotionScore, Event, EventRef, DEFAULT_EVENT_TYPE,
};
use crate::error::{Error, Result};

const UNTITLED: &str = "untitled";

const ID_KEYS: &[&str] = &["id", "event_id"];
const TITLE_KEYS: &[&str] = &["title", "summary", "일정"];
const START_KEYS: &[&str] = &["start", "시작"];
const END_KEYS: &[&str] = &["end", "종료"];
const TYPE_KEYS: &[&str] = &["type", "타입"];
const EMOTION_KEYS: &[&str] = &["emotion_score", "emotion", "감정 점수"];
const RECURRENCE_KEYS: &[&str] = &["recurrence", "반복"];

const CONVERSATION_ID_KEYS: &[&str] = &["id", "conversation_id"];
const QUESTION_KEYS: &[&str] = &["bot_question", "question", "질문"];
const ANSWER_KEYS: &[&str] = &["user_answer", "answer", "답변"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "created_at", "time"];

/// Naive formats accepted after RFC 3339; interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Outcome counters of one normalization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub events: usize,
    pub conversations: usize,
    pub skipped_events: usize,
    pub skipped_conversations: usize,
}

impl NormalizeReport {
    pub fn skipped(&self) -> usize {
        self.skipped_events + self.skipped_conversations
    }
}

/// Normalize a user's raw records into a [`Corpus`], skipping malformed ones.
pub fn normalize_corpus(
    user_id: &str,
    raw_events: &[Value],
    raw_conversations: &[Value],
) -> (Corpus, NormalizeReport) {
    let mut corpus = Corpus::new(user_id);
    let mut report = NormalizeReport::default();

    for raw in raw_events {
        match normalize_event(raw) {
            Ok(event) => corpus.events.push(event),
            Err(err) => {
                debug!(user_id, "Skipping event record: {}", err);
                report.skipped_events += 1;
            }
        }
    }

    for raw in raw_conversations {
        match normalize_conversation(raw) {
            Ok(turn) => corpus.conversations.push(turn),
            Err(err) => {
                debug!(user_id, "Skipping conversation record: {}", err);
                report.skipped_conversations += 1;
            }
        }
    }

    report.events = corpus.events.len();
    report.conversations = corpus.conversations.len();
    (corpus, report)
}

/// Normalize one raw event record.
pub fn normalize_event(raw: &Value) -> Result<Event> {
    let record = as_record(raw)?;

    let start_raw = field(&record, START_KEYS)
        .ok_or_else(|| Error::MalformedRecord("event has no start time".into()))?;
    let start = parse_time_value(start_raw).ok_or_else(|| {
        Error::MalformedRecord(format!("unparsable event start time: {}", start_raw))
    })?;
    let end = field(&record, END_KEYS).and_then(parse_time_value);

    let title = field(&record, TITLE_KEYS)
        .and_then(value_as_string)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let event_type = field(&record, TYPE_KEYS)
        .and_then(value_as_string)
        .or_else(|| {
            record
                .get("calendar_info")
                .and_then(Value::as_object)
                .and_then(|info| info.get("summary"))
                .and_then(value_as_string)
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());

    let emotion = field(&record, EMOTION_KEYS).and_then(parse_emotion);
    let recurrence = field(&record, RECURRENCE_KEYS).and_then(parse_recurrence);

    let id = field(&record, ID_KEYS)
        .and_then(value_as_string)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| stable_id(&["event", &title, &start.to_rfc3339()]));

    let consumed: Vec<&str> = [
        ID_KEYS,
        TITLE_KEYS,
        START_KEYS,
        END_KEYS,
        TYPE_KEYS,
        EMOTION_KEYS,
        RECURRENCE_KEYS,
    ]
    .concat();
    let extra: BTreeMap<String, String> = record
        .iter()
        .filter(|(k, _)| !consumed.contains(&k.as_str()))
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.trim().to_string())))
        .filter(|(_, v)| !v.is_empty())
        .collect();

    Ok(Event {
        id,
        title,
        start,
        end,
        event_type,
        emotion,
        recurrence,
        extra,
    })
}

/// Normalize one raw conversation turn.
pub fn normalize_conversation(raw: &Value) -> Result<ConversationTurn> {
    let record = as_record(raw)?;

    let bot_question = field(&record, QUESTION_KEYS)
        .and_then(value_as_string)
        .unwrap_or_default();
    let user_answer = field(&record, ANSWER_KEYS)
        .and_then(value_as_string)
        .unwrap_or_default();
    if bot_question.is_empty() && user_answer.is_empty() {
        return Err(Error::MalformedRecord(
            "conversation has neither question nor answer".into(),
        ));
    }

    let timestamp = match field(&record, TIMESTAMP_KEYS) {
        Some(raw_ts) => Some(parse_time_value(raw_ts).ok_or_else(|| {
            Error::MalformedRecord(format!("unparsable conversation timestamp: {}", raw_ts))
        })?),
        None => None,
    };

    let event = parse_event_ref(&record)?;
    let emotion = parse_annotation(&record);

    let id = field(&record, CONVERSATION_ID_KEYS)
        .and_then(value_as_string)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| {
            let ts = timestamp.map(|t| t.to_rfc3339()).unwrap_or_default();
            stable_id(&["conversation", &bot_question, &user_answer, &ts])
        });

    Ok(ConversationTurn {
        id,
        bot_question,
        user_answer,
        event,
        emotion,
        timestamp,
    })
}

/// Parse a timestamp string: RFC 3339, then naive date-time as UTC, then a bare date.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Interpret an emotion value; anything other than an integer in 1..=5 is unset.
pub fn parse_emotion(value: &Value) -> Option<EmotionScore> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                EmotionScore::new(i)
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .and_then(|f| EmotionScore::new(f as i64))
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok().and_then(EmotionScore::new),
        Value::Object(obj) => obj.get("score").and_then(parse_emotion),
        _ => None,
    }
}

/// Content-derived stable id for records that carry none.
pub fn stable_id(parts: &[&str]) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, parts.join("\u{1f}").as_bytes()).to_string()
}

fn as_record(raw: &Value) -> Result<Map<String, Value>> {
    match raw {
        Value::Object(obj) => Ok(obj.clone()),
        Value::String(block) => {
            let record = parse_flat_block(block);
            if record.is_empty() {
                Err(Error::MalformedRecord("empty text record".into()))
            } else {
                Ok(record)
            }
        }
        other => Err(Error::MalformedRecord(format!(
            "unsupported record shape: {}",
            type_name(other)
        ))),
    }
}

/// Parse a flattened `key: value` block, one field per line.
fn parse_flat_block(block: &str) -> Map<String, Value> {
    block
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
        .collect()
}

/// First non-null value among the alias keys.
fn field<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .find(|value| !value.is_null())
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts a timestamp string or a calendar-style `{dateTime|date}` object.
fn parse_time_value(value: &Value) -> Option<DateTime<FixedOffset>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Object(obj) => obj
            .get("dateTime")
            .or_else(|| obj.get("date"))
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
        _ => None,
    }
}

fn parse_recurrence(value: &Value) -> Option<String> {
    let joined = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(";"),
        Value::Bool(true) => "recurring".to_string(),
        _ => String::new(),
    };
    let lowered = joined.to_lowercase();
    if joined.is_empty() || matches!(lowered.as_str(), "none" | "false" | "no") {
        None
    } else {
        Some(joined)
    }
}

fn parse_event_ref(record: &Map<String, Value>) -> Result<Option<EventRef>> {
    let info = record
        .get("event_info")
        .or_else(|| record.get("event"))
        .and_then(Value::as_object);

    let mut event_ref = EventRef::default();
    if let Some(info) = info {
        event_ref.id = field(info, &["id", "event_id"]).and_then(value_as_string);
        event_ref.title = field(info, TITLE_KEYS).and_then(value_as_string);
        if let Some(raw_start) = field(info, START_KEYS) {
            event_ref.start = Some(parse_time_value(raw_start).ok_or_else(|| {
                Error::MalformedRecord(format!("unparsable linked event start: {}", raw_start))
            })?);
        }
    }
    if event_ref.id.is_none() {
        event_ref.id = record.get("event_id").and_then(value_as_string);
    }
    if event_ref.title.is_none() {
        event_ref.title = record.get("event_title").and_then(value_as_string);
    }

    event_ref.id = event_ref.id.filter(|id| !id.is_empty());
    event_ref.title = event_ref.title.filter(|t| !t.is_empty());

    if event_ref == EventRef::default() {
        Ok(None)
    } else {
        Ok(Some(event_ref))
    }
}

fn parse_annotation(record: &Map<String, Value>) -> Option<EmotionAnnotation> {
    let raw = field(record, EMOTION_KEYS);
    let score = raw.and_then(parse_emotion);
    let label = raw
        .and_then(Value::as_object)
        .and_then(|obj| obj.get("label"))
        .or_else(|| record.get("emotion_label"))
        .and_then(value_as_string)
        .filter(|l| !l.is_empty());

    if score.is_none() && label.is_none() {
        None
    } else {
        Some(EmotionAnnotation { score, label })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_structured_event() {
        let raw = json!({
            "id": "evt-1",
            "title": "Team Meeting",
            "start": "2025-02-18T10:00:00+09:00",
            "end": "2025-02-18T11:00:00+09:00",
            "type": "Work",
            "emotion_score": 2,
            "location": "Room 4"
        });

        let event = normalize_event(&raw).unwrap();
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.title, "Team Meeting");
        assert_eq!(event.event_type, "Work");
        assert_eq!(event.emotion.map(EmotionScore::value), Some(2));
        assert!(event.end.is_some());
        assert_eq!(event.extra.get("location").map(String::as_str), Some("Room 4"));
        assert!(!event.extra.contains_key("title"));
    }

    #[test]
    fn normalizes_flattened_text_block() {
        let raw = json!("title: Morning Run\nstart: 2025-02-18T07:00:00+09:00\ntype: Health\nemotion: 5");

        let event = normalize_event(&raw).unwrap();
        assert_eq!(event.title, "Morning Run");
        assert_eq!(event.event_type, "Health");
        assert_eq!(event.emotion.map(EmotionScore::value), Some(5));
        assert_eq!(event.start.format("%H:%M").to_string(), "07:00");
    }

    #[test]
    fn accepts_localized_keys_and_calendar_objects() {
        let raw = json!({
            "일정": "저녁 약속",
            "시작": {"dateTime": "2025-02-18T19:00:00+09:00"},
            "calendar_info": {"summary": "Social"},
            "감정 점수": "4",
            "반복": ["RRULE:FREQ=WEEKLY"]
        });

        let event = normalize_event(&raw).unwrap();
        assert_eq!(event.title, "저녁 약속");
        assert_eq!(event.event_type, "Social");
        assert_eq!(event.emotion.map(EmotionScore::value), Some(4));
        assert_eq!(event.recurrence.as_deref(), Some("RRULE:FREQ=WEEKLY"));
    }

    #[test]
    fn defaults_missing_type_and_emotion() {
        let raw = json!({"title": "Errand", "start": "2025-02-18"});

        let event = normalize_event(&raw).unwrap();
        assert_eq!(event.event_type, DEFAULT_EVENT_TYPE);
        assert!(event.emotion.is_none());
        assert!(event.recurrence.is_none());
    }

    #[test]
    fn treats_invalid_emotion_values_as_unset() {
        for value in [json!(0), json!(6), json!(-2), json!("great"), json!(3.5), json!(true)] {
            let raw = json!({"title": "x", "start": "2025-02-18", "emotion_score": value});
            let event = normalize_event(&raw).unwrap();
            assert!(event.emotion.is_none(), "expected unset for {}", value);
        }
        let raw = json!({"title": "x", "start": "2025-02-18", "emotion_score": 4.0});
        assert_eq!(
            normalize_event(&raw).unwrap().emotion.map(EmotionScore::value),
            Some(4)
        );
    }

    #[test]
    fn rejects_unparsable_start() {
        let raw = json!({"title": "Broken", "start": "next tuesday"});
        let err = normalize_event(&raw).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord(_)));

        let missing = json!({"title": "No start"});
        assert!(normalize_event(&missing).is_err());
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let dt = parse_timestamp("2025-02-18T07:30:00").unwrap();
        assert_eq!(dt.offset().local_minus_utc(), 0);
        assert_eq!(dt.format("%H:%M").to_string(), "07:30");

        let date_only = parse_timestamp("2025-02-18").unwrap();
        assert_eq!(date_only.format("%Y-%m-%d %H:%M").to_string(), "2025-02-18 00:00");

        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("18/02/2025").is_none());
    }

    #[test]
    fn missing_ids_are_stable_and_content_derived() {
        let raw = json!({"title": "Lunch", "start": "2025-02-18T12:00:00+09:00"});
        let first = normalize_event(&raw).unwrap();
        let second = normalize_event(&raw).unwrap();
        assert_eq!(first.id, second.id);

        let other = json!({"title": "Lunch", "start": "2025-02-19T12:00:00+09:00"});
        assert_ne!(first.id, normalize_event(&other).unwrap().id);
    }

    #[test]
    fn normalizes_conversation_with_event_info() {
        let raw = json!({
            "bot_question": "How was the run?",
            "user_answer": "Felt great, very refreshing",
            "event_info": {
                "id": "evt-2",
                "summary": "Morning Run",
                "start": {"dateTime": "2025-02-18T07:00:00+09:00"}
            },
            "emotion": {"score": 5, "label": "joyful"},
            "timestamp": "2025-02-18T21:00:00+09:00"
        });

        let turn = normalize_conversation(&raw).unwrap();
        assert_eq!(turn.linked_event_id(), Some("evt-2"));
        assert_eq!(turn.emotion_label().as_deref(), Some("joyful"));
        assert_eq!(
            turn.emotion.as_ref().and_then(|e| e.score).map(EmotionScore::value),
            Some(5)
        );
        assert_eq!(
            turn.reference_time().map(|t| t.format("%H").to_string()),
            Some("07".to_string())
        );
    }

    #[test]
    fn conversation_requires_some_text() {
        let raw = json!({"timestamp": "2025-02-18T21:00:00+09:00"});
        assert!(matches!(
            normalize_conversation(&raw),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn conversation_with_bad_timestamp_is_rejected() {
        let raw = json!({"bot_question": "q", "user_answer": "a", "timestamp": "yesterday"});
        assert!(normalize_conversation(&raw).is_err());
    }

    #[test]
    fn corpus_normalization_counts_skips() {
        let events = vec![
            json!({"title": "Ok", "start": "2025-02-18T10:00:00Z"}),
            json!({"title": "Bad", "start": "??"}),
            json!(42),
        ];
        let conversations = vec![
            json!({"bot_question": "q", "user_answer": "a"}),
            json!({}),
        ];

        let (corpus, report) = normalize_corpus("user-1", &events, &conversations);
        assert_eq!(corpus.user_id, "user-1");
        assert_eq!(corpus.events.len(), 1);
        assert_eq!(corpus.conversations.len(), 1);
        assert_eq!(report.skipped_events, 2);
        assert_eq!(report.skipped_conversations, 1);
        assert_eq!(report.skipped(), 3);
    }
}
