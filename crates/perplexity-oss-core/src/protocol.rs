//! Chat API wire protocol.
//!
//! A turn is a single `POST /chat` whose response body is a stream of
//! server-sent events. Every non-empty SSE `data` field holds a JSON envelope
//! `{ "event": <tag>, "data": <payload> }`, decoded here into a
//! [`ChatResponseEvent`].

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::types::SearchResult;

/// Path of the streaming chat endpoint, relative to the API base URL.
pub const CHAT_PATH: &str = "/chat";

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Request body sent once at the start of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Legacy addressable thread, only issued by database-backed servers.
    #[serde(default)]
    pub thread_id: Option<i64>,
    /// Server-side conversation history handle.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub pro_search: bool,
}

/// Event type tags as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamEvent {
    BeginStream,
    SearchResults,
    TextChunk,
    RelatedQueries,
    AgentQueryPlan,
    AgentSearchQueries,
    AgentReadResults,
    AgentFinish,
    StreamEnd,
    Error,
}

impl StreamEvent {
    pub const ALL: [StreamEvent; 10] = [
        StreamEvent::BeginStream,
        StreamEvent::SearchResults,
        StreamEvent::TextChunk,
        StreamEvent::RelatedQueries,
        StreamEvent::AgentQueryPlan,
        StreamEvent::AgentSearchQueries,
        StreamEvent::AgentReadResults,
        StreamEvent::AgentFinish,
        StreamEvent::StreamEnd,
        StreamEvent::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEvent::BeginStream => "begin-stream",
            StreamEvent::SearchResults => "search-results",
            StreamEvent::TextChunk => "text-chunk",
            StreamEvent::RelatedQueries => "related-queries",
            StreamEvent::AgentQueryPlan => "agent-query-plan",
            StreamEvent::AgentSearchQueries => "agent-search-queries",
            StreamEvent::AgentReadResults => "agent-read-results",
            StreamEvent::AgentFinish => "agent-finish",
            StreamEvent::StreamEnd => "stream-end",
            StreamEvent::Error => "error",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == tag)
    }

    /// Whether this event ends the turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::StreamEnd | StreamEvent::Error)
    }
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Treats an explicit `null` the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultStream {
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<SearchResult>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunkStream {
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedQueriesStream {
    #[serde(default, deserialize_with = "null_as_default")]
    pub related_queries: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentQueryPlanStream {
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSearchQueriesStream {
    pub queries: Vec<String>,
    pub step_number: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReadResultsStream {
    pub results: Vec<SearchResult>,
    pub step_number: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndStream {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStream {
    pub detail: String,
}

/// A decoded chat stream event.
///
/// Serializes to the same envelope it is decoded from, so servers and tests
/// can produce frames with [`ChatResponseEvent::to_frame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ChatResponseEvent {
    BeginStream,
    SearchResults(SearchResultStream),
    TextChunk(TextChunkStream),
    RelatedQueries(RelatedQueriesStream),
    AgentQueryPlan(AgentQueryPlanStream),
    AgentSearchQueries(AgentSearchQueriesStream),
    AgentReadResults(AgentReadResultsStream),
    AgentFinish,
    StreamEnd(StreamEndStream),
    Error(ErrorStream),
}

/// A frame that could not be turned into a [`ChatResponseEvent`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed event envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("unknown event type '{0}'")]
    UnknownEvent(String),

    #[error("invalid '{event}' payload: {source}")]
    Payload {
        event: StreamEvent,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn payload<T>(event: StreamEvent, data: serde_json::Value) -> Result<T, DecodeError>
where
    T: for<'de> Deserialize<'de>,
{
    let data = if data.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|source| DecodeError::Payload { event, source })
}

impl ChatResponseEvent {
    /// Decode one SSE `data` field.
    ///
    /// Returns `Ok(None)` for keep-alive frames with no payload.
    pub fn decode(frame: &str) -> Result<Option<Self>, DecodeError> {
        let frame = frame.trim();
        if frame.is_empty() {
            return Ok(None);
        }

        let Envelope { event, data } =
            serde_json::from_str(frame).map_err(DecodeError::Envelope)?;
        let kind = StreamEvent::from_tag(&event).ok_or(DecodeError::UnknownEvent(event))?;

        let decoded = match kind {
            StreamEvent::BeginStream => ChatResponseEvent::BeginStream,
            StreamEvent::SearchResults => ChatResponseEvent::SearchResults(payload(kind, data)?),
            StreamEvent::TextChunk => ChatResponseEvent::TextChunk(payload(kind, data)?),
            StreamEvent::RelatedQueries => ChatResponseEvent::RelatedQueries(payload(kind, data)?),
            StreamEvent::AgentQueryPlan => ChatResponseEvent::AgentQueryPlan(payload(kind, data)?),
            StreamEvent::AgentSearchQueries => {
                ChatResponseEvent::AgentSearchQueries(payload(kind, data)?)
            }
            StreamEvent::AgentReadResults => {
                ChatResponseEvent::AgentReadResults(payload(kind, data)?)
            }
            StreamEvent::AgentFinish => ChatResponseEvent::AgentFinish,
            StreamEvent::StreamEnd => ChatResponseEvent::StreamEnd(payload(kind, data)?),
            StreamEvent::Error => ChatResponseEvent::Error(payload(kind, data)?),
        };
        Ok(Some(decoded))
    }

    pub fn kind(&self) -> StreamEvent {
        match self {
            ChatResponseEvent::BeginStream => StreamEvent::BeginStream,
            ChatResponseEvent::SearchResults(_) => StreamEvent::SearchResults,
            ChatResponseEvent::TextChunk(_) => StreamEvent::TextChunk,
            ChatResponseEvent::RelatedQueries(_) => StreamEvent::RelatedQueries,
            ChatResponseEvent::AgentQueryPlan(_) => StreamEvent::AgentQueryPlan,
            ChatResponseEvent::AgentSearchQueries(_) => StreamEvent::AgentSearchQueries,
            ChatResponseEvent::AgentReadResults(_) => StreamEvent::AgentReadResults,
            ChatResponseEvent::AgentFinish => StreamEvent::AgentFinish,
            ChatResponseEvent::StreamEnd(_) => StreamEvent::StreamEnd,
            ChatResponseEvent::Error(_) => StreamEvent::Error,
        }
    }

    /// Encode as the JSON envelope carried in an SSE `data` field.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn text(text: impl Into<String>) -> Self {
        ChatResponseEvent::TextChunk(TextChunkStream { text: text.into() })
    }

    pub fn error(detail: impl Into<String>) -> Self {
        ChatResponseEvent::Error(ErrorStream {
            detail: detail.into(),
        })
    }
}

/// Address-bar path for a legacy database-backed thread.
pub fn thread_path(thread_id: i64) -> String {
    format!("/search/{thread_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive_frames_are_ignored() {
        assert!(ChatResponseEvent::decode("").unwrap().is_none());
        assert!(ChatResponseEvent::decode("   \n").unwrap().is_none());
    }

    #[test]
    fn test_decode_text_chunk() {
        let event = ChatResponseEvent::decode(r#"{"event":"text-chunk","data":{"text":"Hello"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, ChatResponseEvent::text("Hello"));
        assert_eq!(event.kind(), StreamEvent::TextChunk);
    }

    #[test]
    fn test_decode_begin_stream_ignores_payload() {
        let event = ChatResponseEvent::decode(
            r#"{"event":"begin-stream","data":{"event_type":"begin-stream","query":"why"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(event, ChatResponseEvent::BeginStream);

        let bare = ChatResponseEvent::decode(r#"{"event":"agent-finish"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(bare, ChatResponseEvent::AgentFinish);
    }

    #[test]
    fn test_decode_search_results_defaults() {
        let event = ChatResponseEvent::decode(
            r#"{"event":"search-results","data":{"results":null}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            event,
            ChatResponseEvent::SearchResults(SearchResultStream::default())
        );
    }

    #[test]
    fn test_decode_stream_end_optional_ids() {
        let event = ChatResponseEvent::decode(r#"{"event":"stream-end","data":{"session_id":"s1"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ChatResponseEvent::StreamEnd(StreamEndStream {
                session_id: Some("s1".into()),
                thread_id: None,
            })
        );
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = ChatResponseEvent::decode(r#"{"event":"final-answer","data":{}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEvent(tag) if tag == "final-answer"));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = ChatResponseEvent::decode("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Envelope(_)));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let err = ChatResponseEvent::decode(
            r#"{"event":"agent-search-queries","data":{"queries":["a"]}}"#,
        )
        .unwrap_err();
        match err {
            DecodeError::Payload { event, .. } => assert_eq!(event, StreamEvent::AgentSearchQueries),
            other => panic!("unexpected error: {other}"),
        }

        let err = ChatResponseEvent::decode(r#"{"event":"error"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Payload { event: StreamEvent::Error, .. }));
    }

    #[test]
    fn test_to_frame_uses_wire_envelope() {
        let frame = ChatResponseEvent::error("rate limited").to_frame().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["detail"], "rate limited");

        let frame = ChatResponseEvent::BeginStream.to_frame().unwrap();
        assert_eq!(
            ChatResponseEvent::decode(&frame).unwrap(),
            Some(ChatResponseEvent::BeginStream)
        );
    }

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest {
            query: "why is the sky blue".into(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 2),
            end_date: None,
            thread_id: None,
            session_id: Some("s1".into()),
            pro_search: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["start_date"], "2024-01-02");
        assert!(json.get("end_date").is_none());
        assert!(json["thread_id"].is_null());
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["pro_search"], true);
    }

    #[test]
    fn test_thread_path() {
        assert_eq!(thread_path(42), "/search/42");
    }
}
