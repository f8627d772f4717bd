//! Conversation state and the collaborator seams the turn controller reads from
//! and writes to.

use std::sync::{PoisonError, RwLock};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::ChatMessage;

/// Credential pair sent with every chat request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub user_id: Option<String>,
}

/// Supplies credentials at submit time.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> Credentials;
}

impl CredentialSource for Credentials {
    fn credentials(&self) -> Credentials {
        self.clone()
    }
}

/// Optional inclusive date window applied to search results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn is_active(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    /// Human-readable summary, e.g. `Jan 2, 2024 - Feb 1, 2024`.
    pub fn describe(&self) -> String {
        const FMT: &str = "%b %-d, %Y";
        match (self.start, self.end) {
            (Some(start), Some(end)) => format!("{} - {}", start.format(FMT), end.format(FMT)),
            (Some(start), None) => format!("From {}", start.format(FMT)),
            (None, Some(end)) => format!("Until {}", end.format(FMT)),
            (None, None) => "Any time".to_string(),
        }
    }
}

/// Supplies the date filter at submit time.
pub trait FilterSource: Send + Sync {
    fn date_range(&self) -> DateRange;
}

impl FilterSource for DateRange {
    fn date_range(&self) -> DateRange {
        *self
    }
}

/// Where finished turns and the identifiers the server hands back are recorded.
pub trait HistorySink: Send + Sync {
    fn append(&self, message: ChatMessage);

    fn set_session_id(&self, session_id: Option<String>);

    fn set_thread_id(&self, thread_id: Option<i64>);

    fn session_id(&self) -> Option<String>;

    fn thread_id(&self) -> Option<i64>;
}

#[derive(Debug, Default)]
struct ConversationState {
    messages: Vec<ChatMessage>,
    session_id: Option<String>,
    thread_id: Option<i64>,
    date_range: DateRange,
}

/// In-memory conversation: message history, server identifiers and the
/// active date filter.
#[derive(Debug, Default)]
pub struct Conversation {
    state: RwLock<ConversationState>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a server-side session from a previous run.
    pub fn with_session(session_id: impl Into<String>) -> Self {
        let conversation = Self::default();
        conversation.set_session_id(Some(session_id.into()));
        conversation
    }

    fn read<T>(&self, f: impl FnOnce(&ConversationState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut ConversationState) -> T) -> T {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.read(|s| s.messages.clone())
    }

    pub fn len(&self) -> usize {
        self.read(|s| s.messages.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_message(&self) -> Option<ChatMessage> {
        self.read(|s| s.messages.last().cloned())
    }

    pub fn set_date_range(&self, range: DateRange) {
        self.write(|s| s.date_range = range);
    }

    pub fn clear_date_range(&self) {
        self.write(|s| s.date_range = DateRange::default());
    }

    /// Start a fresh conversation: drops history and both server identifiers.
    /// The date filter is kept.
    pub fn reset(&self) {
        self.write(|s| {
            s.messages.clear();
            s.session_id = None;
            s.thread_id = None;
        });
        debug!("Conversation reset");
    }
}

impl HistorySink for Conversation {
    fn append(&self, message: ChatMessage) {
        self.write(|s| s.messages.push(message));
    }

    fn set_session_id(&self, session_id: Option<String>) {
        self.write(|s| s.session_id = session_id);
    }

    fn set_thread_id(&self, thread_id: Option<i64>) {
        self.write(|s| s.thread_id = thread_id);
    }

    fn session_id(&self) -> Option<String> {
        self.read(|s| s.session_id.clone())
    }

    fn thread_id(&self) -> Option<i64> {
        self.read(|s| s.thread_id)
    }
}

impl FilterSource for Conversation {
    fn date_range(&self) -> DateRange {
        self.read(|s| s.date_range)
    }
}
