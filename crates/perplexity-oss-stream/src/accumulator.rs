//! Folds decoded stream events into one in-progress assistant message.

use tracing::{debug, trace, warn};

use perplexity_oss_core::protocol::ChatResponseEvent;
use perplexity_oss_core::types::ChatMessage;

use crate::StreamError;
use crate::plan::AgentPlanTracker;

/// What applying one event means for the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Keep reading.
    Continue,
    /// The server finished the turn normally.
    Completed {
        message: ChatMessage,
        session_id: Option<String>,
        thread_id: Option<i64>,
    },
    /// The server reported an error for the turn.
    Failed { detail: String },
}

/// Scratch state for one assistant turn.
#[derive(Debug, Clone)]
pub struct MessageAccumulator {
    message: ChatMessage,
    plan: AgentPlanTracker,
    begun: bool,
}

impl Default for MessageAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self {
            message: ChatMessage::assistant(),
            plan: AgentPlanTracker::new(),
            begun: false,
        }
    }

    pub fn plan(&self) -> &AgentPlanTracker {
        &self.plan
    }

    /// Whether `begin-stream` has been seen.
    pub fn has_begun(&self) -> bool {
        self.begun
    }

    pub fn apply(&mut self, event: ChatResponseEvent) -> Result<Applied, StreamError> {
        trace!(event = %event.kind(), "Applying stream event");
        match event {
            ChatResponseEvent::BeginStream => {
                if !self.message.content.is_empty() {
                    warn!(
                        len = self.message.content.len(),
                        "Repeated begin-stream after text, keeping content"
                    );
                } else {
                    self.message.sources.clear();
                    self.message.images.clear();
                    self.message.related_queries.clear();
                }
                self.begun = true;
            }
            ChatResponseEvent::SearchResults(data) => {
                debug!(
                    results = data.results.len(),
                    images = data.images.len(),
                    "Search results received"
                );
                self.message.sources = data.results;
                self.message.images = data.images;
            }
            ChatResponseEvent::TextChunk(data) => {
                self.message.content.push_str(&data.text);
                self.plan.begin_answer();
            }
            ChatResponseEvent::RelatedQueries(data) => {
                self.message.related_queries = data.related_queries;
            }
            ChatResponseEvent::AgentQueryPlan(data) => {
                self.plan.announce(data.steps);
            }
            ChatResponseEvent::AgentSearchQueries(data) => {
                self.plan.record_queries(data.step_number, data.queries)?;
            }
            ChatResponseEvent::AgentReadResults(data) => {
                self.plan.record_results(data.step_number, data.results)?;
            }
            ChatResponseEvent::AgentFinish => {}
            ChatResponseEvent::StreamEnd(data) => {
                return Ok(Applied::Completed {
                    message: self.snapshot(),
                    session_id: data.session_id,
                    thread_id: data.thread_id,
                });
            }
            ChatResponseEvent::Error(data) => {
                return Ok(Applied::Failed {
                    detail: data.detail,
                });
            }
        }
        Ok(Applied::Continue)
    }

    /// Renderable view of the message so far, with a freshly built plan.
    pub fn snapshot(&self) -> ChatMessage {
        ChatMessage {
            agent_response: self.plan.snapshot(),
            ..self.message.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use perplexity_oss_core::protocol::{
        AgentQueryPlanStream, AgentReadResultsStream, AgentSearchQueriesStream,
        RelatedQueriesStream, SearchResultStream, StreamEndStream,
    };
    use perplexity_oss_core::types::{AgentSearchStepStatus, MessageRole, SearchResult};

    use super::*;

    fn result(url: &str) -> SearchResult {
        SearchResult {
            title: format!("Title for {url}"),
            url: url.into(),
            content: "snippet".into(),
        }
    }

    fn search_results(urls: &[&str]) -> ChatResponseEvent {
        ChatResponseEvent::SearchResults(SearchResultStream {
            results: urls.iter().map(|u| result(u)).collect(),
            images: urls.iter().map(|u| format!("{u}/img.png")).collect(),
        })
    }

    fn query_plan(steps: &[&str]) -> ChatResponseEvent {
        ChatResponseEvent::AgentQueryPlan(AgentQueryPlanStream {
            steps: steps.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn statuses(acc: &MessageAccumulator) -> Vec<AgentSearchStepStatus> {
        acc.snapshot()
            .agent_response
            .map(|r| r.steps_details.iter().map(|s| s.status).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_text_chunks_concatenate_for_any_split() {
        let total = "The quick brown fox jumps over the lazy dog.";
        for split in [1, 3, 7, total.len()] {
            let mut acc = MessageAccumulator::new();
            acc.apply(ChatResponseEvent::BeginStream).unwrap();
            let chars: Vec<char> = total.chars().collect();
            for piece in chars.chunks(split) {
                let text: String = piece.iter().collect();
                assert_eq!(acc.apply(ChatResponseEvent::text(text)).unwrap(), Applied::Continue);
            }
            assert_eq!(acc.snapshot().content, total, "split size {split}");
        }
    }

    #[test]
    fn test_search_results_last_write_wins() {
        let mut acc = MessageAccumulator::new();
        acc.apply(search_results(&["https://a.com", "https://b.com"])).unwrap();
        acc.apply(search_results(&["https://c.com"])).unwrap();
        let snapshot = acc.snapshot();
        assert_eq!(snapshot.sources, vec![result("https://c.com")]);
        assert_eq!(snapshot.images, vec!["https://c.com/img.png"]);
    }

    #[test]
    fn test_related_queries_replace() {
        let mut acc = MessageAccumulator::new();
        acc.apply(ChatResponseEvent::RelatedQueries(RelatedQueriesStream {
            related_queries: vec!["one".into()],
        }))
        .unwrap();
        acc.apply(ChatResponseEvent::RelatedQueries(RelatedQueriesStream {
            related_queries: vec!["two".into(), "three".into()],
        }))
        .unwrap();
        assert_eq!(acc.snapshot().related_queries, vec!["two", "three"]);
    }

    #[test]
    fn test_plan_lifecycle() {
        let mut acc = MessageAccumulator::new();
        acc.apply(ChatResponseEvent::BeginStream).unwrap();
        assert!(acc.snapshot().agent_response.is_none());

        acc.apply(query_plan(&["A", "B", "C"])).unwrap();
        assert_eq!(
            statuses(&acc),
            vec![
                AgentSearchStepStatus::Current,
                AgentSearchStepStatus::Default,
                AgentSearchStepStatus::Default
            ]
        );

        acc.apply(ChatResponseEvent::AgentSearchQueries(AgentSearchQueriesStream {
            queries: vec!["b query".into()],
            step_number: 1,
        }))
        .unwrap();
        assert_eq!(
            statuses(&acc),
            vec![
                AgentSearchStepStatus::Done,
                AgentSearchStepStatus::Current,
                AgentSearchStepStatus::Default
            ]
        );

        acc.apply(ChatResponseEvent::AgentReadResults(AgentReadResultsStream {
            results: vec![result("https://b.com")],
            step_number: 1,
        }))
        .unwrap();
        acc.apply(ChatResponseEvent::AgentFinish).unwrap();

        acc.apply(ChatResponseEvent::text("Answer")).unwrap();
        assert_eq!(statuses(&acc), vec![AgentSearchStepStatus::Done; 3]);

        let plan = acc.snapshot().agent_response.unwrap();
        assert_eq!(plan.steps, vec!["A", "B", "C"]);
        assert_eq!(plan.steps_details[1].queries, vec!["b query"]);
        assert_eq!(plan.steps_details[1].results, vec![result("https://b.com")]);
    }

    #[test]
    fn test_out_of_range_step_fails_the_turn() {
        let mut acc = MessageAccumulator::new();
        acc.apply(query_plan(&["A"])).unwrap();
        let err = acc
            .apply(ChatResponseEvent::AgentSearchQueries(AgentSearchQueriesStream {
                queries: vec![],
                step_number: 4,
            }))
            .unwrap_err();
        assert!(matches!(err, StreamError::StepOutOfRange { .. }));
    }

    #[test]
    fn test_stream_end_completes_with_snapshot() {
        let mut acc = MessageAccumulator::new();
        acc.apply(ChatResponseEvent::BeginStream).unwrap();
        acc.apply(search_results(&["https://x.com/a"])).unwrap();
        acc.apply(ChatResponseEvent::text("The sky is blue[1].")).unwrap();

        let applied = acc
            .apply(ChatResponseEvent::StreamEnd(StreamEndStream {
                session_id: Some("s1".into()),
                thread_id: None,
            }))
            .unwrap();
        match applied {
            Applied::Completed {
                message,
                session_id,
                thread_id,
            } => {
                assert_eq!(message.role, MessageRole::Assistant);
                assert_eq!(message.content, "The sky is blue[1].");
                assert_eq!(message.sources.len(), 1);
                assert!(!message.is_error_message);
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert_eq!(thread_id, None);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_error_event_fails() {
        let mut acc = MessageAccumulator::new();
        acc.apply(ChatResponseEvent::text("partial")).unwrap();
        let applied = acc.apply(ChatResponseEvent::error("rate limited")).unwrap();
        assert_eq!(
            applied,
            Applied::Failed {
                detail: "rate limited".into()
            }
        );
    }

    #[test]
    fn test_repeated_begin_keeps_content() {
        let mut acc = MessageAccumulator::new();
        acc.apply(ChatResponseEvent::BeginStream).unwrap();
        acc.apply(ChatResponseEvent::text("Hello")).unwrap();
        acc.apply(ChatResponseEvent::BeginStream).unwrap();
        assert_eq!(acc.snapshot().content, "Hello");
        assert!(acc.has_begun());
    }
}
