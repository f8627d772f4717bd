use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A single search hit. Inline `[n]` markers in message content refer to
/// these by 1-based position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// Progress of one step of an agent search plan.
///
/// Ordered so that a status can only be promoted: `Default < Current < Done`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentSearchStepStatus {
    #[default]
    Default,
    Current,
    Done,
}

/// One planned research step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSearchStep {
    pub step: String,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub status: AgentSearchStepStatus,
    pub step_number: usize,
}

impl AgentSearchStep {
    pub fn new(step: impl Into<String>, step_number: usize) -> Self {
        Self {
            step: step.into(),
            queries: Vec::new(),
            results: Vec::new(),
            status: AgentSearchStepStatus::Default,
            step_number,
        }
    }
}

/// Snapshot of the agent search plan attached to an assistant message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Step titles in plan order.
    #[serde(default)]
    pub steps: Vec<String>,
    pub steps_details: Vec<AgentSearchStep>,
}

impl AgentResponse {
    pub fn from_steps(steps_details: Vec<AgentSearchStep>) -> Self {
        Self {
            steps: steps_details.iter().map(|s| s.step.clone()).collect(),
            steps_details,
        }
    }

    /// The step currently being worked on, if the plan is still active.
    pub fn current_step(&self) -> Option<&AgentSearchStep> {
        self.steps_details
            .iter()
            .find(|s| s.status == AgentSearchStepStatus::Current)
    }
}

/// One turn's rendered content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<SearchResult>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub related_queries: Vec<String>,
    #[serde(default)]
    pub agent_response: Option<AgentResponse>,
    #[serde(default)]
    pub is_error_message: bool,
}

impl ChatMessage {
    /// A user query as it is recorded in history.
    pub fn user(query: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: query.into(),
            sources: Vec::new(),
            images: Vec::new(),
            related_queries: Vec::new(),
            agent_response: None,
            is_error_message: false,
        }
    }

    /// An empty assistant message, the starting point of every turn.
    pub fn assistant() -> Self {
        Self {
            role: MessageRole::Assistant,
            ..Self::user("")
        }
    }

    /// An assistant message reporting a failed turn.
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            content: detail.into(),
            is_error_message: true,
            ..Self::assistant()
        }
    }
}
