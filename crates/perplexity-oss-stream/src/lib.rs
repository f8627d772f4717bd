//! Streaming chat turn engine.
//!
//! A [`TurnController`] sends one query to the chat API over a
//! [`ChatTransport`], decodes the server-sent events of the reply, and folds
//! them into an assistant message via the [`MessageAccumulator`] (text,
//! sources, related questions) and [`AgentPlanTracker`] (pro search steps).
//! A snapshot is published after every event for live rendering.

use thiserror::Error;

use perplexity_oss_core::protocol::DecodeError;

pub mod accumulator;
pub mod client;
pub mod plan;
pub mod sse;
pub mod turn;

pub use accumulator::{Applied, MessageAccumulator};
pub use client::{ChatTransport, FrameStream, HttpChatTransport};
pub use plan::{AgentPlanTracker, PlanPhase};
pub use turn::{ErrorKind, TurnController, TurnError, TurnOutcome, TurnPhase, TurnSnapshot};

/// Anything that ends a turn short of a server-reported outcome.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The server referenced a plan step it never announced.
    #[error("step_number {step_number} is outside the announced plan of {plan_len} steps")]
    StepOutOfRange { step_number: usize, plan_len: usize },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("chat API error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("stream closed before the turn finished")]
    Incomplete,
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Decode(_) | StreamError::StepOutOfRange { .. } => ErrorKind::Decode,
            StreamError::Transport(_) | StreamError::Http { .. } | StreamError::Incomplete => {
                ErrorKind::Transport
            }
        }
    }
}

