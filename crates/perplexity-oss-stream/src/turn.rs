//! Turn controller — runs one query/answer exchange end to end.
//!
//! `Idle -> Streaming -> (Committed | Errored | Abandoned)`
//!
//! The finished phase stays published until the next `submit`. A `submit`
//! future dropped mid-stream publishes `Idle` instead.
//!
//! The controller appends the user message, opens the stream, applies every
//! decoded event, publishes a [`TurnSnapshot`] after each one, and commits
//! exactly one assistant message per finished turn. Only one turn may stream
//! at a time; a concurrent `submit` is rejected with [`TurnError::Busy`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use perplexity_oss_core::conversation::{CredentialSource, FilterSource, HistorySink};
use perplexity_oss_core::protocol::{ChatRequest, ChatResponseEvent, thread_path};
use perplexity_oss_core::types::ChatMessage;

use crate::StreamError;
use crate::accumulator::{Applied, MessageAccumulator};
use crate::client::ChatTransport;

/// Shown in place of transport and decode failures.
pub const GENERIC_ERROR_DETAIL: &str =
    "An error occurred while streaming the response. Please try again.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnPhase {
    #[default]
    Idle,
    Streaming,
    Committed,
    Errored,
    Abandoned,
}

/// What a renderer sees of the turn in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSnapshot {
    pub phase: TurnPhase,
    /// The assistant message so far; `None` outside of streaming.
    pub message: Option<ChatMessage>,
    /// Set once the server has sent `begin-stream`.
    pub is_streaming_message: bool,
    /// Set for the whole turn when it was submitted with pro search on.
    pub is_streaming_pro_search: bool,
}

/// Category of a failed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection refused or dropped, non-2xx status, or the stream ended early.
    Transport,
    /// A frame was malformed or referenced an unknown plan step.
    Decode,
    /// The server sent an `error` event.
    Server,
}

/// How a submitted turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed {
        message: ChatMessage,
        session_id: Option<String>,
        thread_id: Option<i64>,
    },
    Failed {
        kind: ErrorKind,
        detail: String,
    },
    /// Cancelled before a terminal event; nothing was committed.
    Abandoned,
}

impl TurnOutcome {
    /// Legacy `/search/{id}` path when the server assigned a thread.
    pub fn thread_path(&self) -> Option<String> {
        match self {
            TurnOutcome::Completed {
                thread_id: Some(id),
                ..
            } => Some(thread_path(*id)),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("a turn is already streaming")]
    Busy,
}

/// Marks the controller busy for the lifetime of one `submit`, including
/// when the submit future is dropped mid-stream.
struct InFlight {
    flag: Arc<AtomicBool>,
    snapshots: Arc<watch::Sender<TurnSnapshot>>,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl InFlight {
    fn acquire(controller: &TurnController) -> Option<Self> {
        controller
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: controller.in_flight.clone(),
                snapshots: controller.snapshots.clone(),
                cancel: controller.cancel.clone(),
            })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        // Still streaming means the submit future was dropped
        self.snapshots.send_if_modified(|snapshot| {
            if snapshot.phase == TurnPhase::Streaming {
                *snapshot = TurnSnapshot::default();
                true
            } else {
                false
            }
        });
        {
            let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
        }
        self.flag.store(false, Ordering::Release);
    }
}

pub struct TurnController {
    transport: Arc<dyn ChatTransport>,
    credentials: Arc<dyn CredentialSource>,
    filters: Arc<dyn FilterSource>,
    history: Arc<dyn HistorySink>,
    pro_mode_enabled: bool,
    pro_search: AtomicBool,
    in_flight: Arc<AtomicBool>,
    cancel: Arc<Mutex<CancellationToken>>,
    snapshots: Arc<watch::Sender<TurnSnapshot>>,
}

impl TurnController {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        credentials: Arc<dyn CredentialSource>,
        filters: Arc<dyn FilterSource>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        let (snapshots, _) = watch::channel(TurnSnapshot::default());
        Self {
            transport,
            credentials,
            filters,
            history,
            pro_mode_enabled: true,
            pro_search: AtomicBool::new(false),
            in_flight: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            snapshots: Arc::new(snapshots),
        }
    }

    /// Allow or forbid pro search. Forbidding also switches it off.
    pub fn with_pro_mode(mut self, enabled: bool) -> Self {
        self.pro_mode_enabled = enabled;
        if !enabled {
            self.pro_search.store(false, Ordering::Relaxed);
        }
        self
    }

    pub fn pro_mode_enabled(&self) -> bool {
        self.pro_mode_enabled
    }

    pub fn pro_search(&self) -> bool {
        self.pro_search.load(Ordering::Relaxed)
    }

    /// Request pro search for subsequent turns. Returns the effective setting,
    /// which stays off when pro mode is disabled.
    pub fn set_pro_search(&self, on: bool) -> bool {
        let effective = on && self.pro_mode_enabled;
        self.pro_search.store(effective, Ordering::Relaxed);
        effective
    }

    pub fn toggle_pro_search(&self) -> bool {
        self.set_pro_search(!self.pro_search())
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Live snapshots of the turn in flight.
    pub fn subscribe(&self) -> watch::Receiver<TurnSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> TurnSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Token that abandons the turn in flight, or the next turn when taken
    /// while idle. It is spent once a cancelled turn ends; take a fresh one
    /// for later turns.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the turn in flight without committing anything. Returns whether a
    /// turn was running.
    pub fn cancel(&self) -> bool {
        let busy = self.is_busy();
        if busy {
            self.cancel_handle().cancel();
        }
        busy
    }

    fn build_request(&self, query: &str) -> ChatRequest {
        let range = self.filters.date_range();
        ChatRequest {
            query: query.to_string(),
            start_date: range.start,
            end_date: range.end,
            thread_id: self.history.thread_id(),
            session_id: self.history.session_id(),
            pro_search: self.pro_search(),
        }
    }

    /// Run one turn for `query` to completion.
    ///
    /// The user message is recorded before any network activity. Failures
    /// are reported as [`TurnOutcome::Failed`] after an error message has
    /// been committed; the only `Err` is [`TurnError::Busy`].
    pub async fn submit(&self, query: &str) -> Result<TurnOutcome, TurnError> {
        let _in_flight = InFlight::acquire(self).ok_or(TurnError::Busy)?;

        let turn_id = Uuid::new_v4();
        let cancel = self.cancel_handle();

        let request = self.build_request(query);
        let pro_search = request.pro_search;
        self.history.append(ChatMessage::user(query));
        self.snapshots.send_replace(TurnSnapshot {
            phase: TurnPhase::Streaming,
            message: None,
            is_streaming_message: false,
            is_streaming_pro_search: pro_search,
        });
        info!(%turn_id, pro_search, session_id = ?request.session_id, "Turn started");

        let credentials = self.credentials.credentials();
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.abandon(turn_id)),
            opened = self.transport.open(&request, &credentials) => opened,
        };
        let mut frames = match opened {
            Ok(frames) => frames,
            Err(e) => return Ok(self.fail(turn_id, e)),
        };

        let mut accumulator = MessageAccumulator::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.abandon(turn_id)),
                next = frames.next() => next,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Ok(self.fail(turn_id, e)),
                None => return Ok(self.fail(turn_id, StreamError::Incomplete)),
            };

            let event = match ChatResponseEvent::decode(&frame) {
                Ok(Some(event)) => event,
                Ok(None) => {
                    trace!(%turn_id, "Keep-alive frame");
                    continue;
                }
                Err(e) => return Ok(self.fail(turn_id, e.into())),
            };

            match accumulator.apply(event) {
                Ok(Applied::Continue) => {
                    self.snapshots.send_replace(TurnSnapshot {
                        phase: TurnPhase::Streaming,
                        message: Some(accumulator.snapshot()),
                        is_streaming_message: accumulator.has_begun(),
                        is_streaming_pro_search: pro_search,
                    });
                }
                Ok(Applied::Completed {
                    message,
                    session_id,
                    thread_id,
                }) => return Ok(self.commit(turn_id, message, session_id, thread_id)),
                Ok(Applied::Failed { detail }) => {
                    return Ok(self.record_failure(turn_id, ErrorKind::Server, detail));
                }
                Err(e) => return Ok(self.fail(turn_id, e)),
            }
        }
    }

    fn commit(
        &self,
        turn_id: Uuid,
        message: ChatMessage,
        session_id: Option<String>,
        thread_id: Option<i64>,
    ) -> TurnOutcome {
        self.history.append(message.clone());
        if session_id.is_some() {
            self.history.set_session_id(session_id.clone());
        }
        if thread_id.is_some() {
            self.history.set_thread_id(thread_id);
        }
        self.publish_finished(TurnPhase::Committed);
        info!(
            %turn_id,
            chars = message.content.len(),
            sources = message.sources.len(),
            ?session_id,
            ?thread_id,
            "Turn committed"
        );
        TurnOutcome::Completed {
            message,
            session_id,
            thread_id,
        }
    }

    fn fail(&self, turn_id: Uuid, err: StreamError) -> TurnOutcome {
        warn!(%turn_id, error = %err, "Turn failed");
        self.record_failure(turn_id, err.kind(), GENERIC_ERROR_DETAIL.to_string())
    }

    fn record_failure(&self, turn_id: Uuid, kind: ErrorKind, detail: String) -> TurnOutcome {
        self.history.append(ChatMessage::error(detail.clone()));
        self.publish_finished(TurnPhase::Errored);
        debug!(%turn_id, ?kind, %detail, "Error message committed");
        TurnOutcome::Failed { kind, detail }
    }

    fn abandon(&self, turn_id: Uuid) -> TurnOutcome {
        self.publish_finished(TurnPhase::Abandoned);
        info!(%turn_id, "Turn abandoned");
        TurnOutcome::Abandoned
    }

    fn publish_finished(&self, phase: TurnPhase) {
        self.snapshots.send_replace(TurnSnapshot {
            phase,
            ..TurnSnapshot::default()
        });
    }
}
