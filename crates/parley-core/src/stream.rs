//! Run stream lifecycle
//!
//! Wraps one server event stream per agent run: idempotent start,
//! cooperative cancellation, benign-end classification, and a
//! monotone status so a late `connecting` frame never walks a
//! visible `running` state backwards.

use parley_api::{Message, RunEvent, RunEventStream, RunStatus, ToolFrame, is_benign_end_message};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Where the client is in a run's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Stopped,
    AgentNotRunning,
    Errored,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::Completed
                | StreamState::Stopped
                | StreamState::AgentNotRunning
                | StreamState::Errored
        )
    }
}

/// Decoded stream output, with transport endings already classified
#[derive(Debug)]
pub enum StreamEvent {
    AssistantStart,
    Message(Message),
    PartialText(String),
    PartialToolCall(ToolFrame),
    Status(RunStatus),
    /// The run ended for an expected reason (already finished, never
    /// started); not an error
    BenignEnd(String),
    /// The stream failed
    Failed(String),
    /// The stream is exhausted or was cancelled
    Closed,
}

fn status_rank(status: RunStatus) -> u8 {
    match status {
        RunStatus::Connecting => 0,
        RunStatus::Running => 1,
        _ => 2,
    }
}

/// One consumer of one run's event stream
pub struct StreamClient {
    state: StreamState,
    run_id: Option<String>,
    inner: Option<RunEventStream>,
    cancel: CancellationToken,
    last_status: Option<RunStatus>,
}

impl Default for StreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamClient {
    pub fn new() -> Self {
        Self {
            state: StreamState::Idle,
            run_id: None,
            inner: None,
            cancel: CancellationToken::new(),
            last_status: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// The run currently being streamed, if any
    pub fn last_started(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Attach a stream for a run. Returns false (and drops the new
    /// stream) when the same run is already attached and live.
    pub fn start(
        &mut self,
        run_id: impl Into<String>,
        stream: RunEventStream,
        cancel: CancellationToken,
    ) -> bool {
        let run_id = run_id.into();
        if self.run_id.as_deref() == Some(run_id.as_str()) && !self.state.is_terminal() {
            tracing::debug!(%run_id, "Stream already attached, ignoring duplicate start");
            return false;
        }
        self.state = StreamState::Connecting;
        self.run_id = Some(run_id);
        self.inner = Some(stream);
        self.cancel = cancel;
        self.last_status = None;
        true
    }

    /// Request cooperative shutdown; the pending `next()` resolves to
    /// `Closed`.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if !self.state.is_terminal() {
            self.state = StreamState::Stopped;
        }
    }

    /// Pull the next event. Resolves to `Closed` exactly once when
    /// the stream ends or is cancelled; afterwards the client is back
    /// to idle and restartable.
    pub async fn next(&mut self) -> StreamEvent {
        let Some(inner) = self.inner.as_mut() else {
            return StreamEvent::Closed;
        };
        let cancel = self.cancel.clone();

        let event = tokio::select! {
            _ = cancel.cancelled() => None,
            event = inner.next() => event,
        };

        match event {
            None => {
                if !self.state.is_terminal() {
                    self.state = if cancel.is_cancelled() {
                        StreamState::Stopped
                    } else {
                        StreamState::Completed
                    };
                }
                self.finish();
                StreamEvent::Closed
            }
            Some(RunEvent::AssistantStart) => {
                self.state = StreamState::Streaming;
                StreamEvent::AssistantStart
            }
            Some(RunEvent::PartialText { chunk }) => {
                self.state = StreamState::Streaming;
                StreamEvent::PartialText(chunk)
            }
            Some(RunEvent::PartialToolCall { frame }) => {
                self.state = StreamState::Streaming;
                StreamEvent::PartialToolCall(frame)
            }
            Some(RunEvent::Message { message }) => {
                self.state = StreamState::Streaming;
                StreamEvent::Message(message)
            }
            Some(RunEvent::Status { status }) => match self.admit_status(status) {
                Some(status) => StreamEvent::Status(status),
                None => StreamEvent::Status(self.last_status.unwrap_or(status)),
            },
            Some(RunEvent::Error { message }) => {
                if is_benign_end_message(&message) {
                    self.state = StreamState::AgentNotRunning;
                    self.finish();
                    StreamEvent::BenignEnd(message)
                } else {
                    self.state = StreamState::Errored;
                    self.finish();
                    StreamEvent::Failed(message)
                }
            }
            Some(RunEvent::Close) => {
                if !self.state.is_terminal() {
                    self.state = StreamState::Completed;
                }
                self.finish();
                StreamEvent::Closed
            }
        }
    }

    /// Admit a status only if it does not regress the lifecycle
    fn admit_status(&mut self, status: RunStatus) -> Option<RunStatus> {
        if let Some(last) = self.last_status {
            if status_rank(status) < status_rank(last) {
                tracing::debug!(?status, ?last, "Dropping regressive status");
                return None;
            }
        }
        self.last_status = Some(status);
        if status.is_terminal() {
            self.state = match status {
                RunStatus::Stopped => StreamState::Stopped,
                RunStatus::Error => StreamState::Errored,
                RunStatus::AgentNotRunning => StreamState::AgentNotRunning,
                _ => StreamState::Completed,
            };
        }
        Some(status)
    }

    fn finish(&mut self) {
        self.inner = None;
        self.run_id = None;
    }

    /// Drop any attached stream and return to idle
    pub fn reset(&mut self) {
        self.cancel.cancel();
        self.finish();
        self.state = StreamState::Idle;
        self.last_status = None;
    }
}
