//! Turn orchestration
//!
//! The coordinator owns one conversation: it validates submits,
//! appends optimistic entries, drives the chat/adaptive fast path or
//! a full agent run, reconciles stream frames into the message log,
//! and emits change events for the host to redraw from.

use crate::adaptive::{AdaptiveArbiter, AdaptiveOutcome, PendingPrompt, TypewriterConfig, typewrite};
use crate::error::{Error, Result};
use crate::events::{CoreEvent, ErrorKind};
use crate::handle::CoreHandle;
use crate::kv::{Clock, KvStore};
use crate::mode::ModeState;
use crate::project::{ToolCallSnapshot, project_tool_calls};
use crate::store::MessageStore;
use crate::stream::{StreamClient, StreamEvent};
use crate::timeline::TimelineController;
use parking_lot::Mutex;
use parley_api::{
    AdaptiveDecision, AgentRun, Attachment, Backend, ChatMode, Message, MessageId, MessageKind,
    MessageMeta, RunStatus, StartOptions, ToolFrame,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Capacity of the host event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Redraw cadence for the elapsed-time display
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Static configuration for one conversation
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub thread_id: String,
    pub project_id: String,
    pub agent_id: String,
    /// How long a thinking placeholder may wait for its first
    /// assistant frame before being withdrawn
    pub placeholder_ttl: Duration,
    pub typewriter: TypewriterConfig,
}

impl CoreConfig {
    pub fn new(
        thread_id: impl Into<String>,
        project_id: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            project_id: project_id.into(),
            agent_id: agent_id.into(),
            placeholder_ttl: Duration::from_secs(10),
            typewriter: TypewriterConfig::default(),
        }
    }
}

/// One submit from the composer
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub uploading: bool,
    pub options: StartOptions,
}

impl SubmitRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// How a submit was dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The fast path answered; nothing left to drive
    Completed,
    /// An adaptive question is pending
    Prompted,
    /// An agent run started; call [`Coordinator::pump`] to drive it
    RunStarted,
    /// The text was routed to the already-running agent
    FollowUpSent,
    /// An empty submit while running became a stop
    StopRequested,
    /// Nothing to do
    NoOp,
}

/// Drives one conversation thread against a backend
pub struct Coordinator {
    backend: Arc<dyn Backend>,
    config: CoreConfig,
    store: Arc<Mutex<MessageStore>>,
    stream: StreamClient,
    timeline: TimelineController,
    modes: ModeState,
    arbiter: AdaptiveArbiter,
    run_id: Option<String>,
    status: RunStatus,
    user_initiated: bool,
    title_requested: bool,
    stream_message: Option<Message>,
    stream_frame: Option<ToolFrame>,
    snapshot_count: usize,
    ticker_cancel: Option<CancellationToken>,
    event_tx: broadcast::Sender<CoreEvent>,
    handle: CoreHandle,
}

impl Coordinator {
    pub fn new(
        backend: Arc<dyn Backend>,
        config: CoreConfig,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let timeline = TimelineController::new(kv, clock, &config.project_id, &config.agent_id);
        let modes = ModeState::resolve(config.thread_id.clone(), &[], None);
        Self {
            backend,
            config,
            store: Arc::new(Mutex::new(MessageStore::new())),
            stream: StreamClient::new(),
            timeline,
            modes,
            arbiter: AdaptiveArbiter::new(),
            run_id: None,
            status: RunStatus::Idle,
            user_initiated: false,
            title_requested: false,
            stream_message: None,
            stream_frame: None,
            snapshot_count: 0,
            ticker_cancel: None,
            event_tx,
            handle: CoreHandle::new(),
        }
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_tx.subscribe()
    }

    /// Cloneable control handle
    pub fn handle(&self) -> CoreHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Whether the current run was started by this client, as opposed
    /// to one resumed on mount
    pub fn user_initiated(&self) -> bool {
        self.user_initiated
    }

    pub fn mode(&self) -> ChatMode {
        self.modes.active()
    }

    pub fn select_mode(&mut self, mode: ChatMode) {
        self.modes.select(mode);
    }

    pub fn pending_prompt(&self) -> Option<&PendingPrompt> {
        self.arbiter.pending()
    }

    /// The ordered log, with the in-flight streamed reply at the tail
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = self.store.lock().snapshot();
        if let Some(streaming) = &self.stream_message {
            messages.push(streaming.clone());
        }
        messages
    }

    /// The derived tool-call sequence
    pub fn tool_calls(&self) -> Vec<ToolCallSnapshot> {
        project_tool_calls(&self.store.lock().snapshot(), self.stream_frame.as_ref())
    }

    pub fn timeline(&self) -> &TimelineController {
        &self.timeline
    }

    pub fn timeline_prev(&mut self) {
        self.timeline.prev();
        self.emit(CoreEvent::TimelineChanged);
    }

    pub fn timeline_next(&mut self) {
        self.timeline.next();
        self.emit(CoreEvent::TimelineChanged);
    }

    pub fn timeline_seek(&mut self, index: usize) {
        self.timeline.seek(index);
        self.emit(CoreEvent::TimelineChanged);
    }

    pub fn timeline_jump_to_live(&mut self) {
        self.timeline.jump_to_live();
        self.emit(CoreEvent::TimelineChanged);
    }

    pub fn set_panel_closed(&mut self, closed: bool) {
        self.timeline.set_user_closed(closed);
    }

    /// Merge a page of persisted history through the reconciliation
    /// rules
    pub fn hydrate(&mut self, messages: Vec<Message>) -> Result<()> {
        self.store.lock().hydrate(messages)?;
        self.emit(CoreEvent::MessagesChanged);
        self.refresh_projection();
        Ok(())
    }

    /// Load persisted history and resume a still-active run, if any
    pub async fn mount(
        &mut self,
        persisted: Vec<Message>,
        thread_mode: Option<&str>,
        active_run: Option<AgentRun>,
    ) -> Result<()> {
        self.store.lock().hydrate(persisted)?;
        let snapshot = self.store.lock().snapshot();
        self.modes = ModeState::resolve(self.config.thread_id.clone(), &snapshot, thread_mode);

        let resuming = active_run
            .as_ref()
            .is_some_and(|run| run.status.is_active());
        self.timeline.restore_on_mount(resuming);
        self.refresh_projection();
        self.emit(CoreEvent::MessagesChanged);

        if let Some(run) = active_run.filter(|r| r.status.is_active()) {
            self.run_id = Some(run.id.clone());
            self.set_status(run.status);
            self.attach_stream(&run.id).await;
        }
        Ok(())
    }

    /// Dispatch a submit according to mode and run state
    pub async fn submit(&mut self, request: SubmitRequest) -> Result<SubmitOutcome> {
        let text = request.text.trim().to_string();

        if self.status.is_active() {
            if text.is_empty() {
                self.stop().await;
                return Ok(SubmitOutcome::StopRequested);
            }
            return self.send_follow_up(&text).await;
        }

        // An empty submit needs settled attachments to stand in for
        // text; a submit with text always goes through
        if text.is_empty() && (request.attachments.is_empty() || request.uploading) {
            return Err(Error::EmptySubmit);
        }

        let cancel = self.handle.reset_for_turn();
        let mode = self.modes.active();
        let meta = MessageMeta::with_mode(mode);

        let optimistic = Message::optimistic_user(&self.config.thread_id, &text)
            .with_meta(meta.clone());
        let optimistic_id = optimistic.id.clone();
        let placeholder = Message::thinking_placeholder(&self.config.thread_id);
        let placeholder_id = placeholder.id.clone();
        {
            let mut store = self.store.lock();
            store.append(optimistic)?;
            store.append(placeholder)?;
        }
        self.emit(CoreEvent::MessagesChanged);
        self.spawn_placeholder_watchdog(placeholder_id.clone());

        match mode {
            ChatMode::Chat => {
                self.run_fast_path(&text, &request.options, &optimistic_id, &placeholder_id, false, cancel)
                    .await
            }
            ChatMode::Adaptive => {
                self.run_fast_path(&text, &request.options, &optimistic_id, &placeholder_id, true, cancel)
                    .await
            }
            ChatMode::Execute => {
                self.run_execute_path(&text, &request.options, &optimistic_id, &placeholder_id, meta)
                    .await
            }
        }
    }

    /// The user confirmed the pending adaptive question
    pub async fn confirm_pending(&mut self) -> Result<SubmitOutcome> {
        let Some((_message, options)) = self.arbiter.confirm() else {
            return Ok(SubmitOutcome::NoOp);
        };
        self.emit(CoreEvent::AdaptivePromptChanged);
        self.escalate(&options).await
    }

    /// The user declined the pending adaptive question
    pub fn decline_pending(&mut self) {
        if self.arbiter.decline() {
            self.emit(CoreEvent::AdaptivePromptChanged);
        }
    }

    /// Stop the current run. Local state goes quiet first; the
    /// backend stop is asked for afterwards and a failure there is
    /// logged, not rolled back.
    pub async fn stop(&mut self) {
        let run = self.run_id.take();
        self.user_initiated = false;
        self.handle.take_stop_request();
        self.stream_message = None;
        self.stream_frame = None;
        self.store.lock().remove_thinking_placeholders();
        self.stream.stop();
        self.set_status(RunStatus::Idle);
        self.emit(CoreEvent::MessagesChanged);

        if let Some(run_id) = run {
            if let Err(e) = self.backend.stop_agent(&run_id).await {
                tracing::warn!(%run_id, "Backend stop failed: {}", e);
            }
        }
    }

    /// Drive the attached run stream to completion
    pub async fn pump(&mut self) -> Result<()> {
        loop {
            match self.stream.next().await {
                StreamEvent::Closed => break,
                event => self.apply_stream_event(event),
            }
        }
        self.finish_run();
        Ok(())
    }

    // ---- submit paths ----

    async fn send_follow_up(&mut self, text: &str) -> Result<SubmitOutcome> {
        let Some(run_id) = self.run_id.clone() else {
            return Err(Error::Other("No active run to follow up".into()));
        };
        self.backend
            .send_adaptive_input(&run_id, &self.config.thread_id, text)
            .await?;
        // No local bubble: the side-channel message appears when the
        // stream echoes it back
        Ok(SubmitOutcome::FollowUpSent)
    }

    async fn run_fast_path(
        &mut self,
        text: &str,
        options: &StartOptions,
        optimistic_id: &MessageId,
        placeholder_id: &MessageId,
        adaptive: bool,
        cancel: CancellationToken,
    ) -> Result<SubmitOutcome> {
        let mode = if adaptive {
            ChatMode::Adaptive
        } else {
            ChatMode::Chat
        };

        // The fast path paints its own reply; drop the placeholder
        // before any backend round-trip
        self.store.lock().remove_by_id(placeholder_id);
        self.emit(CoreEvent::MessagesChanged);

        match self
            .backend
            .persist_user_message(&self.config.thread_id, text, MessageMeta::with_mode(mode))
            .await
        {
            Ok(confirmed) => {
                self.store.lock().replace_by_id(optimistic_id, confirmed);
                self.emit(CoreEvent::MessagesChanged);
            }
            Err(e) => {
                self.store.lock().remove_by_id(optimistic_id);
                self.emit(CoreEvent::MessagesChanged);
                self.emit_error(ErrorKind::classify(&e), &e);
                return Err(e.into());
            }
        }

        let reply = if adaptive {
            self.backend.adaptive_chat(text).await
        } else {
            self.backend.fast_chat(text).await
        };
        let reply = match reply {
            Ok(r) => r,
            Err(e) => {
                self.emit_error(ErrorKind::Adaptive, &e);
                return Err(e.into());
            }
        };

        if !reply.response.is_empty() {
            let outcome = self
                .reveal_reply(&reply.response, mode, reply.decision.clone(), cancel.clone())
                .await;
            if !outcome {
                return Ok(SubmitOutcome::Completed);
            }
        }

        if adaptive {
            if let Some(decision) = reply.decision {
                match self.arbiter.apply_decision(decision, text, options) {
                    AdaptiveOutcome::Reply => {}
                    AdaptiveOutcome::Escalate { preface } => {
                        if let Some(preface) = preface {
                            self.persist_preface(&preface).await;
                        }
                        return self.escalate(options).await;
                    }
                    AdaptiveOutcome::Prompted => {
                        self.emit(CoreEvent::AdaptivePromptChanged);
                        return Ok(SubmitOutcome::Prompted);
                    }
                }
            }
        }
        Ok(SubmitOutcome::Completed)
    }

    /// Typewrite a reply into a provisional assistant message, then
    /// swap in the persisted record. Returns false when cancelled.
    async fn reveal_reply(
        &mut self,
        response: &str,
        mode: ChatMode,
        decision: Option<AdaptiveDecision>,
        cancel: CancellationToken,
    ) -> bool {
        let provisional_id = MessageId::Confirmed(format!("local-{}", Uuid::new_v4()));
        let mut provisional =
            Message::assistant(provisional_id.to_string(), &self.config.thread_id, "");
        provisional.meta.chat_mode = Some(mode);
        if self.store.lock().append(provisional).is_err() {
            return false;
        }
        self.emit(CoreEvent::MessagesChanged);

        let store = Arc::clone(&self.store);
        let event_tx = self.event_tx.clone();
        let id = provisional_id.clone();
        let finished = typewrite(response, self.config.typewriter, &cancel, |prefix| {
            let mut store = store.lock();
            if let Some(msg) = store
                .messages()
                .iter()
                .find(|m| m.id == id)
                .cloned()
                .map(|mut m| {
                    m.content = prefix.to_string();
                    m
                })
            {
                store.replace_by_id(&id, msg);
            }
            let _ = event_tx.send(CoreEvent::MessagesChanged);
        })
        .await;

        if !finished {
            self.store.lock().remove_by_id(&provisional_id);
            self.emit(CoreEvent::MessagesChanged);
            return false;
        }

        let mut meta = MessageMeta::with_mode(mode);
        meta.decision = decision;
        match self
            .backend
            .persist_assistant_message(&self.config.thread_id, response, meta)
            .await
        {
            Ok(confirmed) => {
                self.store.lock().replace_by_id(&provisional_id, confirmed);
            }
            Err(e) => {
                tracing::warn!("Failed to persist fast reply: {}", e);
                self.store.lock().remove_by_id(&provisional_id);
                self.emit_error(ErrorKind::Adaptive, &e);
            }
        }
        self.emit(CoreEvent::MessagesChanged);
        true
    }

    async fn persist_preface(&mut self, preface: &str) {
        let mut meta = MessageMeta::with_mode(ChatMode::Adaptive);
        meta.source = Some("preface".to_string());
        match self
            .backend
            .persist_assistant_message(&self.config.thread_id, preface, meta)
            .await
        {
            Ok(confirmed) => {
                if self.store.lock().append(confirmed).is_ok() {
                    self.emit(CoreEvent::MessagesChanged);
                }
            }
            Err(e) => tracing::warn!("Failed to persist preface: {}", e),
        }
    }

    async fn run_execute_path(
        &mut self,
        text: &str,
        options: &StartOptions,
        optimistic_id: &MessageId,
        placeholder_id: &MessageId,
        meta: MessageMeta,
    ) -> Result<SubmitOutcome> {
        let (persisted, started) = tokio::join!(
            self.backend
                .persist_user_message(&self.config.thread_id, text, meta),
            self.backend.start_agent(&self.config.thread_id, options),
        );

        let run_id = match (persisted, started) {
            (Ok(confirmed), Ok(run_id)) => {
                self.store.lock().replace_by_id(optimistic_id, confirmed);
                self.emit(CoreEvent::MessagesChanged);
                run_id
            }
            (Err(persist_err), Ok(run_id)) => {
                // The run is live; the stream's user echo will promote
                // the optimistic entry by content
                tracing::warn!("User message persist failed, run continues: {}", persist_err);
                run_id
            }
            (persisted, Err(start_err)) => {
                let mut store = self.store.lock();
                store.remove_by_id(placeholder_id);
                if start_err.is_limit() || persisted.is_err() {
                    store.remove_by_id(optimistic_id);
                } else if let Ok(confirmed) = persisted {
                    store.replace_by_id(optimistic_id, confirmed);
                }
                drop(store);
                self.emit(CoreEvent::MessagesChanged);
                self.emit_error(ErrorKind::classify(&start_err), &start_err);
                return Err(start_err.into());
            }
        };

        self.run_id = Some(run_id.clone());
        self.user_initiated = true;
        self.request_title_once(text);

        // A stop that raced the start wins
        if self.handle.take_stop_request() {
            self.stop().await;
            return Ok(SubmitOutcome::StopRequested);
        }

        self.set_status(RunStatus::Connecting);
        self.attach_stream(&run_id).await;
        Ok(SubmitOutcome::RunStarted)
    }

    async fn escalate(&mut self, options: &StartOptions) -> Result<SubmitOutcome> {
        match self
            .backend
            .start_agent(&self.config.thread_id, options)
            .await
        {
            Ok(run_id) => {
                self.run_id = Some(run_id.clone());
                self.user_initiated = true;
                if self.handle.take_stop_request() {
                    self.stop().await;
                    return Ok(SubmitOutcome::StopRequested);
                }
                self.set_status(RunStatus::Connecting);
                self.attach_stream(&run_id).await;
                Ok(SubmitOutcome::RunStarted)
            }
            Err(e) => {
                self.emit_error(ErrorKind::classify(&e), &e);
                Err(e.into())
            }
        }
    }

    async fn attach_stream(&mut self, run_id: &str) {
        match self.backend.open_run_stream(run_id).await {
            Ok(stream) => {
                self.stream
                    .start(run_id, stream, self.handle.cancel_token());
            }
            Err(e) if e.is_benign_end() => {
                tracing::info!(run_id, "Run already over: {}", e);
                self.set_status(RunStatus::AgentNotRunning);
                self.finish_run();
            }
            Err(e) => {
                self.emit_error(ErrorKind::Stream, &e);
                self.set_status(RunStatus::Error);
                self.finish_run();
            }
        }
    }

    // ---- stream reconciliation ----

    fn apply_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::AssistantStart => {
                if self.store.lock().remove_thinking_placeholders() > 0 {
                    self.emit(CoreEvent::MessagesChanged);
                }
            }
            StreamEvent::PartialText(chunk) => {
                match &mut self.stream_message {
                    Some(message) => message.content.push_str(&chunk),
                    None => {
                        let id = format!(
                            "{}-stream",
                            self.run_id.as_deref().unwrap_or("run")
                        );
                        let mut message =
                            Message::assistant(id, &self.config.thread_id, chunk);
                        message.meta.is_streaming = true;
                        self.stream_message = Some(message);
                        self.store.lock().remove_thinking_placeholders();
                    }
                }
                self.emit(CoreEvent::MessagesChanged);
            }
            StreamEvent::PartialToolCall(frame) => {
                self.stream_frame = Some(frame);
                self.refresh_projection();
            }
            StreamEvent::Message(message) => {
                if message.kind == MessageKind::Assistant && !message.is_thinking_placeholder() {
                    self.stream_message = None;
                }
                if let Some(frame) = &self.stream_frame {
                    let superseded = message
                        .tool_invocation()
                        .is_some_and(|inv| match (&inv.call_id, &frame.call_id) {
                            (Some(a), Some(b)) => a == b,
                            _ => inv.name == frame.name,
                        });
                    if superseded {
                        self.stream_frame = None;
                    }
                }
                if let Err(e) = self.store.lock().append(message) {
                    tracing::warn!("Dropping irreconcilable stream message: {}", e);
                }
                self.emit(CoreEvent::MessagesChanged);
                self.refresh_projection();
            }
            StreamEvent::Status(status) => self.set_status(status),
            StreamEvent::BenignEnd(message) => {
                tracing::info!("Run ended: {}", message);
            }
            StreamEvent::Failed(message) => {
                self.emit(CoreEvent::Error {
                    kind: ErrorKind::Stream,
                    message,
                });
                self.set_status(RunStatus::Error);
            }
            StreamEvent::Closed => {}
        }
    }

    fn finish_run(&mut self) {
        self.stream_message = None;
        self.stream_frame = None;
        self.store.lock().remove_thinking_placeholders();
        self.stream.reset();
        self.run_id = None;
        self.user_initiated = false;
        if self.status.is_active() {
            self.set_status(RunStatus::Idle);
        }
        self.emit(CoreEvent::MessagesChanged);
        self.refresh_projection();
    }

    fn set_status(&mut self, status: RunStatus) {
        // A late connecting frame must not walk a running state back
        if status == RunStatus::Connecting && self.status == RunStatus::Running {
            return;
        }
        if status == self.status {
            return;
        }
        self.status = status;

        let active = status.is_active();
        self.timeline.on_run_state_changed(active);
        self.handle.set_running(active);
        if active && self.ticker_cancel.is_none() {
            self.spawn_ticker();
        } else if !active {
            if let Some(cancel) = self.ticker_cancel.take() {
                cancel.cancel();
            }
        }
        self.emit(CoreEvent::StatusChanged { status });
        self.emit(CoreEvent::TimelineChanged);
    }

    fn refresh_projection(&mut self) {
        let count = self.tool_calls().len();
        if count != self.snapshot_count {
            self.snapshot_count = count;
            self.timeline
                .on_latest_advanced(count, self.status.is_active());
            self.emit(CoreEvent::ToolCallsChanged { count });
            self.emit(CoreEvent::TimelineChanged);
        }
    }

    fn request_title_once(&mut self, first_prompt: &str) {
        if self.title_requested {
            return;
        }
        self.title_requested = true;
        let backend = Arc::clone(&self.backend);
        let project_id = self.config.project_id.clone();
        let prompt = first_prompt.to_string();
        tokio::spawn(async move {
            if let Err(e) = backend.trigger_title_generation(&project_id, &prompt).await {
                tracing::debug!("Title generation failed: {}", e);
            }
        });
    }

    fn spawn_placeholder_watchdog(&self, placeholder_id: MessageId) {
        let store = Arc::clone(&self.store);
        let event_tx = self.event_tx.clone();
        let ttl = self.config.placeholder_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if store.lock().remove_by_id(&placeholder_id) {
                tracing::warn!("Withdrew a thinking placeholder that never resolved");
                let _ = event_tx.send(CoreEvent::MessagesChanged);
            }
        });
    }

    fn spawn_ticker(&mut self) {
        let cancel = CancellationToken::new();
        self.ticker_cancel = Some(cancel.clone());
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(TICK_INTERVAL) => {
                        if event_tx.send(CoreEvent::TimelineChanged).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_error(&self, kind: ErrorKind, error: &parley_api::Error) {
        self.emit(CoreEvent::Error {
            kind,
            message: error.to_string(),
        });
    }
}
