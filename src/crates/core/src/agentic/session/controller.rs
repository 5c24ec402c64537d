//! Session controller
//!
//! The turn state machine for one conversation. Every mutation of transcript,
//! usage, approval and queue state goes through here, one call at a time.
//! Stream events are generation-tagged; anything stamped with an older
//! generation than the live one is dropped.

use super::state::{
    SessionSnapshot, SessionState, SessionUpdate, SubmitOutcome, TurnKind, TurnOutcome,
};
use crate::agentic::approval::{self, ApprovalCoordinator, BulkStep};
use crate::agentic::queue::InputQueue;
use crate::agentic::transcript::{self, ToolMerge, TranscriptStore};
use crate::agentic::usage::{self, UsageThrottle};
use crate::infrastructure::transport::{
    EventHandle, EventSink, StreamEnvelope, StreamTransport, TurnRequest,
};
use crate::util::errors::{TurnwiseError, TurnwiseResult};
use crate::util::{new_id, now_ms};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use turnwise_agent_stream::TurnEvent;
use turnwise_core_types::{
    ApprovalDecision, ApprovalProgress, ChatMessage, QueuedMessage, TokenUsage, ToolExecution,
    UsageSource,
};

const UPDATE_CHANNEL_CAPACITY: usize = 1024;

struct ActiveTurn {
    kind: TurnKind,
    handle: EventHandle,
    run_id: Option<String>,
    started_at: Instant,
    /// Usage already on a resumed message before this stream opened.
    base_usage: TokenUsage,
}

pub struct SessionController {
    conversation_id: String,
    transport: Arc<dyn StreamTransport>,
    sink: EventSink,
    updates: broadcast::Sender<SessionUpdate>,
    state: SessionState,
    generation: u64,
    turn: Option<ActiveTurn>,
    transcript: TranscriptStore,
    usage: TokenUsage,
    throttle: UsageThrottle,
    approvals: ApprovalCoordinator,
    queue: InputQueue,
    last_error: Option<String>,
}

impl SessionController {
    /// Returns the controller and the receiving end of its event sink.
    pub fn new(
        conversation_id: impl Into<String>,
        transport: Arc<dyn StreamTransport>,
        usage_throttle: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<StreamEnvelope>) {
        let (sink, events) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let controller = Self {
            conversation_id: conversation_id.into(),
            transport,
            sink,
            updates,
            state: SessionState::Idle,
            generation: 0,
            turn: None,
            transcript: TranscriptStore::new(),
            usage: usage::empty(),
            throttle: UsageThrottle::new(usage_throttle),
            approvals: ApprovalCoordinator::new(),
            queue: InputQueue::new(),
            last_error: None,
        };
        (controller, events)
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn run_id(&self) -> Option<&str> {
        self.turn.as_ref().and_then(|turn| turn.run_id.as_deref())
    }

    pub fn transcript(&self) -> &TranscriptStore {
        &self.transcript
    }

    pub fn queued(&self) -> Vec<QueuedMessage> {
        self.queue.entries()
    }

    pub fn approval_progress(&self) -> Option<ApprovalProgress> {
        self.approvals.progress()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub(crate) fn update_sender(&self) -> broadcast::Sender<SessionUpdate> {
        self.updates.clone()
    }

    /// Start a turn now if idle with nothing queued; otherwise queue the input.
    pub fn submit(&mut self, content: &str) -> TurnwiseResult<SubmitOutcome> {
        ensure_not_blank(content)?;
        if !self.state.is_busy() && self.queue.is_empty() {
            self.begin_new_turn(content.to_string());
            return Ok(SubmitOutcome::Started);
        }

        let entry = self.queue.enqueue(content);
        self.emit_queue();
        self.drain_queue();

        if self.queue.entries().iter().any(|queued| queued.id == entry.id) {
            Ok(SubmitOutcome::Queued(entry))
        } else {
            Ok(SubmitOutcome::Started)
        }
    }

    /// Start a turn, interrupting any active one first.
    pub fn start_turn(&mut self, content: &str) -> TurnwiseResult<()> {
        ensure_not_blank(content)?;
        if self.turn.is_some() {
            info!("Restarting active turn: generation={}", self.generation);
            self.interrupt_active();
        }
        self.queue.release_immediate();
        self.begin_new_turn(content.to_string());
        Ok(())
    }

    /// Start queued entry `id` immediately, out of FIFO order.
    pub fn submit_now(&mut self, id: &str) -> TurnwiseResult<()> {
        let entry = self.queue.take_for_immediate(id)?;
        self.emit_queue();
        if self.turn.is_some() {
            self.interrupt_active();
        }
        info!("Submitting queued input immediately: id={}", entry.id);
        self.begin_new_turn(entry.content);
        Ok(())
    }

    pub fn remove_queued(&mut self, id: &str) -> TurnwiseResult<QueuedMessage> {
        let entry = self
            .queue
            .remove(id)
            .ok_or_else(|| TurnwiseError::NotFound(format!("Queued message not found: {}", id)))?;
        self.emit_queue();
        Ok(entry)
    }

    /// Abort the active turn. Returns whether anything was running.
    ///
    /// The head of the input queue starts once the session is idle again.
    pub fn cancel(&mut self) -> bool {
        self.queue.release_immediate();
        if self.turn.is_none() {
            if self.approvals.abort().is_some() {
                self.emit(SessionUpdate::ApprovalProgress(None));
            }
            return false;
        }

        self.set_state(SessionState::Cancelling);
        self.interrupt_active();
        self.set_state(SessionState::Idle);
        self.drain_queue();
        true
    }

    /// Approve or deny one call by opening its continuation stream.
    pub fn decide_single(
        &mut self,
        call_id: &str,
        approve: bool,
        reason: Option<String>,
    ) -> TurnwiseResult<()> {
        ensure_not_blank(call_id)?;
        if !self
            .collect_approvable()
            .iter()
            .any(|execution| execution.call_id == call_id)
        {
            warn!(
                "Deciding a call that is not awaiting approval locally: call_id={}",
                call_id
            );
        }

        if self.turn.is_some() {
            self.interrupt_active();
        }
        self.start_approval_stream(
            call_id.to_string(),
            ApprovalDecision::from_approve(approve),
            reason,
        );
        Ok(())
    }

    /// Apply one decision to every approvable call, one continuation at a time.
    pub fn decide_bulk(&mut self, decision: ApprovalDecision) -> TurnwiseResult<ApprovalProgress> {
        if self.approvals.is_draining() {
            return Err(TurnwiseError::InvalidState(
                "A bulk decision is already running".to_string(),
            ));
        }

        let call_ids: Vec<String> = self
            .collect_approvable()
            .into_iter()
            .map(|execution| execution.call_id)
            .collect();
        if call_ids.is_empty() {
            return Err(TurnwiseError::InvalidState(
                "No tool calls are awaiting approval".to_string(),
            ));
        }

        if self.turn.is_some() {
            self.interrupt_active();
        }

        let Some((first, progress)) = self.approvals.begin_bulk(decision, call_ids) else {
            return Err(TurnwiseError::InvalidState(
                "No tool calls are awaiting approval".to_string(),
            ));
        };
        self.emit(SessionUpdate::ApprovalProgress(Some(progress)));
        self.start_approval_stream(first, decision, None);
        Ok(progress)
    }

    /// Seed the transcript from a stored conversation. Only applies while idle
    /// with an empty transcript.
    pub fn hydrate(&mut self, messages: Vec<ChatMessage>) -> bool {
        if !self.can_hydrate() {
            warn!(
                "Skipping hydration: conversation_id={}, state={:?}",
                self.conversation_id, self.state
            );
            return false;
        }
        if !self.transcript.hydrate(messages) {
            return false;
        }

        let hydrated = self.transcript.messages().to_vec();
        info!(
            "Transcript hydrated: conversation_id={}, messages={}",
            self.conversation_id,
            hydrated.len()
        );
        for message in hydrated {
            self.emit(SessionUpdate::MessageFinalized(message));
        }
        true
    }

    pub fn can_hydrate(&self) -> bool {
        !self.state.is_busy() && self.turn.is_none() && self.transcript.is_empty()
    }

    pub fn collect_approvable(&self) -> Vec<ToolExecution> {
        approval::collect_approvable(self.transcript.current(), self.transcript.messages())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            conversation_id: self.conversation_id.clone(),
            state: self.state,
            generation: self.generation,
            run_id: self.run_id().map(str::to_string),
            messages: self.transcript.all_messages(),
            queue: self.queue.entries(),
            approvable: self.collect_approvable(),
            approval_progress: self.approvals.progress(),
            turn_usage: self.usage,
            session_usage: self.session_usage(),
            last_error: self.last_error.clone(),
        }
    }

    /// Abort whatever is running and go idle.
    pub fn shutdown(&mut self) {
        if self.turn.is_some() {
            self.interrupt_active();
        }
        self.set_state(SessionState::Idle);
        debug!("Session controller shut down: conversation_id={}", self.conversation_id);
    }

    pub fn handle_event(&mut self, envelope: StreamEnvelope) {
        let StreamEnvelope { generation, event } = envelope;
        if generation != self.generation || self.turn.is_none() {
            debug!(
                "Dropping stale event: event={}, generation={}, current_generation={}",
                event.name(),
                generation,
                self.generation
            );
            return;
        }
        trace!("Applying event: event={}, generation={}", event.name(), generation);

        match event {
            TurnEvent::Ready { run_id } => {
                debug!("Turn accepted: generation={}, run_id={}", generation, run_id);
                if let Some(turn) = self.turn.as_mut() {
                    turn.run_id = Some(run_id);
                }
            }
            TurnEvent::Token { text } => {
                if text.is_empty() {
                    return;
                }
                transcript::append_token(self.transcript.current_or_begin(generation), &text);
                self.emit_current();
            }
            TurnEvent::ToolsPending { executions } => {
                if executions.is_empty() {
                    return;
                }
                let message = self.transcript.current_or_begin(generation);
                if transcript::apply_pending(message, &executions) {
                    self.emit_current();
                }
            }
            TurnEvent::Tool { kind, update } => {
                let merged = if kind.creates_segment() {
                    let message = self.transcript.current_or_begin(generation);
                    transcript::apply_tool_update(message, &update, true)
                } else {
                    match self.transcript.current_mut(generation) {
                        Some(message) => transcript::apply_tool_update(message, &update, false),
                        None => {
                            debug!(
                                "Dropping tool update with no message to apply to: call_id={}",
                                update.call_id
                            );
                            ToolMerge::Ignored
                        }
                    }
                };
                if merged.changed() {
                    self.emit_current();
                }
            }
            TurnEvent::TokenUsage { usage, source } => {
                if source != UsageSource::Main {
                    debug!("Ignoring usage report: source={:?}", source);
                    return;
                }
                self.record_usage(&usage);
            }
            TurnEvent::Ttft { duration_ms } => {
                self.record_usage(&TokenUsage {
                    time_to_first_token: Some(duration_ms),
                    ..Default::default()
                });
            }
            TurnEvent::Completed { duration_ms } => self.on_completed(duration_ms),
            TurnEvent::Error { message } => self.on_error(message),
        }
    }

    fn on_completed(&mut self, duration_ms: Option<u64>) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        let elapsed = u64::try_from(turn.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        let time_to_response = duration_ms.unwrap_or(elapsed);
        self.usage = usage::merge(
            &self.usage,
            &TokenUsage {
                time_to_response: Some(time_to_response),
                ..Default::default()
            },
        );
        info!(
            "Turn completed: generation={}, kind={:?}, ttr_ms={}",
            self.generation, turn.kind, time_to_response
        );
        self.finalize_current(turn.base_usage);

        match self.approvals.on_continuation_completed() {
            BulkStep::Next {
                call_id,
                decision,
                progress,
            } => {
                info!(
                    "Continuing bulk decision: call_id={}, completed={}/{}, queued={}",
                    call_id,
                    progress.completed,
                    progress.total,
                    self.approvals.remaining()
                );
                self.emit(SessionUpdate::ApprovalProgress(Some(progress)));
                self.start_approval_stream(call_id, decision, None);
                return;
            }
            BulkStep::Finished(progress) => {
                self.emit(SessionUpdate::ApprovalProgress(Some(progress)));
                self.emit(SessionUpdate::ApprovalProgress(None));
            }
            BulkStep::Idle => {}
        }

        self.queue.release_immediate();
        self.emit(SessionUpdate::TurnFinished(TurnOutcome::Completed));
        self.set_state(SessionState::Idle);
        self.drain_queue();
    }

    fn on_error(&mut self, message: String) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        error!(
            "Turn failed: generation={}, kind={:?}, error={}",
            self.generation, turn.kind, message
        );
        self.finalize_current(turn.base_usage);
        if self.approvals.abort().is_some() {
            self.emit(SessionUpdate::ApprovalProgress(None));
        }
        self.queue.release_immediate();
        self.last_error = Some(message.clone());
        self.emit(SessionUpdate::TurnFinished(TurnOutcome::Failed { message }));
        self.set_state(SessionState::Idle);
        self.drain_queue();
    }

    /// Abort the active stream, keep its partial message and move to a fresh
    /// generation so anything it still delivers is dropped.
    fn interrupt_active(&mut self) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        info!(
            "Interrupting turn: generation={}, kind={:?}",
            self.generation, turn.kind
        );
        turn.handle.cancel();
        if let Some(run_id) = &turn.run_id {
            self.transport.request_stop(&self.conversation_id, run_id);
        }
        self.finalize_current(turn.base_usage);
        if self.approvals.abort().is_some() {
            self.emit(SessionUpdate::ApprovalProgress(None));
        }
        self.generation += 1;
        self.emit(SessionUpdate::TurnFinished(TurnOutcome::Cancelled));
    }

    fn finalize_current(&mut self, base_usage: TokenUsage) {
        let final_usage = usage::combine(&base_usage, &self.usage);
        if let Some(message) = self.transcript.finalize(Some(final_usage)) {
            self.emit(SessionUpdate::MessageFinalized(message));
        }
        self.throttle.reset();
        self.emit_usage_tick();
    }

    fn drain_queue(&mut self) {
        if self.state.is_busy() || self.turn.is_some() || self.queue.is_immediate_in_flight() {
            return;
        }
        if let Some(entry) = self.queue.pop_front() {
            info!(
                "Draining queued input: id={}, remaining={}",
                entry.id,
                self.queue.len()
            );
            self.emit_queue();
            self.begin_new_turn(entry.content);
        }
    }

    fn begin_new_turn(&mut self, content: String) {
        let message = ChatMessage::user(new_id(), content, now_ms());
        self.transcript.push_finalized(message.clone());
        self.emit(SessionUpdate::MessageFinalized(message));

        let request = TurnRequest::NewTurn {
            conversation_id: self.conversation_id.clone(),
            messages: self.transcript.messages().to_vec(),
        };
        self.begin_stream(TurnKind::NewTurn, request, None);
    }

    fn start_approval_stream(
        &mut self,
        call_id: String,
        decision: ApprovalDecision,
        reason: Option<String>,
    ) {
        let resumed = self.transcript.take_last_assistant();
        info!(
            "Opening approval continuation: call_id={}, decision={:?}, resumed={}",
            call_id,
            decision,
            resumed.is_some()
        );
        let request = TurnRequest::ApprovalContinuation {
            conversation_id: self.conversation_id.clone(),
            call_id,
            approve: decision.is_approve(),
            reason,
        };
        self.begin_stream(TurnKind::ApprovalContinuation, request, resumed);
    }

    fn begin_stream(&mut self, kind: TurnKind, request: TurnRequest, resumed: Option<ChatMessage>) {
        self.generation += 1;
        let generation = self.generation;
        self.usage = usage::empty();
        self.throttle.reset();
        self.last_error = None;

        let base_usage = resumed
            .as_ref()
            .and_then(|message| message.usage)
            .unwrap_or_default();
        if let Some(message) = resumed {
            self.transcript.resume(generation, message);
            self.emit_current();
        }

        debug!("Opening turn stream: generation={}, kind={:?}", generation, kind);
        let handle = self.transport.open(request, generation, self.sink.clone());
        self.turn = Some(ActiveTurn {
            kind,
            handle,
            run_id: None,
            started_at: Instant::now(),
            base_usage,
        });

        let state = if self.approvals.is_draining() {
            SessionState::DrainingApprovals
        } else {
            SessionState::Streaming
        };
        self.set_state(state);
    }

    fn record_usage(&mut self, delta: &TokenUsage) {
        self.usage = usage::merge(&self.usage, delta);
        let mirrored = self.in_flight_usage();
        if let Some(message) = self.transcript.current_mut(self.generation) {
            message.usage = Some(mirrored);
        }
        if self.throttle.should_emit(Instant::now()) {
            self.emit_usage_tick();
        }
    }

    /// This stream's usage on top of whatever a resumed message already carried.
    fn in_flight_usage(&self) -> TokenUsage {
        let base = self
            .turn
            .as_ref()
            .map(|turn| turn.base_usage)
            .unwrap_or_default();
        usage::combine(&base, &self.usage)
    }

    fn session_usage(&self) -> TokenUsage {
        let in_flight = self.turn.as_ref().map(|_| self.in_flight_usage());
        usage::aggregate(self.transcript.messages(), in_flight.as_ref())
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!("Session state changed: from={:?}, to={:?}", self.state, state);
        self.state = state;
        self.emit(SessionUpdate::StateChanged(state));
    }

    fn emit_current(&self) {
        if let Some(current) = self.transcript.current() {
            self.emit(SessionUpdate::MessageUpdated(current.clone()));
        }
    }

    fn emit_queue(&self) {
        self.emit(SessionUpdate::QueueChanged(self.queue.entries()));
    }

    fn emit_usage_tick(&self) {
        self.emit(SessionUpdate::UsageTick {
            turn: self.usage,
            session: self.session_usage(),
        });
    }

    fn emit(&self, update: SessionUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }
}

fn ensure_not_blank(value: &str) -> TurnwiseResult<()> {
    if value.trim().is_empty() {
        return Err(TurnwiseError::InvalidState(
            "Input must not be empty".to_string(),
        ));
    }
    Ok(())
}
