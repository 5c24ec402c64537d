//! Session runtime
//!
//! One tokio task owns the [`SessionController`] and serializes caller commands
//! with transport events, so the controller never needs a lock. Callers talk to
//! it through a cloneable [`SessionHandle`].

use super::controller::SessionController;
use super::state::{SessionSnapshot, SessionUpdate, SubmitOutcome};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::transport::{
    ConversationStore, HttpStreamTransport, StreamEnvelope, StreamTransport,
};
use crate::util::errors::{TurnwiseError, TurnwiseResult};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use turnwise_core_types::{ApprovalDecision, ApprovalProgress, QueuedMessage};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<TurnwiseResult<T>>;

enum SessionCommand {
    Submit {
        content: String,
        reply: Reply<SubmitOutcome>,
    },
    StartTurn {
        content: String,
        reply: Reply<()>,
    },
    SubmitNow {
        id: String,
        reply: Reply<()>,
    },
    RemoveQueued {
        id: String,
        reply: Reply<QueuedMessage>,
    },
    Cancel {
        reply: Reply<bool>,
    },
    DecideSingle {
        call_id: String,
        approve: bool,
        reason: Option<String>,
        reply: Reply<()>,
    },
    DecideBulk {
        decision: ApprovalDecision,
        reply: Reply<ApprovalProgress>,
    },
    Hydrate {
        reply: Reply<bool>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

pub struct SessionRuntime {
    controller: SessionController,
    events: mpsc::UnboundedReceiver<StreamEnvelope>,
    commands: mpsc::Receiver<SessionCommand>,
    store: Option<Arc<dyn ConversationStore>>,
}

impl SessionRuntime {
    /// Move `controller` onto its own task and return the handle that drives it.
    pub fn spawn(
        controller: SessionController,
        events: mpsc::UnboundedReceiver<StreamEnvelope>,
        store: Option<Arc<dyn ConversationStore>>,
    ) -> SessionHandle {
        let (tx_command, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let updates = controller.update_sender();
        let conversation_id = controller.conversation_id().to_string();

        let runtime = Self {
            controller,
            events,
            commands,
            store,
        };
        tokio::spawn(runtime.run());

        SessionHandle {
            conversation_id,
            commands: tx_command,
            updates,
        }
    }

    async fn run(mut self) {
        info!(
            "Session runtime started: conversation_id={}",
            self.controller.conversation_id()
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("All session handles dropped");
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some(envelope) = self.events.recv() => {
                    self.controller.handle_event(envelope);
                }
            }
        }

        self.controller.shutdown();
        info!(
            "Session runtime stopped: conversation_id={}",
            self.controller.conversation_id()
        );
    }

    /// Returns false once the runtime should stop.
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Submit { content, reply } => {
                let _ = reply.send(self.controller.submit(&content));
            }
            SessionCommand::StartTurn { content, reply } => {
                let _ = reply.send(self.controller.start_turn(&content));
            }
            SessionCommand::SubmitNow { id, reply } => {
                let _ = reply.send(self.controller.submit_now(&id));
            }
            SessionCommand::RemoveQueued { id, reply } => {
                let _ = reply.send(self.controller.remove_queued(&id));
            }
            SessionCommand::Cancel { reply } => {
                let _ = reply.send(Ok(self.controller.cancel()));
            }
            SessionCommand::DecideSingle {
                call_id,
                approve,
                reason,
                reply,
            } => {
                let _ = reply.send(self.controller.decide_single(&call_id, approve, reason));
            }
            SessionCommand::DecideBulk { decision, reply } => {
                let _ = reply.send(self.controller.decide_bulk(decision));
            }
            SessionCommand::Hydrate { reply } => {
                let _ = reply.send(self.hydrate().await);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.controller.snapshot()));
            }
            SessionCommand::Shutdown { reply } => {
                self.controller.shutdown();
                let _ = reply.send(Ok(()));
                return false;
            }
        }
        true
    }

    async fn hydrate(&mut self) -> TurnwiseResult<bool> {
        let Some(store) = self.store.clone() else {
            return Err(TurnwiseError::InvalidState(
                "No conversation store configured".to_string(),
            ));
        };
        if !self.controller.can_hydrate() {
            warn!(
                "Hydration skipped, session already has state: conversation_id={}",
                self.controller.conversation_id()
            );
            return Ok(false);
        }

        let conversation_id = self.controller.conversation_id().to_string();
        let messages = match store.fetch_conversation(&conversation_id).await {
            Ok(messages) => messages,
            Err(TurnwiseError::NotFound(_)) => {
                debug!("No stored conversation yet: conversation_id={}", conversation_id);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        Ok(self.controller.hydrate(messages))
    }
}

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    conversation_id: String,
    commands: mpsc::Sender<SessionCommand>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub async fn submit(&self, content: impl Into<String>) -> TurnwiseResult<SubmitOutcome> {
        let content = content.into();
        self.request(|reply| SessionCommand::Submit { content, reply })
            .await
    }

    pub async fn start_turn(&self, content: impl Into<String>) -> TurnwiseResult<()> {
        let content = content.into();
        self.request(|reply| SessionCommand::StartTurn { content, reply })
            .await
    }

    pub async fn submit_now(&self, id: impl Into<String>) -> TurnwiseResult<()> {
        let id = id.into();
        self.request(|reply| SessionCommand::SubmitNow { id, reply })
            .await
    }

    pub async fn remove_queued(&self, id: impl Into<String>) -> TurnwiseResult<QueuedMessage> {
        let id = id.into();
        self.request(|reply| SessionCommand::RemoveQueued { id, reply })
            .await
    }

    pub async fn cancel(&self) -> TurnwiseResult<bool> {
        self.request(|reply| SessionCommand::Cancel { reply }).await
    }

    pub async fn decide_single(
        &self,
        call_id: impl Into<String>,
        approve: bool,
        reason: Option<String>,
    ) -> TurnwiseResult<()> {
        let call_id = call_id.into();
        self.request(|reply| SessionCommand::DecideSingle {
            call_id,
            approve,
            reason,
            reply,
        })
        .await
    }

    pub async fn decide_bulk(
        &self,
        decision: ApprovalDecision,
    ) -> TurnwiseResult<ApprovalProgress> {
        self.request(|reply| SessionCommand::DecideBulk { decision, reply })
            .await
    }

    /// Load the stored conversation into an empty idle session. Returns whether
    /// anything was applied.
    pub async fn hydrate(&self) -> TurnwiseResult<bool> {
        self.request(|reply| SessionCommand::Hydrate { reply }).await
    }

    pub async fn snapshot(&self) -> TurnwiseResult<SessionSnapshot> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    pub async fn shutdown(&self) -> TurnwiseResult<()> {
        self.request(|reply| SessionCommand::Shutdown { reply }).await
    }

    async fn request<T, F>(&self, build: F) -> TurnwiseResult<T>
    where
        F: FnOnce(Reply<T>) -> SessionCommand,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| TurnwiseError::SessionClosed)?;
        response.await.map_err(|_| TurnwiseError::SessionClosed)?
    }
}

/// Wire a session to the HTTP transport described by `config`.
pub fn spawn_http_session(
    config: ClientConfig,
    conversation_id: impl Into<String>,
) -> TurnwiseResult<SessionHandle> {
    config.validate()?;
    let usage_throttle = config.usage_throttle();
    let transport = Arc::new(HttpStreamTransport::new(Arc::new(config))?);

    let stream_transport: Arc<dyn StreamTransport> = transport.clone();
    let store: Arc<dyn ConversationStore> = transport;
    let (controller, events) =
        SessionController::new(conversation_id, stream_transport, usage_throttle);
    Ok(SessionRuntime::spawn(controller, events, Some(store)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentic::session::state::{SessionState, TurnOutcome};
    use crate::infrastructure::transport::{EventHandle, EventSink, TurnRequest};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use turnwise_agent_stream::TurnEvent;
    use turnwise_core_types::ChatMessage;

    /// Replays a fixed script of events for every stream it opens.
    struct ScriptedTransport {
        script: Vec<TurnEvent>,
        requests: Mutex<Vec<TurnRequest>>,
    }

    impl StreamTransport for ScriptedTransport {
        fn open(&self, request: TurnRequest, generation: u64, sink: EventSink) -> EventHandle {
            self.requests.lock().unwrap().push(request);
            let handle = EventHandle::new(generation);
            let token = handle.cancel_token();
            let script = self.script.clone();
            tokio::spawn(async move {
                for event in script {
                    if token.is_cancelled() {
                        return;
                    }
                    if sink.send(StreamEnvelope { generation, event }).is_err() {
                        return;
                    }
                    tokio::task::yield_now().await;
                }
            });
            handle
        }

        fn request_stop(&self, _conversation_id: &str, _run_id: &str) {}
    }

    struct FixedStore(Vec<ChatMessage>);

    #[async_trait]
    impl ConversationStore for FixedStore {
        async fn fetch_conversation(
            &self,
            _conversation_id: &str,
        ) -> TurnwiseResult<Vec<ChatMessage>> {
            Ok(self.0.clone())
        }
    }

    fn spawn_scripted(
        script: Vec<TurnEvent>,
        store: Option<Arc<dyn ConversationStore>>,
    ) -> (SessionHandle, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport {
            script,
            requests: Mutex::new(Vec::new()),
        });
        let (controller, events) =
            SessionController::new("conv-rt", transport.clone(), Duration::from_millis(200));
        (SessionRuntime::spawn(controller, events, store), transport)
    }

    async fn wait_for_outcome(
        updates: &mut broadcast::Receiver<SessionUpdate>,
    ) -> TurnOutcome {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), updates.recv()).await {
                Ok(Ok(SessionUpdate::TurnFinished(outcome))) => return outcome,
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                other => panic!("session update stream ended: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn runs_a_turn_end_to_end() {
        let (handle, transport) = spawn_scripted(
            vec![
                TurnEvent::Ready {
                    run_id: "run-7".to_string(),
                },
                TurnEvent::Token {
                    text: "Hello ".to_string(),
                },
                TurnEvent::Token {
                    text: "world".to_string(),
                },
                TurnEvent::Completed {
                    duration_ms: Some(40),
                },
            ],
            None,
        );
        let mut updates = handle.subscribe();

        assert_eq!(handle.submit("hi").await.unwrap(), SubmitOutcome::Started);
        assert_eq!(wait_for_outcome(&mut updates).await, TurnOutcome::Completed);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, SessionState::Idle);
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].content, "Hello world");
        assert_eq!(transport.requests.lock().unwrap().len(), 1);

        handle.shutdown().await.unwrap();
        assert!(matches!(
            handle.submit("after").await,
            Err(TurnwiseError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn queued_input_runs_after_first_turn() {
        let (handle, transport) = spawn_scripted(
            vec![
                TurnEvent::Token {
                    text: "ok".to_string(),
                },
                TurnEvent::Completed { duration_ms: None },
            ],
            None,
        );
        let mut updates = handle.subscribe();

        handle.submit("one").await.unwrap();
        handle.submit("two").await.unwrap();
        assert_eq!(wait_for_outcome(&mut updates).await, TurnOutcome::Completed);
        assert_eq!(wait_for_outcome(&mut updates).await, TurnOutcome::Completed);

        let snapshot = handle.snapshot().await.unwrap();
        let contents: Vec<&str> = snapshot
            .messages
            .iter()
            .map(|message| message.content.as_str())
            .collect();
        assert_eq!(contents, vec!["one", "ok", "two", "ok"]);
        assert_eq!(transport.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn hydrates_from_store_once() {
        let stored = vec![ChatMessage::user("u1", "from yesterday", 0)];
        let (handle, _) = spawn_scripted(Vec::new(), Some(Arc::new(FixedStore(stored))));

        assert!(handle.hydrate().await.unwrap());
        assert!(!handle.hydrate().await.unwrap());
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].content, "from yesterday");
    }

    #[tokio::test]
    async fn hydrate_without_store_is_invalid() {
        let (handle, _) = spawn_scripted(Vec::new(), None);
        assert!(matches!(
            handle.hydrate().await,
            Err(TurnwiseError::InvalidState(_))
        ));
    }
}
