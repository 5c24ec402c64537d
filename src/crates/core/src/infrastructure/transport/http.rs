//! reqwest-backed stream transport

use super::hydration::ConversationResponse;
use super::{
    ConversationStore, EventHandle, EventSink, StreamEnvelope, StreamTransport, TurnRequest,
};
use crate::infrastructure::config::ClientConfig;
use crate::util::errors::{TurnwiseError, TurnwiseResult};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use turnwise_agent_stream::{handle_turn_stream, TurnEvent};
use turnwise_core_types::{ChatMessage, MessageRole};

const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: MessageRole,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct NewTurnBody<'a> {
    messages: Vec<WireMessage<'a>>,
    conversation_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ApprovalBody<'a> {
    approve: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    conversation_id: &'a str,
}

#[derive(Debug, Serialize)]
struct StopBody<'a> {
    conversation_id: &'a str,
    run_id: &'a str,
}

#[derive(Clone)]
pub struct HttpStreamTransport {
    client: Client,
    config: Arc<ClientConfig>,
}

impl HttpStreamTransport {
    pub fn new(config: Arc<ClientConfig>) -> TurnwiseResult<Self> {
        // No overall request timeout: turn streams are long-lived and bounded by the
        // SSE idle timeout.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self { client, config })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn build_turn_request(&self, request: &TurnRequest) -> TurnwiseResult<RequestBuilder> {
        let builder = match request {
            TurnRequest::NewTurn {
                conversation_id,
                messages,
            } => {
                let body = NewTurnBody {
                    messages: messages.iter().map(wire_message).collect(),
                    conversation_id,
                };
                self.client
                    .post(self.config.chat_url())
                    .body(serde_json::to_vec(&body)?)
            }
            TurnRequest::ApprovalContinuation {
                conversation_id,
                call_id,
                approve,
                reason,
            } => {
                let body = ApprovalBody {
                    approve: *approve,
                    reason: reason.as_deref(),
                    conversation_id,
                };
                self.client
                    .post(self.config.approval_url(call_id))
                    .body(serde_json::to_vec(&body)?)
            }
        };
        Ok(self.authorize(
            builder
                .header(ACCEPT, EVENT_STREAM_MIME_TYPE)
                .header(CACHE_CONTROL, "no-cache")
                .header(reqwest::header::CONTENT_TYPE, "application/json"),
        ))
    }

    async fn establish(&self, request: &TurnRequest) -> TurnwiseResult<Response> {
        let response = self.build_turn_request(request)?.send().await?;
        ensure_success(response).await
    }
}

fn wire_message(message: &ChatMessage) -> WireMessage<'_> {
    WireMessage {
        role: message.role,
        content: &message.content,
    }
}

async fn ensure_success(response: Response) -> TurnwiseResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TurnwiseError::Http {
        status: status.as_u16(),
        body,
    })
}

impl StreamTransport for HttpStreamTransport {
    fn open(&self, request: TurnRequest, generation: u64, sink: EventSink) -> EventHandle {
        let handle = EventHandle::new(generation);
        let cancel_token = handle.cancel_token();
        let transport = self.clone();
        let idle_timeout = self.config.idle_timeout();
        debug!(
            "Connecting turn stream: conversation_id={}, generation={}",
            request.conversation_id(),
            generation
        );

        tokio::spawn(async move {
            let (tx_event, mut rx_event) = mpsc::unbounded_channel::<TurnEvent>();
            let tx_cancel = tx_event.clone();

            let pump = async move {
                match transport.establish(&request).await {
                    Ok(response) => {
                        debug!(
                            "Turn stream established: generation={}, status={}",
                            generation,
                            response.status()
                        );
                        handle_turn_stream(response.bytes_stream(), tx_event, idle_timeout).await;
                    }
                    Err(e) => {
                        error!(
                            "Failed to open turn stream: generation={}, error={}",
                            generation, e
                        );
                        let _ = tx_event.send(TurnEvent::Error {
                            message: e.to_string(),
                        });
                    }
                }
            };

            let driver = async move {
                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => {
                        debug!("Turn stream aborted: generation={}", generation);
                        let _ = tx_cancel.send(TurnEvent::Error {
                            message: "turn stream cancelled".to_string(),
                        });
                    }
                    _ = pump => {}
                }
            };

            let forward = async move {
                while let Some(event) = rx_event.recv().await {
                    if sink.send(StreamEnvelope { generation, event }).is_err() {
                        debug!(
                            "Session sink closed, dropping turn events: generation={}",
                            generation
                        );
                        break;
                    }
                }
            };

            tokio::join!(driver, forward);
        });

        handle
    }

    fn request_stop(&self, conversation_id: &str, run_id: &str) {
        let url = self.config.stop_url();
        let builder = self.authorize(self.client.post(url).json(&StopBody {
            conversation_id,
            run_id,
        }));
        let run_id = run_id.to_string();

        tokio::spawn(async move {
            match builder.send().await {
                Ok(response) if response.status().is_success() => {
                    info!("Stop requested: run_id={}", run_id);
                }
                Ok(response) => {
                    warn!(
                        "Stop request rejected: run_id={}, status={}",
                        run_id,
                        response.status()
                    );
                }
                Err(e) => {
                    warn!("Stop request failed: run_id={}, error={}", run_id, e);
                }
            }
        });
    }
}

#[async_trait]
impl ConversationStore for HttpStreamTransport {
    async fn fetch_conversation(&self, conversation_id: &str) -> TurnwiseResult<Vec<ChatMessage>> {
        let url = self.config.conversation_url(conversation_id);
        let response = self.authorize(self.client.get(url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TurnwiseError::NotFound(format!(
                "Conversation not found: {}",
                conversation_id
            )));
        }
        let response = ensure_success(response).await?;
        let conversation: ConversationResponse = response.json().await?;
        let messages = conversation.into_messages();
        debug!(
            "Fetched conversation: conversation_id={}, messages={}",
            conversation_id,
            messages.len()
        );
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_turn_body_sends_role_and_content_only() {
        let messages = vec![ChatMessage::user("u1", "list pods", 1)];
        let body = NewTurnBody {
            messages: messages.iter().map(wire_message).collect(),
            conversation_id: "conv",
        };
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({
                "messages": [{"role": "user", "content": "list pods"}],
                "conversation_id": "conv"
            })
        );
    }

    #[test]
    fn approval_body_omits_missing_reason() {
        let body = ApprovalBody {
            approve: false,
            reason: None,
            conversation_id: "conv",
        };
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({"approve": false, "conversation_id": "conv"})
        );
    }
}
