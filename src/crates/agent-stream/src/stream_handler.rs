use crate::types::event::{decode_turn_event, TurnEvent};
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use log::{error, trace, warn};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Convert a turn response body into typed turn events
///
/// Events are forwarded in arrival order. The pump stops after the first terminal
/// event (`completed` / `error`) and sends nothing more. Transport failures, idle
/// timeouts and a body that ends without a terminal event are reported as exactly
/// one `TurnEvent::Error`.
///
/// # Arguments
/// * `byte_stream` - response body chunks
/// * `tx_event` - parsed event sender
/// * `idle_timeout` - longest wait for the next SSE frame
pub async fn handle_turn_stream<S, B, E>(
    byte_stream: S,
    tx_event: mpsc::UnboundedSender<TurnEvent>,
    idle_timeout: Duration,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let stream = byte_stream.eventsource();
    tokio::pin!(stream);

    loop {
        let sse_event = timeout(idle_timeout, stream.next()).await;
        let sse = match sse_event {
            Ok(Some(Ok(sse))) => sse,
            Ok(None) => {
                let error_msg = "SSE stream closed before turn completed";
                error!("{}", error_msg);
                let _ = tx_event.send(TurnEvent::Error {
                    message: error_msg.to_string(),
                });
                return;
            }
            Ok(Some(Err(e))) => {
                let error_msg = format!("SSE stream error: {}", e);
                error!("{}", error_msg);
                let _ = tx_event.send(TurnEvent::Error { message: error_msg });
                return;
            }
            Err(_) => {
                let error_msg = format!("SSE stream timeout after {}s", idle_timeout.as_secs());
                error!("{}", error_msg);
                let _ = tx_event.send(TurnEvent::Error { message: error_msg });
                return;
            }
        };

        trace!("Turn SSE: event={}, data={:?}", sse.event, sse.data);
        // Unnamed frames are the SSE default "message" type, which this protocol never uses.
        if sse.event.is_empty() || sse.event == "message" {
            continue;
        }

        let event = match decode_turn_event(&sse.event, &sse.data) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!("Dropping malformed turn event: {}", e);
                continue;
            }
        };

        let terminal = event.is_terminal();
        if tx_event.send(event).is_err() {
            trace!("Turn event receiver dropped, stopping SSE pump");
            return;
        }
        if terminal {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::ToolEventKind;
    use turnwise_core_types::ToolStatus;

    async fn collect_events(chunks: Vec<&str>) -> Vec<TurnEvent> {
        let owned: Vec<Result<String, std::io::Error>> =
            chunks.into_iter().map(|c| Ok(c.to_string())).collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_turn_stream(futures::stream::iter(owned), tx, Duration::from_secs(5)).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn decodes_events_split_across_chunks() {
        let events = collect_events(vec![
            "event: ready\ndata: {\"run_id\":\"r1\"}\n\n",
            "event: token\ndata: Hel",
            "lo\n\nevent: tool.executing\ndata: {\"call_id\":\"c1\",\"tool\":\"kubectl_get\"}\n\n",
            "event: completed\ndata: {\"duration_ms\":42}\n\n",
        ])
        .await;

        assert_eq!(events.len(), 4);
        assert_eq!(
            events[1],
            TurnEvent::Token {
                text: "Hello".to_string()
            }
        );
        match &events[2] {
            TurnEvent::Tool { kind, update } => {
                assert_eq!(*kind, ToolEventKind::Executing);
                assert_eq!(update.status, Some(ToolStatus::Executing));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(
            events[3],
            TurnEvent::Completed {
                duration_ms: Some(42)
            }
        );
    }

    #[tokio::test]
    async fn stops_reading_after_terminal_event() {
        let events = collect_events(vec![
            "event: error\ndata: {\"message\":\"boom\"}\n\n",
            "event: token\ndata: late\n\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![TurnEvent::Error {
                message: "boom".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn malformed_and_unknown_events_are_skipped() {
        let events = collect_events(vec![
            "event: heartbeat\ndata: {\"timestamp\":1}\n\n",
            "event: tool.executing\ndata: {oops\n\n",
            "data: unnamed\n\n",
            "event: token\ndata: ok\n\n",
            "event: completed\ndata: {}\n\n",
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], TurnEvent::Completed { duration_ms: None }));
    }

    #[tokio::test]
    async fn premature_end_reports_one_error() {
        let events = collect_events(vec!["event: token\ndata: partial\n\n"]).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], TurnEvent::Error { message } if message.contains("closed")));
    }
}
