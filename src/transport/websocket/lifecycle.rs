//! Connection I/O task for the WebSocket transport (open, pump, close)

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::transport::{
    CLOSE_ABNORMAL, CLOSE_NO_STATUS, ReadyState, SharedReadyState, TransportEvent,
    TransportEventSender,
};

use super::config::Outbound;

/// Open the socket and pump frames until either side closes
///
/// Reports exactly one `Close` event before returning.
pub(super) async fn run_connection(
    url: String,
    state: SharedReadyState,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: TransportEventSender,
    connect_timeout: Duration,
) {
    let ws = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            fail(&state, &events, format!("Failed to connect to {url}: {e}"));
            return;
        }
        Err(_) => {
            fail(
                &state,
                &events,
                format!("Handshake with {url} timed out after {connect_timeout:?}"),
            );
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();

    // Close requested while the handshake was in flight
    if state.get() == ReadyState::Closing {
        let _ = sink.close().await;
        state.set(ReadyState::Closed);
        let _ = events.send(TransportEvent::Close {
            code: CLOSE_ABNORMAL,
            reason: "closed before open".to_string(),
        });
        return;
    }

    state.set(ReadyState::Open);
    let _ = events.send(TransportEvent::Open);

    let (code, reason) = loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        let _ = events.send(TransportEvent::Error(format!("Write failed: {e}")));
                        break (CLOSE_ABNORMAL, e.to_string());
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    let _ = sink.close().await;
                    break (code, reason);
                }
                None => {
                    let _ = sink.close().await;
                    break (CLOSE_ABNORMAL, "transport handle dropped".to_string());
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text.to_string()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let _ = events.send(TransportEvent::Message(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or_else(
                        || (CLOSE_NO_STATUS, String::new()),
                        |f| (u16::from(f.code), f.reason.to_string()),
                    );
                }
                // Ping/pong are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(format!("Read failed: {e}")));
                    break (CLOSE_ABNORMAL, e.to_string());
                }
                None => break (CLOSE_ABNORMAL, "stream ended".to_string()),
            }
        }
    };

    state.set(ReadyState::Closed);
    log::debug!("WebSocket {url} closed with code {code}");
    let _ = events.send(TransportEvent::Close { code, reason });
}

fn fail(state: &SharedReadyState, events: &TransportEventSender, message: String) {
    state.set(ReadyState::Closed);
    let _ = events.send(TransportEvent::Error(message.clone()));
    let _ = events.send(TransportEvent::Close {
        code: CLOSE_ABNORMAL,
        reason: message,
    });
}
