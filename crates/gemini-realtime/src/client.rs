//! WebSocket client for the Gemini Live API.

use crate::types::{BidiGenerateContentSetup, ClientMessage, ServerMessage};
use anyhow::{Context, Result};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    net::TcpStream,
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, error, info, warn};

pub const LIVE_API_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Outbound messages buffered ahead of the socket. Realtime audio that does
/// not fit is dropped by [`LiveSession::try_send`].
const OUTBOUND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 128;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Events read from the live connection.
#[derive(Debug)]
pub enum LiveEvent {
    Message(ServerMessage),
    /// The peer closed the socket, with its reason if any.
    Closed(Option<String>),
    /// Reading or writing the socket failed.
    Error(String),
}

enum Outgoing {
    Message(ClientMessage),
    Close,
}

/// A connected live session. Reading and writing run on their own tasks so
/// that a slow socket never stalls the caller.
pub struct LiveSession {
    outbound: mpsc::Sender<Outgoing>,
    events: mpsc::Receiver<LiveEvent>,
    reader: JoinHandle<()>,
}

impl LiveSession {
    /// Opens the socket at `endpoint` (normally [`LIVE_API_URL`]) and sends
    /// `setup`. The session is usable once a message with `setup_complete`
    /// arrives.
    pub async fn connect(
        endpoint: &str,
        api_key: &str,
        setup: BidiGenerateContentSetup,
    ) -> Result<Self> {
        Self::connect_to(&format!("{endpoint}?key={api_key}"), setup).await
    }

    pub async fn connect_to(url: &str, setup: BidiGenerateContentSetup) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Gemini Live WebSocket")?;
        info!(model = %setup.model, "Connected to Gemini Live WebSocket.");
        let (mut sink, stream) = ws_stream.split();

        let setup_msg = serde_json::to_string(&ClientMessage::Setup(setup))?;
        sink.send(WsMessage::Text(setup_msg.into()))
            .await
            .context("Failed to send session setup")?;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        tokio::spawn(write_loop(sink, outbound_rx, event_tx.clone()));
        let reader = tokio::spawn(read_loop(stream, event_tx));

        Ok(Self {
            outbound: outbound_tx,
            events: event_rx,
            reader,
        })
    }

    /// Queues a message without waiting. Fails when the outbound buffer is
    /// full or the writer has stopped.
    pub fn try_send(&self, msg: ClientMessage) -> Result<()> {
        self.outbound
            .try_send(Outgoing::Message(msg))
            .map_err(|e| match e {
                TrySendError::Full(_) => anyhow::anyhow!("Live session outbound buffer is full"),
                TrySendError::Closed(_) => anyhow::anyhow!("Live session writer has stopped"),
            })
    }

    /// Queues a message, waiting for room in the outbound buffer.
    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.outbound
            .send(Outgoing::Message(msg))
            .await
            .map_err(|_| anyhow::anyhow!("Live session writer has stopped"))
    }

    pub async fn next_event(&mut self) -> Option<LiveEvent> {
        self.events.recv().await
    }

    /// Sends a close frame and lets the writer finish.
    pub async fn close(self) {
        let _ = self.outbound.send(Outgoing::Close).await;
    }
}

// The writer drains what is queued (including a close frame) and exits
// once the sender is gone.
impl Drop for LiveSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::Receiver<Outgoing>,
    events: mpsc::Sender<LiveEvent>,
) {
    while let Some(outgoing) = rx.recv().await {
        let result = match outgoing {
            Outgoing::Message(msg) => match serde_json::to_string(&msg) {
                Ok(text) => sink.send(WsMessage::Text(text.into())).await,
                Err(e) => {
                    error!(error = %e, "Failed to serialize client message");
                    continue;
                }
            },
            Outgoing::Close => {
                if let Err(e) = sink.send(WsMessage::Close(None)).await {
                    debug!(error = %e, "Close frame not delivered");
                }
                break;
            }
        };
        if let Err(e) = result {
            error!(error = %e, "Error writing to Gemini WebSocket");
            let _ = events.send(LiveEvent::Error(e.to_string())).await;
            break;
        }
    }
    debug!("Gemini writer finished.");
}

async fn read_loop(mut stream: SplitStream<WsStream>, events: mpsc::Sender<LiveEvent>) {
    while let Some(frame) = stream.next().await {
        let parsed = match frame {
            Ok(WsMessage::Text(text)) => serde_json::from_str::<ServerMessage>(text.as_str()),
            // The service may deliver JSON in binary frames.
            Ok(WsMessage::Binary(bytes)) => serde_json::from_slice::<ServerMessage>(&bytes),
            Ok(WsMessage::Close(close_frame)) => {
                info!(?close_frame, "Gemini WebSocket connection closed by server.");
                let reason = close_frame.map(|f| f.reason.as_str().to_owned());
                let _ = events.send(LiveEvent::Closed(reason)).await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                error!(error = %e, "Error reading from Gemini WebSocket");
                let _ = events.send(LiveEvent::Error(e.to_string())).await;
                return;
            }
        };
        match parsed {
            Ok(msg) => {
                if events.send(LiveEvent::Message(msg)).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(error = %e, "Ignoring unparseable Gemini message"),
        }
    }
    let _ = events.send(LiveEvent::Closed(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BidiGenerateContentRealtimeInput, Blob, GenerationConfig, ResponseModality,
    };
    use serde_json::Value;
    use std::future::Future;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{
        accept_async,
        tungstenite::protocol::{CloseFrame, frame::coding::CloseCode},
    };

    type ServerSocket = WebSocketStream<TcpStream>;

    fn setup() -> BidiGenerateContentSetup {
        BidiGenerateContentSetup {
            model: "models/test".into(),
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
                speech_config: None,
            },
            system_instruction: None,
            tools: Vec::new(),
        }
    }

    /// Accepts one WebSocket connection on a local port and runs `script`
    /// against it.
    async fn serve<F, Fut, T>(script: F) -> (String, JoinHandle<T>)
    where
        F: FnOnce(ServerSocket) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            script(accept_async(stream).await.unwrap()).await
        });
        (format!("ws://{addr}"), handle)
    }

    async fn next_json(ws: &mut ServerSocket) -> Value {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_setup_first_then_binary_messages_and_close() {
        let (url, server) = serve(|mut ws| async move {
            let first = next_json(&mut ws).await;
            ws.send(WsMessage::binary(br#"{"setupComplete":{}}"#.to_vec()))
                .await
                .unwrap();
            let second = next_json(&mut ws).await;
            ws.close(None).await.unwrap();
            (first, second)
        })
        .await;

        let mut session = LiveSession::connect_to(&url, setup()).await.unwrap();
        match session.next_event().await {
            Some(LiveEvent::Message(msg)) => assert!(msg.setup_complete.is_some()),
            other => panic!("expected setupComplete, got {other:?}"),
        }

        session
            .send(ClientMessage::RealtimeInput(BidiGenerateContentRealtimeInput {
                audio: Blob {
                    mime_type: "audio/pcm;rate=16000".into(),
                    data: "AAA=".into(),
                },
            }))
            .await
            .unwrap();
        assert!(matches!(session.next_event().await, Some(LiveEvent::Closed(None))));

        let (first, second) = server.await.unwrap();
        assert_eq!(first["setup"]["model"], "models/test");
        assert_eq!(first["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(second["realtimeInput"]["audio"]["data"], "AAA=");
    }

    #[tokio::test]
    async fn test_close_reason_is_reported() {
        let (url, _server) = serve(|mut ws| async move {
            next_json(&mut ws).await;
            ws.close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "quota exceeded".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let mut session = LiveSession::connect_to(&url, setup()).await.unwrap();
        match session.next_event().await {
            Some(LiveEvent::Closed(Some(reason))) => assert_eq!(reason, "quota exceeded"),
            other => panic!("expected a close with reason, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_connection_is_an_error() {
        let (url, _server) = serve(|mut ws| async move {
            next_json(&mut ws).await;
            drop(ws);
        })
        .await;

        let mut session = LiveSession::connect_to(&url, setup()).await.unwrap();
        assert!(matches!(session.next_event().await, Some(LiveEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_unparseable_messages_are_skipped() {
        let (url, _server) = serve(|mut ws| async move {
            next_json(&mut ws).await;
            ws.send(WsMessage::text("not json")).await.unwrap();
            ws.send(WsMessage::text(r#"{"setupComplete":{}}"#)).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut session = LiveSession::connect_to(&url, setup()).await.unwrap();
        assert!(matches!(
            session.next_event().await,
            Some(LiveEvent::Message(ServerMessage {
                setup_complete: Some(_),
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_close_sends_a_close_frame() {
        let (url, server) = serve(|mut ws| async move {
            next_json(&mut ws).await;
            ws.next().await
        })
        .await;

        let session = LiveSession::connect_to(&url, setup()).await.unwrap();
        session.close().await;
        assert!(matches!(server.await.unwrap(), Some(Ok(WsMessage::Close(_)))));
    }

    #[tokio::test]
    async fn test_connect_failure_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = LiveSession::connect_to(&format!("ws://{addr}"), setup()).await;
        assert!(result.is_err());
    }
}
