//! WebSocket connection lifecycle: one session pipeline per connection.
//!
//! A writer task serializes [`ServerFrame`]s onto the socket. The read loop
//! handles client commands and final transcripts one at a time, so a turn
//! never starts while an interrupt is still draining.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use voxlane_core::error::VoxlaneError;
use voxlane_core::protocol::{ClientCommand, ServerFrame};
use voxlane_media::SpeechRecognizer;
use voxlane_pipeline::{EventSink, SentenceSynthesizer, Session, SessionPipeline};

use crate::auth::UNAUTHORIZED;
use crate::state::GatewayState;

/// Per-connection command handling.
struct ConnectionGateway {
    conn_id: String,
    state: Arc<GatewayState>,
    pipeline: SessionPipeline,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    events: EventSink,
}

impl ConnectionGateway {
    fn send(&self, frame: ServerFrame) {
        let _ = self.events.send(frame);
    }

    fn reject(&self, err: VoxlaneError) {
        self.send(ServerFrame::error(err.to_string()));
    }

    async fn handle_text(&self, text: &str) {
        let command = match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => command,
            Err(e) => {
                warn!(conn_id = %self.conn_id, %e, "Invalid command received");
                self.reject(VoxlaneError::Protocol(format!("Invalid message: {e}")));
                return;
            }
        };

        if command.is_privileged() {
            if let Err(e) = self.state.auth.verify(command.token()) {
                warn!(conn_id = %self.conn_id, command = command_name(&command), %e, "Rejected unauthorized command");
                #[cfg(feature = "metrics")]
                crate::metrics::record_auth_failure(command_name(&command));
                self.send(ServerFrame::error(UNAUTHORIZED));
                return;
            }
        }

        match command {
            ClientCommand::Chat { data, .. } => self.handle_chat(data).await,
            ClientCommand::Interrupt {} => {
                info!(conn_id = %self.conn_id, "Interrupt requested");
                #[cfg(feature = "metrics")]
                crate::metrics::record_interrupt();
                self.pipeline.interrupt().await;
            }
            ClientCommand::Audio { data, is_final, .. } => self.handle_audio(data, is_final).await,
        }
    }

    async fn handle_chat(&self, text: String) {
        if text.trim().is_empty() {
            self.reject(VoxlaneError::Protocol("Empty chat message".into()));
            return;
        }
        #[cfg(feature = "metrics")]
        crate::metrics::record_turn("chat");
        self.pipeline.start_turn(text).await;
    }

    async fn handle_transcript(&self, text: String) {
        info!(conn_id = %self.conn_id, chars = text.chars().count(), "Final transcript received");
        #[cfg(feature = "metrics")]
        crate::metrics::record_turn("speech");
        self.pipeline.start_turn(text).await;
    }

    async fn handle_audio(&self, data: Option<String>, is_final: bool) {
        let Some(recognizer) = self.recognizer.as_ref() else {
            self.reject(VoxlaneError::Provider("Speech recognition unavailable".into()));
            return;
        };

        if let Some(data) = data.filter(|d| !d.is_empty()) {
            match STANDARD.decode(data.as_bytes()) {
                Ok(chunk) => {
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_audio_in(chunk.len());
                    if let Err(e) = recognizer.send_audio(&chunk).await {
                        error!(conn_id = %self.conn_id, %e, "Failed to forward audio");
                    }
                }
                Err(e) => {
                    warn!(conn_id = %self.conn_id, %e, "Undecodable audio chunk");
                    self.reject(VoxlaneError::Protocol(format!("Invalid audio data: {e}")));
                }
            }
        }

        if is_final {
            if let Err(e) = recognizer.finish_audio().await {
                error!(conn_id = %self.conn_id, %e, "Failed to finish recognition");
            }
        }
    }
}

fn command_name(command: &ClientCommand) -> &'static str {
    match command {
        ClientCommand::Chat { .. } => "chat",
        ClientCommand::Interrupt {} => "interrupt",
        ClientCommand::Audio { .. } => "audio",
    }
}

/// Handle a new WebSocket connection.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "New WebSocket connection");
    state.register(&conn_id).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_connect();

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let send_task = tokio::spawn(async move {
        while let Some(frame) = event_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    error!(%e, kind = frame.kind(), "Failed to serialize frame");
                    continue;
                }
            };
            #[cfg(feature = "metrics")]
            crate::metrics::record_frame_out(frame.kind());
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Final transcripts from the recognizer re-enter the read loop here.
    let (transcript_tx, mut transcript_rx) = mpsc::unbounded_channel::<String>();
    let recognizer = match state.capabilities.new_recognizer() {
        Ok(recognizer) => match recognizer.start(transcript_tx.clone()).await {
            Ok(()) => Some(recognizer),
            Err(e) => {
                warn!(conn_id = %conn_id, %e, "Speech recognizer failed to start");
                None
            }
        },
        Err(e) => {
            warn!(conn_id = %conn_id, %e, "Speech recognizer unavailable");
            None
        }
    };

    let caps = &state.capabilities;
    let synthesizer = Arc::new(SentenceSynthesizer::new(
        Arc::clone(&caps.translator),
        Arc::clone(&caps.tts),
        caps.pool.clone(),
        state.config.audio_chunk_bytes(),
    ));
    let pipeline = SessionPipeline::new(
        Arc::new(Session::new(conn_id.clone())),
        Arc::clone(&caps.model),
        synthesizer,
        event_tx.clone(),
    );
    pipeline.start_consumers();

    let connection = ConnectionGateway {
        conn_id: conn_id.clone(),
        state: Arc::clone(&state),
        pipeline,
        recognizer,
        events: event_tx,
    };

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => connection.handle_text(text.as_str()).await,
                Some(Ok(Message::Binary(_))) => {
                    connection.reject(VoxlaneError::Protocol("Binary frames are not supported".into()));
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(conn_id = %conn_id, "Client closed connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(conn_id = %conn_id, %e, "WebSocket error");
                    break;
                }
            },
            Some(text) = transcript_rx.recv() => connection.handle_transcript(text).await,
        }
    }

    // Cleanup
    connection.pipeline.shutdown().await;
    drop(transcript_tx);
    send_task.abort();
    state.unregister(&conn_id).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_disconnect();
    info!(conn_id = %conn_id, "WebSocket connection closed");
}
