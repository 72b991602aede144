//! The Client-side driver: the half of the protocol that sends `CONFIG`,
//! input, and control events, and consumes the Server's output stream.

use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{decode_frame, encode_event, encode_media_chunk, DecodedFrame, MediaChunk};
use crate::error::{EngineError, EngineResult, ProtocolError, ValidationError};
use crate::event::{Event, InputMode, InterruptType};
use crate::session::{Phase, Session, SessionOptions};
use crate::transport::{Inbound, Transport};

/// One item from the Server's output stream: either a structured event or a
/// binary media chunk (`OUTPUT_MEDIA`, tagged by the content id it belongs to).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Event(Event),
    Media(MediaChunk),
}

/// Drives one session from the Client's side of a [`Transport`].
pub struct ClientDriver<T: Transport> {
    transport: T,
    session: Session,
    /// Minted once at `configure()` and held for the life of the session;
    /// tags every `INPUT_MEDIA` chunk this client sends.
    input_stream_id: Option<Uuid>,
    ended: bool,
}

impl<T: Transport> ClientDriver<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            session: Session::new(),
            input_stream_id: None,
            ended: false,
        }
    }

    /// Send `CONFIG` and block until `SERVER_READY` arrives, returning the
    /// `(chat_id, request_id)` it announced.
    pub async fn configure(&mut self, options: SessionOptions) -> EngineResult<(Uuid, Uuid)> {
        self.session.configure(options)?;
        self.input_stream_id = Some(Uuid::new_v4());
        let config = Event::Config {
            chat_id: options.chat_id,
            input_mode: options.input_mode,
            silence_duration: options.silence_duration,
            audio_format: options.audio_format,
            output_text: options.output_text,
            output_audio: options.output_audio,
            output_video: options.output_video,
        };
        info!(input_mode = ?options.input_mode, silence_duration = options.silence_duration, "sending CONFIG");
        self.transport.send_text(encode_event(&config)).await?;

        loop {
            match self.recv_event().await? {
                Some(Event::ServerReady {
                    chat_id,
                    request_id,
                }) => {
                    self.session.server_ready(chat_id, request_id)?;
                    info!(%chat_id, %request_id, "received SERVER_READY");
                    return Ok((chat_id, request_id));
                }
                Some(other) => {
                    warn!(event_type = ?other.event_type(), "expected SERVER_READY");
                    return Err(ProtocolError::IllegalTransition(format!(
                        "expected SERVER_READY, got {:?}",
                        other.event_type()
                    ))
                    .into());
                }
                None => return Err(EngineError::Transport(crate::error::TransportError::Closed)),
            }
        }
    }

    /// Send one chunk of `INPUT_MEDIA`, entering `AWAIT_INPUT` on the first
    /// call. Every chunk of the session is tagged with the same stream id,
    /// minted at [`Self::configure`].
    pub async fn send_audio_chunk(&mut self, bytes: Bytes) -> EngineResult<()> {
        self.ensure_input_phase(InputMode::Audio)?;
        let stream_id = self
            .input_stream_id
            .expect("input_stream_id is minted during configure()");
        debug!(%stream_id, len = bytes.len(), "sending audio chunk");
        let chunk = MediaChunk { stream_id, bytes };
        self.transport.send_binary(encode_media_chunk(&chunk)).await?;
        Ok(())
    }

    /// Send `INPUT_TEXT`, entering `AWAIT_INPUT_TEXT` on the first call.
    pub async fn send_text(&mut self, data: impl Into<String>) -> EngineResult<()> {
        self.ensure_input_phase(InputMode::Text)?;
        let event = Event::InputText { data: data.into() };
        debug!("sending INPUT_TEXT");
        self.transport.send_text(encode_event(&event)).await?;
        Ok(())
    }

    fn ensure_input_phase(&mut self, mode: InputMode) -> Result<(), ValidationError> {
        match self.session.phase() {
            Phase::Ready if self.session.options().input_mode == mode => {
                let result = self.session.begin_input();
                if result.is_ok() {
                    info!(?mode, "beginning a new request's input phase");
                }
                result
            }
            Phase::AwaitInputAudio if mode == InputMode::Audio => Ok(()),
            Phase::AwaitInputText if mode == InputMode::Text => Ok(()),
            other => Err(ValidationError::WrongState(format!(
                "cannot send {mode:?} input in phase {other:?}"
            ))),
        }
    }

    /// Send `INPUT_END`. Only valid when `silence_duration == -1` (the
    /// client-detects-silence tie-break); otherwise the Server is the
    /// designated emitter and this returns a [`ValidationError`].
    pub async fn end_input(&mut self) -> EngineResult<()> {
        if !self.session.options().client_emits_input_end() {
            return Err(ValidationError::WrongState(
                "server is the designated INPUT_END emitter for this silence_duration".into(),
            )
            .into());
        }
        self.session.input_end()?;
        info!("sending INPUT_END");
        self.transport.send_text(encode_event(&Event::InputEnd)).await?;
        Ok(())
    }

    /// Send `INTERRUPT`. Valid during input or while the Server is responding.
    pub async fn interrupt(&mut self, interrupt_type: InterruptType) -> EngineResult<()> {
        if !self.session.interrupt_allowed() {
            return Err(ValidationError::WrongState(
                "INTERRUPT is only valid during input or response".into(),
            )
            .into());
        }
        info!(?interrupt_type, "sending INTERRUPT");
        let event = Event::Interrupt { interrupt_type };
        self.transport.send_text(encode_event(&event)).await?;
        Ok(())
    }

    /// Pull the next item of the Server's output stream, or `None` at end of
    /// session (after `SESSION_END` or the transport closing).
    pub async fn next_event(&mut self) -> EngineResult<Option<ServerEvent>> {
        if self.session.is_terminated() {
            return Ok(None);
        }
        loop {
            match self.transport.recv().await? {
                Inbound::EndOfStream => {
                    info!("transport closed; terminating session");
                    self.session.terminate();
                    return Ok(None);
                }
                Inbound::Frame(raw) => {
                    let decoded = match decode_frame(raw) {
                        Ok(decoded) => decoded,
                        Err(e) => {
                            warn!(error = %e, "rejecting malformed frame from server");
                            return Err(e.into());
                        }
                    };
                    match decoded {
                        DecodedFrame::Event(event) => {
                            if let Err(e) = self.observe_server_event(&event) {
                                tracing::error!(error = %e, event_type = ?event.event_type(), "illegal event from server");
                                return Err(e.into());
                            }
                            let terminal = matches!(event, Event::SessionEnd);
                            if terminal {
                                info!("received SESSION_END");
                                self.session.terminate();
                            }
                            return Ok(Some(ServerEvent::Event(event)));
                        }
                        DecodedFrame::Media(chunk) => {
                            self.observe_server_media(&chunk)?;
                            return Ok(Some(ServerEvent::Media(chunk)));
                        }
                    }
                }
            }
        }
    }

    /// Send `SESSION_END` and close the transport. Idempotent.
    pub async fn end_session(&mut self) -> EngineResult<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        self.session.terminate();
        info!("sending SESSION_END");
        self.transport.send_text(encode_event(&Event::SessionEnd)).await?;
        self.transport.close().await?;
        Ok(())
    }

    async fn recv_event(&mut self) -> EngineResult<Option<Event>> {
        match self.transport.recv().await? {
            Inbound::EndOfStream => Ok(None),
            Inbound::Frame(raw) => match decode_frame(raw) {
                Ok(DecodedFrame::Event(event)) => Ok(Some(event)),
                Ok(DecodedFrame::Media(_)) => Err(ProtocolError::IllegalTransition(
                    "expected a structured event, got a binary frame".into(),
                )
                .into()),
                Err(e) => {
                    warn!(error = %e, "rejecting malformed frame from server");
                    Err(e.into())
                }
            },
        }
    }

    fn observe_server_event(&mut self, event: &Event) -> Result<(), ProtocolError> {
        match event {
            Event::ServerReady {
                chat_id,
                request_id,
            } => {
                self.session
                    .server_ready(*chat_id, *request_id)
                    .map_err(|e| ProtocolError::IllegalTransition(e.to_string()))?;
                info!(%chat_id, %request_id, "received SERVER_READY for a new request");
                Ok(())
            }
            Event::OutputTranscription { .. } => {
                if self.session.phase() != Phase::AwaitInputAudio {
                    return Err(ProtocolError::IllegalTransition(
                        "OUTPUT_TRANSCRIPTION is only valid while awaiting audio input".into(),
                    ));
                }
                Ok(())
            }
            Event::OutputStage { id, parent_id, .. } => {
                self.session.announce_stage(*id, *parent_id)
            }
            Event::OutputTextContent { id, stage_id } => {
                self.session
                    .announce_content(*id, *stage_id, crate::event::ContentType::Text)
            }
            Event::OutputFunctionCallContent { id, stage_id } => self.session.announce_content(
                *id,
                *stage_id,
                crate::event::ContentType::FunctionCall,
            ),
            Event::OutputAudioContent { id, stage_id, .. } => {
                self.session
                    .announce_content(*id, *stage_id, crate::event::ContentType::Audio)
            }
            Event::OutputVideoContent { id, stage_id, .. } => {
                self.session
                    .announce_content(*id, *stage_id, crate::event::ContentType::Video)
            }
            Event::OutputContentAddition { content_id, .. } => {
                self.session.check_content_exists(*content_id).map(|_| ())
            }
            Event::OutputText { content_id, .. } => self
                .session
                .check_content_for_write(*content_id, crate::event::ContentType::Text),
            Event::OutputFunctionCall { content_id, .. } => {
                self.session.mark_function_call_done(*content_id)
            }
            Event::OutputEnd => {
                self.session
                    .output_end()
                    .map_err(|e| ProtocolError::IllegalTransition(e.to_string()))?;
                info!("received OUTPUT_END; request complete");
                Ok(())
            }
            Event::SessionEnd => Ok(()),
            Event::InputEnd => match self.session.phase() {
                Phase::AwaitInputAudio => self
                    .session
                    .input_end()
                    .map_err(|e| ProtocolError::IllegalTransition(e.to_string())),
                Phase::Responding if !self.session.options().client_emits_input_end() => {
                    Err(ProtocolError::IllegalTransition(
                        "duplicate INPUT_END for a server-detected silence_duration".into(),
                    ))
                }
                Phase::Responding => Ok(()),
                other => Err(ProtocolError::IllegalTransition(format!(
                    "INPUT_END is not valid from the Server in phase {other:?}"
                ))),
            },
            Event::Config { .. } | Event::InputText { .. } | Event::Interrupt { .. } => {
                Err(ProtocolError::IllegalTransition(format!(
                    "{:?} is a Client-originated event, not valid from the Server",
                    event.event_type()
                )))
            }
        }
    }

    fn observe_server_media(&mut self, chunk: &MediaChunk) -> Result<(), ProtocolError> {
        if self.session.phase() != Phase::Responding {
            return Err(ProtocolError::IllegalTransition(format!(
                "OUTPUT_MEDIA is not valid in phase {:?}",
                self.session.phase()
            )));
        }
        self.session
            .check_content_exists(chunk.stream_id)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mem;

    fn default_options() -> SessionOptions {
        SessionOptions {
            input_mode: InputMode::Text,
            ..SessionOptions::default()
        }
    }

    #[tokio::test]
    async fn configure_waits_for_server_ready() {
        let (client_t, mut server_t) = mem::pair();
        let mut client = ClientDriver::new(client_t);

        let configure = tokio::spawn(async move {
            let mut client = client;
            let result = client.configure(default_options()).await;
            (client, result)
        });

        // Drain the CONFIG frame, then reply with SERVER_READY.
        let _config_frame = server_t.recv().await.unwrap();
        let chat_id = Uuid::new_v4();
        let request_id = Uuid::new_v4();
        server_t
            .send_text(encode_event(&Event::ServerReady {
                chat_id,
                request_id,
            }))
            .await
            .unwrap();

        let (_client, result) = configure.await.unwrap();
        assert_eq!(result.unwrap(), (chat_id, request_id));
    }

    #[tokio::test]
    async fn text_input_before_ready_is_rejected() {
        let (client_t, _server_t) = mem::pair();
        let mut client = ClientDriver::new(client_t);
        assert!(client.send_text("too early").await.is_err());
    }

    #[tokio::test]
    async fn interrupt_outside_request_is_rejected() {
        let (client_t, mut server_t) = mem::pair();
        let mut client = ClientDriver::new(client_t);
        let chat_id = Uuid::new_v4();
        let request_id = Uuid::new_v4();
        let join = tokio::spawn(async move {
            let result = client.configure(default_options()).await;
            (client, result)
        });
        let _ = server_t.recv().await.unwrap();
        server_t
            .send_text(encode_event(&Event::ServerReady {
                chat_id,
                request_id,
            }))
            .await
            .unwrap();
        let (mut client, result) = join.await.unwrap();
        result.unwrap();

        assert!(client.interrupt(InterruptType::User).await.is_err());
    }

    #[tokio::test]
    async fn audio_chunks_share_one_minted_stream_id() {
        let (client_t, mut server_t) = mem::pair();
        let mut client = ClientDriver::new(client_t);
        let options = SessionOptions {
            input_mode: InputMode::Audio,
            ..SessionOptions::default()
        };
        let join = tokio::spawn(async move {
            let result = client.configure(options).await;
            (client, result)
        });
        let _ = server_t.recv().await.unwrap();
        server_t
            .send_text(encode_event(&Event::ServerReady {
                chat_id: Uuid::new_v4(),
                request_id: Uuid::new_v4(),
            }))
            .await
            .unwrap();
        let (mut client, result) = join.await.unwrap();
        result.unwrap();

        client
            .send_audio_chunk(Bytes::from_static(b"one"))
            .await
            .unwrap();
        client
            .send_audio_chunk(Bytes::from_static(b"two"))
            .await
            .unwrap();

        let first = match server_t.recv().await.unwrap() {
            Inbound::Frame(raw) => match decode_frame(raw).unwrap() {
                DecodedFrame::Media(m) => m.stream_id,
                _ => panic!("expected media"),
            },
            _ => panic!("expected a frame"),
        };
        let second = match server_t.recv().await.unwrap() {
            Inbound::Frame(raw) => match decode_frame(raw).unwrap() {
                DecodedFrame::Media(m) => m.stream_id,
                _ => panic!("expected media"),
            },
            _ => panic!("expected a frame"),
        };
        assert_eq!(first, second);
    }
}
