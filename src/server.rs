//! The Server-side driver: the half of the protocol that answers `CONFIG`
//! with `SERVER_READY`, streams output events/media, and consumes the
//! Client's input stream.

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{decode_frame, encode_event, encode_media_chunk, DecodedFrame, MediaChunk};
use crate::error::{EngineResult, ProtocolError, ValidationError};
use crate::event::{AudioFormat, ContentType, Event, VideoFormat};
use crate::session::{Phase, Session, SessionOptions};
use crate::transport::{Inbound, Transport};

/// One item from the Client's input stream.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Config(SessionOptions),
    InputText { data: String },
    InputEnd,
    Interrupt { interrupt_type: crate::event::InterruptType },
    SessionEnd,
    Media(MediaChunk),
}

/// Drives one session from the Server's side of a [`Transport`].
pub struct ServerDriver<T: Transport> {
    transport: T,
    session: Session,
    ended: bool,
}

impl<T: Transport> ServerDriver<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            session: Session::new(),
            ended: false,
        }
    }

    /// Pull the next item of the Client's input stream, or `None` at end of
    /// session. An `Interrupt` received while a request is open is handled
    /// here: the driver short-circuits the request with `OUTPUT_END` before
    /// returning the event to the caller.
    pub async fn next_client_event(&mut self) -> EngineResult<Option<ClientEvent>> {
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
                Inbound::Frame(raw) => match decode_frame(raw) {
                    Ok(DecodedFrame::Event(event)) => {
                        return self.observe_client_event(event).await;
                    }
                    Ok(DecodedFrame::Media(chunk)) => {
                        self.observe_client_media(&chunk)?;
                        debug!(stream_id = %chunk.stream_id, len = chunk.bytes.len(), "received INPUT_MEDIA chunk");
                        return Ok(Some(ClientEvent::Media(chunk)));
                    }
                    Err(e) => {
                        warn!(error = %e, "rejecting malformed frame from client");
                        return Err(e.into());
                    }
                },
            }
        }
    }

    async fn observe_client_event(
        &mut self,
        event: Event,
    ) -> EngineResult<Option<ClientEvent>> {
        match event {
            Event::Config {
                chat_id,
                input_mode,
                silence_duration,
                audio_format,
                output_text,
                output_audio,
                output_video,
            } => {
                let options = SessionOptions {
                    chat_id,
                    input_mode,
                    silence_duration,
                    audio_format,
                    output_text,
                    output_audio,
                    output_video,
                };
                self.session.configure(options)?;
                info!(?input_mode, silence_duration, "received CONFIG");
                Ok(Some(ClientEvent::Config(options)))
            }
            Event::InputText { data } => {
                match self.session.phase() {
                    Phase::Ready => self.session.begin_input()?,
                    Phase::AwaitInputText => {}
                    other => {
                        return Err(ValidationError::WrongState(format!(
                            "INPUT_TEXT is not valid in phase {other:?}"
                        ))
                        .into())
                    }
                }
                Ok(Some(ClientEvent::InputText { data }))
            }
            Event::InputEnd => {
                if !matches!(
                    self.session.phase(),
                    Phase::AwaitInputAudio | Phase::AwaitInputText
                ) {
                    return Err(
                        ValidationError::WrongState("INPUT_END is not valid here".into()).into(),
                    );
                }
                if !self.session.options().client_emits_input_end() {
                    return Err(ProtocolError::IllegalTransition(
                        "client is not the designated INPUT_END emitter for this silence_duration"
                            .into(),
                    )
                    .into());
                }
                self.session.input_end()?;
                info!("received INPUT_END");
                Ok(Some(ClientEvent::InputEnd))
            }
            Event::Interrupt { interrupt_type } => {
                self.session.mark_interrupted()?;
                if matches!(
                    self.session.phase(),
                    Phase::AwaitInputAudio | Phase::AwaitInputText | Phase::Responding
                ) {
                    self.session.force_output_end()?;
                    info!(?interrupt_type, "INTERRUPT received; short-circuiting request with OUTPUT_END");
                    self.transport
                        .send_text(encode_event(&Event::OutputEnd))
                        .await?;
                } else {
                    info!(?interrupt_type, "INTERRUPT received outside an open request");
                }
                Ok(Some(ClientEvent::Interrupt { interrupt_type }))
            }
            Event::SessionEnd => {
                info!("received SESSION_END");
                self.session.terminate();
                Ok(Some(ClientEvent::SessionEnd))
            }
            Event::ServerReady { .. }
            | Event::OutputTranscription { .. }
            | Event::OutputStage { .. }
            | Event::OutputTextContent { .. }
            | Event::OutputFunctionCallContent { .. }
            | Event::OutputAudioContent { .. }
            | Event::OutputVideoContent { .. }
            | Event::OutputContentAddition { .. }
            | Event::OutputText { .. }
            | Event::OutputFunctionCall { .. }
            | Event::OutputEnd => Err(ProtocolError::IllegalTransition(format!(
                "{:?} is a Server-originated event, not valid from the Client",
                event.event_type()
            ))
            .into()),
        }
    }

    fn observe_client_media(&mut self, _chunk: &MediaChunk) -> Result<(), ProtocolError> {
        if self.session.phase() != Phase::AwaitInputAudio {
            return Err(ProtocolError::IllegalTransition(format!(
                "INPUT_MEDIA is not valid in phase {:?}",
                self.session.phase()
            )));
        }
        Ok(())
    }

    /// Announce `SERVER_READY` for a new request. `chat_id` is reused across
    /// the session once assigned; `request_id` is allocated fresh per request.
    pub async fn ready(&mut self, chat_id: Uuid, request_id: Uuid) -> EngineResult<()> {
        self.session.server_ready(chat_id, request_id)?;
        info!(%chat_id, %request_id, "sending SERVER_READY");
        self.transport
            .send_text(encode_event(&Event::ServerReady {
                chat_id,
                request_id,
            }))
            .await?;
        Ok(())
    }

    /// Emit `INPUT_END` on the Server's own initiative, after detecting
    /// `silence_duration` milliseconds of silence. Only valid when the
    /// Server is the designated emitter (`silence_duration >= 0`).
    pub async fn end_input_detected(&mut self) -> EngineResult<()> {
        if self.session.options().client_emits_input_end() {
            return Err(ValidationError::WrongState(
                "client is the designated INPUT_END emitter for this silence_duration".into(),
            )
            .into());
        }
        self.session.input_end()?;
        info!("silence detected; sending INPUT_END");
        self.transport.send_text(encode_event(&Event::InputEnd)).await?;
        Ok(())
    }

    /// Stream a partial transcription of the Client's audio input. Only
    /// valid while awaiting audio input.
    pub async fn output_transcription(&mut self, transcription: Value) -> EngineResult<()> {
        if self.session.phase() != Phase::AwaitInputAudio {
            return Err(ValidationError::WrongState(
                "OUTPUT_TRANSCRIPTION is only valid while awaiting audio input".into(),
            )
            .into());
        }
        self.transport
            .send_text(encode_event(&Event::OutputTranscription { transcription }))
            .await?;
        Ok(())
    }

    fn check_not_interrupted(&self) -> Result<(), ValidationError> {
        if self.session.is_interrupted() {
            return Err(ValidationError::WrongState(
                "request was interrupted; no further output is legal".into(),
            ));
        }
        Ok(())
    }

    /// Announce a new stage under `parent_id` (or a root stage if `None`).
    pub async fn stage(
        &mut self,
        parent_id: Option<Uuid>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> EngineResult<Uuid> {
        self.check_not_interrupted()?;
        let id = Uuid::new_v4();
        self.session.announce_stage(id, parent_id)?;
        let event = Event::OutputStage {
            id,
            parent_id,
            title: title.into(),
            description: description.into(),
        };
        self.transport.send_text(encode_event(&event)).await?;
        Ok(id)
    }

    pub async fn text_content(&mut self, stage_id: Uuid) -> EngineResult<Uuid> {
        self.check_not_interrupted()?;
        let id = Uuid::new_v4();
        self.session
            .announce_content(id, stage_id, ContentType::Text)?;
        self.transport
            .send_text(encode_event(&Event::OutputTextContent { id, stage_id }))
            .await?;
        Ok(id)
    }

    pub async fn function_call_content(&mut self, stage_id: Uuid) -> EngineResult<Uuid> {
        self.check_not_interrupted()?;
        let id = Uuid::new_v4();
        self.session
            .announce_content(id, stage_id, ContentType::FunctionCall)?;
        self.transport
            .send_text(encode_event(&Event::OutputFunctionCallContent {
                id,
                stage_id,
            }))
            .await?;
        Ok(id)
    }

    pub async fn audio_content(
        &mut self,
        stage_id: Uuid,
        format: AudioFormat,
    ) -> EngineResult<Uuid> {
        self.check_not_interrupted()?;
        let id = Uuid::new_v4();
        self.session
            .announce_content(id, stage_id, ContentType::Audio)?;
        self.transport
            .send_text(encode_event(&Event::OutputAudioContent {
                id,
                stage_id,
                format,
            }))
            .await?;
        Ok(id)
    }

    pub async fn video_content(
        &mut self,
        stage_id: Uuid,
        format: VideoFormat,
    ) -> EngineResult<Uuid> {
        self.check_not_interrupted()?;
        let id = Uuid::new_v4();
        self.session
            .announce_content(id, stage_id, ContentType::Video)?;
        self.transport
            .send_text(encode_event(&Event::OutputVideoContent {
                id,
                stage_id,
                format,
            }))
            .await?;
        Ok(id)
    }

    /// Attach opaque metadata to an already-announced content.
    pub async fn content_addition(&mut self, content_id: Uuid, metadata: Value) -> EngineResult<()> {
        self.check_not_interrupted()?;
        self.session.check_content_exists(content_id)?;
        self.transport
            .send_text(encode_event(&Event::OutputContentAddition {
                content_id,
                metadata,
            }))
            .await?;
        Ok(())
    }

    pub async fn write_text(&mut self, content_id: Uuid, data: impl Into<String>) -> EngineResult<()> {
        self.check_not_interrupted()?;
        self.session
            .check_content_for_write(content_id, ContentType::Text)?;
        let data = data.into();
        debug!(%content_id, len = data.len(), "writing OUTPUT_TEXT");
        let event = Event::OutputText { content_id, data };
        self.transport.send_text(encode_event(&event)).await?;
        Ok(())
    }

    /// Send one chunk of `OUTPUT_MEDIA` for an audio or video content.
    pub async fn write_media(
        &mut self,
        content_id: Uuid,
        content_type: ContentType,
        bytes: Bytes,
    ) -> EngineResult<()> {
        self.check_not_interrupted()?;
        if !matches!(content_type, ContentType::Audio | ContentType::Video) {
            return Err(ValidationError::InvalidField {
                field: "content_type",
                reason: "OUTPUT_MEDIA only carries AUDIO or VIDEO content".into(),
            }
            .into());
        }
        self.session
            .check_content_for_write(content_id, content_type)?;
        debug!(%content_id, ?content_type, len = bytes.len(), "writing OUTPUT_MEDIA chunk");
        let chunk = MediaChunk {
            stream_id: content_id,
            bytes,
        };
        self.transport.send_binary(encode_media_chunk(&chunk)).await?;
        Ok(())
    }

    pub async fn write_function_call(
        &mut self,
        content_id: Uuid,
        data: impl Into<String>,
    ) -> EngineResult<()> {
        self.check_not_interrupted()?;
        self.session
            .check_content_for_write(content_id, ContentType::FunctionCall)?;
        self.session.mark_function_call_done(content_id)?;
        let event = Event::OutputFunctionCall {
            content_id,
            data: data.into(),
        };
        self.transport.send_text(encode_event(&event)).await?;
        Ok(())
    }

    /// Close out the current request with `OUTPUT_END`, returning to `READY`.
    pub async fn end_output(&mut self) -> EngineResult<()> {
        self.session.output_end()?;
        info!("sending OUTPUT_END; request complete");
        self.transport.send_text(encode_event(&Event::OutputEnd)).await?;
        Ok(())
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InputMode;
    use crate::transport::mem;

    async fn handshake(server: &mut ServerDriver<mem::MemTransport>, client: &mut mem::MemTransport) {
        client
            .send_text(encode_event(&Event::Config {
                chat_id: None,
                input_mode: InputMode::Text,
                silence_duration: -1.0,
                audio_format: AudioFormat {
                    nchannels: 1,
                    sample_rate: 16000,
                    sample_width: 2,
                },
                output_text: true,
                output_audio: true,
                output_video: true,
            }))
            .await
            .unwrap();
        let event = server.next_client_event().await.unwrap().unwrap();
        assert!(matches!(event, ClientEvent::Config(_)));
        server
            .ready(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        let _server_ready_frame = client.recv().await.unwrap();
    }

    #[tokio::test]
    async fn full_text_request_cycle() {
        let (server_t, mut client_t) = mem::pair();
        let mut server = ServerDriver::new(server_t);
        handshake(&mut server, &mut client_t).await;

        client_t
            .send_text(encode_event(&Event::InputText {
                data: "hi".into(),
            }))
            .await
            .unwrap();
        let event = server.next_client_event().await.unwrap().unwrap();
        assert!(matches!(event, ClientEvent::InputText { .. }));

        client_t
            .send_text(encode_event(&Event::InputEnd))
            .await
            .unwrap();
        let event = server.next_client_event().await.unwrap().unwrap();
        assert!(matches!(event, ClientEvent::InputEnd));

        let stage = server.stage(None, "root", "").await.unwrap();
        let content = server.text_content(stage).await.unwrap();
        server.write_text(content, "hello back").await.unwrap();
        server.end_output().await.unwrap();
    }

    #[tokio::test]
    async fn function_call_cannot_fire_twice() {
        let (server_t, mut client_t) = mem::pair();
        let mut server = ServerDriver::new(server_t);
        handshake(&mut server, &mut client_t).await;

        client_t
            .send_text(encode_event(&Event::InputText {
                data: "call a tool".into(),
            }))
            .await
            .unwrap();
        server.next_client_event().await.unwrap();
        client_t
            .send_text(encode_event(&Event::InputEnd))
            .await
            .unwrap();
        server.next_client_event().await.unwrap();

        let stage = server.stage(None, "root", "").await.unwrap();
        let content = server.function_call_content(stage).await.unwrap();
        server
            .write_function_call(content, "{\"name\":\"lookup\"}")
            .await
            .unwrap();
        assert!(server
            .write_function_call(content, "{\"name\":\"lookup\"}")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn interrupt_forces_output_end() {
        let (server_t, mut client_t) = mem::pair();
        let mut server = ServerDriver::new(server_t);
        handshake(&mut server, &mut client_t).await;

        client_t
            .send_text(encode_event(&Event::InputText {
                data: "hi".into(),
            }))
            .await
            .unwrap();
        server.next_client_event().await.unwrap();
        client_t
            .send_text(encode_event(&Event::InputEnd))
            .await
            .unwrap();
        server.next_client_event().await.unwrap();

        let stage = server.stage(None, "root", "").await.unwrap();
        let content = server.text_content(stage).await.unwrap();
        server.write_text(content, "partial").await.unwrap();

        client_t
            .send_text(encode_event(&Event::Interrupt {
                interrupt_type: crate::event::InterruptType::User,
            }))
            .await
            .unwrap();
        let event = server.next_client_event().await.unwrap().unwrap();
        assert!(matches!(event, ClientEvent::Interrupt { .. }));

        // The server's automatic OUTPUT_END should be waiting on the wire.
        match client_t.recv().await.unwrap() {
            crate::transport::Inbound::Frame(raw) => match decode_frame(raw).unwrap() {
                DecodedFrame::Event(Event::OutputEnd) => {}
                other => panic!("expected OUTPUT_END, got {other:?}"),
            },
            other => panic!("expected a frame, got {other:?}"),
        }

        // Further writes against the interrupted content are rejected.
        assert!(server.write_text(content, "too late").await.is_err());
    }
}
