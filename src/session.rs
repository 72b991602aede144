//! The session/request/stage/content state machine. Both drivers embed one
//! `Session` each; the machine itself doesn't know or care which endpoint
//! role owns it -- legality is the same shape on both sides, only which
//! events are "local" vs "remote" differs (and that distinction lives in
//! `client.rs`/`server.rs`, not here).

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::{ProtocolError, ValidationError};
use crate::event::{AudioFormat, ContentType, InputMode};

/// Negotiated session configuration, with the defaults from the wire spec.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    pub chat_id: Option<Uuid>,
    pub input_mode: InputMode,
    pub silence_duration: f64,
    pub audio_format: AudioFormat,
    pub output_text: bool,
    pub output_audio: bool,
    pub output_video: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
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
        }
    }
}

impl SessionOptions {
    /// `true` when the Client is the designated emitter of `InputEnd` (the
    /// `-1` sentinel: "client-device detects end-of-speech").
    pub fn client_emits_input_end(&self) -> bool {
        self.silence_duration == -1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Init,
    Configured,
    Ready,
    AwaitInputAudio,
    AwaitInputText,
    Responding,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentMeta {
    content_type: ContentType,
    stage_id: Uuid,
}

/// Per-request bookkeeping: which stages/contents have been announced, so
/// later events can be checked against invariants 1-4 from the data model.
#[derive(Debug, Default)]
struct RequestAnnouncements {
    stages: HashMap<Uuid, Option<Uuid>>,
    contents: HashMap<Uuid, ContentMeta>,
    function_call_done: HashSet<Uuid>,
    interrupted: bool,
}

impl RequestAnnouncements {
    fn announce_stage(&mut self, id: Uuid, parent_id: Option<Uuid>) -> Result<(), ProtocolError> {
        if self.stages.contains_key(&id) {
            return Err(ProtocolError::IllegalTransition(format!(
                "stage {id} announced twice"
            )));
        }
        if let Some(parent) = parent_id {
            if !self.stages.contains_key(&parent) {
                return Err(ProtocolError::unknown_stage(parent));
            }
        }
        self.stages.insert(id, parent_id);
        Ok(())
    }

    fn announce_content(
        &mut self,
        id: Uuid,
        stage_id: Uuid,
        content_type: ContentType,
    ) -> Result<(), ProtocolError> {
        if self.contents.contains_key(&id) {
            return Err(ProtocolError::IllegalTransition(format!(
                "content {id} announced twice"
            )));
        }
        if !self.stages.contains_key(&stage_id) {
            return Err(ProtocolError::unknown_stage(stage_id));
        }
        self.contents.insert(
            id,
            ContentMeta {
                content_type,
                stage_id,
            },
        );
        Ok(())
    }

    fn check_content(&self, id: Uuid, expected: ContentType) -> Result<(), ProtocolError> {
        match self.contents.get(&id) {
            None => Err(ProtocolError::unknown_content(id)),
            Some(meta) if meta.content_type != expected => Err(ProtocolError::IllegalTransition(
                format!(
                    "content {id} is {:?}, not {:?}",
                    meta.content_type, expected
                ),
            )),
            Some(_) => Ok(()),
        }
    }

    fn mark_function_call_done(&mut self, id: Uuid) -> Result<(), ProtocolError> {
        if !self.function_call_done.insert(id) {
            return Err(ProtocolError::IllegalTransition(format!(
                "content {id} already received its OUTPUT_FUNCTION_CALL"
            )));
        }
        Ok(())
    }
}

/// The state machine for one endpoint's view of one session.
#[derive(Debug)]
pub(crate) struct Session {
    phase: Phase,
    options: Option<SessionOptions>,
    chat_id: Option<Uuid>,
    request: Option<RequestAnnouncements>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: Phase::Init,
            options: None,
            chat_id: None,
            request: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == Phase::Terminated
    }

    pub fn options(&self) -> &SessionOptions {
        self.options
            .as_ref()
            .expect("session options read before CONFIG was processed")
    }

    pub fn chat_id(&self) -> Option<Uuid> {
        self.chat_id
    }

    pub fn configure(&mut self, options: SessionOptions) -> Result<(), ValidationError> {
        if self.phase != Phase::Init {
            return Err(ValidationError::WrongState(
                "CONFIG is only valid in INIT".into(),
            ));
        }
        self.chat_id = options.chat_id;
        self.options = Some(options);
        self.phase = Phase::Configured;
        Ok(())
    }

    pub fn server_ready(&mut self, chat_id: Uuid, request_id: Uuid) -> Result<(), ValidationError> {
        let _ = request_id;
        if !matches!(self.phase, Phase::Configured | Phase::Ready) {
            return Err(ValidationError::WrongState(
                "SERVER_READY is only valid in CONFIGURED or READY".into(),
            ));
        }
        self.chat_id = Some(chat_id);
        self.request = None;
        self.phase = Phase::Ready;
        Ok(())
    }

    /// Enter `AWAIT_INPUT(_TEXT)` for a new request, lazily, on the first
    /// input send/receive.
    pub fn begin_input(&mut self) -> Result<(), ValidationError> {
        if self.phase != Phase::Ready {
            return Err(ValidationError::WrongState(format!(
                "cannot begin a new request from phase {:?}",
                self.phase
            )));
        }
        self.phase = match self.options().input_mode {
            InputMode::Audio => Phase::AwaitInputAudio,
            InputMode::Text => Phase::AwaitInputText,
        };
        self.request = Some(RequestAnnouncements::default());
        Ok(())
    }

    pub fn input_end(&mut self) -> Result<(), ValidationError> {
        if !matches!(self.phase, Phase::AwaitInputAudio | Phase::AwaitInputText) {
            return Err(ValidationError::WrongState(
                "INPUT_END is only valid while awaiting input".into(),
            ));
        }
        self.phase = Phase::Responding;
        Ok(())
    }

    pub fn interrupt_allowed(&self) -> bool {
        matches!(
            self.phase,
            Phase::AwaitInputAudio | Phase::AwaitInputText | Phase::Responding
        )
    }

    pub fn mark_interrupted(&mut self) -> Result<(), ValidationError> {
        if !self.interrupt_allowed() {
            return Err(ValidationError::WrongState(
                "INTERRUPT is only valid during input or response".into(),
            ));
        }
        if let Some(req) = self.request.as_mut() {
            req.interrupted = true;
        }
        Ok(())
    }

    pub fn is_interrupted(&self) -> bool {
        self.request.as_ref().is_some_and(|r| r.interrupted)
    }

    /// Short-circuit to `READY` after an interrupt, from whichever phase the
    /// request was in (`AWAIT_INPUT*` or `RESPONDING`) -- an `OutputEnd` is
    /// always emitted to close the request out, per the interrupt semantics.
    pub fn force_output_end(&mut self) -> Result<(), ValidationError> {
        if !matches!(
            self.phase,
            Phase::AwaitInputAudio | Phase::AwaitInputText | Phase::Responding
        ) {
            return Err(ValidationError::WrongState(
                "no open request to end".into(),
            ));
        }
        self.phase = Phase::Ready;
        self.request = None;
        Ok(())
    }

    fn request_mut(&mut self) -> Result<&mut RequestAnnouncements, ProtocolError> {
        if self.phase != Phase::Responding {
            return Err(ProtocolError::IllegalTransition(format!(
                "not valid outside RESPONDING (currently {:?})",
                self.phase
            )));
        }
        self.request
            .as_mut()
            .ok_or_else(|| ProtocolError::IllegalTransition("no request in progress".into()))
    }

    pub fn announce_stage(
        &mut self,
        id: Uuid,
        parent_id: Option<Uuid>,
    ) -> Result<(), ProtocolError> {
        self.request_mut()?.announce_stage(id, parent_id)
    }

    pub fn announce_content(
        &mut self,
        id: Uuid,
        stage_id: Uuid,
        content_type: ContentType,
    ) -> Result<(), ProtocolError> {
        self.request_mut()?
            .announce_content(id, stage_id, content_type)
    }

    pub fn check_content_for_write(
        &self,
        id: Uuid,
        expected: ContentType,
    ) -> Result<(), ProtocolError> {
        if self.phase != Phase::Responding {
            return Err(ProtocolError::IllegalTransition(format!(
                "not valid outside RESPONDING (currently {:?})",
                self.phase
            )));
        }
        let request = self
            .request
            .as_ref()
            .ok_or_else(|| ProtocolError::IllegalTransition("no request in progress".into()))?;
        request.check_content(id, expected)
    }

    pub fn check_content_exists(&self, id: Uuid) -> Result<ContentType, ProtocolError> {
        let request = self
            .request
            .as_ref()
            .ok_or_else(|| ProtocolError::unknown_content(id))?;
        request
            .contents
            .get(&id)
            .map(|meta| meta.content_type)
            .ok_or(ProtocolError::unknown_content(id))
    }

    pub fn mark_function_call_done(&mut self, id: Uuid) -> Result<(), ProtocolError> {
        self.request_mut()?.mark_function_call_done(id)
    }

    pub fn output_end(&mut self) -> Result<(), ValidationError> {
        if self.phase != Phase::Responding {
            return Err(ValidationError::WrongState(
                "OUTPUT_END is only valid in RESPONDING".into(),
            ));
        }
        self.phase = Phase::Ready;
        self.request = None;
        Ok(())
    }

    pub fn terminate(&mut self) {
        self.phase = Phase::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_session(input_mode: InputMode, silence_duration: f64) -> Session {
        let mut session = Session::new();
        session
            .configure(SessionOptions {
                input_mode,
                silence_duration,
                ..SessionOptions::default()
            })
            .unwrap();
        session.server_ready(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        session
    }

    #[test]
    fn happy_path_text_request() {
        let mut session = ready_session(InputMode::Text, -1.0);
        session.begin_input().unwrap();
        assert_eq!(session.phase(), Phase::AwaitInputText);
        session.input_end().unwrap();
        assert_eq!(session.phase(), Phase::Responding);

        let stage = Uuid::new_v4();
        session.announce_stage(stage, None).unwrap();
        let content = Uuid::new_v4();
        session
            .announce_content(content, stage, ContentType::Text)
            .unwrap();
        session
            .check_content_for_write(content, ContentType::Text)
            .unwrap();
        session.output_end().unwrap();
        assert_eq!(session.phase(), Phase::Ready);
    }

    #[test]
    fn stage_referencing_unknown_parent_is_rejected() {
        let mut session = ready_session(InputMode::Text, -1.0);
        session.begin_input().unwrap();
        session.input_end().unwrap();
        let err = session.announce_stage(Uuid::new_v4(), Some(Uuid::new_v4()));
        assert!(err.is_err());
    }

    #[test]
    fn content_type_mismatch_is_rejected() {
        let mut session = ready_session(InputMode::Text, -1.0);
        session.begin_input().unwrap();
        session.input_end().unwrap();
        let stage = Uuid::new_v4();
        session.announce_stage(stage, None).unwrap();
        let content = Uuid::new_v4();
        session
            .announce_content(content, stage, ContentType::Audio)
            .unwrap();
        assert!(session
            .check_content_for_write(content, ContentType::Text)
            .is_err());
    }

    #[test]
    fn second_function_call_on_same_content_is_rejected() {
        let mut session = ready_session(InputMode::Text, -1.0);
        session.begin_input().unwrap();
        session.input_end().unwrap();
        let stage = Uuid::new_v4();
        session.announce_stage(stage, None).unwrap();
        let content = Uuid::new_v4();
        session
            .announce_content(content, stage, ContentType::FunctionCall)
            .unwrap();
        session.mark_function_call_done(content).unwrap();
        assert!(session.mark_function_call_done(content).is_err());
    }

    #[test]
    fn output_end_returns_to_ready_and_forgets_request() {
        let mut session = ready_session(InputMode::Text, -1.0);
        session.begin_input().unwrap();
        session.input_end().unwrap();
        session.output_end().unwrap();
        assert_eq!(session.phase(), Phase::Ready);
        assert!(session.check_content_exists(Uuid::new_v4()).is_err());
    }

    #[test]
    fn interrupt_short_circuits_to_ready() {
        let mut session = ready_session(InputMode::Audio, -1.0);
        session.begin_input().unwrap();
        assert!(session.interrupt_allowed());
        session.mark_interrupted().unwrap();
        session.force_output_end().unwrap();
        assert_eq!(session.phase(), Phase::Ready);
    }

    #[test]
    fn cannot_begin_input_before_server_ready() {
        let mut session = Session::new();
        session.configure(SessionOptions::default()).unwrap();
        assert!(session.begin_input().is_err());
    }
}
