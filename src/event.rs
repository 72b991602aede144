//! The event taxonomy: stable integer enum codes, the closed `Event` sum
//! type, and the wire schema each variant validates against.
//!
//! The wire tag (`event_type`) is an integer, not a string, so this module
//! cannot lean on serde's `#[serde(tag = "...")]` (which matches tags
//! against variant names). Instead `Event` serializes through `WireEvent`,
//! a flat struct holding every possible field as `Option`, with `TryFrom`
//! in one direction and a plain conversion in the other -- the same
//! "enum + TryFrom<u8>" shape used for `Contract` in wire-format crates
//! elsewhere in this ecosystem.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProtocolError;

macro_rules! stable_enum {
    ($name:ident { $($variant:ident = $code:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn code(self) -> u8 {
                match self {
                    $(Self::$variant => $code),+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = ProtocolError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($code => Ok(Self::$variant),)+
                    other => Err(ProtocolError::MalformedEvent(format!(
                        concat!("unknown ", stringify!($name), " code: {}"),
                        other
                    ))),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_u8(self.code())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let code = u8::deserialize(deserializer)?;
                $name::try_from(code).map_err(serde::de::Error::custom)
            }
        }
    };
}

stable_enum!(InputMode { Audio = 0, Text = 1 });

stable_enum!(ContentType {
    Audio = 0,
    Video = 1,
    Text = 2,
    FunctionCall = 3,
});

stable_enum!(InterruptType { User = 0, System = 1 });

stable_enum!(EventType {
    Config = 0,
    InputText = 1,
    InputMedia = 2,
    InputEnd = 3,
    Interrupt = 4,
    ServerReady = 5,
    OutputTranscription = 6,
    OutputStage = 7,
    OutputTextContent = 8,
    OutputFunctionCallContent = 9,
    OutputAudioContent = 10,
    OutputVideoContent = 11,
    OutputContentAddition = 12,
    OutputText = 13,
    OutputMedia = 14,
    OutputFunctionCall = 15,
    OutputEnd = 16,
    SessionEnd = 17,
});

/// Audio format negotiated for a session or carried by an audio content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub nchannels: u32,
    pub sample_rate: u32,
    pub sample_width: u32,
}

/// Video format carried by a video content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

/// The closed set of structured (text-frame) events.
///
/// `event_type` 2 (`INPUT_MEDIA`) and 14 (`OUTPUT_MEDIA`) are reserved codes
/// for binary frames and never appear here -- see [`crate::codec::MediaChunk`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Config {
        chat_id: Option<Uuid>,
        input_mode: InputMode,
        silence_duration: f64,
        audio_format: AudioFormat,
        output_text: bool,
        output_audio: bool,
        output_video: bool,
    },
    InputText {
        data: String,
    },
    InputEnd,
    Interrupt {
        interrupt_type: InterruptType,
    },
    ServerReady {
        chat_id: Uuid,
        request_id: Uuid,
    },
    OutputTranscription {
        transcription: Value,
    },
    OutputStage {
        id: Uuid,
        parent_id: Option<Uuid>,
        title: String,
        description: String,
    },
    OutputTextContent {
        id: Uuid,
        stage_id: Uuid,
    },
    OutputFunctionCallContent {
        id: Uuid,
        stage_id: Uuid,
    },
    OutputAudioContent {
        id: Uuid,
        stage_id: Uuid,
        format: AudioFormat,
    },
    OutputVideoContent {
        id: Uuid,
        stage_id: Uuid,
        format: VideoFormat,
    },
    OutputContentAddition {
        content_id: Uuid,
        metadata: Value,
    },
    OutputText {
        content_id: Uuid,
        data: String,
    },
    OutputFunctionCall {
        content_id: Uuid,
        data: String,
    },
    OutputEnd,
    SessionEnd,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Config { .. } => EventType::Config,
            Event::InputText { .. } => EventType::InputText,
            Event::InputEnd => EventType::InputEnd,
            Event::Interrupt { .. } => EventType::Interrupt,
            Event::ServerReady { .. } => EventType::ServerReady,
            Event::OutputTranscription { .. } => EventType::OutputTranscription,
            Event::OutputStage { .. } => EventType::OutputStage,
            Event::OutputTextContent { .. } => EventType::OutputTextContent,
            Event::OutputFunctionCallContent { .. } => EventType::OutputFunctionCallContent,
            Event::OutputAudioContent { .. } => EventType::OutputAudioContent,
            Event::OutputVideoContent { .. } => EventType::OutputVideoContent,
            Event::OutputContentAddition { .. } => EventType::OutputContentAddition,
            Event::OutputText { .. } => EventType::OutputText,
            Event::OutputFunctionCall { .. } => EventType::OutputFunctionCall,
            Event::OutputEnd => EventType::OutputEnd,
            Event::SessionEnd => EventType::SessionEnd,
        }
    }
}

/// Flat wire representation: every field any variant might need, as
/// `Option`. `event_type` selects which fields are required.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireEvent {
    pub event_type: u8,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chat_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub input_mode: Option<InputMode>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub silence_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nchannels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sample_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output_text: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output_audio: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output_video: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub interrupt_type: Option<InterruptType>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transcription: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<Option<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub content_type: Option<ContentType>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stage_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<Value>,
}

impl WireEvent {
    fn bare(event_type: EventType) -> Self {
        Self {
            event_type: event_type.code(),
            chat_id: None,
            request_id: None,
            input_mode: None,
            silence_duration: None,
            nchannels: None,
            sample_rate: None,
            sample_width: None,
            output_text: None,
            output_audio: None,
            output_video: None,
            data: None,
            interrupt_type: None,
            transcription: None,
            id: None,
            parent_id: None,
            title: None,
            description: None,
            content_type: None,
            stage_id: None,
            fps: None,
            width: None,
            height: None,
            content_id: None,
            metadata: None,
        }
    }

    fn require<T>(field: &'static str, value: Option<T>) -> Result<T, ProtocolError> {
        value.ok_or_else(|| ProtocolError::MalformedEvent(format!("missing field `{field}`")))
    }
}

impl From<&Event> for WireEvent {
    fn from(event: &Event) -> Self {
        let mut wire = WireEvent::bare(event.event_type());
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
                wire.chat_id = *chat_id;
                wire.input_mode = Some(*input_mode);
                wire.silence_duration = Some(*silence_duration);
                wire.nchannels = Some(audio_format.nchannels);
                wire.sample_rate = Some(audio_format.sample_rate);
                wire.sample_width = Some(audio_format.sample_width);
                wire.output_text = Some(*output_text);
                wire.output_audio = Some(*output_audio);
                wire.output_video = Some(*output_video);
            }
            Event::InputText { data } => wire.data = Some(data.clone()),
            Event::InputEnd => {}
            Event::Interrupt { interrupt_type } => wire.interrupt_type = Some(*interrupt_type),
            Event::ServerReady {
                chat_id,
                request_id,
            } => {
                wire.chat_id = Some(*chat_id);
                wire.request_id = Some(*request_id);
            }
            Event::OutputTranscription { transcription } => {
                wire.transcription = Some(transcription.clone())
            }
            Event::OutputStage {
                id,
                parent_id,
                title,
                description,
            } => {
                wire.id = Some(*id);
                wire.parent_id = Some(*parent_id);
                wire.title = Some(title.clone());
                wire.description = Some(description.clone());
            }
            Event::OutputTextContent { id, stage_id } => {
                wire.id = Some(*id);
                wire.stage_id = Some(*stage_id);
                wire.content_type = Some(ContentType::Text);
            }
            Event::OutputFunctionCallContent { id, stage_id } => {
                wire.id = Some(*id);
                wire.stage_id = Some(*stage_id);
                wire.content_type = Some(ContentType::FunctionCall);
            }
            Event::OutputAudioContent {
                id,
                stage_id,
                format,
            } => {
                wire.id = Some(*id);
                wire.stage_id = Some(*stage_id);
                wire.content_type = Some(ContentType::Audio);
                wire.nchannels = Some(format.nchannels);
                wire.sample_rate = Some(format.sample_rate);
                wire.sample_width = Some(format.sample_width);
            }
            Event::OutputVideoContent {
                id,
                stage_id,
                format,
            } => {
                wire.id = Some(*id);
                wire.stage_id = Some(*stage_id);
                wire.content_type = Some(ContentType::Video);
                wire.fps = Some(format.fps);
                wire.width = Some(format.width);
                wire.height = Some(format.height);
            }
            Event::OutputContentAddition {
                content_id,
                metadata,
            } => {
                wire.content_id = Some(*content_id);
                wire.metadata = Some(metadata.clone());
            }
            Event::OutputText { content_id, data } => {
                wire.content_id = Some(*content_id);
                wire.data = Some(data.clone());
            }
            Event::OutputFunctionCall { content_id, data } => {
                wire.content_id = Some(*content_id);
                wire.data = Some(data.clone());
            }
            Event::OutputEnd => {}
            Event::SessionEnd => {}
        }
        wire
    }
}

impl TryFrom<WireEvent> for Event {
    type Error = ProtocolError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let event_type = EventType::try_from(wire.event_type)?;
        Ok(match event_type {
            EventType::Config => {
                let silence_duration = WireEvent::require("silence_duration", wire.silence_duration)?;
                if silence_duration != -1.0 && silence_duration < 0.0 {
                    return Err(ProtocolError::MalformedEvent(format!(
                        "silence_duration {silence_duration} is invalid (must be -1 or >= 0)"
                    )));
                }
                Event::Config {
                    chat_id: wire.chat_id,
                    input_mode: WireEvent::require("input_mode", wire.input_mode)?,
                    silence_duration,
                    audio_format: AudioFormat {
                        nchannels: WireEvent::require("nchannels", wire.nchannels)?,
                        sample_rate: WireEvent::require("sample_rate", wire.sample_rate)?,
                        sample_width: WireEvent::require("sample_width", wire.sample_width)?,
                    },
                    output_text: WireEvent::require("output_text", wire.output_text)?,
                    output_audio: WireEvent::require("output_audio", wire.output_audio)?,
                    output_video: WireEvent::require("output_video", wire.output_video)?,
                }
            }
            EventType::InputText => Event::InputText {
                data: WireEvent::require("data", wire.data)?,
            },
            EventType::InputMedia | EventType::OutputMedia => {
                return Err(ProtocolError::MalformedEvent(
                    "media events never appear as text frames".into(),
                ))
            }
            EventType::InputEnd => Event::InputEnd,
            EventType::Interrupt => Event::Interrupt {
                interrupt_type: WireEvent::require("interrupt_type", wire.interrupt_type)?,
            },
            EventType::ServerReady => Event::ServerReady {
                chat_id: WireEvent::require("chat_id", wire.chat_id)?,
                request_id: WireEvent::require("request_id", wire.request_id)?,
            },
            EventType::OutputTranscription => Event::OutputTranscription {
                transcription: WireEvent::require("transcription", wire.transcription)?,
            },
            EventType::OutputStage => Event::OutputStage {
                id: WireEvent::require("id", wire.id)?,
                parent_id: wire.parent_id.flatten(),
                title: WireEvent::require("title", wire.title)?,
                description: WireEvent::require("description", wire.description)?,
            },
            EventType::OutputTextContent => {
                let content_type = WireEvent::require("type", wire.content_type)?;
                if content_type != ContentType::Text {
                    return Err(ProtocolError::MalformedEvent(
                        "OUTPUT_TEXT_CONTENT must carry type=TEXT".into(),
                    ));
                }
                Event::OutputTextContent {
                    id: WireEvent::require("id", wire.id)?,
                    stage_id: WireEvent::require("stage_id", wire.stage_id)?,
                }
            }
            EventType::OutputFunctionCallContent => {
                let content_type = WireEvent::require("type", wire.content_type)?;
                if content_type != ContentType::FunctionCall {
                    return Err(ProtocolError::MalformedEvent(
                        "OUTPUT_FUNCTION_CALL_CONTENT must carry type=FUNCTION_CALL".into(),
                    ));
                }
                Event::OutputFunctionCallContent {
                    id: WireEvent::require("id", wire.id)?,
                    stage_id: WireEvent::require("stage_id", wire.stage_id)?,
                }
            }
            EventType::OutputAudioContent => {
                let content_type = WireEvent::require("type", wire.content_type)?;
                if content_type != ContentType::Audio {
                    return Err(ProtocolError::MalformedEvent(
                        "OUTPUT_AUDIO_CONTENT must carry type=AUDIO".into(),
                    ));
                }
                Event::OutputAudioContent {
                    id: WireEvent::require("id", wire.id)?,
                    stage_id: WireEvent::require("stage_id", wire.stage_id)?,
                    format: AudioFormat {
                        nchannels: WireEvent::require("nchannels", wire.nchannels)?,
                        sample_rate: WireEvent::require("sample_rate", wire.sample_rate)?,
                        sample_width: WireEvent::require("sample_width", wire.sample_width)?,
                    },
                }
            }
            EventType::OutputVideoContent => {
                let content_type = WireEvent::require("type", wire.content_type)?;
                if content_type != ContentType::Video {
                    return Err(ProtocolError::MalformedEvent(
                        "OUTPUT_VIDEO_CONTENT must carry type=VIDEO".into(),
                    ));
                }
                Event::OutputVideoContent {
                    id: WireEvent::require("id", wire.id)?,
                    stage_id: WireEvent::require("stage_id", wire.stage_id)?,
                    format: VideoFormat {
                        fps: WireEvent::require("fps", wire.fps)?,
                        width: WireEvent::require("width", wire.width)?,
                        height: WireEvent::require("height", wire.height)?,
                    },
                }
            }
            EventType::OutputContentAddition => Event::OutputContentAddition {
                content_id: WireEvent::require("content_id", wire.content_id)?,
                metadata: wire.metadata.unwrap_or(Value::Null),
            },
            EventType::OutputText => Event::OutputText {
                content_id: WireEvent::require("content_id", wire.content_id)?,
                data: WireEvent::require("data", wire.data)?,
            },
            EventType::OutputFunctionCall => Event::OutputFunctionCall {
                content_id: WireEvent::require("content_id", wire.content_id)?,
                data: WireEvent::require("data", wire.data)?,
            },
            EventType::OutputEnd => Event::OutputEnd,
            EventType::SessionEnd => Event::SessionEnd,
        })
    }
}
