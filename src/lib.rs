//! A bidirectional, mixed-modality chat protocol engine: event taxonomy,
//! wire codec, transport-agnostic session state machine, and the Client and
//! Server drivers built on top of it.

pub mod client;
pub mod codec;
pub mod error;
pub mod event;
pub mod server;
mod session;
pub mod transport;

pub use client::{ClientDriver, ServerEvent};
pub use codec::MediaChunk;
pub use error::{EngineError, EngineResult};
pub use event::{AudioFormat, ContentType, Event, EventType, InputMode, InterruptType, VideoFormat};
pub use server::{ClientEvent, ServerDriver};
pub use session::SessionOptions;
pub use transport::Transport;

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use uuid::Uuid;

    use crate::client::ClientDriver;
    use crate::event::{ContentType, Event, InputMode};
    use crate::server::{ClientEvent, ServerDriver};
    use crate::session::SessionOptions;
    use crate::transport::mem;

    #[tokio::test]
    async fn server_detected_silence_drives_input_end_from_the_server() {
        let (client_t, server_t) = mem::pair();
        let mut client = ClientDriver::new(client_t);
        let mut server = ServerDriver::new(server_t);

        let options = SessionOptions {
            input_mode: InputMode::Audio,
            silence_duration: 300.0,
            ..SessionOptions::default()
        };

        let server_task = tokio::spawn(async move {
            let ClientEvent::Config(opts) = server.next_client_event().await.unwrap().unwrap()
            else {
                panic!("expected CONFIG");
            };
            server.ready(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
            let ClientEvent::Media(_) = server.next_client_event().await.unwrap().unwrap() else {
                panic!("expected an audio chunk");
            };
            assert_eq!(opts.silence_duration, 300.0);
            // The server detects 300ms of silence and ends the input itself.
            server.end_input_detected().await.unwrap();
            let stage = server.stage(None, "answer", "").await.unwrap();
            let content = server.audio_content(stage, opts.audio_format).await.unwrap();
            server
                .write_media(content, ContentType::Audio, Bytes::from_static(b"pcm"))
                .await
                .unwrap();
            server.end_output().await.unwrap();
            server.end_session().await.unwrap();
        });

        client.configure(options).await.unwrap();
        client
            .send_audio_chunk(Bytes::from_static(b"raw-audio"))
            .await
            .unwrap();

        let mut saw_output_end = false;
        while let Some(event) = client.next_event().await.unwrap() {
            if let crate::client::ServerEvent::Event(Event::OutputEnd) = event {
                saw_output_end = true;
            }
            if let crate::client::ServerEvent::Event(Event::SessionEnd) = event {
                break;
            }
        }
        assert!(saw_output_end);
        server_task.await.unwrap();
    }
}
