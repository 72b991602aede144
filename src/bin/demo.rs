//! Runs one text-only session between a `ClientDriver` and a `ServerDriver`
//! wired together over an in-memory transport pair, to exercise the engine
//! end to end without a real socket.

use duplexchat::{ClientDriver, ClientEvent, Event, InputMode, ServerDriver, ServerEvent, SessionOptions};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(EnvFilter::new("info")))
        .init();

    let (client_transport, server_transport) = duplexchat::transport::mem::pair();
    let mut client = ClientDriver::new(client_transport);
    let mut server = ServerDriver::new(server_transport);

    let server_task = tokio::spawn(async move {
        loop {
            match server.next_client_event().await? {
                Some(ClientEvent::Config(_)) => {
                    server.ready(Uuid::new_v4(), Uuid::new_v4()).await?;
                }
                Some(ClientEvent::InputText { data }) => {
                    info!(%data, "server received input");
                }
                Some(ClientEvent::InputEnd) => {
                    let stage = server.stage(None, "answer", "").await?;
                    let content = server.text_content(stage).await?;
                    server.write_text(content, "hello from the server").await?;
                    server.end_output().await?;
                }
                Some(ClientEvent::SessionEnd) => {
                    server.end_session().await?;
                    break;
                }
                Some(ClientEvent::Interrupt { .. }) | Some(ClientEvent::Media(_)) => {}
                None => break,
            }
        }
        Ok::<_, anyhow::Error>(())
    });

    client
        .configure(SessionOptions {
            input_mode: InputMode::Text,
            ..SessionOptions::default()
        })
        .await?;
    client.send_text("hello").await?;
    client.end_input().await?;

    while let Some(event) = client.next_event().await? {
        match event {
            ServerEvent::Event(Event::OutputText { data, .. }) => info!(%data, "client received output"),
            ServerEvent::Event(Event::OutputEnd) => break,
            _ => {}
        }
    }
    client.end_session().await?;

    server_task.await??;
    Ok(())
}
