pub mod assets;
pub mod capture;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod console;
pub mod data_url;
pub mod grading;
pub mod sequencer;
pub mod session;
pub mod status;
pub mod surface;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{stream::StreamExt, SinkExt};
use poem::{
    endpoint::StaticFilesEndpoint,
    get, handler,
    listener::TcpListener,
    web::{
        websocket::{Message, WebSocket},
        Data, Query,
    },
    EndpointExt, IntoResponse, Route, Server,
};
use serde::Deserialize;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, info, span, warn, Instrument};

use crate::assets::{AssetLoader, HttpAssets};
use crate::capture::RecorderEvent;
use crate::config::{Api, Assets, Speech, SETTINGS};
use crate::console::SpellConsole;
use crate::grading::GradingClient;
use crate::session::{microphone_error, post, ClientEvent, ServerEvent, WsMicrophone, WsSurface};

pub(crate) fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct Context {
    assets: Arc<dyn AssetLoader>,
    grader: Arc<GradingClient>,
    locale: String,
}

impl Context {
    pub fn new(api: &Api, assets: &Assets, speech: &Speech) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(api.timeout()).build()?;
        Ok(Self {
            assets: Arc::new(HttpAssets::new(client.clone(), assets)?),
            grader: Arc::new(GradingClient::new(client, api)?),
            locale: speech.locale.clone(),
        })
    }
}

#[derive(Deserialize, Debug)]
pub struct SpellQuery {
    spell: Option<String>,
}

async fn dispatch(console: &SpellConsole, mic: &WsMicrophone, evt: ClientEvent) {
    match evt {
        ClientEvent::Hello { supported_types } => {
            debug!("page supports {supported_types:?}");
            mic.set_supported(supported_types);
        }
        ClientEvent::Cast { spell } => {
            console.cast(&spell).await;
        }
        ClientEvent::Record => {
            // Opening the microphone waits on an answer that arrives through
            // this same loop.
            let console = console.clone();
            tokio::spawn(async move { console.toggle_recording().await });
        }
        ClientEvent::Microphone { granted: true, .. } => mic.answer(Ok(())),
        ClientEvent::Microphone { error, message, .. } => {
            mic.answer(Err(microphone_error(error.as_deref(), message.as_deref())));
        }
        ClientEvent::RecorderStopped { mime_type } => {
            mic.deliver(RecorderEvent::Stopped { mime_type }).await;
        }
        ClientEvent::RecorderError { message } => {
            mic.deliver(RecorderEvent::Error(message)).await;
        }
        speech => {
            if let Some(evt) = speech.speech() {
                console.on_speech(evt).await;
            }
        }
    }
}

#[handler]
pub async fn stream_spell(
    ctx: Data<&Context>,
    query: Query<SpellQuery>,
    ws: WebSocket,
) -> impl IntoResponse {
    let ctx = ctx.0.clone();
    let span = span!(tracing::Level::TRACE, "spell_session", spell = ?query.spell);
    ws.on_upgrade(|mut socket| async move {
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<ServerEvent>();
        let mic = Arc::new(WsMicrophone::new(outbox.clone()));
        let console = SpellConsole::new(
            Arc::new(WsSurface::new(outbox.clone())),
            ctx.assets.clone(),
            mic.clone(),
            ctx.grader.clone(),
        );

        post(&outbox, ServerEvent::Ready { locale: ctx.locale.clone() });
        if console.preselect(query.spell.as_deref()).await {
            post(&outbox, ServerEvent::StripQuery { param: "spell".to_string() });
        }
        console.ready().await;

        let fut = async {
            loop {
                select! {
                    msg = socket.next() => {
                        let Some(res) = msg else { break };
                        let msg = res?;
                        if msg.is_close() {
                            break
                        }
                        match msg {
                            Message::Binary(bin) => {
                                mic.deliver(RecorderEvent::Data(bin)).await;
                            }
                            Message::Text(text) => {
                                let Ok(evt) = serde_json::from_str::<ClientEvent>(&text) else {
                                    warn!("unknown client event: {text}");
                                    continue
                                };
                                dispatch(&console, &mic, evt).await;
                            }
                            other => debug!("Other: {:?}", other),
                        }
                    },
                    output = outbox_rx.recv() => {
                        let Some(evt) = output else { break };
                        let Ok(json) = serde_json::to_string(&evt) else {
                            warn!("failed to serialize json: {:?}", evt);
                            continue
                        };
                        socket.send(Message::Text(json)).await?
                    },
                }
            }
            Ok::<(), anyhow::Error>(())
        };

        let res = fut.await;
        mic.close();
        console.shutdown().await;
        match res {
            Ok(()) => {
                info!("spell session closed");
            }
            Err(e) => {
                warn!("spell session error: {}", e);
            }
        }
    }.instrument(span))
}

pub async fn app() -> anyhow::Result<()> {
    let ctx = Context::new(&SETTINGS.api, &SETTINGS.assets, &SETTINGS.speech)?;

    let app = Route::new()
        .nest(
            "/static",
            StaticFilesEndpoint::new("./static").show_files_listing(),
        )
        .at("/ws/spell", get(stream_spell))
        .data(ctx);
    let addr = format!("{}:{}", SETTINGS.server.host, SETTINGS.server.port);
    info!("listening on {addr}");
    let listener = TcpListener::bind(addr);
    let server = Server::new(listener);

    Ok(server.run(app).await?)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use poem::listener::{Acceptor, Listener};
    use tokio::time::sleep;
    use tokio_tungstenite::{connect_async, tungstenite};

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[tracing_test::traced_test]
    async fn session_logs_inside_its_span() {
        let ctx = Context::new(
            &Api { base_url: "http://127.0.0.1:9".to_string(), timeout_secs: 1 },
            &Assets { base_url: "http://127.0.0.1:9".to_string(), path: "/static/anime/".to_string() },
            &Speech { locale: "en-GB".to_string() },
        )
        .unwrap();
        let acceptor = TcpListener::bind("127.0.0.1:0").into_acceptor().await.unwrap();
        let addr = acceptor.local_addr().remove(0).as_socket_addr().cloned().unwrap();
        let handle = tokio::spawn(async move {
            let _ = Server::new_with_acceptor(acceptor)
                .run(Route::new().at("/ws/spell", get(stream_spell)).data(ctx))
                .await;
        });

        let (mut client, _) = connect_async(format!("ws://{addr}/ws/spell")).await.unwrap();
        let Some(Ok(tungstenite::Message::Text(first))) = client.next().await else {
            panic!("expected a ready event");
        };
        assert_eq!(
            serde_json::from_str::<ServerEvent>(&first).unwrap(),
            ServerEvent::Ready { locale: "en-GB".to_string() }
        );
        client.close(None).await.unwrap();

        for _ in 0..100 {
            if logs_contain("spell session closed") {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        logs_assert(|lines: &[&str]| {
            lines
                .iter()
                .find(|line| line.contains("spell session closed"))
                .filter(|line| line.contains("spell_session"))
                .map(|_| ())
                .ok_or_else(|| "session close was logged outside its span".to_string())
        });
        handle.abort();
    }
}
