//! HTTP + websocket front door for the telephony provider.
//!
//! `POST /incoming` answers the call webhook with TwiML that points the media
//! stream at `GET /connection`. Each websocket on `/connection` carries one
//! call and gets its own [`CallSession`].

use crate::call::{CallIdentity, CallSession, CallSummary, SessionSettings, TwilioTransport};
use crate::config::Config;
use crate::error::{Result, VoxlineError};
use crate::providers::Providers;
use crate::telephony::protocol::{InboundMessage, OutboundMessage};
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

const INBOUND_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 64;

/// Shared by every connection.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    settings: Arc<SessionSettings>,
    providers: Providers,
}

impl AppState {
    pub fn new(config: Config, providers: Providers) -> Self {
        Self {
            settings: Arc::new(SessionSettings::from_config(&config)),
            config: Arc::new(config),
            providers,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/incoming", post(incoming))
        .route("/connection", get(connection))
        .route("/health", get(health))
        .with_state(state)
}

/// TwiML connecting a call to the media stream endpoint on `host`.
pub fn twiml(host: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Connect><Stream url=\"wss://{}/connection\" /></Connect></Response>",
        host
    )
}

async fn incoming(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let host = state
        .config
        .server
        .public_host
        .clone()
        .or_else(|| {
            headers
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "localhost".to_string());

    tracing::info!(host = %host, "incoming call");
    ([(CONTENT_TYPE, "text/xml")], twiml(&host))
}

async fn health() -> &'static str {
    "ok"
}

async fn connection(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_BUFFER);

    let reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => match InboundMessage::parse(text.as_str()) {
                    Ok(message) => {
                        if inbound_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping malformed message"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "media stream socket error");
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(json.into())).await {
                tracing::debug!(error = %e, "media stream closed while sending");
                break;
            }
        }
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "media stream close failed");
        }
    });

    match run_call(&state, inbound_rx, outbound_tx).await {
        Ok(Some(summary)) => tracing::debug!(?summary, "connection finished"),
        Ok(None) => tracing::debug!("connection closed before call start"),
        Err(e) => tracing::error!(error = %e, "call session failed"),
    }

    reader.abort();
    if let Err(e) = writer.await {
        tracing::debug!(error = %e, "media stream writer ended abnormally");
    }
}

/// Wait for the start message, then run the call to completion.
async fn run_call(
    state: &AppState,
    mut inbound: mpsc::Receiver<InboundMessage>,
    outbound: mpsc::Sender<OutboundMessage>,
) -> Result<Option<CallSummary>> {
    let start = loop {
        match inbound.recv().await {
            Some(InboundMessage::Start { start }) => break start,
            Some(InboundMessage::Connected { .. }) => tracing::debug!("media stream connected"),
            Some(_) => tracing::debug!("ignoring media stream message before start"),
            None => return Ok(None),
        }
    };

    let identity = CallIdentity {
        call_sid: start.call_sid,
        stream_sid: start.stream_sid,
    };
    let span = tracing::info_span!(
        "call",
        call_sid = %identity.call_sid,
        stream_sid = %identity.stream_sid
    );

    async move {
        let recognizer = state.providers.recognizer.connect().await?;
        let transport = TwilioTransport::new(identity.stream_sid.clone(), outbound);
        let session = CallSession::new(
            identity,
            &state.settings,
            state.providers.model.clone(),
            state.providers.synthesizer.clone(),
            transport,
        );
        session.run(inbound, recognizer).await.map(Some)
    }
    .instrument(span)
    .await
}

/// Serve until Ctrl-C or SIGTERM.
pub async fn serve(config: Config, providers: Providers) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .map_err(|e| {
            VoxlineError::Other(format!("Failed to bind {}: {}", config.server.bind, e))
        })?;
    let addr = listener.local_addr()?;
    match &config.server.public_host {
        Some(host) => tracing::info!(%addr, public_host = %host, "listening"),
        None => tracing::info!(%addr, "listening (public host taken from request)"),
    }

    let app = router(AppState::new(config, providers));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Ctrl-C handler failed");
            }
            tracing::info!("received Ctrl-C, shutting down");
        }
        result = wait_for_sigterm() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| VoxlineError::Other(format!("Failed to register SIGTERM handler: {}", e)))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // On non-Unix, just wait forever (Ctrl+C will still work)
    std::future::pending::<Result<()>>().await
}
