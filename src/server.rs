use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::llm::LanguageModel;
use crate::session::ChatSession;
use crate::Result;

const LOG_TAIL: usize = 20;

const EMPTY_PREVIEW: &str = "<!doctype html>\n<html><body><p>No blog content generated yet. Ask something to start!</p></body></html>";

/// HTTP front end over a shared [`ChatSession`].
pub struct ChatServer<M: LanguageModel + ?Sized + 'static> {
    session: Arc<ChatSession<M>>,
}

impl<M: LanguageModel + ?Sized + 'static> Clone for ChatServer<M> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<M: LanguageModel + ?Sized + 'static> ChatServer<M> {
    pub fn new(session: Arc<ChatSession<M>>) -> Self {
        Self { session }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
            .route("/chat", post(chat::<M>))
            .route("/clear", post(clear::<M>))
            .route("/tools", get(list_tools::<M>))
            .route("/logs", get(recent_logs::<M>))
            .route("/events", get(stream_events::<M>))
            .route("/preview", get(preview::<M>))
            .with_state(self.clone())
    }

    /// Serves on an already bound listener until ctrl-c, then closes the
    /// session's MCP connections.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "chat server listening");
        axum::serve(listener, self.router().into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        self.session.shutdown().await;
        Ok(())
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn chat<M: LanguageModel + ?Sized + 'static>(
    State(state): State<ChatServer<M>>,
    body: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let message = match body {
        Ok(Json(ChatRequest {
            message: Some(message),
        })) if !message.trim().is_empty() => message,
        _ => return error_response(StatusCode::BAD_REQUEST, "No message provided"),
    };

    match state.session.handle(&message).await {
        Ok(reply) => Json(json!({ "response": reply.text() })).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn clear<M: LanguageModel + ?Sized + 'static>(
    State(state): State<ChatServer<M>>,
) -> impl IntoResponse {
    state.session.clear().await;
    Json(json!({ "message": "Conversation history cleared" }))
}

async fn list_tools<M: LanguageModel + ?Sized + 'static>(
    State(state): State<ChatServer<M>>,
) -> impl IntoResponse {
    Json(state.session.tools().to_vec())
}

async fn recent_logs<M: LanguageModel + ?Sized + 'static>(
    State(state): State<ChatServer<M>>,
) -> impl IntoResponse {
    Json(state.session.activity().recent(LOG_TAIL))
}

async fn stream_events<M: LanguageModel + ?Sized + 'static>(
    State(state): State<ChatServer<M>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.session.activity().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|entry| async move {
        let entry = entry.ok()?;
        Event::default().json_data(&entry).ok().map(Ok)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn preview<M: LanguageModel + ?Sized + 'static>(
    State(state): State<ChatServer<M>>,
) -> Response {
    match state.session.latest_html().await {
        Some(html) => Html(html).into_response(),
        None => (StatusCode::NOT_FOUND, Html(EMPTY_PREVIEW)).into_response(),
    }
}
