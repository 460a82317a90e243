//! JSON command endpoint
//!
//! One POST route accepting a [`Command`](super::Command) body and replying
//! in kind: 400 for malformed JSON, 500 for handler failures, 200
//! otherwise.

use super::{dispatch, Command};
use crate::storage::Storage;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;

/// Builds the command router over the given store.
pub fn router(storage: Arc<Storage>) -> Router {
    Router::new().route("/", post(handle)).with_state(storage)
}

async fn handle(State(storage): State<Arc<Storage>>, body: String) -> Response {
    let command: Command = match serde_json::from_str(&body) {
        Ok(command) => command,
        Err(err) => {
            tracing::debug!("malformed command: {}", err);
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };

    match dispatch(&storage, &command) {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(err) => {
            tracing::error!("command {:?} failed: {}", command.cmd, err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// Serves the command endpoint until the shutdown future resolves.
pub async fn serve(
    storage: Arc<Storage>,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!("command endpoint on {}", listener.local_addr()?);
    axum::serve(listener, router(storage))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn spawn_endpoint() -> (TempDir, String) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(storage)).await.unwrap();
        });
        (dir, format!("http://{}/", addr))
    }

    #[tokio::test]
    async fn test_init_lists_classes() {
        let (_dir, endpoint) = spawn_endpoint().await;
        let client = reqwest::Client::new();
        let reply: Command = client
            .post(&endpoint)
            .json(&Command::new("init", vec![]))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply.cmd, "classes");
        assert!(reply.data.contains(&"Hentai-Foundry Post".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_command_is_hello_world() {
        let (_dir, endpoint) = spawn_endpoint().await;
        let client = reqwest::Client::new();
        let response = client
            .post(&endpoint)
            .body(r#"{"cmd":"whatever","data":["a"]}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let reply: Command = response.json().await.unwrap();
        assert_eq!(reply, Command::new("hello", vec!["world".to_string()]));
    }

    #[tokio::test]
    async fn test_malformed_json_is_400() {
        let (_dir, endpoint) = spawn_endpoint().await;
        let client = reqwest::Client::new();
        let response = client
            .post(&endpoint)
            .body("this is not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }
}
