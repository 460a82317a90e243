//! Integration tests for the command surface
//!
//! Runs the JSON endpoint on an ephemeral port and drives it both directly
//! and through the native-messaging bridge framing.

use eridanus::command::{nmh, router, Command};
use eridanus::storage::Storage;
use std::io::Cursor;
use std::sync::Arc;
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
async fn test_bridge_forwards_commands_and_frames_replies() {
    let (_dir, endpoint) = spawn_endpoint().await;

    let request = nmh::Message {
        commands: vec![
            Command::new("init", vec![]),
            Command::new("unknown", vec!["payload".to_string()]),
        ],
    };
    let mut input = Vec::new();
    nmh::write_message(&mut input, &request).await.unwrap();

    let mut reader = Cursor::new(input);
    let mut output = Vec::new();
    let client = reqwest::Client::new();
    nmh::run(&mut reader, &mut output, &endpoint, &client)
        .await
        .unwrap();

    let mut replies = Cursor::new(output);
    let message = nmh::read_message(&mut replies).await.unwrap().unwrap();
    assert_eq!(message.commands.len(), 2);
    assert_eq!(message.commands[0].cmd, "classes");
    assert!(message.commands[0]
        .data
        .contains(&"Hentai-Foundry Post".to_string()));
    assert_eq!(
        message.commands[1],
        Command::new("hello", vec!["world".to_string()])
    );
    // Nothing further is framed after the replies.
    assert!(nmh::read_message(&mut replies).await.unwrap().is_none());
}

#[tokio::test]
async fn test_bridge_terminates_cleanly_on_eof() {
    let (_dir, endpoint) = spawn_endpoint().await;
    let mut reader = Cursor::new(Vec::<u8>::new());
    let mut output = Vec::new();
    let client = reqwest::Client::new();
    nmh::run(&mut reader, &mut output, &endpoint, &client)
        .await
        .unwrap();
    assert!(output.is_empty());
}

#[tokio::test]
async fn test_endpoint_status_codes() {
    let (_dir, endpoint) = spawn_endpoint().await;
    let client = reqwest::Client::new();

    let ok = client
        .post(&endpoint)
        .body(r#"{"cmd":"init","data":[]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status().as_u16(), 200);

    let bad = client.post(&endpoint).body("{nope").send().await.unwrap();
    assert_eq!(bad.status().as_u16(), 400);
}
