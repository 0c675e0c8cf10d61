//! Mock USP Service
//!
//! A local WebSocket server that speaks enough USP to exercise the client:
//! it records the upgrade headers of each connection, reassembles uploaded
//! audio per connection and answers every end-of-audio frame with a full
//! recognition turn. Other modes refuse or stall the upgrade.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

use usp_client::core::usp::messages::{decode_audio_message, encode_text_message, paths};

/// How the mock answers connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMode {
    /// Complete the handshake and run recognition turns
    Accept,
    /// Answer the upgrade with this HTTP status instead of 101
    RejectUpgrade(u16),
    /// Accept TCP and never answer the upgrade
    Blackhole,
    /// Like `Accept`, but every phrase reports a recognition error
    ServiceError,
    /// Close the socket right after `speech.config` arrives
    CloseAfterConfig,
    /// Like `Accept`, but the upgrade is answered only after this delay
    DelayUpgrade(Duration),
}

/// What one client connection sent
#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    pub connection_id: Option<String>,
    pub subscription_key: Option<String>,
    pub authorization: Option<String>,
    pub speech_config: Option<String>,
    pub audio: Vec<u8>,
    pub audio_messages: usize,
    pub end_of_audio_count: usize,
    pub request_ids: Vec<String>,
}

#[derive(Default)]
struct MockState {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    connections: AtomicU64,
}

/// Running mock server; stops when dropped
pub struct MockUspService {
    addr: SocketAddr,
    mode: MockMode,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockUspService {
    pub async fn start(mode: MockMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState::default());

        let server_state = state.clone();
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                let id = server_state.connections.fetch_add(1, Ordering::SeqCst);
                match mode {
                    MockMode::Blackhole => held.push(stream),
                    MockMode::RejectUpgrade(status) => {
                        tokio::spawn(reject_upgrade(stream, status));
                    }
                    _ => {
                        let state = server_state.clone();
                        tokio::spawn(async move {
                            let _ = handle_connection(stream, id, mode, state).await;
                        });
                    }
                }
            }
        });

        Self {
            addr,
            mode,
            state,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!(
            "ws://{}/speech/recognition/interactive/cognitiveservices/v1",
            self.addr
        )
    }

    /// TCP connections accepted so far
    pub fn connection_count(&self) -> u64 {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn session(&self, connection_id: &str) -> Option<SessionRecord> {
        self.state.sessions.lock().get(connection_id).cloned()
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.state.sessions.lock().values().cloned().collect()
    }

    /// Wait until a session has received at least `len` audio bytes
    pub async fn wait_for_audio(&self, connection_id: &str, len: usize) -> Option<SessionRecord> {
        self.wait_until(connection_id, |s| s.audio.len() >= len).await
    }

    /// Wait until a session satisfies `predicate`, for up to ten seconds
    pub async fn wait_until(
        &self,
        connection_id: &str,
        predicate: impl Fn(&SessionRecord) -> bool,
    ) -> Option<SessionRecord> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(session) = self.session(connection_id) {
                if predicate(&session) {
                    return Some(session);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return self.session(connection_id);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockUspService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn reject_upgrade(mut stream: TcpStream, status: u16) {
    // Drain the request head before answering
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let reason = http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nLocation: https://www.example.com/\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn header(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn handle_connection(
    stream: TcpStream,
    id: u64,
    mode: MockMode,
    state: Arc<MockState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let MockMode::DelayUpgrade(delay) = mode {
        tokio::time::sleep(delay).await;
    }

    let mut record = SessionRecord::default();
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        record.connection_id = header(req, "X-ConnectionId");
        record.subscription_key = header(req, "Ocp-Apim-Subscription-Key");
        record.authorization = header(req, "Authorization");
        Ok(resp)
    })
    .await?;

    let key = record
        .connection_id
        .clone()
        .unwrap_or_else(|| format!("anonymous-{id}"));
    state.sessions.lock().insert(key.clone(), record);

    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                if text.as_str().contains("Path:speech.config") {
                    let body = text
                        .as_str()
                        .split_once("\r\n\r\n")
                        .map(|(_, b)| b.to_string())
                        .unwrap_or_default();
                    if let Some(session) = state.sessions.lock().get_mut(&key) {
                        session.speech_config = Some(body);
                    }
                    if mode == MockMode::CloseAfterConfig {
                        write.send(Message::Close(None)).await?;
                        return Ok(());
                    }
                }
            }
            Message::Binary(data) => {
                let frame = decode_audio_message(&data)?;
                let request_id = frame.header("X-RequestId").unwrap_or_default().to_string();

                let received = {
                    let mut sessions = state.sessions.lock();
                    let Some(session) = sessions.get_mut(&key) else {
                        continue;
                    };
                    session.audio_messages += 1;
                    if !session.request_ids.contains(&request_id) {
                        session.request_ids.push(request_id.clone());
                    }
                    if frame.is_end_of_audio() {
                        session.end_of_audio_count += 1;
                    } else {
                        session.audio.extend_from_slice(&frame.payload);
                    }
                    session.audio.len()
                };

                if frame.is_end_of_audio() {
                    for reply in recognition_turn(&request_id, received, mode) {
                        write.send(Message::Text(reply.into())).await?;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    Ok(())
}

/// Frames answering one finished audio stream
fn recognition_turn(request_id: &str, received: usize, mode: MockMode) -> Vec<String> {
    let text = format!("Received {received} bytes.");
    let phrase = if mode == MockMode::ServiceError {
        json!({"RecognitionStatus": "Error", "Offset": 0, "Duration": 0})
    } else {
        json!({
            "RecognitionStatus": "Success",
            "DisplayText": text,
            "Offset": 500000,
            "Duration": 10000000,
        })
    };

    vec![
        encode_text_message(paths::TURN_START, request_id, r#"{"context":{"serviceTag":"mock"}}"#),
        encode_text_message(paths::SPEECH_START_DETECTED, request_id, r#"{"Offset":500000}"#),
        encode_text_message(
            paths::SPEECH_HYPOTHESIS,
            request_id,
            &json!({"Text": "received", "Offset": 500000, "Duration": 5000000}).to_string(),
        ),
        encode_text_message(paths::SPEECH_PHRASE, request_id, &phrase.to_string()),
        encode_text_message(paths::SPEECH_END_DETECTED, request_id, r#"{"Offset":10500000}"#),
        encode_text_message(paths::TURN_END, request_id, "{}"),
    ]
}
