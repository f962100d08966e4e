//! Shared fixtures: an in-process fake WebSocket vendor and driver builders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use crate::tts::{CosyVoiceConfig, CosyVoiceDriver, QiniuConfig, QiniuDriver};

/// Client control actions the fake vendor observed.
#[derive(Default)]
pub struct VendorCounters {
    pub run_task: AtomicUsize,
    pub continue_task: AtomicUsize,
    pub finish_task: AtomicUsize,
}

pub enum VendorBehavior {
    /// `task-started` plus the given binary frames on `run-task`;
    /// `task-finished` on `finish-task`.
    Happy(Vec<Vec<u8>>),
    /// `task-failed` immediately after `run-task`.
    FailTask { code: String, message: String },
}

/// Serve exactly one duplex connection with the scripted behaviour.
/// Returns the `ws://` URL and the action counters.
pub async fn spawn_fake_vendor(behavior: VendorBehavior) -> (String, Arc<VendorCounters>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake vendor");
    let addr = listener.local_addr().expect("fake vendor addr");
    let counters = Arc::new(VendorCounters::default());
    let seen = counters.clone();

    tokio::spawn(async move {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        let Ok(ws) = tokio_tungstenite::accept_async(socket).await else {
            return;
        };
        let (mut write, mut read) = ws.split();
        while let Some(Ok(frame)) = read.next().await {
            let Message::Text(raw) = frame else { continue };
            let action = serde_json::from_str::<serde_json::Value>(&raw)
                .ok()
                .and_then(|v| v["header"]["action"].as_str().map(str::to_string))
                .unwrap_or_default();
            match action.as_str() {
                "run-task" => {
                    seen.run_task.fetch_add(1, Ordering::SeqCst);
                    match &behavior {
                        VendorBehavior::Happy(chunks) => {
                            let _ = write.send(event_frame("task-started")).await;
                            for chunk in chunks {
                                let _ = write.send(Message::Binary(chunk.clone())).await;
                            }
                        }
                        VendorBehavior::FailTask { code, message } => {
                            let _ = write.send(failed_frame(code, message)).await;
                            break;
                        }
                    }
                }
                "continue-task" => {
                    seen.continue_task.fetch_add(1, Ordering::SeqCst);
                }
                "finish-task" => {
                    seen.finish_task.fetch_add(1, Ordering::SeqCst);
                    let _ = write.send(event_frame("task-finished")).await;
                    break;
                }
                _ => {}
            }
        }
        let _ = write.close().await;
    });

    (format!("ws://{}/inference", addr), counters)
}

fn event_frame(event: &str) -> Message {
    Message::Text(
        serde_json::json!({"header": {"task_id": "t", "event": event}}).to_string(),
    )
}

fn failed_frame(code: &str, message: &str) -> Message {
    Message::Text(
        serde_json::json!({
            "header": {
                "task_id": "t",
                "event": "task-failed",
                "error_code": code,
                "error_message": message,
            }
        })
        .to_string(),
    )
}

pub fn cosy_driver(ws_url: &str) -> CosyVoiceDriver {
    CosyVoiceDriver::new(cosy_config(ws_url, "test-key"), test_http_client())
}

pub fn cosy_config(ws_url: &str, api_key: &str) -> CosyVoiceConfig {
    CosyVoiceConfig {
        ws_url: ws_url.to_string(),
        api_key: api_key.to_string(),
        workspace: String::new(),
        data_inspection: String::new(),
        model: "cosyvoice-v1".to_string(),
        default_voice: "longwan".to_string(),
        format: "mp3".to_string(),
        sample_rate: 22050,
        volume: 50,
    }
}

pub fn qiniu_config(base: &str, backup: &str, api_key: &str) -> QiniuConfig {
    QiniuConfig {
        base_url: base.to_string(),
        backup_url: backup.to_string(),
        api_key: api_key.to_string(),
        model: "tts".to_string(),
        response_format: "mp3".to_string(),
        default_voice: "qiniu_zh_female_tmjxxy".to_string(),
    }
}

pub fn qiniu_driver(base: &str, backup: &str) -> QiniuDriver {
    QiniuDriver::new(qiniu_config(base, backup, "test-key"), test_http_client())
}

/// A no-proxy client so a system proxy never intercepts localhost mocks.
pub fn test_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("build test client")
}
