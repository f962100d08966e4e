//! Streaming session handle and the socket read loop behind it.
//!
//! One session owns one vendor connection. The caller appends text and
//! drains audio chunks; a background reader owns the socket read half and
//! feeds a bounded channel. Session states: opening → ready → active →
//! finalizing → terminated.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::cosyvoice::{control_frame, ServerEvent};
use super::error::TtsError;
use super::normalize::normalize;
use super::types::{SpeechStreamChunk, SpeechStreamMetadata};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;

/// Per-message read deadline on the vendor socket. A consumer that stalls
/// long enough to saturate the audio channel leaves the reader blocked on
/// the channel send; the deadline is not refreshed meanwhile, so the
/// connection eventually errors out and terminates the session.
pub(crate) const READ_DEADLINE: Duration = Duration::from_secs(75);
/// Bounds producer/consumer skew on the audio channel.
pub(crate) const AUDIO_CHANNEL_CAPACITY: usize = 8;

// ── Shared State ───────────────────────────────────────

/// State shared between the session handle and its reader task.
#[derive(Default, Debug)]
pub(crate) struct StreamShared {
    /// First recorded error wins; later ones are dropped.
    error: StdMutex<Option<TtsError>>,
    terminated: AtomicBool,
    sequence: AtomicU64,
}

impl StreamShared {
    pub(crate) fn record_error(&self, err: TtsError) {
        if let Ok(mut slot) = self.error.lock() {
            if slot.is_none() {
                *slot = Some(err);
            }
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Everything the reader task needs. Dropping `audio_tx` at the end of the
/// loop is what closes the audio channel, exactly once.
pub(crate) struct ReaderWiring {
    pub audio_tx: mpsc::Sender<SpeechStreamChunk>,
    pub shared: Arc<StreamShared>,
    pub ready_tx: Option<oneshot::Sender<()>>,
    pub cancel_rx: watch::Receiver<bool>,
    pub done_tx: watch::Sender<bool>,
}

// ── Session Handle ─────────────────────────────────────

/// Caller-owned handle to one duplex synthesis session.
#[derive(Debug)]
pub struct SpeechStreamSession {
    metadata: SpeechStreamMetadata,
    task_id: String,
    writer: Arc<Mutex<WsSink>>,
    audio_rx: mpsc::Receiver<SpeechStreamChunk>,
    shared: Arc<StreamShared>,
    cancel_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    finalized: AtomicBool,
    closed: AtomicBool,
}

impl SpeechStreamSession {
    pub(crate) fn new(
        metadata: SpeechStreamMetadata,
        task_id: String,
        writer: Arc<Mutex<WsSink>>,
    ) -> (Self, ReaderWiring, oneshot::Receiver<()>) {
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let shared = Arc::new(StreamShared::default());
        let session = Self {
            metadata,
            task_id,
            writer,
            audio_rx,
            shared: shared.clone(),
            cancel_tx,
            done_rx,
            finalized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        let wiring = ReaderWiring {
            audio_tx,
            shared,
            ready_tx: Some(ready_tx),
            cancel_rx,
            done_tx,
        };
        (session, wiring, ready_rx)
    }

    pub fn metadata(&self) -> &SpeechStreamMetadata {
        &self.metadata
    }

    /// Next audio chunk, or `None` once the channel has closed.
    pub async fn next_chunk(&mut self) -> Option<SpeechStreamChunk> {
        self.audio_rx.recv().await
    }

    /// The session's first recorded error, observable without blocking.
    pub fn err(&self) -> Option<TtsError> {
        self.shared
            .error
            .lock()
            .map(|slot| slot.clone())
            .unwrap_or(None)
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }

    /// Wait for final termination (clean or aborted; check [`err`] after).
    pub async fn done(&self) {
        let mut rx = self.done_rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Send one more text segment into the running task.
    pub async fn append_text(&self, text: &str) -> Result<(), TtsError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TtsError::Cancelled);
        }
        if self.finalized.load(Ordering::SeqCst) {
            return Err(TtsError::InvalidInput(
                "stream already finalized".to_string(),
            ));
        }
        if self.is_terminated() {
            return Err(self
                .err()
                .unwrap_or_else(|| TtsError::Transport("stream already terminated".to_string())));
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(TtsError::empty_text());
        }
        let frame = control_frame(
            "continue-task",
            &self.task_id,
            serde_json::json!({"input": {"text": normalize(trimmed)}}),
        );
        self.write_frame(frame).await
    }

    /// Signal end of input. Idempotent: only the first call writes
    /// `finish-task`; every call flips the flag that rejects later appends.
    pub async fn finalize(&self) -> Result<(), TtsError> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.is_terminated() {
            return Ok(());
        }
        let frame = control_frame(
            "finish-task",
            &self.task_id,
            serde_json::json!({"input": {}}),
        );
        self.write_frame(frame).await
    }

    async fn write_frame(&self, frame: Message) -> Result<(), TtsError> {
        let mut writer = self.writer.lock().await;
        writer.send(frame).await.map_err(|e| {
            let err = TtsError::Transport(format!("websocket write failed: {}", e));
            self.shared.record_error(err.clone());
            err
        })
    }

    /// Tear the session down. Idempotent; pending reads and blocked channel
    /// sends are preempted.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.cancel_tx.send(true);
        let mut writer = self.writer.lock().await;
        let _ = writer.close().await;
    }
}

impl Drop for SpeechStreamSession {
    fn drop(&mut self) {
        // Unblocks the reader even when the caller never called close.
        let _ = self.cancel_tx.send(true);
    }
}

// ── Socket Read Loop ───────────────────────────────────

/// Owns the socket read half until the session terminates. Binary frames
/// become sequence-numbered chunks on the bounded channel; text frames
/// drive the session state machine.
pub(crate) async fn read_loop(mut read: WsSource, mut wiring: ReaderWiring) {
    loop {
        let next = tokio::select! {
            _ = wiring.cancel_rx.changed() => break,
            timed = tokio::time::timeout(READ_DEADLINE, read.next()) => timed,
        };
        let frame = match next {
            Err(_) => {
                wiring
                    .shared
                    .record_error(TtsError::Timeout("cosyvoice read deadline exceeded".to_string()));
                break;
            }
            // EOF counts as a normal close.
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                if !is_normal_close(&e) {
                    wiring
                        .shared
                        .record_error(TtsError::Transport(format!("websocket read failed: {}", e)));
                }
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Binary(data) => {
                if data.is_empty() {
                    continue;
                }
                let chunk = SpeechStreamChunk {
                    sequence: wiring.shared.next_sequence(),
                    audio: data,
                };
                let delivered = tokio::select! {
                    _ = wiring.cancel_rx.changed() => false,
                    sent = wiring.audio_tx.send(chunk) => sent.is_ok(),
                };
                if !delivered {
                    break;
                }
            }
            Message::Text(raw) => match ServerEvent::parse(&raw) {
                ServerEvent::Started | ServerEvent::Meta => {
                    if let Some(tx) = wiring.ready_tx.take() {
                        let _ = tx.send(());
                    }
                }
                ServerEvent::Finished => break,
                ServerEvent::Failed { code, message } => {
                    wiring.shared.record_error(TtsError::Remote(format!(
                        "cosyvoice task failed: {} ({})",
                        message, code
                    )));
                    break;
                }
                ServerEvent::Other => {}
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    wiring.shared.terminated.store(true, Ordering::SeqCst);
    let _ = wiring.done_tx.send(true);
    // wiring.audio_tx drops here, closing the audio channel exactly once.
}

fn is_normal_close(err: &tokio_tungstenite::tungstenite::Error) -> bool {
    use tokio_tungstenite::tungstenite::Error;
    match err {
        Error::ConnectionClosed | Error::AlreadyClosed => true,
        Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        Error::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}
