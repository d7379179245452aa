//! Remote event stream.
//!
//! WebSocket client for the drive event push channel. Frames carry a JSON
//! envelope with `header.event_type` and an event payload; the payload
//! adapter tolerates both `file_token` and `document_id` field names.
//! Reconnects with exponential backoff.

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use feishu_sync_core::block::FileType;
use feishu_sync_core::ProcessorHandle;

/// Event push gateway.
pub const DEFAULT_EVENT_ENDPOINT: &str = "wss://open.feishu.cn/callback/ws/v2";

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Delay before reconnect `attempt` (1-based): doubling from the initial
/// delay, capped.
fn reconnect_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = INITIAL_RECONNECT_DELAY.as_secs_f64() * 2f64.powi(exp as i32);
    Duration::from_secs_f64(delay.min(MAX_RECONNECT_DELAY.as_secs_f64()))
}

#[derive(Debug, Deserialize)]
struct EventFrame {
    header: EventHeader,
    #[serde(default)]
    event: Value,
}

#[derive(Debug, Deserialize)]
struct EventHeader {
    event_type: String,
}

/// Extract the document id from an event payload, whichever field carries
/// it.
fn document_id_of(event: &Value) -> Option<String> {
    event
        .get("file_token")
        .or_else(|| event.get("document_id"))
        .and_then(Value::as_str)
        .map(String::from)
}

fn file_type_of(event: &Value) -> Option<FileType> {
    event
        .get("file_type")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

/// WebSocket subscriber forwarding drive events into the change processor.
pub struct EventStream {
    url: String,
    handle: ProcessorHandle,
}

impl EventStream {
    /// Build the stream against the default gateway with app credentials.
    pub fn new(client_id: &str, client_secret: &str, handle: ProcessorHandle) -> Self {
        let url = format!("{DEFAULT_EVENT_ENDPOINT}?app_id={client_id}&app_secret={client_secret}");
        Self { url, handle }
    }

    pub fn with_url(url: impl Into<String>, handle: ProcessorHandle) -> Self {
        Self {
            url: url.into(),
            handle,
        }
    }

    /// Run the connect/read loop until the process shuts down.
    pub async fn run(self) {
        let mut attempt = 0u32;
        loop {
            match connect_async(&self.url).await {
                Ok((mut ws, _)) => {
                    info!("Event stream connected");
                    attempt = 0;
                    self.read_loop(&mut ws).await;
                    warn!("Event stream disconnected");
                }
                Err(e) => {
                    error!("Event stream connect failed: {e}");
                }
            }
            attempt += 1;
            let delay = reconnect_delay(attempt);
            info!("Reconnecting event stream in {delay:?} (attempt {attempt})");
            tokio::time::sleep(delay).await;
        }
    }

    async fn read_loop<S>(&self, ws: &mut S)
    where
        S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        while let Some(message) = ws.next().await {
            let data = match message {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(_)) => {
                    debug!("Event stream received close frame");
                    break;
                }
                Err(e) => {
                    error!("Event stream error: {e}");
                    break;
                }
            };
            self.dispatch(&data);
        }
    }

    /// Parse one frame and forward it; malformed frames are logged and
    /// dropped.
    fn dispatch(&self, data: &str) {
        let frame: EventFrame = match serde_json::from_str(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Ignoring unparseable event frame: {e}");
                return;
            }
        };
        let Some(document_id) = document_id_of(&frame.event) else {
            debug!(
                "Event {} carries no document id; ignoring",
                frame.header.event_type
            );
            return;
        };
        let file_type = file_type_of(&frame.event);
        debug!("Event {} for {document_id}", frame.header.event_type);
        self.handle
            .remote_event(&frame.header.event_type, document_id, file_type);
    }
}
