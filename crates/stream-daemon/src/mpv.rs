//! mpv-backed media transport: one mpv process per loaded program, driven
//! over its JSON IPC socket by separated reader/writer tasks.
//!
//! ```text
//!   MpvFactory::create(events)
//!         │
//!         ├── mpv process     (--idle=yes, own socket per generation)
//!         ├── writer_task     ← MpvRequest via mpsc, serialised → socket
//!         ├── reader_task     ← JSON lines from socket
//!         │                       ├── response (request_id) → matched oneshot
//!         │                       └── event / property-change → mpv_events
//!         └── translator_task ← mpv_events → TransportEvent → EventSink
//! ```
//!
//! Platform notes:
//! - Unix:    Unix domain sockets
//! - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stream_proto::config::MpvConfig;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::transport::{EventSink, MediaTransport, TransportError, TransportEvent, TransportFactory};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// observe_property id for `pause`.
const OBS_PAUSE: u64 = 1;

/// mpv's reply when a property has no value yet (nothing loaded, live
/// stream without a length, ...).
const PROPERTY_UNAVAILABLE: &str = "property unavailable";

type ReplyResult = Result<Value, TransportError>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<ReplyResult>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<ReplyResult>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

/// Map an mpv event onto what the controller cares about.
pub fn translate(event: &MpvEvent) -> Option<TransportEvent> {
    if let Some((id, data)) = event.as_property_change() {
        if id == OBS_PAUSE {
            let paused = data.as_bool()?;
            return Some(if paused {
                TransportEvent::Paused
            } else {
                TransportEvent::Playing
            });
        }
        return None;
    }
    match event.event_name()? {
        "end-file" => match event.raw.get("reason").and_then(|r| r.as_str()) {
            Some("eof") => Some(TransportEvent::EndReached),
            Some("error") => {
                let detail = event
                    .raw
                    .get("file_error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("playback error");
                Some(TransportEvent::Error(detail.to_string()))
            }
            // "stop", "quit" and "redirect" come from our own commands.
            _ => Some(TransportEvent::Stopped),
        },
        "playback-restart" => Some(TransportEvent::Playing),
        _ => None,
    }
}

// ── IPC handle ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> ReplyResult {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg).map_err(|e| TransportError::Ipc(e.to_string()))?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| TransportError::Closed)?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| TransportError::Ipc(format!("timeout for req={}", req_id)))?
            .map_err(|_| TransportError::Closed)?
    }

    pub async fn set_pause(&self, paused: bool) -> Result<(), TransportError> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    /// Seconds, converted to milliseconds. An unavailable property reads as 0.
    pub async fn get_millis(&self, property: &str) -> Result<i64, TransportError> {
        match self.send(json!(["get_property", property])).await {
            Ok(resp) => Ok(resp["data"]
                .as_f64()
                .map(|secs| (secs * 1000.0).round() as i64)
                .unwrap_or(0)),
            Err(TransportError::Engine(e)) if e == PROPERTY_UNAVAILABLE => Ok(0),
            Err(e) => Err(e),
        }
    }
}

fn start_io_tasks<S>(stream: S, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

#[cfg(unix)]
async fn connect_ipc(
    socket_name: &str,
    event_tx: mpsc::Sender<MpvEvent>,
) -> Result<MpvHandle, TransportError> {
    let socket_path = std::path::Path::new(socket_name);
    for _ in 0..50 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        if socket_path.exists() {
            break;
        }
    }
    if !socket_path.exists() {
        return Err(TransportError::Spawn("mpv IPC socket did not appear".into()));
    }
    let stream = UnixStream::connect(socket_path).await?;
    info!("mpv: connected to {}", socket_name);
    Ok(start_io_tasks(stream, event_tx))
}

#[cfg(windows)]
async fn connect_ipc(
    socket_name: &str,
    event_tx: mpsc::Sender<MpvEvent>,
) -> Result<MpvHandle, TransportError> {
    let pipe_path = format!(r"\\.\pipe\{}", socket_name);
    for _ in 0..50 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        if let Ok(client) = ClientOptions::new().open(&pipe_path) {
            info!("mpv: connected to named pipe {}", pipe_path);
            return Ok(start_io_tasks(client, event_tx));
        }
    }
    Err(TransportError::Spawn("mpv named pipe did not appear".into()))
}

// ── factory ───────────────────────────────────────────────────────────────────

pub struct MpvFactory {
    config: MpvConfig,
    next_socket: u64,
}

impl MpvFactory {
    pub fn new(config: MpvConfig) -> Self {
        Self {
            config,
            next_socket: 0,
        }
    }

    fn spawn_process(&self, socket_name: &str) -> Result<tokio::process::Child, TransportError> {
        let mpv_binary = stream_proto::platform::find_mpv_binary()
            .ok_or_else(|| TransportError::Spawn("mpv binary not found".into()))?;

        let vol_arg = format!(
            "--volume={}",
            (self.config.default_volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let cache_arg = format!(
            "--cache-secs={}",
            self.config.network_caching_ms as f64 / 1000.0
        );

        tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(stream_proto::platform::mpv_socket_arg(socket_name))
            .arg("--quiet")
            .arg(vol_arg)
            .arg(cache_arg)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn(e.to_string()))
    }
}

#[async_trait]
impl TransportFactory for MpvFactory {
    async fn create(&mut self, events: EventSink) -> Result<Box<dyn MediaTransport>, TransportError> {
        self.next_socket += 1;
        let socket_name = stream_proto::platform::mpv_socket_name(self.next_socket);
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&socket_name).await;

        info!("mpv: spawning transport #{}", events.generation());
        let mut process = self.spawn_process(&socket_name)?;

        let (event_tx, event_rx) = mpsc::channel(64);
        let handle = match connect_ipc(&socket_name, event_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                let _ = process.kill().await;
                return Err(e);
            }
        };
        if let Err(e) = handle.send(json!(["observe_property", OBS_PAUSE, "pause"])).await {
            warn!("mpv: observe_property pause failed: {}", e);
        }
        let translator = tokio::spawn(translator_task(event_rx, events));

        Ok(Box::new(MpvTransport {
            handle,
            process: Some(process),
            socket_name,
            translator,
        }))
    }
}

// ── transport ─────────────────────────────────────────────────────────────────

pub struct MpvTransport {
    handle: MpvHandle,
    process: Option<tokio::process::Child>,
    socket_name: String,
    translator: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl MediaTransport for MpvTransport {
    async fn load(&mut self, source: &str) -> Result<(), TransportError> {
        // Loaded paused; the controller starts it once the leases are held.
        self.handle.set_pause(true).await?;
        self.handle.send(json!(["loadfile", source])).await?;
        Ok(())
    }

    async fn play(&mut self) -> Result<(), TransportError> {
        self.handle.set_pause(false).await
    }

    async fn pause(&mut self) -> Result<(), TransportError> {
        self.handle.set_pause(true).await
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        self.handle.send(json!(["stop"])).await?;
        Ok(())
    }

    async fn seek(&mut self, fraction: f64) -> Result<(), TransportError> {
        self.handle
            .send(json!(["seek", fraction * 100.0, "absolute-percent"]))
            .await?;
        Ok(())
    }

    async fn duration(&mut self) -> Result<i64, TransportError> {
        self.handle.get_millis("duration").await
    }

    async fn position(&mut self) -> Result<i64, TransportError> {
        self.handle.get_millis("time-pos").await
    }

    async fn release(&mut self) -> Result<(), TransportError> {
        self.translator.abort();
        let _ = self.handle.send(json!(["quit"])).await;
        if let Some(mut process) = self.process.take() {
            let _ = process.kill().await;
        }
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_name).await;
        debug!("mpv: released {}", self.socket_name);
        Ok(())
    }
}

async fn translator_task(mut rx: mpsc::Receiver<MpvEvent>, sink: EventSink) {
    while let Some(event) = rx.recv().await {
        if let Some(translated) = translate(&event) {
            debug!("mpv: transport #{} {:?}", sink.generation(), translated);
            if !sink.emit(translated) {
                break;
            }
        }
    }
    debug!("mpv: translator #{} exiting", sink.generation());
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn fail_all(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(TransportError::Ipc(reason.to_string())));
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error");
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(TransportError::Engine(err.to_string()))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, &e.to_string()).await;
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(TransportError::Ipc(e.to_string())));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn test_end_file_reasons() {
        assert_eq!(
            translate(&event(json!({"event": "end-file", "reason": "eof"}))),
            Some(TransportEvent::EndReached)
        );
        assert_eq!(
            translate(&event(json!({"event": "end-file", "reason": "stop"}))),
            Some(TransportEvent::Stopped)
        );
        assert_eq!(
            translate(&event(
                json!({"event": "end-file", "reason": "error", "file_error": "loading failed"})
            )),
            Some(TransportEvent::Error("loading failed".into()))
        );
    }

    #[test]
    fn test_pause_property_changes() {
        let paused = json!({"event": "property-change", "id": OBS_PAUSE, "name": "pause", "data": true});
        let resumed = json!({"event": "property-change", "id": OBS_PAUSE, "name": "pause", "data": false});
        assert_eq!(translate(&event(paused)), Some(TransportEvent::Paused));
        assert_eq!(translate(&event(resumed)), Some(TransportEvent::Playing));

        let other = json!({"event": "property-change", "id": 99, "data": true});
        assert_eq!(translate(&event(other)), None);
    }

    #[test]
    fn test_uninteresting_events_are_dropped() {
        assert_eq!(translate(&event(json!({"event": "file-loaded"}))), None);
        assert_eq!(translate(&event(json!({"no_event": 1}))), None);
        assert_eq!(
            translate(&event(json!({"event": "playback-restart"}))),
            Some(TransportEvent::Playing)
        );
    }

    #[tokio::test]
    async fn test_ipc_round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let handle = start_io_tasks(client, event_tx);

        // Minimal mpv stand-in: answer every request, then push one event.
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["request_id"].as_u64().unwrap();
                let reply = match req["command"][1].as_str() {
                    Some("duration") => json!({"request_id": id, "error": "success", "data": 12.5}),
                    Some("time-pos") => json!({"request_id": id, "error": PROPERTY_UNAVAILABLE}),
                    _ => json!({"request_id": id, "error": "invalid parameter"}),
                };
                let out = format!("{}\n{}\n", reply, json!({"event": "end-file", "reason": "eof"}));
                write_half.write_all(out.as_bytes()).await.unwrap();
            }
        });

        assert_eq!(handle.get_millis("duration").await.unwrap(), 12_500);
        assert_eq!(handle.get_millis("time-pos").await.unwrap(), 0);
        assert!(matches!(
            handle.send(json!(["bogus", "x"])).await,
            Err(TransportError::Engine(_))
        ));

        let pushed = event_rx.recv().await.unwrap();
        assert_eq!(translate(&pushed), Some(TransportEvent::EndReached));
    }
}
