use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::program::{OfflineEntry, Program};

/// Bump when the wire format changes in a breaking way. `streamctl` checks
/// the daemon's `Hello` against this.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Requests sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Request {
    Load { source: String },
    Play,
    Pause,
    PlayPause,
    Stop,
    SetPosition { fraction: f64 },
    /// Call-state signal from whatever watches the phone line.
    CallState { state: CallState },
    Status,
    /// Day schedule; `None` asks for the daemon's local today.
    FetchSchedule {
        #[serde(default)]
        date: Option<NaiveDate>,
    },
    ListOffline,
    AddOffline { program: Program },
    RemoveOffline { id: i64, day_label: String },
    Shutdown,
}

/// Exactly one response is written per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply")]
pub enum Response {
    /// Sent on connect, before any request.
    Hello { protocol_version: u32 },
    /// Result of a playback command. `applied == false` means "not handled"
    /// in the current state.
    Outcome { applied: bool },
    Status { data: StatusSnapshot },
    Schedule { programs: Vec<Program> },
    Offline { entries: Vec<OfflineEntry> },
    Added { entry: OfflineEntry },
    Removed { entry: Option<OfflineEntry> },
    Error { message: String },
}

/// Playback session state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
}

/// Telephone call state delivered by the interruption source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Ringing,
    OffHook,
    Idle,
}

impl std::str::FromStr for CallState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ringing" => Ok(Self::Ringing),
            "offhook" | "off-hook" => Ok(Self::OffHook),
            "idle" => Ok(Self::Idle),
            other => Err(format!("unknown call state '{}'", other)),
        }
    }
}

/// Result of a duration/position query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "ms")]
pub enum Timing {
    /// Nothing loaded (`Idle`/`Loading`).
    Unknown,
    /// A program is loaded but paused.
    Unavailable,
    Millis(i32),
}

impl Timing {
    pub fn millis(&self) -> Option<i32> {
        match self {
            Timing::Millis(ms) => Some(*ms),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub state: PlaybackState,
    pub source: Option<String>,
    pub is_live: bool,
    pub duration: Timing,
    pub position: Timing,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// `u32` big-endian length prefix followed by the JSON body.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        if json.len() > MAX_FRAME_LEN {
            anyhow::bail!("frame of {} bytes exceeds limit", json.len());
        }
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decode one frame from the front of `data`. `Ok(None)` means more bytes
    /// are needed; the `usize` is the number of bytes consumed.
    pub fn decode(data: &[u8]) -> anyhow::Result<Option<(Self, usize)>> {
        if data.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("frame of {} bytes exceeds limit", len);
        }
        if data.len() < 4 + len {
            return Ok(None);
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok(Some((msg, 4 + len)))
    }
}
