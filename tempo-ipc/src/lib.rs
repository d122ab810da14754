//! Inter-process communication between the tempo daemon and its clients.
//!
//! We use Unix domain sockets for local IPC - they're fast, secure,
//! and perfect for this use case. Messages are newline-delimited JSON,
//! one value per line in either direction. The wire tags on [`Command`]
//! and [`Event`] are the logical channel names of the timer protocol.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const SOCKET_PATH: &str = "/tmp/tempo.sock";

/// Storage key under which the client keeps its persisted timer snapshot.
pub const STATE_KEY: &str = "global_pomodoro_timer_current_instance";

pub const DEFAULT_POMODORO_MS: u64 = 25 * 60 * 1000;
pub const DEFAULT_BREAK_MS: u64 = 5 * 60 * 1000;

/// Shortest session length either side will accept.
pub const MIN_DURATION_MS: u64 = 60 * 1000;

/// Tray label shown when no countdown is live.
pub const IDLE_DISPLAY: &str = "--:--:--";

pub const TICK_EVENT: &str = "pomodoro-timer-tick";
pub const COMPLETED_EVENT: &str = "pomodoro-timer-completed";

/// Which kind of session the timer is counting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    Pomodoro,
    Break,
}

impl TimerMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pomodoro" => Some(Self::Pomodoro),
            "break" => Some(Self::Break),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pomodoro => "pomodoro",
            Self::Break => "break",
        }
    }
}

impl std::fmt::Display for TimerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The timer state snapshot shared by the daemon and its clients.
///
/// Field names on the wire and on disk are the historical camelCase keys,
/// so a snapshot serializes to the same JSON layout the persisted entry
/// uses. `sessionStartTime` is ISO-8601 (chrono's default) or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    #[serde(rename = "currentTaskId")]
    pub current_task_id: Option<String>,
    #[serde(rename = "isRunning")]
    pub is_running: bool,
    #[serde(rename = "activeMode")]
    pub active_mode: TimerMode,
    #[serde(rename = "remainingTime")]
    pub remaining_ms: u64,
    #[serde(rename = "sessionStartTime")]
    pub session_start: Option<DateTime<Utc>>,
    #[serde(rename = "pomodoroDuration")]
    pub pomodoro_ms: u64,
    #[serde(rename = "breakDuration")]
    pub break_ms: u64,
}

impl TimerSnapshot {
    /// Configured session length for the given mode.
    pub fn duration_for(&self, mode: TimerMode) -> u64 {
        match mode {
            TimerMode::Pomodoro => self.pomodoro_ms,
            TimerMode::Break => self.break_ms,
        }
    }
}

impl Default for TimerSnapshot {
    fn default() -> Self {
        Self {
            current_task_id: None,
            is_running: false,
            active_mode: TimerMode::Pomodoro,
            remaining_ms: DEFAULT_POMODORO_MS,
            session_start: None,
            pomodoro_ms: DEFAULT_POMODORO_MS,
            break_ms: DEFAULT_BREAK_MS,
        }
    }
}

/// Commands a client can send to the tempo daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload")]
pub enum Command {
    #[serde(rename = "start-pomodoro-timer")]
    Start {
        #[serde(rename = "taskId")]
        task_id: String,
        mode: TimerMode,
        #[serde(rename = "duration", default)]
        duration_ms: Option<u64>,
    },
    #[serde(rename = "pause-pomodoro-timer")]
    Pause,
    #[serde(rename = "reset-pomodoro-timer")]
    Reset {
        #[serde(rename = "taskId", default)]
        task_id: Option<String>,
    },
    #[serde(rename = "switch-pomodoro-mode")]
    SwitchMode {
        mode: TimerMode,
        #[serde(rename = "taskId")]
        task_id: String,
    },
    #[serde(rename = "set-pomodoro-duration")]
    SetPomodoroDuration {
        #[serde(rename = "duration")]
        duration_ms: u64,
    },
    #[serde(rename = "set-break-duration")]
    SetBreakDuration {
        #[serde(rename = "duration")]
        duration_ms: u64,
    },
    #[serde(rename = "get-pomodoro-state")]
    GetState,
    /// Fire-and-forget: drives an external display such as a tray label.
    /// The daemon sends no response for this one.
    #[serde(rename = "update-timer")]
    UpdateDisplay { text: String },
    /// Socket rendition of the subscribe-to-event primitive: after the
    /// ack, the connection carries [`Event`] lines until the peer hangs up.
    #[serde(rename = "subscribe-pomodoro-events")]
    Subscribe,
}

/// Responses from the daemon back to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Timer(TimerReply),
    State(TimerSnapshot),
    Error(String),
}

/// The short reply carried by start/pause/reset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimerReply {
    #[serde(rename = "isRunning")]
    pub is_running: bool,
    #[serde(rename = "remainingTime")]
    pub remaining_ms: u64,
}

/// Events pushed from the daemon to subscribed clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum Event {
    #[serde(rename = "pomodoro-timer-tick")]
    Tick(TickPayload),
    #[serde(rename = "pomodoro-timer-completed")]
    Completed { mode: TimerMode },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickPayload {
    #[serde(rename = "isRunning")]
    pub is_running: bool,
    #[serde(rename = "activeMode")]
    pub active_mode: TimerMode,
    /// Milliseconds left in the current session.
    pub remaining: u64,
    #[serde(rename = "currentTaskId")]
    pub current_task_id: Option<String>,
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused - is the tempo daemon running?")]
    ConnectionRefused,

    #[error("Timed out waiting for the tempo daemon")]
    Timeout,
}

/// Clamp a requested session length to the minimum either side accepts.
pub fn clamp_duration(ms: u64) -> u64 {
    ms.max(MIN_DURATION_MS)
}

/// Format remaining milliseconds as `HH:MM:SS` for the tray label.
pub fn format_countdown(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    )
}

/// Write one JSON message terminated by a newline.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut buf = serde_json::to_vec(message)?;
    buf.push(b'\n');
    writer.write_all(&buf).await?;
    Ok(())
}

/// Read one newline-terminated JSON message. `None` means the peer closed
/// the connection cleanly.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, IpcError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line.trim_end())?))
}
