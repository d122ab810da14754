//! The UI-process half of the timer service: mirrors controller state for
//! synchronous reads, persists a snapshot across restarts, and fans out
//! every change to subscribers.
//!
//! Commands go through here, never straight to the socket: each one
//! forwards to the controller, reconciles the local mirror with the
//! response, persists, and notifies. `start` applies an optimistic update
//! first and rolls it back if the round trip fails, so the UI never sticks
//! in a false "started" state.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::ControllerLink;
use crate::store::StateStore;
use tempo_ipc::{
    clamp_duration, format_countdown, Command, IpcError, Response, TimerMode, TimerReply,
    TimerSnapshot, COMPLETED_EVENT, IDLE_DISPLAY, STATE_KEY, TICK_EVENT,
};

/// On-disk projection of the mirror: the snapshot plus a write timestamp
/// for staleness diagnostics. As persisted, `isRunning` is always false
/// and `sessionStartTime` always null - a restart never resumes a live
/// countdown.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTimerState {
    #[serde(flatten)]
    pub snapshot: TimerSnapshot,
    /// Milliseconds since the epoch at write time.
    pub last_updated: i64,
}

pub type SubscriberId = u64;

pub struct TimerFacade<S: StateStore, L: ControllerLink> {
    state: TimerSnapshot,
    store: S,
    link: L,
    subscribers: Vec<(SubscriberId, Box<dyn FnMut(&TimerSnapshot) + Send>)>,
    next_subscriber: SubscriberId,
}

impl<S: StateStore, L: ControllerLink> TimerFacade<S, L> {
    pub fn new(store: S, link: L) -> Self {
        Self {
            state: TimerSnapshot::default(),
            store,
            link,
            subscribers: Vec::new(),
            next_subscriber: 0,
        }
    }

    /// Restore the persisted snapshot (if any) and hand the restored
    /// durations back to the controller, which is the durable source of
    /// truth for them from here on. A corrupt snapshot is deleted and
    /// replaced with defaults; never fatal.
    pub async fn initialize(&mut self) {
        let restored = match self.load_snapshot() {
            Ok(Some(snapshot)) => {
                self.state = snapshot;
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("discarding unreadable timer snapshot: {}", e);
                if let Err(e) = self.store.remove(STATE_KEY) {
                    warn!("could not delete corrupt snapshot: {}", e);
                }
                false
            }
        };
        // Timers never auto-resume across a restart.
        self.state.is_running = false;
        self.state.session_start = None;

        if restored {
            for command in [
                Command::SetPomodoroDuration {
                    duration_ms: self.state.pomodoro_ms,
                },
                Command::SetBreakDuration {
                    duration_ms: self.state.break_ms,
                },
            ] {
                if let Err(e) = self.link.request(command).await {
                    warn!("could not push restored durations to the controller: {}", e);
                    break;
                }
            }
        }
    }

    fn load_snapshot(&self) -> Result<Option<TimerSnapshot>, serde_json::Error> {
        let Some(raw) = self.store.get(STATE_KEY) else {
            return Ok(None);
        };
        let persisted: PersistedTimerState = serde_json::from_str(&raw)?;
        Ok(Some(persisted.snapshot))
    }

    /// Synchronous read of the local mirror.
    pub fn state(&self) -> &TimerSnapshot {
        &self.state
    }

    /// Register a listener. It is invoked with the current state
    /// immediately, then on every subsequent change.
    pub fn subscribe(
        &mut self,
        mut callback: impl FnMut(&TimerSnapshot) + Send + 'static,
    ) -> SubscriberId {
        callback(&self.state);
        let id = self.next_subscriber;
        self.next_subscriber += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) {
        self.subscribers.retain(|(sid, _)| *sid != id);
    }

    fn notify_subscribers(&mut self) {
        let state = self.state.clone();
        for (_, callback) in &mut self.subscribers {
            callback(&state);
        }
    }

    /// Begin or resume a session. Optimistically marks the mirror running
    /// before the round trip; a link failure rolls the mirror back and
    /// still notifies subscribers, and nothing is persisted for it.
    pub async fn start(
        &mut self,
        task_id: &str,
        mode: TimerMode,
        duration_ms: Option<u64>,
    ) -> Result<(), IpcError> {
        let previous = self.state.clone();
        let duration_ms = duration_ms.map(clamp_duration);

        let resuming = previous.current_task_id.as_deref() == Some(task_id)
            && previous.active_mode == mode
            && previous.remaining_ms > 0;
        self.state.remaining_ms = match duration_ms {
            Some(ms) => ms,
            None if resuming => previous.remaining_ms,
            None => previous.duration_for(mode),
        };
        self.state.current_task_id = Some(task_id.to_string());
        self.state.active_mode = mode;
        self.state.is_running = true;
        self.state.session_start = Some(Utc::now());
        self.notify_subscribers();

        let command = Command::Start {
            task_id: task_id.to_string(),
            mode,
            duration_ms,
        };
        match self.link.request(command).await {
            Ok(response) => {
                self.apply_timer_reply(response);
                self.persist();
                self.notify_subscribers();
                Ok(())
            }
            Err(e) => {
                warn!("start failed, rolling back optimistic state: {}", e);
                self.state = previous;
                self.notify_subscribers();
                Err(e)
            }
        }
    }

    pub async fn pause(&mut self) -> Result<(), IpcError> {
        let response = self.link.request(Command::Pause).await?;
        self.apply_timer_reply(response);
        self.persist();
        self.notify_subscribers();
        Ok(())
    }

    pub async fn reset(&mut self, task_id: Option<&str>) -> Result<(), IpcError> {
        let command = Command::Reset {
            task_id: task_id.map(str::to_string),
        };
        let response = self.link.request(command).await?;
        self.apply_timer_reply(response);
        self.persist();
        self.notify_subscribers();
        Ok(())
    }

    pub async fn switch_mode(&mut self, mode: TimerMode, task_id: &str) -> Result<(), IpcError> {
        let command = Command::SwitchMode {
            mode,
            task_id: task_id.to_string(),
        };
        match self.link.request(command).await? {
            Response::Ok => {
                self.state.active_mode = mode;
                self.state.remaining_ms = self.state.duration_for(mode);
                self.state.is_running = false;
                self.state.session_start = None;
                self.state.current_task_id = Some(task_id.to_string());
            }
            other => warn!("unexpected response to mode switch: {:?}", other),
        }
        self.persist();
        self.notify_subscribers();
        Ok(())
    }

    pub async fn set_pomodoro_duration(&mut self, duration_ms: u64) -> Result<(), IpcError> {
        let duration_ms = clamp_duration(duration_ms);
        self.link
            .request(Command::SetPomodoroDuration { duration_ms })
            .await?;
        self.state.pomodoro_ms = duration_ms;
        if self.state.active_mode == TimerMode::Pomodoro && !self.state.is_running {
            self.state.remaining_ms = duration_ms;
        }
        self.persist();
        self.notify_subscribers();
        Ok(())
    }

    pub async fn set_break_duration(&mut self, duration_ms: u64) -> Result<(), IpcError> {
        let duration_ms = clamp_duration(duration_ms);
        self.link
            .request(Command::SetBreakDuration { duration_ms })
            .await?;
        self.state.break_ms = duration_ms;
        if self.state.active_mode == TimerMode::Break && !self.state.is_running {
            self.state.remaining_ms = duration_ms;
        }
        self.persist();
        self.notify_subscribers();
        Ok(())
    }

    /// Replace the mirror with the controller's authoritative snapshot.
    pub async fn refresh(&mut self) -> Result<(), IpcError> {
        match self.link.request(Command::GetState).await? {
            Response::State(snapshot) => {
                self.state = snapshot;
                self.persist();
                self.notify_subscribers();
            }
            other => debug!("unexpected response to state query: {:?}", other),
        }
        Ok(())
    }

    /// Apply one pushed event. Payloads come off the wire untrusted: each
    /// tick field is validated independently and falls back to the prior
    /// mirror value when missing or mistyped. Never panics on bad data.
    pub fn apply_event(&mut self, event: &Value) {
        match event.get("event").and_then(Value::as_str) {
            Some(TICK_EVENT) => self.apply_tick(event.get("payload").unwrap_or(&Value::Null)),
            Some(COMPLETED_EVENT) => self.apply_completion(),
            other => debug!("ignoring unknown event: {:?}", other),
        }
    }

    fn apply_tick(&mut self, payload: &Value) {
        if let Some(is_running) = payload.get("isRunning").and_then(Value::as_bool) {
            self.state.is_running = is_running;
            if !is_running {
                self.state.session_start = None;
            }
        }
        if let Some(mode) = payload
            .get("activeMode")
            .and_then(Value::as_str)
            .and_then(TimerMode::parse)
        {
            self.state.active_mode = mode;
        }
        if let Some(remaining) = payload.get("remaining").and_then(Value::as_u64) {
            self.state.remaining_ms = remaining;
        }
        match payload.get("currentTaskId") {
            Some(Value::String(id)) => self.state.current_task_id = Some(id.clone()),
            Some(Value::Null) => self.state.current_task_id = None,
            // Absent or wrong type: keep what we had.
            _ => {}
        }
        // Ticks are frequent; persisting each one would thrash storage.
        self.notify_subscribers();
    }

    fn apply_completion(&mut self) {
        self.state.is_running = false;
        self.state.remaining_ms = 0;
        self.state.session_start = None;
        self.persist();
        self.notify_subscribers();
    }

    fn apply_timer_reply(&mut self, response: Response) {
        match response {
            Response::Timer(TimerReply {
                is_running,
                remaining_ms,
            }) => {
                self.state.is_running = is_running;
                self.state.remaining_ms = remaining_ms;
                if !is_running {
                    self.state.session_start = None;
                }
            }
            other => warn!("unexpected timer response: {:?}", other),
        }
    }

    fn persist(&mut self) {
        let mut snapshot = self.state.clone();
        snapshot.is_running = false;
        snapshot.session_start = None;
        let persisted = PersistedTimerState {
            snapshot,
            last_updated: Utc::now().timestamp_millis(),
        };
        match serde_json::to_string(&persisted) {
            Ok(json) => {
                if let Err(e) = self.store.set(STATE_KEY, &json) {
                    warn!("failed to persist timer state: {}", e);
                }
            }
            Err(e) => warn!("failed to encode timer state: {}", e),
        }
    }

    /// Tray label text: the live countdown while running, the idle
    /// sentinel otherwise.
    pub fn display_text(&self) -> String {
        if self.state.is_running {
            format_countdown(self.state.remaining_ms)
        } else {
            IDLE_DISPLAY.to_string()
        }
    }

    /// Push the current tray label to the daemon. Fire-and-forget; a
    /// failed push only costs one display update.
    pub async fn push_display(&mut self) {
        let text = self.display_text();
        if let Err(e) = self.link.notify(Command::UpdateDisplay { text }).await {
            debug!("could not push tray display update: {}", e);
        }
    }
}
