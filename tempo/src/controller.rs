//! The authoritative timer: one global countdown, advanced on a fixed
//! cadence, commanded over IPC and observed through broadcast events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tempo_ipc::{clamp_duration, Event, TickPayload, TimerMode, TimerReply, TimerSnapshot};
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Monotonic anchor for the running session. Remaining time is always
/// recomputed from here, never hand-decremented, so a slow tick loop
/// cannot lose time.
struct Anchor {
    at: Instant,
    remaining_ms: u64,
}

struct Inner {
    current_task_id: Option<String>,
    active_mode: TimerMode,
    is_running: bool,
    remaining_ms: u64,
    session_start: Option<DateTime<Utc>>,
    pomodoro_ms: u64,
    break_ms: u64,
    anchor: Option<Anchor>,
    /// Bumped on every state transition that invalidates a tick loop.
    /// A loop that wakes up under a stale generation exits silently.
    generation: u64,
}

impl Inner {
    fn duration_for(&self, mode: TimerMode) -> u64 {
        match mode {
            TimerMode::Pomodoro => self.pomodoro_ms,
            TimerMode::Break => self.break_ms,
        }
    }

    fn remaining_now(&self) -> u64 {
        match &self.anchor {
            Some(anchor) if self.is_running => anchor
                .remaining_ms
                .saturating_sub(anchor.at.elapsed().as_millis() as u64),
            _ => self.remaining_ms,
        }
    }

    /// Stop any live countdown, freezing the remaining time at its last
    /// computed value. Idempotent when nothing is running.
    fn freeze(&mut self) {
        if self.is_running {
            self.remaining_ms = self.remaining_now();
            self.is_running = false;
        }
        self.session_start = None;
        self.anchor = None;
        self.generation = self.generation.wrapping_add(1);
    }

    fn reply(&self) -> TimerReply {
        TimerReply {
            is_running: self.is_running,
            remaining_ms: self.remaining_now(),
        }
    }

    fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            current_task_id: self.current_task_id.clone(),
            is_running: self.is_running,
            active_mode: self.active_mode,
            remaining_ms: self.remaining_now(),
            session_start: self.session_start,
            pomodoro_ms: self.pomodoro_ms,
            break_ms: self.break_ms,
        }
    }
}

/// Clonable handle to the single authoritative timer.
#[derive(Clone)]
pub struct TimerService {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<Event>,
    tick_interval: Duration,
}

impl TimerService {
    pub fn new(pomodoro_ms: u64, break_ms: u64, tick_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                current_task_id: None,
                active_mode: TimerMode::Pomodoro,
                is_running: false,
                remaining_ms: pomodoro_ms,
                session_start: None,
                pomodoro_ms,
                break_ms,
                anchor: None,
                generation: 0,
            })),
            events,
            tick_interval,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Begin or resume a countdown for `task_id`.
    ///
    /// An explicit duration overrides everything; otherwise the same
    /// task+mode resumes from where it left off, and anything else gets
    /// the mode's configured length. A start while another task holds the
    /// timer is honored (the lock is advisory, checked client-side) but
    /// logged.
    pub async fn start(
        &self,
        task_id: String,
        mode: TimerMode,
        duration_ms: Option<u64>,
    ) -> TimerReply {
        let mut inner = self.inner.lock().await;
        if inner.is_running && inner.current_task_id.as_deref() != Some(task_id.as_str()) {
            warn!(
                holder = ?inner.current_task_id,
                claimant = %task_id,
                "start while another task holds the timer; handing it over"
            );
        }
        inner.freeze();
        let resuming = inner.current_task_id.as_deref() == Some(task_id.as_str())
            && inner.active_mode == mode
            && inner.remaining_ms > 0;
        let remaining = match duration_ms {
            Some(ms) => clamp_duration(ms),
            None if resuming => inner.remaining_ms,
            None => inner.duration_for(mode),
        };
        inner.current_task_id = Some(task_id);
        inner.active_mode = mode;
        inner.is_running = true;
        inner.remaining_ms = remaining;
        inner.session_start = Some(Utc::now());
        inner.anchor = Some(Anchor {
            at: Instant::now(),
            remaining_ms: remaining,
        });
        let generation = inner.generation;
        let reply = inner.reply();
        info!(mode = %inner.active_mode, remaining_ms = remaining, "timer started");
        drop(inner);
        self.spawn_ticker(generation);
        reply
    }

    /// Freeze the countdown. A no-op when nothing is running.
    pub async fn pause(&self) -> TimerReply {
        let mut inner = self.inner.lock().await;
        if !inner.is_running {
            debug!("pause requested with no running session");
            return inner.reply();
        }
        inner.freeze();
        info!(remaining_ms = inner.remaining_ms, "timer paused");
        inner.reply()
    }

    /// Restore the full duration of the active mode, if `task_id` matches
    /// the bound task or is absent (global reset). A reset aimed at an
    /// unrelated task leaves the timer untouched.
    pub async fn reset(&self, task_id: Option<String>) -> TimerReply {
        let mut inner = self.inner.lock().await;
        let applies = match (&task_id, &inner.current_task_id) {
            (None, _) => true,
            (Some(target), Some(bound)) => target == bound,
            (Some(_), None) => false,
        };
        if applies {
            inner.freeze();
            inner.remaining_ms = inner.duration_for(inner.active_mode);
            info!(remaining_ms = inner.remaining_ms, "timer reset");
        } else {
            debug!(?task_id, "reset target does not hold the timer; ignoring");
        }
        inner.reply()
    }

    /// Stop any countdown and flip to the other mode at full duration.
    pub async fn switch_mode(&self, mode: TimerMode, task_id: String) {
        let mut inner = self.inner.lock().await;
        inner.freeze();
        inner.active_mode = mode;
        inner.remaining_ms = inner.duration_for(mode);
        inner.current_task_id = Some(task_id);
        info!(mode = %mode, remaining_ms = inner.remaining_ms, "mode switched");
    }

    pub async fn set_pomodoro_duration(&self, duration_ms: u64) {
        let clamped = clamp_duration(duration_ms);
        if clamped != duration_ms {
            warn!(requested = duration_ms, clamped, "pomodoro duration below minimum");
        }
        let mut inner = self.inner.lock().await;
        inner.pomodoro_ms = clamped;
        if inner.active_mode == TimerMode::Pomodoro && !inner.is_running {
            inner.remaining_ms = clamped;
        }
    }

    pub async fn set_break_duration(&self, duration_ms: u64) {
        let clamped = clamp_duration(duration_ms);
        if clamped != duration_ms {
            warn!(requested = duration_ms, clamped, "break duration below minimum");
        }
        let mut inner = self.inner.lock().await;
        inner.break_ms = clamped;
        if inner.active_mode == TimerMode::Break && !inner.is_running {
            inner.remaining_ms = clamped;
        }
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        self.inner.lock().await.snapshot()
    }

    /// Sink for the tray label pushed by the UI process. The label is the
    /// external display's concern; the daemon just surfaces it in its log.
    pub fn update_display(&self, text: &str) {
        debug!(%text, "tray display updated");
    }

    fn spawn_ticker(&self, generation: u64) {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticks = interval_at(
                Instant::now() + service.tick_interval,
                service.tick_interval,
            );
            loop {
                ticks.tick().await;
                let mut inner = service.inner.lock().await;
                if inner.generation != generation || !inner.is_running {
                    // Superseded by a pause, reset, switch or new start.
                    break;
                }
                let remaining = inner.remaining_now();
                if remaining == 0 {
                    let mode = inner.active_mode;
                    inner.is_running = false;
                    inner.remaining_ms = 0;
                    inner.session_start = None;
                    inner.anchor = None;
                    drop(inner);
                    info!(mode = %mode, "session complete");
                    let _ = service.events.send(Event::Completed { mode });
                    break;
                }
                inner.remaining_ms = remaining;
                let payload = TickPayload {
                    is_running: true,
                    active_mode: inner.active_mode,
                    remaining,
                    current_task_id: inner.current_task_id.clone(),
                };
                drop(inner);
                let _ = service.events.send(Event::Tick(payload));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(pomodoro_ms: u64, break_ms: u64) -> TimerService {
        TimerService::new(pomodoro_ms, break_ms, Duration::from_millis(1000))
    }

    async fn next_event(events: &mut broadcast::Receiver<Event>) -> Event {
        events.recv().await.expect("event channel closed")
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_and_completes_once() {
        let service = service(3_000, 2_000);
        let mut events = service.subscribe();

        let reply = service
            .start("task-1".into(), TimerMode::Pomodoro, None)
            .await;
        assert!(reply.is_running);
        assert_eq!(reply.remaining_ms, 3_000);

        match next_event(&mut events).await {
            Event::Tick(tick) => {
                assert_eq!(tick.remaining, 2_000);
                assert!(tick.is_running);
                assert_eq!(tick.current_task_id.as_deref(), Some("task-1"));
            }
            other => panic!("expected tick, got {other:?}"),
        }
        match next_event(&mut events).await {
            Event::Tick(tick) => assert_eq!(tick.remaining, 1_000),
            other => panic!("expected tick, got {other:?}"),
        }
        match next_event(&mut events).await {
            Event::Completed { mode } => assert_eq!(mode, TimerMode::Pomodoro),
            other => panic!("expected completion, got {other:?}"),
        }

        let snapshot = service.snapshot().await;
        assert!(!snapshot.is_running);
        assert_eq!(snapshot.remaining_ms, 0);
        assert!(snapshot.session_start.is_none());

        // The loop is done: nothing further arrives even as time passes.
        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_remaining_time() {
        let service = service(3_000, 2_000);
        let mut events = service.subscribe();
        service
            .start("task-1".into(), TimerMode::Pomodoro, None)
            .await;
        assert!(matches!(next_event(&mut events).await, Event::Tick(_)));

        let reply = service.pause().await;
        assert!(!reply.is_running);
        assert_eq!(reply.remaining_ms, 2_000);

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.remaining_ms, 2_000);
        assert!(snapshot.session_start.is_none());
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_without_session_is_a_noop() {
        let service = service(3_000, 2_000);
        let reply = service.pause().await;
        assert!(!reply.is_running);
        assert_eq!(reply.remaining_ms, 3_000);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_continues_same_task_and_mode() {
        let service = service(3_000, 2_000);
        let mut events = service.subscribe();
        service
            .start("task-1".into(), TimerMode::Pomodoro, None)
            .await;
        assert!(matches!(next_event(&mut events).await, Event::Tick(_)));
        service.pause().await;

        let reply = service
            .start("task-1".into(), TimerMode::Pomodoro, None)
            .await;
        assert!(reply.is_running);
        assert_eq!(reply.remaining_ms, 2_000);
    }

    #[tokio::test(start_paused = true)]
    async fn start_for_other_task_restarts_from_full_duration() {
        let service = service(3_000, 2_000);
        let mut events = service.subscribe();
        service
            .start("task-1".into(), TimerMode::Pomodoro, None)
            .await;
        assert!(matches!(next_event(&mut events).await, Event::Tick(_)));

        // Advisory lock: the steal is honored, at full duration.
        let reply = service
            .start("task-2".into(), TimerMode::Pomodoro, None)
            .await;
        assert!(reply.is_running);
        assert_eq!(reply.remaining_ms, 3_000);
        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.current_task_id.as_deref(), Some("task-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_duration_is_clamped_to_minimum() {
        let service = service(3_000, 2_000);
        let reply = service
            .start("task-1".into(), TimerMode::Pomodoro, Some(10))
            .await;
        assert_eq!(reply.remaining_ms, tempo_ipc::MIN_DURATION_MS);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_mode_stops_and_resets_to_new_mode() {
        let service = service(3_000, 2_000);
        let mut events = service.subscribe();
        service
            .start("task-1".into(), TimerMode::Pomodoro, None)
            .await;
        assert!(matches!(next_event(&mut events).await, Event::Tick(_)));

        service.switch_mode(TimerMode::Break, "task-1".into()).await;
        let snapshot = service.snapshot().await;
        assert!(!snapshot.is_running);
        assert_eq!(snapshot.active_mode, TimerMode::Break);
        assert_eq!(snapshot.remaining_ms, 2_000);
        assert!(snapshot.session_start.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn global_reset_restores_active_mode_duration() {
        let service = service(1_500_000, 300_000);
        service
            .start("task-2".into(), TimerMode::Break, Some(240_000))
            .await;
        service.pause().await;

        let reply = service.reset(None).await;
        assert!(!reply.is_running);
        assert_eq!(reply.remaining_ms, 300_000);
    }

    #[tokio::test(start_paused = true)]
    async fn targeted_reset_ignores_unrelated_task() {
        let service = service(3_000, 2_000);
        let mut events = service.subscribe();
        service
            .start("task-1".into(), TimerMode::Pomodoro, None)
            .await;
        assert!(matches!(next_event(&mut events).await, Event::Tick(_)));

        let reply = service.reset(Some("task-9".into())).await;
        assert!(reply.is_running);
        assert_eq!(reply.remaining_ms, 2_000);
    }

    #[tokio::test(start_paused = true)]
    async fn duration_change_applies_to_paused_active_mode() {
        let service = service(3_000, 2_000);
        // Idle boots as paused-pomodoro at full duration.
        service.set_pomodoro_duration(120_000).await;
        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.remaining_ms, 120_000);
        assert_eq!(snapshot.pomodoro_ms, 120_000);

        // The inactive mode's setting changes without touching remaining.
        service.set_break_duration(90_000).await;
        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.remaining_ms, 120_000);
        assert_eq!(snapshot.break_ms, 90_000);
    }

    #[tokio::test(start_paused = true)]
    async fn duration_change_leaves_running_session_alone() {
        let service = service(3_000, 2_000);
        let mut events = service.subscribe();
        service
            .start("task-1".into(), TimerMode::Pomodoro, None)
            .await;
        assert!(matches!(next_event(&mut events).await, Event::Tick(_)));

        service.set_pomodoro_duration(600_000).await;
        let snapshot = service.snapshot().await;
        assert!(snapshot.is_running);
        assert_eq!(snapshot.remaining_ms, 2_000);
        assert_eq!(snapshot.pomodoro_ms, 600_000);
    }
}
