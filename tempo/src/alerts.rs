//! Desktop notifications for completed sessions.

use tempo_ipc::{Event, TimerMode};
use tokio::sync::broadcast;
use tracing::warn;

pub async fn run(mut events: broadcast::Receiver<Event>) {
    loop {
        match events.recv().await {
            Ok(Event::Completed { mode }) => notify_completion(mode),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn notify_completion(mode: TimerMode) {
    let (summary, body) = match mode {
        TimerMode::Pomodoro => ("Pomodoro complete", "Time for a break."),
        TimerMode::Break => ("Break over", "Ready for the next focus session."),
    };
    if let Err(e) = notify_rust::Notification::new()
        .summary(summary)
        .body(body)
        .appname("tempo")
        .show()
    {
        warn!("Failed to send notification: {}", e);
    }
}
