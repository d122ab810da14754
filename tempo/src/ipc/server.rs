//! Unix domain socket server for IPC

use crate::controller::TimerService;
use anyhow::Result;
use std::path::Path;
use tempo_ipc::{read_message, write_message, Command, Response};
use tokio::io::BufReader;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub async fn run(service: TimerService, socket_path: &Path) -> Result<()> {
    // Remove old socket if it exists
    let _ = std::fs::remove_file(socket_path);

    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "IPC server listening");

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, service).await {
                        error!("Error handling client: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: UnixStream, service: TimerService) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    while let Some(command) = read_message::<_, Command>(&mut reader).await? {
        match command {
            Command::Subscribe => {
                write_message(&mut writer, &Response::Ok).await?;
                return forward_events(service, writer).await;
            }
            other => {
                if let Some(response) = dispatch(&service, other).await {
                    write_message(&mut writer, &response).await?;
                }
            }
        }
    }

    Ok(())
}

/// Process one command. `None` means the command is fire-and-forget and
/// gets no response line.
async fn dispatch(service: &TimerService, command: Command) -> Option<Response> {
    match command {
        Command::Start {
            task_id,
            mode,
            duration_ms,
        } => Some(Response::Timer(
            service.start(task_id, mode, duration_ms).await,
        )),
        Command::Pause => Some(Response::Timer(service.pause().await)),
        Command::Reset { task_id } => Some(Response::Timer(service.reset(task_id).await)),
        Command::SwitchMode { mode, task_id } => {
            service.switch_mode(mode, task_id).await;
            Some(Response::Ok)
        }
        Command::SetPomodoroDuration { duration_ms } => {
            service.set_pomodoro_duration(duration_ms).await;
            Some(Response::Ok)
        }
        Command::SetBreakDuration { duration_ms } => {
            service.set_break_duration(duration_ms).await;
            Some(Response::Ok)
        }
        Command::GetState => Some(Response::State(service.snapshot().await)),
        Command::UpdateDisplay { text } => {
            service.update_display(&text);
            None
        }
        // Handled by the caller before dispatch.
        Command::Subscribe => Some(Response::Ok),
    }
}

/// Stream timer events to a subscribed client until it hangs up.
async fn forward_events(service: TimerService, mut writer: OwnedWriteHalf) -> Result<()> {
    let mut events = service.subscribe();
    loop {
        match events.recv().await {
            Ok(event) => {
                if write_message(&mut writer, &event).await.is_err() {
                    // Peer went away; nothing to clean up.
                    return Ok(());
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "event subscriber lagging, ticks dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}
