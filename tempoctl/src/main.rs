use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tempo_ipc::TimerMode;
use tracing_subscriber::EnvFilter;

mod client;
mod facade;
mod schedule;
mod store;

use client::SocketLink;
use facade::TimerFacade;
use store::FileStore;

#[derive(Parser)]
#[command(name = "tempoctl")]
#[command(about = "Control the tempo timer daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start (or resume) a session for a task
    Start {
        task_id: String,
        #[arg(long, value_enum, default_value_t = ModeArg::Pomodoro)]
        mode: ModeArg,
        /// Session length in minutes; defaults to the mode's configured
        /// duration
        #[arg(long)]
        minutes: Option<u64>,
    },
    /// Pause the running session
    Pause,
    /// Reset the timer, optionally scoped to one task
    Reset { task_id: Option<String> },
    /// Switch between focus and break
    Switch {
        #[arg(value_enum)]
        mode: ModeArg,
        task_id: String,
    },
    /// Set the focus session length in minutes
    SetPomodoro { minutes: u64 },
    /// Set the break length in minutes
    SetBreak { minutes: u64 },
    /// Show the current timer state
    Status,
    /// Follow timer events and drive the tray display
    Watch,
    /// Suggest free start times today for a session of the given length
    Slots {
        /// Session length in minutes
        minutes: i64,
        /// Busy interval as HH:MM+MINS, e.g. 10:00+60 (repeatable)
        #[arg(long = "busy")]
        busy: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Pomodoro,
    Break,
}

impl From<ModeArg> for TimerMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Pomodoro => TimerMode::Pomodoro,
            ModeArg::Break => TimerMode::Break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "tempoctl=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let store = FileStore::open_default()?;
    let mut facade = TimerFacade::new(store, SocketLink::new());
    facade.initialize().await;

    match cli.command {
        Commands::Start {
            task_id,
            mode,
            minutes,
        } => {
            facade
                .start(&task_id, mode.into(), minutes.map(|m| m * 60_000))
                .await?;
            print_state(&facade);
        }
        Commands::Pause => {
            facade.pause().await?;
            print_state(&facade);
        }
        Commands::Reset { task_id } => {
            facade.reset(task_id.as_deref()).await?;
            print_state(&facade);
        }
        Commands::Switch { mode, task_id } => {
            facade.switch_mode(mode.into(), &task_id).await?;
            print_state(&facade);
        }
        Commands::SetPomodoro { minutes } => {
            facade.set_pomodoro_duration(minutes * 60_000).await?;
            print_state(&facade);
        }
        Commands::SetBreak { minutes } => {
            facade.set_break_duration(minutes * 60_000).await?;
            print_state(&facade);
        }
        Commands::Status => {
            facade.refresh().await?;
            print_state(&facade);
        }
        Commands::Watch => watch(facade).await?,
        Commands::Slots { minutes, busy } => {
            let now = chrono::Local::now();
            let busy = busy
                .iter()
                .map(|spec| parse_busy_interval(now, spec))
                .collect::<Result<Vec<_>>>()?;
            let slots = schedule::free_slots(now, &busy, chrono::Duration::minutes(minutes));
            if slots.is_empty() {
                println!("No free slots left today for {} minutes", minutes);
            }
            for slot in slots {
                println!("{}", slot.format("%H:%M"));
            }
        }
    }

    Ok(())
}

/// Parse a busy interval spec of the form `HH:MM+MINS` into a (start,
/// duration) pair on today's date.
fn parse_busy_interval(
    now: chrono::DateTime<chrono::Local>,
    spec: &str,
) -> Result<(chrono::DateTime<chrono::Local>, chrono::Duration)> {
    let (time, minutes) = spec
        .split_once('+')
        .ok_or_else(|| anyhow::anyhow!("expected HH:MM+MINS, got {:?}", spec))?;
    let time = chrono::NaiveTime::parse_from_str(time, "%H:%M")?;
    let minutes: i64 = minutes.parse()?;
    let start = now
        .date_naive()
        .and_time(time)
        .and_local_timezone(chrono::Local)
        .earliest()
        .ok_or_else(|| anyhow::anyhow!("ambiguous local time {:?}", spec))?;
    Ok((start, chrono::Duration::minutes(minutes)))
}

fn print_state(facade: &TimerFacade<FileStore, SocketLink>) {
    let state = facade.state();
    let task = state.current_task_id.as_deref().unwrap_or("-");
    println!(
        "{} {} [{}] task: {}",
        if state.is_running { "▶" } else { "⏸" },
        facade.display_text(),
        state.active_mode,
        task
    );
}

/// Long-running mode: mirror every pushed event, print it, and keep the
/// daemon's tray label current.
async fn watch(mut facade: TimerFacade<FileStore, SocketLink>) -> Result<()> {
    facade.refresh().await?;
    facade.subscribe(|state| {
        let task = state.current_task_id.as_deref().unwrap_or("-");
        println!(
            "{} remaining: {}ms [{}] task: {}",
            if state.is_running { "▶" } else { "⏸" },
            state.remaining_ms,
            state.active_mode,
            task
        );
    });

    let mut events = SocketLink::new().subscribe().await?;
    while let Some(event) = events.next().await? {
        facade.apply_event(&event);
        facade.push_display().await;
    }
    Ok(())
}
