//! streamctl - command-line client for the stream daemon.
//!
//! ```bash
//! streamctl live                  # tune in to the live stream
//! streamctl schedule 2016-01-04   # day schedule
//! streamctl load <url>            # play one program
//! streamctl offline add 42 --date 2016-01-04
//! streamctl status --json
//! ```

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use stream_daemon::client::DaemonConnection;
use stream_proto::config::Config;
use stream_proto::protocol::{CallState, Request, Response, StatusSnapshot, Timing};
use stream_proto::{OfflineEntry, Program};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "streamctl", version, about = "Control the public radio stream daemon")]
struct Cli {
    /// Daemon address (defaults to the configured bind address and port)
    #[arg(long, short = 'a', global = true)]
    address: Option<String>,

    /// Print raw JSON responses
    #[arg(long, short = 'j', global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and play a source (URL or file path)
    Load { source: String },
    /// Load and play the configured live stream
    Live,
    Play,
    Pause,
    /// Play if paused, pause if playing
    Toggle,
    Stop,
    /// Seek to a fraction of the program (0.0 - 1.0)
    Seek { fraction: f64 },
    /// Inject a call state (ringing, offhook, idle)
    Call { state: CallState },
    Status,
    /// Show the program schedule of a day (default: today)
    Schedule { date: Option<NaiveDate> },
    /// Manage saved recordings
    #[command(subcommand)]
    Offline(OfflineCommand),
    /// Stop the daemon
    Shutdown,
}

#[derive(Subcommand, Debug)]
enum OfflineCommand {
    List,
    /// Save a program from a day's schedule
    Add {
        id: i64,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    Remove {
        id: i64,
        day_label: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let address = cli.address.clone().unwrap_or_else(|| config.daemon_address());
    let mut conn = DaemonConnection::connect(&address).await?;

    let today = || chrono::Local::now().date_naive();
    let request = match cli.command {
        Command::Load { source } => Request::Load { source },
        Command::Live => Request::Load {
            source: config.catalog.live_url.clone(),
        },
        Command::Play => Request::Play,
        Command::Pause => Request::Pause,
        Command::Toggle => Request::PlayPause,
        Command::Stop => Request::Stop,
        Command::Seek { fraction } => Request::SetPosition { fraction },
        Command::Call { state } => Request::CallState { state },
        Command::Status => Request::Status,
        Command::Schedule { date } => Request::FetchSchedule { date },
        Command::Offline(OfflineCommand::List) => Request::ListOffline,
        Command::Offline(OfflineCommand::Add { id, date }) => {
            let date = date.unwrap_or_else(today);
            let program = find_program(&mut conn, date, id).await?;
            Request::AddOffline { program }
        }
        Command::Offline(OfflineCommand::Remove { id, day_label }) => {
            Request::RemoveOffline { id, day_label }
        }
        Command::Shutdown => Request::Shutdown,
    };

    let response = conn.request(request).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return match response {
            Response::Error { message } => bail!(message),
            _ => Ok(()),
        };
    }
    print_response(response)
}

async fn find_program(conn: &mut DaemonConnection, date: NaiveDate, id: i64) -> Result<Program> {
    match conn.request(Request::FetchSchedule { date: Some(date) }).await? {
        Response::Schedule { programs } => programs
            .into_iter()
            .find(|p| p.id == id)
            .with_context(|| format!("no program {} on {}", id, date)),
        Response::Error { message } => bail!(message),
        other => bail!("unexpected response: {:?}", other),
    }
}

fn print_response(response: Response) -> Result<()> {
    match response {
        Response::Outcome { applied: true } => println!("ok"),
        Response::Outcome { applied: false } => println!("ignored in current state"),
        Response::Status { data } => print_status(&data),
        Response::Schedule { programs } => {
            for p in &programs {
                println!("{:>8}  {:>5}  {}", p.id, p.time, p.title);
            }
        }
        Response::Offline { entries } => {
            for e in &entries {
                print_entry(e);
            }
        }
        Response::Added { entry } => print_entry(&entry),
        Response::Removed { entry: Some(entry) } => print_entry(&entry),
        Response::Removed { entry: None } => println!("not saved"),
        Response::Hello { protocol_version } => println!("protocol {}", protocol_version),
        Response::Error { message } => bail!(message),
    }
    Ok(())
}

fn print_entry(entry: &OfflineEntry) {
    let p = &entry.program;
    println!("{:>8}  {:<12}  {:>5}  {}  ({})", p.id, p.day_label, p.time, p.title, entry.filename);
}

fn print_status(status: &StatusSnapshot) {
    println!("state:    {:?}", status.state);
    if let Some(source) = &status.source {
        println!("source:   {}{}", source, if status.is_live { " (live)" } else { "" });
    }
    println!("position: {}", format_timing(status.position));
    println!("duration: {}", format_timing(status.duration));
}

fn format_timing(timing: Timing) -> String {
    match timing {
        Timing::Unknown => "-".to_string(),
        Timing::Unavailable => "n/a".to_string(),
        Timing::Millis(ms) => {
            let secs = ms / 1000;
            format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
        }
    }
}
