//! quaverctl - control CLI for a running quaver-player daemon
//!
//! Each subcommand is one request over the control socket. Exit code 0
//! on success; 1 with a message on stderr for any error, including "no
//! running session" when the socket is unreachable.

use anyhow::Result;
use clap::{Parser, Subcommand};
use quaver_common::config::{resolve_data_dir, runtime_dir, BootstrapConfig};
use quaver_common::model::Track;
use quaver_common::time::format_clock;
use quaver_player::control::protocol::{
    NowPayload, QueuePayload, Request, Response, StatusPayload, VolumePayload,
};
use quaver_player::control::ControlClient;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "quaverctl")]
#[command(about = "Control a running quaver-player daemon")]
#[command(version)]
struct Args {
    /// Control socket path override
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Print raw JSON responses instead of formatted output
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start or resume playback
    Play,
    /// Play the queue entry at the given position (1-based, as shown by `queue`)
    PlayAt { position: usize },
    /// Pause playback
    Pause,
    /// Skip to the next track
    Next,
    /// Go back to the previous track (restarts if >3s in)
    Previous,
    /// Seek: +N/-N relative seconds, or absolute secs / M:SS / H:MM:SS
    Seek { target: String },
    /// Enable or disable shuffle
    Shuffle {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
    /// Set the repeat mode
    Repeat {
        #[arg(value_parser = ["off", "all", "one"])]
        mode: String,
    },
    /// Full session status
    Status,
    /// Currently playing track
    Now,
    /// List the queue in play order
    Queue,
    /// Append tracks to the queue by catalog id
    QueueAdd {
        /// Catalog track ids
        #[arg(required = true)]
        ids: Vec<String>,
        /// Title for the track (single id only)
        #[arg(long)]
        title: Option<String>,
        /// Artist for the track (single id only)
        #[arg(long)]
        artist: Option<String>,
    },
    /// Clear the queue and stop playback
    QueueClear,
    /// Get or set the volume (0-100)
    Volume { level: Option<u8> },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("quaverctl: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let socket_path = match args.socket {
        Some(path) => path,
        None => {
            let config = BootstrapConfig::load().unwrap_or_default();
            match &config.socket_path {
                Some(path) => path.clone(),
                None => {
                    let data_dir = resolve_data_dir(None, &config);
                    runtime_dir(&data_dir).join("control.sock")
                }
            }
        }
    };
    let client = ControlClient::new(socket_path);

    let request = build_request(&args.command)?;
    let response = client.send(&request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return match response {
            Response::Ok { .. } => Ok(()),
            Response::Error { message, .. } => Err(anyhow::anyhow!(message)),
        };
    }

    match response {
        Response::Ok { payload } => {
            print_payload(&args.command, payload)?;
            Ok(())
        }
        Response::Error { message, .. } => Err(anyhow::anyhow!(message)),
    }
}

fn build_request(command: &Command) -> Result<Request> {
    let request = match command {
        Command::Play => Request::new("play"),
        Command::PlayAt { position } => {
            if *position == 0 {
                anyhow::bail!("positions are 1-based, as printed by `queue`");
            }
            Request::with_args("play-at", serde_json::json!({ "index": position - 1 }))
        }
        Command::Shuffle { state } => {
            Request::with_args("shuffle", serde_json::json!({ "enabled": state == "on" }))
        }
        Command::Repeat { mode } => {
            Request::with_args("repeat", serde_json::json!({ "mode": mode }))
        }
        Command::Pause => Request::new("pause"),
        Command::Next => Request::new("next"),
        Command::Previous => Request::new("previous"),
        Command::Seek { target } => {
            Request::with_args("seek", serde_json::json!({ "target": target }))
        }
        Command::Status => Request::new("status"),
        Command::Now => Request::new("now"),
        Command::Queue => Request::new("queue"),
        Command::QueueAdd { ids, title, artist } => {
            if ids.len() > 1 && (title.is_some() || artist.is_some()) {
                anyhow::bail!("--title/--artist only apply to a single id");
            }
            let tracks: Vec<Track> = ids
                .iter()
                .map(|id| Track {
                    id: id.clone(),
                    title: title.clone().unwrap_or_else(|| id.clone()),
                    artist: artist.clone().unwrap_or_default(),
                    album: None,
                    duration_secs: None,
                })
                .collect();
            Request::with_args("queue-add", serde_json::json!({ "tracks": tracks }))
        }
        Command::QueueClear => Request::new("queue-clear"),
        Command::Volume { level } => match level {
            Some(level) => Request::with_args("volume", serde_json::json!({ "volume": level })),
            None => Request::new("volume"),
        },
    };
    Ok(request)
}

fn print_payload(command: &Command, payload: Option<serde_json::Value>) -> Result<()> {
    match command {
        Command::Status => {
            let Some(payload) = payload else { return Ok(()) };
            let status: StatusPayload = serde_json::from_value(payload)?;
            println!("state:   {}", status.state);
            match &status.track {
                Some(track) => println!("track:   {} - {}", track.artist, track.title),
                None => println!("track:   (none)"),
            }
            println!(
                "at:      {} / {}",
                format_clock(status.position_secs),
                status
                    .duration_secs
                    .map(format_clock)
                    .unwrap_or_else(|| "?".into())
            );
            println!("volume:  {}", status.volume);
            println!(
                "queue:   {} tracks{}",
                status.queue_length,
                status
                    .queue_position
                    .map(|p| format!(" (at {})", p + 1))
                    .unwrap_or_default()
            );
            println!("shuffle: {}   repeat: {}", status.shuffle, status.repeat);
            println!(
                "cache:   {} entries, {:.1} MiB of {:.1} MiB",
                status.cache_entries,
                status.cache_bytes as f64 / (1024.0 * 1024.0),
                status.cache_budget_bytes as f64 / (1024.0 * 1024.0)
            );
        }
        Command::Now => match payload {
            Some(payload) => {
                let now: NowPayload = serde_json::from_value(payload)?;
                println!(
                    "{} - {} [{} / {}] ({})",
                    now.track.artist,
                    now.track.title,
                    format_clock(now.position_secs),
                    now.duration_secs
                        .map(format_clock)
                        .unwrap_or_else(|| "?".into()),
                    now.state
                );
            }
            None => println!("nothing playing"),
        },
        Command::Queue => {
            let Some(payload) = payload else { return Ok(()) };
            let queue: QueuePayload = serde_json::from_value(payload)?;
            if queue.items.is_empty() {
                println!("queue is empty");
                return Ok(());
            }
            for item in &queue.items {
                let marker = if item.current { "*" } else { " " };
                println!(
                    "{} {:3}  {} - {}",
                    marker,
                    item.index + 1,
                    item.track.artist,
                    item.track.title
                );
            }
            println!("shuffle: {}   repeat: {}", queue.shuffle, queue.repeat);
        }
        Command::Volume { .. } => {
            if let Some(payload) = payload {
                let volume: VolumePayload = serde_json::from_value(payload)?;
                println!("volume: {}", volume.volume);
            }
        }
        Command::Seek { .. } => {
            if let Some(payload) = payload {
                if let Some(position) = payload.get("position_secs").and_then(|v| v.as_f64()) {
                    println!("position: {}", format_clock(position));
                }
            }
        }
        _ => {
            // Simple commands: success is silent
        }
    }
    Ok(())
}
