//! Claimlog Command-Line Tool
//!
//! Inspect and repair unique constraint claims stored in a sled log.

mod output;

use std::path::PathBuf;

use claimlog_core::{ClaimStore, LogConfig, Sha256KeyDeriver, SledLog, StreamKeyDeriver};
use clap::{Parser, Subcommand};
use output::{ActionView, HistoryEntry, OutputFormat, OwnerView, StreamView};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Claimlog operator tool
#[derive(Parser, Debug)]
#[command(name = "claimlog")]
#[command(version, about = "Inspect and repair unique constraint claims")]
pub struct Args {
    /// Directory of the constraint log
    #[arg(short, long, default_value = "./claimlog_data")]
    pub data: PathBuf,

    /// Output format
    #[arg(long, default_value = "text", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the stream identifier derived for a value
    StreamId { constraint: String, value: String },

    /// Print the current owner of a value
    Owner { constraint: String, value: String },

    /// Print every event recorded for a value
    History { constraint: String, value: String },

    /// Claim a value for an owner
    Claim {
        constraint: String,
        value: String,
        owner: String,
    },

    /// Release an owner's claim on a value
    Release {
        constraint: String,
        value: String,
        owner: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("claimlog=info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let format = args.format;

    // Deriving a stream id needs no storage.
    if let Command::StreamId { constraint, value } = &args.command {
        let stream_id = Sha256KeyDeriver.derive(constraint, value);
        let view = StreamView {
            constraint,
            value,
            stream_id: &stream_id,
        };
        println!("{}", output::format_stream(&view, format)?);
        return Ok(());
    }

    let log = SledLog::open(LogConfig::new(&args.data))?;
    if log.was_recovered() {
        info!(path = %args.data.display(), "opened existing constraint log");
    }
    let store = ClaimStore::new(log);

    match &args.command {
        Command::StreamId { .. } => {}
        Command::Owner { constraint, value } => {
            let claim = store.current_claim(constraint, value)?;
            println!("{}", output::format_owner(&OwnerView::from(&claim), format)?);
        }
        Command::History { constraint, value } => {
            let stream = store.stream_id(constraint, value);
            let entries: Vec<HistoryEntry> = store
                .log()
                .history(&stream)?
                .into_iter()
                .map(HistoryEntry::from)
                .collect();
            println!("{}", output::format_history(&entries, format)?);
        }
        Command::Claim {
            constraint,
            value,
            owner,
        } => {
            store.claim(constraint, value, owner)?;
            store.log().flush()?;
            info!(constraint = %constraint, owner = %owner, "claim recorded");
            let view = ActionView {
                action: "claimed",
                constraint,
                value,
                owner,
            };
            println!("{}", output::format_action(&view, format)?);
        }
        Command::Release {
            constraint,
            value,
            owner,
        } => {
            store.release(constraint, value, owner)?;
            store.log().flush()?;
            info!(constraint = %constraint, owner = %owner, "release recorded");
            let view = ActionView {
                action: "released",
                constraint,
                value,
                owner,
            };
            println!("{}", output::format_action(&view, format)?);
        }
    }

    Ok(())
}
