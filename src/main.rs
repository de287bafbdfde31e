//! Binary entrypoint for the meshchat CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml`
//! - `replay <file>` - feed a JSONL event log through ingestion and print
//!   the resulting state or one projected conversation
//! - `scan` - list candidate serial ports (requires the `serial` feature)
//!
//! See the library crate docs for module-level details: `meshchat::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use meshchat::config::Config;
use meshchat::ingest;
use meshchat::model::{ChatTarget, TraceState};
use meshchat::projection::project_conversation;
use meshchat::store::ConversationStore;

#[derive(Parser)]
#[command(name = "meshchat")]
#[command(about = "A conversation state engine for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new meshchat configuration
    Init,
    /// Replay a JSONL event log through the engine and print the result
    Replay {
        /// Path to a file with one JSON event frame per line
        file: String,

        /// Project the conversation for this channel index
        #[arg(long, conflicts_with = "dm")]
        channel: Option<u32>,

        /// Project the direct conversation with this node id
        #[arg(long)]
        dm: Option<String>,
    },
    /// List candidate serial ports for the radio link
    #[cfg(feature = "serial")]
    Scan,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init writes the config later; everything else may load it for the
    // logging section.
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            println!("Created {}", cli.config);
            println!("Edit the [connection] section for your device, then try:");
            println!("  meshchat replay <events.jsonl>");
        }
        Commands::Replay { file, channel, dm } => {
            let store = replay_file(&file).await?;
            let target = match (channel, dm) {
                (Some(index), _) => Some(ChatTarget::Channel {
                    index,
                    name: format!("Channel {index}"),
                }),
                (None, Some(node_id)) => {
                    let name = store
                        .node(&node_id)
                        .map(|n| n.display_name().to_string())
                        .unwrap_or_else(|| node_id.clone());
                    Some(ChatTarget::Direct { node_id, name })
                }
                (None, None) => None,
            };
            match target {
                Some(target) => print_conversation(&store, &target),
                None => print_summary(&store),
            }
        }
        #[cfg(feature = "serial")]
        Commands::Scan => {
            let ports = meshchat::transport::scan_serial_ports()?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                match port.description {
                    Some(desc) => println!("{}  ({desc})", port.address),
                    None => println!("{}", port.address),
                }
            }
        }
    }

    Ok(())
}

async fn replay_file(path: &str) -> Result<ConversationStore> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut store = ConversationStore::new();
    let mut applied = 0usize;
    let mut rejected = 0usize;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match ingest::apply_json(&mut store, line) {
            Ok(()) => applied += 1,
            Err(_) => rejected += 1,
        }
    }
    info!("replayed {applied} events from {path}");
    if rejected > 0 {
        warn!("{rejected} frames were rejected");
    }
    Ok(store)
}

fn print_summary(store: &ConversationStore) {
    let status = store.status();
    println!(
        "Connection: {}",
        if status.connected {
            format!(
                "{} {}",
                status
                    .connection_type
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "?".into()),
                status.address.as_deref().unwrap_or("?")
            )
        } else {
            "disconnected".to_string()
        }
    );
    println!("Nodes: {}", store.nodes().len());
    for node in store.nodes() {
        let mut extras = Vec::new();
        if let Some(metrics) = &node.device_metrics {
            if let Some(batt) = metrics.battery_level {
                extras.push(format!("batt={batt}%"));
            }
        }
        if let Some(pos) = &node.position {
            if let (Some(lat), Some(lon)) = (pos.latitude, pos.longitude) {
                extras.push(format!("lat={lat:.4} lon={lon:.4}"));
            }
        }
        if let Some(snr) = node.snr {
            extras.push(format!("snr={snr:.1}"));
        }
        println!("  {} {}  {}", node.id, node.display_name(), extras.join(" "));
    }
    println!("Channels: {}", store.channels().len());
    for channel in store.channels() {
        println!("  [{}] {} ({})", channel.index, channel.name, channel.role);
    }
    println!("Messages: {}", store.messages().len());
    if store.total_unread() > 0 {
        println!("Unread: {} total", store.total_unread());
        for (key, count) in store.unread_counts() {
            println!("  {key}: {count}");
        }
    }
    match store.trace_state() {
        TraceState::Idle => {}
        TraceState::Pending { target } => println!("Trace: pending toward {target}"),
        TraceState::TimedOut { target } => println!("Trace: timed out toward {target}"),
        TraceState::Complete(result) => {
            println!(
                "Trace: {} via {:?} (snr {:?})",
                result.from, result.route, result.snr_towards
            );
        }
    }
}

fn print_conversation(store: &ConversationStore, target: &ChatTarget) {
    let view = project_conversation(store, target);
    if view.is_empty() {
        println!("(no messages)");
        return;
    }
    for entry in view {
        let msg = &entry.message;
        let direction = if msg.is_outgoing { ">" } else { "<" };
        if let Some(reply) = &entry.reply {
            println!("    ┌ {}: {}", reply.sender, reply.text);
        }
        println!(
            "{} {} {} [{:?}] {}",
            msg.timestamp.format("%H:%M:%S"),
            direction,
            msg.sender,
            msg.ack_status,
            msg.text
        );
        for tally in &entry.reactions {
            println!("      {} x{} ({})", tally.emoji, tally.senders.len(), tally.senders.join(", "));
        }
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the config level.
    let level = match verbosity {
        0 => config
            .as_ref()
            .map(|c| c.logging.level.as_str())
            .unwrap_or("info")
            .parse()
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(path) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            let file = std::sync::Arc::new(std::sync::Mutex::new(f));
            // When stdout is not a TTY (redirected/piped) skip console
            // output to avoid duplicate lines.
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
