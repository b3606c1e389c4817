use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use noscopy::client::Client;
use noscopy::collector::{Collector, MultiClient};
use noscopy::config::Config;
use noscopy::event::{EventTemplate, KeySigner, Signer, KIND_FILE_HEADER, KIND_NOTE};
use noscopy::filter::Filter;
use noscopy::nip95::{encode_file, FileEncodeOptions};
use noscopy::relay_info::fetch_relay_info;

/// Command line interface entry point.
#[derive(Parser)]
#[command(name = "noscopy", author, version, about = "Nostr relay client and event copier")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "noscopy.toml")]
    config: String,
    /// Verbose logging.
    #[arg(long, global = true)]
    debug: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Generate a fresh keypair.
    Generate,
    /// Query a relay and print matching events as JSON lines.
    Query {
        /// Relay WebSocket URL.
        relay: String,
        #[arg(long)]
        ids: Vec<String>,
        #[arg(long)]
        authors: Vec<String>,
        #[arg(long)]
        kinds: Vec<u32>,
        #[arg(long)]
        since: Option<u64>,
        #[arg(long)]
        until: Option<u64>,
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Copy events from source relays to a destination relay.
    Copy {
        /// Source relay URLs.
        #[arg(long, required = true)]
        from: Vec<String>,
        /// Destination relay URL.
        #[arg(long)]
        to: String,
        /// Specific event ids to copy.
        #[arg(long)]
        ids: Vec<String>,
        /// Copy events authored by these pubkeys.
        #[arg(long)]
        authors: Vec<String>,
        /// Per-author cap.
        #[arg(long, default_value_t = 500)]
        limit: u64,
    },
    /// Replicate a configured profile to its destination relay.
    Collect {
        /// Profile name from the configuration file.
        profile: String,
        /// Per-author cap.
        #[arg(long, default_value_t = 500)]
        limit: u64,
    },
    /// Show a relay's information document.
    Info {
        /// Relay WebSocket URL.
        relay: String,
    },
    /// Sign and publish a note.
    Send {
        /// Relay WebSocket URL.
        relay: String,
        /// Note content.
        message: String,
        /// 64-hex-char secret key.
        #[arg(long)]
        seckey: String,
        /// Event kind.
        #[arg(long, default_value_t = KIND_NOTE)]
        kind: u32,
    },
    /// File storage on relays.
    File {
        #[command(subcommand)]
        command: FileCommands,
    },
}

#[derive(Subcommand)]
enum FileCommands {
    /// Split, sign, and publish a file.
    Upload {
        /// Relay WebSocket URL.
        relay: String,
        /// File to upload.
        path: PathBuf,
        /// 64-hex-char secret key.
        #[arg(long)]
        seckey: String,
        /// MIME type of the file.
        #[arg(long)]
        mime: Option<String>,
        /// Maximum encoded JSON length per event.
        #[arg(long, default_value_t = 65536)]
        max_message_size: usize,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        alt: Option<String>,
    },
    /// List file headers stored on a relay.
    Ls {
        /// Relay WebSocket URL.
        relay: String,
        /// Only files published by this pubkey.
        #[arg(long)]
        author: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn build_filter(
    ids: Vec<String>,
    authors: Vec<String>,
    kinds: Vec<u32>,
    since: Option<u64>,
    until: Option<u64>,
    limit: Option<u64>,
) -> Filter {
    let mut filter = Filter::new();
    if !ids.is_empty() {
        filter = filter.ids(ids);
    }
    if !authors.is_empty() {
        filter = filter.authors(authors);
    }
    if !kinds.is_empty() {
        filter = filter.kinds(kinds);
    }
    if let Some(ts) = since {
        filter = filter.since(ts);
    }
    if let Some(ts) = until {
        filter = filter.until(ts);
    }
    if let Some(n) = limit {
        filter = filter.limit(n);
    }
    filter
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Generate => {
            let signer = KeySigner::generate();
            println!("seckey: {}", signer.seckey_hex());
            println!("pubkey: {}", signer.pubkey());
        }
        Commands::Query {
            relay,
            ids,
            authors,
            kinds,
            since,
            until,
            limit,
        } => {
            let client = Client::connect(&relay).await?;
            let filter = build_filter(ids, authors, kinds, since, until, limit);
            let mut saved = client.query_saved(filter);
            while let Some(ev) = saved.next().await? {
                println!("{}", serde_json::to_string(&ev)?);
            }
            client.close();
        }
        Commands::Copy {
            from,
            to,
            ids,
            authors,
            limit,
        } => {
            let dest = Client::connect(&to).await?;
            let mut sources = Vec::new();
            for url in &from {
                match Client::connect(url).await {
                    Ok(client) => sources.push(client),
                    Err(e) => warn!(url = %url, error = %e, "source relay unreachable"),
                }
            }
            anyhow::ensure!(!sources.is_empty(), "no source relay reachable");
            let multi = MultiClient::new(sources.clone());
            let mut copied = 0usize;
            if !ids.is_empty() {
                for (_, ev) in multi.get_events(&ids).await {
                    if dest.try_publish(ev).await.published {
                        copied += 1;
                    }
                }
            }
            for author in &authors {
                for source in &sources {
                    let filter = Filter::new().authors([author.as_str()]).limit(limit);
                    let mut saved = source.query_saved(filter);
                    while let Some(ev) = saved.next().await? {
                        if dest.try_publish(ev).await.published {
                            copied += 1;
                        }
                    }
                }
            }
            println!("copied {copied} events to {to}");
        }
        Commands::Collect { profile, limit } => {
            let config = Config::load(&cli.config)?;
            let profile = config.resolve(&profile)?;
            let collector = Collector::new(profile, limit);
            let summary = collector.run().await?;
            println!(
                "copied {} events and {} profiles",
                summary.events, summary.profiles
            );
        }
        Commands::Info { relay } => {
            let info = fetch_relay_info(&relay).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Send {
            relay,
            message,
            seckey,
            kind,
        } => {
            let signer = KeySigner::from_hex(&seckey)?;
            let event = signer.sign(&EventTemplate {
                kind,
                created_at: unix_now(),
                tags: vec![],
                content: message,
            })?;
            let id = event.id.clone();
            let client = Client::connect(&relay).await?;
            let ack = client.publish(event).await?;
            if ack.is_duplicate {
                println!("{id} (already on relay)");
            } else {
                println!("{id}");
            }
            client.close();
        }
        Commands::File { command } => match command {
            FileCommands::Upload {
                relay,
                path,
                seckey,
                mime,
                max_message_size,
                description,
                alt,
            } => {
                let signer = KeySigner::from_hex(&seckey)?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "file".into());
                let reader = std::fs::File::open(&path)?;
                let events = encode_file(
                    reader,
                    &signer,
                    FileEncodeOptions {
                        max_message_size,
                        file_name,
                        mime_type: mime,
                        description,
                        alt,
                        created_at: None,
                    },
                )?;
                let client = Client::connect(&relay).await?;
                let mut header_id = None;
                let mut chunks = 0usize;
                for event in events {
                    let event = event?;
                    if header_id.is_none() {
                        header_id = Some(event.id.clone());
                    } else {
                        chunks += 1;
                    }
                    client.publish(event).await?;
                }
                println!(
                    "uploaded {} in {chunks} chunks",
                    header_id.unwrap_or_default()
                );
                client.close();
            }
            FileCommands::Ls {
                relay,
                author,
                limit,
            } => {
                let client = Client::connect(&relay).await?;
                let mut filter = Filter::new().kinds([KIND_FILE_HEADER]).limit(limit);
                if let Some(author) = author {
                    filter = filter.authors([author]);
                }
                let mut saved = client.query_saved(filter);
                while let Some(ev) = saved.next().await? {
                    let name = ev.tag_values("name").next().unwrap_or("?");
                    let size = ev.tag_values("size").next().unwrap_or("?");
                    let mime = ev.tag_values("m").next().unwrap_or("?");
                    println!("{}  {name}  {size}  {mime}", ev.id);
                }
                client.close();
            }
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = if cli.debug { "noscopy=debug" } else { "noscopy=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();
    run(cli).await
}
