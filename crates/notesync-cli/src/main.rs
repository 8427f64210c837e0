//! notesync CLI
//!
//! Thin wrapper around notesync-core functions for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Create an identity (or import one with `identity import <hex>`)
//! notesync identity generate
//!
//! # Write a note
//! notesync note add "Groceries" "milk, eggs" --tag shopping
//!
//! # List notes
//! notesync note list
//!
//! # Push local changes and pull remote ones
//! notesync sync
//!
//! # Re-fetch everything, ignoring the last sync time
//! notesync sync --full
//!
//! # Send a direct message
//! notesync dm send <pubkey> "Hello!"
//!
//! # Follow a topic
//! notesync topic follow rust
//!
//! # Manage relays
//! notesync relay add wss://relay.example.com
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use notesync_core::{Note, NoteSyncEngine, Ontology, OntologyNode};
use tracing::debug;

/// notesync - encrypted personal notes synced through relays
#[derive(Parser)]
#[command(name = "notesync")]
#[command(version = "0.1.0")]
#[command(about = "notesync - encrypted personal notes synced through relays")]
#[command(
    long_about = "Local-first personal notes, encrypted to your own key and replicated through public relays."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.notesync)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show identity, relays and sync state
    Info,

    /// Identity management
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Note management
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// Ontology (taxonomy tree) management
    Ontology {
        #[command(subcommand)]
        action: OntologyAction,
    },

    /// Run one sync cycle
    ///
    /// An incremental sync only fetches copies stamped after the last sync.
    /// Edits made offline on another device before that time are missed;
    /// run with --full to pick them up.
    Sync {
        /// Ignore the last sync time and fetch everything
        #[arg(long)]
        full: bool,
    },

    /// Direct messages
    Dm {
        #[command(subcommand)]
        action: DmAction,
    },

    /// Public topic feeds
    Topic {
        #[command(subcommand)]
        action: TopicAction,
    },

    /// Relay management
    Relay {
        #[command(subcommand)]
        action: RelayAction,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Generate a new identity
    Generate {
        /// Replace an existing identity
        #[arg(long)]
        force: bool,
    },
    /// Import an identity from its hex private key
    Import {
        /// 64-character hex private key
        secret: String,
    },
    /// Show the public key
    Show,
    /// Print the private key (keep it secret)
    Export,
    /// Forget the identity on this device
    Logout,
}

#[derive(Subcommand)]
enum NoteAction {
    /// Create a note
    Add {
        title: String,
        content: String,
        /// Tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Key=value pair (repeatable)
        #[arg(long = "value")]
        values: Vec<String>,
    },
    /// Edit a note
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        /// Replace the tags (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// List notes, most recently updated first
    List,
    /// Show one note
    Show { id: String },
    /// Delete a note
    Delete { id: String },
    /// Publish a note in the clear
    Publish { id: String },
    /// Show pending local changes
    Pending,
}

#[derive(Subcommand)]
enum OntologyAction {
    /// Print the tree
    Show,
    /// Add a node
    AddNode {
        label: String,
        /// Parent node id
        #[arg(long)]
        parent: Option<String>,
    },
}

#[derive(Subcommand)]
enum DmAction {
    /// Send a direct message
    Send {
        /// Recipient public key (hex)
        recipient: String,
        text: String,
    },
    /// Print incoming messages until interrupted
    Listen,
    /// List stored messages
    List {
        /// Only messages exchanged with this public key
        #[arg(long)]
        peer: Option<String>,
    },
}

#[derive(Subcommand)]
enum TopicAction {
    /// Print public notes tagged with a topic until interrupted
    Follow { tag: String },
}

#[derive(Subcommand)]
enum RelayAction {
    /// List configured relays
    List,
    /// Add a relay
    Add { url: String },
    /// Remove a relay
    Remove { url: String },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.notesync)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".notesync")
}

/// Parse `key=value`
fn parse_value(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Invalid value '{}': expected key=value", raw))?;
    if key.is_empty() {
        anyhow::bail!("Invalid value '{}': empty key", raw);
    }
    Ok((key.to_string(), value.to_string()))
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn load_note(engine: &NoteSyncEngine, id: &str) -> Result<Note> {
    engine
        .get_note(id)?
        .with_context(|| format!("Note not found: {}", id))
}

fn print_node(ontology: &Ontology, node: &OntologyNode, depth: usize) {
    println!("{}- {} ({})", "  ".repeat(depth + 1), node.label, node.id);
    for child in node.children.iter().filter_map(|id| ontology.nodes.get(id)) {
        print_node(ontology, child, depth + 1);
    }
}

async fn wait_for_interrupt() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    println!();
    println!("Stopped.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    debug!(?data_dir, "Opening engine");
    let engine = NoteSyncEngine::new(&data_dir).await?;

    match cli.command {
        Commands::Info => {
            println!("notesync v0.1.0");
            println!();
            println!("Identity:");
            match engine.public_key() {
                Some(pk) => println!("  Public key: {}", pk),
                None => println!("  (not logged in)"),
            }
            println!();
            println!("Relays:");
            for relay in engine.relays() {
                println!("  {}", relay);
            }
            println!();
            println!("Data directory: {}", engine.data_dir().display());
            println!("Notes: {}", engine.list_notes()?.len());
            println!("Pending changes: {}", engine.pending_mutations()?.len());
            match engine.storage().last_synced_at()? {
                Some(at) => println!("Last synced: {}", local_time(at)),
                None => println!("Last synced: never"),
            }
        }

        Commands::Identity { action } => match action {
            IdentityAction::Generate { force } => {
                if engine.is_logged_in() && !force {
                    println!("An identity already exists on this device.");
                    println!();
                    println!("Replacing it clears this device's notes, including changes not yet synced.");
                    println!("To confirm, run: notesync identity generate --force");
                } else {
                    let pk = engine.generate_identity()?;
                    println!("Identity created.");
                    println!("  Public key: {}", pk);
                    println!();
                    println!("Back up your private key with: notesync identity export");
                }
            }

            IdentityAction::Import { secret } => {
                let pk = engine.import_identity(secret.trim())?;
                println!("Identity imported.");
                println!("  Public key: {}", pk);
            }

            IdentityAction::Show => match engine.public_key() {
                Some(pk) => {
                    println!("Identity:");
                    println!("  Public key: {}", pk);
                }
                None => println!("Not logged in."),
            },

            IdentityAction::Export => {
                println!("{}", engine.export_secret_key()?);
            }

            IdentityAction::Logout => {
                engine.logout()?;
                println!("Logged out.");
            }
        },

        Commands::Note { action } => match action {
            NoteAction::Add {
                title,
                content,
                tags,
                values,
            } => {
                let mut note = Note::new(title, content).with_tags(tags);
                for raw in &values {
                    let (key, value) = parse_value(raw)?;
                    note = note.with_value(key, value);
                }
                let note = engine.save_note(note)?;
                println!("Note created.");
                println!("  ID: {}", note.id);
            }

            NoteAction::Edit {
                id,
                title,
                content,
                tags,
            } => {
                let mut note = load_note(&engine, &id)?;
                if title.is_none() && content.is_none() && tags.is_empty() {
                    anyhow::bail!("Nothing to change: pass --title, --content or --tag");
                }
                if let Some(title) = title {
                    note.title = title;
                }
                if let Some(content) = content {
                    note.content = content;
                }
                if !tags.is_empty() {
                    note.tags = tags;
                }
                engine.save_note(note)?;
                println!("Note updated.");
            }

            NoteAction::List => {
                let notes = engine.list_notes()?;
                if notes.is_empty() {
                    println!("No notes yet.");
                    println!();
                    println!("  Create one with:");
                    println!("  notesync note add \"Title\" \"Content\"");
                } else {
                    println!("Notes ({}):", notes.len());
                    println!();
                    for note in notes {
                        let synced = if note.sync_event_id.is_some() { " " } else { "*" };
                        println!("{} {}  {}", synced, note.id, note.title);
                        println!("    updated {}", local_time(note.updated_at));
                    }
                }
            }

            NoteAction::Show { id } => {
                let note = load_note(&engine, &id)?;
                println!("{}", note.title);
                println!("  ID: {}", note.id);
                println!("  Updated: {}", local_time(note.updated_at));
                if !note.tags.is_empty() {
                    println!("  Tags: {}", note.tags.join(", "));
                }
                for (key, value) in &note.values {
                    println!("  {}: {}", key, value);
                }
                if let Some(event_id) = &note.sync_event_id {
                    println!("  Synced as: {}", event_id);
                }
                println!();
                println!("{}", note.content);
            }

            NoteAction::Delete { id } => {
                engine.delete_note(&id)?;
                println!("Note deleted.");
            }

            NoteAction::Publish { id } => {
                let report = engine.publish_note_publicly(&id).await?;
                println!(
                    "Published to {}/{} relays.",
                    report.accepted_count(),
                    report.outcomes.len()
                );
                println!("  Event: {}", report.event_id);
            }

            NoteAction::Pending => {
                let pending = engine.pending_mutations()?;
                if pending.is_empty() {
                    println!("Nothing pending.");
                } else {
                    for entry in pending {
                        println!(
                            "  {:?} {} (queued {})",
                            entry.action,
                            entry.entity_id,
                            local_time(entry.queued_at)
                        );
                    }
                }
            }
        },

        Commands::Ontology { action } => match action {
            OntologyAction::Show => {
                let ontology = engine.ontology()?;
                if ontology.nodes.is_empty() {
                    println!("Ontology is empty.");
                } else {
                    println!("Ontology:");
                    for node in ontology.root_ids.iter().filter_map(|id| ontology.nodes.get(id)) {
                        print_node(&ontology, node, 0);
                    }
                }
            }

            OntologyAction::AddNode { label, parent } => {
                let mut ontology = engine.ontology()?;
                if let Some(parent) = &parent {
                    if !ontology.nodes.contains_key(parent) {
                        anyhow::bail!("Unknown parent node: {}", parent);
                    }
                }
                let id = ontology.add_node(label, parent.as_deref());
                engine.update_ontology(ontology)?;
                println!("Node added.");
                println!("  ID: {}", id);
            }
        },

        Commands::Sync { full } => {
            let report = engine.run_sync_cycle(full).await?;
            println!("Sync complete.");
            println!("  Ontology: {:?}", report.ontology);
            println!("  Updated: {}", report.notes_updated.len());
            println!("  Removed: {}", report.notes_removed.len());
            println!("  Published: {}", report.notes_published.len());
            println!("  Deleted remotely: {}", report.notes_tombstoned.len());
            if !report.failures.is_empty() {
                println!();
                println!("Skipped {} item(s):", report.failures.len());
                for failure in &report.failures {
                    println!("  {}: {}", failure.item, failure.error);
                }
            }
        }

        Commands::Dm { action } => match action {
            DmAction::Send { recipient, text } => {
                let message = engine.send_direct_message(&recipient, &text).await?;
                println!("Message sent.");
                println!("  ID: {}", message.id);
            }

            DmAction::Listen => {
                engine
                    .subscribe_direct_messages(|message| {
                        println!("[{}] {}:", local_time(message.created_at), message.from);
                        println!("    {}", message.content);
                    })
                    .await?;
                println!("Listening for direct messages (Ctrl+C to stop)...");
                wait_for_interrupt().await?;
            }

            DmAction::List { peer } => {
                let messages = engine.direct_messages(peer.as_deref())?;
                if messages.is_empty() {
                    println!("No messages.");
                } else {
                    let me = engine.public_key().unwrap_or_default();
                    for message in messages {
                        let who = if message.from == me {
                            format!("You -> {}", message.to)
                        } else {
                            message.from.clone()
                        };
                        println!("[{}] {}", local_time(message.created_at), who);
                        println!("    {}", message.content);
                    }
                }
            }
        },

        Commands::Topic { action } => match action {
            TopicAction::Follow { tag } => {
                engine
                    .subscribe_to_topic(&tag, |note| {
                        let title = note.title.as_deref().unwrap_or("(untitled)");
                        println!("[{}] {} by {}", local_time(note.published_at), title, note.author);
                        println!("    {}", note.content);
                    })
                    .await?;
                println!("Following #{} (Ctrl+C to stop)...", tag.trim_start_matches('#'));
                wait_for_interrupt().await?;
            }
        },

        Commands::Relay { action } => match action {
            RelayAction::List => {
                let relays = engine.relays();
                if relays.is_empty() {
                    println!("No relays configured.");
                } else {
                    println!("Relays:");
                    for relay in relays {
                        println!("  {}", relay);
                    }
                }
            }

            RelayAction::Add { url } => {
                engine.add_relay(&url)?;
                println!("Relay added: {}", url);
            }

            RelayAction::Remove { url } => {
                if engine.remove_relay(&url)? {
                    println!("Relay removed: {}", url);
                } else {
                    anyhow::bail!("Relay not configured: {}", url);
                }
            }
        },
    }

    Ok(())
}
