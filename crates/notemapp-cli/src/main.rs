//! notemapp: Command-line front end for local map notes synced to Google Drive.
//!
//! Uses the same note-sync engine as the browser app, but runs as a native
//! binary with a file-backed store and an HTTP drive client.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use notemapp_cli::config::{self, Config, DATA_DIR_ENV, TOKEN_ENV};
use notemapp_cli::{FileStore, GoogleDrive};

use note_sync::{Note, NoteId, NoteRepository, SyncEngine, SyncOutcome};

#[derive(Parser, Debug)]
#[command(name = "notemapp")]
#[command(about = "Map notes with Google Drive sync")]
struct Args {
    /// Directory holding the local note stores
    #[arg(long, env = DATA_DIR_ENV)]
    data_dir: Option<String>,

    /// Google Drive OAuth bearer token
    #[arg(long, env = TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    /// Delete local notes whose drive file is gone
    #[arg(long)]
    remote_cleanup: bool,

    /// Remove drive files on delete instead of writing a tombstone
    #[arg(long)]
    hard_delete: bool,

    /// Do not mirror metadata and view prefs in `.props` files
    #[arg(long)]
    no_props: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List notes, most recently modified first
    List,
    /// Create an empty note
    New {
        /// Note title
        #[arg(default_value = "")]
        title: String,
    },
    /// Rename a note
    Rename { id: String, title: String },
    /// Delete a note locally and, with a token, on the drive
    Delete {
        id: String,
        /// Skip the drive even when a token is configured
        #[arg(long)]
        local_only: bool,
    },
    /// Append the features of a GeoJSON file to a note
    Import { id: String, file: PathBuf },
    /// Print a note's features as GeoJSON
    Export {
        id: String,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Sync all local notes with the drive, then pick up notes created elsewhere
    Sync,
}

type Store = Arc<FileStore>;

fn parse_id(id: &str) -> Result<NoteId> {
    id.parse().with_context(|| format!("Invalid note id {:?}", id))
}

fn print_note(note: &Note) {
    println!("{}  {}  {}", note.id, note.modified_on, note.title);
}

async fn run_sync(config: &Config, store: Store) -> Result<()> {
    let token = config.require_token()?;
    let engine = SyncEngine::with_config(store, GoogleDrive::new(token), config.sync.clone());

    let notes = engine.local_notes().await?;
    info!(count = notes.len(), "syncing local notes");

    let report = engine
        .sync_all(
            &notes,
            &|id, progress| {
                if progress < 0 {
                    warn!(note_id = %id, "sync failed");
                }
            },
            &|note| println!("added    {}  {}", note.id, note.title),
        )
        .await;

    for (id, outcome) in &report.local.outcomes {
        let label = match outcome {
            SyncOutcome::Created => "uploaded",
            SyncOutcome::Pushed => "pushed",
            SyncOutcome::Pulled => "pulled",
            SyncOutcome::DeletedLocally => "deleted",
            SyncOutcome::Failed => "FAILED",
        };
        println!("{:<8} {}", label, id);
    }
    for id in &report.remote.removed {
        println!("removed  {}", id);
    }
    for name in &report.remote.skipped {
        println!("skipped  {}", name);
    }
    if let Some(reason) = &report.remote.aborted {
        bail!("Remote discovery aborted: {}", reason);
    }

    let failed = report.local.count(SyncOutcome::Failed);
    if failed > 0 {
        bail!("{} note(s) failed to sync", failed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,note_sync=debug,notemapp_cli=debug"
    } else {
        "info,note_sync=info,notemapp_cli=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::new(
        args.data_dir.as_deref(),
        args.token.clone(),
        config::sync_config(args.remote_cleanup, args.hard_delete, args.no_props),
    );
    info!("Data directory: {:?}", config.data_dir);

    let store: Store = Arc::new(FileStore::new(config.data_dir.clone()));
    let repo = NoteRepository::new(Arc::clone(&store));

    match args.command {
        Command::List => {
            for note in repo.list_notes().await? {
                print_note(&note);
            }
        }
        Command::New { title } => {
            let note = repo.create_note(&title).await?;
            print_note(&note);
        }
        Command::Rename { id, title } => {
            let note = repo.rename_note(&parse_id(&id)?, &title).await?;
            print_note(&note);
        }
        Command::Delete { id, local_only } => {
            let id = parse_id(&id)?;
            match config.token.as_deref() {
                Some(token) if !local_only => {
                    let engine = SyncEngine::with_config(
                        Arc::clone(&store),
                        GoogleDrive::new(token),
                        config.sync.clone(),
                    );
                    engine.delete_note(&id).await?;
                }
                _ => {
                    if !local_only {
                        warn!("No drive token configured; deleting locally only");
                    }
                    repo.delete_note(&id).await?;
                }
            }
            println!("deleted  {}", id);
        }
        Command::Import { id, file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let id = parse_id(&id)?;
            let note = repo.import_features(&id, &text).await?;
            let count = repo.load_features(&id).await?.len();
            println!("{} now has {} feature(s)", note.id, count);
        }
        Command::Export { id, output } => {
            let text = repo.export_features(&parse_id(&id)?).await?;
            match output {
                Some(path) => tokio::fs::write(&path, text)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => println!("{}", text),
            }
        }
        Command::Sync => run_sync(&config, store).await?,
    }

    Ok(())
}
