mod errors;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use snafu::ResultExt;

use errors::{IoSnafu, RepositorySnafu, Result, StorageSnafu, SyncSnafu};
use tasklist_core::ActorId;
use tasklist_repository::Repository;
use tasklist_storage::{SledStorage, StorageAdapter};
use tasklist_sync::{SyncEngine, SyncEngineConfig};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding this device's sled database.
    #[arg(long, default_value = "./tasklist-data")]
    data_dir: PathBuf,

    /// Base URL of a sync server; required by `sync` and `serve`.
    #[arg(long)]
    sync_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new list.
    CreateList { list_id: String, title: String, #[arg(long)] after: Option<String>, #[arg(long)] before: Option<String> },
    /// Remove a list (undoable).
    RemoveList { list_id: String },
    /// Rename a list.
    RenameList { list_id: String, title: String },
    /// Add a task to a list.
    AddTask { list_id: String, item_id: String, text: String, #[arg(long)] after: Option<String>, #[arg(long)] before: Option<String> },
    /// Edit a task's text and/or note.
    UpdateTask { list_id: String, item_id: String, #[arg(long)] text: Option<String>, #[arg(long)] note: Option<String> },
    /// Flip a task's done flag.
    ToggleTask { list_id: String, item_id: String },
    /// Remove a task (undoable).
    RemoveTask { list_id: String, item_id: String },
    /// Move a task to a different position, optionally in a different list.
    MoveTask {
        from_list: String,
        to_list: String,
        item_id: String,
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        before: Option<String>,
    },
    /// Fold one task's text into another and remove the absorbed one.
    MergeTask { list_id: String, survivor_id: String, absorbed_id: String },
    /// Undo the last undoable action.
    Undo,
    /// Redo the last undone action.
    Redo,
    /// Print the registry, or one list's tasks if `list_id` is given.
    Show { list_id: Option<String> },
    /// Print a portable JSON export of the whole dataset.
    Export,
    /// Run one push/pull cycle against `--sync-url`.
    Sync,
    /// Run the sync poll loop until Enter is pressed.
    Serve {
        #[arg(long, default_value_t = 3)]
        poll_interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    std::fs::create_dir_all(&args.data_dir).context(IoSnafu { path: args.data_dir.display().to_string() })?;
    let storage = Arc::new(
        SledStorage::open(&args.data_dir).context(StorageSnafu { path: args.data_dir.display().to_string() })?,
    );
    let actor = load_or_generate_actor_id(&storage).await?;
    let repository = Arc::new(Repository::new(storage.clone(), actor.clone()));
    repository.initialize().await.context(RepositorySnafu)?;

    run(&args, repository, storage, actor).await
}

async fn run(args: &Args, repository: Arc<Repository<SledStorage>>, storage: Arc<SledStorage>, actor: ActorId) -> Result<()> {
    match &args.command {
        Command::CreateList { list_id, title, after, before } => {
            let registry = repository
                .create_list(list_id.clone(), title.clone(), after.as_deref(), before.as_deref())
                .await
                .context(RepositorySnafu)?;
            print_registry(&registry);
        }
        Command::RemoveList { list_id } => {
            let registry = repository.remove_list(list_id).await.context(RepositorySnafu)?;
            print_registry(&registry);
        }
        Command::RenameList { list_id, title } => {
            let state = repository.rename_list(list_id, title.clone()).await.context(RepositorySnafu)?;
            print_list(list_id, &state);
        }
        Command::AddTask { list_id, item_id, text, after, before } => {
            let state = repository
                .insert_task(list_id, item_id.clone(), text.clone(), after.as_deref(), before.as_deref())
                .await
                .context(RepositorySnafu)?;
            print_list(list_id, &state);
        }
        Command::UpdateTask { list_id, item_id, text, note } => {
            let state = repository
                .update_task(list_id, item_id, text.clone(), note.clone().map(Some))
                .await
                .context(RepositorySnafu)?;
            print_list(list_id, &state);
        }
        Command::ToggleTask { list_id, item_id } => {
            let state = repository.toggle_task(list_id, item_id).await.context(RepositorySnafu)?;
            print_list(list_id, &state);
        }
        Command::RemoveTask { list_id, item_id } => {
            let state = repository.remove_task(list_id, item_id).await.context(RepositorySnafu)?;
            print_list(list_id, &state);
        }
        Command::MoveTask { from_list, to_list, item_id, after, before } => {
            let (from_state, to_state) = repository
                .move_task(from_list, to_list, item_id, after.as_deref(), before.as_deref())
                .await
                .context(RepositorySnafu)?;
            print_list(from_list, &from_state);
            if to_list != from_list {
                print_list(to_list, &to_state);
            }
        }
        Command::MergeTask { list_id, survivor_id, absorbed_id } => {
            let state = repository.merge_task(list_id, survivor_id, absorbed_id).await.context(RepositorySnafu)?;
            print_list(list_id, &state);
        }
        Command::Undo => {
            let applied = repository.undo().await.context(RepositorySnafu)?;
            println!("{}", if applied { "undone" } else { "nothing to undo" });
        }
        Command::Redo => {
            let applied = repository.redo().await.context(RepositorySnafu)?;
            println!("{}", if applied { "redone" } else { "nothing to redo" });
        }
        Command::Show { list_id } => match list_id {
            Some(list_id) => {
                let state = repository.get_list_state(list_id).await.context(RepositorySnafu)?;
                print_list(list_id, &state);
            }
            None => {
                let registry = repository.get_registry_snapshot().await.context(RepositorySnafu)?;
                print_registry(&registry);
            }
        },
        Command::Export => {
            let json = repository.build_export_snapshot().await.context(RepositorySnafu)?;
            println!("{json}");
        }
        Command::Sync => {
            let engine = build_engine(args, storage, repository, actor)?;
            engine.sync_once().await.context(SyncSnafu)?;
            println!("synced against {}", args.sync_url.as_deref().unwrap_or(""));
        }
        Command::Serve { poll_interval_secs } => {
            let engine = Arc::new(build_engine_with_interval(
                args,
                storage,
                repository,
                actor,
                Duration::from_secs(*poll_interval_secs),
            )?);
            engine.initialize().await.context(SyncSnafu)?;
            let _polling = engine.spawn_polling();
            log::info!("syncing against {} every {poll_interval_secs}s", args.sync_url.as_deref().unwrap_or(""));
            wait_for_enter().context(IoSnafu { path: "<stdin>".to_string() })?;
        }
    }
    Ok(())
}

fn build_engine(
    args: &Args,
    storage: Arc<SledStorage>,
    repository: Arc<Repository<SledStorage>>,
    actor: ActorId,
) -> Result<SyncEngine<SledStorage>> {
    build_engine_with_interval(args, storage, repository, actor, Duration::from_secs(3))
}

fn build_engine_with_interval(
    args: &Args,
    storage: Arc<SledStorage>,
    repository: Arc<Repository<SledStorage>>,
    actor: ActorId,
    poll_interval: Duration,
) -> Result<SyncEngine<SledStorage>> {
    let base_url = args.sync_url.clone().unwrap_or_else(|| {
        eprintln!("--sync-url is required for this command");
        std::process::exit(2);
    });
    let mut config = SyncEngineConfig::new(base_url, actor.as_ref());
    config.poll_interval = poll_interval;
    SyncEngine::new(storage, repository, config).context(SyncSnafu)
}

fn print_registry(entries: &[tasklist_crdt::registry::RegistryEntrySnapshot]) {
    for entry in entries {
        println!("{}\t{}", entry.id, entry.title);
    }
}

fn print_list(list_id: &str, state: &tasklist_crdt::tasklist::ListState) {
    println!("{list_id}: {}", state.title);
    for task in &state.tasks {
        let mark = if task.done { "x" } else { " " };
        print!("  [{mark}] {}\t{}", task.id, task.text);
        if let Some(note) = &task.note {
            print!("  ({note})");
        }
        println!();
    }
}

async fn load_or_generate_actor_id(storage: &SledStorage) -> Result<ActorId> {
    if let Some(actor) = storage.load_actor_id().await.context(StorageSnafu { path: "<actor id>".to_string() })? {
        return Ok(actor);
    }
    let actor = ActorId::generate();
    storage.persist_actor_id(actor.clone()).await.context(StorageSnafu { path: "<actor id>".to_string() })?;
    Ok(actor)
}

fn wait_for_enter() -> std::io::Result<()> {
    use std::io::BufRead;
    println!("Press Enter to stop syncing...");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(())
}
