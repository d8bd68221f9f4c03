//! Tally CLI - command line front end over the sync layer.
//!
//! Each invocation loads `~/.tally/config.toml`, restores the persisted
//! session, runs one command through [`tally_core::TallyClient`], and exits.
//! Reads go through the scoped cache; writes go through the mutation
//! coordinator, so a command that writes and then lists sees fresh data.

mod commands;
mod output;

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::slice;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tally_config::TallyConfig;
use tally_core::tally_gateway::{GatewayConfig, HttpGateway};
use tally_core::tally_types::{TaskForm, TaskPatch, TaskScope, TaskTitle};
use tally_core::{FileSessionStorage, SessionStore, TallyClient};

use commands::{AddArgs, Cli, Commands, CredentialArgs, EditArgs, FolderCmd, ListArgs, TaskCmd};

type Client = TallyClient<HttpGateway>;

/// Stdout carries command output only. Logs go to a file; when no log file
/// can be opened, warnings and errors go to stderr instead.
fn init_tracing() {
    let mut failures = Vec::new();
    let candidates = log_file_candidates(tally_config::tally_dir());

    match open_log_file(&candidates, &mut failures) {
        Some((path, file)) => {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"));
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(env_filter)
                .init();
            tracing::debug!(path = %path.display(), "Logging to file");
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr).with_target(false))
                .with(EnvFilter::new("warn"))
                .init();
        }
    }
    for failure in failures {
        tracing::warn!("{failure}");
    }
}

/// First candidate that can be opened for appending. Every candidate that
/// could not is described in `failures`.
fn open_log_file(candidates: &[PathBuf], failures: &mut Vec<String>) -> Option<(PathBuf, File)> {
    candidates.iter().find_map(|candidate| {
        if let Some(dir) = candidate.parent()
            && let Err(err) = fs::create_dir_all(dir)
        {
            failures.push(format!("cannot create log dir {}: {err}", dir.display()));
            return None;
        }
        match OpenOptions::new().create(true).append(true).open(candidate) {
            Ok(file) => Some((candidate.clone(), file)),
            Err(err) => {
                failures.push(format!("cannot open log file {}: {err}", candidate.display()));
                None
            }
        }
    })
}

/// `<tally dir>/logs/tally.log`, then `./.tally/logs/tally.log`.
fn log_file_candidates(tally_dir: Option<PathBuf>) -> Vec<PathBuf> {
    tally_dir
        .into_iter()
        .chain([PathBuf::from(".tally")])
        .map(|dir| dir.join("logs").join("tally.log"))
        .collect()
}

fn connect(config: &TallyConfig) -> Result<Client> {
    let session_path = config
        .session
        .resolved_path()
        .context("cannot locate the session file: no home directory")?;
    let session = SessionStore::new(Arc::new(FileSessionStorage::new(session_path)));
    if config.session.clear_on_start {
        session.clear().context("failed to clear stored session")?;
    }

    let mut gateway_config = GatewayConfig::new(config.server.base_url()?);
    gateway_config.request_timeout = config.server.request_timeout();
    gateway_config.connect_timeout = config.server.connect_timeout();
    gateway_config.https_only = config.server.https_only;
    let gateway = HttpGateway::new(&gateway_config, Arc::new(session.clone()))?;
    tracing::debug!(base_url = %gateway.base_url(), "Gateway ready");

    let client = TallyClient::new(Arc::new(gateway), session);
    client.restore()?;
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = TallyConfig::load().context("failed to load config")?;
    let client = connect(&config)?;

    match cli.command {
        Commands::Login(args) => login(&client, args, false, cli.json).await,
        Commands::Register(args) => login(&client, args, true, cli.json).await,
        Commands::Logout => {
            client.logout();
            println!("Signed out.");
            Ok(())
        }
        Commands::Whoami => match client.session() {
            Some(session) => output::print_session(&session, cli.json),
            None => bail!("not signed in"),
        },
        Commands::Folders(cmd) => folders(&client, cmd, cli.json).await,
        Commands::Tasks(cmd) => tasks(&client, cmd, cli.json).await,
    }
}

async fn login(client: &Client, args: CredentialArgs, register: bool, json: bool) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => read_password()?,
    };
    let session = if register {
        client.register(&args.username, &password).await?
    } else {
        client.login(&args.username, &password).await?
    };
    output::print_session(&session, json)
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn folders(client: &Client, cmd: FolderCmd, json: bool) -> Result<()> {
    let mutations = client.mutations();
    match cmd {
        FolderCmd::List => {
            let folders = client.store().folders().await?;
            output::print_folders(&folders, json)
        }
        FolderCmd::Add { name } => {
            let folder = mutations.create_folder(&name).await?;
            output::print_folders(slice::from_ref(&folder), json)
        }
        FolderCmd::Rename { id, name } => {
            let folder = mutations.rename_folder(id, &name).await?;
            output::print_folders(slice::from_ref(&folder), json)
        }
        FolderCmd::Rm { id } => {
            mutations.remove_folder(id).await?;
            println!("Deleted folder {id} and its tasks.");
            Ok(())
        }
    }
}

async fn tasks(client: &Client, cmd: TaskCmd, json: bool) -> Result<()> {
    let mutations = client.mutations();
    match cmd {
        TaskCmd::List(args) => list_tasks(client, args, json).await,
        TaskCmd::Add(args) => {
            let task = mutations.create_task(&form(args)).await?;
            output::print_tasks(slice::from_ref(&task), &[], json)
        }
        TaskCmd::Edit(args) => {
            let current = client.store().find_task(args.id).await?;
            let patch = patch(args)?;
            if patch.is_empty() {
                bail!("nothing to change");
            }
            let task = mutations.update_task(&current, &patch).await?;
            output::print_tasks(slice::from_ref(&task), &[], json)
        }
        TaskCmd::Done { id } => {
            let task = mutations.set_completion(id, true).await?;
            output::print_tasks(slice::from_ref(&task), &[], json)
        }
        TaskCmd::Undo { id } => {
            let task = mutations.set_completion(id, false).await?;
            output::print_tasks(slice::from_ref(&task), &[], json)
        }
        TaskCmd::Rm { id } => {
            mutations.remove_task(id).await?;
            println!("Deleted task {id}.");
            Ok(())
        }
    }
}

async fn list_tasks(client: &Client, args: ListArgs, json: bool) -> Result<()> {
    let store = client.store();
    if let Some(folder) = args.folder {
        client.selection().select(folder);
    }
    // Reconciles the selection: a folder that no longer exists is dropped.
    let folders = store.folders().await?;
    if let Some(folder) = args.folder
        && client.selection().get() != Some(folder)
    {
        bail!("no folder with id {folder}");
    }

    let tasks = if args.unfiled {
        let tasks = store.tasks(TaskScope::Unfiled).await?;
        args.filter.apply(&tasks).into_iter().cloned().collect()
    } else {
        store.selected_tasks(args.filter).await?
    };
    output::print_tasks(&tasks, &folders, json)
}

fn form(args: AddArgs) -> TaskForm {
    TaskForm {
        title: args.title,
        task_type: args.task_type,
        priority: args.priority,
        start_time: args.start,
        frequency: args.frequency,
        context: args.context,
        folder_id: args.folder,
    }
}

fn patch(args: EditArgs) -> Result<TaskPatch> {
    let folder = match (args.folder, args.unfile) {
        (Some(folder), _) => Some(Some(folder)),
        (None, true) => Some(None),
        (None, false) => None,
    };
    Ok(TaskPatch {
        title: args.title.map(TaskTitle::new).transpose()?,
        task_type: args.task_type,
        priority: args.priority,
        start_time: args.start,
        frequency: args.frequency,
        context: args.context,
        folder,
    })
}
