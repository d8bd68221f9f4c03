use clap::{Args, Parser, Subcommand};
use tally_core::tally_types::{
    FolderId, Frequency, Priority, StartTime, TaskFilter, TaskId, TaskType,
};

#[derive(Parser, Debug)]
#[command(name = "tally", about = "Tasks and folders, synced with the Tally backend", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in and remember the session
    Login(CredentialArgs),
    /// Create an account and sign in
    Register(CredentialArgs),
    /// Forget the stored session
    Logout,
    /// Show who is signed in
    Whoami,
    /// Folder management
    #[command(subcommand)]
    Folders(FolderCmd),
    /// Task management
    #[command(subcommand)]
    Tasks(TaskCmd),
}

#[derive(Args, Debug)]
pub struct CredentialArgs {
    pub username: String,
    /// Read from stdin when omitted
    #[arg(long)]
    pub password: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum FolderCmd {
    /// List folders
    List,
    /// Create a folder
    Add { name: String },
    /// Rename a folder
    Rename { id: FolderId, name: String },
    /// Delete a folder and every task in it
    Rm { id: FolderId },
}

#[derive(Subcommand, Debug)]
pub enum TaskCmd {
    /// List tasks (default: all of them)
    List(ListArgs),
    /// Create a task
    Add(AddArgs),
    /// Change fields of a task
    Edit(EditArgs),
    /// Mark a task done
    Done { id: TaskId },
    /// Mark a task not done
    Undo { id: TaskId },
    /// Delete a task
    Rm { id: TaskId },
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only tasks in this folder
    #[arg(long, conflicts_with = "unfiled")]
    pub folder: Option<FolderId>,
    /// Only tasks outside every folder
    #[arg(long)]
    pub unfiled: bool,
    /// all, active, or completed
    #[arg(long, default_value = "all")]
    pub filter: TaskFilter,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub title: String,
    /// coding, study, shopping, or exercise
    #[arg(long = "type")]
    pub task_type: String,
    /// low, medium, or high
    #[arg(long)]
    pub priority: String,
    /// YYYY-MM-DDTHH:MM
    #[arg(long)]
    pub start: String,
    /// none, daily, or weekly
    #[arg(long)]
    pub frequency: Option<String>,
    #[arg(long)]
    pub context: Option<String>,
    #[arg(long)]
    pub folder: Option<FolderId>,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    pub id: TaskId,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long = "type")]
    pub task_type: Option<TaskType>,
    #[arg(long)]
    pub priority: Option<Priority>,
    #[arg(long, value_parser = StartTime::parse)]
    pub start: Option<StartTime>,
    #[arg(long)]
    pub frequency: Option<Frequency>,
    #[arg(long)]
    pub context: Option<String>,
    /// Move into this folder
    #[arg(long, conflicts_with = "unfile")]
    pub folder: Option<FolderId>,
    /// Move out of its folder
    #[arg(long)]
    pub unfile: bool,
}
