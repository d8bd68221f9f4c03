use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;
use tally_core::Session;
use tally_core::tally_types::{Folder, FolderId, Frequency, Task};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Identity<'a> {
    user_id: i64,
    display_name: &'a str,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// The session without its credential.
pub fn print_session(session: &Session, json: bool) -> Result<()> {
    if json {
        return print_json(&Identity {
            user_id: session.user_id.value(),
            display_name: &session.display_name,
        });
    }
    println!("{} (user {})", session.display_name, session.user_id);
    Ok(())
}

pub fn format_task(task: &Task, folders: &HashMap<FolderId, &str>) -> String {
    let mark = if task.completed { "x" } else { " " };
    let mut line = format!(
        "{:>5} [{mark}] {}  {}/{}  {}",
        task.id.value(), task.title, task.task_type, task.priority, task.start_time
    );
    if !matches!(task.frequency, Frequency::None) {
        line.push_str(&format!("  {}", task.frequency));
    }
    if let Some(folder) = task.folder_id {
        match folders.get(&folder) {
            Some(name) => line.push_str(&format!("  #{name}")),
            None => line.push_str(&format!("  #{folder}")),
        }
    }
    if !task.context.is_empty() {
        line.push_str(&format!("  ({})", task.context));
    }
    line
}

pub fn print_tasks(tasks: &[Task], folders: &[Folder], json: bool) -> Result<()> {
    if json {
        return print_json(tasks);
    }
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    let names = folder_names(folders);
    for task in tasks {
        println!("{}", format_task(task, &names));
    }
    Ok(())
}

pub fn format_folder(folder: &Folder) -> String {
    format!("{:>5}  {}", folder.id.value(), folder.name)
}

pub fn print_folders(folders: &[Folder], json: bool) -> Result<()> {
    if json {
        return print_json(folders);
    }
    if folders.is_empty() {
        println!("No folders.");
        return Ok(());
    }
    for folder in folders {
        println!("{}", format_folder(folder));
    }
    Ok(())
}

fn folder_names(folders: &[Folder]) -> HashMap<FolderId, &str> {
    folders
        .iter()
        .map(|folder| (folder.id, folder.name.as_str()))
        .collect()
}
