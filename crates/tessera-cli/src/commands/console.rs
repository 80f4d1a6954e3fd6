//! Interactive console over the orchestrator.

use std::path::PathBuf;

use anyhow::Result;
use tessera_config::RuntimeConfig;
use tessera_runtime::{ComponentId, RuntimeOrchestrator};

use crate::repl::{ReadlineEvent, ReplEditor};
use crate::theme::{Theme, print_components};

/// First words the console understands, used for completion.
pub(crate) const COMMAND_NAMES: &[&str] = &[
    "load",
    "loadall",
    "deploy",
    "start",
    "stop",
    "delete",
    "list",
    "loadconfig",
    "shutdown",
    "help",
    "quit",
];

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    Load(PathBuf),
    LoadAll(PathBuf),
    Deploy(ComponentId),
    StartRuntime,
    Start(ComponentId),
    Stop(ComponentId),
    Delete(ComponentId),
    List,
    LoadConfig(PathBuf),
    Shutdown,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one line. Blank lines yield `Ok(None)`.
    pub(crate) fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = words.collect();

        let path = |usage: &str| -> Result<PathBuf, String> {
            match rest.as_slice() {
                [p] => Ok(PathBuf::from(p)),
                _ => Err(format!("usage: {name} {usage}")),
            }
        };
        let id = || -> Result<ComponentId, String> {
            match rest.as_slice() {
                [raw] => raw
                    .parse()
                    .map_err(|_| format!("'{raw}' is not a component id")),
                _ => Err(format!("usage: {name} <id>")),
            }
        };
        let bare = |command: Self| -> Result<Self, String> {
            if rest.is_empty() {
                Ok(command)
            } else {
                Err(format!("'{name}' takes no arguments"))
            }
        };

        let command = match name.to_ascii_lowercase().as_str() {
            "load" => Self::Load(path("<unit>")?),
            "loadall" => Self::LoadAll(path("<dir>")?),
            "deploy" => Self::Deploy(id()?),
            "start" if rest.is_empty() => Self::StartRuntime,
            "start" => Self::Start(id()?),
            "stop" => Self::Stop(id()?),
            "delete" => Self::Delete(id()?),
            "list" => bare(Self::List)?,
            "loadconfig" => Self::LoadConfig(path("<snapshot>")?),
            "shutdown" => bare(Self::Shutdown)?,
            "help" => bare(Self::Help)?,
            "quit" | "exit" => bare(Self::Quit)?,
            other => return Err(format!("unknown command '{other}' (try 'help')")),
        };
        Ok(Some(command))
    }
}

/// Whether the console keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Exit,
}

fn print_help() {
    println!("{}", Theme::header("Commands"));
    let rows = [
        ("load <unit>", "load a unit as a new component"),
        ("loadall <dir>", "load every .unit file in a directory"),
        ("deploy <id>", "deploy a component (copies it if not Loaded)"),
        ("start", "start the runtime again after a shutdown"),
        ("start <id>", "start a deployed component"),
        ("stop <id>", "stop a started component"),
        ("delete <id>", "delete a component"),
        ("list", "list components"),
        ("loadconfig <snapshot>", "replace all components from a snapshot"),
        ("shutdown", "stop everything and clear the registry"),
        ("help", "show this help"),
        ("quit", "leave the console"),
    ];
    for (usage, text) in rows {
        println!("  {usage:<24} {}", Theme::dimmed(text));
    }
}

/// Run one command against `runtime`.
pub(crate) fn execute(runtime: &RuntimeOrchestrator, command: ConsoleCommand) -> Flow {
    let outcome = match command {
        ConsoleCommand::Load(path) => runtime
            .load_component(&path)
            .map(|id| format!("loaded {} as component {id}", path.display())),
        ConsoleCommand::LoadAll(dir) => runtime
            .load_all(&dir)
            .map(|ids| format!("loaded {} components from {}", ids.len(), dir.display())),
        ConsoleCommand::Deploy(id) => runtime.deploy_by_id(id).map(|deployed| {
            if deployed == id {
                format!("deployed component {id}")
            } else {
                format!("component {id} was not Loaded; deployed a copy as {deployed}")
            }
        }),
        ConsoleCommand::StartRuntime => runtime
            .start()
            .map(|()| "runtime started".to_string()),
        ConsoleCommand::Start(id) => runtime
            .start_by_id(id)
            .map(|()| format!("started component {id}")),
        ConsoleCommand::Stop(id) => runtime
            .stop_by_id(id)
            .map(|()| format!("stopped component {id}")),
        ConsoleCommand::Delete(id) => runtime
            .delete_by_id(id)
            .map(|()| format!("deleted component {id}")),
        ConsoleCommand::List => {
            match runtime.list_components() {
                Ok(summaries) => print_components(&summaries),
                Err(e) => println!("{}", Theme::error(&e.to_string())),
            }
            return Flow::Continue;
        },
        ConsoleCommand::LoadConfig(path) => runtime
            .load_config(&path)
            .map(|count| format!("recreated {count} components from {}", path.display())),
        ConsoleCommand::Shutdown => runtime
            .shutdown()
            .map(|()| "runtime shut down".to_string()),
        ConsoleCommand::Help => {
            print_help();
            return Flow::Continue;
        },
        ConsoleCommand::Quit => return Flow::Exit,
    };

    match outcome {
        Ok(message) => println!("{}", Theme::success(&message)),
        Err(e) => println!("{}", Theme::error(&e.to_string())),
    }
    Flow::Continue
}

/// Start a runtime from `config` and open the console on it.
pub(crate) fn run_console(config: &RuntimeConfig) -> Result<()> {
    let runtime = RuntimeOrchestrator::from_config(config);
    runtime.start()?;
    console_loop(&runtime)
}

/// Read and execute commands until `quit` or end of input.
///
/// A runtime that is still running afterwards is shut down.
pub(crate) fn console_loop(runtime: &RuntimeOrchestrator) -> Result<()> {
    println!("{}", Theme::header("Tessera console"));
    println!("{}", Theme::dimmed("type 'help' for commands"));
    println!("{}", Theme::separator());

    let mut editor = ReplEditor::new()?;
    loop {
        let line = match editor.readline() {
            ReadlineEvent::Line(line) => line,
            ReadlineEvent::Interrupted => continue,
            ReadlineEvent::Eof => break,
        };
        match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => {
                if execute(runtime, command) == Flow::Exit {
                    break;
                }
            },
            Ok(None) => {},
            Err(message) => println!("{}", Theme::warning(&message)),
        }
    }

    if runtime.is_running() {
        println!("{}", Theme::info("shutting down runtime"));
        runtime.shutdown()?;
    }
    Ok(())
}
