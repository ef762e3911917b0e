use clap::{Parser, Subcommand};
use colored::*;
use eyre::{Result, eyre};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tasklist::{Config, KeyValueStore, MemoryKv, NoticeLevel, StoreEvent, Task, TaskError, TaskStore, transfer};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tasklist")]
#[command(about = "tasklist - Task list manager with local persistence and JSON import/export")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Keep state in memory only for this run
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new task
    Add {
        /// Task text
        text: Vec<String>,
    },

    /// List tasks in the current (or given) filter
    List {
        /// all, active or completed
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Toggle a task between active and completed
    Toggle { id: u64 },

    /// Replace a task's text
    Edit {
        id: u64,
        /// New task text
        text: Vec<String>,
    },

    /// Delete a task
    Delete {
        id: u64,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete all completed tasks
    ClearCompleted {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Set the saved filter (all, active, completed)
    Filter { filter: String },

    /// Show task counts
    Stats,

    /// Write all tasks to todo-tasks-<date>.json
    Export {
        /// Output directory (default from config)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Replace all tasks with the contents of an export file
    Import {
        file: PathBuf,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_ref())?;
    config.validate()?;

    let provider: Box<dyn KeyValueStore> = if cli.ephemeral {
        Box::new(MemoryKv::new())
    } else {
        config.open_backend()?
    };

    let mut store = TaskStore::new(provider).with_key(config.storage.key.clone());
    store.subscribe(print_notice);
    store.load();

    run(&cli.command, &mut store, &config)
}

fn run<P: KeyValueStore>(command: &Commands, store: &mut TaskStore<P>, config: &Config) -> Result<()> {
    match command {
        Commands::Add { text } => {
            let task = store.add_task(&text.join(" "))?;
            print_task(&task, false);
        }
        Commands::List { filter } => {
            if let Some(name) = filter {
                store.set_filter_str(name)?;
            }
            let mut shown = 0;
            for task in store.visible_tasks() {
                print_task(task, store.editing_id() == Some(task.id));
                shown += 1;
            }
            if shown == 0 {
                println!("{}", "No tasks to show".dimmed());
            }
            println!("{}", store.counter_summary().to_string().bold());
        }
        Commands::Toggle { id } => {
            let task = store.toggle_task(*id)?;
            print_task(&task, false);
        }
        Commands::Edit { id, text } => {
            store.begin_edit(*id)?;
            match store.commit_edit(*id, &text.join(" ")) {
                Ok(task) => print_task(&task, false),
                Err(e) => {
                    store.cancel_edit();
                    return Err(e.into());
                }
            }
        }
        Commands::Delete { id, yes } => {
            let text = store.get(*id).map(|t| t.text.clone()).ok_or(TaskError::NotFound(*id))?;
            if *yes || confirm(&format!("Are you sure you want to delete \"{}\"?", text))? {
                store.delete_task(*id)?;
            }
        }
        Commands::ClearCompleted { yes } => {
            let completed = store.counter_summary().completed;
            if completed == 0
                || *yes
                || confirm(&format!(
                    "Are you sure you want to delete {} completed task(s)?",
                    completed
                ))?
            {
                store.clear_completed();
            }
        }
        Commands::Filter { filter } => {
            store.set_filter_str(filter)?;
            println!("Filter set to {}", store.current_filter().to_string().cyan());
        }
        Commands::Stats => {
            let summary = store.counter_summary();
            println!(
                "{} active, {} completed, {} total",
                summary.active.to_string().yellow(),
                summary.completed.to_string().green(),
                summary.total
            );
            println!("{}", summary);
        }
        Commands::Export { out } => {
            let contents = store.export_snapshot()?;
            let dir = out.clone().unwrap_or_else(|| config.export_dir());
            let path = transfer::write_export(&dir, &contents, chrono::Local::now().date_naive())?;
            println!("{} {}", "Tasks exported to".green(), path.display());
        }
        Commands::Import { file, yes } => {
            let raw = transfer::read_import(file)?;
            let preview = store.preview_import(&raw)?;
            let prompt = format!(
                "This will replace your current {} task(s) with {} task(s) from the file. Continue?",
                preview.current, preview.incoming
            );
            if *yes || confirm(&prompt)? {
                store.import_snapshot(&raw)?;
            }
        }
    }

    Ok(())
}

fn print_task(task: &Task, editing: bool) {
    let mark = if task.completed { "[x]".green() } else { "[ ]".normal() };
    let text = if task.completed {
        task.text.dimmed().strikethrough()
    } else {
        task.text.normal()
    };
    let suffix = if editing { " (editing)".yellow() } else { "".normal() };
    println!("{:>4} {} {}{}", task.id.to_string().cyan(), mark, text, suffix);
}

fn print_notice(event: &StoreEvent) {
    if let StoreEvent::Notice { level, message } = event {
        let line = match level {
            NoticeLevel::Success => message.green(),
            NoticeLevel::Warning => message.yellow(),
            NoticeLevel::Error => message.red(),
        };
        eprintln!("{}", line);
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    let read = io::stdin().lock().read_line(&mut answer)?;
    if read == 0 {
        return Err(eyre!("No confirmation received (use --yes to skip the prompt)"));
    }
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklist::TaskFilter;

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["tasklist", "add", "Buy", "milk"]).unwrap();
        match cli.command {
            Commands::Add { text } => assert_eq!(text.join(" "), "Buy milk"),
            _ => panic!("expected add"),
        }

        let cli = Cli::try_parse_from(["tasklist", "--ephemeral", "import", "tasks.json", "--yes"]).unwrap();
        assert!(cli.ephemeral);
        assert!(matches!(cli.command, Commands::Import { yes: true, .. }));

        assert!(Cli::try_parse_from(["tasklist", "toggle", "abc"]).is_err());
    }

    #[test]
    fn test_run_against_memory_store() {
        let config = Config::default();
        let mut store = TaskStore::new(MemoryKv::new());

        run(&Commands::Add { text: vec!["a".to_string()] }, &mut store, &config).unwrap();
        run(&Commands::Toggle { id: 1 }, &mut store, &config).unwrap();
        run(&Commands::ClearCompleted { yes: true }, &mut store, &config).unwrap();
        assert!(store.tasks().is_empty());

        let err = run(
            &Commands::Filter {
                filter: "bogus".to_string(),
            },
            &mut store,
            &config,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid filter"));
        assert_eq!(store.current_filter(), TaskFilter::All);
    }
}
