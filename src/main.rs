use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use ollama_chat::config::{self, EnvOverrides};
use ollama_chat::providers::{ChatError, ChatProvider, OllamaClient};
use ollama_chat::services::export::{export_file_name, export_to_markdown};
use ollama_chat::services::{
    spawn_autosave, ChatController, ChatStore, ConnectionStatus, Database, PersistenceService,
    SubmitOutcome,
};

const HELP: &str = "\
Type a message to chat. Ctrl-C stops a running answer, or exits when idle.

  /new                 start a new chat
  /list                list chats
  /switch <n>          switch to chat n
  /rename <title>      rename the current chat
  /delete [n]          delete chat n (default: current)
  /clear               delete all chats
  /models              list models on the server
  /model <name>        use another model
  /system <prompt>     set the system prompt for new requests
  /url <endpoint>      connect to another server
  /export [path]       save the current chat as markdown
  /stats               show statistics of the last answer
  /help                show this help
  /quit                exit";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    New,
    List,
    Switch(usize),
    Rename(String),
    Delete(Option<usize>),
    Clear,
    Models,
    Model(String),
    System(String),
    Url(String),
    Export(Option<PathBuf>),
    Stats,
    Help,
    Quit,
}

impl Command {
    /// Parse the text after the leading `/`. Chat numbers are 1-based.
    fn parse(input: &str) -> Result<Self, String> {
        let (name, arg) = match input.trim().split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (input.trim(), ""),
        };
        let index = |arg: &str| -> Result<usize, String> {
            match arg.parse::<usize>() {
                Ok(n) if n > 0 => Ok(n - 1),
                _ => Err(format!("Not a chat number: {:?}", arg)),
            }
        };
        let required = |arg: &str, what: &str| -> Result<String, String> {
            if arg.is_empty() {
                Err(format!("/{} needs {}", name, what))
            } else {
                Ok(arg.to_string())
            }
        };

        match name {
            "new" => Ok(Command::New),
            "list" | "ls" => Ok(Command::List),
            "switch" => Ok(Command::Switch(index(arg)?)),
            "rename" => Ok(Command::Rename(required(arg, "a title")?)),
            "delete" | "rm" if arg.is_empty() => Ok(Command::Delete(None)),
            "delete" | "rm" => Ok(Command::Delete(Some(index(arg)?))),
            "clear" => Ok(Command::Clear),
            "models" => Ok(Command::Models),
            "model" => Ok(Command::Model(required(arg, "a model name")?)),
            "system" => Ok(Command::System(required(arg, "a prompt")?)),
            "url" => Ok(Command::Url(required(arg, "an endpoint")?)),
            "export" if arg.is_empty() => Ok(Command::Export(None)),
            "export" => Ok(Command::Export(Some(PathBuf::from(arg)))),
            "stats" => Ok(Command::Stats),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(format!("Unknown command /{} (try /help)", other)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let overrides = EnvOverrides::from_env();
    let db = Database::open(overrides.db_path.clone())
        .await
        .context("Failed to open chat database")?;

    let mut state = PersistenceService::load(&db).await;
    if let Some(url) = overrides.endpoint_url {
        state.settings.endpoint_url = url;
    }
    if let Some(model) = overrides.model {
        state.settings.current_model = model;
    }

    let store = ChatStore::new(state);
    let autosave = spawn_autosave(store.clone(), db.clone());

    let client = match OllamaClient::new(&store.settings().endpoint_url) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("{}; falling back to {}", e, config::DEFAULT_ENDPOINT);
            store.set_endpoint_url(config::DEFAULT_ENDPOINT);
            OllamaClient::default()
        }
    };
    let controller = Arc::new(ChatController::new(store.clone(), Arc::new(client)));

    report_connection(&controller).await;
    println!("Model: {}  (/help for commands)", store.settings().current_model);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            prompt();
            continue;
        }

        if let Some(input) = line.strip_prefix('/') {
            match Command::parse(input) {
                Ok(Command::Quit) => break,
                Ok(command) => {
                    if let Err(e) = run_command(&controller, command).await {
                        eprintln!("{:#}", e);
                    }
                }
                Err(message) => eprintln!("{}", message),
            }
        } else {
            chat(&controller, line).await;
        }
        prompt();
    }

    autosave.abort();
    PersistenceService::save(&db, &store.snapshot())
        .await
        .context("Failed to save chat state")?;
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn report_connection(controller: &ChatController) {
    match controller.refresh_connection().await {
        ConnectionStatus::Connected { models } => {
            println!(
                "Connected to {} ({} models)",
                controller.store().settings().endpoint_url,
                models.len()
            );
        }
        ConnectionStatus::Disconnected { banner } => eprintln!("{}", banner),
    }
}

async fn chat(controller: &Arc<ChatController>, line: &str) {
    let stopper = controller.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    let outcome = controller
        .submit_with(line, |fragment| {
            print!("{}", fragment);
            let _ = std::io::stdout().flush();
        })
        .await;
    ctrl_c.abort();

    match outcome {
        Ok(SubmitOutcome::Completed { stats, .. }) => {
            println!();
            if let Some(stats) = stats {
                println!(
                    "[{}ms · {} tokens/s · {} tokens]",
                    stats.response_time_ms, stats.tokens_per_second, stats.tokens_generated
                );
            }
        }
        Ok(SubmitOutcome::Cancelled { .. }) => println!("\n[stopped]"),
        Ok(SubmitOutcome::Failed { error, .. }) => {
            println!("\n{}", config::FAILURE_NOTICE);
            let endpoint = controller.store().settings().endpoint_url;
            eprintln!("{}", failure_hint(&error, &endpoint));
        }
        Err(ChatError::Busy) => eprintln!("A response is still being generated"),
        Err(e) => eprintln!("{}", e),
    }
}

/// Explain a failed answer: a banner when the server was never reached,
/// a cut-off note when the stream broke partway.
fn failure_hint(error: &ChatError, endpoint: &str) -> String {
    if error.is_connection_error() {
        format!("{} ({})", config::connection_banner(endpoint), error)
    } else if error.is_interruption() {
        format!("The answer was cut off before it finished ({})", error)
    } else {
        format!("({})", error)
    }
}

async fn run_command(controller: &ChatController, command: Command) -> Result<()> {
    let store = controller.store();

    match command {
        Command::New => {
            store.create_session();
            println!("Started a new chat");
        }
        Command::List => {
            let current = store.current_session_id();
            let sessions = store.sessions();
            if sessions.is_empty() {
                println!("No chats yet");
            }
            for (i, session) in sessions.iter().enumerate() {
                let marker = if current.as_deref() == Some(session.id.as_str()) {
                    '*'
                } else {
                    ' '
                };
                println!(
                    "{}{:>3}. {}  ({} · {} messages)",
                    marker,
                    i + 1,
                    session.title,
                    session.display_date(),
                    session.messages.len()
                );
            }
        }
        Command::Switch(index) => {
            let session = nth_session(store, index)?;
            store.set_active_session(&session.id);
            println!("Switched to {:?}", session.title);
            for message in &session.messages {
                println!("{}: {}", message.role.as_str(), message.content);
            }
        }
        Command::Rename(title) => {
            let id = store.current_session_id().context("No active chat")?;
            if store.rename_session(&id, &title) {
                println!("Renamed to {:?}", title.trim());
            }
        }
        Command::Delete(index) => {
            let id = match index {
                Some(index) => nth_session(store, index)?.id,
                None => store.current_session_id().context("No active chat")?,
            };
            store.delete_session(&id);
            println!("Deleted");
        }
        Command::Clear => {
            store.clear_all_sessions();
            println!("All chats deleted");
        }
        Command::Models => {
            let current = store.settings().current_model;
            let status = controller.refresh_connection().await;
            let models = match status {
                ConnectionStatus::Connected { models } => models,
                ConnectionStatus::Disconnected { banner } => anyhow::bail!(banner),
            };
            for model in models {
                let marker = if model == current { '*' } else { ' ' };
                println!("{} {}", marker, model);
            }
        }
        Command::Model(name) => {
            if !store.settings().available_models.contains(&name) {
                eprintln!("Warning: {} is not in the server's model list", name);
            }
            store.set_current_model(&name);
            println!("Using {}", name);
        }
        Command::System(prompt) => {
            store.set_system_prompt(&prompt);
            println!("System prompt updated");
        }
        Command::Url(url) => {
            controller.provider().set_base_url(&url)?;
            store.set_endpoint_url(&url);
            report_connection(controller).await;
        }
        Command::Export(path) => {
            let session = store.current_session().context("No active chat")?;
            let path = path.unwrap_or_else(|| PathBuf::from(export_file_name(&session)));
            tokio::fs::write(&path, export_to_markdown(&session))
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported to {}", path.display());
        }
        Command::Stats => match store.last_stats() {
            Some(stats) => println!(
                "Last response: {}ms ({} tokens/s, {} tokens)",
                stats.response_time_ms, stats.tokens_per_second, stats.tokens_generated
            ),
            None => println!("No response yet"),
        },
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }

    Ok(())
}

fn nth_session(store: &ChatStore, index: usize) -> Result<ollama_chat::models::Session> {
    store
        .sessions()
        .into_iter()
        .nth(index)
        .with_context(|| format!("No chat number {}", index + 1))
}
