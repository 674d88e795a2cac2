use std::io::Write;

use anyhow::{Context, Result};
use chatstore_core::{ChatSession, ChatStore, Config, Field, Notification, OllamaClient, StoreRegistry};
use clap::{Args, Parser, Subcommand};

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "chatstore")]
#[command(about = "Chat with a local Ollama model", version)]
struct Cli {
    #[command(flatten)]
    model: ModelArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone)]
struct ModelArgs {
    /// Ollama model to use (defaults to the configured model)
    #[arg(short, long, global = true)]
    model: Option<String>,
    /// Ollama base URL (defaults to OLLAMA_HOST or the configured URL)
    #[arg(long, global = true)]
    url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question and stream the answer to stdout
    Ask {
        /// Your question
        question: String,
        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// List available Ollama models
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        Config::new()
    });
    let url = cli.model.url.clone().unwrap_or_else(|| config.ollama_url());
    let model = cli.model.model.clone().unwrap_or_else(|| config.model());
    let client = OllamaClient::new(&url);

    // One registry for the whole run; everything gets its stores from here
    let registry = StoreRegistry::new();
    let session = ChatSession::new(registry.use_store::<ChatStore>(), client.clone(), model);

    tracing::info!(%url, model = session.model(), "starting");

    match cli.command {
        None => run_tui(App::new(registry, session)).await,
        Some(Commands::Ask { question, no_stream }) => ask(&session, &question, !no_stream).await,
        Some(Commands::Models) => list_models(&client).await,
    }
}

/// TUI apps can't log to the terminal, so logs go to a file.
/// Use RUST_LOG to control the level, e.g. RUST_LOG=chatstore_core=debug
fn init_logging() -> Result<()> {
    let log_dir = Config::config_dir()?;
    std::fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("chatstore.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Could not open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false) // No color codes in log file
        .init();

    Ok(())
}

async fn run_tui(mut app: App) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new(app.store.subscribe());

    let result = event_loop(&mut terminal, &mut events, &mut app).await;

    tui::restore()?;
    if let Some(task) = app.query_task.take() {
        task.abort();
    }
    result
}

async fn event_loop(terminal: &mut tui::Tui, events: &mut EventHandler, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|frame| ui::render(app, frame))?;

        let Some(event) = events.next().await else {
            break;
        };
        handler::handle_event(app, event)?;

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// Print the answer as it arrives by watching the store
async fn ask(session: &ChatSession, question: &str, stream: bool) -> Result<()> {
    let store = session.store().clone();
    let mut changes = store.subscribe();

    let printer = tokio::spawn(async move {
        let mut printed = 0;
        let mut stdout = std::io::stdout();
        while let Some(note) = changes.recv().await {
            // streamdiv drops only after the last chunk, so check it before reading the answer
            let done = match note {
                Notification::Changed(event) => event.field == Field::Streamdiv && !store.streamdiv(),
                Notification::Lagged(_) => !store.streamdiv(),
            };

            // Reader went away (e.g. piped into `head`)
            if let Err(e) = print_delta(&mut stdout, &store.answer(), &mut printed) {
                tracing::debug!(error = %e, "stdout closed, no longer printing");
                break;
            }

            if done {
                break;
            }
        }
    });

    let result = if stream {
        session.ask(question).await
    } else {
        session.ask_whole(question).await
    };

    if session.store().version() == 0 {
        // Rejected before anything was written; the printer would never wake
        printer.abort();
    }
    let _ = printer.await;

    match result {
        Ok(answer) => {
            if !answer.ends_with('\n') {
                println!();
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Error querying Ollama: {}", e);
            eprintln!("Make sure Ollama is running: ollama serve");
            Err(e)
        }
    }
}

/// Write the part of `answer` past `printed` and advance `printed`
fn print_delta(out: &mut impl Write, answer: &str, printed: &mut usize) -> std::io::Result<()> {
    if answer.len() > *printed {
        out.write_all(answer[*printed..].as_bytes())?;
        out.flush()?;
        *printed = answer.len();
    }
    Ok(())
}

async fn list_models(client: &OllamaClient) -> Result<()> {
    match client.list_models().await {
        Ok(models) => {
            if models.is_empty() {
                println!("No models found. Pull a model with: ollama pull llama3.2");
            } else {
                for model in models {
                    println!("  • {}", model);
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Error connecting to Ollama at {}: {}", client.base_url(), e);
            eprintln!("Make sure Ollama is running: ollama serve");
            Err(e)
        }
    }
}
