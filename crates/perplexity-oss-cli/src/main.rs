mod render;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use perplexity_oss_core::config::{Config, LoggingConfig};
use perplexity_oss_core::conversation::{Conversation, FilterSource};
use perplexity_oss_core::types::MessageRole;
use perplexity_oss_stream::{HttpChatTransport, TurnController, TurnOutcome};

use crate::render::{
    LiveRenderer, STARTER_QUESTIONS, check_date_range, numbered, parse_date_args, render_answer,
    render_footer, resolve_choice,
};

#[derive(Parser)]
#[command(
    name = "perplexity-oss",
    about = "Ask questions, get streamed answers with sources",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question
    Ask {
        /// The question
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Use pro search (multi-step agent plan)
        #[arg(long)]
        pro: bool,

        /// Only use results published on or after this date (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Only use results published on or before this date (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<NaiveDate>,

        /// Print the finished answer with resolved citations instead of streaming
        #[arg(long)]
        no_stream: bool,
    },

    /// Interactive conversation
    Chat {
        /// Start with pro search on
        #[arg(long)]
        pro: bool,
    },

    /// List the starter questions
    Starters,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
    /// Write a default config file if none exists
    Init,
}

const CHAT_HELP: &str = "\
Commands:
  <number>                 ask a related (or starter) question by number
  /pro                     toggle pro search
  /dates [START|-] [END|-] set the date filter; no arguments clears it
  /clear                   start a new conversation
  /help                    show this help
  /quit                    exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_deref()
        .map(Config::expand_path)
        .unwrap_or_else(Config::default_path);

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    init_logging(config.logging.as_ref(), cli.verbose);
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Ask {
            query,
            pro,
            start_date,
            end_date,
            no_stream,
        } => {
            ensure_valid(&config)?;
            let conversation = Arc::new(Conversation::new());
            let mut range = config.date_range();
            if start_date.is_some() {
                range.start = start_date;
            }
            if end_date.is_some() {
                range.end = end_date;
            }
            check_date_range(&range).map_err(anyhow::Error::msg)?;
            conversation.set_date_range(range);

            let controller = build_controller(&config, &conversation)?;
            if pro && !controller.set_pro_search(true) {
                tracing::warn!("Pro mode is disabled in config, asking without pro search");
            }

            let query = query.join(" ");
            check_query_length(&query, config.min_query_length())?;

            let outcome = if no_stream {
                let outcome = controller.submit(&query).await?;
                if let TurnOutcome::Completed { message, .. } = &outcome {
                    println!("{}", render_answer(message));
                    let footer = render_footer(message);
                    if !footer.is_empty() {
                        print!("\n{footer}");
                    }
                }
                outcome
            } else {
                run_turn(&controller, &query).await?
            };

            match outcome {
                TurnOutcome::Completed { .. } => {}
                TurnOutcome::Failed { detail, .. } => anyhow::bail!(detail),
                TurnOutcome::Abandoned => anyhow::bail!("cancelled"),
            }
        }
        Commands::Chat { pro } => {
            ensure_valid(&config)?;
            run_chat(&config, pro).await?;
        }
        Commands::Starters => {
            print!("{}", numbered(&STARTER_QUESTIONS));
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("no config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK ({})", config_path.display());
            }
            ConfigAction::Init => init_config(&config_path)?,
        },
    }

    Ok(())
}

/// Set up `tracing` from the `logging` config section. `RUST_LOG` wins over
/// both the config and `--verbose`.
fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let logging = logging.cloned().unwrap_or_default();

    let level = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone().unwrap_or_else(|| "warn".to_string())
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(&level);
        for directive in &logging.filters {
            match directive.parse::<Directive>() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("Ignoring invalid log filter '{directive}': {e}"),
            }
        }
        filter
    });

    let writer = if logging.output == "stdout" {
        BoxMakeWriter::new(io::stdout)
    } else {
        BoxMakeWriter::new(io::stderr)
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn ensure_valid(config: &Config) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for warning in warnings {
        tracing::warn!("{warning}");
    }
    if let Some(first) = errors.first() {
        anyhow::bail!("invalid config: {first}");
    }
    Ok(())
}

fn check_query_length(query: &str, min: usize) -> anyhow::Result<()> {
    if query.trim().chars().count() < min {
        anyhow::bail!("query must be at least {min} characters");
    }
    Ok(())
}

fn build_controller(
    config: &Config,
    conversation: &Arc<Conversation>,
) -> anyhow::Result<TurnController> {
    let transport = HttpChatTransport::from_config(config)?;
    tracing::debug!(endpoint = %transport.endpoint(), "Using chat endpoint");

    let controller = TurnController::new(
        Arc::new(transport),
        Arc::new(config.credentials()),
        conversation.clone(),
        conversation.clone(),
    )
    .with_pro_mode(config.pro_mode_enabled());
    controller.set_pro_search(config.pro_search());
    Ok(controller)
}

/// Submit one query and render it live. Ctrl-C abandons the turn.
async fn run_turn(controller: &TurnController, query: &str) -> anyhow::Result<TurnOutcome> {
    let mut snapshots = controller.subscribe();
    let mut renderer = LiveRenderer::new();
    let mut stdout = io::stdout();

    let submit = controller.submit(query);
    tokio::pin!(submit);

    let outcome = loop {
        tokio::select! {
            outcome = &mut submit => break outcome?,
            changed = snapshots.changed() => {
                if changed.is_ok() {
                    let snapshot = snapshots.borrow_and_update().clone();
                    renderer.update(&snapshot, &mut stdout)?;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    controller.cancel();
                }
            }
        }
    };

    match &outcome {
        TurnOutcome::Completed { message, .. } => {
            renderer.finish(message, &mut stdout)?;
            if let Some(path) = outcome.thread_path() {
                println!("\nThread: {path}");
            }
        }
        TurnOutcome::Failed { kind, detail } => {
            println!();
            eprintln!("Error ({kind:?}): {detail}");
        }
        TurnOutcome::Abandoned => {
            println!("\n(cancelled)");
        }
    }
    Ok(outcome)
}

async fn run_chat(config: &Config, pro: bool) -> anyhow::Result<()> {
    let conversation = Arc::new(Conversation::new());
    conversation.set_date_range(config.date_range());
    let controller = build_controller(config, &conversation)?;
    if pro && !controller.set_pro_search(true) {
        println!("Pro mode is disabled in config.");
    }
    let min_len = config.min_query_length();

    print_welcome(&controller, &conversation);

    loop {
        let prompt = if controller.pro_search() { "pro ›" } else { "›" };
        let Some(line) = read_line(prompt).await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let query = match line {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{CHAT_HELP}");
                continue;
            }
            "/clear" => {
                conversation.reset();
                println!("Started a new conversation.");
                print_welcome(&controller, &conversation);
                continue;
            }
            "/pro" => {
                let on = controller.toggle_pro_search();
                if controller.pro_mode_enabled() {
                    println!("Pro search {}.", if on { "on" } else { "off" });
                } else {
                    println!("Pro mode is disabled in config.");
                }
                continue;
            }
            _ if line == "/dates" || line.starts_with("/dates ") => {
                match parse_date_args(line.trim_start_matches("/dates")) {
                    Ok(range) => {
                        conversation.set_date_range(range);
                        println!("Date filter: {}", range.describe());
                    }
                    Err(e) => println!("{e}"),
                }
                continue;
            }
            _ if line.starts_with('/') => {
                println!("Unknown command. Type /help for commands.");
                continue;
            }
            _ => match resolve_choice(line, &menu_choices(&conversation)) {
                Some(question) => {
                    println!("› {question}");
                    question.to_string()
                }
                None => line.to_string(),
            },
        };

        if let Err(e) = check_query_length(&query, min_len) {
            println!("{e}");
            continue;
        }

        println!();
        run_turn(&controller, &query).await?;
        println!();
    }

    Ok(())
}

fn print_welcome(controller: &TurnController, conversation: &Conversation) {
    println!("Perplexity OSS v{}", env!("CARGO_PKG_VERSION"));
    let range = conversation.date_range();
    if range.is_active() {
        println!("Date filter: {}", range.describe());
    }
    if controller.pro_search() {
        println!("Pro search is on.");
    }
    println!("\nTry asking:\n{}", numbered(&STARTER_QUESTIONS));
    println!("Type /help for commands.");
}

/// Numbered choices the user can pick from: the last answer's related
/// questions, or the starters before anything has been asked.
fn menu_choices(conversation: &Conversation) -> Vec<String> {
    match conversation.last_message() {
        None => STARTER_QUESTIONS.iter().map(|q| q.to_string()).collect(),
        Some(message) if message.role == MessageRole::Assistant => message.related_queries,
        Some(_) => Vec::new(),
    }
}

/// Read one line from the terminal. `None` on end of input.
async fn read_line(prompt: &'static str) -> anyhow::Result<Option<String>> {
    let input = tokio::task::spawn_blocking(move || {
        dialoguer::Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
    })
    .await?;

    match input {
        Ok(line) => Ok(Some(line)),
        Err(dialoguer::Error::IO(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn init_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Config::default().save(path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
