// Nexus CLI - Command Line Interface Entry Point

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use nexus_client::consumer::{StreamConsumer, StreamObserver};
use nexus_client::http::EventSource;
use nexus_client::state::StreamStatus;
use nexus_config::{Config, ConfigLoader, parse_override};
use nexus_core::Engine;
use nexus_protocol::{StreamEvent, ToolInvocation, ToolResult, encode_event};

/// Nexus - streaming tool-call orchestration
#[derive(Parser, Debug)]
#[command(name = "nexus")]
#[command(version, about, long_about = None)]
struct TopCli {
    #[clap(flatten)]
    config_overrides: CliConfigOverrides,

    #[clap(subcommand)]
    command: Commands,
}

/// CLI configuration overrides
#[derive(Debug, clap::Args)]
struct CliConfigOverrides {
    /// Configuration override in key=value format
    #[arg(short = 'c', long = "config", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,
}

/// Available commands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a recorded model transcript through the engine
    Replay {
        /// Transcript file
        file: PathBuf,

        /// Conversation the turn belongs to
        #[arg(long = "conversation", default_value = "replay")]
        conversation: String,

        /// Output framing
        #[arg(long = "format", value_enum, default_value_t = OutputFormat::Sse)]
        format: OutputFormat,

        /// Split the transcript into fragments at this marker instead of per line
        #[arg(long = "split-on", value_name = "MARKER")]
        split_on: Option<String>,
    },

    /// List registered tools and their tags
    Tools {
        /// Print the full usage guide
        #[arg(long = "docs")]
        docs: bool,
    },

    /// Follow a remote event stream
    Watch {
        /// Event stream URL
        url: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

/// Configuration commands
#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Show the merged configuration
    Show,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// `data: <json>` frames
    Sse,
    /// One JSON event per line
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the event stream
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info".to_string())
                .as_str(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = TopCli::parse();
    let config = load_config(&cli.config_overrides)?;

    match cli.command {
        Commands::Replay {
            file,
            conversation,
            format,
            split_on,
        } => replay(config, &file, conversation, format, split_on.as_deref()).await?,
        Commands::Tools { docs } => list_tools(config, docs)?,
        Commands::Watch { url } => watch(&url).await?,
        Commands::Config { config_command } => match config_command {
            ConfigCommands::Show => show_config(&config)?,
        },
    }

    Ok(())
}

fn load_config(overrides: &CliConfigOverrides) -> Result<Config> {
    let overrides = overrides
        .overrides
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    ConfigLoader::new()
        .with_project_dir(cwd)
        .load_with_cli_overrides(overrides)
}

/// Run a transcript as one assistant turn
async fn replay(
    config: Config,
    file: &Path,
    conversation: String,
    format: OutputFormat,
    split_on: Option<&str>,
) -> Result<()> {
    let transcript = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read transcript {}", file.display()))?;
    let fragments = split_transcript(&transcript, split_on);
    info!(
        file = %file.display(),
        fragments = fragments.len(),
        conversation = %conversation,
        "replaying transcript"
    );

    let engine = Engine::new(config)?;
    let upstream = futures::stream::iter(fragments.into_iter().map(Ok::<String, Infallible>));
    let mut handle = engine.start_turn(conversation.clone(), upstream);

    while let Some(event) = handle.events.recv().await {
        print!("{}", render_event(&event, format)?);
    }

    let outcome = handle.join.await.context("turn task aborted")?;
    engine
        .teardown(&conversation)
        .await
        .context("failed to tear down sandbox")?;
    let result = outcome?;
    info!(
        message_id = %result.message_id,
        tools = result.results.len(),
        "replay finished"
    );
    Ok(())
}

/// Cut a transcript into upstream fragments: at `marker` when given, else per line.
fn split_transcript(text: &str, marker: Option<&str>) -> Vec<String> {
    match marker.filter(|marker| !marker.is_empty()) {
        Some(marker) => text
            .split(marker)
            .filter(|fragment| !fragment.is_empty())
            .map(str::to_string)
            .collect(),
        None => text.split_inclusive('\n').map(str::to_string).collect(),
    }
}

fn render_event(event: &StreamEvent, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Sse => encode_event(event)?,
        OutputFormat::Json => format!("{}\n", serde_json::to_string(event)?),
    })
}

/// List available tools
fn list_tools(config: Config, docs: bool) -> Result<()> {
    let engine = Engine::new(config)?;
    let registry = engine.registry();
    if docs {
        print!("{}", registry.documentation());
        return Ok(());
    }

    let mut specs = registry.list_specs();
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    for spec in specs {
        println!("{:<16} {}", spec.name, spec.surface_tags.join(", "));
    }
    Ok(())
}

/// Prints status transitions and tool activity as they happen.
struct PrintObserver;

impl StreamObserver for PrintObserver {
    fn on_status_change(&self, from: StreamStatus, to: StreamStatus) {
        println!("[{from} -> {to}]");
    }

    fn on_tool_started(&self, invocation: &ToolInvocation) {
        println!(
            "  tool #{} {} {}",
            invocation.tool_index, invocation.tool_name, invocation.arguments
        );
    }

    fn on_tool_completed(&self, result: &ToolResult) {
        let outcome = if result.is_success() { "ok" } else { "failed" };
        println!(
            "  tool #{} {} {outcome}",
            result.tool_index, result.tool_name
        );
    }

    fn on_message(&self, message_id: &str, content: &str) {
        println!("message {message_id}:\n{content}");
    }

    fn on_error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

/// Follow a remote stream through the consumer state machine
async fn watch(url: &str) -> Result<()> {
    let mut consumer = StreamConsumer::new();
    consumer.subscribe(Arc::new(PrintObserver));
    EventSource::new()
        .run(url, &mut consumer)
        .await
        .with_context(|| format!("event stream {url} failed"))
}

/// Print the merged configuration with secrets masked
fn show_config(config: &Config) -> Result<()> {
    print!("{}", render_config(config)?);
    Ok(())
}

fn render_config(config: &Config) -> Result<String> {
    let mut shown = config.clone();
    if shown.web_search.api_key.is_some() {
        shown.web_search.api_key = Some("****".to_string());
    }
    toml::to_string_pretty(&shown).context("failed to render configuration")
}
