use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use colloquy_agent::{Orchestrator, OrchestratorBuilder, ResearchInput, ResumeCommand, RunOutcome};
use colloquy_channels::SlackWebhookPublisher;
use colloquy_core::config::{AppConfig, InterruptConfig, ModelConfig, SlackConfig, WebSearchConfig};
use colloquy_core::types::{
    Checkpoint, Cursor, FanOutStatus, Participant, Stage, ThreadId, WorkflowEvent,
};
use colloquy_llm::LlmResearcher;
use colloquy_memory::SqliteCheckpointStore;

#[derive(Parser)]
#[command(name = "colloquy", version, about = "Parallel expert interviews distilled into one report")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "colloquy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a research run on a topic
    Run {
        /// Research topic
        #[arg(trailing_var_arg = true, required = true)]
        topic: Vec<String>,
        /// JSON file with the participants to interview (skips panel generation)
        #[arg(long)]
        participants: Option<PathBuf>,
        /// Maximum number of generated participants
        #[arg(long)]
        max_participants: Option<usize>,
        /// Feedback for every report section
        #[arg(long)]
        editor_feedback: Option<String>,
        /// Thread id (auto-generated if not provided)
        #[arg(long)]
        thread: Option<String>,
    },
    /// Continue a paused run
    Resume {
        /// Thread id of the paused run
        thread: String,
        /// Regenerate the participant panel with this feedback
        #[arg(long, conflicts_with_all = ["participants", "editor_feedback"])]
        feedback: Option<String>,
        /// Replace the participant panel with a JSON file
        #[arg(long, conflicts_with = "editor_feedback")]
        participants: Option<PathBuf>,
        /// Feedback for every report section
        #[arg(long)]
        editor_feedback: Option<String>,
    },
    /// Show the latest checkpoint of a run
    Status {
        /// Thread id
        thread: String,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("colloquy=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "colloquy", &mut std::io::stdout());
        return Ok(());
    }

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = load_config(&cli.config)?;

    match command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&redacted(&config))?);
        }
        Commands::Run {
            topic,
            participants,
            max_participants,
            editor_feedback,
            thread,
        } => {
            let mut input = ResearchInput::new(topic.join(" "));
            input.max_participants = max_participants;
            input.editor_feedback = editor_feedback;
            if let Some(path) = participants {
                input.participants = Some(read_participants(&path)?);
            }
            let thread_id = thread.map(|t| ThreadId::from_str(&t)).unwrap_or_default();

            let orchestrator = build_orchestrator(&config)?;
            spawn_progress_printer(&orchestrator);
            let outcome = orchestrator.start(thread_id, input).await?;
            report_outcome(outcome);
        }
        Commands::Resume {
            thread,
            feedback,
            participants,
            editor_feedback,
        } => {
            let command = if let Some(feedback) = feedback {
                ResumeCommand::ReviseParticipants { feedback }
            } else if let Some(path) = participants {
                ResumeCommand::ReplaceParticipants(read_participants(&path)?)
            } else if let Some(feedback) = editor_feedback {
                ResumeCommand::EditorFeedback(feedback)
            } else {
                ResumeCommand::Continue
            };

            let orchestrator = build_orchestrator(&config)?;
            spawn_progress_printer(&orchestrator);
            let outcome = orchestrator
                .resume(&ThreadId::from_str(&thread), command)
                .await?;
            report_outcome(outcome);
        }
        Commands::Status { thread } => {
            let orchestrator = build_orchestrator(&config)?;
            match orchestrator.status(&ThreadId::from_str(&thread)).await? {
                Some(checkpoint) => print_status(&checkpoint),
                None => eprintln!("No checkpoint for thread {}", thread),
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    let home_config = dirs_home().map(|h| h.join(".colloquy").join("config.toml"));
    if let Some(path) = home_config.filter(|p| p.exists()) {
        info!(path = %path.display(), "Loading config from home directory");
        return Ok(AppConfig::load(&path)?);
    }

    eprintln!("Warning: No config file found. Set OPENAI_API_KEY or ANTHROPIC_API_KEY, or create colloquy.toml");
    create_env_config()
}

fn build_orchestrator(config: &AppConfig) -> anyhow::Result<Orchestrator> {
    let llm = colloquy_llm::client_from_config(config);
    let researcher = Arc::new(LlmResearcher::from_config(llm, config));

    let mut builder = OrchestratorBuilder::new(config.clone()).with_researcher(researcher);

    if let Some(search) = &config.web_search {
        builder = builder.with_searcher(colloquy_tools::create_searcher(search)?);
    }
    if let Some(slack) = &config.publish.slack {
        builder = builder.with_publisher(Arc::new(SlackWebhookPublisher::new(slack.clone())));
    }
    if config.checkpoint.enabled {
        let path = config.checkpoint.db_path();
        let store = SqliteCheckpointStore::open(&path)
            .with_context(|| format!("opening checkpoint store at {}", path.display()))?;
        builder = builder.with_checkpoint_store(Arc::new(store));
    } else {
        builder = builder.with_interrupts(interrupts_without_store(config));
    }

    Ok(builder.build()?)
}

/// A paused run can only be resumed from a saved checkpoint, so without a
/// store every configured pause point is dropped.
fn interrupts_without_store(config: &AppConfig) -> InterruptConfig {
    let configured = &config.interrupts;
    if !configured.before.is_empty() || !configured.after.is_empty() {
        warn!(
            before = ?configured.before,
            after = ?configured.after,
            "Checkpointing is disabled, ignoring pause points"
        );
    }
    InterruptConfig::none()
}

fn spawn_progress_printer(orchestrator: &Orchestrator) {
    let mut rx = orchestrator.event_bus().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                WorkflowEvent::StageStarted { stage, .. } => eprintln!("==> {}", stage),
                WorkflowEvent::BranchStarted { participant, .. } => {
                    eprintln!("  [{}] interview started", participant)
                }
                WorkflowEvent::TurnAppended {
                    participant,
                    speaker,
                    turn,
                } => eprintln!("  [{}] {} turn {}", participant, speaker, turn),
                WorkflowEvent::BranchCompleted {
                    participant,
                    responder_turns,
                    ..
                } => eprintln!("  [{}] done after {} answers", participant, responder_turns),
                WorkflowEvent::BranchFailed {
                    participant, error, ..
                } => eprintln!("  [{}] FAILED: {}", participant, error),
                WorkflowEvent::Published { channel } => eprintln!("  published to {}", channel),
                WorkflowEvent::PublishFailed { channel, error } => {
                    eprintln!("  publishing to {} failed: {}", channel, error)
                }
                WorkflowEvent::StageCompleted { .. } | WorkflowEvent::Paused { .. } => {}
            }
        }
    });
}

fn report_outcome(outcome: RunOutcome) {
    match outcome {
        RunOutcome::Paused(checkpoint) => {
            print_status(&checkpoint);
            eprintln!();
            match checkpoint.cursor {
                Cursor::After(Stage::GenerateParticipants) => eprintln!(
                    "Review the panel, then: colloquy resume {} [--feedback TEXT | --participants FILE | --editor-feedback TEXT]",
                    checkpoint.thread_id
                ),
                _ => eprintln!("Continue with: colloquy resume {}", checkpoint.thread_id),
            }
        }
        RunOutcome::Completed(report) => {
            match &report.status {
                FanOutStatus::Empty => eprintln!("No participants were interviewed."),
                FanOutStatus::Complete => {}
                FanOutStatus::Partial { failed } => {
                    eprintln!("Warning: interviews failed for: {}", failed.join(", "))
                }
            }
            println!("{}", report.aggregate.document());
        }
    }
}

fn print_status(checkpoint: &Checkpoint) {
    let state = &checkpoint.state;
    eprintln!("Thread:  {}", checkpoint.thread_id);
    eprintln!("Topic:   {}", state.topic);
    eprintln!("Cursor:  {}", checkpoint.cursor);
    eprintln!("Saved:   {}", checkpoint.created_at.to_rfc3339());
    if !state.participants.is_empty() {
        eprintln!("Participants:");
        for p in &state.participants {
            eprintln!("  - {} ({}): {}", p.name, p.role, p.description);
        }
    }
    if !state.results.is_empty() || !state.failures.is_empty() {
        eprintln!(
            "Interviews: {} completed, {} failed",
            state.results.len(),
            state.failures.len()
        );
    }
    if state.published {
        eprintln!("Published: yes");
    }
}

fn read_participants(path: &Path) -> anyhow::Result<Vec<Participant>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading participants from {}", path.display()))?;
    let participants: Vec<Participant> = serde_json::from_str(&content)
        .with_context(|| format!("parsing participants in {}", path.display()))?;
    Ok(participants)
}

/// A copy of the config safe to print.
fn redacted(config: &AppConfig) -> AppConfig {
    fn mask(model: &mut ModelConfig) {
        if model.api_key.is_some() {
            model.api_key = Some("***".into());
        }
    }
    let mut config = config.clone();
    mask(&mut config.model);
    if let Some(m) = config.report_model.as_mut() {
        mask(m);
    }
    config.fallback_models.iter_mut().for_each(mask);
    if let Some(search) = config.web_search.as_mut() {
        search.api_key = "***".into();
    }
    if let Some(slack) = config.publish.slack.as_mut() {
        slack.webhook_url = "***".into();
    }
    config
}

fn create_env_config() -> anyhow::Result<AppConfig> {
    let anthropic_key = std::env::var("ANTHROPIC_API_KEY").ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    let (provider, model_id, api_key, base_url) = if let Some(key) = anthropic_key {
        ("anthropic", "claude-sonnet-4-20250514", Some(key), None)
    } else if let Some(key) = openai_key {
        ("openai", "gpt-4o", Some(key), None)
    } else {
        // Default to Ollama (local)
        (
            "ollama",
            "llama3.2",
            None,
            Some("http://localhost:11434/v1/chat/completions".to_string()),
        )
    };

    let mut config = AppConfig::with_model(ModelConfig {
        provider: provider.to_string(),
        model_id: model_id.to_string(),
        api_key,
        base_url,
        max_tokens: 4096,
        temperature: 0.0,
        retry: None,
        extra_headers: Default::default(),
    });

    if let Ok(key) = std::env::var("TAVILY_API_KEY") {
        config.web_search = Some(WebSearchConfig {
            provider: "tavily".into(),
            api_key: key,
            max_results: 4,
        });
    }
    if let Ok(url) = std::env::var("SLACK_WEBHOOK_URL") {
        config.publish.slack = Some(SlackConfig {
            webhook_url: url,
            header: ":robot_face: Colloquy has been busy ...".into(),
        });
    }

    config.validate()?;
    Ok(config)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
