//! # nbrag CLI
//!
//! Drives the notebook retrieval pipeline: catalog management, background
//! vectorization, embedding rebuilds and context assembly.
//!
//! ## Usage
//!
//! ```bash
//! nbrag --config ./config/nbrag.toml <command>
//! ```
//!
//! ## Examples
//!
//! ```bash
//! nbrag init
//! nbrag notebook create "Thesis"
//! nbrag source add --file ./paper.txt --notebook notebook:abc --embed
//! nbrag rebuild --mode all
//! nbrag context --notebook notebook:abc --max-tokens 4000
//! nbrag serve
//! ```
//!
//! Job-submitting commands wait for the worker pool to drain before
//! printing, unless `--no-wait` is given. With `--no-wait` the job is only
//! recorded; `serve` or the next waiting command runs it. Only commands that
//! run workers pick up jobs left unfinished by earlier runs.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;
use std::path::PathBuf;

use notebook_rag::catalog::{self, NewSource};
use notebook_rag::config::{self, DEFAULT_CONFIG_PATH};
use notebook_rag::logging::init_tracing;
use notebook_rag::migrate;
use notebook_rag::pipeline::Pipeline;
use notebook_rag::server;
use notebook_rag_core::commands::{self, RebuildEmbeddingsInput};
use notebook_rag_core::context::{build_notebook_context, build_source_context};
use notebook_rag_core::models::{ensure_record_id, NoteType, RebuildMode, SOURCE_TABLE};

#[derive(Parser)]
#[command(
    name = "nbrag",
    about = "Notebook retrieval pipeline: chunking, retryable embedding jobs and bounded context",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite database and tables. Idempotent.
    Init,

    /// Manage notebooks.
    Notebook {
        #[command(subcommand)]
        action: NotebookAction,
    },

    /// Manage sources.
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Manage notes.
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// Manage source insights.
    Insight {
        #[command(subcommand)]
        action: InsightAction,
    },

    /// Replace a source's vectors by splitting and re-embedding its text.
    Vectorize {
        source_id: String,
        /// Print the job id and exit without waiting for the workers.
        #[arg(long)]
        no_wait: bool,
    },

    /// Re-embed a single source, note or insight synchronously.
    Embed {
        item_id: String,
        /// `source`, `note` or `insight`.
        #[arg(long = "type", default_value = "source")]
        item_type: String,
    },

    /// Re-embed sources, notes and insights in bulk.
    Rebuild {
        /// `existing` re-embeds only items that already have embeddings;
        /// `all` embeds every item with content.
        #[arg(long, default_value = "existing", value_parser = parse_rebuild_mode)]
        mode: RebuildMode,
        #[arg(long)]
        skip_sources: bool,
        #[arg(long)]
        skip_notes: bool,
        #[arg(long)]
        skip_insights: bool,
        #[arg(long)]
        no_wait: bool,
    },

    /// Show one job, or job counts by status when no id is given.
    Status { job_id: Option<String> },

    /// Assemble a token-bounded context and print it as JSON.
    Context {
        #[arg(long, conflicts_with = "source")]
        notebook: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        max_tokens: Option<usize>,
        /// Leave out the source's insights (with `--source`).
        #[arg(long)]
        no_insights: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Print shell completions.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum NotebookAction {
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
}

#[derive(Subcommand)]
enum SourceAction {
    /// Add a source from inline text or a local text file.
    Add {
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long = "topic")]
        topics: Vec<String>,
        #[arg(long)]
        notebook: Option<String>,
        /// Submit a vectorization job after saving.
        #[arg(long)]
        embed: bool,
        #[arg(long)]
        no_wait: bool,
    },
    /// Print a source with its embedding status.
    Show { id: String },
    /// Delete a source, its vectors, insights and owned file.
    Delete { id: String },
}

#[derive(Subcommand)]
enum NoteAction {
    Add {
        content: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        notebook: Option<String>,
        /// Mark the note as AI-generated.
        #[arg(long)]
        ai: bool,
    },
}

#[derive(Subcommand)]
enum InsightAction {
    Add {
        source_id: String,
        insight_type: String,
        content: String,
    },
}

fn parse_rebuild_mode(value: &str) -> Result<RebuildMode, String> {
    value.parse().map_err(|e: notebook_rag_core::PipelineError| e.to_string())
}

/// Whether the command keeps the process alive until its jobs finish.
fn runs_jobs(command: &Commands) -> bool {
    match command {
        Commands::Source {
            action: SourceAction::Add { embed, no_wait, .. },
        } => *embed && !*no_wait,
        Commands::Vectorize { no_wait, .. } | Commands::Rebuild { no_wait, .. } => !*no_wait,
        Commands::Embed { .. } | Commands::Serve => true,
        _ => false,
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "nbrag", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging.filter);

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let pipeline = if runs_jobs(&cli.command) {
        let pipeline = Pipeline::open(&cfg).await?;
        pipeline.resume().await?;
        pipeline
    } else {
        Pipeline::open_submit_only(&cfg).await?
    };
    let ctx = &pipeline.ctx;

    match cli.command {
        Commands::Init | Commands::Completions { .. } => {}
        Commands::Notebook {
            action: NotebookAction::Create { name, description },
        } => {
            let notebook = catalog::create_notebook(ctx, &name, &description).await?;
            print_json(&notebook)?;
        }
        Commands::Source { action } => match action {
            SourceAction::Add {
                title,
                text,
                file,
                url,
                topics,
                notebook,
                embed,
                no_wait,
            } => {
                let created = catalog::create_source(
                    ctx,
                    NewSource {
                        title,
                        text,
                        file,
                        url,
                        topics,
                        notebook_id: notebook,
                        embed,
                    },
                )
                .await?;
                if created.command_id.is_some() && !no_wait {
                    pipeline.drain().await;
                    print_json(&catalog::source_status(ctx, &created.source.id).await?)?;
                } else {
                    print_json(&created)?;
                }
            }
            SourceAction::Show { id } => {
                let id = ensure_record_id(SOURCE_TABLE, &id);
                let source = ctx
                    .store
                    .get_source(&id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Source '{}' not found", id))?;
                let status = catalog::source_status(ctx, &id).await?;
                print_json(&serde_json::json!({ "source": source, "status": status }))?;
            }
            SourceAction::Delete { id } => {
                catalog::delete_source(ctx, &id).await?;
                println!("Deleted {}", ensure_record_id(SOURCE_TABLE, &id));
            }
        },
        Commands::Note {
            action:
                NoteAction::Add {
                    content,
                    title,
                    notebook,
                    ai,
                },
        } => {
            let note_type = if ai { NoteType::Ai } else { NoteType::Human };
            let note =
                catalog::add_note(ctx, title, &content, Some(note_type), notebook.as_deref())
                    .await?;
            print_json(&note)?;
        }
        Commands::Insight {
            action:
                InsightAction::Add {
                    source_id,
                    insight_type,
                    content,
                },
        } => {
            let insight = catalog::add_insight(ctx, &source_id, &insight_type, &content).await?;
            print_json(&insight)?;
        }
        Commands::Vectorize { source_id, no_wait } => {
            ctx.embedder()?;
            let job_id = commands::submit_vectorization(ctx, &source_id).await?;
            if no_wait {
                println!("{}", job_id);
            } else {
                pipeline.drain().await;
                print_json(&catalog::source_status(ctx, &source_id).await?)?;
            }
        }
        Commands::Embed { item_id, item_type } => {
            let output = commands::embed_single_item(ctx, &item_id, &item_type).await;
            pipeline.drain().await;
            print_json(&output)?;
            if !output.success {
                std::process::exit(1);
            }
        }
        Commands::Rebuild {
            mode,
            skip_sources,
            skip_notes,
            skip_insights,
            no_wait,
        } => {
            let input = RebuildEmbeddingsInput {
                mode,
                include_sources: !skip_sources,
                include_notes: !skip_notes,
                include_insights: !skip_insights,
            };
            let submission = catalog::submit_rebuild(ctx, &input).await?;
            if no_wait {
                print_json(&submission)?;
            } else {
                eprintln!("{}", submission.message);
                pipeline.drain().await;
                print_json(&catalog::rebuild_status(ctx, &submission.command_id).await?)?;
            }
        }
        Commands::Status { job_id } => match job_id {
            Some(id) => {
                let job = ctx
                    .queue
                    .get_status(&id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Command '{}' not found", id))?;
                print_json(&catalog::job_view(&job))?;
            }
            None => {
                for (status, count) in pipeline.queue.ledger().status_counts().await? {
                    println!("{:<10} {}", status, count);
                }
            }
        },
        Commands::Context {
            notebook,
            source,
            max_tokens,
            no_insights,
        } => {
            let max_tokens = max_tokens.or(ctx.settings.default_max_tokens);
            let weights = ctx.settings.priority_weights;
            let response = match (notebook, source) {
                (_, Some(source_id)) => {
                    build_source_context(
                        ctx.store.as_ref(),
                        &source_id,
                        !no_insights,
                        max_tokens,
                        weights,
                    )
                    .await?
                }
                (Some(notebook_id), None) => {
                    build_notebook_context(ctx.store.as_ref(), &notebook_id, None, max_tokens, weights)
                        .await?
                }
                (None, None) => anyhow::bail!("Pass --notebook or --source"),
            };
            print_json(&response)?;
        }
        Commands::Serve => {
            server::run_server(&pipeline).await?;
        }
    }

    Ok(())
}
