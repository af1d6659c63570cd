//! Operator CLI over the runtime core.
//!
//! One-shot subcommands against the shared database. Errors print a single
//! line with the taxonomy category and map to stable exit codes:
//! 0 success, 1 validation, 2 missing credential, 3 provider failure.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use openclaw::activity::{ActivityFilter, ActivityLog, Period};
use openclaw::config::{runtime_paths, OpenclawConfig};
use openclaw::credentials::CredentialService;
use openclaw::embedding::{Embedder, OpenAiEmbedder};
use openclaw::errors::CoreError;
use openclaw::memory::{MemoryCategory, MemoryEntry, MemoryStore, SemanticSearchOptions};
use openclaw::pipeline::{
    CreatePipeline, ItemType, NoteType, PipelineEngine, PipelineFilter, PipelineUpdate,
};
use openclaw::recall::chunker::ChunkerConfig;
use openclaw::recall::context::RouterContextualizer;
use openclaw::recall::search::SearchFilters;
use openclaw::recall::RecallEngine;
use openclaw::router::ModelRouter;
use openclaw::store::knowledge::{
    KnowledgeEntry, KnowledgeSearchOptions, KnowledgeSource, KnowledgeStore,
};
use openclaw::store::Storage;

#[derive(Parser)]
#[command(name = "openclaw", version, about = "Personal AI chief-of-staff runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dev pipeline work items.
    Pipeline {
        #[command(subcommand)]
        action: PipelineAction,
    },
    /// Query the activity stream.
    Activity {
        /// Filter by category.
        #[arg(long)]
        category: Option<String>,
        /// Filter by action name.
        #[arg(long)]
        action: Option<String>,
        /// Lower bound (ISO-8601).
        #[arg(long)]
        since: Option<String>,
        /// Upper bound (ISO-8601).
        #[arg(long)]
        until: Option<String>,
        /// Substring filter on descriptions.
        #[arg(long)]
        search: Option<String>,
        /// Maximum rows.
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Long-term memory.
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Session-transcript recall.
    SessionMemory {
        #[command(subcommand)]
        action: SessionMemoryAction,
    },
    /// Knowledge cache.
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },
}

#[derive(Subcommand)]
enum PipelineAction {
    /// Create a work item.
    Create {
        /// Title.
        title: String,
        /// Item type.
        #[arg(long = "type", default_value = "feature")]
        item_type: String,
        /// Parent feature id (stories only).
        #[arg(long)]
        parent: Option<i64>,
        /// Owning project id.
        #[arg(long)]
        project: Option<i64>,
        /// Priority 1-4.
        #[arg(long, default_value_t = 3)]
        priority: i64,
        /// Description.
        #[arg(long)]
        description: Option<String>,
    },
    /// Move an item to a new stage.
    Move {
        /// Item id.
        id: i64,
        /// Target stage.
        stage: String,
        /// Originating context.
        #[arg(long, default_value = "main")]
        source: String,
    },
    /// Append a note.
    Note {
        /// Item id.
        id: i64,
        /// Note body.
        content: String,
        /// Author role.
        #[arg(long, default_value = "main")]
        role: String,
        /// Note type.
        #[arg(long = "type", default_value = "info")]
        note_type: String,
    },
    /// Show one item with its tasks and notes.
    Show {
        /// Item id.
        id: i64,
    },
    /// List items.
    List {
        /// Filter by type.
        #[arg(long = "type")]
        item_type: Option<String>,
        /// Filter by parent feature.
        #[arg(long)]
        parent: Option<i64>,
        /// Filter by stage.
        #[arg(long)]
        stage: Option<String>,
        /// Filter by project.
        #[arg(long)]
        project: Option<i64>,
    },
    /// Feature board with story rollups.
    Board,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Semantic search over memories.
    SemanticSearch {
        /// Query text.
        query: String,
        /// Maximum hits.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Add a memory (embedding generated by default).
    Add {
        /// Memory content.
        content: String,
        /// Category.
        #[arg(long, default_value = "fact")]
        category: String,
        /// Importance 1-10.
        #[arg(long, default_value_t = 5)]
        importance: i64,
    },
}

#[derive(Subcommand)]
enum SessionMemoryAction {
    /// Index transcripts (changed-only by default).
    Index {
        /// Force a full re-index of every session.
        #[arg(long)]
        all: bool,
        /// Index a single session file by id.
        #[arg(long)]
        session: Option<String>,
        /// Retry chunks whose contextualisation failed.
        #[arg(long)]
        retry_contexts: bool,
    },
    /// Hybrid search over indexed chunks.
    Search {
        /// Query text.
        query: String,
        /// Maximum hits.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Per-session indexing status.
    Status,
    /// Recall health snapshot.
    Health,
}

#[derive(Subcommand)]
enum KnowledgeAction {
    /// Add an entry.
    Add {
        /// Title.
        title: String,
        /// Reusable summary.
        summary: String,
        /// Source type.
        #[arg(long = "source", default_value = "manual")]
        source_type: String,
        /// Topic tags.
        #[arg(long)]
        tag: Vec<String>,
    },
    /// Keyword search.
    Search {
        /// Query text.
        query: String,
        /// Maximum results.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Weight rank by importance.
        #[arg(long)]
        weight_by_importance: bool,
        /// Include expired entries.
        #[arg(long)]
        include_expired: bool,
    },
    /// Recent entries.
    List {
        /// Maximum rows.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Mark an entry verified.
    Verify {
        /// Entry id.
        id: i64,
    },
    /// Replace an entry, keeping the old one with a pointer.
    Supersede {
        /// Entry being replaced.
        old_id: i64,
        /// New title.
        title: String,
        /// New summary.
        summary: String,
    },
    /// Corpus statistics.
    Stats,
}

struct Runtime {
    storage: Storage,
    credentials: Arc<CredentialService>,
    config: OpenclawConfig,
    transcripts_dir: std::path::PathBuf,
}

impl Runtime {
    async fn init() -> Result<Self> {
        let paths = runtime_paths()?;
        let config = OpenclawConfig::load(&paths)?;
        let storage = Storage::open(&paths.db_file).await?;
        let credentials = Arc::new(CredentialService::new(&paths.secrets_dir));
        Ok(Self {
            storage,
            credentials,
            config,
            transcripts_dir: paths.transcripts_dir,
        })
    }

    fn activity(&self) -> ActivityLog {
        ActivityLog::new(self.storage.pool().clone())
    }

    fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::new(OpenAiEmbedder::with_model(
            &self.config.routing.embedding_model,
            Arc::clone(&self.credentials),
            self.storage.clone(),
        ))
    }

    fn router(&self) -> Arc<ModelRouter> {
        Arc::new(ModelRouter::standard(
            Arc::clone(&self.credentials),
            self.storage.pool().clone(),
        ))
    }

    fn recall(&self) -> RecallEngine {
        RecallEngine::new(
            self.storage.pool().clone(),
            self.embedder(),
            Some(Arc::new(RouterContextualizer::new(self.router()))),
            self.activity(),
            ChunkerConfig {
                max_chunk_tokens: self.config.recall.max_chunk_tokens,
                max_chunks_per_session: self.config.recall.max_chunks_per_session,
            },
        )
    }

    fn pipeline(&self) -> PipelineEngine {
        PipelineEngine::new(self.storage.pool().clone())
            .with_auto_rollup(self.config.pipeline.auto_rollup)
    }
}

#[tokio::main]
async fn main() {
    openclaw::logging::init_cli();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => {}
        Err(err) => {
            let (code, line) = render_error(&err);
            eprintln!("{line}");
            std::process::exit(code);
        }
    }
}

fn render_error(err: &anyhow::Error) -> (i32, String) {
    if let Some(core) = err.downcast_ref::<CoreError>() {
        (core.exit_code(), format!("error ({}): {core}", core.category()))
    } else {
        (1, format!("error: {err}"))
    }
}

async fn run(cli: Cli) -> Result<()> {
    let runtime = Runtime::init().await?;

    match cli.command {
        Command::Pipeline { action } => run_pipeline(&runtime, action).await,
        Command::Activity {
            category,
            action,
            since,
            until,
            search,
            limit,
        } => run_activity(&runtime, category, action, since, until, search, limit).await,
        Command::Memory { action } => run_memory(&runtime, action).await,
        Command::SessionMemory { action } => run_session_memory(&runtime, action).await,
        Command::Knowledge { action } => run_knowledge(&runtime, action).await,
    }
}

async fn run_pipeline(runtime: &Runtime, action: PipelineAction) -> Result<()> {
    let engine = runtime.pipeline();
    match action {
        PipelineAction::Create {
            title,
            item_type,
            parent,
            project,
            priority,
            description,
        } => {
            let id = engine
                .create(&CreatePipeline {
                    item_type: ItemType::parse(&item_type)?,
                    project_id: project,
                    parent_id: parent,
                    title,
                    description,
                    priority,
                    acceptance_criteria: Vec::new(),
                })
                .await?;
            println!("created pipeline item {id}");
        }
        PipelineAction::Move { id, stage, source } => {
            let item = engine
                .update(
                    id,
                    &PipelineUpdate {
                        stage: Some(stage),
                        ..PipelineUpdate::default()
                    },
                    &source,
                )
                .await?;
            println!("{} [{}] -> {}", item.id, item.title, item.stage);
        }
        PipelineAction::Note {
            id,
            content,
            role,
            note_type,
        } => {
            let note_id = engine
                .add_note(id, &role, NoteType::parse(&note_type)?, &content)
                .await?;
            println!("note {note_id} added to item {id}");
        }
        PipelineAction::Show { id } => {
            let item = engine.get(id).await?;
            println!(
                "#{} {} [{}] stage={} priority={}",
                item.id,
                item.title,
                item.item_type.as_str(),
                item.stage,
                item.priority
            );
            if let Some(description) = &item.description {
                println!("  {description}");
            }
            for criterion in &item.acceptance_criteria {
                println!("  [ac] {criterion}");
            }
            for task in engine.tasks(id).await? {
                println!("  task #{} [{}] {}", task.id, task.status.as_str(), task.title);
            }
            for note in engine.notes(id).await? {
                println!(
                    "  note {} {}/{}: {}",
                    note.created_at,
                    note.agent_role,
                    note.note_type.as_str(),
                    note.content
                );
            }
        }
        PipelineAction::List {
            item_type,
            parent,
            stage,
            project,
        } => {
            let items = engine
                .list(&PipelineFilter {
                    project_id: project,
                    parent_id: parent,
                    stage,
                    item_type: item_type.as_deref().map(ItemType::parse).transpose()?,
                    limit: 100,
                })
                .await?;
            for item in items {
                println!(
                    "#{:<4} {:<10} {:<14} p{} {}",
                    item.id,
                    item.item_type.as_str(),
                    item.stage,
                    item.priority,
                    item.title
                );
            }
        }
        PipelineAction::Board => {
            let features = engine
                .list(&PipelineFilter {
                    item_type: Some(ItemType::Feature),
                    limit: 100,
                    ..PipelineFilter::default()
                })
                .await?;
            for feature in features {
                let stats = engine.story_stats(feature.id).await?;
                println!(
                    "#{:<4} [{:<12}] {} ({}/{} stories done)",
                    feature.id, feature.stage, feature.title, stats.done, stats.total
                );
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_activity(
    runtime: &Runtime,
    category: Option<String>,
    action: Option<String>,
    since: Option<String>,
    until: Option<String>,
    search: Option<String>,
    limit: usize,
) -> Result<()> {
    let log = runtime.activity();

    for bound in [&since, &until].into_iter().flatten() {
        validate_date_bound(bound)?;
    }

    let rows = if let Some(category) = category {
        log.get_by_category(&category, limit).await?
    } else if let Some(action) = action {
        log.get_by_action(&action, limit).await?
    } else if since.is_some() || until.is_some() {
        let since = since.unwrap_or_else(|| "1970-01-01".to_owned());
        let until = until.unwrap_or_else(|| "9999-12-31".to_owned());
        log.get_by_date(&since, &until, limit).await?
    } else {
        log.get_recent(limit, &ActivityFilter::default()).await?
    };

    for row in rows {
        if let Some(needle) = &search {
            let haystack = row.description.as_deref().unwrap_or("");
            if !haystack.to_lowercase().contains(&needle.to_lowercase()) {
                continue;
            }
        }
        println!(
            "{} [{}] {} {}",
            row.created_at,
            row.category.as_deref().unwrap_or("-"),
            row.action,
            row.description.as_deref().unwrap_or("")
        );
    }

    // A digest line helps eyeball the stream without further flags.
    let stats = log.get_stats(Period::Week).await?;
    if !stats.is_empty() {
        let summary: Vec<String> = stats
            .iter()
            .take(5)
            .map(|s| format!("{}={}", s.category, s.count))
            .collect();
        eprintln!("-- last 7 days: {}", summary.join(" "));
    }
    Ok(())
}

async fn run_memory(runtime: &Runtime, action: MemoryAction) -> Result<()> {
    let store = MemoryStore::new(runtime.storage.pool().clone(), Some(runtime.embedder()));
    match action {
        MemoryAction::SemanticSearch { query, limit } => {
            let hits = store
                .semantic_search(
                    &query,
                    &SemanticSearchOptions {
                        limit,
                        source: Some("cli".to_owned()),
                        ..SemanticSearchOptions::default()
                    },
                )
                .await?;
            for hit in hits {
                println!(
                    "{:.3} [{}] {}",
                    hit.similarity,
                    hit.memory.category.as_str(),
                    hit.memory.content
                );
            }
        }
        MemoryAction::Add {
            content,
            category,
            importance,
        } => {
            let mut entry = MemoryEntry::new(MemoryCategory::parse(&category)?, &content);
            entry.importance = importance;
            entry.source = Some("cli".to_owned());
            let id = store.add_memory(&entry, true).await?;
            println!("memory {id} saved");
        }
    }
    Ok(())
}

async fn run_session_memory(runtime: &Runtime, action: SessionMemoryAction) -> Result<()> {
    let recall = runtime.recall();
    match action {
        SessionMemoryAction::Index {
            all,
            session,
            retry_contexts,
        } => {
            if retry_contexts {
                let repaired = recall.indexer().retry_failed_contexts(100).await?;
                println!("repaired {repaired} failed contexts");
                return Ok(());
            }
            if all {
                let stale = recall.mark_all_stale().await?;
                println!("invalidated {stale} session hashes");
            }
            match session {
                Some(session_id) => {
                    let path = runtime
                        .transcripts_dir
                        .join(format!("{session_id}.jsonl"));
                    let outcome = recall.indexer().index_file(&path).await?;
                    println!("{session_id}: {outcome:?}");
                }
                None => {
                    let report = recall
                        .indexer()
                        .index_directory(&runtime.transcripts_dir)
                        .await?;
                    println!(
                        "indexed={} skipped={} quarantined={} failed={} chunks={} purged={}",
                        report.indexed,
                        report.skipped,
                        report.quarantined,
                        report.failed,
                        report.chunks_written,
                        report.orphans_purged
                    );
                }
            }
        }
        SessionMemoryAction::Search { query, limit } => {
            let hits = recall
                .search()
                .hybrid_search(&query, limit, &SearchFilters::default())
                .await?;
            for hit in hits {
                println!(
                    "{:.4} {}#{} {}",
                    hit.score,
                    hit.chunk.session_id,
                    hit.chunk.chunk_index,
                    first_line(&hit.chunk.content)
                );
            }
        }
        SessionMemoryAction::Status => {
            for status in recall.status().await? {
                println!(
                    "{:<40} {:<8} {:>6} chunks  last={}",
                    status.session_id,
                    status.status,
                    status.chunk_count,
                    status.last_indexed.as_deref().unwrap_or("-")
                );
            }
        }
        SessionMemoryAction::Health => {
            let health = recall.health().await;
            println!(
                "{}: {} chunks / {} sessions, {} failed chunks, {} quarantined, \
                 avg index {:.0} ms, avg search {:.0} ms",
                health.status.as_str(),
                health.total_chunks,
                health.total_sessions,
                health.failed_chunks,
                health.quarantined_sessions,
                health.avg_index_time_ms,
                health.avg_search_latency_ms
            );
        }
    }
    Ok(())
}

async fn run_knowledge(runtime: &Runtime, action: KnowledgeAction) -> Result<()> {
    let store = KnowledgeStore::new(runtime.storage.pool().clone(), Some(runtime.embedder()));
    match action {
        KnowledgeAction::Add {
            title,
            summary,
            source_type,
            tag,
        } => {
            let mut entry =
                KnowledgeEntry::new(&title, &summary, KnowledgeSource::parse(&source_type)?);
            entry.topic_tags = tag;
            let id = store.add(&entry).await?;
            println!("knowledge {id} saved");
        }
        KnowledgeAction::Search {
            query,
            limit,
            weight_by_importance,
            include_expired,
        } => {
            let results = store
                .search(
                    &query,
                    &KnowledgeSearchOptions {
                        limit,
                        include_expired,
                        weight_by_importance,
                    },
                )
                .await?;
            for entry in results {
                println!(
                    "#{} {} — {}",
                    entry.id.unwrap_or(0),
                    entry.title,
                    first_line(&entry.summary)
                );
            }
        }
        KnowledgeAction::List { limit } => {
            for entry in store.list(limit, false).await? {
                let flag = if entry.verified { "v" } else { " " };
                println!("#{:<4} [{flag}] {}", entry.id.unwrap_or(0), entry.title);
            }
        }
        KnowledgeAction::Verify { id } => {
            store.verify(id).await?;
            println!("knowledge {id} verified");
        }
        KnowledgeAction::Supersede {
            old_id,
            title,
            summary,
        } => {
            let new_id = store
                .supersede(
                    old_id,
                    &KnowledgeEntry::new(&title, &summary, KnowledgeSource::Manual),
                )
                .await?;
            println!("knowledge {old_id} superseded by {new_id}");
        }
        KnowledgeAction::Stats => {
            let stats = store.stats().await?;
            println!(
                "total={} verified={} expired={} superseded={}",
                stats.total, stats.verified, stats.expired, stats.superseded
            );
        }
    }
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Accept `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` date bounds.
fn validate_date_bound(bound: &str) -> Result<()> {
    let date_ok = chrono::NaiveDate::parse_from_str(bound, "%Y-%m-%d").is_ok();
    let datetime_ok = chrono::NaiveDateTime::parse_from_str(bound, "%Y-%m-%d %H:%M:%S").is_ok();
    if date_ok || datetime_ok {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "date bound {bound:?} is not YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"
        ))
        .into())
    }
}
