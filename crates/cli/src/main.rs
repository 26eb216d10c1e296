use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use quarry_engine::{Engine, EngineOptions};
use quarry_protocol::{
    BulkAction, IndexJob, IndexKind, IndexMode, Priority, RepositoryUpdate, SearchMode,
    SearchRequest,
};
use quarry_vector_store::{EmbeddingProvider, FastEmbedProvider, HashingEmbeddingProvider};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "quarry",
    version,
    about = "Hybrid code and documentation search over local repositories"
)]
struct Cli {
    /// YAML repository configuration.
    #[arg(long, default_value = "quarry.yaml", global = true)]
    config: PathBuf,

    /// Directory holding the metadata database and both index stores.
    #[arg(long, default_value = ".quarry", global = true)]
    data_dir: PathBuf,

    /// Use the deterministic hashing embedder instead of the ONNX model
    /// (no model download; semantic quality is reduced accordingly).
    #[arg(long, global = true)]
    hashing_embedder: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an indexing job over the configured repositories.
    Index {
        /// Restrict to these repositories (default: all).
        #[arg(long = "repo")]
        repositories: Vec<String>,
        /// Index kinds to run: lexical, vector (default: both).
        #[arg(long = "kind")]
        kinds: Vec<String>,
        /// Clear the selected backends first and re-index everything.
        #[arg(long)]
        full: bool,
        /// Index repositories even when they are locked.
        #[arg(long)]
        override_excluded: bool,
    },
    /// Search the indexes.
    Search {
        query: String,
        /// lexical, semantic, or hybrid.
        #[arg(long, default_value = "hybrid")]
        mode: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long = "repo")]
        repositories: Vec<String>,
        /// Extensions without the leading dot.
        #[arg(long = "file-type")]
        file_types: Vec<String>,
        /// Repository-relative folder prefix.
        #[arg(long)]
        folder: Option<String>,
        /// Minimum fused score (hybrid only).
        #[arg(long)]
        min_score: Option<f32>,
        /// Print the raw JSON response.
        #[arg(long)]
        json: bool,
    },
    /// Watch auto-reindex repositories until interrupted.
    Watch,
    /// Show indexing and watcher status.
    Status,
    /// Manage the repository registry.
    Repos {
        #[command(subcommand)]
        command: RepoCommand,
    },
}

#[derive(Subcommand)]
enum RepoCommand {
    /// List registered repositories with their indexing stats.
    List,
    Add {
        name: String,
        path: PathBuf,
        /// high, medium, or low.
        #[arg(long, default_value = "medium")]
        priority: String,
        #[arg(long)]
        disabled: bool,
        #[arg(long)]
        no_auto_reindex: bool,
    },
    /// Remove a repository from the registry and both indexes. Files on
    /// disk are untouched.
    Remove { name: String },
    Update {
        name: String,
        #[arg(long)]
        enable: bool,
        #[arg(long, conflicts_with = "enable")]
        disable: bool,
        #[arg(long)]
        lock: bool,
        #[arg(long, conflicts_with = "lock")]
        unlock: bool,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        auto_reindex: Option<bool>,
    },
    /// enable-all, disable-all, lock-all, or unlock-all.
    Bulk { action: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let embedder: Arc<dyn EmbeddingProvider> = if cli.hashing_embedder {
        Arc::new(HashingEmbeddingProvider)
    } else {
        FastEmbedProvider::shared().context("failed to load the embedding model")?
    };

    let options = EngineOptions {
        data_dir: cli.data_dir.clone(),
        config_path: cli.config.clone(),
    };
    let engine = Engine::open(&options, embedder).await?;

    match cli.command {
        Command::Index {
            repositories,
            kinds,
            full,
            override_excluded,
        } => {
            let kinds = parse_kinds(&kinds)?;
            let job = IndexJob {
                repositories,
                kinds,
                mode: if full {
                    IndexMode::FullRebuild
                } else {
                    IndexMode::Incremental
                },
                override_excluded,
            };
            let handle = engine.reindex(&job)?;
            let summary = handle.wait().await?;
            for (kind, stats) in &summary {
                println!(
                    "{kind}: {} indexed, {} deleted, {} chunks, {} errors in {}ms",
                    stats.files_indexed,
                    stats.files_deleted,
                    stats.chunks,
                    stats.errors.len(),
                    stats.time_ms
                );
                for error in &stats.errors {
                    log::warn!("{kind}: {error}");
                }
            }
        }
        Command::Search {
            query,
            mode,
            limit,
            repositories,
            file_types,
            folder,
            min_score,
            json,
        } => {
            let mode: SearchMode = mode.parse().map_err(|e: String| anyhow!(e))?;
            let req = SearchRequest {
                query,
                mode,
                limit,
                repositories,
                file_types,
                folder_filter: folder,
                min_score,
            };
            let resp = match mode {
                SearchMode::Lexical => engine.search_lexical(&req).await?,
                SearchMode::Semantic => engine.search_semantic(&req).await?,
                SearchMode::Hybrid => engine.search_hybrid(&req).await?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
            } else {
                if let Some(degraded) = &resp.degraded {
                    eprintln!(
                        "warning: {} backend unavailable ({}), results degraded",
                        degraded.backend, degraded.reason
                    );
                }
                for (i, hit) in resp.results.iter().enumerate() {
                    println!(
                        "{:>2}. [{:.4}] {}:{}",
                        i + 1,
                        hit.score,
                        hit.repository,
                        hit.relative_path
                    );
                    let snippet = hit.snippet.replace('\n', " ");
                    let snippet = snippet.trim();
                    if !snippet.is_empty() {
                        println!("      {snippet}");
                    }
                }
                if resp.results.is_empty() {
                    println!("no results for {:?}", resp.query);
                }
            }
        }
        Command::Watch => {
            engine.start_watchers().await?;
            println!("watching repositories, ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            engine.shutdown().await;
        }
        Command::Status => {
            let status = engine.indexing_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            let watchers = engine.watcher_status().await;
            if !watchers.is_empty() {
                println!("{}", serde_json::to_string_pretty(&watchers)?);
            }
        }
        Command::Repos { command } => match command {
            RepoCommand::List => {
                for overview in engine.repositories().await? {
                    let repo = &overview.repository;
                    let flags = [
                        (!repo.enabled).then_some("disabled"),
                        repo.excluded.then_some("locked"),
                        repo.auto_reindex.then_some("auto"),
                    ]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(",");
                    println!(
                        "{} {} [{:?}] {} files on disk {}",
                        repo.name,
                        repo.path.display(),
                        repo.priority,
                        overview.files_on_disk,
                        if flags.is_empty() { String::new() } else { format!("({flags})") }
                    );
                    for stat in &overview.stats {
                        println!(
                            "    {}: {} files, {} bytes, last run {:.2}s",
                            stat.index_kind,
                            stat.total_files_indexed,
                            stat.total_size_bytes,
                            stat.last_run_seconds
                        );
                    }
                }
            }
            RepoCommand::Add {
                name,
                path,
                priority,
                disabled,
                no_auto_reindex,
            } => {
                let priority: Priority = priority.parse().map_err(|e: String| anyhow!(e))?;
                let path = path.canonicalize().context("repository path")?;
                engine
                    .add_repository(&name, &path, priority, !disabled, !no_auto_reindex)
                    .await?;
                println!("added {name} at {}", path.display());
            }
            RepoCommand::Remove { name } => {
                engine.remove_repository(&name).await?;
                println!("removed {name}");
            }
            RepoCommand::Update {
                name,
                enable,
                disable,
                lock,
                unlock,
                priority,
                auto_reindex,
            } => {
                let priority = priority
                    .map(|p| p.parse::<Priority>().map_err(|e| anyhow!(e)))
                    .transpose()?;
                let update = RepositoryUpdate {
                    enabled: enable.then_some(true).or(disable.then_some(false)),
                    excluded: lock.then_some(true).or(unlock.then_some(false)),
                    priority,
                    auto_reindex,
                    include_patterns: None,
                    exclude_patterns: None,
                };
                let updated = engine.update_repository(&name, &update).await?;
                println!(
                    "{}: enabled={} locked={} priority={:?} auto_reindex={}",
                    updated.name, updated.enabled, updated.excluded, updated.priority,
                    updated.auto_reindex
                );
            }
            RepoCommand::Bulk { action } => {
                let action: BulkAction = action.parse().map_err(|e: String| anyhow!(e))?;
                let touched = engine.bulk_update(action).await?;
                println!("updated {touched} repositories");
            }
        },
    }

    Ok(())
}

fn parse_kinds(raw: &[String]) -> Result<BTreeSet<IndexKind>> {
    if raw.is_empty() {
        return Ok(IndexKind::ALL.into_iter().collect());
    }
    raw.iter()
        .map(|k| k.parse::<IndexKind>().map_err(|e| anyhow!(e)))
        .collect()
}
