use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use readnote_engine::clock::SystemClock;
use readnote_engine::config::{self, EngineConfig};
use readnote_engine::models::{BookStatus, DateRangeSpec, SortField, SortOrder};
use readnote_engine::search::{SearchConditions, SearchOrchestrator, SearchResultItem};
use readnote_engine::storage::{DocumentStore, FileKvStore, MemoryStore, Snapshot};
use readnote_engine::tags::{TagConsistencyEngine, TagUpdateResult};
use readnote_engine::TagOperationError;

#[derive(Parser)]
#[command(name = "readnote")]
#[command(about = "Search and tag maintenance for a reading-notes library")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Library snapshot (defaults to data_dir/snapshot_file from config.json)
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Owner whose books and memos are used
    #[arg(long, global = true)]
    owner: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search books and memos
    Search(SearchArgs),
    /// Rename a tag everywhere
    RenameTag { from: String, to: String },
    /// Remove a tag everywhere
    DeleteTag { tag: String },
    /// Replace every alias with the canonical tag
    MergeTags {
        canonical: String,
        #[arg(required = true)]
        aliases: Vec<String>,
    },
    /// List tags by usage
    Tags {
        #[arg(long)]
        json: bool,
    },
    /// Show search cache statistics
    CacheStats,
    /// Drop expired search cache entries
    PurgeCache,
    /// Drop the persisted search cache
    ClearCache,
    /// Print version and build time
    Version,
}

#[derive(clap::Args)]
struct SearchArgs {
    /// Free text (at least 2 characters unless a filter is set)
    text: Option<String>,

    /// unread, reading, finished, paused
    #[arg(long, value_parser = parse_status)]
    status: Option<BookStatus>,

    /// Tag filter, repeatable
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Text that memos must contain
    #[arg(long)]
    memo: Option<String>,

    #[arg(long)]
    year: Option<i32>,

    #[arg(long, requires = "year")]
    month: Option<u32>,

    #[arg(long, requires = "year", conflicts_with = "month")]
    quarter: Option<u32>,

    /// Custom range start (YYYY-MM-DD)
    #[arg(long, requires = "to")]
    from: Option<NaiveDate>,

    /// Custom range end (YYYY-MM-DD)
    #[arg(long, requires = "from")]
    to: Option<NaiveDate>,

    /// Last N months
    #[arg(long)]
    recent: Option<u32>,

    #[arg(long, value_enum, default_value = "updated-at")]
    sort: SortArg,

    /// Ascending order
    #[arg(long)]
    asc: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    UpdatedAt,
    CreatedAt,
    Title,
    Author,
    Page,
}

impl From<SortArg> for SortField {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::UpdatedAt => SortField::UpdatedAt,
            SortArg::CreatedAt => SortField::CreatedAt,
            SortArg::Title => SortField::Title,
            SortArg::Author => SortField::Author,
            SortArg::Page => SortField::Page,
        }
    }
}

fn parse_status(s: &str) -> Result<BookStatus, String> {
    BookStatus::parse(&s.trim().to_lowercase()).ok_or_else(|| format!("unknown status {:?}", s))
}

impl SearchArgs {
    fn date_range(&self) -> DateRangeSpec {
        if let (Some(start_date), Some(end_date)) = (self.from, self.to) {
            return DateRangeSpec::Custom { start_date, end_date };
        }
        if let Some(months) = self.recent {
            return DateRangeSpec::Recent { months };
        }
        match (self.year, self.month, self.quarter) {
            (Some(year), Some(month), _) => DateRangeSpec::Month { year, month },
            (Some(year), _, Some(quarter)) => DateRangeSpec::Quarter { year, quarter },
            (Some(year), _, _) => DateRangeSpec::Year { year },
            _ => DateRangeSpec::None,
        }
    }

    fn conditions(&self) -> SearchConditions {
        let order = if self.asc { SortOrder::Asc } else { SortOrder::Desc };
        let mut conditions = SearchConditions::text(self.text.clone().unwrap_or_default())
            .with_date_range(self.date_range())
            .with_tags(self.tags.iter().map(String::as_str))
            .with_memo_content(self.memo.clone().unwrap_or_default())
            .sorted_by(self.sort.into(), order);
        if let Some(status) = self.status {
            conditions = conditions.with_status(status);
        }
        conditions
    }
}

/// Load the library snapshot; a missing file is an empty library / 加载数据快照
fn load_store(path: &Path) -> anyhow::Result<Arc<MemoryStore>> {
    let snapshot = if path.exists() {
        let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_str::<Snapshot>(&content).with_context(|| format!("Failed to parse {:?}", path))?
    } else {
        tracing::warn!("Snapshot {:?} not found, starting with an empty library", path);
        Snapshot::default()
    };
    // 本地快照没有索引定义，跳过复合索引校验
    let store = MemoryStore::from_snapshot(snapshot).without_index_checks();
    tracing::debug!("Loaded {} documents from {:?}", store.len(), path);
    Ok(Arc::new(store))
}

fn save_store(store: &MemoryStore, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(&store.snapshot())?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
    tracing::info!("Saved library snapshot to {:?}", path);
    Ok(())
}

fn print_item(item: &SearchResultItem) {
    match item {
        SearchResultItem::Book(b) => {
            let status = b.status.map(|s| s.as_str()).unwrap_or("-");
            println!("[book] {} / {} ({}) id={}", b.title, b.author, status, b.id);
        }
        SearchResultItem::Memo(m) => {
            let page = m.page.map(|p| format!(" p.{}", p)).unwrap_or_default();
            println!("[memo] {}{}: {} id={}", m.book_title, page, m.text, m.id);
        }
    }
}

fn orchestrator(app_config: &EngineConfig, store: Arc<MemoryStore>, owner: &str) -> anyhow::Result<SearchOrchestrator> {
    let kv = FileKvStore::new(app_config.get_cache_dir())?;
    Ok(SearchOrchestrator::new(store, owner, app_config, Arc::new(kv), Arc::new(SystemClock)))
}

fn finish_tag_command(
    store: Arc<MemoryStore>,
    snapshot_path: &Path,
    result: Result<TagUpdateResult, TagOperationError>,
) -> anyhow::Result<()> {
    match result {
        Ok(result) => {
            save_store(&store, snapshot_path)?;
            println!("Updated {} books and {} memos", result.books_updated, result.memos_updated);
            Ok(())
        }
        Err(e @ TagOperationError::PartialWrite { .. }) => {
            // 已提交的批次需要落盘
            save_store(&store, snapshot_path)?;
            tracing::error!("{}", e);
            anyhow::bail!(e.user_message())
        }
        Err(e) => {
            tracing::error!("{}", e);
            anyhow::bail!(e.user_message())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "readnote_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration / 加载配置
    config::init_config().map_err(anyhow::Error::msg)?;
    let app_config = config::config();

    // Create data directory if not exists / 创建数据目录
    let data_dir = app_config.get_data_dir();
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        tracing::info!("Created data directory: {:?}", data_dir);
    }

    let snapshot_path = cli.snapshot.clone().unwrap_or_else(|| app_config.get_snapshot_path());
    let owner = cli.owner.clone().unwrap_or_else(|| app_config.storage.owner_id.clone());

    match cli.command {
        Commands::Search(args) => {
            let store = load_store(&snapshot_path)?;
            let search = orchestrator(&app_config, store, &owner)?;
            let conditions = args.conditions();
            let plain = !conditions.has_structured_filters()
                && conditions.sort_by == SortField::default()
                && conditions.sort_order == SortOrder::default();
            let outcome = if plain {
                search.search_text(&conditions.text).await
            } else {
                search.search(conditions).await
            };
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => anyhow::bail!(e.user_message()),
            };

            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                for item in &outcome.items {
                    print_item(item);
                }
                let mut notes = Vec::new();
                if outcome.from_cache {
                    notes.push("cached");
                }
                if outcome.degraded {
                    notes.push("degraded");
                }
                let suffix = if notes.is_empty() { String::new() } else { format!(" ({})", notes.join(", ")) };
                println!("{} results{}", outcome.items.len(), suffix);
            }
        }
        Commands::RenameTag { from, to } => {
            let store = load_store(&snapshot_path)?;
            let engine = TagConsistencyEngine::new(store.clone(), &owner, &app_config.tags);
            let result = engine.rename(&from, &to).await;
            finish_tag_command(store, &snapshot_path, result)?;
        }
        Commands::DeleteTag { tag } => {
            let store = load_store(&snapshot_path)?;
            let engine = TagConsistencyEngine::new(store.clone(), &owner, &app_config.tags);
            let result = engine.delete(&tag).await;
            finish_tag_command(store, &snapshot_path, result)?;
        }
        Commands::MergeTags { canonical, aliases } => {
            let store = load_store(&snapshot_path)?;
            let engine = TagConsistencyEngine::new(store.clone(), &owner, &app_config.tags);
            let aliases: Vec<&str> = aliases.iter().map(String::as_str).collect();
            let result = engine.merge(&aliases, &canonical).await;
            finish_tag_command(store, &snapshot_path, result)?;
        }
        Commands::Tags { json } => {
            let store = load_store(&snapshot_path)?;
            tracing::debug!("Counting tags in {} store", store.name());
            let engine = TagConsistencyEngine::new(store, &owner, &app_config.tags);
            let usage = match engine.tag_usage().await {
                Ok(usage) => usage,
                Err(e) => anyhow::bail!(e.user_message()),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&usage)?);
            } else {
                for u in &usage {
                    println!("{:<24} books={:<4} memos={}", u.tag, u.books, u.memos);
                }
            }
        }
        Commands::CacheStats => {
            let search = orchestrator(&app_config, Arc::new(MemoryStore::new()), &owner)?;
            let stats = search.cache_stats();
            println!(
                "{} entries ({} valid), max {}, expiry {} ms",
                stats.total_items, stats.valid_items, stats.max_items, stats.expiry_ms
            );
        }
        Commands::PurgeCache => {
            let search = orchestrator(&app_config, Arc::new(MemoryStore::new()), &owner)?;
            println!("Purged {} expired entries", search.purge_cache());
        }
        Commands::ClearCache => {
            let search = orchestrator(&app_config, Arc::new(MemoryStore::new()), &owner)?;
            search.clear_cache();
            println!("Search cache cleared");
        }
        Commands::Version => {
            println!("readnote {} (built {})", env!("CARGO_PKG_VERSION"), env!("BUILD_TIME"));
        }
    }

    Ok(())
}
