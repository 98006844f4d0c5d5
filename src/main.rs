use laana::backfill::{
    spawn_stop_listener, BackfillOrchestrator, BackfillReport, BackfillSettings, BulkWriter, CheckpointStore,
};
use laana::cli::{ordering, Cli, Commands, ConfigAction, QueryArgs};
use laana::config::{parse_duration, Config, ConfigValidator};
use laana::corpus::{EntityKind, QualityScorer};
use laana::cursor::{BatchCursor, KeysetCursor, KeysetSource, LeasedCursor, SingleTargetCursor};
use laana::embedding::gateway_from_config;
use laana::error::{LaanaError, Result};
use laana::query::{target_vector_field, Backend, ModeSpec};
use laana::retrieval::{SearchExecutor, SearchService};
use laana::storage::{import_jsonl, ElasticStore, LocalStore};
use laana::vector::{ModelTier, VectorField};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Search {
            query,
            limit,
            offset,
            highlight,
            sort,
            desc,
            random,
            seed,
            explain,
            json,
        } => {
            let config = load_config(cli.config)?;
            let mut options = query.options(limit.unwrap_or(config.search.default_k));
            options.offset = offset;
            options.highlight = highlight;
            options.ordering = ordering(sort.as_deref(), desc, random, seed)?;
            runtime()?.block_on(cmd_search(&config, &query, options, explain, json))?;
        }
        Commands::Count { query } => {
            let config = load_config(cli.config)?;
            runtime()?.block_on(cmd_count(&config, &query))?;
        }
        Commands::Backfill {
            target,
            tier,
            limit,
            id,
            fresh,
            json,
        } => {
            let mut config = load_config(cli.config)?;
            if let Some(target) = target {
                config.backfill.target = target;
            }
            if let Some(tier) = tier {
                config.backfill.tier = tier;
            }
            ConfigValidator::validate(&config)?;
            runtime()?.block_on(cmd_backfill(&config, limit, id, fresh, json))?;
        }
        Commands::Import { file, no_score } => {
            let config = load_config(cli.config)?;
            cmd_import(&config, &file, no_score)?;
        }
        Commands::Stats => {
            let config = load_config(cli.config)?;
            cmd_stats(&config)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "laana=debug" } else { "laana=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| LaanaError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| LaanaError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}

/// Executor for the configured backend; the relational backend only renders
fn executor_for(config: &Config) -> Result<Option<Arc<dyn SearchExecutor>>> {
    let executor: Arc<dyn SearchExecutor> = match Backend::parse(&config.search.backend)? {
        Backend::Embedded => LocalStore::open(&config.storage)?.corpus,
        Backend::DocumentStore => Arc::new(ElasticStore::new(&config.search)?),
        Backend::Relational => return Ok(None),
    };
    Ok(Some(executor))
}

fn search_service(config: &Config, query: &QueryArgs) -> Result<SearchService> {
    let spec = ModeSpec::parse(&query.mode_name())?;
    // Only load a model when the mode embeds its query
    let tiers: Vec<ModelTier> = if spec.mode.needs_vector() {
        vec![target_vector_field(spec.granularity).tier]
    } else {
        Vec::new()
    };
    let gateway = gateway_from_config(&config.embedding, &tiers)?;
    SearchService::from_config(&config.search, gateway, executor_for(config)?)
}

async fn cmd_search(
    config: &Config,
    query: &QueryArgs,
    options: laana::query::SearchOptions,
    explain: bool,
    json: bool,
) -> Result<()> {
    let service = search_service(config, query)?;
    let mode = query.mode_name();

    if explain {
        let rendered = service.explain(&mode, &query.text, &options).await?;
        println!("{}", to_json(&rendered)?);
        return Ok(());
    }

    let response = service.search(&mode, &query.text, &options).await?;
    if json {
        println!("{}", to_json(&response)?);
        return Ok(());
    }

    if response.hits.is_empty() {
        println!("No results for '{}' ({})", query.text, response.mode);
        return Ok(());
    }

    println!("Results for '{}' ({}), total {}", query.text, response.mode, response.total);
    for (rank, hit) in response.hits.iter().enumerate() {
        let origin = match hit.source_id {
            Some(source) => format!("{} in {}", hit.id, source),
            None => hit.id.to_string(),
        };
        println!("\n{:>3}. [{}] score {:.3}", options.offset + rank + 1, origin, hit.score);
        if let Some(name) = &hit.meta.source_name {
            println!("     {} {}", name, hit.meta.date.as_deref().unwrap_or(""));
        }
        match &hit.highlights {
            Some(fragments) => {
                for fragment in fragments {
                    println!("     … {}", fragment);
                }
            }
            None => println!("     {}", preview(&hit.text, 200)),
        }
    }
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}

async fn cmd_count(config: &Config, query: &QueryArgs) -> Result<()> {
    let service = search_service(config, query)?;
    let count = service
        .count(&query.mode_name(), &query.text, &query.options(config.search.default_k))
        .await?;
    println!("{}", count);
    Ok(())
}

async fn cmd_backfill(config: &Config, limit: Option<usize>, id: Option<i64>, fresh: bool, json: bool) -> Result<()> {
    let mut settings = BackfillSettings::from_config(&config.backfill, &config.embedding)?;
    settings.limit = limit;
    let field = settings.field;
    let gateway = gateway_from_config(&config.embedding, &[field.tier])?;

    let mut local = None;
    let writer: Arc<dyn BulkWriter>;
    let keyset: Arc<dyn KeysetSource>;
    match Backend::parse(&config.search.backend)? {
        Backend::Embedded => {
            let store = LocalStore::open(&config.storage)?;
            writer = store.corpus.clone();
            keyset = store.corpus.clone();
            local = Some(store);
        }
        Backend::DocumentStore => {
            let store = Arc::new(ElasticStore::new(&config.search)?);
            writer = store.clone();
            keyset = store;
        }
        Backend::Relational => {
            return Err(LaanaError::Config(
                "The relational backend has no writer; backfill runs against document_store or embedded".to_string(),
            ))
        }
    }

    let mut orchestrator = BackfillOrchestrator::new(gateway, writer, settings);
    if let (Some(store), None) = (&local, id) {
        let checkpoints = store.checkpoint_store();
        if fresh {
            checkpoints.clear(&orchestrator.checkpoint_key())?;
        }
        orchestrator = orchestrator.with_checkpoints(checkpoints);
    }
    let _listener = spawn_stop_listener(orchestrator.stop_handle())?;

    let mut cursor = cursor_for(config, &orchestrator, field, keyset, id)?;
    println!("✓ Backfilling {}", field.key());
    let (report, fatal) = match orchestrator.run(cursor.as_mut()).await {
        Ok(report) => (report, None),
        Err(LaanaError::BackfillAborted { report, source }) => (*report, Some(*source)),
        Err(e) => return Err(e),
    };

    if json {
        println!("{}", to_json(&report)?);
    } else {
        print_report(&report);
    }
    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn cursor_for(
    config: &Config,
    orchestrator: &BackfillOrchestrator,
    field: VectorField,
    keyset: Arc<dyn KeysetSource>,
    id: Option<i64>,
) -> Result<Box<dyn BatchCursor>> {
    if let Some(id) = id {
        return Ok(Box::new(SingleTargetCursor::new(keyset, field.entity, id)));
    }
    match config.backfill.cursor.as_str() {
        "leased" => {
            let store = Arc::new(ElasticStore::new(&config.search)?);
            let keep_alive = config.backfill.keep_alive.clone();
            if parse_duration(&keep_alive).is_none() {
                return Err(LaanaError::InvalidConfigValue {
                    path: "backfill.keep_alive".to_string(),
                    message: format!("Invalid duration format: {}", keep_alive),
                });
            }
            Ok(Box::new(LeasedCursor::new(
                store,
                field,
                config.backfill.batch_size,
                keep_alive,
                Duration::from_secs(config.backfill.lease_timeout_secs),
            )))
        }
        _ => {
            let resume = orchestrator.resume_point()?;
            if let Some(watermark) = resume {
                println!("  Resuming after {} {}", field.entity, watermark);
            }
            Ok(Box::new(
                KeysetCursor::new(keyset, field, config.backfill.batch_size).resume(resume),
            ))
        }
    }
}

fn print_report(report: &BackfillReport) {
    let mark = if report.errors == 0 && report.aborted.is_none() { "✓" } else { "⚠" };
    println!("{} Run {} ({:?})", mark, report.run_id, report.final_state);
    println!("  Fetched:    {}", report.fetched);
    println!("  Processed:  {}", report.processed);
    println!("  Errors:     {}", report.errors);
    println!("  Skipped:    {}", report.skipped);
    println!("  Unresolved: {}", report.unresolved);
    println!(
        "  Time:       {}ms (embedding {}ms, writing {}ms)",
        report.total_ms, report.embed_ms, report.write_ms
    );
    if report.stopped_early {
        println!("  Stopped early; rerun to continue");
    }
    if let Some(reason) = &report.aborted {
        println!("✗ Aborted: {}", reason);
    }
    for detail in &report.error_details {
        println!("  - {}: {}", detail.entity_id, detail.reason);
    }
}

fn cmd_import(config: &Config, file: &std::path::Path, no_score: bool) -> Result<()> {
    let store = LocalStore::open(&config.storage)?;
    let scorer = match (&config.storage.vocabulary_file, no_score) {
        (Some(path), false) => Some(QualityScorer::load(&laana::config::expand_path(path)?)?),
        _ => None,
    };
    let stats = import_jsonl(&store.corpus, file, scorer.as_ref())?;
    println!("✓ Imported {} documents and {} sentences", stats.documents, stats.sentences);
    if stats.scored > 0 {
        println!("  Quality ratios computed: {}", stats.scored);
    }
    Ok(())
}

fn cmd_stats(config: &Config) -> Result<()> {
    let store = LocalStore::open(&config.storage)?;
    let stats = store.stats()?;
    println!("Laana corpus ({})", config.storage.database_path()?.display());
    println!("===========");
    println!("Documents: {}", stats.document_count);
    println!(
        "  missing vectors: {} small, {} large",
        stats.documents_missing_small, stats.documents_missing_large
    );
    println!("Sentences: {}", stats.sentence_count);
    println!(
        "  missing vectors: {} small, {} large",
        stats.sentences_missing_small, stats.sentences_missing_large
    );
    for entity in [EntityKind::Document, EntityKind::Sentence] {
        for tier in [ModelTier::Small, ModelTier::Large] {
            let key = VectorField::new(entity, tier).key();
            if let Some(watermark) = store.checkpoints.load(&key)? {
                println!("Checkpoint {}: {}", key, watermark);
            }
        }
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let content = toml::to_string_pretty(&config)?;
            println!("{}", content);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Backend: {}", config.search.backend);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| LaanaError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!("Config file not found, using defaults. Run 'laana config init' to create one.");
        let mut config = Config::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    Config::load(&path)
}
