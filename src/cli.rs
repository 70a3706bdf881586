use std::cmp;
use std::error::Error;
use std::path::PathBuf;

use atty::Stream;
use clap::{Parser, Subcommand};
use serde_json::json;
use studyguide_rs::search::{self, SearchHit, Segment};
use studyguide_rs::view::{self, DefinitionCard};
use studyguide_rs::{
    AppConfig, Controller, DataFetcher, DefinitionStore, Event, loader_from_config,
    normalize_phrase,
};
use termimad::{FmtText, MadSkin, terminal_size};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "studyguide", about = "Read, search and annotate study sources", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    /// Directory that the manifest and source paths are relative to.
    #[arg(long, global = true, value_name = "DIR")]
    data_root: Option<PathBuf>,

    /// Directory holding saved definitions and the offline cache.
    #[arg(long, global = true, value_name = "DIR")]
    storage_dir: Option<PathBuf>,

    /// Read sources through the offline cache.
    #[arg(long, global = true)]
    offline: bool,

    /// Log progress to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the sources named in the manifest.
    Sources,
    /// Print a source, optionally highlighting a term.
    Show {
        /// Source id (its path) or title.
        source: String,
        /// Term to highlight in the text.
        #[arg(long)]
        highlight: Option<String>,
    },
    /// Search every paragraph of every source.
    Search {
        query: String,
        /// Maximum number of results to print.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Save or replace the definition of a phrase.
    Define { phrase: String, definition: String },
    /// Remove a saved definition.
    Undefine { phrase: String },
    /// List saved definitions with their occurrence counts.
    Definitions,
    /// Manage the offline cache.
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Run the web reader.
    #[cfg(feature = "web")]
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: std::net::SocketAddr,
        /// Use the Bootstrap stylesheet instead of Tailwind.
        #[arg(long)]
        bootstrap: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Fetch every precached asset and drop older cache versions.
    Install,
    /// List the assets currently cached.
    Status,
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = resolve_config(&cli);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let as_json = cli.json;
    match cli.command {
        Command::Sources => runtime.block_on(handle_sources(&config, as_json)),
        Command::Show { source, highlight } => {
            runtime.block_on(handle_show(&config, &source, highlight, as_json))
        }
        Command::Search { query, limit } => {
            runtime.block_on(handle_search(&config, &query, limit, as_json))
        }
        Command::Define { phrase, definition } => {
            runtime.block_on(handle_define(&config, &phrase, &definition, as_json))
        }
        Command::Undefine { phrase } => handle_undefine(&config, &phrase, as_json),
        Command::Definitions => runtime.block_on(handle_definitions(&config, as_json)),
        Command::Cache(CacheCommand::Install) => runtime.block_on(handle_cache_install(&config)),
        Command::Cache(CacheCommand::Status) => {
            runtime.block_on(handle_cache_status(&config, as_json))
        }
        #[cfg(feature = "web")]
        Command::Serve { addr, bootstrap } => {
            let web_config = studyguide_rs::web::WebConfig {
                addr,
                theme: if bootstrap {
                    studyguide_rs::web::WebTheme::Bootstrap
                } else {
                    studyguide_rs::web::WebTheme::Tailwind
                },
            };
            runtime.block_on(studyguide_rs::web::serve(web_config, config))?;
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("warn")
        }
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_config(cli: &Cli) -> AppConfig {
    let mut config = AppConfig::from_env();
    if let Some(root) = &cli.data_root {
        config.data_root = root.clone();
    }
    if let Some(dir) = &cli.storage_dir {
        config.set_storage_dir(dir.clone());
    }
    config.offline = cli.offline;
    config
}

/// Controller with saved definitions and freshly loaded sources.
async fn loaded_controller(config: &AppConfig) -> Result<Controller, Box<dyn Error>> {
    let loader = loader_from_config(config);
    let mut controller = Controller::open(DefinitionStore::persistent(&config.storage_dir));
    controller.reload(&loader, false).await?;
    Ok(controller)
}

async fn handle_sources(config: &AppConfig, as_json: bool) -> Result<(), Box<dyn Error>> {
    let controller = loaded_controller(config).await?;
    let sources = controller.state().sources();

    if as_json {
        let payload: Vec<_> = sources
            .iter()
            .map(|source| {
                json!({
                    "id": source.id,
                    "title": source.title,
                    "sections": source.sections.len(),
                    "paragraphs": source.paragraph_count(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", controller.state().status());
        let rows: Vec<_> = sources
            .iter()
            .map(|source| {
                (
                    source.id.as_str(),
                    source.title.as_str(),
                    source.sections.len(),
                    source.paragraph_count(),
                )
            })
            .collect();
        print_sources_table(&rows);
    }
    Ok(())
}

async fn handle_show(
    config: &AppConfig,
    query: &str,
    highlight: Option<String>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let controller = loaded_controller(config).await?;
    let state = controller.state();
    let (position, source) = state
        .sources()
        .iter()
        .enumerate()
        .find(|(_, source)| source.id == query)
        .or_else(|| {
            state
                .sources()
                .iter()
                .enumerate()
                .find(|(_, source)| source.title.eq_ignore_ascii_case(query))
        })
        .ok_or_else(|| format!("No source found for {query:?}"))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(source)?);
        return Ok(());
    }

    let term = highlight.unwrap_or_default();
    let toc = view::render_toc(Some((position, source)));
    println!("{} ({})", source.title, toc.meta);
    for (section, content) in source
        .sections
        .iter()
        .zip(view::render_content(position, source, term.trim()))
    {
        let heading = if section.has_heading() {
            section.heading.as_str()
        } else {
            "Untitled section"
        };
        let body = content
            .paragraphs
            .iter()
            .map(|paragraph| segments_to_markdown(&paragraph.segments))
            .collect::<Vec<_>>()
            .join("\n\n");
        render_markdown_block(heading, &body);
    }
    Ok(())
}

async fn handle_search(
    config: &AppConfig,
    query: &str,
    limit: usize,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let query = query.trim();
    if query.is_empty() {
        return Err("Search query cannot be empty".into());
    }
    let limit = cmp::max(1, limit);
    let controller = loaded_controller(config).await?;
    let outcome = search::search(controller.state().index(), query);
    let shown: Vec<&SearchHit> = outcome.displayed().iter().take(limit).collect();

    if as_json {
        let payload = json!({
            "query": query,
            "limit": limit,
            "total_hits": outcome.total_hits,
            "paragraphs": outcome.paragraph_count(),
            "results": shown,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_search_table(query, outcome.total_hits, outcome.paragraph_count(), &shown);
    }
    Ok(())
}

async fn handle_define(
    config: &AppConfig,
    phrase: &str,
    definition: &str,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let controller = define_phrase(config, phrase, definition).await?;
    let key = normalize_phrase(phrase);
    let saved = controller
        .state()
        .definitions()
        .get(&key)
        .ok_or_else(|| format!("Definition for {phrase:?} was not saved"))?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(saved)?);
    } else {
        println!("Saved \"{}\": {}", saved.phrase, saved.definition);
        println!("{}", controller.state().status());
    }
    Ok(())
}

/// Runs the select-then-save flow against loaded sources so the status line
/// reflects the manifest.
async fn define_phrase(
    config: &AppConfig,
    phrase: &str,
    definition: &str,
) -> Result<Controller, Box<dyn Error>> {
    let mut controller = loaded_controller(config).await?;
    controller.dispatch(Event::BeginSelection(phrase.to_string()))?;
    if controller.state().selection().is_none() {
        return Err(format!(
            "Phrase must be {}-{} characters",
            studyguide_rs::state::MIN_SELECTION_CHARS,
            studyguide_rs::state::MAX_SELECTION_CHARS
        )
        .into());
    }
    controller.dispatch(Event::SaveDefinition(definition.to_string()))?;
    if let Some(error) = controller
        .state()
        .selection()
        .and_then(|selection| selection.error.clone())
    {
        return Err(error.into());
    }
    Ok(controller)
}

fn handle_undefine(config: &AppConfig, phrase: &str, as_json: bool) -> Result<(), Box<dyn Error>> {
    let mut controller = Controller::open(DefinitionStore::persistent(&config.storage_dir));
    let key = normalize_phrase(phrase);
    if controller.state().definitions().get(&key).is_none() {
        return Err(format!("No definition saved for {phrase:?}").into());
    }
    controller.dispatch(Event::RemoveDefinition(key.clone()))?;
    if as_json {
        println!("{}", json!({ "removed": key }));
    } else {
        println!("Removed \"{key}\".");
    }
    Ok(())
}

async fn handle_definitions(config: &AppConfig, as_json: bool) -> Result<(), Box<dyn Error>> {
    let controller = loaded_controller(config).await?;
    let cards = controller.view().definitions;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&cards)?);
    } else {
        print_definitions_table(&cards);
    }
    Ok(())
}

async fn handle_cache_install(config: &AppConfig) -> Result<(), Box<dyn Error>> {
    let mut config = config.clone();
    config.offline = true;
    let fetcher = DataFetcher::from_config(&config);
    let cache = fetcher
        .offline_cache()
        .ok_or("Offline cache is not configured")?;
    let stored = cache.install().await?;
    let removed = cache.activate().await?;
    println!("Cached {stored} asset(s) in {}.", cache.name());
    if !removed.is_empty() {
        println!("Removed old caches: {}", removed.join(", "));
    }
    Ok(())
}

async fn handle_cache_status(config: &AppConfig, as_json: bool) -> Result<(), Box<dyn Error>> {
    let mut config = config.clone();
    config.offline = true;
    let fetcher = DataFetcher::from_config(&config);
    let cache = fetcher
        .offline_cache()
        .ok_or("Offline cache is not configured")?;
    let paths = cache.cached_paths().await?;

    if as_json {
        let payload = json!({ "cache": cache.name(), "assets": paths });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if paths.is_empty() {
        println!("Cache {} is empty.", cache.name());
    } else {
        println!("Cache {}:", cache.name());
        for path in paths {
            println!("  {path}");
        }
    }
    Ok(())
}

fn print_sources_table(rows: &[(&str, &str, usize, usize)]) {
    if rows.is_empty() {
        return;
    }
    let id_width = rows
        .iter()
        .map(|(id, ..)| id.len())
        .max()
        .unwrap_or(2)
        .max("ID".len());
    let title_width = rows
        .iter()
        .map(|(_, title, ..)| title.chars().count())
        .max()
        .unwrap_or(5)
        .max("TITLE".len());
    println!(
        "{:<id_width$}  {:<title_width$}  {:>8}  {:>10}",
        "ID", "TITLE", "SECTIONS", "PARAGRAPHS"
    );
    println!(
        "{:-<id_width$}  {:-<title_width$}  {:->8}  {:->10}",
        "", "", "", ""
    );
    for (id, title, sections, paragraphs) in rows {
        println!("{id:<id_width$}  {title:<title_width$}  {sections:>8}  {paragraphs:>10}");
    }
}

fn print_search_table(query: &str, total_hits: usize, paragraphs: usize, rows: &[&SearchHit]) {
    if rows.is_empty() {
        println!("No paragraphs contain \"{query}\".");
        return;
    }
    println!("{total_hits} hit(s) for \"{query}\" in {paragraphs} paragraph(s):");
    let width = rows
        .iter()
        .map(|hit| hit.dom_id.len())
        .max()
        .unwrap_or(2)
        .max("PARAGRAPH".len());
    println!("{:<width$}  {:>5}  {}", "PARAGRAPH", "HITS", "WHERE");
    println!("{:-<width$}  {:->5}  {}", "", "", "-----");
    for hit in rows {
        let title = view::result_title(&hit.source_title, &hit.heading, hit.count);
        println!("{:<width$}  {:>5}  {}", hit.dom_id, hit.count, title);
        println!("{:<width$}         {}", "", hit.snippet);
    }
}

fn print_definitions_table(cards: &[DefinitionCard]) {
    if cards.is_empty() {
        println!("No definitions yet.");
        return;
    }
    let width = cards
        .iter()
        .map(|card| card.phrase.chars().count())
        .max()
        .unwrap_or(6)
        .max("PHRASE".len());
    println!("{:<width$}  {:>5}  {}", "PHRASE", "FOUND", "DEFINITION");
    println!("{:-<width$}  {:->5}  {}", "", "", "----------");
    for card in cards {
        println!(
            "{:<width$}  {:>5}  {}",
            card.phrase, card.occurrences, card.definition
        );
    }
}

fn segments_to_markdown(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| {
            if segment.hit {
                format!("**{}**", segment.text)
            } else {
                segment.text.clone()
            }
        })
        .collect()
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn markdown_skin() -> MadSkin {
    MadSkin::default()
}

fn render_markdown_block(title: &str, body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    println!("\n{title}:");
    if stdout_is_tty() {
        let skin = markdown_skin();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_with_one_source(dir: &std::path::Path) -> AppConfig {
        let data = dir.join("site");
        fs::create_dir_all(data.join("data")).unwrap();
        fs::write(data.join("data/index.json"), r#"{"files": ["data/a.json"]}"#).unwrap();
        fs::write(
            data.join("data/a.json"),
            r#"{"title": "A", "sections": [{"heading": "Ch1", "verbatimText": "the cat sat"}]}"#,
        )
        .unwrap();
        let mut config = AppConfig::default();
        config.data_root = data;
        config.set_storage_dir(dir.join("store"));
        config
    }

    #[tokio::test]
    async fn define_reports_loaded_sources_in_status() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_one_source(dir.path());
        let controller = define_phrase(&config, " Cat ", "a feline").await.unwrap();
        assert_eq!(
            controller.state().status(),
            "1 source loaded. 1 definition saved locally."
        );
        assert_eq!(view::render(controller.state()).definitions[0].occurrences, 1);
    }

    #[tokio::test]
    async fn define_rejects_empty_definition() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_one_source(dir.path());
        let err = define_phrase(&config, "cat", "   ").await.err().unwrap();
        assert_eq!(err.to_string(), "Definition cannot be empty.");
    }
}
