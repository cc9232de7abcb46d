use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod bookmarks;
mod cli;
mod config;
mod enrich;
mod pacing;
mod semantic;
mod services;
mod storage;
#[cfg(test)]
mod tests;

use bookmarks::Bookmark;
use cli::{Command, IoArgs};
use config::Config;
use enrich::{Categorizer, Enricher, FileContentCache};
use semantic::{
    EmbeddingCache, EmbeddingGateway, QueryController, QueryOutcome, Reranker, SemanticSearch,
};
use services::{FirecrawlClient, OpenAiClient};

fn get_base_path() -> anyhow::Result<String> {
    if let Ok(path) = std::env::var("LINKSEEK_BASE_PATH") {
        return Ok(path);
    }

    let home = homedir::my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(format!("{}/.local/share/linkseek", home.to_string_lossy()))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn openai_client(config: &Config) -> anyhow::Result<Arc<OpenAiClient>> {
    let key = config::api_key(services::openai::API_KEY_VAR)?;
    let client = OpenAiClient::new(key, &config.embeddings, &config.completion, &config.http)?;
    Ok(Arc::new(client))
}

fn write_json<T: Serialize + ?Sized>(value: &T, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::info!("wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn search(
    config: &Config,
    query: &str,
    io: &IoArgs,
    top_k: Option<usize>,
    no_rerank: bool,
) -> anyhow::Result<()> {
    let items = bookmarks::load_items(&io.input)?;
    let openai = openai_client(config)?;

    let gateway = Arc::new(EmbeddingGateway::new(
        openai.clone(),
        Arc::new(EmbeddingCache::new()),
        config.embeddings.batch_size,
    ));

    let mut search_config = config.search.clone();
    if no_rerank {
        search_config.rerank = false;
    }
    let reranker = Reranker::new(openai, &config.completion);
    let top_k = top_k.unwrap_or(search_config.top_k);
    if top_k == 0 {
        bail!("--top-k must be greater than 0");
    }

    let search = SemanticSearch::new(gateway, Some(reranker), search_config);
    let controller = QueryController::new(search, items).with_top_k(top_k);
    let embedded = controller
        .warm_up()
        .await
        .context("failed to embed bookmarks")?;
    log::info!("bookmarks with usable embeddings: {embedded}");

    let results = match controller.search(query).await {
        QueryOutcome::Results(results) => results,
        QueryOutcome::Superseded => bail!("query was superseded"),
    };
    write_json(&results, io.output.as_deref())
}

async fn enrich(config: &Config, io: &IoArgs, missing_only: bool) -> anyhow::Result<()> {
    let mut items = bookmarks::load_items(&io.input)?;

    let firecrawl = FirecrawlClient::new(
        config::api_key(services::firecrawl::API_KEY_VAR)?,
        &config.scrape,
        &config.http,
    )?;
    let backend = storage::BackendLocal::new(config.base_path())?;
    let content_cache = FileContentCache::load(Box::new(backend))
        .context("failed to load scraped content cache")?;
    log::info!("scraped content cache entries={}", content_cache.len());

    let enricher = Enricher::new(
        Arc::new(firecrawl),
        openai_client(config)?,
        Arc::new(content_cache),
        config,
    );

    let todo: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, b)| !missing_only || !b.is_enriched())
        .map(|(i, _)| i)
        .collect();
    let batch: Vec<Bookmark> = todo.iter().map(|&i| items[i].clone()).collect();

    let pb = ProgressBar::new(batch.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} {bar:40.cyan/blue} {pos}/{len} ({eta})")?
            .progress_chars("##-"),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(120));

    let enriched = enricher
        .enrich_with_progress(batch, |done| pb.set_position(done as u64))
        .await;
    pb.finish_and_clear();

    for (index, item) in todo.into_iter().zip(enriched) {
        items[index] = item;
    }

    let count = items.iter().filter(|b| b.is_enriched()).count();
    log::info!("enriched {count}/{} items", items.len());

    match io.output.as_deref() {
        Some(path) => bookmarks::save_items(path, &items),
        None => write_json(&items, None),
    }
}

async fn categorize(config: &Config, io: &IoArgs) -> anyhow::Result<()> {
    let items = bookmarks::load_items(&io.input)?;
    let categorizer = Categorizer::new(openai_client(config)?, config);
    let categories = categorizer.categorize(&items).await;
    write_json(&categories, io.output.as_deref())
}

fn import(io: &IoArgs) -> anyhow::Result<()> {
    let items = bookmarks::load_items(&io.input)?;
    match io.output.as_deref() {
        Some(path) => bookmarks::save_items(path, &items),
        None => write_json(&items, None),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = cli::Args::parse();

    let base_path = get_base_path()?;
    let config = Config::load_with(&base_path).context("failed to load config")?;

    match args.command {
        Command::Search {
            query,
            io,
            top_k,
            no_rerank,
        } => search(&config, &query, &io, top_k, no_rerank).await,
        Command::Enrich { io, missing_only } => enrich(&config, &io, missing_only).await,
        Command::Categorize { io } => categorize(&config, &io).await,
        Command::Import { io } => import(&io),
    }
}
