//! pairguard CLI.
//!
//! ```text
//! pairguard validate <NAME>      validate one manifest from --input-dir
//! pairguard validate-all         validate every manifest in --input-dir
//! pairguard index rebuild        list prefixes and replace the index cache
//! pairguard index show           describe the index cache
//! ```
//!
//! Exit status is non-zero only when the object store is unusable at startup
//! or the input directory cannot be read; manifests with missing files are
//! reported, not treated as failures.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use pairguard::args::{Backend, Cli, Command, GlobalArgs, IndexAction};
use pairguard::logging::init_logging;
use pairguard::orchestrator::list_manifests;
use pairguard::report::render_console;
use pairguard::{IndexOptions, IndexSource, Orchestrator, Selection};
use pairguard_index::{default_index_path, ExistenceIndex};
use pairguard_transport::{GcsJsonStore, GsutilStore, ObjectStore};

fn query_store(global: &GlobalArgs) -> Arc<dyn ObjectStore> {
    match global.backend {
        Backend::Gsutil => Arc::new(GsutilStore::with_binary(global.gsutil_binary.clone())),
        Backend::GcsJson => Arc::new(GcsJsonStore::new(global.gcs_token.clone())),
    }
}

/// Listing backends for index builds: the JSON API first when a token is
/// available, then gsutil.
fn listing_sources(global: &GlobalArgs) -> Vec<Arc<dyn ObjectStore>> {
    let mut sources: Vec<Arc<dyn ObjectStore>> = Vec::new();
    if global.gcs_token.as_deref().is_some_and(|t| !t.trim().is_empty()) {
        sources.push(Arc::new(GcsJsonStore::new(global.gcs_token.clone())));
    }
    sources.push(Arc::new(GsutilStore::with_binary(global.gsutil_binary.clone())));
    sources
}

fn index_path(global: &GlobalArgs) -> PathBuf {
    global.index_cache.clone().unwrap_or_else(default_index_path)
}

fn index_options(global: &GlobalArgs) -> IndexOptions {
    IndexOptions {
        path: index_path(global),
        refresh: global.refresh_index,
        prefixes: global.prefixes.clone(),
        sources: listing_sources(global),
    }
}

async fn probe(store: &dyn ObjectStore) -> Result<()> {
    store
        .probe()
        .await
        .with_context(|| format!("object store backend '{}' is unavailable", store.name()))
}

async fn run_validation(global: &GlobalArgs, selection: Selection) -> Result<()> {
    let store = query_store(global);
    probe(store.as_ref()).await?;

    let orchestrator = Orchestrator::new(store, global.to_config());
    let index = if global.no_index {
        IndexSource::Disabled
    } else {
        IndexSource::Lazy(index_options(global))
    };

    let outcome = orchestrator.run(&selection, index).await?;
    let written = orchestrator.write_summary(&outcome)?;

    print!("{}", render_console(&outcome.summary, &outcome.reports));
    println!();
    println!("Reports:");
    for path in written {
        println!("  {}", path.display());
    }
    Ok(())
}

async fn rebuild_index(global: &GlobalArgs) -> Result<()> {
    let options = index_options(global);
    // The first source is the one that lists; later ones are fallbacks.
    let lister = options
        .sources
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("no listing backend configured"))?;
    probe(lister.as_ref()).await?;

    let orchestrator = Orchestrator::new(query_store(global), global.to_config());
    let files = if global.prefixes.is_empty() {
        list_manifests(&global.input_dir)?
    } else {
        Vec::new()
    };
    let index = orchestrator.build_index(&files, &options).await;
    index.save(&options.path)?;
    println!(
        "Index rebuilt: {} objects under {} prefixes (source: {})",
        index.len(),
        index.prefixes.len(),
        index.source.as_deref().unwrap_or("none")
    );
    println!("Saved to {}", options.path.display());
    Ok(())
}

fn show_index(global: &GlobalArgs) -> Result<()> {
    let path = index_path(global);
    match ExistenceIndex::load(&path) {
        None => println!("no index cache at {}", path.display()),
        Some(index) => {
            println!("Index cache: {}", path.display());
            println!("  objects:    {}", index.len());
            println!("  created_at: {}", index.created_at.to_rfc3339());
            println!("  scope:      {}", index.scope.as_deref().unwrap_or("-"));
            println!("  source:     {}", index.source.as_deref().unwrap_or("-"));
            println!("  prefixes:");
            for prefix in &index.prefixes {
                println!("    {}", prefix);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    match cli.command {
        Command::Validate { name } => run_validation(&cli.global, Selection::Named(name)).await,
        Command::ValidateAll => run_validation(&cli.global, Selection::All).await,
        Command::Index { action } => match action {
            IndexAction::Rebuild => rebuild_index(&cli.global).await,
            IndexAction::Show => show_index(&cli.global),
        },
    }
}
