mod server;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use qw_core::{Embedding, millis_to_iso8601, parse_snapshot};
use qw_store::{
    AppliedWrite, ImportReport, IngestOutcome, PatternStore, StoreConfig, StoreError,
};
use rmcp::{ServiceExt, transport::stdio};

#[derive(Parser)]
#[command(name = "qw", about = "Quaternion wave-pattern store CLI and MCP server")]
struct Cli {
    /// Store name inside the data directory (default from qw.toml, else "default")
    #[arg(long, global = true)]
    store: Option<String>,

    /// Override the absorption threshold in [0, 1]
    #[arg(long, global = true)]
    threshold: Option<f64>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct EmbeddingInput {
    /// Embedding as a JSON array of numbers
    #[arg(long)]
    embedding: Option<String>,

    /// File containing the embedding as a JSON array of numbers
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server on stdio transport
    Serve,

    /// Ingest one embedding
    Ingest {
        /// Provenance identifier for the embedded content
        #[arg(long)]
        source: String,

        #[command(flatten)]
        input: EmbeddingInput,
    },

    /// Search stored patterns by resonance with an embedding
    Search {
        #[command(flatten)]
        input: EmbeddingInput,

        /// Maximum number of results
        #[arg(long, default_value_t = 10)]
        top_k: usize,

        /// Minimum resonance score in [0, 1]
        #[arg(long, default_value_t = 0.0)]
        min_score: f64,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show store statistics
    Stats,

    /// Export all patterns to a JSON snapshot file
    Export {
        /// Output file path
        path: PathBuf,
    },

    /// Replace the store contents with a JSON snapshot file
    Import {
        /// Input file path
        path: PathBuf,

        /// Fail if any record is rejected
        #[arg(long)]
        strict: bool,
    },
}

fn open_store(cli: &Cli) -> Result<PatternStore> {
    let mut config = StoreConfig::load(None).context("failed to load store config")?;
    if let Some(name) = &cli.store {
        config = config.with_store_name(name);
    }
    if let Some(threshold) = cli.threshold {
        config = config
            .with_threshold(threshold)
            .context("invalid --threshold")?;
    }
    PatternStore::open(config).context("failed to open pattern store")
}

fn read_embedding(input: &EmbeddingInput) -> Result<Embedding> {
    let json = match (&input.embedding, &input.file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => bail!("either --embedding or --file is required"),
    };
    let values: Vec<f64> =
        serde_json::from_str(&json).context("embedding must be a JSON array of numbers")?;
    Embedding::new(values).context("invalid embedding")
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Serve => cmd_serve(&cli).await,
        Commands::Ingest { source, input } => cmd_ingest(&cli, source, input),
        Commands::Search {
            input,
            top_k,
            min_score,
            json,
        } => cmd_search(&cli, input, *top_k, *min_score, *json),
        Commands::Stats => cmd_stats(&cli),
        Commands::Export { path } => cmd_export(&cli, path),
        Commands::Import { path, strict } => cmd_import(&cli, path, *strict),
    }
}

async fn cmd_serve(cli: &Cli) -> Result<()> {
    let store = Arc::new(open_store(cli)?);
    tracing::info!("starting MCP server for store '{}'", store.config().store_name);

    let server = server::QwServer::new(Arc::clone(&store));
    let service = server
        .serve(stdio())
        .await
        .context("failed to start MCP server")?;
    service.waiting().await?;

    if store.is_dirty() {
        store.persist().context("failed to persist on shutdown")?;
    }
    Ok(())
}

fn print_ingest(outcome: &IngestOutcome) {
    if outcome.fused {
        println!(
            "fused into {} (score {:.4}, depth {})",
            outcome.pattern_id, outcome.score, outcome.depth
        );
    } else {
        println!("new pattern {}", outcome.pattern_id);
    }
}

fn print_import(report: &ImportReport, path: &Path) {
    for id in &report.rejected {
        eprintln!("rejected: {id}");
    }
    println!(
        "imported {} patterns from {} ({} rejected)",
        report.imported,
        path.display(),
        report.rejected.len()
    );
}

fn cmd_ingest(cli: &Cli, source: &str, input: &EmbeddingInput) -> Result<()> {
    let embedding = read_embedding(input)?;
    let store = open_store(cli)?;
    match store.ingest(&embedding, source) {
        Ok(outcome) => print_ingest(&outcome),
        Err(e) => {
            // Applied in memory; report it, then fail on the save below.
            if let Some(AppliedWrite::Ingest(outcome)) = e.applied() {
                print_ingest(outcome);
                tracing::warn!("{e}");
            } else {
                return Err(e).context("failed to ingest embedding");
            }
        }
    }

    store.close().context("failed to save store")?;
    Ok(())
}

fn cmd_search(
    cli: &Cli,
    input: &EmbeddingInput,
    top_k: usize,
    min_score: f64,
    json: bool,
) -> Result<()> {
    let embedding = read_embedding(input)?;
    let store = open_store(cli)?;
    let hits = store
        .search(&embedding, top_k, min_score)
        .context("search failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else if hits.is_empty() {
        println!("(no resonant patterns)");
    } else {
        for hit in &hits {
            println!(
                "{:.4}  {}  depth={}  sources={}",
                hit.score,
                hit.pattern_id,
                hit.depth,
                hit.sources.join(",")
            );
        }
    }
    Ok(())
}

fn cmd_stats(cli: &Cli) -> Result<()> {
    let store = open_store(cli)?;
    let stats = store.stats();

    println!("store:      {}", store.config().store_name);
    println!("backend:    {}", stats.backend);
    println!("patterns:   {}", stats.patterns);
    println!("active:     {}", stats.active);
    println!("dormant:    {}", stats.dormant);
    println!("fused:      {}", stats.fused);
    println!("max_depth:  {}", stats.max_depth);
    println!("sources:    {}", stats.total_sources);
    println!("threshold:  {}", stats.absorption_threshold);
    if let Some(updated) = stats.last_updated {
        println!("updated:    {}", millis_to_iso8601(updated));
    }
    Ok(())
}

fn cmd_export(cli: &Cli, path: &Path) -> Result<()> {
    let store = open_store(cli)?;
    let json = store.export_json().context("failed to serialize store")?;
    std::fs::write(path, &json).with_context(|| format!("failed to write {}", path.display()))?;

    println!("exported {} patterns to {}", store.len(), path.display());
    Ok(())
}

fn cmd_import(cli: &Cli, path: &Path, strict: bool) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let records = parse_snapshot(&json).context("invalid snapshot JSON")?;
    let store = open_store(cli)?;

    let result = if strict {
        store.import_strict(records)
    } else {
        store.import(records)
    };
    match result {
        Ok(report) => print_import(&report, path),
        Err(StoreError::StoreCorruption { rejected }) => {
            for id in &rejected {
                eprintln!("rejected: {id}");
            }
            bail!("import rejected {} record(s); store left unchanged", rejected.len());
        }
        Err(e) => {
            if let Some(AppliedWrite::Import(report)) = e.applied() {
                print_import(report, path);
                tracing::warn!("{e}");
            } else {
                return Err(e).context("failed to import snapshot");
            }
        }
    }

    store.close().context("failed to save store")?;
    Ok(())
}
