use anyhow::{Context, Result};
use clap::Parser;
use galleryrs::config::GalleryConfig;
use galleryrs::core::definition::DefinitionStore;
use galleryrs::core::pipeline::{GalleryOutput, GalleryPipeline};
use galleryrs::services::fetch::HttpFetcher;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(
    name = "galleryrs",
    version,
    about = "Build a deduplicated thumbnail gallery archive from item definitions"
)]
struct Cli {
    /// Input root containing the `Definitions` tree
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Directory to write the gallery archive into
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Maximum definitions processed at once
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Similarity at or above which two images are duplicates
    #[arg(long, value_name = "SCORE")]
    threshold: Option<f64>,

    /// JPEG quality for thumbnails (1-100)
    #[arg(long, value_name = "Q")]
    quality: Option<u8>,

    /// Per-request network timeout
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Delete definition files of failed and duplicate items after a successful build
    #[arg(long)]
    prune_definitions: bool,

    /// Log every processing step
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> GalleryConfig {
        let mut config = GalleryConfig::default();
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(threshold) = self.threshold {
            config.duplicate_threshold = threshold;
        }
        if let Some(quality) = self.quality {
            config.jpeg_quality = quality;
        }
        if let Some(secs) = self.timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    let start = Instant::now();
    let config = cli.config();

    println!("▶ Loading definitions from: {}", cli.input.display());
    let store = DefinitionStore::load(&cli.input)
        .with_context(|| format!("Failed to load definitions from {:?}", cli.input))?;
    println!("▶ Loaded {} definitions, creating gallery files", store.len());

    let fetcher = HttpFetcher::new(&config.user_agent, config.request_timeout)
        .context("Failed to create HTTP client")?;

    let bar = ProgressBar::new(store.len() as u64);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{bar:40}] {pos}/{len} {msg}",
    )?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let output_name = config.output_file_name.clone();
    let mut pipeline = GalleryPipeline::new(config, Arc::new(fetcher))?.with_progress(bar);
    let output = pipeline.run(store.definitions()).await?;

    report(&output);

    fs::create_dir_all(&cli.output)
        .with_context(|| format!("Failed to create directory {:?}", cli.output))?;
    let destination = cli.output.join(&output_name);
    write_atomically(&destination, &output.bytes)?;
    println!(
        "✅ Output zip is {} bytes in size → {}",
        output.bytes.len(),
        destination.display()
    );

    if cli.prune_definitions {
        prune_definitions(&store, &output)?;
    }

    println!("⏱ build took {:.2?}", start.elapsed());
    Ok(())
}

fn report(output: &GalleryOutput) {
    for item in &output.failed {
        let id = if item.identifier.is_empty() {
            "<no identifier>"
        } else {
            item.identifier.as_str()
        };
        println!("   ❌ BAD: {} ({})", id, item.reason);
    }

    println!("▶ Found {} duplicate pair(s)", output.duplicates.pair_count());
    for (kept, matches) in &output.duplicates.clusters {
        println!("   🏆 Keeping → {}", kept);
        for m in matches {
            println!("   🗑️  Removing {} (similarity {:.4})", m.identifier, m.similarity);
        }
    }

    println!(
        "▶ {} definition(s) kept, {} failed, {} duplicate(s) removed",
        output.manifest.len(),
        output.failed.len(),
        output.duplicates.discarded.len()
    );
}

/// Write to a sibling temp file, then rename over the destination.
fn write_atomically(destination: &Path, bytes: &[u8]) -> Result<()> {
    let temp = destination.with_extension("zip.tmp");
    fs::write(&temp, bytes).with_context(|| format!("Failed to write {:?}", temp))?;
    fs::rename(&temp, destination)
        .with_context(|| format!("Failed to move {:?} → {:?}", temp, destination))?;
    Ok(())
}

fn prune_definitions(store: &DefinitionStore, output: &GalleryOutput) -> Result<()> {
    let mut removed = 0;
    for identifier in output.discarded_identifiers() {
        if let Some(path) = store.path_of(&identifier) {
            fs::remove_file(path).with_context(|| format!("Failed to delete {}", path.display()))?;
            println!("   🗑️  Deleted {}", path.display());
            removed += 1;
        }
    }
    println!("🧹 Pruned {} definition file(s)", removed);
    Ok(())
}
