use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use vision_harness::config::timeout_from_secs;
use vision_harness::fixtures::{self, Catalog, FixtureId};
use vision_harness::{Detector, HarnessConfig, HarnessError, Interrupt, Runner, VisionClient, report};

#[derive(Parser)]
#[command(name = "vision-harness")]
#[command(about = "Run object-detection test fixtures against the Cloud Vision API")]
struct Cli {
    /// Config file (default: vision-harness.toml or $VISION_HARNESS_CONFIG)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Directory containing <CATEGORY>-<NNN>.<jpg|jpeg|png> images
    #[arg(long, value_name = "DIR", global = true)]
    images: Option<PathBuf>,

    /// Directory for result records, annotated images and the summary
    #[arg(long, value_name = "DIR", global = true)]
    output: Option<PathBuf>,

    /// Fixture catalog (TOML); the built-in people catalog is used otherwise
    #[arg(long, value_name = "FILE", global = true)]
    catalog: Option<PathBuf>,

    /// Minimum confidence for a detection to count (inclusive)
    #[arg(long, value_name = "SCORE", global = true)]
    threshold: Option<f32>,

    /// Per-fixture time budget for the detection call, in seconds
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<f64>,

    /// Skip writing annotated images
    #[arg(long, global = true)]
    no_annotate: bool,

    /// Print one line per fixture and raise the log level to debug
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every fixture in the catalog
    RunAll,
    /// Run a single fixture
    RunOne {
        /// Fixture id, e.g. BVA-001
        #[arg(value_name = "ID")]
        id: String,
    },
    /// List the catalog and whether each image is present
    List,
    /// Print the raw detections for one fixture image without evaluating them
    Inspect {
        #[arg(value_name = "ID")]
        id: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_config(args: &Cli) -> anyhow::Result<HarnessConfig> {
    let mut config = HarnessConfig::load(args.config.as_deref())?
        .with_env_credentials(|name| std::env::var(name).ok());

    if let Some(dir) = &args.images {
        config.images_dir = dir.clone();
    }
    if let Some(dir) = &args.output {
        config.output_dir = dir.clone();
    }
    if let Some(path) = &args.catalog {
        config.catalog = Some(path.clone());
    }
    if let Some(threshold) = args.threshold {
        config.confidence_threshold = threshold;
    }
    if let Some(secs) = args.timeout {
        config.timeout = timeout_from_secs(secs)?;
    }
    if args.no_annotate {
        config.annotate = false;
    }

    config.validate()?;
    Ok(config)
}

fn load_catalog(config: &HarnessConfig) -> anyhow::Result<Catalog> {
    match &config.catalog {
        Some(path) => fixtures::load_catalog(path),
        None => Ok(fixtures::builtin_catalog()?),
    }
}

fn build_detector(config: &HarnessConfig) -> anyhow::Result<VisionClient> {
    if config.vision.credentials.is_empty() {
        warn!("no Vision API credentials configured; every call will fail with an authentication error");
    }
    Ok(VisionClient::new(config.vision.credentials.clone())?
        .with_endpoint(config.vision.endpoint.clone())
        .with_max_results(config.vision.max_results))
}

fn lookup<'a>(catalog: &'a Catalog, raw: &str) -> anyhow::Result<&'a fixtures::Fixture> {
    let id: FixtureId = raw
        .parse()
        .map_err(|_| HarnessError::UnknownFixture(raw.to_string()))?;
    Ok(catalog
        .get(&id)
        .ok_or_else(|| HarnessError::UnknownFixture(raw.to_string()))?)
}

fn build_runner(config: &HarnessConfig, verbose: bool) -> anyhow::Result<Runner<VisionClient>> {
    let interrupt = Interrupt::new();
    let handle = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current fixture is abandoned");
            handle.trigger();
        }
    });

    Runner::new(build_detector(config)?)
        .with_threshold(config.confidence_threshold)
        .with_timeout(config.timeout)
        .with_annotation(config.annotate)
        .with_verbose(verbose)
        .with_interrupt(interrupt)
        .with_output_dir(config.output_dir.clone())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let config = build_config(&args)?;
    let catalog = load_catalog(&config)?;

    match &args.command {
        Command::RunAll => {
            // Every image must exist before anything runs
            let resolved = fixtures::resolve_images(&config.images_dir, catalog.iter())?;
            for orphan in fixtures::orphan_images(&config.images_dir, &catalog)? {
                warn!(image = %orphan.display(), "image has no fixture in the catalog");
            }

            println!("Running {} fixtures from {}\n", resolved.len(), config.images_dir.display());

            let runner = build_runner(&config, args.verbose)?;
            let run = runner.run(&resolved).await?;

            println!("\n=== Test Results Summary ===");
            print!("{}", report::render_table(&run.results, &run.summary));
            if let Some(path) = &run.summary_path {
                println!("\nResults saved to: {}", path.display());
            }
        }
        Command::RunOne { id } => {
            let fixture = lookup(&catalog, id)?;
            let resolved = fixtures::resolve_images(&config.images_dir, [fixture])?;
            let (fixture, image_path) = &resolved[0];

            let runner = build_runner(&config, args.verbose)?;
            match runner.run_one(fixture, image_path).await? {
                Some(result) => {
                    if args.verbose {
                        for reason in &result.failure_reasons {
                            println!("  - {}", reason);
                        }
                    }
                    println!("Result: {}", result.output_files.output_json.display());
                }
                None => println!("Interrupted; no result written for {}", fixture.id),
            }
        }
        Command::List => {
            println!("{:<10} {:<8} {:<10} {:<6} {}", "Test ID", "Expected", "Tolerance", "Image", "Name");
            for fixture in catalog.iter() {
                let image = fixtures::find_image(&config.images_dir, fixture);
                println!(
                    "{:<10} {:<8} ±{:<9} {:<6} {}",
                    fixture.id.to_string(),
                    fixture.expected.count,
                    fixture.expected.tolerance,
                    if image.is_some() { "yes" } else { "no" },
                    fixture.name
                );
            }
            println!("\n{} fixtures", catalog.len());
        }
        Command::Inspect { id } => {
            let fixture = lookup(&catalog, id)?;
            let resolved = fixtures::resolve_images(&config.images_dir, [fixture])?;
            let (_, image_path) = &resolved[0];

            let detector = build_detector(&config)?;
            let bytes = tokio::fs::read(image_path).await?;
            let response = tokio::time::timeout(config.timeout, detector.detect(&bytes))
                .await
                .map_err(|_| anyhow::anyhow!("no answer within {:?}", config.timeout))??;

            println!("=== Raw detections for {} ===", fixture.id);
            println!("Image: {}", image_path.display());
            println!("Latency: {}", report::format_duration(response.latency));
            println!("Total objects detected: {}\n", response.records.len());
            for (i, record) in response.records.iter().enumerate() {
                let b = &record.bbox;
                println!(
                    "  #{:<3} {:<20} confidence: {:.4}  box: ({:.3}, {:.3}) to ({:.3}, {:.3})",
                    i + 1,
                    record.label,
                    record.confidence,
                    b.left,
                    b.top,
                    b.right,
                    b.bottom
                );
            }
        }
    }

    Ok(())
}
