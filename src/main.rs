use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use percen_processor::cli::Args;
use percen_processor::config_file::PipelineConfig;
use percen_processor::image_processing::{
    onnx_loader, CropStrategy, ImageTransformPipeline, PersonLocator, SourceItem, TransformResult,
};
use percen_processor::ledger::{IdleTimeout, SessionResultLedger};
use percen_processor::orchestrator::BatchOrchestrator;
use percen_processor::storage::{
    FsObjectStore, JsonLinesMetadataStore, MemoryObjectStore, ObjectStore,
};
use percen_processor::utils::{
    create_progress_bar, format_duration, generate_session_id, has_valid_extension,
    mime_type_for_path, ProcessingStats,
};
use percen_processor::JsonMessage;

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config_file {
        Some(path) => {
            let config = PipelineConfig::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => PipelineConfig::default(),
    };
    args.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Collect image files from the inputs; explicit files are always included
fn discover_images(inputs: &[PathBuf], extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut image_files = Vec::new();

    for input in inputs {
        if input.is_file() {
            image_files.push(input.clone());
            continue;
        }
        if !input.is_dir() {
            anyhow::bail!("Input path does not exist: {}", input.display());
        }

        debug!("Scanning directory: {}", input.display());
        for entry in WalkDir::new(input).follow_links(false).max_depth(10) {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();
            if path.is_file() && has_valid_extension(path, extensions) {
                image_files.push(path.to_path_buf());
            }
        }
    }

    image_files.sort();
    image_files.dedup();
    Ok(image_files)
}

fn read_source_item(path: &Path) -> Result<SourceItem> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(SourceItem::new(filename, mime_type_for_path(path), bytes))
}

fn print_result_line(result: &TransformResult) {
    match (&result.processed_name, &result.error_message) {
        (Some(name), _) if result.is_completed() => {
            println!("  {} {} -> {}", style("✓").green(), result.original_name, name)
        }
        (_, error) => println!(
            "  {} {}: {}",
            style("✗").red(),
            result.original_name,
            style(error.as_deref().unwrap_or("unknown error")).red()
        ),
    }
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let args = Args::parse();
    init_logging(args.verbose);
    let json = args.json_progress;

    if !json {
        println!("{}", style("Percen Processor - batch image reframing").bold().blue());
        println!();
    }

    let config = load_config(&args)?;
    let options = args.processing_options().map_err(anyhow::Error::msg)?;
    let session_id = args.session.clone().unwrap_or_else(generate_session_id);

    let image_files = discover_images(&args.input_paths, &args.parse_extensions())?;
    if image_files.is_empty() {
        anyhow::bail!("No image files found in the given inputs");
    }

    if !json {
        println!("  Session: {}", style(&session_id).bold());
        println!("  Images found: {}", style(image_files.len()).bold());
        if args.dry_run {
            println!("  {}", style("Dry run: nothing will be written").yellow());
        }
        println!();
    }

    let mut pipeline = ImageTransformPipeline::new(config.defaults.clone());
    if options.crop == Some(CropStrategy::Person) {
        let mut locator = PersonLocator::new(onnx_loader(&config.detection));
        if let Some(timeout) = config.detection.timeout() {
            locator = locator.with_timeout(timeout);
        }
        pipeline = pipeline.with_locator(Arc::new(locator), config.detection.min_confidence);
    }

    let store: Arc<dyn ObjectStore> = if args.dry_run {
        Arc::new(MemoryObjectStore::new())
    } else {
        fs::create_dir_all(&args.output_dir).with_context(|| {
            format!("Failed to create output directory {}", args.output_dir.display())
        })?;
        Arc::new(FsObjectStore::new(&args.output_dir, config.url_signing_secret.clone()))
    };

    let ledger = match config.session_idle_ttl() {
        Some(ttl) => SessionResultLedger::with_policy(Box::new(IdleTimeout(ttl))),
        None => SessionResultLedger::new(),
    };

    let max_files = config.max_files;
    let signed_url_ttl = config.signed_url_ttl();
    let orchestrator =
        BatchOrchestrator::new(config, Arc::new(pipeline), store, Arc::new(ledger))?;

    let total = image_files.len();
    let progress_bar = (!json).then(|| create_progress_bar(total as u64));
    let done = AtomicUsize::new(0);
    let mut results = Vec::with_capacity(total);

    // One request per max_files inputs, all recorded under the same session
    for chunk in image_files.chunks(max_files) {
        let items = chunk
            .iter()
            .map(|path| read_source_item(path))
            .collect::<Result<Vec<_>>>()?;

        let chunk_results =
            orchestrator.run_with_progress(&session_id, items, &options, |result| {
                let current = done.fetch_add(1, Ordering::Relaxed) + 1;
                match &progress_bar {
                    Some(pb) => {
                        pb.inc(1);
                        pb.set_message(result.original_name.clone());
                    }
                    None => {
                        JsonMessage::for_result(result).emit();
                        JsonMessage::progress(current, total, result.original_name.clone());
                    }
                }
            })?;
        results.extend(chunk_results);
    }

    if let Some(pb) = &progress_bar {
        pb.finish_with_message("done");
        println!();
    }

    if args.links {
        let links = orchestrator.download_links(&session_id, signed_url_ttl);
        if json {
            JsonMessage::links(&session_id, links);
        } else {
            println!("{}", style("Download links:").bold().blue());
            for link in &links {
                println!("  {}  {}", style(&link.name).bold(), link.url);
            }
            println!();
        }
    }

    let flushed = if args.dry_run {
        0
    } else {
        let metadata = JsonLinesMetadataStore::new(args.output_dir.join("metadata.jsonl"));
        orchestrator
            .flush_session(&session_id, &metadata)
            .with_context(|| format!("Failed to write {}", metadata.path().display()))?
    };

    let stats = ProcessingStats::from_results(&results);
    let elapsed = start_time.elapsed();

    if json {
        JsonMessage::summary(
            &session_id,
            stats.total,
            stats.completed,
            stats.failed,
            flushed,
            elapsed.as_secs_f64(),
        );
        return Ok(());
    }

    if args.verbose || stats.failed > 0 {
        for result in &results {
            if args.verbose || !result.is_completed() {
                print_result_line(result);
            }
        }
        println!();
    }

    let header = if args.dry_run {
        style("Dry Run Results Summary:").bold().cyan()
    } else {
        style("Results Summary:").bold().green()
    };
    println!("{}", header);
    println!("  Processed: {}", style(stats.completed).bold().green());
    if stats.failed > 0 {
        println!("  Failed: {}", style(stats.failed).bold().red());
    }
    println!("  Success rate: {:.1}%", stats.success_rate());
    if !args.dry_run {
        println!(
            "  Metadata records written: {} ({})",
            style(flushed).bold(),
            args.output_dir.join("metadata.jsonl").display()
        );
    }
    println!("  Total time: {}", style(format_duration(elapsed)).bold());

    Ok(())
}
