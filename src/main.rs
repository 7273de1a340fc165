//! modlens - mod collection analyzer

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use modlens::archive::open_archive;
use modlens::config::{AnalysisOptions, Settings};
use modlens::conflict::analyze_conflicts;
use modlens::downloaders::NexusCatalog;
use modlens::games::GameType;
use modlens::load_order::{
    analyze_load_order, discover_plugins, parse_plugin_list, sort_masters_first, PluginFile,
};
use modlens::manifest::{ManifestExtractor, ModManifest};
use modlens::paths::plugin_key;
use modlens::pipeline::{Pipeline, PipelineEvent};
use modlens::plugin::HeaderDecoder;
use modlens::report::{AnalysisRequest, ModStatus};

#[derive(Parser)]
#[command(name = "modlens")]
#[command(version)]
#[command(about = "Mod collection analyzer - plugin dependencies, load order and file conflicts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Game whose plugin flag layout to use (defaults to settings, then Skyrim SE)
    #[arg(long, global = true)]
    game: Option<GameType>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode plugin headers
    Header {
        /// Plugin files (.esp/.esm/.esl)
        #[arg(required = true)]
        plugins: Vec<PathBuf>,
    },

    /// Check a load order for missing masters and ordering problems
    LoadOrder {
        /// Discover plugins in this directory (masters first, then by name)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// plugins.txt / loadorder.txt giving the order of plugins in --dir
        #[arg(long, requires = "dir")]
        order: Option<PathBuf>,

        /// Plugin files in load order
        plugins: Vec<PathBuf>,
    },

    /// Print the normalized file manifest of an archive
    Manifest {
        archive: PathBuf,

        /// Hash every file (xxHash64)
        #[arg(long)]
        hash: bool,
    },

    /// Report file conflicts between archives (argument order = load order)
    Conflicts {
        #[arg(required = true, num_args = 2..)]
        archives: Vec<PathBuf>,

        /// Hash files to detect identical content
        #[arg(long)]
        hash: bool,
    },

    /// Run a full analysis request (JSON)
    Analyze {
        /// Path to the request file
        request: PathBuf,

        /// Hash files to detect identical content
        #[arg(long)]
        hash: bool,

        /// Mods processed at the same time (defaults to CPU thread count)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Nexus Mods API key (required for Nexus sources)
        #[arg(long, env = "NEXUS_API_KEY", hide_env_values = true)]
        nexus_key: Option<String>,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool, format: LogFormat) -> Result<()> {
    // Only initialize logging if verbose or RUST_LOG is set
    if !verbose && std::env::var("RUST_LOG").is_err() {
        return Ok(());
    }

    let filter = EnvFilter::from_default_env().add_directive(if verbose {
        "modlens=debug".parse()?
    } else {
        "modlens=warn".parse()?
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Decode each file; undecodable plugins stay in the list without a header.
fn load_plugins(decoder: &HeaderDecoder, paths: &[PathBuf]) -> Vec<PluginFile> {
    paths
        .iter()
        .map(|path| {
            let name = display_name(path);
            match decoder.read_file(path) {
                Ok(header) => PluginFile::new(name, Some(header)),
                Err(e) => {
                    eprintln!("Warning: {}: {}", path.display(), e);
                    PluginFile::new(name, None)
                }
            }
        })
        .collect()
}

/// Plugins in `dir`, ordered by `order` if given (unlisted ones appended
/// masters-first), else masters-first.
fn plugins_in_dir(dir: &Path, order: Option<&Path>) -> Result<Vec<PathBuf>> {
    let found = discover_plugins(dir)?;
    let mut by_key: HashMap<String, PathBuf> = found
        .into_iter()
        .map(|path| (plugin_key(&display_name(&path)), path))
        .collect();

    let mut ordered = Vec::new();
    if let Some(order) = order {
        let content = std::fs::read_to_string(order)
            .with_context(|| format!("Failed to read {}", order.display()))?;
        for name in parse_plugin_list(&content, true) {
            match by_key.remove(&plugin_key(&name)) {
                Some(path) => ordered.push(path),
                None => eprintln!("Warning: {} is listed but not in {}", name, dir.display()),
            }
        }
    }

    let mut rest: Vec<String> = by_key.values().map(|p| display_name(p)).collect();
    sort_masters_first(&mut rest);
    for name in rest {
        if let Some(path) = by_key.remove(&plugin_key(&name)) {
            ordered.push(path);
        }
    }
    Ok(ordered)
}

fn build_manifest(archive: &Path, hash: bool, options: &AnalysisOptions) -> Result<ModManifest> {
    let name = display_name(archive);
    let opened =
        open_archive(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let items = ManifestExtractor::new(hash)
        .temp_dir(options.temp_dir.clone())
        .extract(opened.as_ref())
        .with_context(|| format!("Failed to read {}", archive.display()))?;
    Ok(ModManifest::new(name.clone(), name, 0)
        .with_files(items.into_iter().map(|i| i.entry).collect()))
}

fn progress_bar(total: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} | {msg}")?
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

async fn run_analysis(
    request_path: &Path,
    mut options: AnalysisOptions,
    nexus_key: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let content = std::fs::read_to_string(request_path)
        .with_context(|| format!("Failed to read {}", request_path.display()))?;
    let mut request: AnalysisRequest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", request_path.display()))?;
    request.options.compute_hashes |= options.compute_hashes;
    options.compute_hashes = request.options.compute_hashes;

    let mut pipeline = Pipeline::new(options)?;
    match nexus_key.filter(|k| !k.trim().is_empty()) {
        Some(key) => pipeline = pipeline.with_catalog(NexusCatalog::new(&key)?),
        None => info!("No Nexus API key; Nexus sources will be reported as unavailable"),
    }

    let pb = progress_bar(request.mods.len())?;
    let bar = pb.clone();
    let pipeline = pipeline.on_event(Arc::new(move |event: PipelineEvent| match event {
        PipelineEvent::Started { mod_id, .. } => bar.set_message(mod_id),
        PipelineEvent::Download { .. } => {}
        PipelineEvent::Finished { mod_id, status, .. } => {
            if status != ModStatus::Ok {
                bar.println(format!("{}: {:?}", mod_id, status));
            }
            bar.inc(1);
        }
    }));

    let token = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing with partial results");
            token.cancel();
        }
    });

    let report = pipeline.run(&request).await?;
    pb.finish_and_clear();

    let json = serde_json::to_string_pretty(&report)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    eprintln!(
        "{} ok, {} failed, {} cancelled",
        report.count(ModStatus::Ok),
        report.count(ModStatus::Failed),
        report.count(ModStatus::Cancelled)
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format)?;

    let settings = Settings::load();
    let mut options = AnalysisOptions::from_settings(&settings);
    if let Some(game) = cli.game {
        options.game = game;
    }
    let decoder = HeaderDecoder::new(options.game);

    match cli.command {
        Commands::Header { plugins } => {
            let mut headers = Vec::new();
            let mut failed = 0;
            for path in &plugins {
                match decoder.read_file(path) {
                    Ok(header) => headers.push(header),
                    Err(e) => {
                        eprintln!("{}: {}", path.display(), e);
                        failed += 1;
                    }
                }
            }
            print_json(&headers)?;
            if failed > 0 {
                bail!("{} of {} plugins could not be decoded", failed, plugins.len());
            }
        }

        Commands::LoadOrder {
            dir,
            order,
            plugins,
        } => {
            let mut paths = match &dir {
                Some(dir) => plugins_in_dir(dir, order.as_deref())?,
                None => Vec::new(),
            };
            paths.extend(plugins);
            if paths.is_empty() {
                bail!("No plugins given (pass plugin files or --dir)");
            }

            let report = analyze_load_order(&load_plugins(&decoder, &paths));
            print_json(&report)?;
        }

        Commands::Manifest { archive, hash } => {
            options.validate()?;
            let manifest = build_manifest(&archive, hash || options.compute_hashes, &options)?;
            print_json(&manifest.files)?;
            eprintln!(
                "{} files, {} bytes",
                manifest.file_count(),
                manifest.total_size()
            );
        }

        Commands::Conflicts { archives, hash } => {
            options.validate()?;
            let hash = hash || options.compute_hashes;
            let manifests: Vec<ModManifest> = archives
                .iter()
                .enumerate()
                .map(|(position, archive)| {
                    let manifest = match build_manifest(archive, hash, &options) {
                        Ok(manifest) => manifest,
                        Err(e) => {
                            eprintln!("Warning: {:#}", e);
                            let name = display_name(archive);
                            ModManifest::new(name.clone(), name, 0)
                        }
                    };
                    ModManifest {
                        load_order: position,
                        ..manifest
                    }
                })
                .collect();

            print_json(&analyze_conflicts(&manifests))?;
        }

        Commands::Analyze {
            request,
            hash,
            concurrency,
            nexus_key,
            output,
        } => {
            if let Some(n) = concurrency {
                options.concurrency = n;
            }
            options.compute_hashes |= hash;
            options.validate()?;

            let key = nexus_key.or_else(|| {
                settings
                    .has_nexus_key()
                    .then(|| settings.nexus_api_key.clone())
            });
            run_analysis(&request, options, key, output).await?;
        }
    }

    Ok(())
}
