//! Acquisition pipeline.
//!
//! Each requested mod is one unit of work: resolve → download → verify →
//! open archive → manifest → plugin headers. Units run on a bounded pool
//! (`buffered(concurrency)`), so results come back in request order no
//! matter which download finishes first. A failing unit becomes a failed
//! [`ModOutcome`]; only request validation aborts the batch.
//!
//! Every unit owns a scratch directory that is removed when the unit
//! finishes, whichever way it finishes.

mod cancel;

pub use cancel::CancelToken;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::archive::open_archive;
use crate::config::AnalysisOptions;
use crate::conflict::analyze_conflicts;
use crate::downloaders::{
    download_to, with_retry, Catalog, HttpClient, NexusCatalog, ProgressCallback,
};
use crate::error::{AcquireError, ExtractError, FailureKind, ValidationError};
use crate::games::GameType;
use crate::hash::compute_md5;
use crate::load_order::{analyze_load_order, PluginFile};
use crate::manifest::{scratch_dir, FileEntry, ManifestExtractor, ModManifest};
use crate::paths::{self, plugin_key};
use crate::plugin::HeaderDecoder;
use crate::report::{
    fingerprint, AnalysisReport, AnalysisRequest, ModFailure, ModOutcome, ModRequest, ModSource,
    ModStatus, Stage,
};

/// Progress notifications for front ends.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Started {
        index: usize,
        mod_id: String,
    },
    Download {
        index: usize,
        downloaded: u64,
        total: u64,
    },
    Finished {
        index: usize,
        mod_id: String,
        status: ModStatus,
    },
}

pub type EventCallback = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Output of reading one archive.
struct ArchiveScan {
    files: Vec<FileEntry>,
    plugins: Vec<PluginFile>,
    warnings: Vec<String>,
}

fn failure(stage: Stage, kind: FailureKind, message: impl Into<String>) -> ModFailure {
    ModFailure {
        stage,
        kind,
        message: message.into(),
    }
}

fn acquire_failure(stage: Stage, err: AcquireError) -> ModFailure {
    failure(stage, err.kind(), err.to_string())
}

fn extract_failure(err: ExtractError) -> ModFailure {
    failure(Stage::Extract, FailureKind::Extraction, err.to_string())
}

/// Bounded, cancellable batch runner.
pub struct Pipeline<C: Catalog = NexusCatalog> {
    options: AnalysisOptions,
    http: HttpClient,
    catalog: Option<Arc<C>>,
    cancel: CancelToken,
    events: Option<EventCallback>,
}

impl Pipeline<NexusCatalog> {
    /// Pipeline without a catalog; Nexus sources fail as unavailable.
    pub fn new(options: AnalysisOptions) -> anyhow::Result<Self> {
        Ok(Self {
            options,
            http: HttpClient::new()?,
            catalog: None,
            cancel: CancelToken::new(),
            events: None,
        })
    }
}

impl<C: Catalog + 'static> Pipeline<C> {
    pub fn with_catalog<D: Catalog>(self, catalog: D) -> Pipeline<D> {
        Pipeline {
            options: self.options,
            http: self.http,
            catalog: Some(Arc::new(catalog)),
            cancel: self.cancel,
            events: self.events,
        }
    }

    pub fn on_event(mut self, callback: EventCallback) -> Self {
        self.events = Some(callback);
        self
    }

    /// Token that cancels this pipeline's runs.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(callback) = &self.events {
            callback(event);
        }
    }

    /// Run a full analysis.
    ///
    /// Only validation errors are returned; everything else ends up in the
    /// affected mod's outcome.
    pub async fn run(&self, request: &AnalysisRequest) -> Result<AnalysisReport, ValidationError> {
        request.validate(self.options.concurrency)?;

        let compute_hashes = request.options.compute_hashes;
        info!(
            "Analyzing {} mods (concurrency {}, hashing {})",
            request.mods.len(),
            self.options.concurrency,
            if compute_hashes { "on" } else { "off" }
        );

        let outcomes: Vec<ModOutcome> = stream::iter(request.mods.iter().enumerate())
            .map(|(index, m)| self.process(index, m, compute_hashes))
            .buffered(self.options.concurrency)
            .collect()
            .await;

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            warn!("Analysis cancelled; reporting partial results");
        }

        let conflicts = request.options.conflicts.then(|| {
            let manifests: Vec<ModManifest> = outcomes
                .iter()
                .enumerate()
                .map(|(position, outcome)| ModManifest {
                    mod_id: outcome.mod_id.clone(),
                    mod_name: outcome.mod_name.clone(),
                    load_order: position,
                    files: outcome.files.clone(),
                })
                .collect();
            analyze_conflicts(&manifests)
        });

        let plugins = order_plugins(&outcomes, request.plugin_order.as_deref());
        let load_order = analyze_load_order(&plugins);

        let report = AnalysisReport {
            fingerprint: fingerprint(request),
            mods: outcomes,
            load_order,
            conflicts,
            cancelled,
        };

        info!(
            "Analysis done: {} ok, {} failed, {} cancelled",
            report.count(ModStatus::Ok),
            report.count(ModStatus::Failed),
            report.count(ModStatus::Cancelled)
        );
        Ok(report)
    }

    async fn process(&self, index: usize, request: &ModRequest, compute_hashes: bool) -> ModOutcome {
        if self.cancel.is_cancelled() {
            debug!("Skipping {} (cancelled)", request.mod_id);
            return ModOutcome::not_started(request);
        }

        self.emit(PipelineEvent::Started {
            index,
            mod_id: request.mod_id.clone(),
        });

        let outcome = match self.run_unit(index, request, compute_hashes).await {
            Ok(scan) => ModOutcome::ok(request, scan.files, scan.plugins, scan.warnings),
            Err(failure) => {
                warn!(
                    "{} ({}) failed during {:?}: {}",
                    request.mod_name, request.mod_id, failure.stage, failure.message
                );
                ModOutcome::failed(request, failure)
            }
        };

        self.emit(PipelineEvent::Finished {
            index,
            mod_id: request.mod_id.clone(),
            status: outcome.status,
        });
        outcome
    }

    async fn run_unit(
        &self,
        index: usize,
        request: &ModRequest,
        compute_hashes: bool,
    ) -> Result<ArchiveScan, ModFailure> {
        // Dropped (and deleted) when this unit returns or is moved into the scan
        let scratch = scratch_dir(self.options.temp_dir.as_deref())
            .map_err(|e| failure(Stage::Download, FailureKind::Io, e.to_string()))?;

        let archive_path = self.acquire(index, request, scratch.path()).await?;

        if let Some(expected) = &request.md5 {
            verify_md5(&archive_path, expected).await?;
        }

        let temp_dir = self.options.temp_dir.clone();
        let game = self.options.game;
        tokio::task::spawn_blocking(move || {
            let scan = scan_archive(&archive_path, compute_hashes, temp_dir, game, scratch.path());
            drop(scratch);
            scan
        })
        .await
        .map_err(|e| failure(Stage::Extract, FailureKind::Io, format!("worker failed: {}", e)))?
    }

    /// Get the archive onto local disk.
    async fn acquire(
        &self,
        index: usize,
        request: &ModRequest,
        scratch: &Path,
    ) -> Result<PathBuf, ModFailure> {
        let urls = match &request.source {
            ModSource::Local { path } => {
                if !path.is_file() {
                    return Err(acquire_failure(
                        Stage::Resolve,
                        AcquireError::NotFound(format!("local archive {}", path.display())),
                    ));
                }
                return Ok(path.clone());
            }
            ModSource::Url { url } => vec![url.clone()],
            ModSource::Nexus {
                game,
                mod_id,
                file_id,
            } => {
                let Some(catalog) = &self.catalog else {
                    return Err(acquire_failure(
                        Stage::Resolve,
                        AcquireError::CatalogUnavailable(format!(
                            "{} (no Nexus API key)",
                            game.nexus_domain()
                        )),
                    ));
                };
                let what = format!("resolve {}/{}", mod_id, file_id);
                with_retry(&what, self.options.retry, || {
                    catalog.resolve(*game, *mod_id, *file_id)
                })
                .await
                .map_err(|e| acquire_failure(Stage::Resolve, e))?
            }
        };

        let dest = scratch.join("download").join(archive_file_name(&request.mod_id));
        let progress = self.download_progress(index);

        let mut last_error = AcquireError::NotFound("no download URLs".to_string());
        for url in &urls {
            let result = with_retry("download", self.options.retry, || {
                download_to(
                    &self.http,
                    url,
                    &dest,
                    self.options.max_archive_bytes,
                    &self.cancel,
                    progress.as_ref(),
                )
            })
            .await;

            match result {
                Ok(size) => {
                    debug!("{}: downloaded {} bytes", request.mod_id, size);
                    return Ok(dest);
                }
                // Another mirror may still work
                Err(e) if e.is_transient() => last_error = e,
                Err(e) => return Err(acquire_failure(Stage::Download, e)),
            }
        }

        Err(acquire_failure(Stage::Download, last_error))
    }

    fn download_progress(&self, index: usize) -> Option<ProgressCallback> {
        let events = self.events.clone()?;
        Some(Box::new(move |downloaded, total, _speed| {
            events(PipelineEvent::Download {
                index,
                downloaded,
                total,
            })
        }))
    }
}

/// File name for a downloaded archive; mod ids can contain anything.
fn archive_file_name(mod_id: &str) -> String {
    let safe: String = mod_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}.archive", safe)
}

async fn verify_md5(path: &Path, expected: &str) -> Result<(), ModFailure> {
    let owned = path.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || compute_md5(&owned))
        .await
        .map_err(|e| failure(Stage::Verify, FailureKind::Io, format!("worker failed: {}", e)))?
        .map_err(|e| failure(Stage::Verify, FailureKind::Io, format!("{:#}", e)))?;

    let expected = expected.trim().to_lowercase();
    if actual != expected {
        return Err(acquire_failure(
            Stage::Verify,
            AcquireError::ChecksumMismatch { expected, actual },
        ));
    }
    Ok(())
}

/// Blocking part of a unit: manifest plus plugin headers.
fn scan_archive(
    archive_path: &Path,
    compute_hashes: bool,
    temp_dir: Option<PathBuf>,
    game: GameType,
    scratch: &Path,
) -> Result<ArchiveScan, ModFailure> {
    let archive = open_archive(archive_path).map_err(extract_failure)?;
    let items = ManifestExtractor::new(compute_hashes)
        .temp_dir(temp_dir)
        .extract(archive.as_ref())
        .map_err(extract_failure)?;

    // Plugins load from the data root only
    let plugin_items: Vec<_> = items
        .iter()
        .filter(|i| !i.entry.path.contains('/') && paths::is_plugin_file(&i.entry.path))
        .collect();

    let mut plugins = Vec::with_capacity(plugin_items.len());
    let mut warnings = Vec::new();

    if !plugin_items.is_empty() {
        let plugin_dir = scratch.join("plugins");
        let sources: Vec<String> = plugin_items.iter().map(|i| i.source.clone()).collect();
        archive
            .extract_paths(&sources, &plugin_dir)
            .map_err(extract_failure)?;

        let decoder = HeaderDecoder::new(game);
        for item in plugin_items {
            let filename = paths::file_name(&item.source).to_string();
            let Some(path) = crate::archive::safe_destination(&plugin_dir, &item.source) else {
                warnings.push(format!("{}: unsafe path in archive", filename));
                plugins.push(PluginFile::new(filename, None));
                continue;
            };
            match decoder.read_file(&path) {
                Ok(header) => plugins.push(PluginFile::new(filename, Some(header))),
                Err(e) => {
                    warn!("Could not decode {}: {}", filename, e);
                    warnings.push(format!("{}: {}", filename, e));
                    plugins.push(PluginFile::new(filename, None));
                }
            }
        }
    }

    Ok(ArchiveScan {
        files: items.into_iter().map(|i| i.entry).collect(),
        plugins,
        warnings,
    })
}

/// Arrange plugins from all successful units into a load order.
///
/// With an explicit order, listed plugins come first in that order and the
/// rest follow. Otherwise (and for the rest) plugins follow mod position,
/// then masters before non-masters, then name.
pub fn order_plugins(outcomes: &[ModOutcome], explicit: Option<&[String]>) -> Vec<PluginFile> {
    let mut plugins: Vec<(usize, &PluginFile)> = outcomes
        .iter()
        .enumerate()
        .filter(|(_, o)| o.is_ok())
        .flat_map(|(position, o)| o.plugins.iter().map(move |p| (position, p)))
        .collect();

    plugins.sort_by_key(|(position, plugin)| {
        (*position, !plugin.is_master(), plugin_key(&plugin.filename))
    });

    if let Some(order) = explicit {
        let mut rank: HashMap<String, usize> = HashMap::new();
        for (i, name) in order.iter().enumerate() {
            rank.entry(plugin_key(name)).or_insert(i);
        }
        // Stable: unlisted plugins keep their default relative order
        plugins.sort_by_key(|(_, plugin)| {
            rank.get(&plugin_key(&plugin.filename))
                .copied()
                .unwrap_or(usize::MAX)
        });
    }

    plugins.into_iter().map(|(_, p)| p.clone()).collect()
}
