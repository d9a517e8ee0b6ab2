//! One memoised command run: fingerprint inputs, restore or execute, store
//!
//! The run is a fixed pipeline:
//!
//! ```text
//! DISCOVER_INPUTS -> FINGERPRINT -> LOOKUP -+-> hit:  EXTRACT
//!                                           +-> miss: EXECUTE -> DISCOVER_OUTPUTS -> PACKAGE -> STORE
//! ```
//!
//! LOOKUP consults providers in order and stops at the first hit. A provider
//! that fails validation or errors during LOOKUP is logged and skipped. STORE
//! writes to the first provider only, and any failure there ends the run.

use crate::archive;
use crate::fingerprint::Fingerprint;
use crate::matcher::{self, FileSet};
use crate::output::{NullSink, OutputSink};
use crate::provider::{CacheProvider, EntryReader, Provider};
use crate::runner::{self, CommandOutput};
use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// What to run and which files matter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    /// Directory patterns are matched against and the command runs in
    pub working_dir: PathBuf,
    /// Glob patterns selecting the files that determine the key
    pub inputs: Vec<String>,
    /// Glob patterns removed from input discovery
    pub ignore: Vec<String>,
    /// Shell command producing the outputs; also mixed into the key
    pub command: String,
    /// Glob patterns selecting the files to cache after the command runs
    pub outputs: Vec<String>,
    /// Also treat `outputs` as ignore patterns during input discovery
    pub exclude_outputs: bool,
}

impl RunConfig {
    fn input_ignores(&self) -> Vec<String> {
        let mut ignore = self.ignore.clone();
        if self.exclude_outputs {
            ignore.extend(self.outputs.iter().cloned());
        }
        ignore
    }
}

/// Steps of a run, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Match input patterns
    DiscoverInputs,
    /// Hash the inputs and command
    Fingerprint,
    /// Ask providers for the key
    Lookup,
    /// Unpack a cached entry
    Extract,
    /// Run the command
    Execute,
    /// Match output patterns
    DiscoverOutputs,
    /// Start the archive stream
    Package,
    /// Write the archive to the first provider
    Store,
}

impl Stage {
    /// Stable lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DiscoverInputs => "discover_inputs",
            Self::Fingerprint => "fingerprint",
            Self::Lookup => "lookup",
            Self::Extract => "extract",
            Self::Execute => "execute",
            Self::DiscoverOutputs => "discover_outputs",
            Self::Package => "package",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall time spent in each stage that ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageTimings(Vec<(Stage, Duration)>);

impl StageTimings {
    fn record(&mut self, stage: Stage, elapsed: Duration) {
        tracing::debug!(stage = stage.as_str(), elapsed_ms = elapsed.as_secs_f64() * 1000.0, "Stage finished");
        self.0.push((stage, elapsed));
    }

    /// Time spent in `stage`, if it ran.
    #[must_use]
    pub fn get(&self, stage: Stage) -> Option<Duration> {
        self.0.iter().find(|(s, _)| *s == stage).map(|(_, d)| *d)
    }

    /// Stages in the order they ran.
    pub fn iter(&self) -> impl Iterator<Item = (Stage, Duration)> + '_ {
        self.0.iter().copied()
    }

    /// Sum over all stages.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.0.iter().map(|(_, d)| *d).sum()
    }
}

/// How a run produced its outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Outputs were restored from a cache entry
    Restored {
        /// URI of the provider that had the entry
        provider: String,
        /// Files written into the working directory
        files: Vec<PathBuf>,
    },
    /// The command ran and its outputs were stored
    Executed {
        /// URI of the provider the entry was written to
        provider: String,
        /// Output files archived
        files: Vec<PathBuf>,
        /// Size of the stored entry
        bytes_stored: u64,
        /// Exit code and duration of the command
        command: CommandOutput,
    },
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Cache key of the inputs and command
    pub key: Fingerprint,
    /// Number of input files hashed
    pub input_files: usize,
    /// Hit or miss details
    pub outcome: Outcome,
    /// Per-stage wall time
    pub timings: StageTimings,
}

impl RunReport {
    /// Whether the outputs came from the cache.
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        matches!(self.outcome, Outcome::Restored { .. })
    }
}

/// An entry found during lookup.
pub struct CacheHit {
    /// Position of the provider in the configured list
    pub index: usize,
    /// URI of the provider
    pub provider: String,
    /// The entry stream
    pub entry: EntryReader,
}

impl fmt::Debug for CacheHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHit")
            .field("index", &self.index)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// Where an entry was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReceipt {
    /// URI of the provider
    pub provider: String,
    /// Bytes written
    pub bytes: u64,
}

/// Drives runs against an ordered list of providers.
///
/// The first provider is the only one written to; all of them are read.
pub struct Orchestrator<P = Provider> {
    providers: Vec<P>,
    sink: Arc<dyn OutputSink>,
}

impl<P: fmt::Debug> fmt::Debug for Orchestrator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl<P: CacheProvider> Orchestrator<P> {
    /// Create an orchestrator that discards command output.
    #[must_use]
    pub fn new(providers: Vec<P>) -> Self {
        Self {
            providers,
            sink: Arc::new(NullSink),
        }
    }

    /// Send command output to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Configured providers, in priority order.
    #[must_use]
    pub fn providers(&self) -> &[P] {
        &self.providers
    }

    /// Execute one run.
    pub async fn run(&self, config: &RunConfig) -> Result<RunReport> {
        if self.providers.is_empty() {
            return Err(Error::configuration("no cache providers configured"));
        }
        let mut timings = StageTimings::default();

        let started = Instant::now();
        let inputs = tracing::info_span!("discover_inputs").in_scope(|| discover_inputs(config))?;
        timings.record(Stage::DiscoverInputs, started.elapsed());

        let started = Instant::now();
        let key = tracing::info_span!("fingerprint", files = inputs.len())
            .in_scope(|| Fingerprint::compute(&inputs, &config.command))?;
        timings.record(Stage::Fingerprint, started.elapsed());
        tracing::info!(%key, files = inputs.len(), "Computed cache key");

        let started = Instant::now();
        let hit = self
            .lookup(&key)
            .instrument(tracing::info_span!("lookup", %key))
            .await;
        timings.record(Stage::Lookup, started.elapsed());

        if let Some(hit) = hit {
            let started = Instant::now();
            let files = archive::unpack(hit.entry, &config.working_dir)
                .instrument(tracing::info_span!("extract", provider = %hit.provider))
                .await?;
            timings.record(Stage::Extract, started.elapsed());
            tracing::info!(%key, provider = %hit.provider, files = files.len(), "Restored outputs from cache");

            return Ok(RunReport {
                key,
                input_files: inputs.len(),
                outcome: Outcome::Restored {
                    provider: hit.provider,
                    files,
                },
                timings,
            });
        }

        let started = Instant::now();
        let command = runner::run_command(&config.command, &config.working_dir, Arc::clone(&self.sink))
            .instrument(tracing::info_span!("execute"))
            .await?;
        timings.record(Stage::Execute, started.elapsed());

        let started = Instant::now();
        let outputs = tracing::info_span!("discover_outputs").in_scope(|| discover_outputs(config))?;
        timings.record(Stage::DiscoverOutputs, started.elapsed());

        let started = Instant::now();
        let entry = tracing::info_span!("package", files = outputs.len())
            .in_scope(|| archive::pack(&outputs, &config.working_dir));
        timings.record(Stage::Package, started.elapsed());

        let started = Instant::now();
        let receipt = self
            .put(&key, entry)
            .instrument(tracing::info_span!("store", %key))
            .await?;
        timings.record(Stage::Store, started.elapsed());
        tracing::info!(
            %key,
            provider = %receipt.provider,
            files = outputs.len(),
            bytes = receipt.bytes,
            "Stored outputs in cache"
        );

        Ok(RunReport {
            key,
            input_files: inputs.len(),
            outcome: Outcome::Executed {
                provider: receipt.provider,
                files: outputs.paths().to_vec(),
                bytes_stored: receipt.bytes,
                command,
            },
            timings,
        })
    }

    /// Discover inputs and fingerprint them with the command as tag.
    pub fn compute_key(&self, config: &RunConfig) -> Result<(FileSet, Fingerprint)> {
        let inputs = discover_inputs(config)?;
        let key = Fingerprint::compute(&inputs, &config.command)?;
        Ok((inputs, key))
    }

    /// Ask each provider for `key` in order, returning the first hit.
    ///
    /// Providers that fail validation or report an error are skipped.
    pub async fn lookup(&self, key: &Fingerprint) -> Option<CacheHit> {
        for (index, provider) in self.providers.iter().enumerate() {
            let uri = provider.uri();
            if let Err(error) = provider.validate() {
                tracing::warn!(provider = uri, %error, "Skipping invalid cache provider");
                continue;
            }
            match provider.get_entry(key).await {
                Ok(Some(entry)) => {
                    tracing::info!(provider = uri, name = provider.friendly_name(), %key, "Cache hit");
                    return Some(CacheHit {
                        index,
                        provider: uri.to_string(),
                        entry,
                    });
                }
                Ok(None) => tracing::debug!(provider = uri, %key, "Cache miss"),
                Err(error) => {
                    tracing::warn!(provider = uri, %error, "Skipping cache provider after lookup error");
                }
            }
        }
        tracing::info!(%key, providers = self.providers.len(), "Cache miss on all providers");
        None
    }

    /// Archive `files` relative to `base_dir` and write them under `key` to
    /// the first provider.
    pub async fn store(&self, key: &Fingerprint, files: &FileSet, base_dir: &Path) -> Result<StoreReceipt> {
        self.put(key, archive::pack(files, base_dir)).await
    }

    async fn put(&self, key: &Fingerprint, entry: EntryReader) -> Result<StoreReceipt> {
        let provider = self
            .providers
            .first()
            .ok_or_else(|| Error::configuration("no cache providers configured"))?;
        provider.validate()?;
        let bytes = provider.put_entry(key, entry).await?;
        Ok(StoreReceipt {
            provider: provider.uri().to_string(),
            bytes,
        })
    }
}

fn discover_inputs(config: &RunConfig) -> Result<FileSet> {
    let files = matcher::find(&config.inputs, &config.input_ignores(), &config.working_dir)?;
    if files.is_empty() {
        return Err(Error::NoInputFiles {
            patterns: config.inputs.clone(),
        });
    }
    Ok(files)
}

fn discover_outputs(config: &RunConfig) -> Result<FileSet> {
    let files = matcher::find(&config.outputs, &[], &config.working_dir)?;
    if files.is_empty() {
        return Err(Error::NoOutputFiles {
            patterns: config.outputs.clone(),
        });
    }
    Ok(files)
}
