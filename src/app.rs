//! Wires stores, capabilities, the orchestrator and the submission handler
//! together from [`Settings`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::ReportCache;
use crate::cache::memory::MemoryReportCache;
use crate::cache::sqlite::SqliteReportCache;
use crate::capability::anthropic::{AnthropicAnalyzer, AnthropicClient, AnthropicExtractor};
use crate::capability::{Capability, TextExtractor};
use crate::config::{CacheBackend, Settings};
use crate::consts::{API_KEY_ENV, STAGE_ARGUMENTATIVE, STAGE_LINGUISTIC};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::prompts::{self, ARGUMENTATIVE_FILE, LINGUISTICS_FILE};
use crate::status::memory::InMemoryStatusStore;
use crate::submission::SubmissionHandler;

/// Shortest interval between two sweeps of expired runs.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Capabilities the pipeline runs with.
pub struct Capabilities {
    pub extractor: Arc<dyn TextExtractor>,
    pub linguistic: Arc<dyn Capability>,
    pub argumentative: Arc<dyn Capability>,
}

impl Capabilities {
    /// Anthropic-backed capabilities with instruction templates from
    /// `settings.instructions_dir`.
    pub fn anthropic(settings: &Settings) -> Result<Self> {
        let Some(api_key) = settings.api_key.clone() else {
            bail!("no Anthropic credentials found. Set {API_KEY_ENV}.");
        };
        let client = AnthropicClient::new(Some(settings.model.clone()), api_key);
        let dir = Some(settings.instructions_dir.as_path());

        Ok(Self {
            extractor: Arc::new(AnthropicExtractor::new(client.clone())),
            linguistic: Arc::new(AnthropicAnalyzer::new(
                STAGE_LINGUISTIC,
                client.clone(),
                prompts::load_instruction(dir, LINGUISTICS_FILE)?,
            )),
            argumentative: Arc::new(AnthropicAnalyzer::new(
                STAGE_ARGUMENTATIVE,
                client,
                prompts::load_instruction(dir, ARGUMENTATIVE_FILE)?,
            )),
        })
    }
}

pub struct App {
    pub status: Arc<InMemoryStatusStore>,
    pub cache: Arc<dyn ReportCache>,
    pub submissions: Arc<SubmissionHandler>,
    shutdown: CancellationToken,
}

impl App {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::assemble(settings, Capabilities::anthropic(settings)?)
    }

    /// Build the pipeline around the given capabilities.
    pub fn assemble(settings: &Settings, capabilities: Capabilities) -> Result<Self> {
        let status = Arc::new(match settings.status_ttl {
            Some(ttl) => InMemoryStatusStore::with_ttl(ttl),
            None => InMemoryStatusStore::new(),
        });
        let cache = build_cache(settings)?;
        let shutdown = CancellationToken::new();

        let orchestrator = Arc::new(Orchestrator::new(
            status.clone(),
            cache.clone(),
            capabilities.linguistic,
            capabilities.argumentative,
            OrchestratorConfig {
                capability_timeout: settings.capability_timeout,
            },
        ));
        let submissions = Arc::new(
            SubmissionHandler::new(status.clone(), cache.clone(), capabilities.extractor, orchestrator)
                .with_shutdown(shutdown.clone()),
        );

        Ok(Self {
            status,
            cache,
            submissions,
            shutdown,
        })
    }

    /// Periodically drop expired runs until shutdown. `None` when runs never expire.
    pub fn spawn_status_sweeper(&self) -> Option<JoinHandle<()>> {
        let ttl = self.status.ttl()?;
        let interval = (ttl / 2).max(MIN_SWEEP_INTERVAL);
        let status = Arc::clone(&self.status);
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        status.purge_expired();
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        }))
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel in-flight runs and background tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn build_cache(settings: &Settings) -> Result<Arc<dyn ReportCache>> {
    Ok(match settings.cache_backend {
        CacheBackend::Memory => Arc::new(match settings.cache_capacity {
            Some(capacity) => MemoryReportCache::bounded(capacity),
            None => MemoryReportCache::unbounded(),
        }),
        CacheBackend::Sqlite => {
            let path = settings.cache_db.to_string_lossy();
            Arc::new(
                SqliteReportCache::open(&path)
                    .with_context(|| format!("failed to open report cache at {path}"))?,
            )
        }
    })
}
