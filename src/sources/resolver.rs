use std::{path::Path, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{
    audio::{AudioResource, StreamShape, constants::STDERR_TAIL_BYTES},
    common::errors::{ProbeFailure, tail_lossy},
    configs::SourcesConfig,
    sources::{
        query::{Query, classify},
        ytdlp::{ProbeRunner, ProcessRunner, parse_probe_output, probe_args},
    },
};

/// A playable reference plus the metadata shown to users.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSource {
    pub title: String,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub canonical_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

impl ResolvedSource {
    /// What the decoder should open: the direct media URL when known.
    pub fn decoder_input(&self) -> &str {
        self.stream_url.as_deref().unwrap_or(&self.canonical_url)
    }

    pub fn into_resource(self, shape: StreamShape) -> AudioResource<ResolvedSource> {
        let input = self.decoder_input().to_string();
        AudioResource::new(input, shape, self)
    }

    fn local(input: &str, path: &Path) -> Self {
        let title = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            title,
            duration: None,
            thumbnail: None,
            canonical_url: input.trim().to_string(),
            stream_url: Some(path.display().to_string()),
        }
    }
}

/// Turns URLs and free-text queries into [`ResolvedSource`]s through the
/// external probe tool.
#[derive(Clone)]
pub struct SourceResolver {
    runner: Arc<dyn ProbeRunner>,
    program: String,
    timeout: Duration,
    search_prefix: String,
    permits: Arc<Semaphore>,
}

impl SourceResolver {
    pub fn new(config: &SourcesConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner))
    }

    pub fn with_runner(config: &SourcesConfig, runner: Arc<dyn ProbeRunner>) -> Self {
        Self {
            runner,
            program: config.probe_program.clone(),
            timeout: Duration::from_millis(config.probe_timeout_ms),
            search_prefix: config.search_prefix.clone(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_probes)),
        }
    }

    pub fn classify(&self, input: &str) -> Query {
        classify(input, &self.search_prefix)
    }

    pub async fn resolve(&self, input: &str) -> Result<ResolvedSource, ProbeFailure> {
        match self.classify(input) {
            Query::Local(path) => Ok(ResolvedSource::local(input, &path)),
            Query::Url(target) | Query::Search(target) => self.probe(&target).await,
        }
    }

    async fn probe(&self, target: &str) -> Result<ResolvedSource, ProbeFailure> {
        let _permit = self.permits.acquire().await.ok();
        debug!("Probing {}", target);

        let args = probe_args(target);
        let output = match tokio::time::timeout(self.timeout, self.runner.run(&self.program, &args)).await {
            Err(_) => {
                warn!("Probe of {} timed out after {:?}", target, self.timeout);
                return Err(ProbeFailure::Timeout {
                    after: self.timeout,
                });
            }
            Ok(Err(source)) => {
                return Err(ProbeFailure::Spawn {
                    program: self.program.clone(),
                    source,
                });
            }
            Ok(Ok(output)) => output,
        };

        if !output.success {
            return Err(ProbeFailure::NonZeroExit {
                code: output.status_code,
                stderr_tail: tail_lossy(&output.stderr, STDERR_TAIL_BYTES),
            });
        }

        let meta = parse_probe_output(&output.stdout)?;
        Ok(ResolvedSource {
            title: meta.title.unwrap_or_else(|| meta.canonical_url.clone()),
            duration: meta.duration,
            thumbnail: meta.thumbnail,
            canonical_url: meta.canonical_url,
            stream_url: meta.stream_url,
        })
    }
}
