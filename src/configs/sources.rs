use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_probe_program")]
    pub probe_program: String,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
    /// Prefix used to turn free text into a single-result search.
    #[serde(default = "default_search_prefix")]
    pub search_prefix: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            probe_program: default_probe_program(),
            probe_timeout_ms: default_probe_timeout_ms(),
            max_concurrent_probes: default_max_concurrent_probes(),
            search_prefix: default_search_prefix(),
        }
    }
}

fn default_probe_program() -> String {
    "yt-dlp".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    20_000
}

fn default_max_concurrent_probes() -> usize {
    3
}

fn default_search_prefix() -> String {
    "ytsearch1:".to_string()
}
