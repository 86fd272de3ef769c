//! Probe tool invocation and output parsing.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;

use crate::common::errors::{ProbeFailure, prefix_lossy};

/// How much raw output a `Malformed` failure keeps.
const RAW_PREFIX_BYTES: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct ProbeOutput {
    pub success: bool,
    pub status_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs the probe tool to completion. Dropping the returned future must
/// stop the process.
#[async_trait]
pub trait ProbeRunner: Send + Sync + 'static {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ProbeOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl ProbeRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ProbeOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(ProbeOutput {
            success: output.status.success(),
            status_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Single JSON object, no playlist expansion, best audio-only format.
pub fn probe_args(target: &str) -> Vec<String> {
    [
        "-j",
        "--no-playlist",
        "-f",
        "bestaudio/best",
        "--no-warnings",
        target,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize)]
struct ProbeInfo {
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
}

/// Metadata extracted from one probe line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedMetadata {
    pub title: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub canonical_url: String,
    /// Direct media URL, when the tool resolved one.
    pub stream_url: Option<String>,
}

/// Parses the first non-empty line of the probe tool's stdout.
pub fn parse_probe_output(stdout: &[u8]) -> Result<ProbedMetadata, ProbeFailure> {
    let text = String::from_utf8_lossy(stdout);
    let Some(line) = text.lines().map(str::trim).find(|line| !line.is_empty()) else {
        return Err(ProbeFailure::EmptyOutput);
    };

    let malformed = |reason: String| ProbeFailure::Malformed {
        prefix: prefix_lossy(stdout, RAW_PREFIX_BYTES),
        reason,
    };

    let info: ProbeInfo = serde_json::from_str(line).map_err(|e| malformed(e.to_string()))?;

    let canonical_url = info
        .webpage_url
        .clone()
        .or_else(|| info.url.clone())
        .ok_or_else(|| malformed("missing webpage_url and url".to_string()))?;

    Ok(ProbedMetadata {
        title: info.title,
        duration: info
            .duration
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64),
        thumbnail: info.thumbnail,
        canonical_url,
        stream_url: info.url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_request_one_json_line() {
        let args = probe_args("ytsearch1:lofi beats");
        assert_eq!(args.first().map(String::as_str), Some("-j"));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("ytsearch1:lofi beats"));
    }

    #[test]
    fn parses_first_line_only() {
        let stdout = concat!(
            "\n",
            r#"{"title":"Song","duration":61.5,"thumbnail":"https://i/t.jpg","webpage_url":"https://yt/w","url":"https://cdn/a"}"#,
            "\n",
            "trailing garbage\n"
        );
        let meta = parse_probe_output(stdout.as_bytes()).unwrap();

        assert_eq!(meta.title.as_deref(), Some("Song"));
        assert_eq!(meta.duration, Some(Duration::from_millis(61_500)));
        assert_eq!(meta.canonical_url, "https://yt/w");
        assert_eq!(meta.stream_url.as_deref(), Some("https://cdn/a"));
    }

    #[test]
    fn url_stands_in_for_missing_webpage_url() {
        let meta = parse_probe_output(br#"{"title":"x","url":"https://cdn/a"}"#).unwrap();
        assert_eq!(meta.canonical_url, "https://cdn/a");
        assert!(meta.duration.is_none());
    }

    #[test]
    fn empty_output_is_its_own_failure() {
        assert!(matches!(
            parse_probe_output(b"  \n\n"),
            Err(ProbeFailure::EmptyOutput)
        ));
    }

    #[test]
    fn malformed_output_keeps_a_prefix() {
        let raw = format!("ERROR: {}", "x".repeat(500));
        match parse_probe_output(raw.as_bytes()) {
            Err(ProbeFailure::Malformed { prefix, reason }) => {
                assert!(prefix.starts_with("ERROR: "));
                assert!(prefix.len() < raw.len());
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn json_without_any_url_is_malformed() {
        assert!(matches!(
            parse_probe_output(br#"{"title":"x"}"#),
            Err(ProbeFailure::Malformed { .. })
        ));
    }
}
