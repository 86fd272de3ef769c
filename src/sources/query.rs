use std::path::PathBuf;

use url::Url;

/// What a caller-supplied string turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Passed to the probe tool as-is.
    Url(String),
    /// Already carries the search prefix, e.g. `ytsearch1:lofi beats`.
    Search(String),
    /// `file:` URL; played without probing.
    Local(PathBuf),
}

impl Query {
    /// The string handed to the probe tool, if this query needs probing.
    pub fn probe_target(&self) -> Option<&str> {
        match self {
            Self::Url(target) | Self::Search(target) => Some(target),
            Self::Local(_) => None,
        }
    }
}

pub fn classify(input: &str, search_prefix: &str) -> Query {
    let input = input.trim();
    let lower = input.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Query::Url(input.to_string());
    }

    if let Ok(url) = Url::parse(input) {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .unwrap_or_else(|_| PathBuf::from(url.path()));
            return Query::Local(path);
        }
        if url.host_str().is_some_and(|host| !host.is_empty()) {
            return Query::Url(input.to_string());
        }
    }

    Query::Search(format!("{search_prefix}{input}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "ytsearch1:";

    #[test]
    fn http_urls_are_not_wrapped() {
        assert_eq!(
            classify("https://example.com/a.mp3", PREFIX),
            Query::Url("https://example.com/a.mp3".into())
        );
        assert_eq!(
            classify("  HTTP://example.com/a  ", PREFIX),
            Query::Url("HTTP://example.com/a".into())
        );
    }

    #[test]
    fn free_text_becomes_a_single_result_search() {
        assert_eq!(
            classify("lofi beats", PREFIX),
            Query::Search("ytsearch1:lofi beats".into())
        );
    }

    #[test]
    fn other_schemes_need_a_host() {
        assert_eq!(
            classify("rtmp://live.example/stream", PREFIX),
            Query::Url("rtmp://live.example/stream".into())
        );
        // Parses as scheme `artist` with no host.
        assert_eq!(
            classify("artist:song", PREFIX),
            Query::Search("ytsearch1:artist:song".into())
        );
    }

    #[cfg(unix)]
    #[test]
    fn file_urls_are_local() {
        let query = classify("file:///tmp/track.flac", PREFIX);
        assert_eq!(query, Query::Local(PathBuf::from("/tmp/track.flac")));
        assert!(query.probe_target().is_none());
    }
}
