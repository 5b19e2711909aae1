use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::time::timeout;
use url::Url;

use crate::config::ResolverConfig;

/// Playlist bodies beyond this are suspicious and not worth scanning.
const MAX_PLAYLIST_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("stream unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaylistKind {
    M3u,
    Pls,
}

/// Resolves a configured station URL to a directly-openable audio URL,
/// unwrapping playlist containers with a bounded number of hops. A failed
/// resolution is reported once; retry policy lives with the caller.
#[derive(Clone)]
pub struct StreamResolver {
    config: ResolverConfig,
    client: Client,
}

impl StreamResolver {
    pub fn new(config: ResolverConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub async fn resolve(&self, configured_url: &str) -> Result<String, ResolveError> {
        let mut current = configured_url.trim().to_string();
        if current.is_empty() {
            return Err(ResolveError::Unreachable("empty-url".into()));
        }

        for _ in 0..self.config.max_hops {
            let Some(kind) = playlist_kind_from_url(&current) else {
                return Ok(current);
            };

            let body = self.fetch_playlist(&current).await?;
            let entry = first_playlist_entry(&body, kind)
                .ok_or_else(|| ResolveError::Unreachable("empty-playlist".into()))?;
            current = join_entry(&current, &entry)
                .ok_or_else(|| ResolveError::Unreachable("bad-playlist-entry".into()))?;
        }

        // Still a playlist after the hop budget: redirect bomb or cycle.
        if playlist_kind_from_url(&current).is_some() {
            return Err(ResolveError::Unreachable("playlist-hop-limit".into()));
        }
        Ok(current)
    }

    async fn fetch_playlist(&self, url: &str) -> Result<String, ResolveError> {
        let request = self.client.get(url);
        let response = timeout(Duration::from_millis(self.config.timeout_ms), request.send())
            .await
            .map_err(|_| ResolveError::Unreachable("timeout".into()))?
            .map_err(|_| ResolveError::Unreachable("network".into()))?;

        if !response.status().is_success() {
            return Err(ResolveError::Unreachable(format!(
                "status-{}",
                response.status().as_u16()
            )));
        }

        let body = timeout(Duration::from_millis(self.config.timeout_ms), response.text())
            .await
            .map_err(|_| ResolveError::Unreachable("timeout".into()))?
            .map_err(|_| ResolveError::Unreachable("network".into()))?;

        let mut body = body;
        if body.len() > MAX_PLAYLIST_BYTES {
            body.truncate(MAX_PLAYLIST_BYTES);
        }
        Ok(body)
    }
}

fn playlist_kind_from_url(url: &str) -> Option<PlaylistKind> {
    let path = Url::parse(url)
        .map(|parsed| parsed.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    if path.ends_with(".pls") {
        Some(PlaylistKind::Pls)
    } else if path.ends_with(".m3u") || path.ends_with(".m3u8") {
        Some(PlaylistKind::M3u)
    } else {
        None
    }
}

fn first_playlist_entry(body: &str, kind: PlaylistKind) -> Option<String> {
    // Extension said one thing; trust the body when it disagrees.
    let kind = match body.trim_start() {
        b if b.starts_with("[playlist]") => PlaylistKind::Pls,
        b if b.starts_with("#EXTM3U") => PlaylistKind::M3u,
        _ => kind,
    };

    match kind {
        PlaylistKind::M3u => body
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string),
        PlaylistKind::Pls => body
            .lines()
            .map(str::trim)
            .filter(|line| line.to_ascii_lowercase().starts_with("file"))
            .filter_map(|line| line.split_once('=').map(|(_, value)| value.trim()))
            .find(|value| !value.is_empty())
            .map(str::to_string),
    }
}

fn join_entry(base: &str, entry: &str) -> Option<String> {
    if entry.contains("://") {
        return Some(entry.to_string());
    }
    Url::parse(base)
        .ok()?
        .join(entry)
        .ok()
        .map(|joined| joined.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_audio_urls_are_not_playlists() {
        assert_eq!(playlist_kind_from_url("https://s.example.com/stream"), None);
        assert_eq!(playlist_kind_from_url("https://s.example.com/live.mp3"), None);
    }

    #[test]
    fn playlist_kind_by_extension_ignores_query() {
        assert_eq!(
            playlist_kind_from_url("https://s.example.com/live.pls?sid=1"),
            Some(PlaylistKind::Pls)
        );
        assert_eq!(
            playlist_kind_from_url("https://s.example.com/hi.m3u8"),
            Some(PlaylistKind::M3u)
        );
    }

    #[test]
    fn m3u_first_entry_skips_directives() {
        let body = "#EXTM3U\n#EXTINF:-1,Radio\nhttps://ice.example.com/a\nhttps://ice.example.com/b\n";
        assert_eq!(
            first_playlist_entry(body, PlaylistKind::M3u).as_deref(),
            Some("https://ice.example.com/a")
        );
    }

    #[test]
    fn pls_first_file_entry_wins() {
        let body = "[playlist]\nNumberOfEntries=2\nFile1=https://ice.example.com/a\nTitle1=A\nFile2=https://ice.example.com/b\n";
        assert_eq!(
            first_playlist_entry(body, PlaylistKind::Pls).as_deref(),
            Some("https://ice.example.com/a")
        );
    }

    #[test]
    fn body_sniffing_overrides_wrong_extension() {
        let body = "[playlist]\nFile1=https://ice.example.com/a\n";
        assert_eq!(
            first_playlist_entry(body, PlaylistKind::M3u).as_deref(),
            Some("https://ice.example.com/a")
        );
    }

    #[test]
    fn empty_playlist_has_no_entry() {
        assert_eq!(first_playlist_entry("#EXTM3U\n# nothing\n", PlaylistKind::M3u), None);
        assert_eq!(first_playlist_entry("[playlist]\nNumberOfEntries=0\n", PlaylistKind::Pls), None);
    }

    #[test]
    fn relative_entries_join_against_the_playlist_url() {
        assert_eq!(
            join_entry("https://s.example.com/dir/live.m3u", "low/stream.mp3").as_deref(),
            Some("https://s.example.com/dir/low/stream.mp3")
        );
        assert_eq!(
            join_entry("https://s.example.com/live.m3u", "https://other.example.com/a").as_deref(),
            Some("https://other.example.com/a")
        );
    }
}
