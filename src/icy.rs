use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::time::{timeout, Instant};

use crate::config::MetadataConfig;

/// Metadata intervals above this are treated as garbage headers.
const MAX_METAINT: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum MetadataError {
    /// The stream is reachable but carries no embedded metadata. The station
    /// structurally cannot use this method; do not retry.
    #[error("stream carries no embedded metadata")]
    NoMetadata,
    #[error("stream unreachable: {0}")]
    Unreachable(String),
}

enum AttemptError {
    NoMetadata,
    Transient(String),
}

/// Reads the first embedded metadata block from an ICY stream. Each attempt
/// is a fresh connection; the response (and its socket) is dropped on every
/// exit path, including timeout.
#[derive(Clone)]
pub struct IcyMetadataReader {
    config: MetadataConfig,
    client: Client,
}

impl IcyMetadataReader {
    pub fn new(config: MetadataConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// `Ok(None)` means the stream answered with an empty or malformed
    /// metadata block right now, which is a valid outcome, not an error.
    pub async fn read_title(&self, stream_url: &str) -> Result<Option<String>, MetadataError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        let mut last_error = String::from("connect");

        for _ in 0..self.config.max_attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(MetadataError::Unreachable("timeout".into()));
            }

            match timeout(remaining, self.attempt(stream_url)).await {
                Ok(Ok(title)) => return Ok(title),
                Ok(Err(AttemptError::NoMetadata)) => return Err(MetadataError::NoMetadata),
                Ok(Err(AttemptError::Transient(reason))) => {
                    last_error = reason;
                }
                Err(_) => return Err(MetadataError::Unreachable("timeout".into())),
            }
        }

        Err(MetadataError::Unreachable(last_error))
    }

    async fn attempt(&self, stream_url: &str) -> Result<Option<String>, AttemptError> {
        let response = self
            .client
            .get(stream_url)
            .header("Icy-MetaData", "1")
            .send()
            .await
            .map_err(|_| AttemptError::Transient("network".into()))?;

        if !response.status().is_success() {
            return Err(AttemptError::Transient(format!(
                "status-{}",
                response.status().as_u16()
            )));
        }

        let interval = response
            .headers()
            .get("icy-metaint")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<usize>().ok())
            .ok_or(AttemptError::NoMetadata)?;
        if interval == 0 || interval > MAX_METAINT {
            return Err(AttemptError::NoMetadata);
        }

        let mut scanner = BlockScanner::new(interval);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|_| AttemptError::Transient("network".into()))?;
            if let Some(block) = scanner.push(&chunk) {
                return Ok(extract_stream_title(&block));
            }
        }

        Err(AttemptError::Transient("stream-ended".into()))
    }
}

enum ScanState {
    /// Bytes of audio still to discard before the length byte.
    Audio(usize),
    /// Metadata block in flight: expected length and bytes collected so far.
    Meta(usize, Vec<u8>),
}

/// Incremental scanner over the ICY byte layout:
/// `[N bytes audio][1 length byte L][L x 16 bytes metadata]`.
/// Pure byte-pushing state machine, no I/O.
pub struct BlockScanner {
    interval: usize,
    state: ScanState,
}

impl BlockScanner {
    pub fn new(interval: usize) -> Self {
        Self {
            interval,
            state: ScanState::Audio(interval),
        }
    }

    /// Feeds a chunk; returns the first completed metadata block, if any.
    /// An empty vec is the L = 0 "no metadata at this block" case.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        let mut rest = chunk;
        while !rest.is_empty() {
            match &mut self.state {
                ScanState::Audio(remaining) => {
                    if *remaining > 0 {
                        let skip = (*remaining).min(rest.len());
                        *remaining -= skip;
                        rest = &rest[skip..];
                        if rest.is_empty() {
                            return None;
                        }
                    }
                    let length = rest[0] as usize * 16;
                    rest = &rest[1..];
                    if length == 0 {
                        self.state = ScanState::Audio(self.interval);
                        return Some(Vec::new());
                    }
                    self.state = ScanState::Meta(length, Vec::with_capacity(length));
                }
                ScanState::Meta(expected, buffer) => {
                    let take = (*expected - buffer.len()).min(rest.len());
                    buffer.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];
                    if buffer.len() == *expected {
                        let block = std::mem::take(buffer);
                        self.state = ScanState::Audio(self.interval);
                        return Some(block);
                    }
                }
            }
        }
        None
    }
}

/// Pulls the `StreamTitle='…';` field out of a raw metadata block by literal
/// delimiter scanning. Malformed or truncated blocks yield `None`.
pub fn extract_stream_title(block: &[u8]) -> Option<String> {
    let end = block.iter().rposition(|&b| b != 0).map(|p| p + 1)?;
    let text = String::from_utf8_lossy(&block[..end]);

    let start = text.find("StreamTitle='")? + "StreamTitle='".len();
    let close = text[start..].find("';")?;
    let title = text[start..start + close].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}
