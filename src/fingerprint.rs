use std::io::Write;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::time::timeout;

use crate::config::FingerprintConfig;
use crate::logging::logger;

/// Rough ceiling for compressed stream bitrate; bounds the sample size.
const CAPTURE_BYTES_PER_SECOND: usize = 24_000;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("sample capture failed: {0}")]
    Capture(String),
    #[error("recognition submit failed: {0}")]
    Submit(String),
}

/// Tagged result of a recognition call. `NoMatch` is a valid negative;
/// auth/quota failures are operational and logged, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionOutcome {
    Match {
        artist: String,
        title: String,
        confidence: f64,
        genre: Option<String>,
    },
    NoMatch,
    AuthError,
    QuotaError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionTier {
    Primary,
    Secondary,
}

/// Captures a short audio sample from the resolved stream and submits it to
/// the configured recognition services, primary first.
#[derive(Clone)]
pub struct FingerprintClient {
    config: FingerprintConfig,
    client: Client,
}

impl FingerprintClient {
    pub fn new(config: FingerprintConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Runs capture + primary, falling through to the secondary service on
    /// auth failure, quota exhaustion, or no-match. The temp sample file is
    /// removed when this returns, on every path.
    pub async fn recognize(
        &self,
        stream_url: &str,
    ) -> Result<(RecognitionOutcome, RecognitionTier), FingerprintError> {
        let sample = self.capture_sample(stream_url).await?;
        let encoded = STANDARD.encode(&sample.bytes);

        let primary = self
            .submit(
                &self.config.primary_url,
                self.config.primary_token.as_deref(),
                &encoded,
            )
            .await?;
        if let RecognitionOutcome::Match { .. } = primary {
            return Ok((primary, RecognitionTier::Primary));
        }

        let Some(secondary_url) = self.config.secondary_url.as_deref() else {
            return Ok((primary, RecognitionTier::Primary));
        };
        logger().debug(
            "fingerprint.secondary_attempt",
            json!({ "primaryOutcome": outcome_label(&primary) }),
        );
        let secondary = self
            .submit(secondary_url, self.config.secondary_token.as_deref(), &encoded)
            .await?;
        Ok((secondary, RecognitionTier::Secondary))
    }

    async fn capture_sample(&self, stream_url: &str) -> Result<CapturedSample, FingerprintError> {
        let target_bytes = self.config.sample_seconds as usize * CAPTURE_BYTES_PER_SECOND;
        let budget = Duration::from_millis(self.config.capture_timeout_ms);

        // Scoped resource: the file is unlinked when `CapturedSample` drops,
        // whether recognition succeeds, fails, or the pipeline is cancelled.
        let mut file = NamedTempFile::new()
            .map_err(|err| FingerprintError::Capture(format!("tempfile: {err}")))?;

        let capture = async {
            let response = self
                .client
                .get(stream_url)
                .send()
                .await
                .map_err(|_| FingerprintError::Capture("network".into()))?;
            if !response.status().is_success() {
                return Err(FingerprintError::Capture(format!(
                    "status-{}",
                    response.status().as_u16()
                )));
            }

            let mut bytes = Vec::with_capacity(target_bytes);
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|_| FingerprintError::Capture("network".into()))?;
                bytes.extend_from_slice(&chunk);
                if bytes.len() >= target_bytes {
                    bytes.truncate(target_bytes);
                    break;
                }
            }
            if bytes.is_empty() {
                return Err(FingerprintError::Capture("empty-stream".into()));
            }
            Ok(bytes)
        };

        let bytes = timeout(budget, capture)
            .await
            .map_err(|_| FingerprintError::Capture("timeout".into()))??;

        file.write_all(&bytes)
            .map_err(|err| FingerprintError::Capture(format!("write: {err}")))?;

        Ok(CapturedSample { bytes, _file: file })
    }

    async fn submit(
        &self,
        service_url: &str,
        token: Option<&str>,
        encoded_sample: &str,
    ) -> Result<RecognitionOutcome, FingerprintError> {
        let Some(token) = token else {
            return Ok(RecognitionOutcome::AuthError);
        };

        let body = json!({
            "api_token": token,
            "audio": encoded_sample,
            "return": "music",
        });

        let request = self.client.post(service_url).json(&body);
        let response = timeout(
            Duration::from_millis(self.config.submit_timeout_ms),
            request.send(),
        )
        .await
        .map_err(|_| FingerprintError::Submit("timeout".into()))?
        .map_err(|_| FingerprintError::Submit("network".into()))?;

        if !response.status().is_success() {
            return Err(FingerprintError::Submit(format!(
                "status-{}",
                response.status().as_u16()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|_| FingerprintError::Submit("bad-json".into()))?;
        parse_recognition_response(&payload)
    }
}

struct CapturedSample {
    bytes: Vec<u8>,
    _file: NamedTempFile,
}

/// Maps the service JSON into the tagged outcome. Auth (900) and quota (901)
/// codes are a distinct class from a well-formed no-match response.
pub fn parse_recognition_response(payload: &Value) -> Result<RecognitionOutcome, FingerprintError> {
    if let Some(error) = payload.get("error") {
        let code = error.get("error_code").and_then(Value::as_i64).unwrap_or(0);
        return match code {
            900 => Ok(RecognitionOutcome::AuthError),
            901 => Ok(RecognitionOutcome::QuotaError),
            other => Err(FingerprintError::Submit(format!("service-error-{other}"))),
        };
    }

    match payload.get("status").and_then(Value::as_str) {
        Some("success") => {}
        _ => return Err(FingerprintError::Submit("unexpected-shape".into())),
    }

    let Some(result) = payload.get("result").filter(|value| !value.is_null()) else {
        return Ok(RecognitionOutcome::NoMatch);
    };

    let artist = result
        .get("artist")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let title = result
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let (Some(artist), Some(title)) = (artist, title) else {
        return Ok(RecognitionOutcome::NoMatch);
    };

    let confidence = result
        .get("score")
        .and_then(Value::as_f64)
        .map(|score| (score / 100.0).clamp(0.0, 1.0))
        .unwrap_or(0.75);
    let genre = result
        .get("genre")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(RecognitionOutcome::Match {
        artist: artist.to_string(),
        title: title.to_string(),
        confidence,
        genre,
    })
}

fn outcome_label(outcome: &RecognitionOutcome) -> &'static str {
    match outcome {
        RecognitionOutcome::Match { .. } => "match",
        RecognitionOutcome::NoMatch => "no_match",
        RecognitionOutcome::AuthError => "auth_error",
        RecognitionOutcome::QuotaError => "quota_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_match_with_score_and_genre() {
        let payload = json!({
            "status": "success",
            "result": { "artist": "Grupo Niche", "title": "Cali Pachanguero", "score": 92, "genre": "Salsa" }
        });
        let outcome = parse_recognition_response(&payload).unwrap();
        assert_eq!(
            outcome,
            RecognitionOutcome::Match {
                artist: "Grupo Niche".into(),
                title: "Cali Pachanguero".into(),
                confidence: 0.92,
                genre: Some("Salsa".into()),
            }
        );
    }

    #[test]
    fn null_result_is_a_valid_no_match() {
        let payload = json!({ "status": "success", "result": null });
        assert_eq!(
            parse_recognition_response(&payload).unwrap(),
            RecognitionOutcome::NoMatch
        );
    }

    #[test]
    fn auth_and_quota_codes_are_distinct_from_no_match() {
        let auth = json!({ "error": { "error_code": 900, "error_message": "bad token" } });
        let quota = json!({ "error": { "error_code": 901, "error_message": "limit" } });
        assert_eq!(
            parse_recognition_response(&auth).unwrap(),
            RecognitionOutcome::AuthError
        );
        assert_eq!(
            parse_recognition_response(&quota).unwrap(),
            RecognitionOutcome::QuotaError
        );
    }

    #[test]
    fn unknown_service_errors_surface_as_submit_errors() {
        let payload = json!({ "error": { "error_code": 500 } });
        assert!(parse_recognition_response(&payload).is_err());
    }

    #[test]
    fn match_without_artist_or_title_degrades_to_no_match() {
        let payload = json!({ "status": "success", "result": { "artist": "", "title": "Something" } });
        assert_eq!(
            parse_recognition_response(&payload).unwrap(),
            RecognitionOutcome::NoMatch
        );
    }
}
