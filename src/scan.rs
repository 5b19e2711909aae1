use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use chrono::{Duration, Timelike, Utc};
use futures_util::{stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::time::{interval, Instant, MissedTickBehavior};
use url::Url;

use crate::config::{PredictionConfig, ScanConfig};
use crate::fingerprint::{FingerprintClient, RecognitionOutcome, RecognitionTier};
use crate::icy::{IcyMetadataReader, MetadataError};
use crate::logging::logger;
use crate::prediction::Predictor;
use crate::resolver::StreamResolver;
use crate::stations::{
    normalized_pair, ActivityState, DetectionSource, PlayRecord, PlayStorage, Station,
    FINGERPRINT_PRIMARY_CONFIDENCE, FINGERPRINT_SECONDARY_CONFIDENCE, MIN_DETECTION_CONFIDENCE,
    PROTOCOL_CONFIDENCE, PROTOCOL_NO_ARTIST_CONFIDENCE,
};
use crate::titles;

/// One validated artist/title pair on its way to becoming a play row.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    artist: String,
    title: String,
    source: DetectionSource,
    confidence: f64,
    note: Option<String>,
}

/// What the metadata stage produced for one station.
enum ProtocolOutcome {
    Found(Candidate),
    Rejected(&'static str),
    EmptyBlock,
    NoMetadata,
    Unreachable(String),
}

impl ProtocolOutcome {
    /// Fingerprinting is for streams that answered but gave no usable title.
    /// An unreachable stream would only time out a second time.
    fn fingerprint_eligible(&self) -> bool {
        matches!(
            self,
            ProtocolOutcome::Rejected(_) | ProtocolOutcome::NoMetadata
        )
    }

    fn failure_reason(&self) -> String {
        match self {
            ProtocolOutcome::Found(_) => String::new(),
            ProtocolOutcome::Rejected(reason) => format!("rejected-{reason}"),
            ProtocolOutcome::EmptyBlock => "empty-metadata-block".into(),
            ProtocolOutcome::NoMetadata => "no-embedded-metadata".into(),
            ProtocolOutcome::Unreachable(reason) => format!("metadata-{reason}"),
        }
    }
}

fn protocol_outcome(read: Result<Option<String>, MetadataError>) -> ProtocolOutcome {
    match read {
        Ok(Some(raw)) => match protocol_candidate(&raw) {
            Ok(candidate) => ProtocolOutcome::Found(candidate),
            Err(reason) => ProtocolOutcome::Rejected(reason),
        },
        Ok(None) => ProtocolOutcome::EmptyBlock,
        Err(MetadataError::NoMetadata) => ProtocolOutcome::NoMetadata,
        Err(MetadataError::Unreachable(reason)) => ProtocolOutcome::Unreachable(reason),
    }
}

/// Terminal state of a single station scan, for the cycle summary.
enum StationOutcome {
    Detected,
    Deduplicated,
    Predicted,
    NothingDetected(String),
    Skipped(&'static str),
    StorageFailed,
}

#[derive(Debug, Default, Serialize)]
pub struct CycleSummary {
    pub scanned: usize,
    pub detected: usize,
    pub deduplicated: usize,
    pub predicted: usize,
    pub undetected: usize,
    pub skipped: usize,
    #[serde(rename = "storageFailures")]
    pub storage_failures: usize,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    pub reasons: BTreeMap<String, usize>,
}

/// Drives the scan loop: one cycle per tick, stations fanned out through a
/// bounded worker pool, every per-station failure absorbed at this boundary.
pub struct ScanOrchestrator {
    scan: ScanConfig,
    prediction: PredictionConfig,
    fingerprint_enabled: bool,
    storage: PlayStorage,
    resolver: StreamResolver,
    metadata: IcyMetadataReader,
    fingerprint: FingerprintClient,
    predictor: Predictor,
}

impl ScanOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scan: ScanConfig,
        prediction: PredictionConfig,
        fingerprint_enabled: bool,
        storage: PlayStorage,
        resolver: StreamResolver,
        metadata: IcyMetadataReader,
        fingerprint: FingerprintClient,
        predictor: Predictor,
    ) -> Self {
        Self {
            scan,
            prediction,
            fingerprint_enabled,
            storage,
            resolver,
            metadata,
            fingerprint,
            predictor,
        }
    }

    /// Cycles run back to back, never overlapped. A cycle that overruns the
    /// interval delays the next tick instead of stacking up.
    pub async fn run(&self) {
        let mut ticker = interval(StdDuration::from_secs(self.scan.interval_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }

    pub async fn run_cycle(&self) -> CycleSummary {
        let started = Instant::now();

        let stations = match self.storage.load_stations().await {
            Ok(stations) => stations,
            Err(err) => {
                logger().error("scan.load_stations_failed", json!({ "error": err.to_string() }));
                return CycleSummary::default();
            }
        };

        let now = Utc::now();
        let active_today = stations
            .iter()
            .filter(|station| station.activity_state(now) == ActivityState::ActiveToday)
            .count();
        logger().debug(
            "scan.cycle_start",
            json!({
                "stations": stations.len(),
                "activeToday": active_today,
                "concurrency": self.scan.concurrency,
            }),
        );

        let outcomes: Vec<StationOutcome> = stream::iter(stations)
            .map(|station| self.scan_station(station))
            .buffer_unordered(self.scan.concurrency)
            .collect()
            .await;

        let mut summary = CycleSummary {
            scanned: outcomes.len(),
            duration_ms: started.elapsed().as_millis() as u64,
            ..CycleSummary::default()
        };
        for outcome in outcomes {
            match outcome {
                StationOutcome::Detected => summary.detected += 1,
                StationOutcome::Deduplicated => summary.deduplicated += 1,
                StationOutcome::Predicted => summary.predicted += 1,
                StationOutcome::NothingDetected(reason) => {
                    summary.undetected += 1;
                    *summary.reasons.entry(reason).or_insert(0) += 1;
                }
                StationOutcome::Skipped(reason) => {
                    summary.skipped += 1;
                    *summary.reasons.entry(reason.to_string()).or_insert(0) += 1;
                }
                StationOutcome::StorageFailed => summary.storage_failures += 1,
            }
        }

        logger().info("scan.cycle_complete", &summary);
        summary
    }

    async fn scan_station(&self, mut station: Station) -> StationOutcome {
        if Url::parse(&station.stream_url).is_err() {
            logger().warn(
                "scan.station_skipped",
                json!({ "stationId": station.id, "reason": "bad-url" }),
            );
            return StationOutcome::Skipped("bad-url");
        }

        let resolved = match self.resolver.resolve(&station.stream_url).await {
            Ok(url) => Some(url),
            Err(err) => {
                logger().warn(
                    "scan.resolve_failed",
                    json!({ "stationId": station.id, "error": err.to_string() }),
                );
                None
            }
        };

        let mut failure_reason = String::from("unreachable");
        let mut candidate: Option<Candidate> = None;
        let mut fingerprint_eligible = false;

        if let Some(url) = &resolved {
            let outcome = protocol_outcome(self.metadata.read_title(url).await);
            if let ProtocolOutcome::Rejected(reason) = &outcome {
                logger().debug(
                    "scan.title_rejected",
                    json!({ "stationId": station.id, "reason": reason }),
                );
            }
            fingerprint_eligible = outcome.fingerprint_eligible();
            match outcome {
                ProtocolOutcome::Found(found) => candidate = Some(found),
                other => failure_reason = other.failure_reason(),
            }
        }

        if candidate.is_none() && fingerprint_eligible && self.fingerprint_enabled {
            if let Some(url) = &resolved {
                match self.fingerprint.recognize(url).await {
                    Ok((outcome, tier)) => match fingerprint_candidate(&outcome, tier) {
                        Some(found) => candidate = Some(found),
                        None => {
                            if matches!(
                                outcome,
                                RecognitionOutcome::AuthError | RecognitionOutcome::QuotaError
                            ) {
                                logger().warn(
                                    "scan.fingerprint_unavailable",
                                    json!({ "stationId": station.id }),
                                );
                            }
                            failure_reason = "fingerprint-no-match".into();
                        }
                    },
                    Err(err) => {
                        logger().warn(
                            "scan.fingerprint_failed",
                            json!({ "stationId": station.id, "error": err.to_string() }),
                        );
                        failure_reason = "fingerprint-error".into();
                    }
                }
            }
        }

        match candidate {
            Some(candidate) => self.record_detection(&mut station, candidate).await,
            None => self.record_miss(&mut station, failure_reason).await,
        }
    }

    /// Persists a real detection: dedup check, play insert, station refresh.
    /// A dedup hit still refreshes the station and clears the streak; the
    /// station did answer, there is just nothing new to write.
    async fn record_detection(
        &self,
        station: &mut Station,
        candidate: Candidate,
    ) -> StationOutcome {
        debug_assert!(candidate.confidence >= MIN_DETECTION_CONFIDENCE);

        let window = Duration::minutes(self.scan.dedup_window_minutes);
        let recent = match self.storage.query_recent_play(&station.id, window).await {
            Ok(recent) => recent,
            Err(err) => {
                logger().error(
                    "scan.dedup_query_failed",
                    json!({ "stationId": station.id, "error": err.to_string() }),
                );
                None
            }
        };

        let duplicate = is_duplicate(recent.as_ref(), &candidate.artist, &candidate.title);

        station.mark_detected(
            Utc::now(),
            format!("{} - {}", candidate.artist, candidate.title),
        );

        if !duplicate {
            let play = PlayRecord::new(
                &station.id,
                &candidate.artist,
                &candidate.title,
                candidate.source,
                candidate.confidence,
                candidate.note.clone(),
            );
            if let Err(err) = self.storage.insert_play(&play).await {
                logger().error(
                    "scan.insert_play_failed",
                    json!({ "stationId": station.id, "error": err.to_string() }),
                );
                return StationOutcome::StorageFailed;
            }
            logger().info(
                "scan.play_detected",
                json!({
                    "stationId": station.id,
                    "artist": candidate.artist,
                    "title": candidate.title,
                    "source": candidate.source.as_str(),
                    "confidence": candidate.confidence,
                }),
            );
        } else {
            logger().debug(
                "scan.play_deduplicated",
                json!({ "stationId": station.id, "artist": candidate.artist, "title": candidate.title }),
            );
        }

        if let Err(err) = self.storage.upsert_station(station).await {
            logger().error(
                "scan.upsert_station_failed",
                json!({ "stationId": station.id, "error": err.to_string() }),
            );
            return StationOutcome::StorageFailed;
        }

        if duplicate {
            StationOutcome::Deduplicated
        } else {
            StationOutcome::Detected
        }
    }

    /// No real detection this cycle: bump the failure streak and fall back to
    /// a predicted play so consumers always have something to show.
    async fn record_miss(&self, station: &mut Station, reason: String) -> StationOutcome {
        station.mark_missed();

        let history = match self
            .storage
            .query_historical_top(
                &station.id,
                Duration::days(self.prediction.history_window_days),
                self.prediction.history_top_limit,
            )
            .await
        {
            Ok(history) => history,
            Err(err) => {
                logger().warn(
                    "scan.history_query_failed",
                    json!({ "stationId": station.id, "error": err.to_string() }),
                );
                Vec::new()
            }
        };

        let local_hour = chrono::Local::now().hour();
        let prediction = self.predictor.predict(station, &history, local_hour);

        let window = Duration::minutes(self.scan.dedup_window_minutes);
        let recent = self
            .storage
            .query_recent_play(&station.id, window)
            .await
            .unwrap_or(None);
        let duplicate = is_duplicate(recent.as_ref(), &prediction.artist, &prediction.title);

        if !duplicate {
            let play = PlayRecord::new(
                &station.id,
                &prediction.artist,
                &prediction.title,
                DetectionSource::Prediction,
                prediction.confidence,
                Some(format!(
                    "{}: {}",
                    prediction.method.as_str(),
                    prediction.justification
                )),
            );
            if let Err(err) = self.storage.insert_play(&play).await {
                logger().error(
                    "scan.insert_play_failed",
                    json!({ "stationId": station.id, "error": err.to_string() }),
                );
                return StationOutcome::StorageFailed;
            }
        }

        logger().debug(
            "scan.play_predicted",
            json!({
                "stationId": station.id,
                "reason": &reason,
                "method": prediction.method.as_str(),
                "failureStreak": station.failure_streak,
            }),
        );

        if let Err(err) = self.storage.upsert_station(station).await {
            logger().error(
                "scan.upsert_station_failed",
                json!({ "stationId": station.id, "error": err.to_string() }),
            );
            return StationOutcome::StorageFailed;
        }

        if duplicate {
            StationOutcome::NothingDetected(reason)
        } else {
            StationOutcome::Predicted
        }
    }
}

/// Cleans, validates, and splits a raw embedded title into a candidate.
/// `Err` carries the rejection reason for the cycle summary.
fn protocol_candidate(raw: &str) -> Result<Candidate, &'static str> {
    let cleaned = titles::clean(raw);
    if let Some(reason) = titles::rejection_reason(&cleaned) {
        return Err(reason);
    }

    let parsed = titles::parse_artist_title(&cleaned);
    let (confidence, note) = if parsed.is_low_confidence() {
        (
            PROTOCOL_NO_ARTIST_CONFIDENCE,
            Some("missing-artist-separator".to_string()),
        )
    } else {
        (PROTOCOL_CONFIDENCE, None)
    };
    Ok(Candidate {
        artist: parsed.artist.unwrap_or_else(|| "Unknown".to_string()),
        title: parsed.title,
        source: DetectionSource::ProtocolMetadata,
        confidence,
        note,
    })
}

/// Maps a recognition outcome into a candidate. Matches still pass through
/// the placeholder validator; services occasionally echo ad idents back.
fn fingerprint_candidate(
    outcome: &RecognitionOutcome,
    tier: RecognitionTier,
) -> Option<Candidate> {
    let RecognitionOutcome::Match {
        artist,
        title,
        genre,
        ..
    } = outcome
    else {
        return None;
    };

    let combined = format!("{artist} - {title}");
    if !titles::is_valid(&combined) {
        return None;
    }

    let (source, confidence) = match tier {
        RecognitionTier::Primary => (
            DetectionSource::FingerprintPrimary,
            FINGERPRINT_PRIMARY_CONFIDENCE,
        ),
        RecognitionTier::Secondary => (
            DetectionSource::FingerprintSecondary,
            FINGERPRINT_SECONDARY_CONFIDENCE,
        ),
    };

    Some(Candidate {
        artist: artist.clone(),
        title: title.clone(),
        source,
        confidence,
        note: genre.as_ref().map(|g| format!("genre: {g}")),
    })
}

fn is_duplicate(recent: Option<&(String, String)>, artist: &str, title: &str) -> bool {
    match recent {
        Some((recent_artist, recent_title)) => {
            normalized_pair(recent_artist, recent_title) == normalized_pair(artist, title)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_candidate_accepts_a_clean_pair() {
        let candidate = protocol_candidate("Now Playing: Joe Arroyo - La Rebelión").unwrap();
        assert_eq!(candidate.artist, "Joe Arroyo");
        assert_eq!(candidate.title, "La Rebelión");
        assert_eq!(candidate.source, DetectionSource::ProtocolMetadata);
        assert_eq!(candidate.confidence, PROTOCOL_CONFIDENCE);
        assert_eq!(candidate.note, None);
    }

    #[test]
    fn protocol_candidate_rejects_placeholders_with_reason() {
        assert_eq!(protocol_candidate("EN VIVO"), Err("live-placeholder"));
        assert_eq!(protocol_candidate("  "), Err("too-short"));
    }

    #[test]
    fn missing_separator_drops_to_the_reduced_band() {
        let candidate = protocol_candidate("Bohemian Rhapsody").unwrap();
        assert_eq!(candidate.artist, "Unknown");
        assert_eq!(candidate.title, "Bohemian Rhapsody");
        assert_eq!(candidate.note.as_deref(), Some("missing-artist-separator"));
        assert_eq!(candidate.confidence, PROTOCOL_NO_ARTIST_CONFIDENCE);
        assert!(candidate.confidence < PROTOCOL_CONFIDENCE);
        assert!(candidate.confidence >= MIN_DETECTION_CONFIDENCE);
    }

    #[test]
    fn fingerprint_runs_only_when_the_stream_answered_without_a_usable_title() {
        assert!(protocol_outcome(Err(MetadataError::NoMetadata)).fingerprint_eligible());
        assert!(protocol_outcome(Ok(Some("EN VIVO".into()))).fingerprint_eligible());

        let timeout = protocol_outcome(Err(MetadataError::Unreachable("timeout".into())));
        assert!(!timeout.fingerprint_eligible());
        assert_eq!(timeout.failure_reason(), "metadata-timeout");

        assert!(!protocol_outcome(Ok(Some("A - B".into()))).fingerprint_eligible());
        assert!(!protocol_outcome(Ok(None)).fingerprint_eligible());
    }

    #[test]
    fn fingerprint_candidate_maps_tier_to_source_and_confidence() {
        let outcome = RecognitionOutcome::Match {
            artist: "Shakira".into(),
            title: "Antología".into(),
            confidence: 0.92,
            genre: Some("Pop".into()),
        };

        let primary = fingerprint_candidate(&outcome, RecognitionTier::Primary).unwrap();
        assert_eq!(primary.source, DetectionSource::FingerprintPrimary);
        assert_eq!(primary.confidence, FINGERPRINT_PRIMARY_CONFIDENCE);
        assert_eq!(primary.note.as_deref(), Some("genre: Pop"));

        let secondary = fingerprint_candidate(&outcome, RecognitionTier::Secondary).unwrap();
        assert_eq!(secondary.source, DetectionSource::FingerprintSecondary);
        assert_eq!(secondary.confidence, FINGERPRINT_SECONDARY_CONFIDENCE);
    }

    #[test]
    fn fingerprint_candidate_filters_placeholder_echoes() {
        let outcome = RecognitionOutcome::Match {
            artist: "Unknown Artist".into(),
            title: "Track 01".into(),
            confidence: 0.5,
            genre: None,
        };
        assert!(fingerprint_candidate(&outcome, RecognitionTier::Primary).is_none());
        assert!(fingerprint_candidate(&RecognitionOutcome::NoMatch, RecognitionTier::Primary).is_none());
    }

    #[test]
    fn duplicate_check_ignores_case_and_padding() {
        let recent = ("  joe arroyo ".to_string(), "LA REBELIÓN".to_string());
        assert!(is_duplicate(Some(&recent), "Joe Arroyo", "La Rebelión"));
        assert!(!is_duplicate(Some(&recent), "Joe Arroyo", "El Centurión"));
        assert!(!is_duplicate(None, "Joe Arroyo", "La Rebelión"));
    }
}
