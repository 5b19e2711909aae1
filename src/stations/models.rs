use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Confidence floor for every non-prediction detection source. Predicted
/// plays always sit strictly below this so downstream consumers can filter
/// them out with a single comparison.
pub const MIN_DETECTION_CONFIDENCE: f64 = 0.60;

pub const PROTOCOL_CONFIDENCE: f64 = 0.90;
/// Band for a protocol title that carried no artist separator. Real signal,
/// but the artist is a guess.
pub const PROTOCOL_NO_ARTIST_CONFIDENCE: f64 = 0.65;
pub const FINGERPRINT_PRIMARY_CONFIDENCE: f64 = 0.80;
pub const FINGERPRINT_SECONDARY_CONFIDENCE: f64 = 0.70;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    #[serde(rename = "streamUrl")]
    pub stream_url: String,
    pub country: Option<String>,
    pub tags: Vec<String>,
    #[serde(rename = "lastUpdatedAt")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastSong")]
    pub last_song: Option<String>,
    #[serde(rename = "failureStreak")]
    pub failure_streak: i32,
}

impl Station {
    /// Bookkeeping after a real detection. `last_updated_at` never moves
    /// backwards, even if clocks or out-of-order completions hand us an
    /// older timestamp.
    pub fn mark_detected(&mut self, now: DateTime<Utc>, last_song: String) {
        self.failure_streak = 0;
        if self.last_updated_at.is_none_or(|prev| now > prev) {
            self.last_updated_at = Some(now);
        }
        self.last_song = Some(last_song);
    }

    pub fn mark_missed(&mut self) {
        self.failure_streak = self.failure_streak.saturating_add(1);
    }

    pub fn activity_state(&self, now: DateTime<Utc>) -> ActivityState {
        match self.last_updated_at {
            Some(updated) if now - updated <= Duration::hours(24) => ActivityState::ActiveToday,
            Some(updated) if now - updated <= Duration::hours(48) => ActivityState::ActiveYesterday,
            _ => ActivityState::Inactive,
        }
    }
}

/// Derived from last-updated age, never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    ActiveToday,
    ActiveYesterday,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    ProtocolMetadata,
    FingerprintPrimary,
    FingerprintSecondary,
    Prediction,
}

impl DetectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::ProtocolMetadata => "protocol_metadata",
            DetectionSource::FingerprintPrimary => "fingerprint_primary",
            DetectionSource::FingerprintSecondary => "fingerprint_secondary",
            DetectionSource::Prediction => "prediction",
        }
    }

}

/// Immutable once written; only the orchestrator creates these.
#[derive(Debug, Clone, Serialize)]
pub struct PlayRecord {
    pub id: Uuid,
    #[serde(rename = "stationId")]
    pub station_id: String,
    pub artist: String,
    pub title: String,
    #[serde(rename = "detectedAt")]
    pub detected_at: DateTime<Utc>,
    pub source: DetectionSource,
    pub confidence: f64,
    pub note: Option<String>,
}

impl PlayRecord {
    pub fn new(
        station_id: &str,
        artist: &str,
        title: &str,
        source: DetectionSource,
        confidence: f64,
        note: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            station_id: station_id.to_string(),
            artist: artist.to_string(),
            title: title.to_string(),
            detected_at: Utc::now(),
            source,
            confidence: confidence.clamp(0.0, 1.0),
            note,
        }
    }
}

/// Per-station (artist, title, count) row over the trailing history window.
#[derive(Debug, Clone)]
pub struct HistoricalPlay {
    pub artist: String,
    pub title: String,
    pub play_count: i64,
}

/// Case- and whitespace-insensitive identity used for dedup comparisons.
pub fn normalized_pair(artist: &str, title: &str) -> (String, String) {
    (
        artist.trim().to_lowercase(),
        title.trim().to_lowercase(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(last_updated_at: Option<DateTime<Utc>>) -> Station {
        Station {
            id: "st-1".into(),
            name: "Radio Uno".into(),
            stream_url: "https://stream.example.com/uno".into(),
            country: Some("EC".into()),
            tags: vec!["tropical".into()],
            last_updated_at,
            last_song: None,
            failure_streak: 0,
        }
    }

    #[test]
    fn activity_state_tracks_last_updated_age() {
        let now = Utc::now();
        assert_eq!(
            station(Some(now - Duration::hours(2))).activity_state(now),
            ActivityState::ActiveToday
        );
        assert_eq!(
            station(Some(now - Duration::hours(30))).activity_state(now),
            ActivityState::ActiveYesterday
        );
        assert_eq!(
            station(Some(now - Duration::hours(72))).activity_state(now),
            ActivityState::Inactive
        );
        assert_eq!(station(None).activity_state(now), ActivityState::Inactive);
    }

    #[test]
    fn last_updated_never_moves_backwards() {
        let now = Utc::now();
        let mut station = station(Some(now));

        station.mark_detected(now - Duration::hours(1), "A - B".into());
        assert_eq!(station.last_updated_at, Some(now));
        assert_eq!(station.last_song.as_deref(), Some("A - B"));

        let later = now + Duration::minutes(5);
        station.mark_detected(later, "C - D".into());
        assert_eq!(station.last_updated_at, Some(later));
    }

    #[test]
    fn failure_streak_resets_on_detection_and_saturates_on_misses() {
        let mut station = station(None);
        station.mark_missed();
        station.mark_missed();
        assert_eq!(station.failure_streak, 2);

        station.mark_detected(Utc::now(), "A - B".into());
        assert_eq!(station.failure_streak, 0);

        station.failure_streak = i32::MAX;
        station.mark_missed();
        assert_eq!(station.failure_streak, i32::MAX);
    }

    #[test]
    fn detection_source_serializes_to_its_wire_string() {
        for source in [
            DetectionSource::ProtocolMetadata,
            DetectionSource::FingerprintPrimary,
            DetectionSource::FingerprintSecondary,
            DetectionSource::Prediction,
        ] {
            let value = serde_json::to_value(source).unwrap();
            assert_eq!(value, serde_json::Value::String(source.as_str().into()));
            let parsed: DetectionSource = serde_json::from_value(value).unwrap();
            assert_eq!(parsed, source);
        }
    }

    #[test]
    fn detection_confidences_sit_above_the_floor() {
        assert!(PROTOCOL_CONFIDENCE >= MIN_DETECTION_CONFIDENCE);
        assert!(FINGERPRINT_PRIMARY_CONFIDENCE >= MIN_DETECTION_CONFIDENCE);
        assert!(FINGERPRINT_SECONDARY_CONFIDENCE >= MIN_DETECTION_CONFIDENCE);
        assert!(PROTOCOL_NO_ARTIST_CONFIDENCE >= MIN_DETECTION_CONFIDENCE);
        assert!(PROTOCOL_NO_ARTIST_CONFIDENCE < PROTOCOL_CONFIDENCE);
    }

    #[test]
    fn normalized_pair_ignores_case_and_padding() {
        assert_eq!(
            normalized_pair("  Joe Arroyo ", "La Rebelión"),
            normalized_pair("joe arroyo", "la rebelión")
        );
    }
}
