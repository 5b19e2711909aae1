use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::{postgres::PgRow, PgPool, Row};
use thiserror::Error;

use super::{DetectionSource, HistoricalPlay, PlayRecord, Station};
use crate::logging::logger;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    InvalidData(String),
}

/// Persistence collaborator for the scan pipeline. Writes are per-station
/// upserts/inserts on disjoint rows, so no cross-station locking is needed.
#[derive(Clone)]
pub struct PlayStorage {
    pool: PgPool,
}

impl PlayStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Station registry snapshot, loaded once at process start. Edits happen
    /// through the administrative surface, not here.
    pub async fn load_stations(&self) -> Result<Vec<Station>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id,
                   name,
                   stream_url,
                   country,
                   tags,
                   last_updated_at,
                   last_song,
                   failure_streak
            FROM stations
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(keep_valid_stations(rows.into_iter().map(row_to_station)))
    }

    pub async fn upsert_station(&self, station: &Station) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO stations (id, name, stream_url, country, tags, last_updated_at, last_song, failure_streak)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                last_updated_at = EXCLUDED.last_updated_at,
                last_song = EXCLUDED.last_song,
                failure_streak = EXCLUDED.failure_streak
            "#,
        )
        .bind(&station.id)
        .bind(&station.name)
        .bind(&station.stream_url)
        .bind(&station.country)
        .bind(&station.tags)
        .bind(station.last_updated_at)
        .bind(&station.last_song)
        .bind(station.failure_streak)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_play(&self, play: &PlayRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO plays (id, station_id, artist, title, detected_at, source, confidence, note)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(play.id)
        .bind(&play.station_id)
        .bind(&play.artist)
        .bind(&play.title)
        .bind(play.detected_at)
        .bind(play.source.as_str())
        .bind(play.confidence)
        .bind(&play.note)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent play inside the dedup window, if any.
    pub async fn query_recent_play(
        &self,
        station_id: &str,
        window: Duration,
    ) -> Result<Option<(String, String)>, StorageError> {
        let cutoff: DateTime<Utc> = Utc::now() - window;
        let row = sqlx::query(
            r#"
            SELECT artist, title
            FROM plays
            WHERE station_id = $1 AND detected_at >= $2
            ORDER BY detected_at DESC
            LIMIT 1
            "#,
        )
        .bind(station_id)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some((row.try_get("artist")?, row.try_get("title")?)))
    }

    /// Most-played real (non-prediction) pairs over the trailing window,
    /// ordered by play count. Feeds the historical prediction strategy.
    pub async fn query_historical_top(
        &self,
        station_id: &str,
        window: Duration,
        limit: i64,
    ) -> Result<Vec<HistoricalPlay>, StorageError> {
        let cutoff: DateTime<Utc> = Utc::now() - window;
        let rows = sqlx::query(
            r#"
            SELECT artist, title, COUNT(*) AS play_count
            FROM plays
            WHERE station_id = $1
              AND detected_at >= $2
              AND source <> $3
            GROUP BY artist, title
            ORDER BY play_count DESC
            LIMIT $4
            "#,
        )
        .bind(station_id)
        .bind(cutoff)
        .bind(DetectionSource::Prediction.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut plays = Vec::with_capacity(rows.len());
        for row in rows {
            plays.push(HistoricalPlay {
                artist: row.try_get("artist")?,
                title: row.try_get("title")?,
                play_count: row.try_get("play_count")?,
            });
        }
        Ok(plays)
    }
}

/// A malformed registry row is dropped with a warning; it must never take
/// the rest of the fleet out of the cycle.
fn keep_valid_stations(
    results: impl IntoIterator<Item = Result<Station, StorageError>>,
) -> Vec<Station> {
    let mut stations = Vec::new();
    for result in results {
        match result {
            Ok(station) => stations.push(station),
            Err(err) => {
                logger().warn(
                    "storage.station_row_skipped",
                    json!({ "error": err.to_string() }),
                );
            }
        }
    }
    stations
}

fn row_to_station(row: PgRow) -> Result<Station, StorageError> {
    let tags: Option<Vec<Option<String>>> = row.try_get("tags")?;
    let stream_url: String = row.try_get("stream_url")?;
    if stream_url.trim().is_empty() {
        return Err(StorageError::InvalidData(
            "station row has empty stream_url".into(),
        ));
    }

    Ok(Station {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        stream_url,
        country: row.try_get("country")?,
        tags: normalize_string_array(tags),
        last_updated_at: row.try_get("last_updated_at")?,
        last_song: row.try_get("last_song")?,
        failure_streak: row.try_get("failure_streak")?,
    })
}

fn normalize_string_array(value: Option<Vec<Option<String>>>) -> Vec<String> {
    value
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| item.map(|v| v.trim().to_string()).filter(|s| !s.is_empty()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::init_logger;

    fn station(id: &str) -> Station {
        Station {
            id: id.into(),
            name: id.into(),
            stream_url: "https://stream.example.com".into(),
            country: None,
            tags: vec![],
            last_updated_at: None,
            last_song: None,
            failure_streak: 0,
        }
    }

    #[test]
    fn malformed_registry_rows_are_skipped_not_fatal() {
        init_logger("nowplaying-service-rs");
        let results = vec![
            Ok(station("uno")),
            Err(StorageError::InvalidData(
                "station row has empty stream_url".into(),
            )),
            Ok(station("dos")),
        ];

        let stations = keep_valid_stations(results);
        let ids: Vec<&str> = stations.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["uno", "dos"]);
    }

    #[test]
    fn normalize_string_array_drops_blanks() {
        let tags = normalize_string_array(Some(vec![
            Some(" salsa ".into()),
            Some(String::new()),
            None,
            Some("tropical".into()),
        ]));
        assert_eq!(tags, vec!["salsa", "tropical"]);
    }
}
