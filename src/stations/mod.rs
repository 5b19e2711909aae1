mod models;
mod storage;

pub use models::{
    normalized_pair, ActivityState, DetectionSource, HistoricalPlay, PlayRecord, Station,
    FINGERPRINT_PRIMARY_CONFIDENCE, FINGERPRINT_SECONDARY_CONFIDENCE, MIN_DETECTION_CONFIDENCE,
    PROTOCOL_CONFIDENCE, PROTOCOL_NO_ARTIST_CONFIDENCE,
};
pub use storage::PlayStorage;
