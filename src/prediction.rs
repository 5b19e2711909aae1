use rand::seq::SliceRandom;

use crate::config::PredictionConfig;
use crate::stations::{HistoricalPlay, Station};

pub const HISTORICAL_CONFIDENCE: f64 = 0.30;
pub const HOUR_OF_DAY_CONFIDENCE: f64 = 0.20;
pub const NAME_GENRE_CONFIDENCE: f64 = 0.15;
pub const EVERGREEN_CONFIDENCE: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionMethod {
    Historical,
    HourOfDay,
    NameGenre,
    Evergreen,
}

impl PredictionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionMethod::Historical => "historical",
            PredictionMethod::HourOfDay => "hour_of_day",
            PredictionMethod::NameGenre => "name_genre",
            PredictionMethod::Evergreen => "evergreen",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub artist: String,
    pub title: String,
    pub genre: &'static str,
    pub confidence: f64,
    pub method: PredictionMethod,
    pub justification: String,
}

/// A curated pool entry: artist, title, selection weight.
type PoolEntry = (&'static str, &'static str, u32);

const TROPICAL_POOL: &[PoolEntry] = &[
    ("Joe Arroyo", "La Rebelión", 5),
    ("Grupo Niche", "Cali Pachanguero", 5),
    ("Héctor Lavoe", "El Cantante", 4),
    ("Oscar D'León", "Llorarás", 4),
    ("Juan Luis Guerra", "Burbujas de Amor", 3),
    ("Sonora Dinamita", "Mi Cucu", 3),
    ("Los Hermanos Rosario", "Rompecintura", 2),
    ("El Gran Combo", "Brujería", 2),
];

const URBAN_POOL: &[PoolEntry] = &[
    ("Bad Bunny", "Tití Me Preguntó", 5),
    ("Daddy Yankee", "Gasolina", 4),
    ("Karol G", "Provenza", 4),
    ("Feid", "Luna", 3),
    ("Don Omar", "Danza Kuduro", 3),
    ("Wisin & Yandel", "Rakata", 2),
    ("Ozuna", "Se Preparó", 2),
];

const BALLAD_POOL: &[PoolEntry] = &[
    ("Ricardo Arjona", "Historia de Taxi", 4),
    ("Alejandro Sanz", "Amiga Mía", 4),
    ("Mon Laferte", "Tu Falta de Querer", 3),
    ("Camilo Sesto", "Perdóname", 3),
    ("Rocío Dúrcal", "Amor Eterno", 3),
    ("Luis Miguel", "La Incondicional", 3),
];

const ROCK_POOL: &[PoolEntry] = &[
    ("Soda Stereo", "De Música Ligera", 5),
    ("Caifanes", "La Célula Que Explota", 3),
    ("Héroes del Silencio", "Entre Dos Tierras", 3),
    ("Enanitos Verdes", "Lamento Boliviano", 4),
    ("Maná", "Oye Mi Amor", 3),
];

const POP_POOL: &[PoolEntry] = &[
    ("Shakira", "Antología", 4),
    ("Juanes", "La Camisa Negra", 4),
    ("Carlos Vives", "Volví a Nacer", 3),
    ("Camila", "Abrázame", 3),
    ("Reik", "Ya Me Enteré", 2),
    ("Morat", "Besos en Guerra", 2),
];

/// Last-resort pool; always non-empty, so the selector is total.
const EVERGREEN_POOL: &[PoolEntry] = &[
    ("Queen", "Bohemian Rhapsody", 5),
    ("The Beatles", "Hey Jude", 4),
    ("Michael Jackson", "Billie Jean", 4),
    ("ABBA", "Dancing Queen", 3),
    ("Bee Gees", "Stayin' Alive", 3),
    ("Earth, Wind & Fire", "September", 3),
    ("Gloria Gaynor", "I Will Survive", 2),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Genre {
    Tropical,
    Urban,
    Ballad,
    Rock,
    Pop,
}

impl Genre {
    fn as_str(&self) -> &'static str {
        match self {
            Genre::Tropical => "tropical",
            Genre::Urban => "urban",
            Genre::Ballad => "ballad",
            Genre::Rock => "rock",
            Genre::Pop => "pop",
        }
    }

    fn pool(&self) -> &'static [PoolEntry] {
        match self {
            Genre::Tropical => TROPICAL_POOL,
            Genre::Urban => URBAN_POOL,
            Genre::Ballad => BALLAD_POOL,
            Genre::Rock => ROCK_POOL,
            Genre::Pop => POP_POOL,
        }
    }
}

/// Station-name keyword → genre pool. First hit wins, scanned in order.
const GENRE_KEYWORDS: &[(&str, Genre)] = &[
    ("salsa", Genre::Tropical),
    ("tropical", Genre::Tropical),
    ("caribe", Genre::Tropical),
    ("cumbia", Genre::Tropical),
    ("merengue", Genre::Tropical),
    ("urban", Genre::Urban),
    ("reggaeton", Genre::Urban),
    ("flow", Genre::Urban),
    ("hits", Genre::Urban),
    ("balada", Genre::Ballad),
    ("romantica", Genre::Ballad),
    ("amor", Genre::Ballad),
    ("recuerdos", Genre::Ballad),
    ("rock", Genre::Rock),
    ("clasica", Genre::Rock),
    ("pop", Genre::Pop),
    ("fm", Genre::Pop),
];

/// Four fixed day segments; each maps to a curated genre pool.
fn segment_for_hour(hour: u32) -> (&'static str, Genre) {
    match hour {
        0..=5 => ("overnight", Genre::Ballad),
        6..=11 => ("morning", Genre::Tropical),
        12..=17 => ("afternoon", Genre::Pop),
        _ => ("evening", Genre::Urban),
    }
}

/// Never-fails selector. Strategies run in order; the first that produces a
/// candidate wins, and the evergreen pool guarantees there always is one.
#[derive(Clone)]
pub struct Predictor {
    config: PredictionConfig,
}

impl Predictor {
    pub fn new(config: PredictionConfig) -> Self {
        Self { config }
    }

    pub fn predict(
        &self,
        station: &Station,
        history: &[HistoricalPlay],
        local_hour: u32,
    ) -> Prediction {
        if let Some(prediction) = self.from_history(history) {
            return prediction;
        }
        if let Some(prediction) = from_hour_of_day(local_hour) {
            return prediction;
        }
        if let Some(prediction) = from_station_name(&station.name) {
            return prediction;
        }
        from_evergreen()
    }

    fn from_history(&self, history: &[HistoricalPlay]) -> Option<Prediction> {
        let total_plays: i64 = history.iter().map(|play| play.play_count).sum();
        if total_plays < self.config.min_history_plays {
            return None;
        }

        let mut rng = rand::thread_rng();
        let pick = history
            .choose_weighted(&mut rng, |play| play.play_count.max(1) as f64)
            .ok()?;

        Some(Prediction {
            artist: pick.artist.clone(),
            title: pick.title.clone(),
            genre: "history",
            confidence: HISTORICAL_CONFIDENCE,
            method: PredictionMethod::Historical,
            justification: format!(
                "played {} of the station's last {} detected spins",
                pick.play_count, total_plays
            ),
        })
    }
}

fn from_hour_of_day(local_hour: u32) -> Option<Prediction> {
    let (segment, genre) = segment_for_hour(local_hour % 24);
    let (artist, title) = pick_from_pool(genre.pool())?;
    Some(Prediction {
        artist: artist.to_string(),
        title: title.to_string(),
        genre: genre.as_str(),
        confidence: HOUR_OF_DAY_CONFIDENCE,
        method: PredictionMethod::HourOfDay,
        justification: format!("{segment} segment leans {}", genre.as_str()),
    })
}

fn from_station_name(name: &str) -> Option<Prediction> {
    let normalized = name.to_lowercase();
    let (keyword, genre) = GENRE_KEYWORDS
        .iter()
        .find(|(keyword, _)| normalized.contains(keyword))?;
    let (artist, title) = pick_from_pool(genre.pool())?;
    Some(Prediction {
        artist: artist.to_string(),
        title: title.to_string(),
        genre: genre.as_str(),
        confidence: NAME_GENRE_CONFIDENCE,
        method: PredictionMethod::NameGenre,
        justification: format!("station name matched keyword '{keyword}'"),
    })
}

fn from_evergreen() -> Prediction {
    let (artist, title) =
        pick_from_pool(EVERGREEN_POOL).unwrap_or(("Queen", "Bohemian Rhapsody"));
    Prediction {
        artist: artist.to_string(),
        title: title.to_string(),
        genre: "evergreen",
        confidence: EVERGREEN_CONFIDENCE,
        method: PredictionMethod::Evergreen,
        justification: "universal evergreen pool".to_string(),
    }
}

fn pick_from_pool(pool: &'static [PoolEntry]) -> Option<(&'static str, &'static str)> {
    let mut rng = rand::thread_rng();
    pool.choose_weighted(&mut rng, |(_, _, weight)| *weight)
        .ok()
        .map(|(artist, title, _)| (*artist, *title))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PredictionConfig;
    use crate::stations::MIN_DETECTION_CONFIDENCE;

    fn predictor() -> Predictor {
        Predictor::new(PredictionConfig {
            min_history_plays: 5,
            history_window_days: 14,
            history_top_limit: 10,
        })
    }

    fn station(name: &str) -> Station {
        Station {
            id: "st".into(),
            name: name.into(),
            stream_url: "https://stream.example.com".into(),
            country: None,
            tags: vec![],
            last_updated_at: None,
            last_song: None,
            failure_streak: 0,
        }
    }

    #[test]
    fn predictor_is_total_over_arbitrary_inputs() {
        let predictor = predictor();
        for i in 0..1000u32 {
            let name = match i % 4 {
                0 => String::new(),
                1 => "Radio Salsa del Caribe".to_string(),
                2 => format!("Station {i}"),
                _ => "\u{0}weird\u{7f}".to_string(),
            };
            let prediction = predictor.predict(&station(&name), &[], i % 24);
            assert!(!prediction.artist.trim().is_empty());
            assert!(!prediction.title.trim().is_empty());
            assert!(!prediction.justification.is_empty());
        }
    }

    #[test]
    fn prediction_confidences_stay_below_detection_floor() {
        for confidence in [
            HISTORICAL_CONFIDENCE,
            HOUR_OF_DAY_CONFIDENCE,
            NAME_GENRE_CONFIDENCE,
            EVERGREEN_CONFIDENCE,
        ] {
            assert!(confidence < MIN_DETECTION_CONFIDENCE);
        }
    }

    #[test]
    fn historical_strategy_weights_toward_the_most_played_pair() {
        let predictor = predictor();
        let history = vec![
            HistoricalPlay {
                artist: "A".into(),
                title: "X".into(),
                play_count: 5,
            },
            HistoricalPlay {
                artist: "B".into(),
                title: "Y".into(),
                play_count: 2,
            },
        ];

        let mut picked_a = 0;
        let mut picked_b = 0;
        for _ in 0..300 {
            let prediction = predictor.predict(&station("Historyless FM"), &history, 10);
            assert_eq!(prediction.method, PredictionMethod::Historical);
            match (prediction.artist.as_str(), prediction.title.as_str()) {
                ("A", "X") => picked_a += 1,
                ("B", "Y") => picked_b += 1,
                other => panic!("unexpected pick {other:?}"),
            }
        }
        assert!(picked_a > picked_b);
    }

    #[test]
    fn thin_history_falls_through_to_hour_of_day() {
        let predictor = predictor();
        let history = vec![HistoricalPlay {
            artist: "A".into(),
            title: "X".into(),
            play_count: 2,
        }];
        let prediction = predictor.predict(&station("Anonymous 99.9"), &history, 3);
        assert_eq!(prediction.method, PredictionMethod::HourOfDay);
        assert_eq!(prediction.genre, "ballad");
    }

    #[test]
    fn station_name_keywords_select_a_genre_pool() {
        let prediction = from_station_name("La Máquina de la Salsa").unwrap();
        assert_eq!(prediction.genre, "tropical");
        assert_eq!(prediction.method, PredictionMethod::NameGenre);
        assert!(TROPICAL_POOL
            .iter()
            .any(|(artist, title, _)| *artist == prediction.artist && *title == prediction.title));
    }

    #[test]
    fn every_segment_maps_to_a_nonempty_pool() {
        for hour in 0..24 {
            let (_, genre) = segment_for_hour(hour);
            assert!(!genre.pool().is_empty(), "hour {hour}");
        }
        assert!(!EVERGREEN_POOL.is_empty());
    }
}
