use once_cell::sync::Lazy;

/// Canonical artist/title separator used by ICY streams.
const SEPARATOR: &str = " - ";

const MIN_TITLE_LEN: usize = 3;

/// Junk prefixes some encoders prepend to the stream title. Compared
/// case-insensitively, colon included so "Now On Air:Song" strips cleanly.
const JUNK_PREFIXES: &[&str] = &[
    "now on air:",
    "now playing:",
    "current song:",
    "en el aire:",
    "al aire:",
    "sonando:",
    "np:",
];

/// Bump when the placeholder table changes shape or meaning.
pub const PLACEHOLDER_RULES_VERSION: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Match {
    Exact,
    Contains,
    Prefix,
}

/// One row of the placeholder/ad/ident rejection table. This table is the
/// primary defense against false-positive detections; new junk patterns get
/// a row here, never an inline conditional.
struct PlaceholderRule {
    pattern: &'static str,
    kind: Match,
    reason: &'static str,
}

static PLACEHOLDER_RULES: Lazy<Vec<PlaceholderRule>> = Lazy::new(|| {
    vec![
        // Generic unknown-artist markers
        rule("unknown artist", Match::Contains, "unknown-artist-marker"),
        rule("unknown - unknown", Match::Exact, "unknown-pair"),
        rule("artista desconocido", Match::Contains, "unknown-artist-marker"),
        rule("desconocido - desconocido", Match::Exact, "unknown-pair"),
        rule("untitled", Match::Exact, "untitled"),
        // Live-broadcast placeholders
        rule("live stream", Match::Exact, "live-placeholder"),
        rule("live broadcast", Match::Exact, "live-placeholder"),
        rule("en vivo", Match::Exact, "live-placeholder"),
        rule("transmision en vivo", Match::Contains, "live-placeholder"),
        rule("programacion en vivo", Match::Contains, "live-placeholder"),
        // Advertising markers
        rule("advert", Match::Prefix, "advertising"),
        rule("publicidad", Match::Prefix, "advertising"),
        rule("commercial break", Match::Contains, "advertising"),
        rule("spot ", Match::Prefix, "advertising"),
        // Pure station idents
        rule("radio en linea", Match::Contains, "station-ident"),
        rule("online radio", Match::Exact, "station-ident"),
        rule("stream offline", Match::Contains, "station-ident"),
        rule("la mejor musica", Match::Contains, "station-ident"),
        rule("tu radio", Match::Prefix, "station-ident"),
        rule("default", Match::Exact, "station-ident"),
        rule("test", Match::Exact, "station-ident"),
    ]
});

fn rule(pattern: &'static str, kind: Match, reason: &'static str) -> PlaceholderRule {
    PlaceholderRule {
        pattern,
        kind,
        reason,
    }
}

/// Strips junk prefixes, a leading bracketed station tag, and surrounding
/// whitespace/control characters.
pub fn clean(raw: &str) -> String {
    let mut text = raw
        .trim_matches(|c: char| c.is_whitespace() || c.is_control())
        .to_string();

    loop {
        let mut stripped = false;

        for prefix in JUNK_PREFIXES {
            let matches = text
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
            if matches {
                text = text[prefix.len()..].trim_start().to_string();
                stripped = true;
                break;
            }
        }

        if !stripped {
            if let Some(rest) = strip_bracketed_tag(&text) {
                text = rest;
                stripped = true;
            }
        }

        if !stripped {
            break;
        }
    }

    text.trim_matches(|c: char| c.is_whitespace() || c.is_control())
        .to_string()
}

fn strip_bracketed_tag(text: &str) -> Option<String> {
    let close = match text.chars().next()? {
        '[' => ']',
        '(' => ')',
        _ => return None,
    };
    let end = text.find(close)?;
    Some(text[end + close.len_utf8()..].trim_start().to_string())
}

/// True when the cleaned title looks like a real song title. Placeholder
/// rejection runs on the full string, before any artist/title split.
pub fn is_valid(title: &str) -> bool {
    rejection_reason(title).is_none()
}

/// The matching rule's reason, or "too-short", when the title is rejected.
pub fn rejection_reason(title: &str) -> Option<&'static str> {
    let trimmed = title.trim();
    if trimmed.chars().count() < MIN_TITLE_LEN {
        return Some("too-short");
    }

    let lower = trimmed.to_lowercase();
    for rule in PLACEHOLDER_RULES.iter() {
        let hit = match rule.kind {
            Match::Exact => lower == rule.pattern,
            Match::Contains => lower.contains(rule.pattern),
            Match::Prefix => lower.starts_with(rule.pattern),
        };
        if hit {
            return Some(rule.reason);
        }
    }
    None
}

/// A validated title split into its parts. `artist == None` means the
/// separator was missing: the result is usable but low-confidence, which is
/// distinct from a validator rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTitle {
    pub artist: Option<String>,
    pub title: String,
}

impl ParsedTitle {
    pub fn is_low_confidence(&self) -> bool {
        self.artist.is_none()
    }
}

/// Splits on the first ` - `. No separator yields the unknown-artist form.
pub fn parse_artist_title(title: &str) -> ParsedTitle {
    let trimmed = title.trim();
    match trimmed.find(SEPARATOR) {
        Some(pos) => {
            let artist = trimmed[..pos].trim();
            let song = trimmed[pos + SEPARATOR.len()..].trim();
            if artist.is_empty() || song.is_empty() {
                ParsedTitle {
                    artist: None,
                    title: trimmed.to_string(),
                }
            } else {
                ParsedTitle {
                    artist: Some(artist.to_string()),
                    title: song.to_string(),
                }
            }
        }
        None => ParsedTitle {
            artist: None,
            title: trimmed.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_strips_junk_prefix_without_space() {
        assert_eq!(clean("Now On Air:DJ Mix - DJ Mix"), "DJ Mix - DJ Mix");
    }

    #[test]
    fn clean_strips_bracketed_station_tag() {
        assert_eq!(clean("[96.1 FM] Juanes - La Camisa Negra"), "Juanes - La Camisa Negra");
        assert_eq!(clean("(Radio Mar) Bomba Estéreo - Soy Yo"), "Bomba Estéreo - Soy Yo");
    }

    #[test]
    fn clean_strips_control_characters_and_whitespace() {
        assert_eq!(clean("\u{0}\u{1} Shakira - Antología \r\n"), "Shakira - Antología");
    }

    #[test]
    fn clean_handles_stacked_junk() {
        assert_eq!(clean("NP: [HD] Carla Morrison - Disfruto"), "Carla Morrison - Disfruto");
    }

    #[test]
    fn validator_accepts_real_titles() {
        assert!(is_valid("DJ Mix - DJ Mix"));
        assert!(is_valid("Héctor Lavoe - El Cantante"));
    }

    #[test]
    fn validator_rejects_placeholders_with_reason() {
        assert_eq!(rejection_reason("Unknown Artist - Unknown"), Some("unknown-artist-marker"));
        assert_eq!(rejection_reason("EN VIVO"), Some("live-placeholder"));
        assert_eq!(rejection_reason("Publicidad 30s"), Some("advertising"));
        assert_eq!(rejection_reason("La Mejor Musica 24/7"), Some("station-ident"));
    }

    #[test]
    fn validator_rejects_short_and_empty() {
        assert_eq!(rejection_reason(""), Some("too-short"));
        assert_eq!(rejection_reason("ab"), Some("too-short"));
    }

    #[test]
    fn placeholder_rejection_wins_over_unknown_artist_fallback() {
        // No separator present, but the placeholder table still rejects it.
        let cleaned = clean("Transmision En Vivo");
        assert!(!is_valid(&cleaned));
    }

    #[test]
    fn parse_splits_on_first_separator() {
        let parsed = parse_artist_title("DJ Mix - DJ Mix");
        assert_eq!(parsed.artist.as_deref(), Some("DJ Mix"));
        assert_eq!(parsed.title, "DJ Mix");
        assert!(!parsed.is_low_confidence());

        let parsed = parse_artist_title("A - B - C");
        assert_eq!(parsed.artist.as_deref(), Some("A"));
        assert_eq!(parsed.title, "B - C");
    }

    #[test]
    fn parse_without_separator_is_low_confidence() {
        let parsed = parse_artist_title("Bohemian Rhapsody");
        assert_eq!(parsed.artist, None);
        assert_eq!(parsed.title, "Bohemian Rhapsody");
        assert!(parsed.is_low_confidence());
    }

    #[test]
    fn parse_with_empty_side_falls_back_to_whole_title() {
        let parsed = parse_artist_title(" - Song");
        assert_eq!(parsed.artist, None);
        assert!(parsed.is_low_confidence());
    }

    #[test]
    fn rules_table_is_versioned_and_nonempty() {
        assert!(PLACEHOLDER_RULES_VERSION >= 1);
        assert!(!PLACEHOLDER_RULES.is_empty());
    }
}
