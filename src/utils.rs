//! Utility functions for the balancing engine

use chrono::{DateTime, Utc};

/// Strip in-game color codes (a caret followed by a digit) from a name.
pub fn strip_colors(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '^' {
            if let Some(next) = chars.peek() {
                if next.is_ascii_digit() {
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Normalize a display name into its canonical cache-key form.
pub fn normalize_name(raw: &str) -> String {
    strip_colors(raw).trim().to_lowercase()
}

/// Check that a name only contains characters we accept in lookups.
pub fn is_sane(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Round a team average the way it is reported to players.
pub fn round_rating(value: f64) -> i64 {
    value.round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_colors() {
        assert_eq!(strip_colors("^1Red^7Guy"), "RedGuy");
        assert_eq!(strip_colors("plain"), "plain");
        assert_eq!(strip_colors("^notacode"), "^notacode");
        assert_eq!(strip_colors("trailing^"), "trailing^");
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  ^4Blue^7Player  "), "blueplayer");
        assert_eq!(normalize_name("Mino"), "mino");
    }

    #[test]
    fn test_is_sane() {
        assert!(is_sane("player_1"));
        assert!(!is_sane(""));
        assert!(!is_sane("nick name"));
        assert!(!is_sane("weird;drop"));
    }

    #[test]
    fn test_round_rating() {
        assert_eq!(round_rating(1499.5), 1500);
        assert_eq!(round_rating(1499.4), 1499);
    }
}
