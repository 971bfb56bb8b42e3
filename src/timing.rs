//! Word timing: speed bounds and per-word display durations.

use std::time::Duration;

pub const MIN_WPM: u32 = 100;
pub const MAX_WPM: u32 = 1000;
pub const WPM_STEP: u32 = 50;
pub const DEFAULT_WPM: u32 = 300;

/// Applied to the base duration of a word that ends a sentence.
pub const SENTENCE_PAUSE_MULTIPLIER: f64 = 2.0;

const SENTENCE_TERMINATORS: [char; 3] = ['.', '?', '!'];

pub fn clamp_wpm(wpm: u32) -> u32 {
    wpm.clamp(MIN_WPM, MAX_WPM)
}

/// Base display time for one word, `60000 / wpm` rounded to the nearest ms.
pub fn ms_per_word(wpm: u32) -> u64 {
    (60_000.0 / f64::from(clamp_wpm(wpm))).round() as u64
}

/// True when the last character of `word` is `.`, `?` or `!`.
pub fn ends_sentence(word: &str) -> bool {
    word.chars()
        .next_back()
        .is_some_and(|c| SENTENCE_TERMINATORS.contains(&c))
}

/// How long `word` stays on screen at `wpm`.
pub fn word_duration(word: &str, wpm: u32) -> Duration {
    let base = ms_per_word(wpm);
    let ms = if ends_sentence(word) {
        (base as f64 * SENTENCE_PAUSE_MULTIPLIER).round() as u64
    } else {
        base
    };
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_per_word_rounds_to_nearest() {
        assert_eq!(ms_per_word(600), 100);
        assert_eq!(ms_per_word(300), 200);
        // 60000 / 700 = 85.71
        assert_eq!(ms_per_word(700), 86);
        // 60000 / 350 = 171.43
        assert_eq!(ms_per_word(350), 171);
        assert_eq!(ms_per_word(1000), 60);
        assert_eq!(ms_per_word(100), 600);
    }

    #[test]
    fn ms_per_word_matches_formula_across_range() {
        for wpm in MIN_WPM..=MAX_WPM {
            let expected = (60_000.0 / wpm as f64).round() as u64;
            assert_eq!(ms_per_word(wpm), expected, "wpm={wpm}");
        }
    }

    #[test]
    fn out_of_range_speeds_clamp() {
        assert_eq!(clamp_wpm(0), MIN_WPM);
        assert_eq!(clamp_wpm(99), MIN_WPM);
        assert_eq!(clamp_wpm(1001), MAX_WPM);
        assert_eq!(clamp_wpm(u32::MAX), MAX_WPM);
        assert_eq!(ms_per_word(5000), 60);
    }

    #[test]
    fn sentence_detection_uses_trailing_character_only() {
        assert!(ends_sentence("world."));
        assert!(ends_sentence("Go!"));
        assert!(ends_sentence("really?"));
        assert!(!ends_sentence("Hello"));
        assert!(!ends_sentence("however,"));
        assert!(!ends_sentence("\"Stop!\""));
        assert!(!ends_sentence("e.g"));
        assert!(!ends_sentence(""));
    }

    #[test]
    fn sentence_words_get_double_duration() {
        assert_eq!(word_duration("Hello", 600), Duration::from_millis(100));
        assert_eq!(word_duration("world.", 600), Duration::from_millis(200));
        assert_eq!(word_duration("end.", 700), Duration::from_millis(172));
    }
}
