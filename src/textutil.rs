use once_cell::sync::Lazy;
use regex::Regex;

/// Kanji, hiragana and katakana runs (including the long-vowel mark).
static SOURCE_SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[一-龠]+|[ぁ-ゔ]+|[ァ-ヴー]+").expect("source script regex"));
static QUOTE_BRACKET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[「」]").expect("quote bracket"));

/// Characters that open a spoken line; a short line followed by one of these is read as a
/// speaker label.
pub const OPEN_BRACKETS: [char; 6] = ['「', '"', '(', '（', '*', '['];

/// Column width used when reflowing dialogue back into textbox lines.
pub const WRAP_WIDTH: usize = 70;

pub fn contains_source_script(text: &str) -> bool {
    SOURCE_SCRIPT_RE.is_match(text)
}

pub fn has_quote_brackets(text: &str) -> bool {
    QUOTE_BRACKET_RE.is_match(text)
}

pub fn starts_with_open_bracket(text: &str) -> bool {
    text.trim()
        .chars()
        .next()
        .map(|c| OPEN_BRACKETS.contains(&c))
        .unwrap_or(false)
}

/// Maps full-width punctuation the model tends to leave behind to ASCII.
pub fn normalize_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '？' => out.push('?'),
            '！' => out.push('!'),
            '。' => out.push('.'),
            '…' => out.push_str("..."),
            '\u{3000}' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Greedy word wrap. All whitespace (newlines included) collapses to single spaces first, so
/// the result is the paragraph refilled to `width` columns. A word that does not fit may break
/// after a hyphen between two alphanumerics; words longer than a line are split.
/// Empty input yields a single empty line.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    let mut line_len = 0usize;

    for word in text.split_whitespace() {
        let mut chars: Vec<char> = word.chars().collect();
        loop {
            let word_len = chars.len();
            let sep = usize::from(line_len > 0);
            if line_len + sep + word_len <= width {
                if sep == 1 {
                    line.push(' ');
                }
                line.extend(chars.iter());
                line_len += sep + word_len;
                break;
            }
            let room = if line_len == 0 {
                width
            } else {
                width.saturating_sub(line_len + 1)
            };
            if let Some(split) = hyphen_break(&chars, room) {
                if line_len > 0 {
                    line.push(' ');
                }
                let rest = chars.split_off(split);
                line.extend(chars.iter());
                lines.push(std::mem::take(&mut line));
                line_len = 0;
                chars = rest;
                continue;
            }
            if word_len <= width {
                lines.push(std::mem::take(&mut line));
                line_len = 0;
                continue;
            }
            // Overlong word: fill the rest of the current line with its head.
            if room == 0 {
                lines.push(std::mem::take(&mut line));
                line_len = 0;
                continue;
            }
            if line_len > 0 {
                line.push(' ');
            }
            let rest = chars.split_off(room);
            line.extend(chars.iter());
            lines.push(std::mem::take(&mut line));
            line_len = 0;
            chars = rest;
            if chars.is_empty() {
                break;
            }
        }
    }
    if !line.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}

/// Longest head of `chars` ending in a word-internal hyphen that fits in `room` columns.
fn hyphen_break(chars: &[char], room: usize) -> Option<usize> {
    (2..chars.len())
        .take_while(|&split| split <= room)
        .filter(|&split| {
            chars[split - 1] == '-'
                && chars[split - 2].is_alphanumeric()
                && chars[split].is_alphanumeric()
        })
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_japanese_scripts() {
        assert!(contains_source_script("こんにちは"));
        assert!(contains_source_script("Hello 勇者"));
        assert!(contains_source_script("ポーション"));
        assert!(!contains_source_script("Hello there!"));
        assert!(!contains_source_script("“quoted”"));
    }

    #[test]
    fn normalizes_full_width_punctuation() {
        assert_eq!(normalize_punctuation("What？！"), "What?!");
        assert_eq!(normalize_punctuation("Well…\u{3000}ok。"), "Well... ok.");
    }

    #[test]
    fn open_bracket_detection_trims() {
        assert!(starts_with_open_bracket("  「Hi」"));
        assert!(starts_with_open_bracket("(whisper)"));
        assert!(!starts_with_open_bracket("Hello"));
        assert!(!starts_with_open_bracket("   "));
    }

    #[test]
    fn wrap_refills_paragraph() {
        let text = "one two\nthree four five";
        assert_eq!(wrap_text(text, 9), vec!["one two", "three", "four five"]);
        assert_eq!(wrap_text("short line", 70), vec!["short line"]);
    }

    #[test]
    fn wrap_breaks_after_hyphens() {
        assert_eq!(wrap_text("a well-known fact", 8), vec!["a well-", "known", "fact"]);
        assert_eq!(
            wrap_text("state-of-the-art", 10),
            vec!["state-of-", "the-art"]
        );
        assert_eq!(wrap_text("x -- y", 3), vec!["x", "--", "y"]);
    }

    #[test]
    fn wrap_splits_long_words_and_keeps_empty() {
        assert_eq!(wrap_text("", 70), vec![String::new()]);
        assert_eq!(wrap_text("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(wrap_text("ab cdefgh", 4), vec!["ab c", "defg", "h"]);
    }
}
