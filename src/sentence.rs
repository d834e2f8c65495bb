//! Sentence-boundary segmentation for the synthesis sequencer.
//!
//! The sequencer synthesizes one sentence at a time, so boundary quality
//! directly affects prosody. This is a rule-based splitter rather than a
//! plain split-on-period: it keeps decimal numbers and common abbreviations
//! intact, understands CJK terminators, and attaches closing quotes and
//! brackets to the sentence they end.

/// Abbreviations whose trailing period does not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "inc", "ltd", "co", "dept",
    "fig", "gen", "gov", "approx", "e.g", "i.e",
];

/// Split text into an ordered list of trimmed, non-empty sentences.
///
/// Text with no terminal punctuation comes back as a single sentence, so the
/// result is non-empty whenever the input contains any non-whitespace.
pub fn split(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let terminal = matches!(c, '.' | '!' | '?' | '。' | '！' | '？' | '…');

        if terminal && !splits_token(&chars, i) {
            // Swallow runs of terminators ("?!", "...") and trailing closers.
            let mut end = i + 1;
            while end < chars.len() && matches!(chars[end], '.' | '!' | '?' | '。' | '！' | '？') {
                end += 1;
            }
            while end < chars.len() && matches!(chars[end], '"' | '\'' | ')' | ']' | '」' | '』')
            {
                end += 1;
            }

            let sentence: String = chars[start..end].iter().collect();
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = end;
            i = end;
        } else {
            i += 1;
        }
    }

    if start < chars.len() {
        let tail: String = chars[start..].iter().collect();
        let tail = tail.trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
    }

    sentences
}

/// True when the terminator at `i` sits inside a token (decimal number or
/// known abbreviation) and must not split the sentence.
fn splits_token(chars: &[char], i: usize) -> bool {
    if chars[i] != '.' {
        return false;
    }

    // Decimal point: digit on both sides, e.g. "3.14".
    let prev_digit = i > 0 && chars[i - 1].is_ascii_digit();
    let next_digit = i + 1 < chars.len() && chars[i + 1].is_ascii_digit();
    if prev_digit && next_digit {
        return true;
    }

    // Word immediately before the period, lowercased, without earlier periods
    // stripped ("e.g." keeps its inner dot for the lookup).
    let mut word_start = i;
    while word_start > 0 {
        let p = chars[word_start - 1];
        if p.is_alphanumeric() || p == '.' {
            word_start -= 1;
        } else {
            break;
        }
    }
    let word: String = chars[word_start..i]
        .iter()
        .collect::<String>()
        .to_lowercase();
    let word = word.trim_end_matches('.');
    if word.is_empty() {
        return false;
    }
    if ABBREVIATIONS.contains(&word) {
        return true;
    }
    // Single letters are initials: "J. Smith".
    word.chars().count() == 1 && word.chars().all(|c| c.is_alphabetic())
}
