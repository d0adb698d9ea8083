use crate::pipeline::anonymize::RedactedText;

/// Word budget of the letter summary.
pub const SUMMARY_MAX_WORDS: usize = 140;
/// Sentences this short are dropped (stray numbering, initials).
const MIN_SENTENCE_CHARS: usize = 4;
/// Rough characters per word used when no sentence fits.
const CHARS_PER_WORD: usize = 6;

/// Extractive summary of a redacted letter: leading sentences up to
/// `max_words` words. Falls back to a character cut when the first sentence
/// alone is over budget.
pub fn summarize(text: &RedactedText, max_words: usize) -> String {
    let clean = text.as_text().split_whitespace().collect::<Vec<_>>().join(" ");
    if clean.is_empty() {
        return String::new();
    }

    let mut out: Vec<&str> = Vec::new();
    let mut count = 0;
    for sentence in split_sentences(&clean) {
        let words = sentence.split_whitespace().count();
        if count + words > max_words {
            break;
        }
        out.push(sentence);
        count += words;
    }

    if out.is_empty() {
        clean.chars().take(max_words * CHARS_PER_WORD).collect()
    } else {
        out.join(" ")
    }
}

/// Split after `.`, `?` or `!` when followed by a space.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;
    for (i, c) in text.char_indices() {
        if c == ' ' && prev_terminal {
            parts.push(text[start..i].trim());
            start = i + 1;
        }
        prev_terminal = matches!(c, '.' | '?' | '!');
    }
    parts.push(text[start..].trim());
    parts
        .into_iter()
        .filter(|p| p.chars().count() >= MIN_SENTENCE_CHARS)
        .collect()
}
