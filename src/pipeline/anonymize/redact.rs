use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use zeroize::Zeroizing;

use super::types::{PiiCategory, PiiSpan};

/// Shortest name token propagated on its own ("Smith" after "John Smith").
const MIN_NAME_TOKEN_CHARS: usize = 3;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[A-Z_]+\]").expect("invalid placeholder pattern"));

/// A value to hunt for across the whole letter once it has been seen once.
pub(crate) struct KnownValue {
    pattern: Regex,
    category: PiiCategory,
}

/// Build search patterns for every detected value, plus the individual tokens
/// of detected names. Matching is case-insensitive and tolerant to spacing.
pub(crate) fn known_values(spans: &[PiiSpan]) -> Vec<KnownValue> {
    let mut seen: Vec<(PiiCategory, Zeroizing<String>)> = Vec::new();
    let mut values = Vec::new();

    let mut push = |category: PiiCategory, value: &str, values: &mut Vec<KnownValue>| {
        let lower = Zeroizing::new(value.to_lowercase());
        if value.trim().is_empty() || seen.iter().any(|(c, v)| *c == category && **v == *lower) {
            return;
        }
        seen.push((category, lower));
        if let Some(pattern) = value_pattern(category, value) {
            values.push(KnownValue { pattern, category });
        }
    };

    for span in spans {
        push(span.category, span.raw_value(), &mut values);
        if span.category == PiiCategory::Name {
            for token in span.raw_value().split_whitespace() {
                let token = token.trim_matches(|c: char| !c.is_alphanumeric());
                if token.chars().count() >= MIN_NAME_TOKEN_CHARS {
                    push(PiiCategory::Name, token, &mut values);
                }
            }
        }
    }
    values
}

fn value_pattern(category: PiiCategory, value: &str) -> Option<Regex> {
    let body = if category == PiiCategory::NhsNumber {
        // Same digits, any grouping.
        value
            .chars()
            .filter(char::is_ascii_digit)
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(r"[ \-]?")
    } else {
        value
            .split_whitespace()
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(r"\s+")
    };
    if body.is_empty() {
        return None;
    }

    let starts_word = value.trim().starts_with(|c: char| c.is_alphanumeric());
    let ends_word = value.trim().ends_with(|c: char| c.is_alphanumeric());
    let pattern = format!(
        "{}{}{}",
        if starts_word { r"\b" } else { "" },
        body,
        if ends_word { r"\b" } else { "" }
    );
    RegexBuilder::new(&pattern).case_insensitive(true).build().ok()
}

/// Spans for every further occurrence of a known value in `text`.
pub(crate) fn propagate(text: &str, known: &[KnownValue]) -> Vec<PiiSpan> {
    let mut spans = Vec::new();
    for value in known {
        for m in value.pattern.find_iter(text) {
            spans.push(PiiSpan::new(value.category, m.start(), m.end(), m.as_str(), 0.7));
        }
    }
    spans
}

/// Merge overlapping spans into their union. The category comes from the
/// widest contributing span, confidence breaking ties.
pub(crate) fn merge_spans(mut spans: Vec<PiiSpan>) -> Vec<(usize, usize, PiiCategory)> {
    spans.retain(|s| !s.is_empty());
    spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut merged: Vec<(usize, usize, PiiCategory, usize, f32)> = Vec::new();
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start < last.1 => {
                last.1 = last.1.max(span.end);
                let wider = span.len() > last.3;
                let same_but_surer = span.len() == last.3 && span.confidence > last.4;
                if wider || same_but_surer {
                    last.2 = span.category;
                    last.3 = span.len();
                    last.4 = span.confidence;
                }
            }
            _ => merged.push((span.start, span.end, span.category, span.len(), span.confidence)),
        }
    }
    merged.into_iter().map(|(s, e, c, _, _)| (s, e, c)).collect()
}

/// Replace merged ranges with placeholders. Returns the new text and the
/// number of placeholders written.
pub(crate) fn apply_placeholders(text: &str, ranges: &[(usize, usize, PiiCategory)]) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for &(start, end, category) in ranges {
        out.push_str(&text[cursor..start]);
        out.push_str(category.placeholder());
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    (out, ranges.len())
}

/// Last line of defence: any remaining word-bounded occurrence of a detected
/// value is replaced unless it sits inside a placeholder.
pub(crate) fn scrub_residual(text: String, spans: &[PiiSpan]) -> (String, usize) {
    let mut text = text;
    let mut extra = 0;
    for span in spans {
        let Some(pattern) = value_pattern(span.category, span.raw_value()) else {
            continue;
        };

        let guarded: Vec<(usize, usize)> = PLACEHOLDER
            .find_iter(&text)
            .map(|m| (m.start(), m.end()))
            .collect();
        let hits: Vec<(usize, usize)> = pattern
            .find_iter(&text)
            .map(|m| (m.start(), m.end()))
            .filter(|(s, e)| !guarded.iter().any(|(gs, ge)| s < ge && gs < e))
            .collect();
        if hits.is_empty() {
            continue;
        }

        let ranges: Vec<_> = hits.iter().map(|&(s, e)| (s, e, span.category)).collect();
        let (scrubbed, n) = apply_placeholders(&text, &ranges);
        text = scrubbed;
        extra += n;
    }
    (text, extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(category: PiiCategory, text: &str, value: &str) -> PiiSpan {
        let start = text.find(value).unwrap();
        PiiSpan::new(category, start, start + value.len(), value, 0.9)
    }

    #[test]
    fn overlapping_spans_merge_to_union() {
        let text = "Address: 12 High Street, Leeds LS1 4AB";
        let spans = vec![
            span(PiiCategory::Address, text, "LS1 4AB"),
            span(PiiCategory::Address, text, "12 High Street, Leeds LS1 4AB"),
            span(PiiCategory::Name, text, "Leeds"),
        ];
        let merged = merge_spans(spans);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].2, PiiCategory::Address);
        assert_eq!(&text[merged[0].0..merged[0].1], "12 High Street, Leeds LS1 4AB");
    }

    #[test]
    fn partial_overlap_covers_both() {
        let spans = vec![
            PiiSpan::new(PiiCategory::Name, 0, 5, "abcde", 0.9),
            PiiSpan::new(PiiCategory::Contact, 3, 9, "defghi", 0.9),
        ];
        let merged = merge_spans(spans);
        assert_eq!(merged, vec![(0, 9, PiiCategory::Contact)]);
    }

    #[test]
    fn adjacent_spans_stay_separate() {
        let spans = vec![
            PiiSpan::new(PiiCategory::Name, 0, 4, "John", 0.9),
            PiiSpan::new(PiiCategory::Name, 4, 9, "Smith", 0.9),
        ];
        assert_eq!(merge_spans(spans).len(), 2);
    }

    #[test]
    fn placeholders_replace_ranges_in_order() {
        let text = "Name John, NHS 9434765919, Tel 0113";
        let ranges = vec![
            (5, 9, PiiCategory::Name),
            (15, 25, PiiCategory::NhsNumber),
            (31, 35, PiiCategory::Contact),
        ];
        let (out, n) = apply_placeholders(text, &ranges);
        assert_eq!(out, "Name [NAME], NHS [NHS_NUMBER], Tel [CONTACT]");
        assert_eq!(n, 3);
    }

    #[test]
    fn recurring_mentions_found_case_insensitively() {
        let text = "John Smith was seen. Mr SMITH reports pain. john  smith agrees.";
        let known = known_values(&[span(PiiCategory::Name, text, "John Smith")]);
        let found = propagate(text, &known);
        let covered: Vec<&str> = found.iter().map(|s| &text[s.start..s.end]).collect();
        assert!(covered.contains(&"SMITH"));
        assert!(covered.contains(&"john  smith"));
    }

    #[test]
    fn name_tokens_respect_word_boundaries() {
        let text = "Ann Lee attended. Annual review booked.";
        let known = known_values(&[span(PiiCategory::Name, text, "Ann Lee")]);
        let found = propagate(text, &known);
        assert!(found.iter().all(|s| &text[s.start..s.end] != "Ann" || s.start == 0));
        assert!(!found.iter().any(|s| text[s.start..].starts_with("Annual")));
    }

    #[test]
    fn nhs_number_matches_any_grouping() {
        let text = "NHS 943 476 5919 / ref 9434765919 / 943-476-5919";
        let known = known_values(&[span(PiiCategory::NhsNumber, text, "943 476 5919")]);
        assert_eq!(propagate(text, &known).len(), 3);
    }

    #[test]
    fn residual_scrub_ignores_placeholders() {
        let spans = vec![PiiSpan::new(PiiCategory::Name, 0, 4, "Lowe", 0.9)];
        let (out, n) = scrub_residual("[NAME] and lowe".to_string(), &spans);
        assert_eq!(out, "[NAME] and [NAME]");
        assert_eq!(n, 1);
    }

    #[test]
    fn residual_scrub_leaves_words_containing_a_short_value() {
        let spans = vec![PiiSpan::new(PiiCategory::Name, 8, 10, "Ng", 0.85)];
        let text = "Dear Dr [NAME], unstable angina with ongoing symptoms. Seen by Ng.";
        let (out, n) = scrub_residual(text.to_string(), &spans);
        assert!(out.contains("unstable angina with ongoing symptoms"));
        assert!(out.ends_with("Seen by [NAME]."));
        assert_eq!(n, 1);
    }
}
