/// Zero-width and direction-control characters that survive copy/paste and
/// OCR and split tokens invisibly.
const INVISIBLE: &[char] = &[
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}', '\u{202A}',
    '\u{202B}', '\u{202C}', '\u{202D}', '\u{202E}',
];

/// Clean extracted text before it reaches the anonymizer.
///
/// Control and invisible characters are dropped, runs of horizontal whitespace
/// collapse to one space, lines are trimmed and blank lines removed. Line
/// breaks are kept because labelled fields ("Address: ...") are line scoped.
pub fn sanitize_extracted_text(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            let mut out = String::with_capacity(line.len());
            let mut pending_space = false;
            for c in line.chars() {
                if INVISIBLE.contains(&c) || (c.is_control() && c != '\t') {
                    continue;
                }
                if c.is_whitespace() {
                    pending_space = !out.is_empty();
                    continue;
                }
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push(c);
            }
            out
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_null_and_control_bytes() {
        let clean = sanitize_extracted_text("Dose: 500mg\x00\x01\nBP 150/90\x07");
        assert_eq!(clean, "Dose: 500mg\nBP 150/90");
    }

    #[test]
    fn removes_zero_width_characters() {
        let clean = sanitize_extracted_text("chest\u{200B}pain, Smi\u{FEFF}th");
        assert_eq!(clean, "chestpain, Smith");
    }

    #[test]
    fn collapses_horizontal_whitespace() {
        let clean = sanitize_extracted_text("  Name:\t\tJohn    Smith  ");
        assert_eq!(clean, "Name: John Smith");
    }

    #[test]
    fn drops_blank_lines_but_keeps_breaks() {
        let clean = sanitize_extracted_text("Line one\n\n  \nLine two\r\nLine three");
        assert_eq!(clean, "Line one\nLine two\nLine three");
    }

    #[test]
    fn preserves_clinical_symbols() {
        let clean = sanitize_extracted_text("Temp 37.5°C, eGFR 45 mL/min/1.73m², £20");
        assert!(clean.contains("37.5°C"));
        assert!(clean.contains("1.73m²"));
        assert!(clean.contains('£'));
    }

    #[test]
    fn empty_and_control_only_inputs() {
        assert_eq!(sanitize_extracted_text(""), "");
        assert_eq!(sanitize_extracted_text("\x00\x01\x02"), "");
    }
}
