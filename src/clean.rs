//! Text cleaning for extracted bulletins.
//!
//! Five independently toggleable sub-operations, applied in a fixed order:
//! encoding repair → unicode folding → layout-artifact removal → whitespace
//! normalization → legal-text normalization.
//!
//! Cleaning never fails the pipeline. A sub-operation that errors is
//! skipped — its input text passes through unchanged — and a warning is
//! recorded for the log.

use regex::Regex;

use crate::config::CleaningConfig;

/// Non-fatal cleaning issue. Recorded, never escalated.
#[derive(Debug, Clone)]
pub struct CleaningWarning {
    pub operation: &'static str,
    pub message: String,
}

impl std::fmt::Display for CleaningWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cleaning step '{}' skipped: {}", self.operation, self.message)
    }
}

#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub text: String,
    pub warnings: Vec<CleaningWarning>,
}

/// Run the enabled sub-operations over `text` in the reference order.
pub fn clean_text(text: &str, config: &CleaningConfig) -> CleanOutcome {
    if !config.enabled {
        return CleanOutcome {
            text: text.to_string(),
            warnings: Vec::new(),
        };
    }

    let mut out = text.to_string();
    let mut warnings = Vec::new();

    let steps: [(&'static str, bool, fn(&str) -> Result<String, String>); 5] = [
        ("fix_encoding", config.fix_encoding, fix_encoding),
        ("normalize_unicode", config.normalize_unicode, normalize_unicode),
        ("remove_artifacts", config.remove_artifacts, remove_artifacts),
        (
            "normalize_whitespace",
            config.normalize_whitespace,
            normalize_whitespace,
        ),
        (
            "normalize_legal_text",
            config.normalize_legal_text,
            normalize_legal_text,
        ),
    ];

    for (name, enabled, op) in steps {
        if !enabled {
            continue;
        }
        match op(&out) {
            Ok(cleaned) => out = cleaned,
            Err(message) => warnings.push(CleaningWarning {
                operation: name,
                message,
            }),
        }
    }

    CleanOutcome {
        text: out,
        warnings,
    }
}

/// Repair the common UTF-8-decoded-as-Latin-1 sequences that OCR and legacy
/// uploaders leave behind, and drop replacement/control characters.
fn fix_encoding(text: &str) -> Result<String, String> {
    // Longest sequences first so partial prefixes don't shadow them.
    const MOJIBAKE: &[(&str, &str)] = &[
        ("\u{00e2}\u{0080}\u{009c}", "\""), // â€œ
        ("\u{00e2}\u{0080}\u{009d}", "\""), // â€�
        ("\u{00e2}\u{0080}\u{0093}", "-"),  // â€“
        ("\u{00e2}\u{0080}\u{0099}", "'"),  // â€™
        ("\u{00c3}\u{00a1}", "á"),
        ("\u{00c3}\u{00a9}", "é"),
        ("\u{00c3}\u{00ad}", "í"),
        ("\u{00c3}\u{00b3}", "ó"),
        ("\u{00c3}\u{00ba}", "ú"),
        ("\u{00c3}\u{00b1}", "ñ"),
        ("\u{00c3}\u{0081}", "Á"),
        ("\u{00c3}\u{0089}", "É"),
        ("\u{00c3}\u{008d}", "Í"),
        ("\u{00c3}\u{0093}", "Ó"),
        ("\u{00c3}\u{009a}", "Ú"),
        ("\u{00c3}\u{0091}", "Ñ"),
    ];

    let mut out = text.to_string();
    for (bad, good) in MOJIBAKE {
        if out.contains(bad) {
            out = out.replace(bad, good);
        }
    }

    out.retain(|c| c == '\n' || c == '\t' || c == '\r' || !c.is_control());
    out = out.replace('\u{FFFD}', "");
    Ok(out)
}

/// Fold typographic characters to their plain equivalents.
fn normalize_unicode(text: &str) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => out.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2212}' => out.push('-'),
            '\u{00A0}' | '\u{2009}' | '\u{202F}' | '\u{2007}' => out.push(' '),
            '\u{2026}' => out.push_str("..."),
            '\u{FB01}' => out.push_str("fi"),
            '\u{FB02}' => out.push_str("fl"),
            '\u{00AD}' => {} // soft hyphen
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Remove layout artifacts: lines repeated across pages (running headers
/// and footers) and standalone page numbers.
fn remove_artifacts(text: &str) -> Result<String, String> {
    let page_number =
        Regex::new(r"^\s*(?:-\s*)?\d{1,4}(?:\s*-)?\s*$").map_err(|e| e.to_string())?;
    let page_of = Regex::new(r"(?i)^\s*p[áa]g(?:ina)?\.?\s+\d+(?:\s+de\s+\d+)?\s*$")
        .map_err(|e| e.to_string())?;

    // Count short non-empty lines; a line repeated three or more times is a
    // running header or footer.
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() && trimmed.chars().count() < 80 {
            *counts.entry(trimmed).or_insert(0) += 1;
        }
    }

    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim();
        let repeated = counts.get(trimmed).copied().unwrap_or(0) >= 3;
        if repeated || page_number.is_match(line) || page_of.is_match(line) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    Ok(out)
}

/// Normalize whitespace without destroying columnar alignment: runs of
/// three or more spaces are kept (tables rely on them), double spaces
/// collapse, trailing whitespace and excess blank lines go.
fn normalize_whitespace(text: &str) -> Result<String, String> {
    let mut lines: Vec<String> = Vec::new();
    for line in text.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let line = line.replace('\t', "    ");
        let mut cleaned = String::with_capacity(line.len());
        let mut spaces = 0usize;
        for c in line.trim_end().chars() {
            if c == ' ' {
                spaces += 1;
                continue;
            }
            if spaces > 0 {
                let n = if spaces == 2 { 1 } else { spaces };
                for _ in 0..n {
                    cleaned.push(' ');
                }
                spaces = 0;
            }
            cleaned.push(c);
        }
        lines.push(cleaned);
    }

    // Collapse runs of blank lines to a single blank line.
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in &lines {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    Ok(out.trim_end_matches('\n').to_string() + "\n")
}

/// Standardize the abbreviations and citation forms bulletin text uses
/// inconsistently.
fn normalize_legal_text(text: &str) -> Result<String, String> {
    let rules: [(&str, &str); 7] = [
        (r"\bArts?\.\s*", "Artículo "),
        (r"\bFracc\.\s*", "Fracción "),
        (r"\bNo\.\s*(\d)", "Número $1"),
        (r"\bNúm\.\s*(\d)", "Número $1"),
        (r"\bExp\.\s*(\d)", "Expediente $1"),
        (r"\bD\.\s*O\.\s*F\.", "DOF"),
        (r"\bL\.\s*G\.\s*C\.\s*G\.", "LGCG"),
    ];

    let mut out = text.to_string();
    for (pattern, replacement) in rules {
        let re = Regex::new(pattern).map_err(|e| e.to_string())?;
        out = re.replace_all(&out, replacement).into_owned();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_on() -> CleaningConfig {
        CleaningConfig::default()
    }

    #[test]
    fn disabled_is_passthrough() {
        let config = CleaningConfig {
            enabled: false,
            ..Default::default()
        };
        let text = "  raw   text\u{00A0}with  artifacts  ";
        let out = clean_text(text, &config);
        assert_eq!(out.text, text);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn repairs_mojibake() {
        let out = clean_text("Secretar\u{00c3}\u{00ad}a de Educaci\u{00c3}\u{00b3}n", &all_on());
        assert_eq!(out.text.trim(), "Secretaría de Educación");
    }

    #[test]
    fn folds_typographic_characters() {
        let out = clean_text("\u{201C}acuerdo\u{201D} \u{2014} tomo\u{00A0}II\u{2026}", &all_on());
        assert_eq!(out.text.trim(), "\"acuerdo\" - tomo II...");
    }

    #[test]
    fn strips_repeated_headers_and_page_numbers() {
        let page = "PERIODICO OFICIAL DEL ESTADO\nContenido distinto {n}\n- {n} -\n";
        let text: String = (1..=4).map(|n| page.replace("{n}", &n.to_string())).collect();
        let out = clean_text(&text, &all_on());
        assert!(!out.text.contains("PERIODICO OFICIAL"));
        assert!(!out.text.contains("- 2 -"));
        assert!(out.text.contains("Contenido distinto 3"));
    }

    #[test]
    fn keeps_column_alignment_spaces() {
        let config = CleaningConfig {
            remove_artifacts: false,
            ..Default::default()
        };
        let out = clean_text("Partida  doble\nConcepto     Monto\n", &config);
        assert!(out.text.contains("Partida doble"));
        assert!(out.text.contains("Concepto     Monto"));
    }

    #[test]
    fn collapses_blank_line_runs() {
        let out = clean_text("uno\n\n\n\n\ndos\n", &all_on());
        assert_eq!(out.text, "uno\n\ndos\n");
    }

    #[test]
    fn standardizes_legal_abbreviations() {
        let out = clean_text("Conforme al Art. 134 y la Fracc. IV, Exp. 12/2023, D.O.F.", &all_on());
        assert!(out.text.contains("Artículo 134"));
        assert!(out.text.contains("Fracción IV"));
        assert!(out.text.contains("Expediente 12/2023"));
        assert!(out.text.contains("DOF"));
    }

    #[test]
    fn sub_operations_toggle_independently() {
        let config = CleaningConfig {
            normalize_legal_text: false,
            ..Default::default()
        };
        let out = clean_text("Art. 1", &config);
        assert!(out.text.contains("Art. 1"));
    }

    #[test]
    fn never_fails() {
        // Pathological inputs still come back as text, not errors.
        for text in ["", "\u{FFFD}\u{FFFD}", "\0\0\0", "a\r\nb\rc"] {
            let out = clean_text(text, &all_on());
            assert!(out.warnings.is_empty(), "unexpected warnings for {:?}", text);
            let _ = out.text;
        }
    }
}
