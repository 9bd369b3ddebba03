//! Repair of double-encoded text (UTF-8 bytes read back as Latin-1 / Windows-1252).
//!
//! Supplier spreadsheets are often exported from tools that re-encode an
//! already UTF-8 file, so `é` arrives as `Ã©` and a typographic apostrophe as
//! `â€™`. The table below maps the sequences seen in practice back to the
//! intended character.

/// Known mis-decoded sequences and their repaired form.
///
/// Longer sequences come first so they win over any shorter prefix.
const MOJIBAKE: &[(&str, &str)] = &[
    // Smart punctuation (3-char sequences)
    ("â€™", "'"),
    ("â€œ", "\""),
    ("â€\u{9d}", "\""),
    // Lower-case accented letters
    ("Ã©", "é"),
    ("Ã¨", "è"),
    ("Ãª", "ê"),
    ("Ã«", "ë"),
    ("Ã\u{a0}", "à"),
    ("Ã¢", "â"),
    ("Ã®", "î"),
    ("Ã¯", "ï"),
    ("Ã´", "ô"),
    ("Ã¹", "ù"),
    ("Ã»", "û"),
    ("Ã§", "ç"),
    // Upper-case accented letters (Windows-1252 second byte)
    ("Ã‰", "É"),
    ("Ãˆ", "È"),
    ("Ã€", "À"),
    ("Ã‡", "Ç"),
    ("ÃŠ", "Ê"),
    ("Ã”", "Ô"),
    ("Å“", "œ"),
];

/// Repair known mojibake sequences in `text`.
///
/// Replacements are applied until the text stops changing. Every replacement
/// shortens the string, so this terminates, and the result is a fixed point:
/// `normalize(&normalize(s)) == normalize(s)`.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut current = text.to_string();
    loop {
        let mut changed = false;
        for (broken, fixed) in MOJIBAKE {
            if current.contains(broken) {
                current = current.replace(broken, fixed);
                changed = true;
            }
        }
        if !changed {
            return current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repairs_e_acute() {
        assert_eq!(normalize("cafÃ©"), "café");
    }

    #[test]
    fn test_repairs_upper_case_and_ligature() {
        assert_eq!(normalize("Ã‰lÃ©gance"), "Élégance");
        assert_eq!(normalize("Å“illet"), "œillet");
    }

    #[test]
    fn test_repairs_smart_quotes() {
        assert_eq!(normalize("lâ€™eau"), "l'eau");
        assert_eq!(normalize("â€œNuitâ€\u{9d}"), "\"Nuit\"");
    }

    #[test]
    fn test_clean_text_unchanged() {
        assert_eq!(normalize("Black Opium"), "Black Opium");
        assert_eq!(normalize("Élégance, Nocturne"), "Élégance, Nocturne");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_idempotent_on_nested_sequences() {
        // "Ã¢" repairs to "â", which then forms "â€™"
        let once = normalize("Ã¢€™");
        assert_eq!(once, "'");
        assert_eq!(normalize(&once), once);

        for sample in ["ChÃ¢teau", "Ã‰tÃ© indien", "plain", "Ã"] {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {sample:?}");
        }
    }
}
