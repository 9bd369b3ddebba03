//! Mapping of raw file headers onto canonical field names.
//!
//! Supplier files rarely agree on column names: the same column shows up as
//! `Code Produit`, `code_produit`, `Réf.` or `CODE_ARTICLE`. Each canonical
//! field carries a list of synonyms, matched against the headers in three
//! tiers:
//!
//! 1. exact, case-insensitive equality;
//! 2. equality after [`fold_key`] (accents stripped, punctuation collapsed);
//! 3. case-insensitive containment (header contains synonym), only for
//!    fields that matched nothing in the first two tiers.
//!
//! Every match is kept in priority order so a row whose preferred column is
//! empty can still be served by the next one.

use crate::config::FieldSpec;
use std::collections::HashMap;

/// Resolved header positions for every canonical field found in a file.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    headers: Vec<String>,
    columns: HashMap<String, Vec<usize>>,
}

impl HeaderMap {
    /// The raw header that supplies `field`, if any matched.
    pub fn header(&self, field: &str) -> Option<&str> {
        let idx = *self.columns.get(field)?.first()?;
        self.headers.get(idx).map(String::as_str)
    }

    /// The first non-empty cell of `row` among the columns matched for `field`.
    pub fn cell<'a>(&self, field: &str, row: &'a [String]) -> Option<&'a str> {
        self.columns
            .get(field)?
            .iter()
            .filter_map(|&idx| row.get(idx))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    pub fn is_mapped(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    /// Number of header columns in the file.
    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// Canonical fields that matched no header.
    pub fn unmapped<'a>(&self, fields: &'a [FieldSpec]) -> Vec<&'a str> {
        fields
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| !self.is_mapped(name))
            .collect()
    }
}

/// Resolve `headers` against the synonym lists in `fields`.
///
/// A header that equals one field's synonym, exactly or after folding, is
/// owned by that field and never offered to another one through
/// containment. Containment is only tried for fields with no equal header,
/// so `Nom du parfum inspiré` cannot take `name` away from `Nom Lolly`.
pub fn resolve(headers: &[String], fields: &[FieldSpec]) -> HeaderMap {
    let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    let folded: Vec<String> = headers.iter().map(|h| fold_key(h)).collect();

    let exact = |syn: &str| -> Vec<usize> {
        let syn = syn.to_lowercase();
        (0..headers.len()).filter(|&i| lowered[i] == syn).collect()
    };
    let folded_equal = |syn: &str| -> Vec<usize> {
        let key = fold_key(syn);
        if key.is_empty() {
            return Vec::new();
        }
        (0..headers.len()).filter(|&i| folded[i] == key).collect()
    };

    let tiers: [&dyn Fn(&str) -> Vec<usize>; 2] = [&exact, &folded_equal];

    // Owners of each header position: every exact match first, then every
    // folded match
    let mut owner: HashMap<usize, &str> = HashMap::new();
    for tier in tiers {
        for field in fields {
            for syn in non_empty(&field.synonyms) {
                for idx in tier(syn) {
                    owner.entry(idx).or_insert(field.name.as_str());
                }
            }
        }
    }

    let mut columns = HashMap::new();
    for field in fields {
        let name = field.name.as_str();
        let mut found: Vec<usize> = Vec::new();

        for tier in tiers {
            for syn in non_empty(&field.synonyms) {
                for idx in tier(syn) {
                    if owner.get(&idx) == Some(&name) && !found.contains(&idx) {
                        found.push(idx);
                    }
                }
            }
        }

        if found.is_empty() {
            for syn in non_empty(&field.synonyms) {
                let syn = syn.to_lowercase();
                for idx in (0..headers.len()).filter(|i| !owner.contains_key(i)) {
                    if lowered[idx].contains(&syn) && !found.contains(&idx) {
                        found.push(idx);
                    }
                }
            }
        }

        if found.is_empty() {
            tracing::debug!("No header matches field '{}'", name);
        } else {
            columns.insert(field.name.clone(), found);
        }
    }

    HeaderMap {
        headers: headers.to_vec(),
        columns,
    }
}

fn non_empty(synonyms: &[String]) -> impl Iterator<Item = &str> {
    synonyms.iter().map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// Lower-case, strip diacritics, collapse every run of non-alphanumerics to a
/// single `_` and trim leading/trailing underscores.
///
/// `"Notes de Tête (1er)"` → `"notes_de_tete_1er"`.
pub fn fold_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;

    for c in s.chars().flat_map(char::to_lowercase) {
        let folded = fold_char(c);
        let parts: &str = match folded {
            Some(f) => f,
            None if c.is_alphanumeric() => {
                if pending_sep && !out.is_empty() {
                    out.push('_');
                }
                pending_sep = false;
                out.push(c);
                continue;
            }
            None => {
                pending_sep = true;
                continue;
            }
        };
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.push_str(parts);
    }

    out
}

fn fold_char(c: char) -> Option<&'static str> {
    Some(match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'æ' => "ae",
        'ç' => "c",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'ñ' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'œ' => "oe",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'ý' | 'ÿ' => "y",
        'ß' => "ss",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_profile;
    use crate::schema::ImportKind;

    fn headers(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn row(raw: &[&str]) -> Vec<String> {
        headers(raw)
    }

    #[test]
    fn test_fold_key() {
        assert_eq!(fold_key("Notes de Tête (1er)"), "notes_de_tete_1er");
        assert_eq!(fold_key("  Prénom  "), "prenom");
        assert_eq!(fold_key("__Famille--Olfactive__"), "famille_olfactive");
        assert_eq!(fold_key("Cœur"), "coeur");
        assert_eq!(fold_key("---"), "");
    }

    #[test]
    fn test_exact_match_on_product_headers() {
        let profile = builtin_profile(ImportKind::Products);
        let map = resolve(
            &headers(&["code_produit", "nom_lolly", "nom_parfum_inspire", "marque_inspire"]),
            &profile.fields,
        );
        assert_eq!(map.header("codeArticle"), Some("code_produit"));
        assert_eq!(map.header("name"), Some("nom_lolly"));
        assert_eq!(map.header("nomParfumInspire"), Some("nom_parfum_inspire"));
        assert_eq!(map.header("marqueInspire"), Some("marque_inspire"));
        assert!(!map.is_mapped("saison"));
    }

    #[test]
    fn test_exact_match_is_case_insensitive() {
        let profile = builtin_profile(ImportKind::Users);
        let map = resolve(&headers(&["EMAIL", "Prenom", "NOM"]), &profile.fields);
        assert_eq!(map.header("email"), Some("EMAIL"));
        assert_eq!(map.header("prenom"), Some("Prenom"));
        assert_eq!(map.header("nom"), Some("NOM"));
    }

    #[test]
    fn test_substring_match() {
        let profile = builtin_profile(ImportKind::Products);
        let map = resolve(
            &headers(&["Ref", "Prix 15ml (€)", "Marque du parfum"]),
            &profile.fields,
        );
        assert_eq!(map.header("prix15ml"), Some("Prix 15ml (€)"));
        assert_eq!(map.header("marqueInspire"), Some("Marque du parfum"));
    }

    #[test]
    fn test_accent_normalized_match() {
        let profile = builtin_profile(ImportKind::Products);
        let map = resolve(
            &headers(&["Note Tête", "Famille-Olfactive", "Note  Cœur"]),
            &profile.fields,
        );
        assert_eq!(map.header("noteTete"), Some("Note Tête"));
        assert_eq!(map.header("noteCoeur"), Some("Note  Cœur"));
        assert_eq!(map.header("familleOlfactive"), Some("Famille-Olfactive"));
    }

    #[test]
    fn test_exact_owner_not_stolen_by_substring() {
        let profile = builtin_profile(ImportKind::Users);
        // "prenom" contains "nom" but belongs to the first-name field
        let map = resolve(&headers(&["prenom", "email"]), &profile.fields);
        assert_eq!(map.header("prenom"), Some("prenom"));
        assert!(!map.is_mapped("nom"));
    }

    #[test]
    fn test_folded_match_outranks_containment() {
        let profile = builtin_profile(ImportKind::Products);
        let map = resolve(
            &headers(&["code", "Nom du parfum inspiré", "Nom Lolly", "Marque"]),
            &profile.fields,
        );
        assert_eq!(map.header("codeArticle"), Some("code"));
        assert_eq!(map.header("name"), Some("Nom Lolly"));
        assert_eq!(map.header("nomParfumInspire"), Some("Nom du parfum inspiré"));
        assert_eq!(map.header("marqueInspire"), Some("Marque"));
        assert_eq!(
            map.cell("name", &row(&["L001", "Black Opium", "Nuit Étoilée", "YSL"])),
            Some("Nuit Étoilée")
        );
    }

    #[test]
    fn test_cell_skips_empty_candidates() {
        let profile = builtin_profile(ImportKind::Users);
        let map = resolve(&headers(&["email", "courriel"]), &profile.fields);
        assert_eq!(map.cell("email", &row(&["", "b@example.com"])), Some("b@example.com"));
        assert_eq!(map.cell("email", &row(&["a@example.com", "b@example.com"])), Some("a@example.com"));
        assert_eq!(map.cell("email", &row(&[" ", ""])), None);
        assert_eq!(map.cell("email", &row(&[])), None);
    }

    #[test]
    fn test_unmapped_fields() {
        let profile = builtin_profile(ImportKind::Restock);
        let map = resolve(&headers(&["code", "qte_30ml"]), &profile.fields);
        assert_eq!(map.unmapped(&profile.fields), vec!["quantite15ml", "quantite50ml"]);
        assert_eq!(map.width(), 2);
    }
}
