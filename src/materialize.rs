//! Conversion of raw rows into typed import records.
//!
//! Every field that cannot be read from the row falls back to a fixed default.
//! Numeric cells never fail: a value that does not parse is replaced by the
//! default and logged at debug level.

use crate::config::ImportProfile;
use crate::headers::HeaderMap;
use crate::schema::{
    ImportKind, ImportRecord, ProductRecord, RestockRecord, Role, Size, UserRecord, Variant,
};
use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})").expect("valid regex"));
static FR_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4})$").expect("valid regex"));

const DEFAULT_NAME: &str = "Sans nom";
const DEFAULT_GENRE: &str = "mixte";
const DEFAULT_SAISON: &str = "toutes saisons";
const DEFAULT_FAMILLE: &str = "Non classé";

/// Result of materializing one data row.
#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
    Record(ImportRecord),
    /// The row carries no signal at all.
    Unparseable,
}

/// Builds typed records for one import run.
pub struct Materializer<'a> {
    profile: &'a ImportProfile,
    map: &'a HeaderMap,
    /// Run start in Unix milliseconds, used for synthetic keys.
    started_at: u128,
}

impl<'a> Materializer<'a> {
    pub fn new(profile: &'a ImportProfile, map: &'a HeaderMap, started_at: u128) -> Self {
        Self {
            profile,
            map,
            started_at,
        }
    }

    /// Materialize the data row at `row_index` (0-based, header excluded).
    pub fn materialize(&self, row_index: usize, row: &[String]) -> Materialized {
        let mut cells = row.to_vec();
        if cells.len() < self.map.width() {
            cells.resize(self.map.width(), String::new());
        }

        let all_primary_default = self
            .profile
            .primary_fields()
            .all(|field| self.map.cell(field, &cells).is_none());
        if all_primary_default && cells.iter().all(|c| c.trim().is_empty()) {
            return Materialized::Unparseable;
        }

        let record = match self.profile.kind {
            ImportKind::Products => ImportRecord::Product(self.product(row_index, &cells)),
            ImportKind::Users => ImportRecord::User(self.user(&cells)),
            ImportKind::Restock => ImportRecord::Restock(self.restock(row_index, &cells)),
        };
        Materialized::Record(record)
    }

    fn text(&self, field: &str, cells: &[String]) -> Option<String> {
        self.map.cell(field, cells).map(str::to_string)
    }

    fn text_or(&self, field: &str, cells: &[String], default: &str) -> String {
        self.text(field, cells).unwrap_or_else(|| default.to_string())
    }

    fn list(&self, field: &str, cells: &[String]) -> Vec<String> {
        self.map
            .cell(field, cells)
            .map(split_list)
            .unwrap_or_default()
    }

    fn product_code(&self, row_index: usize, cells: &[String]) -> String {
        self.text("codeArticle", cells)
            .unwrap_or_else(|| format!("L{}_{}", self.started_at, row_index))
    }

    fn product(&self, row_index: usize, cells: &[String]) -> ProductRecord {
        let variants = Size::ALL
            .iter()
            .map(|size| {
                let price_field = format!("prix{}", size.as_str());
                let stock_field = format!("stock{}", size.as_str());
                Variant {
                    size: *size,
                    price: parse_price(self.map.cell(&price_field, cells), size.default_price()),
                    stock: parse_quantity(self.map.cell(&stock_field, cells)),
                }
            })
            .collect();

        ProductRecord {
            code_article: self.product_code(row_index, cells),
            name: self.text_or("name", cells, DEFAULT_NAME),
            nom_parfum_inspire: self.text_or("nomParfumInspire", cells, ""),
            marque_inspire: self.text_or("marqueInspire", cells, ""),
            genre: self.text_or("genre", cells, DEFAULT_GENRE).to_lowercase(),
            saison: self.text_or("saison", cells, DEFAULT_SAISON),
            famille_olfactive: self.text_or("familleOlfactive", cells, DEFAULT_FAMILLE),
            note_tete: self.list("noteTete", cells),
            note_coeur: self.list("noteCoeur", cells),
            note_fond: self.list("noteFond", cells),
            description: self.text_or("description", cells, ""),
            image_url: self.text_or("imageURL", cells, ""),
            variants,
        }
    }

    fn user(&self, cells: &[String]) -> UserRecord {
        let supplied = self.text("codeClient", cells);
        let code_client_generated = supplied.is_none();
        let code_client = supplied.unwrap_or_else(|| generate_client_code(self.started_at));

        UserRecord {
            email: self.text_or("email", cells, "").to_lowercase(),
            prenom: self.text_or("prenom", cells, ""),
            nom: self.text_or("nom", cells, ""),
            role: Role::from_cell(&self.text_or("role", cells, "")),
            telephone: self.text("telephone", cells),
            whatsapp: self.text("whatsapp", cells),
            date_naissance: self.text("dateNaissance", cells).and_then(|d| parse_date(&d)),
            adresse: self.text("adresse", cells),
            code_client,
            code_client_generated,
        }
    }

    fn restock(&self, row_index: usize, cells: &[String]) -> RestockRecord {
        let quantities = Size::ALL
            .iter()
            .map(|size| {
                let field = format!("quantite{}", size.as_str());
                (*size, parse_quantity(self.map.cell(&field, cells)))
            })
            .filter(|(_, qty)| *qty > 0)
            .collect();

        RestockRecord {
            code_article: self.product_code(row_index, cells),
            quantities,
        }
    }
}

/// Split a notes cell on `,` or `;`, dropping empty tokens.
pub fn split_list(cell: &str) -> Vec<String> {
    cell.split([',', ';'])
        .map(|token| crate::normalize::normalize(token).trim().to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Parse a price cell such as `29,90 €` or `29.9`.
pub fn parse_price(cell: Option<&str>, default: Decimal) -> Decimal {
    let Some(raw) = cell else {
        return default;
    };
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '€')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    match Decimal::from_str(&cleaned) {
        Ok(price) if price >= Decimal::ZERO => price,
        _ => {
            debug!("Unparseable price '{}', using {}", raw, default);
            default
        }
    }
}

/// Parse a stock or quantity cell. Unparseable and negative values become 0.
pub fn parse_quantity(cell: Option<&str>) -> u32 {
    let Some(raw) = cell else {
        return 0;
    };
    let cleaned = raw.trim().replace(',', ".");

    if let Ok(n) = cleaned.parse::<i64>() {
        return n.clamp(0, i64::from(u32::MAX)) as u32;
    }
    match cleaned.parse::<f64>() {
        Ok(f) if f.is_finite() => f.max(0.0).min(f64::from(u32::MAX)) as u32,
        _ => {
            debug!("Unparseable quantity '{}', using 0", raw);
            0
        }
    }
}

/// Normalize `YYYY-MM-DD` or `DD/MM/YYYY` to `YYYY-MM-DD`.
///
/// Dates that do not exist on the calendar (`31/02/1991`) are dropped.
pub fn parse_date(cell: &str) -> Option<String> {
    let cell = cell.trim();
    let (y, m, d): (i32, u32, u32) = if let Some(caps) = ISO_DATE_RE.captures(cell) {
        (caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)
    } else if let Some(caps) = FR_DATE_RE.captures(cell) {
        (caps[3].parse().ok()?, caps[2].parse().ok()?, caps[1].parse().ok()?)
    } else {
        debug!("Unrecognized date '{}'", cell);
        return None;
    };

    match NaiveDate::from_ymd_opt(y, m, d) {
        Some(date) => Some(date.format("%Y-%m-%d").to_string()),
        None => {
            debug!("Date '{}' does not exist, dropped", cell);
            None
        }
    }
}

/// `C` + last six digits of the clock + three random digits.
pub fn generate_client_code(now_millis: u128) -> String {
    use rand::Rng;
    let suffix = now_millis % 1_000_000;
    let random: u32 = rand::rng().random_range(0..1000);
    format!("C{:06}{:03}", suffix, random)
}
